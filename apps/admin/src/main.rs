use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::OnboardingClient;
use shared::domain::{derive_step, MerchantId, OnboardingStep};
use storage::SessionStore;

mod config;

use config::load_settings;

#[derive(Parser, Debug)]
#[command(name = "admin", about = "Pivota onboarding operator console")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show a merchant's onboarding record and derived step.
    Status { merchant_id: String },
    /// Approve a merchant's KYB review.
    Approve { merchant_id: String },
    /// Reject a merchant's KYB review with a reason.
    Reject {
        merchant_id: String,
        #[arg(long)]
        reason: String,
    },
    /// Store the operator bearer token used for approve/reject calls.
    SetToken { token: String },
    /// Forget the stored operator bearer token.
    ClearToken,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let cli = Cli::parse();
    let settings = load_settings();

    let store = SessionStore::new(&settings.database_url)
        .await
        .context("failed to open local session store")?;
    let client =
        OnboardingClient::with_request_timeout(&settings.api_url, store, settings.request_timeout())?;

    match cli.command {
        Command::Status { merchant_id } => {
            let merchant_id = MerchantId::new(merchant_id);
            let record = client.refresh_status_for(&merchant_id).await?;
            let step = derive_step(Some(&record));
            println!("merchant:   {}", record.merchant_id);
            println!("business:   {}", record.business_name);
            println!("kyc status: {:?}", record.kyc_status);
            println!("psp:        {:?}", record.psp_type);
            println!("step:       {step}");
            if step == OnboardingStep::Inconsistent {
                println!(
                    "WARNING: record claims a PSP connection without KYC approval; \
                     escalate to the backend owner"
                );
            }
        }
        Command::Approve { merchant_id } => {
            let response = client.approve(&MerchantId::new(merchant_id)).await?;
            println!("{}", response.status);
        }
        Command::Reject {
            merchant_id,
            reason,
        } => {
            let response = client
                .reject(&MerchantId::new(merchant_id), &reason)
                .await?;
            println!("{}", response.status);
        }
        Command::SetToken { token } => {
            client.session_store().set_admin_token(&token).await?;
            println!("operator token stored");
        }
        Command::ClearToken => {
            client.session_store().clear_admin_token().await?;
            println!("operator token cleared");
        }
    }

    Ok(())
}
