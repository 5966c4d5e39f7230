use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{NewMerchant, OnboardingClient, PollOutcome};
use shared::domain::{derive_step, KycStatus, OnboardingRecord, PspType};
use storage::SessionStore;

mod config;

use config::load_settings;

#[derive(Parser, Debug)]
#[command(name = "wizard", about = "Pivota merchant onboarding wizard")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a new merchant and start onboarding.
    Register {
        #[arg(long)]
        business_name: String,
        #[arg(long)]
        store_url: String,
        #[arg(long)]
        region: String,
        #[arg(long)]
        contact_email: String,
        #[arg(long)]
        contact_phone: Option<String>,
    },
    /// Fetch the current onboarding record and derived step.
    Status,
    /// Poll with backoff until the KYC decision lands.
    AwaitKyc {
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Connect a payment service provider. Prints the issued API key once.
    ConnectPsp {
        #[arg(long)]
        psp: PspType,
        #[arg(long)]
        sandbox_key: String,
    },
    /// Upload a KYC document for the registered merchant.
    UploadDocument {
        #[arg(long)]
        file: std::path::PathBuf,
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Clear the local session (server-side state is untouched).
    Reset,
}

fn print_record(record: &OnboardingRecord) {
    println!("merchant:      {}", record.merchant_id);
    println!("business:      {}", record.business_name);
    println!("kyc status:    {:?}", record.kyc_status);
    println!(
        "psp:           {}",
        match record.psp_type {
            Some(psp) => psp.to_string(),
            None => "not connected".to_string(),
        }
    );
    println!("api key:       {}", if record.api_key_issued { "issued" } else { "not issued" });
    println!("step:          {}", derive_step(Some(record)));
    if let Some(reason) = &record.rejection_reason {
        println!("rejected:      {reason}");
    }
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
        Command::Register {
            business_name,
            store_url,
            region,
            contact_email,
            contact_phone,
        } => {
            let response = client
                .register(NewMerchant {
                    business_name,
                    store_url,
                    region,
                    contact_email,
                    contact_phone,
                })
                .await?;
            println!("registered merchant_id={}", response.merchant_id);
            if response.auto_approved {
                println!("KYB auto-approved (confidence {:.2})", response.confidence_score);
            } else {
                println!(
                    "KYB review pending (confidence {:.2}); run `wizard await-kyc`",
                    response.confidence_score
                );
            }
            if let Some(deadline) = response.full_kyb_deadline {
                println!("full KYB documents due by {deadline}");
            }
        }
        Command::Status => {
            let record = client.refresh_status().await?;
            print_record(&record);
        }
        Command::AwaitKyc { max_attempts } => {
            let mut policy = settings.poll_policy();
            if let Some(max_attempts) = max_attempts {
                policy.max_attempts = max_attempts;
            }
            match client.await_kyc_decision(&policy).await? {
                PollOutcome::Decided(record) => {
                    match record.kyc_status {
                        KycStatus::Approved => println!("KYC approved, ready for PSP setup"),
                        KycStatus::Rejected => println!("KYC rejected"),
                        ref other => println!("KYC decision: {other:?}"),
                    }
                    print_record(&record);
                }
                PollOutcome::StillPending { attempts, .. } => {
                    println!("still pending after {attempts} checks, try again later");
                }
            }
        }
        Command::ConnectPsp { psp, sandbox_key } => {
            let connection = client.connect_psp(psp, &sandbox_key).await?;
            if connection.already_connected {
                println!("PSP already connected; nothing to do");
            } else if let Some(api_key) = connection.api_key {
                println!("PSP connected, onboarding complete.");
                println!("API key (shown once, store it safely): {api_key}");
            }
        }
        Command::UploadDocument { file, content_type } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("failed to read '{}'", file.display()))?;
            let filename = file
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("document.bin");
            let documents = client
                .upload_kyc_document(filename, content_type.as_deref(), bytes)
                .await?;
            for document in documents {
                println!("stored {} ({} bytes)", document.filename, document.size_bytes);
            }
        }
        Command::Reset => {
            client.reset_session().await?;
            println!("local session cleared");
        }
    }

    Ok(())
}
