use std::time::Duration;

use reqwest::{multipart, Client};
use shared::{
    domain::{derive_step, KycStatus, MerchantId, OnboardingRecord, OnboardingStep, PspType},
    error::{ApiError, ErrorCode},
    protocol::{
        AdminActionResponse, KycDocument, PspSetupRequest, PspSetupResponse,
        RegisterMerchantRequest, RegisterMerchantResponse, IDEMPOTENCY_KEY_HEADER,
    },
};
use storage::{IdempotentAction, SessionStore};
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};
use url::Url;

pub mod error;
pub use error::OnboardingError;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_POLL_INITIAL_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_POLL_MAX_DELAY: Duration = Duration::from_secs(8);
const DEFAULT_POLL_MAX_ATTEMPTS: u32 = 8;

/// The backend reports a repeated PSP setup for a connected merchant as a
/// hard error; the client recognizes it by message and treats it as success.
fn is_already_connected_error(message: &str) -> bool {
    message.to_ascii_lowercase().contains("already connected")
}

/// Register-form input, validated client-side for required-field presence and
/// email/URL shape before any request is sent.
#[derive(Debug, Clone)]
pub struct NewMerchant {
    pub business_name: String,
    pub store_url: String,
    pub region: String,
    pub contact_email: String,
    pub contact_phone: Option<String>,
}

impl NewMerchant {
    fn validate(&self) -> Result<(), OnboardingError> {
        if self.business_name.trim().is_empty() {
            return Err(OnboardingError::Validation(
                "business name is required".to_string(),
            ));
        }
        if self.region.trim().is_empty() {
            return Err(OnboardingError::Validation("region is required".to_string()));
        }

        let email = self.contact_email.trim();
        let valid_email = matches!(
            email.split_once('@'),
            Some((local, domain))
                if !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        ) && !email.contains(char::is_whitespace);
        if !valid_email {
            return Err(OnboardingError::Validation(format!(
                "'{email}' is not a valid contact email"
            )));
        }

        match Url::parse(self.store_url.trim()) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
            _ => Err(OnboardingError::Validation(format!(
                "'{}' is not a valid http(s) store url",
                self.store_url
            ))),
        }
    }
}

/// Outcome of a PSP setup call. `api_key` is populated exactly once, on the
/// first successful connection; the plaintext is never re-displayed after
/// that (only its presence is observable through the session store).
#[derive(Debug, Clone)]
pub struct PspConnection {
    pub api_key: Option<String>,
    pub validated: bool,
    pub already_connected: bool,
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    StepChanged {
        from: OnboardingStep,
        to: OnboardingStep,
    },
    /// The derived step moved backwards. Monotonicity is assumed, not
    /// guaranteed by the protocol, so regressions are reported, not blocked.
    StepRegressed {
        from: OnboardingStep,
        to: OnboardingStep,
    },
    /// The record claims a PSP connection without KYC approval.
    InconsistentRecord {
        merchant_id: MerchantId,
    },
    SessionExpired,
}

/// Bounded exponential backoff for observing an eventually-consistent
/// server-side status change. Replaces the one-shot fixed-delay refresh.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_POLL_INITIAL_DELAY,
            max_delay: DEFAULT_POLL_MAX_DELAY,
            max_attempts: DEFAULT_POLL_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug)]
pub enum PollOutcome {
    /// The awaited transition was observed (or a terminal step was reached).
    Decided(OnboardingRecord),
    /// Attempts were exhausted without a decision; the caller should check
    /// back later instead of trusting a stale view.
    StillPending {
        last: Option<OnboardingRecord>,
        attempts: u32,
    },
}

#[derive(Default)]
struct SessionState {
    last_record: Option<OnboardingRecord>,
    last_step: Option<OnboardingStep>,
}

/// Client for the merchant-onboarding backend: status projection, the
/// register / PSP / admin action dispatchers, and bounded status polling.
/// All server state is authoritative; this client only mirrors it and caches
/// identifiers locally for session continuity.
pub struct OnboardingClient {
    http: Client,
    base_url: String,
    store: SessionStore,
    inner: Mutex<SessionState>,
    events: broadcast::Sender<ClientEvent>,
}

impl OnboardingClient {
    pub fn new(
        base_url: impl Into<String>,
        store: SessionStore,
    ) -> Result<Self, OnboardingError> {
        Self::with_request_timeout(base_url, store, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_request_timeout(
        base_url: impl Into<String>,
        store: SessionStore,
        timeout: Duration,
    ) -> Result<Self, OnboardingError> {
        let http = Client::builder().timeout(timeout).build()?;
        let (events, _) = broadcast::channel(256);
        Ok(Self {
            http,
            base_url: base_url.into(),
            store,
            inner: Mutex::new(SessionState::default()),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn session_store(&self) -> &SessionStore {
        &self.store
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    /// Maps a non-success response onto the error taxonomy. A 401 also
    /// clears the stored operator token: the session is over either way.
    async fn check(
        &self,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, OnboardingError> {
        let status = response.status().as_u16();
        if response.status().is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let ApiError { code, message } = ApiError::from_response_parts(status, &body);

        Err(match code {
            ErrorCode::Unauthorized => {
                if self.store.clear_admin_token().await? {
                    warn!("backend rejected the stored operator token, cleared it");
                }
                let _ = self.events.send(ClientEvent::SessionExpired);
                OnboardingError::SessionExpired
            }
            ErrorCode::Forbidden => OnboardingError::Forbidden(message),
            ErrorCode::NotFound => OnboardingError::NotFound(message),
            ErrorCode::Conflict => OnboardingError::Conflict(message),
            ErrorCode::Internal => OnboardingError::Server { status, message },
            ErrorCode::Validation => OnboardingError::Api { status, message },
        })
    }

    async fn require_merchant(&self) -> Result<MerchantId, OnboardingError> {
        self.store
            .merchant_id()
            .await?
            .ok_or(OnboardingError::MissingMerchant)
    }

    fn step_rank(step: OnboardingStep) -> Option<u8> {
        match step {
            OnboardingStep::Register => Some(0),
            OnboardingStep::Kyc => Some(1),
            OnboardingStep::Psp => Some(2),
            OnboardingStep::Complete => Some(3),
            OnboardingStep::Inconsistent => None,
        }
    }

    /// Installs a fresh record, persists the derived step, and emits change
    /// events. The single write path for the local projection.
    async fn apply_record(&self, record: OnboardingRecord) -> Result<OnboardingStep, OnboardingError> {
        let step = derive_step(Some(&record));
        if step == OnboardingStep::Inconsistent {
            warn!(
                merchant_id = %record.merchant_id,
                kyc_status = ?record.kyc_status,
                "record claims a PSP connection without KYC approval"
            );
            let _ = self.events.send(ClientEvent::InconsistentRecord {
                merchant_id: record.merchant_id.clone(),
            });
        }

        let mut inner = self.inner.lock().await;
        let previous = inner.last_step;
        inner.last_record = Some(record);
        inner.last_step = Some(step);
        drop(inner);

        let previous = match previous {
            Some(step) => Some(step),
            None => self.store.cached_step().await?,
        };
        self.store.set_cached_step(step).await?;

        if let Some(from) = previous {
            if from != step {
                if let (Some(old), Some(new)) = (Self::step_rank(from), Self::step_rank(step)) {
                    if new < old {
                        warn!(%from, to = %step, "onboarding step moved backwards");
                        let _ = self.events.send(ClientEvent::StepRegressed { from, to: step });
                    }
                }
                let _ = self.events.send(ClientEvent::StepChanged { from, to: step });
            }
        } else if step != OnboardingStep::Register {
            let _ = self.events.send(ClientEvent::StepChanged {
                from: OnboardingStep::Register,
                to: step,
            });
        }

        Ok(step)
    }

    /// The step the client currently believes the merchant is in. Derived
    /// from the last fetched record when one exists, the persisted session
    /// otherwise; `Register` when nothing is known at all.
    pub async fn current_step(&self) -> Result<OnboardingStep, OnboardingError> {
        {
            let inner = self.inner.lock().await;
            if let Some(step) = inner.last_step {
                return Ok(step);
            }
        }

        if self.store.merchant_id().await?.is_none() {
            return Ok(OnboardingStep::Register);
        }
        Ok(self
            .store
            .cached_step()
            .await?
            .unwrap_or(OnboardingStep::Kyc))
    }

    pub async fn last_record(&self) -> Option<OnboardingRecord> {
        self.inner.lock().await.last_record.clone()
    }

    /// Registers a new merchant. On success the issued id is persisted
    /// immediately and the local step advances optimistically to `Kyc`.
    pub async fn register(
        &self,
        new_merchant: NewMerchant,
    ) -> Result<RegisterMerchantResponse, OnboardingError> {
        new_merchant.validate()?;

        if let Some(existing) = self.store.merchant_id().await? {
            warn!(%existing, "registering again will replace the cached merchant id");
        }

        let token = self
            .store
            .idempotency_token(IdempotentAction::Register)
            .await?;
        let request = RegisterMerchantRequest {
            business_name: new_merchant.business_name.trim().to_string(),
            store_url: new_merchant.store_url.trim().to_string(),
            region: new_merchant.region.trim().to_string(),
            contact_email: new_merchant.contact_email.trim().to_string(),
            contact_phone: new_merchant.contact_phone,
        };

        let response = self
            .http
            .post(self.endpoint("/merchant/onboarding/register"))
            .header(IDEMPOTENCY_KEY_HEADER, token.as_str())
            .json(&request)
            .send()
            .await?;
        let body: RegisterMerchantResponse = self.check(response).await?.json().await?;

        self.store.set_merchant_id(&body.merchant_id).await?;
        self.store
            .clear_idempotency_token(IdempotentAction::Register)
            .await?;

        {
            let mut inner = self.inner.lock().await;
            inner.last_record = None;
            inner.last_step = Some(OnboardingStep::Kyc);
        }
        self.store.set_cached_step(OnboardingStep::Kyc).await?;
        let _ = self.events.send(ClientEvent::StepChanged {
            from: OnboardingStep::Register,
            to: OnboardingStep::Kyc,
        });

        info!(
            merchant_id = %body.merchant_id,
            auto_approved = body.auto_approved,
            "merchant registered"
        );
        Ok(body)
    }

    /// Fetches the authoritative record for the cached merchant and
    /// re-derives the step from it.
    pub async fn refresh_status(&self) -> Result<OnboardingRecord, OnboardingError> {
        let merchant_id = self.require_merchant().await?;
        self.refresh_status_for(&merchant_id).await
    }

    pub async fn refresh_status_for(
        &self,
        merchant_id: &MerchantId,
    ) -> Result<OnboardingRecord, OnboardingError> {
        let response = self
            .http
            .get(self.endpoint(&format!("/merchant/onboarding/status/{merchant_id}")))
            .send()
            .await?;
        let record: OnboardingRecord = self.check(response).await?.json().await?;
        self.apply_record(record.clone()).await?;
        Ok(record)
    }

    /// Polls the status endpoint with bounded exponential backoff until the
    /// predicate holds or a terminal step is reached. Transient failures
    /// (network, 5xx) consume an attempt and keep polling; anything else
    /// terminates the poll.
    pub async fn poll_status_until<F>(
        &self,
        policy: &PollPolicy,
        mut done: F,
    ) -> Result<PollOutcome, OnboardingError>
    where
        F: FnMut(&OnboardingRecord) -> bool,
    {
        let mut delay = policy.initial_delay;
        let mut last = None;

        for attempt in 1..=policy.max_attempts {
            match self.refresh_status().await {
                Ok(record) => {
                    if done(&record) || derive_step(Some(&record)).is_terminal() {
                        return Ok(PollOutcome::Decided(record));
                    }
                    last = Some(record);
                }
                Err(err) if err.is_transient() => {
                    warn!(attempt, error = %err, "status poll attempt failed, will retry");
                }
                Err(err) => return Err(err),
            }

            if attempt < policy.max_attempts {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(policy.max_delay);
            }
        }

        info!(
            attempts = policy.max_attempts,
            "status poll exhausted without a decision"
        );
        Ok(PollOutcome::StillPending {
            last,
            attempts: policy.max_attempts,
        })
    }

    /// Waits for the backend's KYC decision (the simulated auto-approval in
    /// dev environments lands within a few seconds).
    pub async fn await_kyc_decision(
        &self,
        policy: &PollPolicy,
    ) -> Result<PollOutcome, OnboardingError> {
        self.poll_status_until(policy, |record| {
            !matches!(record.kyc_status, KycStatus::PendingVerification)
        })
        .await
    }

    /// Connects the merchant to a PSP. The returned API key is issued once;
    /// a backend "already connected" rejection is treated as soft success
    /// followed by a status refresh rather than surfaced as a failure.
    pub async fn connect_psp(
        &self,
        psp_type: PspType,
        sandbox_key: &str,
    ) -> Result<PspConnection, OnboardingError> {
        if sandbox_key.trim().is_empty() {
            return Err(OnboardingError::Validation(
                "psp sandbox key is required".to_string(),
            ));
        }
        let merchant_id = self.require_merchant().await?;
        let token = self
            .store
            .idempotency_token(IdempotentAction::PspSetup)
            .await?;

        let request = PspSetupRequest {
            merchant_id,
            psp_type,
            psp_sandbox_key: sandbox_key.to_string(),
        };
        let response = self
            .http
            .post(self.endpoint("/merchant/onboarding/psp/setup"))
            .header(IDEMPOTENCY_KEY_HEADER, token.as_str())
            .json(&request)
            .send()
            .await?;

        match self.check(response).await {
            Ok(response) => {
                let body: PspSetupResponse = response.json().await?;
                self.store.set_api_key(&body.api_key).await?;
                self.store
                    .clear_idempotency_token(IdempotentAction::PspSetup)
                    .await?;

                {
                    let mut inner = self.inner.lock().await;
                    inner.last_step = Some(OnboardingStep::Complete);
                }
                self.store.set_cached_step(OnboardingStep::Complete).await?;
                let _ = self.events.send(ClientEvent::StepChanged {
                    from: OnboardingStep::Psp,
                    to: OnboardingStep::Complete,
                });

                info!(psp = %psp_type, validated = body.validated, "psp connected, api key issued");
                Ok(PspConnection {
                    api_key: Some(body.api_key),
                    validated: body.validated,
                    already_connected: false,
                })
            }
            Err(err)
                if err
                    .server_message()
                    .is_some_and(is_already_connected_error) =>
            {
                info!("backend reports psp already connected, treating as success");
                self.store
                    .clear_idempotency_token(IdempotentAction::PspSetup)
                    .await?;
                if let Err(refresh_err) = self.refresh_status().await {
                    warn!(error = %refresh_err, "status refresh after already-connected failed");
                    self.store.set_cached_step(OnboardingStep::Complete).await?;
                    let mut inner = self.inner.lock().await;
                    inner.last_step = Some(OnboardingStep::Complete);
                }
                Ok(PspConnection {
                    api_key: None,
                    validated: true,
                    already_connected: true,
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Operator approval. Sends the stored bearer token when one exists.
    pub async fn approve(
        &self,
        merchant_id: &MerchantId,
    ) -> Result<AdminActionResponse, OnboardingError> {
        self.admin_post(
            &format!("/merchant/onboarding/approve/{merchant_id}"),
            &[],
        )
        .await
    }

    /// Operator rejection with a reason, passed as a query parameter.
    pub async fn reject(
        &self,
        merchant_id: &MerchantId,
        reason: &str,
    ) -> Result<AdminActionResponse, OnboardingError> {
        self.admin_post(
            &format!("/merchant/onboarding/reject/{merchant_id}"),
            &[("reason", reason)],
        )
        .await
    }

    async fn admin_post(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<AdminActionResponse, OnboardingError> {
        let mut request = self.http.post(self.endpoint(path));
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(token) = self.store.admin_token().await? {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        Ok(self.check(response).await?.json().await?)
    }

    /// Uploads one KYC document for the cached merchant (multipart) and
    /// returns the stored document metadata.
    pub async fn upload_kyc_document(
        &self,
        filename: &str,
        content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<Vec<KycDocument>, OnboardingError> {
        let merchant_id = self.require_merchant().await?;

        let mut part = multipart::Part::bytes(bytes).file_name(filename.to_string());
        if let Some(content_type) = content_type {
            part = part.mime_str(content_type).map_err(|_| {
                OnboardingError::Validation(format!("'{content_type}' is not a valid content type"))
            })?;
        }
        let form = multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(self.endpoint(&format!("/merchant/onboarding/upload/{merchant_id}")))
            .multipart(form)
            .send()
            .await?;
        Ok(self.check(response).await?.json().await?)
    }

    /// Drops the whole local session. Server-side state is untouched.
    pub async fn reset_session(&self) -> Result<(), OnboardingError> {
        self.store.reset().await?;
        let mut inner = self.inner.lock().await;
        *inner = SessionState::default();
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
