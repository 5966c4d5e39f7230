use std::{collections::HashMap, fs, time::Duration};

use client_core::PollPolicy;

#[derive(Debug)]
pub struct Settings {
    pub api_url: String,
    pub database_url: String,
    pub request_timeout_secs: u64,
    pub poll_initial_delay_ms: u64,
    pub poll_max_delay_ms: u64,
    pub poll_max_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8000".into(),
            database_url: "sqlite://./data/wizard_session.db".into(),
            request_timeout_secs: 10,
            poll_initial_delay_ms: 500,
            poll_max_delay_ms: 8000,
            poll_max_attempts: 8,
        }
    }
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            initial_delay: Duration::from_millis(self.poll_initial_delay_ms),
            max_delay: Duration::from_millis(self.poll_max_delay_ms),
            max_attempts: self.poll_max_attempts,
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("wizard.toml") {
        apply_file_config(&mut settings, &raw);
    }

    if let Ok(v) = std::env::var("PIVOTA_API_URL") {
        settings.api_url = v;
    }
    if let Ok(v) = std::env::var("PIVOTA_DATABASE_URL") {
        settings.database_url = v;
    }
    if let Ok(v) = std::env::var("PIVOTA_REQUEST_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.request_timeout_secs = parsed;
        }
    }
    if let Ok(v) = std::env::var("PIVOTA_POLL_INITIAL_DELAY_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.poll_initial_delay_ms = parsed;
        }
    }
    if let Ok(v) = std::env::var("PIVOTA_POLL_MAX_DELAY_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.poll_max_delay_ms = parsed;
        }
    }
    if let Ok(v) = std::env::var("PIVOTA_POLL_MAX_ATTEMPTS") {
        if let Ok(parsed) = v.parse::<u32>() {
            settings.poll_max_attempts = parsed;
        }
    }

    settings
}

fn apply_file_config(settings: &mut Settings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(raw) else {
        return;
    };
    if let Some(v) = file_cfg.get("api_url") {
        settings.api_url = v.clone();
    }
    if let Some(v) = file_cfg.get("database_url") {
        settings.database_url = v.clone();
    }
}
