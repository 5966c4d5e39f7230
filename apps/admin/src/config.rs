use std::{collections::HashMap, fs, time::Duration};

#[derive(Debug)]
pub struct Settings {
    pub api_url: String,
    pub database_url: String,
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8000".into(),
            database_url: "sqlite://./data/admin_session.db".into(),
            request_timeout_secs: 10,
        }
    }
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("admin.toml") {
        apply_file_config(&mut settings, &raw);
    }

    if let Ok(v) = std::env::var("PIVOTA_API_URL") {
        settings.api_url = v;
    }
    if let Ok(v) = std::env::var("PIVOTA_ADMIN_DATABASE_URL") {
        settings.database_url = v;
    }
    if let Ok(v) = std::env::var("PIVOTA_REQUEST_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.request_timeout_secs = parsed;
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
