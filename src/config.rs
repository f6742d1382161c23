use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
    #[serde(default)]
    pub llm: Option<LlmConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
}

/// Credentials for the outbound SMTP relay. Absent means outbound delivery
/// is disabled and replies are persisted without being sent.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub from_email: String,
    #[serde(default)]
    pub from_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_database_url() -> String {
    "sqlite:postbox.db?mode=rwc".to_string()
}

fn default_llm_url() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_llm_model() -> String {
    "claude-3-sonnet-20240229".to_string()
}

fn default_llm_max_tokens() -> u32 {
    1000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            smtp: None,
            llm: None,
        }
    }
}

impl Config {
    /// Reads `settings.toml` when present, then lets environment variables
    /// (including a local `.env`) override individual fields. Secrets are
    /// expected to arrive through the environment.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        let mut config = std::fs::read_to_string("settings.toml")
            .ok()
            .and_then(|content| match toml::from_str::<Config>(&content) {
                Ok(config) => Some(config),
                Err(err) => {
                    tracing::warn!(error = %err, "settings.toml is invalid, using defaults");
                    None
                }
            })
            .unwrap_or_default();

        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(host) = env::var("POSTBOX_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env::var("PORT").ok().and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Ok(url) = env::var("DATABASE_URL") {
            self.database.url = url;
        }

        if let Ok(host) = env::var("SMTP_HOST") {
            let smtp = self.smtp.get_or_insert_with(|| SmtpConfig {
                host: host.clone(),
                port: None,
                username: String::new(),
                password: String::new(),
                from_email: String::new(),
                from_name: String::new(),
            });
            smtp.host = host;
        }
        if let Some(smtp) = self.smtp.as_mut() {
            if let Some(port) = env::var("SMTP_PORT").ok().and_then(|v| v.parse().ok()) {
                smtp.port = Some(port);
            }
            if let Ok(username) = env::var("SMTP_USERNAME") {
                smtp.username = username;
            }
            if let Ok(password) = env::var("SMTP_PASSWORD") {
                smtp.password = password;
            }
            if let Ok(from_email) = env::var("SMTP_FROM_EMAIL") {
                smtp.from_email = from_email;
            }
            if let Ok(from_name) = env::var("SMTP_FROM_NAME") {
                smtp.from_name = from_name;
            }
        }

        if let Ok(api_key) = env::var("LLM_API_KEY") {
            let llm = self.llm.get_or_insert_with(|| LlmConfig {
                base_url: default_llm_url(),
                api_key: String::new(),
                model: default_llm_model(),
                max_tokens: default_llm_max_tokens(),
            });
            llm.api_key = api_key;
        }
        if let Some(llm) = self.llm.as_mut() {
            if let Ok(base_url) = env::var("LLM_API_URL") {
                llm.base_url = base_url;
            }
            if let Ok(model) = env::var("LLM_MODEL") {
                llm.model = model;
            }
        }
    }
}
