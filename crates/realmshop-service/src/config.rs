//! Service configuration.

use serde::Deserialize;
use std::path::Path;

use realmshop_core::{MailTemplate, RealmChannel, RealmId};

/// Default PayPal API base (sandbox).
pub const PAYPAL_SANDBOX_BASE: &str = "https://api-m.sandbox.paypal.com";

/// Default Bold API base.
pub const BOLD_API_BASE: &str = "https://payments.api.bold.co";

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// PostgreSQL connection string.
    pub database_url: Option<String>,

    /// Maximum pooled database connections.
    pub database_max_connections: u32,

    /// Shared secret for session tokens issued by the auth collaborator.
    pub jwt_secret: Option<String>,

    /// Session token algorithm name (default: "HS256").
    pub jwt_algorithm: String,

    /// Minimum role that counts as admin (default: 2).
    pub admin_role_level: i32,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// PayPal gateway settings.
    pub paypal: PayPalConfig,

    /// Bold gateway settings.
    pub bold: BoldConfig,

    /// Delivery settings.
    pub delivery: DeliveryConfig,
}

/// PayPal gateway settings.
#[derive(Debug, Clone)]
pub struct PayPalConfig {
    /// OAuth client id.
    pub client_id: Option<String>,
    /// OAuth client secret.
    pub client_secret: Option<String>,
    /// API base URL.
    pub api_base: String,
    /// Webhook id; when set, webhooks are verified through PayPal.
    pub webhook_id: Option<String>,
    /// Credits granted per currency unit, snapshotted on each order.
    pub credits_rate: i64,
    /// Accepted currencies (uppercase).
    pub allowed_currencies: Vec<String>,
}

/// Bold gateway settings.
#[derive(Debug, Clone)]
pub struct BoldConfig {
    /// Public API key handed to the checkout widget.
    pub api_key: Option<String>,
    /// Secret used in the integrity hash.
    pub secret_key: Option<String>,
    /// API base URL.
    pub api_base: String,
    /// Accepted currencies (uppercase).
    pub allowed_currencies: Vec<String>,
    /// Credits granted per currency unit, snapshotted on each order.
    pub credits_rate: i64,
    /// Redirect used when the caller does not pass one.
    pub default_redirect_url: Option<String>,
    /// When set, webhook bodies must carry a matching HMAC-SHA256 signature.
    pub webhook_secret: Option<String>,
}

/// Delivery settings.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Fallback remote channel endpoint for realms without stored config.
    pub soap_endpoint: Option<String>,
    /// Fallback channel user.
    pub soap_user: Option<String>,
    /// Fallback channel password.
    pub soap_password: Option<String>,
    /// Fallback channel timeout.
    pub soap_timeout_seconds: u64,
    /// How often the worker sweeps the outbox when not notified.
    pub poll_seconds: u64,
    /// Mail subject and body.
    pub template: MailTemplate,
}

impl DeliveryConfig {
    /// The env-provided channel, used when a realm has no stored config.
    #[must_use]
    pub fn fallback_channel(&self, realm_id: Option<RealmId>) -> Option<RealmChannel> {
        let endpoint = self.soap_endpoint.clone()?;
        Some(RealmChannel {
            realm_id: realm_id.unwrap_or(RealmId::new(0)),
            enabled: true,
            endpoint,
            user: self.soap_user.clone(),
            password: self.soap_password.clone(),
            timeout_seconds: self.soap_timeout_seconds,
        })
    }
}

/// PayPal secrets file structure.
#[derive(Debug, Deserialize)]
struct PayPalSecrets {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    webhook_id: Option<String>,
}

/// Bold secrets file structure.
#[derive(Debug, Deserialize)]
struct BoldSecrets {
    api_key: String,
    secret_key: String,
    #[serde(default)]
    webhook_secret: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let (paypal_client_id, paypal_client_secret, paypal_webhook_id) = load_paypal_secrets();
        let (bold_api_key, bold_secret_key, bold_webhook_secret) = load_bold_secrets();

        let mut template = MailTemplate::default();
        if let Ok(subject) = std::env::var("DELIVERY_SUBJECT") {
            template.subject = subject;
        }

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            database_url: std::env::var("DATABASE_URL").ok(),
            database_max_connections: env_parse(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            jwt_secret: std::env::var("JWT_SECRET").ok(),
            jwt_algorithm: std::env::var("JWT_ALGORITHM").unwrap_or(defaults.jwt_algorithm),
            admin_role_level: env_parse("ADMIN_ROLE_LEVEL", defaults.admin_role_level),
            cors_origins: env_list("CORS_ORIGINS").unwrap_or(defaults.cors_origins),
            max_body_bytes: env_parse("MAX_BODY_BYTES", defaults.max_body_bytes),
            request_timeout_seconds: env_parse(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            ),
            paypal: PayPalConfig {
                client_id: paypal_client_id,
                client_secret: paypal_client_secret,
                api_base: std::env::var("PAYPAL_API_BASE").unwrap_or(defaults.paypal.api_base),
                webhook_id: paypal_webhook_id,
                credits_rate: env_parse("DONATION_CREDITS_RATE", defaults.paypal.credits_rate),
                allowed_currencies: env_list("DONATION_ALLOWED_CURRENCIES")
                    .map(uppercase)
                    .unwrap_or(defaults.paypal.allowed_currencies),
            },
            bold: BoldConfig {
                api_key: bold_api_key,
                secret_key: bold_secret_key,
                api_base: std::env::var("BOLD_API_BASE").unwrap_or(defaults.bold.api_base),
                allowed_currencies: env_list("BOLD_ALLOWED_CURRENCIES")
                    .map(uppercase)
                    .unwrap_or(defaults.bold.allowed_currencies),
                credits_rate: env_parse("BOLD_CREDITS_RATE", defaults.bold.credits_rate),
                default_redirect_url: std::env::var("BOLD_DEFAULT_REDIRECT_URL").ok(),
                webhook_secret: bold_webhook_secret,
            },
            delivery: DeliveryConfig {
                soap_endpoint: std::env::var("SOAP_ENDPOINT").ok(),
                soap_user: std::env::var("SOAP_USER").ok(),
                soap_password: std::env::var("SOAP_PASSWORD").ok(),
                soap_timeout_seconds: env_parse(
                    "SOAP_TIMEOUT_SECONDS",
                    defaults.delivery.soap_timeout_seconds,
                ),
                poll_seconds: env_parse("DELIVERY_POLL_SECONDS", defaults.delivery.poll_seconds),
                template,
            },
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str) -> Option<Vec<String>> {
    let raw = std::env::var(key).ok()?;
    let items: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    (!items.is_empty()).then_some(items)
}

fn uppercase(items: Vec<String>) -> Vec<String> {
    items.into_iter().map(|s| s.to_uppercase()).collect()
}

/// Load PayPal secrets from file or environment.
fn load_paypal_secrets() -> (Option<String>, Option<String>, Option<String>) {
    let secret_paths = [".secrets/paypal.json", "../.secrets/paypal.json"];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<PayPalSecrets>(path) {
            tracing::info!(path = %path, "Loaded PayPal secrets from file");
            return (
                Some(secrets.client_id),
                Some(secrets.client_secret),
                secrets.webhook_id,
            );
        }
    }

    tracing::debug!("PayPal secrets file not found, using environment variables");
    (
        std::env::var("PAYPAL_CLIENT_ID").ok(),
        std::env::var("PAYPAL_CLIENT_SECRET").ok(),
        std::env::var("PAYPAL_WEBHOOK_ID").ok(),
    )
}

/// Load Bold secrets from file or environment.
fn load_bold_secrets() -> (Option<String>, Option<String>, Option<String>) {
    let secret_paths = [".secrets/bold.json", "../.secrets/bold.json"];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<BoldSecrets>(path) {
            tracing::info!(path = %path, "Loaded Bold secrets from file");
            return (
                Some(secrets.api_key),
                Some(secrets.secret_key),
                secrets.webhook_secret,
            );
        }
    }

    tracing::debug!("Bold secrets file not found, using environment variables");
    (
        std::env::var("BOLD_API_KEY").ok(),
        std::env::var("BOLD_SECRET_KEY").ok(),
        std::env::var("BOLD_WEBHOOK_SECRET").ok(),
    )
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_url: None,
            database_max_connections: 10,
            jwt_secret: None,
            jwt_algorithm: "HS256".into(),
            admin_role_level: 2,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            paypal: PayPalConfig {
                client_id: None,
                client_secret: None,
                api_base: PAYPAL_SANDBOX_BASE.into(),
                webhook_id: None,
                credits_rate: 100,
                allowed_currencies: vec!["USD".into(), "EUR".into()],
            },
            bold: BoldConfig {
                api_key: None,
                secret_key: None,
                api_base: BOLD_API_BASE.into(),
                allowed_currencies: vec!["COP".into()],
                credits_rate: 100,
                default_redirect_url: None,
                webhook_secret: None,
            },
            delivery: DeliveryConfig {
                soap_endpoint: None,
                soap_user: None,
                soap_password: None,
                soap_timeout_seconds: 15,
                poll_seconds: 30,
                template: MailTemplate::default(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_channel_requires_an_endpoint() {
        let mut delivery = ServiceConfig::default().delivery;
        assert!(delivery.fallback_channel(Some(RealmId::new(1))).is_none());

        delivery.soap_endpoint = Some("http://127.0.0.1:7878".into());
        let channel = delivery.fallback_channel(Some(RealmId::new(1))).unwrap();
        assert!(channel.enabled);
        assert_eq!(channel.realm_id, RealmId::new(1));
        assert_eq!(channel.timeout_seconds, 15);
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ServiceConfig::default();
        assert_eq!(config.admin_role_level, 2);
        assert_eq!(config.paypal.credits_rate, 100);
        assert_eq!(config.bold.allowed_currencies, vec!["COP".to_string()]);
        assert_eq!(config.delivery.poll_seconds, 30);
    }

    #[test]
    fn secrets_file_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bold.json");
        std::fs::write(
            &path,
            r#"{"api_key": "pk_test", "secret_key": "sk_test"}"#,
        )
        .unwrap();

        let secrets: BoldSecrets = load_secrets_file(path.to_str().unwrap()).unwrap();
        assert_eq!(secrets.api_key, "pk_test");
        assert_eq!(secrets.secret_key, "sk_test");
        assert!(secrets.webhook_secret.is_none());

        let missing = load_secrets_file::<BoldSecrets>(dir.path().join("nope.json").to_str().unwrap());
        assert_eq!(missing.unwrap_err().kind(), std::io::ErrorKind::NotFound);
    }
}
