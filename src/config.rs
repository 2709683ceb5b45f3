//! Configuration types.
//!
//! Everything is read from the process environment (a `.env` file is loaded
//! first when present). Parsing goes through a lookup function so tests can
//! feed a plain map instead of touching the real environment.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use tracing::{Level, warn};
use tracing_subscriber::fmt::MakeWriter;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};
use crate::notifications::NotificationKind;

/// Default provider declaration order.
const DEFAULT_PROVIDER_ORDER: &str = "openai,groq,google,anthropic";

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub providers: ProviderSettings,
    pub cache: CacheSettings,
    pub company: CompanyProfile,
    /// SMTP delivery settings (None when delivery is not configured).
    pub smtp: Option<SmtpConfig>,
    pub notifications: NotificationConfig,
    /// File that mirrors the log stream, if any.
    pub log_file: Option<PathBuf>,
    pub log_level: String,
}

/// HTTP server and storage location.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory holding the lead/outbox JSON files and the sender CSV log.
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            data_dir: PathBuf::from("data"),
        }
    }
}

/// Provider credentials in declaration order plus shared call limits.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Providers with usable credentials, in try-order.
    pub providers: Vec<LlmConfig>,
    /// Upper bound on a single provider call.
    pub call_timeout: Duration,
}

/// TTL cache sizing.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub max_entries: usize,
    pub default_ttl: Duration,
    pub cleanup_interval: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            default_ttl: Duration::from_secs(3600),    // 1 hour
            cleanup_interval: Duration::from_secs(300), // 5 minutes
        }
    }
}

/// Identity used in prompts, templates and the outbox `from` field.
#[derive(Debug, Clone)]
pub struct CompanyProfile {
    pub name: String,
    pub email: String,
}

impl Default for CompanyProfile {
    fn default() -> Self {
        Self {
            name: "Thryvix AI".to_string(),
            email: "noreply@thryvix.ai".to_string(),
        }
    }
}

/// SMTP relay settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    pub from_name: String,
}

/// Addresses that are told about each notification kind.
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub subscribers: HashMap<NotificationKind, Vec<String>>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        let mut subscribers = HashMap::new();
        subscribers.insert(
            NotificationKind::NewLead,
            vec![
                "sales@thryvix.ai".to_string(),
                "manager@thryvix.ai".to_string(),
            ],
        );
        subscribers.insert(
            NotificationKind::ExistingLead,
            vec!["account@thryvix.ai".to_string()],
        );
        subscribers.insert(
            NotificationKind::HighPriority,
            vec![
                "urgent@thryvix.ai".to_string(),
                "manager@thryvix.ai".to_string(),
            ],
        );
        subscribers.insert(
            NotificationKind::Error,
            vec!["tech@thryvix.ai".to_string()],
        );
        Self { subscribers }
    }
}

impl AppConfig {
    /// Load `.env` (if present) and read the process environment.
    ///
    /// Parsing runs before the global subscriber exists, so warnings go to
    /// `log_writer` through a short-lived subscriber of their own.
    pub fn from_env<W>(log_writer: W) -> Result<Self, ConfigError>
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        // A missing .env is normal in production.
        let _ = dotenvy::dotenv();
        Self::from_lookup_logged(|key| std::env::var(key).ok(), log_writer)
    }

    /// `from_lookup` with warnings written to `log_writer`.
    pub fn from_lookup_logged<F, W>(lookup: F, log_writer: W) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(log_writer)
            .with_max_level(Level::WARN)
            .with_target(false)
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, || Self::from_lookup(lookup))
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let server_defaults = ServerConfig::default();
        let server = ServerConfig {
            host: get("HOST").unwrap_or(server_defaults.host),
            port: parse_or(&get, "PORT", server_defaults.port),
            data_dir: get("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(server_defaults.data_dir),
        };

        let providers = provider_settings(&get)?;

        let cache_defaults = CacheSettings::default();
        let cache = CacheSettings {
            max_entries: parse_or(&get, "CACHE_MAX_ENTRIES", cache_defaults.max_entries).max(1),
            default_ttl: Duration::from_secs(parse_or(
                &get,
                "CACHE_TTL_SECS",
                cache_defaults.default_ttl.as_secs(),
            )),
            cleanup_interval: Duration::from_secs(
                parse_or(
                    &get,
                    "CACHE_CLEANUP_INTERVAL_SECS",
                    cache_defaults.cleanup_interval.as_secs(),
                )
                .max(1),
            ),
        };

        let company_defaults = CompanyProfile::default();
        let company = CompanyProfile {
            name: get("COMPANY_NAME").unwrap_or(company_defaults.name),
            email: get("COMPANY_EMAIL").unwrap_or(company_defaults.email),
        };

        let smtp = smtp_config(&get, &company);
        let notifications = notification_config(&get);

        let log_file = match get("LOG_FILE") {
            Some(v) if v.eq_ignore_ascii_case("none") => None,
            Some(v) => Some(PathBuf::from(v)),
            None => Some(server.data_dir.join("logs.txt")),
        };

        Ok(Self {
            server,
            providers,
            cache,
            company,
            smtp,
            notifications,
            log_file,
            log_level: get("LOG_LEVEL")
                .map(|l| l.to_lowercase())
                .unwrap_or_else(|| "info".to_string()),
        })
    }
}

/// Whether a credential value is a template placeholder rather than a key.
pub fn is_placeholder_key(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || (v.starts_with("your_") && v.ends_with("_key")) || v == "changeme"
}

fn provider_settings<G>(get: &G) -> Result<ProviderSettings, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let max_tokens: u32 = parse_or(get, "MAX_TOKENS", 2000);
    let temperature: f32 = parse_or(get, "TEMPERATURE", 0.7);
    if !(0.0..=2.0).contains(&temperature) {
        return Err(ConfigError::InvalidValue {
            key: "TEMPERATURE".to_string(),
            message: format!("{temperature} is outside 0.0..=2.0"),
        });
    }

    let order = get("AVAILABLE_PROVIDERS").unwrap_or_else(|| DEFAULT_PROVIDER_ORDER.to_string());
    let mut providers = Vec::new();
    for raw in order.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let backend: LlmBackend = raw
            .parse()
            .map_err(|_| ConfigError::UnknownProvider(raw.to_string()))?;

        if providers.iter().any(|p: &LlmConfig| p.backend == backend) {
            warn!(provider = raw, "Provider listed twice in AVAILABLE_PROVIDERS, ignoring repeat");
            continue;
        }

        let Some(key) = get(backend.api_key_var()).filter(|k| !is_placeholder_key(k)) else {
            continue;
        };

        let prefix = backend.env_prefix();
        providers.push(LlmConfig {
            backend,
            api_key: SecretString::from(key),
            model: get(format!("{prefix}_MODEL").as_str())
                .unwrap_or_else(|| backend.default_model().to_string()),
            base_url: get(format!("{prefix}_BASE_URL").as_str()),
            max_tokens,
            temperature,
        });
    }

    Ok(ProviderSettings {
        providers,
        call_timeout: Duration::from_secs(parse_or(get, "PROVIDER_TIMEOUT_SECS", 30u64).max(1)),
    })
}

fn smtp_config<G>(get: &G, company: &CompanyProfile) -> Option<SmtpConfig>
where
    G: Fn(&str) -> Option<String>,
{
    let server = get("SMTP_SERVER")?;
    let username = get("SMTP_USERNAME")?;
    let password = get("SMTP_PASSWORD")?;

    Some(SmtpConfig {
        server,
        port: parse_or(get, "SMTP_PORT", 587),
        from_address: get("FROM_EMAIL").unwrap_or_else(|| username.clone()),
        from_name: get("FROM_NAME").unwrap_or_else(|| format!("{} Team", company.name)),
        username,
        password: SecretString::from(password),
    })
}

fn notification_config<G>(get: &G) -> NotificationConfig
where
    G: Fn(&str) -> Option<String>,
{
    let mut config = NotificationConfig::default();
    for kind in NotificationKind::ALL {
        let var = format!("NOTIFY_{}", kind.as_str().to_uppercase());
        if let Some(list) = get(var.as_str()) {
            let addrs: Vec<String> = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            config.subscribers.insert(kind, addrs);
        }
    }
    config
}

fn parse_or<G, T>(get: &G, key: &str, default: T) -> T
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr + Copy,
{
    match get(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "Unparsable configuration value, using default");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::sync::{Arc, Mutex};

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.cache.default_ttl, Duration::from_secs(3600));
        assert_eq!(config.providers.call_timeout, Duration::from_secs(30));
        assert!(config.providers.providers.is_empty());
        assert!(config.smtp.is_none());
        assert_eq!(config.company.name, "Thryvix AI");
        assert_eq!(config.log_file, Some(PathBuf::from("data/logs.txt")));
    }

    #[test]
    fn providers_follow_declaration_order_and_skip_missing_keys() {
        let config = config_from(&[
            ("ANTHROPIC_API_KEY", "sk-ant-1"),
            ("GROQ_API_KEY", "gsk-2"),
            ("OPENAI_API_KEY", "your_openai_key"),
        ])
        .unwrap();

        let ids: Vec<_> = config
            .providers
            .providers
            .iter()
            .map(|p| p.backend.as_str())
            .collect();
        assert_eq!(ids, vec!["groq", "anthropic"]);
        assert_eq!(config.providers.providers[0].model, "llama-3.1-8b-instant");
        assert_eq!(config.providers.providers[1].api_key.expose_secret(), "sk-ant-1");
    }

    #[test]
    fn custom_order_and_model_override() {
        let config = config_from(&[
            ("AVAILABLE_PROVIDERS", "google, openai"),
            ("OPENAI_API_KEY", "sk-1"),
            ("GOOGLE_API_KEY", "g-1"),
            ("GOOGLE_MODEL", "gemini-2.0-flash"),
            ("MAX_TOKENS", "512"),
        ])
        .unwrap();

        let providers = &config.providers.providers;
        assert_eq!(providers[0].backend, LlmBackend::Google);
        assert_eq!(providers[0].model, "gemini-2.0-flash");
        assert_eq!(providers[1].backend, LlmBackend::OpenAi);
        assert_eq!(providers[1].max_tokens, 512);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = config_from(&[("AVAILABLE_PROVIDERS", "openai,mistral")]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProvider(p) if p == "mistral"));
    }

    #[test]
    fn temperature_out_of_range_is_rejected() {
        let err = config_from(&[("TEMPERATURE", "3.5")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn malformed_number_falls_back_to_default() {
        let config = config_from(&[("PORT", "not-a-port")]).unwrap();
        assert_eq!(config.server.port, 5000);
    }

    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn parse_warnings_reach_the_startup_writer() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let config = AppConfig::from_lookup_logged(
            |key| (key == "PORT").then(|| "not-a-port".to_string()),
            move || Captured(Arc::clone(&sink)),
        )
        .unwrap();

        assert_eq!(config.server.port, 5000);
        let output = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(output.contains("Unparsable configuration value"), "{output}");
        assert!(output.contains("PORT"));
    }

    #[test]
    fn smtp_requires_server_and_credentials() {
        let partial = config_from(&[("SMTP_SERVER", "smtp.example.com")]).unwrap();
        assert!(partial.smtp.is_none());

        let full = config_from(&[
            ("SMTP_SERVER", "smtp.example.com"),
            ("SMTP_USERNAME", "bot@example.com"),
            ("SMTP_PASSWORD", "secret"),
        ])
        .unwrap();
        let smtp = full.smtp.unwrap();
        assert_eq!(smtp.port, 587);
        assert_eq!(smtp.from_address, "bot@example.com");
    }

    #[test]
    fn notification_subscribers_can_be_overridden() {
        let config = config_from(&[("NOTIFY_NEW_LEAD", "a@x.io, b@x.io")]).unwrap();
        assert_eq!(
            config.notifications.subscribers[&NotificationKind::NewLead],
            vec!["a@x.io".to_string(), "b@x.io".to_string()]
        );
    }

    #[test]
    fn placeholder_detection() {
        assert!(is_placeholder_key("your_groq_key"));
        assert!(is_placeholder_key("  "));
        assert!(!is_placeholder_key("sk-live-123"));
    }
}
