use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use lead_responder::api::{AppState, api_routes};
use lead_responder::cache::{self, ResponseCache};
use lead_responder::channels::mailer_from_config;
use lead_responder::config::AppConfig;
use lead_responder::llm::{FallbackInvoker, LlmBackend, ProviderRegistry};
use lead_responder::notifications::{self, NotificationCenter};
use lead_responder::pipeline::EmailProcessor;
use lead_responder::store::{LeadStore, SenderLog};

/// Notifications older than this are dropped by the daily sweep.
const NOTIFICATION_RETAIN_DAYS: i64 = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = AppConfig::from_env(std::io::stderr).context("Invalid configuration")?;
    let _log_guard = init_tracing(&config);

    // ── Providers ───────────────────────────────────────────────────────
    let registry = ProviderRegistry::initialize(&config.providers);
    if let Err(e) = registry.require_non_empty() {
        eprintln!("Error: {e}");
        let vars: Vec<&str> = [
            LlmBackend::OpenAi,
            LlmBackend::Groq,
            LlmBackend::Google,
            LlmBackend::Anthropic,
        ]
        .iter()
        .map(LlmBackend::api_key_var)
        .collect();
        eprintln!("  Set at least one of: {}", vars.join(", "));
        std::process::exit(1);
    }
    let registry = Arc::new(registry);
    let invoker = Arc::new(FallbackInvoker::new(
        Arc::clone(&registry),
        config.providers.call_timeout,
    ));

    // ── Cache ───────────────────────────────────────────────────────────
    let cache = Arc::new(ResponseCache::from_settings(&config.cache));
    let _cache_sweep = cache::spawn_cleanup_task(Arc::clone(&cache), config.cache.cleanup_interval);

    // ── Storage, delivery, notifications ────────────────────────────────
    let data_dir = &config.server.data_dir;
    let leads = Arc::new(
        LeadStore::open(data_dir)
            .await
            .with_context(|| format!("Failed to open lead store in {}", data_dir.display()))?,
    );
    let sender_log = Arc::new(SenderLog::new(data_dir));
    let mailer = mailer_from_config(config.smtp.as_ref()).context("Invalid SMTP settings")?;

    let notifications = NotificationCenter::new(&config.notifications);
    let _notification_sweep =
        notifications::spawn_cleanup_task(Arc::clone(&notifications), NOTIFICATION_RETAIN_DAYS);

    let processor = Arc::new(EmailProcessor::new(
        Arc::clone(&invoker),
        Arc::clone(&cache),
        Arc::clone(&leads),
        Arc::clone(&sender_log),
        Arc::clone(&mailer),
        Arc::clone(&notifications),
        config.company.clone(),
    ));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let info = registry.info();

    eprintln!("📬 Lead Responder v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Providers: {}", info.model_order.join(" -> "));
    eprintln!("   Data: {}", data_dir.display());
    eprintln!("   Mailer: {}", mailer.name());
    eprintln!(
        "   Cache: {} entries, ttl {}s",
        config.cache.max_entries,
        config.cache.default_ttl.as_secs()
    );
    eprintln!("   API: http://{addr}/api\n");

    let app = api_routes(AppState {
        invoker,
        cache,
        leads,
        sender_log,
        notifications,
        processor,
    });

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, "HTTP server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Console logging plus an optional plain-text copy in `LOG_FILE`.
///
/// `RUST_LOG` wins over `LOG_LEVEL` when both are set.
fn init_tracing(config: &AppConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let (file_layer, guard) = match config.log_file.as_deref().and_then(file_writer) {
        Some((writer, guard)) => (
            Some(
                fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(writer),
            ),
            Some(guard),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}

fn file_writer(path: &Path) -> Option<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let file_name = path.file_name()?;
    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!("   Warning: Could not create log directory {}: {}", dir.display(), e);
        return None;
    }
    let appender = tracing_appender::rolling::never(dir, file_name);
    Some(tracing_appender::non_blocking(appender))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
