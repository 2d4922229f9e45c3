use clap::Parser;
use responses_bridge::audit::{AuditSink, JsonlAuditSink, NoopAuditSink};
use responses_bridge::config::config_search_paths;
use responses_bridge::{build_router, AppState, BridgeConfig, DispatchClient, ProviderKind};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "responses-bridge",
    about = "One Responses-format API over OpenAI, Anthropic, Google and Ollama",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Serve every model through this provider (overrides config)
    #[arg(long)]
    provider: Option<ProviderKind>,

    /// JSONL audit log path (overrides config)
    #[arg(long)]
    audit_log: Option<PathBuf>,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "responses_bridge=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = BridgeConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(provider) = cli.provider {
        config.provider = Some(provider);
    }
    if let Some(path) = cli.audit_log {
        config.audit.path = Some(path);
    }

    // Validate the explicit provider's credentials eagerly
    if let Some(provider) = config.provider {
        config.resolve_api_key(provider)?;
    }

    let audit = match &config.audit.path {
        Some(path) => Some(JsonlAuditSink::open(path)?),
        None => None,
    };
    let sink: Arc<dyn AuditSink> = match &audit {
        Some(audit) => Arc::new(audit.clone()),
        None => Arc::new(NoopAuditSink),
    };

    info!(version = env!("CARGO_PKG_VERSION"), "responses-bridge starting");
    match config.provider {
        Some(provider) => info!(
            provider = %provider,
            base_url = %config.effective_base_url(provider),
            "explicit provider"
        ),
        None => info!("provider inferred per model"),
    }
    info!(models = config.models.len(), "model aliases");
    match &config.audit.path {
        Some(path) => info!(path = %path.display(), "audit log enabled"),
        None => info!("audit log disabled"),
    }

    let port = config.port;
    let client = DispatchClient::new(config, sink)?;
    let state = Arc::new(AppState { client, audit });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  POST http://localhost:{}/v1/responses", port);

    axum::serve(listener, app).await?;

    Ok(())
}
