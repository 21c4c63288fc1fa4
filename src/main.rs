//! RelayGate - Multi-tenant messaging gateway for AI agents
//!
//! Administration CLI for the persisted gateway state: session records,
//! API keys and webhook destinations.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relaygate::{
    config::RelayGateConfig,
    store::{ApiKey, ApiKeyRepository, JsonStore, SessionRepository},
    webhook::{ConfigWebhookResolver, WebhookConfigService, WebhookTargets},
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "relaygate")]
#[command(version)]
#[command(about = "Multi-tenant messaging gateway for AI agents")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "RELAYGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },

    /// List stored session records
    Sessions,

    /// Inspect or change webhook destinations
    Webhook {
        #[command(subcommand)]
        action: WebhookCommand,
    },

    /// Manage API keys
    ApiKey {
        #[command(subcommand)]
        action: ApiKeyCommand,
    },

    /// Run the gateway against the in-process mock protocol client
    #[cfg(feature = "mock-client")]
    Serve,
}

#[derive(Subcommand)]
enum WebhookCommand {
    /// Show the tenant default or an agent's webhook
    Show {
        #[arg(long)]
        agent: Option<String>,
    },

    /// Set the tenant default or an agent's webhook
    Set {
        #[arg(long)]
        url: String,

        #[arg(long, default_value = "")]
        secret: String,

        #[arg(long)]
        agent: Option<String>,
    },
}

#[derive(Subcommand)]
enum ApiKeyCommand {
    /// Register an active API key for a user
    Add {
        #[arg(long)]
        user: String,

        #[arg(long)]
        token: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("relaygate={}", log_level).into()),
        )
        .with(cli.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!cli.log_json).then(tracing_subscriber::fmt::layer))
        .init();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => RelayGateConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RelayGateConfig::default(),
    };
    config.apply_env_overrides();

    match cli.command {
        Commands::Config { default } => {
            show_config(if default { None } else { Some(&config) })?;
        }
        Commands::Sessions => {
            list_sessions(&config).await?;
        }
        Commands::Webhook { action } => {
            run_webhook(&config, action).await?;
        }
        Commands::ApiKey { action } => {
            run_api_key(&config, action).await?;
        }
        #[cfg(feature = "mock-client")]
        Commands::Serve => {
            serve(config).await?;
        }
    }

    Ok(())
}

async fn open_store(config: &RelayGateConfig) -> Result<Arc<JsonStore>> {
    let dir = config.storage.records_dir();
    let store = JsonStore::open(dir.clone())
        .await
        .with_context(|| format!("opening records in {}", dir.display()))?;
    Ok(Arc::new(store))
}

async fn list_sessions(config: &RelayGateConfig) -> Result<()> {
    let store = open_store(config).await?;
    let sessions = store.list().await?;
    if sessions.is_empty() {
        println!("No sessions");
        return Ok(());
    }

    println!(
        "{:<24} {:<16} {:<14} {:<8} {}",
        "AGENT", "USER", "STATUS", "API KEY", "UPDATED"
    );
    for session in sessions {
        println!(
            "{:<24} {:<16} {:<14} {:<8} {}",
            session.agent_id,
            session.user_id,
            session.status.as_str(),
            if session.has_api_key() { "yes" } else { "no" },
            session.updated_at.to_rfc3339()
        );
    }
    Ok(())
}

async fn run_webhook(config: &RelayGateConfig, action: WebhookCommand) -> Result<()> {
    let store = open_store(config).await?;
    let resolver = Arc::new(ConfigWebhookResolver::new(
        store.clone(),
        WebhookTargets::new(config.webhook.urls.clone(), config.webhook.secret.clone()),
        config.webhook.cache_ttl(),
    ));
    let service = WebhookConfigService::new(store.clone(), store, resolver);

    match action {
        WebhookCommand::Show { agent } => {
            let record = match agent.as_deref() {
                Some(agent_id) => service.get_for_agent(agent_id).await?,
                None => service.get_default().await?,
            };
            match record {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None if config.webhook.urls.is_empty() => println!("No webhook configured"),
                None => println!(
                    "No stored webhook; configured fallback: {}",
                    config.webhook.urls.join(", ")
                ),
            }
        }
        WebhookCommand::Set { url, secret, agent } => {
            let record = match agent.as_deref() {
                Some(agent_id) => service.save_for_agent(agent_id, &url, &secret).await?,
                None => service.save_default(&url, &secret).await?,
            };
            println!("Saved webhook {}", record.url);
        }
    }
    Ok(())
}

async fn run_api_key(config: &RelayGateConfig, action: ApiKeyCommand) -> Result<()> {
    let store = open_store(config).await?;
    match action {
        ApiKeyCommand::Add { user, token } => {
            store.insert(ApiKey::new(user.trim(), token.trim())).await?;
            println!("Added API key for {}", user.trim());
        }
    }
    Ok(())
}

#[cfg(feature = "mock-client")]
async fn serve(config: RelayGateConfig) -> Result<()> {
    use relaygate::gateway::GatewayBuilder;
    use relaygate::protocol::mock::{MockBehavior, MockClientFactory};
    use relaygate::protocol::FileCredentialStoreProvider;
    use relaygate::store::Repositories;

    let store = open_store(&config).await?;
    let provider = Arc::new(FileCredentialStoreProvider::new(
        config.storage.credentials_dir(),
    ));
    let gateway = GatewayBuilder::new()
        .config(config)
        .credential_stores(provider)
        .client_factory(Arc::new(MockClientFactory::new(MockBehavior::default())))
        .repositories(Repositories::from_store(store))
        .build()?;

    gateway.start().await?;
    tracing::info!("RelayGate is running. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    gateway.stop().await?;
    Ok(())
}

fn show_config(config: Option<&RelayGateConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    let toml = toml::to_string_pretty(&config)?;
    println!("{}", toml);
    Ok(())
}
