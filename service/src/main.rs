//! `byokgate` - run the gateway or administer its store.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use uuid::Uuid;
use zeroize::Zeroizing;

use byokgate_service::admin::{self, NewCredential};
use byokgate_service::config::{GatewayConfig, LogFormat};
use byokgate_service::middleware::kek;
use byokgate_service::middleware::{AuthGate, KeyVault, MemoryStore};
use byokgate_service::proxy::{self, GatewayState, forward};

#[derive(Debug, Parser)]
#[command(name = "byokgate", version, about = "Multi-tenant BYOK LLM gateway")]
struct Cli {
    /// Path to a JSON config file.
    #[arg(long, global = true, env = "BYOKGATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP gateway.
    Serve,
    /// Print a new random KEK as hex.
    GenerateKek {
        /// Save it as the current KEK in the OS keyring instead of printing.
        #[arg(long)]
        store_in_keyring: bool,
    },
    /// List routable models.
    Models,
    #[command(subcommand)]
    Tenant(TenantCommand),
    #[command(subcommand)]
    Credential(CredentialCommand),
    /// Re-wrap every stored DEK under a new KEK.
    RotateKek {
        /// The new KEK, hex-encoded.
        #[arg(long, env = "BYOKGATE_NEW_KEK", hide_env_values = true)]
        new_kek: String,
        /// Move the old KEK to `kek-previous` and the new one to `kek` in
        /// the OS keyring.
        #[arg(long)]
        update_keyring: bool,
    },
}

#[derive(Debug, Subcommand)]
enum TenantCommand {
    /// Create a tenant and print its token once.
    Create { name: String },
    /// Issue a new token; the old one stops working.
    RotateToken { id: Uuid },
    Enable { id: Uuid },
    Disable { id: Uuid },
    /// Delete a tenant and all of its credentials.
    Delete { id: Uuid },
    List,
}

#[derive(Debug, Subcommand)]
enum CredentialCommand {
    /// Store a provider key for a tenant and make it active.
    ///
    /// The key is read from the environment variable named by
    /// `--secret-env`, or from the first line of stdin.
    Add {
        #[arg(long)]
        tenant: Uuid,
        #[arg(long)]
        provider: String,
        #[arg(long, default_value = "default")]
        alias: String,
        #[arg(long, default_value = "BYOKGATE_PROVIDER_SECRET")]
        secret_env: String,
        /// Probe the provider with the key before storing it.
        #[arg(long)]
        validate: bool,
    },
    Activate { id: Uuid },
    Deactivate { id: Uuid },
    Delete { id: Uuid },
    List {
        #[arg(long)]
        tenant: Uuid,
    },
}

/// Initialize structured logging with tracing. Logs go to stderr so command
/// output on stdout stays machine-readable.
fn init_logging(format: LogFormat) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Build the vault from the current KEK and, if configured, the previous one.
fn load_vault() -> Result<KeyVault> {
    kek::load_vault(
        std::env::var(kek::ENV_KEK).ok(),
        std::env::var(kek::ENV_PREVIOUS_KEK).ok(),
    )
    .context("loading KEK")
}

fn open_store(config: &GatewayConfig) -> Result<MemoryStore> {
    match &config.store_path {
        Some(path) => MemoryStore::open(path)
            .with_context(|| format!("opening store at {}", path.display())),
        None => Ok(MemoryStore::new()),
    }
}

/// Admin commands need somewhere to write.
fn open_persistent_store(config: &GatewayConfig) -> Result<MemoryStore> {
    if config.store_path.is_none() {
        bail!("no store path configured; set store_path or BYOKGATE_STORE_PATH");
    }
    open_store(config)
}

fn read_secret(env_name: &str) -> Result<Zeroizing<String>> {
    if let Ok(value) = std::env::var(env_name) {
        return Ok(Zeroizing::new(value));
    }
    let mut line = Zeroizing::new(String::new());
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("reading provider secret from stdin")?;
    Ok(Zeroizing::new(line.trim().to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = GatewayConfig::load(cli.config.as_deref()).context("loading configuration")?;
    init_logging(config.log_format);

    match cli.command {
        Command::Serve => serve(config).await,
        Command::GenerateKek { store_in_keyring } => {
            let kek_hex = kek::generate_kek_hex()?;
            if store_in_keyring {
                kek::store_in_keyring(kek::KEYRING_USER_CURRENT, &kek_hex)?;
                tracing::info!("Stored new KEK in OS keyring");
            } else {
                println!("{}", kek_hex.as_str());
            }
            Ok(())
        }
        Command::Models => print_json(&config.catalog()?.all_models()),
        Command::Tenant(cmd) => run_tenant(&config, cmd),
        Command::Credential(cmd) => run_credential(&config, cmd).await,
        Command::RotateKek {
            new_kek,
            update_keyring,
        } => {
            let new_kek = Zeroizing::new(new_kek);
            let store = open_persistent_store(&config)?;
            let vault = load_vault()?;
            let new_bytes = kek::decode_kek_hex(&new_kek)?;
            let count = admin::rotate_kek(&store, &vault, &new_bytes)?;
            if update_keyring {
                let current = kek::load_current(std::env::var(kek::ENV_KEK).ok())?;
                let current_hex = Zeroizing::new(hex::encode(current.as_slice()));
                kek::store_in_keyring(kek::KEYRING_USER_PREVIOUS, &current_hex)?;
                kek::store_in_keyring(kek::KEYRING_USER_CURRENT, &new_kek)?;
            }
            print_json(&serde_json::json!({ "rotated": count }))
        }
    }
}

fn run_tenant(config: &GatewayConfig, cmd: TenantCommand) -> Result<()> {
    let store = open_persistent_store(config)?;
    match cmd {
        TenantCommand::Create { name } => print_json(&admin::create_tenant(&store, &name)?),
        TenantCommand::RotateToken { id } => print_json(&admin::rotate_tenant_token(&store, id)?),
        TenantCommand::Enable { id } => Ok(store.set_tenant_enabled(id, true)?),
        TenantCommand::Disable { id } => Ok(store.set_tenant_enabled(id, false)?),
        TenantCommand::Delete { id } => {
            let removed = store.delete_tenant(id)?;
            print_json(&serde_json::json!({ "deleted": id, "credentials_removed": removed }))
        }
        TenantCommand::List => print_json(&admin::list_tenants(&store)),
    }
}

async fn run_credential(config: &GatewayConfig, cmd: CredentialCommand) -> Result<()> {
    let store = open_persistent_store(config)?;
    match cmd {
        CredentialCommand::Add {
            tenant,
            provider,
            alias,
            secret_env,
            validate,
        } => {
            let vault = load_vault()?;
            let catalog = config.catalog()?;
            let client = forward::build_http_client(config.connect_timeout())?;
            let secret = read_secret(&secret_env)?;
            let summary = admin::add_credential(
                &store,
                &vault,
                &catalog,
                &client,
                NewCredential {
                    tenant_id: tenant,
                    provider_name: &provider,
                    alias: &alias,
                    secret,
                    validate,
                },
            )
            .await?;
            print_json(&summary)
        }
        CredentialCommand::Activate { id } => Ok(store.set_credential_active(id, true)?),
        CredentialCommand::Deactivate { id } => Ok(store.set_credential_active(id, false)?),
        CredentialCommand::Delete { id } => Ok(store.delete_credential(id)?),
        CredentialCommand::List { tenant } => print_json(&admin::list_credentials(&store, tenant)),
    }
}

/// Main service logic
async fn serve(config: GatewayConfig) -> Result<()> {
    let vault = Arc::new(load_vault()?);
    let store = Arc::new(open_store(&config)?);
    let catalog = Arc::new(config.catalog()?);
    let client = forward::build_http_client(config.connect_timeout())
        .context("building upstream HTTP client")?;

    let state = Arc::new(GatewayState {
        auth: AuthGate::new(store.clone()),
        catalog,
        vault,
        credentials: store.clone(),
        client,
        settings: config.proxy_settings(),
    });

    #[cfg(unix)]
    reload_on_sighup(store.clone())?;

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %listener.local_addr()?, "BYOK gateway listening");

    axum::serve(listener, proxy::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("BYOK gateway stopped");
    Ok(())
}

/// Re-read the store file on SIGHUP so CLI changes reach a running server.
#[cfg(unix)]
fn reload_on_sighup(store: Arc<MemoryStore>) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            match store.reload() {
                Ok(()) => tracing::info!("Reloaded store"),
                Err(e) => tracing::error!(error = %e, "Store reload failed, keeping previous rows"),
            }
        }
    });
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to set up Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to set up SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
