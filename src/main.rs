//! cpthook CLI entry point.
//!
//! Provides `run` and `check` subcommands for serving webhooks or validating
//! a configuration file.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use cpthook::config::{load_config, AuthConfig, Config, DEFAULT_CONFIG_PATH};
use cpthook::credentials::{load_credentials, Credentials};
use cpthook::input::{join_list, modules_from_config};
use cpthook::irc::client::{ClientCert, ClientSettings, IrcConnector, Sasl, SaslPlain, TlsSettings};
use cpthook::irc::ConnectionManager;
use cpthook::{dispatch, http, logging};

/// Time the connection manager gets to send QUIT after HTTP shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// cpthook — webhook to IRC notification bot.
#[derive(Parser)]
#[command(name = "cpthook", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Serve webhooks and relay them to IRC.
    Run,
    /// Validate the configuration and print the channels to join.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run => handle_run(&cli.config).await,
        Command::Check => handle_check(&cli.config),
    }
}

/// Validate the config and print the join list.
fn handle_check(path: &Path) -> anyhow::Result<()> {
    logging::init_cli("warn");

    let config = load_config(path)?;
    let modules = modules_from_config(&config).context("failed to build modules")?;

    println!("configuration OK: {}", path.display());
    for module in &modules {
        println!(
            "  {} ({}) -> POST {}",
            module.name,
            module.source.kind(),
            module.endpoint
        );
    }
    println!("channels:");
    for channel in join_list(&modules, &config.irc.channels) {
        println!("  {channel}");
    }
    Ok(())
}

/// Run the HTTP listener and the IRC connection manager.
async fn handle_run(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path)?;
    let _logging_guard =
        logging::init_service(&config.logging.level, config.logging.dir.as_deref())?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %path.display(),
        "cpthook starting"
    );

    let credentials = match &config.credentials_file {
        Some(file) => load_credentials(file)
            .with_context(|| format!("failed to load credentials from {}", file.display()))?,
        None => Credentials::default(),
    };

    let modules = modules_from_config(&config).context("failed to build modules")?;
    let channels = join_list(&modules, &config.irc.channels);
    info!(
        modules = modules.len(),
        channels = channels.len(),
        "modules loaded"
    );

    let connector = IrcConnector::new(client_settings(&config, &credentials)?)
        .context("failed to set up tls")?;
    let (queue_tx, queue_rx) = dispatch::bounded();
    let manager = ConnectionManager::new(connector, queue_rx, channels);
    let status = manager.status();
    let manager_task = tokio::spawn(manager.run());

    let state = http::AppState {
        modules: Arc::new(modules),
        queue: queue_tx,
        status,
    };
    let router = http::router(state);

    http::serve(&config.http.listen, router, shutdown_signal()).await?;

    // The router held the last queue sender; the manager now drains and quits.
    match tokio::time::timeout(SHUTDOWN_GRACE, manager_task).await {
        Ok(Ok(())) => info!("connection manager stopped"),
        Ok(Err(e)) => warn!(error = %e, "connection manager task failed"),
        Err(_) => warn!("connection manager did not stop in time"),
    }

    info!("cpthook stopped");
    Ok(())
}

/// Resolve the IRC settings, including the SASL password.
fn client_settings(config: &Config, credentials: &Credentials) -> anyhow::Result<ClientSettings> {
    let sasl = match &config.irc.auth {
        None => None,
        Some(AuthConfig::SaslPlain {
            username,
            password_env,
        }) => Some(Sasl::Plain(SaslPlain {
            username: username.clone(),
            password: credentials
                .require(password_env)
                .context("sasl password is not set")?,
        })),
        Some(AuthConfig::SaslExternal { identity }) => Some(Sasl::External {
            identity: identity.clone(),
        }),
    };

    let tls = config.irc.tls.then(|| TlsSettings {
        ca_file: config.irc.ca_file.clone(),
        client_cert: config.irc.client_cert.as_ref().map(|cert| ClientCert {
            cert_file: cert.cert_file.clone(),
            key_file: cert.key_file.clone(),
        }),
    });

    Ok(ClientSettings {
        host: config.irc.host.clone(),
        port: config.irc.port,
        tls,
        nickname: config.irc.nickname.clone(),
        realname: config.irc.realname.clone(),
        sasl,
    })
}

/// Resolve on Ctrl-C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
