mod activity_pub;
mod config;
mod flags;
mod supervisor;

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use ractor::Actor;
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;

use crate::activity_pub::UrlMatcher;
use crate::config::{Config, RuntimeConfig};
use crate::flags::{Kiosk, KioskCmd};
use crate::supervisor::Supervisor;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let flags = Kiosk::from_env_or_exit();
    let config_path = flags.config.unwrap_or_else(|| PathBuf::from("kiosk.toml"));
    let config = Config::load(&config_path)?;
    UrlMatcher::new(&config.inbox)?;

    match flags.subcommand {
        KioskCmd::CheckConfig(_) => {
            info!(path = %config_path.display(), "configuration is valid");
            Ok(())
        }
        KioskCmd::Serve(_) => serve(config).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    tokio_rustls::rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow!("unable to install crypto provider"))?;

    let keyspace = fjall::Config::new(&config.storage.data_dir).open_transactional()?;
    let runtime_config = RuntimeConfig {
        init: config,
        keyspace,
    };

    let (supervisor, actor_handle) =
        Actor::spawn(Some("supervisor".into()), Supervisor, runtime_config).await?;

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received the terminate signal; stopping");
                break;
            }
            _ = sigint.recv() => {
                info!("Received the interrupt signal; stopping");
                break;
            }
        }
    }

    supervisor.stop(None);
    actor_handle.await?;

    Ok(())
}
