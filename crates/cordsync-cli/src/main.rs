//! cordsync: offline driver for the guild mirror
//!
//! Subcommands:
//! - `replay`: hydrate from a seed file and replay recorded gateway payloads
//! - `patch-channel`: stage and commit one channel update over REST

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::Result;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cordsync::{
    CacheSeed, ClientConfig, DEFAULT_API_BASE_URL, EntityCache, GatewayPayload, HttpSink, Mirror,
    run_feed,
};

#[derive(Parser)]
#[command(name = "cordsync")]
#[command(about = "Client-side guild mirror", long_about = None)]
struct Cli {
    /// REST API base URL
    #[arg(long, global = true, env = "CORDSYNC_API_URL", default_value = DEFAULT_API_BASE_URL)]
    api_url: String,

    /// Bot token
    #[arg(long, global = true, env = "CORDSYNC_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay recorded gateway payloads against a seeded cache
    Replay {
        /// JSON file with users, channels and servers
        #[arg(long)]
        seed: PathBuf,

        /// File with one gateway payload per line
        #[arg(long)]
        payloads: PathBuf,
    },

    /// Update a cached channel
    PatchChannel {
        /// JSON file with users, channels and servers
        #[arg(long)]
        seed: PathBuf,

        /// Channel to update
        #[arg(long)]
        channel_id: u64,

        /// New channel name
        #[arg(long)]
        name: Option<String>,

        /// New raw position
        #[arg(long)]
        position: Option<i64>,

        /// New topic
        #[arg(long, conflicts_with = "clear_topic")]
        topic: Option<String>,

        /// Remove the topic
        #[arg(long)]
        clear_topic: bool,

        /// Reason recorded in the audit log
        #[arg(long)]
        reason: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "cordsync=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::default().with_api_base_url(cli.api_url);
    if let Some(token) = cli.token {
        config = config.with_token(token);
    }

    match cli.command {
        Commands::Replay { seed, payloads } => replay(config, &seed, &payloads).await,
        Commands::PatchChannel {
            seed,
            channel_id,
            name,
            position,
            topic,
            clear_topic,
            reason,
        } => {
            if config.token.is_none() {
                return Err(miette::miette!(
                    "a bot token is required (--token or CORDSYNC_TOKEN)"
                ));
            }
            let mirror = seeded_mirror(config, &seed)?;
            let mut updater = mirror
                .channel_updater(channel_id)
                .ok_or_else(|| miette::miette!("channel {} is not in the seed", channel_id))?;

            if let Some(name) = name {
                updater.set_name(name);
            }
            if let Some(position) = position {
                updater.set_raw_position(position);
            }
            if clear_topic {
                updater.set_topic(None);
            } else if let Some(topic) = topic {
                updater.set_topic(Some(topic));
            }
            if let Some(reason) = reason {
                updater.set_audit_log_reason(reason);
            }

            if updater.pending().is_empty() {
                println!("Nothing to update for channel {}", channel_id);
                return Ok(());
            }

            updater
                .commit()
                .await
                .map_err(|e| miette::miette!("{}", e))?;
            println!("Updated channel {}", channel_id);
            Ok(())
        }
    }
}

async fn replay(config: ClientConfig, seed: &Path, payloads: &Path) -> Result<()> {
    let mirror = Arc::new(seeded_mirror(config, seed)?);
    let payloads = load_payloads(payloads)?;

    mirror.listeners().add_all(|event| {
        info!(
            server_id = %event.server.id(),
            field = ?event.field(),
            sequence = ?event.context.sequence,
            change = ?event.change,
            "server changed"
        );
        Ok(())
    });

    let (tx, rx) = mpsc::channel(64);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let feed = tokio::spawn(run_feed(Arc::clone(&mirror), rx, shutdown_rx));

    for payload in payloads {
        if tx.send(payload).await.is_err() {
            warn!("feed stopped before all payloads were sent");
            break;
        }
    }
    drop(tx);

    let summary = feed
        .await
        .map_err(|e| miette::miette!("feed task failed: {}", e))?;

    println!(
        "Replayed {} payloads: {} snapshots applied, {} field changes, {} errors",
        summary.payloads, summary.snapshots, summary.changes, summary.errors
    );
    Ok(())
}

fn seeded_mirror(config: ClientConfig, seed: &Path) -> Result<Mirror> {
    let sink = HttpSink::new(config).map_err(|e| miette::miette!("{}", e))?;
    let mirror = Mirror::new(EntityCache::new(), Arc::new(sink));
    mirror
        .hydrate(load_seed(seed)?)
        .map_err(|e| miette::miette!("invalid seed: {}", e))?;
    Ok(mirror)
}

fn load_seed(path: &Path) -> Result<CacheSeed> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| miette::miette!("failed to read {}: {}", path.display(), e))?;
    serde_json::from_str(&text)
        .map_err(|e| miette::miette!("failed to parse seed {}: {}", path.display(), e))
}

/// Read one payload per non-blank line, skipping lines that fail to parse.
fn load_payloads(path: &Path) -> Result<Vec<GatewayPayload>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| miette::miette!("failed to read {}: {}", path.display(), e))?;

    let mut payloads = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<GatewayPayload>(line) {
            Ok(payload) => payloads.push(payload),
            Err(e) => warn!(line = index + 1, error = %e, "skipping malformed payload"),
        }
    }
    Ok(payloads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_seed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"users": [{{"id": "1", "username": "alice"}}], "servers": [{{"id": "9", "name": "Lobby"}}]}}"#
        )
        .unwrap();

        let seed = load_seed(file.path()).unwrap();
        assert_eq!(seed.users.len(), 1);
        assert_eq!(seed.users[0].name, "alice");
        assert_eq!(seed.servers.len(), 1);
        assert!(seed.channels.is_empty());
    }

    #[test]
    fn test_load_seed_rejects_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(load_seed(file.path()).is_err());
    }

    #[test]
    fn test_load_payloads_skips_bad_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"t": "GUILD_UPDATE", "s": 1, "d": {{"id": "9", "name": "a"}}}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, "garbage").unwrap();
        writeln!(file, r#"{{"t": "TYPING_START", "s": 2, "d": {{}}}}"#).unwrap();

        let payloads = load_payloads(file.path()).unwrap();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0].sequence, Some(1));
        assert_eq!(payloads[1].event_type.as_deref(), Some("TYPING_START"));
    }

    #[tokio::test]
    async fn test_seeded_mirror_tracks_servers() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"servers": [{{"id": "9", "name": "Lobby"}}]}}"#).unwrap();

        let mirror = seeded_mirror(ClientConfig::default(), file.path()).unwrap();
        assert_eq!(mirror.cache().get(9).unwrap().name(), "Lobby");
    }
}
