use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use ringflow::config::Backend;
use ringflow::eval::DirSecrets;
use ringflow::store::{FsStore, PacketStore, SqliteStore};
use ringflow::{PacketName, Peer, PeerId, RingConfig};

#[derive(Parser)]
#[command(name = "ringflow")]
#[command(about = "Pass a packet around a ring of peers over a shared store")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create this peer's namespace (and a config file if none exists)
    Init,

    /// Start a new packet on a ring
    Submit {
        /// Packet name, unique within the receiving peer's namespace
        #[arg(short, long, default_value = "data")]
        name: String,

        /// Ring members in order, comma separated
        #[arg(short, long, value_delimiter = ',', required = true)]
        ring: Vec<String>,

        /// Query every peer evaluates
        #[arg(short, long)]
        query: String,
    },

    /// Run one poll cycle
    Poll,

    /// List this peer's pending, claimed and done packets
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ringflow=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = RingConfig::load(cli.config.as_deref()).context("failed to load config")?;
    config.validate()?;

    match config.store.backend {
        Backend::Fs => {
            let store = FsStore::new(&config.peer.root)
                .with_layout(config.layout())
                .with_codec(config.store.codec);
            run(Arc::new(store), &config, &cli).await
        }
        Backend::Sqlite => {
            let path = config.sqlite_path();
            let store = SqliteStore::open(&path)
                .with_context(|| format!("failed to open {}", path.display()))?
                .with_codec(config.store.codec);
            run(Arc::new(store), &config, &cli).await
        }
    }
}

async fn run<S: PacketStore + 'static>(
    store: Arc<S>,
    config: &RingConfig,
    cli: &Cli,
) -> anyhow::Result<()> {
    let evaluator = config.command_evaluator();
    let missing_evaluator = evaluator.program().is_empty();
    let peer = Peer::new(
        config.peer_id()?,
        store,
        Arc::new(evaluator),
        Arc::new(DirSecrets::new(&config.secrets.dir)),
        config.peer_config()?,
    );

    match &cli.command {
        Commands::Init => {
            peer.init().await?;
            let path = cli.config.clone().unwrap_or_else(RingConfig::file_path);
            if config.write_if_missing(&path)? {
                println!("wrote {}", path.display());
            }
            println!("namespace ready for {}", peer.id());
        }
        Commands::Submit { name, ring, query } => {
            let name = PacketName::new(name.as_str())?;
            let ring = ring
                .iter()
                .map(|id| PeerId::new(id.trim()))
                .collect::<Result<Vec<_>, _>>()?;
            let holder = peer.originate(&name, ring, query.clone()).await?;
            println!("submitted {} to {}", name, holder);
        }
        Commands::Poll => {
            if missing_evaluator {
                bail!("evaluator.command is not set; polling needs an evaluator");
            }
            let report = peer.poll().await?;
            println!("{}", report);
        }
        Commands::Status => {
            let status = peer.status().await?;
            println!("peer {}", peer.id());
            println!("pending ({}):", status.pending.len());
            for name in &status.pending {
                println!("  {}", name);
            }
            println!("claimed ({}):", status.claimed.len());
            for entry in &status.claimed {
                let staged = if entry.staged { " (staged)" } else { "" };
                println!("  {}{}", entry.packet.name(), staged);
            }
            println!("done ({}):", status.done.len());
            for name in &status.done {
                println!("  {}", name);
            }
        }
    }
    Ok(())
}
