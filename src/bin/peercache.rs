//! Cache node binary

use bytes::Bytes;
use clap::{Parser, Subcommand};
use futures_util::future::BoxFuture;
use peercache::{CacheServer, Config, Getter, GroupBuilder, GroupRegistry, HttpPool};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "peercache")]
#[command(about = "Distributed read-through cache node", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a cache node
    Serve {
        /// Port for the peer protocol
        #[arg(long)]
        port: Option<u16>,

        /// Host name other peers use to reach this node
        #[arg(long, default_value = "localhost")]
        host: String,

        /// Also start the public API server
        #[arg(long)]
        api: bool,

        /// Port for the public API server
        #[arg(long, default_value = "9999")]
        api_port: u16,

        /// Peer base URLs (comma-separated), including this node
        #[arg(long, value_delimiter = ',')]
        peers: Vec<String>,

        /// Config file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the effective configuration as JSON
    Config {
        /// Config file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Stand-in for a slow database
struct DemoDb {
    scores: HashMap<&'static str, &'static str>,
}

impl DemoDb {
    fn new() -> Self {
        Self {
            scores: HashMap::from([("Tom", "630"), ("Jack", "589"), ("Sam", "567")]),
        }
    }

    fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.scores.keys().copied()
    }
}

impl Getter for DemoDb {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, anyhow::Result<Bytes>> {
        Box::pin(async move {
            tracing::info!(key, "[SlowDB] search key");
            self.scores
                .get(key)
                .map(|v| Bytes::from_static(v.as_bytes()))
                .ok_or_else(|| anyhow::anyhow!("{} not exist", key))
        })
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    Ok(match path {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            host,
            api,
            api_port,
            peers,
            config,
        } => {
            // Load config from file, then override with CLI arguments
            let mut config = load_config(config)?;

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| config.log_level.clone().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            if let Some(port) = port {
                config.node.bind_addr.set_port(port);
                config.node.self_url = format!("http://{}:{}", host, port);
            }
            if !peers.is_empty() {
                config.node.peers = peers;
            }
            if api && config.node.api_addr.is_none() {
                config.node.api_addr = Some(SocketAddr::from(([0, 0, 0, 0], api_port)));
            }
            config.validate()?;

            let db = Arc::new(DemoDb::new());
            let registry = Arc::new(GroupRegistry::new());
            let pool = Arc::new(HttpPool::from_config(&config));

            for group_config in &config.groups {
                let mut builder = GroupBuilder::new(&group_config.name, Arc::clone(&db))
                    .cache_bytes(group_config.cache_bytes);
                if let Some(filter) = group_config.filter {
                    builder = builder.filter(filter.expected_keys, filter.bits_per_key);
                }

                let group = registry.register(builder.build()?)?;
                group.register_keys(db.keys());
                group.register_peers(pool.clone())?;
            }

            let mut server = CacheServer::new(Arc::clone(&registry), &config);
            if let Some(api_addr) = config.node.api_addr {
                let name = config
                    .groups
                    .first()
                    .map(|g| g.name.clone())
                    .ok_or_else(|| anyhow::anyhow!("the public API needs at least one group"))?;
                server = server.with_api(api_addr, registry.lookup(&name)?);
            }

            tracing::info!("Peers: {:?}", pool.peers());
            server.serve().await?;
        }
        Commands::Config { config } => {
            let config = load_config(config)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
