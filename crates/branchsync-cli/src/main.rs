//! branchsync CLI
//!
//! Thin wrapper around branchsync-core for command-line usage.
//!
//! ## Usage
//!
//! ```bash
//! # Initialize a repository in ./.branchsync
//! branchsync init
//!
//! # Create and list branches
//! branchsync branch create mybranch
//! branchsync branch list
//!
//! # Stage, commit, read back
//! branchsync add myfile.txt
//! branchsync commit -m "initial commit"
//! branchsync cat myfile.txt
//!
//! # Fork the active branch and inspect history
//! branchsync fork master feature
//! branchsync history
//!
//! # Mount a peer under a prefix and sync
//! branchsync remote add origin/ --peer <base58> --addr 192.0.2.1:4433
//! branchsync sync master origin/master
//!
//! # Serve this repository's branches to peers
//! branchsync serve
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use branchsync_core::net::PeerAddr;
use branchsync_core::{
    Params, PeerId, Repo, RepoConfig, Space, SpaceCrypto, SpaceLayerSpec, SpaceSpec, Span,
};

/// branchsync - distributed branch synchronization
#[derive(Parser)]
#[command(name = "branchsync")]
#[command(version = "0.1.0")]
#[command(about = "branchsync - distributed branch synchronization")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Repository directory (default: ./.branchsync)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a repository
    Init,

    /// Show repository information
    Info,

    /// Branch management
    Branch {
        #[command(subcommand)]
        action: BranchAction,
    },

    /// Switch the active branch
    Switch {
        /// Branch to make active
        name: String,
    },

    /// Create a branch from a base and switch to it
    Fork {
        /// Base branch
        base: String,
        /// New branch
        next: String,
    },

    /// Sync one branch's volume into another
    Sync {
        /// Source branch
        src: String,
        /// Destination branch
        dst: String,
        /// Overwrite the destination head even when it is not an ancestor
        #[arg(long)]
        force: bool,
    },

    /// Stage a file for the next commit
    Add {
        /// Path of the file to stage
        path: PathBuf,
    },

    /// Show staged files
    Status,

    /// Commit staged files to the active branch
    Commit {
        /// Commit message
        #[arg(short, long)]
        message: String,
    },

    /// Show a branch's snapshot history
    History {
        /// Branch name (default: active branch)
        branch: Option<String>,
    },

    /// Print a file from a branch head
    Cat {
        /// File path within the branch
        path: String,
        /// Branch name (default: active branch)
        #[arg(short, long, default_value = "")]
        branch: String,
    },

    /// List files at a branch head
    Ls {
        /// Branch name (default: active branch)
        branch: Option<String>,
    },

    /// Remote space mounts
    Remote {
        #[command(subcommand)]
        action: RemoteAction,
    },

    /// Serve this repository's branches to peers
    Serve,
}

#[derive(Subcommand)]
enum BranchAction {
    /// Create a branch
    Create {
        /// Branch name
        name: String,
    },
    /// List branches
    List,
    /// Delete a branch
    Rm {
        /// Branch name
        name: String,
    },
    /// Show the active branch
    Active,
}

#[derive(Subcommand)]
enum RemoteAction {
    /// Mount a peer's space under a name prefix
    Add {
        /// Name prefix, e.g. "origin/"
        prefix: String,
        /// Peer id (base58)
        #[arg(long)]
        peer: String,
        /// Symmetric secret for an encrypted mount (64 hex chars); generated
        /// when the flag is given without a value
        #[arg(long, num_args = 0..=1, default_missing_value = "")]
        secret: Option<String>,
        /// Relay URL for the peer
        #[arg(long)]
        relay: Option<String>,
        /// Direct socket addresses for the peer
        #[arg(long = "addr")]
        addrs: Vec<String>,
    },
    /// List configured mounts
    List,
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".branchsync")
}

/// Open the repository, binding the transport only when the config needs it
async fn open_repo(data_dir: &PathBuf) -> Result<Repo> {
    let config = RepoConfig::load(data_dir)?;
    if config.spaces.is_empty() {
        Ok(Repo::open(data_dir).await?)
    } else {
        let (repo, _transport) = Repo::open_networked(data_dir).await?;
        Ok(repo)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);

    match cli.command {
        Commands::Init => {
            let repo = Repo::init(&data_dir).await?;
            println!("Initialized repository at {}", repo.data_dir().display());
        }

        Commands::Info => {
            let repo = open_repo(&data_dir).await?;
            let (active, _) = repo.get_active_branch().await?;
            let mut count = 0usize;
            repo.for_each_branch(&mut |_| {
                count += 1;
                Ok(())
            })
            .await?;
            let secret = repo.endpoint_secret()?;
            let peer = PeerId::from_bytes(*iroh::SecretKey::from_bytes(&secret).public().as_bytes());

            println!("Repository: {}", repo.data_dir().display());
            println!("Active branch: {}", active);
            println!("Branches: {}", count);
            println!("Peer id: {}", peer.to_base58());
            println!("Mounts: {}", repo.config().spaces.len());
        }

        Commands::Branch { action } => {
            let repo = open_repo(&data_dir).await?;
            match action {
                BranchAction::Create { name } => {
                    repo.create_branch(&name, Params::default()).await?;
                    println!("Created branch {}", name);
                }
                BranchAction::List => {
                    let (active, _) = repo.get_active_branch().await?;
                    repo.for_each_branch(&mut |name| {
                        let marker = if name == active { "*" } else { " " };
                        println!("{} {}", marker, name);
                        Ok(())
                    })
                    .await?;
                }
                BranchAction::Rm { name } => {
                    repo.delete_branch(&name).await?;
                    println!("Deleted branch {}", name);
                }
                BranchAction::Active => {
                    let (active, _) = repo.get_active_branch().await?;
                    println!("{}", active);
                }
            }
        }

        Commands::Switch { name } => {
            let repo = open_repo(&data_dir).await?;
            repo.set_active_branch(&name).await?;
            println!("Switched to {}", name);
        }

        Commands::Fork { base, next } => {
            let repo = open_repo(&data_dir).await?;
            repo.fork(&base, &next).await?;
            println!("Forked {} into {}", base, next);
        }

        Commands::Sync { src, dst, force } => {
            let repo = open_repo(&data_dir).await?;
            repo.sync(&src, &dst, force).await?;
            println!("Synced {} -> {}", src, dst);
        }

        Commands::Add { path } => {
            let repo = open_repo(&data_dir).await?;
            let data = std::fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let name = path
                .to_str()
                .context("path is not valid UTF-8")?
                .to_string();
            repo.add(&name, &data).await?;
            println!("Staged {} ({} bytes)", name, data.len());
        }

        Commands::Status => {
            let repo = open_repo(&data_dir).await?;
            let staged = repo.status()?;
            if staged.is_empty() {
                println!("Nothing staged");
            } else {
                for (path, entry) in staged {
                    println!("{}  {} bytes", path, entry.size);
                }
            }
        }

        Commands::Commit { message } => {
            let repo = open_repo(&data_dir).await?;
            repo.commit(&message).await?;
            let (name, _) = repo.get_active_branch().await?;
            println!("Committed to {}", name);
        }

        Commands::History { branch } => {
            let repo = open_repo(&data_dir).await?;
            let branch = branch.unwrap_or_default();
            repo.history(&branch, |id, snapshot| {
                println!("{}  {}", id, snapshot.message);
                Ok(())
            })
            .await?;
        }

        Commands::Cat { path, branch } => {
            let repo = open_repo(&data_dir).await?;
            let data = repo.cat(&branch, &path).await?;
            use std::io::Write;
            std::io::stdout().write_all(&data)?;
        }

        Commands::Ls { branch } => {
            let repo = open_repo(&data_dir).await?;
            let branch = branch.unwrap_or_default();
            for entry in repo.ls(&branch).await? {
                println!("{}  {} bytes", entry.name, entry.size);
            }
        }

        Commands::Remote { action } => match action {
            RemoteAction::Add {
                prefix,
                peer,
                secret,
                relay,
                addrs,
            } => {
                let peer_id = PeerId::from_base58(&peer)
                    .map_err(|e| anyhow::anyhow!("invalid peer id '{}': {}", peer, e))?;

                let mut config = RepoConfig::load(&data_dir)?;
                let inner = SpaceSpec::Peer { peer: peer_id };
                let target = match secret {
                    Some(hex_secret) => {
                        let secret = if hex_secret.is_empty() {
                            let generated = SpaceCrypto::generate_key();
                            println!("Generated secret: {}", hex::encode(generated));
                            generated.to_vec()
                        } else {
                            hex::decode(&hex_secret).context("secret is not valid hex")?
                        };
                        SpaceSpec::Crypto {
                            inner: Box::new(inner),
                            secret,
                        }
                    }
                    None => inner,
                };
                config.spaces.push(SpaceLayerSpec {
                    prefix: prefix.clone(),
                    target,
                });
                config.peers.push(PeerAddr {
                    peer: peer_id,
                    relay_url: relay,
                    direct_addresses: addrs,
                });
                config.save(&data_dir)?;
                println!("Mounted {} under {}", peer, prefix);
            }
            RemoteAction::List => {
                let config = RepoConfig::load(&data_dir)?;
                for layer in &config.spaces {
                    println!("{}  {:?}", layer.prefix, layer.target);
                }
            }
        },

        Commands::Serve => {
            let (repo, transport) = Repo::open_networked(&data_dir).await?;
            let addr = transport.local_addr();
            let mut count = 0usize;
            repo.local_space()
                .for_each(Span::all(), &mut |_| {
                    count += 1;
                    Ok(())
                })
                .await?;
            println!("Serving {} branches", count);
            println!("Peer id: {}", addr.peer.to_base58());
            println!(
                "Address: {}",
                serde_json::to_string(&addr).context("failed to render address")?
            );
            println!("Press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            let _ = transport;
        }
    }

    Ok(())
}
