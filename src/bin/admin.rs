//! KV Sync Admin CLI
//!
//! Operator tool for the sync server: prints the scoped tokens clients need
//! and inspects the file store.
//!
//! # Usage
//!
//! ```bash
//! kvsync-admin token sync
//! kvsync-admin token share
//! kvsync-admin keys
//! kvsync-admin show kvsync-rules
//! ```
//!
//! Reads the same config file and `KVSYNC_*` environment variables as the server.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use kvsync::config::{ServerConfig, StoreBackend};
use kvsync::server::{Authenticator, OperationClass};
use kvsync::store::{FileStore, KvStore};

// ============================================================================
// CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "kvsync-admin")]
#[command(version)]
#[command(about = "KV Sync server administration tool")]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the credential a client must present
    Token {
        /// Operation the token is for
        #[arg(value_enum, default_value = "sync")]
        purpose: Purpose,
    },
    /// List keys in the file store
    Keys,
    /// Print a stored entry
    Show {
        /// Store key
        key: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Purpose {
    /// Bearer token for write routes
    Sync,
    /// `psk` query token for the share export
    Share,
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = ServerConfig::load(cli.config)?;

    match cli.command {
        Commands::Token { purpose } => print_token(&config, purpose),
        Commands::Keys => {
            let store = file_store(&config)?;
            let keys = store.list().await?;
            if keys.is_empty() {
                println!("No keys in {}", store.data_dir().display());
            }
            for key in keys {
                println!("{}", key);
            }
            Ok(())
        }
        Commands::Show { key } => {
            let store = file_store(&config)?;
            match store.get_with_metadata(&key).await? {
                Some(entry) => {
                    println!("updateAt: {}", entry.metadata.update_at);
                    println!("{}", serde_json::to_string_pretty(&entry.value)?);
                }
                None => println!("Key not found: {}", key),
            }
            Ok(())
        }
    }
}

fn print_token(config: &ServerConfig, purpose: Purpose) -> Result<(), Box<dyn std::error::Error>> {
    let auth = Authenticator::new(config.secret.clone(), config.auth_scheme)
        .with_salts(config.sync_salt.clone(), config.share_salt.clone());

    let class = match purpose {
        Purpose::Sync => config.auth_scheme.write_class(),
        Purpose::Share => OperationClass::ShareRead,
    };
    let credential = auth.expected_credential(class)?;

    match class {
        OperationClass::Plain => println!("{}: {}", config.psk_header, credential),
        OperationClass::SyncWrite => println!("Authorization: Bearer {}", credential),
        OperationClass::ShareRead => println!("?psk={}", credential),
    }
    Ok(())
}

fn file_store(config: &ServerConfig) -> Result<FileStore, Box<dyn std::error::Error>> {
    match config.store {
        StoreBackend::File => Ok(FileStore::new(config.data_dir.clone())),
        StoreBackend::Memory => Err("configured store is in-memory; nothing to inspect".into()),
    }
}
