use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;

use kvsync::server::AuthScheme;
use kvsync::SyncClient;

#[derive(Parser)]
#[command(name = "kvsync")]
#[command(version)]
#[command(about = "Push records to a KV Sync server", long_about = None)]
struct Cli {
    #[command(flatten)]
    connection: Connection,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Connection {
    /// Server base URL
    #[arg(long, env = "KVSYNC_SERVER_URL", default_value = "http://localhost:8080")]
    server: String,

    /// Shared secret
    #[arg(long, env = "KVSYNC_SECRET", hide_env_values = true)]
    secret: String,

    /// Credential scheme the server expects on write routes
    #[arg(long, value_enum, default_value = "derived")]
    scheme: SchemeArg,
}

#[derive(Clone, Copy, ValueEnum)]
enum SchemeArg {
    Derived,
    Plain,
}

impl From<SchemeArg> for AuthScheme {
    fn from(arg: SchemeArg) -> Self {
        match arg {
            SchemeArg::Derived => AuthScheme::Derived,
            SchemeArg::Plain => AuthScheme::Plain,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Push a record to /sync and print the authoritative result
    Push {
        /// Store key
        key: String,
        /// Value as JSON
        value: String,
        /// Write clock in ms; 0 lets the server stamp it
        #[arg(long, default_value_t = 0)]
        update_at: u64,
    },
    /// Push a value to a named resource (e.g. rules, setting)
    PushNamed {
        /// Resource name
        resource: String,
        /// Value as JSON
        value: String,
        /// Write clock in ms; 0 lets the server stamp it
        #[arg(long, default_value_t = 0)]
        update_at: u64,
    },
    /// Fetch the read-only share export
    Share,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = SyncClient::new(cli.connection.server, cli.connection.secret)
        .with_scheme(cli.connection.scheme.into());

    match cli.command {
        Commands::Push {
            key,
            value,
            update_at,
        } => {
            let value: Value = serde_json::from_str(&value)?;
            let record = client.push(&key, value, update_at).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::PushNamed {
            resource,
            value,
            update_at,
        } => {
            let value: Value = serde_json::from_str(&value)?;
            let record = client.push_named(&resource, &value, update_at).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Share => {
            let value = client.fetch_share().await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }

    Ok(())
}
