use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "cloak", version, about = "Transparent field-level encryption for SQL databases")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register with the Hub, sync the schema and prime the policy cache.
    Bootstrap {
        #[arg(long, short, default_value = "cloak.yaml", env = "CLOAK_CONFIG")]
        config: PathBuf,

        /// Keep the recurring mapping sync running until Ctrl-C.
        #[arg(long, default_value_t = false)]
        watch: bool,
    },

    /// Live schema operations
    Schema {
        #[command(subcommand)]
        cmd: SchemaCommand,
    },

    /// Persisted policy state
    Policy {
        #[command(subcommand)]
        cmd: PolicyCommand,
    },

    /// Show what the statement parser recovers from a SQL statement.
    Parse { sql: String },

    /// Report whether a value looks like engine ciphertext.
    Detect {
        value: String,

        /// Read envelope formats from this configuration instead of the defaults.
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum SchemaCommand {
    /// Collect the live schema and print it as JSON
    Snapshot {
        #[arg(long, short, default_value = "cloak.yaml", env = "CLOAK_CONFIG")]
        config: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum PolicyCommand {
    /// Print the persisted identity, endpoint and policy mappings
    Show {
        #[arg(long, short, default_value = "cloak.yaml", env = "CLOAK_CONFIG")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Bootstrap { config, watch } => commands::bootstrap::run(&config, watch).await?,
        Command::Schema {
            cmd: SchemaCommand::Snapshot { config },
        } => commands::schema::snapshot(&config).await?,
        Command::Policy {
            cmd: PolicyCommand::Show { config },
        } => commands::policy::show(&config)?,
        Command::Parse { sql } => println!("{}", commands::inspect::render_parse(&sql)?),
        Command::Detect { value, config } => {
            println!("{}", commands::inspect::detect(&value, config.as_deref())?)
        }
    }

    Ok(())
}
