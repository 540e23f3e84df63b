//! corpus-migrate command line.
//!
//! Exit codes: 0 success, 1 fatal error, 2 a store could not be reached,
//! 3 verification found a mismatch.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use corpus_migrate::config::DEFAULT_BATCH_SIZE;
use corpus_migrate::{
    Error, Expectations, GraphConfig, MigrationConfig, MigrationOrchestrator, RelationalConfig, RetryPolicy,
    RunReport,
};

#[derive(Parser)]
#[command(name = "corpus-migrate", version)]
#[command(about = "Move the bond corpus between Neo4j and PostgreSQL through CSV/JSON files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Args)]
struct GlobalArgs {
    /// Directory holding the flat files and manifests
    #[arg(long, global = true, env = "MIGRATION_DIR", default_value = "data/migration")]
    data_dir: PathBuf,

    /// Rows per import batch
    #[arg(long, global = true, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    #[arg(long, global = true, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Connection attempts per store before giving up
    #[arg(long, global = true, default_value_t = 30)]
    retry_attempts: u32,

    /// Seconds between connection attempts
    #[arg(long, global = true, default_value_t = 2)]
    retry_delay_secs: u64,

    /// Decode every input file as a historical producer's output
    #[arg(long, global = true)]
    tolerant: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Export both stores, write the manifest, verify the source
    Export {
        #[command(flatten)]
        stores: StoreArgs,
    },

    /// Export both stores and write the manifest
    ExportOnly {
        #[command(flatten)]
        stores: StoreArgs,
    },

    /// Clear, load and derive, write the manifest, verify the target
    Import {
        #[command(flatten)]
        stores: StoreArgs,

        /// Keep existing data instead of clearing the target first
        #[arg(long)]
        no_clear: bool,

        /// Expected count, e.g. `bonds=85200` or `relational.bonds=1200`
        #[arg(long = "expect", value_name = "ENTITY=N")]
        expect: Vec<String>,
    },

    /// Clear, load and derive, write the manifest
    ImportOnly {
        #[command(flatten)]
        stores: StoreArgs,

        /// Keep existing data instead of clearing the target first
        #[arg(long)]
        no_clear: bool,
    },

    /// Count and sample both stores
    Verify {
        #[command(flatten)]
        stores: StoreArgs,

        /// Expected count, e.g. `bonds=85200` or `relational.bonds=1200`
        #[arg(long = "expect", value_name = "ENTITY=N")]
        expect: Vec<String>,
    },

    /// Export from one pair of stores, import into another, verify the target
    Migrate {
        #[command(flatten)]
        source: StoreArgs,

        #[command(flatten)]
        target: TargetStoreArgs,

        /// Expected count on the target
        #[arg(long = "expect", value_name = "ENTITY=N")]
        expect: Vec<String>,
    },
}

// ============================================================================
// Store flags
// ============================================================================

#[derive(Args)]
struct StoreArgs {
    #[arg(long = "neo4j-uri", env = "NEO4J_URI", default_value = "bolt://localhost:7687")]
    neo4j_uri: String,

    #[arg(long = "neo4j-user", env = "NEO4J_USER", default_value = "neo4j")]
    neo4j_user: String,

    #[arg(long = "neo4j-password", env = "NEO4J_PASSWORD", default_value = "", hide_env_values = true)]
    neo4j_password: String,

    #[arg(long = "neo4j-database", env = "NEO4J_DATABASE")]
    neo4j_database: Option<String>,

    #[arg(long = "pg-host", env = "POSTGRES_HOST", default_value = "localhost")]
    pg_host: String,

    #[arg(long = "pg-port", env = "POSTGRES_PORT", default_value_t = 5432)]
    pg_port: u16,

    #[arg(long = "pg-db", env = "POSTGRES_DB", default_value = "semantic")]
    pg_db: String,

    #[arg(long = "pg-user", env = "POSTGRES_USER", default_value = "postgres")]
    pg_user: String,

    #[arg(long = "pg-password", env = "POSTGRES_PASSWORD", default_value = "", hide_env_values = true)]
    pg_password: String,
}

impl StoreArgs {
    fn graph(&self) -> GraphConfig {
        GraphConfig {
            uri: self.neo4j_uri.clone(),
            user: self.neo4j_user.clone(),
            password: self.neo4j_password.clone(),
            database: self.neo4j_database.clone(),
        }
    }

    fn relational(&self) -> RelationalConfig {
        RelationalConfig {
            host: self.pg_host.clone(),
            port: self.pg_port,
            database: self.pg_db.clone(),
            user: self.pg_user.clone(),
            password: self.pg_password.clone(),
        }
    }
}

#[derive(Args)]
struct TargetStoreArgs {
    #[arg(long = "target-neo4j-uri", env = "TARGET_NEO4J_URI")]
    target_neo4j_uri: String,

    #[arg(long = "target-neo4j-user", env = "TARGET_NEO4J_USER", default_value = "neo4j")]
    target_neo4j_user: String,

    #[arg(long = "target-neo4j-password", env = "TARGET_NEO4J_PASSWORD", default_value = "", hide_env_values = true)]
    target_neo4j_password: String,

    #[arg(long = "target-pg-host", env = "TARGET_POSTGRES_HOST")]
    target_pg_host: String,

    #[arg(long = "target-pg-port", env = "TARGET_POSTGRES_PORT", default_value_t = 5432)]
    target_pg_port: u16,

    #[arg(long = "target-pg-db", env = "TARGET_POSTGRES_DB", default_value = "semantic")]
    target_pg_db: String,

    #[arg(long = "target-pg-user", env = "TARGET_POSTGRES_USER", default_value = "postgres")]
    target_pg_user: String,

    #[arg(long = "target-pg-password", env = "TARGET_POSTGRES_PASSWORD", default_value = "", hide_env_values = true)]
    target_pg_password: String,
}

impl TargetStoreArgs {
    fn graph(&self) -> GraphConfig {
        GraphConfig {
            uri: self.target_neo4j_uri.clone(),
            user: self.target_neo4j_user.clone(),
            password: self.target_neo4j_password.clone(),
            database: None,
        }
    }

    fn relational(&self) -> RelationalConfig {
        RelationalConfig {
            host: self.target_pg_host.clone(),
            port: self.target_pg_port,
            database: self.target_pg_db.clone(),
            user: self.target_pg_user.clone(),
            password: self.target_pg_password.clone(),
        }
    }
}

impl Commands {
    /// Every endpoint this command may connect to, for failure messages.
    fn endpoints(&self) -> Vec<String> {
        let pair = |s: &StoreArgs| [s.graph().endpoint(), s.relational().endpoint()];
        match self {
            Commands::Export { stores }
            | Commands::ExportOnly { stores }
            | Commands::Import { stores, .. }
            | Commands::ImportOnly { stores, .. }
            | Commands::Verify { stores, .. } => pair(stores).to_vec(),
            Commands::Migrate { source, target, .. } => {
                let mut all = pair(source).to_vec();
                all.push(target.graph().endpoint());
                all.push(target.relational().endpoint());
                all
            }
        }
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.global.log_format);

    let endpoints = cli.command.endpoints();
    let config = migration_config(&cli.global);

    match run(cli.command, config).await {
        Ok(reports) => {
            for report in &reports {
                println!("{}", report.summary());
            }
            if reports.iter().any(RunReport::verification_failed) {
                ExitCode::from(3)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => match e.downcast_ref::<Error>() {
            Some(err) if err.is_connection() => {
                eprintln!("error: {err}");
                eprintln!("attempted endpoints:");
                for endpoint in &endpoints {
                    eprintln!("  {endpoint}");
                }
                ExitCode::from(2)
            }
            _ => {
                eprintln!("error: {e:#}");
                ExitCode::FAILURE
            }
        },
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn migration_config(global: &GlobalArgs) -> MigrationConfig {
    let retry = RetryPolicy::new(global.retry_attempts, Duration::from_secs(global.retry_delay_secs));
    MigrationConfig::new(&global.data_dir)
        .with_batch_size(global.batch_size)
        .with_retry(retry)
        .tolerant(global.tolerant)
}

async fn run(command: Commands, config: MigrationConfig) -> anyhow::Result<Vec<RunReport>> {
    let reports = match command {
        Commands::Export { stores } => {
            let orchestrator = MigrationOrchestrator::new(config);
            vec![orchestrator.export(&stores.graph(), &stores.relational(), true).await?]
        }
        Commands::ExportOnly { stores } => {
            let orchestrator = MigrationOrchestrator::new(config);
            vec![orchestrator.export(&stores.graph(), &stores.relational(), false).await?]
        }
        Commands::Import { stores, no_clear, expect } => {
            let orchestrator = MigrationOrchestrator::new(config.with_clear(!no_clear))
                .with_expectations(Expectations::from_literals(&expect)?);
            vec![orchestrator.import(&stores.graph(), &stores.relational(), true).await?]
        }
        Commands::ImportOnly { stores, no_clear } => {
            let orchestrator = MigrationOrchestrator::new(config.with_clear(!no_clear));
            vec![orchestrator.import(&stores.graph(), &stores.relational(), false).await?]
        }
        Commands::Verify { stores, expect } => {
            let orchestrator =
                MigrationOrchestrator::new(config).with_expectations(Expectations::from_literals(&expect)?);
            vec![orchestrator.verify(&stores.graph(), &stores.relational()).await?]
        }
        Commands::Migrate { source, target, expect } => {
            let orchestrator =
                MigrationOrchestrator::new(config).with_expectations(Expectations::from_literals(&expect)?);
            let (source_graph, source_rel) = (source.graph(), source.relational());
            let (target_graph, target_rel) = (target.graph(), target.relational());
            orchestrator.migrate((&source_graph, &source_rel), (&target_graph, &target_rel)).await?
        }
    };
    Ok(reports)
}
