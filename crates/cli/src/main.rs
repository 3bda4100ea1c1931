mod commands;
mod logging;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use shiftdb_migrate::config::DEFAULT_FILE_EXTENSION;
use shiftdb_migrate::{
    backends, ConfigError, DatabaseConnection, DatabaseSettings, MigrationConfig, MigrationEngine,
};

use logging::{LogFormat, LoggingConfig};

#[derive(Parser, Debug)]
#[command(name = "migrate")]
#[command(about = "Apply, roll back and inspect versioned SQL migrations", version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Directory holding `<name>-up.sql` / `<name>-down.sql` pairs
    #[arg(long, global = true, env = "MIGRATIONS_DIR")]
    migrations_dir: Option<PathBuf>,

    /// Table that records applied migrations
    #[arg(long, global = true, env = "TRACKING_TABLE")]
    tracking_table: Option<String>,

    /// Database URL; falls back to DB_HOST, DB_USER, DB_PASSWORD, DB_NAME and DB_PORT
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Migration script extension
    #[arg(long, global = true, env = "MIGRATE_FILE_EXTENSION", default_value = DEFAULT_FILE_EXTENSION)]
    file_extension: String,

    /// Refuse to apply when an applied migration changed on disk
    #[arg(long, global = true, env = "MIGRATE_VERIFY_CHECKSUMS")]
    verify_checksums: bool,

    /// Per statement timeout in seconds
    #[arg(long, global = true, env = "MIGRATE_STATEMENT_TIMEOUT")]
    statement_timeout: Option<u64>,

    /// Connection timeout in seconds
    #[arg(long, global = true, env = "MIGRATE_CONNECT_TIMEOUT")]
    connect_timeout: Option<u64>,

    /// Log output format
    #[arg(long, global = true, env = "MIGRATE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, env = "MIGRATE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Include source file and line in log output
    #[arg(long, global = true, env = "MIGRATE_LOG_LOCATION")]
    log_location: bool,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Run all pending migrations
    Apply,

    /// Roll back the most recent migration, or the named one
    Rollback {
        /// Migration name, e.g. 20240101120000-create_users
        name: Option<String>,
    },

    /// Create a new up/down migration pair
    Create {
        /// Migration name; whitespace becomes '_'
        name: String,
    },

    /// List applied migrations, oldest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show pending, applied and drifted migrations
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl GlobalArgs {
    fn migration_config(&self) -> Result<MigrationConfig, ConfigError> {
        let migrations_dir = self.migrations_dir.clone().ok_or_else(|| {
            ConfigError::missing_required(
                "migrations_dir",
                "pass --migrations-dir or set MIGRATIONS_DIR",
            )
        })?;
        let tracking_table = self.tracking_table.clone().ok_or_else(|| {
            ConfigError::missing_required(
                "tracking_table",
                "pass --tracking-table or set TRACKING_TABLE",
            )
        })?;

        let config = MigrationConfig::new(migrations_dir, tracking_table)
            .with_file_extension(self.file_extension.clone())
            .with_verify_checksums(self.verify_checksums)
            .with_statement_timeout(self.statement_timeout.map(Duration::from_secs))
            .with_connect_timeout(self.connect_timeout.map(Duration::from_secs));

        config.validate()?;
        Ok(config)
    }

    fn database_settings(&self) -> Result<DatabaseSettings, ConfigError> {
        match &self.database_url {
            Some(url) => {
                let settings = DatabaseSettings::new(url.clone());
                settings.validate()?;
                Ok(settings)
            }
            None => DatabaseSettings::from_env(),
        }
    }

    fn logging_config(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.log_level.clone(),
            format: self.log_format,
            include_location: self.log_location,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    logging::init_logging(&cli.global.logging_config())?;

    let config = cli
        .global
        .migration_config()
        .context("Invalid migration configuration")?;
    tracing::debug!(
        migrations_dir = %config.migrations_dir.display(),
        tracking_table = %config.tracking_table,
        verify_checksums = config.verify_checksums,
        "Loaded migration configuration"
    );
    let engine = MigrationEngine::new(config)?;

    if let Commands::Create { name } = &cli.command {
        return commands::migrate::create(&engine, name);
    }

    let settings = cli
        .global
        .database_settings()
        .context("Invalid database configuration")?;
    let mut conn = backends::connect(&settings, engine.config())
        .await
        .with_context(|| format!("Failed to connect to {}", settings.redacted_url()))?;

    // The connection is closed whether or not the command succeeded.
    let result = run_command(&engine, conn.as_mut(), &cli.command).await;
    let closed = conn.close().await;

    result?;
    closed.context("Failed to close database connection")?;
    Ok(())
}

async fn run_command(
    engine: &MigrationEngine,
    conn: &mut dyn DatabaseConnection,
    command: &Commands,
) -> anyhow::Result<()> {
    match command {
        Commands::Apply => commands::migrate::apply(engine, conn).await,
        Commands::Rollback { name } => {
            commands::migrate::rollback(engine, conn, name.as_deref()).await
        }
        Commands::List { json } => commands::migrate::list(engine, conn, *json).await,
        Commands::Status { json } => commands::migrate::status(engine, conn, *json).await,
        Commands::Create { name } => commands::migrate::create(engine, name),
    }
}
