use std::{path::Path, sync::Arc};

use chrono::{NaiveDate, Utc};
use clap::Parser;
use spend_ledger::{
    analytics::{HttpCostSource, SessionProvider, StaticSessionProvider},
    config::LedgerConfig,
    db::DbPool,
    models::{Account, Lease},
    observability, retention,
    services::{AccountLookup, SpendCalculator, StaticAccountLookup, UsageIngestionService},
};

/// CLI arguments for the spend ledger
#[derive(Parser, Debug)]
#[command(version, about = "Usage ledger and spend reconciliation", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file
    #[arg(short, long, global = true, default_value = "spend-ledger.toml")]
    config: String,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run database migrations and exit
    ///
    /// Useful for init containers or CI/CD pipelines.
    Migrate,
    /// Purge expired ledger rows
    Purge {
        /// Run a single pass and exit instead of looping
        #[arg(long)]
        once: bool,
    },
    /// Validate the configuration file and exit
    CheckConfig,
    /// Ingest recent daily usage for one lease
    Ingest {
        /// JSON file holding the lease
        #[arg(long)]
        lease: String,
        /// JSON file holding an array of accounts
        #[arg(long)]
        accounts: String,
        /// Treat this day as today (YYYY-MM-DD)
        #[arg(long)]
        today: Option<NaiveDate>,
    },
    /// Calculate the current spend for one lease
    Spend {
        /// JSON file holding the lease
        #[arg(long)]
        lease: String,
        /// JSON file holding an array of accounts
        #[arg(long)]
        accounts: String,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Command::CheckConfig => run_check_config(&args.config),
        Command::Migrate => run_migrate(&args.config).await,
        Command::Purge { once } => run_purge(&args.config, once).await,
        Command::Ingest {
            lease,
            accounts,
            today,
        } => run_ingest(&args.config, &lease, &accounts, today).await,
        Command::Spend { lease, accounts } => run_spend(&args.config, &lease, &accounts).await,
    }
}

fn exit_with(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

fn load_config(path: &str) -> LedgerConfig {
    match LedgerConfig::from_file(path) {
        Ok(config) => config,
        Err(e) => exit_with(format_args!("Failed to load config from {}: {}", path, e)),
    }
}

/// Load config and initialize logging and metrics.
fn init(path: &str) -> LedgerConfig {
    let config = load_config(path);

    if let Err(e) = observability::init_tracing(&config.observability) {
        exit_with(format_args!("Failed to initialize tracing: {}", e));
    }
    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        exit_with(format_args!("Failed to initialize metrics: {}", e));
    }

    tracing::debug!(config_file = %path, "Configuration loaded");
    config
}

async fn connect(config: &LedgerConfig) -> DbPool {
    if config.database.is_none() {
        exit_with("Database is not configured");
    }

    match DbPool::from_config(&config.database, &config.ledger).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            exit_with(format_args!("Failed to connect to database: {}", e));
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> T {
    let contents = match std::fs::read_to_string(Path::new(path)) {
        Ok(contents) => contents,
        Err(e) => exit_with(format_args!("Failed to read {}: {}", path, e)),
    };
    match serde_json::from_str(&contents) {
        Ok(value) => value,
        Err(e) => exit_with(format_args!("Failed to parse {}: {}", path, e)),
    }
}

fn session_provider(config: &LedgerConfig) -> Arc<dyn SessionProvider> {
    match &config.analytics.session_token {
        Some(token) => Arc::new(StaticSessionProvider::new(token.clone())),
        None => {
            tracing::warn!("analytics.session_token is not set; cost queries will be refused");
            Arc::new(StaticSessionProvider::unavailable())
        }
    }
}

fn cost_source(config: &LedgerConfig) -> Arc<HttpCostSource> {
    match HttpCostSource::from_config(&config.analytics) {
        Ok(source) => Arc::new(source),
        Err(e) => exit_with(e),
    }
}

fn run_check_config(path: &str) {
    let config = load_config(path);
    println!("Configuration OK: {}", path);
    println!("  budget period: {}", config.ledger.budget_period.as_str());
    println!(
        "  database: {}",
        if config.database.is_none() {
            "not configured"
        } else {
            "configured"
        }
    );
    println!(
        "  analytics: {}",
        config.analytics.base_url.as_deref().unwrap_or("not configured")
    );
    println!(
        "  retention: {}",
        if config.retention.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
}

async fn run_migrate(path: &str) {
    let config = init(path);
    tracing::info!(config_file = %path, "Running database migrations");

    let db = connect(&config).await;
    match db.run_migrations().await {
        Ok(()) => tracing::info!("Database migrations completed successfully"),
        Err(e) => {
            tracing::error!(error = %e, "Database migrations failed");
            exit_with(format_args!("Database migrations failed: {}", e));
        }
    }
}

async fn run_purge(path: &str, once: bool) {
    let config = init(path);
    let db = Arc::new(connect(&config).await);

    if once {
        let ledger = db.usage_ledger();
        match retention::run_retention(ledger.as_ref(), &config.retention, Utc::now()).await {
            Ok(result) => println!(
                "{} usage events, {} lease aggregates, {} principal aggregates{}",
                result.usage_events_deleted,
                result.lease_aggregates_deleted,
                result.principal_aggregates_deleted,
                if config.retention.safety.dry_run {
                    " would be deleted (dry run)"
                } else {
                    " deleted"
                }
            ),
            Err(e) => exit_with(format_args!("Retention run failed: {}", e)),
        }
        return;
    }

    if !config.retention.enabled {
        exit_with("retention.enabled is false; use --once for a single pass");
    }

    tokio::select! {
        _ = retention::start_retention_worker(db, config.retention.clone()) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping retention worker");
        }
    }
}

async fn run_ingest(path: &str, lease_path: &str, accounts_path: &str, today: Option<NaiveDate>) {
    let config = init(path);
    let lease: Lease = read_json(lease_path);
    let accounts: Vec<Account> = read_json(accounts_path);

    let db = connect(&config).await;
    let service = UsageIngestionService::new(
        db.usage_ledger(),
        cost_source(&config),
        session_provider(&config),
        Arc::new(StaticAccountLookup::new(accounts)),
        config.ingestion.clone(),
    );

    let today = today.unwrap_or_else(|| Utc::now().date_naive());
    match service.ingest_on(lease, today).await {
        Ok(lease) => {
            let output = serde_json::json!({
                "leaseId": lease.id,
                "continue": service.should_continue(&lease, Utc::now()),
            });
            println!("{}", output);
        }
        Err(e) => exit_with(e),
    }
}

async fn run_spend(path: &str, lease_path: &str, accounts_path: &str) {
    let config = init(path);
    let lease: Lease = read_json(lease_path);
    let accounts = StaticAccountLookup::new(read_json::<Vec<Account>>(accounts_path));

    let account = match accounts.get_account(&lease.account_id).await {
        Ok(account) => account,
        Err(e) => exit_with(e),
    };

    let db = connect(&config).await;
    let calculator = SpendCalculator::new(
        db.usage_ledger(),
        cost_source(&config),
        session_provider(&config),
    );

    match calculator.spend_report_at(&account, &lease, Utc::now()).await {
        Ok(report) => match serde_json::to_string_pretty(&serde_json::json!({
            "report": &report,
            "overBudget": report.is_over_budget(),
        })) {
            Ok(json) => println!("{}", json),
            Err(e) => exit_with(e),
        },
        Err(e) => exit_with(e),
    }
}
