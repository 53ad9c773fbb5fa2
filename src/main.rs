//! Chit Fund Settlement Engine
//!
//! Runs the expiry scanner and the settlement API, or performs one-off
//! administrative settlement actions.

use chit_settlement::{
    api::{self, AppState},
    completion::CompletionWatcher,
    config::Config,
    cycles::CycleOpener,
    ledger::BidLedger,
    notify::{NotificationDispatcher, Notifier, LogNotifier, TelegramNotifier},
    scanner::{ExpiryScanner, RequestCheck},
    settlement::{SettlementEngine, SettlementTrigger},
    storage::Database,
    types::Money,
};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chit-settle")]
#[command(about = "Bidding-cycle settlement engine for chit fund groups")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    Migrate,
    /// Run the expiry scanner
    Run,
    /// Run the expiry scanner and the HTTP API
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Open a group's next bidding cycle, starting now
    OpenCycle {
        group_id: i64,
        /// Length of the bidding window
        #[arg(long, default_value_t = 48)]
        hours: i64,
        /// Skip the member announcement
        #[arg(long)]
        quiet: bool,
    },
    /// Settle every expired open cycle once
    Scan,
    /// Settle one cycle now
    Settle {
        cycle_id: i64,
        /// Acting administrator
        #[arg(long)]
        admin: Option<i64>,
    },
    /// Place or replace a bid
    Bid {
        cycle_id: i64,
        member_id: i64,
        amount: Decimal,
    },
    /// Approve a settled cycle's payout and check group completion
    Approve { cycle_id: i64 },
    /// Re-run the completion check for a group
    CheckCompletion { group_id: i64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config)?;
    let db = Database::connect(&config.database.path).await?;

    match cli.command {
        Commands::Migrate => {
            tracing::info!("Schema is up to date at {}", config.database.path);
            Ok(())
        }
        Commands::Run => run_scanner(config, db).await,
        Commands::Serve { port } => serve(config, db, port).await,
        Commands::OpenCycle {
            group_id,
            hours,
            quiet,
        } => open_cycle(config, db, group_id, hours, quiet).await,
        Commands::Scan => scan_once(config, db).await,
        Commands::Settle { cycle_id, admin } => settle_cycle(config, db, cycle_id, admin).await,
        Commands::Bid {
            cycle_id,
            member_id,
            amount,
        } => place_bid(db, cycle_id, member_id, amount).await,
        Commands::Approve { cycle_id } => approve_payout(db, cycle_id).await,
        Commands::CheckCompletion { group_id } => check_completion(db, group_id).await,
    }
}

fn build_dispatcher(config: &Config) -> NotificationDispatcher {
    let notifier: Arc<dyn Notifier> = if let Some(tg) = &config.telegram {
        Arc::new(TelegramNotifier::new(tg))
    } else {
        tracing::warn!("Telegram not configured, notifications go to the log only");
        Arc::new(LogNotifier)
    };
    NotificationDispatcher::new(notifier)
}

fn build_engine(
    config: &Config,
    db: Database,
    notifications: NotificationDispatcher,
) -> Arc<SettlementEngine> {
    let engine = SettlementEngine::new(db, notifications);
    let engine = match config.settlement.rng_seed {
        Some(seed) => engine.with_seed(seed),
        None => engine,
    };
    Arc::new(engine)
}

async fn run_scanner(config: Config, db: Database) -> anyhow::Result<()> {
    let engine = build_engine(&config, db, build_dispatcher(&config));
    let scanner = Arc::new(ExpiryScanner::new(engine, &config.scanner));

    let handle = scanner.spawn();
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down expiry scanner");
    handle.abort();
    Ok(())
}

async fn serve(config: Config, db: Database, port: Option<u16>) -> anyhow::Result<()> {
    let notifications = build_dispatcher(&config);
    let engine = build_engine(&config, db.clone(), notifications.clone());
    let scanner = Arc::new(ExpiryScanner::new(engine.clone(), &config.scanner));
    let request_check = config
        .request_check
        .enabled
        .then(|| Arc::new(RequestCheck::new(scanner.clone(), config.request_check.min_interval())));

    let state = Arc::new(AppState {
        opener: CycleOpener::new(db.clone(), notifications),
        ledger: BidLedger::new(db.clone()),
        engine,
        scanner: scanner.clone(),
        completion: CompletionWatcher::new(db),
        request_check,
    });

    let scanner_handle = scanner.spawn();
    let port = port.unwrap_or(config.server.port);

    tokio::select! {
        result = api::start_server(state, port) => {
            if let Err(e) = result {
                tracing::error!("API server stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }
    scanner_handle.abort();
    Ok(())
}

async fn open_cycle(
    config: Config,
    db: Database,
    group_id: i64,
    hours: i64,
    quiet: bool,
) -> anyhow::Result<()> {
    let opener = CycleOpener::new(db, build_dispatcher(&config));
    let start = Utc::now();
    let (cycle, announcement) = opener
        .open_and_announce(group_id, start, start + Duration::hours(hours), !quiet)
        .await?;

    println!("Cycle #{} opened for group {} (id {})", cycle.cycle_number, group_id, cycle.id);
    println!("  Pool:        {}", cycle.total_pool_amount);
    println!("  Bidding end: {}", cycle.bidding_end);
    if let Some(handle) = announcement {
        handle.await?;
    }
    Ok(())
}

async fn scan_once(config: Config, db: Database) -> anyhow::Result<()> {
    let engine = build_engine(&config, db, build_dispatcher(&config));
    let scanner = ExpiryScanner::new(engine, &config.scanner);
    let report = scanner.run_once(Utc::now(), SettlementTrigger::Cli).await?;

    println!(
        "Expired: {}  Closed: {}  Already closed: {}  Failed: {}",
        report.expired,
        report.settled_count(),
        report.already_settled,
        report.failed.len()
    );
    for (cycle_id, reason) in &report.failed {
        println!("  cycle {}: {}", cycle_id, reason);
    }

    // Let spawned notifications flush.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    Ok(())
}

async fn settle_cycle(
    config: Config,
    db: Database,
    cycle_id: i64,
    admin: Option<i64>,
) -> anyhow::Result<()> {
    let engine = build_engine(&config, db, build_dispatcher(&config));
    let trigger = match admin {
        Some(admin_id) => SettlementTrigger::Admin { admin_id },
        None => SettlementTrigger::Cli,
    };

    match engine.settle(cycle_id, trigger).await {
        Ok(summary) => {
            println!("Cycle {} settled", summary.cycle_id);
            println!("  Winner:          member {}", summary.winner_member_id);
            println!("  Winning bid:     {}", summary.winning_bid);
            println!("  Profit:          {}", summary.profit_amount);
            println!("  Per member:      {}", summary.profit_per_member);
            println!("  Random winner:   {}", summary.is_random_winner);
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            Ok(())
        }
        Err(e) if e.is_benign() => {
            println!("Cycle {} is already closed", cycle_id);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn place_bid(
    db: Database,
    cycle_id: i64,
    member_id: i64,
    amount: Decimal,
) -> anyhow::Result<()> {
    let ledger = BidLedger::new(db);
    let receipt = ledger
        .place_bid(cycle_id, member_id, Money::from_decimal(amount)?)
        .await?;

    if receipt.replaced {
        println!("Bid updated: {} on cycle {}", receipt.bid.amount, cycle_id);
    } else {
        println!("Bid placed: {} on cycle {}", receipt.bid.amount, cycle_id);
    }
    Ok(())
}

async fn approve_payout(db: Database, cycle_id: i64) -> anyhow::Result<()> {
    let watcher = CompletionWatcher::new(db);
    let status = watcher.approve_payout(cycle_id).await?;

    println!("Payout for cycle {} approved", cycle_id);
    println!(
        "  Group {}: {}/{} members have won{}",
        status.group_id,
        status.distinct_winners,
        status.total_members,
        if status.newly_completed { " - group completed" } else { "" }
    );
    Ok(())
}

async fn check_completion(db: Database, group_id: i64) -> anyhow::Result<()> {
    let watcher = CompletionWatcher::new(db);
    let status = watcher.check_completion(group_id).await?;

    println!(
        "Group {}: {}/{} winners, completed: {}",
        status.group_id, status.distinct_winners, status.total_members, status.completed
    );
    Ok(())
}
