use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing_subscriber::EnvFilter;
use tradectl::adapters::{
    InMemorySessionRepository, InMemoryTradeJournal, LogNotifier, PaperExchange,
    PaperPipelineFactory, PaperPortfolio, StaticSubscriptions,
};
use tradectl::clock::{Clock, SystemClock};
use tradectl::db::PostgresSessionRepository;
use tradectl::execution::JobScheduler;
use tradectl::orchestrator::{CoreTradingOrchestrator, TradePermissionGuard};
use tradectl::ports::{ExchangePort, Notifier, SessionRepository, TradeJournal};
use tradectl::{SessionService, Settings};

#[derive(Parser)]
#[command(name = "tradectl")]
#[command(about = "Multi-tenant automated trading controller (paper mode)")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a live paper-trading session for one user until Ctrl+C
    Run {
        /// User to trade for (must be entitled)
        #[arg(short, long)]
        user: String,
        /// Brokerage account id recorded on the session
        #[arg(short, long)]
        account: String,
        /// Settings file (defaults to ./tradectl.toml when present)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Seconds between status reports
        #[arg(long, default_value = "60")]
        status_every: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            user,
            account,
            config,
            status_every,
        } => {
            let settings = Settings::load(config.as_deref()).context("failed to load settings")?;
            run(settings, &user, &account, Duration::from_secs(status_every.max(1))).await
        }
    }
}

// ============================================================================
// Initialization Functions
// ============================================================================

fn setup_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tradectl=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Postgres when configured and reachable, memory otherwise
async fn open_stores(
    settings: &Settings,
) -> (Arc<dyn SessionRepository>, Arc<dyn TradeJournal>) {
    if let Some(database_url) = settings.database_url.as_deref() {
        match PostgresSessionRepository::connect(database_url).await {
            Ok(repo) => {
                tracing::info!("Postgres persistence enabled (sessions & trade journal)");
                let repo = Arc::new(repo);
                return (repo.clone(), repo);
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to connect to Postgres ({:#}), continuing with in-memory storage",
                    e
                );
            }
        }
    }

    (
        Arc::new(InMemorySessionRepository::new()),
        Arc::new(InMemoryTradeJournal::new()),
    )
}

// ============================================================================
// Run
// ============================================================================

async fn run(
    settings: Settings,
    user: &str,
    account: &str,
    status_every: Duration,
) -> anyhow::Result<()> {
    tracing::info!("🚀 tradectl starting (paper mode)");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let (repository, journal) = open_stores(&settings).await;

    let exchange: Arc<dyn ExchangePort> = Arc::new(PaperExchange::new(&settings.paper, clock.clone()));
    let portfolio = Arc::new(PaperPortfolio::new(settings.paper.initial_cash));

    let factory = PaperPipelineFactory::new(
        portfolio.clone(),
        notifier.clone(),
        journal,
        settings.risk.clone(),
        settings.guards.clone(),
        settings.strategy.clone(),
        clock.clone(),
    )
    .with_exchange(settings.job.exchange.clone(), exchange.clone())
    .with_exchange(settings.job.market_data_exchange.clone(), exchange);

    let sessions = Arc::new(SessionService::new(
        JobScheduler::current()?,
        Arc::new(factory),
        notifier,
        clock.clone(),
    ));

    let subscriptions = StaticSubscriptions::new(&settings.subscription.entitled_users);
    let orchestrator = CoreTradingOrchestrator::new(
        TradePermissionGuard::new(Arc::new(subscriptions)),
        repository,
        sessions.clone(),
        settings.job.clone(),
        clock.clone(),
    );

    tracing::info!("\n📊 Configuration:");
    tracing::info!(
        "  Job: {} {} {} every {:?}",
        settings.job.strategy_id,
        settings.job.symbol,
        settings.job.timeframe,
        settings.job.period()
    );
    tracing::info!("  Stop loss: {}%", settings.risk.stop_loss_pct * 100.0);
    tracing::info!("  Max daily loss: {}%", settings.guards.daily_loss_pct * 100.0);
    tracing::info!("  Max trades/day: {}", settings.guards.max_trades_per_day);

    let orphaned = orchestrator.reconcile().await?;
    if orphaned > 0 {
        tracing::warn!("Marked {} orphaned session(s) as ERROR", orphaned);
    }

    let session = orchestrator.start_live(user, account).await?;
    tracing::info!("✅ Session {} running for {}", session.id(), user);
    tracing::info!("\nPress Ctrl+C to stop...\n");

    let mut report = interval_at(Instant::now() + status_every, status_every);
    report.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
                break;
            }
            _ = report.tick() => {
                tracing::info!("{}", sessions.status_text());
                tracing::info!("{}", sessions.health_text());

                let pnl = portfolio.pnl(clock.now());
                tracing::info!(
                    "💰 PnL {:.2} (realized={:.2} unrealized={:.2})",
                    pnl.total(),
                    pnl.realized,
                    pnl.unrealized
                );
                if let Err(e) = orchestrator.record_pnl(user, pnl).await {
                    tracing::warn!("Failed to record PnL: {}", e);
                }
            }
        }
    }

    match orchestrator.stop_live(user).await {
        Ok(Some(session)) => tracing::info!("Session {} stopped", session.id()),
        Ok(None) => tracing::info!("No active session to stop"),
        Err(e) => tracing::error!("Failed to stop session: {}", e),
    }
    sessions.shutdown();

    tracing::info!("👋 tradectl stopped");
    Ok(())
}
