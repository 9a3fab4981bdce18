//! Trade copy engine CLI.
//!
//! Manages strategies, offers and subscriptions, records master trades and
//! fans them out to subscribed investor accounts.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{info, Level};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use copytrader::db::Database;
use copytrader::models::{
    Actor, FeeInterval, FeeSchedule, NewOffer, NewStrategy, NewSubscription, NewTrade, OfferStatus,
    Pagination, StrategyStatus, SubscriptionSettings, SubscriptionStatus, TradeClose,
    TradeDirection,
};
use copytrader::repository::{CopiedTradeFilter, OfferStore, Stores, SubscriptionStore};
use copytrader::trading::{CancelSignal, CopyEngine, CopyOutcome, EngineConfig, SubscriptionLifecycle};

/// Trade copy engine CLI.
#[derive(Parser)]
#[command(name = "copytrader")]
#[command(about = "Copy master trades into subscribed investor accounts", long_about = None)]
struct Cli {
    /// Database URL
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:./copytrader.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Who is acting: "system" or "user:<id>"
    #[arg(long, default_value = "system", global = true)]
    actor: Actor,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage strategies
    #[command(subcommand)]
    Strategy(StrategyCommand),

    /// Manage offers
    #[command(subcommand)]
    Offer(OfferCommand),

    /// Manage subscriptions
    #[command(subcommand)]
    Subscription(SubscriptionCommand),

    /// Record, close and copy master trades
    #[command(subcommand)]
    Trade(TradeCommand),
}

#[derive(Subcommand)]
enum StrategyCommand {
    /// Create a strategy (starts in `preparing`)
    Create {
        #[arg(long)]
        master_user: i64,
        #[arg(long)]
        master_account: i64,
        #[arg(long)]
        nickname: String,
    },

    /// Change a strategy's status; archive/delete cascades to subscriptions
    Status {
        id: i64,
        status: StrategyStatus,
        #[arg(long)]
        reason: Option<String>,
    },
}

#[derive(Subcommand)]
enum OfferCommand {
    /// Create an offer on a strategy
    Create {
        #[arg(long)]
        strategy: i64,
        #[arg(long)]
        name: String,

        /// Performance fee in percent of realised profit
        #[arg(long, default_value = "0")]
        performance_fee: Decimal,
        #[arg(long, default_value = "monthly")]
        performance_interval: FeeInterval,

        /// Management fee in percent
        #[arg(long, default_value = "0")]
        management_fee: Decimal,
        #[arg(long, default_value = "monthly")]
        management_interval: FeeInterval,

        #[arg(long, default_value = "0")]
        registration_fee: Decimal,
    },

    /// Change an offer's status; archive/delete cascades to subscriptions
    Status {
        id: i64,
        status: OfferStatus,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Show an offer's fee schedule and current accrual windows
    Fees { id: i64 },
}

#[derive(Subcommand)]
enum SubscriptionCommand {
    /// Subscribe an investor account to an offer (starts in `preparing`)
    Create {
        #[arg(long)]
        investor_user: i64,
        #[arg(long)]
        investor_account: i64,
        #[arg(long)]
        offer: i64,
        #[command(flatten)]
        settings: SettingsArgs,
    },

    /// Change a subscription's status
    Status {
        id: i64,
        status: SubscriptionStatus,
        #[arg(long, default_value = "")]
        reason: String,
    },

    /// Update settings; unspecified options keep their current value
    Settings {
        id: i64,
        #[command(flatten)]
        settings: SettingsArgs,
    },

    /// Show status history, oldest first
    History { id: i64 },
}

#[derive(Subcommand)]
enum TradeCommand {
    /// Record a master trade
    Create {
        #[arg(long)]
        strategy: i64,
        #[arg(long)]
        master_account: i64,
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        direction: TradeDirection,
        #[arg(long)]
        volume: Decimal,
        #[arg(long)]
        price: Decimal,
        #[arg(long)]
        stop_loss: Option<Decimal>,
        #[arg(long)]
        take_profit: Option<Decimal>,
    },

    /// Close a master trade and its open copies
    Close {
        id: i64,
        #[arg(long)]
        price: Decimal,
        #[arg(long)]
        profit: Decimal,
        #[arg(long, default_value = "0")]
        commission: Decimal,
        #[arg(long, default_value = "0")]
        swap: Decimal,
    },

    /// Copy a master trade into its subscriptions
    Copy {
        id: i64,

        /// Only these subscriptions (comma separated)
        #[arg(long, value_delimiter = ',')]
        subscriptions: Vec<i64>,

        /// Stop starting new subscriptions after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// List a strategy's master trades, newest first
    List {
        #[arg(long)]
        strategy: i64,
        #[arg(long, default_value = "1")]
        page: u32,
        #[arg(long, default_value = "0")]
        limit: u32,
    },

    /// List copied trades, newest first
    Copies {
        #[arg(long)]
        subscription: Option<i64>,
        #[arg(long)]
        trade: Option<i64>,
        #[arg(long, default_value = "1")]
        page: u32,
        #[arg(long, default_value = "0")]
        limit: u32,
    },
}

#[derive(Args, Debug, Default)]
struct SettingsArgs {
    /// Multiplier applied to the master volume
    #[arg(long)]
    ratio: Option<Decimal>,
    /// Largest copied position, in lots
    #[arg(long)]
    max_position: Option<Decimal>,
    #[arg(long)]
    invert: Option<bool>,
    #[arg(long)]
    copy_sl: Option<bool>,
    #[arg(long)]
    copy_tp: Option<bool>,

    /// Whitelisted symbols (comma separated)
    #[arg(long, value_delimiter = ',')]
    allow: Option<Vec<String>>,
    /// Blacklisted symbols (comma separated)
    #[arg(long, value_delimiter = ',')]
    block: Option<Vec<String>>,
    #[arg(long)]
    min_lot: Option<Decimal>,
    #[arg(long)]
    max_lot: Option<Decimal>,

    /// Drawdown limit in percent
    #[arg(long)]
    max_drawdown: Option<Decimal>,
    #[arg(long)]
    max_daily_loss: Option<Decimal>,
    #[arg(long)]
    stop_on_drawdown: Option<bool>,
}

impl SettingsArgs {
    fn apply(self, mut settings: SubscriptionSettings) -> SubscriptionSettings {
        if let Some(v) = self.ratio {
            settings.copy.copy_ratio = v;
        }
        if let Some(v) = self.max_position {
            settings.copy.max_position_size = Some(v);
        }
        if let Some(v) = self.invert {
            settings.copy.invert_signals = v;
        }
        if let Some(v) = self.copy_sl {
            settings.copy.copy_stop_loss = v;
        }
        if let Some(v) = self.copy_tp {
            settings.copy.copy_take_profit = v;
        }
        if let Some(v) = self.allow {
            settings.filter.allowed_symbols = v.into_iter().collect();
        }
        if let Some(v) = self.block {
            settings.filter.blocked_symbols = v.into_iter().collect();
        }
        if let Some(v) = self.min_lot {
            settings.filter.min_lot_size = Some(v);
        }
        if let Some(v) = self.max_lot {
            settings.filter.max_lot_size = Some(v);
        }
        if let Some(v) = self.max_drawdown {
            settings.risk.max_drawdown_pct = Some(v);
        }
        if let Some(v) = self.max_daily_loss {
            settings.risk.max_daily_loss = Some(v);
        }
        if let Some(v) = self.stop_on_drawdown {
            settings.risk.stop_on_drawdown = v;
        }
        settings
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::from_level(log_level).into()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = EngineConfig::from_env().context("Invalid engine configuration")?;

    // Initialize database
    let db = Arc::new(
        Database::new(&cli.database)
            .await
            .with_context(|| format!("Failed to open database {}", cli.database))?,
    );
    let stores = Stores::shared(db.clone());
    let engine = CopyEngine::new(stores.clone(), config.clone());
    let lifecycle = SubscriptionLifecycle::new(stores, config);
    let actor = cli.actor;

    match cli.command {
        Commands::Strategy(cmd) => match cmd {
            StrategyCommand::Create {
                master_user,
                master_account,
                nickname,
            } => {
                let strategy = lifecycle
                    .create_strategy(
                        NewStrategy {
                            master_user_id: master_user,
                            master_account_id: master_account,
                            nickname,
                        },
                        actor,
                    )
                    .await?;
                println!("Created strategy {} ({}) [{}]", strategy.id, strategy.nickname, strategy.status);
            }

            StrategyCommand::Status { id, status, reason } => {
                let cascade = lifecycle
                    .change_strategy_status(id, status, reason.as_deref(), actor)
                    .await?;
                println!("Strategy {} is now {}", id, cascade.updated.status);
                if cascade.archived_subscriptions > 0 {
                    println!("Archived {} subscription(s)", cascade.archived_subscriptions);
                }
            }
        },

        Commands::Offer(cmd) => match cmd {
            OfferCommand::Create {
                strategy,
                name,
                performance_fee,
                performance_interval,
                management_fee,
                management_interval,
                registration_fee,
            } => {
                let offer = lifecycle
                    .create_offer(
                        NewOffer {
                            strategy_id: strategy,
                            name,
                            fees: FeeSchedule {
                                performance_fee_pct: performance_fee,
                                performance_fee_interval: performance_interval,
                                management_fee_pct: management_fee,
                                management_fee_interval: management_interval,
                                registration_fee,
                            },
                        },
                        actor,
                    )
                    .await?;
                println!("Created offer {} ({}) on strategy {}", offer.id, offer.name, offer.strategy_id);
            }

            OfferCommand::Status { id, status, reason } => {
                let cascade = lifecycle
                    .change_offer_status(id, status, reason.as_deref(), actor)
                    .await?;
                println!("Offer {} is now {}", id, cascade.updated.status);
                if cascade.archived_subscriptions > 0 {
                    println!("Archived {} subscription(s)", cascade.archived_subscriptions);
                }
            }

            OfferCommand::Fees { id } => {
                let offer = db
                    .get_offer(id)
                    .await?
                    .with_context(|| format!("Offer {id} not found"))?;
                let fees = offer.fee_schedule();
                let now = Utc::now();

                println!("\n=== Offer {} ({}) [{}] ===", offer.id, offer.name, offer.status);
                println!("\n{:<14} {:>8} {:<10} {:<22}", "FEE", "RATE", "INTERVAL", "CURRENT WINDOW");
                println!("{}", "-".repeat(70));
                for (name, pct, interval) in [
                    ("performance", fees.performance_fee_pct, fees.performance_fee_interval),
                    ("management", fees.management_fee_pct, fees.management_fee_interval),
                ] {
                    let (from, to) = interval.period_containing(now);
                    println!(
                        "{:<14} {:>7}% {:<10} {} .. {}",
                        name,
                        pct,
                        interval,
                        from.format("%Y-%m-%d"),
                        to.format("%Y-%m-%d")
                    );
                }
                println!("{:<14} {:>8}", "registration", fees.registration_fee);
            }
        },

        Commands::Subscription(cmd) => match cmd {
            SubscriptionCommand::Create {
                investor_user,
                investor_account,
                offer,
                settings,
            } => {
                let sub = lifecycle
                    .create_subscription(
                        NewSubscription {
                            investor_user_id: investor_user,
                            investor_account_id: investor_account,
                            offer_id: offer,
                            settings: settings.apply(SubscriptionSettings::default()),
                        },
                        actor,
                    )
                    .await?;
                println!(
                    "Created subscription {} on offer {} (strategy {}) [{}]",
                    sub.id, sub.offer_id, sub.strategy_id, sub.status
                );
            }

            SubscriptionCommand::Status { id, status, reason } => {
                let sub = lifecycle.change_status(id, status, &reason, actor).await?;
                println!("Subscription {} is now {}", sub.id, sub.status);
            }

            SubscriptionCommand::Settings { id, settings } => {
                let current = db
                    .get_subscription(id)
                    .await?
                    .with_context(|| format!("Subscription {id} not found"))?;
                let updated = lifecycle
                    .update_settings(id, settings.apply(current.settings), actor)
                    .await?;
                println!("{}", serde_json::to_string_pretty(&updated.settings)?);
            }

            SubscriptionCommand::History { id } => {
                let history = lifecycle.status_history(id).await?;
                if history.is_empty() {
                    println!("No status changes recorded for subscription {id}");
                    return Ok(());
                }

                println!("\n{:<20} {:<10} {:<10} {:<12} {:<20}", "WHEN", "FROM", "TO", "BY", "REASON");
                println!("{}", "-".repeat(76));
                for entry in history {
                    println!(
                        "{:<20} {:<10} {:<10} {:<12} {:<20}",
                        entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                        entry.old_status,
                        entry.new_status,
                        entry.actor,
                        truncate(&entry.reason, 20)
                    );
                }
            }
        },

        Commands::Trade(cmd) => match cmd {
            TradeCommand::Create {
                strategy,
                master_account,
                symbol,
                direction,
                volume,
                price,
                stop_loss,
                take_profit,
            } => {
                let trade = engine
                    .create_trade(NewTrade {
                        strategy_id: strategy,
                        master_account_id: master_account,
                        symbol,
                        direction,
                        volume,
                        open_price: price,
                        stop_loss,
                        take_profit,
                        opened_at: None,
                    })
                    .await?;
                println!(
                    "Recorded trade {}: {} {} {} @ {}",
                    trade.id, trade.direction, trade.volume, trade.symbol, trade.open_price
                );
            }

            TradeCommand::Close {
                id,
                price,
                profit,
                commission,
                swap,
            } => {
                let report = engine
                    .close_trade(
                        id,
                        TradeClose {
                            close_price: price,
                            profit,
                            commission,
                            swap,
                            closed_at: None,
                        },
                    )
                    .await?;

                println!("Closed trade {} with profit {}", report.trade.id, profit);
                println!("\n{:<10} {:<14} {:>10} {:>12} {:>12}", "COPY", "SUBSCRIPTION", "VOLUME", "PROFIT", "FEE");
                println!("{}", "-".repeat(62));
                for copy in &report.closed_copies {
                    let fee = report
                        .commissions
                        .iter()
                        .find(|c| c.subscription_id == copy.subscription_id)
                        .map(|c| c.amount)
                        .unwrap_or(Decimal::ZERO);
                    println!(
                        "{:<10} {:<14} {:>10} {:>12} {:>12}",
                        copy.id,
                        copy.subscription_id,
                        copy.volume,
                        copy.profit.unwrap_or(Decimal::ZERO),
                        fee
                    );
                }
            }

            TradeCommand::Copy {
                id,
                subscriptions,
                timeout,
            } => {
                let (shutdown_tx, shutdown_rx) = watch::channel(false);
                tokio::spawn(async move {
                    tokio::signal::ctrl_c().await.ok();
                    info!("Shutdown signal received");
                    let _ = shutdown_tx.send(true);
                });

                let mut cancel = CancelSignal::from_watch(shutdown_rx);
                if let Some(secs) = timeout {
                    cancel = cancel.with_timeout(Duration::from_secs(secs));
                }

                let explicit = (!subscriptions.is_empty()).then_some(subscriptions);
                let report = engine.copy_trade(id, explicit, &cancel).await?;

                println!("\nCopy run {} for trade {}", report.run_id, report.trade_id);
                println!("\n{:<14} {:<16} {:<30}", "SUBSCRIPTION", "OUTCOME", "DETAIL");
                println!("{}", "-".repeat(62));
                for entry in &report.outcomes {
                    let (outcome, detail) = match &entry.outcome {
                        CopyOutcome::Copied { copied_trade_id } => ("copied", format!("copy {copied_trade_id}")),
                        CopyOutcome::AlreadyCopied { copied_trade_id } => {
                            ("already copied", format!("copy {copied_trade_id}"))
                        }
                        CopyOutcome::Rejected { reason } => ("rejected", reason.to_string()),
                        CopyOutcome::Ineligible => ("ineligible", String::new()),
                        CopyOutcome::Failed { error } => ("failed", truncate(error, 30)),
                        CopyOutcome::Cancelled => ("cancelled", String::new()),
                    };
                    println!("{:<14} {:<16} {:<30}", entry.subscription_id, outcome, detail);
                }
                println!("\nCreated {} copies", report.created.len());
            }

            TradeCommand::List {
                strategy,
                page,
                limit,
            } => {
                let result = engine
                    .list_trades(strategy, Pagination::new(page, limit))
                    .await?;

                if result.data.is_empty() {
                    println!("No trades found for strategy {strategy}.");
                    return Ok(());
                }

                println!(
                    "\n{:<8} {:<10} {:<6} {:>8} {:>10} {:>10} {:<8} {:>10}",
                    "ID", "SYMBOL", "SIDE", "VOLUME", "OPEN", "CLOSE", "STATUS", "PROFIT"
                );
                println!("{}", "-".repeat(78));
                for trade in &result.data {
                    println!(
                        "{:<8} {:<10} {:<6} {:>8} {:>10} {:>10} {:<8} {:>10}",
                        trade.id,
                        trade.symbol,
                        trade.direction,
                        trade.volume,
                        trade.open_price,
                        trade.close_price.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
                        trade.status,
                        trade.profit.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string())
                    );
                }
                println!(
                    "\nPage {}/{} ({} total)",
                    result.page,
                    result.total_pages(),
                    result.total
                );
            }

            TradeCommand::Copies {
                subscription,
                trade,
                page,
                limit,
            } => {
                let filter = CopiedTradeFilter {
                    subscription_id: subscription,
                    trade_id: trade,
                };
                let result = engine
                    .list_copied_trades(filter, Pagination::new(page, limit))
                    .await?;

                if result.data.is_empty() {
                    println!("No copied trades found.");
                    return Ok(());
                }

                println!(
                    "\n{:<8} {:<8} {:<8} {:<10} {:<6} {:>8} {:>8} {:<8} {:>10}",
                    "ID", "TRADE", "SUB", "SYMBOL", "SIDE", "VOLUME", "RATIO", "STATUS", "PROFIT"
                );
                println!("{}", "-".repeat(84));
                for copy in &result.data {
                    println!(
                        "{:<8} {:<8} {:<8} {:<10} {:<6} {:>8} {:>8} {:<8} {:>10}",
                        copy.id,
                        copy.trade_id,
                        copy.subscription_id,
                        copy.symbol,
                        copy.direction,
                        copy.volume,
                        copy.copy_ratio.round_dp(4),
                        copy.status,
                        copy.profit.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string())
                    );
                }
                println!(
                    "\nPage {}/{} ({} total)",
                    result.page,
                    result.total_pages(),
                    result.total
                );
            }
        },
    }

    Ok(())
}

/// Truncate a string with ellipsis.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
