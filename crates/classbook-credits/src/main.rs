use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use classbook_credits::config::CreditsConfig;
use classbook_credits::domain::{
    AccountKey, AdminPolicyHandle, Category, Clock, CreditLedgerService, CreditOperations,
    FixedClock, NewPackageRecord, PackageId, PackageStatus, SystemClock, UserId,
};
use classbook_credits::logging::{init_logging, DEFAULT_FILTER};
use classbook_credits::storage::{connect_and_migrate, create_pool, SqlCreditAccountRepository};
use classbook_credits::sweep::CreditSweeper;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "classbook-credits")]
#[command(about = "Classbook credit ledger - class credits and package renewals")]
struct Args {
    #[arg(short, long, help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Generate sample configuration file")]
    gen_config: bool,

    #[arg(long, help = "Dry run mode (validate config and database without acting)")]
    dry_run: bool,

    #[arg(long, help = "Evaluate accounts as of this date (YYYY-MM-DD) instead of today")]
    today: Option<NaiveDate>,

    #[command(flatten)]
    verbosity: Verbosity<InfoLevel>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile lapsed accounts periodically until interrupted
    Sweep {
        /// Run a single batch and exit
        #[arg(long)]
        once: bool,
    },

    /// Reconcile one account and print the resulting state
    Reconcile { user: String, category: Category },

    /// Show the bookable credits of an account
    Balance { user: String, category: Category },

    /// Consume one credit for a confirmed booking
    Deduct { user: String, category: Category },

    /// Give back one credit for a cancelled booking
    Restore { user: String, category: Category },

    /// Show a user's package history and current active packages
    History { user: String },

    /// Show the most recent ledger events of an account
    Events {
        user: String,
        category: Category,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Assign a new package, replacing the active one in the same category
    CreatePackage {
        user: String,
        category: Category,
        #[arg(long)]
        classes: i64,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        #[arg(long)]
        auto_renew: bool,
        #[arg(long, default_value_t = 0)]
        renewal_months: i64,
    },

    /// Close an active package as expired or cancelled
    SetStatus { id: PackageId, status: PackageStatus },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.verbosity, DEFAULT_FILTER)?;

    if args.gen_config {
        let config = CreditsConfig::default();
        let toml = toml::to_string_pretty(&config)?;
        println!("{}", toml);
        return Ok(());
    }

    let config = CreditsConfig::load(args.config.clone())?;

    if args.dry_run {
        create_pool(&config.database).await?;
        info!("Configuration validated successfully (dry-run mode)");
        return Ok(());
    }

    let Some(command) = args.command else {
        return Err(anyhow!("no command given, see --help"));
    };

    let clock: Arc<dyn Clock> = match args.today {
        Some(today) => Arc::new(FixedClock::new(today)),
        None => Arc::new(
            SystemClock::with_offset_minutes(config.ledger.utc_offset_minutes)
                .ok_or_else(|| anyhow!("invalid ledger.utc_offset_minutes"))?,
        ),
    };

    let pool = connect_and_migrate(&config.database).await?;
    let repository = Arc::new(SqlCreditAccountRepository::new(pool));
    let ledger = Arc::new(CreditLedgerService::new(
        repository,
        clock,
        AdminPolicyHandle::new(config.ledger.admin_policy),
    ));

    info!(
        "Credit ledger ready (policy={}, today={})",
        config.ledger.admin_policy,
        ledger.today()
    );

    match command {
        Command::Sweep { once } => {
            let sweeper = CreditSweeper::new(ledger.clone(), &config.sweep);
            if once {
                print_json(&sweeper.sweep_once().await?)?;
            } else {
                if !config.sweep.enabled {
                    return Err(anyhow!(
                        "sweep.enabled is false, use --once for a single batch"
                    ));
                }
                sweeper.run(shutdown_signal()).await;
            }
        }
        Command::Reconcile { user, category } => {
            let key = AccountKey::new(UserId::new(user), category);
            let reconciliation = ledger.reconcile(&key).await?;
            let active = ledger.active_package(&key).await?;
            print_json(&json!({
                "account": key.to_string(),
                "state": reconciliation.state,
                "counter_written": reconciliation.changes.as_ref().map(|c| c.counter),
                "active": active,
            }))?;
        }
        Command::Balance { user, category } => {
            let key = AccountKey::new(UserId::new(user), category);
            let account = ledger.get_account(&key).await?;
            print_json(&json!({
                "account": key.to_string(),
                "available": account.available_credits(),
                "counter": account.raw_counter(),
                "unlimited": account.is_unlimited(),
            }))?;
        }
        Command::Deduct { user, category } => {
            let key = AccountKey::new(UserId::new(user), category);
            let counter = ledger.deduct(&key).await?;
            print_json(&json!({ "account": key.to_string(), "counter": counter }))?;
        }
        Command::Restore { user, category } => {
            let key = AccountKey::new(UserId::new(user), category);
            let counter = ledger.restore(&key).await?;
            print_json(&json!({ "account": key.to_string(), "counter": counter }))?;
        }
        Command::History { user } => {
            let user_id = UserId::new(user);
            let history = ledger.package_history(&user_id).await?;
            let active = ledger.active_packages(&user_id).await?;
            print_json(&json!({ "user": user_id, "active": active, "history": history }))?;
        }
        Command::Events {
            user,
            category,
            limit,
        } => {
            let key = AccountKey::new(UserId::new(user), category);
            print_json(&ledger.ledger_events(&key, limit).await?)?;
        }
        Command::CreatePackage {
            user,
            category,
            classes,
            start,
            end,
            auto_renew,
            renewal_months,
        } => {
            let record = ledger
                .create_package_record(NewPackageRecord {
                    user_id: UserId::new(user),
                    category,
                    classes_included: classes,
                    start_date: start,
                    end_date: end,
                    auto_renew,
                    renewal_months,
                })
                .await?;
            print_json(&record)?;
        }
        Command::SetStatus { id, status } => {
            let record = ledger.set_status(&id, status).await?;
            print_json(&record)?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
