//! Mealguard operator CLI
//!
//! Command-line access to the Mealguard ledger for canteen staff and operators:
//! schema install, accounts, balance changes, meal bookings, counter
//! verification and the expiry sweep. Users are addressed by CIN.

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use colored::Colorize;
use mealguard::{
    Engine, EngineConfig, EngineError, LedgerOutcome, MealFilter, MealSchedule, MealSlot,
    MealStatus, MealTime, Page, PgStore, Role, User,
};
use serde::Serialize;
use std::process;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "mealguard")]
#[command(about = "Prepaid meal ledger operations")]
#[command(version = "0.1.0")]
struct Cli {
    /// Database connection URL (overrides configuration)
    #[arg(long)]
    database_url: Option<String>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long)]
    quiet: bool,

    /// Dump Prometheus metrics to stderr when the command finishes
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create tables and constraints if they do not exist
    InitSchema,

    /// Register a new account
    Register {
        cin: String,
        /// admin, paymentStaff, verificationStaff, student, teacher or normalUser
        #[arg(long, default_value = "student")]
        role: Role,
    },

    /// Show an account and its balance
    Balance { cin: String },

    /// Deactivate an account
    Deactivate { cin: String },

    /// Reactivate an account
    Activate { cin: String },

    /// Credit an account
    Deposit {
        cin: String,
        amount: i64,
        /// CIN of the staff member taking the payment
        #[arg(long = "by")]
        processed_by: String,
    },

    /// Apply a signed correction to an account
    Adjust {
        cin: String,
        #[arg(allow_hyphen_values = true)]
        delta: i64,
        #[arg(long = "by")]
        processed_by: String,
    },

    /// Correct an account to an exact balance
    SetBalance {
        cin: String,
        #[arg(allow_hyphen_values = true)]
        target: i64,
        #[arg(long = "by")]
        processed_by: String,
    },

    /// Book one or more meals (all or nothing)
    Schedule {
        cin: String,
        /// lunch or dinner
        meal_time: MealTime,
        /// Dates as YYYY-MM-DD
        #[arg(required = true)]
        dates: Vec<NaiveDate>,
    },

    /// Cancel one or more booked meals (all or nothing)
    Cancel {
        cin: String,
        meal_time: MealTime,
        #[arg(required = true)]
        dates: Vec<NaiveDate>,
    },

    /// Serve a booked meal at the counter
    Verify {
        cin: String,
        meal_time: MealTime,
        /// Defaults to today at the canteen
        #[arg(long)]
        date: Option<NaiveDate>,
        /// CIN of the verifying staff member
        #[arg(long = "by")]
        verified_by: String,
    },

    /// Redeem the account's meal served around now
    Redeem { cin: String },

    /// List an account's meals
    Meals {
        cin: String,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long)]
        meal_time: Option<MealTime>,
        #[arg(long)]
        status: Option<MealStatus>,
    },

    /// Show ledger entries, newest first
    History {
        cin: String,
        #[arg(long, default_value = "1")]
        page: u32,
        #[arg(long, default_value = "20")]
        per_page: u32,
    },

    /// Expire overdue bookings
    Sweep {
        /// Keep sweeping on the configured interval
        #[arg(long)]
        watch: bool,
        /// Stop watching after this many seconds
        #[arg(long, requires = "watch")]
        duration: Option<u64>,
    },

    /// Check that balances match their ledger
    Audit {
        /// CINs to audit
        #[arg(required = true)]
        cins: Vec<String>,
    },
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let dump_metrics = cli.metrics;
    let result = run(cli);
    if dump_metrics {
        eprintln!("{}", mealguard::metrics::METRICS.render());
    }

    match result {
        Ok(()) => process::exit(0),
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            process::exit(exit_code(&e));
        }
    }
}

/// Business rejections exit 2, everything else 1.
fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<EngineError>() {
        Some(EngineError::Internal(_)) | None => 1,
        Some(_) => 2,
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = EngineConfig::load().context("loading configuration")?;
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }

    if let Commands::InitSchema = cli.command {
        let store = PgStore::connect(&config.database).context("connecting to database")?;
        store.install_schema().context("installing schema")?;
        if !cli.quiet {
            println!("{} schema installed", "✓".green());
        }
        return Ok(());
    }

    let engine = Arc::new(Engine::connect(&config)?);
    let out = Output { json: cli.json };

    match cli.command {
        Commands::InitSchema => Ok(()),
        Commands::Register { cin, role } => {
            let user = engine.register_user(&cin, role)?;
            out.user(&user)
        }
        Commands::Balance { cin } => out.user(&engine.find_user_by_cin(&cin)?),
        Commands::Deactivate { cin } => {
            let user = engine.find_user_by_cin(&cin)?;
            out.user(&engine.deactivate_user(user.id)?)
        }
        Commands::Activate { cin } => {
            let user = engine.find_user_by_cin(&cin)?;
            out.user(&engine.activate_user(user.id)?)
        }
        Commands::Deposit {
            cin,
            amount,
            processed_by,
        } => {
            let (user, actor) = (engine.find_user_by_cin(&cin)?, engine.find_user_by_cin(&processed_by)?);
            out.outcome(&engine.deposit(user.id, amount, actor.id)?)
        }
        Commands::Adjust {
            cin,
            delta,
            processed_by,
        } => {
            let (user, actor) = (engine.find_user_by_cin(&cin)?, engine.find_user_by_cin(&processed_by)?);
            out.outcome(&engine.adjust_balance(user.id, delta, actor.id)?)
        }
        Commands::SetBalance {
            cin,
            target,
            processed_by,
        } => {
            let (user, actor) = (engine.find_user_by_cin(&cin)?, engine.find_user_by_cin(&processed_by)?);
            out.outcome(&engine.set_balance(user.id, target, actor.id)?)
        }
        Commands::Schedule {
            cin,
            meal_time,
            dates,
        } => {
            let user = engine.find_user_by_cin(&cin)?;
            let booked = engine.schedule_many_meals(user.id, &slots(meal_time, &dates))?;
            out.meals(&booked)
        }
        Commands::Cancel {
            cin,
            meal_time,
            dates,
        } => {
            let user = engine.find_user_by_cin(&cin)?;
            let cancelled = engine.cancel_many_meals(user.id, &slots(meal_time, &dates))?;
            out.meals(&cancelled)
        }
        Commands::Verify {
            cin,
            meal_time,
            date,
            verified_by,
        } => {
            let verifier = engine.find_user_by_cin(&verified_by)?;
            let date = date.unwrap_or_else(|| engine.lifecycle().local_date(engine.now()));
            let verification = engine.verify_meal(&cin, meal_time, date, verifier.id)?;
            if out.json {
                return out.print_json(&verification);
            }
            println!(
                "{} {} for {} ({}), balance {}",
                "served".green().bold(),
                verification.schedule.slot(),
                verification.student.cin,
                verification.student.role,
                money(verification.student.balance)
            );
            Ok(())
        }
        Commands::Redeem { cin } => {
            let user = engine.find_user_by_cin(&cin)?;
            out.meals(&[engine.redeem_meal(user.id)?])
        }
        Commands::Meals {
            cin,
            from,
            to,
            meal_time,
            status,
        } => {
            let user = engine.find_user_by_cin(&cin)?;
            let filter = MealFilter {
                from,
                to,
                meal_time,
                status,
            };
            out.meals(&engine.get_user_meals(user.id, &filter)?)
        }
        Commands::History {
            cin,
            page,
            per_page,
        } => {
            let user = engine.find_user_by_cin(&cin)?;
            let history = engine.get_user_transaction_history(user.id, Page { page, per_page })?;
            if out.json {
                return out.print_json(&history);
            }
            println!(
                "\n{} page {} ({} entries total)\n",
                user.cin.bold(),
                history.page,
                history.total
            );
            for entry in &history.entries {
                println!(
                    "  {}  {:<20} {:>12}  by {}",
                    entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.transaction_type.to_string(),
                    signed(entry.amount),
                    entry.processed_by
                );
            }
            Ok(())
        }
        Commands::Sweep { watch, duration } => sweep(&engine, &out, watch, duration),
        Commands::Audit { cins } => {
            let mut drifted = 0;
            for cin in &cins {
                let user = engine.find_user_by_cin(cin)?;
                let audit = engine.audit_user(user.id)?;
                if out.json {
                    out.print_json(&audit)?;
                } else if audit.consistent {
                    println!("{} {} balance {}", "✓".green(), cin, money(audit.balance));
                } else {
                    println!(
                        "{} {} balance {} but ledger sums to {}",
                        "✗".red(),
                        cin,
                        money(audit.balance),
                        money(audit.ledger_sum)
                    );
                }
                if !audit.consistent {
                    drifted += 1;
                }
            }
            if drifted > 0 {
                bail!("{drifted} of {} account(s) drifted from their ledger", cins.len());
            }
            Ok(())
        }
    }
}

fn sweep(engine: &Arc<Engine>, out: &Output, watch: bool, duration: Option<u64>) -> anyhow::Result<()> {
    if !watch {
        let report = engine.expire_overdue()?;
        if out.json {
            return out.print_json(&report);
        }
        println!("expired {}, skipped {}", report.expired, report.skipped);
        return Ok(());
    }

    if !engine.sweep_config().enabled {
        log::warn!("sweep.enabled is false; watching anyway because it was asked for");
    }
    let sweeper = engine.spawn_sweeper();
    match duration {
        Some(secs) => {
            std::thread::sleep(Duration::from_secs(secs));
            sweeper.stop();
        }
        // Runs until the process is killed.
        None => loop {
            std::thread::park();
        },
    }
    Ok(())
}

fn slots(meal_time: MealTime, dates: &[NaiveDate]) -> Vec<MealSlot> {
    dates.iter().map(|date| MealSlot::new(*date, meal_time)).collect()
}

/// Millimes as dinars.
fn money(millimes: i64) -> String {
    let sign = if millimes < 0 { "-" } else { "" };
    let abs = millimes.unsigned_abs();
    format!("{sign}{}.{:03} TND", abs / 1000, abs % 1000)
}

fn signed(millimes: i64) -> String {
    let text = money(millimes);
    if millimes < 0 {
        text.red().to_string()
    } else if millimes > 0 {
        format!("+{text}").green().to_string()
    } else {
        text
    }
}

struct Output {
    json: bool,
}

impl Output {
    fn print_json<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    fn user(&self, user: &User) -> anyhow::Result<()> {
        if self.json {
            return self.print_json(user);
        }
        let state = if user.active {
            "active".green()
        } else {
            "inactive".red()
        };
        println!(
            "{} [{}] {} balance {}  ({})",
            user.cin.bold(),
            user.role,
            state,
            money(user.balance),
            user.id
        );
        Ok(())
    }

    fn outcome(&self, outcome: &LedgerOutcome) -> anyhow::Result<()> {
        if self.json {
            return self.print_json(outcome);
        }
        println!(
            "{} {}: {} -> {}",
            outcome.entry.transaction_type,
            signed(outcome.entry.amount),
            money(outcome.previous_balance),
            money(outcome.new_balance)
        );
        Ok(())
    }

    fn meals(&self, meals: &[MealSchedule]) -> anyhow::Result<()> {
        if self.json {
            return self.print_json(&meals);
        }
        if meals.is_empty() {
            println!("no meals");
        }
        for meal in meals {
            let status = match meal.status {
                MealStatus::Scheduled => meal.status.to_string().cyan(),
                MealStatus::Redeemed => meal.status.to_string().green(),
                MealStatus::Refunded => meal.status.to_string().yellow(),
                MealStatus::Cancelled | MealStatus::Expired => meal.status.to_string().red(),
            };
            println!(
                "  {}  {:<10} paid {}  ({})",
                meal.slot(),
                status,
                money(meal.amount_paid),
                meal.id
            );
        }
        Ok(())
    }
}
