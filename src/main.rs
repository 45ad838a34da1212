//! # CouponClaw: unattended daily coupon claiming
//!
//! Usage:
//!   couponclaw run                                   # Start the daily scheduler
//!   couponclaw bind --user 42 --token <t>            # Register or rebind a token
//!   couponclaw sweep --as 42                         # Owner: claim for everyone now
//!   couponclaw status                                # Store summary

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand, ValueEnum};
use couponclaw_channels::Dispatcher;
use couponclaw_core::traits::AccountStore;
use couponclaw_core::{Account, ChannelKind, ChannelPreference, CouponClawConfig, NewUser, User};
use couponclaw_db::SqliteStore;
use couponclaw_providers::McpProvider;
use couponclaw_scheduler::{AdminSweep, ClaimExecutor, ClaimSweep, ReminderRunner, Scheduler, SweepGuard};
use couponclaw_security::CredentialCipher;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "couponclaw", version, about = "🎟️ CouponClaw: daily coupon claiming for many accounts")]
struct Cli {
    /// Config file (default: ~/.couponclaw/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daily scheduler until interrupted
    Run,
    /// Claim for every eligible account now (owner only)
    Sweep {
        /// Id of the requesting user
        #[arg(long = "as")]
        as_user: String,
    },
    /// Register a token for a user, or replace the token of an existing label
    Bind {
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "default")]
        label: String,
        #[arg(long)]
        token: String,
        /// Display name for a new user
        #[arg(long)]
        name: Option<String>,
        /// Notification channel, `kind` or `kind:destination`; repeatable
        #[arg(long = "channel")]
        channels: Vec<String>,
    },
    /// List a user's accounts
    Accounts {
        #[arg(long)]
        user: String,
    },
    /// Turn autoclaim on or off for one account
    Autoclaim {
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "default")]
        label: String,
        state: Toggle,
    },
    /// Make another account the user's current one
    Switch {
        #[arg(long)]
        user: String,
        #[arg(long)]
        label: String,
    },
    /// Delete one account
    Remove {
        #[arg(long)]
        user: String,
        #[arg(long)]
        label: String,
    },
    /// Zero the claim statistics of one account
    ResetStats {
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "default")]
        label: String,
    },
    /// Delete every account of a user
    Clear {
        #[arg(long)]
        user: String,
    },
    /// Per-user report and reminder preferences
    Prefs {
        #[arg(long)]
        user: String,
        #[arg(long)]
        report: Option<Toggle>,
        #[arg(long)]
        reminders: Option<Toggle>,
    },
    /// Store-wide summary
    Status,
    /// Write a default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

impl Toggle {
    fn enabled(self) -> bool {
        matches!(self, Toggle::On)
    }
}

fn init_logging(verbose: bool, json: bool) {
    let default = if verbose {
        "info,couponclaw=debug,couponclaw_db=debug,couponclaw_scheduler=debug,couponclaw_providers=debug,couponclaw_channels=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).with_target(false).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }
}

fn load_config(path: Option<&Path>) -> Result<CouponClawConfig> {
    let mut config = match path {
        Some(p) => CouponClawConfig::load_from(p).with_context(|| format!("loading {}", p.display()))?,
        None => CouponClawConfig::load().context("loading default config")?,
    };
    config.apply_env();
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn open_store(config: &CouponClawConfig) -> Result<Arc<SqliteStore>> {
    let db_path = shellexpand::tilde(&config.db_path).to_string();
    let store = SqliteStore::open(Path::new(&db_path)).with_context(|| format!("opening database {db_path}"))?;
    Ok(Arc::new(store))
}

/// Collaborators shared by `run` and `sweep`.
struct Engine {
    sweep: Arc<ClaimSweep>,
    reminders: Arc<ReminderRunner>,
}

fn build_engine(config: &CouponClawConfig, store: Arc<SqliteStore>) -> Result<Engine> {
    let offset = config.schedule.offset()?;
    let cipher = Arc::new(CredentialCipher::from_secret(config.secret()));
    let provider = Arc::new(McpProvider::new(&config.provider, offset).context("building provider client")?);
    let dispatcher = Arc::new(Dispatcher::from_config(&config.channels));
    if dispatcher.is_empty() {
        tracing::warn!("⚠️ No notification channel configured, users will not hear about claims");
    }

    let executor = Arc::new(ClaimExecutor::new(
        store.clone(),
        provider,
        cipher,
        Duration::from_secs(config.claim.timeout_secs),
    ));
    let sweep = Arc::new(ClaimSweep::new(
        executor.clone(),
        store.clone(),
        dispatcher.clone(),
        SweepGuard::new(store.clone()),
        config.claim.concurrency,
        config.claim.notify_transient,
        config.owner_id.clone(),
    ));
    let reminders = Arc::new(ReminderRunner::new(
        store,
        executor,
        dispatcher,
        config.reminders.clone(),
        config.claim.concurrency,
    ));
    Ok(Engine { sweep, reminders })
}

/// Register the configured owner so run summaries have a recipient.
async fn ensure_owner(store: &SqliteStore, config: &CouponClawConfig) -> Result<()> {
    if config.owner_id.is_empty() {
        tracing::warn!("⚠️ No owner_id configured, run summaries are disabled");
        return Ok(());
    }
    if store.get_user(&config.owner_id).await?.is_none() {
        store.upsert_user(&NewUser::owner(config.owner_id.clone(), "owner")).await?;
        tracing::info!("👑 Owner {} registered", config.owner_id);
    }
    Ok(())
}

fn parse_channel(raw: &str) -> Result<ChannelPreference> {
    let (kind, dest) = match raw.split_once(':') {
        Some((kind, dest)) => (kind, Some(dest.to_string())),
        None => (raw, None),
    };
    let kind: ChannelKind = kind.parse()?;
    Ok(ChannelPreference::new(kind, dest.filter(|d| !d.is_empty())))
}

async fn require_user(store: &SqliteStore, id: &str) -> Result<User> {
    store.get_user(id).await?.ok_or_else(|| anyhow!("user {id} is not registered"))
}

async fn find_account(store: &SqliteStore, user: &str, label: &str) -> Result<Account> {
    store
        .list_accounts(user)
        .await?
        .into_iter()
        .find(|a| a.label == label)
        .ok_or_else(|| anyhow!("user {user} has no account '{label}'"))
}

fn print_account(a: &Account) {
    let marker = if a.is_current { "▶" } else { " " };
    let claim = if a.autoclaim { "autoclaim on" } else { "autoclaim off" };
    println!(
        "{marker} {:<12} {:<7} {:<14} claimed {:>4} · failed {:>3}{}",
        a.label,
        a.state.as_str(),
        claim,
        a.stats.success_count,
        a.stats.failure_count,
        a.stats.last_error.as_deref().map(|e| format!(" · last error: {e}")).unwrap_or_default()
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    if let Commands::InitConfig { force } = cli.command {
        let path = cli.config.unwrap_or_else(CouponClawConfig::default_path);
        if path.exists() && !force {
            bail!("{} already exists (use --force to overwrite)", path.display());
        }
        CouponClawConfig::default().save_to(&path)?;
        println!("✅ Config written to {}", path.display());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;
    let store = open_store(&config)?;

    match cli.command {
        Commands::Run => {
            ensure_owner(&store, &config).await?;
            let engine = build_engine(&config, store.clone())?;
            let scheduler = Arc::new(Scheduler::new(&config.schedule, store.clone(), engine.sweep, engine.reminders)?);
            let triggers: Vec<_> = scheduler.enabled_triggers().map(|t| t.as_str()).collect();

            println!("🎟️ CouponClaw v{}", env!("CARGO_PKG_VERSION"));
            println!("   🗄️  Database:  {}", config.db_path);
            println!("   🕐 Timezone:  UTC{}", config.schedule.utc_offset);
            println!("   🔔 Triggers:  {}", triggers.join(", "));
            println!();

            let handle = scheduler.spawn();
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            tracing::info!("👋 Shutting down");
            handle.abort();
        }
        Commands::Sweep { as_user } => {
            ensure_owner(&store, &config).await?;
            let requester = require_user(&store, &as_user).await?;
            let engine = build_engine(&config, store.clone())?;
            let summary = AdminSweep::new(engine.sweep).run_full_sweep(&requester).await?;
            println!("📊 Sweep finished");
            println!("   Accounts:   {}", summary.total);
            println!("   ✅ Success: {} ({} coupons)", summary.succeeded, summary.benefits_claimed);
            println!("   🫙 Nothing: {}", summary.none_available);
            println!("   🚫 Invalid: {} · 🔐 unreadable: {}", summary.invalid, summary.unreadable);
            println!("   ⚠️  Transient: {}", summary.transient);
            println!("   ⏸️  Paused:  {}", summary.paused);
        }
        Commands::Bind { user, label, token, name, channels } => {
            let prefs = channels.iter().map(|c| parse_channel(c)).collect::<Result<Vec<_>>>()?;
            let existing = store.get_user(&user).await?;
            if existing.is_none() || name.is_some() {
                let display = name
                    .or_else(|| existing.map(|u| u.display_name))
                    .unwrap_or_else(|| user.clone());
                let new_user = if user == config.owner_id {
                    NewUser::owner(user.clone(), display)
                } else {
                    NewUser::member(user.clone(), display)
                };
                store.upsert_user(&new_user.with_channels(prefs.clone())).await?;
            }
            if !prefs.is_empty() {
                store.set_channels(&user, &prefs).await?;
            }

            let cipher = CredentialCipher::from_secret(config.secret());
            let stored = cipher.encrypt(token.trim())?;
            let account = store.bind_credential(&user, &label, stored).await?;
            println!("✅ Token bound to account '{}' of user {user}", account.label);
            if !cipher.is_enabled() {
                println!("   ⚠️  No secret configured, the token is stored as plaintext");
            }
        }
        Commands::Accounts { user } => {
            require_user(&store, &user).await?;
            let accounts = store.list_accounts(&user).await?;
            if accounts.is_empty() {
                println!("No accounts for user {user}");
            }
            for a in &accounts {
                print_account(a);
            }
        }
        Commands::Autoclaim { user, label, state } => {
            let account = find_account(&store, &user, &label).await?;
            store.set_autoclaim(&account.id, state.enabled()).await?;
            println!("✅ Autoclaim {} for '{label}'", if state.enabled() { "enabled" } else { "disabled" });
        }
        Commands::Switch { user, label } => {
            let account = store.set_current(&user, &label).await?;
            println!("✅ Current account of user {user} is now '{}'", account.label);
        }
        Commands::Remove { user, label } => {
            let account = find_account(&store, &user, &label).await?;
            store.delete_account(&account.id).await?;
            println!("🗑️  Removed account '{label}' of user {user}");
        }
        Commands::ResetStats { user, label } => {
            let account = find_account(&store, &user, &label).await?;
            store.reset_stats(&account.id).await?;
            println!("✅ Statistics of '{label}' reset");
        }
        Commands::Clear { user } => {
            let removed = store.clear_credentials(&user).await?;
            println!("🗑️  Removed {removed} account(s) of user {user}");
        }
        Commands::Prefs { user, report, reminders } => {
            let current = require_user(&store, &user).await?;
            let report = report.map_or(current.report_enabled, Toggle::enabled);
            let reminders = reminders.map_or(current.reminders_enabled, Toggle::enabled);
            store.set_preferences(&user, report, reminders).await?;
            println!("✅ User {user}: report {report}, reminders {reminders}");
        }
        Commands::Status => {
            let s = store.summary().await?;
            println!("📊 CouponClaw status");
            println!("   Users:    {}", s.users);
            println!("   Accounts: {} ({} on autoclaim, {} paused)", s.accounts, s.eligible, s.paused);
            println!("   Claimed:  {} coupons all-time", s.total_success);
            println!("   Failed:   {} claim runs", s.total_failed);
        }
        Commands::InitConfig { .. } => {}
    }

    Ok(())
}
