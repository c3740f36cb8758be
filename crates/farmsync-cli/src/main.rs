//! farmsync - drive the offline sync and reminder engine from a terminal.
//!
//! Every command works offline: reads fall back to the local store and
//! mutations are queued until the API is reachable again.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use farmsync_core::api::ApiClient;
use farmsync_core::auth::{CredentialStore, KeyringToken, StaticToken, TokenProvider};
use farmsync_core::cache::CacheAges;
use farmsync_core::models::{CheckupInput, TaskInput, TaskPriority, TaskStatus, VaccinationInput};
use farmsync_core::network::{ConnectivitySource, ProbeSource, ReachabilityEvent, ReachabilityMonitor, StaticSource};
use farmsync_core::notify::{DeliveredNotification, NotificationScheduler, TimerNotifier};
use farmsync_core::queue::{CheckupMutation, Mutation, TaskMutation, VaccinationMutation};
use farmsync_core::store::FileStore;
use farmsync_core::{Config, FarmData};

// ============================================================================
// Constants
// ============================================================================

const USAGE: &str = "\
Usage: farmsync [--log-file <path>] <command>

Commands:
  status                                   Connectivity, queue and cache state
  fetch <tasks|vaccinations|checkups|all>  Read data (falls back to cache)
  fetch vets <city> <animal_type>          Read the vet directory
  enqueue task <name> [--due <rfc3339>] [--priority <low|medium|high>]
  enqueue task-status <id> <pending|in_progress|completed>
  enqueue task-delete <id>
  enqueue vaccination <animal> <vaccine> <due rfc3339>
  enqueue checkup <animal> <when rfc3339> [reason]
  drain                                    Push queued mutations now
  login <username>                         Store an API token in the keychain
  logout                                   Clear offline data, reminders and token
  watch                                    Stay running: sync on reconnect, deliver reminders";

/// Initialize the tracing subscriber. With `log_file`, also write a
/// daily-rolling log next to it; keep the returned guard alive until exit.
fn init_tracing(log_file: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let prefix = path
                .file_name()
                .map(|name| name.to_owned())
                .unwrap_or_else(|| "farmsync.log".into());
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, prefix));
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let log_file = take_flag(&mut args, "--log-file").map(PathBuf::from);
    let _guard = init_tracing(log_file.as_deref());

    let Some(command) = args.first().cloned() else {
        eprintln!("{}", USAGE);
        return Ok(());
    };
    let rest = args.split_off(1);

    let mut config = Config::load().context("Failed to load config")?;
    config.apply_env();
    debug!(api_base = %config.api_base, "Config loaded");

    match Command::parse(&command)? {
        Command::Login => login(&mut config, &rest),
        Command::Status => status(&build(&config).await?).await,
        Command::Fetch => fetch(&build(&config).await?, &rest).await,
        Command::Enqueue => enqueue(&build(&config).await?, rest).await,
        Command::Drain => drain(&build(&config).await?).await,
        Command::Logout => logout(&build(&config).await?).await,
        Command::Watch => watch(build(&config).await?, &config).await,
        Command::Help => {
            println!("{}", USAGE);
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Login,
    Status,
    Fetch,
    Enqueue,
    Drain,
    Logout,
    Watch,
    Help,
}

impl Command {
    /// Unknown commands are an error so `main` returns normally and the
    /// log writer gets flushed.
    fn parse(name: &str) -> Result<Self> {
        Ok(match name {
            "login" => Command::Login,
            "status" => Command::Status,
            "fetch" => Command::Fetch,
            "enqueue" => Command::Enqueue,
            "drain" => Command::Drain,
            "logout" => Command::Logout,
            "watch" => Command::Watch,
            "help" | "--help" | "-h" => Command::Help,
            other => bail!("Unknown command: {}\n\n{}", other, USAGE),
        })
    }
}

// ============================================================================
// Wiring
// ============================================================================

struct Runtime {
    data: FarmData,
    monitor: ReachabilityMonitor,
    probe: Arc<dyn ConnectivitySource>,
    tokens: Arc<dyn TokenProvider>,
    deliveries: UnboundedReceiver<DeliveredNotification>,
}

/// Environment token first, then the keychain entry of the last login.
fn token_provider(config: &Config) -> Arc<dyn TokenProvider> {
    if let Some(token) = Config::env_token() {
        debug!("Using token from environment");
        return Arc::new(StaticToken::new(token));
    }
    match &config.last_username {
        Some(username) => Arc::new(KeyringToken::new(username.clone())),
        None => Arc::new(StaticToken::none()),
    }
}

async fn build(config: &Config) -> Result<Runtime> {
    let data_dir = Config::data_dir()?;
    let store = Arc::new(FileStore::new(data_dir).context("Failed to open offline store")?);
    let api = ApiClient::with_timeout(config.api_base.clone(), config.request_timeout())
        .context("Failed to build HTTP client")?;

    let probe: Arc<dyn ConnectivitySource> =
        match ProbeSource::for_api_base(&config.api_base, config.request_timeout()) {
            Some(probe) => Arc::new(probe),
            None => Arc::new(StaticSource::unavailable()),
        };
    let monitor = ReachabilityMonitor::from_source(probe.as_ref()).await;

    let (notifier, deliveries) = TimerNotifier::new();
    let scheduler = Arc::new(NotificationScheduler::new(Arc::new(notifier)));
    let tokens = token_provider(config);

    let data = FarmData::new(
        api,
        store,
        monitor.clone(),
        scheduler,
        tokens.clone(),
        config,
    );
    Ok(Runtime {
        data,
        monitor,
        probe,
        tokens,
        deliveries,
    })
}

// ============================================================================
// Commands
// ============================================================================

fn login(config: &mut Config, args: &[String]) -> Result<()> {
    let Some(username) = args.first() else {
        bail!("login needs a username");
    };
    let token = rpassword::prompt_password("API token: ").context("Failed to read token")?;
    if token.trim().is_empty() {
        bail!("Empty token");
    }
    CredentialStore::store_token(username, token.trim())?;
    config.last_username = Some(username.clone());
    config.save().context("Failed to save config")?;
    println!("Token stored for {}", username);
    Ok(())
}

async fn status(rt: &Runtime) -> Result<()> {
    let status = rt.data.status().await;
    let ages = rt.data.cache().cache_ages().await;

    println!("API:           {}", rt.data.api_base());
    println!(
        "Network:       {}",
        if status.is_online { "online" } else { "offline" }
    );
    println!(
        "Token:         {}",
        if rt.tokens.token().is_some() { "present" } else { "missing" }
    );
    println!("Pending:       {}", status.pending);
    println!(
        "Last sync:     {}",
        status
            .last_sync
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );
    println!("Tasks:         {}", CacheAges::display(&ages.tasks));
    println!("Vaccinations:  {}", CacheAges::display(&ages.vaccinations));
    println!("Checkups:      {}", CacheAges::display(&ages.checkups));

    for item in rt.data.queue().peek_all().await {
        println!(
            "  {}  {}  retries={}",
            item.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
            item.describe(),
            item.retry_count
        );
    }
    Ok(())
}

async fn fetch(rt: &Runtime, args: &[String]) -> Result<()> {
    let what = args.first().map(String::as_str).unwrap_or("all");
    let json = match what {
        "tasks" => serde_json::to_string_pretty(&rt.data.fetch_tasks().await)?,
        "vaccinations" => serde_json::to_string_pretty(&rt.data.fetch_vaccinations().await)?,
        "checkups" => serde_json::to_string_pretty(&rt.data.fetch_checkups().await)?,
        "vets" => {
            let (Some(city), Some(animal)) = (args.get(1), args.get(2)) else {
                bail!("fetch vets needs <city> <animal_type>");
            };
            serde_json::to_string_pretty(&rt.data.fetch_vets(city, animal).await)?
        }
        "all" => {
            rt.data.initialize().await;
            let report = rt.data.refresh_all().await;
            serde_json::to_string_pretty(&report)?
        }
        other => bail!("Unknown fetch target: {}", other),
    };
    println!("{}", json);
    Ok(())
}

async fn enqueue(rt: &Runtime, mut args: Vec<String>) -> Result<()> {
    let mutation = parse_mutation(&mut args)?;
    let receipt = rt.data.submit(mutation).await;
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    if let Some(report) = rt.data.settle().await {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

async fn drain(rt: &Runtime) -> Result<()> {
    let report = rt.data.sync_now().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn logout(rt: &Runtime) -> Result<()> {
    rt.data.logout().await;
    println!("Offline data cleared");
    Ok(())
}

async fn watch(mut rt: Runtime, config: &Config) -> Result<()> {
    if !rt.data.initialize().await {
        eprintln!("Notifications unavailable; syncing only");
    }
    let report = rt.data.refresh_all().await;
    info!(reminders = report.total(), "Initial refresh complete");

    let _subscription = rt.monitor.subscribe(|online| {
        eprintln!("Network: {}", if online { "online" } else { "offline" });
    });
    let mut reconnects = rt.monitor.reconnect_events();
    let probe = rt
        .monitor
        .spawn_listener(rt.probe.clone(), config.probe_interval());
    let sync = rt.data.engine().spawn_reconnect_listener(
        rt.monitor.reconnect_events(),
        rt.tokens.clone(),
        rt.data.api_base().to_string(),
    );

    // Push anything left over from a previous session
    rt.data.sync_now().await;

    loop {
        tokio::select! {
            Some(delivered) = rt.deliveries.recv() => {
                println!(
                    "[{}] {}: {}",
                    delivered.delivered_at.format("%H:%M"),
                    delivered.title,
                    delivered.body
                );
            }
            Ok(event) = reconnects.recv() => {
                if let ReachabilityEvent::Reconnected { .. } = event {
                    rt.data.refresh_all().await;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    probe.abort();
    sync.abort();
    info!("Watch stopped");
    Ok(())
}

// ============================================================================
// Argument parsing
// ============================================================================

/// Remove `--name <value>` from `args`, returning the value.
fn take_flag(args: &mut Vec<String>, name: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == name)?;
    if pos + 1 >= args.len() {
        args.remove(pos);
        return None;
    }
    let value = args.remove(pos + 1);
    args.remove(pos);
    Some(value)
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid RFC 3339 time: {}", value))?
        .with_timezone(&Utc))
}

fn parse_enum<T: serde::de::DeserializeOwned>(value: &str, what: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(value.to_lowercase()))
        .with_context(|| format!("Invalid {}: {}", what, value))
}

fn parse_mutation(args: &mut Vec<String>) -> Result<Mutation> {
    let due = take_flag(args, "--due");
    let priority = take_flag(args, "--priority");
    let arg = |i: usize, name: &str| -> Result<String> {
        args.get(i)
            .cloned()
            .with_context(|| format!("Missing <{}>", name))
    };

    let kind = arg(0, "kind")?;
    let mutation = match kind.as_str() {
        "task" => {
            let mut input = TaskInput::new(arg(1, "name")?);
            input.due_date = due.as_deref().map(parse_time).transpose()?;
            input.priority = priority
                .as_deref()
                .map(|p| parse_enum::<TaskPriority>(p, "priority"))
                .transpose()?;
            Mutation::Task(TaskMutation::Create(input))
        }
        "task-status" => Mutation::Task(TaskMutation::SetStatus {
            id: arg(1, "id")?,
            status: parse_enum::<TaskStatus>(&arg(2, "status")?, "status")?,
        }),
        "task-delete" => Mutation::Task(TaskMutation::Delete { id: arg(1, "id")? }),
        "vaccination" => Mutation::Vaccination(VaccinationMutation::Create(VaccinationInput {
            animal_name: arg(1, "animal")?,
            animal_type: None,
            vaccine_name: arg(2, "vaccine")?,
            due_date: parse_time(&arg(3, "due")?)?,
        })),
        "checkup" => Mutation::Checkup(CheckupMutation::Create(CheckupInput {
            animal_name: arg(1, "animal")?,
            animal_type: None,
            reason: args.get(3).cloned(),
            vet_name: None,
            scheduled_at: parse_time(&arg(2, "when")?)?,
        })),
        other => bail!("Unknown mutation kind: {}", other),
    };
    Ok(mutation)
}
