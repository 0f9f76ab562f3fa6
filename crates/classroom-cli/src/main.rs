//! Smart Classroom Scheduler - session command-line driver.
//!
//! Drives the console's session lifecycle against the configured credential
//! store: log in with issued tokens, inspect or refresh the session, check
//! whether a page would be reachable, and log out. Notifications raised by
//! each command are printed after its result.

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use classroom_core::{
    Access, ApiError, Config, CredentialStore, DisabledExchange, FileStore, HttpTokenExchange,
    IssuedToken, KeyringStore, MemoryStore, Notification, NotificationCenter, RouteGuard,
    RouteTable, SessionManager, SessionState, Severity, StorageBackend, TokenExchange,
};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "\
Usage: classroom <command>

Commands:
  login <access-token> <refresh-token> <ttl-seconds>
  status
  token
  refresh
  logout
  visit <path>";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Login {
        access_token: String,
        refresh_token: String,
        ttl_seconds: u64,
    },
    Status,
    Token,
    Refresh,
    Logout,
    Visit(String),
}

impl Command {
    fn parse(args: &[String]) -> Result<Self> {
        let name = args.first().map(String::as_str).unwrap_or_default();
        match (name, &args[args.len().min(1)..]) {
            ("login", [access, refresh, ttl]) => Ok(Command::Login {
                access_token: access.clone(),
                refresh_token: refresh.clone(),
                ttl_seconds: ttl
                    .parse()
                    .with_context(|| format!("Invalid ttl-seconds: {}", ttl))?,
            }),
            ("status", []) => Ok(Command::Status),
            ("token", []) => Ok(Command::Token),
            ("refresh", []) => Ok(Command::Refresh),
            ("logout", []) => Ok(Command::Logout),
            ("visit", [path]) => Ok(Command::Visit(path.clone())),
            _ => Err(anyhow::anyhow!("{}", USAGE)),
        }
    }
}

/// Refresh client chosen from configuration.
enum Exchange {
    Http(HttpTokenExchange),
    Disabled(DisabledExchange),
}

impl TokenExchange for Exchange {
    async fn exchange(&self, refresh_token: &str) -> Result<IssuedToken, ApiError> {
        match self {
            Exchange::Http(client) => client.exchange(refresh_token).await,
            Exchange::Disabled(disabled) => disabled.exchange(refresh_token).await,
        }
    }
}

fn open_store(config: &Config) -> Result<Arc<dyn CredentialStore>> {
    let store: Arc<dyn CredentialStore> = match config.storage {
        StorageBackend::File => {
            let dir = config.cache_dir()?;
            debug!(?dir, "Using file credential store");
            Arc::new(FileStore::new(dir))
        }
        StorageBackend::Keyring => Arc::new(KeyringStore::new()),
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::parse(&args)?;

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        }
    };

    let exchange = match config.refresh_url {
        Some(ref url) => Exchange::Http(HttpTokenExchange::new(url.as_str())?),
        None => Exchange::Disabled(DisabledExchange),
    };

    let notifications = NotificationCenter::with_default_ttl(config.toast_ttl_ms);
    let session = SessionManager::new(open_store(&config)?, exchange)
        .with_notifications(notifications.clone());

    info!(?command, "Running command");
    let result = run(command, &session, &notifications).await;

    print_notifications(&notifications.list());
    notifications.shutdown();
    result
}

async fn run(
    command: Command,
    session: &SessionManager<Exchange>,
    notifications: &NotificationCenter,
) -> Result<()> {
    match command {
        Command::Login {
            access_token,
            refresh_token,
            ttl_seconds,
        } => {
            session.login(&access_token, &refresh_token, ttl_seconds)?;
            println!("Session stored, expires in {}s", ttl_seconds);
        }
        Command::Status => print_status(session),
        Command::Token => match session.get_access_token() {
            Some(token) => println!("{}", token),
            None => println!("No valid access token"),
        },
        Command::Refresh => match session.refresh_access_token().await {
            Some(token) => println!("Refreshed: {}", token),
            None => println!("Refresh failed, please login again"),
        },
        Command::Logout => {
            session.logout();
            println!("Logged out");
        }
        Command::Visit(path) => {
            let mut guard = RouteGuard::new(RouteTable::default(), notifications.clone());
            match guard.navigate(session, &path).await {
                Access::Allow => println!("Allow {}", path),
                Access::Deny { redirect_to, from } => {
                    println!("Deny {} -> redirect to {}", from, redirect_to)
                }
            }
        }
    }
    Ok(())
}

fn print_status(session: &SessionManager<Exchange>) {
    let state = session.state();
    println!("State: {}", state.label());
    if let SessionState::Authenticated(ref c) | SessionState::Expired(ref c) = state {
        if let Some(at) = c.expires_at_utc() {
            println!("Expires: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
    }
    println!("Expired: {}", session.is_expired());
    println!("Remaining: {}s", session.time_until_expiration() / 1000);
}

fn severity_tag(severity: Severity) -> &'static str {
    match severity {
        Severity::Default => "info",
        Severity::Destructive => "error",
        Severity::Success => "ok",
        Severity::Warning => "warn",
    }
}

fn format_notification(n: &Notification) -> String {
    let mut line = format!("[{}]", severity_tag(n.severity));
    if let Some(ref title) = n.title {
        line.push(' ');
        line.push_str(title);
    }
    if let Some(ref description) = n.description {
        line.push_str(" - ");
        line.push_str(description);
    }
    line
}

fn print_notifications(notifications: &[Notification]) {
    for n in notifications {
        println!("{}", format_notification(n));
    }
}
