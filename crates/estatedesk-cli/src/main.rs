//! estatedesk - maintenance tool for the estatedesk client store.
//!
//! Inspects and clears the encrypted cache, reports on the stored token,
//! warms the cache from the API and watches the idle-session timer.

use std::io::{self, BufRead};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use estatedesk_core::{ActivityKind, CacheKey, ClientCore, Config, FetchOptions};

// ============================================================================
// Constants
// ============================================================================

/// Directory for a daily rolling log file, in addition to stderr
const LOG_DIR_ENV: &str = "ESTATEDESK_LOG_DIR";

/// Token used by `--login` when none is passed on the command line
const TOKEN_ENV: &str = "ESTATEDESK_TOKEN";

/// How often `--watch-session` prints the time left
const WATCH_REPORT_SECS: u64 = 30;

const USAGE: &str = "\
Usage: estatedesk [COMMAND]

Commands:
  --status            Token and cache overview (default)
  --cache-keys        List cached collections and their age
  --clear-cache       Remove every cached collection
  --token-status      Decode and validate the stored token
  --login [TOKEN]     Store a token (or $ESTATEDESK_TOKEN)
  --logout            Remove the token and purge the cache
  --warm              Fetch every collection from the API into the cache
  --watch-session     Run the idle timer; press Enter to count as activity
  --help              Show this message";

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(LOG_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "estatedesk.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        _ => (None, None),
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

    let _guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("--status");
    if command == "--help" || command == "-h" {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = Config::load()
        .context("Failed to load configuration")?
        .with_env_overrides();
    let core = ClientCore::from_config(&config)?;
    core.init();

    let result = match command {
        "--status" => status(&core),
        "--cache-keys" => cache_keys(&core),
        "--clear-cache" => clear_cache(&core),
        "--token-status" => token_status(&core),
        "--login" => login(&core, args.get(1).cloned()),
        "--logout" => {
            core.logout();
            println!("Signed out; cache purged.");
            Ok(())
        }
        "--warm" => warm(&core).await,
        "--watch-session" => watch_session(&core).await,
        other => {
            eprintln!("Unknown command: {}\n\n{}", other, USAGE);
            std::process::exit(2);
        }
    };

    core.dispose();
    result
}

fn status(core: &ClientCore) -> Result<()> {
    if let Ok(path) = Config::config_path() {
        println!("Config:  {}", path.display());
    }
    match core.tokens().current() {
        Some(record) => println!(
            "Session: signed in as {}",
            record.subject().unwrap_or("(unknown subject)")
        ),
        None => println!("Session: signed out"),
    }
    cache_keys(core)
}

fn cache_keys(core: &ClientCore) -> Result<()> {
    let ages = core.cache().cache_ages();
    if ages.is_empty() {
        println!("Cache is empty.");
        return Ok(());
    }
    for entry in ages {
        let marker = if entry.stale { " (stale)" } else { "" };
        println!("  {:<22} {}{}", entry.key, entry.age, marker);
    }
    Ok(())
}

fn clear_cache(core: &ClientCore) -> Result<()> {
    let count = core.cache().cache_keys().len();
    core.cache().invalidate_all();
    println!("Removed {} cached collection(s).", count);
    Ok(())
}

fn token_status(core: &ClientCore) -> Result<()> {
    let Some(token) = core.tokens().get_token() else {
        println!("No token stored.");
        return Ok(());
    };

    let validation = core.tokens().validate(&token);
    println!("Valid:   {}", validation.valid);
    if let Some(ref claims) = validation.claims {
        println!("Subject: {}", claims.sub.as_deref().unwrap_or("-"));
        if !claims.roles.is_empty() {
            println!("Roles:   {}", claims.roles.join(", "));
        }
        println!("Admin:   {}", claims.is_admin());
        if let Some(at) = claims.issued_at() {
            println!("Issued:  {}", at.to_rfc3339());
        }
    }
    if let Some(at) = validation.expires_at {
        let left = at - Utc::now();
        if left.num_seconds() > 0 {
            println!("Expires: {} (in {}m)", at.to_rfc3339(), left.num_minutes());
        } else {
            println!("Expired: {}", at.to_rfc3339());
        }
    }
    if let Some(error) = validation.error {
        println!("Problem: {}", error);
    }
    Ok(())
}

fn login(core: &ClientCore, token: Option<String>) -> Result<()> {
    let token = token
        .or_else(|| std::env::var(TOKEN_ENV).ok())
        .ok_or_else(|| anyhow::anyhow!("No token given and {} is not set", TOKEN_ENV))?;

    let validation = core.tokens().validate(&token);
    if !validation.valid {
        warn!(error = ?validation.error, "Token does not validate locally");
    }
    let profile = serde_json::json!({
        "sub": validation.claims.as_ref().and_then(|c| c.sub.clone()),
        "roles": validation.claims.as_ref().map(|c| c.roles.clone()).unwrap_or_default(),
    });
    core.login(&token, &profile)?;
    println!("Token stored.");
    Ok(())
}

async fn warm(core: &ClientCore) -> Result<()> {
    let api = core
        .api()
        .ok_or_else(|| anyhow::anyhow!("No api_base_url configured"))?;

    let fetches = CacheKey::ALL.iter().map(|key| async move {
        (key, api.collection(key, FetchOptions::bypass()).await)
    });
    let results = join_all(fetches).await;

    let mut failures = 0;
    for (key, result) in results {
        match result {
            Ok(_) => println!("  {:<22} ok", key),
            Err(e) if e.is_auth_failure() => {
                anyhow::bail!("Not signed in or session rejected: {}", e);
            }
            Err(e) => {
                failures += 1;
                println!("  {:<22} failed: {}", key, e);
            }
        }
    }
    info!(failures, "Cache warm-up finished");
    Ok(())
}

async fn watch_session(core: &ClientCore) -> Result<()> {
    let expired = Arc::new(Notify::new());
    let notify = expired.clone();

    core.start_monitor(
        |remaining| println!("Session ends in {}s without activity.", remaining),
        move || notify.notify_one(),
    )
    .context("Cannot watch the session")?;

    // stdin has no async reader here; a plain thread feeds the hub
    let hub = core.hub().clone();
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            if line.is_err() {
                break;
            }
            hub.emit(ActivityKind::Keyboard);
        }
    });

    let mut report = tokio::time::interval(Duration::from_secs(WATCH_REPORT_SECS));
    loop {
        tokio::select! {
            _ = expired.notified() => {
                println!("Session expired; token removed and cache purged.");
                if let Some(location) = core.last_location() {
                    println!("Last location: {}", location);
                }
                return Ok(());
            }
            _ = report.tick() => {
                if let Some(left) = core.monitor().remaining() {
                    println!("{}m {}s left", left.num_minutes(), left.num_seconds() % 60);
                }
            }
        }
    }
}
