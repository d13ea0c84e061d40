// SPDX-License-Identifier: MPL-2.0

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use rapport::analytics::{
    AnalyticsCache, AnalyticsEngine, AnalyticsSnapshot, noise_outliers, one_sided,
};
use rapport::atproto::{ApiClient, ClientError, Session, SocialApi, auth, reqwest_client};
use rapport::config::{DEFAULT_PDS, PUBLIC_API};
use rapport::ratelimit::RateLimiter;
use rapport::state::{EngineSettings, SessionError, SessionManager};
use rapport::store::{LocalStore, StoreDb, StoreError};
use rapport::sync::{SyncError, SyncOrchestrator, SyncProgress, SyncReport, stage_states};

#[derive(Parser)]
#[command(name = "rapport")]
#[command(version)]
#[command(about = "Bluesky relationship analytics from a rate-gated local mirror")]
struct Cli {
    /// Settings file (default: ~/.config/io.github.sethcottle.Rapport/settings.json)
    #[arg(long, global = true, env = "RAPPORT_SETTINGS")]
    settings: Option<PathBuf>,

    /// Database file (default: per-account file under the data directory)
    #[arg(long, global = true, env = "RAPPORT_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a session with an app password
    Login {
        /// Handle or DID
        identifier: String,
        /// App password; read from stdin when omitted
        #[arg(long, env = "RAPPORT_APP_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        /// PDS to log in against
        #[arg(long, default_value = DEFAULT_PDS)]
        service: String,
    },
    /// Mirror follows, feeds, likes and engagement into the local store
    Sync {
        /// Only look back over the short incremental window
        #[arg(long)]
        incremental: bool,
    },
    /// Per-stage sync state
    Status,
    /// Accounts ranked by noise score
    Noise {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Accounts ranked by reciprocity score
    Reciprocity {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Noisy accounts and one-sided relationships past the configured thresholds
    Outliers,
    /// Rate limiter configuration
    Limits,
    /// Delete every stored row for the logged-in account
    Reset,
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("not logged in; run `rapport login <handle>` first")]
    NotLoggedIn,
    #[error("could not read password: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Sync(SyncError::Cancelled) => ExitCode::from(130),
            _ => ExitCode::FAILURE,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("info"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            e.exit_code()
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let settings = match &cli.settings {
        Some(path) => EngineSettings::load_from(path),
        None => EngineSettings::load(),
    };
    let sessions = SessionManager::open_default()?;

    match cli.command {
        Commands::Login {
            identifier,
            password,
            service,
        } => {
            let password = match password {
                Some(password) => password,
                None => read_password()?,
            };
            let session = auth::login(
                &service,
                &identifier,
                &password,
                settings.sync.request_timeout(),
            )
            .await?;
            sessions.store(&session)?;

            let client = build_client(&settings, CancellationToken::new())?;
            let name = match client.get_profile(&session.did).await {
                Ok(profile) => profile.display_name.unwrap_or(profile.handle),
                Err(e) => {
                    tracing::warn!(error = %e, "could not fetch own profile");
                    session.handle.clone()
                }
            };
            println!("Logged in as {name} ({})", session.did);
            Ok(())
        }
        Commands::Sync { incremental } => {
            let session = load_session(&sessions)?;
            let cancel = CancellationToken::new();
            spawn_interrupt_handler(cancel.clone());

            let client = Arc::new(build_client(&settings, cancel.clone())?);
            client.resume_session(&session).await?;
            let session = persist_refreshed(&sessions, &client, session).await?;
            let limiter = client.limiter().clone();

            let store = open_store(cli.db.as_deref(), &session.did)?;
            let cache = analytics_cache(store.clone(), &session.did, &settings);
            let orchestrator = SyncOrchestrator::new(client.clone(), store, session.did.clone())
                .with_options(settings.sync.to_options())
                .with_analytics(cache)
                .with_progress(Box::new(print_progress))
                .with_cancellation(cancel);

            let result = if incremental {
                orchestrator.incremental_sync().await
            } else {
                orchestrator.full_sync().await
            };
            persist_refreshed(&sessions, &client, session).await?;
            let report = result?;
            print_report(&report);

            let stats = limiter.stats();
            println!(
                "Rate limit: {} used, {} remaining in window",
                stats.used, stats.remaining
            );
            Ok(())
        }
        Commands::Status => {
            let session = load_session(&sessions)?;
            let store = open_store(cli.db.as_deref(), &session.did)?;
            println!("Account: {} ({})", session.handle, session.did);
            println!(
                "Stored: {} profiles, {} posts, {} interactions, {} engagements",
                store.count_profiles()?,
                store.count_posts()?,
                store.count_interactions()?,
                store.count_engagements()?
            );
            for state in stage_states(store.as_ref())? {
                let last = state
                    .last_success()
                    .map(|t| format_time(&t))
                    .unwrap_or_else(|| "never".into());
                print!(
                    "  {:<10} {:<8} last success {last}, {} items",
                    state.key,
                    state.status.as_str(),
                    state.items_processed
                );
                if let Some(cursor) = state.resume_cursor() {
                    print!(", resumes at {cursor}");
                }
                if let Some(error) = &state.error {
                    print!(", error: {error}");
                }
                println!();
            }
            Ok(())
        }
        Commands::Noise { limit } => {
            let snapshot = snapshot(cli.db.as_deref(), &sessions, &settings)?;
            print_noise(&snapshot.noise_scores, limit);
            println!("Computed {}", format_time(&snapshot.computed_at));
            Ok(())
        }
        Commands::Reciprocity { limit } => {
            let snapshot = snapshot(cli.db.as_deref(), &sessions, &settings)?;
            print_reciprocity(&snapshot.reciprocity_scores, limit);
            println!("Computed {}", format_time(&snapshot.computed_at));
            Ok(())
        }
        Commands::Outliers => {
            let snapshot = snapshot(cli.db.as_deref(), &sessions, &settings)?;
            let thresholds = &settings.analytics;

            let noisy = noise_outliers(snapshot.noise_scores, thresholds.noise_threshold);
            println!("Noise score >= {}:", thresholds.noise_threshold);
            print_noise(&noisy, usize::MAX);

            let lopsided = one_sided(snapshot.reciprocity_scores, thresholds.reciprocity_threshold);
            println!("Reciprocity <= {}:", thresholds.reciprocity_threshold);
            print_reciprocity(&lopsided, usize::MAX);
            Ok(())
        }
        Commands::Limits => {
            let config = settings.rate_limit;
            println!(
                "{} requests per {}s, at least {}ms apart",
                config.max_requests,
                config.window().as_secs(),
                config.min_delay_ms
            );
            println!("Usage is tracked per sync run and printed when it finishes.");
            Ok(())
        }
        Commands::Reset => {
            let session = load_session(&sessions)?;
            let store = open_store(cli.db.as_deref(), &session.did)?;
            store.clear_all()?;
            println!("Cleared all stored data for {}", session.handle);
            Ok(())
        }
    }
}

fn read_password() -> Result<String, CliError> {
    eprint!("App password: ");
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn load_session(sessions: &SessionManager) -> Result<Session, CliError> {
    match sessions.load() {
        Ok(session) => Ok(session),
        Err(SessionError::NotFound) => Err(CliError::NotLoggedIn),
        Err(e) => Err(e.into()),
    }
}

fn build_client(
    settings: &EngineSettings,
    cancel: CancellationToken,
) -> Result<ApiClient, CliError> {
    let limiter = Arc::new(RateLimiter::new(settings.rate_limit));
    let http = reqwest_client(PUBLIC_API, settings.sync.request_timeout())
        .map_err(|e| ClientError::Transport(e.to_string()))?;
    Ok(ApiClient::new(Arc::new(http), limiter).with_cancellation(cancel))
}

/// Write back tokens the agent refreshed since `known` was stored.
async fn persist_refreshed(
    sessions: &SessionManager,
    client: &ApiClient,
    known: Session,
) -> Result<Session, CliError> {
    match client.session().await {
        Some(current) if current != known => {
            sessions.store(&current)?;
            tracing::info!(did = %current.did, "stored refreshed session");
            Ok(current)
        }
        _ => Ok(known),
    }
}

fn open_store(path: Option<&Path>, did: &str) -> Result<Arc<StoreDb>, CliError> {
    let db = match path {
        Some(path) => StoreDb::open_at(path, did)?,
        None => StoreDb::open(did)?,
    };
    Ok(Arc::new(db))
}

fn analytics_cache(
    store: Arc<StoreDb>,
    did: &str,
    settings: &EngineSettings,
) -> Arc<AnalyticsCache> {
    let engine = AnalyticsEngine::new(store.clone(), did);
    Arc::new(AnalyticsCache::new(
        engine,
        store,
        settings.analytics.cache_ttl(),
    ))
}

fn snapshot(
    db: Option<&Path>,
    sessions: &SessionManager,
    settings: &EngineSettings,
) -> Result<AnalyticsSnapshot, CliError> {
    let session = load_session(sessions)?;
    let store = open_store(db, &session.did)?;
    let cache = analytics_cache(store, &session.did, settings);
    Ok(cache.get_analytics()?)
}

/// Cancel the shared token on Ctrl-C; a second Ctrl-C exits immediately.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        eprintln!("\nInterrupted, stopping after in-flight requests...");
        cancel.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}

fn print_progress(event: SyncProgress) {
    match event {
        SyncProgress::StageStarted { stage } => eprintln!("[{stage}] started"),
        SyncProgress::BatchCompleted {
            stage,
            batch,
            batches,
            failed,
            ..
        } if failed > 0 => eprintln!("[{stage}] batch {batch}/{batches}: {failed} failed"),
        SyncProgress::StageCompleted { stage, items } => {
            eprintln!("[{stage}] done, {items} items")
        }
        SyncProgress::StageFailed { stage, error } => eprintln!("[{stage}] failed: {error}"),
        _ => {}
    }
}

fn print_report(report: &SyncReport) {
    let elapsed = report.finished_at - report.started_at;
    println!(
        "{} sync finished in {}s: {} items, {} failed fetches, {} evicted",
        report.mode,
        elapsed.num_seconds(),
        report.total_items(),
        report.total_failed(),
        report.evicted
    );
}

fn print_noise(scores: &[rapport::analytics::NoiseScore], limit: usize) {
    if scores.is_empty() {
        println!("  (none)");
        return;
    }
    for s in scores.iter().take(limit) {
        println!(
            "  {:<32} {:.3}  volume p{:<3.0} engaged {:>5.1}%  {} posts{}",
            s.handle.as_deref().unwrap_or(&s.did),
            s.score,
            s.volume_percentile * 100.0,
            s.engagement_rate * 100.0,
            s.total_activity,
            if s.is_mutual { "  mutual" } else { "" }
        );
    }
}

fn print_reciprocity(scores: &[rapport::analytics::ReciprocityScore], limit: usize) {
    if scores.is_empty() {
        println!("  (none)");
        return;
    }
    for s in scores.iter().take(limit) {
        println!(
            "  {:<32} {:.3}  you {:>4}  them {:>4}{}",
            s.handle.as_deref().unwrap_or(&s.did),
            s.score,
            s.your_total,
            s.their_total,
            if s.balanced { "  balanced" } else { "" }
        );
    }
}

fn format_time(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M UTC").to_string()
}
