use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nowplaying_sync_core::{now_millis, AppConfig, SyncState};
use nowplaying_sync_engine::{CacheStore, Scheduler, SchedulerConfig, SyncHandle};
use nowplaying_sync_providers::{build_source, TrackSource};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "nowplaying-sync",
    about = "Recent tracks API -> adaptive poller -> now playing"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Run,
    Doctor,
    Status,
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cmd = cli.command.unwrap_or(Commands::Run);
    let cfg_path = cli.config.unwrap_or_else(default_config_path);

    match cmd {
        Commands::Config {
            action: ConfigAction::Init,
        } => {
            init_config(&cfg_path)?;
            println!("Initialized config at {}", cfg_path.display());
            Ok(())
        }
        Commands::Doctor => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            doctor(&cfg, &cfg_path).await
        }
        Commands::Status => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            status(&cfg).await
        }
        Commands::Run => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            run(cfg, cfg_path).await
        }
    }
}

async fn run(cfg: AppConfig, cfg_path: PathBuf) -> Result<()> {
    let mut handle = build_scheduler(&cfg)?.start();
    let mut states = handle.subscribe();
    render(&states.borrow_and_update());

    info!(source = %cfg.source.kind, user = %cfg.source.user, "nowplaying-sync started");

    let (reload_tx, mut reload_rx) = mpsc::channel::<()>(4);
    spawn_reload_watchers(
        cfg_path.clone(),
        cfg.intervals.file_watch_poll_ms,
        reload_tx,
    )
    .await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    warn!("scheduler state channel closed");
                    break;
                }
                render(&states.borrow_and_update());
            }
            line = stdin.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => match line.trim() {
                        "retry" => handle.retry(),
                        "hide" => handle.set_visible(false),
                        "show" => handle.set_visible(true),
                        "quit" | "exit" => break,
                        "" => {}
                        other => println!("unknown command `{other}` (retry, hide, show, quit)"),
                    },
                    Ok(None) => stdin_open = false,
                    Err(err) => {
                        warn!(error=%err, "stdin unreadable; interactive commands disabled");
                        stdin_open = false;
                    }
                }
            }
            msg = reload_rx.recv() => {
                if msg.is_some() {
                    match load_or_default(&cfg_path).and_then(|new_cfg| build_scheduler(&new_cfg)) {
                        Ok(scheduler) => {
                            let previous = std::mem::replace(&mut handle, scheduler.start());
                            previous.stop().await;
                            states = handle.subscribe();
                            render(&states.borrow_and_update());
                            info!("configuration reloaded");
                        }
                        Err(err) => {
                            error!(error=%err, "failed to reload config");
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received ctrl-c; shutting down");
                break;
            }
        }
    }

    handle.stop().await;
    Ok(())
}

async fn doctor(cfg: &AppConfig, cfg_path: &Path) -> Result<()> {
    println!("== nowplaying-sync doctor ==");
    println!(
        "Config file: {} ({})",
        cfg_path.display(),
        if cfg_path.exists() {
            "found"
        } else {
            "missing, using defaults"
        }
    );
    println!("Source: {} (user {})", cfg.source.kind, cfg.source.user);
    println!("Endpoint: {}", cfg.source.endpoint);

    let cache = cache_store(cfg);
    match cache.path() {
        Some(path) => {
            println!("Cache file: {}", path.display());
            match cache.load() {
                Some(entry) => {
                    let age_ms = now_millis().saturating_sub(entry.cached_at);
                    let fresh = entry.is_fresh(now_millis(), cfg.intervals.cache_freshness_ms);
                    println!(
                        "Cache entry: {} - {} ({}s old, {})",
                        entry.snapshot.artist,
                        entry.snapshot.title,
                        age_ms / 1_000,
                        if fresh { "fresh" } else { "stale" }
                    );
                }
                None => println!("Cache entry: <none>"),
            }
        }
        None => println!("Cache: disabled"),
    }

    let mut source = build_source(cfg).context("failed to build track source")?;
    match source.fetch_latest().await {
        Ok(Some(track)) => println!(
            "Fetch: ok, {} - {}{}",
            track.artist,
            track.title,
            if track.is_playing { " (now playing)" } else { "" }
        ),
        Ok(None) => println!("Fetch: ok, no tracks reported"),
        Err(err) => println!("Fetch: failed ({:?}): {err}", err.kind()),
    }

    Ok(())
}

async fn status(cfg: &AppConfig) -> Result<()> {
    let mut source = build_source(cfg).context("failed to build track source")?;

    println!("source: {}", source.name());
    match source.fetch_latest().await {
        Ok(Some(track)) => {
            println!(
                "state: {}",
                if track.is_playing {
                    "playing"
                } else {
                    "recently played"
                }
            );
            println!("track: {} - {}", track.artist, track.title);
            if !track.album.is_empty() {
                println!("album: {}", track.album);
            }
            println!("artwork: {}", track.artwork_url);
            println!("url: {}", track.source_url);
        }
        Ok(None) => println!("track: <none>"),
        Err(err) => println!("error: {err}"),
    }

    Ok(())
}

fn render(state: &SyncState) {
    match state {
        SyncState::Idle => println!("idle"),
        SyncState::Loading => println!("loading..."),
        SyncState::Ready(Some(track)) => {
            let label = if track.is_playing {
                "now playing"
            } else {
                "last played"
            };
            println!("{label}: {} - {}", track.artist, track.title);
            if !track.album.is_empty() {
                println!("  album: {}", track.album);
            }
            println!("  {}", track.source_url);
        }
        SyncState::Ready(None) => println!("nothing played yet"),
        SyncState::Error(message) => println!("error: {message} (type `retry` to try again)"),
    }
}

fn build_scheduler(cfg: &AppConfig) -> Result<Scheduler> {
    let source = build_source(cfg).context("failed to build track source")?;
    Ok(Scheduler::new(
        source,
        cache_store(cfg),
        SchedulerConfig::from_app_config(cfg),
    ))
}

fn cache_store(cfg: &AppConfig) -> CacheStore {
    if !cfg.cache.enabled {
        return CacheStore::disabled();
    }
    let dir = cfg.cache.dir.clone().unwrap_or_else(default_cache_dir);
    CacheStore::new(dir, &cfg.cache_key())
}

fn default_config_path() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("nowplaying-sync").join("config.toml")
}

fn default_cache_dir() -> PathBuf {
    let base = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("nowplaying-sync")
}

fn init_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {}", parent.display()))?;
    }
    let cfg = AppConfig::default();
    let toml = toml::to_string_pretty(&cfg)?;
    std::fs::write(path, toml)
        .with_context(|| format!("failed to write config file {}", path.display()))?;
    Ok(())
}

fn load_or_default(path: &Path) -> Result<AppConfig> {
    let mut cfg = if !path.exists() {
        AppConfig::default()
    } else {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))?
    };
    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
    Ok(cfg)
}

fn init_logging(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn spawn_reload_watchers(path: PathBuf, poll_ms: u64, tx: mpsc::Sender<()>) -> Result<()> {
    let tx_poll = tx.clone();
    tokio::spawn(async move {
        let mut known_mtime = file_mtime(&path);
        let sleep = Duration::from_millis(poll_ms.max(2_000));
        loop {
            tokio::time::sleep(sleep).await;
            let current = file_mtime(&path);
            if current.is_some() && current != known_mtime {
                known_mtime = current;
                if tx_poll.send(()).await.is_err() {
                    break;
                }
            }
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let tx_hup = tx.clone();
        tokio::spawn(async move {
            if let Ok(mut sig) = signal(SignalKind::hangup()) {
                while sig.recv().await.is_some() {
                    if tx_hup.send(()).await.is_err() {
                        break;
                    }
                }
            }
        });
    }

    Ok(())
}

fn file_mtime(path: &Path) -> Option<std::time::SystemTime> {
    std::fs::metadata(path).ok()?.modified().ok()
}

fn apply_env_overrides(cfg: &mut AppConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("NOWPLAYING_SYNC_API_KEY") {
        if !v.trim().is_empty() {
            cfg.source.api_key = v;
        }
    }
    if let Some(v) = var("NOWPLAYING_SYNC_USER") {
        if !v.trim().is_empty() {
            cfg.source.user = v;
        }
    }
    if let Some(v) = var("NOWPLAYING_SYNC_LOG_LEVEL") {
        if !v.trim().is_empty() {
            cfg.log_level = v;
        }
    }
}
