use crate::cache::CacheStore;
use crate::reconcile::{compute_diff, merge, DiffKind};
use crate::SchedulerConfig;
use nowplaying_sync_core::{now_millis, CacheEntry, SyncState, TrackSnapshot};
use nowplaying_sync_providers::{FetchError, TrackSource};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// What caused a fetch. Foreground failures surface as [`SyncState::Error`],
/// background failures are logged and otherwise ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FetchTrigger {
    Initial,
    Retry,
    Seed,
    Tick,
    Visibility,
}

impl FetchTrigger {
    pub(crate) fn is_foreground(self) -> bool {
        matches!(self, FetchTrigger::Initial | FetchTrigger::Retry)
    }
}

#[derive(Debug)]
enum Command {
    Retry,
    Visibility(bool),
}

pub struct Scheduler {
    cfg: SchedulerConfig,
    source: Box<dyn TrackSource>,
    cache: CacheStore,
    state_tx: watch::Sender<SyncState>,
}

impl Scheduler {
    pub fn new(source: Box<dyn TrackSource>, cache: CacheStore, cfg: SchedulerConfig) -> Self {
        let (state_tx, _) = watch::channel(SyncState::Idle);
        Self {
            cfg,
            source,
            cache,
            state_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state_tx.subscribe()
    }

    /// Publishes the first state and spawns the polling worker.
    ///
    /// A fresh cache entry is published as `Ready` before this returns, so
    /// consumers never see `Loading` when a usable seed exists. Must be
    /// called within a tokio runtime.
    pub fn start(self) -> SyncHandle {
        let window_ms = self.cfg.cache_freshness.as_millis() as u64;
        let seed = self
            .cache
            .load()
            .filter(|entry| entry.is_fresh(now_millis(), window_ms))
            .map(|entry| entry.snapshot);
        let seeded = seed.is_some();

        let first = if seeded {
            SyncState::Ready(seed.clone())
        } else {
            SyncState::Loading
        };
        self.state_tx.send_replace(first);

        info!(source = self.source.name(), seeded, "sync scheduler started");

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let state = self.state_tx.subscribe();
        let worker = Worker {
            cfg: self.cfg,
            source: self.source,
            cache: self.cache,
            state_tx: self.state_tx,
            held: seed,
            visible: true,
        };
        let task = tokio::spawn(worker.run(cmd_rx, seeded));

        SyncHandle {
            state,
            controller: SyncController { commands: cmd_tx },
            task: Some(task),
        }
    }
}

/// Owns a running scheduler. Dropping the handle aborts the worker.
pub struct SyncHandle {
    state: watch::Receiver<SyncState>,
    controller: SyncController,
    task: Option<JoinHandle<()>>,
}

impl SyncHandle {
    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.clone()
    }

    pub fn controller(&self) -> SyncController {
        self.controller.clone()
    }

    pub fn retry(&self) {
        self.controller.retry();
    }

    pub fn set_visible(&self, visible: bool) {
        self.controller.set_visible(visible);
    }

    /// Cancels the pending timer and any in-flight request and detaches
    /// the command inputs. No state is published after this resolves.
    pub async fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        info!("sync scheduler stopped");
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Cloneable command side of a [`SyncHandle`]; a no-op once stopped.
#[derive(Debug, Clone)]
pub struct SyncController {
    commands: mpsc::UnboundedSender<Command>,
}

impl SyncController {
    /// Forces a foreground fetch regardless of the poll timer.
    pub fn retry(&self) {
        let _ = self.commands.send(Command::Retry);
    }

    pub fn set_visible(&self, visible: bool) {
        let _ = self.commands.send(Command::Visibility(visible));
    }

    pub fn is_attached(&self) -> bool {
        !self.commands.is_closed()
    }
}

struct Worker {
    cfg: SchedulerConfig,
    source: Box<dyn TrackSource>,
    cache: CacheStore,
    state_tx: watch::Sender<SyncState>,
    held: Option<TrackSnapshot>,
    visible: bool,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, seeded: bool) {
        let mut deadline = if seeded {
            Instant::now() + self.cfg.seed_delay
        } else {
            self.fetch(FetchTrigger::Initial).await;
            Instant::now() + self.cadence()
        };
        let mut pending = if seeded {
            FetchTrigger::Seed
        } else {
            FetchTrigger::Tick
        };

        loop {
            tokio::select! {
                _ = sleep_until(deadline) => {
                    self.fetch(pending).await;
                    pending = FetchTrigger::Tick;
                    let cadence = self.cadence();
                    deadline = Instant::now() + cadence;
                    debug!(next_poll_ms = cadence.as_millis() as u64, "poll scheduled");
                }
                cmd = commands.recv() => {
                    let Some(cmd) = cmd else {
                        break;
                    };
                    let trigger = match cmd {
                        Command::Retry => FetchTrigger::Retry,
                        Command::Visibility(visible) => {
                            let became_visible = visible && !self.visible;
                            self.visible = visible;
                            if !became_visible {
                                continue;
                            }
                            FetchTrigger::Visibility
                        }
                    };

                    let before = self.cadence();
                    self.fetch(trigger).await;
                    let after = self.cadence();
                    if after != before {
                        deadline = Instant::now() + after;
                        debug!(next_poll_ms = after.as_millis() as u64, "cadence changed; poll rescheduled");
                    }
                }
            }
        }

        debug!("command channel closed; scheduler worker exiting");
    }

    fn cadence(&self) -> Duration {
        match &self.held {
            Some(track) if track.is_playing => self.cfg.playing_poll,
            _ => self.cfg.idle_poll,
        }
    }

    async fn fetch(&mut self, trigger: FetchTrigger) {
        debug!(source = self.source.name(), ?trigger, "fetching latest track");
        match self.source.fetch_latest().await {
            Ok(next) => self.apply(next),
            Err(err) => self.fail(trigger, err),
        }
    }

    fn apply(&mut self, next: Option<TrackSnapshot>) {
        if let Some(track) = &next {
            self.cache.save(&CacheEntry::new(track.clone(), now_millis()));
        }

        let diff = compute_diff(self.held.as_ref(), next.as_ref());
        self.held = merge(self.held.take(), next);

        let state = SyncState::Ready(self.held.clone());
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });

        if changed {
            match (&self.held, diff) {
                (Some(track), _) => info!(
                    title = %track.title,
                    artist = %track.artist,
                    playing = track.is_playing,
                    ?diff,
                    "now playing updated"
                ),
                (None, DiffKind::Cleared) => info!("now playing cleared"),
                (None, _) => info!("no track reported"),
            }
        }
    }

    fn fail(&mut self, trigger: FetchTrigger, err: FetchError) {
        if trigger.is_foreground() {
            warn!(error = %err, ?trigger, "foreground fetch failed");
            let state = SyncState::Error(err.to_string());
            self.state_tx.send_if_modified(|current| {
                if *current == state {
                    return false;
                }
                *current = state;
                true
            });
        } else {
            warn!(error = %err, ?trigger, "background fetch failed; keeping last snapshot");
        }
    }
}
