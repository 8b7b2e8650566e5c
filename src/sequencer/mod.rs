//! Queue cursor and track transitions
//!
//! The sequencer owns the queue and runs every transition: manual advance
//! calls from the control surface, forced advance after removing the live
//! entry, and the auto-advance the stream side requests when a track drains
//! naturally. All transitions funnel through [`SharedState::begin_transition`];
//! a call arriving while another transition is in flight is dropped, not
//! queued.
//!
//! A transition is: tear the current session down, move the cursor, resolve
//! the new focus (cache first), bring up a fresh stream listener, and hand
//! the playback daemon off to it.

pub mod preload;

use crate::cache::{ResolutionCache, ResolvedMedia};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{EventBus, RelayEvent};
use crate::player::PlayerClient;
use crate::relay::{SessionHooks, StreamServer, TranscoderSlot};
use crate::renderer::RendererMonitor;
use crate::resolver::{format_looks_suspicious, resolve_with_fallback, MediaResolver};
use crate::songlog::{LogEntry, SongLog};
use crate::state::SharedState;
use chrono::Utc;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

/// One queued track reference
#[derive(Debug, Clone)]
pub struct QueueEntry {
    /// Free-text reference, also the resolution-cache key
    pub query: String,
    /// Display-only suffix from the reference log
    pub meta: String,
}

impl From<LogEntry> for QueueEntry {
    fn from(e: LogEntry) -> Self {
        Self {
            query: e.query,
            meta: e.meta,
        }
    }
}

/// Result of removing a queue entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    OutOfBounds,
    /// Entry removed; `resume` is the renumbered index playback should move
    /// to when the removed entry was the live one
    Removed {
        was_current: bool,
        resume: Option<usize>,
    },
}

/// Queue contents plus cursor. Pure bookkeeping, no I/O; the sequencer
/// serializes access behind its own lock.
#[derive(Debug, Default)]
pub struct QueueState {
    entries: Vec<QueueEntry>,
    cursor: Option<usize>,
}

impl QueueState {
    pub fn replace(&mut self, entries: Vec<QueueEntry>) {
        self.cursor = if entries.is_empty() { None } else { Some(0) };
        self.entries = entries;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = None;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn get(&self, index: usize) -> Option<&QueueEntry> {
        self.entries.get(index)
    }

    /// Move the cursor forward. At the last entry the cursor stays put and
    /// the call reports the boundary with `None`.
    pub fn advance(&mut self) -> Option<usize> {
        match self.cursor {
            None if !self.entries.is_empty() => {
                self.cursor = Some(0);
                Some(0)
            }
            Some(i) if i + 1 < self.entries.len() => {
                self.cursor = Some(i + 1);
                Some(i + 1)
            }
            _ => None,
        }
    }

    /// Move the cursor backward; `None` at the first entry.
    pub fn retreat(&mut self) -> Option<usize> {
        match self.cursor {
            Some(i) if i > 0 => {
                self.cursor = Some(i - 1);
                Some(i - 1)
            }
            _ => None,
        }
    }

    pub fn jump(&mut self, index: usize) -> bool {
        if index < self.entries.len() {
            self.cursor = Some(index);
            true
        } else {
            false
        }
    }

    /// Remove one entry and renumber. Removing above the cursor shifts it
    /// down by one; removing the cursor itself resumes at the entry that
    /// slid into its slot, or the new last entry when the tail was removed.
    pub fn remove(&mut self, index: usize) -> RemoveOutcome {
        if index >= self.entries.len() {
            return RemoveOutcome::OutOfBounds;
        }
        self.entries.remove(index);
        let Some(cursor) = self.cursor else {
            return RemoveOutcome::Removed {
                was_current: false,
                resume: None,
            };
        };
        if cursor > index {
            self.cursor = Some(cursor - 1);
            RemoveOutcome::Removed {
                was_current: false,
                resume: None,
            }
        } else if cursor == index {
            if self.entries.is_empty() {
                self.cursor = None;
                RemoveOutcome::Removed {
                    was_current: true,
                    resume: None,
                }
            } else {
                let resume = index.min(self.entries.len() - 1);
                self.cursor = Some(resume);
                RemoveOutcome::Removed {
                    was_current: true,
                    resume: Some(resume),
                }
            }
        } else {
            RemoveOutcome::Removed {
                was_current: false,
                resume: None,
            }
        }
    }

    pub fn snapshot(&self) -> (Vec<QueueEntry>, Option<usize>) {
        (self.entries.clone(), self.cursor)
    }
}

/// Service object driving queue playback
pub struct Sequencer {
    config: Config,
    state: Arc<SharedState>,
    events: EventBus,
    resolver: Arc<dyn MediaResolver>,
    cache: Arc<ResolutionCache>,
    renderer: Arc<RendererMonitor>,
    player: Arc<PlayerClient>,
    queue: StdMutex<QueueState>,
    slot: TranscoderSlot,
    server: Mutex<Option<StreamServer>>,
    advance_tx: mpsc::Sender<()>,
    preload_tx: mpsc::UnboundedSender<preload::PreloadBatch>,
}

impl Sequencer {
    /// Build the sequencer and spawn its background workers: the preload
    /// worker and the auto-advance loop.
    pub fn start(
        config: Config,
        state: Arc<SharedState>,
        events: EventBus,
        resolver: Arc<dyn MediaResolver>,
        cache: Arc<ResolutionCache>,
        renderer: Arc<RendererMonitor>,
        player: Arc<PlayerClient>,
    ) -> Arc<Self> {
        let (advance_tx, advance_rx) = mpsc::channel(4);
        let preload_tx = preload::spawn(
            Arc::clone(&resolver),
            Arc::clone(&cache),
            events.clone(),
            Duration::from_secs(config.resolver_timeout_secs),
            Duration::from_millis(config.preload_delay_ms),
        );
        let seq = Arc::new(Self {
            config,
            state,
            events,
            resolver,
            cache,
            renderer,
            player,
            queue: StdMutex::new(QueueState::default()),
            slot: Arc::new(Mutex::new(None)),
            server: Mutex::new(None),
            advance_tx,
            preload_tx,
        });
        tokio::spawn(Arc::clone(&seq).run_advance_loop(advance_rx));
        seq
    }

    /// Collaborator bundle the stream side needs for its end-of-session path
    fn hooks(&self) -> SessionHooks {
        SessionHooks {
            state: Arc::clone(&self.state),
            renderer: Arc::clone(&self.renderer),
            player: Arc::clone(&self.player),
            advance_tx: self.advance_tx.clone(),
            events: self.events.clone(),
        }
    }

    /// Rebuild the queue from the reference log, prune stale cache records,
    /// queue a preload pass and start the newest entry. The whole rebuild,
    /// replacement included, runs under the transition permit; a busy guard
    /// drops the entire operation.
    pub async fn enqueue_log(&self) -> Result<()> {
        let Some(_permit) = SharedState::begin_transition(&self.state) else {
            self.drop_busy("enqueue");
            return Ok(());
        };

        let log = SongLog::new(self.config.songlog_path());
        let entries = log.load()?;
        info!(count = entries.len(), "queue rebuilt from reference log");

        let valid = SongLog::valid_queries(&entries);
        match self.cache.prune(&valid).await {
            Ok(removed) if removed > 0 => debug!(removed, "pruned stale cache records"),
            Ok(_) => {}
            Err(e) => warn!("cache prune failed: {}", e),
        }

        let queue_entries: Vec<QueueEntry> = entries.into_iter().map(Into::into).collect();
        let queries: Vec<String> = queue_entries.iter().map(|e| e.query.clone()).collect();
        {
            let mut q = self.queue.lock().unwrap();
            q.replace(queue_entries);
        }
        self.emit_queue_changed();

        if queries.is_empty() {
            self.events.emit_lossy(RelayEvent::EndOfQueue {
                timestamp: Utc::now(),
            });
            return Ok(());
        }
        // Entry 0 is resolved by the foreground start below
        if queries.len() > 1 && self.preload_tx.send(queries[1..].to_vec()).is_err() {
            warn!("preload worker gone, skipping warm-up");
        }

        self.state.set_manual_skip(true);
        self.stop_session().await;
        self.start_from(0).await
    }

    /// Advance to the next entry; dropped when a transition is in flight.
    pub async fn next(&self) -> Result<()> {
        let Some(_permit) = SharedState::begin_transition(&self.state) else {
            self.drop_busy("next");
            return Ok(());
        };
        self.state.set_manual_skip(true);
        self.stop_session().await;
        let target = self.queue.lock().unwrap().advance();
        match target {
            Some(index) => self.start_from(index).await,
            None => {
                debug!("advance past the last entry");
                self.state.reset_manual_flags();
                self.events.emit_lossy(RelayEvent::EndOfQueue {
                    timestamp: Utc::now(),
                });
                Ok(())
            }
        }
    }

    /// Step back to the previous entry; dropped when a transition is in
    /// flight.
    pub async fn previous(&self) -> Result<()> {
        let Some(_permit) = SharedState::begin_transition(&self.state) else {
            self.drop_busy("previous");
            return Ok(());
        };
        self.state.set_manual_skip(true);
        self.stop_session().await;
        let target = self.queue.lock().unwrap().retreat();
        match target {
            Some(index) => self.start_from(index).await,
            None => {
                debug!("retreat before the first entry");
                self.state.reset_manual_flags();
                self.events.emit_lossy(RelayEvent::TopOfQueue {
                    timestamp: Utc::now(),
                });
                Ok(())
            }
        }
    }

    /// Jump directly to a queue position.
    pub async fn play_at(&self, index: usize) -> Result<()> {
        let Some(_permit) = SharedState::begin_transition(&self.state) else {
            self.drop_busy("play-at");
            return Ok(());
        };
        if !self.queue.lock().unwrap().jump(index) {
            return Err(Error::Queue(format!("no queue entry at index {index}")));
        }
        self.state.set_manual_skip(true);
        self.stop_session().await;
        self.start_from(index).await
    }

    /// Stop playback, keeping queue and cursor.
    pub async fn stop(&self) -> Result<()> {
        let Some(_permit) = SharedState::begin_transition(&self.state) else {
            self.drop_busy("stop");
            return Ok(());
        };
        self.state.set_manual_stop(true);
        self.stop_session().await;
        self.state.reset_manual_flags();
        self.events.emit_lossy(RelayEvent::StreamStopped {
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Remove a queue entry. Removing the live entry forces an advance to
    /// the entry that takes its slot. A non-live removal mutates in one lock
    /// acquisition; a live removal needs the transition permit first, since
    /// only permit holders may move the cursor, and the check is repeated
    /// under the same lock as the removal so a cursor that moved onto the
    /// index in the meantime cannot slip through the unguarded branch.
    pub async fn remove(&self, index: usize) -> Result<()> {
        let is_current = {
            let mut q = self.queue.lock().unwrap();
            if index >= q.len() {
                return Err(Error::Queue(format!("no queue entry at index {index}")));
            }
            if q.cursor() != Some(index) {
                q.remove(index);
                false
            } else {
                true
            }
        };
        if is_current {
            return self.remove_current(index).await;
        }
        self.emit_queue_changed();
        Ok(())
    }

    async fn remove_current(&self, index: usize) -> Result<()> {
        let Some(_permit) = SharedState::begin_transition(&self.state) else {
            self.drop_busy("remove");
            return Ok(());
        };
        // Cursor is pinned while the permit is held; recheck and remove in
        // one lock acquisition.
        let outcome = {
            let mut q = self.queue.lock().unwrap();
            q.remove(index)
        };
        match outcome {
            RemoveOutcome::OutOfBounds => {
                Err(Error::Queue(format!("no queue entry at index {index}")))
            }
            RemoveOutcome::Removed {
                was_current: false, ..
            } => {
                self.emit_queue_changed();
                Ok(())
            }
            RemoveOutcome::Removed {
                was_current: true,
                resume,
            } => {
                self.emit_queue_changed();
                self.state.set_manual_skip(true);
                self.stop_session().await;
                match resume {
                    Some(next) => self.start_from(next).await,
                    None => {
                        self.state.reset_manual_flags();
                        self.events.emit_lossy(RelayEvent::EndOfQueue {
                            timestamp: Utc::now(),
                        });
                        Ok(())
                    }
                }
            }
        }
    }

    /// Empty the queue. Fails fast with [`Error::Busy`] instead of dropping
    /// silently; callers surface this as a retryable conflict.
    pub async fn clear(&self) -> Result<()> {
        let Some(_permit) = SharedState::begin_transition(&self.state) else {
            return Err(Error::Busy);
        };
        self.state.set_manual_stop(true);
        self.stop_session().await;
        self.state.reset_manual_flags();
        self.queue.lock().unwrap().clear();
        self.emit_queue_changed();
        Ok(())
    }

    /// Current queue contents and cursor for the control surface
    pub fn queue_snapshot(&self) -> (Vec<QueueEntry>, Option<usize>) {
        self.queue.lock().unwrap().snapshot()
    }

    fn drop_busy(&self, op: &str) {
        debug!(op, "transition in flight, call dropped");
        self.events.emit_lossy(RelayEvent::TransitionBusy {
            op: op.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn emit_queue_changed(&self) {
        let (len, cursor) = {
            let q = self.queue.lock().unwrap();
            (q.len(), q.cursor())
        };
        self.events.emit_lossy(RelayEvent::QueueChanged {
            len,
            cursor,
            timestamp: Utc::now(),
        });
    }

    /// Tear down the live session: transcoder first so the end-of-session
    /// path finds its slot empty and stays out of the advance decision, then
    /// the daemon, then the listener with a bounded port-release wait.
    async fn stop_session(&self) {
        if let Some(session) = self.slot.lock().await.take() {
            session.shutdown().await;
        }
        if let Err(e) = self.player.stop().await {
            debug!("daemon stop failed: {}", e);
        }
        if let Some(server) = self.server.lock().await.take() {
            server.stop().await;
        }
    }

    /// Resolve the entry at `index` and bring up playback for it. On a
    /// definitive resolution failure the cursor walks forward until an entry
    /// resolves or the queue ends.
    async fn start_from(&self, index: usize) -> Result<()> {
        if self.renderer.is_renderer_active().await {
            info!("external renderer active, not starting playback");
            self.state.reset_manual_flags();
            self.events.emit_lossy(RelayEvent::RendererPreempted {
                timestamp: Utc::now(),
            });
            return Ok(());
        }

        let profile = self.config.active_profile().clone();
        if format_looks_suspicious(&profile.selector) {
            warn!(profile = %profile.id, selector = %profile.selector, "bare format selector");
            self.events.emit_lossy(RelayEvent::FormatWarning {
                profile: profile.id.clone(),
                descriptor: profile.selector.clone(),
                timestamp: Utc::now(),
            });
        }

        let mut index = index;
        let media = loop {
            let (query, total) = {
                let q = self.queue.lock().unwrap();
                let Some(entry) = q.get(index) else {
                    self.state.reset_manual_flags();
                    return Err(Error::Queue(format!("no queue entry at index {index}")));
                };
                (entry.query.clone(), q.len())
            };

            self.events.emit_lossy(RelayEvent::Resolving {
                query: query.clone(),
                timestamp: Utc::now(),
            });
            match self.resolve_entry(&query).await {
                Ok(media) => break (media, query, total),
                Err(e) => {
                    warn!(query = %query, "resolution failed: {}", e);
                    self.events.emit_lossy(RelayEvent::ResolveFailed {
                        query,
                        reason: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    match self.queue.lock().unwrap().advance() {
                        Some(next) => index = next,
                        None => {
                            self.state.reset_manual_flags();
                            self.events.emit_lossy(RelayEvent::EndOfQueue {
                                timestamp: Utc::now(),
                            });
                            return Ok(());
                        }
                    }
                }
            }
        };
        let (media, _query, total) = media;

        if self.renderer.is_renderer_active().await {
            info!("external renderer active, not starting playback");
            self.state.reset_manual_flags();
            self.events.emit_lossy(RelayEvent::RendererPreempted {
                timestamp: Utc::now(),
            });
            return Ok(());
        }

        let title = media.title.clone();
        let artist = media.artist.clone();
        let server = StreamServer::start(
            self.config.stream_port,
            media,
            profile,
            self.config.transcoder_command.clone(),
            Arc::clone(&self.slot),
            self.hooks(),
        )
        .await
        .map_err(|e| {
            error!("stream listener failed to start: {}", e);
            self.events.emit_lossy(RelayEvent::PlayerError {
                reason: e.to_string(),
                timestamp: Utc::now(),
            });
            e
        })?;
        *self.server.lock().await = Some(server);

        if let Err(e) = self.player.start_session(self.config.stream_port).await {
            error!("daemon handoff failed: {}", e);
            self.events.emit_lossy(RelayEvent::PlayerError {
                reason: e.to_string(),
                timestamp: Utc::now(),
            });
            if let Some(server) = self.server.lock().await.take() {
                server.stop().await;
            }
            self.state.reset_manual_flags();
            return Err(e);
        }

        self.state.reset_manual_flags();
        info!(title = %title, artist = %artist, position = index + 1, "track started");
        self.events.emit_lossy(RelayEvent::TrackStarted {
            title,
            artist,
            position: index + 1,
            total,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Cache-first resolution; fresh results are persisted before use.
    async fn resolve_entry(&self, query: &str) -> Result<ResolvedMedia> {
        let now = Utc::now().timestamp();
        if let Some(media) = self.cache.get(query).await {
            if media.is_valid_at(now) {
                debug!(query, "serving from resolution cache");
                return Ok(media);
            }
        }
        let timeout = Duration::from_secs(self.config.resolver_timeout_secs);
        let media = resolve_with_fallback(&*self.resolver, query, timeout).await?;
        if let Err(e) = self.cache.put(query.to_string(), media.clone()).await {
            warn!(query, "resolved record not persisted: {}", e);
        }
        Ok(media)
    }

    /// Consume auto-advance requests from the stream side. Each request is
    /// a full transition; one in flight drops the rest.
    async fn run_advance_loop(self: Arc<Self>, mut rx: mpsc::Receiver<()>) {
        while rx.recv().await.is_some() {
            let Some(_permit) = SharedState::begin_transition(&self.state) else {
                self.drop_busy("auto-advance");
                continue;
            };
            self.stop_session().await;
            let target = self.queue.lock().unwrap().advance();
            match target {
                Some(index) => {
                    if let Err(e) = self.start_from(index).await {
                        warn!("auto-advance failed: {}", e);
                    }
                }
                None => {
                    info!("queue drained");
                    self.events.emit_lossy(RelayEvent::EndOfQueue {
                        timestamp: Utc::now(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(n: usize) -> Vec<QueueEntry> {
        (0..n)
            .map(|i| QueueEntry {
                query: format!("artist {i} - track {i}"),
                meta: String::new(),
            })
            .collect()
    }

    #[test]
    fn replace_points_cursor_at_head() {
        let mut q = QueueState::default();
        q.replace(entries(3));
        assert_eq!(q.cursor(), Some(0));
        q.replace(Vec::new());
        assert_eq!(q.cursor(), None);
    }

    #[test]
    fn advance_stops_at_tail() {
        let mut q = QueueState::default();
        q.replace(entries(2));
        assert_eq!(q.advance(), Some(1));
        assert_eq!(q.advance(), None);
        assert_eq!(q.cursor(), Some(1));
    }

    #[test]
    fn retreat_stops_at_head() {
        let mut q = QueueState::default();
        q.replace(entries(2));
        assert_eq!(q.retreat(), None);
        assert_eq!(q.cursor(), Some(0));
        q.advance();
        assert_eq!(q.retreat(), Some(0));
    }

    #[test]
    fn jump_rejects_out_of_bounds() {
        let mut q = QueueState::default();
        q.replace(entries(3));
        assert!(q.jump(2));
        assert_eq!(q.cursor(), Some(2));
        assert!(!q.jump(3));
        assert_eq!(q.cursor(), Some(2));
    }

    #[test]
    fn remove_above_cursor_shifts_it_down() {
        let mut q = QueueState::default();
        q.replace(entries(3));
        q.jump(2);
        let outcome = q.remove(0);
        assert_eq!(
            outcome,
            RemoveOutcome::Removed {
                was_current: false,
                resume: None
            }
        );
        assert_eq!(q.cursor(), Some(1));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn remove_current_resumes_at_successor() {
        let mut q = QueueState::default();
        q.replace(entries(3));
        q.jump(1);
        let outcome = q.remove(1);
        assert_eq!(
            outcome,
            RemoveOutcome::Removed {
                was_current: true,
                resume: Some(1)
            }
        );
        assert_eq!(q.get(1).unwrap().query, "artist 2 - track 2");
    }

    #[test]
    fn remove_current_tail_resumes_at_new_tail() {
        let mut q = QueueState::default();
        q.replace(entries(3));
        q.jump(2);
        let outcome = q.remove(2);
        assert_eq!(
            outcome,
            RemoveOutcome::Removed {
                was_current: true,
                resume: Some(1)
            }
        );
        assert_eq!(q.cursor(), Some(1));
    }

    #[test]
    fn remove_last_entry_empties_queue() {
        let mut q = QueueState::default();
        q.replace(entries(1));
        let outcome = q.remove(0);
        assert_eq!(
            outcome,
            RemoveOutcome::Removed {
                was_current: true,
                resume: None
            }
        );
        assert_eq!(q.cursor(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn remove_out_of_bounds_is_reported() {
        let mut q = QueueState::default();
        q.replace(entries(1));
        assert_eq!(q.remove(5), RemoveOutcome::OutOfBounds);
        assert_eq!(q.len(), 1);
    }
}
