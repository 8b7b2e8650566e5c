//! Per-track stream listener
//!
//! One fixed local TCP port, exactly one path serving `audio/mpeg`; every
//! other path is 404. A TranscodeSession is started lazily per accepted
//! request, never ahead of it. The listener is torn down and rebound per
//! track; release is not instantaneous, so rebinders poll with a bound.

use crate::cache::ResolvedMedia;
use crate::config::StreamProfile;
use crate::error::{Error, Result};
use crate::events::{EventBus, RelayEvent};
use crate::player::PlayerClient;
use crate::relay::transcode::{forward_chunks, StreamEnd, TranscodeSession};
use crate::renderer::RendererMonitor;
use crate::state::SharedState;
use chrono::Utc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

/// The one path the relay serves
pub const STREAM_PATH: &str = "/stream.mp3";

const STOP_WAIT: Duration = Duration::from_secs(4);
const PORT_RELEASE_ATTEMPTS: u32 = 20;
const PORT_RELEASE_DELAY: Duration = Duration::from_millis(200);

/// Shared slot holding the live transcoder, so user-driven teardown and the
/// session's own end path both reach it. At most one is ever present.
pub type TranscoderSlot = Arc<Mutex<Option<TranscodeSession>>>;

/// Collaborators the end-of-session decision needs
#[derive(Clone)]
pub struct SessionHooks {
    pub state: Arc<SharedState>,
    pub renderer: Arc<RendererMonitor>,
    pub player: Arc<PlayerClient>,
    /// Auto-advance request channel into the sequencer
    pub advance_tx: mpsc::Sender<()>,
    pub events: EventBus,
}

struct StreamContext {
    media: ResolvedMedia,
    profile: StreamProfile,
    transcoder_command: String,
    slot: TranscoderSlot,
    hooks: SessionHooks,
    /// Held by the live session; a second concurrent request finds it taken
    serving: Arc<Mutex<()>>,
}

/// Single-endpoint listener bound to the currently resolved URL
pub struct StreamServer {
    port: u16,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl StreamServer {
    /// Bind the stream port and start serving the resolved media
    pub async fn start(
        port: u16,
        media: ResolvedMedia,
        profile: StreamProfile,
        transcoder_command: String,
        slot: TranscoderSlot,
        hooks: SessionHooks,
    ) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|_| Error::PortBusy(port))?;

        let ctx = Arc::new(StreamContext {
            media,
            profile,
            transcoder_command,
            slot,
            hooks,
            serving: Arc::new(Mutex::new(())),
        });

        let app = Router::new()
            .route(STREAM_PATH, get(stream_handler))
            .fallback(not_found)
            .with_state(ctx);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });
        let task = tokio::spawn(async move {
            if let Err(e) = serve.await {
                warn!("stream listener error: {}", e);
            }
        });
        info!(port, "stream endpoint up");
        Ok(Self {
            port,
            shutdown_tx,
            task,
        })
    }

    /// Shut the listener down and wait, bounded, for the port to release.
    /// Binding anew while an old listener drains must never corrupt an
    /// already-open session, so teardown of the transcoder happens before
    /// this is called.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let mut task = self.task;
        if tokio::time::timeout(STOP_WAIT, &mut task).await.is_err() {
            warn!("stream listener did not drain in time, aborting");
            task.abort();
        }
        wait_port_released(self.port).await;
    }
}

/// Poll until nothing accepts on `port` any more, bounded to ~4 s
pub async fn wait_port_released(port: u16) {
    for _ in 0..PORT_RELEASE_ATTEMPTS {
        match TcpStream::connect(("127.0.0.1", port)).await {
            Err(_) => return,
            Ok(_) => tokio::time::sleep(PORT_RELEASE_DELAY).await,
        }
    }
    warn!(port, "stream port still busy after release wait");
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn stream_handler(State(ctx): State<Arc<StreamContext>>) -> Response {
    // At most one StreamSession alive
    let Ok(serving) = Arc::clone(&ctx.serving).try_lock_owned() else {
        debug!("second concurrent stream request refused");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    let mut session = match TranscodeSession::spawn(
        &ctx.transcoder_command,
        &ctx.media.url,
        &ctx.profile.bitrate,
        &ctx.media.title,
    ) {
        Ok(session) => session,
        Err(e) => {
            error!("transcoder start failed: {}", e);
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };
    let Some(mut stdout) = session.take_stdout() else {
        error!("transcoder came up without an output pipe");
        return StatusCode::BAD_GATEWAY.into_response();
    };
    *ctx.slot.lock().await = Some(session);
    debug!(title = %ctx.media.title, "transcode session started");

    let (tx, rx) = mpsc::channel(8);
    let ctx = Arc::clone(&ctx);
    tokio::spawn(async move {
        let _serving = serving;
        let end = forward_chunks(&mut stdout, &tx).await;
        finish_session(ctx, end).await;
    });

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    ([(header::CONTENT_TYPE, "audio/mpeg")], body).into_response()
}

/// End-of-session path. An empty transcoder slot means the sequencer is
/// already tearing this session down and owns the transition; only a
/// natural end (slot still holding our session) gets an advance decision,
/// read from the flags as they are *now*, not as they were when the
/// request started.
async fn finish_session(ctx: Arc<StreamContext>, end: StreamEnd) {
    debug!(?end, "stream session ended");

    let Some(session) = ctx.slot.lock().await.take() else {
        debug!("teardown already in progress, leaving the decision to it");
        return;
    };
    if let Err(e) = ctx.hooks.player.stop().await {
        debug!("daemon stop at session end failed: {}", e);
    }
    session.shutdown().await;

    let manual_skip = ctx.hooks.state.manual_skip();
    let manual_stop = ctx.hooks.state.manual_stop();
    let preempted = ctx.hooks.renderer.is_renderer_active().await;
    if preempted {
        info!("external renderer took the output, holding playback");
        ctx.hooks.events.emit_lossy(RelayEvent::RendererPreempted {
            timestamp: Utc::now(),
        });
    }
    if !manual_skip && !manual_stop && !preempted {
        let _ = ctx.hooks.advance_tx.send(()).await;
    } else {
        debug!(manual_skip, manual_stop, preempted, "auto-advance suppressed");
    }
    ctx.hooks.state.reset_manual_flags();
}
