//! Shared harness for integration tests: scripted resolver, fake playback
//! daemon and a fully wired sequencer over a temp root folder.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use lumen_sr::cache::{ResolutionCache, ResolvedMedia};
use lumen_sr::config::{builtin_profiles, Config};
use lumen_sr::error::{Error, Result};
use lumen_sr::events::{EventBus, RelayEvent};
use lumen_sr::player::PlayerClient;
use lumen_sr::renderer::RendererMonitor;
use lumen_sr::resolver::MediaResolver;
use lumen_sr::sequencer::Sequencer;
use lumen_sr::state::SharedState;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};

/// Resolver answering every query with a synthetic playable record; queries
/// containing `"unresolvable"` fail on both attempts. With a gate installed,
/// every query except the named pass-through blocks until permits arrive,
/// so tests can observe what resolves in the foreground versus later.
pub struct ScriptedResolver {
    pub calls: AtomicUsize,
    pub completed: AtomicUsize,
    gate: Option<(Arc<Semaphore>, String)>,
}

impl ScriptedResolver {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            gate: None,
        }
    }

    pub fn gated(pass: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            gate: Some((Arc::new(Semaphore::new(0)), pass.to_string())),
        }
    }

    pub fn release_gate(&self, permits: usize) {
        if let Some((gate, _)) = &self.gate {
            gate.add_permits(permits);
        }
    }
}

#[async_trait]
impl MediaResolver for ScriptedResolver {
    async fn resolve(&self, query: &str, _timeout: Duration) -> Result<ResolvedMedia> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((gate, pass)) = &self.gate {
            if query != pass {
                gate.acquire().await.expect("gate closed").forget();
            }
        }
        if query.contains("unresolvable") {
            return Err(Error::Resolution {
                query: query.to_string(),
                reason: "no match".into(),
            });
        }
        let (artist, title) = query
            .split_once(" - ")
            .map(|(a, t)| (a.to_string(), t.to_string()))
            .unwrap_or_else(|| ("unknown".into(), query.to_string()));
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(ResolvedMedia {
            title,
            artist,
            album: None,
            duration: Some(180.0),
            url: format!("https://cdn.example/{}", query.replace(' ', "_")),
            format: Some("m4a audio only".into()),
            resolved: true,
            timestamp: Utc::now(),
            expires: None,
            expire_ts: None,
        })
    }
}

/// Fake playback daemon answering OK to every command
pub async fn fake_daemon() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                if socket.write_all(b"OK MPD 0.23.5\n").await.is_err() {
                    return;
                }
                let mut buf = vec![0u8; 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(_) => {
                            if socket.write_all(b"OK\n").await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });
    port
}

/// Grab an ephemeral port and release it for the code under test
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub struct Harness {
    pub sequencer: Arc<Sequencer>,
    pub state: Arc<SharedState>,
    pub events: EventBus,
    pub resolver: Arc<ScriptedResolver>,
    pub root: PathBuf,
    _dir: tempfile::TempDir,
}

pub async fn harness_with_log(lines: &[&str]) -> Harness {
    build_harness(lines, Arc::new(ScriptedResolver::new())).await
}

/// Harness whose resolver blocks every query except `pass` until the test
/// opens the gate
pub async fn harness_gated(lines: &[&str], pass: &str) -> Harness {
    build_harness(lines, Arc::new(ScriptedResolver::gated(pass))).await
}

async fn build_harness(lines: &[&str], resolver: Arc<ScriptedResolver>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    if !lines.is_empty() {
        let mut f = std::fs::File::create(root.join("songlog.txt")).unwrap();
        for line in lines {
            writeln!(f, "{}", line).unwrap();
        }
    }

    let daemon_port = fake_daemon().await;
    let stream_port = free_port().await;

    let config = Config {
        control_port: 0,
        stream_port,
        root_folder: root.clone(),
        system_db: None,
        resolver_command: "yt-dlp".into(),
        resolver_timeout_secs: 5,
        transcoder_command: "ffmpeg".into(),
        profile: "standard".into(),
        profiles: builtin_profiles(),
        player_host: "127.0.0.1".into(),
        player_port: daemon_port,
        player_source: "RADIO/Local Stream.pls".into(),
        preload_delay_ms: 10,
    };

    let state = SharedState::new();
    let events = EventBus::new(64);
    let cache = Arc::new(ResolutionCache::open(root.join("resolve_cache.json")));
    let renderer = Arc::new(RendererMonitor::connect(None).await);
    let player = Arc::new(PlayerClient::new(
        "127.0.0.1".into(),
        daemon_port,
        "RADIO/Local Stream.pls".into(),
    ));

    let sequencer = Sequencer::start(
        config,
        Arc::clone(&state),
        events.clone(),
        Arc::clone(&resolver) as Arc<dyn MediaResolver>,
        cache,
        renderer,
        player,
    );

    Harness {
        sequencer,
        state,
        events,
        resolver,
        root,
        _dir: dir,
    }
}

/// Wait for the first event matching `pred`, bounded to five seconds
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<RelayEvent>, pred: F) -> RelayEvent
where
    F: Fn(&RelayEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("event bus closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected event not observed")
}
