//! Transcoding process supervision
//!
//! One external transcoder process per accepted stream connection. The
//! resolved URL usually points at a time-limited edge server, so the process
//! is invoked with reconnect-tolerant parameters. Output is forwarded in
//! fixed-size chunks; roughly two seconds of consecutive empty reads is
//! end-of-stream.

use crate::error::{Error, Result};
use bytes::Bytes;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const CHUNK_SIZE: usize = 4096;
pub const EMPTY_READ_LIMIT: u32 = 20;
pub const EMPTY_READ_DELAY: Duration = Duration::from_millis(100);

const TERM_WAIT: Duration = Duration::from_secs(4);
const KILL_WAIT: Duration = Duration::from_secs(2);

/// Why a forwarding loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The source produced nothing for the empty-read window, or the
    /// process died: the track is over.
    SourceDrained,
    /// The HTTP client went away mid-stream; not an error
    ClientGone,
}

/// Supervises one transcoder process
pub struct TranscodeSession {
    child: Child,
}

impl TranscodeSession {
    /// Spawn the transcoder against a resolved URL. `audio/mpeg` out on
    /// stdout, reconnect-tolerant input, stderr discarded.
    pub fn spawn(command: &str, url: &str, bitrate: &str, title: &str) -> Result<Self> {
        let child = Command::new(command)
            .args(["-re", "-fflags", "+discardcorrupt"])
            .args(["-reconnect", "1", "-reconnect_streamed", "1", "-reconnect_delay_max", "2"])
            .args(["-i", url])
            .arg("-vn")
            .args(["-c:a", "libmp3lame", "-b:a", bitrate])
            .args(["-metadata", &format!("title={}", title)])
            .args(["-f", "mp3", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Transcode(format!("failed to spawn {}: {}", command, e)))?;
        debug!(bitrate, "transcoder spawned");
        Ok(Self { child })
    }

    /// Hand the output pipe to the forwarding loop; callable once
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Shutdown protocol: graceful terminate with a 4 s bound, then forced
    /// kill with a 2 s bound; the handle is reaped in every path.
    pub async fn shutdown(mut self) {
        self.request_terminate();
        match tokio::time::timeout(TERM_WAIT, self.child.wait()).await {
            Ok(Ok(status)) => debug!(?status, "transcoder terminated"),
            Ok(Err(e)) => warn!("transcoder wait failed: {}", e),
            Err(_) => {
                warn!("transcoder ignored terminate, killing");
                let _ = self.child.start_kill();
                if tokio::time::timeout(KILL_WAIT, self.child.wait()).await.is_err() {
                    // kill_on_drop reaps it eventually
                    warn!("transcoder survived kill wait");
                }
            }
        }
    }

    #[cfg(unix)]
    fn request_terminate(&mut self) {
        match self.child.id() {
            Some(pid) => unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            },
            // Already reaped
            None => {}
        }
    }

    #[cfg(not(unix))]
    fn request_terminate(&mut self) {
        let _ = self.child.start_kill();
    }
}

/// Forward fixed-size chunks from the transcoder's output into the response
/// channel. [`EMPTY_READ_LIMIT`] consecutive empty reads spaced by
/// [`EMPTY_READ_DELAY`] mean the source is drained; a closed channel means
/// the client disconnected.
pub async fn forward_chunks<R>(reader: &mut R, tx: &mpsc::Sender<Bytes>) -> StreamEnd
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut empty_reads = 0u32;
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                empty_reads += 1;
                if empty_reads >= EMPTY_READ_LIMIT {
                    debug!("source drained after empty-read window");
                    return StreamEnd::SourceDrained;
                }
                tokio::time::sleep(EMPTY_READ_DELAY).await;
            }
            Ok(n) => {
                empty_reads = 0;
                if tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                    debug!("client disconnected mid-stream");
                    return StreamEnd::ClientGone;
                }
            }
            Err(e) => {
                // Pipe torn down under us, e.g. by the shutdown protocol
                debug!("transcoder read ended: {}", e);
                return StreamEnd::SourceDrained;
            }
        }
    }
}
