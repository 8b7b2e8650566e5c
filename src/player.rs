//! Playback-daemon client
//!
//! Minimal text-protocol client for the network-controlled playback daemon
//! (MPD protocol). On session start the relay clears the daemon's playlist,
//! loads the single local-stream source descriptor, waits for the stream
//! port to accept, and issues play; at session end it issues stop. Every
//! round-trip is timeout-bounded so a wedged daemon cannot stall a
//! transition.

use crate::error::{Error, Result};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);
/// Attempts × delay the daemon is given to reach the fresh stream endpoint
const PORT_WAIT_ATTEMPTS: u32 = 5;
const PORT_WAIT_DELAY: Duration = Duration::from_millis(200);

pub struct PlayerClient {
    host: String,
    port: u16,
    /// Source descriptor the daemon resolves to the local stream endpoint
    source: String,
}

impl PlayerClient {
    pub fn new(host: String, port: u16, source: String) -> Self {
        Self { host, port, source }
    }

    /// Hand a fresh stream session to the daemon: clear, load the source,
    /// wait for the local endpoint to accept, play.
    pub async fn start_session(&self, stream_port: u16) -> Result<()> {
        let mut conn = self.connect().await?;
        self.command(&mut conn, "clear").await?;
        self.command(&mut conn, &format!("load \"{}\"", self.source)).await?;

        // The listener may still be coming up; give it a bounded head start
        for attempt in 0..PORT_WAIT_ATTEMPTS {
            match TcpStream::connect(("127.0.0.1", stream_port)).await {
                Ok(_) => break,
                Err(_) if attempt + 1 < PORT_WAIT_ATTEMPTS => {
                    tokio::time::sleep(PORT_WAIT_DELAY).await
                }
                Err(e) => warn!("stream endpoint not accepting yet: {}", e),
            }
        }

        self.command(&mut conn, "play").await?;
        debug!("playback daemon handoff complete");
        Ok(())
    }

    /// Stop the daemon; its stop is one of the end-of-stream inputs
    pub async fn stop(&self) -> Result<()> {
        let mut conn = self.connect().await?;
        self.command(&mut conn, "stop").await?;
        Ok(())
    }

    async fn connect(&self) -> Result<BufReader<TcpStream>> {
        let stream = tokio::time::timeout(
            COMMAND_TIMEOUT,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| Error::Player("daemon connect timed out".into()))?
        .map_err(|e| Error::Player(format!("daemon unreachable: {}", e)))?;

        let mut conn = BufReader::new(stream);
        let banner = read_line(&mut conn).await?;
        if !banner.starts_with("OK MPD") {
            return Err(Error::Player(format!("unexpected daemon banner: {}", banner)));
        }
        Ok(conn)
    }

    /// Send one command and read lines until the terminating OK/ACK
    async fn command(&self, conn: &mut BufReader<TcpStream>, cmd: &str) -> Result<()> {
        conn.get_mut()
            .write_all(format!("{}\n", cmd).as_bytes())
            .await
            .map_err(|e| Error::Player(format!("daemon write failed: {}", e)))?;
        loop {
            let line = read_line(conn).await?;
            if line == "OK" {
                return Ok(());
            }
            if line.starts_with("ACK") {
                return Err(Error::Player(format!("daemon refused '{}': {}", cmd, line)));
            }
        }
    }
}

async fn read_line(conn: &mut BufReader<TcpStream>) -> Result<String> {
    let mut line = String::new();
    let read = tokio::time::timeout(COMMAND_TIMEOUT, conn.read_line(&mut line))
        .await
        .map_err(|_| Error::Player("daemon response timed out".into()))?
        .map_err(|e| Error::Player(format!("daemon read failed: {}", e)))?;
    if read == 0 {
        return Err(Error::Player("daemon closed the connection".into()));
    }
    Ok(line.trim_end().to_string())
}
