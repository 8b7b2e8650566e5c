//! Renderer-preemption probe
//!
//! The appliance can hand its audio output to higher-priority renderers
//! (Bluetooth, AirPlay, Spotify Connect, Squeezelite, RoonBridge, Plexamp,
//! Deezer). Their service/active flags live in the appliance's system
//! database; the relay reads them before starting a track, after resolving,
//! and at end-of-session, and yields whenever one is active.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// `cfg_system` parameters the probe reads
const RENDERER_PARAMS: &[&str] = &[
    "btsvc",
    "btactive",
    "airplaysvc",
    "aplactive",
    "spotifysvc",
    "spotactive",
    "slsvc",
    "slactive",
    "rbsvc",
    "rbactive",
    "pasvc",
    "paactive",
    "deezersvc",
    "deezactive",
    "audioout",
];

/// Reads renderer states from the appliance system database. Construct with
/// no database path to disable the probe (never preempted).
pub struct RendererMonitor {
    pool: Option<SqlitePool>,
}

impl RendererMonitor {
    /// Connect to the system database. A missing or unreachable database
    /// disables the probe rather than failing startup; the relay then plays
    /// unconditionally.
    pub async fn connect(db_path: Option<&Path>) -> Self {
        let pool = match db_path {
            Some(path) => {
                let url = format!("sqlite://{}?mode=ro", path.display());
                match SqlitePoolOptions::new().max_connections(1).connect(&url).await {
                    Ok(pool) => Some(pool),
                    Err(e) => {
                        warn!("system database unavailable, renderer probe disabled: {}", e);
                        None
                    }
                }
            }
            None => None,
        };
        Self { pool }
    }

    #[cfg(test)]
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool: Some(pool) }
    }

    /// True when a higher-priority audio source currently owns the output.
    /// Probe errors are logged and read as "not active" so a flaky database
    /// never blocks playback.
    pub async fn is_renderer_active(&self) -> bool {
        let Some(pool) = &self.pool else {
            return false;
        };
        match load_states(pool).await {
            Ok(states) => {
                let active = renderer_active(&states);
                if active {
                    debug!("renderer active, relay yields");
                }
                active
            }
            Err(e) => {
                warn!("renderer state read failed: {}", e);
                false
            }
        }
    }
}

async fn load_states(pool: &SqlitePool) -> sqlx::Result<HashMap<String, String>> {
    let placeholders = vec!["?"; RENDERER_PARAMS.len()].join(",");
    let sql = format!(
        "SELECT param, value FROM cfg_system WHERE param IN ({})",
        placeholders
    );
    let mut query = sqlx::query_as::<_, (String, String)>(&sql);
    for param in RENDERER_PARAMS {
        query = query.bind(*param);
    }
    let rows = query.fetch_all(pool).await?;
    Ok(rows.into_iter().collect())
}

/// Activity predicate: Bluetooth counts only while the output is local;
/// every other renderer counts whenever its active flag is up.
fn renderer_active(states: &HashMap<String, String>) -> bool {
    let flag = |key: &str| states.get(key).map(String::as_str) == Some("1");
    let bluetooth = flag("btsvc")
        && states.get("audioout").map(String::as_str) == Some("Local")
        && flag("btactive");
    bluetooth
        || ["aplactive", "spotactive", "slactive", "rbactive", "paactive", "deezactive"]
            .iter()
            .any(|key| flag(key))
}
