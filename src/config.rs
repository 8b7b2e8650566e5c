//! Configuration loading and stream-quality profiles
//!
//! Resolution order for every setting: command line > environment > TOML
//! config file (`config.toml` in the root folder) > compiled default.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default control-surface port
pub const DEFAULT_CONTROL_PORT: u16 = 5750;
/// Fixed local port the playback daemon pulls the stream from
pub const DEFAULT_STREAM_PORT: u16 = 8080;

/// A stream-quality profile: the format selector handed to the resolver and
/// the bitrate handed to the transcoder.
#[derive(Debug, Clone)]
pub struct StreamProfile {
    pub id: String,
    pub selector: String,
    pub bitrate: String,
}

/// The three built-in profiles. Selectors exclude HLS variants because the
/// transcoder reads a single progressive URL.
pub fn builtin_profiles() -> Vec<StreamProfile> {
    vec![
        StreamProfile {
            id: "low".into(),
            selector: "bestaudio[abr<=96][protocol!=m3u8]".into(),
            bitrate: "96k".into(),
        },
        StreamProfile {
            id: "standard".into(),
            selector: "bestaudio[ext=m4a][protocol!=m3u8]/bestaudio[protocol!=m3u8]".into(),
            bitrate: "128k".into(),
        },
        StreamProfile {
            id: "hifi".into(),
            selector: "bestaudio[ext=webm][protocol!=m3u8]/bestaudio[protocol!=m3u8]".into(),
            bitrate: "160k".into(),
        },
    ]
}

/// Runtime configuration for the relay service
#[derive(Debug, Clone)]
pub struct Config {
    /// Control-surface HTTP port
    pub control_port: u16,
    /// Local stream endpoint port
    pub stream_port: u16,
    /// Folder holding the reference log and the resolution cache document
    pub root_folder: PathBuf,
    /// Appliance system database (renderer states); absent disables the probe
    pub system_db: Option<PathBuf>,
    /// Resolver command (yt-dlp compatible)
    pub resolver_command: String,
    /// Per-call resolver timeout
    pub resolver_timeout_secs: u64,
    /// Transcoder command (ffmpeg compatible)
    pub transcoder_command: String,
    /// Selected stream-quality profile id
    pub profile: String,
    /// Available profiles (built-ins, selectors possibly overridden)
    pub profiles: Vec<StreamProfile>,
    /// Playback daemon address
    pub player_host: String,
    pub player_port: u16,
    /// Source descriptor the daemon loads to reach the local stream
    pub player_source: String,
    /// Pause between preload items, resolver-side rate-limit courtesy
    pub preload_delay_ms: u64,
}

/// Optional on-disk configuration, all fields defaulted
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    relay: RelaySection,
    #[serde(default)]
    resolver: ResolverSection,
    #[serde(default)]
    player: PlayerSection,
}

#[derive(Debug, Default, Deserialize)]
struct RelaySection {
    control_port: Option<u16>,
    stream_port: Option<u16>,
    system_db: Option<PathBuf>,
    profile: Option<String>,
    transcoder_command: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResolverSection {
    command: Option<String>,
    timeout_secs: Option<u64>,
    preload_delay_ms: Option<u64>,
    format_low: Option<String>,
    format_standard: Option<String>,
    format_hifi: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PlayerSection {
    host: Option<String>,
    port: Option<u16>,
    source: Option<String>,
}

impl Config {
    /// Build the configuration from CLI-provided overrides plus the optional
    /// `config.toml` in the root folder.
    pub fn load(
        root_folder: PathBuf,
        control_port: Option<u16>,
        stream_port: Option<u16>,
    ) -> Result<Self> {
        let file = read_config_file(&root_folder)?;

        let mut profiles = builtin_profiles();
        for profile in &mut profiles {
            let overridden = match profile.id.as_str() {
                "low" => file.resolver.format_low.clone(),
                "standard" => file.resolver.format_standard.clone(),
                "hifi" => file.resolver.format_hifi.clone(),
                _ => None,
            };
            if let Some(selector) = overridden {
                profile.selector = selector;
            }
        }

        Ok(Config {
            control_port: control_port
                .or(file.relay.control_port)
                .unwrap_or(DEFAULT_CONTROL_PORT),
            stream_port: stream_port
                .or(file.relay.stream_port)
                .unwrap_or(DEFAULT_STREAM_PORT),
            root_folder,
            system_db: file.relay.system_db,
            resolver_command: file.resolver.command.unwrap_or_else(|| "yt-dlp".into()),
            resolver_timeout_secs: file.resolver.timeout_secs.unwrap_or(30),
            transcoder_command: file
                .relay
                .transcoder_command
                .unwrap_or_else(|| "ffmpeg".into()),
            profile: file.relay.profile.unwrap_or_else(|| "standard".into()),
            profiles,
            player_host: file.player.host.unwrap_or_else(|| "localhost".into()),
            player_port: file.player.port.unwrap_or(6600),
            player_source: file
                .player
                .source
                .unwrap_or_else(|| "RADIO/Local Stream.pls".into()),
            preload_delay_ms: file.resolver.preload_delay_ms.unwrap_or(500),
        })
    }

    /// Selected profile, falling back to `standard` when the configured id
    /// is unknown.
    pub fn active_profile(&self) -> &StreamProfile {
        self.profiles
            .iter()
            .find(|p| p.id == self.profile)
            .or_else(|| self.profiles.iter().find(|p| p.id == "standard"))
            .unwrap_or(&self.profiles[0])
    }

    /// Externally owned reference log of track strings
    pub fn songlog_path(&self) -> PathBuf {
        self.root_folder.join("songlog.txt")
    }

    /// Persisted resolution cache document
    pub fn cache_path(&self) -> PathBuf {
        self.root_folder.join("resolve_cache.json")
    }
}

/// Default root folder when neither CLI nor environment provides one
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("lumen"))
        .unwrap_or_else(|| PathBuf::from("/var/lib/lumen"))
}

fn read_config_file(root: &Path) -> Result<ConfigFile> {
    let path = root.join("config.toml");
    if !path.exists() {
        return Ok(ConfigFile::default());
    }
    let raw = std::fs::read_to_string(&path)?;
    toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().to_path_buf(), None, None).unwrap();
        assert_eq!(config.control_port, DEFAULT_CONTROL_PORT);
        assert_eq!(config.stream_port, DEFAULT_STREAM_PORT);
        assert_eq!(config.active_profile().id, "standard");
        assert_eq!(config.active_profile().bitrate, "128k");
        assert_eq!(config.resolver_command, "yt-dlp");
    }

    #[test]
    fn cli_port_beats_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "[relay]\ncontrol_port = 6000\nprofile = \"hifi\"\n",
        )
        .unwrap();
        let config = Config::load(dir.path().to_path_buf(), Some(7000), None).unwrap();
        assert_eq!(config.control_port, 7000);
        assert_eq!(config.active_profile().id, "hifi");
        assert_eq!(config.active_profile().bitrate, "160k");
    }

    #[test]
    fn selector_override_from_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "[resolver]\nformat_standard = \"bestaudio[protocol!=m3u8]\"\n",
        )
        .unwrap();
        let config = Config::load(dir.path().to_path_buf(), None, None).unwrap();
        assert_eq!(config.active_profile().selector, "bestaudio[protocol!=m3u8]");
    }

    #[test]
    fn unknown_profile_falls_back_to_standard() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "[relay]\nprofile = \"ultra\"\n").unwrap();
        let config = Config::load(dir.path().to_path_buf(), None, None).unwrap();
        assert_eq!(config.active_profile().id, "standard");
    }
}
