use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub scripting: ScriptingConfig,
    #[serde(default)]
    pub file_types: FileTypesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    #[serde(default = "default_http_enabled")]
    pub http_enabled: bool,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

/// Which backend plays a given kind of media.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MusicBackend {
    /// Built-in playlist player on the native engine.
    #[default]
    Native,
    /// Hand music files to the scripted jukebox application.
    Jukebox,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DvdBackend {
    #[default]
    Native,
    /// Hand DVD sources to the scripted DVD player application.
    DvdPlayer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Volume (percent) applied when the native engine opens new media.
    #[serde(default = "default_volume")]
    pub default_volume: u8,
    /// Shuffle directory playlists before playback.
    #[serde(default)]
    pub shuffle_songs: bool,
    /// Launching a single music file queues every track in its directory.
    #[serde(default = "default_true")]
    pub play_whole_directory: bool,
    #[serde(default)]
    pub music_backend: MusicBackend,
    #[serde(default)]
    pub dvd_backend: DvdBackend,
    /// Metadata poll cadence.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Explicit mpv binary; searched for when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mpv_binary: Option<PathBuf>,
}

/// Settings for the external script runner used by the jukebox and DVD
/// player backends.  Timeouts are whole seconds because they are embedded in
/// the script's own timeout clause.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptingConfig {
    #[serde(default = "default_runner")]
    pub runner: PathBuf,
    #[serde(default = "default_jukebox_app")]
    pub jukebox_app: String,
    #[serde(default = "default_dvd_app")]
    pub dvd_app: String,
    #[serde(default = "default_control_timeout")]
    pub control_timeout_secs: u64,
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
    #[serde(default = "default_launch_timeout")]
    pub launch_timeout_secs: u64,
    #[serde(default = "default_enumerate_timeout")]
    pub enumerate_timeout_secs: u64,
}

/// Extensions (lowercase, without the dot) recognised per file kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTypesConfig {
    #[serde(default = "default_music_exts")]
    pub music: Vec<String>,
    #[serde(default = "default_video_exts")]
    pub video: Vec<String>,
    #[serde(default = "default_playlist_exts")]
    pub playlist: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: default_pid_file(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            tcp_port: default_tcp_port(),
            http_enabled: default_http_enabled(),
            http_port: default_http_port(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
            shuffle_songs: false,
            play_whole_directory: default_true(),
            music_backend: MusicBackend::default(),
            dvd_backend: DvdBackend::default(),
            poll_interval_ms: default_poll_interval_ms(),
            mpv_binary: None,
        }
    }
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self {
            runner: default_runner(),
            jukebox_app: default_jukebox_app(),
            dvd_app: default_dvd_app(),
            control_timeout_secs: default_control_timeout(),
            query_timeout_secs: default_query_timeout(),
            launch_timeout_secs: default_launch_timeout(),
            enumerate_timeout_secs: default_enumerate_timeout(),
        }
    }
}

impl Default for FileTypesConfig {
    fn default() -> Self {
        Self {
            music: default_music_exts(),
            video: default_video_exts(),
            playlist: default_playlist_exts(),
        }
    }
}

fn default_pid_file() -> PathBuf {
    platform::data_dir().join("daemon.pid")
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_tcp_port() -> u16 {
    platform::DAEMON_TCP_PORT
}

fn default_http_enabled() -> bool {
    true
}

fn default_http_port() -> u16 {
    8989
}

fn default_volume() -> u8 {
    50
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_runner() -> PathBuf {
    PathBuf::from("osascript")
}

fn default_jukebox_app() -> String {
    "iTunes".to_string()
}

fn default_dvd_app() -> String {
    "DVD Player".to_string()
}

fn default_control_timeout() -> u64 {
    1
}

fn default_query_timeout() -> u64 {
    3
}

fn default_launch_timeout() -> u64 {
    2
}

fn default_enumerate_timeout() -> u64 {
    20
}

fn exts(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn default_music_exts() -> Vec<String> {
    exts(&["mp3", "flac", "ogg", "oga", "m4a", "aac", "wav", "wma", "opus"])
}

fn default_video_exts() -> Vec<String> {
    exts(&[
        "avi", "mkv", "mp4", "m4v", "mov", "mpg", "mpeg", "wmv", "flv", "webm", "ogm", "vob",
    ])
}

fn default_playlist_exts() -> Vec<String> {
    exts(&["m3u", "m3u8", "pls", "xspf"])
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        if config.player.default_volume > 100 {
            tracing::warn!(
                "config: default_volume {} out of range, clamping to 100",
                config.player.default_volume
            );
            config.player.default_volume = 100;
        }
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.server.http_enabled);
        assert_eq!(config.server.http_port, 8989);
        assert_eq!(config.server.tcp_port, platform::DAEMON_TCP_PORT);
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.player.default_volume, 50);
        assert!(!config.player.shuffle_songs);
        assert_eq!(config.player.music_backend, MusicBackend::Native);
        assert_eq!(config.scripting.enumerate_timeout_secs, 20);
        assert!(config.file_types.music.iter().any(|e| e == "mp3"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [player]
            shuffle_songs = true
            music_backend = "jukebox"
            default_volume = 250
            "#,
        )
        .unwrap();
        assert!(config.player.shuffle_songs);
        assert_eq!(config.player.music_backend, MusicBackend::Jukebox);
        assert_eq!(config.player.default_volume, 100);
        assert!(config.player.play_whole_directory);
        assert_eq!(config.scripting.jukebox_app, "iTunes");
    }
}
