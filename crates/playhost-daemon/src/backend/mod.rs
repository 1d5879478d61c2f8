//! Player integrations behind one contract.
//!
//! Each `BackendKind` has exactly one implementation here.  The session
//! selector keeps at most one instance of each (`Backend`), reconfigures it
//! on launch and drives it through `MediaBackend`.
mod dvd;
mod jukebox;
mod playlist;
mod video;

pub use dvd::DvdPlayerBackend;
pub use jukebox::JukeboxBackend;
pub use playlist::PlaylistBackend;
pub use video::VideoBackend;

use std::time::Duration;

use async_trait::async_trait;
use playhost_proto::config::ScriptingConfig;
use playhost_proto::media::{BackendKind, FileInfo, MediaMetaInfo};
use playhost_proto::protocol::Command;

use crate::engine::LoadTarget;
use crate::error::{ControlError, Result};

/// Short seek nudge.
pub const SHORT_SEEK_SECS: f64 = 12.0;
/// Long seek on backends without tracks or chapters.
pub const LONG_SEEK_SECS: f64 = 180.0;

/// Capability names, one per group of commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Play,
    Pause,
    Stop,
    Close,
    Seek,
    SeekLong,
    Volume,
    Mute,
    FullScreen,
}

impl Operation {
    pub fn for_command(command: &Command) -> Operation {
        match command {
            Command::Play => Operation::Play,
            Command::Pause => Operation::Pause,
            Command::Stop => Operation::Stop,
            Command::Close => Operation::Close,
            Command::Rewind | Command::FastForward => Operation::Seek,
            Command::RewindLong | Command::FastForwardLong => Operation::SeekLong,
            Command::SetVolume { .. } => Operation::Volume,
            Command::ToggleMute => Operation::Mute,
            Command::FullScreen => Operation::FullScreen,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Play => "play",
            Operation::Pause => "pause",
            Operation::Stop => "stop",
            Operation::Close => "close",
            Operation::Seek => "seek",
            Operation::SeekLong => "long seek",
            Operation::Volume => "volume",
            Operation::Mute => "mute",
            Operation::FullScreen => "fullscreen",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekStep {
    Short,
    /// Adjacent track or chapter where the backend has them.
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seek {
    pub step: SeekStep,
    pub forward: bool,
}

impl Seek {
    pub fn for_command(command: &Command) -> Option<Seek> {
        let (step, forward) = match command {
            Command::Rewind => (SeekStep::Short, false),
            Command::FastForward => (SeekStep::Short, true),
            Command::RewindLong => (SeekStep::Long, false),
            Command::FastForwardLong => (SeekStep::Long, true),
            _ => return None,
        };
        Some(Seek { step, forward })
    }

    /// Signed offset in seconds for time-based seeking.
    pub fn seconds(&self) -> f64 {
        let magnitude = match self.step {
            SeekStep::Short => SHORT_SEEK_SECS,
            SeekStep::Long => LONG_SEEK_SECS,
        };
        if self.forward {
            magnitude
        } else {
            -magnitude
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Closed,
    Playing,
    Paused,
    Stopped,
}

/// Transport state plus the "media loaded but not yet played" flag.
///
/// Every backend moves this only after its native call succeeded, so a
/// failed call leaves the state where it was.
#[derive(Debug, Clone, Copy, Default)]
pub struct Transport {
    state: TransportState,
    pending: bool,
}

impl Transport {
    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state != TransportState::Closed
    }

    pub fn is_paused(&self) -> bool {
        self.state == TransportState::Paused
    }

    pub fn is_playing(&self) -> bool {
        self.state == TransportState::Playing
    }

    /// Open, or closed with freshly loaded media waiting for `play`.
    pub fn has_media(&self) -> bool {
        self.is_open() || self.pending
    }

    pub fn require_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(ControlError::NotOpen)
        }
    }

    pub fn require_media(&self) -> Result<()> {
        if self.has_media() {
            Ok(())
        } else {
            Err(ControlError::NotOpen)
        }
    }

    pub fn loaded(&mut self) {
        self.state = TransportState::Closed;
        self.pending = true;
    }

    pub fn played(&mut self) {
        self.state = TransportState::Playing;
        self.pending = false;
    }

    pub fn paused(&mut self) {
        self.state = TransportState::Paused;
    }

    pub fn stopped(&mut self) {
        self.state = TransportState::Stopped;
        self.pending = false;
    }

    pub fn closed(&mut self) {
        self.state = TransportState::Closed;
        self.pending = false;
    }
}

/// Script budgets for the application-driven backends.
#[derive(Debug, Clone, Copy)]
pub struct ScriptTimeouts {
    pub control: Duration,
    pub query: Duration,
    pub launch: Duration,
    pub enumerate: Duration,
}

impl ScriptTimeouts {
    pub fn from_config(config: &ScriptingConfig) -> Self {
        Self {
            control: Duration::from_secs(config.control_timeout_secs.max(1)),
            query: Duration::from_secs(config.query_timeout_secs.max(1)),
            launch: Duration::from_secs(config.launch_timeout_secs.max(1)),
            enumerate: Duration::from_secs(config.enumerate_timeout_secs.max(1)),
        }
    }
}

impl Default for ScriptTimeouts {
    fn default() -> Self {
        Self::from_config(&ScriptingConfig::default())
    }
}

pub fn unsupported(operation: Operation, backend: BackendKind) -> ControlError {
    ControlError::Unsupported {
        operation: operation.name(),
        backend,
    }
}

/// The uniform playback contract.  Operations a backend does not override
/// report `Unsupported`.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn supports(&self, _op: Operation) -> bool {
        true
    }

    fn transport(&self) -> &Transport;

    /// The player process or application is up.
    async fn is_running(&self) -> bool;

    async fn is_media_open(&self) -> bool {
        self.transport().is_open()
    }

    fn is_paused(&self) -> bool {
        self.transport().is_paused()
    }

    fn is_full_screen(&self) -> bool {
        false
    }

    async fn play(&mut self) -> Result<()>;
    async fn pause(&mut self) -> Result<()>;
    async fn stop(&mut self) -> Result<()>;
    async fn close(&mut self) -> Result<()>;

    async fn seek_relative(&mut self, _seek: Seek) -> Result<()> {
        Err(unsupported(Operation::Seek, self.kind()))
    }

    async fn set_volume(&mut self, _percent: u8) -> Result<()> {
        Err(unsupported(Operation::Volume, self.kind()))
    }

    /// Current volume in percent.  Never fails; backends fall back to 50.
    async fn get_volume(&self) -> u8;

    async fn toggle_mute(&mut self) -> Result<()> {
        Err(unsupported(Operation::Mute, self.kind()))
    }

    async fn set_full_screen(&mut self, _on: bool) -> Result<()> {
        Err(unsupported(Operation::FullScreen, self.kind()))
    }

    /// Snapshot of what is playing now.  `Ok(None)` when nothing is.
    async fn get_new_media_info(&mut self) -> Result<Option<MediaMetaInfo>>;
}

/// How a launch request is realised on its backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchPlan {
    Video(FileInfo),
    Playlist { target: LoadTarget, first_track: usize },
    JukeboxFile(String),
    JukeboxTrack { playlist: String, track: String },
    Dvd,
}

impl LaunchPlan {
    pub fn backend_kind(&self) -> BackendKind {
        match self {
            LaunchPlan::Video(_) => BackendKind::Video,
            LaunchPlan::Playlist { .. } => BackendKind::Playlist,
            LaunchPlan::JukeboxFile(_) | LaunchPlan::JukeboxTrack { .. } => BackendKind::Jukebox,
            LaunchPlan::Dvd => BackendKind::DvdPlayer,
        }
    }
}

/// One singleton per backend kind.
pub enum Backend {
    Video(VideoBackend),
    Playlist(PlaylistBackend),
    Jukebox(JukeboxBackend),
    DvdPlayer(DvdPlayerBackend),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        self.as_dyn().kind()
    }

    pub fn as_dyn(&self) -> &dyn MediaBackend {
        match self {
            Backend::Video(b) => b,
            Backend::Playlist(b) => b,
            Backend::Jukebox(b) => b,
            Backend::DvdPlayer(b) => b,
        }
    }

    pub fn as_dyn_mut(&mut self) -> &mut dyn MediaBackend {
        match self {
            Backend::Video(b) => b,
            Backend::Playlist(b) => b,
            Backend::Jukebox(b) => b,
            Backend::DvdPlayer(b) => b,
        }
    }

    pub fn as_jukebox(&self) -> Option<&JukeboxBackend> {
        match self {
            Backend::Jukebox(b) => Some(b),
            _ => None,
        }
    }

    /// Load the planned media.  The backend is left with media pending and
    /// the caller issues `play`.
    pub async fn open(&mut self, plan: LaunchPlan) -> Result<()> {
        match (self, plan) {
            (Backend::Video(b), LaunchPlan::Video(file)) => b.open(&file).await,
            (Backend::Playlist(b), LaunchPlan::Playlist { target, first_track }) => {
                b.open(target, first_track).await
            }
            (Backend::Jukebox(b), LaunchPlan::JukeboxFile(path)) => b.launch_file(&path).await,
            (Backend::Jukebox(b), LaunchPlan::JukeboxTrack { playlist, track }) => {
                b.launch_track(&playlist, &track).await
            }
            (Backend::DvdPlayer(b), LaunchPlan::Dvd) => b.launch().await,
            (backend, plan) => Err(ControlError::Launch(format!(
                "{} backend cannot open {:?}",
                backend.kind(),
                plan
            ))),
        }
    }
}
