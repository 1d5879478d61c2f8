//! Command router: the single entry point adapters use to reach the selector.
use std::sync::Arc;

use playhost_proto::media::{BackendKind, MediaSource};
use playhost_proto::protocol::{Command, SessionStatus, MAX_VOLUME_PERCENT};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{unsupported, Operation, Seek, SeekStep};
use crate::error::{ControlError, Result};
use crate::session::SessionSelector;

/// What happened to a dispatched command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Applied,
    /// No active backend; nothing to do.
    Dropped,
    /// The backend call failed; state is unchanged.
    Failed(String),
}

#[derive(Clone)]
pub struct CommandRouter {
    selector: Arc<Mutex<SessionSelector>>,
}

impl CommandRouter {
    pub fn new(selector: Arc<Mutex<SessionSelector>>) -> Self {
        Self { selector }
    }

    pub async fn dispatch(&self, command: Command) -> Result<DispatchOutcome> {
        let mut selector = self.selector.lock().await;
        let Some(backend) = selector.active_mut() else {
            debug!("router: {} dropped, nothing active", command.name());
            return Ok(DispatchOutcome::Dropped);
        };
        let kind = backend.kind();
        let op = Operation::for_command(&command);
        if !backend.supports(op) {
            info!("router: {} not supported by {} backend", command.name(), kind);
            return Err(unsupported(op, kind));
        }

        let result = match command {
            Command::Play => backend.play().await,
            Command::Pause => backend.pause().await,
            Command::Stop => backend.stop().await,
            Command::Close => backend.close().await,
            Command::Rewind
            | Command::FastForward
            | Command::RewindLong
            | Command::FastForwardLong => match Seek::for_command(&command) {
                Some(seek) => backend.seek_relative(seek).await,
                None => Ok(()),
            },
            Command::SetVolume { value } => backend.set_volume(value.min(MAX_VOLUME_PERCENT)).await,
            Command::ToggleMute => backend.toggle_mute().await,
            Command::FullScreen => {
                let on = !backend.is_full_screen();
                backend.set_full_screen(on).await
            }
        };

        match result {
            Ok(()) => {
                debug!("router: {} applied on {}", command.name(), kind);
                if command == Command::Close {
                    selector.clear_session();
                } else if announces_track(&command, kind) {
                    selector.refresh_media_info().await;
                }
                Ok(DispatchOutcome::Applied)
            }
            Err(e @ ControlError::Unsupported { .. }) => Err(e),
            Err(e) => {
                warn!("router: {} failed on {}: {}", command.name(), kind, e);
                Ok(DispatchOutcome::Failed(e.to_string()))
            }
        }
    }

    pub async fn launch(&self, source: MediaSource) -> Result<()> {
        self.selector.lock().await.launch(source).await
    }

    /// Volume of the active backend, 50 when nothing is active.
    pub async fn volume(&self) -> u8 {
        let selector = self.selector.lock().await;
        match selector.active() {
            Some(backend) => backend.get_volume().await,
            None => 50,
        }
    }

    pub async fn status(&self) -> SessionStatus {
        self.selector.lock().await.status().await
    }

    pub async fn jukebox_playlists(&self) -> Vec<String> {
        let mut selector = self.selector.lock().await;
        match selector.jukebox() {
            Some(jukebox) => jukebox.playlists().await,
            None => Vec::new(),
        }
    }

    pub async fn jukebox_tracks(&self, playlist: &str) -> Vec<String> {
        let mut selector = self.selector.lock().await;
        match selector.jukebox() {
            Some(jukebox) => jukebox.tracks(playlist).await,
            None => Vec::new(),
        }
    }
}

/// Commands after which a track-based backend is likely on a new track.
fn announces_track(command: &Command, kind: BackendKind) -> bool {
    let track_based = matches!(kind, BackendKind::Playlist | BackendKind::Jukebox);
    match command {
        Command::Play => true,
        _ => {
            track_based
                && Seek::for_command(command).map(|s| s.step) == Some(SeekStep::Long)
        }
    }
}
