use serde::{Deserialize, Serialize};

use crate::media::{BackendKind, MediaMetaInfo, MediaSource};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect and can refuse to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

/// Highest value accepted by `Command::SetVolume`.
pub const MAX_VOLUME_PERCENT: u8 = 100;

/// Transport-level control command.  Every backend understands the same
/// vocabulary; backends that cannot honour a command reject it as unsupported.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "cmd")]
pub enum Command {
    Play,
    Pause,
    Stop,
    Close,
    Rewind,
    FastForward,
    RewindLong,
    FastForwardLong,
    SetVolume { value: u8 },
    ToggleMute,
    FullScreen,
}

impl Command {
    /// Stable lowercase name, used in logs and error replies.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Play => "play",
            Command::Pause => "pause",
            Command::Stop => "stop",
            Command::Close => "close",
            Command::Rewind => "rewind",
            Command::FastForward => "fast_forward",
            Command::RewindLong => "rewind_long",
            Command::FastForwardLong => "fast_forward_long",
            Command::SetVolume { .. } => "set_volume",
            Command::ToggleMute => "toggle_mute",
            Command::FullScreen => "full_screen",
        }
    }
}

/// Messages sent from a client to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "req")]
pub enum Request {
    Control { command: Command },
    Launch { source: MediaSource },
    GetVolume,
    GetStatus,
    ListJukeboxPlaylists,
    ListJukeboxTracks { playlist: String },
}

/// Why a request did not take effect.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorKind {
    /// The active backend does not implement the command.
    Unsupported,
    /// The backend accepted the call but it failed.
    Backend,
    /// The requested media could not be launched.
    Launch,
    /// Malformed or unknown request.
    Invalid,
}

/// Snapshot of the controlling session, returned for `Request::GetStatus`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SessionStatus {
    pub backend: Option<BackendKind>,
    pub source: Option<String>,
    pub is_video: bool,
    pub is_open: bool,
    pub is_paused: bool,
}

/// Messages sent from the daemon to clients (replies and broadcasts).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect.
    Hello {
        protocol_version: u32,
        status: SessionStatus,
    },
    /// The request was applied (or harmlessly dropped when nothing plays).
    Ack {
        applied: bool,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
    Volume {
        percent: u8,
    },
    Status {
        status: SessionStatus,
    },
    /// Now-playing change.  `None` means the new session has nothing to show.
    MediaInfo {
        info: Option<MediaMetaInfo>,
    },
    /// Which backend the metadata poller is watching (`None` = idle).
    PlayerToPoll {
        backend: Option<BackendKind>,
    },
    Playlists {
        names: Vec<String>,
    },
    Tracks {
        playlist: String,
        tracks: Vec<String>,
    },
    Log {
        message: String,
    },
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}
