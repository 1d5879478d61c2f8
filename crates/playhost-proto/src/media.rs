//! Media descriptions shared by the daemon and its clients.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::FileTypesConfig;

/// Now-playing snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MediaMetaInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artwork: Option<Vec<u8>>,
}

impl MediaMetaInfo {
    pub fn new(title: Option<String>, artist: Option<String>, album: Option<String>) -> Self {
        Self {
            title,
            artist,
            album,
            artwork: None,
        }
    }

    /// Republish rule: two snapshots describe the same track when title and
    /// artist match.  Album and artwork are ignored here.
    pub fn same_track(&self, other: &MediaMetaInfo) -> bool {
        self.title == other.title && self.artist == other.artist
    }
}

/// Classification of a launchable file, supplied by the library browser.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FileKind {
    Video,
    DvdDrive,
    Music,
    Playlist,
}

impl FileKind {
    /// Classify `path` by extension.  Returns `None` for directories and
    /// extensions that are not configured as playable.
    pub fn classify(path: &Path, types: &FileTypesConfig) -> Option<FileKind> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        let has = |list: &[String]| list.iter().any(|e| e.eq_ignore_ascii_case(&ext));
        if has(&types.playlist) {
            Some(FileKind::Playlist)
        } else if has(&types.music) {
            Some(FileKind::Music)
        } else if has(&types.video) {
            Some(FileKind::Video)
        } else {
            None
        }
    }

    /// Long-running visual media (closed, rather than stopped, when replaced).
    pub fn is_video(&self) -> bool {
        matches!(self, FileKind::Video | FileKind::DvdDrive)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileInfo {
    /// Absolute path (for DVD sources, the drive's device or mount path).
    pub path: String,
    pub kind: FileKind,
}

impl FileInfo {
    pub fn new(path: impl Into<String>, kind: FileKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// What a launch request asks to play.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MediaSource {
    File(FileInfo),
    /// A track from one of the jukebox application's own playlists.
    JukeboxTrack { playlist: String, track: String },
}

impl MediaSource {
    /// Human-readable reference used in logs and status replies.
    pub fn reference(&self) -> String {
        match self {
            MediaSource::File(file) => file.path.clone(),
            MediaSource::JukeboxTrack { playlist, track } => format!("{} / {}", playlist, track),
        }
    }
}

/// The player integrations a session can be bound to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Single-track video/audio player on the native engine.
    Video,
    /// Multi-track playlist player on the native engine.
    Playlist,
    /// Scripted jukebox application.
    Jukebox,
    /// Scripted DVD player application.
    DvdPlayer,
}

impl BackendKind {
    pub fn label(&self) -> &'static str {
        match self {
            BackendKind::Video => "video",
            BackendKind::Playlist => "playlist",
            BackendKind::Jukebox => "jukebox",
            BackendKind::DvdPlayer => "dvd-player",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
