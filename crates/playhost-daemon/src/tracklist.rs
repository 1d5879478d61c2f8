//! Directory playlists: launching one music file queues its neighbours.

use anyhow::{bail, Context, Result};
use playhost_proto::config::FileTypesConfig;
use playhost_proto::media::FileKind;
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackList {
    pub tracks: Vec<String>,
    /// Position of the requested file in `tracks`.
    pub start_index: usize,
}

/// Every music file in `file`'s directory, sorted by name (or shuffled), with
/// the index of `file` itself.
pub async fn directory_tracklist(
    file: &Path,
    types: &FileTypesConfig,
    shuffle: bool,
) -> Result<TrackList> {
    let dir = file
        .parent()
        .with_context(|| format!("{} has no parent directory", file.display()))?;

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to list {}", dir.display()))?;

    let mut tracks: Vec<PathBuf> = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        if FileKind::classify(&path, types) == Some(FileKind::Music) {
            tracks.push(path);
        }
    }
    tracks.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    if !tracks.iter().any(|t| t.file_name() == file.file_name()) {
        bail!("{} is not a music file in {}", file.display(), dir.display());
    }
    if shuffle {
        tracks.shuffle(&mut rand::thread_rng());
    }

    let start_index = tracks
        .iter()
        .position(|t| t.file_name() == file.file_name())
        .unwrap_or(0);

    Ok(TrackList {
        tracks: tracks
            .into_iter()
            .map(|t| t.to_string_lossy().into_owned())
            .collect(),
        start_index,
    })
}
