//! Track tags and cover art for the playlist backend, read with lofty.

use anyhow::{Context, Result};
use lofty::picture::PictureType;
use lofty::prelude::*;
use lofty::probe::Probe;
use playhost_proto::media::MediaMetaInfo;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Image files looked for beside a track when it has no embedded picture.
const FOLDER_IMAGES: &[&str] = &["folder.jpg", "Folder.jpg", "cover.jpg", "Cover.jpg", "folder.png", "cover.png"];

/// Read title/artist/album and embedded artwork.  `None` when the file is
/// missing, unreadable, or carries no tag.
pub async fn read_track_meta(path: PathBuf) -> Option<MediaMetaInfo> {
    let shown = path.display().to_string();
    match tokio::task::spawn_blocking(move || read_track_meta_blocking(&path)).await {
        Ok(Ok(info)) => Some(info),
        Ok(Err(e)) => {
            debug!("tags: {}: {:#}", shown, e);
            None
        }
        Err(e) => {
            debug!("tags: read task failed for {}: {}", shown, e);
            None
        }
    }
}

fn read_track_meta_blocking(path: &Path) -> Result<MediaMetaInfo> {
    let tagged_file = Probe::open(path)?
        .read()
        .context("Failed to read audio file")?;

    let tag = tagged_file
        .primary_tag()
        .or_else(|| tagged_file.first_tag())
        .context("No metadata tag found")?;

    let text = |value: Option<std::borrow::Cow<'_, str>>| {
        value
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    let mut info = MediaMetaInfo::new(text(tag.title()), text(tag.artist()), text(tag.album()));
    let pictures = tag.pictures();
    info.artwork = pictures
        .iter()
        .find(|p| p.pic_type() == PictureType::CoverFront)
        .or_else(|| pictures.first())
        .map(|p| p.data().to_vec());
    Ok(info)
}

/// Cover image stored next to the track (`folder.jpg` and friends).
pub async fn folder_artwork(track: PathBuf) -> Option<Vec<u8>> {
    let dir = track.parent()?.to_path_buf();
    for name in FOLDER_IMAGES {
        if let Ok(bytes) = tokio::fs::read(dir.join(name)).await {
            if !bytes.is_empty() {
                return Some(bytes);
            }
        }
    }
    None
}
