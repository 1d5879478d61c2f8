use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use playhost_proto::media::{BackendKind, MediaMetaInfo};
use tracing::{debug, warn};

use super::{MediaBackend, Operation, Seek, SeekStep, Transport};
use crate::engine::{LoadTarget, PlayerEngine};
use crate::error::Result;
use crate::tags;
use crate::volume::VolumeRange;

const RANGE: VolumeRange = VolumeRange::PERCENT;

/// Multi-track playback on the native engine.
pub struct PlaylistBackend {
    engine: Arc<dyn PlayerEngine>,
    transport: Transport,
    /// Index the first `play` after a launch starts from.  Consumed once.
    first_track: Option<usize>,
    /// Path of the last track metadata was produced for.
    last_path: Option<String>,
}

impl PlaylistBackend {
    pub fn new(engine: Arc<dyn PlayerEngine>) -> Self {
        Self {
            engine,
            transport: Transport::default(),
            first_track: None,
            last_path: None,
        }
    }

    pub async fn open(&mut self, target: LoadTarget, first_track: usize) -> Result<()> {
        self.engine
            .load(&target)
            .await
            .map_err(|e| crate::error::ControlError::Launch(format!("{:#}", e)))?;
        self.transport.loaded();
        self.first_track = Some(first_track);
        self.last_path = None;
        Ok(())
    }

    #[cfg(test)]
    pub fn pending_first_track(&self) -> Option<usize> {
        self.first_track
    }

    async fn read_track(&self, path: &str) -> MediaMetaInfo {
        let mut info = tags::read_track_meta(PathBuf::from(path))
            .await
            .unwrap_or_default();

        if info.title.is_none() || info.artist.is_none() || info.album.is_none() {
            let engine_tags = self.engine.metadata().await;
            let pick = |key: &str| engine_tags.get(key).filter(|v| !v.is_empty()).cloned();
            info.title = info.title.or_else(|| pick("title"));
            info.artist = info.artist.or_else(|| pick("artist"));
            info.album = info.album.or_else(|| pick("album"));
        }
        if info.title.is_none() {
            info.title = self.engine.media_title().await;
        }
        if info.artwork.is_none() {
            info.artwork = tags::folder_artwork(PathBuf::from(path)).await;
        }
        info
    }
}

#[async_trait]
impl MediaBackend for PlaylistBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Playlist
    }

    fn supports(&self, op: Operation) -> bool {
        op != Operation::FullScreen
    }

    fn transport(&self) -> &Transport {
        &self.transport
    }

    async fn is_running(&self) -> bool {
        self.engine.media_loaded().await
    }

    async fn play(&mut self) -> Result<()> {
        self.transport.require_media()?;
        if let Some(index) = self.first_track {
            self.engine.play_index(index).await?;
            self.first_track = None;
        }
        self.engine.set_pause(false).await?;
        self.last_path = None;
        self.transport.played();
        Ok(())
    }

    async fn pause(&mut self) -> Result<()> {
        if !self.transport.is_playing() {
            debug!("playlist: pause ignored in {:?}", self.transport.state());
            return Ok(());
        }
        self.engine.set_pause(true).await?;
        self.transport.paused();
        Ok(())
    }

    /// Rewind to the top of the list and hold there.  The engine's own stop
    /// would unload the list.
    async fn stop(&mut self) -> Result<()> {
        self.transport.require_media()?;
        if !self.transport.is_paused() {
            self.engine.set_pause(true).await?;
        }
        self.engine.play_index(0).await?;
        self.engine.set_pause(true).await?;
        self.transport.stopped();
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.engine.stop().await?;
        self.first_track = None;
        self.last_path = None;
        self.transport.closed();
        Ok(())
    }

    async fn seek_relative(&mut self, seek: Seek) -> Result<()> {
        self.transport.require_open()?;
        match (seek.step, seek.forward) {
            (SeekStep::Short, _) => self.engine.seek_relative(seek.seconds()).await?,
            (SeekStep::Long, true) => self.engine.next().await?,
            (SeekStep::Long, false) => self.engine.prev().await?,
        }
        Ok(())
    }

    async fn set_volume(&mut self, percent: u8) -> Result<()> {
        self.engine.set_volume(RANGE.denormalize(percent)).await?;
        Ok(())
    }

    async fn get_volume(&self) -> u8 {
        match self.engine.volume().await {
            Ok(v) => RANGE.normalize(v),
            Err(e) => {
                warn!("playlist: volume query failed: {:#}", e);
                50
            }
        }
    }

    async fn toggle_mute(&mut self) -> Result<()> {
        self.engine.toggle_mute().await?;
        Ok(())
    }

    async fn get_new_media_info(&mut self) -> Result<Option<MediaMetaInfo>> {
        if !self.transport.is_open() {
            return Ok(None);
        }
        let Some(path) = self.engine.current_path().await else {
            return Ok(None);
        };
        if self.last_path.as_deref() == Some(path.as_str()) {
            return Ok(None);
        }
        let info = self.read_track(&path).await;
        self.last_path = Some(path);
        Ok(Some(info))
    }
}
