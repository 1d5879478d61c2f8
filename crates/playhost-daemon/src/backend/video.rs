use std::sync::Arc;

use async_trait::async_trait;
use playhost_proto::media::{BackendKind, FileInfo, FileKind, MediaMetaInfo};
use tracing::{debug, warn};

use super::{MediaBackend, Seek, Transport};
use crate::engine::{LoadTarget, PlayerEngine};
use crate::error::{ControlError, Result};
use crate::volume::VolumeRange;

const RANGE: VolumeRange = VolumeRange::PERCENT;

/// Single file on the native engine.  Video and DVD sources go fullscreen
/// when opened.
pub struct VideoBackend {
    engine: Arc<dyn PlayerEngine>,
    transport: Transport,
    full_screen: bool,
    /// Path whose title has already been reported.
    published_for: Option<String>,
}

impl VideoBackend {
    pub fn new(engine: Arc<dyn PlayerEngine>) -> Self {
        Self {
            engine,
            transport: Transport::default(),
            full_screen: false,
            published_for: None,
        }
    }

    pub async fn open(&mut self, file: &FileInfo) -> Result<()> {
        let target = match file.kind {
            FileKind::DvdDrive => LoadTarget::File(dvd_url(&file.path)),
            _ => LoadTarget::File(file.path.clone()),
        };
        self.engine
            .load(&target)
            .await
            .map_err(|e| ControlError::Launch(format!("{:#}", e)))?;
        self.transport.loaded();
        self.published_for = None;

        if file.kind.is_video() {
            match self.engine.set_fullscreen(true).await {
                Ok(()) => self.full_screen = true,
                Err(e) => warn!("video: could not enter fullscreen: {:#}", e),
            }
        }
        Ok(())
    }
}

/// `dvd://` URL for a drive path; an empty path means the default drive.
fn dvd_url(path: &str) -> String {
    if path.is_empty() {
        "dvd://".to_string()
    } else {
        format!("dvd:///{}", path.trim_start_matches('/'))
    }
}

#[async_trait]
impl MediaBackend for VideoBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Video
    }

    fn transport(&self) -> &Transport {
        &self.transport
    }

    async fn is_running(&self) -> bool {
        self.engine.media_loaded().await
    }

    fn is_full_screen(&self) -> bool {
        self.full_screen
    }

    async fn play(&mut self) -> Result<()> {
        self.transport.require_media()?;
        self.engine.set_pause(false).await?;
        self.transport.played();
        Ok(())
    }

    async fn pause(&mut self) -> Result<()> {
        if !self.transport.is_playing() {
            debug!("video: pause ignored in {:?}", self.transport.state());
            return Ok(());
        }
        self.engine.set_pause(true).await?;
        self.transport.paused();
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.transport.require_media()?;
        self.engine.seek_to(0.0).await?;
        self.engine.set_pause(true).await?;
        self.transport.stopped();
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.engine.stop().await?;
        if self.full_screen {
            if let Err(e) = self.engine.set_fullscreen(false).await {
                warn!("video: could not leave fullscreen: {:#}", e);
            }
        }
        self.full_screen = false;
        self.published_for = None;
        self.transport.closed();
        Ok(())
    }

    async fn seek_relative(&mut self, seek: Seek) -> Result<()> {
        self.transport.require_open()?;
        self.engine.seek_relative(seek.seconds()).await?;
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
                warn!("video: volume query failed: {:#}", e);
                50
            }
        }
    }

    async fn toggle_mute(&mut self) -> Result<()> {
        self.engine.toggle_mute().await?;
        Ok(())
    }

    async fn set_full_screen(&mut self, on: bool) -> Result<()> {
        self.engine.set_fullscreen(on).await?;
        self.full_screen = on;
        Ok(())
    }

    async fn get_new_media_info(&mut self) -> Result<Option<MediaMetaInfo>> {
        if !self.transport.is_open() {
            return Ok(None);
        }
        let Some(path) = self.engine.current_path().await else {
            return Ok(None);
        };
        if self.published_for.as_deref() == Some(path.as_str()) {
            return Ok(None);
        }
        let title = self.engine.media_title().await;
        self.published_for = Some(path);
        Ok(Some(MediaMetaInfo::new(title, None, None)))
    }
}
