//! In-process playback engine used by the video and playlist backends.
//!
//! `PlayerEngine` is the seam; `MpvEngine` drives an mpv child process and
//! starts it lazily on first use, respawning when the process has died.
use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::mpv::{MpvDriver, MpvHandle};

/// What to load into the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadTarget {
    /// A single file or URL (`dvd://` included).
    File(String),
    /// A playlist file the engine expands itself.
    PlaylistFile(String),
    /// An explicit ordered track list.
    Tracks(Vec<String>),
}

#[async_trait]
pub trait PlayerEngine: Send + Sync {
    /// Replace whatever is loaded.  Media is left paused at the start.
    async fn load(&self, target: &LoadTarget) -> anyhow::Result<()>;
    /// Something is loaded and not idle.
    async fn media_loaded(&self) -> bool;
    async fn set_pause(&self, paused: bool) -> anyhow::Result<()>;
    /// Unload everything.
    async fn stop(&self) -> anyhow::Result<()>;
    async fn seek_relative(&self, secs: f64) -> anyhow::Result<()>;
    async fn seek_to(&self, secs: f64) -> anyhow::Result<()>;
    async fn play_index(&self, index: usize) -> anyhow::Result<()>;
    async fn next(&self) -> anyhow::Result<()>;
    async fn prev(&self) -> anyhow::Result<()>;
    /// Native range 0–100.
    async fn set_volume(&self, volume: i64) -> anyhow::Result<()>;
    async fn volume(&self) -> anyhow::Result<i64>;
    async fn toggle_mute(&self) -> anyhow::Result<()>;
    async fn set_fullscreen(&self, on: bool) -> anyhow::Result<()>;
    async fn current_path(&self) -> Option<String>;
    async fn media_title(&self) -> Option<String>;
    /// Container tags, lowercase keys.
    async fn metadata(&self) -> HashMap<String, String>;
}

pub struct MpvEngine {
    driver: Mutex<MpvDriver>,
    handle: Mutex<Option<MpvHandle>>,
}

impl MpvEngine {
    pub fn new(initial_volume: u8, binary: Option<PathBuf>) -> Self {
        let mut driver = MpvDriver::new(initial_volume);
        if let Some(b) = binary {
            driver = driver.with_binary(b);
        }
        Self {
            driver: Mutex::new(driver),
            handle: Mutex::new(None),
        }
    }

    /// Current handle, spawning mpv when there is none or it has died.
    async fn handle(&self) -> anyhow::Result<MpvHandle> {
        let mut slot = self.handle.lock().await;
        let mut driver = self.driver.lock().await;
        if let Some(h) = slot.as_ref() {
            if h.is_connected() && driver.process_alive() {
                return Ok(h.clone());
            }
            warn!("mpv: lost connection, respawning");
        }
        let fresh = driver.spawn_and_connect().await?;
        *slot = Some(fresh.clone());
        Ok(fresh)
    }

    /// Handle only if mpv is already up; queries never spawn a process.
    async fn existing(&self) -> Option<MpvHandle> {
        self.handle
            .lock()
            .await
            .as_ref()
            .filter(|h| h.is_connected())
            .cloned()
    }

    pub async fn shutdown(&self) {
        self.handle.lock().await.take();
        self.driver.lock().await.kill().await;
        info!("mpv: shut down");
    }
}

#[async_trait]
impl PlayerEngine for MpvEngine {
    async fn load(&self, target: &LoadTarget) -> anyhow::Result<()> {
        let h = self.handle().await?;
        h.set_pause(true).await?;
        match target {
            LoadTarget::File(path) => h.loadfile(path, false).await?,
            LoadTarget::PlaylistFile(path) => h.loadlist(path).await?,
            LoadTarget::Tracks(tracks) => {
                let (first, rest) = tracks
                    .split_first()
                    .ok_or_else(|| anyhow::anyhow!("empty track list"))?;
                h.loadfile(first, false).await?;
                for t in rest {
                    h.loadfile(t, true).await?;
                }
            }
        }
        Ok(())
    }

    async fn media_loaded(&self) -> bool {
        match self.existing().await {
            Some(h) => matches!(h.idle_active().await, Ok(false)),
            None => false,
        }
    }

    async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.handle().await?.set_pause(paused).await
    }

    async fn stop(&self) -> anyhow::Result<()> {
        match self.existing().await {
            Some(h) => h.stop().await,
            None => Ok(()),
        }
    }

    async fn seek_relative(&self, secs: f64) -> anyhow::Result<()> {
        self.handle().await?.seek_relative(secs).await
    }

    async fn seek_to(&self, secs: f64) -> anyhow::Result<()> {
        self.handle().await?.seek_to(secs).await
    }

    async fn play_index(&self, index: usize) -> anyhow::Result<()> {
        self.handle().await?.play_index(index).await
    }

    async fn next(&self) -> anyhow::Result<()> {
        self.handle().await?.playlist_next().await
    }

    async fn prev(&self) -> anyhow::Result<()> {
        self.handle().await?.playlist_prev().await
    }

    async fn set_volume(&self, volume: i64) -> anyhow::Result<()> {
        self.handle().await?.set_volume(volume as f64).await
    }

    async fn volume(&self) -> anyhow::Result<i64> {
        let h = self
            .existing()
            .await
            .ok_or_else(|| anyhow::anyhow!("mpv is not running"))?;
        Ok(h.volume().await?.round() as i64)
    }

    async fn toggle_mute(&self) -> anyhow::Result<()> {
        self.handle().await?.cycle_mute().await
    }

    async fn set_fullscreen(&self, on: bool) -> anyhow::Result<()> {
        self.handle().await?.set_fullscreen(on).await
    }

    async fn current_path(&self) -> Option<String> {
        self.existing().await?.path().await
    }

    async fn media_title(&self) -> Option<String> {
        self.existing().await?.media_title().await
    }

    async fn metadata(&self) -> HashMap<String, String> {
        match self.existing().await {
            Some(h) => h.metadata().await,
            None => HashMap::new(),
        }
    }
}
