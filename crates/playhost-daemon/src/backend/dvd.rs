use std::sync::Arc;

use async_trait::async_trait;
use playhost_proto::media::{BackendKind, MediaMetaInfo};
use tracing::warn;

use super::{MediaBackend, ScriptTimeouts, Seek, SeekStep, Transport};
use crate::error::{ControlError, Result};
use crate::retry::{retry_or, QUERY_ATTEMPTS};
use crate::script::{self, ScriptBridge, ScriptRunner, ScriptValue};
use crate::volume::VolumeRange;

const RANGE: VolumeRange = VolumeRange::new(0, 255);

/// Scripted DVD player application.  Reports no track metadata.
pub struct DvdPlayerBackend {
    runner: ScriptRunner,
    timeouts: ScriptTimeouts,
    transport: Transport,
    full_screen: bool,
}

impl DvdPlayerBackend {
    pub fn new(bridge: Arc<dyn ScriptBridge>, app: &str, timeouts: ScriptTimeouts) -> Self {
        Self {
            runner: ScriptRunner::new(bridge, app),
            timeouts,
            transport: Transport::default(),
            full_screen: false,
        }
    }

    async fn control(&self, actions: &str) -> Result<ScriptValue> {
        Ok(self.runner.tell(actions, self.timeouts.control).await?)
    }

    /// Bring the viewer up on the inserted disc, fullscreen.
    pub async fn launch(&mut self) -> Result<()> {
        let budget = self.timeouts.launch;
        let launch = |e: script::BridgeError| ControlError::Launch(e.to_string());
        self.runner
            .tell(
                "set interaction override to false\n\
                 play dvd\n\
                 go return to dvd\n\
                 set viewer visibility to true",
                budget,
            )
            .await
            .map_err(launch)?;
        self.runner.tell("activate", budget).await.map_err(launch)?;
        self.transport.loaded();

        match self
            .runner
            .tell("set viewer full screen to true", budget)
            .await
        {
            Ok(_) => self.full_screen = true,
            Err(e) => warn!("dvd: could not enter fullscreen: {}", e),
        }
        Ok(())
    }
}

#[async_trait]
impl MediaBackend for DvdPlayerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::DvdPlayer
    }

    fn transport(&self) -> &Transport {
        &self.transport
    }

    async fn is_running(&self) -> bool {
        match self.runner.app_running(self.timeouts.query).await {
            Ok(running) => running,
            Err(e) => {
                warn!("dvd: running check failed: {}", e);
                false
            }
        }
    }

    fn is_full_screen(&self) -> bool {
        self.full_screen
    }

    async fn play(&mut self) -> Result<()> {
        self.transport.require_media()?;
        self.control("play dvd").await?;
        self.transport.played();
        Ok(())
    }

    async fn pause(&mut self) -> Result<()> {
        if !self.transport.is_playing() {
            return Ok(());
        }
        self.control("pause dvd").await?;
        self.transport.paused();
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.transport.require_media()?;
        self.control("set elapsed time to 0\nstop dvd").await?;
        self.transport.stopped();
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.control("quit").await?;
        self.full_screen = false;
        self.transport.closed();
        Ok(())
    }

    async fn seek_relative(&mut self, seek: Seek) -> Result<()> {
        self.transport.require_open()?;
        let actions = match (seek.step, seek.forward) {
            (SeekStep::Short, true) => "set elapsed time to (elapsed time + 12)",
            (SeekStep::Short, false) => "set elapsed time to (elapsed time - 12)",
            (SeekStep::Long, true) => "play next chapter",
            (SeekStep::Long, false) => "play previous chapter",
        };
        self.control(actions).await?;
        Ok(())
    }

    async fn set_volume(&mut self, percent: u8) -> Result<()> {
        self.control(&format!(
            "set audio volume to {}",
            RANGE.denormalize(percent)
        ))
        .await?;
        Ok(())
    }

    async fn get_volume(&self) -> u8 {
        let runner = &self.runner;
        let budget = self.timeouts.control;
        retry_or("dvd volume", QUERY_ATTEMPTS, 50, || async move {
            let value = runner.tell("get audio volume", budget).await?;
            script::to_int(&value).map(|v| RANGE.normalize(v))
        })
        .await
    }

    async fn toggle_mute(&mut self) -> Result<()> {
        self.control("set audio muted to (not audio muted)").await?;
        Ok(())
    }

    async fn set_full_screen(&mut self, on: bool) -> Result<()> {
        self.control(&format!("set viewer full screen to {}", on))
            .await?;
        self.full_screen = on;
        Ok(())
    }

    async fn get_new_media_info(&mut self) -> Result<Option<MediaMetaInfo>> {
        Ok(None)
    }
}
