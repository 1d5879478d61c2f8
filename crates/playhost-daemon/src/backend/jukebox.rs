use std::sync::Arc;

use async_trait::async_trait;
use playhost_proto::media::{BackendKind, MediaMetaInfo};
use tracing::{debug, warn};

use super::{MediaBackend, ScriptTimeouts, Seek, SeekStep, Transport};
use crate::error::{ControlError, Result};
use crate::retry::{retry_or, QUERY_ATTEMPTS};
use crate::script::{self, quote, ScriptBridge, ScriptRunner, ScriptValue};
use crate::volume::VolumeRange;

const RANGE: VolumeRange = VolumeRange::PERCENT;

/// Artwork is fetched once per album rather than once per track.
#[derive(Debug, Default)]
pub struct ArtworkTracker {
    fetched_for: Option<Option<String>>,
    artwork: Option<Vec<u8>>,
}

impl ArtworkTracker {
    pub fn needs_refetch(&self, album: Option<&str>) -> bool {
        match &self.fetched_for {
            Some(last) => last.as_deref() != album,
            None => true,
        }
    }

    pub fn record(&mut self, album: Option<String>, artwork: Option<Vec<u8>>) {
        self.fetched_for = Some(album);
        self.artwork = artwork;
    }

    pub fn cached(&self) -> Option<Vec<u8>> {
        self.artwork.clone()
    }

    pub fn reset(&mut self) {
        self.fetched_for = None;
        self.artwork = None;
    }
}

/// Scripted jukebox application.
pub struct JukeboxBackend {
    runner: ScriptRunner,
    timeouts: ScriptTimeouts,
    transport: Transport,
    full_screen: bool,
    artwork: ArtworkTracker,
}

impl JukeboxBackend {
    pub fn new(bridge: Arc<dyn ScriptBridge>, app: &str, timeouts: ScriptTimeouts) -> Self {
        Self {
            runner: ScriptRunner::new(bridge, app),
            timeouts,
            transport: Transport::default(),
            full_screen: false,
            artwork: ArtworkTracker::default(),
        }
    }

    async fn control(&self, actions: &str) -> Result<ScriptValue> {
        Ok(self.runner.tell(actions, self.timeouts.control).await?)
    }

    pub async fn launch_file(&mut self, path: &str) -> Result<()> {
        let actions = format!(
            "play (POSIX file {})\nset song repeat of current playlist to all",
            quote(path)
        );
        self.runner
            .tell(&actions, self.timeouts.launch)
            .await
            .map_err(|e| ControlError::Launch(e.to_string()))?;
        self.transport.loaded();
        self.artwork.reset();
        Ok(())
    }

    pub async fn launch_track(&mut self, playlist: &str, track: &str) -> Result<()> {
        let actions = format!(
            "play track {} of playlist {}\nset song repeat of current playlist to all",
            quote(track),
            quote(playlist)
        );
        self.runner
            .tell(&actions, self.timeouts.launch)
            .await
            .map_err(|e| ControlError::Launch(e.to_string()))?;
        self.transport.loaded();
        self.artwork.reset();
        Ok(())
    }

    /// Names of the application's playlists.  Empty when the application
    /// does not answer.
    pub async fn playlists(&self) -> Vec<String> {
        let runner = &self.runner;
        let budget = self.timeouts.enumerate;
        retry_or("jukebox playlists", QUERY_ATTEMPTS, Vec::new(), || async move {
            let value = runner
                .tell("get the name of every playlist", budget)
                .await?;
            script::to_list(&value)
        })
        .await
    }

    pub async fn tracks(&self, playlist: &str) -> Vec<String> {
        let runner = &self.runner;
        let budget = self.timeouts.enumerate;
        let actions = format!("get the name of every track of playlist {}", quote(playlist));
        let actions_ref = actions.as_str();
        retry_or("jukebox tracks", QUERY_ATTEMPTS, Vec::new(), || async move {
            let value = runner.tell(actions_ref, budget).await?;
            script::to_list(&value)
        })
        .await
    }

    async fn fetch_artwork(&self) -> Option<Vec<u8>> {
        match self
            .runner
            .tell(
                "get raw data of artwork 1 of current track",
                self.timeouts.query,
            )
            .await
        {
            Ok(ScriptValue::Text(raw)) => script::parse_raw_data(&raw),
            Ok(_) => None,
            Err(e) => {
                debug!("jukebox: no artwork: {}", e);
                None
            }
        }
    }
}

fn non_empty(s: Option<&String>) -> Option<String> {
    s.filter(|v| !v.is_empty()).cloned()
}

#[async_trait]
impl MediaBackend for JukeboxBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Jukebox
    }

    fn transport(&self) -> &Transport {
        &self.transport
    }

    async fn is_running(&self) -> bool {
        match self.runner.app_running(self.timeouts.query).await {
            Ok(running) => running,
            Err(e) => {
                warn!("jukebox: running check failed: {}", e);
                false
            }
        }
    }

    async fn is_media_open(&self) -> bool {
        self.transport.is_open() && self.is_running().await
    }

    fn is_full_screen(&self) -> bool {
        self.full_screen
    }

    async fn play(&mut self) -> Result<()> {
        self.transport.require_media()?;
        self.control("play\nset song repeat of current playlist to all")
            .await?;
        self.transport.played();
        Ok(())
    }

    async fn pause(&mut self) -> Result<()> {
        if !self.transport.is_playing() {
            return Ok(());
        }
        self.control("pause").await?;
        self.transport.paused();
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.transport.require_media()?;
        self.control("stop").await?;
        self.transport.stopped();
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.control("quit").await?;
        self.artwork.reset();
        self.full_screen = false;
        self.transport.closed();
        Ok(())
    }

    async fn seek_relative(&mut self, seek: Seek) -> Result<()> {
        self.transport.require_open()?;
        let actions = match (seek.step, seek.forward) {
            (SeekStep::Short, true) => "set player position to (player position + 12)",
            (SeekStep::Short, false) => "set player position to (player position - 12)",
            (SeekStep::Long, true) => "next track",
            (SeekStep::Long, false) => "previous track",
        };
        self.control(actions).await?;
        Ok(())
    }

    async fn set_volume(&mut self, percent: u8) -> Result<()> {
        self.control(&format!(
            "set sound volume to {}",
            RANGE.denormalize(percent)
        ))
        .await?;
        Ok(())
    }

    async fn get_volume(&self) -> u8 {
        let runner = &self.runner;
        let budget = self.timeouts.control;
        retry_or("jukebox volume", QUERY_ATTEMPTS, 50, || async move {
            let value = runner.tell("get sound volume", budget).await?;
            script::to_int(&value).map(|v| RANGE.normalize(v))
        })
        .await
    }

    async fn toggle_mute(&mut self) -> Result<()> {
        self.control("set mute to (not mute)").await?;
        Ok(())
    }

    /// The application only offers a fullscreen toggle shortcut.
    async fn set_full_screen(&mut self, on: bool) -> Result<()> {
        if on != self.full_screen {
            self.runner
                .full_screen_keystroke(self.timeouts.control)
                .await?;
            self.full_screen = on;
        }
        Ok(())
    }

    async fn get_new_media_info(&mut self) -> Result<Option<MediaMetaInfo>> {
        let value = match self
            .runner
            .tell("get {name, artist, album} of current track", self.timeouts.query)
            .await
        {
            Ok(v) => v,
            Err(e) if e.is_nothing_playing() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let fields = script::to_list(&value)?;
        if fields.is_empty() {
            return Ok(None);
        }
        if fields.len() != 3 {
            return Err(ControlError::Coercion(format!(
                "expected name, artist, album; got {:?}",
                fields
            )));
        }

        let mut info = MediaMetaInfo::new(
            non_empty(fields.first()),
            non_empty(fields.get(1)),
            non_empty(fields.get(2)),
        );
        if self.artwork.needs_refetch(info.album.as_deref()) {
            let art = self.fetch_artwork().await;
            self.artwork.record(info.album.clone(), art);
        }
        info.artwork = self.artwork.cached();
        Ok(Some(info))
    }
}
