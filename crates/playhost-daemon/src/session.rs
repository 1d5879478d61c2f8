//! Session selector: owns the one active backend and the session it plays.
//!
//! ```text
//!   launch(source)
//!     ├── publisher.deregister()           poller goes idle
//!     ├── close (video) / stop (audio)     previous session
//!     ├── plan: backend kind + load target (directory playlist, shuffle)
//!     ├── singleton for the kind           reused or constructed
//!     ├── open + play
//!     └── publish initial snapshot, register with poller
//! ```
//!
//! The selector lives behind one `tokio::sync::Mutex`; launch, dispatch and
//! poll each hold it for their whole operation.
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use playhost_proto::config::{Config, DvdBackend, FileTypesConfig, MusicBackend, PlayerConfig, ScriptingConfig};
use playhost_proto::media::{BackendKind, FileKind, MediaSource};
use playhost_proto::protocol::SessionStatus;
use tracing::{debug, info, warn};

use crate::backend::{
    Backend, DvdPlayerBackend, JukeboxBackend, LaunchPlan, MediaBackend, PlaylistBackend,
    ScriptTimeouts, VideoBackend,
};
use crate::engine::{LoadTarget, PlayerEngine};
use crate::error::{ControlError, Result};
use crate::publisher::MetadataPublisher;
use crate::script::ScriptBridge;
use crate::tracklist;

/// Supplies the native engine and the scripting bridge a backend is built on.
pub trait EngineProvider: Send + Sync {
    fn engine(&self, kind: BackendKind) -> Arc<dyn PlayerEngine>;
    fn script_bridge(&self, kind: BackendKind) -> Arc<dyn ScriptBridge>;
}

/// Production wiring: one shared mpv engine, one OS script runner.
pub struct SystemProvider {
    engine: Arc<dyn PlayerEngine>,
    bridge: Arc<dyn ScriptBridge>,
}

impl SystemProvider {
    pub fn new(engine: Arc<dyn PlayerEngine>, bridge: Arc<dyn ScriptBridge>) -> Self {
        Self { engine, bridge }
    }
}

impl EngineProvider for SystemProvider {
    fn engine(&self, _kind: BackendKind) -> Arc<dyn PlayerEngine> {
        self.engine.clone()
    }

    fn script_bridge(&self, _kind: BackendKind) -> Arc<dyn ScriptBridge> {
        self.bridge.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSession {
    pub backend: BackendKind,
    pub source: String,
    pub is_video: bool,
    /// Playlist sessions only.
    pub first_track: Option<usize>,
}

pub struct SessionSelector {
    player: PlayerConfig,
    scripting: ScriptingConfig,
    file_types: FileTypesConfig,
    timeouts: ScriptTimeouts,
    provider: Arc<dyn EngineProvider>,
    backends: HashMap<BackendKind, Backend>,
    session: Option<PlaybackSession>,
    publisher: MetadataPublisher,
}

impl SessionSelector {
    pub fn new(config: &Config, provider: Arc<dyn EngineProvider>, publisher: MetadataPublisher) -> Self {
        Self {
            player: config.player.clone(),
            scripting: config.scripting.clone(),
            file_types: config.file_types.clone(),
            timeouts: ScriptTimeouts::from_config(&config.scripting),
            provider,
            backends: HashMap::new(),
            session: None,
            publisher,
        }
    }

    #[cfg(test)]
    pub fn publisher(&self) -> &MetadataPublisher {
        &self.publisher
    }

    #[cfg(test)]
    pub fn session(&self) -> Option<&PlaybackSession> {
        self.session.as_ref()
    }

    pub fn active_kind(&self) -> Option<BackendKind> {
        self.session.as_ref().map(|s| s.backend)
    }

    pub fn active(&self) -> Option<&dyn MediaBackend> {
        let kind = self.active_kind()?;
        self.backends.get(&kind).map(|b| b.as_dyn())
    }

    pub fn active_mut(&mut self) -> Option<&mut dyn MediaBackend> {
        let kind = self.active_kind()?;
        self.backends.get_mut(&kind).map(|b| b.as_dyn_mut())
    }

    #[cfg(test)]
    /// Number of backend singletons constructed so far.
    pub fn instantiated(&self) -> usize {
        self.backends.len()
    }

    /// The singleton for `kind`, constructed on first use.
    fn acquire(&mut self, kind: BackendKind) -> &mut Backend {
        let provider = &self.provider;
        let scripting = &self.scripting;
        let timeouts = self.timeouts;
        self.backends
            .entry(kind)
            .or_insert_with(|| construct(kind, &**provider, scripting, timeouts))
    }

    /// Which backend plays `source`, and how.
    async fn plan(&self, source: &MediaSource) -> Result<LaunchPlan> {
        let file = match source {
            MediaSource::JukeboxTrack { playlist, track } => {
                return Ok(LaunchPlan::JukeboxTrack {
                    playlist: playlist.clone(),
                    track: track.clone(),
                })
            }
            MediaSource::File(file) => file,
        };

        match file.kind {
            FileKind::Video => {
                require_media(&file.path).await?;
                Ok(LaunchPlan::Video(file.clone()))
            }
            FileKind::DvdDrive => match self.player.dvd_backend {
                DvdBackend::Native => Ok(LaunchPlan::Video(file.clone())),
                DvdBackend::DvdPlayer => Ok(LaunchPlan::Dvd),
            },
            FileKind::Playlist => {
                require_media(&file.path).await?;
                Ok(LaunchPlan::Playlist {
                    target: LoadTarget::PlaylistFile(file.path.clone()),
                    first_track: 0,
                })
            }
            FileKind::Music => match self.player.music_backend {
                MusicBackend::Jukebox => Ok(LaunchPlan::JukeboxFile(file.path.clone())),
                MusicBackend::Native if self.player.play_whole_directory => {
                    require_media(&file.path).await?;
                    let list = tracklist::directory_tracklist(
                        Path::new(&file.path),
                        &self.file_types,
                        self.player.shuffle_songs,
                    )
                    .await
                    .map_err(|e| ControlError::Launch(format!("{:#}", e)))?;
                    Ok(LaunchPlan::Playlist {
                        target: LoadTarget::Tracks(list.tracks),
                        first_track: list.start_index,
                    })
                }
                MusicBackend::Native => {
                    require_media(&file.path).await?;
                    Ok(LaunchPlan::Playlist {
                        target: LoadTarget::Tracks(vec![file.path.clone()]),
                        first_track: 0,
                    })
                }
            },
        }
    }

    /// Close (video) or stop (audio) the current session and forget it.
    /// Failures are logged; the session is dropped either way.
    pub async fn end_session(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let Some(backend) = self.backends.get_mut(&session.backend) else {
            return;
        };
        let backend = backend.as_dyn_mut();
        let result = if session.is_video {
            backend.close().await
        } else {
            backend.stop().await
        };
        match result {
            Ok(()) => info!("session: ended {} session for {}", session.backend, session.source),
            Err(e) => warn!("session: ending {} session failed: {}", session.backend, e),
        }
    }

    /// Forget the current session after the backend has been closed.
    pub fn clear_session(&mut self) {
        self.publisher.deregister();
        if let Some(session) = self.session.take() {
            info!("session: {} session closed", session.backend);
        }
    }

    pub async fn launch(&mut self, source: MediaSource) -> Result<()> {
        info!("session: launching {}", source.reference());
        self.publisher.deregister();
        self.end_session().await;

        let plan = self.plan(&source).await?;
        let kind = plan.backend_kind();
        let first_track = match &plan {
            LaunchPlan::Playlist { first_track, .. } => Some(*first_track),
            _ => None,
        };
        let is_video = matches!(&plan, LaunchPlan::Dvd)
            || matches!(&source, MediaSource::File(f) if f.kind.is_video());

        let backend = self.acquire(kind);
        let opened = match backend.open(plan).await {
            Ok(()) => backend.as_dyn_mut().play().await,
            Err(e) => Err(e),
        };
        if let Err(e) = opened {
            warn!("session: launch of {} failed: {}", source.reference(), e);
            if let Err(close_err) = backend.as_dyn_mut().close().await {
                debug!("session: cleanup close failed: {}", close_err);
            }
            return Err(match e {
                ControlError::Launch(msg) => ControlError::Launch(msg),
                other => ControlError::Launch(other.to_string()),
            });
        }

        let initial = match backend.as_dyn_mut().get_new_media_info().await {
            Ok(info) => info,
            Err(e) => {
                debug!("session: no initial metadata: {}", e);
                None
            }
        };

        self.session = Some(PlaybackSession {
            backend: kind,
            source: source.reference(),
            is_video,
            first_track,
        });
        self.publisher.register(kind);
        self.publisher.publish_initial(initial);
        info!("session: {} backend now active", kind);
        Ok(())
    }

    /// One poller tick for `generation`.
    pub async fn poll_once(&mut self, generation: u64) {
        if generation != self.publisher.generation() {
            debug!("poll: generation {} superseded", generation);
            return;
        }
        let Some(backend) = self.active_mut() else {
            return;
        };
        let result = backend.get_new_media_info().await;
        match result {
            Ok(info) => {
                self.publisher.offer(generation, info);
            }
            Err(e) => warn!("poll: metadata query failed: {}", e),
        }
    }

    /// Ask the active backend for fresh metadata outside the poll cadence.
    pub async fn refresh_media_info(&mut self) {
        let generation = self.publisher.generation();
        self.poll_once(generation).await;
    }

    pub async fn status(&self) -> SessionStatus {
        let Some(session) = self.session.as_ref() else {
            return SessionStatus::default();
        };
        let Some(backend) = self.active() else {
            return SessionStatus::default();
        };
        SessionStatus {
            backend: Some(session.backend),
            source: Some(session.source.clone()),
            is_video: session.is_video,
            is_open: backend.is_media_open().await,
            is_paused: backend.is_paused(),
        }
    }

    /// Jukebox singleton, constructed if needed, for library enumeration.
    pub fn jukebox(&mut self) -> Option<&JukeboxBackend> {
        self.acquire(BackendKind::Jukebox).as_jukebox()
    }
}

/// mpv accepts any path in `loadfile`, so a missing file is caught here.
async fn require_media(path: &str) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(ControlError::Launch(format!("{} is not a file", path))),
        Err(e) => Err(ControlError::Launch(format!("{}: {}", path, e))),
    }
}

fn construct(
    kind: BackendKind,
    provider: &dyn EngineProvider,
    scripting: &ScriptingConfig,
    timeouts: ScriptTimeouts,
) -> Backend {
    debug!("session: constructing {} backend", kind);
    match kind {
        BackendKind::Video => Backend::Video(VideoBackend::new(provider.engine(kind))),
        BackendKind::Playlist => Backend::Playlist(PlaylistBackend::new(provider.engine(kind))),
        BackendKind::Jukebox => Backend::Jukebox(JukeboxBackend::new(
            provider.script_bridge(kind),
            &scripting.jukebox_app,
            timeouts,
        )),
        BackendKind::DvdPlayer => Backend::DvdPlayer(DvdPlayerBackend::new(
            provider.script_bridge(kind),
            &scripting.dvd_app,
            timeouts,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::DaemonEvent;
    use crate::testing::{fake_selector, music_dir};
    use playhost_proto::config::Config;
    use playhost_proto::media::FileInfo;
    use tokio::sync::broadcast;

    fn file(path: &std::path::Path, kind: FileKind) -> MediaSource {
        MediaSource::File(FileInfo::new(path.to_string_lossy(), kind))
    }

    fn media_events(rx: &mut broadcast::Receiver<DaemonEvent>) -> Vec<Option<String>> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let DaemonEvent::MediaInfo(info) = ev {
                out.push(info.and_then(|i| i.title));
            }
        }
        out
    }

    #[tokio::test]
    async fn previous_session_ends_before_next_backend_is_built() {
        let (provider, selector, _rx) = fake_selector(&Config::default());
        let mut sel = selector.lock().await;
        let films = music_dir(&["a.mkv"]);
        sel.launch(file(&films.path().join("a.mkv"), FileKind::Video))
            .await
            .unwrap();
        assert_eq!(sel.active_kind(), Some(BackendKind::Video));

        let dir = music_dir(&["01.mp3", "02.mp3"]);
        sel.launch(file(&dir.path().join("01.mp3"), FileKind::Music))
            .await
            .unwrap();

        let journal = provider.journal();
        let closed = journal.iter().position(|e| e == "stop").unwrap();
        let built = journal
            .iter()
            .position(|e| e == "construct playlist")
            .unwrap();
        assert!(closed < built, "{:?}", journal);
        assert_eq!(sel.active_kind(), Some(BackendKind::Playlist));
        assert_eq!(sel.instantiated(), 2);
    }

    #[tokio::test]
    async fn audio_session_is_stopped_not_closed() {
        let (provider, selector, _rx) = fake_selector(&Config::default());
        let mut sel = selector.lock().await;
        let dir = music_dir(&["01.mp3"]);
        sel.launch(file(&dir.path().join("01.mp3"), FileKind::Music))
            .await
            .unwrap();
        provider.journal.lock().unwrap().clear();

        sel.launch(file(&dir.path().join("01.mp3"), FileKind::Music))
            .await
            .unwrap();
        let journal = provider.journal();
        assert_eq!(&journal[..3], &["pause true", "play_index 0", "pause true"]);
        assert!(!journal.iter().any(|e| e == "stop"));
        // singleton reused
        assert_eq!(sel.instantiated(), 1);
    }

    #[tokio::test]
    async fn directory_launch_starts_at_requested_track() {
        let (provider, selector, _rx) = fake_selector(&Config::default());
        let mut sel = selector.lock().await;
        let dir = music_dir(&["01.mp3", "02.mp3", "03.mp3"]);
        sel.launch(file(&dir.path().join("02.mp3"), FileKind::Music))
            .await
            .unwrap();

        let journal = provider.journal();
        assert!(journal.iter().any(|e| e.starts_with("load tracks ") && e.contains("03.mp3")));
        assert!(journal.contains(&"play_index 1".to_string()));
        assert_eq!(sel.session().unwrap().first_track, Some(1));
    }

    #[tokio::test]
    async fn single_file_when_whole_directory_disabled() {
        let mut config = Config::default();
        config.player.play_whole_directory = false;
        let (provider, selector, _rx) = fake_selector(&config);
        let mut sel = selector.lock().await;
        let dir = music_dir(&["01.mp3", "02.mp3"]);
        let path = dir.path().join("02.mp3");
        sel.launch(file(&path, FileKind::Music)).await.unwrap();

        let expected = format!("load tracks {}", path.to_string_lossy());
        assert!(provider.journal().contains(&expected));
    }

    #[tokio::test]
    async fn backend_choice_follows_config() {
        let mut config = Config::default();
        config.player.music_backend = MusicBackend::Jukebox;
        config.player.dvd_backend = DvdBackend::DvdPlayer;
        let (provider, selector, _rx) = fake_selector(&config);
        let mut sel = selector.lock().await;

        sel.launch(MediaSource::File(FileInfo::new("/music/a.mp3", FileKind::Music)))
            .await
            .unwrap();
        assert_eq!(sel.active_kind(), Some(BackendKind::Jukebox));
        assert_eq!(provider.bridge.count("play (POSIX file \"/music/a.mp3\")"), 1);

        sel.launch(MediaSource::File(FileInfo::new("/dev/disk3", FileKind::DvdDrive)))
            .await
            .unwrap();
        assert_eq!(sel.active_kind(), Some(BackendKind::DvdPlayer));
        assert!(sel.session().unwrap().is_video);
        // the jukebox session was stopped, not quit
        assert_eq!(provider.bridge.count("\nstop\n"), 1);
        assert_eq!(provider.bridge.count("quit"), 0);
    }

    #[tokio::test]
    async fn failed_launch_leaves_nothing_active() {
        let (provider, selector, _rx) = fake_selector(&Config::default());
        let mut sel = selector.lock().await;
        provider.engine_for(BackendKind::Video).fail_next("load");
        let films = music_dir(&["broken.mkv"]);

        let err = sel
            .launch(file(&films.path().join("broken.mkv"), FileKind::Video))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Launch(_)));
        assert!(sel.session().is_none());
        assert!(sel.active().is_none());
        assert!(sel.publisher().watch_registration().borrow().backend.is_none());
    }

    #[tokio::test]
    async fn missing_video_is_a_launch_failure() {
        let (provider, selector, _rx) = fake_selector(&Config::default());
        let mut sel = selector.lock().await;
        let err = sel
            .launch(MediaSource::File(FileInfo::new("/no/such/film.mkv", FileKind::Video)))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Launch(_)));
        assert!(sel.active_kind().is_none());
        assert!(!provider.journal().iter().any(|e| e.starts_with("load")));
    }

    #[tokio::test]
    async fn missing_track_in_existing_directory_is_a_launch_failure() {
        let (provider, selector, _rx) = fake_selector(&Config::default());
        let mut sel = selector.lock().await;
        let dir = music_dir(&["01.mp3"]);
        let err = sel
            .launch(file(&dir.path().join("ghost.mp3"), FileKind::Music))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Launch(_)));
        assert!(sel.active_kind().is_none());
        assert!(!provider.journal().iter().any(|e| e.starts_with("load")));
    }

    #[tokio::test]
    async fn missing_playlist_file_is_a_launch_failure() {
        let (_provider, selector, _rx) = fake_selector(&Config::default());
        let mut sel = selector.lock().await;
        let dir = music_dir(&["01.mp3"]);
        let err = sel
            .launch(file(&dir.path().join("gone.m3u"), FileKind::Playlist))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Launch(_)));
        assert!(sel.active_kind().is_none());
    }

    #[tokio::test]
    async fn missing_directory_is_a_launch_failure() {
        let (_provider, selector, _rx) = fake_selector(&Config::default());
        let mut sel = selector.lock().await;
        let err = sel
            .launch(MediaSource::File(FileInfo::new(
                "/no/such/dir/track.mp3",
                FileKind::Music,
            )))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Launch(_)));
        assert!(sel.active_kind().is_none());
    }

    #[tokio::test]
    async fn backend_swap_republishes_same_track() {
        let (provider, selector, mut rx) = fake_selector(&Config::default());
        let mut sel = selector.lock().await;

        let dir = music_dir(&["01.mp3"]);
        let path = dir.path().join("01.mp3");
        let engine = provider.engine_for(BackendKind::Playlist);
        engine.set_current(&path.to_string_lossy(), None);
        engine.set_metadata(&[("title", "Song"), ("artist", "Band")]);
        sel.launch(file(&path, FileKind::Music)).await.unwrap();

        provider.bridge.respond(
            "get {name, artist, album}",
            Ok(crate::script::ScriptValue::List(vec![
                "Song".into(),
                "Band".into(),
                "Album".into(),
            ])),
        );
        sel.launch(MediaSource::JukeboxTrack {
            playlist: "Library".into(),
            track: "Song".into(),
        })
        .await
        .unwrap();

        assert_eq!(
            media_events(&mut rx),
            vec![Some("Song".to_string()), Some("Song".to_string())]
        );
    }

    #[tokio::test]
    async fn stale_generation_poll_is_ignored() {
        let (provider, selector, mut rx) = fake_selector(&Config::default());
        let mut sel = selector.lock().await;
        let dir = music_dir(&["01.mp3", "02.mp3"]);
        sel.launch(file(&dir.path().join("01.mp3"), FileKind::Music))
            .await
            .unwrap();
        let stale = sel.publisher().generation();
        sel.launch(file(&dir.path().join("02.mp3"), FileKind::Music))
            .await
            .unwrap();
        media_events(&mut rx);

        let engine = provider.engine_for(BackendKind::Playlist);
        engine.set_current(&dir.path().join("02.mp3").to_string_lossy(), Some("02"));
        sel.poll_once(stale).await;
        assert!(media_events(&mut rx).is_empty());

        let current = sel.publisher().generation();
        sel.poll_once(current).await;
        assert_eq!(media_events(&mut rx), vec![Some("02".to_string())]);
    }

    #[tokio::test]
    async fn poller_picks_up_track_changes() {
        let mut config = Config::default();
        config.player.poll_interval_ms = 10;
        let (provider, selector, mut rx) = fake_selector(&config);
        let registration = selector.lock().await.publisher().watch_registration();
        let poller = crate::poller::spawn(
            selector.clone(),
            registration,
            std::time::Duration::from_millis(10),
        );

        let dir = music_dir(&["01.mp3", "02.mp3"]);
        selector
            .lock()
            .await
            .launch(file(&dir.path().join("01.mp3"), FileKind::Music))
            .await
            .unwrap();
        provider
            .engine_for(BackendKind::Playlist)
            .set_current(&dir.path().join("02.mp3").to_string_lossy(), Some("Second"));

        let found = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                if let Ok(DaemonEvent::MediaInfo(Some(info))) = rx.recv().await {
                    if info.title.as_deref() == Some("Second") {
                        break;
                    }
                }
            }
        })
        .await;
        assert!(found.is_ok());
        poller.abort();
    }

    #[tokio::test]
    async fn poller_survives_backend_faults() {
        let (provider, selector, mut rx) = fake_selector(&Config::default());
        let registration = selector.lock().await.publisher().watch_registration();
        let poller = crate::poller::spawn(
            selector.clone(),
            registration,
            std::time::Duration::from_millis(10),
        );

        {
            let mut sel = selector.lock().await;
            sel.launch(MediaSource::JukeboxTrack {
                playlist: "Library".into(),
                track: "Song".into(),
            })
            .await
            .unwrap();
            // An integer where a list is expected fails coercion twice,
            // then the application answers normally.
            provider.bridge.respond(
                "get {name, artist, album}",
                Ok(crate::script::ScriptValue::List(vec![
                    "Second".into(),
                    "Band".into(),
                    "Album".into(),
                ])),
            );
            provider.bridge.respond_seq(
                "{name, artist, album} of current track",
                vec![
                    Ok(crate::script::ScriptValue::Int(3)),
                    Ok(crate::script::ScriptValue::Int(3)),
                ],
            );
        }

        let found = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                if let Ok(DaemonEvent::MediaInfo(Some(info))) = rx.recv().await {
                    if info.title.as_deref() == Some("Second") {
                        break;
                    }
                }
            }
        })
        .await;
        assert!(found.is_ok());
        // launch snapshot, two faulty polls, one good one
        assert!(provider.bridge.count("get {name, artist, album}") >= 4);
        poller.abort();
    }
}
