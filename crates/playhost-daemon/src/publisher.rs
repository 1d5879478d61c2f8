//! Now-playing fan-out with deduplication.
//!
//! The publisher remembers the last snapshot it emitted and the current
//! registration generation.  Every registration change (a new backend to
//! watch, or none) bumps the generation and forgets the last snapshot, so a
//! new session always gets its first snapshot through.
use playhost_proto::media::{BackendKind, MediaMetaInfo};
use tokio::sync::{broadcast, watch};
use tracing::debug;

/// Events relayed to connected clients.
#[derive(Debug, Clone)]
pub enum DaemonEvent {
    MediaInfo(Option<MediaMetaInfo>),
    PlayerToPoll(Option<BackendKind>),
    Log(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub generation: u64,
    pub backend: Option<BackendKind>,
}

pub struct MetadataPublisher {
    events: broadcast::Sender<DaemonEvent>,
    registration: watch::Sender<Registration>,
    generation: u64,
    last: Option<MediaMetaInfo>,
}

impl MetadataPublisher {
    pub fn new(events: broadcast::Sender<DaemonEvent>) -> Self {
        let (registration, _) = watch::channel(Registration {
            generation: 0,
            backend: None,
        });
        Self {
            events,
            registration,
            generation: 0,
            last: None,
        }
    }

    #[cfg(test)]
    pub fn events(&self) -> broadcast::Sender<DaemonEvent> {
        self.events.clone()
    }

    pub fn watch_registration(&self) -> watch::Receiver<Registration> {
        self.registration.subscribe()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[cfg(test)]
    pub fn last_published(&self) -> Option<&MediaMetaInfo> {
        self.last.as_ref()
    }

    fn set_registration(&mut self, backend: Option<BackendKind>) -> u64 {
        self.generation += 1;
        self.last = None;
        self.registration.send_replace(Registration {
            generation: self.generation,
            backend,
        });
        let _ = self.events.send(DaemonEvent::PlayerToPoll(backend));
        self.generation
    }

    /// Start watching `backend`; returns the new generation.
    pub fn register(&mut self, backend: BackendKind) -> u64 {
        self.set_registration(Some(backend))
    }

    pub fn deregister(&mut self) {
        if self.registration.borrow().backend.is_some() {
            self.set_registration(None);
        }
    }

    /// Snapshot pushed right after a launch, before the first poll.  `None`
    /// is sent too so clients clear the previous session's display.
    pub fn publish_initial(&mut self, info: Option<MediaMetaInfo>) {
        self.last = info.clone();
        let _ = self.events.send(DaemonEvent::MediaInfo(info));
    }

    /// Emit `info` unless it is absent, stale, or the same track as the last
    /// emitted snapshot.  Returns whether it was emitted.
    pub fn offer(&mut self, generation: u64, info: Option<MediaMetaInfo>) -> bool {
        if generation != self.generation {
            debug!(
                "publisher: dropping result of generation {} (current {})",
                generation, self.generation
            );
            return false;
        }
        let Some(info) = info else {
            return false;
        };
        if let Some(last) = &self.last {
            if last.same_track(&info) {
                return false;
            }
        }
        debug!(
            "publisher: now playing {:?} / {:?}",
            info.title, info.artist
        );
        self.last = Some(info.clone());
        let _ = self.events.send(DaemonEvent::MediaInfo(Some(info)));
        true
    }
}
