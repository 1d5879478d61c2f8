//! Background metadata poller.
//!
//! Sleeps on the registration channel while nothing is registered; otherwise
//! ticks every `interval`, locking the selector for each poll.  A poll whose
//! registration was replaced while it waited for the lock is skipped.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::publisher::Registration;
use crate::session::SessionSelector;

pub fn spawn(
    selector: Arc<Mutex<SessionSelector>>,
    registration: watch::Receiver<Registration>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(run(selector, registration, interval))
}

pub async fn run(
    selector: Arc<Mutex<SessionSelector>>,
    mut registration: watch::Receiver<Registration>,
    interval: Duration,
) {
    info!("poller: started ({:?} interval)", interval);
    loop {
        let current = *registration.borrow_and_update();
        if current.backend.is_none() {
            debug!("poller: idle");
            if registration.changed().await.is_err() {
                break;
            }
            continue;
        }

        tokio::select! {
            changed = registration.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        selector.lock().await.poll_once(current.generation).await;
    }
    info!("poller: registration channel closed, stopping");
}
