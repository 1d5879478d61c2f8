mod backend;
mod engine;
mod error;
mod http;
mod mpv;
mod poller;
mod publisher;
mod retry;
mod router;
mod script;
mod session;
mod socket;
mod tags;
mod tracklist;
mod volume;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use playhost_proto::config::Config;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::engine::MpvEngine;
use crate::publisher::{DaemonEvent, MetadataPublisher};
use crate::router::CommandRouter;
use crate::script::OsaScriptBridge;
use crate::session::{SessionSelector, SystemProvider};

/// A custom tracing layer that forwards log messages to the broadcast channel
struct BroadcastLayer {
    sender: broadcast::Sender<DaemonEvent>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<DaemonEvent>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        // Only WARN and ERROR reach clients
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = String::new();
        let now = chrono::Local::now();
        message.push_str(&format!("{} ", now.format("%H:%M:%S")));
        message.push_str(&format!("[{}] ", level));

        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // No receivers is fine
        let _ = self.sender.send(DaemonEvent::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

async fn write_pid_file(config: &Config) -> anyhow::Result<()> {
    let pid = std::process::id().to_string();
    if let Some(parent) = config.daemon.pid_file.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&config.daemon.pid_file, pid).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::args().any(|a| a == "--use-system-deps") {
        playhost_proto::platform::set_use_system_deps(true);
    }

    // Event channel first so logging can feed it
    let (events_tx, _) = broadcast::channel::<DaemonEvent>(100);

    let data_dir = playhost_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    let broadcast_layer = BroadcastLayer::new(events_tx.clone());

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(broadcast_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,playhost_daemon=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    if let Err(e) = write_pid_file(&config).await {
        warn!("Could not write pid file {:?}: {}", config.daemon.pid_file, e);
    }

    let engine = Arc::new(MpvEngine::new(
        config.player.default_volume,
        config.player.mpv_binary.clone(),
    ));
    let runner = playhost_proto::platform::resolve_binary(&config.scripting.runner)
        .unwrap_or_else(|| config.scripting.runner.clone());
    let bridge = Arc::new(OsaScriptBridge::new(runner));
    let provider = Arc::new(SystemProvider::new(engine.clone(), bridge));

    let publisher = MetadataPublisher::new(events_tx.clone());
    let registration = publisher.watch_registration();
    let selector = Arc::new(Mutex::new(SessionSelector::new(&config, provider, publisher)));
    let router = CommandRouter::new(selector.clone());

    let _poller_handle = poller::spawn(
        selector.clone(),
        registration,
        Duration::from_millis(config.player.poll_interval_ms.max(50)),
    );

    let _socket_handle = socket::start_server(
        config.server.bind_address.clone(),
        config.server.tcp_port,
        router.clone(),
        events_tx.clone(),
    );

    if config.server.http_enabled {
        let _http_handle = http::start_server(
            config.server.bind_address.clone(),
            config.server.http_port,
            router.clone(),
        );
    }

    info!("Daemon initialised, waiting for clients");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    selector.lock().await.end_session().await;
    engine.shutdown().await;
    let _ = tokio::fs::remove_file(&config.daemon.pid_file).await;

    Ok(())
}
