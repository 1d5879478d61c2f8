/// mpv IPC driver with separated reader/writer tasks.
///
/// ```text
///   MpvDriver::spawn_and_connect()
///         │
///         ├── writer_task   ← receives PendingRequest via mpsc, writes → socket
///         └── reader_task   ← reads JSON lines from socket
///                                ├── response (has request_id) → matched oneshot::Sender
///                                └── event                     → debug log
/// ```
///
/// `MpvHandle` is cheap to clone; `send(cmd)` resolves to the reply `Value`.
/// `MpvDriver` owns the child process.
///
/// Platform notes:
/// - Unix:   Unix domain sockets
/// - Windows: Named pipes  \\.\pipe\<name>
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

/// Per-request IPC budget.
pub const IPC_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

// ── public handle ─────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(IPC_TIMEOUT, reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    /// Writer task still accepting requests.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns the mpv child process.  The process is started idle with a window
/// that only appears once video is loaded.
pub struct MpvDriver {
    socket_name: String,
    binary: Option<PathBuf>,
    process: Option<tokio::process::Child>,
    pub initial_volume: u8,
}

impl MpvDriver {
    pub fn new(initial_volume: u8) -> Self {
        Self {
            socket_name: playhost_proto::platform::mpv_socket_name(),
            binary: None,
            process: None,
            initial_volume,
        }
    }

    /// Use a specific mpv binary instead of searching for one.
    pub fn with_binary(mut self, binary: PathBuf) -> Self {
        self.binary = Some(binary);
        self
    }

    pub fn process_alive(&mut self) -> bool {
        if let Some(ref mut child) = self.process {
            child.try_wait().ok().flatten().is_none()
        } else {
            false
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    fn spawn_process(&mut self) -> anyhow::Result<()> {
        let mpv_binary = match &self.binary {
            Some(b) => b.clone(),
            None => playhost_proto::platform::find_mpv_binary()
                .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?,
        };

        info!("mpv: spawning {}", mpv_binary.display());
        let child = tokio::process::Command::new(mpv_binary)
            .arg("--idle=yes")
            .arg("--force-window=no")
            .arg("--keep-open=no")
            .arg(playhost_proto::platform::mpv_socket_arg())
            .arg("--quiet")
            .arg(format!("--volume={}", self.initial_volume.min(100)))
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);
        Ok(())
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(&mut self) -> anyhow::Result<MpvHandle> {
        self.kill().await;

        let socket_path = PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        self.spawn_process()?;

        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            self.kill().await;
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(BufReader::new(read_half), write_half))
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(&mut self) -> anyhow::Result<MpvHandle> {
        self.kill().await;
        self.spawn_process()?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(BufReader::new(read_half), write_half));
            }
        }
        self.kill().await;
        anyhow::bail!("mpv named pipe did not appear")
    }
}

fn start_io_tasks<R, W>(reader: BufReader<R>, writer: W) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    // req_id → reply channel; writer inserts, reader resolves
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(writer, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(reader, pending));

    MpvHandle { tx: cmd_tx }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn fail_all(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingMap)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_all(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) else {
                    debug!("mpv reader: event {}", trimmed);
                    continue;
                };
                let mut map = pending.lock().await;
                if let Some(tx) = map.remove(&req_id) {
                    let result = if val["error"].as_str() == Some("success") {
                        Ok(val)
                    } else {
                        let err = val["error"]
                            .as_str()
                            .unwrap_or("unknown error")
                            .to_string();
                        debug!("mpv reader: response req={} err={}", req_id, err);
                        Err(anyhow::anyhow!("mpv error: {}", err))
                    };
                    let _ = tx.send(result);
                } else {
                    debug!("mpv reader: response for unknown req={}", req_id);
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_all(&pending, "mpv IPC read error").await;
                break;
            }
        }
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // register before writing so the reader can match the reply
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── convenience wrappers (used by MpvEngine) ──────────────────────────────────

impl MpvHandle {
    async fn get_property(&self, name: &str) -> anyhow::Result<Value> {
        let resp = self.send(json!(["get_property", name])).await?;
        Ok(resp.get("data").cloned().unwrap_or(Value::Null))
    }

    async fn set_property(&self, name: &str, value: Value) -> anyhow::Result<()> {
        self.send(json!(["set_property", name, value])).await?;
        Ok(())
    }

    pub async fn loadfile(&self, path: &str, append: bool) -> anyhow::Result<()> {
        let mode = if append { "append" } else { "replace" };
        self.send(json!(["loadfile", path, mode])).await?;
        Ok(())
    }

    pub async fn loadlist(&self, path: &str) -> anyhow::Result<()> {
        self.send(json!(["loadlist", path, "replace"])).await?;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(json!(["stop"])).await?;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.set_property("pause", json!(paused)).await
    }

    pub async fn seek_to(&self, secs: f64) -> anyhow::Result<()> {
        self.set_property("time-pos", json!(secs)).await
    }

    pub async fn seek_relative(&self, secs: f64) -> anyhow::Result<()> {
        self.send(json!(["seek", secs, "relative"])).await?;
        Ok(())
    }

    pub async fn play_index(&self, index: usize) -> anyhow::Result<()> {
        self.send(json!(["playlist-play-index", index])).await?;
        Ok(())
    }

    pub async fn playlist_next(&self) -> anyhow::Result<()> {
        self.send(json!(["playlist-next", "force"])).await?;
        Ok(())
    }

    pub async fn playlist_prev(&self) -> anyhow::Result<()> {
        self.send(json!(["playlist-prev", "force"])).await?;
        Ok(())
    }

    pub async fn set_volume(&self, percent: f64) -> anyhow::Result<()> {
        self.set_property("volume", json!(percent.clamp(0.0, 100.0)))
            .await
    }

    pub async fn volume(&self) -> anyhow::Result<f64> {
        self.get_property("volume")
            .await?
            .as_f64()
            .ok_or_else(|| anyhow::anyhow!("mpv volume is not a number"))
    }

    pub async fn cycle_mute(&self) -> anyhow::Result<()> {
        self.send(json!(["cycle", "mute"])).await?;
        Ok(())
    }

    pub async fn set_fullscreen(&self, on: bool) -> anyhow::Result<()> {
        self.set_property("fullscreen", json!(on)).await
    }

    pub async fn idle_active(&self) -> anyhow::Result<bool> {
        Ok(self
            .get_property("idle-active")
            .await?
            .as_bool()
            .unwrap_or(true))
    }

    /// `None` while nothing is loaded (mpv reports property unavailable).
    pub async fn path(&self) -> Option<String> {
        self.get_property("path")
            .await
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
    }

    pub async fn media_title(&self) -> Option<String> {
        self.get_property("media-title")
            .await
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
    }

    /// Container tags as reported by mpv, keys lowercased.
    pub async fn metadata(&self) -> HashMap<String, String> {
        let mut out = HashMap::new();
        if let Ok(Value::Object(map)) = self.get_property("metadata").await {
            for (k, v) in map {
                if let Some(s) = v.as_str() {
                    out.insert(k.to_ascii_lowercase(), s.to_string());
                }
            }
        }
        out
    }
}
