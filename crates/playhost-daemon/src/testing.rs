//! Recording fakes for the engine and scripting seams.
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use playhost_proto::media::BackendKind;

use crate::engine::{LoadTarget, PlayerEngine};
use crate::script::{BridgeError, ScriptBridge, ScriptValue};
use crate::session::EngineProvider;

pub type Journal = Arc<Mutex<Vec<String>>>;

#[derive(Default)]
struct EngineState {
    loaded: bool,
    volume: i64,
    path: Option<String>,
    title: Option<String>,
    metadata: HashMap<String, String>,
    fail_next: Vec<String>,
}

/// Engine that records each call as a short line in a journal.
pub struct FakeEngine {
    journal: Journal,
    state: Mutex<EngineState>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::with_journal(Journal::default())
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            state: Mutex::new(EngineState {
                volume: 100,
                ..EngineState::default()
            }),
        }
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    pub fn clear_journal(&self) {
        self.journal.lock().unwrap().clear();
    }

    /// Fail the next call whose journal line starts with `prefix`.
    pub fn fail_next(&self, prefix: &str) {
        self.state.lock().unwrap().fail_next.push(prefix.to_string());
    }

    pub fn set_current(&self, path: &str, title: Option<&str>) {
        let mut st = self.state.lock().unwrap();
        st.path = Some(path.to_string());
        st.title = title.map(str::to_string);
    }

    pub fn set_metadata(&self, tags: &[(&str, &str)]) {
        self.state.lock().unwrap().metadata = tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
    }

    fn record(&self, line: String) -> anyhow::Result<()> {
        {
            let mut st = self.state.lock().unwrap();
            if let Some(pos) = st.fail_next.iter().position(|p| line.starts_with(p.as_str())) {
                st.fail_next.remove(pos);
                anyhow::bail!("injected failure: {}", line);
            }
        }
        self.journal.lock().unwrap().push(line);
        Ok(())
    }
}

#[async_trait]
impl PlayerEngine for FakeEngine {
    async fn load(&self, target: &LoadTarget) -> anyhow::Result<()> {
        let line = match target {
            LoadTarget::File(p) => format!("load file {}", p),
            LoadTarget::PlaylistFile(p) => format!("load list {}", p),
            LoadTarget::Tracks(t) => format!("load tracks {}", t.join(",")),
        };
        self.record(line)?;
        self.state.lock().unwrap().loaded = true;
        Ok(())
    }

    async fn media_loaded(&self) -> bool {
        self.state.lock().unwrap().loaded
    }

    async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.record(format!("pause {}", paused))
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.record("stop".to_string())?;
        self.state.lock().unwrap().loaded = false;
        Ok(())
    }

    async fn seek_relative(&self, secs: f64) -> anyhow::Result<()> {
        self.record(format!("seek {}", secs))
    }

    async fn seek_to(&self, secs: f64) -> anyhow::Result<()> {
        self.record(format!("seek_to {}", secs))
    }

    async fn play_index(&self, index: usize) -> anyhow::Result<()> {
        self.record(format!("play_index {}", index))
    }

    async fn next(&self) -> anyhow::Result<()> {
        self.record("next".to_string())
    }

    async fn prev(&self) -> anyhow::Result<()> {
        self.record("prev".to_string())
    }

    async fn set_volume(&self, volume: i64) -> anyhow::Result<()> {
        self.record(format!("volume {}", volume))?;
        self.state.lock().unwrap().volume = volume;
        Ok(())
    }

    async fn volume(&self) -> anyhow::Result<i64> {
        Ok(self.state.lock().unwrap().volume)
    }

    async fn toggle_mute(&self) -> anyhow::Result<()> {
        self.record("mute".to_string())
    }

    async fn set_fullscreen(&self, on: bool) -> anyhow::Result<()> {
        self.record(format!("fullscreen {}", on))
    }

    async fn current_path(&self) -> Option<String> {
        self.state.lock().unwrap().path.clone()
    }

    async fn media_title(&self) -> Option<String> {
        self.state.lock().unwrap().title.clone()
    }

    async fn metadata(&self) -> HashMap<String, String> {
        self.state.lock().unwrap().metadata.clone()
    }
}

fn replay(result: &Result<ScriptValue, BridgeError>) -> Result<ScriptValue, BridgeError> {
    match result {
        Ok(v) => Ok(v.clone()),
        Err(BridgeError::Timeout(d)) => Err(BridgeError::Timeout(*d)),
        Err(e) => Err(BridgeError::Execution(e.to_string())),
    }
}

struct Rule {
    pattern: String,
    queue: VecDeque<Result<ScriptValue, BridgeError>>,
    sticky: Option<Result<ScriptValue, BridgeError>>,
}

/// Bridge answering by substring match; unmatched scripts return `Nothing`.
/// The most recently registered matching rule wins.
#[derive(Default)]
pub struct FakeBridge {
    rules: Mutex<Vec<Rule>>,
    scripts: Mutex<Vec<String>>,
}

impl FakeBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, pattern: &str, result: Result<ScriptValue, BridgeError>) {
        let mut rules = self.rules.lock().unwrap();
        rules.retain(|r| r.pattern != pattern);
        rules.push(Rule {
            pattern: pattern.to_string(),
            queue: VecDeque::new(),
            sticky: Some(result),
        });
    }

    /// Answer successive matching scripts from `results`, then fall through.
    pub fn respond_seq(&self, pattern: &str, results: Vec<Result<ScriptValue, BridgeError>>) {
        let mut rules = self.rules.lock().unwrap();
        rules.retain(|r| r.pattern != pattern);
        rules.push(Rule {
            pattern: pattern.to_string(),
            queue: results.into(),
            sticky: None,
        });
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.scripts
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.contains(pattern))
            .count()
    }

    pub fn clear(&self) {
        self.scripts.lock().unwrap().clear();
    }
}

#[async_trait]
impl ScriptBridge for FakeBridge {
    async fn execute(&self, script: &str, _budget: Duration) -> Result<ScriptValue, BridgeError> {
        self.scripts.lock().unwrap().push(script.to_string());
        let mut rules = self.rules.lock().unwrap();
        for rule in rules.iter_mut().rev() {
            if !script.contains(rule.pattern.as_str()) {
                continue;
            }
            if let Some(next) = rule.queue.pop_front() {
                return next;
            }
            if let Some(sticky) = &rule.sticky {
                return replay(sticky);
            }
        }
        Ok(ScriptValue::Nothing)
    }
}

/// Hands every backend its own fake engine and bridge, journaling
/// construction into the shared journal.
pub struct FakeProvider {
    pub journal: Journal,
    pub engines: Mutex<HashMap<BackendKind, Arc<FakeEngine>>>,
    pub bridge: Arc<FakeBridge>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            journal: Journal::default(),
            engines: Mutex::new(HashMap::new()),
            bridge: Arc::new(FakeBridge::new()),
        }
    }

    /// Engine handed to `kind`, created on demand.
    pub fn engine_for(&self, kind: BackendKind) -> Arc<FakeEngine> {
        self.engines
            .lock()
            .unwrap()
            .entry(kind)
            .or_insert_with(|| Arc::new(FakeEngine::with_journal(self.journal.clone())))
            .clone()
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }
}

impl EngineProvider for FakeProvider {
    fn engine(&self, kind: BackendKind) -> Arc<dyn PlayerEngine> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("construct {}", kind));
        self.engine_for(kind)
    }

    fn script_bridge(&self, kind: BackendKind) -> Arc<dyn ScriptBridge> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("construct {}", kind));
        self.bridge.clone()
    }
}

/// Selector wired to a `FakeProvider`, plus a subscriber to its events.
pub fn fake_selector(
    config: &playhost_proto::config::Config,
) -> (
    Arc<FakeProvider>,
    Arc<tokio::sync::Mutex<crate::session::SessionSelector>>,
    tokio::sync::broadcast::Receiver<crate::publisher::DaemonEvent>,
) {
    let provider = Arc::new(FakeProvider::new());
    let (events, rx) = tokio::sync::broadcast::channel(64);
    let publisher = crate::publisher::MetadataPublisher::new(events);
    let selector = crate::session::SessionSelector::new(config, provider.clone(), publisher);
    (provider, Arc::new(tokio::sync::Mutex::new(selector)), rx)
}

/// Directory holding `names` as small placeholder files.
pub fn music_dir(names: &[&str]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in names {
        std::fs::write(dir.path().join(name), b"x").unwrap();
    }
    dir
}
