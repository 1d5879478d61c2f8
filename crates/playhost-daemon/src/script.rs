//! Scripting bridge used by the application-driven backends.
//!
//! ```text
//!   backend ──► ScriptRunner::tell(actions, budget)
//!                 │  wraps: with timeout of N seconds / tell application "X"
//!                 │  one execution at a time per runner
//!                 ▼
//!               ScriptBridge::execute(script, budget)   (trait seam)
//!                 └── OsaScriptBridge: `osascript -s s -e <script>`,
//!                     killed when the budget runs out
//! ```
//!
//! Results come back as `ScriptValue`; callers coerce with `to_int`,
//! `to_bool` and `to_list`.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::ControlError;

/// Extra wall-clock time granted to the runner process beyond the script's
/// own timeout clause, so the engine gets to report the timeout itself.
const PROCESS_GRACE: Duration = Duration::from_millis(500);

/// Typed result of one script execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptValue {
    Int(i64),
    Bool(bool),
    Text(String),
    List(Vec<String>),
    Nothing,
}

#[derive(Error, Debug)]
pub enum BridgeError {
    /// The scripting engine rejected or failed the script
    #[error("script failed: {0}")]
    Execution(String),

    #[error("script timed out after {0:?}")]
    Timeout(Duration),

    #[error("could not start script runner: {0}")]
    Spawn(#[from] std::io::Error),
}

impl BridgeError {
    /// Engine error -1728 ("can't get ...") is what the jukebox reports when
    /// there is no current track.
    pub fn is_nothing_playing(&self) -> bool {
        match self {
            BridgeError::Execution(msg) => msg.contains("-1728") || msg.contains("Can’t get"),
            _ => false,
        }
    }
}

impl From<BridgeError> for ControlError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Timeout(d) => ControlError::Timeout(d),
            other => ControlError::Backend(other.to_string()),
        }
    }
}

/// Executes a script against an external application.
#[async_trait]
pub trait ScriptBridge: Send + Sync {
    async fn execute(&self, script: &str, budget: Duration) -> Result<ScriptValue, BridgeError>;
}

// ── coercions ─────────────────────────────────────────────────────────────────

pub fn to_int(value: &ScriptValue) -> Result<i64, ControlError> {
    match value {
        ScriptValue::Int(n) => Ok(*n),
        ScriptValue::Text(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| ControlError::Coercion(format!("expected integer, got {:?}", s))),
        ScriptValue::Nothing => Err(ControlError::Coercion(
            "expected integer, got nothing".to_string(),
        )),
        other => Err(ControlError::Coercion(format!(
            "expected integer, got {:?}",
            other
        ))),
    }
}

pub fn to_bool(value: &ScriptValue) -> Result<bool, ControlError> {
    match value {
        ScriptValue::Bool(b) => Ok(*b),
        ScriptValue::Text(s) => Ok(s.trim().eq_ignore_ascii_case("true")),
        ScriptValue::Nothing => Ok(false),
        other => Err(ControlError::Coercion(format!(
            "expected boolean, got {:?}",
            other
        ))),
    }
}

pub fn to_list(value: &ScriptValue) -> Result<Vec<String>, ControlError> {
    match value {
        ScriptValue::List(items) => Ok(items.clone()),
        ScriptValue::Text(s) => Ok(vec![s.clone()]),
        ScriptValue::Nothing => Ok(Vec::new()),
        other => Err(ControlError::Coercion(format!(
            "expected list, got {:?}",
            other
        ))),
    }
}

// ── runner ────────────────────────────────────────────────────────────────────

/// Per-backend front end to a bridge: adds the timeout clause and the
/// `tell application` block, and serializes executions because the engine is
/// not reentrant.
pub struct ScriptRunner {
    bridge: Arc<dyn ScriptBridge>,
    app: String,
    gate: Mutex<()>,
}

impl ScriptRunner {
    pub fn new(bridge: Arc<dyn ScriptBridge>, app: impl Into<String>) -> Self {
        Self {
            bridge,
            app: app.into(),
            gate: Mutex::new(()),
        }
    }

    /// Run `actions` inside `tell application "<app>"`.
    pub async fn tell(&self, actions: &str, budget: Duration) -> Result<ScriptValue, BridgeError> {
        let script = format!("tell application \"{}\"\n{}\nend tell", self.app, actions);
        self.run(&script, budget).await
    }

    /// Run a free-standing script.
    pub async fn run(&self, script: &str, budget: Duration) -> Result<ScriptValue, BridgeError> {
        let wrapped = with_timeout(script, budget);
        let _guard = self.gate.lock().await;
        debug!("script[{}]: {}", self.app, script.replace('\n', " ⏎ "));
        self.bridge.execute(&wrapped, budget).await
    }

    /// System Events process count for the application.
    pub async fn app_running(&self, budget: Duration) -> Result<bool, ControlError> {
        let script = format!(
            "tell application \"System Events\"\n\
             set isRunning to ((application processes whose (name is equal to \"{}\")) count)\n\
             end tell\n\
             if isRunning is greater than 0 then\n\
             return true\n\
             else\n\
             return false\n\
             end if",
            self.app
        );
        let value = self.run(&script, budget).await?;
        to_bool(&value)
    }

    /// Send the application's fullscreen shortcut (cmd-F).
    pub async fn full_screen_keystroke(&self, budget: Duration) -> Result<(), BridgeError> {
        self.tell("activate", budget).await?;
        self.run(
            "tell application \"System Events\"\nkeystroke \"f\" using command down\nend tell",
            budget,
        )
        .await?;
        Ok(())
    }
}

/// Wrap a script in the engine's own timeout clause.
pub fn with_timeout(script: &str, budget: Duration) -> String {
    let secs = budget.as_secs().max(1);
    format!("with timeout of {} seconds\n{}\nend timeout", secs, script)
}

/// Quote a string for embedding in a script literal.
pub fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

// ── osascript bridge ──────────────────────────────────────────────────────────

/// Runs scripts through the OS script runner (`osascript` by default).
pub struct OsaScriptBridge {
    runner: PathBuf,
}

impl OsaScriptBridge {
    pub fn new(runner: PathBuf) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl ScriptBridge for OsaScriptBridge {
    async fn execute(&self, script: &str, budget: Duration) -> Result<ScriptValue, BridgeError> {
        let child = tokio::process::Command::new(&self.runner)
            .arg("-s")
            .arg("s")
            .arg("-e")
            .arg(script)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(budget + PROCESS_GRACE, child.wait_with_output())
            .await
            .map_err(|_| BridgeError::Timeout(budget))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.contains("-1712") {
                // errAETimeout from the script's own timeout clause
                return Err(BridgeError::Timeout(budget));
            }
            return Err(BridgeError::Execution(stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_output(&stdout))
    }
}

// ── output parsing ────────────────────────────────────────────────────────────

/// Parse runner output printed in source form (`-s s`).
pub fn parse_output(raw: &str) -> ScriptValue {
    let text = raw.trim();
    if text.is_empty() || text == "missing value" {
        return ScriptValue::Nothing;
    }
    match text {
        "true" => return ScriptValue::Bool(true),
        "false" => return ScriptValue::Bool(false),
        _ => {}
    }
    if let Ok(n) = text.parse::<i64>() {
        return ScriptValue::Int(n);
    }
    if text.starts_with('{') && text.ends_with('}') {
        let inner = &text[1..text.len() - 1];
        return ScriptValue::List(split_list(inner).into_iter().map(unquote).collect());
    }
    ScriptValue::Text(unquote(text))
}

/// Split a list body on top-level commas, respecting quotes, nested braces
/// and raw-data guillemets.
fn split_list(body: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0usize;
    for (i, c) in body.char_indices() {
        if in_quotes {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_quotes = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            '{' | '«' => depth += 1,
            '}' | '»' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                items.push(body[start..i].trim());
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    let last = body[start..].trim();
    if !last.is_empty() || !items.is_empty() {
        items.push(last);
    }
    items
}

fn unquote(item: &str) -> String {
    let item = item.trim();
    if item.len() >= 2 && item.starts_with('"') && item.ends_with('"') {
        let mut out = String::with_capacity(item.len());
        let mut chars = item[1..item.len() - 1].chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(other) => out.push(other),
                    None => {}
                }
            } else {
                out.push(c);
            }
        }
        out
    } else if item == "missing value" {
        String::new()
    } else {
        item.to_string()
    }
}

/// Decode a raw-data literal such as `«data PNGf89504E47»` into bytes.
pub fn parse_raw_data(text: &str) -> Option<Vec<u8>> {
    let body = text.trim().strip_prefix("«data ")?.strip_suffix('»')?;
    // four-character type code, then hex
    let hex = body.get(4..)?;
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBridge;

    #[test]
    fn parses_scalars() {
        assert_eq!(parse_output("42\n"), ScriptValue::Int(42));
        assert_eq!(parse_output("-1"), ScriptValue::Int(-1));
        assert_eq!(parse_output("true"), ScriptValue::Bool(true));
        assert_eq!(parse_output(""), ScriptValue::Nothing);
        assert_eq!(parse_output("missing value"), ScriptValue::Nothing);
        assert_eq!(
            parse_output("\"say \\\"hi\\\"\""),
            ScriptValue::Text("say \"hi\"".to_string())
        );
    }

    #[test]
    fn parses_lists_with_commas_in_strings() {
        assert_eq!(
            parse_output("{\"Hello, Goodbye\", \"The Beatles\", \"1\"}"),
            ScriptValue::List(vec![
                "Hello, Goodbye".to_string(),
                "The Beatles".to_string(),
                "1".to_string()
            ])
        );
        assert_eq!(parse_output("{}"), ScriptValue::List(vec![]));
    }

    #[test]
    fn decodes_raw_data() {
        assert_eq!(
            parse_raw_data("«data PNGf89504E47»"),
            Some(vec![0x89, 0x50, 0x4E, 0x47])
        );
        assert_eq!(parse_raw_data("«data PNGf8950Z»"), None);
        assert_eq!(parse_raw_data("plain"), None);
    }

    #[test]
    fn coercions() {
        assert_eq!(to_int(&ScriptValue::Text(" 17 ".into())).unwrap(), 17);
        assert!(matches!(
            to_int(&ScriptValue::Nothing),
            Err(ControlError::Coercion(_))
        ));
        assert!(matches!(
            to_int(&ScriptValue::Text("loud".into())),
            Err(ControlError::Coercion(_))
        ));
        assert!(!to_bool(&ScriptValue::Nothing).unwrap());
        assert!(to_bool(&ScriptValue::Text("TRUE".into())).unwrap());
        assert!(to_bool(&ScriptValue::Int(1)).is_err());
        assert_eq!(to_list(&ScriptValue::Nothing).unwrap(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn runner_wraps_tell_and_timeout() {
        let bridge = Arc::new(FakeBridge::new());
        bridge.respond("get sound volume", Ok(ScriptValue::Int(30)));
        let runner = ScriptRunner::new(bridge.clone(), "Jukebox");

        let value = runner
            .tell("get sound volume", Duration::from_secs(3))
            .await
            .unwrap();
        assert_eq!(value, ScriptValue::Int(30));

        let scripts = bridge.scripts();
        assert_eq!(scripts.len(), 1);
        assert!(scripts[0].starts_with("with timeout of 3 seconds\n"));
        assert!(scripts[0].contains("tell application \"Jukebox\"\nget sound volume\nend tell"));
        assert!(scripts[0].ends_with("end timeout"));
    }

    #[test]
    fn quote_escapes() {
        assert_eq!(quote("a \"b\""), "\"a \\\"b\\\"\"");
    }
}
