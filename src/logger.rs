use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::diff::diff_variables;
use crate::error::Error;
use crate::state::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLogMode {
    Full,
    Diffed,
}

/// NDJSON trace of JNAP traffic, one object per line.
pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous: Option<Snapshot>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            mode,
            file,
            previous: None,
        })
    }

    pub fn log_request(&mut self, endpoint: &str, action: &str, body: &Value) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "req",
            "endpoint": endpoint,
            "action": action,
            "body": body,
        });
        self.write_line(&entry);
    }

    pub fn log_failure(&mut self, err: &Error) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "fail",
            "error": err.to_string(),
        });
        self.write_line(&entry);
    }

    pub fn log_snapshot(&mut self, snapshot: &Snapshot) {
        let entry = match (&self.mode, &self.previous) {
            (MessageLogMode::Diffed, Some(prev)) => {
                let changes: Vec<Value> = diff_variables(prev, snapshot)
                    .into_iter()
                    .map(|c| json!({ "var": c.key.wire_name(), "old": c.old, "new": c.new }))
                    .collect();
                json!({
                    "ts": Utc::now().to_rfc3339(),
                    "dir": "snapshot",
                    "seq": snapshot.sequence(),
                    "changes": changes,
                })
            }
            _ => json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "snapshot",
                "seq": snapshot.sequence(),
                "full": true,
                "vars": variables_object(snapshot),
            }),
        };
        self.write_line(&entry);
        if self.mode == MessageLogMode::Diffed {
            self.previous = Some(snapshot.clone());
        }
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}

fn variables_object(snapshot: &Snapshot) -> Value {
    let mut vars = Map::new();
    for (key, value) in snapshot.variables() {
        vars.insert(key.wire_name(), json!(value));
    }
    Value::Object(vars)
}
