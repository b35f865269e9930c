use serde::{Deserialize, Serialize};

/// Human-readable operation log for one resolution run.
///
/// Every line is also emitted through `tracing` so the captured log and the
/// process log agree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunLog {
    lines: Vec<String>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!("{}", line);
        self.lines.push(line);
    }

    /// Record a problem that does not stop the run.
    pub fn warn(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::warn!("{}", line);
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn extend(&mut self, other: RunLog) {
        self.lines.extend(other.lines);
    }

    pub fn as_text(&self) -> String {
        let mut out = self.lines.join("\n");
        if !out.is_empty() {
            out.push('\n');
        }
        out
    }
}
