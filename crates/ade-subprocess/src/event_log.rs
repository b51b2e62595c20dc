use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use ade_core::Event;

/// Append-only NDJSON sink for a run or environment build. Shared by the two
/// stdout/stderr drainers and the runner's own `<scope>.start`/
/// `<scope>.complete` envelope events, so every writer goes through one file
/// handle guarded by a mutex rather than racing independent opens.
pub struct EventLog {
    path: PathBuf,
    file: Mutex<fs::File>,
}

impl EventLog {
    pub async fn open(path: impl Into<PathBuf>) -> ade_core::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a pre-built [`Event`] (used for the runner's own envelope
    /// events).
    pub async fn append_event(&self, event: &Event) -> ade_core::Result<()> {
        let line = event.to_ndjson_line()?;
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Appends an arbitrary JSON object verbatim, used for lines that
    /// successfully decoded out of the child's stdout/stderr.
    pub async fn append_value(&self, value: &Value) -> ade_core::Result<()> {
        let mut line = serde_json::to_string(value)?;
        line.push('\n');
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn append_value_writes_one_line_per_call() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.ndjson");
        let log = EventLog::open(&path).await.unwrap();
        log.append_value(&serde_json::json!({"event": "a"}))
            .await
            .unwrap();
        log.append_value(&serde_json::json!({"event": "b"}))
            .await
            .unwrap();

        let contents = fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
