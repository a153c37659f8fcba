//! JSON Lines storage implementation.
//!
//! Each log is a UTF-8 file with one JSON record per line. Appends go through
//! a single lock so records from one process never interleave. Reads tolerate
//! a partially written trailing line, which is what a reader racing a writer
//! (or a crash mid-append) leaves behind.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mathprompt_core::{EvaluationRecord, PathsConfig, SessionRecord, TestEvaluationRecord};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

use super::{Result, Storage};

/// File-based JSONL storage backend.
pub struct JsonlStorage {
    eval_log: PathBuf,
    test_log: PathBuf,
    session_log: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlStorage {
    /// Storage over the log files named by `paths`. Nothing is created until
    /// the first append.
    pub fn new(paths: &PathsConfig) -> Self {
        Self {
            eval_log: paths.eval_log(),
            test_log: paths.test_log(),
            session_log: paths.session_log(),
            write_lock: Mutex::new(()),
        }
    }

    /// Storage using the default file names inside `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(&PathsConfig {
            logs_dir: dir.into(),
        })
    }

    /// Path of the training evaluation log.
    pub fn eval_log(&self) -> &Path {
        &self.eval_log
    }

    /// Path of the held-out evaluation log.
    pub fn test_log(&self) -> &Path {
        &self.test_log
    }

    /// Path of the session log.
    pub fn session_log(&self) -> &Path {
        &self.session_log
    }

    async fn append<T: Serialize + Sync>(&self, path: &Path, record: &T) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .await?;

        // A torn last line must not swallow this record.
        if file.metadata().await?.len() > 0 {
            file.seek(SeekFrom::End(-1)).await?;
            let mut last = [0u8; 1];
            file.read_exact(&mut last).await?;
            if last[0] != b'\n' {
                debug!(path = %path.display(), "Repairing torn trailing line");
                line.insert(0, '\n');
            }
        }

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Storage for JsonlStorage {
    async fn append_evaluation(&self, record: &EvaluationRecord) -> Result<()> {
        self.append(&self.eval_log, record).await
    }

    async fn append_test_evaluation(&self, record: &TestEvaluationRecord) -> Result<()> {
        self.append(&self.test_log, record).await
    }

    async fn append_session(&self, record: &SessionRecord) -> Result<()> {
        self.append(&self.session_log, record).await
    }

    async fn list_evaluations(&self) -> Result<Vec<EvaluationRecord>> {
        read_lines(&self.eval_log).await
    }

    async fn list_test_evaluations(&self) -> Result<Vec<TestEvaluationRecord>> {
        read_lines(&self.test_log).await
    }

    async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        read_lines(&self.session_log).await
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        for path in [&self.eval_log, &self.test_log, &self.session_log] {
            match fs::remove_file(path).await {
                Ok(()) => debug!(path = %path.display(), "Removed log"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Read every parseable record. A missing file is an empty log.
async fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let text = String::from_utf8_lossy(&bytes);

    let mut items = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(item) => items.push(item),
            Err(e) => debug!(path = %path.display(), line = n + 1, error = %e, "Skipping malformed log line"),
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mathprompt_core::{Problem, ProblemDetail, PromptFraming, SessionId, TokenUsage};
    use tempfile::TempDir;

    fn eval(iteration: u64, session: u64, prompt: &str, accuracy: f64) -> EvaluationRecord {
        let mut record = EvaluationRecord::new(
            iteration,
            SessionId::new(session),
            PromptFraming::single(prompt),
            vec![ProblemDetail::new(&Problem::new("1 + 1", 2.0), "2".into(), Some(2.0), true)],
        );
        record.accuracy = accuracy;
        record
    }

    fn session(n: u64) -> SessionRecord {
        SessionRecord {
            timestamp: chrono::Utc::now(),
            session: SessionId::new(n),
            success: true,
            tool_calls_made: 3,
            usage: TokenUsage::default(),
            estimated_cost_usd: 0.0,
            test_accuracy: Some(0.5),
        }
    }

    #[tokio::test]
    async fn test_missing_logs_are_empty() {
        let dir = TempDir::new().unwrap();
        let storage = JsonlStorage::in_dir(dir.path().join("logs"));

        assert!(storage.list_evaluations().await.unwrap().is_empty());
        assert!(storage.list_sessions().await.unwrap().is_empty());
        assert_eq!(storage.last_iteration().await.unwrap(), 0);
        assert_eq!(storage.last_session().await.unwrap(), None);
        assert!(storage.best_evaluation().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_append_and_list() {
        let dir = TempDir::new().unwrap();
        let storage = JsonlStorage::in_dir(dir.path().join("logs"));

        storage.append_evaluation(&eval(1, 1, "A", 0.5)).await.unwrap();
        storage.append_evaluation(&eval(2, 1, "B", 0.7)).await.unwrap();
        storage.append_session(&session(1)).await.unwrap();

        let evals = storage.list_evaluations().await.unwrap();
        assert_eq!(evals.len(), 2);
        assert_eq!(evals[1].framing, PromptFraming::single("B"));
        let sessions = storage.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session, SessionId::new(1));
        assert_eq!(sessions[0].test_accuracy, Some(0.5));

        let raw = fs::read_to_string(storage.eval_log()).await.unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_best_is_first_maximum() {
        let dir = TempDir::new().unwrap();
        let storage = JsonlStorage::in_dir(dir.path());

        for (i, (prompt, acc)) in [("A", 0.5), ("B", 0.8), ("C", 0.6), ("D", 0.8)].iter().enumerate() {
            storage.append_evaluation(&eval(i as u64 + 1, 1, prompt, *acc)).await.unwrap();
        }

        let best = storage.best_evaluation().await.unwrap().unwrap();
        assert_eq!(best.framing, PromptFraming::single("B"));
        assert_eq!(best.accuracy, 0.8);
        assert_eq!(best.iteration, 2);
    }

    #[tokio::test]
    async fn test_iteration_and_session_recovery() {
        let dir = TempDir::new().unwrap();
        let storage = JsonlStorage::in_dir(dir.path());

        for i in 1..=3 {
            storage.append_evaluation(&eval(i, 2, "p", 0.1)).await.unwrap();
        }
        storage.append_session(&session(5)).await.unwrap();

        // A fresh handle over the same files sees the same maxima.
        let reopened = JsonlStorage::in_dir(dir.path());
        assert_eq!(reopened.last_iteration().await.unwrap(), 3);
        assert_eq!(reopened.last_session().await.unwrap(), Some(SessionId::new(5)));
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let storage = JsonlStorage::in_dir(dir.path());

        storage.append_evaluation(&eval(1, 1, "A", 0.5)).await.unwrap();
        let mut file = OpenOptions::new().append(true).open(storage.eval_log()).await.unwrap();
        file.write_all(b"not json\n{\"iteration\": 2, \"accur").await.unwrap();
        file.flush().await.unwrap();
        drop(file);

        let evals = storage.list_evaluations().await.unwrap();
        assert_eq!(evals.len(), 1);
        assert_eq!(evals[0].iteration, 1);
    }

    #[tokio::test]
    async fn test_append_repairs_torn_line() {
        let dir = TempDir::new().unwrap();
        let storage = JsonlStorage::in_dir(dir.path());

        fs::write(storage.eval_log(), b"{\"iteration\": 7, \"sess").await.unwrap();
        storage.append_evaluation(&eval(8, 1, "A", 0.4)).await.unwrap();

        let evals = storage.list_evaluations().await.unwrap();
        assert_eq!(evals.len(), 1);
        assert_eq!(evals[0].iteration, 8);
    }

    #[tokio::test]
    async fn test_clear_removes_logs() {
        let dir = TempDir::new().unwrap();
        let storage = JsonlStorage::in_dir(dir.path());

        storage.append_evaluation(&eval(1, 1, "A", 0.5)).await.unwrap();
        storage.append_session(&session(1)).await.unwrap();
        storage.clear().await.unwrap();
        // Clearing twice is fine.
        storage.clear().await.unwrap();

        assert!(!storage.eval_log().exists());
        assert!(storage.list_sessions().await.unwrap().is_empty());
    }

    #[test]
    fn test_best_of_empty() {
        assert!(crate::best_of(&[]).is_none());
    }
}
