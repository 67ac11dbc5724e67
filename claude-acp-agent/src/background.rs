//! Background task correlation
//!
//! A background-capable tool call returns before its work finishes. The
//! correlator remembers which tool call spawned which task so a later
//! terminal signal can complete the right call. Two independent completion
//! sources exist — an explicit status notification and a completion hook —
//! and either may fire first, twice, or for a task this process never
//! tracked, so every terminal transition funnels through a bounded
//! finalized-set that makes duplicates no-ops.
//!
//! One logical record is indexed twice (task id and output file); the two
//! index entries are always removed together.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::SeekFrom;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Correlation record for one in-flight background task.
#[derive(Debug, Clone)]
pub struct BackgroundTaskRecord {
    pub session_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    pub output_file: Option<String>,
}

/// Outcome of the status-notification completion path.
#[derive(Debug)]
pub enum StatusCompletion {
    /// A duplicate terminal signal; nothing to do.
    AlreadyFinalized,
    /// The task was never tracked here (or belongs to another session).
    NotTracked,
    /// First terminal signal; the record has been retired.
    Found(BackgroundTaskRecord),
}

/// Outcome of the completion-hook path.
#[derive(Debug)]
pub enum HookCompletion {
    /// A duplicate terminal signal; nothing to do.
    AlreadyFinalized,
    /// The task is tracked by a different session; not ours to touch.
    ForeignSession,
    /// First terminal signal. Hook completions finalize even when no tool
    /// call was tracked; `record` is present only when one was.
    Completed { record: Option<BackgroundTaskRecord> },
}

/// Dual-index map of live background tasks plus the finalized-set.
#[derive(Debug)]
pub struct BackgroundTasks {
    by_task_id: HashMap<String, BackgroundTaskRecord>,
    by_output_file: HashMap<String, BackgroundTaskRecord>,
    finalized: VecDeque<String>,
    finalized_set: HashSet<String>,
    max_finalized: usize,
}

impl BackgroundTasks {
    pub fn new(max_finalized: usize) -> Self {
        Self {
            by_task_id: HashMap::new(),
            by_output_file: HashMap::new(),
            finalized: VecDeque::new(),
            finalized_set: HashSet::new(),
            max_finalized,
        }
    }

    fn finalized_key(session_id: &str, task_id: &str) -> String {
        format!("{}:{}", session_id, task_id)
    }

    pub fn is_finalized(&self, session_id: &str, task_id: &str) -> bool {
        self.finalized_set
            .contains(&Self::finalized_key(session_id, task_id))
    }

    fn remember_finalized(&mut self, session_id: &str, task_id: &str) {
        let key = Self::finalized_key(session_id, task_id);
        if self.finalized_set.contains(&key) {
            return;
        }
        self.finalized.push_back(key.clone());
        self.finalized_set.insert(key);
        while self.finalized.len() > self.max_finalized {
            if let Some(evicted) = self.finalized.pop_front() {
                self.finalized_set.remove(&evicted);
            }
        }
    }

    /// Track a freshly spawned background task under both indexes.
    pub fn register(
        &mut self,
        session_id: &str,
        tool_call_id: &str,
        tool_name: &str,
        task_id: Option<&str>,
        output_file: Option<&str>,
    ) {
        if task_id.is_none() && output_file.is_none() {
            return;
        }
        let record = BackgroundTaskRecord {
            session_id: session_id.to_string(),
            tool_call_id: tool_call_id.to_string(),
            tool_name: tool_name.to_string(),
            output_file: output_file.map(|f| f.to_string()),
        };
        if let Some(task_id) = task_id {
            self.by_task_id.insert(task_id.to_string(), record.clone());
        }
        if let Some(output_file) = output_file.filter(|f| !f.is_empty()) {
            self.by_output_file
                .insert(output_file.to_string(), record.clone());
        }
    }

    fn retire(&mut self, task_id: &str, record: &BackgroundTaskRecord, output_file: Option<&str>) {
        self.by_task_id.remove(task_id);
        if let Some(output_file) = output_file {
            self.by_output_file.remove(output_file);
        }
        if let Some(record_file) = record.output_file.as_deref() {
            self.by_output_file.remove(record_file);
        }
    }

    /// Terminal transition via the explicit status notification.
    ///
    /// Falls back to the output-file index when the task id is unknown.
    /// An untracked task is left alone so a later hook can still claim it.
    pub fn complete_from_status(
        &mut self,
        session_id: &str,
        task_id: &str,
        output_file: &str,
    ) -> StatusCompletion {
        if self.is_finalized(session_id, task_id) {
            return StatusCompletion::AlreadyFinalized;
        }

        let record = self
            .by_task_id
            .get(task_id)
            .or_else(|| self.by_output_file.get(output_file))
            .cloned();
        let Some(record) = record else {
            return StatusCompletion::NotTracked;
        };
        if record.session_id != session_id {
            return StatusCompletion::NotTracked;
        }

        self.remember_finalized(session_id, task_id);
        self.retire(task_id, &record, Some(output_file));
        StatusCompletion::Found(record)
    }

    /// Terminal transition via the completion hook. Hook-reported
    /// completions carry no status and are always treated as completed.
    pub fn complete_from_hook(&mut self, session_id: &str, task_id: &str) -> HookCompletion {
        if self.is_finalized(session_id, task_id) {
            return HookCompletion::AlreadyFinalized;
        }

        let record = self.by_task_id.get(task_id).cloned();
        if let Some(record) = &record {
            if record.session_id != session_id {
                return HookCompletion::ForeignSession;
            }
        }

        self.remember_finalized(session_id, task_id);
        if let Some(record) = &record {
            self.retire(task_id, record, None);
        }
        HookCompletion::Completed { record }
    }

    /// Drop all state owned by a session: live records and finalized keys.
    pub fn remove_session(&mut self, session_id: &str) {
        self.by_task_id
            .retain(|_, record| record.session_id != session_id);
        self.by_output_file
            .retain(|_, record| record.session_id != session_id);
        let prefix = format!("{}:", session_id);
        self.finalized.retain(|key| !key.starts_with(&prefix));
        self.finalized_set.retain(|key| !key.starts_with(&prefix));
    }

    #[cfg(test)]
    fn live_len(&self) -> (usize, usize) {
        (self.by_task_id.len(), self.by_output_file.len())
    }
}

/// Read the tail of a task output file: last `max_lines` lines within a
/// `max_bytes` cap, via seek-to-end. Never loads the whole file; any error
/// yields `None`.
pub async fn read_output_tail(
    path: impl AsRef<Path>,
    max_bytes: u64,
    max_lines: usize,
) -> Option<String> {
    let mut file = tokio::fs::File::open(path.as_ref()).await.ok()?;
    let metadata = file.metadata().await.ok()?;
    if !metadata.is_file() {
        return None;
    }
    let length = metadata.len().min(max_bytes);
    if length == 0 {
        return None;
    }

    file.seek(SeekFrom::Start(metadata.len() - length))
        .await
        .ok()?;
    let mut buffer = vec![0u8; length as usize];
    file.read_exact(&mut buffer).await.ok()?;

    let text = String::from_utf8_lossy(&buffer);
    let lines: Vec<&str> = text.split('\n').map(|l| l.trim_end_matches('\r')).collect();
    let start = lines.len().saturating_sub(max_lines);
    let tail = lines[start..].join("\n");
    let tail = tail.trim();
    if tail.is_empty() {
        None
    } else {
        Some(tail.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tracked(tasks: &mut BackgroundTasks) {
        tasks.register(
            "sess_1",
            "toolu_1",
            "Task",
            Some("task_1"),
            Some("/tmp/out.log"),
        );
    }

    #[test]
    fn test_status_completion_retires_both_indexes() {
        let mut tasks = BackgroundTasks::new(100);
        tracked(&mut tasks);
        assert_eq!(tasks.live_len(), (1, 1));

        match tasks.complete_from_status("sess_1", "task_1", "/tmp/out.log") {
            StatusCompletion::Found(record) => {
                assert_eq!(record.tool_call_id, "toolu_1");
            }
            other => panic!("Expected Found, got {:?}", other),
        }
        assert_eq!(tasks.live_len(), (0, 0));
        assert!(tasks.is_finalized("sess_1", "task_1"));
    }

    #[test]
    fn test_status_completion_is_idempotent() {
        let mut tasks = BackgroundTasks::new(100);
        tracked(&mut tasks);
        assert!(matches!(
            tasks.complete_from_status("sess_1", "task_1", "/tmp/out.log"),
            StatusCompletion::Found(_)
        ));
        assert!(matches!(
            tasks.complete_from_status("sess_1", "task_1", "/tmp/out.log"),
            StatusCompletion::AlreadyFinalized
        ));
    }

    #[test]
    fn test_cross_path_idempotency() {
        let mut tasks = BackgroundTasks::new(100);
        tracked(&mut tasks);
        assert!(matches!(
            tasks.complete_from_hook("sess_1", "task_1"),
            HookCompletion::Completed { record: Some(_) }
        ));
        // The other path sees the same finalized-set.
        assert!(matches!(
            tasks.complete_from_status("sess_1", "task_1", "/tmp/out.log"),
            StatusCompletion::AlreadyFinalized
        ));
    }

    #[test]
    fn test_output_file_fallback_lookup() {
        let mut tasks = BackgroundTasks::new(100);
        tracked(&mut tasks);
        // Status arrives with an id the map never saw; the file matches.
        match tasks.complete_from_status("sess_1", "task_other", "/tmp/out.log") {
            StatusCompletion::Found(record) => assert_eq!(record.tool_call_id, "toolu_1"),
            other => panic!("Expected Found, got {:?}", other),
        }
        assert_eq!(tasks.live_len(), (0, 0));
    }

    #[test]
    fn test_foreign_session_is_untouched() {
        let mut tasks = BackgroundTasks::new(100);
        tracked(&mut tasks);
        assert!(matches!(
            tasks.complete_from_status("sess_2", "task_1", "/tmp/out.log"),
            StatusCompletion::NotTracked
        ));
        assert!(matches!(
            tasks.complete_from_hook("sess_2", "task_1"),
            HookCompletion::ForeignSession
        ));
        // Still live for the owning session.
        assert_eq!(tasks.live_len(), (1, 1));
        assert!(!tasks.is_finalized("sess_1", "task_1"));
    }

    #[test]
    fn test_hook_completion_without_record_still_finalizes() {
        let mut tasks = BackgroundTasks::new(100);
        assert!(matches!(
            tasks.complete_from_hook("sess_1", "task_unknown"),
            HookCompletion::Completed { record: None }
        ));
        assert!(matches!(
            tasks.complete_from_hook("sess_1", "task_unknown"),
            HookCompletion::AlreadyFinalized
        ));
    }

    #[test]
    fn test_finalized_set_eviction() {
        let mut tasks = BackgroundTasks::new(3);
        for n in 0..5 {
            tasks.complete_from_hook("sess_1", &format!("task_{}", n));
        }
        assert!(!tasks.is_finalized("sess_1", "task_0"));
        assert!(!tasks.is_finalized("sess_1", "task_1"));
        assert!(tasks.is_finalized("sess_1", "task_2"));
        assert!(tasks.is_finalized("sess_1", "task_4"));
    }

    #[test]
    fn test_remove_session_drops_all_scoped_state() {
        let mut tasks = BackgroundTasks::new(100);
        tracked(&mut tasks);
        tasks.register("sess_2", "toolu_9", "Agent", Some("task_9"), None);
        tasks.complete_from_hook("sess_1", "task_done");

        tasks.remove_session("sess_1");
        assert_eq!(tasks.live_len(), (1, 0));
        assert!(!tasks.is_finalized("sess_1", "task_done"));
        // The other session keeps its record.
        assert!(matches!(
            tasks.complete_from_hook("sess_2", "task_9"),
            HookCompletion::Completed { record: Some(_) }
        ));
    }

    #[tokio::test]
    async fn test_read_output_tail_respects_line_cap() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for n in 0..10 {
            writeln!(file, "line {}", n).unwrap();
        }
        file.flush().unwrap();

        let tail = read_output_tail(file.path(), 8 * 1024, 3).await.unwrap();
        assert_eq!(tail, "line 7\nline 8\nline 9");
    }

    #[tokio::test]
    async fn test_read_output_tail_respects_byte_cap() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for n in 0..100 {
            writeln!(file, "line {:03}", n).unwrap();
        }
        file.flush().unwrap();

        // 20 bytes reaches only the last couple of lines.
        let tail = read_output_tail(file.path(), 20, 80).await.unwrap();
        assert!(tail.ends_with("line 099"));
        assert!(!tail.contains("line 000"));
    }

    #[tokio::test]
    async fn test_read_output_tail_missing_file() {
        assert!(read_output_tail("/nonexistent/definitely.log", 1024, 10)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_read_output_tail_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(read_output_tail(file.path(), 1024, 10).await.is_none());
    }
}
