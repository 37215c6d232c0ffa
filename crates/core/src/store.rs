use crate::session_state::{InterviewStatus, SessionState, Stage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedMutexGuard, RwLock};

/// Persists session snapshots keyed by session token.
///
/// Snapshots are JSON. Loading never fails on a damaged snapshot: see
/// [`restore_snapshot`].
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_token: &str) -> Result<Option<SessionState>>;

    async fn save(&self, session_token: &str, state: &SessionState) -> Result<()>;

    /// The most recent live session for an interview: `in_progress` or
    /// `paused`, still active and not stopped.
    async fn find_active(&self, interview_id: i64) -> Result<Option<SessionState>>;
}

pub fn to_snapshot(state: &SessionState) -> Result<String> {
    serde_json::to_string(state).context("Failed to serialize session state")
}

/// Decodes a snapshot, salvaging what it can from a damaged one.
///
/// Fields that no longer decode are dropped back to their defaults and the
/// result is flagged `recovered`. Scores are recomputed from the history and
/// the question index is clamped to the question list. Input that is not JSON
/// at all yields a terminal state that only carries the token.
pub fn restore_snapshot(session_token: &str, raw: &str) -> SessionState {
    if let Ok(state) = serde_json::from_str::<SessionState>(raw) {
        return state;
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(fields)) => {
            let mut state = merge_fields(fields);
            state.recompute_scores();
            state.current_question_index = state
                .current_question_index
                .min(state.questions_generated.len());
            tracing::warn!(session_token, "Session snapshot partially recovered");
            state.session_token = session_token.to_string();
            state.recovered = true;
            state.error_message = Some("Session state was partially recovered".to_string());
            state
        }
        _ => {
            tracing::error!(session_token, "Session snapshot unreadable");
            SessionState {
                session_token: session_token.to_string(),
                current_step: Stage::End,
                should_continue: false,
                is_active: false,
                recovered: true,
                error_message: Some("Session state could not be recovered".to_string()),
                ..Default::default()
            }
        }
    }
}

fn merge_fields(fields: Map<String, Value>) -> SessionState {
    let Ok(Value::Object(mut merged)) = serde_json::to_value(SessionState::default()) else {
        return SessionState::default();
    };
    for (key, value) in fields {
        if !merged.contains_key(&key) {
            continue;
        }
        let previous = merged.insert(key.clone(), value);
        let decodes = serde_json::from_value::<SessionState>(Value::Object(merged.clone())).is_ok();
        if !decodes {
            tracing::debug!(field = %key, "Dropping undecodable snapshot field");
            match previous {
                Some(previous) => merged.insert(key, previous),
                None => merged.remove(&key),
            };
        }
    }
    serde_json::from_value(Value::Object(merged)).unwrap_or_default()
}

fn is_live(state: &SessionState) -> bool {
    let open = matches!(state.status, InterviewStatus::InProgress | InterviewStatus::Paused);
    open && state.is_active && state.should_continue
}

fn most_recent(candidates: impl Iterator<Item = SessionState>) -> Option<SessionState> {
    candidates.max_by_key(|s| s.last_activity_at.or(s.started_at))
}

#[derive(Default)]
pub struct InMemorySessionStore {
    snapshots: RwLock<HashMap<String, String>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a raw snapshot as-is.
    pub async fn insert_raw(&self, session_token: &str, raw: impl Into<String>) {
        self.snapshots
            .write()
            .await
            .insert(session_token.to_string(), raw.into());
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_token: &str) -> Result<Option<SessionState>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .get(session_token)
            .map(|raw| restore_snapshot(session_token, raw)))
    }

    async fn save(&self, session_token: &str, state: &SessionState) -> Result<()> {
        let raw = to_snapshot(state)?;
        self.snapshots
            .write()
            .await
            .insert(session_token.to_string(), raw);
        Ok(())
    }

    async fn find_active(&self, interview_id: i64) -> Result<Option<SessionState>> {
        let snapshots = self.snapshots.read().await;
        Ok(most_recent(
            snapshots
                .iter()
                .map(|(token, raw)| restore_snapshot(token, raw))
                .filter(|s| s.interview_id == interview_id && is_live(s)),
        ))
    }
}

/// One JSON file per session under a directory.
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create session directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, session_token: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_safe(session_token)))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, session_token: &str) -> Result<Option<SessionState>> {
        let path = self.path_for(session_token);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(Some(restore_snapshot(session_token, &raw))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn save(&self, session_token: &str, state: &SessionState) -> Result<()> {
        let raw = to_snapshot(state)?;
        let path = self.path_for(session_token);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, raw)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    async fn find_active(&self, interview_id: i64) -> Result<Option<SessionState>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to list {}", self.dir.display()))?;
        let mut live = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(token) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            let raw = tokio::fs::read_to_string(&path).await?;
            let state = restore_snapshot(&token, &raw);
            if state.interview_id == interview_id && is_live(&state) {
                live.push(state);
            }
        }
        Ok(most_recent(live.into_iter()))
    }
}

/// Keeps ASCII letters, digits and `-`, so tokens map to safe file names.
pub fn file_safe(token: &str) -> String {
    token
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect()
}

type LockMap = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Per-key async locks. Holding the guard serializes every operation on
/// that session or interview. A key's entry is dropped once nobody holds or
/// waits for it.
#[derive(Default)]
pub struct SessionLocks {
    locks: Arc<LockMap>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> SessionGuard {
        let lock = {
            let mut locks = lock_map(&self.locks);
            locks.entry(key.to_string()).or_default().clone()
        };
        SessionGuard {
            guard: Some(lock.lock_owned().await),
            key: key.to_string(),
            locks: self.locks.clone(),
        }
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        lock_map(&self.locks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock_map(locks: &LockMap) -> std::sync::MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
    locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct SessionGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    locks: Arc<LockMap>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        // Release first so the map's handle is the only one left when idle.
        self.guard.take();
        let mut locks = lock_map(&self.locks);
        let idle = locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            locks.remove(&self.key);
        }
    }
}
