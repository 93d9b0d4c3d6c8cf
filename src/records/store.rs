use super::model::{LearningSession, NewSession, SessionCounts, SessionPatch, UserProgress};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Key-value store of session and progress rows
///
/// Implementations:
/// - `MemoryStore`: process-local, for tests and ephemeral servers
/// - `JsonFileStore`: single JSON document on disk
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new session row; the store assigns id and timestamps
    async fn create_session(&self, new: NewSession) -> Result<LearningSession>;

    /// Apply a partial update to an existing row
    async fn update_session(&self, id: &str, patch: SessionPatch) -> Result<LearningSession>;

    async fn get_session(&self, id: &str) -> Result<Option<LearningSession>>;

    /// All sessions for a user, most recently completed first
    async fn list_sessions(&self, user_id: &str) -> Result<Vec<LearningSession>>;

    async fn get_progress(&self, user_id: &str) -> Result<Option<UserProgress>>;

    /// Insert or replace the progress row for `progress.user_id`
    async fn save_progress(&self, progress: UserProgress) -> Result<UserProgress>;

    async fn session_counts(&self, user_id: &str) -> Result<SessionCounts> {
        let sessions = self.list_sessions(user_id).await?;
        Ok(SessionCounts::tally(&sessions))
    }
}

/// The two tables, as serialized on disk
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Tables {
    #[serde(default)]
    learning_sessions: Vec<LearningSession>,
    #[serde(default)]
    user_progress: Vec<UserProgress>,
}

impl Tables {
    fn insert_session(&mut self, new: NewSession) -> LearningSession {
        let now = Utc::now();
        let session = LearningSession {
            id: format!("sess_{}", uuid::Uuid::new_v4().simple()),
            user_id: new.user_id,
            session_type: new.session_type,
            language: new.language,
            duration_minutes: new.duration_minutes,
            score: new.score.min(100),
            completed_at: new.completed_at,
            created_at: now,
            updated_at: now,
        };
        self.learning_sessions.push(session.clone());
        session
    }

    fn patch_session(&mut self, id: &str, patch: &SessionPatch) -> Result<LearningSession> {
        let session = self
            .learning_sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| anyhow!("Session record not found: {}", id))?;

        patch.apply(session);
        session.updated_at = Utc::now();
        Ok(session.clone())
    }

    fn sessions_for(&self, user_id: &str) -> Vec<LearningSession> {
        let mut sessions: Vec<LearningSession> = self
            .learning_sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        sessions
    }

    fn upsert_progress(&mut self, mut progress: UserProgress) -> UserProgress {
        progress.updated_at = Utc::now();
        match self
            .user_progress
            .iter_mut()
            .find(|p| p.user_id == progress.user_id)
        {
            Some(existing) => *existing = progress.clone(),
            None => self.user_progress.push(progress.clone()),
        }
        progress
    }
}

/// In-process record store
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RecordStore for MemoryStore {
    async fn create_session(&self, new: NewSession) -> Result<LearningSession> {
        let mut tables = self.tables.write().await;
        Ok(tables.insert_session(new))
    }

    async fn update_session(&self, id: &str, patch: SessionPatch) -> Result<LearningSession> {
        let mut tables = self.tables.write().await;
        tables.patch_session(id, &patch)
    }

    async fn get_session(&self, id: &str) -> Result<Option<LearningSession>> {
        let tables = self.tables.read().await;
        Ok(tables.learning_sessions.iter().find(|s| s.id == id).cloned())
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<LearningSession>> {
        let tables = self.tables.read().await;
        Ok(tables.sessions_for(user_id))
    }

    async fn get_progress(&self, user_id: &str) -> Result<Option<UserProgress>> {
        let tables = self.tables.read().await;
        Ok(tables
            .user_progress
            .iter()
            .find(|p| p.user_id == user_id)
            .cloned())
    }

    async fn save_progress(&self, progress: UserProgress) -> Result<UserProgress> {
        let mut tables = self.tables.write().await;
        Ok(tables.upsert_progress(progress))
    }
}

/// Record store persisted as one JSON document
///
/// Every mutation rewrites the file; reads are served from memory.
pub struct JsonFileStore {
    path: PathBuf,
    tables: Mutex<Tables>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty if the file does not exist
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let tables = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Tables::default(),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("Failed to parse record store: {:?}", path))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Tables::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read record store: {:?}", path))
            }
        };

        info!(
            "Record store opened: {} ({} sessions, {} progress rows)",
            path.display(),
            tables.learning_sessions.len(),
            tables.user_progress.len()
        );

        Ok(Self {
            path,
            tables: Mutex::new(tables),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, tables: &Tables) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create record store directory")?;
            }
        }

        let payload = serde_json::to_vec_pretty(tables)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, payload)
            .await
            .with_context(|| format!("Failed to write record store: {:?}", tmp))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace record store: {:?}", self.path))?;

        debug!("Record store saved: {}", self.path.display());
        Ok(())
    }
}

#[async_trait::async_trait]
impl RecordStore for JsonFileStore {
    async fn create_session(&self, new: NewSession) -> Result<LearningSession> {
        let mut tables = self.tables.lock().await;
        let mut staged = tables.clone();
        let session = staged.insert_session(new);
        self.persist(&staged).await?;
        *tables = staged;
        Ok(session)
    }

    async fn update_session(&self, id: &str, patch: SessionPatch) -> Result<LearningSession> {
        let mut tables = self.tables.lock().await;
        let mut staged = tables.clone();
        let session = staged.patch_session(id, &patch)?;
        self.persist(&staged).await?;
        *tables = staged;
        Ok(session)
    }

    async fn get_session(&self, id: &str) -> Result<Option<LearningSession>> {
        let tables = self.tables.lock().await;
        Ok(tables.learning_sessions.iter().find(|s| s.id == id).cloned())
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<LearningSession>> {
        let tables = self.tables.lock().await;
        Ok(tables.sessions_for(user_id))
    }

    async fn get_progress(&self, user_id: &str) -> Result<Option<UserProgress>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .user_progress
            .iter()
            .find(|p| p.user_id == user_id)
            .cloned())
    }

    async fn save_progress(&self, progress: UserProgress) -> Result<UserProgress> {
        let mut tables = self.tables.lock().await;
        let mut staged = tables.clone();
        let saved = staged.upsert_progress(progress);
        self.persist(&staged).await?;
        *tables = staged;
        Ok(saved)
    }
}
