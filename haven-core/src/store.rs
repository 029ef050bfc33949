//! Persistence gateway.
//!
//! `Store` is the seam between the pipeline and the relational store. `PgStore`
//! talks to PostgreSQL through sqlx; `MemoryStore` keeps everything in process
//! and backs the test suites and `haven-server --memory` runs.
//!
//! Writes are plain overwrites. Sessions are unique on
//! `(conversation_id, user_id)` and next-session rows on `user_id`; there is no
//! optimistic locking, so concurrent writers resolve last-write-wins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    MoodEntry, NextSession, NextSessionStatus, SessionRecord, TherapyModule, UserProfile,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Profile fields overwritten by the synthesizer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileUpdate {
    pub bio: String,
    pub therapy_summary: String,
    pub goals: String,
    pub themes: String,
}

/// Session fields written by the insight pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionUpdate {
    pub transcript: String,
    pub title: String,
    pub summary: String,
    pub duration_secs: i32,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Short backend description for health output.
    async fn describe(&self) -> Result<String, StoreError>;

    async fn insert_user(&self, user: &UserProfile) -> Result<(), StoreError>;
    async fn get_user(&self, id: Uuid) -> Result<Option<UserProfile>, StoreError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserProfile>, StoreError>;
    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<(), StoreError>;

    async fn insert_session(&self, session: &SessionRecord) -> Result<(), StoreError>;
    /// Update the session keyed by `(conversation_id, user_id)`, inserting it if absent.
    async fn upsert_session(
        &self,
        user_id: Uuid,
        conversation_id: &str,
        update: &SessionUpdate,
    ) -> Result<SessionRecord, StoreError>;
    async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<SessionRecord>, StoreError>;

    async fn insert_module(&self, module: &TherapyModule) -> Result<(), StoreError>;
    async fn get_module(&self, id: Uuid) -> Result<Option<TherapyModule>, StoreError>;
    async fn find_module_by_name(&self, name: &str) -> Result<Option<TherapyModule>, StoreError>;

    async fn upsert_next_session(&self, next: &NextSession) -> Result<(), StoreError>;
    async fn get_next_session(&self, user_id: Uuid) -> Result<Option<NextSession>, StoreError>;
    /// Returns false when the user has no next-session row.
    async fn set_next_session_status(
        &self,
        user_id: Uuid,
        status: NextSessionStatus,
    ) -> Result<bool, StoreError>;

    async fn insert_mood(&self, entry: &MoodEntry) -> Result<(), StoreError>;
    /// Newest first.
    async fn list_mood(&self, user_id: Uuid, limit: i64) -> Result<Vec<MoodEntry>, StoreError>;
}

// ============================================================================
// PgStore
// ============================================================================

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct NextSessionRow {
    user_id: Uuid,
    module_id: Option<Uuid>,
    greeting: String,
    instructions: String,
    agenda: String,
    status: String,
    updated_at: DateTime<Utc>,
}

impl TryFrom<NextSessionRow> for NextSession {
    type Error = StoreError;

    fn try_from(row: NextSessionRow) -> Result<Self, Self::Error> {
        Ok(NextSession {
            user_id: row.user_id,
            module_id: row.module_id,
            greeting: row.greeting,
            instructions: row.instructions,
            agenda: row.agenda,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            updated_at: row.updated_at,
        })
    }
}

const USER_COLUMNS: &str = "id, email, bio, therapy_summary, goals, themes, updated_at";
const SESSION_COLUMNS: &str =
    "id, user_id, conversation_id, transcript, title, summary, duration_secs, created_at";

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn describe(&self) -> Result<String, StoreError> {
        Ok(crate::db::health_check(&self.pool).await?)
    }

    async fn insert_user(&self, user: &UserProfile) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, bio, therapy_summary, goals, themes, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.bio)
        .bind(&user.therapy_summary)
        .bind(&user.goals)
        .bind(&user.themes)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<UserProfile>, StoreError> {
        let query = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        Ok(sqlx::query_as::<_, UserProfile>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserProfile>, StoreError> {
        let query = format!("SELECT {} FROM users WHERE lower(email) = lower($1)", USER_COLUMNS);
        Ok(sqlx::query_as::<_, UserProfile>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE users
            SET bio = $2, therapy_summary = $3, goals = $4, themes = $5, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&update.bio)
        .bind(&update.therapy_summary)
        .bind(&update.goals)
        .bind(&update.themes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_session(&self, session: &SessionRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sessions
                (id, user_id, conversation_id, transcript, title, summary, duration_secs, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(&session.conversation_id)
        .bind(&session.transcript)
        .bind(&session.title)
        .bind(&session.summary)
        .bind(session.duration_secs)
        .bind(session.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_session(
        &self,
        user_id: Uuid,
        conversation_id: &str,
        update: &SessionUpdate,
    ) -> Result<SessionRecord, StoreError> {
        let query = format!(
            r#"
            INSERT INTO sessions
                (user_id, conversation_id, transcript, title, summary, duration_secs)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (conversation_id, user_id) DO UPDATE SET
                transcript = EXCLUDED.transcript,
                title = EXCLUDED.title,
                summary = EXCLUDED.summary,
                duration_secs = EXCLUDED.duration_secs
            RETURNING {}
            "#,
            SESSION_COLUMNS
        );
        Ok(sqlx::query_as::<_, SessionRecord>(&query)
            .bind(user_id)
            .bind(conversation_id)
            .bind(&update.transcript)
            .bind(&update.title)
            .bind(&update.summary)
            .bind(update.duration_secs)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<SessionRecord>, StoreError> {
        let query = format!(
            "SELECT {} FROM sessions WHERE user_id = $1 ORDER BY created_at DESC",
            SESSION_COLUMNS
        );
        Ok(sqlx::query_as::<_, SessionRecord>(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn insert_module(&self, module: &TherapyModule) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO therapy_modules (id, name, greeting, instructions, agenda)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(module.id)
        .bind(&module.name)
        .bind(&module.greeting)
        .bind(&module.instructions)
        .bind(&module.agenda)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_module(&self, id: Uuid) -> Result<Option<TherapyModule>, StoreError> {
        Ok(sqlx::query_as::<_, TherapyModule>(
            "SELECT id, name, greeting, instructions, agenda FROM therapy_modules WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_module_by_name(&self, name: &str) -> Result<Option<TherapyModule>, StoreError> {
        Ok(sqlx::query_as::<_, TherapyModule>(
            "SELECT id, name, greeting, instructions, agenda FROM therapy_modules WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn upsert_next_session(&self, next: &NextSession) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO next_sessions (user_id, module_id, greeting, instructions, agenda, status, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id) DO UPDATE SET
                module_id = EXCLUDED.module_id,
                greeting = EXCLUDED.greeting,
                instructions = EXCLUDED.instructions,
                agenda = EXCLUDED.agenda,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(next.user_id)
        .bind(next.module_id)
        .bind(&next.greeting)
        .bind(&next.instructions)
        .bind(&next.agenda)
        .bind(next.status.as_str())
        .bind(next.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_next_session(&self, user_id: Uuid) -> Result<Option<NextSession>, StoreError> {
        let row = sqlx::query_as::<_, NextSessionRow>(
            r#"
            SELECT user_id, module_id, greeting, instructions, agenda, status, updated_at
            FROM next_sessions WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(NextSession::try_from).transpose()
    }

    async fn set_next_session_status(
        &self,
        user_id: Uuid,
        status: NextSessionStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE next_sessions SET status = $2, updated_at = now() WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_mood(&self, entry: &MoodEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO mood_entries (id, user_id, score, note, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.id)
        .bind(entry.user_id)
        .bind(entry.score)
        .bind(&entry.note)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_mood(&self, user_id: Uuid, limit: i64) -> Result<Vec<MoodEntry>, StoreError> {
        Ok(sqlx::query_as::<_, MoodEntry>(
            r#"
            SELECT id, user_id, score, note, created_at
            FROM mood_entries WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }
}

// ============================================================================
// MemoryStore
// ============================================================================

#[derive(Default)]
struct MemoryTables {
    users: HashMap<Uuid, UserProfile>,
    sessions: Vec<SessionRecord>,
    modules: HashMap<Uuid, TherapyModule>,
    next_sessions: HashMap<Uuid, NextSession>,
    mood: Vec<MoodEntry>,
}

/// In-process store. Counts every call so tests can assert "no store access".
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<MemoryTables>,
    calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `Store` calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn describe(&self) -> Result<String, StoreError> {
        self.touch();
        Ok("in-memory".to_string())
    }

    async fn insert_user(&self, user: &UserProfile) -> Result<(), StoreError> {
        self.touch();
        self.tables.write().await.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<UserProfile>, StoreError> {
        self.touch();
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserProfile>, StoreError> {
        self.touch();
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<(), StoreError> {
        self.touch();
        if let Some(user) = self.tables.write().await.users.get_mut(&id) {
            user.bio = update.bio.clone();
            user.therapy_summary = update.therapy_summary.clone();
            user.goals = update.goals.clone();
            user.themes = update.themes.clone();
            user.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn insert_session(&self, session: &SessionRecord) -> Result<(), StoreError> {
        self.touch();
        self.tables.write().await.sessions.push(session.clone());
        Ok(())
    }

    async fn upsert_session(
        &self,
        user_id: Uuid,
        conversation_id: &str,
        update: &SessionUpdate,
    ) -> Result<SessionRecord, StoreError> {
        self.touch();
        let mut tables = self.tables.write().await;
        let existing = tables
            .sessions
            .iter_mut()
            .find(|s| s.user_id == user_id && s.conversation_id == conversation_id);

        let record = match existing {
            Some(session) => {
                session.transcript = update.transcript.clone();
                session.title = update.title.clone();
                session.summary = update.summary.clone();
                session.duration_secs = update.duration_secs;
                session.clone()
            }
            None => {
                let mut session = SessionRecord::new(user_id, conversation_id);
                session.transcript = update.transcript.clone();
                session.title = update.title.clone();
                session.summary = update.summary.clone();
                session.duration_secs = update.duration_secs;
                tables.sessions.push(session.clone());
                session
            }
        };
        Ok(record)
    }

    async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<SessionRecord>, StoreError> {
        self.touch();
        let mut sessions: Vec<SessionRecord> = self
            .tables
            .read()
            .await
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn insert_module(&self, module: &TherapyModule) -> Result<(), StoreError> {
        self.touch();
        self.tables.write().await.modules.insert(module.id, module.clone());
        Ok(())
    }

    async fn get_module(&self, id: Uuid) -> Result<Option<TherapyModule>, StoreError> {
        self.touch();
        Ok(self.tables.read().await.modules.get(&id).cloned())
    }

    async fn find_module_by_name(&self, name: &str) -> Result<Option<TherapyModule>, StoreError> {
        self.touch();
        Ok(self
            .tables
            .read()
            .await
            .modules
            .values()
            .find(|m| m.name == name)
            .cloned())
    }

    async fn upsert_next_session(&self, next: &NextSession) -> Result<(), StoreError> {
        self.touch();
        self.tables
            .write()
            .await
            .next_sessions
            .insert(next.user_id, next.clone());
        Ok(())
    }

    async fn get_next_session(&self, user_id: Uuid) -> Result<Option<NextSession>, StoreError> {
        self.touch();
        Ok(self.tables.read().await.next_sessions.get(&user_id).cloned())
    }

    async fn set_next_session_status(
        &self,
        user_id: Uuid,
        status: NextSessionStatus,
    ) -> Result<bool, StoreError> {
        self.touch();
        match self.tables.write().await.next_sessions.get_mut(&user_id) {
            Some(next) => {
                next.status = status;
                next.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_mood(&self, entry: &MoodEntry) -> Result<(), StoreError> {
        self.touch();
        self.tables.write().await.mood.push(entry.clone());
        Ok(())
    }

    async fn list_mood(&self, user_id: Uuid, limit: i64) -> Result<Vec<MoodEntry>, StoreError> {
        self.touch();
        let mut entries: Vec<MoodEntry> = self
            .tables
            .read()
            .await
            .mood
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(limit.max(0) as usize);
        Ok(entries)
    }
}
