//! src/services/history_service.rs
//!
//! HistoryService — SQLite-backed persistence for transcription history.
//! Every query is scoped by `user_id`; a row is never visible outside its
//! owner.

use crate::models::history::{HistoryRecord, NewHistoryRecord};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;

const SELECT_COLUMNS: &str = "id, filename, original_name, file_type, file_size, \
     transcription_text, doc_file_id, doc_file_url, audio_file_path, \
     summary_text, summary_template, created_at, user_id";

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history item {0} not found")]
    NotFound(i64),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type HistoryResult<T> = Result<T, HistoryError>;

#[derive(Clone)]
pub struct HistoryService {
    pub db: Arc<SqlitePool>,
}

impl HistoryService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub async fn add(&self, record: NewHistoryRecord) -> HistoryResult<i64> {
        let result = sqlx::query(
            "INSERT INTO history (
                filename, original_name, file_type, file_size,
                transcription_text, doc_file_id, doc_file_url,
                audio_file_path, created_at, user_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.filename)
        .bind(&record.original_name)
        .bind(&record.file_type)
        .bind(record.file_size)
        .bind(&record.transcription_text)
        .bind(&record.doc_file_id)
        .bind(&record.doc_file_url)
        .bind(&record.audio_file_path)
        .bind(Utc::now())
        .bind(&record.user_id)
        .execute(&*self.db)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn list_for_user(&self, user_id: &str) -> HistoryResult<Vec<HistoryRecord>> {
        let rows = sqlx::query_as::<_, HistoryRecord>(&format!(
            "SELECT {} FROM history WHERE user_id = ? ORDER BY created_at DESC",
            SELECT_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    pub async fn get(&self, id: i64, user_id: &str) -> HistoryResult<HistoryRecord> {
        sqlx::query_as::<_, HistoryRecord>(&format!(
            "SELECT {} FROM history WHERE id = ? AND user_id = ?",
            SELECT_COLUMNS
        ))
        .bind(id)
        .bind(user_id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => HistoryError::NotFound(id),
            other => HistoryError::Sqlx(other),
        })
    }

    pub async fn delete(&self, id: i64, user_id: &str) -> HistoryResult<()> {
        let result = sqlx::query("DELETE FROM history WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(HistoryError::NotFound(id));
        }
        Ok(())
    }

    pub async fn rename(&self, id: i64, user_id: &str, new_filename: &str) -> HistoryResult<()> {
        let result = sqlx::query("UPDATE history SET filename = ? WHERE id = ? AND user_id = ?")
            .bind(new_filename)
            .bind(id)
            .bind(user_id)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(HistoryError::NotFound(id));
        }
        Ok(())
    }

    pub async fn set_summary(
        &self,
        id: i64,
        user_id: &str,
        summary: &str,
        template_id: &str,
    ) -> HistoryResult<()> {
        let result = sqlx::query(
            "UPDATE history SET summary_text = ?, summary_template = ?
             WHERE id = ? AND user_id = ?",
        )
        .bind(summary)
        .bind(template_id)
        .bind(id)
        .bind(user_id)
        .execute(&*self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(HistoryError::NotFound(id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_service() -> HistoryService {
        // One connection: each in-memory SQLite connection is its own db.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        for stmt in include_str!("../../migrations/0001_init.sql")
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            sqlx::query(stmt).execute(&pool).await.unwrap();
        }
        HistoryService::new(Arc::new(pool))
    }

    fn sample(user: &str) -> NewHistoryRecord {
        NewHistoryRecord {
            filename: "2026-01-01_12-00-00_meeting.webm".into(),
            original_name: "meeting.webm".into(),
            file_type: "audio/webm".into(),
            file_size: 1234,
            transcription_text: "hello there".into(),
            doc_file_id: "drive-id".into(),
            doc_file_url: "https://drive.example/doc".into(),
            audio_file_path: Some("/api/audio/meeting.webm".into()),
            user_id: user.into(),
        }
    }

    #[tokio::test]
    async fn insert_and_fetch_round_trip() {
        let svc = test_service().await;
        let id = svc.add(sample("alice@example.com")).await.unwrap();
        let item = svc.get(id, "alice@example.com").await.unwrap();
        assert_eq!(item.original_name, "meeting.webm");
        assert_eq!(item.transcription_text, "hello there");
        assert!(item.summary_text.is_none());
    }

    #[tokio::test]
    async fn rows_are_scoped_to_their_owner() {
        let svc = test_service().await;
        let id = svc.add(sample("alice@example.com")).await.unwrap();

        let err = svc.get(id, "bob@example.com").await.unwrap_err();
        assert!(matches!(err, HistoryError::NotFound(_)));
        assert!(svc.list_for_user("bob@example.com").await.unwrap().is_empty());

        let err = svc.delete(id, "bob@example.com").await.unwrap_err();
        assert!(matches!(err, HistoryError::NotFound(_)));
        assert_eq!(svc.list_for_user("alice@example.com").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rename_and_summary_updates_persist() {
        let svc = test_service().await;
        let id = svc.add(sample("alice@example.com")).await.unwrap();

        svc.rename(id, "alice@example.com", "renamed.webm").await.unwrap();
        svc.set_summary(id, "alice@example.com", "a summary", "standard")
            .await
            .unwrap();

        let item = svc.get(id, "alice@example.com").await.unwrap();
        assert_eq!(item.filename, "renamed.webm");
        assert_eq!(item.summary_text.as_deref(), Some("a summary"));
        assert_eq!(item.summary_template.as_deref(), Some("standard"));
    }

    #[tokio::test]
    async fn delete_removes_the_row() {
        let svc = test_service().await;
        let id = svc.add(sample("alice@example.com")).await.unwrap();
        svc.delete(id, "alice@example.com").await.unwrap();
        let err = svc.get(id, "alice@example.com").await.unwrap_err();
        assert!(matches!(err, HistoryError::NotFound(_)));
    }
}
