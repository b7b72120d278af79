use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{fs, path::Path, str::FromStr};

use shared::domain::{AgendaItemId, ListOfSpeakersId, SpeakerId, UserId};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredAgendaItem {
    pub agenda_item_id: AgendaItemId,
    pub title: String,
    pub list_of_speakers_id: ListOfSpeakersId,
}

#[derive(Debug, Clone)]
pub struct StoredListOfSpeakers {
    pub list_of_speakers_id: ListOfSpeakersId,
    pub agenda_item_id: AgendaItemId,
    pub title: String,
    pub closed: bool,
}

#[derive(Debug, Clone)]
pub struct StoredSpeaker {
    pub speaker_id: SpeakerId,
    pub list_of_speakers_id: ListOfSpeakersId,
    pub user_id: UserId,
    pub username: String,
    pub weight: i64,
    pub marked: bool,
    pub begin_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every new connection to `sqlite::memory:` opens a fresh database,
        // so in-memory pools must stay on a single connection.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_user(&self, username: &str) -> Result<UserId> {
        let rec = sqlx::query(
            "INSERT INTO users (username) VALUES (?)
             ON CONFLICT(username) DO UPDATE SET username=excluded.username
             RETURNING id",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(UserId(rec.get::<i64, _>(0)))
    }

    pub async fn username_for_user(&self, user_id: UserId) -> Result<Option<String>> {
        let row = sqlx::query("SELECT username FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    /// Creates the agenda item together with its list of speakers. Every item
    /// owns exactly one list for its whole lifetime.
    pub async fn create_agenda_item(&self, title: &str) -> Result<(AgendaItemId, ListOfSpeakersId)> {
        let mut tx = self.pool.begin().await?;
        let item = sqlx::query("INSERT INTO agenda_items (title) VALUES (?) RETURNING id")
            .bind(title)
            .fetch_one(&mut *tx)
            .await?;
        let agenda_item_id = AgendaItemId(item.get::<i64, _>(0));
        let list = sqlx::query("INSERT INTO lists_of_speakers (agenda_item_id) VALUES (?) RETURNING id")
            .bind(agenda_item_id.0)
            .fetch_one(&mut *tx)
            .await?;
        let list_of_speakers_id = ListOfSpeakersId(list.get::<i64, _>(0));
        tx.commit().await?;
        Ok((agenda_item_id, list_of_speakers_id))
    }

    pub async fn delete_agenda_item(
        &self,
        agenda_item_id: AgendaItemId,
    ) -> Result<Option<ListOfSpeakersId>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT id FROM lists_of_speakers WHERE agenda_item_id = ?")
            .bind(agenda_item_id.0)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let list_of_speakers_id = ListOfSpeakersId(row.get::<i64, _>(0));

        sqlx::query("DELETE FROM speakers WHERE list_of_speakers_id = ?")
            .bind(list_of_speakers_id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM lists_of_speakers WHERE id = ?")
            .bind(list_of_speakers_id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM agenda_items WHERE id = ?")
            .bind(agenda_item_id.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(list_of_speakers_id))
    }

    pub async fn list_agenda_items(&self) -> Result<Vec<StoredAgendaItem>> {
        let rows = sqlx::query(
            "SELECT a.id, a.title, l.id
             FROM agenda_items a
             INNER JOIN lists_of_speakers l ON l.agenda_item_id = a.id
             ORDER BY a.id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| StoredAgendaItem {
                agenda_item_id: AgendaItemId(r.get::<i64, _>(0)),
                title: r.get::<String, _>(1),
                list_of_speakers_id: ListOfSpeakersId(r.get::<i64, _>(2)),
            })
            .collect())
    }

    pub async fn load_list_of_speakers(
        &self,
        list_of_speakers_id: ListOfSpeakersId,
    ) -> Result<Option<StoredListOfSpeakers>> {
        let row = sqlx::query(
            "SELECT l.id, l.agenda_item_id, a.title, l.closed
             FROM lists_of_speakers l
             INNER JOIN agenda_items a ON a.id = l.agenda_item_id
             WHERE l.id = ?",
        )
        .bind(list_of_speakers_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| StoredListOfSpeakers {
            list_of_speakers_id: ListOfSpeakersId(r.get::<i64, _>(0)),
            agenda_item_id: AgendaItemId(r.get::<i64, _>(1)),
            title: r.get::<String, _>(2),
            closed: r.get::<bool, _>(3),
        }))
    }

    /// Speakers of one list in insertion order. Callers that need the queue
    /// order sort by weight themselves.
    pub async fn list_speakers(
        &self,
        list_of_speakers_id: ListOfSpeakersId,
    ) -> Result<Vec<StoredSpeaker>> {
        let rows = sqlx::query(
            "SELECT s.id, s.list_of_speakers_id, s.user_id, u.username,
                    s.weight, s.marked, s.begin_time, s.end_time
             FROM speakers s
             INNER JOIN users u ON u.id = s.user_id
             WHERE s.list_of_speakers_id = ?
             ORDER BY s.id ASC",
        )
        .bind(list_of_speakers_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(speaker_from_row).collect())
    }

    pub async fn load_speaker(&self, speaker_id: SpeakerId) -> Result<Option<StoredSpeaker>> {
        let row = sqlx::query(
            "SELECT s.id, s.list_of_speakers_id, s.user_id, u.username,
                    s.weight, s.marked, s.begin_time, s.end_time
             FROM speakers s
             INNER JOIN users u ON u.id = s.user_id
             WHERE s.id = ?",
        )
        .bind(speaker_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(speaker_from_row))
    }

    pub async fn find_waiting_speaker(
        &self,
        list_of_speakers_id: ListOfSpeakersId,
        user_id: UserId,
    ) -> Result<Option<SpeakerId>> {
        let row = sqlx::query(
            "SELECT id FROM speakers
             WHERE list_of_speakers_id = ? AND user_id = ? AND begin_time IS NULL",
        )
        .bind(list_of_speakers_id.0)
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| SpeakerId(r.get::<i64, _>(0))))
    }

    /// Appends at the end of the manual order: one past the largest weight in
    /// the list, including speakers that already had their turn.
    pub async fn add_speaker(
        &self,
        list_of_speakers_id: ListOfSpeakersId,
        user_id: UserId,
    ) -> Result<SpeakerId> {
        let rec = sqlx::query(
            "INSERT INTO speakers (list_of_speakers_id, user_id, weight)
             SELECT ?1, ?2, COALESCE(MAX(weight), 0) + 1
             FROM speakers WHERE list_of_speakers_id = ?1
             RETURNING id",
        )
        .bind(list_of_speakers_id.0)
        .bind(user_id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(SpeakerId(rec.get::<i64, _>(0)))
    }

    pub async fn remove_speaker(&self, speaker_id: SpeakerId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM speakers WHERE id = ?")
            .bind(speaker_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn current_speaker(
        &self,
        list_of_speakers_id: ListOfSpeakersId,
    ) -> Result<Option<SpeakerId>> {
        let row = sqlx::query(
            "SELECT id FROM speakers
             WHERE list_of_speakers_id = ? AND begin_time IS NOT NULL AND end_time IS NULL
             ORDER BY begin_time DESC, id DESC
             LIMIT 1",
        )
        .bind(list_of_speakers_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| SpeakerId(r.get::<i64, _>(0))))
    }

    pub async fn begin_speech(&self, speaker_id: SpeakerId, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE speakers SET begin_time = ?, end_time = NULL WHERE id = ? AND begin_time IS NULL",
        )
        .bind(at)
        .bind(speaker_id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn end_speech(&self, speaker_id: SpeakerId, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE speakers SET end_time = ?
             WHERE id = ? AND begin_time IS NOT NULL AND end_time IS NULL",
        )
        .bind(at)
        .bind(speaker_id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_marked(&self, speaker_id: SpeakerId, marked: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE speakers SET marked = ? WHERE id = ?")
            .bind(marked)
            .bind(speaker_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn waiting_speaker_ids(
        &self,
        list_of_speakers_id: ListOfSpeakersId,
    ) -> Result<Vec<SpeakerId>> {
        let rows = sqlx::query(
            "SELECT id FROM speakers
             WHERE list_of_speakers_id = ? AND begin_time IS NULL
             ORDER BY weight ASC, id ASC",
        )
        .bind(list_of_speakers_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| SpeakerId(r.get::<i64, _>(0)))
            .collect())
    }

    /// Rewrites the manual order: position in `ordered` becomes the weight,
    /// starting at 1. Ids must belong to the list.
    pub async fn set_speaker_weights(
        &self,
        list_of_speakers_id: ListOfSpeakersId,
        ordered: &[SpeakerId],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (position, speaker_id) in ordered.iter().enumerate() {
            sqlx::query("UPDATE speakers SET weight = ? WHERE id = ? AND list_of_speakers_id = ?")
                .bind(position as i64 + 1)
                .bind(speaker_id.0)
                .bind(list_of_speakers_id.0)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn last_finished_speaker(
        &self,
        list_of_speakers_id: ListOfSpeakersId,
    ) -> Result<Option<SpeakerId>> {
        let row = sqlx::query(
            "SELECT id FROM speakers
             WHERE list_of_speakers_id = ? AND end_time IS NOT NULL
             ORDER BY end_time DESC, id DESC
             LIMIT 1",
        )
        .bind(list_of_speakers_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| SpeakerId(r.get::<i64, _>(0))))
    }

    pub async fn min_weight(&self, list_of_speakers_id: ListOfSpeakersId) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT MIN(weight) FROM speakers WHERE list_of_speakers_id = ?")
            .bind(list_of_speakers_id.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<Option<i64>, _>(0))
    }

    /// Puts a speaker back into the waiting set: timestamps cleared, weight
    /// replaced by the caller's choice.
    pub async fn requeue_speaker(&self, speaker_id: SpeakerId, weight: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE speakers SET begin_time = NULL, end_time = NULL, weight = ? WHERE id = ?",
        )
        .bind(weight)
        .bind(speaker_id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_closed(
        &self,
        list_of_speakers_id: ListOfSpeakersId,
        closed: bool,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE lists_of_speakers SET closed = ? WHERE id = ?")
            .bind(closed)
            .bind(list_of_speakers_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM config WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO config (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn config_all(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT key, value FROM config ORDER BY key ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>(0), r.get::<String, _>(1)))
            .collect())
    }
}

fn speaker_from_row(r: sqlx::sqlite::SqliteRow) -> StoredSpeaker {
    StoredSpeaker {
        speaker_id: SpeakerId(r.get::<i64, _>(0)),
        list_of_speakers_id: ListOfSpeakersId(r.get::<i64, _>(1)),
        user_id: UserId(r.get::<i64, _>(2)),
        username: r.get::<String, _>(3),
        weight: r.get::<i64, _>(4),
        marked: r.get::<bool, _>(5),
        begin_time: r.get::<Option<DateTime<Utc>>, _>(6),
        end_time: r.get::<Option<DateTime<Utc>>, _>(7),
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return Ok(());
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();
    if path.is_empty() {
        return Ok(());
    }

    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!(
                    "failed to create parent directory '{}' for database url '{database_url}'",
                    parent.display()
                )
            })?;
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
