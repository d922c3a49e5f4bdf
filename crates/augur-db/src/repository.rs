use crate::{
    filter::push_filter,
    models::{CollectionStatusRecord, RepoRecord},
    Error, Result,
};
use async_trait::async_trait;
use augur_core::status::format_timestamp;
use augur_core::{
    CollectionStatus, RepoLookup, Repository, StatusFilter, StatusStore, Track, TrackUpdate,
};
use sqlx::{postgres::PgPoolOptions, Pool, Postgres, QueryBuilder};

#[derive(Clone)]
pub struct Database {
    pool: Pool<Postgres>,
}

impl Database {
    /// Create new database connection
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Initialize database schema
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS repo (
                repo_id BIGSERIAL PRIMARY KEY,
                repo_git TEXT NOT NULL UNIQUE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collection_status (
                repo_id BIGINT PRIMARY KEY REFERENCES repo(repo_id),
                core_status VARCHAR(32) NOT NULL DEFAULT 'Pending',
                core_task_id VARCHAR(255),
                core_data_last_collected VARCHAR(19),
                secondary_status VARCHAR(32) NOT NULL DEFAULT 'Pending',
                secondary_task_id VARCHAR(255),
                secondary_data_last_collected VARCHAR(19),
                facade_status VARCHAR(32) NOT NULL DEFAULT 'Pending',
                facade_task_id VARCHAR(255),
                facade_data_last_collected VARCHAR(19)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Create indexes
        for track in Track::ALL {
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_collection_status_{0}_task_id \
                 ON collection_status({0}_task_id)",
                track.as_str()
            ))
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    // ========================================================================
    // Repository Operations
    // ========================================================================

    /// Add a repository together with its all-`Pending` status row
    pub async fn add_repository(&self, repo_git: &str) -> Result<Repository> {
        let mut tx = self.pool.begin().await?;

        let record = sqlx::query_as::<_, RepoRecord>(
            r#"
            INSERT INTO repo (repo_git) VALUES ($1)
            ON CONFLICT (repo_git) DO UPDATE SET repo_git = EXCLUDED.repo_git
            RETURNING repo_id, repo_git
            "#,
        )
        .bind(repo_git)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO collection_status (repo_id) VALUES ($1) ON CONFLICT (repo_id) DO NOTHING")
            .bind(record.repo_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::debug!("Registered repository {} as repo_id {}", repo_git, record.repo_id);

        Ok(record.into())
    }

    /// Get repository by location
    pub async fn get_repository(&self, repo_git: &str) -> Result<Option<Repository>> {
        let record = sqlx::query_as::<_, RepoRecord>(
            "SELECT repo_id, repo_git FROM repo WHERE repo_git = $1",
        )
        .bind(repo_git)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(Into::into))
    }

    // ========================================================================
    // Collection Status Operations
    // ========================================================================

    /// Get collection status by repo_id
    pub async fn get_status(&self, repo_id: i64) -> Result<CollectionStatus> {
        let record = sqlx::query_as::<_, CollectionStatusRecord>(
            "SELECT * FROM collection_status WHERE repo_id = $1",
        )
        .bind(repo_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::StatusNotFound(repo_id))?;

        record.try_into()
    }

    /// Create the status row for an existing repository
    pub async fn register_status(&self, repo_id: i64) -> Result<CollectionStatus> {
        let exists = sqlx::query_scalar::<_, i64>("SELECT repo_id FROM repo WHERE repo_id = $1")
            .bind(repo_id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(Error::RepoNotFound(format!("repo_id {}", repo_id)));
        }

        sqlx::query("INSERT INTO collection_status (repo_id) VALUES ($1) ON CONFLICT (repo_id) DO NOTHING")
            .bind(repo_id)
            .execute(&self.pool)
            .await?;

        self.get_status(repo_id).await
    }

    /// `repo_git` of rows matching `filter`, ordered by repo_id
    pub async fn find_repos(&self, filter: &StatusFilter, limit: usize) -> Result<Vec<String>> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT r.repo_git FROM collection_status cs JOIN repo r ON r.repo_id = cs.repo_id WHERE ",
        );
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY cs.repo_id LIMIT ");
        qb.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));

        let repos = qb
            .build_query_scalar::<String>()
            .fetch_all(&self.pool)
            .await?;

        Ok(repos)
    }

    /// Write the columns of one track. A single UPDATE statement, so the
    /// other tracks of the row are never read or rewritten.
    pub async fn update_track(&self, repo_id: i64, track: Track, update: &TrackUpdate) -> Result<()> {
        let t = track.as_str();
        let sql = format!(
            "UPDATE collection_status SET {t}_status = $1, {t}_task_id = $2, \
             {t}_data_last_collected = COALESCE($3, {t}_data_last_collected) \
             WHERE repo_id = $4"
        );

        let result = sqlx::query(&sql)
            .bind(update.status.as_str())
            .bind(update.task_handle.as_deref())
            .bind(update.last_collected_at.as_ref().map(format_timestamp))
            .bind(repo_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::StatusNotFound(repo_id));
        }

        Ok(())
    }

    /// Write the columns of one track only while it still holds `expected_handle`.
    /// A row without that handle is left alone and reported as not updated.
    pub async fn update_track_if_handle(
        &self,
        repo_id: i64,
        track: Track,
        expected_handle: &str,
        update: &TrackUpdate,
    ) -> Result<bool> {
        let t = track.as_str();
        let sql = format!(
            "UPDATE collection_status SET {t}_status = $1, {t}_task_id = $2, \
             {t}_data_last_collected = COALESCE($3, {t}_data_last_collected) \
             WHERE repo_id = $4 AND {t}_task_id = $5"
        );

        let result = sqlx::query(&sql)
            .bind(update.status.as_str())
            .bind(update.task_handle.as_deref())
            .bind(update.last_collected_at.as_ref().map(format_timestamp))
            .bind(repo_id)
            .bind(expected_handle)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Clear the in-flight handle of one track
    pub async fn clear_track_handle(&self, repo_id: i64, track: Track) -> Result<()> {
        let sql = format!(
            "UPDATE collection_status SET {}_task_id = NULL WHERE repo_id = $1",
            track.as_str()
        );

        let result = sqlx::query(&sql).bind(repo_id).execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Err(Error::StatusNotFound(repo_id));
        }

        Ok(())
    }

    /// Every track whose handle equals `handle`
    pub async fn tracks_with_handle(&self, handle: &str) -> Result<Vec<(i64, Track)>> {
        let records = sqlx::query_as::<_, CollectionStatusRecord>(
            r#"
            SELECT * FROM collection_status
            WHERE core_task_id = $1 OR secondary_task_id = $1 OR facade_task_id = $1
            ORDER BY repo_id
            "#,
        )
        .bind(handle)
        .fetch_all(&self.pool)
        .await?;

        let mut matches = Vec::new();
        for record in records {
            let status = CollectionStatus::try_from(record)?;
            for track in status.tracks_with_handle(handle) {
                matches.push((status.repo_id, track));
            }
        }

        Ok(matches)
    }
}

#[async_trait]
impl StatusStore for Database {
    async fn register(&self, repo_id: i64) -> augur_core::Result<CollectionStatus> {
        Ok(self.register_status(repo_id).await?)
    }

    async fn get(&self, repo_id: i64) -> augur_core::Result<CollectionStatus> {
        Ok(self.get_status(repo_id).await?)
    }

    async fn find(&self, filter: &StatusFilter, limit: usize) -> augur_core::Result<Vec<String>> {
        Ok(self.find_repos(filter, limit).await?)
    }

    async fn set_track(
        &self,
        repo_id: i64,
        track: Track,
        update: TrackUpdate,
    ) -> augur_core::Result<()> {
        Ok(self.update_track(repo_id, track, &update).await?)
    }

    async fn set_track_if_handle(
        &self,
        repo_id: i64,
        track: Track,
        expected_handle: &str,
        update: TrackUpdate,
    ) -> augur_core::Result<bool> {
        Ok(self
            .update_track_if_handle(repo_id, track, expected_handle, &update)
            .await?)
    }

    async fn clear_task_handle(&self, repo_id: i64, track: Track) -> augur_core::Result<()> {
        Ok(self.clear_track_handle(repo_id, track).await?)
    }

    async fn find_by_task_handle(&self, handle: &str) -> augur_core::Result<Vec<(i64, Track)>> {
        Ok(self.tracks_with_handle(handle).await?)
    }
}

#[async_trait]
impl RepoLookup for Database {
    async fn find_by_location(&self, repo_git: &str) -> augur_core::Result<Option<Repository>> {
        Ok(self.get_repository(repo_git).await?)
    }
}
