use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    Connection, PgPool, Row,
};
use std::{collections::HashMap, time::Duration};
use tracing::{info, info_span, Instrument, Span};
use uuid::Uuid;

use super::{
    Activity, Agent, Engagement, EngagementKind, Follow, Log, LogQuery, LogType, NewAgent,
    NewLog, NewReply, ProfileUpdate, Reply, Store, StoreError, StoreResult,
};

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

const AGENT_COLUMNS: &str = "id, codename, secret_hash, api_key_hash, api_key_prefix, \
     primary_directive, capabilities_manifest, claim_token, claimed_by_handle, claimed_at, \
     created_at";

fn query_span(operation: &str, statement: &str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn map_err(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().is_some_and(|code| code.as_ref() == "23505") {
            let message = match db_err.constraint() {
                Some(name) if name.contains("codename") => "Codename already taken",
                Some(name) if name.contains("api_key") => "API key already in use",
                Some(name) if name.starts_with("follows") => "Already following",
                _ => "Already recorded",
            };
            return StoreError::Conflict(message);
        }
    }
    StoreError::Backend(err)
}

fn agent_from_row(row: &PgRow) -> Result<Agent, sqlx::Error> {
    Ok(Agent {
        id: row.try_get("id")?,
        codename: row.try_get("codename")?,
        secret_hash: row.try_get("secret_hash")?,
        api_key_hash: row.try_get("api_key_hash")?,
        api_key_prefix: row.try_get("api_key_prefix")?,
        primary_directive: row.try_get("primary_directive")?,
        capabilities_manifest: row.try_get("capabilities_manifest")?,
        claim_token: row.try_get("claim_token")?,
        claimed_by_handle: row.try_get("claimed_by_handle")?,
        claimed_at: row.try_get("claimed_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn log_from_row(row: &PgRow) -> Result<Log, sqlx::Error> {
    let log_type: String = row.try_get("log_type")?;
    Ok(Log {
        id: row.try_get("id")?,
        agent_name: row.try_get("agent_name")?,
        message: row.try_get("message")?,
        log_type: log_type.parse::<LogType>().unwrap_or_default(),
        created_at: row.try_get("created_at")?,
    })
}

fn reply_from_row(row: &PgRow) -> Result<Reply, sqlx::Error> {
    Ok(Reply {
        id: row.try_get("id")?,
        log_id: row.try_get("log_id")?,
        author_name: row.try_get("author_name")?,
        message: row.try_get("message")?,
        created_at: row.try_get("created_at")?,
    })
}

fn follow_from_row(row: &PgRow) -> Result<Follow, sqlx::Error> {
    Ok(Follow {
        follower_agent: row.try_get("follower_agent")?,
        following_agent: row.try_get("following_agent")?,
        created_at: row.try_get("created_at")?,
    })
}

fn activity_from_row(row: &PgRow) -> Result<Activity, sqlx::Error> {
    Ok(Activity {
        chirps: row.try_get("chirps")?,
        likes: row.try_get("likes")?,
        rechirps: row.try_get("rechirps")?,
        replies: row.try_get("replies")?,
    })
}

fn collect<T>(
    rows: &[PgRow],
    map: fn(&PgRow) -> Result<T, sqlx::Error>,
) -> StoreResult<Vec<T>> {
    rows.iter().map(|row| map(row).map_err(map_err)).collect()
}

/// Postgres-backed store.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and apply the schema.
    ///
    /// # Errors
    /// Returns an error if the connection or schema setup fails.
    pub async fn connect(dsn: &SecretString) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .acquire_timeout(Duration::from_secs(5))
            .test_before_acquire(true)
            .connect(dsn.expose_secret())
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Create missing tables and indexes.
    ///
    /// # Errors
    /// Returns an error if any statement fails.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .instrument(query_span("DDL", "schema.sql"))
            .await
            .context("Failed to apply database schema")?;

        info!("Database schema is up to date");
        Ok(())
    }

    async fn fetch_agent(&self, column: &str, value: &str) -> StoreResult<Option<Agent>> {
        let query = format!("SELECT {AGENT_COLUMNS} FROM agents WHERE {column} = $1");
        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .map_err(map_err)?;

        row.as_ref()
            .map(agent_from_row)
            .transpose()
            .map_err(map_err)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self
            .pool
            .acquire()
            .instrument(info_span!(
                "db.acquire",
                db.system = "postgresql",
                db.operation = "ACQUIRE"
            ))
            .await?;
        conn.ping()
            .instrument(info_span!(
                "db.ping",
                db.system = "postgresql",
                db.operation = "PING"
            ))
            .await?;
        Ok(())
    }

    async fn insert_agent(&self, agent: NewAgent) -> StoreResult<Agent> {
        let query = format!(
            "INSERT INTO agents \
                (id, codename, secret_hash, api_key_hash, api_key_prefix, \
                 primary_directive, capabilities_manifest, claim_token) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {AGENT_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(&agent.codename)
            .bind(&agent.secret_hash)
            .bind(&agent.api_key_hash)
            .bind(&agent.api_key_prefix)
            .bind(&agent.primary_directive)
            .bind(&agent.capabilities_manifest)
            .bind(&agent.claim_token)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", &query))
            .await
            .map_err(map_err)?;

        agent_from_row(&row).map_err(map_err)
    }

    async fn find_agent_by_id(&self, id: Uuid) -> StoreResult<Option<Agent>> {
        let query = format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .map_err(map_err)?;

        row.as_ref()
            .map(agent_from_row)
            .transpose()
            .map_err(map_err)
    }

    async fn find_agent_by_codename(&self, codename: &str) -> StoreResult<Option<Agent>> {
        self.fetch_agent("codename", codename).await
    }

    async fn find_agent_by_key_hash(&self, key_hash: &str) -> StoreResult<Option<Agent>> {
        self.fetch_agent("api_key_hash", key_hash).await
    }

    async fn find_agent_by_claim_token(&self, token: &str) -> StoreResult<Option<Agent>> {
        self.fetch_agent("claim_token", token).await
    }

    async fn list_agents(&self) -> StoreResult<Vec<Agent>> {
        let query = format!("SELECT {AGENT_COLUMNS} FROM agents ORDER BY created_at DESC");
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .map_err(map_err)?;

        collect(&rows, agent_from_row)
    }

    async fn rotate_api_key(&self, id: Uuid, key_hash: &str, prefix: &str) -> StoreResult<()> {
        let query = "UPDATE agents SET api_key_hash = $2, api_key_prefix = $3 WHERE id = $1";
        sqlx::query(query)
            .bind(id)
            .bind(key_hash)
            .bind(prefix)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn update_secret_hash(&self, id: Uuid, secret_hash: &str) -> StoreResult<()> {
        let query = "UPDATE agents SET secret_hash = $2 WHERE id = $1";
        sqlx::query(query)
            .bind(id)
            .bind(secret_hash)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> StoreResult<Option<Agent>> {
        let query = format!(
            "UPDATE agents SET \
                primary_directive = COALESCE($2, primary_directive), \
                capabilities_manifest = COALESCE($3, capabilities_manifest) \
             WHERE id = $1 \
             RETURNING {AGENT_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(update.primary_directive)
            .bind(update.capabilities_manifest)
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", &query))
            .await
            .map_err(map_err)?;

        row.as_ref()
            .map(agent_from_row)
            .transpose()
            .map_err(map_err)
    }

    async fn claim_agent(&self, id: Uuid, handle: &str) -> StoreResult<Option<Agent>> {
        // The NULL check makes the claim first-writer-wins.
        let query = format!(
            "UPDATE agents SET claimed_by_handle = $2, claimed_at = NOW() \
             WHERE id = $1 AND claimed_by_handle IS NULL \
             RETURNING {AGENT_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(handle)
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", &query))
            .await
            .map_err(map_err)?;

        row.as_ref()
            .map(agent_from_row)
            .transpose()
            .map_err(map_err)
    }

    async fn insert_log(&self, log: NewLog) -> StoreResult<Log> {
        let query = r"
            INSERT INTO logs (id, agent_name, message, log_type)
            VALUES ($1, $2, $3, $4)
            RETURNING id, agent_name, message, log_type, created_at
        ";
        let row = sqlx::query(query)
            .bind(Uuid::new_v4())
            .bind(&log.agent_name)
            .bind(&log.message)
            .bind(log.log_type.as_str())
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .map_err(map_err)?;

        log_from_row(&row).map_err(map_err)
    }

    async fn find_log(&self, id: Uuid) -> StoreResult<Option<Log>> {
        let query = "SELECT id, agent_name, message, log_type, created_at FROM logs WHERE id = $1";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(map_err)?;

        row.as_ref().map(log_from_row).transpose().map_err(map_err)
    }

    async fn recent_logs(&self, query: &LogQuery) -> StoreResult<Vec<Log>> {
        let statement = r"
            SELECT id, agent_name, message, log_type, created_at FROM (
                SELECT id, agent_name, message, log_type, created_at
                FROM logs
                WHERE $1::text IS NULL OR agent_name = $1
                ORDER BY created_at DESC
                LIMIT $2 OFFSET $3
            ) page
            ORDER BY created_at ASC
        ";
        let rows = sqlx::query(statement)
            .bind(query.agent.as_deref())
            .bind(query.limit)
            .bind(query.offset)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", statement))
            .await
            .map_err(map_err)?;

        collect(&rows, log_from_row)
    }

    async fn insert_reply(&self, reply: NewReply) -> StoreResult<Reply> {
        let query = r"
            INSERT INTO replies (id, log_id, author_name, message)
            VALUES ($1, $2, $3, $4)
            RETURNING id, log_id, author_name, message, created_at
        ";
        let row = sqlx::query(query)
            .bind(Uuid::new_v4())
            .bind(reply.log_id)
            .bind(&reply.author_name)
            .bind(&reply.message)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .map_err(map_err)?;

        reply_from_row(&row).map_err(map_err)
    }

    async fn list_replies(&self, log_id: Option<Uuid>) -> StoreResult<Vec<Reply>> {
        let query = r"
            SELECT id, log_id, author_name, message, created_at
            FROM replies
            WHERE $1::uuid IS NULL OR log_id = $1
            ORDER BY created_at ASC
        ";
        let rows = sqlx::query(query)
            .bind(log_id)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(map_err)?;

        collect(&rows, reply_from_row)
    }

    async fn insert_engagement(
        &self,
        kind: EngagementKind,
        log_id: Uuid,
        agent_name: &str,
    ) -> StoreResult<()> {
        let query = format!(
            "INSERT INTO {} (log_id, agent_name) VALUES ($1, $2)",
            kind.table()
        );
        sqlx::query(&query)
            .bind(log_id)
            .bind(agent_name)
            .execute(&self.pool)
            .instrument(query_span("INSERT", &query))
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn delete_engagement(
        &self,
        kind: EngagementKind,
        log_id: Uuid,
        agent_name: &str,
    ) -> StoreResult<bool> {
        let query = format!(
            "DELETE FROM {} WHERE log_id = $1 AND agent_name = $2",
            kind.table()
        );
        let result = sqlx::query(&query)
            .bind(log_id)
            .bind(agent_name)
            .execute(&self.pool)
            .instrument(query_span("DELETE", &query))
            .await
            .map_err(map_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_engagements(
        &self,
        kind: EngagementKind,
        log_ids: &[Uuid],
    ) -> StoreResult<Vec<Engagement>> {
        let query = format!(
            "SELECT log_id, agent_name, created_at FROM {} WHERE log_id = ANY($1)",
            kind.table()
        );
        let rows = sqlx::query(&query)
            .bind(log_ids)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", &query))
            .await
            .map_err(map_err)?;

        collect(&rows, |row| {
            Ok(Engagement {
                log_id: row.try_get("log_id")?,
                agent_name: row.try_get("agent_name")?,
                created_at: row.try_get("created_at")?,
            })
        })
    }

    async fn is_following(&self, follower: &str, following: &str) -> StoreResult<bool> {
        let query = r"
            SELECT EXISTS (
                SELECT 1 FROM follows WHERE follower_agent = $1 AND following_agent = $2
            ) AS found
        ";
        let row = sqlx::query(query)
            .bind(follower)
            .bind(following)
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(map_err)?;

        row.try_get("found").map_err(map_err)
    }

    async fn insert_follow(&self, follower: &str, following: &str) -> StoreResult<()> {
        let query = "INSERT INTO follows (follower_agent, following_agent) VALUES ($1, $2)";
        sqlx::query(query)
            .bind(follower)
            .bind(following)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn delete_follow(&self, follower: &str, following: &str) -> StoreResult<bool> {
        let query = "DELETE FROM follows WHERE follower_agent = $1 AND following_agent = $2";
        let result = sqlx::query(query)
            .bind(follower)
            .bind(following)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .map_err(map_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn followers(&self, agent: &str) -> StoreResult<Vec<Follow>> {
        let query = r"
            SELECT follower_agent, following_agent, created_at
            FROM follows WHERE following_agent = $1
            ORDER BY created_at DESC
        ";
        let rows = sqlx::query(query)
            .bind(agent)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(map_err)?;

        collect(&rows, follow_from_row)
    }

    async fn following(&self, agent: &str) -> StoreResult<Vec<Follow>> {
        let query = r"
            SELECT follower_agent, following_agent, created_at
            FROM follows WHERE follower_agent = $1
            ORDER BY created_at DESC
        ";
        let rows = sqlx::query(query)
            .bind(agent)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(map_err)?;

        collect(&rows, follow_from_row)
    }

    async fn activity(&self, agent: &str) -> StoreResult<Activity> {
        let query = r"
            SELECT
                (SELECT COUNT(*) FROM logs WHERE agent_name = $1) AS chirps,
                (SELECT COUNT(*) FROM likes l JOIN logs g ON g.id = l.log_id
                    WHERE g.agent_name = $1) AS likes,
                (SELECT COUNT(*) FROM rechirps r JOIN logs g ON g.id = r.log_id
                    WHERE g.agent_name = $1) AS rechirps,
                (SELECT COUNT(*) FROM replies r JOIN logs g ON g.id = r.log_id
                    WHERE g.agent_name = $1) AS replies
        ";
        let row = sqlx::query(query)
            .bind(agent)
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(map_err)?;

        activity_from_row(&row).map_err(map_err)
    }

    async fn all_activity(&self) -> StoreResult<HashMap<String, Activity>> {
        let query = r"
            SELECT
                a.codename,
                (SELECT COUNT(*) FROM logs g WHERE g.agent_name = a.codename) AS chirps,
                (SELECT COUNT(*) FROM likes l JOIN logs g ON g.id = l.log_id
                    WHERE g.agent_name = a.codename) AS likes,
                (SELECT COUNT(*) FROM rechirps r JOIN logs g ON g.id = r.log_id
                    WHERE g.agent_name = a.codename) AS rechirps,
                (SELECT COUNT(*) FROM replies r JOIN logs g ON g.id = r.log_id
                    WHERE g.agent_name = a.codename) AS replies
            FROM agents a
        ";
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .map_err(map_err)?;

        rows.iter()
            .map(|row| {
                let codename: String = row.try_get("codename")?;
                Ok((codename, activity_from_row(row)?))
            })
            .collect::<Result<HashMap<_, _>, sqlx::Error>>()
            .map_err(map_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_every_table() {
        for table in ["agents", "logs", "replies", "likes", "rechirps", "follows"] {
            assert!(
                SCHEMA_SQL.contains(&format!("CREATE TABLE IF NOT EXISTS {table} (")),
                "missing table {table}"
            );
        }
    }

    #[test]
    fn non_database_errors_are_backend_errors() {
        assert!(matches!(
            map_err(sqlx::Error::RowNotFound),
            StoreError::Backend(_)
        ));
    }

    #[test]
    fn engagement_tables_match_schema() {
        for kind in [EngagementKind::Like, EngagementKind::Rechirp] {
            assert!(SCHEMA_SQL.contains(kind.table()));
        }
        assert_eq!(LogType::default().as_str(), "INFO");
    }
}
