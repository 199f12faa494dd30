//! bdr-bde
//!
//! Read-only access to the extract subsystem's control schema: Upload
//! rows plus the authoritative row/change counts the verifier compares
//! against the publishing platform. Nothing in this crate writes to the
//! staging database.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use bdr_job::{Upload, UploadStatus};

pub const ENV_DB_URL: &str = "BDR_DATABASE_URL";

/// Connect to the staging Postgres using BDR_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url =
        std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .context("failed to connect to staging Postgres")?;

    Ok(pool)
}

/// Insert/update/delete counts between two source revisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeCounts {
    pub inserted: i64,
    pub updated: i64,
    pub deleted: i64,
}

impl std::fmt::Display for ChangeCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "I{}/U{}/D{}", self.inserted, self.updated, self.deleted)
    }
}

/// Read-only view of the extract subsystem. The trait seam exists so the
/// orchestrator and verifier run against fakes in tests.
#[async_trait]
pub trait BdeSource: Send + Sync {
    /// Upload by id; `None` when no such row exists.
    async fn upload(&self, id: i64) -> Result<Option<Upload>>;

    /// Highest-id Upload, in-progress or not.
    async fn latest_upload(&self) -> Result<Option<Upload>>;

    /// Highest-id Upload currently ACTIVE.
    async fn active_upload(&self) -> Result<Option<Upload>>;

    /// Authoritative row count for `table` at source revision `rev`.
    async fn row_count(&self, table: &str, rev: i64) -> Result<i64>;

    /// Authoritative change counts for `table` between two revisions.
    async fn change_counts(&self, table: &str, rev_from: i64, rev_to: i64)
        -> Result<ChangeCounts>;
}

pub struct PgBdeSource {
    pool: PgPool,
}

impl PgBdeSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

type UploadRow = (i64, String, String, Option<DateTime<Utc>>, Option<DateTime<Utc>>);

fn upload_from_row(row: UploadRow) -> Result<Upload> {
    let (id, status, schema_name, start_time, end_time) = row;
    Ok(Upload {
        id,
        status: UploadStatus::parse(&status)?,
        schema_name,
        start_time,
        end_time,
        error_reason: None,
    })
}

const UPLOAD_COLUMNS: &str = "id, status, schema_name, start_time, end_time";

#[async_trait]
impl BdeSource for PgBdeSource {
    async fn upload(&self, id: i64) -> Result<Option<Upload>> {
        let row = sqlx::query_as::<_, UploadRow>(&format!(
            "select {UPLOAD_COLUMNS} from bde_control.upload where id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("upload query failed")?;

        row.map(upload_from_row).transpose()
    }

    async fn latest_upload(&self) -> Result<Option<Upload>> {
        let row = sqlx::query_as::<_, UploadRow>(&format!(
            "select {UPLOAD_COLUMNS} from bde_control.upload order by id desc limit 1"
        ))
        .fetch_optional(&self.pool)
        .await
        .context("latest upload query failed")?;

        row.map(upload_from_row).transpose()
    }

    async fn active_upload(&self) -> Result<Option<Upload>> {
        let row = sqlx::query_as::<_, UploadRow>(&format!(
            "select {UPLOAD_COLUMNS} from bde_control.upload where status = 'A' \
             order by id desc limit 1"
        ))
        .fetch_optional(&self.pool)
        .await
        .context("active upload query failed")?;

        row.map(upload_from_row).transpose()
    }

    async fn row_count(&self, table: &str, rev: i64) -> Result<i64> {
        let (schema, name) = split_table(table)?;
        // Versioned-table access goes through generated functions, so the
        // identifier is interpolated; split_table has already constrained it.
        let sql = format!(
            "select count(*)::bigint from table_version.ver_get_{schema}_{name}_revision($1)"
        );
        let (count,): (i64,) = sqlx::query_as(&sql)
            .bind(rev)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("row count query failed for {table} rev {rev}"))?;
        Ok(count)
    }

    async fn change_counts(
        &self,
        table: &str,
        rev_from: i64,
        rev_to: i64,
    ) -> Result<ChangeCounts> {
        let (schema, name) = split_table(table)?;
        let sql = format!(
            "select _diff_action::text, count(*)::bigint \
             from table_version.ver_get_{schema}_{name}_diff($1, $2) \
             group by _diff_action"
        );
        let rows: Vec<(String, i64)> = sqlx::query_as(&sql)
            .bind(rev_from)
            .bind(rev_to)
            .fetch_all(&self.pool)
            .await
            .with_context(|| {
                format!("change count query failed for {table} rev {rev_from}..{rev_to}")
            })?;

        counts_from_rows(&rows)
    }
}

/// Map `_diff_action` rows (I/U/D) onto ChangeCounts; absent actions are 0.
fn counts_from_rows(rows: &[(String, i64)]) -> Result<ChangeCounts> {
    let mut counts = ChangeCounts::default();
    for (action, n) in rows {
        match action.as_str() {
            "I" => counts.inserted = *n,
            "U" => counts.updated = *n,
            "D" => counts.deleted = *n,
            other => bail!("unexpected diff action {:?}", other),
        }
    }
    Ok(counts)
}

/// Split `schema.table` and reject anything that is not a plain lowercase
/// identifier on both sides (these names end up interpolated into SQL).
fn split_table(table: &str) -> Result<(&str, &str)> {
    let Some((schema, name)) = table.split_once('.') else {
        bail!("table name {:?} is not fully qualified (schema.table)", table);
    };
    for part in [schema, name] {
        let ok = !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            && !part.starts_with(|c: char| c.is_ascii_digit());
        if !ok {
            bail!("invalid table identifier {:?}", table);
        }
    }
    Ok((schema, name))
}
