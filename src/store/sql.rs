//! SQL upsert persister
//!
//! Rows are keyed by project and the resource type's natural key, so one database can
//! hold the inventory of many projects. Each batch runs in one transaction
//! of `INSERT .. ON CONFLICT (project, key) DO UPDATE` statements, so re-running a scan refreshes
//! rows in place instead of duplicating them. The same statements run on Postgres and
//! SQLite through sqlx's `Any` driver.

use super::InventorySink;
use crate::error::PersistenceError;
use crate::resource::{ColumnKind, FieldValue, InventoryRow, ResourceDef};
use crate::scan::ScanResult;
use async_trait::async_trait;
use sqlx::any::{AnyArguments, AnyPoolOptions};
use sqlx::query::Query;
use sqlx::{Any, AnyPool};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const PROJECT_COLUMN: &str = "project";
const TARGET_COLUMN: &str = "scan_target";
const FIRST_OBSERVED_COLUMN: &str = "first_observed";
const LAST_OBSERVED_COLUMN: &str = "last_observed";

const MAX_CONNECTIONS: u32 = 5;

/// Upsert persister backed by a connection pool
#[derive(Clone, Debug)]
pub struct SqlStore {
    pool: AnyPool,
}

impl SqlStore {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    /// Connect to `postgres://..` or `sqlite:..`
    pub async fn connect(url: &str) -> Result<Self, PersistenceError> {
        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(url)
            .await?;

        info!("Connected to inventory database");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Create the resource type's table if it does not exist yet
    pub async fn ensure_table(&self, def: &ResourceDef) -> Result<(), PersistenceError> {
        let sql = create_table_sql(def)?;
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Upsert a batch in one transaction.
    ///
    /// An empty batch touches nothing. Cancellation is honoured until the transaction
    /// begins; after that the batch runs to commit or rollback. Any failing row drops
    /// the transaction, which rolls back every earlier row of the batch.
    pub async fn upsert_batch(
        &self,
        def: &ResourceDef,
        rows: &[InventoryRow],
        cancel: &CancellationToken,
    ) -> Result<usize, PersistenceError> {
        if rows.is_empty() {
            return Ok(0);
        }
        if cancel.is_cancelled() {
            return Err(PersistenceError::Cancelled);
        }

        self.ensure_table(def).await?;
        let sql = upsert_sql(def)?;

        let mut tx = self.pool.begin().await?;
        for row in rows {
            bind_row(sqlx::query(&sql), def, row)
                .execute(&mut *tx)
                .await
                .map_err(|source| PersistenceError::Row {
                    key: row.natural_key.clone(),
                    source,
                })?;
        }
        tx.commit().await?;

        debug!(resource = %def.key, table = %def.table, "upserted {} rows", rows.len());
        Ok(rows.len())
    }
}

#[async_trait]
impl InventorySink for SqlStore {
    fn name(&self) -> &str {
        "database"
    }

    async fn persist(
        &self,
        def: &ResourceDef,
        result: &ScanResult<InventoryRow>,
        cancel: &CancellationToken,
    ) -> Result<usize, PersistenceError> {
        self.upsert_batch(def, &result.rows, cancel).await
    }
}

/// Identifiers are interpolated into SQL, so only plain snake_case names are accepted
fn validate_identifier(name: &str) -> Result<&str, PersistenceError> {
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if valid_start && valid_rest && name.len() <= 63 {
        Ok(name)
    } else {
        Err(PersistenceError::InvalidIdentifier(name.to_string()))
    }
}

fn sql_type(kind: ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Text => "TEXT",
        ColumnKind::Integer => "BIGINT",
        ColumnKind::Boolean => "BOOLEAN",
    }
}

fn create_table_sql(def: &ResourceDef) -> Result<String, PersistenceError> {
    let key = validate_identifier(&def.natural_key.column)?;
    let mut columns = vec![
        format!("{PROJECT_COLUMN} TEXT NOT NULL"),
        format!("{key} TEXT NOT NULL"),
        format!("{TARGET_COLUMN} TEXT NOT NULL"),
    ];
    for column in &def.columns {
        columns.push(format!(
            "{} {}",
            validate_identifier(&column.column)?,
            sql_type(column.kind)
        ));
    }
    columns.push(format!("{FIRST_OBSERVED_COLUMN} TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP"));
    columns.push(format!("{LAST_OBSERVED_COLUMN} TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP"));
    columns.push(format!("PRIMARY KEY ({PROJECT_COLUMN}, {key})"));

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        validate_identifier(&def.table)?,
        columns.join(", ")
    ))
}

fn upsert_sql(def: &ResourceDef) -> Result<String, PersistenceError> {
    let key = validate_identifier(&def.natural_key.column)?;

    let mut data_columns = vec![TARGET_COLUMN];
    for column in &def.columns {
        data_columns.push(validate_identifier(&column.column)?);
    }

    let insert_columns: Vec<&str> = [PROJECT_COLUMN, key]
        .into_iter()
        .chain(data_columns.iter().copied())
        .collect();
    let placeholders: Vec<String> = (1..=insert_columns.len()).map(|i| format!("${i}")).collect();
    let updates: Vec<String> = data_columns
        .iter()
        .map(|c| format!("{c} = EXCLUDED.{c}"))
        .collect();

    Ok(format!(
        "INSERT INTO {table} ({columns}, {FIRST_OBSERVED_COLUMN}, {LAST_OBSERVED_COLUMN}) \
         VALUES ({values}, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP) \
         ON CONFLICT ({PROJECT_COLUMN}, {key}) DO UPDATE SET {updates}, {LAST_OBSERVED_COLUMN} = CURRENT_TIMESTAMP",
        table = validate_identifier(&def.table)?,
        columns = insert_columns.join(", "),
        values = placeholders.join(", "),
        updates = updates.join(", "),
    ))
}

/// Bind project, key, target and every declared column in `upsert_sql` order
fn bind_row<'q>(
    mut query: Query<'q, Any, AnyArguments<'q>>,
    def: &ResourceDef,
    row: &'q InventoryRow,
) -> Query<'q, Any, AnyArguments<'q>> {
    query = query
        .bind(row.project.as_str())
        .bind(row.natural_key.as_str())
        .bind(row.target.as_str());

    for column in &def.columns {
        query = match row.field(&column.column) {
            Some(FieldValue::Text(s)) => query.bind(s.as_str()),
            Some(FieldValue::Integer(i)) => query.bind(*i),
            Some(FieldValue::Bool(b)) => query.bind(*b),
            None => match FieldValue::empty(column.kind) {
                FieldValue::Text(_) => query.bind(""),
                FieldValue::Integer(i) => query.bind(i),
                FieldValue::Bool(b) => query.bind(b),
            },
        };
    }

    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::get_resource;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;

    async fn memory_store() -> SqlStore {
        sqlx::any::install_default_drivers();
        // A single long-lived connection keeps the in-memory database alive
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqlStore::new(pool)
    }

    fn bucket_def() -> ResourceDef {
        get_resource("storage-buckets").unwrap().clone()
    }

    fn bucket(name: &str, class: &str) -> InventoryRow {
        project_bucket("inventory-test", name, class)
    }

    fn project_bucket(project: &str, name: &str, class: &str) -> InventoryRow {
        let def = bucket_def();
        let mut fields = BTreeMap::new();
        for column in &def.columns {
            fields.insert(column.column.clone(), FieldValue::empty(column.kind));
        }
        fields.insert("storage_class".to_string(), FieldValue::Text(class.to_string()));
        InventoryRow {
            project: project.to_string(),
            natural_key: name.to_string(),
            target: "global".to_string(),
            fields,
        }
    }

    async fn count(store: &SqlStore, table: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(store.pool())
            .await
            .unwrap()
    }

    async fn storage_class(store: &SqlStore, name: &str) -> String {
        sqlx::query_scalar::<_, String>("SELECT storage_class FROM storage_buckets WHERE name = $1")
            .bind(name)
            .fetch_one(store.pool())
            .await
            .unwrap()
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("compute_instances").is_ok());
        assert!(validate_identifier("_private2").is_ok());
        assert!(validate_identifier("Robert'); DROP TABLE x;--").is_err());
        assert!(validate_identifier("1st").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn test_upsert_sql_shape() {
        let sql = upsert_sql(&bucket_def()).unwrap();
        assert!(sql.starts_with("INSERT INTO storage_buckets (project, name, scan_target, "));
        assert!(sql.contains("ON CONFLICT (project, name) DO UPDATE SET scan_target = EXCLUDED.scan_target"));
        assert!(sql.ends_with("last_observed = CURRENT_TIMESTAMP"));
        assert!(!sql.contains("first_observed = "));
    }

    #[test]
    fn test_create_table_types() {
        let def = get_resource("compute-instances").unwrap();
        let sql = create_table_sql(def).unwrap();
        assert!(sql.contains("project TEXT NOT NULL, instance_id TEXT NOT NULL"));
        assert!(sql.ends_with("PRIMARY KEY (project, instance_id))"));
        assert!(sql.contains("disk_count BIGINT"));
        assert!(sql.contains("can_ip_forward BOOLEAN"));
        assert!(sql.contains("first_observed TIMESTAMPTZ"));
    }

    #[tokio::test]
    async fn test_upsert_twice_keeps_one_row_per_key() {
        let store = memory_store().await;
        let def = bucket_def();
        let rows = vec![bucket("logs", "STANDARD"), bucket("backups", "COLDLINE")];
        let cancel = CancellationToken::new();

        assert_eq!(store.upsert_batch(&def, &rows, &cancel).await.unwrap(), 2);
        assert_eq!(store.upsert_batch(&def, &rows, &cancel).await.unwrap(), 2);

        assert_eq!(count(&store, "storage_buckets").await, 2);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_fields_and_keeps_first_observed() {
        let store = memory_store().await;
        let def = bucket_def();
        let cancel = CancellationToken::new();

        store
            .upsert_batch(&def, &[bucket("logs", "STANDARD")], &cancel)
            .await
            .unwrap();
        let first: String =
            sqlx::query_scalar("SELECT CAST(first_observed AS TEXT) FROM storage_buckets WHERE name = 'logs'")
                .fetch_one(store.pool())
                .await
                .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        store
            .upsert_batch(&def, &[bucket("logs", "ARCHIVE")], &cancel)
            .await
            .unwrap();

        assert_eq!(storage_class(&store, "logs").await, "ARCHIVE");
        let after: String =
            sqlx::query_scalar("SELECT CAST(first_observed AS TEXT) FROM storage_buckets WHERE name = 'logs'")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(first, after);
    }

    #[tokio::test]
    async fn test_same_name_in_two_projects_keeps_both_rows() {
        let store = memory_store().await;
        let def = bucket_def();
        let cancel = CancellationToken::new();

        let rows = vec![
            project_bucket("proj-a", "logs", "STANDARD"),
            project_bucket("proj-b", "logs", "ARCHIVE"),
        ];
        store.upsert_batch(&def, &rows, &cancel).await.unwrap();
        store.upsert_batch(&def, &rows, &cancel).await.unwrap();

        assert_eq!(count(&store, "storage_buckets").await, 2);
        let class: String = sqlx::query_scalar(
            "SELECT storage_class FROM storage_buckets WHERE project = 'proj-a' AND name = 'logs'",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(class, "STANDARD");
    }

    #[tokio::test]
    async fn test_failing_row_rolls_back_whole_batch() {
        let store = memory_store().await;
        let def = bucket_def();
        let cancel = CancellationToken::new();

        // Same layout, plus a constraint the second row violates
        let create = create_table_sql(&def).unwrap();
        let create = format!("{}, CHECK (name <> 'poison'))", create.strip_suffix(')').unwrap());
        sqlx::query(&create).execute(store.pool()).await.unwrap();

        store
            .upsert_batch(&def, &[bucket("logs", "STANDARD")], &cancel)
            .await
            .unwrap();

        let batch = vec![
            bucket("logs", "ARCHIVE"),
            bucket("poison", "STANDARD"),
            bucket("backups", "COLDLINE"),
        ];
        let err = store.upsert_batch(&def, &batch, &cancel).await.unwrap_err();

        assert!(matches!(err, PersistenceError::Row { ref key, .. } if key == "poison"));
        assert_eq!(count(&store, "storage_buckets").await, 1);
        assert_eq!(storage_class(&store, "logs").await, "STANDARD");
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let store = memory_store().await;
        let def = bucket_def();

        assert_eq!(
            store.upsert_batch(&def, &[], &CancellationToken::new()).await.unwrap(),
            0
        );

        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'storage_buckets'",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(tables, 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_begin() {
        let store = memory_store().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = store
            .upsert_batch(&bucket_def(), &[bucket("logs", "STANDARD")], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Cancelled));
    }

    #[tokio::test]
    async fn test_missing_fields_are_stored_empty() {
        let store = memory_store().await;
        let def = get_resource("compute-instances").unwrap();
        let row = crate::resource::normalize(
            def,
            "inventory-test",
            &crate::scan::ScanTarget::new("us-east1-b"),
            &json!({ "id": "42", "name": "vm-1" }),
        )
        .unwrap();

        store
            .upsert_batch(def, &[row], &CancellationToken::new())
            .await
            .unwrap();

        let (status, disks): (String, i64) =
            sqlx::query_as("SELECT status, disk_count FROM compute_instances WHERE instance_id = '42'")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(status, "");
        assert_eq!(disks, 0);
    }
}
