//! SQLite backend implementation
//!
//! Persistent catalog using SQLite in WAL mode. Several scheduler processes
//! may open the same database; the claim statement is the only point where
//! they coordinate.

use crate::{
    Catalog, Did, NewRequest, ReplicaRecord, Request, RequestId, RequestState, RequestStats,
    RequestStore,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use conveyor_core_topology::{Distance, Protocol, Rse, RseId, RseKind, TopologySource};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{migrate::MigrateDatabase, QueryBuilder, Row, Sqlite};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

const REQUEST_COLUMNS: &str =
    "id, scope, name, dest_rse_id, bytes, activity, state, attempts, last_error";

/// SQLite-backed catalog
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    /// Open or create a SQLite database at the specified path
    ///
    /// Automatically runs migrations to set up the schema.
    pub async fn open(path: &str) -> Result<Self> {
        let db_url = if path.starts_with("sqlite://") {
            path.to_string()
        } else {
            format!("sqlite://{}", path)
        };

        if !sqlx::Sqlite::database_exists(&db_url).await.unwrap_or(false) {
            sqlx::Sqlite::create_database(&db_url)
                .await
                .context("Failed to create database")?;
        }

        // WAL plus a busy timeout lets concurrent schedulers queue on the
        // write lock instead of failing with SQLITE_BUSY
        let options = SqliteConnectOptions::from_str(&db_url)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10))
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self { pool })
    }

    /// Get the underlying pool (for advanced usage)
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn push_id_list(builder: &mut QueryBuilder<'_, Sqlite>, ids: &[RseId]) {
    builder.push("(");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id.as_str().to_string());
    }
    separated.push_unseparated(")");
}

fn row_to_request(row: &SqliteRow) -> Result<Request> {
    let state: String = row.try_get("state")?;

    Ok(Request {
        id: row.try_get("id")?,
        did: Did::new(
            row.try_get::<String, _>("scope")?,
            row.try_get::<String, _>("name")?,
        ),
        dest_rse: RseId::from(row.try_get::<String, _>("dest_rse_id")?),
        bytes: row.try_get::<i64, _>("bytes")? as u64,
        activity: row.try_get("activity")?,
        state: RequestState::from_str(&state)?,
        attempts: row.try_get::<i64, _>("attempts")? as u32,
        last_error: row.try_get("last_error")?,
    })
}

#[async_trait]
impl TopologySource for SqliteCatalog {
    async fn list_rse_ids(&self) -> Result<Vec<RseId>> {
        let rows = sqlx::query("SELECT id FROM rses ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| Ok(RseId::from(row.try_get::<String, _>("id")?)))
            .collect()
    }

    async fn fetch_rses(&self, ids: &[RseId]) -> Result<Vec<Rse>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        // One read transaction so records, attributes and protocols agree
        let mut tx = self.pool.begin().await?;

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT id, rse_type, availability_read, availability_write FROM rses WHERE id IN ",
        );
        push_id_list(&mut query, ids);
        query.push(" ORDER BY id ASC");
        let rows = query.build().fetch_all(&mut *tx).await?;

        let mut rses: Vec<Rse> = Vec::with_capacity(rows.len());
        for row in &rows {
            let kind: String = row.try_get("rse_type")?;
            rses.push(
                Rse::new(row.try_get::<String, _>("id")?, RseKind::from_str(&kind)?)
                    .with_availability(
                        row.try_get("availability_read")?,
                        row.try_get("availability_write")?,
                    ),
            );
        }

        let mut query =
            QueryBuilder::<Sqlite>::new("SELECT rse_id, key, value FROM rse_attributes WHERE rse_id IN ");
        push_id_list(&mut query, ids);
        let attribute_rows = query.build().fetch_all(&mut *tx).await?;

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT rse_id, scheme, hostname, port, prefix, read_priority, write_priority
             FROM rse_protocols WHERE rse_id IN ",
        );
        push_id_list(&mut query, ids);
        query.push(" ORDER BY rse_id, scheme, hostname, port");
        let protocol_rows = query.build().fetch_all(&mut *tx).await?;

        tx.commit().await?;

        let index: HashMap<String, usize> = rses
            .iter()
            .enumerate()
            .map(|(i, rse)| (rse.id.to_string(), i))
            .collect();

        for row in &attribute_rows {
            let rse_id: String = row.try_get("rse_id")?;
            if let Some(&i) = index.get(&rse_id) {
                rses[i]
                    .attributes
                    .insert(row.try_get("key")?, row.try_get("value")?);
            }
        }

        for row in &protocol_rows {
            let rse_id: String = row.try_get("rse_id")?;
            if let Some(&i) = index.get(&rse_id) {
                rses[i].protocols.push(Protocol {
                    scheme: row.try_get("scheme")?,
                    hostname: row.try_get("hostname")?,
                    port: row.try_get::<i64, _>("port")? as u16,
                    prefix: row.try_get("prefix")?,
                    read_priority: row.try_get::<i64, _>("read_priority")? as u32,
                    write_priority: row.try_get::<i64, _>("write_priority")? as u32,
                });
            }
        }

        Ok(rses)
    }

    async fn fetch_distances(&self, ids: &[RseId]) -> Result<Vec<Distance>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query =
            QueryBuilder::<Sqlite>::new("SELECT src_rse_id, dst_rse_id, cost FROM distances WHERE src_rse_id IN ");
        push_id_list(&mut query, ids);
        query.push(" AND dst_rse_id IN ");
        push_id_list(&mut query, ids);

        let rows = query.build().fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                Ok(Distance::new(
                    row.try_get::<String, _>("src_rse_id")?,
                    row.try_get::<String, _>("dst_rse_id")?,
                    row.try_get::<i64, _>("cost")? as u32,
                ))
            })
            .collect()
    }
}

#[async_trait]
impl RequestStore for SqliteCatalog {
    async fn claim_queued(&self, dest_rses: &[RseId], limit: usize) -> Result<Vec<Request>> {
        if dest_rses.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        // Atomic claim: a single conditional UPDATE. The outer state check
        // keeps the transition a compare-and-swap even if another writer
        // committed between the subquery and the update.
        let mut query = QueryBuilder::<Sqlite>::new(
            "UPDATE requests
             SET state = 'submitted', updated_at = CURRENT_TIMESTAMP
             WHERE state = 'queued' AND id IN (
                 SELECT id FROM requests
                 WHERE state = 'queued' AND dest_rse_id IN ",
        );
        push_id_list(&mut query, dest_rses);
        query.push(" ORDER BY id ASC LIMIT ");
        query.push_bind(limit as i64);
        query.push(") RETURNING ");
        query.push(REQUEST_COLUMNS);

        let rows = query.build().fetch_all(&self.pool).await?;

        let mut claimed = rows
            .iter()
            .map(row_to_request)
            .collect::<Result<Vec<_>>>()?;
        claimed.sort_by_key(|request| request.id);

        debug!(claimed = claimed.len(), limit, "Claimed queued requests");
        Ok(claimed)
    }

    async fn list_replicas(&self, dids: &[Did]) -> Result<Vec<ReplicaRecord>> {
        if dids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT scope, name, rse_id, bytes, available FROM replicas WHERE (scope, name) IN (VALUES ",
        );
        for (i, did) in dids.iter().enumerate() {
            if i > 0 {
                query.push(", ");
            }
            query.push("(");
            query.push_bind(did.scope.clone());
            query.push(", ");
            query.push_bind(did.name.clone());
            query.push(")");
        }
        query.push(") ORDER BY rse_id ASC, scope ASC, name ASC");

        let rows = query.build().fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                Ok(ReplicaRecord {
                    did: Did::new(
                        row.try_get::<String, _>("scope")?,
                        row.try_get::<String, _>("name")?,
                    ),
                    rse: RseId::from(row.try_get::<String, _>("rse_id")?),
                    bytes: row.try_get::<i64, _>("bytes")? as u64,
                    available: row.try_get("available")?,
                })
            })
            .collect()
    }

    async fn release(&self, id: RequestId, error: Option<String>) -> Result<bool> {
        let result = match error {
            Some(error) => {
                sqlx::query(
                    "UPDATE requests
                     SET state = 'queued', attempts = attempts + 1, last_error = ?,
                         updated_at = CURRENT_TIMESTAMP
                     WHERE id = ? AND state = 'submitted'",
                )
                .bind(error)
                .bind(id)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "UPDATE requests SET state = 'queued', updated_at = CURRENT_TIMESTAMP
                     WHERE id = ? AND state = 'submitted'",
                )
                .bind(id)
                .execute(&self.pool)
                .await?
            }
        };

        Ok(result.rows_affected() == 1)
    }

    async fn mark_done(&self, id: RequestId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE requests SET state = 'done', updated_at = CURRENT_TIMESTAMP
             WHERE id = ? AND state = 'submitted'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(&self, id: RequestId, error: String) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE requests SET state = 'failed', last_error = ?, updated_at = CURRENT_TIMESTAMP
             WHERE id = ? AND state = 'submitted'",
        )
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_request(&self, id: RequestId) -> Result<Option<Request>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM requests WHERE id = ?",
            REQUEST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_request(&r)?)),
            None => Ok(None),
        }
    }

    async fn stats(&self) -> Result<RequestStats> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) as total,
                COALESCE(SUM(CASE WHEN state = 'queued' THEN 1 ELSE 0 END), 0) as queued,
                COALESCE(SUM(CASE WHEN state = 'submitted' THEN 1 ELSE 0 END), 0) as submitted,
                COALESCE(SUM(CASE WHEN state = 'done' THEN 1 ELSE 0 END), 0) as done,
                COALESCE(SUM(CASE WHEN state = 'failed' THEN 1 ELSE 0 END), 0) as failed
             FROM requests",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(RequestStats {
            total: row.get::<i64, _>("total") as u64,
            queued: row.get::<i64, _>("queued") as u64,
            submitted: row.get::<i64, _>("submitted") as u64,
            done: row.get::<i64, _>("done") as u64,
            failed: row.get::<i64, _>("failed") as u64,
        })
    }
}

#[async_trait]
impl Catalog for SqliteCatalog {
    fn topology_source(&self) -> &dyn TopologySource {
        self
    }

    fn request_store(&self) -> &dyn RequestStore {
        self
    }

    async fn register_rse(&self, rse: &Rse) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO rses (id, rse_type, availability_read, availability_write) VALUES (?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                 rse_type = excluded.rse_type,
                 availability_read = excluded.availability_read,
                 availability_write = excluded.availability_write",
        )
        .bind(rse.id.as_str())
        .bind(rse.kind.to_string())
        .bind(rse.availability_read)
        .bind(rse.availability_write)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM rse_attributes WHERE rse_id = ?")
            .bind(rse.id.as_str())
            .execute(&mut *tx)
            .await?;

        for (key, value) in &rse.attributes {
            sqlx::query("INSERT INTO rse_attributes (rse_id, key, value) VALUES (?, ?, ?)")
                .bind(rse.id.as_str())
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("DELETE FROM rse_protocols WHERE rse_id = ?")
            .bind(rse.id.as_str())
            .execute(&mut *tx)
            .await?;

        for protocol in &rse.protocols {
            sqlx::query(
                "INSERT INTO rse_protocols
                     (rse_id, scheme, hostname, port, prefix, read_priority, write_priority)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (rse_id, scheme, hostname, port) DO UPDATE SET
                     prefix = excluded.prefix,
                     read_priority = excluded.read_priority,
                     write_priority = excluded.write_priority",
            )
            .bind(rse.id.as_str())
            .bind(&protocol.scheme)
            .bind(&protocol.hostname)
            .bind(protocol.port as i64)
            .bind(&protocol.prefix)
            .bind(protocol.read_priority as i64)
            .bind(protocol.write_priority as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn set_distance(&self, distance: &Distance) -> Result<()> {
        sqlx::query(
            "INSERT INTO distances (src_rse_id, dst_rse_id, cost) VALUES (?, ?, ?)
             ON CONFLICT (src_rse_id, dst_rse_id) DO UPDATE SET cost = excluded.cost",
        )
        .bind(distance.src.as_str())
        .bind(distance.dst.as_str())
        .bind(distance.cost as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn add_replica(&self, replica: &ReplicaRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO replicas (scope, name, rse_id, bytes, available) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (scope, name, rse_id) DO UPDATE SET
                 bytes = excluded.bytes,
                 available = excluded.available",
        )
        .bind(&replica.did.scope)
        .bind(&replica.did.name)
        .bind(replica.rse.as_str())
        .bind(replica.bytes as i64)
        .bind(replica.available)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn queue_request(&self, request: &NewRequest) -> Result<RequestId> {
        let result = sqlx::query(
            "INSERT INTO requests (scope, name, dest_rse_id, bytes, activity, state)
             VALUES (?, ?, ?, ?, ?, 'queued')",
        )
        .bind(&request.did.scope)
        .bind(&request.did.name)
        .bind(request.dest_rse.as_str())
        .bind(request.bytes as i64)
        .bind(&request.activity)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    async fn open_temp() -> Result<(NamedTempFile, SqliteCatalog)> {
        let tmp = NamedTempFile::new()?;
        let catalog = SqliteCatalog::open(tmp.path().to_str().unwrap()).await?;
        Ok((tmp, catalog))
    }

    #[tokio::test]
    async fn test_sqlite_rse_round_trip() -> Result<()> {
        let (_tmp, catalog) = open_temp().await?;

        let rse = Rse::new("CERN-TAPE", RseKind::Tape)
            .with_attribute("qos", "archive")
            .with_protocol(Protocol::new("root", "eosctapublic.cern.ch", 1094).with_prefix("/eos/ctapublic"))
            .with_availability(true, false);
        catalog.register_rse(&rse).await?;

        let loaded = catalog.fetch_rses(&["CERN-TAPE".into(), "MISSING".into()]).await?;
        assert_eq!(loaded, vec![rse]);

        Ok(())
    }

    #[tokio::test]
    async fn test_sqlite_lists_every_rse() -> Result<()> {
        let (_tmp, catalog) = open_temp().await?;
        assert!(catalog.list_rse_ids().await?.is_empty());

        catalog.register_rse(&Rse::new("DESY-DISK", RseKind::Disk)).await?;
        catalog.register_rse(&Rse::new("BNL-TAPE", RseKind::Tape)).await?;
        catalog.register_rse(&Rse::new("BNL-TAPE", RseKind::Tape)).await?;

        assert_eq!(
            catalog.list_rse_ids().await?,
            vec![RseId::from("BNL-TAPE"), RseId::from("DESY-DISK")]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_sqlite_register_replaces_attributes() -> Result<()> {
        let (_tmp, catalog) = open_temp().await?;

        catalog
            .register_rse(&Rse::new("A", RseKind::Disk).with_attribute("qos", "gold"))
            .await?;
        catalog
            .register_rse(&Rse::new("A", RseKind::Disk).with_attribute("country", "CH"))
            .await?;

        let loaded = catalog.fetch_rses(&["A".into()]).await?;
        assert_eq!(loaded[0].attribute("qos"), None);
        assert_eq!(loaded[0].attribute("country"), Some("CH"));

        Ok(())
    }

    #[tokio::test]
    async fn test_sqlite_distances_restricted() -> Result<()> {
        let (_tmp, catalog) = open_temp().await?;

        catalog.set_distance(&Distance::new("A", "B", 1)).await?;
        catalog.set_distance(&Distance::new("A", "C", 2)).await?;
        catalog.set_distance(&Distance::new("A", "B", 4)).await?;

        let distances = catalog.fetch_distances(&["A".into(), "B".into()]).await?;
        assert_eq!(distances, vec![Distance::new("A", "B", 4)]);

        Ok(())
    }

    #[tokio::test]
    async fn test_sqlite_claim_is_conditional() -> Result<()> {
        let (_tmp, catalog) = open_temp().await?;

        let id = catalog
            .queue_request(&NewRequest::new(Did::new("s", "f1"), "DST", 10, "User Subscriptions"))
            .await?;
        catalog
            .queue_request(&NewRequest::new(Did::new("s", "f2"), "OTHER", 10, "User Subscriptions"))
            .await?;

        let claimed = catalog.claim_queued(&["DST".into()], 10).await?;
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, id);
        assert_eq!(claimed[0].state, RequestState::Submitted);

        // Nothing left to claim for DST
        assert!(catalog.claim_queued(&["DST".into()], 10).await?.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_sqlite_release_counts_attempts() -> Result<()> {
        let (_tmp, catalog) = open_temp().await?;

        let id = catalog
            .queue_request(&NewRequest::new(Did::new("s", "f"), "DST", 1, "default"))
            .await?;

        // Not submitted yet: release must not apply
        assert!(!catalog.release(id, None).await?);

        catalog.claim_queued(&["DST".into()], 1).await?;
        assert!(catalog.release(id, Some("no route".to_string())).await?);

        let request = catalog.get_request(id).await?.unwrap();
        assert_eq!(request.state, RequestState::Queued);
        assert_eq!(request.attempts, 1);
        assert_eq!(request.last_error.as_deref(), Some("no route"));

        catalog.claim_queued(&["DST".into()], 1).await?;
        assert!(catalog.release(id, None).await?);
        assert_eq!(catalog.get_request(id).await?.unwrap().attempts, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_sqlite_list_replicas() -> Result<()> {
        let (_tmp, catalog) = open_temp().await?;

        let did = Did::new("data13", "file.root");
        catalog.add_replica(&ReplicaRecord::new(did.clone(), "B", 5)).await?;
        catalog
            .add_replica(&ReplicaRecord::new(did.clone(), "A", 5).unavailable())
            .await?;
        catalog
            .add_replica(&ReplicaRecord::new(Did::new("data13", "other"), "A", 5))
            .await?;

        let replicas = catalog.list_replicas(&[did.clone()]).await?;
        assert_eq!(replicas.len(), 2);
        assert_eq!(replicas[0].rse, RseId::from("A"));
        assert!(!replicas[0].available);
        assert_eq!(replicas[1].rse, RseId::from("B"));

        Ok(())
    }

    #[tokio::test]
    async fn test_sqlite_stats() -> Result<()> {
        let (_tmp, catalog) = open_temp().await?;

        for i in 0..3 {
            catalog
                .queue_request(&NewRequest::new(Did::new("s", format!("f{i}")), "DST", 1, "default"))
                .await?;
        }
        let claimed = catalog.claim_queued(&["DST".into()], 2).await?;
        catalog.mark_done(claimed[0].id).await?;
        catalog.mark_failed(claimed[1].id, "gave up".to_string()).await?;

        let stats = catalog.stats().await?;
        assert_eq!(stats.total, 3);
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.done, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.submitted, 0);

        Ok(())
    }
}
