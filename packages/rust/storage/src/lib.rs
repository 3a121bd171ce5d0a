//! libSQL storage engine for readdo (local file mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding items, their intent
//! history and the artifacts produced by the processing pipeline. It is the
//! sole arbiter of item state: the worker claim, user transitions and capture
//! merges are each a single statement or an immediate transaction, so two
//! callers can never both win the same item.

mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, Transaction, TransactionBehavior, Value, params};
use readdo_shared::{
    Artifact, ArtifactType, CaptureOutcome, CaptureRequest, CreatedBy, ErrorInfo, Intent, Item,
    ItemDetail, ItemFilter, ItemStatus, Priority, ReaddoError, Result, StatusCounts,
    format_timestamp, parse_timestamp, validate_user_payload,
};
use tracing::{debug, info, instrument, warn};

/// Columns selected for every item query, in [`row_to_item`] order.
const ITEM_COLUMNS: &str = "id, url, title, domain, source_type, intent_text, status, priority, \
     match_score, error_info, save_count, created_at, updated_at";

const ARTIFACT_COLUMNS: &str = "id, item_id, artifact_type, payload, created_by, created_at";

const INTENT_COLUMNS: &str = "id, item_id, text, created_at";

/// Catalog ordering: active work first, then best matches, then most recent.
const LIST_ORDER: &str = "ORDER BY CASE status
        WHEN 'PROCESSING' THEN 0
        WHEN 'CAPTURED' THEN 1
        WHEN 'FAILED' THEN 2
        WHEN 'READY' THEN 3
        ELSE 4
    END,
    COALESCE(match_score, 0) DESC,
    updated_at DESC";

/// Per-connection settings.
const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON;\nPRAGMA busy_timeout = 5000;";

fn db_err(e: libsql::Error) -> ReaddoError {
    ReaddoError::Storage(e.to_string())
}

fn corrupt(e: impl std::fmt::Display) -> ReaddoError {
    ReaddoError::Storage(format!("corrupt row: {e}"))
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ReaddoError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .await
            .map_err(db_err)?;
        conn.execute_batch(CONNECTION_PRAGMAS)
            .await
            .map_err(db_err)?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a dedicated connection for a multi-statement transaction.
    ///
    /// Transactions never share `self.conn`, so statements issued by other
    /// tasks cannot end up inside them.
    async fn connect(&self) -> Result<Connection> {
        let conn = self.db.connect().map_err(db_err)?;
        conn.execute_batch(CONNECTION_PRAGMAS)
            .await
            .map_err(db_err)?;
        Ok(conn)
    }

    /// Run pending schema migrations, each in its own transaction.
    #[instrument(skip_all)]
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                let tx = self.conn.transaction().await.map_err(db_err)?;
                let applied = tx.execute_batch(migration.sql).await.map_err(|e| {
                    ReaddoError::Storage(format!("migration v{} failed: {e}", migration.version))
                });
                finish(tx, applied.map(|_| ())).await?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Item reads
    // -----------------------------------------------------------------------

    /// Get an item by ID, failing with `NotFound` when absent.
    pub async fn get_item(&self, id: &str) -> Result<Item> {
        fetch_item(&self.conn, id)
            .await?
            .ok_or_else(|| ReaddoError::item_not_found(id))
    }

    /// Get an item together with its artifacts and intent history.
    pub async fn get_item_detail(&self, id: &str) -> Result<ItemDetail> {
        let item = self.get_item(id).await?;
        let artifacts = self.list_artifacts(id).await?;
        let intents = self.list_intents(id).await?;
        Ok(ItemDetail {
            item,
            artifacts,
            intents,
        })
    }

    /// Find the non-archived item for `url`, if any.
    pub async fn find_active_by_url(&self, url: &str) -> Result<Option<Item>> {
        fetch_active_by_url(&self.conn, url).await
    }

    /// List items matching `filter` in catalog order.
    pub async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<Item>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if !filter.statuses.is_empty() {
            clauses.push(format!("status IN ({})", placeholders(filter.statuses.len())));
            values.extend(
                filter
                    .statuses
                    .iter()
                    .map(|s| Value::Text(s.as_str().to_string())),
            );
        }

        if !filter.priorities.is_empty() {
            clauses.push(format!(
                "priority IN ({})",
                placeholders(filter.priorities.len())
            ));
            values.extend(
                filter
                    .priorities
                    .iter()
                    .map(|p| Value::Text(p.as_str().to_string())),
            );
        }

        if let Some(q) = filter.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            clauses.push("(title LIKE ? OR domain LIKE ? OR intent_text LIKE ?)".into());
            let pattern = format!("%{q}%");
            for _ in 0..3 {
                values.push(Value::Text(pattern.clone()));
            }
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items {where_sql} {LIST_ORDER}");

        let mut rows = self
            .conn
            .query(&sql, libsql::params_from_iter(values))
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_item(&row)?);
        }
        Ok(results)
    }

    /// Count inbox (not archived) and archived items.
    pub async fn count_by_status(&self) -> Result<StatusCounts> {
        let mut rows = self
            .conn
            .query(
                "SELECT
                   COALESCE(SUM(CASE WHEN status != 'ARCHIVED' THEN 1 ELSE 0 END), 0),
                   COALESCE(SUM(CASE WHEN status = 'ARCHIVED' THEN 1 ELSE 0 END), 0)
                 FROM items",
                params![],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(StatusCounts {
                inbox: row.get::<i64>(0).map_err(db_err)? as u64,
                archive: row.get::<i64>(1).map_err(db_err)? as u64,
            }),
            None => Ok(StatusCounts::default()),
        }
    }

    // -----------------------------------------------------------------------
    // Capture
    // -----------------------------------------------------------------------

    /// Record a capture of `req.url`.
    ///
    /// An active item with the same URL absorbs the capture: its intent text
    /// is merged, `save_count` grows, any error is cleared and it is requeued
    /// as CAPTURED. Otherwise a new item is created. Non-empty intent text is
    /// also appended to the intent history.
    #[instrument(skip_all, fields(url = %req.url))]
    pub async fn capture(&self, req: &CaptureRequest) -> Result<CaptureOutcome> {
        req.validate()?;

        let conn = self.connect().await?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(db_err)?;
        let outcome = capture_in_tx(&tx, req).await;
        let outcome = finish(tx, outcome).await?;

        info!(
            item_id = %outcome.item.id,
            merged = outcome.merged,
            save_count = outcome.item.save_count,
            "captured item"
        );
        Ok(outcome)
    }

    /// Insert a fully-formed item row.
    pub async fn insert_item(&self, item: &Item) -> Result<()> {
        insert_item_row(&self.conn, item).await
    }

    // -----------------------------------------------------------------------
    // User transitions
    // -----------------------------------------------------------------------

    /// Apply a user-initiated status change (archive, restore, retry).
    ///
    /// The update only lands if the item still has the status it was
    /// validated against, so a concurrent claim is never overwritten.
    #[instrument(skip(self))]
    pub async fn transition_status(&self, id: &str, to: ItemStatus) -> Result<Item> {
        let item = self.get_item(id).await?;
        item.status.validate_transition(to)?;
        self.set_status_from(id, item.status, to).await
    }

    /// Requeue a READY or FAILED item so the worker runs every step again.
    ///
    /// Unlike a re-capture, `save_count` and the intent history are left
    /// untouched.
    #[instrument(skip(self))]
    pub async fn reprocess_item(&self, id: &str) -> Result<Item> {
        let item = self.get_item(id).await?;
        match item.status {
            ItemStatus::Ready | ItemStatus::Failed => {}
            ItemStatus::Processing => {
                return Err(ReaddoError::Conflict(
                    "item is currently being processed".into(),
                ));
            }
            from => {
                return Err(ReaddoError::InvalidTransition {
                    from,
                    to: ItemStatus::Captured,
                });
            }
        }
        self.set_status_from(id, item.status, ItemStatus::Captured).await
    }

    /// Compare-and-set status update. Moving to CAPTURED clears `error_info`.
    async fn set_status_from(&self, id: &str, from: ItemStatus, to: ItemStatus) -> Result<Item> {
        let now = format_timestamp(&Utc::now());
        let changed = self
            .conn
            .execute(
                "UPDATE items SET
                   status = ?1,
                   updated_at = ?2,
                   error_info = CASE WHEN ?1 = 'CAPTURED' THEN NULL ELSE error_info END
                 WHERE id = ?3 AND status = ?4",
                params![to.as_str(), now.as_str(), id, from.as_str()],
            )
            .await
            .map_err(db_err)?;

        if changed == 0 {
            return Err(ReaddoError::Conflict(format!(
                "item {id} changed status concurrently"
            )));
        }

        debug!(%from, %to, "item transitioned");
        self.get_item(id).await
    }

    /// Apply a status change to many items at once.
    ///
    /// Only `ARCHIVED` and `READY` are accepted targets. Items whose current
    /// status does not permit the change are left untouched. Returns the
    /// number of items updated.
    pub async fn batch_update_status(&self, ids: &[String], to: ItemStatus) -> Result<u64> {
        if !matches!(to, ItemStatus::Archived | ItemStatus::Ready) {
            return Err(ReaddoError::validation(format!(
                "batch status must be ARCHIVED or READY, got {to}"
            )));
        }
        if ids.is_empty() {
            return Ok(0);
        }

        let sources = ItemStatus::sources_for(to);
        let sql = format!(
            "UPDATE items SET status = ?, updated_at = ? WHERE id IN ({}) AND status IN ({})",
            placeholders(ids.len()),
            placeholders(sources.len())
        );

        let mut values = vec![
            Value::Text(to.as_str().to_string()),
            Value::Text(format_timestamp(&Utc::now())),
        ];
        values.extend(ids.iter().map(|id| Value::Text(id.clone())));
        values.extend(sources.iter().map(|s| Value::Text(s.as_str().to_string())));

        let changed = self
            .conn
            .execute(&sql, libsql::params_from_iter(values))
            .await
            .map_err(db_err)?;

        info!(requested = ids.len(), changed, %to, "batch status update");
        Ok(changed)
    }

    /// Delete an item with its artifacts and intents.
    ///
    /// Refused with `Conflict` while the item is PROCESSING.
    #[instrument(skip(self))]
    pub async fn delete_item(&self, id: &str) -> Result<()> {
        let conn = self.connect().await?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(db_err)?;
        let deleted = delete_in_tx(&tx, id).await;
        finish(tx, deleted).await?;
        info!(item_id = id, "deleted item");
        Ok(())
    }

    /// Delete many items. PROCESSING items are skipped.
    /// Returns the number of items deleted.
    pub async fn batch_delete_items(&self, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let conn = self.connect().await?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(db_err)?;
        let deleted = batch_delete_in_tx(&tx, ids).await;
        let deleted = finish(tx, deleted).await?;

        info!(requested = ids.len(), deleted, "batch delete");
        Ok(deleted)
    }

    // -----------------------------------------------------------------------
    // Worker operations
    // -----------------------------------------------------------------------

    /// Atomically move the oldest CAPTURED item to PROCESSING and return it.
    ///
    /// A single conditional `UPDATE ... RETURNING`, so concurrent callers
    /// always receive distinct items. `Ok(None)` when nothing is queued.
    pub async fn claim_next_captured(&self) -> Result<Option<Item>> {
        let now = format_timestamp(&Utc::now());
        let sql = format!(
            "UPDATE items SET status = 'PROCESSING', updated_at = ?1
             WHERE id = (
                 SELECT id FROM items
                 WHERE status = 'CAPTURED'
                 ORDER BY created_at ASC, id ASC
                 LIMIT 1
             )
             AND status = 'CAPTURED'
             RETURNING {ITEM_COLUMNS}"
        );

        let mut rows = self
            .conn
            .query(&sql, params![now.as_str()])
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_item(&row)?)),
            None => Ok(None),
        }
    }

    /// Return every PROCESSING item to CAPTURED.
    ///
    /// Called once at worker startup, before the first claim. Anything still
    /// PROCESSING at that point was orphaned by a previous crash.
    pub async fn reset_stale_processing(&self) -> Result<u64> {
        let now = format_timestamp(&Utc::now());
        let reset = self
            .conn
            .execute(
                "UPDATE items SET status = 'CAPTURED', updated_at = ?1 WHERE status = 'PROCESSING'",
                params![now.as_str()],
            )
            .await
            .map_err(db_err)?;

        if reset > 0 {
            warn!(count = reset, "recovered stale processing items");
        }
        Ok(reset)
    }

    /// Finish processing successfully. Returns `false` if the item is no
    /// longer PROCESSING (it was requeued by a new capture meanwhile).
    pub async fn mark_ready(&self, id: &str) -> Result<bool> {
        let now = format_timestamp(&Utc::now());
        let changed = self
            .conn
            .execute(
                "UPDATE items SET status = 'READY', error_info = NULL, updated_at = ?1
                 WHERE id = ?2 AND status = 'PROCESSING'",
                params![now.as_str(), id],
            )
            .await
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// Finish processing with a failure. Same contract as [`Self::mark_ready`].
    pub async fn mark_failed(&self, id: &str, error: &ErrorInfo) -> Result<bool> {
        let now = format_timestamp(&Utc::now());
        let error_json =
            serde_json::to_string(error).map_err(|e| ReaddoError::Serialization(e.to_string()))?;
        let changed = self
            .conn
            .execute(
                "UPDATE items SET status = 'FAILED', error_info = ?1, updated_at = ?2
                 WHERE id = ?3 AND status = 'PROCESSING'",
                params![error_json.as_str(), now.as_str(), id],
            )
            .await
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// Record the final score and derived priority on an item.
    pub async fn update_score_and_priority(
        &self,
        id: &str,
        score: f64,
        priority: Priority,
    ) -> Result<()> {
        let now = format_timestamp(&Utc::now());
        let changed = self
            .conn
            .execute(
                "UPDATE items SET match_score = ?1, priority = ?2, updated_at = ?3 WHERE id = ?4",
                params![score, priority.as_str(), now.as_str(), id],
            )
            .await
            .map_err(db_err)?;
        if changed == 0 {
            return Err(ReaddoError::item_not_found(id));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Artifact operations
    // -----------------------------------------------------------------------

    /// Insert or replace the artifact of this type for the item.
    pub async fn upsert_artifact(&self, artifact: &Artifact) -> Result<()> {
        upsert_artifact_row(&self.conn, artifact).await
    }

    /// List all artifacts for an item.
    pub async fn list_artifacts(&self, item_id: &str) -> Result<Vec<Artifact>> {
        let sql = format!(
            "SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE item_id = ?1 ORDER BY created_at"
        );
        let mut rows = self
            .conn
            .query(&sql, params![item_id])
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_artifact(&row)?);
        }
        Ok(results)
    }

    /// Get one artifact by type.
    pub async fn get_artifact(
        &self,
        item_id: &str,
        artifact_type: ArtifactType,
    ) -> Result<Option<Artifact>> {
        let sql = format!(
            "SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE item_id = ?1 AND artifact_type = ?2"
        );
        let mut rows = self
            .conn
            .query(&sql, params![item_id, artifact_type.as_str()])
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_artifact(&row)?)),
            None => Ok(None),
        }
    }

    /// Replace a synthesis or todos artifact with user-edited content.
    ///
    /// The item must be READY and the payload must parse as that artifact's
    /// typed result.
    #[instrument(skip(self, payload))]
    pub async fn edit_artifact(
        &self,
        item_id: &str,
        artifact_type: ArtifactType,
        payload: &str,
    ) -> Result<Artifact> {
        if !artifact_type.is_user_editable() {
            return Err(ReaddoError::validation(format!(
                "artifact type '{artifact_type}' cannot be edited"
            )));
        }
        let payload = validate_user_payload(artifact_type, payload)?;
        let artifact = Artifact::new(item_id, artifact_type, payload, CreatedBy::User);

        let conn = self.connect().await?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(db_err)?;
        let edited = edit_in_tx(&tx, &artifact).await;
        finish(tx, edited).await?;

        info!(item_id, %artifact_type, "artifact edited by user");
        Ok(artifact)
    }

    // -----------------------------------------------------------------------
    // Intent history
    // -----------------------------------------------------------------------

    /// Append an intent record.
    pub async fn insert_intent(&self, intent: &Intent) -> Result<()> {
        insert_intent_row(&self.conn, intent).await
    }

    /// List intents for an item, oldest first.
    pub async fn list_intents(&self, item_id: &str) -> Result<Vec<Intent>> {
        let sql = format!(
            "SELECT {INTENT_COLUMNS} FROM intents WHERE item_id = ?1 ORDER BY created_at, id"
        );
        let mut rows = self
            .conn
            .query(&sql, params![item_id])
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(Intent {
                id: row.get::<String>(0).map_err(db_err)?,
                item_id: row.get::<String>(1).map_err(db_err)?,
                text: row.get::<String>(2).map_err(db_err)?,
                created_at: parse_timestamp(&row.get::<String>(3).map_err(db_err)?)?,
            });
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Transaction bodies
// ---------------------------------------------------------------------------

/// Commit on success, roll back on failure.
async fn finish<T>(tx: Transaction, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            tx.commit().await.map_err(db_err)?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "rollback failed");
            }
            Err(e)
        }
    }
}

async fn capture_in_tx(conn: &Connection, req: &CaptureRequest) -> Result<CaptureOutcome> {
    let url = req.url.trim();
    let intent_text = req.intent_text.trim();

    let (item, merged) = match fetch_active_by_url(conn, url).await? {
        Some(mut item) => {
            item.merge_intent(intent_text);
            item.status = ItemStatus::Captured;
            item.error_info = None;
            item.updated_at = Utc::now();
            if item.title.is_empty() {
                if let Some(title) = req.title.as_deref().filter(|t| !t.is_empty()) {
                    item.title = title.to_string();
                }
            }

            conn.execute(
                "UPDATE items SET
                   title = ?1, intent_text = ?2, save_count = ?3,
                   status = 'CAPTURED', error_info = NULL, updated_at = ?4
                 WHERE id = ?5",
                params![
                    item.title.as_str(),
                    item.intent_text.as_str(),
                    item.save_count,
                    format_timestamp(&item.updated_at),
                    item.id.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;
            (item, true)
        }
        None => {
            let item = Item::from_capture(&CaptureRequest {
                url: url.to_string(),
                ..req.clone()
            });
            insert_item_row(conn, &item).await?;
            (item, false)
        }
    };

    if !intent_text.is_empty() {
        insert_intent_row(conn, &Intent::new(item.id.as_str(), intent_text)).await?;
    }

    Ok(CaptureOutcome { item, merged })
}

async fn delete_in_tx(conn: &Connection, id: &str) -> Result<()> {
    let item = fetch_item(conn, id)
        .await?
        .ok_or_else(|| ReaddoError::item_not_found(id))?;
    if item.status == ItemStatus::Processing {
        return Err(ReaddoError::Conflict(format!(
            "item {id} is being processed and cannot be deleted"
        )));
    }

    conn.execute("DELETE FROM artifacts WHERE item_id = ?1", params![id])
        .await
        .map_err(db_err)?;
    conn.execute("DELETE FROM intents WHERE item_id = ?1", params![id])
        .await
        .map_err(db_err)?;
    conn.execute("DELETE FROM items WHERE id = ?1", params![id])
        .await
        .map_err(db_err)?;
    Ok(())
}

async fn batch_delete_in_tx(conn: &Connection, ids: &[String]) -> Result<u64> {
    let in_list = placeholders(ids.len());
    let id_values = || ids.iter().map(|id| Value::Text(id.clone())).collect::<Vec<_>>();

    let eligible = format!("SELECT id FROM items WHERE id IN ({in_list}) AND status != 'PROCESSING'");

    conn.execute(
        &format!("DELETE FROM artifacts WHERE item_id IN ({eligible})"),
        libsql::params_from_iter(id_values()),
    )
    .await
    .map_err(db_err)?;
    conn.execute(
        &format!("DELETE FROM intents WHERE item_id IN ({eligible})"),
        libsql::params_from_iter(id_values()),
    )
    .await
    .map_err(db_err)?;
    conn.execute(
        &format!("DELETE FROM items WHERE id IN ({in_list}) AND status != 'PROCESSING'"),
        libsql::params_from_iter(id_values()),
    )
    .await
    .map_err(db_err)
}

async fn edit_in_tx(conn: &Connection, artifact: &Artifact) -> Result<()> {
    let item = fetch_item(conn, &artifact.item_id)
        .await?
        .ok_or_else(|| ReaddoError::item_not_found(&artifact.item_id))?;
    if item.status != ItemStatus::Ready {
        return Err(ReaddoError::Conflict(format!(
            "artifacts can only be edited on READY items (item is {})",
            item.status
        )));
    }
    upsert_artifact_row(conn, artifact).await
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

async fn fetch_item(conn: &Connection, id: &str) -> Result<Option<Item>> {
    let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1");
    let mut rows = conn.query(&sql, params![id]).await.map_err(db_err)?;

    match rows.next().await.map_err(db_err)? {
        Some(row) => Ok(Some(row_to_item(&row)?)),
        None => Ok(None),
    }
}

async fn fetch_active_by_url(conn: &Connection, url: &str) -> Result<Option<Item>> {
    let sql = format!(
        "SELECT {ITEM_COLUMNS} FROM items
         WHERE url = ?1 AND status != 'ARCHIVED'
         ORDER BY created_at DESC
         LIMIT 1"
    );
    let mut rows = conn.query(&sql, params![url]).await.map_err(db_err)?;

    match rows.next().await.map_err(db_err)? {
        Some(row) => Ok(Some(row_to_item(&row)?)),
        None => Ok(None),
    }
}

async fn insert_item_row(conn: &Connection, item: &Item) -> Result<()> {
    let error_json = item
        .error_info
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| ReaddoError::Serialization(e.to_string()))?;

    let sql = format!(
        "INSERT INTO items ({ITEM_COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
    );
    conn.execute(
        &sql,
        params![
            item.id.as_str(),
            item.url.as_str(),
            item.title.as_str(),
            item.domain.as_str(),
            item.source_type.as_str(),
            item.intent_text.as_str(),
            item.status.as_str(),
            item.priority.map(|p| p.as_str()),
            item.match_score,
            error_json,
            item.save_count,
            format_timestamp(&item.created_at),
            format_timestamp(&item.updated_at),
        ],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn insert_intent_row(conn: &Connection, intent: &Intent) -> Result<()> {
    conn.execute(
        "INSERT INTO intents (id, item_id, text, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            intent.id.as_str(),
            intent.item_id.as_str(),
            intent.text.as_str(),
            format_timestamp(&intent.created_at),
        ],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

async fn upsert_artifact_row(conn: &Connection, artifact: &Artifact) -> Result<()> {
    conn.execute(
        "INSERT INTO artifacts (id, item_id, artifact_type, payload, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(item_id, artifact_type) DO UPDATE SET
           id = excluded.id,
           payload = excluded.payload,
           created_by = excluded.created_by,
           created_at = excluded.created_at",
        params![
            artifact.id.as_str(),
            artifact.item_id.as_str(),
            artifact.artifact_type.as_str(),
            artifact.payload.as_str(),
            artifact.created_by.as_str(),
            format_timestamp(&artifact.created_at),
        ],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Convert a database row (selected with [`ITEM_COLUMNS`]) to an [`Item`].
fn row_to_item(row: &libsql::Row) -> Result<Item> {
    let status: String = row.get(6).map_err(db_err)?;
    let priority = row
        .get::<String>(7)
        .ok()
        .map(|p| p.parse::<Priority>())
        .transpose()
        .map_err(corrupt)?;
    let error_info = row
        .get::<String>(9)
        .ok()
        .map(|json| serde_json::from_str::<ErrorInfo>(&json))
        .transpose()
        .map_err(corrupt)?;

    Ok(Item {
        id: row.get::<String>(0).map_err(db_err)?,
        url: row.get::<String>(1).map_err(db_err)?,
        title: row.get::<String>(2).map_err(db_err)?,
        domain: row.get::<String>(3).map_err(db_err)?,
        source_type: row.get::<String>(4).map_err(db_err)?,
        intent_text: row.get::<String>(5).map_err(db_err)?,
        status: status.parse().map_err(corrupt)?,
        priority,
        match_score: row.get::<f64>(8).ok(),
        error_info,
        save_count: row.get::<u32>(10).map_err(db_err)?,
        created_at: parse_timestamp(&row.get::<String>(11).map_err(db_err)?)?,
        updated_at: parse_timestamp(&row.get::<String>(12).map_err(db_err)?)?,
    })
}

/// Convert a database row (selected with [`ARTIFACT_COLUMNS`]) to an [`Artifact`].
fn row_to_artifact(row: &libsql::Row) -> Result<Artifact> {
    let artifact_type: String = row.get(2).map_err(db_err)?;
    let created_by: String = row.get(4).map_err(db_err)?;
    Ok(Artifact {
        id: row.get::<String>(0).map_err(db_err)?,
        item_id: row.get::<String>(1).map_err(db_err)?,
        artifact_type: artifact_type.parse().map_err(corrupt)?,
        payload: row.get::<String>(3).map_err(db_err)?,
        created_by: created_by.parse().map_err(corrupt)?,
        created_at: parse_timestamp(&row.get::<String>(5).map_err(db_err)?)?,
    })
}

/// `?, ?, ?` with `n` placeholders.
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
