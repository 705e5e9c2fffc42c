mod schema;

use std::path::Path;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use rusqlite::Connection;
use serde_json::Value;

use crate::context::MutationContext;
use crate::entity::Entity;
use crate::error::Error;
use crate::event::Publisher;
use crate::hook::soft_delete::visibility_predicate;
use crate::hook::{Executor, Mutation, Operation, Pipeline};
use crate::id::{EntityId, EntityKind};

/// Predicate placeholder for reads that must see every row.
pub(crate) const NO_PREDICATE: &str = "1 = 1";

/// SQLite-backed store for load balancer configuration records. Every write
/// runs through the injected hook pipeline inside one transaction; change
/// messages queued by the pipeline are handed to the publisher only after
/// that transaction commits.
#[derive(Clone)]
pub struct Store {
    conn: Arc<RwLock<Connection>>,
    pipeline: Arc<Pipeline>,
    publisher: Arc<dyn Publisher>,
}

impl Store {
    pub fn open_memory(pipeline: Pipeline, publisher: Arc<dyn Publisher>) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, pipeline, publisher)
    }

    pub fn open<P: AsRef<Path>>(
        path: P,
        pipeline: Pipeline,
        publisher: Arc<dyn Publisher>,
    ) -> Result<Self> {
        Self::from_connection(Connection::open(path)?, pipeline, publisher)
    }

    fn from_connection(
        mut conn: Connection,
        pipeline: Pipeline,
        publisher: Arc<dyn Publisher>,
    ) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::migrations().to_latest(&mut conn)?;

        Ok(Store {
            conn: Arc::new(RwLock::new(conn)),
            pipeline: Arc::new(pipeline),
            publisher,
        })
    }

    /// Fetches one entity by id. Tombstoned rows are filtered out unless
    /// the context bypasses soft deletes.
    pub fn get<E: Entity>(&self, ctx: &MutationContext, id: &EntityId) -> Result<Option<E>> {
        let conn = self
            .conn
            .read()
            .map_err(|_| anyhow!("failed to acquire read lock"))?;
        let row = fetch_row(&conn, E::KIND, id, visibility_predicate(ctx))?;
        Ok(row.map(serde_json::from_value).transpose()?)
    }

    /// Queries entities with a WHERE fragment. The soft-delete visibility
    /// predicate is appended unless the context bypasses it.
    pub fn find<E: Entity>(
        &self,
        ctx: &MutationContext,
        where_clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<E>> {
        let conn = self
            .conn
            .read()
            .map_err(|_| anyhow!("failed to acquire read lock"))?;
        let table = E::KIND.table().ok_or(Error::NoTable(E::KIND))?;
        let sql = format!(
            "SELECT * FROM {} WHERE ({}) AND ({})",
            table,
            where_clause,
            visibility_predicate(ctx)
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params)?;

        let mut entities = Vec::new();
        while let Some(row) = rows.next()? {
            let mut value = row_to_json(row)?;
            if E::KIND == EntityKind::Port {
                if let Some(id) = value
                    .get("id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse::<EntityId>().ok())
                {
                    attach_pool_links(&conn, &id, &mut value)?;
                }
            }
            entities.push(serde_json::from_value(value)?);
        }
        Ok(entities)
    }

    /// Inserts a new entity, minting a typed UUIDv7 id when none is set,
    /// and returns the row as written (audit stamps included).
    pub fn create<E: Entity>(&self, ctx: &MutationContext, entity: &E) -> Result<E> {
        let mut value = serde_json::to_value(entity)?;
        let id = ensure_id(&mut value, E::KIND)?;
        let written = self.mutate(ctx, E::KIND, Operation::Create, Some(id), into_map(value)?)?;
        Ok(serde_json::from_value(written)?)
    }

    /// Rewrites an existing entity's row and returns it as written.
    pub fn update<E: Entity>(&self, ctx: &MutationContext, entity: &E) -> Result<E> {
        let value = serde_json::to_value(entity)?;
        let id = match value.get("id").and_then(|v| v.as_str()) {
            Some(s) if !s.is_empty() => s.parse::<EntityId>()?,
            _ => return Err(Error::MissingId.into()),
        };
        if id.kind() != E::KIND {
            return Err(anyhow!("id {} is not a {}", id, E::KIND.tag()));
        }
        let written = self.mutate(ctx, E::KIND, Operation::Update, Some(id), into_map(value)?)?;
        Ok(serde_json::from_value(written)?)
    }

    /// Deletes an entity. With the stock pipeline this tombstones the row;
    /// a context with the bypass marker removes it physically.
    pub fn delete<E: Entity>(&self, ctx: &MutationContext, id: &EntityId) -> Result<()> {
        if id.kind() != E::KIND {
            return Err(anyhow!("id {} is not a {}", id, E::KIND.tag()));
        }
        self.mutate(
            ctx,
            E::KIND,
            Operation::Delete,
            Some(id.clone()),
            serde_json::Map::new(),
        )?;
        Ok(())
    }

    fn mutate(
        &self,
        ctx: &MutationContext,
        kind: EntityKind,
        op: Operation,
        id: Option<EntityId>,
        fields: serde_json::Map<String, Value>,
    ) -> Result<Value> {
        let mut conn = self
            .conn
            .write()
            .map_err(|_| anyhow!("failed to acquire write lock"))?;
        let txn = conn.transaction()?;

        let (written, pending) = {
            let mut mutation = Mutation::new(kind, op, id, fields, &txn);
            let mut terminal = WriteExecutor;
            let written = self.pipeline.run(ctx, &mut mutation, &mut terminal)?;
            (written, mutation.take_pending())
        };

        txn.commit()?;
        drop(conn);

        // Publish failures are logged and swallowed; there is no retry and
        // no outbox tying the event to the committed write.
        for publish in pending {
            if let Err(err) = self
                .publisher
                .publish_change(ctx, &publish.subject, &publish.message)
            {
                log::warn!(
                    "dropped change event for {} on {}: {}",
                    publish.message.subject_id,
                    publish.subject,
                    err
                );
            }
        }
        Ok(written)
    }
}

/// Terminal executor: the actual row write, inside the call's transaction.
/// Fields without a matching column are filtered out before binding; a
/// port's pool links are mirrored into the port_pools join table.
pub(crate) struct WriteExecutor;

impl Executor for WriteExecutor {
    fn execute(
        &mut self,
        _ctx: &MutationContext,
        mutation: &mut Mutation<'_>,
    ) -> Result<Value> {
        let kind = mutation.kind();
        let table = kind.table().ok_or(Error::NoTable(kind))?;
        let id = mutation.target_id()?;
        let txn = mutation.txn();

        match mutation.op() {
            Operation::Create => {
                let columns = table_columns(txn, table)?;
                insert_row(txn, table, &columns, mutation.fields())?;
                sync_port_links(txn, kind, &id, mutation.fields())?;
            }
            Operation::Update => {
                let columns = table_columns(txn, table)?;
                let affected = update_row(txn, table, &columns, mutation.fields())?;
                if affected == 0 {
                    return Err(Error::NotFound(id).into());
                }
                sync_port_links(txn, kind, &id, mutation.fields())?;
            }
            Operation::Delete => {
                txn.execute(
                    &format!("DELETE FROM {} WHERE id = ?", table),
                    [id.to_string()],
                )?;
                if kind == EntityKind::Port {
                    txn.execute("DELETE FROM port_pools WHERE port_id = ?", [id.to_string()])?;
                }
            }
        }

        match mutation.op() {
            Operation::Delete => Ok(Value::Null),
            _ => fetch_row(txn, kind, &id, NO_PREDICATE)?
                .ok_or_else(|| anyhow!("row vanished after write: {}", id)),
        }
    }
}

fn insert_row(
    txn: &rusqlite::Transaction,
    table: &str,
    columns: &[String],
    fields: &serde_json::Map<String, Value>,
) -> Result<()> {
    let present: Vec<&str> = columns
        .iter()
        .map(String::as_str)
        .filter(|c| fields.contains_key(*c))
        .collect();
    if present.is_empty() {
        return Err(anyhow!("no bindable columns for table '{}'", table));
    }
    let placeholders = present
        .iter()
        .map(|c| format!(":{}", c))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        present.join(", "),
        placeholders
    );
    execute_named(txn, &sql, fields, &present)?;
    Ok(())
}

fn update_row(
    txn: &rusqlite::Transaction,
    table: &str,
    columns: &[String],
    fields: &serde_json::Map<String, Value>,
) -> Result<usize> {
    let set: Vec<&str> = columns
        .iter()
        .map(String::as_str)
        .filter(|c| *c != "id" && fields.contains_key(*c))
        .collect();
    if set.is_empty() {
        return Err(anyhow!("no bindable columns for table '{}'", table));
    }
    let assignments = set
        .iter()
        .map(|c| format!("{} = :{}", c, c))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("UPDATE {} SET {} WHERE id = :id", table, assignments);

    let mut bound = set;
    bound.push("id");
    execute_named(txn, &sql, fields, &bound)
}

fn execute_named(
    txn: &rusqlite::Transaction,
    sql: &str,
    fields: &serde_json::Map<String, Value>,
    bound: &[&str],
) -> Result<usize> {
    log::debug!("SQL EXECUTE: {}", sql);
    let mut stmt = txn.prepare(sql)?;
    let params = serde_rusqlite::to_params_named_with_fields(fields, bound)?;
    Ok(stmt.execute(params.to_slice().as_slice())?)
}

fn sync_port_links(
    txn: &rusqlite::Transaction,
    kind: EntityKind,
    port_id: &EntityId,
    fields: &serde_json::Map<String, Value>,
) -> Result<()> {
    if kind != EntityKind::Port {
        return Ok(());
    }
    let Some(value) = fields.get("pool_ids") else {
        return Ok(());
    };
    let pool_ids: Vec<EntityId> = serde_json::from_value(value.clone())?;
    txn.execute(
        "DELETE FROM port_pools WHERE port_id = ?",
        [port_id.to_string()],
    )?;
    for pool_id in pool_ids {
        txn.execute(
            "INSERT INTO port_pools (port_id, pool_id) VALUES (?, ?)",
            rusqlite::params![port_id.to_string(), pool_id.to_string()],
        )?;
    }
    Ok(())
}

/// Reads one row as a JSON object, or None when nothing matches the id and
/// predicate. Ports get their pool links attached from the join table.
pub(crate) fn fetch_row(
    conn: &Connection,
    kind: EntityKind,
    id: &EntityId,
    predicate: &str,
) -> Result<Option<Value>> {
    let table = kind.table().ok_or(Error::NoTable(kind))?;
    let sql = format!(
        "SELECT * FROM {} WHERE id = ? AND ({}) LIMIT 1",
        table, predicate
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([id.to_string()])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };
    let mut value = row_to_json(row)?;
    if kind == EntityKind::Port {
        attach_pool_links(conn, id, &mut value)?;
    }
    Ok(Some(value))
}

pub(crate) fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if columns.is_empty() {
        return Err(anyhow!("table '{}' not found or has no columns", table));
    }
    Ok(columns)
}

fn attach_pool_links(conn: &Connection, port_id: &EntityId, value: &mut Value) -> Result<()> {
    let mut stmt =
        conn.prepare("SELECT pool_id FROM port_pools WHERE port_id = ? ORDER BY pool_id")?;
    let ids = stmt
        .query_map([port_id.to_string()], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    value["pool_ids"] = Value::Array(ids.into_iter().map(Value::String).collect());
    Ok(())
}

fn row_to_json(row: &rusqlite::Row) -> Result<Value> {
    let stmt = row.as_ref();
    let mut map = serde_json::Map::new();
    for index in 0..stmt.column_count() {
        let name = stmt.column_name(index)?.to_string();
        let value: rusqlite::types::Value = row.get(index)?;
        map.insert(name, sql_to_json(value));
    }
    Ok(Value::Object(map))
}

fn sql_to_json(value: rusqlite::types::Value) -> Value {
    use rusqlite::types::Value as Sql;
    match value {
        Sql::Null => Value::Null,
        Sql::Integer(i) => Value::from(i),
        Sql::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Sql::Text(s) => Value::String(s),
        Sql::Blob(_) => Value::Null,
    }
}

fn ensure_id(value: &mut Value, kind: EntityKind) -> Result<EntityId> {
    let existing = value
        .get("id")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    match existing {
        Some(s) if !s.is_empty() => {
            let id: EntityId = s.parse()?;
            if id.kind() != kind {
                return Err(anyhow!("id {} is not a {}", id, kind.tag()));
            }
            Ok(id)
        }
        _ => {
            let id = EntityId::new(kind);
            value["id"] = Value::String(id.to_string());
            Ok(id)
        }
    }
}

fn into_map(value: Value) -> Result<serde_json::Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(anyhow!("entity must serialize to an object")),
    }
}
