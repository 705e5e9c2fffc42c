use serde_json::json;

use crate::context::MutationContext;
use crate::error::Error;
use crate::event::now_ms;
use crate::hook::{Executor, Hook, Mutation, Operation};
use crate::store::table_columns;

/// Tombstone column set on soft-deleted rows.
pub const DELETED_AT: &str = "deleted_at";

/// Read predicate hiding tombstoned rows, unless the call bypasses soft
/// deletes. Appended to every store read.
pub fn visibility_predicate(ctx: &MutationContext) -> &'static str {
    if ctx.bypasses_soft_delete() {
        crate::store::NO_PREDICATE
    } else {
        "deleted_at IS NULL"
    }
}

/// Rewrites Delete into a tombstoning Update so deletes stay reversible.
/// With the bypass marker in the context, the delete passes through and the
/// row is physically removed.
pub struct SoftDeleteHook;

impl SoftDeleteHook {
    pub fn new() -> Self {
        SoftDeleteHook
    }
}

impl Default for SoftDeleteHook {
    fn default() -> Self {
        Self::new()
    }
}

impl Hook for SoftDeleteHook {
    fn applies_to(&self, op: Operation) -> bool {
        op == Operation::Delete
    }

    fn handle(
        &self,
        ctx: &MutationContext,
        mutation: &mut Mutation<'_>,
        next: &mut dyn Executor,
    ) -> anyhow::Result<serde_json::Value> {
        if ctx.bypasses_soft_delete() {
            return next.execute(ctx, mutation);
        }

        let kind = mutation.kind();
        let table = kind.table().ok_or(Error::NoTable(kind))?;
        let columns = table_columns(mutation.txn(), table)?;
        if !columns.iter().any(|c| c == DELETED_AT) {
            return Err(Error::MissingColumn {
                table,
                column: DELETED_AT,
            }
            .into());
        }

        mutation.set_op(Operation::Update);
        mutation.set_field(DELETED_AT, json!(now_ms()));
        next.execute(ctx, mutation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{EntityId, EntityKind};
    use serde_json::Value;

    struct Capture {
        op: Option<Operation>,
        deleted_at: Option<Value>,
    }

    impl Executor for Capture {
        fn execute(
            &mut self,
            _ctx: &MutationContext,
            mutation: &mut Mutation<'_>,
        ) -> anyhow::Result<Value> {
            self.op = Some(mutation.op());
            self.deleted_at = mutation.fields().get(DELETED_AT).cloned();
            Ok(Value::Null)
        }
    }

    fn delete_mutation<'a>(txn: &'a rusqlite::Transaction<'a>) -> Mutation<'a> {
        Mutation::new(
            EntityKind::Pool,
            Operation::Delete,
            Some(EntityId::new(EntityKind::Pool)),
            serde_json::Map::new(),
            txn,
        )
    }

    #[test]
    fn rewrites_delete_into_tombstoning_update() -> anyhow::Result<()> {
        let mut conn = rusqlite::Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE pools (id TEXT PRIMARY KEY, name TEXT, deleted_at INTEGER);",
        )?;
        let txn = conn.transaction()?;
        let mut mutation = delete_mutation(&txn);
        let mut terminal = Capture { op: None, deleted_at: None };

        SoftDeleteHook::new().handle(&MutationContext::new(), &mut mutation, &mut terminal)?;

        assert_eq!(terminal.op, Some(Operation::Update));
        let stamp = terminal.deleted_at.and_then(|v| v.as_i64());
        assert!(stamp.is_some_and(|ms| ms > 0));
        Ok(())
    }

    #[test]
    fn bypass_marker_passes_the_delete_through() -> anyhow::Result<()> {
        let mut conn = rusqlite::Connection::open_in_memory()?;
        let txn = conn.transaction()?;
        let mut mutation = delete_mutation(&txn);
        let mut terminal = Capture { op: None, deleted_at: None };

        let ctx = MutationContext::new().with_soft_delete_bypass();
        SoftDeleteHook::new().handle(&ctx, &mut mutation, &mut terminal)?;

        assert_eq!(terminal.op, Some(Operation::Delete));
        assert!(terminal.deleted_at.is_none());
        Ok(())
    }

    #[test]
    fn missing_tombstone_column_is_a_configuration_error() -> anyhow::Result<()> {
        let mut conn = rusqlite::Connection::open_in_memory()?;
        conn.execute_batch("CREATE TABLE pools (id TEXT PRIMARY KEY, name TEXT);")?;
        let txn = conn.transaction()?;
        let mut mutation = delete_mutation(&txn);
        let mut terminal = Capture { op: None, deleted_at: None };

        let err = SoftDeleteHook::new()
            .handle(&MutationContext::new(), &mut mutation, &mut terminal)
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::MissingColumn { table: "pools", column: DELETED_AT })
        ));
        // The terminal never ran.
        assert!(terminal.op.is_none());
        Ok(())
    }

    #[test]
    fn predicate_tracks_the_bypass_marker() {
        assert_eq!(
            visibility_predicate(&MutationContext::new()),
            "deleted_at IS NULL"
        );
        assert_eq!(
            visibility_predicate(&MutationContext::new().with_soft_delete_bypass()),
            crate::store::NO_PREDICATE
        );
    }
}
