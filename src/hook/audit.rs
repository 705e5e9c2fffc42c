use serde_json::{json, Value};

use crate::context::MutationContext;
use crate::hook::{Executor, Hook, Mutation, Operation};

pub const CREATED_BY: &str = "created_by";
pub const UPDATED_BY: &str = "updated_by";

/// Stamps trusted provenance on writes: creator and updater on Create,
/// updater only on Update. Timestamps are someone else's job.
pub struct AuditHook;

impl AuditHook {
    pub fn new() -> Self {
        AuditHook
    }
}

impl Default for AuditHook {
    fn default() -> Self {
        Self::new()
    }
}

impl Hook for AuditHook {
    fn applies_to(&self, op: Operation) -> bool {
        matches!(op, Operation::Create | Operation::Update)
    }

    fn handle(
        &self,
        ctx: &MutationContext,
        mutation: &mut Mutation<'_>,
        next: &mut dyn Executor,
    ) -> anyhow::Result<Value> {
        let actor = json!(ctx.actor());
        if mutation.op() == Operation::Create {
            mutation.set_field(CREATED_BY, actor.clone());
        }
        mutation.set_field(UPDATED_BY, actor);
        next.execute(ctx, mutation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::UNKNOWN_ACTOR;
    use crate::id::{EntityId, EntityKind};

    struct Capture {
        created_by: Option<Value>,
        updated_by: Option<Value>,
    }

    impl Executor for Capture {
        fn execute(
            &mut self,
            _ctx: &MutationContext,
            mutation: &mut Mutation<'_>,
        ) -> anyhow::Result<Value> {
            self.created_by = mutation.fields().get(CREATED_BY).cloned();
            self.updated_by = mutation.fields().get(UPDATED_BY).cloned();
            Ok(Value::Null)
        }
    }

    fn stamp(op: Operation, ctx: &MutationContext) -> anyhow::Result<Capture> {
        let mut conn = rusqlite::Connection::open_in_memory()?;
        let txn = conn.transaction()?;
        let mut mutation = Mutation::new(
            EntityKind::Origin,
            op,
            Some(EntityId::new(EntityKind::Origin)),
            serde_json::Map::new(),
            &txn,
        );
        let mut terminal = Capture { created_by: None, updated_by: None };
        AuditHook::new().handle(ctx, &mut mutation, &mut terminal)?;
        Ok(terminal)
    }

    #[test]
    fn create_stamps_creator_and_updater() -> anyhow::Result<()> {
        let ctx = MutationContext::new().with_actor("alice");
        let seen = stamp(Operation::Create, &ctx)?;
        assert_eq!(seen.created_by, Some(json!("alice")));
        assert_eq!(seen.updated_by, Some(json!("alice")));
        Ok(())
    }

    #[test]
    fn update_stamps_updater_only() -> anyhow::Result<()> {
        let ctx = MutationContext::new().with_actor("bob");
        let seen = stamp(Operation::Update, &ctx)?;
        assert_eq!(seen.created_by, None);
        assert_eq!(seen.updated_by, Some(json!("bob")));
        Ok(())
    }

    #[test]
    fn missing_actor_uses_the_sentinel() -> anyhow::Result<()> {
        let seen = stamp(Operation::Create, &MutationContext::new())?;
        assert_eq!(seen.created_by, Some(json!(UNKNOWN_ACTOR)));
        Ok(())
    }

    #[test]
    fn deletes_are_outside_its_operation_set() {
        assert!(!AuditHook::new().applies_to(Operation::Delete));
    }
}
