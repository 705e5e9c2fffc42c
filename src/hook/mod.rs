pub mod audit;
pub mod change_event;
pub mod soft_delete;

use std::cell::RefCell;

use serde_json::Value;

use crate::context::MutationContext;
use crate::error::Error;
use crate::event::{ChangeMessage, EventType};
use crate::id::{EntityId, EntityKind};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn event_type(self) -> EventType {
        match self {
            Operation::Create => EventType::Create,
            Operation::Update => EventType::Update,
            Operation::Delete => EventType::Delete,
        }
    }
}

/// A change message waiting for the surrounding transaction to commit.
pub struct PendingPublish {
    pub subject: String,
    pub message: ChangeMessage,
}

/// Per-call change descriptor: the operation, its target, the new field
/// values, and accessors into the call's open transaction for pre-image and
/// relationship reads. Hooks may rewrite the operation and field values
/// before the terminal write sees them.
pub struct Mutation<'a> {
    kind: EntityKind,
    op: Operation,
    id: Option<EntityId>,
    fields: serde_json::Map<String, Value>,
    txn: &'a rusqlite::Transaction<'a>,
    pre_image: RefCell<Option<Option<Value>>>,
    pending: RefCell<Vec<PendingPublish>>,
}

impl<'a> Mutation<'a> {
    pub(crate) fn new(
        kind: EntityKind,
        op: Operation,
        id: Option<EntityId>,
        mut fields: serde_json::Map<String, Value>,
        txn: &'a rusqlite::Transaction<'a>,
    ) -> Self {
        if let Some(ref id) = id {
            fields.insert("id".to_string(), Value::String(id.to_string()));
        }
        Self {
            kind,
            op,
            id,
            fields,
            txn,
            pre_image: RefCell::new(None),
            pending: RefCell::new(Vec::new()),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn op(&self) -> Operation {
        self.op
    }

    pub fn set_op(&mut self, op: Operation) {
        self.op = op;
    }

    pub fn id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }

    pub fn target_id(&self) -> Result<EntityId, Error> {
        self.id.clone().ok_or(Error::MissingId)
    }

    pub fn fields(&self) -> &serde_json::Map<String, Value> {
        &self.fields
    }

    pub fn set_field(&mut self, name: &str, value: Value) {
        self.fields.insert(name.to_string(), value);
    }

    /// The transaction this mutation runs in. Everything a hook reads or
    /// writes goes through it so lookups see uncommitted state.
    pub fn txn(&self) -> &rusqlite::Transaction<'a> {
        self.txn
    }

    /// Pre-image of the target row, fetched once and cached. Hooks that
    /// need old values after the write must call this before the terminal
    /// executor runs. Returns None when the row cannot be read; callers
    /// treat that as pre-image-unavailable, not an error.
    pub fn old_row(&self) -> Option<Value> {
        let mut cache = self.pre_image.borrow_mut();
        if let Some(ref row) = *cache {
            return row.clone();
        }
        let fetched = match &self.id {
            Some(id) => {
                match crate::store::fetch_row(self.txn, self.kind, id, crate::store::NO_PREDICATE)
                {
                    Ok(row) => row,
                    Err(err) => {
                        log::debug!("pre-image read failed for {}: {}", id, err);
                        None
                    }
                }
            }
            None => None,
        };
        *cache = Some(fetched.clone());
        fetched
    }

    /// Pre-image accessor for one field. None means unavailable.
    pub fn old_value(&self, field: &str) -> Option<Value> {
        self.old_row().and_then(|row| row.get(field).cloned())
    }

    pub(crate) fn queue_publish(&self, subject: String, message: ChangeMessage) {
        self.pending
            .borrow_mut()
            .push(PendingPublish { subject, message });
    }

    pub(crate) fn take_pending(&self) -> Vec<PendingPublish> {
        std::mem::take(&mut *self.pending.borrow_mut())
    }
}

/// Anything that can carry a mutation the rest of the way: the next hook in
/// the chain, or the terminal store write.
pub trait Executor {
    fn execute(
        &mut self,
        ctx: &MutationContext,
        mutation: &mut Mutation<'_>,
    ) -> anyhow::Result<Value>;
}

/// A composable behavior unit wrapped around entity writes.
pub trait Hook: Send + Sync {
    /// Operations this hook participates in; the chain passes straight
    /// through to `next` for anything else.
    fn applies_to(&self, op: Operation) -> bool {
        let _ = op;
        true
    }

    fn handle(
        &self,
        ctx: &MutationContext,
        mutation: &mut Mutation<'_>,
        next: &mut dyn Executor,
    ) -> anyhow::Result<Value>;
}

/// Ordered hook composition around a terminal write executor. The first
/// hook registered is outermost: its pre-logic runs first and its
/// post-logic last. An error from any hook or the terminal aborts
/// immediately and propagates unchanged.
#[derive(Default)]
pub struct Pipeline {
    hooks: Vec<Box<dyn Hook>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stock composition: change events outermost (so a delete is
    /// observed before the soft-delete rewrite), then the soft-delete
    /// rewrite, then audit stamping innermost (so a tombstoning update is
    /// stamped like any other update).
    pub fn standard() -> Self {
        Pipeline::new()
            .use_hook(change_event::ChangeEventHook::new())
            .use_hook(soft_delete::SoftDeleteHook::new())
            .use_hook(audit::AuditHook::new())
    }

    pub fn use_hook(mut self, hook: impl Hook + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    pub fn run(
        &self,
        ctx: &MutationContext,
        mutation: &mut Mutation<'_>,
        terminal: &mut dyn Executor,
    ) -> anyhow::Result<Value> {
        let mut chain = Chain {
            hooks: &self.hooks,
            terminal,
        };
        chain.execute(ctx, mutation)
    }
}

struct Chain<'a> {
    hooks: &'a [Box<dyn Hook>],
    terminal: &'a mut dyn Executor,
}

impl Executor for Chain<'_> {
    fn execute(
        &mut self,
        ctx: &MutationContext,
        mutation: &mut Mutation<'_>,
    ) -> anyhow::Result<Value> {
        match self.hooks.split_first() {
            Some((hook, rest)) => {
                let mut next = Chain {
                    hooks: rest,
                    terminal: &mut *self.terminal,
                };
                if hook.applies_to(mutation.op()) {
                    hook.handle(ctx, mutation, &mut next)
                } else {
                    next.execute(ctx, mutation)
                }
            }
            None => self.terminal.execute(ctx, mutation),
        }
    }
}
