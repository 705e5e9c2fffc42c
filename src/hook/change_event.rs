use std::collections::BTreeSet;

use serde_json::Value;

use crate::context::MutationContext;
use crate::event::{now_ms, ChangeMessage, FieldChange, UNKNOWN_VALUE};
use crate::hook::soft_delete::visibility_predicate;
use crate::hook::{Executor, Hook, Mutation, Operation};
use crate::id::{EntityId, EntityKind};
use crate::store::fetch_row;

/// Builds and queues exactly one change message per successful mutation:
/// related-entity subjects from the kind's relationship rules, a field diff
/// for creates and updates, and an event type taken from the operation as
/// it entered the chain (before any soft-delete rewrite).
///
/// Ordering: creates and updates collect subjects strictly after the
/// terminal write succeeds, so a failed write never emits. Deletes collect
/// before the write runs, while the row and its references are still
/// readable. The message is published only after the transaction commits.
pub struct ChangeEventHook;

impl ChangeEventHook {
    pub fn new() -> Self {
        ChangeEventHook
    }
}

impl Default for ChangeEventHook {
    fn default() -> Self {
        Self::new()
    }
}

impl Hook for ChangeEventHook {
    fn handle(
        &self,
        ctx: &MutationContext,
        mutation: &mut Mutation<'_>,
        next: &mut dyn Executor,
    ) -> anyhow::Result<Value> {
        let subject_id = mutation.target_id()?;
        let op = mutation.op();

        if op != Operation::Create {
            // Prime the pre-image cache while the old row is still readable.
            mutation.old_row();
        }
        let pre_collected = if op == Operation::Delete {
            Some(collect_subjects(ctx, mutation, &subject_id))
        } else {
            None
        };

        let value = next.execute(ctx, mutation)?;

        let mut subjects = match pre_collected {
            Some(subjects) => subjects,
            None => collect_subjects(ctx, mutation, &subject_id),
        };
        let field_changes = match op {
            Operation::Create | Operation::Update => field_changes(mutation, op, &mut subjects),
            Operation::Delete => Vec::new(),
        };
        subjects.remove(&subject_id);

        let message = ChangeMessage {
            event_type: op.event_type(),
            subject_id,
            additional_subject_ids: subjects.into_iter().collect(),
            timestamp: now_ms(),
            field_changes,
        };
        mutation.queue_publish(mutation.kind().subject().to_string(), message);
        Ok(value)
    }
}

/// Relationship rules, hand-authored per entity kind. Every lookup is
/// best-effort: a missing row is silently omitted, never an error.
fn collect_subjects(
    ctx: &MutationContext,
    mutation: &Mutation<'_>,
    target: &EntityId,
) -> BTreeSet<EntityId> {
    let mut out = BTreeSet::new();
    match mutation.kind() {
        EntityKind::LoadBalancer => load_balancer_subjects(ctx, mutation, target, &mut out),
        EntityKind::Port => port_subjects(ctx, mutation, target, &mut out),
        EntityKind::Pool => pool_subjects(ctx, mutation, target, &mut out),
        EntityKind::Origin => origin_subjects(ctx, mutation, target, &mut out),
        _ => {}
    }
    out
}

/// A load balancer fans out to its owner, location, and provider.
fn load_balancer_subjects(
    ctx: &MutationContext,
    mutation: &Mutation<'_>,
    target: &EntityId,
    out: &mut BTreeSet<EntityId>,
) {
    if let Some(row) = lookup(ctx, mutation, EntityKind::LoadBalancer, target) {
        add_reference_fields(&row, out);
    }
}

/// A port fans out to its load balancer (and that row's owner, location,
/// and provider, read from a single fetch) plus every pool it serves and
/// each pool's owner.
fn port_subjects(
    ctx: &MutationContext,
    mutation: &Mutation<'_>,
    target: &EntityId,
    out: &mut BTreeSet<EntityId>,
) {
    let Some(row) = lookup(ctx, mutation, EntityKind::Port, target) else {
        return;
    };
    if let Some(lb_id) = id_field(&row, "load_balancer_id") {
        if let Some(lb) = lookup(ctx, mutation, EntityKind::LoadBalancer, &lb_id) {
            add_reference_fields(&lb, out);
        }
        out.insert(lb_id);
    }
    for pool_id in id_list(&row, "pool_ids") {
        if let Some(pool) = lookup(ctx, mutation, EntityKind::Pool, &pool_id) {
            if let Some(owner) = id_field(&pool, "owner_id") {
                out.insert(owner);
            }
        }
        out.insert(pool_id);
    }
}

/// A pool fans out to its owner plus every port linked through port_pools,
/// each port's load balancer, and that load balancer's location.
fn pool_subjects(
    ctx: &MutationContext,
    mutation: &Mutation<'_>,
    target: &EntityId,
    out: &mut BTreeSet<EntityId>,
) {
    if let Some(row) = lookup(ctx, mutation, EntityKind::Pool, target) {
        if let Some(owner) = id_field(&row, "owner_id") {
            out.insert(owner);
        }
    }
    for port_id in ports_for_pool(mutation, target) {
        if let Some(port) = lookup(ctx, mutation, EntityKind::Port, &port_id) {
            if let Some(lb_id) = id_field(&port, "load_balancer_id") {
                if let Some(lb) = lookup(ctx, mutation, EntityKind::LoadBalancer, &lb_id) {
                    if let Some(location) = id_field(&lb, "location_id") {
                        out.insert(location);
                    }
                }
                out.insert(lb_id);
            }
        }
        out.insert(port_id);
    }
}

/// An origin fans out to its pool and that pool's owner.
fn origin_subjects(
    ctx: &MutationContext,
    mutation: &Mutation<'_>,
    target: &EntityId,
    out: &mut BTreeSet<EntityId>,
) {
    let Some(row) = lookup(ctx, mutation, EntityKind::Origin, target) else {
        return;
    };
    if let Some(pool_id) = id_field(&row, "pool_id") {
        if let Some(pool) = lookup(ctx, mutation, EntityKind::Pool, &pool_id) {
            if let Some(owner) = id_field(&pool, "owner_id") {
                out.insert(owner);
            }
        }
        out.insert(pool_id);
    }
}

/// Field diff for creates and updates. Unchanged fields are skipped on
/// update; an unreadable pre-image degrades to the "<unknown>" sentinel.
/// Any reference-valued field also fans its ids out to the subjects, so a
/// pure rename still reaches the relationship subscribers.
fn field_changes(
    mutation: &Mutation<'_>,
    op: Operation,
    subjects: &mut BTreeSet<EntityId>,
) -> Vec<FieldChange> {
    let create = op == Operation::Create;
    let mut changes = Vec::new();
    for (field, new_value) in mutation.fields() {
        if field == "id" {
            continue;
        }
        for id in extract_ids(new_value) {
            subjects.insert(id);
        }
        if create {
            if new_value.is_null() {
                continue;
            }
            changes.push(FieldChange {
                field: field.clone(),
                previous_value: String::new(),
                current_value: display_value(new_value),
            });
            continue;
        }
        let old = mutation.old_value(field);
        if old.as_ref() == Some(new_value) {
            continue;
        }
        let previous_value = match old {
            Some(value) => display_value(&value),
            None => UNKNOWN_VALUE.to_string(),
        };
        changes.push(FieldChange {
            field: field.clone(),
            previous_value,
            current_value: display_value(new_value),
        });
    }
    changes
}

fn lookup(
    ctx: &MutationContext,
    mutation: &Mutation<'_>,
    kind: EntityKind,
    id: &EntityId,
) -> Option<Value> {
    match fetch_row(mutation.txn(), kind, id, visibility_predicate(ctx)) {
        Ok(row) => row,
        Err(err) => {
            log::debug!("relationship lookup failed for {}: {}", id, err);
            None
        }
    }
}

fn ports_for_pool(mutation: &Mutation<'_>, pool_id: &EntityId) -> Vec<EntityId> {
    let result = (|| -> anyhow::Result<Vec<EntityId>> {
        let mut stmt = mutation
            .txn()
            .prepare("SELECT port_id FROM port_pools WHERE pool_id = ? ORDER BY port_id")?;
        let mut rows = stmt.query([pool_id.to_string()])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            let raw: String = row.get(0)?;
            if let Ok(id) = raw.parse() {
                ids.push(id);
            }
        }
        Ok(ids)
    })();
    match result {
        Ok(ids) => ids,
        Err(err) => {
            log::debug!("port lookup failed for {}: {}", pool_id, err);
            Vec::new()
        }
    }
}

fn id_field(row: &Value, field: &str) -> Option<EntityId> {
    row.get(field)?.as_str()?.parse().ok()
}

fn id_list(row: &Value, field: &str) -> Vec<EntityId> {
    match row.get(field) {
        Some(value) => extract_ids(value),
        None => Vec::new(),
    }
}

fn add_reference_fields(row: &Value, out: &mut BTreeSet<EntityId>) {
    for field in ["owner_id", "location_id", "provider_id"] {
        if let Some(id) = id_field(row, field) {
            out.insert(id);
        }
    }
}

fn extract_ids(value: &Value) -> Vec<EntityId> {
    match value {
        Value::String(s) => s.parse().into_iter().collect(),
        Value::Array(items) => items.iter().flat_map(extract_ids).collect(),
        _ => Vec::new(),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
