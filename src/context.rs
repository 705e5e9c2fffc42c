/// Actor attributed to a change when the context carries none.
pub const UNKNOWN_ACTOR: &str = "unknown-actor";

/// Read-only per-call inputs threaded through every hook and store call.
/// The store and hooks never set these; whoever makes the call does.
#[derive(Clone, Debug, Default)]
pub struct MutationContext {
    actor: Option<String>,
    bypass_soft_delete: bool,
}

impl MutationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Marks the call as bypassing soft deletes: deletes become physical
    /// and reads stop filtering out tombstoned rows.
    pub fn with_soft_delete_bypass(mut self) -> Self {
        self.bypass_soft_delete = true;
        self
    }

    pub fn actor(&self) -> &str {
        self.actor.as_deref().unwrap_or(UNKNOWN_ACTOR)
    }

    pub fn bypasses_soft_delete(&self) -> bool {
        self.bypass_soft_delete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_falls_back_to_sentinel() {
        let ctx = MutationContext::new();
        assert_eq!(ctx.actor(), UNKNOWN_ACTOR);
        assert!(!ctx.bypasses_soft_delete());

        let ctx = ctx.with_actor("alice").with_soft_delete_bypass();
        assert_eq!(ctx.actor(), "alice");
        assert!(ctx.bypasses_soft_delete());
    }
}
