use serde::{Deserialize, Serialize};

use crate::context::MutationContext;
use crate::id::EntityId;
use crate::notifier::ChangeNotifier;

/// Sentinel recorded as a previous value when the pre-image is unavailable.
pub const UNKNOWN_VALUE: &str = "<unknown>";

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Create,
    Update,
    Delete,
    /// Never produced here; reserved for consumers decoding the serialized
    /// form from other producers.
    Unknown,
}

/// One field's transition within a mutation, stringified for consumers.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub previous_value: String,
    pub current_value: String,
}

/// Published once per completed mutation. `additional_subject_ids` is
/// deduplicated and never contains `subject_id`; downstream consumers
/// subscribe against both.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangeMessage {
    pub event_type: EventType,
    pub subject_id: EntityId,
    pub additional_subject_ids: Vec<EntityId>,
    /// UTC, milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub field_changes: Vec<FieldChange>,
}

/// Outbound change-event transport. Fire-and-forget from the store's point
/// of view: a returned error is logged and otherwise swallowed.
pub trait Publisher: Send + Sync {
    fn publish_change(
        &self,
        ctx: &MutationContext,
        subject: &str,
        message: &ChangeMessage,
    ) -> anyhow::Result<()>;
}

/// In-process publisher that fans messages out to mpsc subscribers.
#[derive(Clone, Default)]
pub struct NotifierPublisher {
    notifier: ChangeNotifier,
}

impl NotifierPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receiver of every `(subject, message)` published after this call.
    pub fn observer(&self) -> std::sync::mpsc::Receiver<(String, ChangeMessage)> {
        self.notifier.observer()
    }
}

impl Publisher for NotifierPublisher {
    fn publish_change(
        &self,
        _ctx: &MutationContext,
        subject: &str,
        message: &ChangeMessage,
    ) -> anyhow::Result<()> {
        self.notifier.notify(subject, message);
        Ok(())
    }
}

pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
pub(crate) struct RecordingPublisher {
    messages: std::sync::Mutex<Vec<(String, ChangeMessage)>>,
    failing: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl RecordingPublisher {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            messages: std::sync::Mutex::new(Vec::new()),
            failing: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<(String, ChangeMessage)> {
        self.messages.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Publisher for RecordingPublisher {
    fn publish_change(
        &self,
        _ctx: &MutationContext,
        subject: &str,
        message: &ChangeMessage,
    ) -> anyhow::Result<()> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            anyhow::bail!("publisher unavailable");
        }
        self.messages
            .lock()
            .unwrap()
            .push((subject.to_string(), message.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::EntityKind;

    #[test]
    fn event_types_serialize_lowercase() -> anyhow::Result<()> {
        assert_eq!(serde_json::to_string(&EventType::Create)?, "\"create\"");
        assert_eq!(serde_json::to_string(&EventType::Update)?, "\"update\"");
        assert_eq!(serde_json::to_string(&EventType::Delete)?, "\"delete\"");
        assert_eq!(serde_json::to_string(&EventType::Unknown)?, "\"unknown\"");
        Ok(())
    }

    #[test]
    fn notifier_publisher_delivers_to_observers() -> anyhow::Result<()> {
        let publisher = NotifierPublisher::new();
        let rx = publisher.observer();

        let message = ChangeMessage {
            event_type: EventType::Create,
            subject_id: EntityId::new(EntityKind::Pool),
            additional_subject_ids: vec![EntityId::new(EntityKind::Owner)],
            timestamp: now_ms(),
            field_changes: vec![],
        };
        publisher.publish_change(&MutationContext::new(), "load-balancer-pool", &message)?;

        let (subject, received) = rx.recv_timeout(std::time::Duration::from_millis(100))?;
        assert_eq!(subject, "load-balancer-pool");
        assert_eq!(received.subject_id, message.subject_id);
        Ok(())
    }
}
