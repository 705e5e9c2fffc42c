use std::{
    sync::{
        mpsc::{channel, Receiver, Sender},
        Arc, RwLock,
    },
    thread,
};

use crate::event::ChangeMessage;

/// Fans published change messages out to in-process subscribers.
/// Senders whose receiver has been dropped are cleaned up lazily on the
/// next notify.
#[derive(Clone, Default)]
pub struct ChangeNotifier {
    senders: Arc<RwLock<Vec<Sender<(String, ChangeMessage)>>>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self, subject: &str, message: &ChangeMessage) {
        let mut senders = self.senders.write().unwrap();
        senders.retain(|tx| tx.send((subject.to_string(), message.clone())).is_ok());
    }

    pub fn observer(&self) -> Receiver<(String, ChangeMessage)> {
        let (tx, rx) = channel();
        self.senders.write().unwrap().push(tx);
        rx
    }

    /// Runs the callback on its own thread for every future message.
    pub fn observe(&self, mut callback: impl FnMut(String, ChangeMessage) + Send + 'static) {
        let rx = self.observer();
        thread::spawn(move || {
            rx.iter()
                .for_each(|(subject, message)| callback(subject, message));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use crate::id::{EntityId, EntityKind};
    use std::time::Duration;

    fn message() -> ChangeMessage {
        ChangeMessage {
            event_type: EventType::Update,
            subject_id: EntityId::new(EntityKind::Port),
            additional_subject_ids: vec![],
            timestamp: 0,
            field_changes: vec![],
        }
    }

    #[test]
    fn delivers_to_every_observer() {
        let notifier = ChangeNotifier::new();
        let rx1 = notifier.observer();
        let rx2 = notifier.observer();

        notifier.notify("load-balancer-port", &message());

        for rx in [rx1, rx2] {
            let (subject, _) = rx.recv_timeout(Duration::from_millis(100)).unwrap();
            assert_eq!(subject, "load-balancer-port");
        }
    }

    #[test]
    fn cleans_up_dropped_observers() {
        let notifier = ChangeNotifier::new();
        {
            let _rx = notifier.observer();
        } // receiver dropped

        let live = notifier.observer();
        notifier.notify("load-balancer", &message());

        assert!(live.recv_timeout(Duration::from_millis(100)).is_ok());
    }

    #[test]
    fn notify_without_observers_is_fine() {
        ChangeNotifier::new().notify("load-balancer", &message());
    }

    #[test]
    fn observe_runs_callback() {
        let notifier = ChangeNotifier::new();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        notifier.observe(move |subject, _| {
            seen_clone.lock().unwrap().push(subject);
        });
        std::thread::sleep(Duration::from_millis(10));

        notifier.notify("load-balancer-pool", &message());
        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["load-balancer-pool".to_string()]
        );
    }
}
