//! Completion observers.
//!
//! An operation's completion is a typed value passed through an ordered list
//! of observers. The chain guarantees each observer sees `on_started` and
//! `on_finished` at most once, in registration order, whatever mix of cancel
//! and reply signals races to finish the operation.

use crate::operation::{Completion, OperationInfo, OperationOutcome, Progress};
use biogate_core::{RequestId, SensorId, TemplateId, UserId};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

/// Receives lifecycle events of one operation.
pub trait ClientObserver: Send {
    fn on_started(&mut self, _operation: &OperationInfo) {}

    fn on_progress(&mut self, _operation: &OperationInfo, _progress: &Progress) {}

    fn on_finished(&mut self, completion: &Completion);
}

/// Ordered observers of one operation.
#[derive(Default)]
pub struct CompletionChain {
    observers: Vec<Box<dyn ClientObserver>>,
    started: bool,
    finished: bool,
}

impl CompletionChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observer; it runs after every observer already in the chain.
    #[must_use]
    pub fn with(mut self, observer: Box<dyn ClientObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn push(&mut self, observer: Box<dyn ClientObserver>) {
        self.observers.push(observer);
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub(crate) fn started(&mut self, operation: &OperationInfo) {
        if self.started {
            return;
        }
        self.started = true;
        for observer in &mut self.observers {
            observer.on_started(operation);
        }
    }

    pub(crate) fn progress(&mut self, operation: &OperationInfo, progress: &Progress) {
        if self.finished {
            return;
        }
        for observer in &mut self.observers {
            observer.on_progress(operation, progress);
        }
    }

    /// Deliver the completion. Returns `false` if it was already delivered.
    pub(crate) fn finish(&mut self, completion: &Completion) -> bool {
        if self.finished {
            return false;
        }
        self.finished = true;
        for observer in &mut self.observers {
            observer.on_finished(completion);
        }
        true
    }
}

impl std::fmt::Debug for CompletionChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionChain")
            .field("observers", &self.observers.len())
            .field("started", &self.started)
            .field("finished", &self.finished)
            .finish()
    }
}

/// Event delivered to a caller through [`ClientEvents`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Started(OperationInfo),
    Progress(Progress),
    Finished(Completion),
}

/// Observer that forwards every event to a channel.
#[derive(Debug)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl ClientObserver for ChannelObserver {
    fn on_started(&mut self, operation: &OperationInfo) {
        let _ = self.tx.send(ClientEvent::Started(operation.clone()));
    }

    fn on_progress(&mut self, _operation: &OperationInfo, progress: &Progress) {
        let _ = self.tx.send(ClientEvent::Progress(*progress));
    }

    fn on_finished(&mut self, completion: &Completion) {
        let _ = self.tx.send(ClientEvent::Finished(completion.clone()));
    }
}

/// Receiving side of a [`ChannelObserver`].
///
/// # Examples
///
/// ```no_run
/// use biogate_scheduler::ClientEvents;
///
/// # async fn example(mut events: ClientEvents) {
/// if let Some(completion) = events.finished().await {
///     println!("{}: {}", completion.operation.kind, completion.outcome.label());
/// }
/// # }
/// ```
#[derive(Debug)]
pub struct ClientEvents {
    rx: mpsc::UnboundedReceiver<ClientEvent>,
}

impl ClientEvents {
    /// Create a connected observer and receiver.
    pub fn channel() -> (ChannelObserver, ClientEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelObserver { tx }, ClientEvents { rx })
    }

    /// Next event, or `None` once the operation is gone.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<ClientEvent> {
        self.rx.try_recv().ok()
    }

    /// Skip to the completion.
    ///
    /// Returns `None` if the operation was dropped without completing, which
    /// happens for duplicate submissions.
    pub async fn finished(&mut self) -> Option<Completion> {
        while let Some(event) = self.rx.recv().await {
            if let ClientEvent::Finished(completion) = event {
                return Some(completion);
            }
        }
        None
    }
}

/// Framework-wide biometric state changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BiometricStateEvent {
    ClientStarted {
        sensor_id: SensorId,
        user_id: UserId,
        request_id: RequestId,
        kind: &'static str,
    },
    ClientFinished {
        sensor_id: SensorId,
        user_id: UserId,
        request_id: RequestId,
        kind: &'static str,
        success: bool,
    },
    EnrollmentsChanged {
        sensor_id: SensorId,
        user_id: UserId,
        template_id: TemplateId,
        has_enrollments: bool,
    },
}

/// First observer of every chain: publishes start and finish to subscribers.
#[derive(Debug, Clone)]
pub struct StateBroadcastObserver {
    tx: broadcast::Sender<BiometricStateEvent>,
}

impl StateBroadcastObserver {
    pub fn new(tx: broadcast::Sender<BiometricStateEvent>) -> Self {
        Self { tx }
    }
}

impl ClientObserver for StateBroadcastObserver {
    fn on_started(&mut self, operation: &OperationInfo) {
        // No subscribers is fine
        let _ = self.tx.send(BiometricStateEvent::ClientStarted {
            sensor_id: operation.sensor_id,
            user_id: operation.user_id,
            request_id: operation.request_id,
            kind: operation.kind,
        });
    }

    fn on_finished(&mut self, completion: &Completion) {
        let operation = &completion.operation;
        let _ = self.tx.send(BiometricStateEvent::ClientFinished {
            sensor_id: operation.sensor_id,
            user_id: operation.user_id,
            request_id: operation.request_id,
            kind: operation.kind,
            success: matches!(completion.outcome, OperationOutcome::Success(_)),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{CancelReason, Operation, OperationKind};
    use biogate_core::{ClientToken, OwnerId};
    use std::sync::{Arc, Mutex};

    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl ClientObserver for Recording {
        fn on_started(&mut self, _operation: &OperationInfo) {
            self.log.lock().unwrap().push(format!("{}:started", self.name));
        }

        fn on_finished(&mut self, _completion: &Completion) {
            self.log.lock().unwrap().push(format!("{}:finished", self.name));
        }
    }

    fn completion() -> Completion {
        let op = Operation::new(
            RequestId::new(1),
            ClientToken::new(),
            OwnerId::new("com.example").unwrap(),
            SensorId::new(1),
            UserId::new(0),
            OperationKind::DetectInteraction,
        );
        Completion {
            operation: op.info(),
            outcome: OperationOutcome::Cancelled(CancelReason::Caller),
            cancel_requested: true,
        }
    }

    #[test]
    fn test_chain_runs_in_order_exactly_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = CompletionChain::new()
            .with(Box::new(Recording {
                name: "state",
                log: Arc::clone(&log),
            }))
            .with(Box::new(Recording {
                name: "caller",
                log: Arc::clone(&log),
            }));
        let completion = completion();

        chain.started(&completion.operation);
        chain.started(&completion.operation);
        assert!(chain.finish(&completion));
        assert!(!chain.finish(&completion));
        assert!(chain.is_finished());

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "state:started",
                "caller:started",
                "state:finished",
                "caller:finished"
            ]
        );
    }

    #[tokio::test]
    async fn test_channel_observer_delivers_completion() {
        let (mut observer, mut events) = ClientEvents::channel();
        let completion = completion();

        observer.on_started(&completion.operation);
        observer.on_progress(&completion.operation, &Progress::Acquired);
        observer.on_finished(&completion);

        assert!(matches!(events.try_recv(), Some(ClientEvent::Started(_))));
        assert_eq!(events.finished().await, Some(completion));
    }

    #[tokio::test]
    async fn test_finished_returns_none_when_dropped() {
        let (observer, mut events) = ClientEvents::channel();
        drop(observer);
        assert_eq!(events.finished().await, None);
    }

    #[test]
    fn test_state_broadcast_observer() {
        let (tx, mut rx) = broadcast::channel(8);
        let mut observer = StateBroadcastObserver::new(tx);
        let completion = completion();

        observer.on_started(&completion.operation);
        observer.on_finished(&completion);

        assert!(matches!(
            rx.try_recv().unwrap(),
            BiometricStateEvent::ClientStarted { kind: "detect_interaction", .. }
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            BiometricStateEvent::ClientFinished { success: false, .. }
        ));
    }
}
