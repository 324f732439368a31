//! Task queue backed by an unbounded tokio channel

use standby_api::QueuedTask;
use standby_host_api::{HostError, HostResult, TaskQueue};
use tokio::sync::mpsc;

/// Sending half of the event loop's queue
#[derive(Debug, Clone)]
pub struct ChannelTaskQueue {
    tx: mpsc::UnboundedSender<QueuedTask>,
}

impl ChannelTaskQueue {
    /// Create the queue and the receiver the event loop consumes
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<QueuedTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TaskQueue for ChannelTaskQueue {
    fn post(&self, task: QueuedTask) -> HostResult<()> {
        self.tx.send(task).map_err(|_| HostError::QueueClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use standby_api::{MessageKind, StandbyMessage};

    #[test]
    fn test_post_preserves_order() {
        let (queue, mut rx) = ChannelTaskQueue::channel();
        queue
            .post(StandbyMessage::new(MessageKind::StateTransit).into())
            .unwrap();
        queue
            .post(StandbyMessage::new(MessageKind::PhaseTransit).into())
            .unwrap();

        let kinds: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|task| match task {
                QueuedTask::Message(msg) => msg.kind,
                other => panic!("unexpected task {:?}", other),
            })
            .collect();
        assert_eq!(kinds, vec![MessageKind::StateTransit, MessageKind::PhaseTransit]);
    }

    #[test]
    fn test_post_after_close() {
        let (queue, rx) = ChannelTaskQueue::channel();
        drop(rx);
        assert!(matches!(
            queue.post(StandbyMessage::new(MessageKind::CommonEvent).into()),
            Err(HostError::QueueClosed)
        ));
    }
}
