use std::sync::mpsc::{Receiver, Sender};

use crate::transport::BatchPayload;

/// An immutable unit of work: an opaque serialized payload plus a
/// monotonically increasing sequence id and two completion notifications.
///
/// Owned by the producer until enqueued, by the compositor afterwards; the
/// buffer goes back to the pool only after both notifications fired.
#[derive(Debug)]
pub struct CompositionBatch {
    pub sequence_id: u64,
    pub(crate) payload: Option<BatchPayload>,
    notifier: BatchNotifier,
}

impl CompositionBatch {
    pub(crate) fn new(sequence_id: u64, payload: BatchPayload, notifier: BatchNotifier) -> Self {
        Self {
            sequence_id,
            payload: Some(payload),
            notifier,
        }
    }

    /// Fire the processed notification. Idempotent; a producer that dropped
    /// its receipt is ignored.
    pub(crate) fn notify_processed(&mut self) {
        if let Some(tx) = self.notifier.processed.take() {
            let _ = tx.send(());
        }
    }

    /// Fire the rendered notification. Never fires before processed.
    pub(crate) fn notify_rendered(&mut self) {
        if let Some(tx) = self.notifier.rendered.take() {
            let _ = tx.send(());
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct BatchNotifier {
    pub(crate) processed: Option<Sender<()>>,
    pub(crate) rendered: Option<Sender<()>>,
}

/// Producer-side handle to a batch's completion notifications.
///
/// `processed` fires once the batch's mutations were applied on the render
/// context; `rendered` fires at the end of the cycle that applied it,
/// whether or not target rendering actually ran.
#[derive(Debug)]
pub struct BatchReceipt {
    pub sequence_id: u64,
    pub processed: Receiver<()>,
    pub rendered: Receiver<()>,
}

impl BatchReceipt {
    /// Block until the batch was applied. Returns false if the compositor
    /// went away without applying it.
    pub fn wait_processed(&self) -> bool {
        self.processed.recv().is_ok()
    }

    /// Block until the cycle that applied the batch completed.
    pub fn wait_rendered(&self) -> bool {
        self.rendered.recv().is_ok()
    }
}
