//! Single-use acknowledgement handles.
//!
//! Every manual-ack fire event creates one slot: the [`MessageAcker`] travels
//! with the message to the consumer, the [`AckWaiter`] stays on the scheduler
//! thread that fired the job. The slot is a one-element channel, so the first
//! completion is the only one that can ever be observed.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{AckError, JobError, JobFailure};
use crate::types::FireId;

/// Outcome a consumer reports for one message
pub type AckOutcome = Result<(), JobFailure>;

/// Completion handle for a queued message. Clones share the same slot.
#[derive(Debug, Clone)]
pub struct MessageAcker {
    slot: Arc<AckSlot>,
}

#[derive(Debug)]
struct AckSlot {
    fire_id: FireId,
    sender: Mutex<Option<Sender<AckOutcome>>>,
}

impl MessageAcker {
    /// Create a linked acker/waiter pair for one fire event
    pub fn pair(fire_id: FireId) -> (MessageAcker, AckWaiter) {
        let (tx, rx) = channel::bounded(1);
        let acker = MessageAcker {
            slot: Arc::new(AckSlot {
                fire_id: fire_id.clone(),
                sender: Mutex::new(Some(tx)),
            }),
        };
        (acker, AckWaiter { fire_id, receiver: rx })
    }

    /// Report the processing outcome. A second call fails and leaves the first outcome in place.
    pub fn complete(&self, outcome: AckOutcome) -> Result<(), AckError> {
        let sender = self
            .slot
            .sender
            .lock()
            .take()
            .ok_or_else(|| AckError::AlreadyCompleted {
                fire_id: self.slot.fire_id.clone(),
            })?;

        let ok = outcome.is_ok();
        if sender.try_send(outcome).is_err() {
            // Waiter already gave up (ack timeout); the completion still counts
            debug!(fire_id = %self.slot.fire_id, "Ack completed after waiter left");
        } else {
            debug!(fire_id = %self.slot.fire_id, ok, "Ack completed");
        }
        Ok(())
    }

    /// Complete with success
    pub fn ack(&self) -> Result<(), AckError> {
        self.complete(Ok(()))
    }

    /// Complete with a failure cause
    pub fn nack(&self, failure: impl Into<JobFailure>) -> Result<(), AckError> {
        self.complete(Err(failure.into()))
    }

    pub fn is_completed(&self) -> bool {
        self.slot.sender.lock().is_none()
    }

    pub fn fire_id(&self) -> &FireId {
        &self.slot.fire_id
    }
}

/// Waiting side of an ack slot, held by the firing scheduler thread
#[derive(Debug)]
pub struct AckWaiter {
    fire_id: FireId,
    receiver: Receiver<AckOutcome>,
}

impl AckWaiter {
    /// Block until the acker completes, every acker handle is dropped, or the timeout elapses
    pub fn wait(self, timeout: Option<Duration>) -> Result<(), JobError> {
        let received = match timeout {
            None => self.receiver.recv().map_err(|_| JobError::AckDropped),
            Some(limit) => self.receiver.recv_timeout(limit).map_err(|e| match e {
                RecvTimeoutError::Timeout => JobError::AckTimeout(limit),
                RecvTimeoutError::Disconnected => JobError::AckDropped,
            }),
        };

        match received {
            Ok(outcome) => outcome.map_err(JobError::Consumer),
            Err(err) => {
                warn!(fire_id = %self.fire_id, error = %err, "No acknowledgement received");
                Err(err)
            }
        }
    }

    pub fn fire_id(&self) -> &FireId {
        &self.fire_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_ack_releases_waiter_with_success() {
        let (acker, waiter) = MessageAcker::pair(FireId::new());

        let handle = thread::spawn(move || waiter.wait(None));
        acker.ack().unwrap();

        assert_eq!(handle.join().unwrap(), Ok(()));
        assert!(acker.is_completed());
    }

    #[test]
    fn test_nack_surfaces_failure() {
        let (acker, waiter) = MessageAcker::pair(FireId::new());
        acker.nack("disk full").unwrap();

        assert_eq!(
            waiter.wait(None),
            Err(JobError::Consumer(JobFailure::new("disk full")))
        );
    }

    #[test]
    fn test_second_completion_is_rejected_and_first_stands() {
        let fire_id = FireId::new();
        let (acker, waiter) = MessageAcker::pair(fire_id.clone());

        acker.ack().unwrap();
        let second = acker.nack("late failure");

        assert_eq!(second, Err(AckError::AlreadyCompleted { fire_id }));
        assert_eq!(waiter.wait(None), Ok(()));
    }

    #[test]
    fn test_clones_share_one_slot() {
        let (acker, waiter) = MessageAcker::pair(FireId::new());
        let clone = acker.clone();

        clone.nack("first").unwrap();
        assert!(acker.ack().is_err());
        assert!(waiter.wait(None).is_err());
    }

    #[test]
    fn test_dropped_acker_releases_waiter() {
        let (acker, waiter) = MessageAcker::pair(FireId::new());
        drop(acker);

        assert_eq!(waiter.wait(None), Err(JobError::AckDropped));
    }

    #[test]
    fn test_wait_times_out() {
        let (acker, waiter) = MessageAcker::pair(FireId::new());
        let limit = Duration::from_millis(20);

        assert_eq!(waiter.wait(Some(limit)), Err(JobError::AckTimeout(limit)));
        // Completing after the waiter left is still the first completion
        assert!(acker.ack().is_ok());
    }
}
