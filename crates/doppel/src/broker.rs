//! In-process acknowledged delivery queue.
//!
//! Connects the ingress router to the index consumer with at-least-once
//! semantics: a consumed [`Delivery`] must be acknowledged, and one that
//! is dropped unacknowledged is returned to the front of the queue with
//! its redelivery count incremented. Consumers therefore see a message
//! again until they ack it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;
use tokio::sync::Notify;

struct Envelope<M> {
    message: M,
    redeliveries: u32,
}

struct Shared<M> {
    state: Mutex<VecDeque<Envelope<M>>>,
    notify: Notify,
}

impl<M> Shared<M> {
    fn lock(&self) -> MutexGuard<'_, VecDeque<Envelope<M>>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// A publish/consume queue with per-message acknowledgment.
pub struct DeliveryQueue<M> {
    shared: Arc<Shared<M>>,
}

impl<M> Clone for DeliveryQueue<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M> Default for DeliveryQueue<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> DeliveryQueue<M> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
            }),
        }
    }

    pub fn publish(&self, message: M) {
        self.shared.lock().push_back(Envelope {
            message,
            redeliveries: 0,
        });
        self.shared.notify.notify_one();
    }

    /// Takes the next message, waiting for one if the queue is empty.
    pub async fn consume(&self) -> Delivery<M> {
        loop {
            {
                let mut state = self.shared.lock();
                if let Some(envelope) = state.pop_front() {
                    if !state.is_empty() {
                        self.shared.notify.notify_one();
                    }
                    return Delivery {
                        message: Some(envelope.message),
                        redeliveries: envelope.redeliveries,
                        acked: false,
                        shared: Arc::clone(&self.shared),
                    };
                }
            }
            self.shared.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.shared.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.lock().is_empty()
    }
}

/// One consumed message plus its acknowledgment handle.
pub struct Delivery<M> {
    message: Option<M>,
    redeliveries: u32,
    acked: bool,
    shared: Arc<Shared<M>>,
}

impl<M> Delivery<M> {
    pub fn message(&self) -> &M {
        // Only Drop takes the message out.
        self.message.as_ref().expect("delivery still live")
    }

    /// How many times this message was requeued before this delivery.
    pub fn redeliveries(&self) -> u32 {
        self.redeliveries
    }

    /// Marks the message handled; it will not be redelivered.
    pub fn ack(mut self) {
        self.acked = true;
    }
}

impl<M> Drop for Delivery<M> {
    fn drop(&mut self) {
        if self.acked {
            return;
        }
        if let Some(message) = self.message.take() {
            debug!("Requeueing unacknowledged delivery");
            self.shared.lock().push_front(Envelope {
                message,
                redeliveries: self.redeliveries + 1,
            });
            self.shared.notify.notify_one();
        }
    }
}
