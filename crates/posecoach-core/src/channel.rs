//! Message channels — unbounded FIFO queues with a timed receive.

use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use crate::message::{Event, Message};

/// Sending half. Cheap to clone; sends never block.
#[derive(Clone)]
pub struct Outbox {
    label: &'static str,
    tx: mpsc::Sender<Message>,
}

impl Outbox {
    /// Enqueue an event. A departed receiver is not an error for the sender:
    /// the message is dropped and logged.
    pub fn send(&self, event: Event) {
        let msg = Message::from(event);
        log::debug!("[{}] → {msg}", self.label);
        if let Err(mpsc::SendError(msg)) = self.tx.send(msg) {
            log::debug!("[{}] receiver gone, dropped {msg}", self.label);
        }
    }
}

/// Receiving half, owned by exactly one thread.
pub struct Inbox {
    label: &'static str,
    rx: mpsc::Receiver<Message>,
    closed: bool,
}

impl Inbox {
    /// Block for at most `timeout`. `None` means nothing arrived in time, or
    /// every sender has been dropped (see [`Inbox::is_closed`]).
    pub fn receive(&mut self, timeout: Duration) -> Option<Message> {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Some(msg),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                self.mark_closed();
                None
            }
        }
    }

    /// Non-blocking receive.
    pub fn try_receive(&mut self) -> Option<Message> {
        match self.rx.try_recv() {
            Ok(msg) => Some(msg),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.mark_closed();
                None
            }
        }
    }

    /// Take everything currently queued without blocking.
    pub fn drain(&mut self) -> Vec<Message> {
        std::iter::from_fn(|| self.try_receive()).collect()
    }

    /// True once the queue is empty and all senders are gone.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn mark_closed(&mut self) {
        if !self.closed {
            log::debug!("[{}] all senders dropped", self.label);
            self.closed = true;
        }
    }
}

/// Create one direction of traffic. `label` tags debug logs.
pub fn channel(label: &'static str) -> (Outbox, Inbox) {
    let (tx, rx) = mpsc::channel();
    (Outbox { label, tx }, Inbox { label, rx, closed: false })
}

/// The coordinator's ends of both directions.
pub struct CoordinatorLinks {
    pub to_producer: Outbox,
    pub from_producer: Inbox,
}

/// The producer's ends of both directions.
pub struct ProducerLinks {
    pub to_coordinator: Outbox,
    pub from_coordinator: Inbox,
}

/// Build the two independent queues for one session.
pub fn session_links() -> (CoordinatorLinks, ProducerLinks) {
    let (to_coordinator, from_producer) = channel("producer→coordinator");
    let (to_producer, from_coordinator) = channel("coordinator→producer");
    (
        CoordinatorLinks { to_producer, from_producer },
        ProducerLinks { to_coordinator, from_coordinator },
    )
}
