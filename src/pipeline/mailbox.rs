use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};

/// Single-slot channel that only ever holds the most recent value.
///
/// Posting into a full mailbox evicts the pending value, so a slow consumer
/// always picks up the newest frame instead of working through a backlog.
#[derive(Debug)]
pub struct Mailbox<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self { tx, rx }
    }

    /// Returns the value that was evicted, if any.
    pub fn post(&self, value: T) -> Option<T> {
        let mut value = value;
        let mut evicted = None;
        loop {
            match self.tx.try_send(value) {
                Ok(()) => return evicted,
                Err(TrySendError::Full(rejected)) => {
                    if let Ok(stale) = self.rx.try_recv() {
                        evicted = Some(stale);
                    }
                    value = rejected;
                }
                // Both ends live in `self`, so the channel cannot disconnect.
                Err(TrySendError::Disconnected(_)) => return evicted,
            }
        }
    }

    pub fn take(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn wait(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(value) => Some(value),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Bare consumer handle; it disconnects once every mailbox clone is
    /// dropped, which lets worker threads notice their owner is gone.
    pub fn receiver(&self) -> Receiver<T> {
        self.rx.clone()
    }
}
