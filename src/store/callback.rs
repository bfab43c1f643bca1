use crate::error::{Error, Result};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Arc;

pub trait Callback<T>: Sync + Send {
    fn call(&self, value: T);
}

/// One-shot callback whose value is collected by a blocking wait on the paired
/// [`BlockingReceiver`].
///
/// Only the first value is kept. Dropping every handle on the callback without calling it
/// wakes the receiver with `Error::Interrupted`.
pub struct BlockingCallback<T> {
    sender: SyncSender<T>,
}

impl<T: Send> BlockingCallback<T> {
    pub fn new() -> (Arc<Self>, BlockingReceiver<T>) {
        let (sender, receiver): (SyncSender<T>, Receiver<T>) = sync_channel(1);
        (Arc::new(BlockingCallback { sender }), BlockingReceiver { receiver })
    }
}

impl<T: Send> Callback<T> for BlockingCallback<T> {
    fn call(&self, value: T) {
        match self.sender.try_send(value) {
            Ok(()) => {}
            // Already answered, or the waiting side is gone. Either way there is nobody
            // left to deliver to.
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

pub struct BlockingReceiver<T> {
    receiver: Receiver<T>,
}

impl<T> BlockingReceiver<T> {
    /// Blocks the calling thread until the callback is invoked.
    pub fn await_blocking(self) -> Result<T> {
        self.receiver.recv().map_err(|_| {
            Error::Interrupted("The callback was dropped before delivering a result".to_string())
        })
    }
}
