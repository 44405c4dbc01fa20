use std::sync::Mutex;

/// Single-slot mailbox between one producer and one consumer.
///
/// `publish` overwrites an unread value (last-write-wins, no queueing) and
/// `take` removes the value under the same lock, so the consumer never reads
/// a message that is being overwritten mid-parse.
#[derive(Debug, Default)]
pub struct Mailbox<T> {
    slot: Mutex<Option<T>>,
}

impl<T> Mailbox<T> {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub fn publish(&self, value: T) {
        *self.slot.lock().unwrap() = Some(value);
    }

    pub fn take(&self) -> Option<T> {
        self.slot.lock().unwrap().take()
    }

    pub fn has_pending(&self) -> bool {
        self.slot.lock().unwrap().is_some()
    }
}
