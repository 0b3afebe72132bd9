use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{Encoder, GroupId, Message, Record};

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemoryEncoder {
    records: Mutex<Vec<Record>>,
    next_id: AtomicU64,
}

impl MemoryEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.lock().clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().iter().map(|r| r.message.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Record>> {
        match self.records.lock() {
            Ok(records) => records,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn push(&self, parent: Option<GroupId>, message: Message, group: bool) -> GroupId {
        let mut records = self.lock();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        records.push(Record { id, parent, group, message });
        id
    }
}

impl Encoder for MemoryEncoder {
    fn object(&self, parent: Option<GroupId>, message: Message) {
        self.push(parent, message, false);
    }

    fn group(&self, parent: Option<GroupId>, message: Message) -> GroupId {
        self.push(parent, message, true)
    }
}
