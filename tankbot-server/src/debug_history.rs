use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

use tankbot_protocol::{MAX_MESSAGE_LENGTH, dispatch::TelemetrySink};

pub const DEFAULT_HISTORY_LEN: usize = 128;

/// Recent device messages, kept for whoever broadcasts them onward.
///
/// The window is fixed; once full, each new message replaces the oldest one.
/// Clones share the same history.
#[derive(Clone)]
pub struct DebugHistory {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    capacity: usize,
    entries: VecDeque<String>,
    /// Sequence number of `entries[0]`.
    first_seq: u64,
    dirty: bool,
}

/// A reader's position in the history. The default starts from the oldest entry held.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cursor(u64);

impl DebugHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                capacity,
                entries: VecDeque::with_capacity(capacity),
                first_seq: 0,
                dirty: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // the history is plain data, a panic elsewhere cannot leave it half-updated
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, text: &[u8]) {
        let text = &text[..text.len().min(MAX_MESSAGE_LENGTH)];
        let mut inner = self.lock();
        if inner.entries.len() == inner.capacity {
            inner.entries.pop_front();
            inner.first_seq += 1;
        }
        inner.entries.push_back(String::from_utf8_lossy(text).into_owned());
        inner.dirty = true;
    }

    /// Returns whether anything arrived since the last call, clearing the flag.
    pub fn take_dirty(&self) -> bool {
        std::mem::take(&mut self.lock().dirty)
    }

    /// A cursor positioned after everything currently held.
    pub fn subscribe(&self) -> Cursor {
        let inner = self.lock();
        Cursor(inner.first_seq + inner.entries.len() as u64)
    }

    /// Messages newer than `cursor`, oldest first. Messages that were
    /// overwritten before the reader got to them are skipped.
    pub fn read_since(&self, cursor: &mut Cursor) -> Vec<String> {
        let inner = self.lock();
        let start = cursor.0.saturating_sub(inner.first_seq) as usize;
        let out: Vec<String> = inner.entries.iter().skip(start).cloned().collect();
        *cursor = Cursor(inner.first_seq + inner.entries.len() as u64);
        out
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DebugHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LEN)
    }
}

impl TelemetrySink for DebugHistory {
    fn publish_debug(&mut self, text: &[u8]) {
        self.push(text);
    }
}
