//! Message history
//!
//! The channel tree only needs two facts from persistence: whether a channel
//! currently holds a live message, and when its most recent one arrived.
//! [`MessageStore`] is that seam; [`InMemoryHistory`] is the bounded
//! in-process implementation.

use crate::clock::{elapsed_secs, seconds};
use crate::path::ChannelPath;
use crate::types::{Message, Timestamp};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Default per-channel bound
pub const MAX_HISTORY: usize = 100;

/// Persistence collaborator for channel messages
pub trait MessageStore: Send + std::fmt::Debug {
    /// Store a message under its channel
    fn append(&mut self, message: Message);

    /// Messages for exactly this channel, oldest first
    fn messages(&self, path: &ChannelPath) -> Vec<Message>;

    /// Whether `path` holds at least one message inside the retention window
    fn has_live_messages(&self, path: &ChannelPath, now: Timestamp) -> bool;

    /// Timestamp of the most recent message for exactly this channel
    fn latest(&self, path: &ChannelPath) -> Option<Timestamp>;

    /// Drop messages for `path` and every descendant; returns how many
    fn remove_subtree(&mut self, path: &ChannelPath) -> usize;

    /// Drop messages older than the retention window; returns how many
    fn expire(&mut self, now: Timestamp) -> usize;

    /// Change the retention window
    fn set_retention(&mut self, retention_secs: f64);
}

/// Messages for one channel in arrival order, plus the newest receive time
#[derive(Debug, Default)]
struct Ring {
    messages: VecDeque<(u64, Message)>,
    newest: Option<Timestamp>,
}

impl Ring {
    fn refresh_newest(&mut self) {
        self.newest = self.messages.iter().map(|(_, m)| m.received_at).max();
    }
}

/// Bounded in-memory ring per channel
///
/// Every stored message is also indexed by `(received_at, seq)`, so expiry
/// walks only the messages that are actually leaving the window.
#[derive(Debug)]
pub struct InMemoryHistory {
    channels: HashMap<ChannelPath, Ring>,
    by_age: BTreeMap<(Timestamp, u64), ChannelPath>,
    next_seq: u64,
    max_messages: usize,
    retention_secs: f64,
}

impl InMemoryHistory {
    /// Keep at most `max_messages` per channel, live for `retention_secs`
    #[must_use]
    pub fn new(max_messages: usize, retention_secs: f64) -> Self {
        Self {
            channels: HashMap::new(),
            by_age: BTreeMap::new(),
            next_seq: 0,
            max_messages: max_messages.max(1),
            retention_secs,
        }
    }

    /// Drop one indexed message from its ring
    fn evict(&mut self, received_at: Timestamp, seq: u64, path: &ChannelPath) {
        let Some(ring) = self.channels.get_mut(path) else { return };
        if let Some(pos) = ring.messages.iter().position(|(s, _)| *s == seq) {
            ring.messages.remove(pos);
        }
        if ring.messages.is_empty() {
            self.channels.remove(path);
        } else if ring.newest == Some(received_at) {
            ring.refresh_newest();
        }
    }
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::new(MAX_HISTORY, 30.0)
    }
}

impl MessageStore for InMemoryHistory {
    fn append(&mut self, message: Message) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let max = self.max_messages;
        let ring = self
            .channels
            .entry(message.channel.clone())
            .or_insert_with(|| Ring {
                messages: VecDeque::with_capacity(max.min(16)),
                newest: None,
            });

        let mut refresh = false;
        if ring.messages.len() == max {
            if let Some((old_seq, old)) = ring.messages.pop_front() {
                self.by_age.remove(&(old.received_at, old_seq));
                refresh = ring.newest == Some(old.received_at);
            }
        }

        let at = message.received_at;
        self.by_age.insert((at, seq), message.channel.clone());
        ring.messages.push_back((seq, message));
        if refresh {
            ring.refresh_newest();
        } else {
            ring.newest = Some(ring.newest.map_or(at, |newest| newest.max(at)));
        }
    }

    fn messages(&self, path: &ChannelPath) -> Vec<Message> {
        self.channels
            .get(path)
            .map(|ring| ring.messages.iter().map(|(_, m)| m.clone()).collect())
            .unwrap_or_default()
    }

    fn has_live_messages(&self, path: &ChannelPath, now: Timestamp) -> bool {
        self.latest(path)
            .is_some_and(|at| elapsed_secs(at, now) <= self.retention_secs)
    }

    fn latest(&self, path: &ChannelPath) -> Option<Timestamp> {
        self.channels.get(path).and_then(|ring| ring.newest)
    }

    fn remove_subtree(&mut self, path: &ChannelPath) -> usize {
        let doomed: Vec<ChannelPath> = self
            .channels
            .keys()
            .filter(|key| path.is_prefix_of(key))
            .cloned()
            .collect();
        let mut removed = 0;
        for key in doomed {
            if let Some(ring) = self.channels.remove(&key) {
                removed += ring.messages.len();
                for (seq, message) in ring.messages {
                    self.by_age.remove(&(message.received_at, seq));
                }
            }
        }
        removed
    }

    fn expire(&mut self, now: Timestamp) -> usize {
        // a window reaching past the start of time keeps everything
        let Some(cutoff) = now.checked_sub_signed(seconds(self.retention_secs)) else {
            return 0;
        };
        let mut removed = 0;
        while let Some(entry) = self.by_age.first_entry() {
            if entry.key().0 >= cutoff {
                break;
            }
            let ((at, seq), path) = entry.remove_entry();
            self.evict(at, seq, &path);
            removed += 1;
        }
        removed
    }

    fn set_retention(&mut self, retention_secs: f64) {
        self.retention_secs = retention_secs;
    }
}
