//! Tree Signal service
//!
//! [`TreeSignal`] owns the channel tree, the message store and the decay
//! scheduler behind a single lock. Every mutation recomputes decay at the
//! same instant, takes a snapshot, releases the lock and then publishes a
//! fresh [`LayoutUpdate`] to subscribers.

use crate::clock::Clock;
use crate::config::{DecayConfig, TreeSignalConfig};
use crate::error::{Result, TreeError};
use crate::history::{InMemoryHistory, MessageStore};
use crate::layout::LayoutGenerator;
use crate::path::ChannelPath;
use crate::scheduler::{DecayScheduler, DecayTaskHandle, TickReport};
use crate::tree::{ChannelTree, NodeView, TreeSnapshot};
use crate::types::{LayoutFrame, Message, MessageId, MessageSeverity, Timestamp};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// What triggered a layout publication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateReason {
    /// Placeholder published at construction
    Initial,
    /// A message was accepted
    Message,
    /// A lock was set or released
    Lock,
    /// A subtree was deleted
    Delete,
    /// Periodic decay pass
    Tick,
    /// Decay timings changed
    Reconfigure,
}

/// One published layout
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutUpdate {
    /// Strictly increasing per service
    pub sequence: u64,
    /// What caused this update
    pub reason: UpdateReason,
    /// Decay instant the layout was computed for
    pub generated_at: Timestamp,
    /// Materialized nodes, depth-first in path order
    pub frames: Vec<LayoutFrame>,
}

/// Result of accepting a message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitReceipt {
    /// Id assigned to the accepted message
    pub message_id: MessageId,
    /// Channel the message was recorded under
    pub channel: ChannelPath,
    /// `None` only when the message was already outside the decay window
    pub node: Option<NodeView>,
}

/// Result of deleting a channel subtree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    /// The target plus its descendants
    pub removed_nodes: usize,
    /// History entries dropped with them
    pub removed_messages: usize,
    /// Ancestors left empty and pruned
    pub pruned_ancestors: usize,
}

#[derive(Debug)]
struct State {
    tree: ChannelTree,
    store: Box<dyn MessageStore>,
    scheduler: DecayScheduler,
    sequence: u64,
    /// Set once a decay pass has run inside the current commit
    decayed: bool,
}

impl State {
    fn decay(&mut self, now: Timestamp) -> TickReport {
        self.decayed = true;
        self.store.expire(now);
        self.scheduler.run(&mut self.tree, self.store.as_ref(), now)
    }

    fn require(&self, path: &ChannelPath) -> Result<()> {
        if path.is_empty() || !self.tree.contains(path) {
            return Err(TreeError::NotFound(path.to_string()));
        }
        Ok(())
    }
}

/// Thread-safe handle over the channel tree
pub struct TreeSignal {
    state: Mutex<State>,
    generator: LayoutGenerator,
    clock: Arc<dyn Clock>,
    max_depth: usize,
    cleanup_interval: Duration,
    updates: watch::Sender<Arc<LayoutUpdate>>,
}

impl std::fmt::Debug for TreeSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeSignal")
            .field("generator", &self.generator)
            .field("clock", &self.clock)
            .field("max_depth", &self.max_depth)
            .field("cleanup_interval", &self.cleanup_interval)
            .finish_non_exhaustive()
    }
}

impl TreeSignal {
    /// Create a service backed by bounded in-memory history
    ///
    /// # Errors
    /// [`TreeError::InvalidConfig`] for unusable decay settings
    pub fn new(config: &TreeSignalConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let store = InMemoryHistory::new(config.history.max_messages, config.decay.hold_seconds);
        Self::with_store(config, clock, Box::new(store))
    }

    /// Create a service over a caller-supplied message store
    ///
    /// # Errors
    /// [`TreeError::InvalidConfig`] for unusable decay settings
    pub fn with_store(
        config: &TreeSignalConfig,
        clock: Arc<dyn Clock>,
        mut store: Box<dyn MessageStore>,
    ) -> Result<Self> {
        let scheduler = DecayScheduler::new(config.decay)?;
        store.set_retention(config.decay.hold_seconds);
        let (updates, _) = watch::channel(Arc::new(LayoutUpdate {
            sequence: 0,
            reason: UpdateReason::Initial,
            generated_at: clock.now(),
            frames: Vec::new(),
        }));

        Ok(Self {
            state: Mutex::new(State {
                tree: ChannelTree::new(config.tree.max_channel_depth),
                store,
                scheduler,
                sequence: 0,
                decayed: false,
            }),
            generator: LayoutGenerator::from_config(&config.layout),
            clock,
            max_depth: config.tree.max_channel_depth,
            cleanup_interval: config.cleanup.interval(),
            updates,
        })
    }

    /// Time source driving decay
    #[inline]
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Parse a dotted channel name against this service's depth limit
    ///
    /// # Errors
    /// [`TreeError::InvalidPath`]
    pub fn parse_path(&self, channel: &str) -> Result<ChannelPath> {
        Ok(ChannelPath::parse(channel, self.max_depth)?)
    }

    /// Accept a message stamped with the current time
    ///
    /// # Errors
    /// [`TreeError::InvalidPath`] for an empty, malformed or too-deep channel
    pub fn submit(
        &self,
        channel: &str,
        payload: impl Into<String>,
        severity: MessageSeverity,
    ) -> Result<SubmitReceipt> {
        let at = self.clock.now();
        self.submit_at(channel, payload, severity, at)
    }

    /// Accept a message with an explicit receive time
    ///
    /// # Errors
    /// [`TreeError::InvalidPath`] for an empty, malformed or too-deep channel
    pub fn submit_at(
        &self,
        channel: &str,
        payload: impl Into<String>,
        severity: MessageSeverity,
        at: Timestamp,
    ) -> Result<SubmitReceipt> {
        let path = self.parse_path(channel)?;
        self.submit_message(Message::new(path, payload, severity, at))
    }

    /// Accept a fully built message
    ///
    /// # Errors
    /// [`TreeError::InvalidPath`] when the channel is the root or too deep
    pub fn submit_message(&self, message: Message) -> Result<SubmitReceipt> {
        let channel = message.channel.clone();
        let message_id = message.id.clone();
        tracing::debug!(channel = %channel, severity = ?message.severity, "message received");

        self.commit(UpdateReason::Message, |state, now| {
            state.tree.record_message(&message.channel, message.received_at)?;
            state.store.append(message);
            state.decay(now);
            Ok(())
        })?;

        Ok(SubmitReceipt {
            node: self.inspect(&channel),
            message_id,
            channel,
        })
    }

    /// Freeze or release decay on an existing channel
    ///
    /// Returns the node afterwards; `None` when releasing the lock let the
    /// channel fade out immediately.
    ///
    /// # Errors
    /// [`TreeError::InvalidPath`], or [`TreeError::NotFound`] when the
    /// channel is not in the tree. A channel that has already faded by now is
    /// also `NotFound`; the pruned tree is still published in that case.
    pub fn lock(&self, channel: &str, locked: bool) -> Result<Option<NodeView>> {
        let path = self.parse_path(channel)?;
        self.commit(UpdateReason::Lock, |state, now| {
            state.require(&path)?;
            // bring the weight up to date so the lock freezes the current value
            state.decay(now);
            state.tree.set_lock(&path, locked)?;
            state.decay(now);
            Ok(())
        })?;
        tracing::info!(channel = %path, locked, "channel lock changed");
        Ok(self.inspect(&path))
    }

    /// Remove a channel, its descendants and their history
    ///
    /// # Errors
    /// [`TreeError::InvalidPath`], or [`TreeError::NotFound`] when the
    /// channel is not in the tree
    pub fn delete(&self, channel: &str) -> Result<DeleteReport> {
        let path = self.parse_path(channel)?;
        let report = self.commit(UpdateReason::Delete, |state, now| {
            let outcome = state.tree.delete_subtree(&path, now)?;
            let removed_messages = state.store.remove_subtree(&path);
            state.decay(now);
            Ok(DeleteReport {
                removed_nodes: outcome.removed,
                removed_messages,
                pruned_ancestors: outcome.pruned_ancestors,
            })
        })?;
        tracing::info!(
            channel = %path,
            nodes = report.removed_nodes,
            messages = report.removed_messages,
            "channel deleted"
        );
        Ok(report)
    }

    /// Run one decay pass at the current time and publish the result
    pub fn tick(&self) -> TickReport {
        self.commit(UpdateReason::Tick, |state, now| Ok(state.decay(now)))
            .unwrap_or_else(|err| {
                tracing::error!(error = %err, "decay pass failed");
                TickReport::default()
            })
    }

    /// Current hold/decay timings
    #[must_use]
    pub fn decay_settings(&self) -> DecayConfig {
        self.state.lock().scheduler.config()
    }

    /// Change hold/decay timings at runtime
    ///
    /// # Errors
    /// [`TreeError::InvalidConfig`] unless both values are positive; nothing
    /// changes in that case
    pub fn set_decay(&self, hold_seconds: f64, decay_seconds: f64) -> Result<DecayConfig> {
        let config = self.commit(UpdateReason::Reconfigure, |state, now| {
            let config = state.scheduler.set_decay(hold_seconds, decay_seconds)?;
            state.store.set_retention(config.hold_seconds);
            state.decay(now);
            Ok(config)
        })?;
        tracing::info!(hold_seconds, decay_seconds, "decay settings updated");
        Ok(config)
    }

    /// Detached view of one node
    #[must_use]
    pub fn inspect(&self, path: &ChannelPath) -> Option<NodeView> {
        self.state.lock().tree.get(path).map(|node| node.view())
    }

    /// Every node, depth-first in path order
    #[must_use]
    pub fn nodes(&self) -> Vec<NodeView> {
        self.state.lock().tree.iter().map(|node| node.view()).collect()
    }

    /// Stored messages for exactly `channel`, oldest first
    ///
    /// # Errors
    /// [`TreeError::InvalidPath`]
    pub fn history(&self, channel: &str) -> Result<Vec<Message>> {
        let path = self.parse_path(channel)?;
        Ok(self.state.lock().store.messages(&path))
    }

    /// Read-only copy of the current tree
    #[must_use]
    pub fn snapshot(&self) -> TreeSnapshot {
        self.state.lock().tree.snapshot()
    }

    /// Number of channel nodes
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().tree.len()
    }

    /// Whether no channel is present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most recently published layout
    #[must_use]
    pub fn current_layout(&self) -> Arc<LayoutUpdate> {
        self.updates.borrow().clone()
    }

    /// Receive every layout published from now on
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<LayoutUpdate>> {
        self.updates.subscribe()
    }

    /// Start the periodic decay task at the configured cleanup interval
    #[must_use]
    pub fn start_decay_task(self: &Arc<Self>) -> DecayTaskHandle {
        let (tx, rx) = watch::channel(false);
        let join = self.spawn_decay_task(self.cleanup_interval, rx);
        DecayTaskHandle::new(tx, join)
    }

    /// Tick every `period` until `shutdown` turns true or its sender goes
    /// away; resolves to the number of ticks run
    pub fn spawn_decay_task(
        self: &Arc<Self>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<u64> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut ticks = 0u64;
            tracing::debug!(period_ms = period.as_millis() as u64, "decay task started");
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        service.tick();
                        ticks += 1;
                    }
                }
            }
            tracing::debug!(ticks, "decay task stopped");
            ticks
        })
    }

    /// Run `mutate` under the lock and publish the resulting tree
    ///
    /// A failed operation publishes nothing unless it had already run a decay
    /// pass, since that pass may have reshaped the tree.
    fn commit<T, F>(&self, reason: UpdateReason, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut State, Timestamp) -> Result<T, TreeError>,
    {
        let now = self.clock.now();
        let (outcome, snapshot, sequence) = {
            let mut state = self.state.lock();
            state.decayed = false;
            let outcome = mutate(&mut *state, now);
            if outcome.is_err() && !state.decayed {
                return outcome;
            }
            state.sequence += 1;
            (outcome, state.tree.snapshot(), state.sequence)
        };
        self.publish(sequence, reason, &snapshot, now);
        outcome
    }

    fn publish(
        &self,
        sequence: u64,
        reason: UpdateReason,
        snapshot: &TreeSnapshot,
        generated_at: Timestamp,
    ) {
        let update = Arc::new(LayoutUpdate {
            sequence,
            reason,
            generated_at,
            frames: self.generator.generate(snapshot, generated_at),
        });
        // concurrent commits may finish out of order; keep the newest
        self.updates.send_if_modified(|current| {
            if current.sequence < sequence {
                *current = update;
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::types::PanelState;
    use chrono::{TimeZone, Utc};

    fn service() -> (TreeSignal, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        let service = TreeSignal::new(&TreeSignalConfig::default(), clock.clone()).unwrap();
        (service, clock)
    }

    #[test]
    fn initial_layout_is_empty() {
        let (service, _) = service();
        let layout = service.current_layout();
        assert_eq!(layout.sequence, 0);
        assert_eq!(layout.reason, UpdateReason::Initial);
        assert!(layout.frames.is_empty());
    }

    #[test]
    fn submit_publishes_layout() {
        let (service, _) = service();
        let receipt = service.submit("a.b", "hello", MessageSeverity::Warn).unwrap();
        assert_eq!(receipt.channel.to_string(), "a.b");
        assert_eq!(receipt.message_id.0.len(), 32);
        assert_eq!(receipt.node.unwrap().state, PanelState::Active);

        let layout = service.current_layout();
        assert_eq!(layout.sequence, 1);
        assert_eq!(layout.reason, UpdateReason::Message);
        assert_eq!(layout.frames.len(), 2);
        assert_eq!(service.history("a.b").unwrap().len(), 1);
    }

    #[test]
    fn rejected_submit_does_not_publish() {
        let (service, _) = service();
        assert!(matches!(
            service.submit("  ", "x", MessageSeverity::Info),
            Err(TreeError::InvalidPath(_))
        ));
        assert!(service.submit("a.b.c.d.e.f.g.h.i", "x", MessageSeverity::Info).is_err());
        assert_eq!(service.current_layout().sequence, 0);
        assert!(service.is_empty());
    }

    #[test]
    fn lock_unknown_channel_is_not_found() {
        let (service, _) = service();
        assert!(matches!(service.lock("ghost", true), Err(TreeError::NotFound(_))));
        assert!(matches!(service.delete("ghost"), Err(TreeError::NotFound(_))));
    }

    #[test]
    fn lock_unknown_channel_leaves_tree_and_layout_alone() {
        let (service, clock) = service();
        service.submit("a", "x", MessageSeverity::Info).unwrap();
        clock.advance_secs(45.0);

        assert!(matches!(service.lock("ghost", true), Err(TreeError::NotFound(_))));
        assert_eq!(service.len(), 1);
        let layout = service.current_layout();
        assert_eq!(layout.sequence, 1);
        assert_eq!(layout.frames.len(), 1);
    }

    #[test]
    fn lock_on_faded_channel_publishes_the_pruned_tree() {
        let (service, clock) = service();
        service.submit("a", "x", MessageSeverity::Info).unwrap();
        clock.advance_secs(45.0);

        assert!(matches!(service.lock("a", true), Err(TreeError::NotFound(_))));
        assert!(service.is_empty());
        let layout = service.current_layout();
        assert_eq!(layout.sequence, 2);
        assert_eq!(layout.reason, UpdateReason::Lock);
        assert!(layout.frames.is_empty());
    }

    #[test]
    fn oversized_decay_is_rejected_without_panicking() {
        let (service, _) = service();
        service.submit("a", "x", MessageSeverity::Info).unwrap();
        assert!(matches!(
            service.set_decay(1.0e13, 1.0),
            Err(TreeError::InvalidConfig(_))
        ));
        assert_eq!(service.decay_settings(), DecayConfig::default());
        assert_eq!(service.tick().skipped, 0);
    }

    #[test]
    fn delete_removes_history_and_empty_ancestors() {
        let (service, _) = service();
        service.submit("a.b.c", "x", MessageSeverity::Info).unwrap();
        service.submit("a.b.c.d", "y", MessageSeverity::Info).unwrap();

        let report = service.delete("a.b").unwrap();
        assert_eq!(report.removed_nodes, 3);
        assert_eq!(report.removed_messages, 2);
        assert_eq!(report.pruned_ancestors, 1);
        assert!(service.is_empty());
        assert!(service.history("a.b.c").unwrap().is_empty());
        assert_eq!(service.current_layout().reason, UpdateReason::Delete);
    }

    #[test]
    fn set_decay_validates() {
        let (service, _) = service();
        assert!(matches!(service.set_decay(0.0, 5.0), Err(TreeError::InvalidConfig(_))));
        assert_eq!(service.decay_settings(), DecayConfig::default());
        assert_eq!(service.set_decay(5.0, 5.0).unwrap(), DecayConfig::new(5.0, 5.0));
    }

    #[test]
    fn shortening_decay_applies_immediately() {
        let (service, clock) = service();
        service.submit("a", "x", MessageSeverity::Info).unwrap();
        clock.advance_secs(12.0);
        service.set_decay(5.0, 5.0).unwrap();
        assert!(service.is_empty());
    }

    #[test]
    fn sequences_increase() {
        let (service, _) = service();
        let mut rx = service.subscribe();
        service.submit("a", "x", MessageSeverity::Info).unwrap();
        service.tick();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().sequence, 2);
    }
}
