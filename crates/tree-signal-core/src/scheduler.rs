//! Decay scheduling
//!
//! [`DecayScheduler`] is the pure part: given a tree, the message store and an
//! instant it recomputes every node's weight and state and prunes what has
//! fully faded. The periodic background task lives on
//! [`TreeSignal`](crate::service::TreeSignal) and is controlled through
//! [`DecayTaskHandle`].

use crate::clock::{elapsed_secs, seconds};
use crate::config::DecayConfig;
use crate::error::{DecayError, TreeError};
use crate::history::MessageStore;
use crate::state_machine::validate_transition;
use crate::tree::ChannelTree;
use crate::types::{PanelState, Timestamp};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Summary of one decay pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Nodes visited
    pub sampled: usize,
    /// Nodes left in `Fading`
    pub fading: usize,
    /// Nodes removed from the tree
    pub pruned: usize,
    /// Nodes left untouched because sampling them failed
    pub skipped: usize,
    /// Per-node failures, one per skipped node
    pub errors: Vec<DecayError>,
}

impl TickReport {
    /// Whether the pass changed the tree's shape
    #[inline]
    #[must_use]
    pub fn pruned_any(&self) -> bool {
        self.pruned > 0
    }
}

/// Applies the decay model to a channel tree
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayScheduler {
    config: DecayConfig,
}

impl DecayScheduler {
    /// # Errors
    /// [`TreeError::InvalidConfig`] unless both durations are positive
    pub fn new(config: DecayConfig) -> Result<Self, TreeError> {
        config.validate().map_err(TreeError::InvalidConfig)?;
        Ok(Self { config })
    }

    /// Current timings
    #[inline]
    #[must_use]
    pub fn config(&self) -> DecayConfig {
        self.config
    }

    /// Replace hold/decay timings
    ///
    /// # Errors
    /// [`TreeError::InvalidConfig`] unless both durations are positive; the
    /// current settings are kept
    pub fn set_decay(
        &mut self,
        hold_seconds: f64,
        decay_seconds: f64,
    ) -> Result<DecayConfig, TreeError> {
        let config = DecayConfig::new(hold_seconds, decay_seconds);
        config.validate().map_err(TreeError::InvalidConfig)?;
        self.config = config;
        Ok(config)
    }

    /// State and weight for a node whose last own message was `elapsed`
    /// seconds ago
    #[must_use]
    pub fn phase(&self, elapsed: f64) -> (PanelState, f64) {
        let DecayConfig {
            hold_seconds,
            decay_seconds,
        } = self.config;
        if elapsed <= hold_seconds {
            (PanelState::Active, 1.0)
        } else if elapsed <= hold_seconds + decay_seconds {
            let weight = 1.0 - (elapsed - hold_seconds) / decay_seconds;
            (PanelState::Fading, weight.clamp(0.0, 1.0))
        } else {
            (PanelState::Removed, 0.0)
        }
    }

    /// Instant at which a node last messaged at `last` reaches `Removed`;
    /// `None` past the end of representable time
    #[must_use]
    pub fn fade_deadline(&self, last: Timestamp) -> Option<Timestamp> {
        last.checked_add_signed(seconds(self.config.window_seconds()))
    }

    /// Recompute every node bottom-up and prune fully faded leaves
    ///
    /// Locked nodes keep their weight and state. A node with no own messages
    /// takes the most active state and the largest weight among its
    /// children. A node whose last message lies in the future is reported as
    /// [`DecayError::ClockSkew`] and left as it was.
    pub fn run(
        &self,
        tree: &mut ChannelTree,
        store: &dyn MessageStore,
        now: Timestamp,
    ) -> TickReport {
        let mut report = TickReport::default();

        for id in tree.post_order() {
            let Some(node) = tree.node(id) else { continue };
            report.sampled += 1;
            let holding = store.has_live_messages(&node.path, now);

            if node.locked {
                if let Some(node) = tree.node_mut(id) {
                    node.holding_messages = holding;
                }
                continue;
            }

            let (own_state, own_weight) = match node.last_message_at {
                None => (PanelState::Removed, 0.0),
                Some(at) if at > now => {
                    let err = DecayError::ClockSkew {
                        path: node.path.to_string(),
                        ahead_ms: (at - now).num_milliseconds(),
                    };
                    tracing::warn!(error = %err, "skipping node during decay pass");
                    report.skipped += 1;
                    report.errors.push(err);
                    continue;
                }
                Some(_) if holding => (PanelState::Active, 1.0),
                Some(at) => self.phase(elapsed_secs(at, now)),
            };

            let (state, weight) = node
                .child_ids()
                .filter_map(|child| tree.node(child))
                .fold((own_state, own_weight), |(state, weight), child| {
                    (state.most_active(child.state), weight.max(child.weight))
                });

            if state != node.state {
                if let Err(err) = validate_transition(node.state, state) {
                    tracing::warn!(
                        channel = %node.path,
                        error = %err,
                        "skipping node during decay pass"
                    );
                    report.skipped += 1;
                    continue;
                }
            }

            let fade_deadline = match node.last_message_at {
                Some(at) if !holding => self.fade_deadline(at),
                _ => None,
            };

            if state == PanelState::Removed && node.child_count() == 0 {
                tracing::info!(channel = %node.path, "channel faded out");
                report.pruned += tree.detach_subtree(id);
                continue;
            }

            if let Some(node) = tree.node_mut(id) {
                node.state = state;
                node.weight = weight;
                node.holding_messages = holding;
                node.fade_deadline = fade_deadline;
            }
            if state == PanelState::Fading {
                report.fading += 1;
            }
        }

        if report.pruned > 0 || report.skipped > 0 {
            tracing::debug!(
                sampled = report.sampled,
                fading = report.fading,
                pruned = report.pruned,
                skipped = report.skipped,
                "decay pass complete"
            );
        }
        report
    }
}

/// Control for a running background decay task
#[derive(Debug)]
pub struct DecayTaskHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<u64>,
}

impl DecayTaskHandle {
    pub(crate) fn new(shutdown: watch::Sender<bool>, join: JoinHandle<u64>) -> Self {
        Self { shutdown, join }
    }

    /// Ask the task to stop after its current tick
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Whether the task has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop the task and wait for it; returns the number of ticks it ran
    pub async fn stop(self) -> u64 {
        self.shutdown();
        match self.join.await {
            Ok(ticks) => ticks,
            Err(err) => {
                tracing::warn!(error = %err, "decay task did not shut down cleanly");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::InMemoryHistory;
    use crate::path::ChannelPath;
    use crate::types::{Message, MessageSeverity};
    use chrono::{TimeZone, Utc};

    fn t(secs: f64) -> Timestamp {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + seconds(secs)
    }

    fn p(s: &str) -> ChannelPath {
        s.parse().unwrap()
    }

    fn scheduler() -> DecayScheduler {
        DecayScheduler::new(DecayConfig::new(30.0, 10.0)).unwrap()
    }

    fn submit(tree: &mut ChannelTree, store: &mut InMemoryHistory, path: &str, at: f64) {
        let path = p(path);
        tree.record_message(&path, t(at)).unwrap();
        store.append(Message::new(path, "x", MessageSeverity::Info, t(at)));
    }

    #[test]
    fn phase_boundaries() {
        let s = scheduler();
        assert_eq!(s.phase(0.0), (PanelState::Active, 1.0));
        assert_eq!(s.phase(30.0), (PanelState::Active, 1.0));
        assert_eq!(s.phase(35.0), (PanelState::Fading, 0.5));
        assert_eq!(s.phase(40.0), (PanelState::Fading, 0.0));
        assert_eq!(s.phase(40.5), (PanelState::Removed, 0.0));
    }

    #[test]
    fn invalid_decay_rejected() {
        assert!(DecayScheduler::new(DecayConfig::new(0.0, 10.0)).is_err());
        let mut s = scheduler();
        assert!(matches!(s.set_decay(5.0, -1.0), Err(TreeError::InvalidConfig(_))));
        assert_eq!(s.config(), DecayConfig::new(30.0, 10.0));
        assert_eq!(s.set_decay(5.0, 2.0).unwrap(), DecayConfig::new(5.0, 2.0));
    }

    #[test]
    fn decay_then_prune_whole_chain() {
        let s = scheduler();
        let mut tree = ChannelTree::new(8);
        let mut store = InMemoryHistory::new(100, 30.0);
        submit(&mut tree, &mut store, "this.that.other", 0.0);

        s.run(&mut tree, &store, t(0.0));
        assert_eq!(tree.get(&p("this")).unwrap().weight(), 1.0);
        assert_eq!(tree.get(&p("this")).unwrap().state(), PanelState::Active);

        let report = s.run(&mut tree, &store, t(35.0));
        let leaf = tree.get(&p("this.that.other")).unwrap();
        assert_eq!(leaf.state(), PanelState::Fading);
        assert!((leaf.weight() - 0.5).abs() < 1e-9);
        assert_eq!(leaf.fade_deadline(), Some(t(40.0)));
        assert_eq!(tree.get(&p("this")).unwrap().state(), PanelState::Fading);
        assert_eq!(report.fading, 3);

        let report = s.run(&mut tree, &store, t(41.0));
        assert_eq!(report.pruned, 3);
        assert!(tree.is_empty());
    }

    #[test]
    fn sibling_activity_keeps_parent_alive() {
        let s = scheduler();
        let mut tree = ChannelTree::new(8);
        let mut store = InMemoryHistory::new(100, 30.0);
        submit(&mut tree, &mut store, "a.old", 0.0);
        submit(&mut tree, &mut store, "a.new", 20.0);

        s.run(&mut tree, &store, t(45.0));
        assert!(!tree.contains(&p("a.old")));
        let a = tree.get(&p("a")).unwrap();
        assert_eq!(a.state(), PanelState::Active);
        assert_eq!(a.weight(), 1.0);
    }

    #[test]
    fn locked_node_is_frozen() {
        let s = scheduler();
        let mut tree = ChannelTree::new(8);
        let mut store = InMemoryHistory::new(100, 30.0);
        submit(&mut tree, &mut store, "a.b", 0.0);
        s.run(&mut tree, &store, t(0.0));
        tree.set_lock(&p("a.b"), true).unwrap();

        s.run(&mut tree, &store, t(100.0));
        let b = tree.get(&p("a.b")).unwrap();
        assert_eq!(b.state(), PanelState::Active);
        assert_eq!(b.weight(), 1.0);
        assert!(tree.contains(&p("a")));

        tree.set_lock(&p("a.b"), false).unwrap();
        s.run(&mut tree, &store, t(100.0));
        assert!(tree.is_empty());
    }

    #[test]
    fn future_timestamp_is_skipped_not_fatal() {
        let s = scheduler();
        let mut tree = ChannelTree::new(8);
        let mut store = InMemoryHistory::new(100, 30.0);
        submit(&mut tree, &mut store, "skewed", 60.0);
        submit(&mut tree, &mut store, "stale", 0.0);

        let report = s.run(&mut tree, &store, t(50.0));
        assert_eq!(report.skipped, 1);
        assert!(matches!(
            report.errors.as_slice(),
            [DecayError::ClockSkew { path, ahead_ms: 10_000 }] if path == "skewed"
        ));
        assert!(tree.contains(&p("skewed")));
        assert!(!tree.contains(&p("stale")));
    }

    #[test]
    fn message_during_fade_resets() {
        let s = scheduler();
        let mut tree = ChannelTree::new(8);
        let mut store = InMemoryHistory::new(100, 30.0);
        submit(&mut tree, &mut store, "a", 0.0);
        s.run(&mut tree, &store, t(35.0));
        assert_eq!(tree.get(&p("a")).unwrap().state(), PanelState::Fading);

        submit(&mut tree, &mut store, "a", 36.0);
        s.run(&mut tree, &store, t(36.0));
        let a = tree.get(&p("a")).unwrap();
        assert_eq!(a.state(), PanelState::Active);
        assert_eq!(a.weight(), 1.0);
        assert_eq!(a.fade_deadline(), None);
    }
}
