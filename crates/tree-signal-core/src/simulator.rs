//! Tree Signal simulator
//!
//! Drives a [`TreeSignal`] service with a seeded stream of submits, locks,
//! deletes, clock jumps and decay ticks, checking the tree and layout
//! invariants after every operation. The same seed always replays the same
//! run.

use crate::clock::{Clock, ManualClock};
use crate::config::TreeSignalConfig;
use crate::error::TreeError;
use crate::path::ChannelPath;
use crate::service::TreeSignal;
use crate::types::{MessageSeverity, PanelState};
use chrono::{TimeZone, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

const SEGMENTS: &[&str] = &["api", "auth", "cache", "db", "web"];
const EPSILON: f64 = 1e-6;

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Operations to generate
    pub total_operations: u64,
    /// Relative operation frequencies
    pub operation_distribution: OperationDistribution,
    /// Deepest channel the generator produces
    pub max_generated_depth: usize,
    /// Largest single clock jump, in seconds
    pub max_advance_seconds: f64,
    /// Service configuration under test
    pub service: TreeSignalConfig,
    /// Stop at the first violation instead of collecting all
    pub stop_on_first_violation: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            total_operations: 1_000,
            operation_distribution: OperationDistribution::default(),
            max_generated_depth: 4,
            max_advance_seconds: 15.0,
            service: TreeSignalConfig::default(),
            stop_on_first_violation: true,
        }
    }
}

impl SimulatorConfig {
    /// Override the seed
    #[inline]
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Override the operation count
    #[inline]
    #[must_use]
    pub fn with_operations(mut self, total: u64) -> Self {
        self.total_operations = total;
        self
    }
}

/// Probability distribution for operation generation
#[derive(Debug, Clone)]
pub struct OperationDistribution {
    /// Share of valid submissions
    pub submit: f64,
    /// Share of lock and unlock requests
    pub lock: f64,
    /// Share of subtree deletions
    pub delete: f64,
    /// Share of clock jumps
    pub advance: f64,
    /// Whatever is left goes to malformed input
    pub tick: f64,
}

impl Default for OperationDistribution {
    fn default() -> Self {
        Self {
            submit: 0.45,
            lock: 0.10,
            delete: 0.05,
            advance: 0.20,
            tick: 0.15,
        }
    }
}

/// All operations the simulator can generate
#[derive(Debug, Clone, PartialEq)]
pub enum SimulatedOperation {
    /// Message to a valid channel
    Submit(String),
    /// Set or release a lock
    Lock(String, bool),
    /// Delete a subtree
    Delete(String),
    /// Move the clock forward by seconds
    Advance(f64),
    /// Explicit decay pass
    Tick,
    /// Empty, too deep, or with disallowed characters
    SubmitMalformed(String),
}

/// Expected result classification for an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedResult {
    /// The service must accept it
    ShouldSucceed,
    /// The service must reject it
    ShouldFail,
    /// Depends on decay catching up first
    Either,
}

/// A violation detected during simulation
#[derive(Debug, Clone)]
pub enum Violation {
    /// Operation result disagreed with its classification
    UnexpectedOutcome {
        /// Position in the operation stream
        operation_index: u64,
        /// What was run
        operation: SimulatedOperation,
        /// Classification before running
        expected: ExpectedResult,
        /// What the service returned
        actual: Result<String, String>,
    },
    /// A tree or layout invariant failed
    Invariant(InvariantViolation),
}

/// A specific invariant violation
#[derive(Debug, Clone)]
pub struct InvariantViolation {
    /// Position in the operation stream
    pub operation_index: u64,
    /// Which invariant failed
    pub check: InvariantCheck,
    /// Human-readable specifics
    pub details: String,
}

/// Types of invariant checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantCheck {
    /// Frames tile the unit canvas exactly, or there are none
    FramesCoverCanvas,
    /// No frame leaves the unit square
    FramesInsideCanvas,
    /// Weights stay within `[0, 1]`
    WeightsInRange,
    /// Every node's parent is present
    NoOrphans,
    /// Nothing in the tree sits in `Removed`
    NoRemovedNodes,
    /// An unlocked parent weighs at least as much as each child
    AncestorsDominate,
    /// A locked node keeps its weight
    LockedWeightFrozen,
    /// Published sequences never go backwards
    SequenceIncreases,
}

/// Statistics collected during simulation
#[derive(Debug, Clone, Default)]
pub struct OperationStats {
    /// Operations executed
    pub total_operations: u64,
    /// Operations the service accepted
    pub successful_operations: u64,
    /// Operations the service rejected
    pub failed_operations: u64,
    /// Counts keyed by operation kind
    pub operations_by_type: HashMap<String, u64>,
    /// Largest tree seen
    pub peak_node_count: usize,
}

impl OperationStats {
    /// Count one executed operation
    pub fn record(&mut self, operation: &SimulatedOperation, result: &Result<String, String>) {
        self.total_operations += 1;
        let type_name = format!("{operation:?}")
            .split('(')
            .next()
            .unwrap_or("Unknown")
            .to_string();
        *self.operations_by_type.entry(type_name).or_insert(0) += 1;
        match result {
            Ok(_) => self.successful_operations += 1,
            Err(_) => self.failed_operations += 1,
        }
    }
}

/// Final report from the simulator
#[derive(Debug, Clone)]
pub struct SimulatorReport {
    /// Configuration the run used
    pub config: SimulatorConfig,
    /// Operation counters
    pub stats: OperationStats,
    /// Everything that went wrong
    pub violations: Vec<Violation>,
    /// Channels left at the end
    pub final_node_count: usize,
    /// Frames in the last published layout
    pub final_frame_count: usize,
}

impl SimulatorReport {
    /// Check if simulation passed all criteria
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Generate a text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        report.push_str("=== Tree Signal Simulator Report ===\n\n");
        report.push_str(&format!("Seed: {}\n", self.config.seed));
        report.push_str(&format!("Total Operations: {}\n", self.stats.total_operations));
        report.push_str(&format!("Successful: {}\n", self.stats.successful_operations));
        report.push_str(&format!("Rejected: {}\n", self.stats.failed_operations));
        report.push_str(&format!("Peak Nodes: {}\n", self.stats.peak_node_count));
        report.push_str(&format!("Final Nodes: {}\n", self.final_node_count));
        report.push_str(&format!("Final Frames: {}\n", self.final_frame_count));
        report.push_str(&format!("Violations: {}\n", self.violations.len()));

        if !self.violations.is_empty() {
            report.push_str("\n=== Violations ===\n");
            for (i, v) in self.violations.iter().enumerate() {
                report.push_str(&format!("{}. {:?}\n", i + 1, v));
            }
        }

        report.push_str(&format!(
            "\n=== Result: {} ===\n",
            if self.passed() { "PASS" } else { "FAIL" }
        ));
        report
    }
}

/// Run the simulator
///
/// # Errors
/// [`TreeError::InvalidConfig`] when the embedded service configuration is
/// rejected
pub fn run_simulator(config: SimulatorConfig) -> Result<SimulatorReport, TreeError> {
    let start = Utc
        .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);
    let clock = Arc::new(ManualClock::new(start));
    let service = TreeSignal::new(&config.service, clock.clone())?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut stats = OperationStats::default();
    let mut violations = Vec::new();
    let mut frozen: BTreeMap<ChannelPath, f64> = BTreeMap::new();
    let mut last_sequence = service.current_layout().sequence;

    for i in 0..config.total_operations {
        let known: Vec<ChannelPath> = service.nodes().into_iter().map(|n| n.path).collect();
        let operation = generate_operation(&mut rng, &config, &known);
        let expected = classify_expected_result(&service, &operation);
        let actual = execute_operation(&service, &clock, &operation, &mut frozen);

        let matches = matches!(
            (expected, &actual),
            (ExpectedResult::ShouldSucceed, Ok(_))
                | (ExpectedResult::ShouldFail, Err(_))
                | (ExpectedResult::Either, _)
        );
        if !matches {
            violations.push(Violation::UnexpectedOutcome {
                operation_index: i,
                operation: operation.clone(),
                expected,
                actual: actual.clone(),
            });
            if config.stop_on_first_violation {
                break;
            }
        }

        let found = check_invariants(&service, &mut frozen, &mut last_sequence, i);
        let failed = !found.is_empty();
        violations.extend(found.into_iter().map(Violation::Invariant));
        if failed && config.stop_on_first_violation {
            break;
        }

        stats.record(&operation, &actual);
        stats.peak_node_count = stats.peak_node_count.max(service.len());
    }

    Ok(SimulatorReport {
        final_node_count: service.len(),
        final_frame_count: service.current_layout().frames.len(),
        config,
        stats,
        violations,
    })
}

fn random_path(rng: &mut StdRng, max_depth: usize) -> String {
    let depth = rng.random_range(1..=max_depth.max(1));
    (0..depth)
        .map(|_| SEGMENTS[rng.random_range(0..SEGMENTS.len())])
        .collect::<Vec<_>>()
        .join(".")
}

fn generate_operation(
    rng: &mut StdRng,
    config: &SimulatorConfig,
    known: &[ChannelPath],
) -> SimulatedOperation {
    let d = &config.operation_distribution;
    let r: f64 = rng.random();

    // mostly target existing channels so locks and deletes hit something
    let target = |rng: &mut StdRng| -> String {
        if !known.is_empty() && rng.random_bool(0.8) {
            known[rng.random_range(0..known.len())].to_string()
        } else {
            random_path(rng, config.max_generated_depth)
        }
    };

    if r < d.submit {
        SimulatedOperation::Submit(random_path(rng, config.max_generated_depth))
    } else if r < d.submit + d.lock {
        let path = target(rng);
        SimulatedOperation::Lock(path, rng.random_bool(0.6))
    } else if r < d.submit + d.lock + d.delete {
        SimulatedOperation::Delete(target(rng))
    } else if r < d.submit + d.lock + d.delete + d.advance {
        SimulatedOperation::Advance(rng.random_range(0.0..config.max_advance_seconds))
    } else if r < d.submit + d.lock + d.delete + d.advance + d.tick {
        SimulatedOperation::Tick
    } else {
        let malformed = match rng.random_range(0..3) {
            0 => String::from(" . "),
            1 => "bad segment!".to_string(),
            _ => vec!["deep"; config.service.tree.max_channel_depth + 1].join("."),
        };
        SimulatedOperation::SubmitMalformed(malformed)
    }
}

fn classify_expected_result(
    service: &TreeSignal,
    operation: &SimulatedOperation,
) -> ExpectedResult {
    let exists = |channel: &str| {
        service
            .parse_path(channel)
            .ok()
            .and_then(|path| service.inspect(&path))
            .is_some()
    };
    match operation {
        SimulatedOperation::Submit(_)
        | SimulatedOperation::Advance(_)
        | SimulatedOperation::Tick => ExpectedResult::ShouldSucceed,
        SimulatedOperation::SubmitMalformed(_) => ExpectedResult::ShouldFail,
        // a lock first brings decay up to date, which can prune the target
        SimulatedOperation::Lock(channel, _) => {
            if exists(channel) {
                ExpectedResult::Either
            } else {
                ExpectedResult::ShouldFail
            }
        }
        SimulatedOperation::Delete(channel) => {
            if exists(channel) {
                ExpectedResult::ShouldSucceed
            } else {
                ExpectedResult::ShouldFail
            }
        }
    }
}

fn execute_operation(
    service: &TreeSignal,
    clock: &ManualClock,
    operation: &SimulatedOperation,
    frozen: &mut BTreeMap<ChannelPath, f64>,
) -> Result<String, String> {
    match operation {
        SimulatedOperation::Submit(channel) | SimulatedOperation::SubmitMalformed(channel) => {
            service
                .submit(channel, "simulated", MessageSeverity::Info)
                .map(|receipt| receipt.message_id.to_string())
                .map_err(|e| e.to_string())
        }
        SimulatedOperation::Lock(channel, locked) => {
            let view = service.lock(channel, *locked).map_err(|e| e.to_string())?;
            let path = service.parse_path(channel).map_err(|e| e.to_string())?;
            match view {
                Some(view) if view.locked => {
                    frozen.entry(path).or_insert(view.weight);
                }
                _ => {
                    frozen.remove(&path);
                }
            }
            Ok("locked".to_string())
        }
        SimulatedOperation::Delete(channel) => service
            .delete(channel)
            .map(|report| format!("removed {}", report.removed_nodes))
            .map_err(|e| e.to_string()),
        SimulatedOperation::Advance(secs) => {
            clock.advance_secs(*secs);
            Ok(format!("now {}", clock.now()))
        }
        SimulatedOperation::Tick => {
            let report = service.tick();
            Ok(format!("pruned {}", report.pruned))
        }
    }
}

fn check_invariants(
    service: &TreeSignal,
    frozen: &mut BTreeMap<ChannelPath, f64>,
    last_sequence: &mut u64,
    operation_index: u64,
) -> Vec<InvariantViolation> {
    let mut found = Vec::new();
    let mut fail = |check: InvariantCheck, details: String| {
        found.push(InvariantViolation {
            operation_index,
            check,
            details,
        });
    };

    let layout = service.current_layout();
    if layout.sequence < *last_sequence {
        fail(
            InvariantCheck::SequenceIncreases,
            format!("{} after {}", layout.sequence, last_sequence),
        );
    }
    *last_sequence = layout.sequence;

    let area: f64 = layout.frames.iter().map(|f| f.rect.area()).sum();
    if !layout.frames.is_empty() && (area - 1.0).abs() > EPSILON {
        fail(InvariantCheck::FramesCoverCanvas, format!("total area {area}"));
    }
    for frame in &layout.frames {
        let r = frame.rect;
        if r.x < -EPSILON
            || r.y < -EPSILON
            || r.right() > 1.0 + EPSILON
            || r.bottom() > 1.0 + EPSILON
        {
            fail(InvariantCheck::FramesInsideCanvas, format!("{} at {r:?}", frame.path));
        }
    }

    let nodes = service.nodes();
    let present: HashSet<&ChannelPath> = nodes.iter().map(|n| &n.path).collect();
    let weights: HashMap<&ChannelPath, f64> = nodes.iter().map(|n| (&n.path, n.weight)).collect();

    for node in &nodes {
        if !(0.0..=1.0).contains(&node.weight) {
            fail(InvariantCheck::WeightsInRange, format!("{} = {}", node.path, node.weight));
        }
        if node.state == PanelState::Removed {
            fail(InvariantCheck::NoRemovedNodes, node.path.to_string());
        }
        if let Some(parent) = node.path.parent().filter(|p| !p.is_empty()) {
            if !present.contains(&parent) {
                fail(InvariantCheck::NoOrphans, node.path.to_string());
            } else if let Some(parent_weight) = weights.get(&parent) {
                let parent_locked = nodes.iter().any(|n| n.path == parent && n.locked);
                if !parent_locked && *parent_weight + EPSILON < node.weight {
                    fail(
                        InvariantCheck::AncestorsDominate,
                        format!("{parent} = {parent_weight} < {} = {}", node.path, node.weight),
                    );
                }
            }
        }
    }

    // a lock ends when its node is deleted or faded out after unlocking
    frozen.retain(|path, _| nodes.iter().any(|n| &n.path == path && n.locked));
    for (path, weight) in frozen.iter() {
        if let Some(node) = nodes.iter().find(|n| &n.path == path) {
            if (node.weight - weight).abs() > EPSILON {
                fail(
                    InvariantCheck::LockedWeightFrozen,
                    format!("{path} moved from {weight} to {}", node.weight),
                );
            }
        }
    }

    found
}
