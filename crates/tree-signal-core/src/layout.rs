//! Layout generation
//!
//! Converts a [`TreeSnapshot`] into rectangles on the unit canvas. Each
//! non-leaf node keeps a strip for its own panel and hands the rest of its
//! region to its children, split in proportion to their weights. Leaves take
//! their whole region.
//!
//! Generation is a pure function of the snapshot and the generator settings.

use crate::config::LayoutConfig;
use crate::tree::{SnapshotNode, TreeSnapshot};
use crate::types::{LayoutFrame, LayoutRect, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Self-strip share for a node holding its own live messages
pub const PARENT_FRACTION_WITH_MESSAGES: f64 = 0.5;

/// Self-strip share for a node that only aggregates its children
pub const PARENT_FRACTION_EMPTY: f64 = 0.2;

/// Default floor on a child's share of its parent's children region
pub const DEFAULT_MIN_EXTENT: f64 = 0.02;

/// How nested regions are oriented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitAxis {
    /// Self strip on top, children side by side at every depth
    #[default]
    Fixed,
    /// As `Fixed` on even depths; on odd depths the self strip sits on the
    /// left and children stack vertically
    Alternate,
}

impl fmt::Display for SplitAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitAxis::Fixed => f.write_str("fixed"),
            SplitAxis::Alternate => f.write_str("alternate"),
        }
    }
}

impl FromStr for SplitAxis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(SplitAxis::Fixed),
            "alternate" => Ok(SplitAxis::Alternate),
            other => Err(format!("unknown split axis '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Orientation {
    /// Self strip on top, children laid out along x
    SelfTop,
    /// Self strip on the left, children laid out along y
    SelfLeft,
}

/// Pure snapshot-to-frames transformation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutGenerator {
    min_extent: f64,
    split: SplitAxis,
}

impl Default for LayoutGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_EXTENT, SplitAxis::Fixed)
    }
}

impl LayoutGenerator {
    /// `min_extent` is clamped into `[0, 1]`
    #[must_use]
    pub fn new(min_extent: f64, split: SplitAxis) -> Self {
        Self {
            min_extent: min_extent.clamp(0.0, 1.0),
            split,
        }
    }

    /// Generator for the `[layout]` config section
    #[must_use]
    pub fn from_config(config: &LayoutConfig) -> Self {
        Self::new(config.min_extent, config.split)
    }

    /// Floor on a child's share
    #[inline]
    #[must_use]
    pub fn min_extent(&self) -> f64 {
        self.min_extent
    }

    /// Configured orientation
    #[inline]
    #[must_use]
    pub fn split(&self) -> SplitAxis {
        self.split
    }

    /// Frames for every materialized node, in depth-first lexicographic order
    ///
    /// The synthetic root gets no frame; its children share the full canvas
    /// side by side.
    #[must_use]
    pub fn generate(&self, snapshot: &TreeSnapshot, generated_at: Timestamp) -> Vec<LayoutFrame> {
        let mut frames = Vec::with_capacity(snapshot.len());
        let top_level = materialized_children(snapshot, snapshot.root());
        self.place_children(
            snapshot,
            &top_level,
            LayoutRect::FULL,
            Orientation::SelfTop,
            0,
            generated_at,
            &mut frames,
        );
        frames
    }

    /// Shares of a children region for the given weights
    ///
    /// Proportional to weight, each at least `min_extent`, summing to one.
    /// Falls back to equal shares when every weight is zero or the floor
    /// cannot be honoured for all children.
    #[must_use]
    pub fn partition(&self, weights: &[f64]) -> Vec<f64> {
        let n = weights.len();
        if n == 0 {
            return Vec::new();
        }
        #[allow(clippy::cast_precision_loss)]
        let count = n as f64;
        let weights: Vec<f64> = weights
            .iter()
            .map(|w| if w.is_finite() { w.max(0.0) } else { 0.0 })
            .collect();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 || count * self.min_extent >= 1.0 {
            return vec![1.0 / count; n];
        }

        let min = self.min_extent;
        let mut floored = vec![false; n];
        loop {
            #[allow(clippy::cast_precision_loss)]
            let floored_share = floored.iter().filter(|f| **f).count() as f64 * min;
            let free_weight: f64 = weights
                .iter()
                .zip(&floored)
                .filter(|(_, f)| !**f)
                .map(|(w, _)| *w)
                .sum();
            let mut changed = false;
            for i in 0..n {
                if !floored[i] && (1.0 - floored_share) * weights[i] / free_weight < min {
                    floored[i] = true;
                    changed = true;
                }
            }
            if !changed {
                return weights
                    .iter()
                    .zip(&floored)
                    .map(|(w, f)| {
                        if *f {
                            min
                        } else {
                            (1.0 - floored_share) * w / free_weight
                        }
                    })
                    .collect();
            }
        }
    }

    fn orientation_at(&self, depth: usize) -> Orientation {
        match self.split {
            SplitAxis::Alternate if depth % 2 == 1 => Orientation::SelfLeft,
            _ => Orientation::SelfTop,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn place_children(
        &self,
        snapshot: &TreeSnapshot,
        children: &[usize],
        region: LayoutRect,
        orientation: Orientation,
        depth: usize,
        generated_at: Timestamp,
        frames: &mut Vec<LayoutFrame>,
    ) {
        let weights: Vec<f64> = children
            .iter()
            .filter_map(|slot| snapshot.node(*slot))
            .map(|node| node.weight)
            .collect();
        let shares = self.partition(&weights);

        let (start, extent) = match orientation {
            Orientation::SelfTop => (region.x, region.width),
            Orientation::SelfLeft => (region.y, region.height),
        };
        let end = start + extent;
        let mut cursor = start;
        let last = children.len().saturating_sub(1);

        for (i, (slot, share)) in children.iter().zip(shares).enumerate() {
            // last child absorbs rounding so the region is closed exactly
            let span = if i == last { end - cursor } else { share * extent };
            let rect = match orientation {
                Orientation::SelfTop => LayoutRect::new(cursor, region.y, span, region.height),
                Orientation::SelfLeft => LayoutRect::new(region.x, cursor, region.width, span),
            };
            cursor += span;
            self.place_node(snapshot, *slot, rect, depth, generated_at, frames);
        }
    }

    fn place_node(
        &self,
        snapshot: &TreeSnapshot,
        slot: usize,
        rect: LayoutRect,
        depth: usize,
        generated_at: Timestamp,
        frames: &mut Vec<LayoutFrame>,
    ) {
        let Some(node) = snapshot.node(slot) else {
            return;
        };
        let children = materialized_children(snapshot, node);
        let frame = |rect| LayoutFrame {
            path: node.path.clone(),
            rect,
            state: node.state,
            weight: node.weight,
            generated_at,
        };

        if children.is_empty() {
            frames.push(frame(rect));
            return;
        }

        let fraction = if node.holds_messages {
            PARENT_FRACTION_WITH_MESSAGES
        } else {
            PARENT_FRACTION_EMPTY
        };
        let orientation = self.orientation_at(depth);
        let (own, rest) = match orientation {
            Orientation::SelfTop => {
                let strip = rect.height * fraction;
                (
                    LayoutRect::new(rect.x, rect.y, rect.width, strip),
                    LayoutRect::new(rect.x, rect.y + strip, rect.width, rect.height - strip),
                )
            }
            Orientation::SelfLeft => {
                let strip = rect.width * fraction;
                (
                    LayoutRect::new(rect.x, rect.y, strip, rect.height),
                    LayoutRect::new(rect.x + strip, rect.y, rect.width - strip, rect.height),
                )
            }
        };

        frames.push(frame(own));
        // children run perpendicular to the self strip
        self.place_children(
            snapshot,
            &children,
            rest,
            orientation,
            depth + 1,
            generated_at,
            frames,
        );
    }
}

/// A zero-weight, unlocked leaf is awaiting pruning and takes no space
fn is_materialized(snapshot: &TreeSnapshot, node: &SnapshotNode) -> bool {
    node.locked || node.weight > 0.0 || !materialized_children(snapshot, node).is_empty()
}

fn materialized_children(snapshot: &TreeSnapshot, node: &SnapshotNode) -> Vec<usize> {
    node.children
        .iter()
        .copied()
        .filter(|slot| {
            snapshot
                .node(*slot)
                .is_some_and(|child| is_materialized(snapshot, child))
        })
        .collect()
}
