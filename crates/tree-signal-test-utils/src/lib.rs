//! Testing utilities for Tree Signal workspace
//!
//! Shared test helpers, fixtures, and assertions.

#![allow(missing_docs)]

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tree_signal_core::clock::ManualClock;
use tree_signal_core::config::TreeSignalConfig;
use tree_signal_core::layout::SplitAxis;
use tree_signal_core::path::ChannelPath;
use tree_signal_core::service::TreeSignal;
use tree_signal_core::types::{LayoutFrame, LayoutRect};

/// Tolerance used by the rectangle assertions
pub const EPSILON: f64 = 1e-9;

/// Fixed instant every fixture clock starts at
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// `epoch()` plus fractional seconds
pub fn at(secs: f64) -> DateTime<Utc> {
    epoch() + tree_signal_core::clock::seconds(secs)
}

pub fn path(s: &str) -> ChannelPath {
    s.parse().unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(epoch()))
}

/// Default service (hold 30s, decay 10s) on a manual clock at `epoch()`
pub fn setup_service() -> (Arc<TreeSignal>, Arc<ManualClock>) {
    setup_service_with(TreeSignalConfig::new())
}

pub fn setup_service_with(config: TreeSignalConfig) -> (Arc<TreeSignal>, Arc<ManualClock>) {
    let clock = manual_clock();
    let service = TreeSignal::new(&config, clock.clone()).unwrap();
    (Arc::new(service), clock)
}

pub fn alternate_config() -> TreeSignalConfig {
    TreeSignalConfig::new().with_split(SplitAxis::Alternate)
}

pub fn frame<'a>(frames: &'a [LayoutFrame], channel: &str) -> &'a LayoutFrame {
    let wanted = path(channel);
    frames
        .iter()
        .find(|f| f.path == wanted)
        .unwrap_or_else(|| panic!("no frame for {channel}"))
}

pub fn frame_paths(frames: &[LayoutFrame]) -> Vec<String> {
    frames.iter().map(|f| f.path.to_string()).collect()
}

pub fn assert_rect(actual: LayoutRect, x: f64, y: f64, width: f64, height: f64) {
    let expected = LayoutRect::new(x, y, width, height);
    let close = (actual.x - x).abs() < EPSILON
        && (actual.y - y).abs() < EPSILON
        && (actual.width - width).abs() < EPSILON
        && (actual.height - height).abs() < EPSILON;
    assert!(close, "expected {expected:?}, got {actual:?}");
}

/// Frames must tile the unit canvas without gaps or overlap
pub fn assert_tiles_canvas(frames: &[LayoutFrame]) {
    if frames.is_empty() {
        return;
    }
    let area: f64 = frames.iter().map(|f| f.rect.area()).sum();
    assert!((area - 1.0).abs() < 1e-6, "frames cover {area} of the canvas");
    for (i, a) in frames.iter().enumerate() {
        for b in &frames[i + 1..] {
            let overlap_w = a.rect.right().min(b.rect.right()) - a.rect.x.max(b.rect.x);
            let overlap_h = a.rect.bottom().min(b.rect.bottom()) - a.rect.y.max(b.rect.y);
            assert!(
                overlap_w <= 1e-9 || overlap_h <= 1e-9,
                "{} overlaps {}",
                a.path,
                b.path
            );
        }
    }
}
