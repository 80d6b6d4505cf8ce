//! Tree Signal palette
//!
//! Every channel gets a monochromatic, dark-mode friendly scheme
//! (background, border, normal text, highlight) derived from one hue. Hues
//! come from rotating by a fixed increment, so consecutive channels land far
//! apart on the color wheel.
//!
//! # Example
//!
//! ```rust
//! use tree_signal_palette::{AssignmentMode, ColorService};
//!
//! let colors = ColorService::new(AssignmentMode::Increment);
//! let first = colors.scheme_for("this.that");
//! let second = colors.scheme_for("other");
//! assert_eq!(first.hue, 0);
//! assert_eq!(second.hue, 101);
//! assert_eq!(colors.scheme_for("this.that"), first);
//! ```

use palette::{encoding, FromColor, Hsl, Srgb};
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Default hue step; coprime to 360 so every hue is eventually visited
pub const DEFAULT_INCREMENT: u32 = 101;

/// Number of distinct indices hash mode maps channels onto
pub const HASH_BUCKETS: u32 = 1000;

/// Palette errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaletteError {
    #[error("unknown color assignment mode '{0}' (expected 'increment' or 'hash')")]
    UnknownMode(String),
}

/// A complete color scheme for one channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ColorScheme {
    /// Hue in degrees
    pub hue: u32,
    /// Panel fill
    pub background: String,
    /// Panel outline
    pub border: String,
    /// Body text
    pub normal: String,
    /// Emphasis text
    pub highlight: String,
}

/// Hue-rotation scheme generator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorPaletteGenerator {
    increment: u32,
    start: u32,
}

impl Default for ColorPaletteGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_INCREMENT, 0)
    }
}

impl ColorPaletteGenerator {
    /// Rotate by `increment` degrees starting at `start`
    #[must_use]
    pub fn new(increment: u32, start: u32) -> Self {
        Self {
            increment,
            start: start % 360,
        }
    }

    /// Hue for the `index`-th channel
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn hue_for_index(&self, index: u64) -> u32 {
        let step = (u64::from(self.increment) * (index % 360)) % 360;
        ((u64::from(self.start) + step) % 360) as u32
    }

    /// Scheme for the `index`-th channel
    #[must_use]
    pub fn scheme_for_index(&self, index: u64) -> ColorScheme {
        scheme_for_hue(self.hue_for_index(index))
    }

    /// Stable scheme for a channel name, independent of arrival order
    #[must_use]
    pub fn scheme_for_hash(&self, channel: &str) -> ColorScheme {
        self.scheme_for_index(hash_index(channel))
    }
}

/// Dark background, medium border, readable text, bright highlight
#[must_use]
pub fn scheme_for_hue(hue: u32) -> ColorScheme {
    let h = f64::from(hue);
    ColorScheme {
        hue,
        background: hsl_to_hex(h, 35.0, 15.0),
        border: hsl_to_hex(h, 40.0, 30.0),
        normal: hsl_to_hex(h, 50.0, 65.0),
        highlight: hsl_to_hex(h, 60.0, 85.0),
    }
}

/// First four bytes of the SHA-256 digest, big-endian, bucketed
#[must_use]
pub fn hash_index(channel: &str) -> u64 {
    let digest = Sha256::digest(channel.as_bytes());
    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    u64::from(prefix % HASH_BUCKETS)
}

/// `h` in degrees, `s` and `l` in percent; channels are truncated, not rounded
#[must_use]
pub fn hsl_to_hex(h: f64, s: f64, l: f64) -> String {
    let hsl: Hsl<encoding::Srgb, f64> = Hsl::new(h, s / 100.0, l / 100.0);
    let rgb = Srgb::<f64>::from_color(hsl);
    format!(
        "#{:02x}{:02x}{:02x}",
        channel_byte(rgb.red),
        channel_byte(rgb.green),
        channel_byte(rgb.blue)
    )
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn channel_byte(v: f64) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0) as u8
}

/// How channels are mapped to palette indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssignmentMode {
    /// First-seen order
    #[default]
    Increment,
    /// SHA-256 of the channel name
    Hash,
}

impl FromStr for AssignmentMode {
    type Err = PaletteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "increment" => Ok(Self::Increment),
            "hash" => Ok(Self::Hash),
            other => Err(PaletteError::UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for AssignmentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Increment => f.write_str("increment"),
            Self::Hash => f.write_str("hash"),
        }
    }
}

#[derive(Debug, Default)]
struct Assignments {
    by_channel: HashMap<String, u64>,
    next_index: u64,
}

/// Per-channel color assignment
///
/// In increment mode a channel keeps the index it was first given until
/// [`reset`](Self::reset).
#[derive(Debug)]
pub struct ColorService {
    mode: AssignmentMode,
    generator: ColorPaletteGenerator,
    assignments: Mutex<Assignments>,
}

impl Default for ColorService {
    fn default() -> Self {
        Self::new(AssignmentMode::default())
    }
}

impl ColorService {
    /// Service using the default generator
    #[must_use]
    pub fn new(mode: AssignmentMode) -> Self {
        Self::with_generator(mode, ColorPaletteGenerator::default())
    }

    /// Service over a custom generator
    #[must_use]
    pub fn with_generator(mode: AssignmentMode, generator: ColorPaletteGenerator) -> Self {
        Self {
            mode,
            generator,
            assignments: Mutex::new(Assignments::default()),
        }
    }

    /// Assignment mode in use
    #[inline]
    #[must_use]
    pub fn mode(&self) -> AssignmentMode {
        self.mode
    }

    /// Scheme for a dotted channel name
    #[must_use]
    pub fn scheme_for(&self, channel: &str) -> ColorScheme {
        match self.mode {
            AssignmentMode::Hash => self.generator.scheme_for_hash(channel),
            AssignmentMode::Increment => {
                let index = {
                    let mut assignments = self.assignments.lock();
                    match assignments.by_channel.get(channel) {
                        Some(index) => *index,
                        None => {
                            let index = assignments.next_index;
                            assignments.next_index += 1;
                            assignments.by_channel.insert(channel.to_string(), index);
                            index
                        }
                    }
                };
                self.generator.scheme_for_index(index)
            }
        }
    }

    /// Drop increment-mode assignments for channels `keep` rejects; returns
    /// how many were released
    ///
    /// A released channel that shows up again gets a fresh index.
    pub fn retain<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&str) -> bool,
    {
        let mut assignments = self.assignments.lock();
        let before = assignments.by_channel.len();
        assignments.by_channel.retain(|channel, _| keep(channel));
        before - assignments.by_channel.len()
    }

    /// Number of channels holding an increment-mode index
    #[must_use]
    pub fn assigned(&self) -> usize {
        self.assignments.lock().by_channel.len()
    }

    /// Forget all assignments
    pub fn reset(&self) {
        let mut assignments = self.assignments.lock();
        assignments.by_channel.clear();
        assignments.next_index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn hue_zero_background() {
        let scheme = scheme_for_hue(0);
        assert_eq!(scheme.background, "#331818");
    }

    #[test]
    fn rotated_hue_scheme() {
        let scheme = scheme_for_hue(101);
        assert_eq!(scheme.background, "#213318");
    }

    #[test]
    fn grey_when_unsaturated() {
        assert_eq!(hsl_to_hex(200.0, 0.0, 50.0), "#7f7f7f");
    }

    #[test]
    fn hues_rotate_by_increment() {
        let generator = ColorPaletteGenerator::default();
        assert_eq!(generator.hue_for_index(0), 0);
        assert_eq!(generator.hue_for_index(1), 101);
        assert_eq!(generator.hue_for_index(4), 44);
        assert_eq!(ColorPaletteGenerator::new(101, 400).hue_for_index(0), 40);
    }

    #[test]
    fn increment_mode_is_first_seen_order() {
        let colors = ColorService::new(AssignmentMode::Increment);
        assert_eq!(colors.scheme_for("b").hue, 0);
        assert_eq!(colors.scheme_for("a").hue, 101);
        assert_eq!(colors.scheme_for("b").hue, 0);
        assert_eq!(colors.assigned(), 2);

        colors.reset();
        assert_eq!(colors.scheme_for("a").hue, 0);
    }

    #[test]
    fn retain_releases_gone_channels() {
        let colors = ColorService::new(AssignmentMode::Increment);
        colors.scheme_for("a");
        colors.scheme_for("b");
        assert_eq!(colors.retain(|channel| channel == "b"), 1);
        assert_eq!(colors.assigned(), 1);
        assert_eq!(colors.scheme_for("b").hue, 101);
        // indices keep advancing, so "a" does not reclaim hue 0
        assert_eq!(colors.scheme_for("a").hue, 202);
    }

    #[test]
    fn hash_mode_ignores_arrival_order() {
        let first = ColorService::new(AssignmentMode::Hash);
        let second = ColorService::new(AssignmentMode::Hash);
        second.scheme_for("noise");
        assert_eq!(first.scheme_for("a.b"), second.scheme_for("a.b"));
        assert_eq!(first.assigned(), 0);
    }

    #[test]
    fn mode_parses() {
        assert_eq!("HASH".parse::<AssignmentMode>().unwrap(), AssignmentMode::Hash);
        assert!(matches!(
            "random".parse::<AssignmentMode>(),
            Err(PaletteError::UnknownMode(_))
        ));
    }

    proptest! {
        #[test]
        fn colors_are_well_formed(hue in 0u32..360) {
            let scheme = scheme_for_hue(hue);
            for color in [&scheme.background, &scheme.border, &scheme.normal, &scheme.highlight] {
                prop_assert_eq!(color.len(), 7);
                prop_assert!(color.starts_with('#'));
                prop_assert!(color[1..].chars().all(|c| c.is_ascii_hexdigit()));
            }
        }

        #[test]
        fn hash_index_in_range(channel in "[a-z]{1,8}(\\.[a-z]{1,8}){0,3}") {
            prop_assert!(hash_index(&channel) < u64::from(HASH_BUCKETS));
        }
    }
}
