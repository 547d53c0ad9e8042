//! Visual mask colors.
//!
//! Every perceivable individual is rendered in a flat mask color so that a
//! segmentation image can be mapped back to individuals. Colors are kept apart
//! by a minimum Manhattan distance (`|dR| + |dG| + |dB|`) and away from pure
//! black and white, which the renderer uses for background and highlights.

use rand::RngCore;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced by mask generation and parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MaskError {
    /// No candidate cleared the distance constraints within the trial budget.
    #[error("no unique mask color found after {trials} trials (min distance {min_distance})")]
    UniquenessExhausted { trials: u32, min_distance: u32 },

    /// A stored mask value is not a 6 or 8 digit hex color.
    #[error("invalid hex color '{value}'")]
    InvalidHex { value: String },
}

// ---------------------------------------------------------------------------
// Color
// ---------------------------------------------------------------------------

/// An opaque RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::new(0, 0, 0);
    pub const WHITE: Color = Color::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Uniformly random color drawn from one `u32` of `rng`.
    pub fn random<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let [r, g, b, _] = rng.next_u32().to_le_bytes();
        Self { r, g, b }
    }

    /// Uppercase `RRGGBB`.
    pub fn to_hex(self) -> String {
        format!("{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    /// Parse `RRGGBB` or `RRGGBBAA` (alpha ignored), with an optional `#`.
    pub fn from_hex(value: &str) -> Result<Self, MaskError> {
        let invalid = || MaskError::InvalidHex {
            value: value.to_owned(),
        };
        let digits = value.strip_prefix('#').unwrap_or(value);
        if !(digits.len() == 6 || digits.len() == 8) || !digits.is_ascii() {
            return Err(invalid());
        }
        let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).map_err(|_| invalid());
        Ok(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }

    pub fn manhattan_distance(self, other: Color) -> u32 {
        self.r.abs_diff(other.r) as u32
            + self.g.abs_diff(other.g) as u32
            + self.b.abs_diff(other.b) as u32
    }
}

/// A random mask color in hex form, with no uniqueness guarantee.
pub fn random_visual_mask<R: RngCore + ?Sized>(rng: &mut R) -> String {
    Color::random(rng).to_hex()
}

// ---------------------------------------------------------------------------
// MaskGenerator
// ---------------------------------------------------------------------------

/// Bounded-retry generator for mask colors that keep a minimum distance to
/// every already consumed color.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskGenerator {
    /// Candidates closer than this to any consumed color are rejected.
    pub min_manhattan_distance: u32,
    /// Number of candidates drawn before giving up.
    pub max_trials: u32,
    pub min_distance_to_black: u32,
    pub min_distance_to_white: u32,
}

impl MaskGenerator {
    pub fn new(min_manhattan_distance: u32, max_trials: u32) -> Self {
        Self {
            min_manhattan_distance,
            max_trials,
            ..Self::default()
        }
    }

    /// Whether `candidate` clears black, white and every consumed color.
    pub fn is_acceptable(&self, candidate: Color, consumed: &[Color]) -> bool {
        candidate.manhattan_distance(Color::BLACK) >= self.min_distance_to_black
            && candidate.manhattan_distance(Color::WHITE) >= self.min_distance_to_white
            && consumed
                .iter()
                .all(|c| candidate.manhattan_distance(*c) >= self.min_manhattan_distance)
    }

    /// Draw up to `max_trials` candidates and return the first acceptable one.
    ///
    /// On success the color is appended to `consumed`. On failure `consumed`
    /// is left untouched.
    pub fn generate_unique<R: RngCore + ?Sized>(
        &self,
        rng: &mut R,
        consumed: &mut Vec<Color>,
    ) -> Result<Color, MaskError> {
        for _ in 0..self.max_trials {
            let candidate = Color::random(rng);
            if self.is_acceptable(candidate, consumed) {
                consumed.push(candidate);
                return Ok(candidate);
            }
        }
        tracing::warn!(
            trials = self.max_trials,
            min_distance = self.min_manhattan_distance,
            consumed = consumed.len(),
            "mask color generation exhausted its trial budget"
        );
        Err(MaskError::UniquenessExhausted {
            trials: self.max_trials,
            min_distance: self.min_manhattan_distance,
        })
    }
}

impl Default for MaskGenerator {
    /// 29 apart from each other, 37 from black, 23 from white, 100 trials.
    fn default() -> Self {
        Self {
            min_manhattan_distance: 29,
            max_trials: 100,
            min_distance_to_black: 37,
            min_distance_to_white: 23,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
