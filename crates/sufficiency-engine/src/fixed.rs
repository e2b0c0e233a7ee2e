//! Exact six-decimal fixed-point arithmetic.
//!
//! Every rounded value in the pipeline is a `Fixed6`: millionths carried in
//! an `i64`. Quantization is half-away-from-zero from exact decimal digits,
//! never from native float rounding: a single ulp of drift would break
//! `build_hash_v1` equality across implementations.
//!
//! Key behaviors:
//! - `quantize_f64` parses the shortest decimal form of the input double and
//!   rounds its digits; intermediate float arithmetic never feeds a stored
//!   value.
//! - Products, ratios, and means are exact `i128` integer arithmetic with
//!   one half-away-from-zero division at the rounding boundary.
//! - Serialization emits the exact decimal as a JSON number; a six-decimal
//!   value round-trips byte-identically through shortest-form printing.

use std::fmt;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Millionths per unit.
pub const SCALE: i64 = 1_000_000;

// ---------------------------------------------------------------------------
// Fixed6
// ---------------------------------------------------------------------------

/// A value rounded to exactly six decimal places, stored as millionths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Fixed6(i64);

impl Fixed6 {
    pub const ZERO: Fixed6 = Fixed6(0);
    pub const ONE: Fixed6 = Fixed6(SCALE);

    /// Deck-size ceiling for K and n clamps.
    pub const DECK_SIZE: Fixed6 = Fixed6(99 * SCALE);

    /// Construct from raw millionths.
    pub fn from_micros(micros: i64) -> Fixed6 {
        Fixed6(micros)
    }

    /// Construct from a whole number.
    pub fn from_int(value: i64) -> Fixed6 {
        Fixed6(value.saturating_mul(SCALE))
    }

    /// Raw millionths.
    pub fn micros(self) -> i64 {
        self.0
    }

    /// Quantize a double to six decimals, half away from zero.
    ///
    /// Parses the shortest decimal representation of the input (what `{}`
    /// prints for `f64`) digit by digit, so the result matches exact-decimal
    /// quantization of that representation. Returns `None` for non-finite
    /// inputs.
    pub fn quantize_f64(value: f64) -> Option<Fixed6> {
        if !value.is_finite() {
            return None;
        }
        let text = format!("{value}");
        Some(Self::quantize_decimal_str(&text))
    }

    /// Quantize a plain decimal string (`-?digits[.digits]`) to six decimals.
    ///
    /// Half away from zero: the seventh fractional digit decides, which is
    /// exact for this rounding mode.
    fn quantize_decimal_str(text: &str) -> Fixed6 {
        let (negative, body) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };

        let (int_part, frac_part) = match body.split_once('.') {
            Some((i, f)) => (i, f),
            None => (body, ""),
        };

        let mut micros: i128 = 0;
        for byte in int_part.bytes() {
            if byte.is_ascii_digit() {
                micros = micros
                    .saturating_mul(10)
                    .saturating_add(i128::from(byte - b'0'));
            }
        }
        micros = micros.saturating_mul(i128::from(SCALE));

        let frac_digits: Vec<u8> = frac_part
            .bytes()
            .filter(u8::is_ascii_digit)
            .map(|b| b - b'0')
            .collect();
        for (position, digit) in frac_digits.iter().take(6).enumerate() {
            let place = i128::from(SCALE) / 10i128.pow(position as u32 + 1);
            micros = micros.saturating_add(i128::from(*digit) * place);
        }
        if frac_digits.get(6).is_some_and(|digit| *digit >= 5) {
            micros = micros.saturating_add(1);
        }

        if negative {
            micros = -micros;
        }
        Fixed6(clamp_i128_to_i64(micros))
    }

    /// Quantize an exact non-negative integer ratio, half up.
    ///
    /// `denominator` must be positive; callers enforce this before the call.
    pub fn from_ratio_u128(numerator: u128, denominator: u128) -> Fixed6 {
        debug_assert!(denominator > 0);
        let scaled = numerator.saturating_mul(SCALE as u128);
        let quotient = scaled / denominator;
        let remainder = scaled % denominator;
        let rounded = if remainder.saturating_mul(2) >= denominator {
            quotient + 1
        } else {
            quotient
        };
        Fixed6(clamp_i128_to_i64(rounded as i128))
    }

    /// Exact sum; saturates at the `i64` bounds.
    pub fn add(self, other: Fixed6) -> Fixed6 {
        Fixed6(self.0.saturating_add(other.0))
    }

    /// Exact difference; saturates at the `i64` bounds.
    pub fn sub(self, other: Fixed6) -> Fixed6 {
        Fixed6(self.0.saturating_sub(other.0))
    }

    /// Product of two six-decimal values, re-rounded half away from zero.
    pub fn mul(self, other: Fixed6) -> Fixed6 {
        let product = i128::from(self.0) * i128::from(other.0);
        Fixed6(clamp_i128_to_i64(div_half_away(product, i128::from(SCALE))))
    }

    /// Exact product with a whole number.
    pub fn mul_int(self, factor: i64) -> Fixed6 {
        let product = i128::from(self.0) * i128::from(factor);
        Fixed6(clamp_i128_to_i64(product))
    }

    /// Ratio of two six-decimal values, re-rounded half away from zero.
    ///
    /// `denominator` must be positive; callers route zero/negative
    /// denominators through [`Fixed6::safe_ratio`].
    pub fn div(self, denominator: Fixed6) -> Fixed6 {
        debug_assert!(denominator.0 > 0);
        let scaled = i128::from(self.0) * i128::from(SCALE);
        Fixed6(clamp_i128_to_i64(div_half_away(
            scaled,
            i128::from(denominator.0),
        )))
    }

    /// Zero-denominator-safe ratio clamped to `[0, 1]`.
    ///
    /// Policy: `num <= 0 && den <= 0` is 1.0 (nothing was lost because
    /// nothing existed); `num > 0 && den <= 0` is 0.0.
    pub fn safe_ratio(numerator: Fixed6, denominator: Fixed6) -> Fixed6 {
        if denominator.0 <= 0 {
            if numerator.0 <= 0 {
                return Fixed6::ONE;
            }
            return Fixed6::ZERO;
        }
        numerator.div(denominator).clamp_unit()
    }

    /// Clamp to `[0, 1]`.
    pub fn clamp_unit(self) -> Fixed6 {
        Fixed6(self.0.clamp(0, SCALE))
    }

    /// Clamp to `[0, 99]`.
    pub fn clamp_deck_size(self) -> Fixed6 {
        Fixed6(self.0.clamp(0, Self::DECK_SIZE.0))
    }

    /// `max(0, self - other)`, clamped to `[0, 1]`.
    pub fn delta_nonnegative_unit(self, other: Fixed6) -> Fixed6 {
        Fixed6((self.0 - other.0).max(0)).clamp_unit()
    }

    /// Floor of the value as a whole number.
    pub fn floor_int(self) -> i64 {
        self.0.div_euclid(SCALE)
    }

    /// Whether the value is a whole number.
    pub fn is_integral(self) -> bool {
        self.0.rem_euclid(SCALE) == 0
    }

    /// Exact arithmetic mean, rounded half away from zero.
    ///
    /// `None` for an empty slice.
    pub fn mean(values: &[Fixed6]) -> Option<Fixed6> {
        if values.is_empty() {
            return None;
        }
        let sum: i128 = values.iter().map(|v| i128::from(v.0)).sum();
        Some(Fixed6(clamp_i128_to_i64(div_half_away(
            sum,
            values.len() as i128,
        ))))
    }

    /// The nearest double. Exact: millionths fit well inside 2^53 and the
    /// division by 10^6 is correctly rounded.
    pub fn to_f64(self) -> f64 {
        (self.0 as f64) / (SCALE as f64)
    }
}

impl fmt::Display for Fixed6 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let magnitude = self.0.unsigned_abs();
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(
            f,
            "{sign}{}.{:06}",
            magnitude / SCALE as u64,
            magnitude % SCALE as u64
        )
    }
}

impl Serialize for Fixed6 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_f64())
    }
}

impl<'de> Deserialize<'de> for Fixed6 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Fixed6, D::Error> {
        let raw = f64::deserialize(deserializer)?;
        Fixed6::quantize_f64(raw).ok_or_else(|| D::Error::custom("non-finite fixed6 value"))
    }
}

// ---------------------------------------------------------------------------
// Integer rounding helpers
// ---------------------------------------------------------------------------

/// Divide rounding half away from zero. `denominator` must be positive.
fn div_half_away(numerator: i128, denominator: i128) -> i128 {
    debug_assert!(denominator > 0);
    let quotient = numerator / denominator;
    let remainder = numerator % denominator;
    if remainder.abs() * 2 >= denominator {
        quotient + numerator.signum()
    } else {
        quotient
    }
}

fn clamp_i128_to_i64(value: i128) -> i64 {
    value.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

// ===========================================================================
// Tests
// ===========================================================================
