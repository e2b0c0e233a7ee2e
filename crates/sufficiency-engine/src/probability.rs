//! Deterministic integer combinatorics and hypergeometric primitives.
//!
//! All intermediates are exact `u128` integers: with a 99-card population
//! the largest binomial is C(99, 49) (about 5.0e28) and the largest
//! intermediate product stays under 5.0e30, both far below `u128::MAX`.
//! Probabilities are exact integer ratios over the common denominator
//! C(N, n), quantized once to six decimals half away from zero.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fixed::Fixed6;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Stable error classes surfaced by the math core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MathErrorCode {
    /// A parameter violated the documented domain.
    InvalidInput,
    /// An internal impossibility (the arithmetic itself misbehaved).
    InternalError,
}

impl MathErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "PROBABILITY_MATH_CORE_V1_INVALID_INPUT",
            Self::InternalError => "PROBABILITY_MATH_CORE_V1_INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for MathErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Math-core failure with its stable code and a short detail string.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {detail}")]
pub struct MathError {
    pub code: MathErrorCode,
    pub detail: String,
}

impl MathError {
    fn invalid(detail: &str) -> MathError {
        MathError {
            code: MathErrorCode::InvalidInput,
            detail: detail.to_string(),
        }
    }

    fn internal(detail: &str) -> MathError {
        MathError {
            code: MathErrorCode::InternalError,
            detail: detail.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// comb
// ---------------------------------------------------------------------------

/// Exact binomial coefficient C(n, k).
///
/// Multiplicative form over the smaller of `k` and `n - k`; every division
/// in the loop is exact, and a non-zero remainder is an internal error.
pub fn comb(n: u32, k: u32) -> Result<u128, MathError> {
    if k > n {
        return Err(MathError::invalid("k must be <= n"));
    }
    if k == 0 || k == n {
        return Ok(1);
    }

    let k_small = k.min(n - k);
    let mut result: u128 = 1;
    for index in 1..=u128::from(k_small) {
        let numerator = u128::from(n) - u128::from(k_small) + index;
        result = result
            .checked_mul(numerator)
            .ok_or_else(|| MathError::internal("comb intermediate overflow"))?;
        if result % index != 0 {
            return Err(MathError::internal("comb division remainder detected"));
        }
        result /= index;
    }
    Ok(result)
}

/// C(n, k) treating the out-of-range case `k > n` as zero ways.
fn comb_or_zero(n: u32, k: u32) -> Result<u128, MathError> {
    if k > n {
        return Ok(0);
    }
    comb(n, k)
}

// ---------------------------------------------------------------------------
// Hypergeometric P(>= x)
// ---------------------------------------------------------------------------

fn validate_population(n_total: u32, k_success: u32, draw_count: u32) -> Result<(), MathError> {
    if k_success > n_total {
        return Err(MathError::invalid("K_int must be <= N"));
    }
    if draw_count > n_total {
        return Err(MathError::invalid("n must be <= N"));
    }
    Ok(())
}

/// P(at least `x` successes) drawing `n` without replacement from a
/// population of `N` with `K_int` successes.
///
/// Special cases: `x == 0` is certain; `x > min(K, n)` is impossible.
pub fn hypergeom_p_ge_x(
    n_total: u32,
    k_success: u32,
    draw_count: u32,
    threshold: u32,
) -> Result<Fixed6, MathError> {
    validate_population(n_total, k_success, draw_count)?;
    if threshold > draw_count {
        return Err(MathError::invalid("x must be <= n"));
    }

    if threshold == 0 {
        return Ok(Fixed6::ONE);
    }
    let max_hits = k_success.min(draw_count);
    if threshold > max_hits {
        return Ok(Fixed6::ZERO);
    }

    let denominator = comb(n_total, draw_count)?;
    if denominator == 0 {
        return Err(MathError::internal("hypergeom denominator must be positive"));
    }

    let misses_available = n_total - k_success;
    let mut numerator: u128 = 0;
    for hits in threshold..=max_hits {
        let misses_drawn = draw_count - hits;
        if misses_drawn > misses_available {
            continue;
        }
        let term = comb(k_success, hits)?
            .checked_mul(comb_or_zero(misses_available, misses_drawn)?)
            .ok_or_else(|| MathError::internal("hypergeom term overflow"))?;
        numerator = numerator
            .checked_add(term)
            .ok_or_else(|| MathError::internal("hypergeom sum overflow"))?;
    }

    let clamped = numerator.min(denominator);
    Ok(Fixed6::from_ratio_u128(clamped, denominator).clamp_unit())
}

/// P(at least one success): `1 - C(N-K, n) / C(N, n)`.
pub fn hypergeom_p_ge_1(n_total: u32, k_success: u32, draw_count: u32) -> Result<Fixed6, MathError> {
    validate_population(n_total, k_success, draw_count)?;
    if draw_count == 0 {
        return Ok(Fixed6::ZERO);
    }
    hypergeom_p_ge_x(n_total, k_success, draw_count, 1)
}

// ===========================================================================
// Tests
// ===========================================================================
