//! Conversion between lamports (the ledger's base unit) and SOL display values.
//!
//! Every amount inside the forwarder is carried as `u64` lamports. `Decimal`
//! only appears at the edges: parsing a request, rendering a webhook body,
//! writing an archive row.

use crate::error::{Error, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

const SOL_SCALE: u32 = 9;

/// Convert a SOL amount to lamports.
///
/// Fractions below one lamport are truncated toward zero. Negative values and
/// values that do not fit in a `u64` are rejected.
pub fn sol_to_lamports(sol: Decimal) -> Result<u64> {
    if sol.is_sign_negative() && !sol.is_zero() {
        return Err(Error::Validation(format!("Negative amount: {}", sol)));
    }

    let lamports = sol
        .checked_mul(Decimal::from(LAMPORTS_PER_SOL))
        .ok_or_else(|| Error::Validation(format!("Amount out of range: {}", sol)))?
        .trunc();

    lamports
        .to_u64()
        .ok_or_else(|| Error::Validation(format!("Amount out of range: {}", sol)))
}

/// Convert lamports to SOL. Exact for every `u64`.
pub fn lamports_to_sol(lamports: u64) -> Decimal {
    Decimal::from_i128_with_scale(lamports as i128, SOL_SCALE).normalize()
}

/// `received / desired * 100`, computed without going through floats.
pub fn percent_of(received: u64, desired: u64) -> Decimal {
    if desired == 0 {
        return Decimal::ZERO;
    }
    (Decimal::from(received) * Decimal::ONE_HUNDRED / Decimal::from(desired)).normalize()
}
