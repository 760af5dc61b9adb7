use rust_decimal::Decimal;
use shared::config::ForwarderConfig;

/// What a received amount means for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Below the noise threshold; keep watching
    Ignore,
    /// Within the slippage band of the desired amount
    Settled,
    /// Above noise but short of the slippage band
    Slipped,
}

/// Amount thresholds applied to every incoming transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToleranceRules {
    pub ignore_threshold: Decimal,
    pub slippage_tolerance: Decimal,
}

impl ToleranceRules {
    pub fn new(ignore_threshold: Decimal, slippage_tolerance: Decimal) -> Self {
        Self {
            ignore_threshold,
            slippage_tolerance,
        }
    }

    pub fn from_config(config: &ForwarderConfig) -> Self {
        Self::new(config.ignore_threshold, config.slippage_tolerance)
    }

    /// Classify `received` lamports against `desired` lamports.
    pub fn evaluate(&self, desired: u64, received: u64) -> Decision {
        let desired = Decimal::from(desired);
        let received = Decimal::from(received);

        if received < desired * self.ignore_threshold {
            Decision::Ignore
        } else if received >= desired * (Decimal::ONE - self.slippage_tolerance) {
            Decision::Settled
        } else {
            Decision::Slipped
        }
    }
}
