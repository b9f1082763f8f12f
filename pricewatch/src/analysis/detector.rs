//! Percentage-change classification.
//!
//! Pure decimal arithmetic; no clock, no I/O. Everything here is
//! deterministic for a given `DetectorConfig`.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::prices::model::EventKind;

/// 2.0 percent.
pub const DEFAULT_THRESHOLD_PCT: Decimal = Decimal::from_parts(20, 0, 0, false, 1);

/// Historical prices equal to this value are treated exactly like zero: the
/// change is reported as 0% instead of dividing by a near-zero base.
///
/// This is a literal sentinel, not a tick-size clamp. A price of
/// `0.00000002` is still divided by.
pub const DEFAULT_EFFECTIVELY_ZERO_PRICE: Decimal = Decimal::from_parts(1, 0, 0, false, 8);

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorConfig {
    /// Minimum absolute change, in percent, that counts as significant.
    /// The boundary itself is significant.
    pub threshold_pct: Decimal,
    pub effectively_zero_price: Decimal,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold_pct: DEFAULT_THRESHOLD_PCT,
            effectively_zero_price: DEFAULT_EFFECTIVELY_ZERO_PRICE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// Unrounded percentage change.
    pub percentage_change: Decimal,
    pub kind: Option<EventKind>,
}

impl Classification {
    /// The change with exactly two fractional digits, banker's rounding.
    pub fn percentage_display(&self) -> String {
        format_pct(self.percentage_change)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeDetector {
    cfg: DetectorConfig,
}

impl ChangeDetector {
    pub fn new(cfg: DetectorConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.cfg
    }

    pub fn percentage_change(&self, previous: Decimal, current: Decimal) -> Decimal {
        if previous.is_zero() || previous == self.cfg.effectively_zero_price {
            return Decimal::ZERO;
        }
        // checked_* only fails on overflow of 96-bit mantissas; treat as no change
        current
            .checked_sub(previous)
            .and_then(|d| d.checked_div(previous))
            .and_then(|r| r.checked_mul(HUNDRED))
            .unwrap_or(Decimal::ZERO)
    }

    pub fn classify(&self, previous: Decimal, current: Decimal) -> Classification {
        let pct = self.percentage_change(previous, current);

        let kind = if pct.is_zero() || pct.abs() < self.cfg.threshold_pct {
            None
        } else if pct.is_sign_positive() {
            Some(EventKind::Increase)
        } else {
            Some(EventKind::Decrease)
        };

        Classification {
            percentage_change: pct,
            kind,
        }
    }
}

pub fn format_pct(pct: Decimal) -> String {
    let mut rounded = pct.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven);
    rounded.rescale(2);
    if rounded.is_zero() {
        // never print "-0.00"
        rounded.set_sign_positive(true);
    }
    rounded.to_string()
}
