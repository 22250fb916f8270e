// Volatility circuit breaker
//
// Compares each sample against the previous one only. The timer that drives
// it lives in the session actor; this type just decides.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceSample {
    pub at: DateTime<Utc>,
    pub price: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GuardDecision {
    /// No previous sample; this one becomes the baseline
    Baseline,
    /// Change below the reset threshold
    Hold { change: Decimal },
    /// Cancel everything and re-place the ladder
    SelfHeal { change: Decimal },
    /// Terminate the session
    HardStop { change: Decimal },
}

#[derive(Debug, Clone, Default)]
pub struct VolatilityGuard {
    previous: Option<PriceSample>,
    generation: u64,
}

impl VolatilityGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn previous(&self) -> Option<PriceSample> {
        self.previous
    }

    /// Forget the baseline and start a new timer generation
    pub fn reset(&mut self) -> u64 {
        self.previous = None;
        self.generation += 1;
        self.generation
    }

    pub fn evaluate(
        &mut self,
        sample: PriceSample,
        reset_threshold: Decimal,
        cancel_threshold: Decimal,
    ) -> GuardDecision {
        let Some(prev) = self.previous else {
            self.previous = Some(sample);
            return GuardDecision::Baseline;
        };

        if prev.price <= Decimal::ZERO {
            self.previous = Some(sample);
            return GuardDecision::Baseline;
        }

        let change = ((sample.price - prev.price) / prev.price).abs();

        if change >= cancel_threshold {
            GuardDecision::HardStop { change }
        } else if change >= reset_threshold {
            self.previous = Some(sample);
            GuardDecision::SelfHeal { change }
        } else {
            self.previous = Some(sample);
            GuardDecision::Hold { change }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample(price: Decimal) -> PriceSample {
        PriceSample { at: Utc::now(), price }
    }

    #[test]
    fn test_first_sample_is_baseline() {
        let mut guard = VolatilityGuard::new();
        assert_eq!(guard.evaluate(sample(dec!(100)), dec!(0.03), dec!(0.1)), GuardDecision::Baseline);
        assert_eq!(guard.previous().map(|s| s.price), Some(dec!(100)));
    }

    #[test]
    fn test_thresholds() {
        let mut guard = VolatilityGuard::new();
        guard.evaluate(sample(dec!(100)), dec!(0.03), dec!(0.1));

        assert_eq!(
            guard.evaluate(sample(dec!(101)), dec!(0.03), dec!(0.1)),
            GuardDecision::Hold { change: dec!(0.01) }
        );

        // 101 -> 104.03 is exactly 3%
        assert!(matches!(
            guard.evaluate(sample(dec!(104.03)), dec!(0.03), dec!(0.1)),
            GuardDecision::SelfHeal { .. }
        ));
        assert_eq!(guard.previous().map(|s| s.price), Some(dec!(104.03)));
    }

    #[test]
    fn test_hard_stop_on_drop() {
        let mut guard = VolatilityGuard::new();
        guard.evaluate(sample(dec!(100)), dec!(0.03), dec!(0.1));
        assert_eq!(
            guard.evaluate(sample(dec!(88)), dec!(0.03), dec!(0.1)),
            GuardDecision::HardStop { change: dec!(0.12) }
        );
    }

    #[test]
    fn test_reset_bumps_generation() {
        let mut guard = VolatilityGuard::new();
        guard.evaluate(sample(dec!(100)), dec!(0.03), dec!(0.1));
        let generation = guard.reset();
        assert_eq!(generation, 1);
        assert!(guard.previous().is_none());
    }
}
