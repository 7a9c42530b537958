use serde::Serialize;

/// Upper bound for the platform's cut, in percent
pub const MAX_PLATFORM_FEE_PERCENT: f64 = 30.0;

/// Platform fee applied to every checkout, always within 0..=30 %
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeePolicy {
    percent: f64,
}

/// How a listing price is divided between platform and coach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceSplit {
    pub amount: i64,
    pub platform_fee: i64,
    pub coach_payout: i64,
}

impl FeePolicy {
    pub fn new(percent: f64) -> Self {
        let percent = if percent.is_finite() {
            percent.clamp(0.0, MAX_PLATFORM_FEE_PERCENT)
        } else {
            0.0
        };
        Self { percent }
    }

    pub fn percent(&self) -> f64 {
        self.percent
    }

    /// Fee is computed in basis points and rounded half-up to the nearest minor unit.
    pub fn split(&self, amount: i64) -> PriceSplit {
        let basis_points = (self.percent * 100.0).round() as i64;
        let platform_fee = (amount * basis_points + 5_000) / 10_000;
        PriceSplit {
            amount,
            platform_fee,
            coach_payout: amount - platform_fee,
        }
    }
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self::new(10.0)
    }
}
