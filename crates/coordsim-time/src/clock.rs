//! Simulated clock with a fixed drift rate

use rand::Rng;

/// Largest drift magnitude a clock accepts. Keeps `1 + drift` positive so
/// ticks never run the clock backwards.
pub const MAX_DRIFT: f64 = 0.999;

/// Per-process logical clock
/// INVARIANT: `advance` never decreases the value; only corrections may
#[derive(Clone, Debug, PartialEq)]
pub struct SimulatedClock {
    /// Current reading
    value: f64,
    /// Rate error applied to every advance
    drift: f64,
}

impl SimulatedClock {
    /// Create a clock at `value`. Drift is clamped to `[-MAX_DRIFT, MAX_DRIFT]`.
    pub fn new(value: f64, drift: f64) -> Self {
        SimulatedClock {
            value,
            drift: drift.clamp(-MAX_DRIFT, MAX_DRIFT),
        }
    }

    /// Create a clock whose drift is sampled from `[-drift_range, drift_range]`
    pub fn with_random_drift<R: Rng + ?Sized>(value: f64, drift_range: f64, rng: &mut R) -> Self {
        Self::new(value, sample_drift(rng, drift_range))
    }

    /// Advance by `delta` ticks, scaled by `1 + drift`.
    /// Returns the new reading
    pub fn advance(&mut self, delta: f64) -> f64 {
        self.value += delta.max(0.0) * self.rate();
        self.value
    }

    /// Current reading
    pub fn read(&self) -> f64 {
        self.value
    }

    /// Add a signed offset directly, bypassing drift.
    /// Returns the new reading
    pub fn apply_correction(&mut self, delta: f64) -> f64 {
        self.value += delta;
        self.value
    }

    pub fn drift(&self) -> f64 {
        self.drift
    }

    /// Units gained per tick
    pub fn rate(&self) -> f64 {
        1.0 + self.drift
    }
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// Sample a drift uniformly from `[-range, range]`
pub fn sample_drift<R: Rng + ?Sized>(rng: &mut R, range: f64) -> f64 {
    sample_symmetric(rng, range.min(MAX_DRIFT))
}

/// Sample uniformly from `[-range, range]`; zero for an empty range
pub fn sample_symmetric<R: Rng + ?Sized>(rng: &mut R, range: f64) -> f64 {
    if range > 0.0 && range.is_finite() {
        rng.gen_range(-range..=range)
    } else {
        0.0
    }
}
