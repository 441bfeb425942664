// Shared types for the alert bot

use std::fmt;

/// A single price observation, as stored by the sync task.
///
/// Queries return samples most-recent-first; reverse before trend analysis.
#[derive(Debug, Clone, Copy)]
pub struct PriceSample {
    pub price: f64,
    pub timestamp_ms: u64,
}

impl PriceSample {
    pub fn new(price: f64, timestamp_ms: u64) -> Self {
        Self { price, timestamp_ms }
    }
}

/// Price alert conditions. Each variant is its own dedup counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriceAlertState {
    /// Latest price reached the configured ceiling
    RiseToTargetPrice,
    /// Latest price reached the configured floor
    FallToTargetPrice,
    /// Rising trend moved more than the configured amount off the window min
    ReachTargetRisePrice,
    /// Falling trend moved more than the configured amount off the window max
    ReachTargetFallPrice,
}

impl PriceAlertState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceAlertState::RiseToTargetPrice => "rise_to_target_price",
            PriceAlertState::FallToTargetPrice => "fall_to_target_price",
            PriceAlertState::ReachTargetRisePrice => "reach_target_rise_price",
            PriceAlertState::ReachTargetFallPrice => "reach_target_fall_price",
        }
    }
}

/// Identity of one recurring notification condition.
///
/// Price alerts use a fixed condition tag; appointment alerts use the slot
/// identity `doctor#dept#date#start#end`. Both map 1:1 to a cache counter,
/// so the notify gate never needs to know which domain a key came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AlertKey {
    Tagged(PriceAlertState),
    Composite(String),
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKey::Tagged(state) => f.write_str(state.as_str()),
            AlertKey::Composite(slot) => f.write_str(slot),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendDirection {
    Rising,
    Falling,
    NoTrend,
}

/// Verdict of the Mann-Kendall test over one sample window.
#[derive(Debug, Clone, Copy)]
pub struct TrendResult {
    pub direction: TrendDirection,
    pub is_significant: bool,
}

impl TrendResult {
    pub fn no_trend() -> Self {
        Self {
            direction: TrendDirection::NoTrend,
            is_significant: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_keys_render_snake_case() {
        let key = AlertKey::Tagged(PriceAlertState::RiseToTargetPrice);
        assert_eq!(key.to_string(), "rise_to_target_price");
    }

    #[test]
    fn composite_keys_render_verbatim() {
        let key = AlertKey::Composite("1024#0102#2026-08-10#08:00#12:00".to_string());
        assert_eq!(key.to_string(), "1024#0102#2026-08-10#08:00#12:00");
    }
}
