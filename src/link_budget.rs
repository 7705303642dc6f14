//! Link-budget figures derived from the combined efficiency of a link.

use serde::Serialize;

use crate::channel::fiber_transmittance;
use crate::config::FiberLink;

/// η_src · 10^(−L·α/10) · η_det
pub fn combined_efficiency(link: &FiberLink) -> f64 {
    fiber_transmittance(
        link.length_km,
        link.loss_db_per_km,
        link.source_efficiency,
        link.detector_efficiency,
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkBudget {
    pub combined_efficiency: f64,
    pub source_rate_hz: f64,
    /// Share of the sifted key published for error estimation.
    pub cross_check_fraction: f64,
}

impl LinkBudget {
    pub fn new(combined_efficiency: f64, source_rate_hz: f64, cross_check_fraction: f64) -> Self {
        Self {
            combined_efficiency,
            source_rate_hz,
            cross_check_fraction,
        }
    }

    pub fn for_fiber(link: &FiberLink, source_rate_hz: f64, cross_check_fraction: f64) -> Self {
        Self::new(combined_efficiency(link), source_rate_hz, cross_check_fraction)
    }

    /// Expected key bits left from `n_pulses` after sifting and cross-checking.
    pub fn key_length(&self, n_pulses: usize) -> f64 {
        n_pulses as f64 * self.combined_efficiency * (1.0 - self.cross_check_fraction) * 0.5
    }

    /// Key bits per second.
    pub fn key_rate(&self) -> f64 {
        self.source_rate_hz * self.combined_efficiency * (1.0 - self.cross_check_fraction) * 0.5
    }

    /// Detections per second before sifting.
    pub fn sifted_bit_rate(&self) -> f64 {
        self.source_rate_hz * self.combined_efficiency
    }

    /// Erroneous bits per second in the cross-checked sample at `qber`.
    pub fn error_rate(&self, qber: f64) -> f64 {
        self.source_rate_hz * self.combined_efficiency * 0.5 * self.cross_check_fraction * qber
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::DEFAULT_SOURCE_RATE_HZ;

    fn metro() -> FiberLink {
        FiberLink {
            length_km: 20.0,
            loss_db_per_km: 0.2,
            source_efficiency: 0.7,
            detector_efficiency: 0.6,
        }
    }

    #[test]
    fn metro_budget() {
        let budget = LinkBudget::for_fiber(&metro(), DEFAULT_SOURCE_RATE_HZ, 0.1);
        let ce = 0.42 * 10f64.powf(-0.4);
        assert!((budget.combined_efficiency - ce).abs() < 1e-12);
        assert!((budget.key_length(50) - 50.0 * ce * 0.45).abs() < 1e-12);
        assert!((budget.key_rate() - 72.6e6 * ce * 0.45).abs() < 1e-3);
        assert!((budget.sifted_bit_rate() - 72.6e6 * ce).abs() < 1e-3);
        assert!((budget.error_rate(0.02) - 72.6e6 * ce * 0.5 * 0.1 * 0.02).abs() < 1e-6);
    }

    #[test]
    fn longer_fiber_lowers_the_rate() {
        let short = LinkBudget::for_fiber(&metro(), 1e6, 0.0);
        let long = LinkBudget::for_fiber(
            &FiberLink {
                length_km: 80.0,
                ..metro()
            },
            1e6,
            0.0,
        );
        assert!(long.key_rate() < short.key_rate());
    }
}
