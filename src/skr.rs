//! Analytic decoy-state QBER and secure key rate over a fading channel.
//!
//! Per-η click and error-click probabilities are averaged against the
//! turbulence density f(η) with adaptive quadrature over ln η ∈ (−∞, ∞). Each
//! solve first checks that f integrates to 1:
//!
//! ```text
//! Q(η, n)  = p_d(1 + p_ap) + (1 + p_ap)(1 − e^(−nη))
//! EQ(η, n) = e₀ p_d(1 + p_ap) + (e_pol + e₀ p_ap)(1 − e^(−nη))
//! E_μ      = ∫EQ(η, μ)f / ∫Q(η, μ)f
//! SKR      = R s p d [ −Q_μ f_ec H₂(E_μ) + Q₁ᴸ (1 − H₂(e₁ᵁ)) ]
//! ```
//!
//! with the single-photon gain lower bound Q₁ᴸ and error upper bound e₁ᵁ from
//! the vacuum + weak decoy method (Ma, Qi, Zhao, Lo 2005).

use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::quadrature::Quadrature;
use crate::turbulence::{AtmosphericChannel, AtmosphericGeometry, TurbulenceParameters};

/// Largest accepted deviation of ∫f(η)dη from 1.
const NORMALIZATION_TOL: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectorParams {
    /// Dark-count probability per gate p_d
    pub dark_count: f64,
    /// Afterpulse probability p_ap
    pub afterpulse: f64,
    /// Error rate of background clicks e₀
    pub background_error: f64,
    /// Polarization misalignment error e_pol
    pub polarization_error: f64,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            dark_count: 1e-6,
            afterpulse: 0.02,
            background_error: 0.5,
            polarization_error: 0.01,
        }
    }
}

impl DetectorParams {
    /// Background yield Y₀ = p_d(1 + p_ap).
    pub fn background_yield(&self) -> f64 {
        self.dark_count * (1.0 + self.afterpulse)
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("detector.darkCount", self.dark_count),
            ("detector.afterpulse", self.afterpulse),
            ("detector.backgroundError", self.background_error),
            ("detector.polarizationError", self.polarization_error),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SimError::invalid(
                    field,
                    format!("must be a probability in [0, 1], got {}", value),
                ));
            }
        }
        Ok(())
    }
}

/// Mean photon numbers of the signal and weak decoy states.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DecoyIntensities {
    pub signal: f64,
    pub decoy: f64,
}

impl Default for DecoyIntensities {
    fn default() -> Self {
        Self {
            signal: 0.5,
            decoy: 0.1,
        }
    }
}

impl DecoyIntensities {
    pub fn validate(&self) -> Result<()> {
        if !(self.decoy > 0.0 && self.decoy < self.signal && self.signal.is_finite()) {
            return Err(SimError::invalid(
                "intensities.decoy",
                format!(
                    "need 0 < decoy < signal, got decoy {} and signal {}",
                    self.decoy, self.signal
                ),
            ));
        }
        Ok(())
    }
}

/// Inputs of the key-rate formula besides the channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeyRateParams {
    /// Pulse repetition rate R (Hz)
    pub repetition_rate_hz: f64,
    /// Basis sifting factor s
    pub sifting_factor: f64,
    /// Probability of sending a signal-intensity pulse p
    pub signal_probability: f64,
    /// Duty cycle d
    pub duty_cycle: f64,
    /// Error-correction inefficiency f_ec
    pub error_correction: f64,
    pub detector: DetectorParams,
    pub intensities: DecoyIntensities,
}

impl Default for KeyRateParams {
    fn default() -> Self {
        Self {
            repetition_rate_hz: 1e9,
            sifting_factor: 0.5,
            signal_probability: 0.5,
            duty_cycle: 1.0,
            error_correction: 1.16,
            detector: DetectorParams::default(),
            intensities: DecoyIntensities::default(),
        }
    }
}

impl KeyRateParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.repetition_rate_hz > 0.0 && self.repetition_rate_hz.is_finite()) {
            return Err(SimError::invalid(
                "repetitionRateHz",
                format!("must be > 0, got {}", self.repetition_rate_hz),
            ));
        }
        for (field, value) in [
            ("siftingFactor", self.sifting_factor),
            ("signalProbability", self.signal_probability),
            ("dutyCycle", self.duty_cycle),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SimError::invalid(
                    field,
                    format!("must be in [0, 1], got {}", value),
                ));
            }
        }
        if !(self.error_correction >= 1.0 && self.error_correction.is_finite()) {
            return Err(SimError::invalid(
                "errorCorrection",
                format!("must be >= 1, got {}", self.error_correction),
            ));
        }
        self.detector.validate()?;
        self.intensities.validate()
    }
}

/// Click probability Q(η, n) for mean photon number `n`.
pub fn click_probability(eta: f64, detector: &DetectorParams, n: f64) -> f64 {
    detector.background_yield() + (1.0 + detector.afterpulse) * (1.0 - (-n * eta).exp())
}

/// Error-weighted click probability EQ(η, n).
pub fn error_click_probability(eta: f64, detector: &DetectorParams, n: f64) -> f64 {
    detector.background_error * detector.background_yield()
        + (detector.polarization_error + detector.background_error * detector.afterpulse)
            * (1.0 - (-n * eta).exp())
}

/// Binary Shannon entropy; 0 at and beyond the endpoints.
pub fn binary_entropy(p: f64) -> f64 {
    if p <= 0.0 || p >= 1.0 {
        return 0.0;
    }
    -p * p.log2() - (1.0 - p) * (1.0 - p).log2()
}

fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QberEstimate {
    /// E_μ
    pub qber: f64,
    /// ⟨Q_μ⟩
    pub gain: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRateEstimate {
    pub zenith_deg: f64,
    pub qber: f64,
    pub gain: f64,
    /// Single-photon gain lower bound ⟨Q₁ᴸ⟩
    pub single_photon_gain: f64,
    /// Single-photon error upper bound e₁ᵁ
    pub single_photon_error: f64,
    /// Secure key rate (bit/s). Negative when no key can be distilled.
    pub skr: f64,
}

/// Decoy-state solver over one atmospheric channel.
#[derive(Debug, Clone)]
pub struct AnalyticSolver {
    channel: Arc<AtmosphericChannel>,
    quadrature: Quadrature,
}

impl AnalyticSolver {
    pub fn new(geometry: AtmosphericGeometry) -> Result<Self> {
        Ok(Self::with_channel(Arc::new(AtmosphericChannel::new(geometry)?)))
    }

    pub fn with_channel(channel: Arc<AtmosphericChannel>) -> Self {
        Self {
            channel,
            quadrature: Quadrature::default(),
        }
    }

    pub fn with_quadrature(mut self, quadrature: Quadrature) -> Self {
        self.quadrature = quadrature;
        self
    }

    pub fn channel(&self) -> &Arc<AtmosphericChannel> {
        &self.channel
    }

    fn average<F: Fn(f64) -> f64>(
        &self,
        integrand: &'static str,
        params: &TurbulenceParameters,
        g: F,
    ) -> Result<f64> {
        Ok(params.expectation(&self.quadrature, integrand, g)?.value)
    }

    /// ∫f(η)dη must be 1 within `NORMALIZATION_TOL`.
    fn check_normalization(&self, params: &TurbulenceParameters) -> Result<()> {
        let mass = params.expectation(&self.quadrature, "f_eta normalization", |_| 1.0)?;
        if (mass.value - 1.0).abs() > NORMALIZATION_TOL {
            return Err(SimError::Integration {
                integrand: "f_eta normalization",
                value: mass.value,
                abs_error: (mass.value - 1.0).abs(),
                intervals: mass.intervals,
            });
        }
        Ok(())
    }

    fn qber_with(
        &self,
        params: &TurbulenceParameters,
        detector: &DetectorParams,
        signal: f64,
    ) -> Result<QberEstimate> {
        self.check_normalization(params)?;
        let gain = self.average("Q_mu", params, |eta| click_probability(eta, detector, signal))?;
        let errors = self.average("EQ_mu", params, |eta| {
            error_click_probability(eta, detector, signal)
        })?;
        Ok(QberEstimate {
            qber: ratio(errors, gain),
            gain,
        })
    }

    /// Fading-averaged QBER and gain at mean photon number `signal`.
    pub fn average_qber(
        &self,
        detector: &DetectorParams,
        signal: f64,
        zenith_deg: f64,
    ) -> Result<QberEstimate> {
        detector.validate()?;
        if !(signal > 0.0 && signal.is_finite()) {
            return Err(SimError::invalid(
                "intensities.signal",
                format!("must be > 0, got {}", signal),
            ));
        }
        let params = self.channel.prepare_parameters(zenith_deg)?;
        self.qber_with(&params, detector, signal)
    }

    pub fn secure_key_rate(&self, rate: &KeyRateParams, zenith_deg: f64) -> Result<KeyRateEstimate> {
        rate.validate()?;
        let params = self.channel.prepare_parameters(zenith_deg)?;
        let det = &rate.detector;
        let (ns, nd) = (rate.intensities.signal, rate.intensities.decoy);
        let y0 = det.background_yield();

        let QberEstimate { qber, gain } = self.qber_with(&params, det, ns)?;

        let y1_lower = |eta: f64| {
            ns / (ns * nd - nd * nd)
                * (click_probability(eta, det, nd) * nd.exp()
                    - click_probability(eta, det, ns) * ns.exp() * (nd * nd) / (ns * ns)
                    - (ns * ns - nd * nd) / (ns * ns) * y0)
        };
        let single_photon_gain =
            self.average("Q1_L", &params, |eta| (-ns).exp() * ns * y1_lower(eta))?;
        // EQ at the decoy intensity ν, as the vacuum + weak decoy bound requires
        let single_photon_errors = self.average("e1_U", &params, |eta| {
            (error_click_probability(eta, det, nd) * nd.exp() - det.background_error * y0) / nd
                * (-ns).exp()
                * ns
        })?;
        let single_photon_error = ratio(single_photon_errors, single_photon_gain);

        let skr = rate.repetition_rate_hz
            * rate.sifting_factor
            * rate.signal_probability
            * rate.duty_cycle
            * (-gain * rate.error_correction * binary_entropy(qber)
                + single_photon_gain * (1.0 - binary_entropy(single_photon_error)));

        debug!(
            "zenith {}°: E_μ = {:.5}, Q_μ = {:.4e}, Q1_L = {:.4e}, e1_U = {:.5}, SKR = {:.4e}",
            zenith_deg, qber, gain, single_photon_gain, single_photon_error, skr
        );
        Ok(KeyRateEstimate {
            zenith_deg,
            qber,
            gain,
            single_photon_gain,
            single_photon_error,
            skr,
        })
    }
}
