//! Simulation configuration.
//!
//! Every record deserializes from camelCase JSON with missing fields falling
//! back to their defaults, so a caller can send only what it wants to change.
//! The sifting policy is the one field without a default.

use serde::{Deserialize, Serialize};

use crate::eavesdropper::InterceptResend;
use crate::error::{Result, SimError};
use crate::turbulence::{validate_zenith, AtmosphericGeometry, SamplerBounds};
use crate::units::{DEFAULT_FSO_EXTINCTION_DB_PER_M, DEFAULT_SOURCE_RATE_HZ};

/// Which trials make it into the sifted key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SiftingPolicy {
    /// Detected, same basis, and Bob's bit agrees with Alice's.
    Strict,
    /// Detected and same basis, errors included.
    BasisOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum QberEstimator {
    /// Error rate over every basis-matching detection.
    Exact,
    /// Error rate over a random subset of the basis-matching detections.
    Sampled { fraction: f64 },
}

impl Default for QberEstimator {
    fn default() -> Self {
        QberEstimator::Exact
    }
}

impl QberEstimator {
    /// Share of the sifted key spent on error estimation.
    pub fn sacrificed_fraction(&self) -> f64 {
        match *self {
            QberEstimator::Exact => 0.0,
            QberEstimator::Sampled { fraction } => fraction,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImpairmentToggles {
    pub loss: bool,
    pub perturbation: bool,
    pub sop_deviation: bool,
    pub eavesdropping: bool,
}

impl Default for ImpairmentToggles {
    fn default() -> Self {
        Self {
            loss: true,
            perturbation: true,
            sop_deviation: true,
            eavesdropping: false,
        }
    }
}

impl ImpairmentToggles {
    pub fn none() -> Self {
        Self {
            loss: false,
            perturbation: false,
            sop_deviation: false,
            eavesdropping: false,
        }
    }
}

/// Optical fiber with exponential attenuation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FiberLink {
    pub length_km: f64,
    pub loss_db_per_km: f64,
    pub source_efficiency: f64,
    pub detector_efficiency: f64,
}

impl Default for FiberLink {
    fn default() -> Self {
        Self {
            length_km: 100.0,
            loss_db_per_km: 0.2,
            source_efficiency: 0.9,
            detector_efficiency: 0.8,
        }
    }
}

/// Where the free-space fading coefficient comes from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FadingSource {
    /// Rejection-sampled from the turbulence density f(η).
    #[serde(rename_all = "camelCase")]
    Turbulence {
        #[serde(default)]
        geometry: AtmosphericGeometry,
        #[serde(default = "default_zenith")]
        zenith_deg: f64,
        #[serde(default)]
        bounds: SamplerBounds,
    },
    /// Unit-mean log-normal, exp(N(−σ²/2, σ²)).
    #[serde(rename_all = "camelCase")]
    LogNormal { log_variance: f64 },
    /// Constant coefficient.
    Fixed { eta: f64 },
}

fn default_zenith() -> f64 {
    30.0
}

impl Default for FadingSource {
    fn default() -> Self {
        FadingSource::LogNormal {
            log_variance: 1.5f64.ln(),
        }
    }
}

/// How often the fading coefficient is redrawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FadingPolicy {
    PerTrial,
    Periodic { every: usize },
}

impl Default for FadingPolicy {
    fn default() -> Self {
        FadingPolicy::Periodic { every: 1000 }
    }
}

impl FadingPolicy {
    /// Trials sharing one fading coefficient.
    pub fn interval(&self) -> usize {
        match *self {
            FadingPolicy::PerTrial => 1,
            FadingPolicy::Periodic { every } => every.max(1),
        }
    }
}

/// Free-space optical link.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FreeSpaceLink {
    pub length_m: f64,
    /// Clear-air extinction k (dB/m)
    pub extinction_db_per_m: f64,
    pub detector_efficiency: f64,
    pub fading: FadingSource,
    pub refresh: FadingPolicy,
}

impl Default for FreeSpaceLink {
    fn default() -> Self {
        Self {
            length_m: 1000.0,
            extinction_db_per_m: DEFAULT_FSO_EXTINCTION_DB_PER_M,
            detector_efficiency: 0.6,
            fading: FadingSource::default(),
            refresh: FadingPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Link {
    Fiber(FiberLink),
    FreeSpace(FreeSpaceLink),
}

impl Default for Link {
    fn default() -> Self {
        Link::Fiber(FiberLink::default())
    }
}

/// Everything one protocol run needs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationConfig {
    #[serde(default)]
    pub link: Link,
    /// Probability that a photon picks up a random RY(θ), θ ~ U(0, π).
    #[serde(default = "default_perturb_probability")]
    pub perturb_probability: f64,
    /// Std of the polarization drift RY(θ), θ ~ N(0, σ) (rad).
    #[serde(default = "default_sop_deviation")]
    pub sop_deviation_rad: f64,
    #[serde(default)]
    pub toggles: ImpairmentToggles,
    #[serde(default)]
    pub eavesdropper: InterceptResend,
    pub sifting: SiftingPolicy,
    #[serde(default)]
    pub qber: QberEstimator,
    /// Pulse rate used for link-budget key rates (Hz).
    #[serde(default = "default_source_rate")]
    pub source_rate_hz: f64,
}

fn default_perturb_probability() -> f64 {
    0.1
}

fn default_sop_deviation() -> f64 {
    0.1
}

fn default_source_rate() -> f64 {
    DEFAULT_SOURCE_RATE_HZ
}

fn probability(field: &'static str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SimError::invalid(
            field,
            format!("must be a probability in [0, 1], got {}", value),
        ))
    }
}

fn positive(field: &'static str, value: f64) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(SimError::invalid(field, format!("must be > 0, got {}", value)))
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<()> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(SimError::invalid(field, format!("must be >= 0, got {}", value)))
    }
}

impl FiberLink {
    pub fn validate(&self) -> Result<()> {
        positive("link.lengthKm", self.length_km)?;
        non_negative("link.lossDbPerKm", self.loss_db_per_km)?;
        probability("link.sourceEfficiency", self.source_efficiency)?;
        probability("link.detectorEfficiency", self.detector_efficiency)
    }
}

impl FadingSource {
    pub fn validate(&self) -> Result<()> {
        match *self {
            FadingSource::Turbulence {
                geometry,
                zenith_deg,
                bounds,
            } => {
                geometry.validate()?;
                validate_zenith(zenith_deg)?;
                bounds.validate()
            }
            FadingSource::LogNormal { log_variance } => {
                non_negative("link.fading.logVariance", log_variance)
            }
            FadingSource::Fixed { eta } => {
                if eta > 0.0 && eta.is_finite() {
                    Ok(())
                } else {
                    Err(SimError::invalid(
                        "link.fading.eta",
                        format!("must be > 0, got {}", eta),
                    ))
                }
            }
        }
    }
}

impl FreeSpaceLink {
    pub fn validate(&self) -> Result<()> {
        positive("link.lengthM", self.length_m)?;
        non_negative("link.extinctionDbPerM", self.extinction_db_per_m)?;
        probability("link.detectorEfficiency", self.detector_efficiency)?;
        if let FadingPolicy::Periodic { every: 0 } = self.refresh {
            return Err(SimError::invalid("link.refresh.every", "must be >= 1"));
        }
        self.fading.validate()
    }
}

impl SimulationConfig {
    /// Checks every field; reports the first one out of range.
    pub fn validate(&self) -> Result<()> {
        match &self.link {
            Link::Fiber(fiber) => fiber.validate()?,
            Link::FreeSpace(fso) => fso.validate()?,
        }
        probability("perturbProbability", self.perturb_probability)?;
        non_negative("sopDeviationRad", self.sop_deviation_rad)?;
        self.eavesdropper.validate()?;
        if let QberEstimator::Sampled { fraction } = self.qber {
            if !(fraction > 0.0 && fraction <= 1.0) {
                return Err(SimError::invalid(
                    "qber.fraction",
                    format!("must be in (0, 1], got {}", fraction),
                ));
            }
        }
        positive("sourceRateHz", self.source_rate_hz)
    }

    /// Default fiber link with every impairment enabled.
    pub fn new(sifting: SiftingPolicy) -> Self {
        Self {
            link: Link::default(),
            perturb_probability: default_perturb_probability(),
            sop_deviation_rad: default_sop_deviation(),
            toggles: ImpairmentToggles::default(),
            eavesdropper: InterceptResend::default(),
            sifting,
            qber: QberEstimator::Exact,
            source_rate_hz: DEFAULT_SOURCE_RATE_HZ,
        }
    }

    /// Noise-free, loss-free channel without an eavesdropper.
    pub fn ideal(sifting: SiftingPolicy) -> Self {
        Self {
            toggles: ImpairmentToggles::none(),
            ..Self::new(sifting)
        }
    }

    /// 20 km of standard telecom fiber.
    pub fn metro_fiber(sifting: SiftingPolicy) -> Self {
        Self {
            link: Link::Fiber(FiberLink {
                length_km: 20.0,
                loss_db_per_km: 0.2,
                source_efficiency: 0.7,
                detector_efficiency: 0.6,
            }),
            perturb_probability: 0.01,
            sop_deviation_rad: 0.05,
            ..Self::new(sifting)
        }
    }

    /// 1 km clear-air free-space link with turbulence fading at 30° zenith.
    pub fn free_space(sifting: SiftingPolicy) -> Self {
        Self {
            link: Link::FreeSpace(FreeSpaceLink {
                fading: FadingSource::Turbulence {
                    geometry: AtmosphericGeometry::default(),
                    zenith_deg: default_zenith(),
                    bounds: SamplerBounds::default(),
                },
                ..FreeSpaceLink::default()
            }),
            ..Self::new(sifting)
        }
    }

    pub fn with_toggles(mut self, toggles: ImpairmentToggles) -> Self {
        self.toggles = toggles;
        self
    }

    pub fn with_eavesdropping(mut self, enabled: bool) -> Self {
        self.toggles.eavesdropping = enabled;
        self
    }

    pub fn with_qber(mut self, qber: QberEstimator) -> Self {
        self.qber = qber;
        self
    }
}
