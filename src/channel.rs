//! Channel impairments applied to a photon between preparation and measurement.
//!
//! Order per photon is fixed: loss check (short-circuits), then the
//! probability-gated perturbation, then the unconditional SOP drift.

use log::debug;

use crate::bb84_states::QubitState;
use crate::config::{
    FadingPolicy, FadingSource, FiberLink, FreeSpaceLink, ImpairmentToggles, Link,
    SimulationConfig,
};
use crate::error::{Result, SimError};
use crate::rng::RandomSource;
use crate::turbulence::{AtmosphericChannel, FadingSampler};
use crate::units::{db_to_transmittance, path_loss_db, PI};

/// End-to-end detection probability of a fiber link,
/// η_src · 10^(−L·α/10) · η_det.
pub fn fiber_transmittance(
    length: f64,
    loss_per_unit: f64,
    source_efficiency: f64,
    detector_efficiency: f64,
) -> f64 {
    source_efficiency * db_to_transmittance(path_loss_db(length, loss_per_unit)) * detector_efficiency
}

/// Detection probability of a free-space link, 10^(−0.1·k·L) · fading · η_det,
/// clamped to 1 since the fading coefficient may exceed unity. NaN passes through.
pub fn free_space_transmittance(
    fading: f64,
    extinction_per_unit: f64,
    length: f64,
    detector_efficiency: f64,
) -> f64 {
    let atmospheric = db_to_transmittance(path_loss_db(length, extinction_per_unit));
    let t = atmospheric * fading * detector_efficiency;
    if t > 1.0 {
        1.0
    } else {
        t
    }
}

/// One uniform draw against `transmittance`.
pub fn survives(transmittance: f64, rng: &mut RandomSource) -> bool {
    rng.uniform() < transmittance
}

/// With probability `p`, rotate by θ ~ U(0, π).
pub fn apply_perturbation(state: QubitState, p: f64, rng: &mut RandomSource) -> QubitState {
    if rng.bernoulli(p) {
        state.rotate(rng.uniform_range(0.0, PI))
    } else {
        state
    }
}

/// Rotate by θ ~ N(0, σ).
pub fn apply_sop_deviation(state: QubitState, sigma: f64, rng: &mut RandomSource) -> QubitState {
    state.rotate(rng.normal(0.0, sigma))
}

/// Outcome of sending one photon through the channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transit {
    Impaired(QubitState),
    Lost,
}

enum FadingDraw {
    Turbulence(FadingSampler),
    LogNormal { sigma2: f64 },
    Fixed(f64),
}

/// Fading coefficient sequence for a free-space link.
///
/// Holds the current coefficient for `policy.interval()` consecutive photons
/// before redrawing. A fresh process always draws on its first photon.
pub struct FadingProcess {
    draw: FadingDraw,
    interval: usize,
    current: f64,
    used: usize,
}

impl FadingProcess {
    /// `atmosphere` supplies the cached turbulence parameters when `source` is
    /// turbulence-based; one is built on the spot if none is given.
    pub fn new(
        source: &FadingSource,
        policy: FadingPolicy,
        atmosphere: Option<&AtmosphericChannel>,
    ) -> Result<Self> {
        let draw = match *source {
            FadingSource::Turbulence {
                geometry,
                zenith_deg,
                bounds,
            } => {
                let sampler = match atmosphere {
                    Some(channel) if *channel.geometry() == geometry => {
                        channel.sampler(zenith_deg, bounds)?
                    }
                    _ => AtmosphericChannel::new(geometry)?.sampler(zenith_deg, bounds)?,
                };
                FadingDraw::Turbulence(sampler)
            }
            FadingSource::LogNormal { log_variance } => FadingDraw::LogNormal {
                sigma2: log_variance,
            },
            FadingSource::Fixed { eta } => FadingDraw::Fixed(eta),
        };
        let interval = policy.interval();
        Ok(Self {
            draw,
            interval,
            current: 1.0,
            used: interval,
        })
    }

    /// Fading coefficient for the next photon.
    pub fn next(&mut self, rng: &mut RandomSource) -> Result<f64> {
        if self.used >= self.interval {
            self.current = match &mut self.draw {
                FadingDraw::Turbulence(sampler) => sampler.draw(rng)?,
                FadingDraw::LogNormal { sigma2 } => {
                    rng.log_normal(-*sigma2 / 2.0, sigma2.sqrt())
                }
                FadingDraw::Fixed(eta) => *eta,
            };
            self.used = 0;
        }
        self.used += 1;
        Ok(self.current)
    }
}

enum Medium {
    Fiber { transmittance: f64 },
    FreeSpace { link: FreeSpaceLink, fading: FadingProcess },
}

/// Loss, perturbation and SOP drift for one configured link.
///
/// Stateful only through the fading process, so each trial loop (or parallel
/// chunk) owns its own instance.
pub struct ImpairmentModel {
    medium: Medium,
    toggles: ImpairmentToggles,
    perturb_probability: f64,
    sop_deviation: f64,
}

impl ImpairmentModel {
    pub fn new(config: &SimulationConfig, atmosphere: Option<&AtmosphericChannel>) -> Result<Self> {
        let medium = match config.link {
            Link::Fiber(FiberLink {
                length_km,
                loss_db_per_km,
                source_efficiency,
                detector_efficiency,
            }) => Medium::Fiber {
                transmittance: fiber_transmittance(
                    length_km,
                    loss_db_per_km,
                    source_efficiency,
                    detector_efficiency,
                ),
            },
            Link::FreeSpace(link) => Medium::FreeSpace {
                link,
                fading: FadingProcess::new(&link.fading, link.refresh, atmosphere)?,
            },
        };
        if let Medium::Fiber { transmittance } = medium {
            debug!("fiber link transmittance {:.4e}", transmittance);
        }
        Ok(Self {
            medium,
            toggles: config.toggles,
            perturb_probability: config.perturb_probability,
            sop_deviation: config.sop_deviation_rad,
        })
    }

    /// Detection probability for the next photon. Advances the fading process
    /// on free-space links.
    pub fn next_transmittance(&mut self, rng: &mut RandomSource) -> Result<f64> {
        match &mut self.medium {
            Medium::Fiber { transmittance } => Ok(*transmittance),
            Medium::FreeSpace { link, fading } => {
                let eta = fading.next(rng)?;
                Ok(free_space_transmittance(
                    eta,
                    link.extinction_db_per_m,
                    link.length_m,
                    link.detector_efficiency,
                ))
            }
        }
    }

    pub fn transmit(&mut self, photon: QubitState, rng: &mut RandomSource) -> Result<Transit> {
        if self.toggles.loss {
            let t = self.next_transmittance(rng)?;
            if !t.is_finite() {
                return Err(SimError::invalid(
                    "link",
                    format!("transmittance is not finite ({})", t),
                ));
            }
            if !survives(t, rng) {
                return Ok(Transit::Lost);
            }
        }
        let mut photon = photon;
        if self.toggles.perturbation {
            photon = apply_perturbation(photon, self.perturb_probability, rng);
        }
        if self.toggles.sop_deviation {
            photon = apply_sop_deviation(photon, self.sop_deviation, rng);
        }
        Ok(Transit::Impaired(photon))
    }
}
