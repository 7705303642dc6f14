//! Slant-path atmospheric channel for satellite-to-ground links.
//!
//! Derives the fading-transmittance density f(η) of a ground station
//! receiving a downlink beam through turbulence:
//!
//! 1. **Hufnagel–Valley profile** Cn²(h): wind-shear term, tropopause
//!    exponential and ground-layer exponential.
//! 2. **Rytov variance** σ_R² = 2.25 k^(7/6) sec(ζ)^(11/6) ∫ Cn²(h)(h − H_ogs)^(5/6) dh.
//! 3. **Beam sizes**: diffraction waist w₀ = λ/(πθ), free-space spread w, and the
//!    long-term radius w_L broadened by the turbulence integral
//!    ∫ Cn²(h)((h − H_ogs)/(H_atm − H_ogs))^(5/3) dh.
//! 4. **Elliptic-beam modulation**: aperture-averaged width w_leg, pointing
//!    jitter (θ/5)·L, and from those φ_mod, A_mod, μ.
//! 5. **PDF**: f(η) = φ²/(2(A_mod η_l)^φ²) η^(φ²−1)
//!    erfc[(ln(η/(A_mod η_l)) + μ)/(√2 σ_R)] exp(σ_R²φ²(1 + φ²)/2).
//!
//! The two altitude integrals do not depend on zenith and are computed once per
//! channel. Everything else is cached per zenith angle, so sweeps and trial
//! loops pay for the derivation once.
//!
//! References:
//! - Andrews & Phillips (2005), *Laser Beam Propagation through Random Media*
//! - Vasylyev, Semenov, Vogel (2016), PRL 117, 090501 (elliptic-beam model)
//! - Liorni, Kampermann, Bruß (2019), NJP 21, 093055 (satellite QKD fading)

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use libm::{erf, erfc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::quadrature::{Integral, Quadrature};
use crate::rng::RandomSource;
use crate::units::{sec_deg, slant_range_m, PI};

/// Scale applied to the Hufnagel–Valley wind-shear term.
const WIND_SHEAR_SCALE: f64 = 0.2;

/// Grid points are kept while f ≥ f_max · this, when trimming the sampling box.
const SUPPORT_FLOOR: f64 = 1e-9;

/// Physical description of the slant path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AtmosphericGeometry {
    /// Optical wavelength (nm)
    pub wavelength_nm: f64,
    /// Receiver aperture radius a (m)
    pub aperture_radius_m: f64,
    /// Clear-sky transmittance at zenith τ_zen
    pub zenith_transmittance: f64,
    /// Beam divergence half-angle θ (rad)
    pub divergence_rad: f64,
    /// Ground station altitude H_ogs (m)
    pub ground_altitude_m: f64,
    /// Top of the turbulent atmosphere H_atm (m)
    pub atmosphere_altitude_m: f64,
    /// RMS high-altitude wind speed (m/s)
    pub wind_speed_m_s: f64,
    /// Ground-layer turbulence strength A (m^-2/3)
    pub ground_turbulence: f64,
    /// Transmitter altitude (m)
    pub source_altitude_m: f64,
    /// Beam boresight offset in x and y (m)
    pub boresight_m: [f64; 2],
}

impl Default for AtmosphericGeometry {
    /// 850 nm LEO downlink from 500 km into a 1.5 m telescope.
    fn default() -> Self {
        Self {
            wavelength_nm: 850.0,
            aperture_radius_m: 0.75,
            zenith_transmittance: 0.8,
            divergence_rad: 10e-6,
            ground_altitude_m: 10.0,
            atmosphere_altitude_m: 20e3,
            wind_speed_m_s: 21.0,
            ground_turbulence: 1e-12,
            source_altitude_m: 500e3,
            boresight_m: [0.0, 0.0],
        }
    }
}

impl AtmosphericGeometry {
    pub fn validate(&self) -> Result<()> {
        positive("geometry.wavelengthNm", self.wavelength_nm)?;
        positive("geometry.apertureRadiusM", self.aperture_radius_m)?;
        positive("geometry.divergenceRad", self.divergence_rad)?;
        if !(self.zenith_transmittance > 0.0 && self.zenith_transmittance <= 1.0) {
            return Err(SimError::invalid(
                "geometry.zenithTransmittance",
                format!("must be in (0, 1], got {}", self.zenith_transmittance),
            ));
        }
        if !(self.ground_altitude_m >= 0.0) {
            return Err(SimError::invalid(
                "geometry.groundAltitudeM",
                format!("must be >= 0, got {}", self.ground_altitude_m),
            ));
        }
        if !(self.atmosphere_altitude_m > self.ground_altitude_m) {
            return Err(SimError::invalid(
                "geometry.atmosphereAltitudeM",
                "must lie above the ground station",
            ));
        }
        if !(self.source_altitude_m > self.ground_altitude_m) {
            return Err(SimError::invalid(
                "geometry.sourceAltitudeM",
                "must lie above the ground station",
            ));
        }
        if !(self.wind_speed_m_s >= 0.0) || !(self.ground_turbulence >= 0.0) {
            return Err(SimError::invalid(
                "geometry.groundTurbulence",
                "wind speed and turbulence strength must be >= 0",
            ));
        }
        if self.boresight_m.iter().any(|b| !b.is_finite()) {
            return Err(SimError::invalid("geometry.boresightM", "must be finite"));
        }
        Ok(())
    }

    pub fn wavelength_m(&self) -> f64 {
        self.wavelength_nm * 1e-9
    }

    /// Optical wavenumber k = 2π/λ (rad/m)
    pub fn wavenumber(&self) -> f64 {
        2.0 * PI / self.wavelength_m()
    }
}

fn positive(field: &'static str, value: f64) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(SimError::invalid(field, format!("must be > 0, got {}", value)))
    }
}

pub fn validate_zenith(zenith_deg: f64) -> Result<()> {
    if (0.0..90.0).contains(&zenith_deg) {
        Ok(())
    } else {
        Err(SimError::invalid(
            "zenithDeg",
            format!("must be in [0, 90), got {}", zenith_deg),
        ))
    }
}

/// Beam radii at the receiver (m).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BeamSizes {
    /// Diffraction-limited waist w₀
    pub waist: f64,
    /// Free-space (vacuum) spread w at the receiver
    pub spread: f64,
    /// Long-term radius w_L including turbulent broadening
    pub long_term: f64,
}

/// Everything f(η) needs for one zenith angle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TurbulenceParameters {
    pub zenith_deg: f64,
    pub slant_range_m: f64,
    pub rytov_variance: f64,
    pub beam: BeamSizes,
    /// Pointing-jitter std in each transverse axis (m)
    pub pointing_jitter_m: f64,
    pub phi_mod: f64,
    pub a_mod: f64,
    /// Atmospheric transmittance τ_zen^sec(ζ)
    pub eta_l: f64,
    /// Log-amplitude mean
    pub mu: f64,
    /// Scintillation std σ_R
    pub sigma_r: f64,
}

impl TurbulenceParameters {
    pub fn pdf(&self, eta: f64) -> f64 {
        fading_pdf(eta, self.phi_mod, self.a_mod, self.eta_l, self.mu, self.sigma_r)
    }

    /// ln(η f(η)) at η = e^u, evaluated without forming η.
    ///
    /// Near the horizon σ_R² reaches the thousands and the density sits at
    /// η far below the smallest positive f64, so it only exists in log space.
    pub fn ln_density_log_eta(&self, u: f64) -> f64 {
        let power = self.phi_mod * self.phi_mod;
        let ln_scale = (self.a_mod * self.eta_l).ln();
        let z = (u - ln_scale + self.mu) / (std::f64::consts::SQRT_2 * self.sigma_r);
        (power / 2.0).ln()
            + power * (u - ln_scale)
            + ln_erfc(z)
            + self.sigma_r * self.sigma_r / 2.0 * power * (1.0 + power)
    }

    /// ln η at the peak of η f(η), ln(A_mod η_l) − σ_R²/2.
    pub fn log_eta_peak(&self) -> f64 {
        (self.a_mod * self.eta_l).ln() - self.sigma_r * self.sigma_r / 2.0
    }

    /// ∫₀^∞ g(η) f(η) dη, integrated over u = ln η.
    ///
    /// The range is split at the log-space peak and each half is scaled by σ_R,
    /// so the quadrature sees a unit-width bump at every zenith angle.
    /// `g` receives η = e^u, which may underflow to 0 or overflow to ∞.
    pub fn expectation<G: Fn(f64) -> f64>(
        &self,
        quad: &Quadrature,
        integrand: &'static str,
        g: G,
    ) -> Result<Integral> {
        let peak = self.log_eta_peak();
        let width = self.sigma_r;
        let h = |u: f64| {
            let density = self.ln_density_log_eta(u).exp();
            if density == 0.0 {
                0.0
            } else {
                g(u.exp()) * density
            }
        };
        let above = quad.integrate_to_infinity(integrand, |w| h(peak + width * w), 0.0)?;
        let below = quad.integrate_to_infinity(integrand, |w| h(peak - width * w), 0.0)?;
        Ok(Integral {
            value: width * (above.value + below.value),
            abs_error: width * (above.abs_error + below.abs_error),
            intervals: above.intervals + below.intervals,
        })
    }
}

/// ln erfc(z), using the asymptotic series where erfc underflows.
pub fn ln_erfc(z: f64) -> f64 {
    if z < 25.0 {
        return erfc(z).ln();
    }
    let z2 = z * z;
    let inv = 1.0 / (2.0 * z2);
    -z2 - (z * PI.sqrt()).ln() + (1.0 - inv + 3.0 * inv * inv - 15.0 * inv * inv * inv).ln()
}

/// Fading-transmittance density f(η). Zero for η ≤ 0.
pub fn fading_pdf(eta: f64, phi_mod: f64, a_mod: f64, eta_l: f64, mu: f64, sigma_r: f64) -> f64 {
    if !(eta > 0.0) {
        return 0.0;
    }
    let power = phi_mod * phi_mod;
    let scale = a_mod * eta_l;
    let tail = erfc(((eta / scale).ln() + mu) / (std::f64::consts::SQRT_2 * sigma_r));
    if tail == 0.0 {
        return 0.0;
    }
    let coef = power / (2.0 * scale.powf(power));
    let correction = (sigma_r * sigma_r / 2.0 * power * (1.0 + power)).exp();
    coef * eta.powf(power - 1.0) * tail * correction
}

/// Atmospheric channel with a per-zenith parameter cache. Safe to share
/// between threads; the cache only ever grows.
#[derive(Debug)]
pub struct AtmosphericChannel {
    geometry: AtmosphericGeometry,
    /// ∫ Cn²(h)(h − H_ogs)^(5/6) dh
    scintillation_moment: f64,
    /// ∫ Cn²(h)((h − H_ogs)/(H_atm − H_ogs))^(5/3) dh
    broadening_moment: f64,
    cache: RwLock<HashMap<u64, TurbulenceParameters>>,
}

impl AtmosphericChannel {
    pub fn new(geometry: AtmosphericGeometry) -> Result<Self> {
        geometry.validate()?;
        let quad = Quadrature::new(0.0, 1e-10, 200);
        let (h0, h1) = (geometry.ground_altitude_m, geometry.atmosphere_altitude_m);
        let depth = h1 - h0;

        let scintillation_moment = quad
            .integrate(
                "Cn2 scintillation moment",
                |h| hufnagel_valley(&geometry, h) * (h - h0).powf(5.0 / 6.0),
                h0,
                h1,
            )?
            .value;
        let broadening_moment = quad
            .integrate(
                "Cn2 beam broadening moment",
                |h| hufnagel_valley(&geometry, h) * ((h - h0) / depth).powf(5.0 / 3.0),
                h0,
                h1,
            )?
            .value;
        debug!(
            "atmospheric channel ready: scintillation moment {:e}, broadening moment {:e}",
            scintillation_moment, broadening_moment
        );

        Ok(Self {
            geometry,
            scintillation_moment,
            broadening_moment,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn geometry(&self) -> &AtmosphericGeometry {
        &self.geometry
    }

    /// Refractive-index structure parameter at altitude `h` (m^-2/3).
    pub fn cn2(&self, h: f64) -> f64 {
        hufnagel_valley(&self.geometry, h)
    }

    /// Slant range to the source (m).
    pub fn slant_range(&self, zenith_deg: f64) -> f64 {
        slant_range_m(
            self.geometry.ground_altitude_m,
            self.geometry.source_altitude_m,
            zenith_deg,
        )
    }

    /// Rytov variance σ_R² along the slant path.
    pub fn sigma_r2(&self, zenith_deg: f64) -> Result<f64> {
        validate_zenith(zenith_deg)?;
        Ok(2.25
            * self.geometry.wavenumber().powf(7.0 / 6.0)
            * sec_deg(zenith_deg).powf(11.0 / 6.0)
            * self.scintillation_moment)
    }

    pub fn beam_sizes(&self, zenith_deg: f64) -> Result<BeamSizes> {
        validate_zenith(zenith_deg)?;
        let g = &self.geometry;
        let k = g.wavenumber();
        let range = self.slant_range(zenith_deg);

        let waist = g.wavelength_m() / (PI * g.divergence_rad);
        let spread = waist * (1.0 + ((2.0 * range) / (k * waist * waist)).powi(2)).sqrt();

        let t1 = 4.35
            * ((2.0 * range) / (k * spread * spread)).powf(5.0 / 6.0)
            * k.powf(7.0 / 6.0)
            * (g.atmosphere_altitude_m - g.ground_altitude_m).powf(5.0 / 6.0)
            * sec_deg(zenith_deg).powf(11.0 / 6.0);
        let long_term = spread * (1.0 + t1 * self.broadening_moment).sqrt();

        Ok(BeamSizes {
            waist,
            spread,
            long_term,
        })
    }

    /// Derive (and memoize) the f(η) parameters for `zenith_deg`.
    pub fn prepare_parameters(&self, zenith_deg: f64) -> Result<TurbulenceParameters> {
        validate_zenith(zenith_deg)?;
        let key = zenith_deg.to_bits();
        if let Some(params) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(*params);
        }

        let params = self.derive_parameters(zenith_deg)?;
        debug!(
            "zenith {}°: σ_R² = {:.4}, w_L = {:.3} m, φ_mod = {:.4}, A_mod = {:.4e}, η_l = {:.4}",
            zenith_deg,
            params.rytov_variance,
            params.beam.long_term,
            params.phi_mod,
            params.a_mod,
            params.eta_l
        );
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, params);
        Ok(params)
    }

    fn derive_parameters(&self, zenith_deg: f64) -> Result<TurbulenceParameters> {
        let g = &self.geometry;
        let range = self.slant_range(zenith_deg);
        let rytov_variance = self.sigma_r2(zenith_deg)?;
        let beam = self.beam_sizes(zenith_deg)?;
        let w_l = beam.long_term;

        // Aperture-averaged beam width
        let nu = PI.sqrt() * g.aperture_radius_m / (std::f64::consts::SQRT_2 * w_l);
        let w_leg = (w_l * w_l * (PI.sqrt() * erf(nu)) / (2.0 * nu * (-nu * nu).exp())).sqrt();

        let jitter = (g.divergence_rad / 5.0) * range;
        let (sx, sy) = (jitter, jitter);
        let [mx, my] = g.boresight_m;
        // Sixth root, not cube root: σ_mod must reduce to σ when the boresight is zero
        let sigma_mod = ((3.0 * mx * mx * sx.powi(4)
            + 3.0 * my * my * sy.powi(4)
            + sx.powi(6)
            + sy.powi(6))
            / 2.0)
            .powf(1.0 / 6.0);

        let phi_mod = w_leg / (2.0 * sigma_mod);
        let phi_x = w_leg / (2.0 * sx);
        let phi_y = w_leg / (2.0 * sy);
        let a0 = erf(nu).powi(2);
        let g_exp = 1.0 / (phi_mod * phi_mod)
            - 1.0 / (2.0 * phi_x * phi_x)
            - 1.0 / (2.0 * phi_y * phi_y)
            - mx * mx / (2.0 * sx * sx * phi_x * phi_x)
            - my * my / (2.0 * sy * sy * phi_y * phi_y);
        let a_mod = a0 * g_exp.exp();

        let params = TurbulenceParameters {
            zenith_deg,
            slant_range_m: range,
            rytov_variance,
            beam,
            pointing_jitter_m: jitter,
            phi_mod,
            a_mod,
            eta_l: g.zenith_transmittance.powf(sec_deg(zenith_deg)),
            mu: rytov_variance / 2.0 * (1.0 + 2.0 * phi_mod * phi_mod),
            sigma_r: rytov_variance.sqrt(),
        };
        if [params.phi_mod, params.a_mod, params.mu, params.sigma_r]
            .iter()
            .any(|v| !v.is_finite() || *v <= 0.0)
        {
            return Err(SimError::invalid(
                "geometry",
                format!("degenerate turbulence parameters at zenith {}°", zenith_deg),
            ));
        }
        Ok(params)
    }

    /// f(η) at `zenith_deg`.
    pub fn f_eta(&self, eta: f64, zenith_deg: f64) -> Result<f64> {
        Ok(self.prepare_parameters(zenith_deg)?.pdf(eta))
    }

    pub fn sampler(&self, zenith_deg: f64, bounds: SamplerBounds) -> Result<FadingSampler> {
        FadingSampler::new(self.prepare_parameters(zenith_deg)?, bounds)
    }

    /// Draw `n` fading coefficients at `zenith_deg`.
    pub fn sample(
        &self,
        zenith_deg: f64,
        n: usize,
        bounds: SamplerBounds,
        rng: &mut RandomSource,
    ) -> Result<Vec<f64>> {
        self.sampler(zenith_deg, bounds)?.draw_many(n, rng)
    }

    /// Number of zenith angles derived so far.
    pub fn cached_zeniths(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

fn hufnagel_valley(g: &AtmosphericGeometry, h: f64) -> f64 {
    let wind_shear = WIND_SHEAR_SCALE
        * 0.00594
        * (g.wind_speed_m_s / 27.0).powi(2)
        * (h / 1e5).powi(10)
        * (-h / 1000.0).exp();
    let tropopause = 2.7e-16 * (-h / 1500.0).exp();
    let ground = g.ground_turbulence * (-h / 100.0).exp();
    wind_shear + tropopause + ground
}

/// Bounding box and retry budget for rejection sampling of f(η).
///
/// f_max is the largest f(η) on `grid_points` evenly spaced points over
/// [eta_min, eta_max], times `headroom` to cover peaks falling between grid
/// points. Each draw gets `max_attempts` tries. When they run out, the grid is
/// made four times denser, f_max re-estimated, and the box trimmed to where f
/// is non-negligible. This happens at most `max_refinements` times.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SamplerBounds {
    pub eta_min: f64,
    pub eta_max: f64,
    pub grid_points: usize,
    pub headroom: f64,
    pub max_attempts: usize,
    pub max_refinements: usize,
}

impl Default for SamplerBounds {
    fn default() -> Self {
        Self {
            eta_min: 0.001,
            eta_max: 0.1,
            grid_points: 500,
            headroom: 1.05,
            max_attempts: 100_000,
            max_refinements: 3,
        }
    }
}

impl SamplerBounds {
    pub fn validate(&self) -> Result<()> {
        if !(self.eta_min > 0.0 && self.eta_min < self.eta_max && self.eta_max <= 1.0) {
            return Err(SimError::invalid(
                "sampler.etaMin",
                format!(
                    "need 0 < etaMin < etaMax <= 1, got [{}, {}]",
                    self.eta_min, self.eta_max
                ),
            ));
        }
        if self.grid_points < 2 {
            return Err(SimError::invalid("sampler.gridPoints", "must be >= 2"));
        }
        if !(self.headroom >= 1.0 && self.headroom.is_finite()) {
            return Err(SimError::invalid("sampler.headroom", "must be >= 1"));
        }
        if self.max_attempts == 0 {
            return Err(SimError::invalid("sampler.maxAttempts", "must be >= 1"));
        }
        Ok(())
    }
}

/// Rejection sampler over f(η) for one zenith angle.
#[derive(Debug, Clone)]
pub struct FadingSampler {
    params: TurbulenceParameters,
    bounds: SamplerBounds,
    lo: f64,
    hi: f64,
    grid_points: usize,
    f_max: f64,
    refinements: usize,
}

impl FadingSampler {
    pub fn new(params: TurbulenceParameters, bounds: SamplerBounds) -> Result<Self> {
        bounds.validate()?;
        let mut sampler = Self {
            params,
            bounds,
            lo: bounds.eta_min,
            hi: bounds.eta_max,
            grid_points: bounds.grid_points,
            f_max: 0.0,
            refinements: 0,
        };
        sampler.f_max = sampler.grid_max().0 * bounds.headroom;
        if !(sampler.f_max > 0.0 && sampler.f_max.is_finite()) {
            return Err(SimError::invalid(
                "sampler.etaMin",
                format!(
                    "f(η) vanishes on [{}, {}] at zenith {}°",
                    bounds.eta_min, bounds.eta_max, params.zenith_deg
                ),
            ));
        }
        Ok(sampler)
    }

    pub fn parameters(&self) -> &TurbulenceParameters {
        &self.params
    }

    pub fn f_max(&self) -> f64 {
        self.f_max
    }

    /// Current sampling box.
    pub fn range(&self) -> (f64, f64) {
        (self.lo, self.hi)
    }

    pub fn refinements(&self) -> usize {
        self.refinements
    }

    /// (max f, first index with f ≥ floor, last index with f ≥ floor) over the grid.
    fn grid_max(&self) -> (f64, Option<(f64, f64)>) {
        let n = self.grid_points;
        let step = (self.hi - self.lo) / (n - 1) as f64;
        let values: Vec<(f64, f64)> = (0..n)
            .map(|i| {
                let x = self.lo + step * i as f64;
                (x, self.params.pdf(x))
            })
            .collect();
        let max = values.iter().map(|&(_, f)| f).fold(0.0, f64::max);
        let floor = max * SUPPORT_FLOOR;
        let first = values.iter().position(|&(_, f)| f >= floor && f > 0.0);
        let last = values.iter().rposition(|&(_, f)| f >= floor && f > 0.0);
        let support = match (first, last) {
            (Some(a), Some(b)) => Some((
                (values[a].0 - step).max(self.lo),
                (values[b].0 + step).min(self.hi),
            )),
            _ => None,
        };
        (max, support)
    }

    fn refine(&mut self) {
        self.grid_points = self.grid_points.saturating_mul(4);
        let (max, support) = self.grid_max();
        if let Some((lo, hi)) = support {
            self.lo = lo;
            self.hi = hi;
        }
        self.f_max = max * self.bounds.headroom;
        self.refinements += 1;
        warn!(
            "fading sampler refinement {}: box [{:.4}, {:.4}], f_max {:.4}",
            self.refinements, self.lo, self.hi, self.f_max
        );
    }

    /// One fading coefficient η ∈ [eta_min, eta_max].
    pub fn draw(&mut self, rng: &mut RandomSource) -> Result<f64> {
        loop {
            for _ in 0..self.bounds.max_attempts {
                let x = rng.uniform_range(self.lo, self.hi);
                let y = rng.uniform_range(0.0, self.f_max);
                if y < self.params.pdf(x) {
                    return Ok(x);
                }
            }
            if self.refinements >= self.bounds.max_refinements {
                return Err(SimError::SamplingExhausted {
                    attempts: self.bounds.max_attempts,
                    refinements: self.refinements,
                });
            }
            self.refine();
        }
    }

    pub fn draw_many(&mut self, n: usize, rng: &mut RandomSource) -> Result<Vec<f64>> {
        (0..n).map(|_| self.draw(rng)).collect()
    }
}
