//! BB84 trial loop.
//!
//! Each trial walks `Prepared → (EveIntercepted) → Impaired | Lost → Measured`
//! and leaves behind one immutable [`TrialRecord`].

use std::sync::Arc;

use log::{debug, info};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::Serialize;

use crate::bb84::{alice_choice, measure_bb84_state, prepare_photon};
use crate::bb84_states::{Basis, Bit};
use crate::channel::{ImpairmentModel, Transit};
use crate::config::{FadingSource, Link, SimulationConfig};
use crate::eavesdropper::Interception;
use crate::error::Result;
use crate::rng::RandomSource;
use crate::sifting::{basis_matched, estimate_qber, sift, sifted_key_string};
use crate::turbulence::AtmosphericChannel;

/// Trials per parallel chunk, before rounding up to the fading refresh interval.
const CHUNK_TRIALS: usize = 4096;

/// Bob's side of a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Detection {
    /// Photon absorbed in the channel or missed by the detector.
    Lost,
    Click(Bit),
}

impl Detection {
    pub fn bit(self) -> Option<Bit> {
        match self {
            Detection::Lost => None,
            Detection::Click(bit) => Some(bit),
        }
    }

    pub fn is_lost(self) -> bool {
        self == Detection::Lost
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrialRecord {
    pub sent_bit: Bit,
    pub sent_basis: Basis,
    pub eve: Option<Interception>,
    pub bob_basis: Basis,
    pub bob_bit: Detection,
}

impl TrialRecord {
    pub fn bases_match(&self) -> bool {
        self.sent_basis == self.bob_basis
    }
}

/// Records of one run, in trial order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialRun {
    pub records: Vec<TrialRecord>,
    /// Trials where Alice and Bob chose the same basis, lost or not.
    pub matching_bases: usize,
}

impl TrialRun {
    fn from_records(records: Vec<TrialRecord>) -> Self {
        let matching_bases = records.iter().filter(|r| r.bases_match()).count();
        Self {
            records,
            matching_bases,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn detected_count(&self) -> usize {
        self.records.iter().filter(|r| !r.bob_bit.is_lost()).count()
    }

    pub fn intercepted_count(&self) -> usize {
        self.records.iter().filter(|r| r.eve.is_some()).count()
    }
}

/// Runs BB84 trials for a validated configuration.
pub struct TrialEngine {
    config: SimulationConfig,
    atmosphere: Option<Arc<AtmosphericChannel>>,
}

impl TrialEngine {
    pub fn new(config: SimulationConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Reuse an atmospheric channel (and its per-zenith cache) built elsewhere.
    /// Ignored unless the link is turbulence-faded with the same geometry.
    pub fn with_channel(config: SimulationConfig, channel: Arc<AtmosphericChannel>) -> Result<Self> {
        Self::build(config, Some(channel))
    }

    fn build(config: SimulationConfig, shared: Option<Arc<AtmosphericChannel>>) -> Result<Self> {
        config.validate()?;
        let atmosphere = match config.link {
            Link::FreeSpace(link) => match link.fading {
                FadingSource::Turbulence {
                    geometry,
                    zenith_deg,
                    ..
                } => {
                    let channel = match shared {
                        Some(channel) if *channel.geometry() == geometry => channel,
                        _ => Arc::new(AtmosphericChannel::new(geometry)?),
                    };
                    channel.prepare_parameters(zenith_deg)?;
                    Some(channel)
                }
                _ => None,
            },
            Link::Fiber(_) => None,
        };
        info!(
            "trial engine ready: {} link, toggles {:?}, sifting {:?}, qber {:?}",
            match config.link {
                Link::Fiber(_) => "fiber",
                Link::FreeSpace(_) => "free-space",
            },
            config.toggles,
            config.sifting,
            config.qber
        );
        Ok(Self { config, atmosphere })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn atmosphere(&self) -> Option<&Arc<AtmosphericChannel>> {
        self.atmosphere.as_ref()
    }

    fn impairments(&self) -> Result<ImpairmentModel> {
        ImpairmentModel::new(&self.config, self.atmosphere.as_deref())
    }

    fn trial(&self, channel: &mut ImpairmentModel, rng: &mut RandomSource) -> Result<TrialRecord> {
        let (sent_bit, sent_basis) = alice_choice(rng);
        let bob_basis = rng.basis();

        let mut photon = prepare_photon(sent_bit, sent_basis);
        let mut eve = None;
        if self.config.toggles.eavesdropping {
            let (forwarded, seen) = self.config.eavesdropper.intercept(photon, rng);
            photon = forwarded;
            eve = seen;
        }

        let bob_bit = match channel.transmit(photon, rng)? {
            Transit::Lost => Detection::Lost,
            Transit::Impaired(photon) => {
                Detection::Click(measure_bb84_state(&photon, bob_basis, rng))
            }
        };

        Ok(TrialRecord {
            sent_bit,
            sent_basis,
            eve,
            bob_basis,
            bob_bit,
        })
    }

    fn run_trials(&self, n: usize, rng: &mut RandomSource) -> Result<Vec<TrialRecord>> {
        let mut channel = self.impairments()?;
        (0..n).map(|_| self.trial(&mut channel, rng)).collect()
    }

    /// `n` sequential trials drawing from `rng`.
    pub fn run(&self, n: usize, rng: &mut RandomSource) -> Result<TrialRun> {
        let run = TrialRun::from_records(self.run_trials(n, rng)?);
        info!(
            "{} trials: {} detected, {} matching bases",
            n,
            run.detected_count(),
            run.matching_bases
        );
        Ok(run)
    }

    /// Trials in this engine's chunking: a multiple of the fading refresh interval.
    pub fn chunk_len(&self) -> usize {
        let interval = match self.config.link {
            Link::FreeSpace(link) => link.refresh.interval(),
            Link::Fiber(_) => 1,
        };
        CHUNK_TRIALS.div_ceil(interval) * interval
    }

    /// `n` trials split into chunks, chunk `i` seeded with stream `i` of `seed`.
    /// The records depend only on `seed`, never on the thread count.
    pub fn run_parallel(&self, n: usize, seed: u64) -> Result<TrialRun> {
        let chunk = self.chunk_len();
        let chunks: Vec<(u64, usize)> = (0..n)
            .step_by(chunk)
            .enumerate()
            .map(|(i, start)| (i as u64, chunk.min(n - start)))
            .collect();
        debug!("{} trials in {} chunks of {}", n, chunks.len(), chunk);

        let run_chunk = |&(index, len): &(u64, usize)| {
            let mut rng = RandomSource::for_stream(seed, index);
            self.run_trials(len, &mut rng)
        };
        #[cfg(feature = "parallel")]
        let parts: Vec<Vec<TrialRecord>> = chunks.par_iter().map(run_chunk).collect::<Result<_>>()?;
        #[cfg(not(feature = "parallel"))]
        let parts: Vec<Vec<TrialRecord>> = chunks.iter().map(run_chunk).collect::<Result<_>>()?;

        let run = TrialRun::from_records(parts.into_iter().flatten().collect());
        info!(
            "{} trials (chunked): {} detected, {} matching bases",
            n,
            run.detected_count(),
            run.matching_bases
        );
        Ok(run)
    }
}

/// Per-trial arrays and summary statistics of one protocol run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolOutcome {
    pub alice_bits: Vec<u8>,
    pub alice_bases: Vec<u8>,
    pub bob_bases: Vec<u8>,
    /// `None` marks a lost photon.
    pub bob_bits: Vec<Option<u8>>,
    /// Present when eavesdropping was enabled; `None` where Eve let a photon pass.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eve_bits: Option<Vec<Option<u8>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eve_bases: Option<Vec<Option<u8>>>,
    pub sifted_key: String,
    pub qber: f64,
    pub matching_bases_count: usize,
    pub detected_count: usize,
    /// Errors among the detected, basis-matching trials.
    pub sifted_errors: usize,
    pub intercepted_count: usize,
}

impl ProtocolOutcome {
    /// Sift `run` and estimate its QBER per `config`.
    pub fn from_run(run: &TrialRun, config: &SimulationConfig, rng: &mut RandomSource) -> Self {
        let records = &run.records;
        let sifted = sift(records, config.sifting);
        let (eve_bits, eve_bases) = if config.toggles.eavesdropping {
            (
                Some(records.iter().map(|r| r.eve.map(|e| e.bit.as_u8())).collect()),
                Some(records.iter().map(|r| r.eve.map(|e| e.basis.as_u8())).collect()),
            )
        } else {
            (None, None)
        };
        Self {
            alice_bits: records.iter().map(|r| r.sent_bit.as_u8()).collect(),
            alice_bases: records.iter().map(|r| r.sent_basis.as_u8()).collect(),
            bob_bases: records.iter().map(|r| r.bob_basis.as_u8()).collect(),
            bob_bits: records.iter().map(|r| r.bob_bit.bit().map(Bit::as_u8)).collect(),
            eve_bits,
            eve_bases,
            sifted_key: sifted_key_string(&sifted),
            qber: estimate_qber(records, config.qber, rng),
            matching_bases_count: run.matching_bases,
            detected_count: run.detected_count(),
            sifted_errors: basis_matched(records).iter().filter(|e| e.is_error()).count(),
            intercepted_count: run.intercepted_count(),
        }
    }
}

/// Run `n_bits` trials under `config` and summarize them.
pub fn simulate(config: SimulationConfig, n_bits: usize, rng: &mut RandomSource) -> Result<ProtocolOutcome> {
    let engine = TrialEngine::new(config)?;
    let run = engine.run(n_bits, rng)?;
    Ok(ProtocolOutcome::from_run(&run, engine.config(), rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FadingPolicy, FreeSpaceLink, ImpairmentToggles, SiftingPolicy};
    use crate::error::SimError;

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let mut config = SimulationConfig::new(SiftingPolicy::Strict);
        config.sop_deviation_rad = -1.0;
        assert!(matches!(
            TrialEngine::new(config),
            Err(SimError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let engine = TrialEngine::new(SimulationConfig::metro_fiber(SiftingPolicy::BasisOnly)).unwrap();
        let a = engine.run(500, &mut RandomSource::seeded(99)).unwrap();
        let b = engine.run(500, &mut RandomSource::seeded(99)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn chunked_run_is_deterministic_and_complete() {
        let engine = TrialEngine::new(SimulationConfig::metro_fiber(SiftingPolicy::BasisOnly)).unwrap();
        let n = 3 * CHUNK_TRIALS + 17;
        let a = engine.run_parallel(n, 5).unwrap();
        let b = engine.run_parallel(n, 5).unwrap();
        assert_eq!(a.len(), n);
        assert_eq!(a, b);
        assert_eq!(
            a.matching_bases,
            a.records.iter().filter(|r| r.bases_match()).count()
        );
    }

    #[test]
    fn chunks_align_with_fading_refresh() {
        let config = SimulationConfig {
            link: Link::FreeSpace(FreeSpaceLink {
                refresh: FadingPolicy::Periodic { every: 1000 },
                ..FreeSpaceLink::default()
            }),
            ..SimulationConfig::new(SiftingPolicy::Strict)
        };
        let engine = TrialEngine::new(config).unwrap();
        assert_eq!(engine.chunk_len(), 5000);
    }

    #[test]
    fn eve_fields_follow_the_toggle() {
        let mut rng = RandomSource::seeded(3);
        let quiet = simulate(SimulationConfig::ideal(SiftingPolicy::Strict), 50, &mut rng).unwrap();
        assert!(quiet.eve_bits.is_none());
        assert_eq!(quiet.intercepted_count, 0);

        let config = SimulationConfig::ideal(SiftingPolicy::Strict).with_eavesdropping(true);
        let noisy = simulate(config, 50, &mut rng).unwrap();
        let eve_bits = noisy.eve_bits.unwrap();
        assert_eq!(eve_bits.len(), 50);
        assert!(eve_bits.iter().all(Option::is_some));
        assert_eq!(noisy.intercepted_count, 50);
    }

    #[test]
    fn shared_channel_is_reused() {
        let config = SimulationConfig::free_space(SiftingPolicy::BasisOnly);
        let geometry = match config.link {
            Link::FreeSpace(FreeSpaceLink {
                fading: FadingSource::Turbulence { geometry, .. },
                ..
            }) => geometry,
            _ => panic!("turbulence preset"),
        };
        let channel = Arc::new(AtmosphericChannel::new(geometry).unwrap());
        let engine = TrialEngine::with_channel(config, Arc::clone(&channel)).unwrap();
        assert!(Arc::ptr_eq(engine.atmosphere().unwrap(), &channel));
        assert_eq!(channel.cached_zeniths(), 1);
    }

    #[test]
    fn free_space_run_loses_most_photons() {
        let mut config = SimulationConfig::free_space(SiftingPolicy::BasisOnly).with_toggles(
            ImpairmentToggles {
                perturbation: false,
                sop_deviation: false,
                ..ImpairmentToggles::default()
            },
        );
        if let Link::FreeSpace(link) = &mut config.link {
            link.refresh = FadingPolicy::PerTrial;
        }
        let engine = TrialEngine::new(config).unwrap();
        let run = engine.run(2000, &mut RandomSource::seeded(8)).unwrap();
        // Mean fading ≈ 0.018 gives a detection probability near 1%
        let detected = run.detected_count();
        assert!(detected > 0 && detected < 100, "detected = {}", detected);
        assert_eq!(crate::sifting::qber_exact(&run.records), 0.0);
    }
}
