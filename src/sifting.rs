//! Sifting and QBER estimation over a trial record stream.
//!
//! The QBER population is always every detected, basis-matching trial; the
//! sifting policy only decides which of those end up in the key string.

use rand::seq::index::sample;
use serde::Serialize;

use crate::bb84_protocol::TrialRecord;
use crate::bb84_states::{Basis, Bit};
use crate::config::{QberEstimator, SiftingPolicy};
use crate::rng::RandomSource;

/// A detected trial where Alice and Bob used the same basis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SiftedKeyEntry {
    /// Position in the trial stream.
    pub index: usize,
    pub basis: Basis,
    pub alice_bit: Bit,
    pub bob_bit: Bit,
}

impl SiftedKeyEntry {
    pub fn is_error(&self) -> bool {
        self.alice_bit != self.bob_bit
    }
}

/// Detected trials with matching bases, in trial order.
pub fn basis_matched(records: &[TrialRecord]) -> Vec<SiftedKeyEntry> {
    records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.bases_match())
        .filter_map(|(index, r)| {
            r.bob_bit.bit().map(|bob_bit| SiftedKeyEntry {
                index,
                basis: r.sent_basis,
                alice_bit: r.sent_bit,
                bob_bit,
            })
        })
        .collect()
}

/// Key material under `policy`.
pub fn sift(records: &[TrialRecord], policy: SiftingPolicy) -> Vec<SiftedKeyEntry> {
    let mut entries = basis_matched(records);
    if policy == SiftingPolicy::Strict {
        entries.retain(|e| !e.is_error());
    }
    entries
}

/// Alice's bits of the sifted entries as a "0"/"1" string.
pub fn sifted_key_string(entries: &[SiftedKeyEntry]) -> String {
    entries.iter().map(|e| e.alice_bit.as_char()).collect()
}

fn error_rate<'a>(entries: impl ExactSizeIterator<Item = &'a SiftedKeyEntry>) -> f64 {
    let n = entries.len();
    if n == 0 {
        return 0.0;
    }
    let errors = entries.filter(|e| e.is_error()).count();
    errors as f64 / n as f64
}

/// Error rate over every basis-matching detection; 0 when there are none.
pub fn qber_exact(records: &[TrialRecord]) -> f64 {
    error_rate(basis_matched(records).iter())
}

/// Error rate over a random `fraction` of the basis-matching detections
/// (at least one entry, without replacement).
///
/// Each call draws a fresh subset, so repeated calls on the same records give
/// different estimates; their mean tends to `qber_exact` as the fraction goes to 1.
pub fn qber_sampled(records: &[TrialRecord], fraction: f64, rng: &mut RandomSource) -> f64 {
    let population = basis_matched(records);
    if population.is_empty() {
        return 0.0;
    }
    let size = ((population.len() as f64 * fraction) as usize).clamp(1, population.len());
    let picked = sample(rng.rng_mut(), population.len(), size);
    let errors = picked.iter().filter(|&i| population[i].is_error()).count();
    errors as f64 / size as f64
}

pub fn estimate_qber(records: &[TrialRecord], estimator: QberEstimator, rng: &mut RandomSource) -> f64 {
    match estimator {
        QberEstimator::Exact => qber_exact(records),
        QberEstimator::Sampled { fraction } => qber_sampled(records, fraction, rng),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bb84_protocol::Detection;

    fn record(sent: Bit, sent_basis: Basis, bob_basis: Basis, bob: Detection) -> TrialRecord {
        TrialRecord {
            sent_bit: sent,
            sent_basis,
            eve: None,
            bob_basis,
            bob_bit: bob,
        }
    }

    fn sample_records() -> Vec<TrialRecord> {
        use Basis::*;
        use Bit::*;
        vec![
            record(Zero, Rectilinear, Rectilinear, Detection::Click(Zero)),
            record(One, Diagonal, Diagonal, Detection::Click(Zero)), // error
            record(One, Diagonal, Rectilinear, Detection::Click(One)), // basis mismatch
            record(Zero, Rectilinear, Rectilinear, Detection::Lost),
            record(One, Rectilinear, Rectilinear, Detection::Click(One)),
        ]
    }

    #[test]
    fn strict_sifting_drops_errors() {
        let records = sample_records();
        let strict = sift(&records, SiftingPolicy::Strict);
        assert_eq!(strict.iter().map(|e| e.index).collect::<Vec<_>>(), vec![0, 4]);
        assert_eq!(sifted_key_string(&strict), "01");
    }

    #[test]
    fn basis_only_sifting_keeps_errors() {
        let records = sample_records();
        let sifted = sift(&records, SiftingPolicy::BasisOnly);
        assert_eq!(sifted.iter().map(|e| e.index).collect::<Vec<_>>(), vec![0, 1, 4]);
        assert_eq!(sifted_key_string(&sifted), "011");
    }

    #[test]
    fn lost_photons_never_count_as_zero() {
        let records = vec![record(
            Bit::Zero,
            Basis::Rectilinear,
            Basis::Rectilinear,
            Detection::Lost,
        )];
        assert!(sift(&records, SiftingPolicy::BasisOnly).is_empty());
        assert_eq!(qber_exact(&records), 0.0);
    }

    #[test]
    fn exact_qber_over_matching_detections() {
        let q = qber_exact(&sample_records());
        assert!((q - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn empty_population_has_zero_qber() {
        let mut rng = RandomSource::seeded(0);
        assert_eq!(qber_exact(&[]), 0.0);
        assert_eq!(qber_sampled(&[], 0.5, &mut rng), 0.0);
    }

    #[test]
    fn full_fraction_sample_equals_exact() {
        let records = sample_records();
        let mut rng = RandomSource::seeded(1);
        assert_eq!(qber_sampled(&records, 1.0, &mut rng), qber_exact(&records));
    }

    #[test]
    fn tiny_fraction_still_samples_one_entry() {
        let records = sample_records();
        let mut rng = RandomSource::seeded(2);
        for _ in 0..20 {
            let q = qber_sampled(&records, 1e-6, &mut rng);
            assert!(q == 0.0 || q == 1.0);
        }
    }
}
