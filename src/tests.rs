use crate::bb84_protocol::{simulate, Detection, TrialEngine};
use crate::config::{ImpairmentToggles, QberEstimator, SiftingPolicy, SimulationConfig};
use crate::rng::RandomSource;
use crate::sifting::{qber_exact, qber_sampled, sift};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_count_and_matching_bases() {
        let mut rng = RandomSource::seeded(1);
        for config in [
            SimulationConfig::metro_fiber(SiftingPolicy::BasisOnly),
            SimulationConfig::new(SiftingPolicy::Strict).with_eavesdropping(true),
            SimulationConfig::ideal(SiftingPolicy::Strict),
        ] {
            let run = TrialEngine::new(config).unwrap().run(1500, &mut rng).unwrap();
            assert_eq!(run.len(), 1500);
            // Counted before the loss check
            let matching = run.records.iter().filter(|r| r.sent_basis == r.bob_basis).count();
            assert_eq!(run.matching_bases, matching);
        }
    }

    #[test]
    fn test_lost_photons_still_count_as_matching() {
        // 100 km at 0.2 dB/km: most photons are lost
        let config = SimulationConfig::new(SiftingPolicy::BasisOnly);
        let run = TrialEngine::new(config)
            .unwrap()
            .run(2000, &mut RandomSource::seeded(2))
            .unwrap();
        let lost_matching = run
            .records
            .iter()
            .filter(|r| r.bases_match() && r.bob_bit == Detection::Lost)
            .count();
        assert!(lost_matching > 0);
        assert!(run.matching_bases > run.detected_count() / 2);
    }

    #[test]
    fn test_no_loss_means_no_lost_records() {
        let config = SimulationConfig::new(SiftingPolicy::BasisOnly).with_toggles(ImpairmentToggles {
            loss: false,
            ..ImpairmentToggles::default()
        });
        let run = TrialEngine::new(config)
            .unwrap()
            .run(3000, &mut RandomSource::seeded(3))
            .unwrap();
        assert!(run.records.iter().all(|r| r.bob_bit != Detection::Lost));
    }

    #[test]
    fn test_qber_is_a_probability() {
        let mut rng = RandomSource::seeded(4);
        for config in [
            SimulationConfig::new(SiftingPolicy::BasisOnly),
            SimulationConfig::metro_fiber(SiftingPolicy::Strict),
            SimulationConfig::new(SiftingPolicy::Strict)
                .with_eavesdropping(true)
                .with_qber(QberEstimator::Sampled { fraction: 0.1 }),
        ] {
            let outcome = simulate(config, 1000, &mut rng).unwrap();
            assert!((0.0..=1.0).contains(&outcome.qber), "qber = {}", outcome.qber);
        }
    }

    #[test]
    fn test_ideal_channel() {
        let outcome = simulate(
            SimulationConfig::ideal(SiftingPolicy::BasisOnly),
            1000,
            &mut RandomSource::seeded(42),
        )
        .unwrap();
        // 3σ of Binomial(1000, 0.5) is about 47
        let matching = outcome.matching_bases_count as i64;
        assert!((matching - 500).abs() <= 47, "matching = {}", matching);
        assert_eq!(outcome.qber, 0.0);
        assert_eq!(outcome.sifted_errors, 0);
        assert_eq!(outcome.detected_count, 1000);
        assert_eq!(outcome.sifted_key.len(), outcome.matching_bases_count);
        assert!(outcome.bob_bits.iter().all(Option::is_some));
    }

    #[test]
    fn test_intercept_resend_disturbance() {
        let config = SimulationConfig::ideal(SiftingPolicy::BasisOnly).with_eavesdropping(true);
        let outcome = simulate(config, 10_000, &mut RandomSource::seeded(2024)).unwrap();
        // σ ≈ 0.006 over ~5000 sifted bits
        assert!((outcome.qber - 0.25).abs() < 0.03, "qber = {}", outcome.qber);
        assert_eq!(outcome.intercepted_count, 10_000);
    }

    #[test]
    fn test_partial_interception() {
        let mut config = SimulationConfig::ideal(SiftingPolicy::BasisOnly).with_eavesdropping(true);
        config.eavesdropper.interception_rate = 0.4;
        let outcome = simulate(config, 10_000, &mut RandomSource::seeded(7)).unwrap();
        assert!((outcome.qber - 0.1).abs() < 0.025, "qber = {}", outcome.qber);
    }

    #[test]
    fn test_sampled_qber_converges_to_exact() {
        let config = SimulationConfig::ideal(SiftingPolicy::BasisOnly).with_eavesdropping(true);
        let run = TrialEngine::new(config)
            .unwrap()
            .run(4000, &mut RandomSource::seeded(10))
            .unwrap();
        let exact = qber_exact(&run.records);
        let mut rng = RandomSource::seeded(11);

        let spread = |fraction: f64, rng: &mut RandomSource| {
            (0..200)
                .map(|_| (qber_sampled(&run.records, fraction, rng) - exact).abs())
                .sum::<f64>()
                / 200.0
        };
        let coarse = spread(0.05, &mut rng);
        let fine = spread(0.9, &mut rng);
        assert!(fine < coarse, "fine {} vs coarse {}", fine, coarse);
        assert_eq!(qber_sampled(&run.records, 1.0, &mut rng), exact);

        let mean = (0..200)
            .map(|_| qber_sampled(&run.records, 0.2, &mut rng))
            .sum::<f64>()
            / 200.0;
        assert!((mean - exact).abs() < 0.01, "mean {} vs exact {}", mean, exact);
    }

    #[test]
    fn test_strict_and_basis_only_sifting_diverge() {
        let config = SimulationConfig::ideal(SiftingPolicy::Strict).with_eavesdropping(true);
        let run = TrialEngine::new(config)
            .unwrap()
            .run(2000, &mut RandomSource::seeded(12))
            .unwrap();
        let strict = sift(&run.records, SiftingPolicy::Strict);
        let loose = sift(&run.records, SiftingPolicy::BasisOnly);
        assert!(strict.len() < loose.len());
        assert!(strict.iter().all(|e| e.alice_bit == e.bob_bit));
        assert!(loose.iter().any(|e| e.alice_bit != e.bob_bit));
        // The QBER does not depend on the sifting policy
        assert!(qber_exact(&run.records) > 0.15);
    }

    #[test]
    fn test_sifted_key_is_alices_bits() {
        let outcome = simulate(
            SimulationConfig::metro_fiber(SiftingPolicy::BasisOnly),
            3000,
            &mut RandomSource::seeded(13),
        )
        .unwrap();
        let expected: String = (0..outcome.alice_bits.len())
            .filter(|&i| {
                outcome.alice_bases[i] == outcome.bob_bases[i] && outcome.bob_bits[i].is_some()
            })
            .map(|i| if outcome.alice_bits[i] == 1 { '1' } else { '0' })
            .collect();
        assert_eq!(outcome.sifted_key, expected);
    }

    #[test]
    fn test_free_space_link_end_to_end() {
        let outcome = simulate(
            SimulationConfig::free_space(SiftingPolicy::BasisOnly),
            5000,
            &mut RandomSource::seeded(14),
        )
        .unwrap();
        assert_eq!(outcome.alice_bits.len(), 5000);
        assert!(outcome.detected_count < 5000 / 5);
        assert!((0.0..=1.0).contains(&outcome.qber));
    }

    #[test]
    fn test_outcome_serializes_lost_bits_as_null() {
        let outcome = simulate(
            SimulationConfig::new(SiftingPolicy::Strict),
            200,
            &mut RandomSource::seeded(15),
        )
        .unwrap();
        let json = serde_json::to_value(&outcome).unwrap();
        let bob_bits = json["bobBits"].as_array().unwrap();
        assert!(bob_bits.iter().any(|b| b.is_null()));
        assert!(json.get("eveBits").is_none());
        assert_eq!(
            json["matchingBasesCount"].as_u64().unwrap() as usize,
            outcome.matching_bases_count
        );
    }
}
