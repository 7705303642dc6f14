use serde::{Deserialize, Serialize};

use crate::bb84::{generate_bb84_state, measure_bb84_state};
use crate::bb84_states::{Basis, Bit, QubitState};
use crate::error::{Result, SimError};
use crate::rng::RandomSource;

/// Intercept-resend attack.
///
/// Eve measures the photon in a random basis before it enters the channel and
/// forwards a fresh photon prepared from her result. She never touches the
/// amplitudes directly, so all of her disturbance comes from re-preparation in
/// the wrong basis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InterceptResend {
    /// Fraction of photons Eve attacks.
    pub interception_rate: f64,
}

impl Default for InterceptResend {
    fn default() -> Self {
        Self {
            interception_rate: 1.0,
        }
    }
}

/// What Eve saw on one photon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interception {
    pub basis: Basis,
    pub bit: Bit,
}

impl InterceptResend {
    pub fn validate(&self) -> Result<()> {
        if (0.0..=1.0).contains(&self.interception_rate) {
            Ok(())
        } else {
            Err(SimError::invalid(
                "eavesdropper.interceptionRate",
                format!("must be in [0, 1], got {}", self.interception_rate),
            ))
        }
    }

    /// Returns the photon to forward and, if Eve attacked it, what she recorded.
    pub fn intercept(
        &self,
        photon: QubitState,
        rng: &mut RandomSource,
    ) -> (QubitState, Option<Interception>) {
        if self.interception_rate < 1.0 && !rng.bernoulli(self.interception_rate) {
            return (photon, None);
        }
        let basis = rng.basis();
        let bit = measure_bb84_state(&photon, basis, rng);
        let forwarded = QubitState::from(generate_bb84_state(bit, basis));
        (forwarded, Some(Interception { basis, bit }))
    }
}
