use crate::bb84_states::{BB84State, Basis, Bit, QubitState};
use crate::rng::RandomSource;

pub fn generate_bb84_state(bit: Bit, basis: Basis) -> BB84State {
    match basis {
        Basis::Rectilinear => {
            // Rectilinear basis (|0> and |1>)
            match bit {
                Bit::Zero => BB84State::QubitZero,
                Bit::One => BB84State::QubitOne,
            }
        }
        Basis::Diagonal => {
            // Diagonal basis (|+> and |->)
            match bit {
                Bit::Zero => BB84State::QubitPlus,
                Bit::One => BB84State::QubitMinus,
            }
        }
    }
}

/// Photon polarization Alice sends for `(bit, basis)`.
pub fn prepare_photon(bit: Bit, basis: Basis) -> QubitState {
    QubitState::from(generate_bb84_state(bit, basis))
}

/// Measure a (possibly disturbed) photon in `basis`.
pub fn measure_bb84_state(state: &QubitState, basis: Basis, rng: &mut RandomSource) -> Bit {
    state.measure(basis, rng)
}

/// Alice's random choice of bit and basis.
pub fn alice_choice(rng: &mut RandomSource) -> (Bit, Basis) {
    (rng.bit(), rng.basis())
}
