use num_complex::Complex;
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_1_SQRT_2;

use crate::rng::RandomSource;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bit {
    Zero,
    One,
}

impl Bit {
    pub fn as_u8(self) -> u8 {
        match self {
            Bit::Zero => 0,
            Bit::One => 1,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Bit::Zero => '0',
            Bit::One => '1',
        }
    }
}

impl From<bool> for Bit {
    fn from(value: bool) -> Self {
        if value {
            Bit::One
        } else {
            Bit::Zero
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Basis {
    /// |0>, |1>; encoded as 0
    Rectilinear,
    /// |+>, |->; encoded as 1
    Diagonal,
}

impl Basis {
    pub fn as_u8(self) -> u8 {
        match self {
            Basis::Rectilinear => 0,
            Basis::Diagonal => 1,
        }
    }
}

/// The four nominal BB84 polarization states.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BB84State {
    QubitZero,
    QubitOne,
    QubitPlus,  // Represents the |+> state
    QubitMinus, // Represents the |-> state
}

impl BB84State {
    pub fn basis(self) -> Basis {
        match self {
            BB84State::QubitZero | BB84State::QubitOne => Basis::Rectilinear,
            BB84State::QubitPlus | BB84State::QubitMinus => Basis::Diagonal,
        }
    }

    pub fn bit(self) -> Bit {
        match self {
            BB84State::QubitZero | BB84State::QubitPlus => Bit::Zero,
            BB84State::QubitOne | BB84State::QubitMinus => Bit::One,
        }
    }
}

/// A single-qubit 2x2 matrix stored as [row0col0, row0col1, row1col0, row1col1].
pub type Matrix2x2 = [Complex<f64>; 4];

fn hadamard_matrix() -> Matrix2x2 {
    let h = Complex::new(FRAC_1_SQRT_2, 0.0);
    [h, h, h, -h]
}

/// RY(θ) = exp(-iθY/2).
fn ry_matrix(theta: f64) -> Matrix2x2 {
    let (s, c) = (theta / 2.0).sin_cos();
    [
        Complex::new(c, 0.0),
        Complex::new(-s, 0.0),
        Complex::new(s, 0.0),
        Complex::new(c, 0.0),
    ]
}

/// Polarization of one photon as a normalized amplitude pair (α|0> + β|1>).
///
/// Preparation, rotation and basis change are pure functions returning a new
/// state; measurement samples the Born rule with one uniform draw.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct QubitState {
    amplitudes: [Complex<f64>; 2],
}

impl QubitState {
    /// |0>
    pub fn zero() -> Self {
        Self {
            amplitudes: [Complex::new(1.0, 0.0), Complex::new(0.0, 0.0)],
        }
    }

    /// |bit> in the rectilinear basis, H|bit> in the diagonal basis.
    pub fn prepare(bit: Bit, basis: Basis) -> Self {
        let state = match bit {
            Bit::Zero => Self::zero(),
            Bit::One => Self::zero().apply_matrix(&[
                Complex::new(0.0, 0.0),
                Complex::new(1.0, 0.0),
                Complex::new(1.0, 0.0),
                Complex::new(0.0, 0.0),
            ]),
        };
        match basis {
            Basis::Rectilinear => state,
            Basis::Diagonal => state.hadamard(),
        }
    }

    pub fn amplitudes(&self) -> [Complex<f64>; 2] {
        self.amplitudes
    }

    pub fn apply_matrix(self, m: &Matrix2x2) -> Self {
        let [a, b] = self.amplitudes;
        Self {
            amplitudes: [m[0] * a + m[1] * b, m[2] * a + m[3] * b],
        }
    }

    pub fn hadamard(self) -> Self {
        self.apply_matrix(&hadamard_matrix())
    }

    /// Polarization rotation RY(θ). Rotations compose additively: ry(a).ry(b) == ry(a + b).
    pub fn rotate(self, theta: f64) -> Self {
        self.apply_matrix(&ry_matrix(theta))
    }

    /// Born-rule probability of reading 0 when measuring in `basis`.
    pub fn probability_zero(&self, basis: Basis) -> f64 {
        let a = match basis {
            Basis::Rectilinear => self.amplitudes[0],
            Basis::Diagonal => self.hadamard().amplitudes[0],
        };
        a.norm_sqr().clamp(0.0, 1.0)
    }

    /// Projective measurement in `basis`; consumes exactly one uniform draw.
    pub fn measure(&self, basis: Basis, rng: &mut RandomSource) -> Bit {
        if rng.uniform() < self.probability_zero(basis) {
            Bit::Zero
        } else {
            Bit::One
        }
    }
}

impl From<BB84State> for QubitState {
    fn from(state: BB84State) -> Self {
        QubitState::prepare(state.bit(), state.basis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::PI;

    const EPS: f64 = 1e-12;

    #[test]
    fn matching_basis_is_deterministic() {
        for bit in [Bit::Zero, Bit::One] {
            for basis in [Basis::Rectilinear, Basis::Diagonal] {
                let p0 = QubitState::prepare(bit, basis).probability_zero(basis);
                let expected = if bit == Bit::Zero { 1.0 } else { 0.0 };
                assert!((p0 - expected).abs() < EPS, "{:?}/{:?}: p0 = {}", bit, basis, p0);
            }
        }
    }

    #[test]
    fn conjugate_basis_is_a_coin_flip() {
        for bit in [Bit::Zero, Bit::One] {
            let rect = QubitState::prepare(bit, Basis::Rectilinear);
            let diag = QubitState::prepare(bit, Basis::Diagonal);
            assert!((rect.probability_zero(Basis::Diagonal) - 0.5).abs() < EPS);
            assert!((diag.probability_zero(Basis::Rectilinear) - 0.5).abs() < EPS);
        }
    }

    #[test]
    fn rotation_follows_cos_squared() {
        let theta = 0.7;
        let p0 = QubitState::zero().rotate(theta).probability_zero(Basis::Rectilinear);
        assert!((p0 - (theta / 2.0).cos().powi(2)).abs() < EPS);
    }

    #[test]
    fn rotations_compose() {
        let s = QubitState::prepare(Bit::One, Basis::Diagonal);
        let a = s.rotate(0.3).rotate(0.4);
        let b = s.rotate(0.7);
        for basis in [Basis::Rectilinear, Basis::Diagonal] {
            assert!((a.probability_zero(basis) - b.probability_zero(basis)).abs() < EPS);
        }
    }

    #[test]
    fn full_turn_flips_the_bit() {
        // RY(π) maps |0> to |1>
        let p0 = QubitState::zero().rotate(PI).probability_zero(Basis::Rectilinear);
        assert!(p0 < EPS);
    }

    #[test]
    fn hadamard_is_an_involution() {
        let s = QubitState::prepare(Bit::One, Basis::Rectilinear).rotate(0.2);
        let back = s.hadamard().hadamard();
        for (x, y) in s.amplitudes().iter().zip(back.amplitudes().iter()) {
            assert!((x - y).norm() < EPS);
        }
    }

    #[test]
    fn nominal_states_round_trip() {
        for state in [
            BB84State::QubitZero,
            BB84State::QubitOne,
            BB84State::QubitPlus,
            BB84State::QubitMinus,
        ] {
            let q = QubitState::from(state);
            let p0 = q.probability_zero(state.basis());
            let expected = if state.bit() == Bit::Zero { 1.0 } else { 0.0 };
            assert!((p0 - expected).abs() < EPS, "{:?}", state);
        }
    }

    #[test]
    fn measurement_frequencies_match_born_rule() {
        let mut rng = RandomSource::seeded(17);
        let state = QubitState::zero().rotate(PI / 3.0);
        let p0 = state.probability_zero(Basis::Rectilinear);
        let n = 20_000;
        let zeros = (0..n)
            .filter(|_| state.measure(Basis::Rectilinear, &mut rng) == Bit::Zero)
            .count();
        let freq = zeros as f64 / n as f64;
        assert!((freq - p0).abs() < 0.015, "freq {} vs p0 {}", freq, p0);
    }
}
