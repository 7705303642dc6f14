//! # bb84-link-sim
//!
//! BB84 quantum key distribution over lossy fiber and turbulent free-space
//! links, bit by bit, plus a closed-form decoy-state key-rate solver.
//!
//! ```text
//! SimulationConfig
//!   ↓ validate once
//! TrialEngine: Alice prepares → Eve (intercept-resend) → channel → Bob measures
//!   ↓ TrialRecord stream
//! Sifting (strict | basis-only) + QBER (exact | sampled)
//!   ↓
//! ProtocolOutcome
//!
//! AtmosphericChannel: Cn²(h) → σ_R², w_L → f(η)
//!   ├─ FadingSampler (rejection sampling, per-trial or periodic)
//!   └─ AnalyticSolver (∫Q f, ∫EQ f, Q₁ᴸ, e₁ᵁ → SKR)
//! ```
//!
//! Photons are single-qubit amplitude pairs; every random draw goes through an
//! explicit, seedable [`RandomSource`](rng::RandomSource).

pub mod bb84;
pub mod bb84_protocol;
pub mod bb84_states;
pub mod channel;
pub mod config;
pub mod eavesdropper;
pub mod error;
pub mod link_budget;
pub mod quadrature;
pub mod rng;
pub mod sifting;
pub mod skr;
pub mod sweep;
pub mod turbulence;
pub mod units;
pub mod worker;

#[cfg(test)]
mod tests;

pub mod prelude {
    pub use crate::bb84_protocol::{simulate, Detection, ProtocolOutcome, TrialEngine, TrialRecord, TrialRun};
    pub use crate::bb84_states::{Basis, Bit, QubitState};
    pub use crate::config::{
        FadingPolicy, FadingSource, FiberLink, FreeSpaceLink, ImpairmentToggles, Link, QberEstimator,
        SiftingPolicy, SimulationConfig,
    };
    pub use crate::eavesdropper::InterceptResend;
    pub use crate::error::{Result, SimError};
    pub use crate::rng::RandomSource;
    pub use crate::skr::{AnalyticSolver, DetectorParams, DecoyIntensities, KeyRateEstimate, KeyRateParams};
    pub use crate::sweep::{run_sweep, skr_vs_zenith, CancelToken, SweepParameter, SweepSpec};
    pub use crate::turbulence::{AtmosphericChannel, AtmosphericGeometry, SamplerBounds};
    pub use crate::worker::{SimRequest, SimResponse, SimWorker};
}
