//! Background simulation worker thread.
//!
//! Runs simulations and sweeps off the caller's thread. Sweeps report progress
//! between points and stop early when [`SimWorker::cancel`] is called.

use crossbeam_channel::{Receiver, Sender};
use std::thread::{self, JoinHandle};

use log::{debug, error};

use crate::bb84_protocol::{simulate, ProtocolOutcome};
use crate::config::SimulationConfig;
use crate::error::{Result, SimError};
use crate::rng::RandomSource;
use crate::skr::{AnalyticSolver, KeyRateParams};
use crate::sweep::{run_sweep, skr_vs_zenith, AnalyticSweep, CancelToken, SweepReport, SweepSpec};
use crate::turbulence::AtmosphericGeometry;

/// Request sent to the worker.
pub enum SimRequest {
    /// One protocol run.
    Simulate {
        config: SimulationConfig,
        n_bits: usize,
        seed: u64,
    },
    /// Monte Carlo parameter sweep.
    Sweep {
        base: SimulationConfig,
        spec: SweepSpec,
        seed: u64,
    },
    /// Analytic QBER/SKR over zenith angles.
    AnalyticSweep {
        geometry: AtmosphericGeometry,
        rate: KeyRateParams,
        zeniths: Vec<f64>,
    },
}

/// Response sent back by the worker.
#[derive(Debug)]
pub enum SimResponse {
    Simulated(Result<ProtocolOutcome>),
    /// A sweep point finished.
    SweepProgress { done: usize, total: usize },
    Swept(Result<SweepReport>),
    AnalyticSwept(Result<AnalyticSweep>),
}

/// Handle to the background worker. Dropping it stops the thread.
pub struct SimWorker {
    tx: Option<Sender<SimRequest>>,
    rx: Receiver<SimResponse>,
    cancel: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl SimWorker {
    /// Spawn the background worker thread.
    pub fn spawn() -> Self {
        let (req_tx, req_rx) = crossbeam_channel::unbounded::<SimRequest>();
        let (resp_tx, resp_rx) = crossbeam_channel::unbounded::<SimResponse>();
        let cancel = CancelToken::new();
        let token = cancel.clone();

        let handle = thread::spawn(move || {
            while let Ok(req) = req_rx.recv() {
                let response = match req {
                    SimRequest::Simulate {
                        config,
                        n_bits,
                        seed,
                    } => {
                        let mut rng = RandomSource::seeded(seed);
                        SimResponse::Simulated(simulate(config, n_bits, &mut rng))
                    }
                    SimRequest::Sweep { base, spec, seed } => {
                        token.reset();
                        let progress = |done: usize, total: usize| {
                            let _ = resp_tx.send(SimResponse::SweepProgress { done, total });
                        };
                        SimResponse::Swept(run_sweep(&base, &spec, seed, &token, progress))
                    }
                    SimRequest::AnalyticSweep {
                        geometry,
                        rate,
                        zeniths,
                    } => {
                        token.reset();
                        let progress = |done: usize, total: usize| {
                            let _ = resp_tx.send(SimResponse::SweepProgress { done, total });
                        };
                        let result = AnalyticSolver::new(geometry).and_then(|solver| {
                            skr_vs_zenith(&solver, &rate, &zeniths, &token, progress)
                        });
                        SimResponse::AnalyticSwept(result)
                    }
                };
                if resp_tx.send(response).is_err() {
                    break;
                }
            }
            debug!("simulation worker stopped");
        });

        Self {
            tx: Some(req_tx),
            rx: resp_rx,
            cancel,
            handle: Some(handle),
        }
    }

    pub fn send(&self, request: SimRequest) -> Result<()> {
        self.tx
            .as_ref()
            .ok_or(SimError::WorkerDisconnected)?
            .send(request)
            .map_err(|_| SimError::WorkerDisconnected)
    }

    /// Block until the next response.
    pub fn recv(&self) -> Result<SimResponse> {
        self.rx.recv().map_err(|_| SimError::WorkerDisconnected)
    }

    /// Next response if one is ready.
    pub fn try_recv(&self) -> Option<SimResponse> {
        self.rx.try_recv().ok()
    }

    /// Ask the running sweep to stop after its current point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for SimWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("simulation worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiftingPolicy;
    use crate::sweep::SweepParameter;

    #[test]
    fn simulate_round_trip() {
        let worker = SimWorker::spawn();
        worker
            .send(SimRequest::Simulate {
                config: SimulationConfig::ideal(SiftingPolicy::BasisOnly),
                n_bits: 100,
                seed: 4,
            })
            .unwrap();
        match worker.recv().unwrap() {
            SimResponse::Simulated(Ok(outcome)) => {
                assert_eq!(outcome.alice_bits.len(), 100);
                assert_eq!(outcome.qber, 0.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn sweep_reports_progress_then_result() {
        let worker = SimWorker::spawn();
        worker
            .send(SimRequest::Sweep {
                base: SimulationConfig::metro_fiber(SiftingPolicy::BasisOnly),
                spec: SweepSpec {
                    parameter: SweepParameter::FiberLength,
                    start: 10.0,
                    end: 30.0,
                    points: 2,
                    n_bits: 200,
                },
                seed: 9,
            })
            .unwrap();
        let mut progress = Vec::new();
        loop {
            match worker.recv().unwrap() {
                SimResponse::SweepProgress { done, total } => progress.push((done, total)),
                SimResponse::Swept(report) => {
                    let report = report.unwrap();
                    assert_eq!(report.points.len(), 3);
                    assert!(!report.cancelled);
                    break;
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(progress, vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[test]
    fn errors_come_back_as_responses() {
        let worker = SimWorker::spawn();
        let mut config = SimulationConfig::ideal(SiftingPolicy::Strict);
        config.perturb_probability = 2.0;
        worker
            .send(SimRequest::Simulate {
                config,
                n_bits: 10,
                seed: 0,
            })
            .unwrap();
        assert!(matches!(
            worker.recv().unwrap(),
            SimResponse::Simulated(Err(SimError::InvalidConfig { .. }))
        ));
    }

    #[test]
    fn dropping_the_worker_joins_the_thread() {
        let worker = SimWorker::spawn();
        drop(worker);
    }
}
