use bb84_link_sim::prelude::*;
use log::info;

fn fiber_length_sweep() -> Result<()> {
    println!("BB84 over metro fiber: QBER and key rate vs. length");

    let base = SimulationConfig::metro_fiber(SiftingPolicy::BasisOnly)
        .with_qber(QberEstimator::Sampled { fraction: 0.1 });
    let spec = SweepSpec {
        parameter: SweepParameter::FiberLength,
        start: 5.0,
        end: 105.0,
        points: 10,
        n_bits: 20_000,
    };
    let report = run_sweep(&base, &spec, 42, &CancelToken::new(), |done, total| {
        info!("fiber sweep {}/{}", done, total)
    })?;

    println!("{:>10} {:>8} {:>10} {:>14}", "L (km)", "QBER", "sifted", "key rate (b/s)");
    for p in &report.points {
        println!(
            "{:>10.1} {:>8.4} {:>10} {:>14.1}",
            p.x, p.qber, p.sifted_key_length, p.key_rate
        );
    }
    Ok(())
}

fn eavesdropping_demo() -> Result<()> {
    println!("\nIntercept-resend on an ideal channel");
    let mut rng = RandomSource::seeded(7);
    for enabled in [false, true] {
        let config = SimulationConfig::ideal(SiftingPolicy::BasisOnly).with_eavesdropping(enabled);
        let outcome = simulate(config, 10_000, &mut rng)?;
        println!(
            "  Eve {:<5} QBER {:.4} ({} sifted bits)",
            if enabled { "on" } else { "off" },
            outcome.qber,
            outcome.sifted_key.len()
        );
    }
    Ok(())
}

fn zenith_sweep() -> Result<()> {
    println!("\nDecoy-state SKR for a 500 km LEO downlink");
    let worker = SimWorker::spawn();
    worker.send(SimRequest::AnalyticSweep {
        geometry: AtmosphericGeometry::default(),
        rate: KeyRateParams::default(),
        zeniths: vec![0.0, 15.0, 30.0, 45.0, 60.0, 70.0],
    })?;

    loop {
        match worker.recv()? {
            SimResponse::SweepProgress { done, total } => info!("zenith sweep {}/{}", done, total),
            SimResponse::AnalyticSwept(sweep) => {
                println!("{:>8} {:>8} {:>12} {:>12}", "ζ (°)", "QBER", "gain", "SKR (b/s)");
                for p in sweep?.points {
                    println!(
                        "{:>8.1} {:>8.4} {:>12.4e} {:>12.4e}",
                        p.zenith_deg, p.qber, p.gain, p.skr
                    );
                }
                return Ok(());
            }
            _ => {}
        }
    }
}

fn main() {
    env_logger::init();

    if let Err(e) = fiber_length_sweep()
        .and_then(|_| eavesdropping_demo())
        .and_then(|_| zenith_sweep())
    {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
