//! Simulated federated rounds: one Byzantine device, threshold audit
//!
//! Run with `RUST_LOG=tessera_fl=debug` for per-update detail, or pass a
//! JSON config path as the first argument.

use std::sync::Arc;

use ndarray::Array2;
use tessera_fl::ledger::{with_retry, RetryPolicy};
use tessera_fl::participants::LeastSquaresTrainer;
use tessera_fl::verification::AuditEntry;
use tessera_fl::{
    EdgeDevice, EngineConfig, InMemoryLedger, KeyAuthority, Ledger, ModelVector, PrincipalId,
    RoundCoordinator, TesseraError,
};
use tracing_subscriber::EnvFilter;

/// Samples of `y = 2*x0 - x1 + 0.5*x2`, optionally with a poisoned target.
fn local_data(seed: usize, rows: usize, poison: bool) -> Array2<f32> {
    Array2::from_shape_fn((rows, 4), |(r, c)| {
        let x = |k: usize| (((seed * 31 + r * 7 + k * 13) % 17) as f32 - 8.0) / 8.0;
        match c {
            0..=2 => x(c),
            _ if poison => 500.0,
            _ => 2.0 * x(0) - x(1) + 0.5 * x(2),
        }
    })
}

fn main() -> Result<(), TesseraError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tessera_fl=info")),
        )
        .init();

    println!("Tessera-FL Round Simulation\n");

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };

    let devices: Vec<EdgeDevice> = (0..6)
        .map(|i| {
            EdgeDevice::new(
                PrincipalId::new(format!("device-{}", i)),
                local_data(i, 40, i == 3),
            )
        })
        .collect();
    println!(
        "6 devices (device-3 poisons its labels), {}-of-{} key sharing\n",
        config.sharing.threshold, config.sharing.holders
    );

    let ledger = Arc::new(InMemoryLedger::with_finality_lag(1));
    let trainer = Arc::new(LeastSquaresTrainer {
        epochs: 50,
        learning_rate: 0.05,
    });
    let mut coordinator = RoundCoordinator::new(config, ledger.clone(), trainer, devices)?;
    let mut authority = KeyAuthority::new(PrincipalId::new("key-authority"));
    coordinator.setup(&mut authority, ModelVector::zeros(3))?;

    for result in coordinator.run(5) {
        match result {
            Ok(record) => println!(
                "Round {}: accepted {}, rejected {:?}, model {:?}",
                record.index,
                record.accepted.len(),
                record.outliers.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
                record.global_after.to_vec()
            ),
            Err(e) => println!("Round failed: {}", e),
        }
    }

    println!();
    for entry in coordinator.audit_log().entries() {
        if let AuditEntry::Audit(report) = entry {
            println!(
                "Audit round {}: {} (max diff {:?})",
                report.round,
                if report.passed { "passed" } else { "MISMATCH" },
                report.max_abs_diff
            );
        }
    }

    let (round, model) = with_retry(&RetryPolicy::default(), "get_global_model", || {
        ledger.get_global_model()
    })?;
    println!("\nFinal global model after round {}: {:?}", round, model.to_vec());
    println!("Expected weights close to [2.0, -1.0, 0.5]");
    Ok(())
}
