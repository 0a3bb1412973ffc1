//! Settings-driven runs, cancellation and result exchange.

use std::sync::atomic::{AtomicUsize, Ordering};

use approx::assert_relative_eq;
use pl_core::{Control, Distribution, Error, Progress, ProgressMonitor};
use pl_prob::Normal;
use pl_reliability::{
    ConvergenceStatus, FnLimitState, MethodKind, ReliabilityResult, Settings, StochasticSetup,
    run, run_with_monitor,
};

fn setup(settings: &Settings) -> StochasticSetup {
    let d: Vec<Box<dyn Distribution>> =
        vec![Box::new(Normal::new(2.0, 1.0).unwrap()), Box::new(Normal::new(1.0, 1.0).unwrap())];
    let correlation = settings.build_correlation(d.len()).unwrap();
    StochasticSetup::new(d, correlation).unwrap()
}

struct AbortAfter {
    steps: usize,
    calls: AtomicUsize,
}

impl ProgressMonitor for AbortAfter {
    fn report(&self, progress: &Progress) -> Control {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if progress.step >= self.steps { Control::Abort } else { Control::Continue }
    }
}

#[test]
fn json_settings_with_correlation() {
    let settings = Settings::from_json_str(
        r#"{
            "method": "form",
            "correlation": "gaussian",
            "correlation_pairs": [{"i": 0, "j": 1, "rho": 0.5}]
        }"#,
    )
    .unwrap();
    let s = setup(&settings);
    let lsf = FnLimitState::new(|d| Ok(d.x(1)? - d.x(0)?));
    let r = run(&settings, &s, &lsf).unwrap();
    assert_relative_eq!(r.beta(), -1.0, epsilon = 2e-6);
    assert_eq!(r.method, "FORM");
}

#[test]
fn settings_file_round_trip() {
    let settings = Settings {
        method: MethodKind::Fdir,
        seed: 99,
        max_samples: Some(5000),
        ..Default::default()
    };
    let path = std::env::temp_dir().join(format!("pl_settings_{}.json", std::process::id()));
    std::fs::write(&path, settings.to_json().unwrap()).unwrap();
    let back = Settings::from_json_file(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(back, settings);
    assert!(matches!(Settings::from_json_file("/nonexistent/settings.json"), Err(Error::Io(_))));
}

#[test]
fn invalid_correlation_is_a_validation_error() {
    let settings = Settings::from_json_str(
        r#"{"correlation": "gaussian", "correlation_pairs": [{"i": 0, "j": 1, "rho": 1.2}]}"#,
    )
    .unwrap();
    assert!(matches!(settings.build_correlation(2), Err(Error::Validation(_))));
}

#[test]
fn errors_name_the_failing_method() {
    let settings = Settings { method: MethodKind::DirectionalSampling, ..Default::default() };
    let s = setup(&settings);
    let lsf = FnLimitState::new(|_d| Ok(f64::INFINITY));
    let err = run(&settings, &s, &lsf).unwrap_err();
    assert!(err.to_string().starts_with("DirectionalSampling: "), "{err}");
}

#[test]
fn monitor_aborts_sampling() {
    let settings = Settings { method: MethodKind::CrudeMonteCarlo, ..Default::default() };
    let s = setup(&settings);
    let lsf = FnLimitState::new(|d| Ok(d.x(1)? - d.x(0)?));
    let monitor = AbortAfter { steps: 250, calls: AtomicUsize::new(0) };
    let r = run_with_monitor(&settings, &s, &lsf, &monitor).unwrap();
    assert_eq!(r.status, ConvergenceStatus::AbortedByUser);
    assert_eq!(r.n_steps, 250);
    assert_eq!(monitor.calls.load(Ordering::Relaxed), 250);
}

#[test]
fn result_exchange_through_a_stream() {
    let settings = Settings { method: MethodKind::Dsfi, seed: 4, ..Default::default() };
    let s = setup(&settings);
    let lsf = FnLimitState::new(|d| Ok(4.0 + d.x(1)? - d.x(0)?));
    let r = run(&settings, &s, &lsf).unwrap();
    assert_eq!(r.method, "DirectionalSampling+FORM");

    let mut bytes = Vec::new();
    r.write_to(&mut bytes).unwrap();
    let back = ReliabilityResult::read_from(&mut bytes.as_slice()).unwrap();
    assert_eq!(back.beta().to_bits(), r.beta().to_bits());
    assert_eq!(back.alpha(), r.alpha());
    assert_eq!(back.x, r.x);
    assert_eq!(back.method, r.method);
    assert_eq!(back.status, r.status);
    assert_eq!(back.n_steps, r.n_steps);
}
