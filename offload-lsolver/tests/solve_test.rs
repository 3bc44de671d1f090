use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use offload_core::abi::{DeviceCommand, SolverArgumentRecord};
use offload_core::notification::signal_raw;
use offload_core::Command;
use offload_lsolver::algorithms::offload::{
    RESIDUAL_POSITION, RHS_POSITION, SOLUTION_POSITION, STATUS_POSITION,
};
use offload_lsolver::{
    status_of, BiConjugateGradient, ConjugateGradient, DeviceTransport, DispatchConfig,
    MatrixView, OffloadConfig, OffloadSolver, Qmr, SolveError, Triplet,
};

// Helper for float comparison in tests
fn assert_approx_eq_vec(a: &[f64], b: &[f64], tolerance: f64) {
    assert_eq!(a.len(), b.len(), "Vector lengths differ");
    for i in 0..a.len() {
        let diff = (a[i] - b[i]).abs();
        assert!(
            diff <= tolerance,
            "Verification failed at index {}: expected {}, got {}, diff {}",
            i,
            b[i],
            a[i],
            diff
        );
    }
}

fn local_config(workers: usize, chunk_rows: usize) -> OffloadConfig {
    OffloadConfig {
        dispatch: DispatchConfig {
            workers,
            chunk_rows,
        },
        ..OffloadConfig::default()
    }
}

fn tridiagonal() -> Arc<MatrixView> {
    Arc::new(
        MatrixView::from_dense_rows(&[
            vec![4.0, -1.0, 0.0],
            vec![-1.0, 4.0, -1.0],
            vec![0.0, -1.0, 4.0],
        ])
        .unwrap(),
    )
}

#[test]
fn test_local_conjugate_gradient() {
    let _ = env_logger::builder().is_test(true).try_init();
    let solver = OffloadSolver::new(local_config(2, 1)).unwrap();
    let result = solver
        .solve(&ConjugateGradient::default(), &tridiagonal(), &[1.0, 2.0, 3.0])
        .unwrap();

    let expected_x = vec![0.464, 0.857, 0.964];
    assert_approx_eq_vec(&result.x, &expected_x, 1e-3);
    assert!(result.iterations <= 3);
    assert_eq!(solver.dispatcher().pending(), 0);
}

#[test]
fn test_local_solve_leaves_no_pending_jobs() {
    let solver = OffloadSolver::new(local_config(4, 1)).unwrap();
    let a = tridiagonal();
    let mut completed = 0;
    for _ in 0..20 {
        solver
            .solve(&BiConjugateGradient::default(), &a, &[1.0, 2.0, 3.0])
            .unwrap();
        assert_eq!(solver.dispatcher().pending(), 0);
        assert!(solver.dispatcher().completed() > completed);
        completed = solver.dispatcher().completed();
    }
}

#[test]
fn test_local_biconjugate_gradient_nonsymmetric() {
    let solver = OffloadSolver::new(local_config(3, 2)).unwrap();
    let a = Arc::new(
        MatrixView::from_csr(
            3,
            3,
            0,
            vec![3.0, 1.0, 2.0, 5.0, 1.0, 1.0, 4.0],
            vec![0, 1, 0, 1, 2, 1, 2],
            vec![0, 2, 5, 7],
        )
        .unwrap(),
    );
    let algorithm = BiConjugateGradient::with_params(1e-10, 50);
    let result = solver.solve(&algorithm, &a, &[1.0, 0.0, 2.0]).unwrap();
    assert_approx_eq_vec(&result.x, &[3.0 / 7.0, -2.0 / 7.0, 4.0 / 7.0], 1e-8);
}

#[test]
fn test_local_cg_on_random_spd_system() {
    let mut rng = fastrand::Rng::with_seed(2024);
    let n = 40;
    let mut triplets = Vec::new();
    for i in 0..n {
        triplets.push(Triplet::new(i, i, 4.0 + rng.f64()));
        if i + 1 < n {
            let off = -rng.f64();
            triplets.push(Triplet::new(i, i + 1, off));
            triplets.push(Triplet::new(i + 1, i, off));
        }
    }
    let a = Arc::new(MatrixView::from_triplets(n, n, triplets).unwrap());
    let b: Vec<f64> = (0..n).map(|_| rng.f64() * 2.0 - 1.0).collect();

    let solver = OffloadSolver::new(local_config(4, 7)).unwrap();
    let result = solver
        .solve(&ConjugateGradient::with_params(1e-10, 200), &a, &b)
        .unwrap();

    let ax = a.matvec_rows(0..n, &result.x).unwrap();
    assert_approx_eq_vec(&ax, &b, 1e-8);
}

#[test]
fn test_qmr_needs_the_accelerator() {
    let solver = OffloadSolver::new(local_config(1, 8)).unwrap();
    let result = solver.solve(&Qmr::default(), &tridiagonal(), &[1.0, 1.0, 1.0]);
    assert!(matches!(result, Err(SolveError::Unsupported(_))));
    assert_eq!(status_of(&result), -5000);
}

#[test]
fn test_shutdown_rejects_later_local_solves() {
    let mut solver = OffloadSolver::new(local_config(2, 8)).unwrap();
    solver.shutdown().unwrap();
    let result = solver.solve(&ConjugateGradient::default(), &tridiagonal(), &[1.0, 1.0, 1.0]);
    assert!(matches!(result, Err(SolveError::Offload(_))));
}

/// Fake accelerator that "solves" by copying b into x, as the identity
/// firmware would.
#[derive(Debug, Default)]
struct IdentityFirmware {
    event_fd: Mutex<Option<i32>>,
    status: i64,
}

fn record_at(records: &[u8], position: usize) -> SolverArgumentRecord {
    let start = 8 + position * 32;
    bytemuck::pod_read_unaligned(&records[start..start + 32])
}

impl DeviceTransport for IdentityFirmware {
    fn submit(&self, command: &mut Command<'_>) -> offload_core::Result<()> {
        match command {
            Command::LoadFirmware(args) => {
                let path =
                    unsafe { std::ffi::CStr::from_ptr(args.path as *const libc::c_char) };
                assert!(path.to_string_lossy().ends_with("_wrapper.bin"));
                assert_eq!(args.firmware_size, 64);
            }
            Command::RegisterCallerApp(args) => {
                *self.event_fd.lock().unwrap() = Some(args.event_fd);
            }
            Command::RunFirmware => {
                let fd = self.event_fd.lock().unwrap().expect("registered before run");
                signal_raw(fd, 1)?;
            }
            Command::GetSolverArguments(records) => {
                let records = records.as_bytes();
                let b = record_at(records, RHS_POSITION);
                let x = record_at(records, SOLUTION_POSITION);
                let status = record_at(records, STATUS_POSITION);
                let residual = record_at(records, RESIDUAL_POSITION);
                assert_eq!(b.size, x.size);
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        b.address as *const u8,
                        x.address as *mut u8,
                        x.size as usize,
                    );
                    std::ptr::write_unaligned(status.address as *mut i64, self.status);
                    std::ptr::write_unaligned(residual.address as *mut f64, 0.0);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn firmware_dir(test: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("offload-lsolver-{}-{}", std::process::id(), test));
    std::fs::create_dir_all(&dir).unwrap();
    for name in ["bicg_wrapper.bin", "cg_wrapper.bin", "qmr_wrapper.bin"] {
        std::fs::write(dir.join(name), [0u8; 64]).unwrap();
    }
    dir
}

fn offload_config(test: &str) -> OffloadConfig {
    let mut config = local_config(1, 8).with_firmware_dir(firmware_dir(test));
    config.offload = true;
    config
}

#[test]
fn test_offloaded_solve_reads_results_in_place() {
    let device = IdentityFirmware {
        status: 1,
        ..IdentityFirmware::default()
    };
    let solver = OffloadSolver::with_transport(offload_config("identity"), Box::new(device)).unwrap();
    let identity = Arc::new(
        MatrixView::from_csr(3, 3, 1, vec![1.0, 1.0, 1.0], vec![1, 2, 3], vec![1, 2, 3, 4])
            .unwrap(),
    );

    let result = solver
        .solve(&Qmr::default(), &identity, &[2.0, -1.0, 0.5])
        .unwrap();
    assert_eq!(result.x, vec![2.0, -1.0, 0.5]);
    assert_eq!(result.iterations, 1);
    assert_eq!(status_of(&Ok(result)), 1);
}

#[test]
fn test_negative_firmware_status_is_an_error() {
    let device = IdentityFirmware {
        status: -3,
        ..IdentityFirmware::default()
    };
    let solver =
        OffloadSolver::with_transport(offload_config("negative"), Box::new(device)).unwrap();
    let result = solver.solve(&ConjugateGradient::default(), &tridiagonal(), &[1.0, 2.0, 3.0]);
    assert!(matches!(result, Err(SolveError::Firmware(-3))));
    assert_eq!(status_of(&result), -3);
}

#[test]
fn test_offload_without_firmware_dir_reports_configuration_status() {
    let mut config = local_config(1, 8);
    config.offload = true;
    let solver =
        OffloadSolver::with_transport(config, Box::new(IdentityFirmware::default())).unwrap();
    let result = solver.solve(&BiConjugateGradient::default(), &tridiagonal(), &[1.0, 2.0, 3.0]);
    assert_eq!(status_of(&result), -1000);
}

#[test]
fn test_stop_and_init_memory_reach_the_device() {
    #[derive(Debug, Default)]
    struct CommandLog(Arc<Mutex<Vec<DeviceCommand>>>);

    impl DeviceTransport for CommandLog {
        fn submit(&self, command: &mut Command<'_>) -> offload_core::Result<()> {
            self.0.lock().unwrap().push(command.kind());
            Ok(())
        }
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    let solver = OffloadSolver::with_transport(
        local_config(1, 8),
        Box::new(CommandLog(Arc::clone(&seen))),
    )
    .unwrap();
    solver.stop().unwrap();
    solver.init_memory(0x1000, &[1, 2, 3, 4], 2).unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        vec![DeviceCommand::StopFirmware, DeviceCommand::InitMemory]
    );
}
