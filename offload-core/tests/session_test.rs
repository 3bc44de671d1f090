use std::ffi::CStr;
use std::path::PathBuf;
use std::sync::Mutex;

use offload_core::abi::{DeviceCommand, SolverArgumentRecord};
use offload_core::notification::signal_raw;
use offload_core::{
    AcceleratorSession, ArgumentList, Command, DeviceTransport, Direction, MatrixView,
    OffloadConfig, OffloadError, SessionState,
};

const FIRMWARE: &str = "cg_wrapper.bin";
const FIRMWARE_BYTES: usize = 128;
const REPORTED_ITERATIONS: u64 = 42;

/// Stand-in for the accelerator driver. Records every command and plays the
/// device's part: signals completion on RUN and writes results in place.
#[derive(Debug, Default)]
struct MockDevice {
    log: Mutex<Vec<DeviceCommand>>,
    fail_on: Option<(DeviceCommand, i32)>,
    corrupt_results: bool,
    event_fd: Mutex<Option<i32>>,
    loaded: Mutex<Option<(String, u64)>>,
}

impl MockDevice {
    fn failing(command: DeviceCommand, status: i32) -> Self {
        Self {
            fail_on: Some((command, status)),
            ..Self::default()
        }
    }

    fn commands(&self) -> Vec<DeviceCommand> {
        self.log.lock().unwrap().clone()
    }

    fn write_results(records: &[u8]) {
        let count = u64::from_ne_bytes(records[..8].try_into().unwrap()) as usize;
        for chunk in records[8..8 + count * 32].chunks_exact(32) {
            let record: SolverArgumentRecord = bytemuck::pod_read_unaligned(chunk);
            if record.direction == Direction::In.tag() {
                continue;
            }
            // The device writes straight into host memory named by the record.
            unsafe {
                if record.size == 8 {
                    std::ptr::write_unaligned(record.address as *mut u64, REPORTED_ITERATIONS);
                } else {
                    let values = std::slice::from_raw_parts_mut(
                        record.address as *mut f64,
                        record.size as usize / 8,
                    );
                    values.iter_mut().for_each(|v| *v += 1.0);
                }
            }
        }
    }
}

impl DeviceTransport for MockDevice {
    fn submit(&self, command: &mut Command<'_>) -> offload_core::Result<()> {
        let kind = command.kind();
        self.log.lock().unwrap().push(kind);
        if let Some((failing, status)) = self.fail_on {
            if failing == kind {
                return Err(OffloadError::Device {
                    command: kind,
                    status,
                });
            }
        }
        match command {
            Command::LoadFirmware(args) => {
                let path = unsafe { CStr::from_ptr(args.path as *const libc::c_char) };
                let path = path.to_string_lossy().into_owned();
                assert_eq!(path.len() as u64, args.path_len);
                *self.loaded.lock().unwrap() = Some((path, args.firmware_size));
            }
            Command::RegisterCallerApp(args) => {
                assert_eq!(args.pid, std::process::id() as i32);
                *self.event_fd.lock().unwrap() = Some(args.event_fd);
            }
            Command::RunFirmware => {
                let fd = self.event_fd.lock().unwrap().expect("registered before run");
                signal_raw(fd, 1)?;
            }
            Command::GetSolverArguments(records) => {
                Self::write_results(records.as_bytes());
                if self.corrupt_results {
                    let mut record: SolverArgumentRecord =
                        bytemuck::pod_read_unaligned(&records.as_bytes()[8..40]);
                    record.alignment *= 2;
                    records.write_record(0, record)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn firmware_dir(test: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("offload-core-{}-{}", std::process::id(), test));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(FIRMWARE), vec![0u8; FIRMWARE_BYTES]).unwrap();
    dir
}

fn config_for(test: &str) -> OffloadConfig {
    let mut config = OffloadConfig::default().with_firmware_dir(firmware_dir(test));
    config.offload = true;
    config
}

fn current_handler(signal: libc::c_int) -> libc::sighandler_t {
    let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
    unsafe { libc::sigaction(signal, std::ptr::null(), &mut action) };
    action.sa_sigaction
}

#[test]
fn test_offload_round_trip_writes_results_in_place() {
    let _ = env_logger::builder().is_test(true).try_init();
    let device = MockDevice::default();
    let config = config_for("round-trip");
    let mut session = AcceleratorSession::new(&device, &config);

    let control = 7u64;
    let matrix = MatrixView::from_dense_rows(&[vec![4.0, 1.0], vec![1.0, 3.0]]).unwrap();
    let mut x = vec![0.5f64, 1.5];
    let mut iterations = 0u64;

    let returned = {
        let mut args = ArgumentList::new();
        args.add_config(&control);
        args.add_matrix(&matrix, Direction::In).unwrap();
        args.add_buffer_mut(&mut x, Direction::InOut);
        args.add_scalar_mut(&mut iterations, Direction::Out);
        session.run(FIRMWARE, &args).unwrap()
    };

    assert_eq!(returned.len(), 4);
    assert_eq!(x, vec![1.5, 2.5]);
    assert_eq!(iterations, REPORTED_ITERATIONS);
    assert_eq!(session.state(), SessionState::Done);
    assert_eq!(
        device.commands(),
        vec![
            DeviceCommand::SetSolverArguments,
            DeviceCommand::LoadFirmware,
            DeviceCommand::RegisterCallerApp,
            DeviceCommand::RunFirmware,
            DeviceCommand::UnregisterCallerApp,
            DeviceCommand::GetSolverArguments,
        ]
    );

    let (path, size) = device.loaded.lock().unwrap().clone().unwrap();
    assert!(path.ends_with(FIRMWARE));
    assert_eq!(size, FIRMWARE_BYTES as u64);

    let stats = session.transfer_stats();
    assert_eq!(stats.records_allocated, 1);
    assert_eq!(stats.records_released, 1);
    assert_eq!(stats.bytes_marshalled, 8 + 32 * 4);
    assert_eq!(stats.commands_issued, 6);
}

#[test]
fn test_set_arguments_failure_stops_before_firmware() {
    let device = MockDevice::failing(DeviceCommand::SetSolverArguments, -22);
    let config = config_for("set-failure");
    let mut session = AcceleratorSession::new(&device, &config);

    let tolerance = 1e-6f64;
    let mut args = ArgumentList::new();
    args.add_scalar(&tolerance);

    match session.run(FIRMWARE, &args) {
        Err(OffloadError::Device { command, status }) => {
            assert_eq!(command, DeviceCommand::SetSolverArguments);
            assert_eq!(status, -22);
        }
        other => panic!("Expected Device error, got {:?}", other),
    }
    assert_eq!(device.commands(), vec![DeviceCommand::SetSolverArguments]);
    assert_eq!(session.state(), SessionState::Idle);
    let stats = session.transfer_stats();
    assert_eq!(stats.records_allocated, 1);
    assert_eq!(stats.records_released, 1);
}

#[test]
fn test_missing_firmware_dir_is_configuration_error() {
    let device = MockDevice::default();
    let config = OffloadConfig::default();
    let mut session = AcceleratorSession::new(&device, &config);

    let tolerance = 1e-6f64;
    let mut args = ArgumentList::new();
    args.add_scalar(&tolerance);

    let err = session.run(FIRMWARE, &args).unwrap_err();
    assert!(matches!(err, OffloadError::MissingConfiguration(_)));
    assert!(err.is_configuration());
    assert_eq!(session.state(), SessionState::Idle);
    assert!(device.commands().is_empty());
    let stats = session.transfer_stats();
    assert_eq!(stats.records_allocated, 0);
    assert_eq!(stats.commands_issued, 0);
}

#[test]
fn test_missing_firmware_file_is_reported() {
    let device = MockDevice::default();
    let config = config_for("missing-file");
    let mut session = AcceleratorSession::new(&device, &config);

    match session.run("qmr_wrapper.bin", &ArgumentList::new()) {
        Err(OffloadError::FirmwareNotFound(path)) => assert!(path.ends_with("qmr_wrapper.bin")),
        other => panic!("Expected FirmwareNotFound, got {:?}", other),
    }    assert!(device.commands().is_empty());
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn test_run_failure_restores_signal_disposition() {
    let device = MockDevice::failing(DeviceCommand::RunFirmware, -5);
    let mut config = config_for("run-failure");
    config.interrupt_signal = libc::SIGUSR1;
    let before = current_handler(libc::SIGUSR1);
    let mut session = AcceleratorSession::new(&device, &config);

    let err = session.run(FIRMWARE, &ArgumentList::new()).unwrap_err();
    assert!(err.is_device());
    assert_eq!(err.status(), -5);
    assert_eq!(session.state(), SessionState::AppRegistered);
    assert_eq!(current_handler(libc::SIGUSR1), before);
    assert!(!device
        .commands()
        .contains(&DeviceCommand::UnregisterCallerApp));
    let stats = session.transfer_stats();
    assert_eq!(stats.records_allocated, stats.records_released);
}

#[test]
fn test_changed_records_are_rejected() {
    let device = MockDevice {
        corrupt_results: true,
        ..MockDevice::default()
    };
    let config = config_for("mismatch");
    let mut session = AcceleratorSession::new(&device, &config);

    let value = 3.0f64;
    let mut args = ArgumentList::new();
    args.add_scalar(&value);

    match session.run(FIRMWARE, &args) {
        Err(OffloadError::ArgumentMismatch { position, .. }) => assert_eq!(position, 0),
        other => panic!("Expected ArgumentMismatch, got {:?}", other),
    }
    assert_eq!(session.state(), SessionState::AppUnregistered);
}
