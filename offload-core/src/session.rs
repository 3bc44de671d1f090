use std::ffi::CString;
use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use cfg_if::cfg_if;

use crate::abi::{CallerAppArgs, LoadFirmwareArgs};
use crate::args::ArgumentList;
use crate::config::OffloadConfig;
use crate::device::{Command, DeviceTransport};
use crate::error::{OffloadError, Result};
use crate::interrupt::InterruptGuard;
use crate::marshal::{self, RecordBuffer};
use crate::notification::CompletionEvent;

/// Only one offload call talks to the accelerator at a time in this process.
static SESSION_LOCK: Mutex<()> = Mutex::new(());

/// Progress of an offload call. Failures leave the last state reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    ArgsWritten,
    FirmwareTransferred,
    AppRegistered,
    Running,
    Waiting,
    Completed,
    AppUnregistered,
    ResultsRead,
    Done,
}

/// Snapshot of the session's transfer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub records_allocated: u64,
    pub records_released: u64,
    pub bytes_marshalled: u64,
    pub commands_issued: u64,
}

#[derive(Debug, Clone, Default)]
struct Counters {
    records_allocated: Arc<AtomicU64>,
    records_released: Arc<AtomicU64>,
    bytes_marshalled: Arc<AtomicU64>,
    commands_issued: Arc<AtomicU64>,
}

/// Record array that reports its release to the session counters.
struct TrackedRecords {
    records: RecordBuffer,
    released: Arc<AtomicU64>,
}

impl Deref for TrackedRecords {
    type Target = RecordBuffer;

    fn deref(&self) -> &RecordBuffer {
        &self.records
    }
}

impl Drop for TrackedRecords {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::Relaxed);
        log::trace!("record buffer of {} bytes released", self.records.len());
    }
}

cfg_if! {
    if #[cfg(unix)] {
        fn firmware_c_path(path: &Path) -> Result<CString> {
            use std::os::unix::ffi::OsStrExt;
            CString::new(path.as_os_str().as_bytes()).map_err(|_| {
                OffloadError::InvalidConfiguration(format!(
                    "firmware path {} contains a NUL byte",
                    path.display()
                ))
            })
        }
    } else {
        fn firmware_c_path(path: &Path) -> Result<CString> {
            let text = path.to_str().ok_or_else(|| {
                OffloadError::InvalidConfiguration(format!(
                    "firmware path {} is not valid UTF-8",
                    path.display()
                ))
            })?;
            CString::new(text).map_err(|_| {
                OffloadError::InvalidConfiguration(format!(
                    "firmware path {} contains a NUL byte",
                    path.display()
                ))
            })
        }
    }
}

/// Runs solver firmware on the accelerator, one blocking call at a time.
#[derive(Debug)]
pub struct AcceleratorSession<'t> {
    transport: &'t dyn DeviceTransport,
    config: OffloadConfig,
    state: SessionState,
    counters: Counters,
}

impl<'t> AcceleratorSession<'t> {
    pub fn new(transport: &'t dyn DeviceTransport, config: &OffloadConfig) -> Self {
        Self {
            transport,
            config: config.clone(),
            state: SessionState::Idle,
            counters: Counters::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transfer_stats(&self) -> TransferStats {
        TransferStats {
            records_allocated: self.counters.records_allocated.load(Ordering::Relaxed),
            records_released: self.counters.records_released.load(Ordering::Relaxed),
            bytes_marshalled: self.counters.bytes_marshalled.load(Ordering::Relaxed),
            commands_issued: self.counters.commands_issued.load(Ordering::Relaxed),
        }
    }

    fn advance(&mut self, next: SessionState) {
        log::debug!("session {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn submit(&self, command: &mut Command<'_>) -> Result<()> {
        self.counters.commands_issued.fetch_add(1, Ordering::Relaxed);
        let kind = command.kind();
        self.transport.submit(command).inspect_err(|err| {
            log::error!("{:?} failed in state {:?}: {}", kind, self.state, err);
        })
    }

    fn marshall_tracked(&self, args: &ArgumentList<'_>) -> Result<TrackedRecords> {
        let records = marshal::marshall(args)?;
        self.counters
            .records_allocated
            .fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_marshalled
            .fetch_add(records.len() as u64, Ordering::Relaxed);
        Ok(TrackedRecords {
            records,
            released: Arc::clone(&self.counters.records_released),
        })
    }

    /// Runs firmware `firmware` (a file name inside the configured firmware
    /// directory) against `args` and blocks until the accelerator reports
    /// completion.
    ///
    /// OUT and IN_OUT arguments are written in place by the device. The
    /// returned list holds the descriptors the device handed back.
    pub fn run(&mut self, firmware: &str, args: &ArgumentList<'_>) -> Result<ArgumentList<'static>> {
        let _exclusive = SESSION_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        self.state = SessionState::Idle;
        log::info!("offloading {} arguments to firmware {}", args.len(), firmware);

        let firmware_path = self.config.firmware_path(firmware)?;
        let firmware_size = std::fs::metadata(&firmware_path)?.len();
        let c_path = firmware_c_path(&firmware_path)?;

        let mut records = self.marshall_tracked(args)?;
        self.submit(&mut Command::SetSolverArguments(&mut records.records))?;
        self.advance(SessionState::ArgsWritten);

        self.submit(&mut Command::LoadFirmware(LoadFirmwareArgs {
            path: c_path.as_ptr() as usize as u64,
            path_len: c_path.as_bytes().len() as u64,
            firmware_size,
        }))?;
        self.advance(SessionState::FirmwareTransferred);

        let event = CompletionEvent::new()?;
        let caller = CallerAppArgs {
            event_fd: event.raw_fd(),
            pid: std::process::id() as i32,
        };
        self.submit(&mut Command::RegisterCallerApp(caller))?;
        self.advance(SessionState::AppRegistered);

        {
            let _guard =
                InterruptGuard::install(self.config.interrupt_signal, self.transport.device_path())?;
            self.submit(&mut Command::RunFirmware)?;
            self.advance(SessionState::Running);

            self.advance(SessionState::Waiting);
            let value = event.wait()?;
            log::debug!("completion notification received ({})", value);
            self.advance(SessionState::Completed);

            self.submit(&mut Command::UnregisterCallerApp(caller))?;
            self.advance(SessionState::AppUnregistered);
        }

        self.submit(&mut Command::GetSolverArguments(&mut records.records))?;
        let returned = marshal::unmarshall(records.as_bytes())?;
        marshal::verify_round_trip(args, &returned)?;
        self.advance(SessionState::ResultsRead);

        drop(records);
        self.advance(SessionState::Done);
        log::info!("firmware {} completed", firmware);
        Ok(returned)
    }
}
