use std::fmt::Debug;
use std::path::{Path, PathBuf};

use cfg_if::cfg_if;

use crate::abi::{CallerAppArgs, DeviceCommand, InitMemoryArgs, LoadFirmwareArgs};
use crate::config::OffloadConfig;
use crate::error::{OffloadError, Result, DEVICE_STATUS};
use crate::marshal::RecordBuffer;

/// One command together with the payload the driver reads or fills.
#[derive(Debug)]
pub enum Command<'a> {
    LoadFirmware(LoadFirmwareArgs),
    RunFirmware,
    StopFirmware,
    SetSolverArguments(&'a mut RecordBuffer),
    GetSolverArguments(&'a mut RecordBuffer),
    RegisterCallerApp(CallerAppArgs),
    UnregisterCallerApp(CallerAppArgs),
    InitMemory(InitMemoryArgs),
}

impl Command<'_> {
    pub fn kind(&self) -> DeviceCommand {
        match self {
            Command::LoadFirmware(_) => DeviceCommand::LoadFirmware,
            Command::RunFirmware => DeviceCommand::RunFirmware,
            Command::StopFirmware => DeviceCommand::StopFirmware,
            Command::SetSolverArguments(_) => DeviceCommand::SetSolverArguments,
            Command::GetSolverArguments(_) => DeviceCommand::GetSolverArguments,
            Command::RegisterCallerApp(_) => DeviceCommand::RegisterCallerApp,
            Command::UnregisterCallerApp(_) => DeviceCommand::UnregisterCallerApp,
            Command::InitMemory(_) => DeviceCommand::InitMemory,
        }
    }

    /// Third `ioctl` argument: a pointer to the payload, or null.
    fn payload_ptr(&mut self) -> *mut libc::c_void {
        match self {
            Command::LoadFirmware(args) => args as *mut LoadFirmwareArgs as *mut libc::c_void,
            Command::RunFirmware | Command::StopFirmware => std::ptr::null_mut(),
            Command::SetSolverArguments(records) | Command::GetSolverArguments(records) => {
                records.as_mut_ptr() as *mut libc::c_void
            }
            Command::RegisterCallerApp(args) | Command::UnregisterCallerApp(args) => {
                args as *mut CallerAppArgs as *mut libc::c_void
            }
            Command::InitMemory(args) => args as *mut InitMemoryArgs as *mut libc::c_void,
        }
    }
}

/// Something that can carry commands to the accelerator.
///
/// The production implementation is [`CharDevice`]; tests substitute a
/// recording fake.
pub trait DeviceTransport: Debug + Send + Sync {
    /// Issues one command. A failure is reported as [`OffloadError::Device`]
    /// carrying the driver's negative status.
    fn submit(&self, command: &mut Command<'_>) -> Result<()>;

    /// Path an interrupt handler can open to request a stop, if any.
    fn device_path(&self) -> Option<&Path> {
        None
    }
}

/// The accelerator's character device. Every command opens the device file,
/// issues one `ioctl`, and closes it again.
#[derive(Debug, Clone)]
pub struct CharDevice {
    path: PathBuf,
}

impl CharDevice {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_config(config: &OffloadConfig) -> Self {
        Self::new(config.device_path.clone())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

cfg_if! {
    if #[cfg(target_os = "linux")] {
        /// Opens `path`, issues one request, and closes the file again.
        fn issue_ioctl(path: &Path, kind: DeviceCommand, payload: *mut libc::c_void) -> Result<()> {
            use std::os::fd::AsRawFd;

            let file = std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .map_err(|source| OffloadError::DeviceUnavailable {
                    path: path.to_path_buf(),
                    source,
                })?;
            // SAFETY: `payload` is null or points at a live `#[repr(C)]` struct or
            // record array whose layout matches the request code.
            let rc = unsafe { libc::ioctl(file.as_raw_fd(), kind.request_code() as _, payload) };
            if rc < 0 {
                let status = std::io::Error::last_os_error()
                    .raw_os_error()
                    .map(|errno| -errno)
                    .unwrap_or(DEVICE_STATUS);
                return Err(OffloadError::Device { command: kind, status });
            }
            Ok(())
        }
    } else {
        fn issue_ioctl(_path: &Path, _kind: DeviceCommand, _payload: *mut libc::c_void) -> Result<()> {
            Err(OffloadError::UnsupportedPlatform("accelerator ioctl interface"))
        }
    }
}

impl DeviceTransport for CharDevice {
    fn submit(&self, command: &mut Command<'_>) -> Result<()> {
        let kind = command.kind();
        log::trace!(
            "ioctl {:?} (0x{:x}) on {}",
            kind,
            kind.request_code(),
            self.path.display()
        );
        issue_ioctl(&self.path, kind, command.payload_ptr()).inspect_err(|err| {
            log::warn!("{:?} failed on {}: {}", kind, self.path.display(), err);
        })
    }

    fn device_path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Asks the accelerator to abandon the running firmware.
pub fn stop_firmware(transport: &dyn DeviceTransport) -> Result<()> {
    log::info!("requesting firmware stop");
    transport.submit(&mut Command::StopFirmware)
}

/// Copies `data` into accelerator memory at `destination`, written in
/// `chunks` pieces.
pub fn init_memory(
    transport: &dyn DeviceTransport,
    destination: u64,
    data: &[u8],
    chunks: u64,
) -> Result<()> {
    if chunks == 0 {
        return Err(OffloadError::InvalidArgument(
            "init_memory needs at least one write chunk".to_string(),
        ));
    }
    if data.is_empty() {
        return Err(OffloadError::InvalidArgument(
            "init_memory called with an empty source buffer".to_string(),
        ));
    }
    log::debug!(
        "initializing {} bytes of device memory at 0x{:x} in {} chunks",
        data.len(),
        destination,
        chunks
    );
    transport.submit(&mut Command::InitMemory(InitMemoryArgs {
        destination,
        user_address: data.as_ptr() as usize as u64,
        user_size: data.len() as u64,
        write_chunks: chunks,
    }))
}
