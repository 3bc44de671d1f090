//! Binary interface shared with the accelerator's kernel driver.
//!
//! Every structure here is `#[repr(C)]` with only 64-bit (or paired 32-bit)
//! fields, so the layout is identical on every host the driver supports.

use bytemuck::{Pod, Zeroable};

/// ioctl "type" byte used by the solver accelerator driver.
pub const IOC_MAGIC: u8 = b'S';

const IOC_NRBITS: u64 = 8;
const IOC_TYPEBITS: u64 = 8;
const IOC_SIZEBITS: u64 = 14;

const IOC_NRSHIFT: u64 = 0;
const IOC_TYPESHIFT: u64 = IOC_NRSHIFT + IOC_NRBITS;
const IOC_SIZESHIFT: u64 = IOC_TYPESHIFT + IOC_TYPEBITS;
const IOC_DIRSHIFT: u64 = IOC_SIZESHIFT + IOC_SIZEBITS;

const IOC_NONE: u64 = 0;
const IOC_WRITE: u64 = 1;
const IOC_READ: u64 = 2;

/// Linux `_IOC` request encoding.
const fn ioc(dir: u64, nr: u8, size: usize) -> u64 {
    (dir << IOC_DIRSHIFT)
        | ((IOC_MAGIC as u64) << IOC_TYPESHIFT)
        | ((nr as u64) << IOC_NRSHIFT)
        | ((size as u64) << IOC_SIZESHIFT)
}

/// The accelerator's command set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceCommand {
    LoadFirmware,
    RunFirmware,
    StopFirmware,
    SetSolverArguments,
    GetSolverArguments,
    RegisterCallerApp,
    UnregisterCallerApp,
    InitMemory,
}

impl DeviceCommand {
    /// Request number passed to `ioctl(2)`.
    pub const fn request_code(self) -> u64 {
        match self {
            DeviceCommand::LoadFirmware => {
                ioc(IOC_WRITE, 1, std::mem::size_of::<LoadFirmwareArgs>())
            }
            DeviceCommand::RunFirmware => ioc(IOC_NONE, 2, 0),
            DeviceCommand::StopFirmware => ioc(IOC_NONE, 3, 0),
            DeviceCommand::SetSolverArguments => {
                ioc(IOC_WRITE, 4, std::mem::size_of::<SolverArgumentsHeader>())
            }
            DeviceCommand::GetSolverArguments => ioc(
                IOC_READ | IOC_WRITE,
                5,
                std::mem::size_of::<SolverArgumentsHeader>(),
            ),
            DeviceCommand::RegisterCallerApp => {
                ioc(IOC_WRITE, 6, std::mem::size_of::<CallerAppArgs>())
            }
            DeviceCommand::UnregisterCallerApp => {
                ioc(IOC_WRITE, 7, std::mem::size_of::<CallerAppArgs>())
            }
            DeviceCommand::InitMemory => {
                ioc(IOC_WRITE, 8, std::mem::size_of::<InitMemoryArgs>())
            }
        }
    }
}

/// Payload of `LOAD_FIRMWARE`: a NUL-terminated path owned by the caller.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, PartialEq, Eq)]
pub struct LoadFirmwareArgs {
    pub path: u64,
    pub path_len: u64,
    pub firmware_size: u64,
}

/// Leading field of the `SET`/`GET_SOLVER_ARGUMENTS` buffer; records follow.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, PartialEq, Eq)]
pub struct SolverArgumentsHeader {
    pub count: u64,
}

/// One marshalled argument as the driver sees it.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, PartialEq, Eq)]
pub struct SolverArgumentRecord {
    pub address: u64,
    pub size: u64,
    pub alignment: u64,
    pub direction: u64,
}

/// Notification handle record for `REGISTER`/`UNREGISTER_CALLER_APP`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, PartialEq, Eq)]
pub struct CallerAppArgs {
    pub event_fd: i32,
    pub pid: i32,
}

/// Payload of `INIT_MEMORY`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, PartialEq, Eq)]
pub struct InitMemoryArgs {
    pub destination: u64,
    pub user_address: u64,
    pub user_size: u64,
    pub write_chunks: u64,
}
