//! # Offload Core Library
//!
//! Matrix serialization, argument marshalling, and the accelerator session
//! used to run iterative solvers on a companion device, plus the local job
//! dispatcher used when work stays on the host.
//!
//! Requires a Unix target: the interrupt guard installs POSIX signal
//! handlers. The device ioctl and eventfd completion are Linux-only.

pub mod abi;
pub mod args;
pub mod buffer;
pub mod config;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod flatten;
pub mod interrupt;
pub mod marshal;
pub mod matrix;
pub mod notification;
pub mod session;
pub mod traits;

pub use args::{ArgumentDescriptor, ArgumentList, Direction};
pub use buffer::AlignedBuffer;
pub use config::{DispatchConfig, OffloadConfig};
pub use device::{init_memory, stop_firmware, CharDevice, Command, DeviceTransport};
pub use dispatcher::{Job, LocalJobDispatcher};
pub use error::{OffloadError, Result};
pub use flatten::FlatMatrixBuffer;
pub use interrupt::InterruptGuard;
pub use marshal::{marshall, unmarshall, RecordBuffer};
pub use matrix::{
    BcsrStorage, BlockRowChunk, CsrFlags, CsrStorage, DenseStorage, MatrixStorage, MatrixView,
    Representation, Scalar, StorageFormat, Triplet, ValueKind,
};
pub use notification::CompletionEvent;
pub use session::{AcceleratorSession, SessionState, TransferStats};
pub use traits::Matrix;
