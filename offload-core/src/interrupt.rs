//! Scoped signal handler that stops the accelerator when the process is
//! interrupted during a device run.
//!
//! The handler only uses async-signal-safe calls (`open`, `ioctl`,
//! `close`), then forwards the signal to whatever handler was installed
//! before. Dropping the guard restores that earlier disposition.

use std::ffi::CString;
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::abi::DeviceCommand;
use crate::error::{OffloadError, Result};

struct HandlerSlot {
    stop_path: Option<CString>,
    previous: libc::sigaction,
}

static ACTIVE_SLOT: AtomicPtr<HandlerSlot> = AtomicPtr::new(ptr::null_mut());

/// Handler invocations currently between their slot load and return.
static HANDLERS_RUNNING: AtomicUsize = AtomicUsize::new(0);

/// Keeps a handler invocation counted in `HANDLERS_RUNNING` until it returns.
struct RunningHandler;

impl RunningHandler {
    fn enter() -> Self {
        HANDLERS_RUNNING.fetch_add(1, Ordering::SeqCst);
        RunningHandler
    }
}

impl Drop for RunningHandler {
    fn drop(&mut self) {
        HANDLERS_RUNNING.fetch_sub(1, Ordering::SeqCst);
    }
}

type PlainHandler = extern "C" fn(libc::c_int);
type InfoHandler = extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void);

extern "C" fn on_interrupt(
    signal: libc::c_int,
    info: *mut libc::siginfo_t,
    context: *mut libc::c_void,
) {
    let _running = RunningHandler::enter();
    let slot = ACTIVE_SLOT.load(Ordering::SeqCst);
    if slot.is_null() {
        return;
    }
    // SAFETY: the guard frees the slot only after clearing `ACTIVE_SLOT` and
    // seeing no handler in flight, and this invocation is counted.
    let slot = unsafe { &*slot };

    if let Some(path) = &slot.stop_path {
        // SAFETY: async-signal-safe syscalls on a NUL-terminated path.
        unsafe {
            let fd = libc::open(path.as_ptr(), libc::O_RDWR | libc::O_CLOEXEC);
            if fd >= 0 {
                libc::ioctl(fd, DeviceCommand::StopFirmware.request_code() as _);
                libc::close(fd);
            }
        }
    }

    let handler = slot.previous.sa_sigaction;
    if handler == libc::SIG_DFL || handler == libc::SIG_IGN {
        return;
    }
    // SAFETY: a disposition that is neither SIG_DFL nor SIG_IGN is a function
    // pointer whose signature is selected by SA_SIGINFO.
    unsafe {
        if slot.previous.sa_flags & libc::SA_SIGINFO != 0 {
            let chained: InfoHandler = std::mem::transmute(handler);
            chained(signal, info, context);
        } else {
            let chained: PlainHandler = std::mem::transmute(handler);
            chained(signal);
        }
    }
}

/// Installed handler for one signal; restores the prior one on drop.
#[derive(Debug)]
pub struct InterruptGuard {
    signal: libc::c_int,
    slot: *mut HandlerSlot,
}

// SAFETY: the slot is immutable once published and only the owning guard
// frees it.
unsafe impl Send for InterruptGuard {}

impl InterruptGuard {
    /// Installs the stop handler for `signal`. With `stop_path` the handler
    /// opens that device and issues `STOP_FIRMWARE` before chaining.
    pub fn install(signal: libc::c_int, stop_path: Option<&Path>) -> Result<Self> {
        let stop_path = stop_path
            .map(|path| {
                use std::os::unix::ffi::OsStrExt;
                CString::new(path.as_os_str().as_bytes()).map_err(|_| {
                    OffloadError::InterruptHandler(format!(
                        "device path {} contains a NUL byte",
                        path.display()
                    ))
                })
            })
            .transpose()?;

        // SAFETY: zeroed sigaction is a valid out-parameter.
        let mut previous: libc::sigaction = unsafe { std::mem::zeroed() };
        // SAFETY: query only; `previous` is a valid out-parameter.
        if unsafe { libc::sigaction(signal, ptr::null(), &mut previous) } != 0 {
            return Err(OffloadError::InterruptHandler(format!(
                "cannot query signal {signal}: {}",
                std::io::Error::last_os_error()
            )));
        }

        let slot = Box::into_raw(Box::new(HandlerSlot {
            stop_path,
            previous,
        }));
        if ACTIVE_SLOT
            .compare_exchange(ptr::null_mut(), slot, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // SAFETY: `slot` was never published.
            drop(unsafe { Box::from_raw(slot) });
            return Err(OffloadError::InterruptHandler(
                "another interrupt guard is already active".to_string(),
            ));
        }

        // SAFETY: zeroed sigaction, then every field the kernel reads is set.
        let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
        action.sa_sigaction = on_interrupt as usize;
        action.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
        // SAFETY: `action.sa_mask` is a valid sigset_t.
        unsafe { libc::sigemptyset(&mut action.sa_mask) };

        // SAFETY: installing a handler with a fully initialized action.
        if unsafe { libc::sigaction(signal, &action, ptr::null_mut()) } != 0 {
            let err = std::io::Error::last_os_error();
            ACTIVE_SLOT.store(ptr::null_mut(), Ordering::Release);
            // SAFETY: the handler was never installed, so nobody reads the slot.
            drop(unsafe { Box::from_raw(slot) });
            return Err(OffloadError::InterruptHandler(format!(
                "cannot install handler for signal {signal}: {err}"
            )));
        }
        log::debug!("interrupt guard installed for signal {}", signal);
        Ok(Self { signal, slot })
    }

    pub fn signal(&self) -> libc::c_int {
        self.signal
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        // SAFETY: `self.slot` is the live slot this guard published.
        let previous = unsafe { (*self.slot).previous };
        // SAFETY: reinstating the disposition saved at install time.
        if unsafe { libc::sigaction(self.signal, &previous, ptr::null_mut()) } != 0 {
            log::error!(
                "failed to restore disposition of signal {}: {}",
                self.signal,
                std::io::Error::last_os_error()
            );
        }
        ACTIVE_SLOT.store(ptr::null_mut(), Ordering::SeqCst);
        // A handler on another thread may still hold the slot pointer.
        while HANDLERS_RUNNING.load(Ordering::SeqCst) != 0 {
            std::thread::yield_now();
        }
        // SAFETY: unpublished above and no handler is still reading it.
        drop(unsafe { Box::from_raw(self.slot) });
        log::debug!("interrupt guard for signal {} removed", self.signal);
    }
}
