use cfg_if::cfg_if;

use crate::error::{OffloadError, Result};

cfg_if! {
    if #[cfg(target_os = "linux")] {
        use std::io;
        use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

        /// Kernel eventfd the driver signals when the firmware finishes.
        #[derive(Debug)]
        pub struct CompletionEvent {
            fd: OwnedFd,
        }

        impl CompletionEvent {
            pub fn new() -> Result<Self> {
                // SAFETY: plain syscall, no pointers involved.
                let raw = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC) };
                if raw < 0 {
                    return Err(OffloadError::Notification(io::Error::last_os_error()));
                }
                // SAFETY: `raw` is a fresh descriptor nobody else owns.
                let fd = unsafe { OwnedFd::from_raw_fd(raw) };
                log::trace!("completion eventfd {} created", raw);
                Ok(Self { fd })
            }

            pub fn raw_fd(&self) -> RawFd {
                self.fd.as_raw_fd()
            }

            /// Blocks until the counter is non-zero and returns it.
            ///
            /// Signals interrupting the read are retried, so only a real
            /// notification (or a hard error) ends the wait.
            pub fn wait(&self) -> Result<u64> {
                let mut value = 0u64;
                loop {
                    // SAFETY: reading exactly 8 bytes into a local u64.
                    let n = unsafe {
                        libc::read(
                            self.raw_fd(),
                            &mut value as *mut u64 as *mut libc::c_void,
                            std::mem::size_of::<u64>(),
                        )
                    };
                    if n == std::mem::size_of::<u64>() as isize {
                        return Ok(value);
                    }
                    if n < 0 {
                        let err = io::Error::last_os_error();
                        if err.kind() == io::ErrorKind::Interrupted {
                            log::debug!("completion wait interrupted, resuming");
                            continue;
                        }
                        return Err(OffloadError::Notification(err));
                    }
                    return Err(OffloadError::Notification(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("short read of {n} bytes from completion eventfd"),
                    )));
                }
            }

            /// Adds `value` to the counter, waking a pending [`wait`](Self::wait).
            pub fn signal(&self, value: u64) -> Result<()> {
                signal_raw(self.raw_fd(), value)
            }
        }

        /// Writes to an eventfd known only by number, as a driver would.
        pub fn signal_raw(fd: RawFd, value: u64) -> Result<()> {
            // SAFETY: writing exactly 8 bytes from a local u64.
            let n = unsafe {
                libc::write(
                    fd,
                    &value as *const u64 as *const libc::c_void,
                    std::mem::size_of::<u64>(),
                )
            };
            if n != std::mem::size_of::<u64>() as isize {
                return Err(OffloadError::Notification(io::Error::last_os_error()));
            }
            Ok(())
        }
    } else {
        /// Placeholder on hosts without eventfd; construction always fails.
        #[derive(Debug)]
        pub struct CompletionEvent {
            _private: (),
        }

        impl CompletionEvent {
            pub fn new() -> Result<Self> {
                Err(OffloadError::UnsupportedPlatform("eventfd completion notification"))
            }

            pub fn raw_fd(&self) -> i32 {
                -1
            }

            pub fn wait(&self) -> Result<u64> {
                Err(OffloadError::UnsupportedPlatform("eventfd completion notification"))
            }

            pub fn signal(&self, _value: u64) -> Result<()> {
                Err(OffloadError::UnsupportedPlatform("eventfd completion notification"))
            }
        }

        pub fn signal_raw(_fd: i32, _value: u64) -> Result<()> {
            Err(OffloadError::UnsupportedPlatform("eventfd completion notification"))
        }
    }
}
