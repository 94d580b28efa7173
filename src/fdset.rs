//! `select(2)` descriptor sets, for callers that drive a
//! [`TransferSet`](crate::TransferSet) without a reactor.
//!
//! ```no_run
//! # use std::time::Duration;
//! # use sluice::{FdSets, TransferSet};
//! # fn run(set: &mut TransferSet) -> sluice::Result<()> {
//! let mut fds = FdSets::new();
//! while set.perform()? > 0 {
//!     set.fdset(&mut fds)?;
//!     let wait = set.timeout()?.unwrap_or(Duration::from_secs(1));
//!     fds.select(wait.min(Duration::from_secs(1)))?;
//!     for done in set.drain_completions() {
//!         println!("{:?}: {:?}", done.key, done.result);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::io;
use std::mem::MaybeUninit;
use std::time::Duration;

use libc::{c_int, fd_set, timeval};

pub struct FdSets {
    pub(crate) read: fd_set,
    pub(crate) write: fd_set,
    pub(crate) except: fd_set,
    pub(crate) max_fd: c_int,
}

fn empty_set() -> fd_set {
    let mut set = MaybeUninit::<fd_set>::uninit();
    // SAFETY: FD_ZERO fully initializes the set.
    unsafe {
        libc::FD_ZERO(set.as_mut_ptr());
        set.assume_init()
    }
}

impl FdSets {
    pub fn new() -> Self {
        Self {
            read: empty_set(),
            write: empty_set(),
            except: empty_set(),
            max_fd: -1,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Highest descriptor in any set, or `None` when all are empty.
    pub fn max_fd(&self) -> Option<c_int> {
        (self.max_fd >= 0).then_some(self.max_fd)
    }

    fn in_range(fd: c_int) -> bool {
        usize::try_from(fd).is_ok_and(|fd| fd < libc::FD_SETSIZE)
    }

    pub fn is_readable(&self, fd: c_int) -> bool {
        // SAFETY: fd is range-checked against FD_SETSIZE.
        Self::in_range(fd) && unsafe { libc::FD_ISSET(fd, &self.read) }
    }

    pub fn is_writable(&self, fd: c_int) -> bool {
        // SAFETY: as above.
        Self::in_range(fd) && unsafe { libc::FD_ISSET(fd, &self.write) }
    }

    pub fn has_error(&self, fd: c_int) -> bool {
        // SAFETY: as above.
        Self::in_range(fd) && unsafe { libc::FD_ISSET(fd, &self.except) }
    }

    /// Wait until a descriptor is ready or `timeout` passes. Returns the number
    /// of ready descriptors; 0 on timeout. With empty sets this just sleeps.
    pub fn select(&mut self, timeout: Duration) -> io::Result<usize> {
        let mut tv = timeval {
            tv_sec: libc::time_t::try_from(timeout.as_secs()).unwrap_or(libc::time_t::MAX),
            tv_usec: libc::suseconds_t::try_from(timeout.subsec_micros()).unwrap_or(0),
        };
        // SAFETY: all three sets are initialized and owned by self.
        let rc = unsafe {
            libc::select(
                self.max_fd + 1,
                &mut self.read,
                &mut self.write,
                &mut self.except,
                &mut tv,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(usize::try_from(rc).unwrap_or(0))
    }
}

impl Default for FdSets {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FdSets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let collect = |set: &fd_set| -> Vec<c_int> {
            (0..=self.max_fd)
                // SAFETY: 0..=max_fd is within FD_SETSIZE by construction.
                .filter(|&fd| unsafe { libc::FD_ISSET(fd, set) })
                .collect()
        };
        f.debug_struct("FdSets")
            .field("read", &collect(&self.read))
            .field("write", &collect(&self.write))
            .field("except", &collect(&self.except))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_new_sets_are_empty() {
        let fds = FdSets::new();
        assert_eq!(fds.max_fd(), None);
        assert!(!fds.is_readable(0));
        assert!(!fds.is_writable(-1));
    }

    #[test]
    fn test_select_reports_readable() {
        let (mut a, b) = UnixStream::pair().unwrap();
        a.write_all(b"x").unwrap();
        let fd = b.as_raw_fd();
        let mut fds = FdSets::new();
        // SAFETY: fd is an open descriptor below FD_SETSIZE in a test process.
        unsafe { libc::FD_SET(fd, &mut fds.read) };
        fds.max_fd = fd;
        assert_eq!(fds.select(Duration::from_millis(500)).unwrap(), 1);
        assert!(fds.is_readable(fd));
    }

    #[test]
    fn test_select_times_out_on_empty() {
        let mut fds = FdSets::new();
        assert_eq!(fds.select(Duration::from_millis(5)).unwrap(), 0);
    }
}
