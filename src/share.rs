//! Shared state (cookies, DNS cache, TLS sessions, connection pool) used by
//! several transfers at once.
//!
//! The engine calls back into a [`ShareLock`] around every access to the
//! shared data, so a [`Share`] may be attached to transfers running on
//! different threads. [`ParkingLock`] is the stock lock, one mutex per kind
//! of data.

use std::ffi::c_void;
use std::fmt;

use curl_sys::*;
use parking_lot::lock_api::RawMutex as _;
use parking_lot::RawMutex;
use tracing::{debug, warn};

use crate::error::{check_share, Error, InitError, ShareError};
use crate::handle::{Access, Owned, ShareHandle};
use crate::sys;

/// Data a share can hold on behalf of its transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShareData {
    Cookie,
    Dns,
    SslSession,
    Connect,
    Psl,
}

impl ShareData {
    fn raw(self) -> curl_lock_data {
        LockData::from(self).raw()
    }
}

/// What the engine is locking. `Share` guards the share's own bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockData {
    Share,
    Cookie,
    Dns,
    SslSession,
    Connect,
    Psl,
}

impl LockData {
    fn raw(self) -> curl_lock_data {
        match self {
            LockData::Share => CURL_LOCK_DATA_SHARE,
            LockData::Cookie => CURL_LOCK_DATA_COOKIE,
            LockData::Dns => CURL_LOCK_DATA_DNS,
            LockData::SslSession => CURL_LOCK_DATA_SSL_SESSION,
            LockData::Connect => CURL_LOCK_DATA_CONNECT,
            LockData::Psl => sys::CURL_LOCK_DATA_PSL,
        }
    }

    fn from_raw(raw: curl_lock_data) -> Option<Self> {
        Some(match raw {
            CURL_LOCK_DATA_SHARE => LockData::Share,
            CURL_LOCK_DATA_COOKIE => LockData::Cookie,
            CURL_LOCK_DATA_DNS => LockData::Dns,
            CURL_LOCK_DATA_SSL_SESSION => LockData::SslSession,
            CURL_LOCK_DATA_CONNECT => LockData::Connect,
            sys::CURL_LOCK_DATA_PSL => LockData::Psl,
            _ => return None,
        })
    }

    fn index(self) -> usize {
        match self {
            LockData::Share => 0,
            LockData::Cookie => 1,
            LockData::Dns => 2,
            LockData::SslSession => 3,
            LockData::Connect => 4,
            LockData::Psl => 5,
        }
    }
}

impl From<ShareData> for LockData {
    fn from(data: ShareData) -> Self {
        match data {
            ShareData::Cookie => LockData::Cookie,
            ShareData::Dns => LockData::Dns,
            ShareData::SslSession => LockData::SslSession,
            ShareData::Connect => LockData::Connect,
            ShareData::Psl => LockData::Psl,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAccess {
    Shared,
    Single,
}

/// Mutual exclusion supplied to a [`Share`]. `lock` and `unlock` for the same
/// [`LockData`] are always paired, on the same thread.
pub trait ShareLock: Send + Sync {
    fn lock(&self, data: LockData, access: LockAccess);
    fn unlock(&self, data: LockData);
}

/// One `parking_lot` raw mutex per kind of data. Shared access is treated as
/// exclusive.
pub struct ParkingLock {
    locks: [RawMutex; 6],
}

impl ParkingLock {
    pub fn new() -> Self {
        const UNLOCKED: RawMutex = RawMutex::INIT;
        Self {
            locks: [UNLOCKED; 6],
        }
    }
}

impl Default for ParkingLock {
    fn default() -> Self {
        Self::new()
    }
}

impl ShareLock for ParkingLock {
    fn lock(&self, data: LockData, _access: LockAccess) {
        self.locks[data.index()].lock();
    }

    fn unlock(&self, data: LockData) {
        // SAFETY: the engine only unlocks what it locked, on the same thread.
        unsafe { self.locks[data.index()].unlock() }
    }
}

impl fmt::Debug for ParkingLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let held: Vec<bool> = self.locks.iter().map(RawMutex::is_locked).collect();
        f.debug_struct("ParkingLock").field("held", &held).finish()
    }
}

pub struct Share {
    handle: Owned<ShareHandle>,
    // Boxed twice so the engine gets a thin, stable pointer. Dropped after
    // the handle, whose cleanup still takes the lock.
    lock: Box<Box<dyn ShareLock>>,
    shared: Vec<ShareData>,
}

// SAFETY: every engine access to the shared data goes through `lock`, which
// is Send + Sync; configuration needs `&mut self`.
unsafe impl Send for Share {}
unsafe impl Sync for Share {}

impl Share {
    /// A share guarded by a [`ParkingLock`].
    pub fn new() -> Result<Self, Error> {
        Self::with_lock(ParkingLock::new())
    }

    pub fn with_lock(lock: impl ShareLock + 'static) -> Result<Self, Error> {
        // SAFETY: plain constructor; null means allocation failure.
        let raw = unsafe { curl_share_init() };
        // SAFETY: fresh share, owned by nobody else.
        let handle = unsafe { Owned::<ShareHandle>::from_raw(raw) }
            .ok_or(InitError::Allocation("share"))?;
        let share = Self {
            handle,
            lock: Box::new(Box::new(lock)),
            shared: Vec::new(),
        };
        let data: *const Box<dyn ShareLock> = &*share.lock;
        // SAFETY: live share; the lock box outlives the handle (field order).
        unsafe {
            check_share(curl_share_setopt(
                share.handle.raw(),
                CURLSHOPT_LOCKFUNC,
                lock_cb as curl_lock_function,
            ))?;
            check_share(curl_share_setopt(
                share.handle.raw(),
                CURLSHOPT_UNLOCKFUNC,
                unlock_cb as curl_unlock_function,
            ))?;
            check_share(curl_share_setopt(
                share.handle.raw(),
                CURLSHOPT_USERDATA,
                data.cast::<c_void>(),
            ))?;
        }
        Ok(share)
    }

    /// Start sharing `data` among attached transfers. Must happen before the
    /// share is attached anywhere.
    pub fn share(&mut self, data: ShareData) -> Result<(), ShareError> {
        // SAFETY: live share; the option takes a lock-data enum value.
        check_share(unsafe { curl_share_setopt(self.handle.raw(), CURLSHOPT_SHARE, data.raw()) })?;
        if !self.shared.contains(&data) {
            self.shared.push(data);
        }
        debug!(?data, "share enabled");
        Ok(())
    }

    pub fn unshare(&mut self, data: ShareData) -> Result<(), ShareError> {
        // SAFETY: as in `share`.
        check_share(unsafe {
            curl_share_setopt(self.handle.raw(), CURLSHOPT_UNSHARE, data.raw())
        })?;
        self.shared.retain(|d| *d != data);
        Ok(())
    }

    /// Data kinds currently shared, in the order they were enabled.
    pub fn shared(&self) -> &[ShareData] {
        &self.shared
    }

    pub(crate) fn raw(&self) -> *mut CURLSH {
        self.handle.raw()
    }
}

impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Share")
            .field("handle", &self.handle)
            .field("shared", &self.shared)
            .finish_non_exhaustive()
    }
}

fn lock_of<'a>(userp: *mut c_void) -> &'a dyn ShareLock {
    // SAFETY: userp is the pointer installed in with_lock, alive as long as
    // the share handle.
    unsafe { &**userp.cast::<Box<dyn ShareLock>>() }
}

extern "C" fn lock_cb(
    _easy: *mut CURL,
    data: curl_lock_data,
    access: curl_lock_access,
    userp: *mut c_void,
) {
    let Some(data) = LockData::from_raw(data) else {
        warn!(data, "lock requested for unknown share data");
        return;
    };
    let access = if access == CURL_LOCK_ACCESS_SHARED {
        LockAccess::Shared
    } else {
        LockAccess::Single
    };
    let lock = lock_of(userp);
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| lock.lock(data, access))).is_err() {
        warn!(?data, "share lock panicked");
    }
}

extern "C" fn unlock_cb(_easy: *mut CURL, data: curl_lock_data, userp: *mut c_void) {
    let Some(data) = LockData::from_raw(data) else {
        return;
    };
    let lock = lock_of(userp);
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| lock.unlock(data))).is_err() {
        warn!(?data, "share unlock panicked");
    }
}
