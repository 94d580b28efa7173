//! Process-wide engine lifecycle and handle-free utilities.
//!
//! [`Global::init`] must bracket all other use of the crate: take the guard
//! once, early in `main`, and keep it until every transfer and transfer set is
//! gone. Initialization is not reentrant, so a second guard is refused while
//! the first is alive.

use std::ffi::{c_char, c_int, CStr, CString};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use curl_sys::*;
use libc::c_long;
use serde::Serialize;
use tracing::debug;

use crate::error::{check_code, InitError};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Subsystems to bring up alongside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitFlags(c_long);

impl InitFlags {
    pub const DEFAULT: InitFlags = InitFlags(CURL_GLOBAL_DEFAULT);
    pub const SSL: InitFlags = InitFlags(CURL_GLOBAL_SSL);
    pub const NOTHING: InitFlags = InitFlags(CURL_GLOBAL_NOTHING);
}

impl Default for InitFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Guard for the process-wide engine state. Cleanup runs once, on drop.
#[derive(Debug)]
pub struct Global {
    _private: (),
}

impl Global {
    pub fn init(flags: InitFlags) -> Result<Self, InitError> {
        if INITIALIZED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(InitError::AlreadyInitialized);
        }
        // SAFETY: guarded by INITIALIZED, so never concurrent with itself.
        if let Err(e) = check_code(unsafe { curl_global_init(flags.0) }) {
            INITIALIZED.store(false, Ordering::Release);
            return Err(InitError::Native(e));
        }
        debug!(version = %version(), "engine initialized");
        Ok(Self { _private: () })
    }
}

impl Drop for Global {
    fn drop(&mut self) {
        // SAFETY: paired with the successful init that created this guard.
        unsafe { curl_global_cleanup() };
        INITIALIZED.store(false, Ordering::Release);
        debug!("engine cleaned up");
    }
}

/// Engine version string, e.g. `libcurl/8.5.0 OpenSSL/3.0.13 zlib/1.3`.
pub fn version() -> String {
    // SAFETY: returns a static NUL-terminated string.
    unsafe { CStr::from_ptr(curl_version()) }
        .to_string_lossy()
        .into_owned()
}

/// Build details of the linked engine.
#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    pub version: String,
    pub version_num: u32,
    pub host: String,
    pub features: i32,
    pub ssl_version: Option<String>,
    pub libz_version: Option<String>,
    pub protocols: Vec<String>,
}

impl VersionInfo {
    pub fn get() -> Self {
        // SAFETY: returns a pointer to static data. Only fields present in
        // the first layout revision are read, so any engine age is fine.
        unsafe {
            let data = &*curl_version_info(CURLVERSION_NOW);
            let mut protocols = Vec::new();
            let mut p = data.protocols;
            while !p.is_null() && !(*p).is_null() {
                protocols.push(lossy(*p).unwrap_or_default());
                p = p.add(1);
            }
            Self {
                version: lossy(data.version).unwrap_or_default(),
                version_num: data.version_num,
                host: lossy(data.host).unwrap_or_default(),
                features: data.features,
                ssl_version: lossy(data.ssl_version),
                libz_version: lossy(data.libz_version),
                protocols,
            }
        }
    }

    fn has(&self, bit: c_int) -> bool {
        self.features & bit != 0
    }

    pub fn ipv6(&self) -> bool {
        self.has(CURL_VERSION_IPV6)
    }

    pub fn ssl(&self) -> bool {
        self.has(CURL_VERSION_SSL)
    }

    pub fn libz(&self) -> bool {
        self.has(CURL_VERSION_LIBZ)
    }

    pub fn http2(&self) -> bool {
        self.has(CURL_VERSION_HTTP2)
    }

    pub fn async_dns(&self) -> bool {
        self.has(CURL_VERSION_ASYNCHDNS)
    }

    pub fn supports_protocol(&self, name: &str) -> bool {
        self.protocols.iter().any(|p| p.eq_ignore_ascii_case(name))
    }
}

unsafe fn lossy(p: *const c_char) -> Option<String> {
    (!p.is_null()).then(|| CStr::from_ptr(p).to_string_lossy().into_owned())
}

/// Percent-encode `input`.
pub fn escape(input: &[u8]) -> Option<String> {
    escape_with(std::ptr::null_mut(), input)
}

/// Decode percent escapes. `+` is left alone.
pub fn unescape(input: &str) -> Option<Vec<u8>> {
    unescape_with(std::ptr::null_mut(), input)
}

pub(crate) fn escape_with(handle: *mut CURL, input: &[u8]) -> Option<String> {
    let len = c_int::try_from(input.len()).ok()?;
    // SAFETY: input is valid for len bytes; the result is freed below.
    unsafe {
        let out = curl_easy_escape(handle, input.as_ptr().cast(), len);
        if out.is_null() {
            return None;
        }
        let s = CStr::from_ptr(out).to_string_lossy().into_owned();
        curl_free(out.cast());
        Some(s)
    }
}

pub(crate) fn unescape_with(handle: *mut CURL, input: &str) -> Option<Vec<u8>> {
    let len = c_int::try_from(input.len()).ok()?;
    let mut out_len: c_int = 0;
    // SAFETY: input is valid for len bytes; the result holds out_len bytes
    // and is freed below.
    unsafe {
        let out = curl_easy_unescape(handle, input.as_ptr().cast(), len, &mut out_len);
        if out.is_null() {
            return None;
        }
        let n = usize::try_from(out_len).unwrap_or(0);
        let bytes = std::slice::from_raw_parts(out.cast::<u8>(), n).to_vec();
        curl_free(out.cast());
        Some(bytes)
    }
}

/// Parse an HTTP/mail style date. `None` if the engine cannot read it.
pub fn parse_date(input: &str) -> Option<SystemTime> {
    let c = CString::new(input).ok()?;
    // SAFETY: NUL-terminated input; a null "now" pointer is allowed.
    let secs = unsafe { curl_getdate(c.as_ptr(), std::ptr::null()) };
    if secs == -1 {
        return None;
    }
    match u64::try_from(secs) {
        Ok(s) => UNIX_EPOCH.checked_add(Duration::from_secs(s)),
        Err(_) => UNIX_EPOCH.checked_sub(Duration::from_secs(secs.unsigned_abs())),
    }
}
