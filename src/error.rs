//! Error taxonomy for the binding.
//!
//! Every native return code is mapped into one of these types at the call
//! site that received it. Configuration and registration errors surface
//! synchronously; per-transfer failures inside a [`TransferSet`] only surface
//! through its completion records.
//!
//! [`TransferSet`]: crate::engine::TransferSet

use std::ffi::CStr;

use thiserror::Error;

use crate::engine::{Socket, TransferKey};
use crate::registry::{Category, InfoCategory, InfoKey, Opt};
use crate::transfer::Transfer;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Umbrella error for callers that do not care which layer failed.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Share(#[from] ShareError),
    #[error(transparent)]
    Init(#[from] InitError),
    #[error(transparent)]
    List(#[from] ListError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// A `set`/`clear`/`get_info` call was refused. Never fatal to the transfer.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("option {key:?} takes a {expected} value, got {found}")]
    CategoryMismatch {
        key: Opt,
        expected: Category,
        found: Category,
    },
    #[error("option {key:?}: value does not fit the engine's integer width")]
    OutOfRange { key: Opt },
    #[error("option {key:?} rejected by engine ({code}): {message}")]
    Rejected {
        key: Opt,
        code: u32,
        message: String,
    },
    #[error("option {key:?}: string contains an interior NUL byte")]
    InteriorNul { key: Opt },
    #[error("info {key:?} yields {expected}, requested as {found}")]
    InfoCategory {
        key: InfoKey,
        expected: InfoCategory,
        found: InfoCategory,
    },
    #[error("info {key:?} rejected by engine ({code}): {message}")]
    InfoRejected {
        key: InfoKey,
        code: u32,
        message: String,
    },
    #[error("mime part rejected by engine ({code}): {message}")]
    Mime { code: u32, message: String },
}

/// Execution of a transfer failed. Carries libcurl's stable numeric code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transfer failed ({code}): {message}")]
pub struct TransferError {
    pub code: u32,
    pub message: String,
}

impl TransferError {
    pub fn from_code(code: curl_sys::CURLcode) -> Self {
        // SAFETY: curl_easy_strerror returns a static string for every code,
        // including unknown ones.
        let message = unsafe { CStr::from_ptr(curl_sys::curl_easy_strerror(code)) }
            .to_string_lossy()
            .into_owned();
        Self {
            code: u32::from(code),
            message,
        }
    }

    pub fn is_couldnt_resolve_host(&self) -> bool {
        self.code == curl_sys::CURLE_COULDNT_RESOLVE_HOST
    }

    pub fn is_couldnt_connect(&self) -> bool {
        self.code == curl_sys::CURLE_COULDNT_CONNECT
    }

    pub fn is_operation_timedout(&self) -> bool {
        self.code == curl_sys::CURLE_OPERATION_TIMEDOUT
    }

    pub fn is_write_error(&self) -> bool {
        self.code == curl_sys::CURLE_WRITE_ERROR
    }

    pub fn is_read_error(&self) -> bool {
        self.code == curl_sys::CURLE_READ_ERROR
    }

    pub fn is_aborted_by_callback(&self) -> bool {
        self.code == curl_sys::CURLE_ABORTED_BY_CALLBACK
    }

    pub fn is_http_returned_error(&self) -> bool {
        self.code == curl_sys::CURLE_HTTP_RETURNED_ERROR
    }

    pub fn is_again(&self) -> bool {
        self.code == curl_sys::CURLE_AGAIN
    }

    pub fn is_filesize_exceeded(&self) -> bool {
        self.code == curl_sys::CURLE_FILESIZE_EXCEEDED
    }
}

/// Turn a `CURLcode` into `Ok(())` or a [`TransferError`].
pub(crate) fn check_code(code: curl_sys::CURLcode) -> Result<(), TransferError> {
    if code == curl_sys::CURLE_OK {
        Ok(())
    } else {
        Err(TransferError::from_code(code))
    }
}

/// The engine refused a registration or driving call. Indicates misuse.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transfer is already registered with an engine")]
    AlreadyRegistered,
    #[error("no transfer registered under {0:?}")]
    UnknownTransfer(TransferKey),
    #[error("socket {0} is not being watched")]
    UnknownSocket(Socket),
    #[error("engine call failed ({code}): {message}")]
    Native { code: i32, message: String },
    /// Registration failed; the transfer is handed back untouched.
    #[error("transfer was not registered: {reason}")]
    Rejected {
        transfer: Box<Transfer>,
        reason: Box<EngineError>,
    },
}

impl EngineError {
    pub(crate) fn from_code(code: curl_sys::CURLMcode) -> Self {
        if code == crate::sys::CURLM_ADDED_ALREADY {
            return Self::AlreadyRegistered;
        }
        // SAFETY: curl_multi_strerror returns a static string for every code.
        let message = unsafe { CStr::from_ptr(curl_sys::curl_multi_strerror(code)) }
            .to_string_lossy()
            .into_owned();
        Self::Native { code, message }
    }

    /// Recover the transfer from a failed registration.
    pub fn into_transfer(self) -> Option<Transfer> {
        match self {
            Self::Rejected { transfer, .. } => Some(*transfer),
            _ => None,
        }
    }
}

pub(crate) fn check_multi(code: curl_sys::CURLMcode) -> Result<(), EngineError> {
    // CALL_MULTI_PERFORM only appears in pre-7.20 engines and means "ok, call again".
    if code == curl_sys::CURLM_OK || code == curl_sys::CURLM_CALL_MULTI_PERFORM {
        Ok(())
    } else {
        Err(EngineError::from_code(code))
    }
}

/// A shared-state handle call failed.
#[derive(Debug, Error)]
#[error("share call failed ({code}): {message}")]
pub struct ShareError {
    pub code: u32,
    pub message: String,
}

impl ShareError {
    pub(crate) fn from_code(code: curl_sys::CURLSHcode) -> Self {
        // SAFETY: curl_share_strerror returns a static string for every code.
        let message = unsafe { CStr::from_ptr(curl_sys::curl_share_strerror(code)) }
            .to_string_lossy()
            .into_owned();
        Self {
            code: u32::from(code),
            message,
        }
    }
}

pub(crate) fn check_share(code: curl_sys::CURLSHcode) -> Result<(), ShareError> {
    if code == curl_sys::CURLSHE_OK {
        Ok(())
    } else {
        Err(ShareError::from_code(code))
    }
}

/// A list entry could not be appended.
#[derive(Debug, Error)]
pub enum ListError {
    #[error("list entry contains a NUL byte at offset {0}")]
    InteriorNul(usize),
    #[error("engine could not allocate a list node")]
    Allocation,
}

/// Process-wide initialization failed; nothing else in the crate is usable.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("library is already initialized in this process")]
    AlreadyInitialized,
    #[error("library initialization failed: {0}")]
    Native(TransferError),
    #[error("engine refused to allocate a {0} handle")]
    Allocation(&'static str),
}
