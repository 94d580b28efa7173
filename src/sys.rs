//! Declarations missing from `curl-sys`.
//!
//! Everything here carries the value published in libcurl's own headers. The
//! mime functions live in the same native library `curl-sys` links, so no extra
//! link directive is needed.

#![allow(non_camel_case_types)]

use curl_sys::{
    curl_slist, CURLcode, CURLoption, CURLINFO, CURL, CURLINFO_LONG, CURLINFO_STRING,
    CURLOPTTYPE_FUNCTIONPOINT, CURLOPTTYPE_LONG, CURLOPTTYPE_OBJECTPOINT,
};
use libc::{c_char, c_int, c_void, size_t};

// ─── Info type bases ─────────────────────────────────────────────────────────

pub const CURLINFO_PTR: CURLINFO = 0x400000;
pub const CURLINFO_SOCKET: CURLINFO = 0x500000;
pub const CURLINFO_OFF_T: CURLINFO = 0x600000;

pub const CURLINFO_SIZE_UPLOAD_T: CURLINFO = CURLINFO_OFF_T + 7;
pub const CURLINFO_SIZE_DOWNLOAD_T: CURLINFO = CURLINFO_OFF_T + 8;
pub const CURLINFO_SPEED_DOWNLOAD_T: CURLINFO = CURLINFO_OFF_T + 9;
pub const CURLINFO_SPEED_UPLOAD_T: CURLINFO = CURLINFO_OFF_T + 10;
pub const CURLINFO_FILETIME_T: CURLINFO = CURLINFO_OFF_T + 14;
pub const CURLINFO_CONTENT_LENGTH_DOWNLOAD_T: CURLINFO = CURLINFO_OFF_T + 15;
pub const CURLINFO_CONTENT_LENGTH_UPLOAD_T: CURLINFO = CURLINFO_OFF_T + 16;
pub const CURLINFO_TLS_SSL_PTR: CURLINFO = CURLINFO_PTR + 45;
pub const CURLINFO_ACTIVESOCKET: CURLINFO = CURLINFO_SOCKET + 44;
pub const CURLINFO_HTTP_VERSION: CURLINFO = CURLINFO_LONG + 46;
pub const CURLINFO_SCHEME: CURLINFO = CURLINFO_STRING + 49;
pub const CURLINFO_TOTAL_TIME_T: CURLINFO = CURLINFO_OFF_T + 50;
pub const CURLINFO_EFFECTIVE_METHOD: CURLINFO = CURLINFO_STRING + 58;

// ─── Options ─────────────────────────────────────────────────────────────────

pub const CURLOPT_XFERINFOFUNCTION: CURLoption = CURLOPTTYPE_FUNCTIONPOINT + 219;
pub const CURLOPT_PROXYHEADER: CURLoption = CURLOPTTYPE_OBJECTPOINT + 228;
pub const CURLOPT_HEADEROPT: CURLoption = CURLOPTTYPE_LONG + 229;
pub const CURLOPT_MIMEPOST: CURLoption = CURLOPTTYPE_OBJECTPOINT + 269;

pub const CURLHEADER_SEPARATE: libc::c_long = 1;

pub const CURLM_ADDED_ALREADY: curl_sys::CURLMcode = 7;
pub const CURL_LOCK_DATA_PSL: curl_sys::curl_lock_data = 6;

pub type curl_xferinfo_callback = extern "C" fn(
    *mut c_void,
    curl_sys::curl_off_t,
    curl_sys::curl_off_t,
    curl_sys::curl_off_t,
    curl_sys::curl_off_t,
) -> c_int;

/// Layout of the record returned for `CURLINFO_TLS_SSL_PTR`.
#[repr(C)]
pub struct curl_tlssessioninfo {
    pub backend: c_int,
    pub internals: *mut c_void,
}

// ─── Mime ────────────────────────────────────────────────────────────────────

pub enum curl_mime {}
pub enum curl_mimepart {}

extern "C" {
    pub fn curl_mime_init(easy: *mut CURL) -> *mut curl_mime;
    pub fn curl_mime_free(mime: *mut curl_mime);
    pub fn curl_mime_addpart(mime: *mut curl_mime) -> *mut curl_mimepart;
    pub fn curl_mime_name(part: *mut curl_mimepart, name: *const c_char) -> CURLcode;
    pub fn curl_mime_filename(part: *mut curl_mimepart, filename: *const c_char) -> CURLcode;
    pub fn curl_mime_type(part: *mut curl_mimepart, mimetype: *const c_char) -> CURLcode;
    pub fn curl_mime_encoder(part: *mut curl_mimepart, encoding: *const c_char) -> CURLcode;
    pub fn curl_mime_data(
        part: *mut curl_mimepart,
        data: *const c_char,
        datasize: size_t,
    ) -> CURLcode;
    pub fn curl_mime_filedata(part: *mut curl_mimepart, filename: *const c_char) -> CURLcode;
    pub fn curl_mime_subparts(part: *mut curl_mimepart, subparts: *mut curl_mime) -> CURLcode;
    pub fn curl_mime_headers(
        part: *mut curl_mimepart,
        headers: *mut curl_slist,
        take_ownership: c_int,
    ) -> CURLcode;
}
