//! Configuration and introspection key tables.
//!
//! Every option key ([`Opt`]) has exactly one value [`Category`], fixed in the
//! table below. [`check`] compares a [`Value`] against that category before
//! anything reaches the engine, so a mismatched value can never be coerced.
//! Introspection keys ([`InfoKey`]) work the same way on the read side, each
//! declaring a single [`InfoCategory`].

use std::ffi::{c_char, c_void, CStr};
use std::fmt;
use std::sync::Arc;

use curl_sys::*;
use libc::{c_double, c_long};

use crate::body::{BodySink, BodySource};
use crate::engine::Socket;
use crate::error::ConfigError;
use crate::handle::{Access, Easy};
use crate::list::List;
use crate::mime::MimeBuilder;
use crate::share::Share;
use crate::sys;
use crate::transfer::{DebugKind, Progress};

/// Shape of value an option accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Flag,
    Integer,
    LargeInteger,
    String,
    /// Pointer to an object the transfer keeps alive while attached.
    Object(ObjectKind),
    /// Callback plus its user data, supplied as one Rust closure or trait object.
    Callback(CallbackKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    List,
    Share,
    Mime,
    /// Opaque caller value, never interpreted (the private-data slot).
    Opaque,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    Write,
    Read,
    Header,
    Progress,
    Debug,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Flag => f.write_str("flag"),
            Category::Integer => f.write_str("integer"),
            Category::LargeInteger => f.write_str("large integer"),
            Category::String => f.write_str("string"),
            Category::Object(kind) => write!(f, "object ({kind:?})"),
            Category::Callback(kind) => write!(f, "callback ({kind:?})"),
        }
    }
}

macro_rules! options {
    ($( $name:ident = $raw:expr => $cat:expr, )*) => {
        /// Configuration keys understood by [`Transfer::set`](crate::Transfer::set).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Opt {
            $( $name, )*
        }

        impl Opt {
            pub const ALL: &'static [Opt] = &[ $( Opt::$name, )* ];

            pub fn raw(self) -> CURLoption {
                match self {
                    $( Opt::$name => $raw, )*
                }
            }

            pub fn category(self) -> Category {
                match self {
                    $( Opt::$name => $cat, )*
                }
            }
        }
    };
}

const LIST: Category = Category::Object(ObjectKind::List);

options! {
    Verbose = CURLOPT_VERBOSE => Category::Flag,
    Header = CURLOPT_HEADER => Category::Flag,
    NoProgress = CURLOPT_NOPROGRESS => Category::Flag,
    NoSignal = CURLOPT_NOSIGNAL => Category::Flag,
    FailOnError = CURLOPT_FAILONERROR => Category::Flag,
    Upload = CURLOPT_UPLOAD => Category::Flag,
    Post = CURLOPT_POST => Category::Flag,
    NoBody = CURLOPT_NOBODY => Category::Flag,
    FollowLocation = CURLOPT_FOLLOWLOCATION => Category::Flag,
    AutoReferer = CURLOPT_AUTOREFERER => Category::Flag,
    UnrestrictedAuth = CURLOPT_UNRESTRICTED_AUTH => Category::Flag,
    HttpGet = CURLOPT_HTTPGET => Category::Flag,
    ForbidReuse = CURLOPT_FORBID_REUSE => Category::Flag,
    FreshConnect = CURLOPT_FRESH_CONNECT => Category::Flag,
    TcpNoDelay = CURLOPT_TCP_NODELAY => Category::Flag,
    TcpKeepAlive = CURLOPT_TCP_KEEPALIVE => Category::Flag,
    SslVerifyPeer = CURLOPT_SSL_VERIFYPEER => Category::Flag,
    ConnectOnly = CURLOPT_CONNECT_ONLY => Category::Flag,
    CertInfo = CURLOPT_CERTINFO => Category::Flag,

    MaxRedirs = CURLOPT_MAXREDIRS => Category::Integer,
    Timeout = CURLOPT_TIMEOUT => Category::Integer,
    TimeoutMs = CURLOPT_TIMEOUT_MS => Category::Integer,
    ConnectTimeout = CURLOPT_CONNECTTIMEOUT => Category::Integer,
    ConnectTimeoutMs = CURLOPT_CONNECTTIMEOUT_MS => Category::Integer,
    Port = CURLOPT_PORT => Category::Integer,
    LocalPort = CURLOPT_LOCALPORT => Category::Integer,
    LowSpeedLimit = CURLOPT_LOW_SPEED_LIMIT => Category::Integer,
    LowSpeedTime = CURLOPT_LOW_SPEED_TIME => Category::Integer,
    BufferSize = CURLOPT_BUFFERSIZE => Category::Integer,
    HttpVersion = CURLOPT_HTTP_VERSION => Category::Integer,
    InFileSize = CURLOPT_INFILESIZE => Category::Integer,
    PostFieldSize = CURLOPT_POSTFIELDSIZE => Category::Integer,
    DnsCacheTimeout = CURLOPT_DNS_CACHE_TIMEOUT => Category::Integer,
    MaxConnects = CURLOPT_MAXCONNECTS => Category::Integer,
    SslVerifyHost = CURLOPT_SSL_VERIFYHOST => Category::Integer,
    IpResolve = CURLOPT_IPRESOLVE => Category::Integer,
    HeaderOpt = sys::CURLOPT_HEADEROPT => Category::Integer,

    InFileSizeLarge = CURLOPT_INFILESIZE_LARGE => Category::LargeInteger,
    PostFieldSizeLarge = CURLOPT_POSTFIELDSIZE_LARGE => Category::LargeInteger,
    MaxFileSizeLarge = CURLOPT_MAXFILESIZE_LARGE => Category::LargeInteger,
    ResumeFromLarge = CURLOPT_RESUME_FROM_LARGE => Category::LargeInteger,
    MaxSendSpeedLarge = CURLOPT_MAX_SEND_SPEED_LARGE => Category::LargeInteger,
    MaxRecvSpeedLarge = CURLOPT_MAX_RECV_SPEED_LARGE => Category::LargeInteger,

    Url = CURLOPT_URL => Category::String,
    UserAgent = CURLOPT_USERAGENT => Category::String,
    Referer = CURLOPT_REFERER => Category::String,
    CustomRequest = CURLOPT_CUSTOMREQUEST => Category::String,
    Proxy = CURLOPT_PROXY => Category::String,
    NoProxy = CURLOPT_NOPROXY => Category::String,
    Cookie = CURLOPT_COOKIE => Category::String,
    CookieFile = CURLOPT_COOKIEFILE => Category::String,
    CookieJar = CURLOPT_COOKIEJAR => Category::String,
    AcceptEncoding = CURLOPT_ACCEPT_ENCODING => Category::String,
    Range = CURLOPT_RANGE => Category::String,
    UserPwd = CURLOPT_USERPWD => Category::String,
    Username = CURLOPT_USERNAME => Category::String,
    Password = CURLOPT_PASSWORD => Category::String,
    CaInfo = CURLOPT_CAINFO => Category::String,
    CaPath = CURLOPT_CAPATH => Category::String,
    Interface = CURLOPT_INTERFACE => Category::String,
    MailFrom = CURLOPT_MAIL_FROM => Category::String,
    CopyPostFields = CURLOPT_COPYPOSTFIELDS => Category::String,

    HttpHeader = CURLOPT_HTTPHEADER => LIST,
    ProxyHeader = sys::CURLOPT_PROXYHEADER => LIST,
    Resolve = CURLOPT_RESOLVE => LIST,
    MailRcpt = CURLOPT_MAIL_RCPT => LIST,
    ConnectTo = CURLOPT_CONNECT_TO => LIST,
    Http200Aliases = CURLOPT_HTTP200ALIASES => LIST,
    Quote = CURLOPT_QUOTE => LIST,
    PostQuote = CURLOPT_POSTQUOTE => LIST,
    Share = CURLOPT_SHARE => Category::Object(ObjectKind::Share),
    MimePost = sys::CURLOPT_MIMEPOST => Category::Object(ObjectKind::Mime),
    Private = CURLOPT_PRIVATE => Category::Object(ObjectKind::Opaque),

    WriteFunction = CURLOPT_WRITEFUNCTION => Category::Callback(CallbackKind::Write),
    ReadFunction = CURLOPT_READFUNCTION => Category::Callback(CallbackKind::Read),
    HeaderFunction = CURLOPT_HEADERFUNCTION => Category::Callback(CallbackKind::Header),
    XferInfoFunction = sys::CURLOPT_XFERINFOFUNCTION => Category::Callback(CallbackKind::Progress),
    DebugFunction = CURLOPT_DEBUGFUNCTION => Category::Callback(CallbackKind::Debug),
}

/// A configuration value. Its category must equal the key's category.
pub enum Value {
    Flag(bool),
    Integer(i64),
    LargeInteger(i64),
    String(String),
    List(List),
    Share(Arc<Share>),
    Mime(MimeBuilder),
    Opaque(usize),
    Callback(Callback),
}

pub enum Callback {
    Write(Box<dyn BodySink>),
    Read(Box<dyn BodySource>),
    Header(Box<dyn BodySink>),
    Progress(Box<dyn FnMut(Progress) -> bool + Send>),
    Debug(Box<dyn FnMut(DebugKind, &[u8]) + Send>),
}

impl Callback {
    pub fn kind(&self) -> CallbackKind {
        match self {
            Callback::Write(_) => CallbackKind::Write,
            Callback::Read(_) => CallbackKind::Read,
            Callback::Header(_) => CallbackKind::Header,
            Callback::Progress(_) => CallbackKind::Progress,
            Callback::Debug(_) => CallbackKind::Debug,
        }
    }
}

impl Value {
    pub fn category(&self) -> Category {
        match self {
            Value::Flag(_) => Category::Flag,
            Value::Integer(_) => Category::Integer,
            Value::LargeInteger(_) => Category::LargeInteger,
            Value::String(_) => Category::String,
            Value::List(_) => LIST,
            Value::Share(_) => Category::Object(ObjectKind::Share),
            Value::Mime(_) => Category::Object(ObjectKind::Mime),
            Value::Opaque(_) => Category::Object(ObjectKind::Opaque),
            Value::Callback(cb) => Category::Callback(cb.kind()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Flag(v) => f.debug_tuple("Flag").field(v).finish(),
            Value::Integer(v) => f.debug_tuple("Integer").field(v).finish(),
            Value::LargeInteger(v) => f.debug_tuple("LargeInteger").field(v).finish(),
            Value::String(v) => f.debug_tuple("String").field(v).finish(),
            Value::List(v) => f.debug_tuple("List").field(v).finish(),
            Value::Share(_) => f.write_str("Share(..)"),
            Value::Mime(_) => f.write_str("Mime(..)"),
            Value::Opaque(v) => f.debug_tuple("Opaque").field(v).finish(),
            Value::Callback(cb) => write!(f, "Callback({:?})", cb.kind()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Flag(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<List> for Value {
    fn from(v: List) -> Self {
        Value::List(v)
    }
}

/// Reject `value` unless its category is exactly `key`'s category.
pub fn check(key: Opt, value: &Value) -> Result<(), ConfigError> {
    let expected = key.category();
    let found = value.category();
    if expected == found {
        Ok(())
    } else {
        Err(ConfigError::CategoryMismatch {
            key,
            expected,
            found,
        })
    }
}

// ─── Native setters ──────────────────────────────────────────────────────────

fn rejected(key: Opt, code: CURLcode) -> ConfigError {
    // SAFETY: static string for every code.
    let message = unsafe { CStr::from_ptr(curl_easy_strerror(code)) }
        .to_string_lossy()
        .into_owned();
    ConfigError::Rejected {
        key,
        code: u32::from(code),
        message,
    }
}

fn check_set(key: Opt, code: CURLcode) -> Result<(), ConfigError> {
    if code == CURLE_OK {
        Ok(())
    } else {
        Err(rejected(key, code))
    }
}

pub(crate) fn set_long(h: &impl Access<Easy>, key: Opt, value: c_long) -> Result<(), ConfigError> {
    // SAFETY: live handle; key takes a long.
    check_set(key, unsafe { curl_easy_setopt(h.raw(), key.raw(), value) })
}

pub(crate) fn set_off_t(h: &impl Access<Easy>, key: Opt, value: curl_off_t) -> Result<(), ConfigError> {
    // SAFETY: live handle; key takes a curl_off_t.
    check_set(key, unsafe { curl_easy_setopt(h.raw(), key.raw(), value) })
}

pub(crate) fn set_ptr(
    h: &impl Access<Easy>,
    key: Opt,
    value: *const c_void,
) -> Result<(), ConfigError> {
    // SAFETY: live handle; the caller keeps whatever value points at alive
    // for as long as the option stays set.
    check_set(key, unsafe { curl_easy_setopt(h.raw(), key.raw(), value) })
}

/// Set a raw option that has no [`Opt`] entry (data pointers, trampolines).
pub(crate) fn set_raw_ptr(h: &impl Access<Easy>, option: CURLoption, value: *const c_void) {
    // SAFETY: live handle; only used for the pointer options the transfer
    // manages itself, which libcurl accepts unconditionally.
    let rc = unsafe { curl_easy_setopt(h.raw(), option, value) };
    debug_assert_eq!(rc, CURLE_OK, "internal option {option} refused");
}

// ─── Introspection ───────────────────────────────────────────────────────────

/// Shape of value an introspection key yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfoCategory {
    String,
    Integer,
    Double,
    LargeInteger,
    Pointer,
    List,
    CertificateChain,
    TlsSessionInfo,
    Socket,
}

impl fmt::Display for InfoCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

macro_rules! infos {
    ($( $name:ident = $raw:expr => $cat:ident, )*) => {
        /// Introspection keys understood by [`Introspect::get_info`](crate::Introspect::get_info).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum InfoKey {
            $( $name, )*
        }

        impl InfoKey {
            pub const ALL: &'static [InfoKey] = &[ $( InfoKey::$name, )* ];

            pub fn raw(self) -> CURLINFO {
                match self {
                    $( InfoKey::$name => $raw, )*
                }
            }

            pub fn category(self) -> InfoCategory {
                match self {
                    $( InfoKey::$name => InfoCategory::$cat, )*
                }
            }
        }
    };
}

infos! {
    EffectiveUrl = CURLINFO_EFFECTIVE_URL => String,
    ContentType = CURLINFO_CONTENT_TYPE => String,
    PrimaryIp = CURLINFO_PRIMARY_IP => String,
    LocalIp = CURLINFO_LOCAL_IP => String,
    RedirectUrl = CURLINFO_REDIRECT_URL => String,
    Scheme = sys::CURLINFO_SCHEME => String,
    EffectiveMethod = sys::CURLINFO_EFFECTIVE_METHOD => String,

    ResponseCode = CURLINFO_RESPONSE_CODE => Integer,
    HttpConnectCode = CURLINFO_HTTP_CONNECTCODE => Integer,
    HeaderSize = CURLINFO_HEADER_SIZE => Integer,
    RequestSize = CURLINFO_REQUEST_SIZE => Integer,
    RedirectCount = CURLINFO_REDIRECT_COUNT => Integer,
    PrimaryPort = CURLINFO_PRIMARY_PORT => Integer,
    LocalPort = CURLINFO_LOCAL_PORT => Integer,
    NumConnects = CURLINFO_NUM_CONNECTS => Integer,
    OsErrno = CURLINFO_OS_ERRNO => Integer,
    HttpVersion = sys::CURLINFO_HTTP_VERSION => Integer,

    TotalTime = CURLINFO_TOTAL_TIME => Double,
    NameLookupTime = CURLINFO_NAMELOOKUP_TIME => Double,
    ConnectTime = CURLINFO_CONNECT_TIME => Double,
    AppConnectTime = CURLINFO_APPCONNECT_TIME => Double,
    PreTransferTime = CURLINFO_PRETRANSFER_TIME => Double,
    StartTransferTime = CURLINFO_STARTTRANSFER_TIME => Double,
    RedirectTime = CURLINFO_REDIRECT_TIME => Double,

    SizeDownload = sys::CURLINFO_SIZE_DOWNLOAD_T => LargeInteger,
    SizeUpload = sys::CURLINFO_SIZE_UPLOAD_T => LargeInteger,
    SpeedDownload = sys::CURLINFO_SPEED_DOWNLOAD_T => LargeInteger,
    SpeedUpload = sys::CURLINFO_SPEED_UPLOAD_T => LargeInteger,
    ContentLengthDownload = sys::CURLINFO_CONTENT_LENGTH_DOWNLOAD_T => LargeInteger,
    ContentLengthUpload = sys::CURLINFO_CONTENT_LENGTH_UPLOAD_T => LargeInteger,
    TotalTimeUs = sys::CURLINFO_TOTAL_TIME_T => LargeInteger,
    FileTime = sys::CURLINFO_FILETIME_T => LargeInteger,

    Private = CURLINFO_PRIVATE => Pointer,

    SslEngines = CURLINFO_SSL_ENGINES => List,
    CookieList = CURLINFO_COOKIELIST => List,

    CertInfo = CURLINFO_CERTINFO => CertificateChain,
    TlsSslPtr = sys::CURLINFO_TLS_SSL_PTR => TlsSessionInfo,
    ActiveSocket = sys::CURLINFO_ACTIVESOCKET => Socket,
}

/// One certificate per entry, each a list of `name:value` fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateChain {
    pub certificates: Vec<Vec<String>>,
}

/// TLS backend identifier plus the backend's internal session pointer.
/// The pointer belongs to the engine and is valid only while the connection is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsSessionInfo {
    pub backend: i32,
    pub internals: usize,
}

#[derive(Debug)]
pub enum InfoValue {
    String(Option<String>),
    Integer(i64),
    Double(f64),
    LargeInteger(i64),
    Pointer(usize),
    List(List),
    CertificateChain(CertificateChain),
    TlsSessionInfo(Option<TlsSessionInfo>),
    Socket(Option<Socket>),
}

impl InfoValue {
    pub fn category(&self) -> InfoCategory {
        match self {
            InfoValue::String(_) => InfoCategory::String,
            InfoValue::Integer(_) => InfoCategory::Integer,
            InfoValue::Double(_) => InfoCategory::Double,
            InfoValue::LargeInteger(_) => InfoCategory::LargeInteger,
            InfoValue::Pointer(_) => InfoCategory::Pointer,
            InfoValue::List(_) => InfoCategory::List,
            InfoValue::CertificateChain(_) => InfoCategory::CertificateChain,
            InfoValue::TlsSessionInfo(_) => InfoCategory::TlsSessionInfo,
            InfoValue::Socket(_) => InfoCategory::Socket,
        }
    }
}

fn info_rejected(key: InfoKey, code: CURLcode) -> ConfigError {
    // SAFETY: static string for every code.
    let message = unsafe { CStr::from_ptr(curl_easy_strerror(code)) }
        .to_string_lossy()
        .into_owned();
    ConfigError::InfoRejected {
        key,
        code: u32::from(code),
        message,
    }
}

/// Fetch `key`, allocating only the storage its declared category needs.
pub(crate) fn read_info(h: &impl Access<Easy>, key: InfoKey) -> Result<InfoValue, ConfigError> {
    let raw = h.raw();
    let info = key.raw();
    // SAFETY: each arm passes a pointer to exactly the C type libcurl writes
    // for that category, on a live handle.
    unsafe {
        match key.category() {
            InfoCategory::String => {
                let mut p: *const c_char = std::ptr::null();
                getinfo(key, curl_easy_getinfo(raw, info, &mut p))?;
                let value = (!p.is_null()).then(|| CStr::from_ptr(p).to_string_lossy().into_owned());
                Ok(InfoValue::String(value))
            }
            InfoCategory::Integer => {
                let mut v: c_long = 0;
                getinfo(key, curl_easy_getinfo(raw, info, &mut v))?;
                Ok(InfoValue::Integer(i64::from(v)))
            }
            InfoCategory::Double => {
                let mut v: c_double = 0.0;
                getinfo(key, curl_easy_getinfo(raw, info, &mut v))?;
                Ok(InfoValue::Double(v))
            }
            InfoCategory::LargeInteger => {
                let mut v: curl_off_t = 0;
                getinfo(key, curl_easy_getinfo(raw, info, &mut v))?;
                Ok(InfoValue::LargeInteger(v))
            }
            InfoCategory::Pointer => {
                let mut p: *mut c_void = std::ptr::null_mut();
                getinfo(key, curl_easy_getinfo(raw, info, &mut p))?;
                Ok(InfoValue::Pointer(p as usize))
            }
            InfoCategory::List => {
                let mut p: *mut curl_slist = std::ptr::null_mut();
                getinfo(key, curl_easy_getinfo(raw, info, &mut p))?;
                // The caller owns lists returned by getinfo.
                Ok(InfoValue::List(List::from_raw(p)))
            }
            InfoCategory::CertificateChain => {
                let mut p: *mut curl_certinfo = std::ptr::null_mut();
                getinfo(key, curl_easy_getinfo(raw, info, &mut p))?;
                Ok(InfoValue::CertificateChain(certificate_chain(p)))
            }
            InfoCategory::TlsSessionInfo => {
                let mut p: *mut sys::curl_tlssessioninfo = std::ptr::null_mut();
                getinfo(key, curl_easy_getinfo(raw, info, &mut p))?;
                let value = p.as_ref().map(|s| TlsSessionInfo {
                    backend: s.backend,
                    internals: s.internals as usize,
                });
                Ok(InfoValue::TlsSessionInfo(value))
            }
            InfoCategory::Socket => {
                let mut s: curl_socket_t = CURL_SOCKET_BAD;
                getinfo(key, curl_easy_getinfo(raw, info, &mut s))?;
                Ok(InfoValue::Socket((s != CURL_SOCKET_BAD).then_some(s)))
            }
        }
    }
}

fn getinfo(key: InfoKey, code: CURLcode) -> Result<(), ConfigError> {
    if code == CURLE_OK {
        Ok(())
    } else {
        Err(info_rejected(key, code))
    }
}

/// Copy a `curl_certinfo` into owned memory. The source belongs to the engine.
unsafe fn certificate_chain(p: *mut curl_certinfo) -> CertificateChain {
    let mut chain = CertificateChain::default();
    let Some(info) = p.as_ref() else {
        return chain;
    };
    let count = usize::try_from(info.num_of_certs).unwrap_or(0);
    for i in 0..count {
        let mut fields = Vec::new();
        let mut node = *info.certinfo.add(i);
        while let Some(n) = node.as_ref() {
            if !n.data.is_null() {
                fields.push(CStr::from_ptr(n.data).to_string_lossy().into_owned());
            }
            node = n.next;
        }
        chain.certificates.push(fields);
    }
    chain
}

/// Narrow a requested category to the key's declared one.
pub(crate) fn expect_category(key: InfoKey, wanted: InfoCategory) -> Result<(), ConfigError> {
    let expected = key.category();
    if expected == wanted {
        Ok(())
    } else {
        Err(ConfigError::InfoCategory {
            key,
            expected,
            found: wanted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample(category: Category) -> Value {
        match category {
            Category::Flag => Value::Flag(true),
            Category::Integer => Value::Integer(1),
            Category::LargeInteger => Value::LargeInteger(1),
            Category::String => Value::String("x".into()),
            Category::Object(ObjectKind::List) => Value::List(List::new()),
            Category::Object(ObjectKind::Share) => Value::Share(Arc::new(Share::new().unwrap())),
            Category::Object(ObjectKind::Mime) => Value::Mime(MimeBuilder::new()),
            Category::Object(ObjectKind::Opaque) => Value::Opaque(1),
            Category::Callback(CallbackKind::Write) => {
                Value::Callback(Callback::Write(Box::new(Vec::new())))
            }
            Category::Callback(CallbackKind::Read) => Value::Callback(Callback::Read(Box::new(
                std::io::Cursor::new(Vec::<u8>::new()),
            ))),
            Category::Callback(CallbackKind::Header) => {
                Value::Callback(Callback::Header(Box::new(Vec::new())))
            }
            Category::Callback(CallbackKind::Progress) => {
                Value::Callback(Callback::Progress(Box::new(|_| true)))
            }
            Category::Callback(CallbackKind::Debug) => {
                Value::Callback(Callback::Debug(Box::new(|_, _| {})))
            }
        }
    }

    #[test]
    fn test_every_key_accepts_its_own_category() {
        for &key in Opt::ALL {
            assert!(check(key, &sample(key.category())).is_ok(), "{key:?}");
        }
    }

    #[test]
    fn test_mismatch_reports_both_categories() {
        let err = check(Opt::Url, &Value::Integer(3)).unwrap_err();
        match err {
            ConfigError::CategoryMismatch {
                key,
                expected,
                found,
            } => {
                assert_eq!(key, Opt::Url);
                assert_eq!(expected, Category::String);
                assert_eq!(found, Category::Integer);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_callback_kinds_do_not_mix() {
        let value = Value::Callback(Callback::Header(Box::new(Vec::new())));
        assert!(check(Opt::WriteFunction, &value).is_err());
        assert!(check(Opt::HeaderFunction, &value).is_ok());
    }

    #[test]
    fn test_option_categories_follow_numbering() {
        // Option numbers are offset by 10000 per argument type.
        for &key in Opt::ALL {
            let band = key.raw() / 10000;
            let expected = match key.category() {
                Category::Flag | Category::Integer => 0,
                Category::String | Category::Object(_) => 1,
                Category::Callback(_) => 2,
                Category::LargeInteger => 3,
            };
            assert_eq!(band, expected, "{key:?}");
        }
    }

    #[test]
    fn test_info_categories_follow_typemask() {
        // The engine encodes the result type in the high bits of each key.
        for &key in InfoKey::ALL {
            let base = key.raw() & CURLINFO_TYPEMASK;
            let expected = match key.category() {
                InfoCategory::String => CURLINFO_STRING,
                InfoCategory::Integer => CURLINFO_LONG,
                InfoCategory::Double => CURLINFO_DOUBLE,
                InfoCategory::LargeInteger => sys::CURLINFO_OFF_T,
                InfoCategory::List | InfoCategory::CertificateChain => CURLINFO_SLIST,
                InfoCategory::TlsSessionInfo => sys::CURLINFO_PTR,
                InfoCategory::Socket => sys::CURLINFO_SOCKET,
                // The private slot is declared as a string-typed key.
                InfoCategory::Pointer => CURLINFO_STRING,
            };
            assert_eq!(base, expected, "{key:?}");
        }
    }

    #[test]
    fn test_expect_category() {
        assert!(expect_category(InfoKey::ResponseCode, InfoCategory::Integer).is_ok());
        assert!(matches!(
            expect_category(InfoKey::ResponseCode, InfoCategory::String),
            Err(ConfigError::InfoCategory { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_check_succeeds_iff_categories_match(
            key_idx in 0..Opt::ALL.len(),
            value_idx in 0..Opt::ALL.len(),
        ) {
            let key = Opt::ALL[key_idx];
            let value = sample(Opt::ALL[value_idx].category());
            let ok = check(key, &value).is_ok();
            prop_assert_eq!(ok, key.category() == value.category());
        }
    }
}
