//! A single configured network operation.
//!
//! A [`Transfer`] owns one native handle plus everything the handle points
//! at: header lists, the multipart body, the shared-state attachment and the
//! Rust-side sources, sinks and callbacks. The handle is declared first so it
//! is released before anything it references.
//!
//! Callbacks reach Rust through fixed trampolines whose user-data pointer is
//! a boxed [`Inner`]; the box address never changes, so moving the
//! `Transfer` (into a [`TransferSet`](crate::TransferSet), across threads)
//! is safe.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_void, CString};
use std::fmt;
use std::io::SeekFrom;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::Arc;

use curl_sys::*;
use libc::{c_long, size_t};
use tracing::{debug, trace, warn};

use crate::body::{BodySink, BodySource};
use crate::engine::Socket;
use crate::error::{check_code, ConfigError, Error, InitError, TransferError};
use crate::handle::{Access, Borrowed, Easy, Mime, Owned};
use crate::list::List;
use crate::mime::MimeBuilder;
use crate::registry::{
    self, expect_category, read_info, set_long, set_off_t, set_ptr, set_raw_ptr, Callback,
    CallbackKind, Category, CertificateChain, InfoCategory, InfoKey, InfoValue, ObjectKind, Opt,
    TlsSessionInfo, Value,
};
use crate::share::Share;
use crate::sys;

/// Lifecycle of a transfer, as seen by its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Created,
    Configured,
    Executing,
    Completed(Result<(), TransferError>),
}

/// Byte counters passed to a progress callback. Totals are 0 while unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub download_total: u64,
    pub downloaded: u64,
    pub upload_total: u64,
    pub uploaded: u64,
}

/// What a verbose-output chunk carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugKind {
    Text,
    HeaderIn,
    HeaderOut,
    DataIn,
    DataOut,
    SslDataIn,
    SslDataOut,
}

impl DebugKind {
    fn from_raw(kind: curl_infotype) -> Option<Self> {
        Some(match kind {
            CURLINFO_TEXT => DebugKind::Text,
            CURLINFO_HEADER_IN => DebugKind::HeaderIn,
            CURLINFO_HEADER_OUT => DebugKind::HeaderOut,
            CURLINFO_DATA_IN => DebugKind::DataIn,
            CURLINFO_DATA_OUT => DebugKind::DataOut,
            CURLINFO_SSL_DATA_IN => DebugKind::SslDataIn,
            CURLINFO_SSL_DATA_OUT => DebugKind::SslDataOut,
            _ => return None,
        })
    }
}

/// Direction(s) to pause or resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pause {
    Recv,
    Send,
    All,
    Continue,
}

impl Pause {
    fn bits(self) -> c_int {
        match self {
            Pause::Recv => CURLPAUSE_RECV,
            Pause::Send => CURLPAUSE_SEND,
            Pause::All => CURLPAUSE_RECV | CURLPAUSE_SEND,
            Pause::Continue => CURLPAUSE_RECV_CONT | CURLPAUSE_SEND_CONT,
        }
    }
}

// ─── Callback state ──────────────────────────────────────────────────────────

enum SinkSlot {
    Empty,
    Owned(Box<dyn BodySink>),
    /// Borrowed for the duration of one `execute_into` call only.
    Scoped(NonNull<dyn BodySink>),
}

type ProgressFn = Box<dyn FnMut(Progress) -> bool + Send>;
type DebugFn = Box<dyn FnMut(DebugKind, &[u8]) + Send>;

/// Everything the trampolines can reach. Only ever touched through `&Inner`
/// from native callbacks, or through `&mut` while no native call is running.
struct Inner {
    sink: RefCell<SinkSlot>,
    header_sink: RefCell<Option<Box<dyn BodySink>>>,
    source: RefCell<Option<Box<dyn BodySource>>>,
    progress: RefCell<Option<ProgressFn>>,
    debug: RefCell<Option<DebugFn>>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            sink: RefCell::new(SinkSlot::Empty),
            header_sink: RefCell::new(None),
            source: RefCell::new(None),
            progress: RefCell::new(None),
            debug: RefCell::new(None),
        }
    }
}

// ─── Transfer ────────────────────────────────────────────────────────────────

pub struct Transfer {
    handle: Owned<Easy>,
    inner: Box<Inner>,
    lists: HashMap<Opt, List>,
    share: Option<Arc<Share>>,
    mime: Option<Owned<Mime>>,
    phase: Phase,
}

// SAFETY: a transfer handle may move between threads as long as only one
// thread uses it at a time, which `&mut self` on every driving call ensures.
// Everything else owned here is Send.
unsafe impl Send for Transfer {}

impl Transfer {
    pub fn new() -> Result<Self, InitError> {
        // SAFETY: plain constructor; null means allocation failure.
        let raw = unsafe { curl_easy_init() };
        // SAFETY: fresh handle, owned by nobody else.
        let handle = unsafe { Owned::from_raw(raw) }.ok_or(InitError::Allocation("transfer"))?;
        let transfer = Self::adopt(handle);
        // Signals are unusable from a multi-threaded host.
        let _ = set_long(&transfer.handle, Opt::NoSignal, 1);
        Ok(transfer)
    }

    /// A transfer aimed at `url`. `max_redirects` < 0 follows without limit,
    /// 0 does not follow at all.
    pub fn with_url(url: &str, max_redirects: i64) -> Result<Self, Error> {
        let mut transfer = Self::new()?;
        transfer.url(url)?;
        transfer.max_redirects(max_redirects)?;
        Ok(transfer)
    }

    fn adopt(handle: Owned<Easy>) -> Self {
        let transfer = Self {
            handle,
            inner: Box::default(),
            lists: HashMap::new(),
            share: None,
            mime: None,
            phase: Phase::Created,
        };
        transfer.install_trampolines();
        transfer
    }

    /// Point every data slot at this transfer's `Inner`. Needed after
    /// construction, duplication and reset.
    fn install_trampolines(&self) {
        let h = &self.handle;
        let data = std::ptr::addr_of!(*self.inner).cast::<c_void>();
        set_raw_ptr(h, CURLOPT_WRITEFUNCTION, write_cb as *const c_void);
        set_raw_ptr(h, CURLOPT_WRITEDATA, data);
        set_raw_ptr(h, CURLOPT_READFUNCTION, read_cb as *const c_void);
        set_raw_ptr(h, CURLOPT_READDATA, data);
        set_raw_ptr(h, CURLOPT_SEEKFUNCTION, seek_cb as *const c_void);
        set_raw_ptr(h, CURLOPT_SEEKDATA, data);
        set_raw_ptr(h, CURLOPT_HEADERFUNCTION, header_cb as *const c_void);
        set_raw_ptr(h, CURLOPT_HEADERDATA, data);
        // Shared by the legacy and the xferinfo progress callbacks.
        set_raw_ptr(h, CURLOPT_PROGRESSDATA, data);
        set_raw_ptr(h, CURLOPT_DEBUGDATA, data);
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    fn touch(&mut self) {
        if self.phase == Phase::Created {
            self.phase = Phase::Configured;
        }
    }

    pub(crate) fn mark_executing(&mut self) {
        self.phase = Phase::Executing;
    }

    pub(crate) fn mark_completed(&mut self, result: Result<(), TransferError>) {
        self.phase = Phase::Completed(result);
    }

    /// Back to Configured after being pulled out of an engine mid-flight.
    pub(crate) fn mark_cancelled(&mut self) {
        self.phase = Phase::Configured;
    }

    pub(crate) fn raw(&self) -> *mut CURL {
        self.handle.raw()
    }

    /// Read-only view sharing this transfer's handle.
    pub fn view(&self) -> TransferRef<'_> {
        TransferRef {
            handle: self.handle.borrow(),
        }
    }

    // ─── Registry ────────────────────────────────────────────────────────────

    /// Apply `value` to `key`. Fails before touching the engine if the value's
    /// category differs from the key's.
    ///
    /// Strings are copied. Lists, shares and multipart bodies are kept alive by
    /// the transfer until replaced, cleared or dropped. Changing configuration
    /// while the transfer is running in a [`TransferSet`](crate::TransferSet)
    /// is discouraged; in-flight I/O may or may not observe it.
    pub fn set(&mut self, key: Opt, value: impl Into<Value>) -> Result<(), ConfigError> {
        let value = value.into();
        registry::check(key, &value)?;
        match value {
            Value::Flag(v) => set_long(&self.handle, key, c_long::from(v))?,
            Value::Integer(v) => {
                let v = c_long::try_from(v).map_err(|_| ConfigError::OutOfRange { key })?;
                set_long(&self.handle, key, v)?;
            }
            Value::LargeInteger(v) => set_off_t(&self.handle, key, v)?,
            Value::String(s) => self.set_string(key, s)?,
            Value::List(list) => self.attach_list(key, list)?,
            Value::Share(share) => {
                set_ptr(&self.handle, key, share.raw().cast_const().cast())?;
                self.share = Some(share);
            }
            Value::Mime(builder) => self.attach_mime(builder)?,
            Value::Opaque(v) => set_ptr(&self.handle, key, v as *const c_void)?,
            Value::Callback(cb) => self.attach_callback(cb)?,
        }
        debug!(?key, "option applied");
        self.touch();
        Ok(())
    }

    /// Reset `key` to its category's zero value: 0, null, or no attachment.
    pub fn clear(&mut self, key: Opt) -> Result<(), ConfigError> {
        let null = std::ptr::null();
        match key.category() {
            Category::Flag | Category::Integer => set_long(&self.handle, key, 0)?,
            Category::LargeInteger => set_off_t(&self.handle, key, 0)?,
            Category::String | Category::Object(ObjectKind::Opaque) => {
                set_ptr(&self.handle, key, null)?;
            }
            Category::Object(ObjectKind::List) => {
                set_ptr(&self.handle, key, null)?;
                self.lists.remove(&key);
            }
            Category::Object(ObjectKind::Share) => {
                set_ptr(&self.handle, key, null)?;
                self.share = None;
            }
            Category::Object(ObjectKind::Mime) => {
                set_ptr(&self.handle, key, null)?;
                self.mime = None;
            }
            Category::Callback(kind) => self.detach_callback(kind)?,
        }
        debug!(?key, "option cleared");
        Ok(())
    }

    fn set_string(&mut self, key: Opt, s: String) -> Result<(), ConfigError> {
        let c = CString::new(s).map_err(|_| ConfigError::InteriorNul { key })?;
        if key == Opt::CopyPostFields {
            // Copy up to the terminator rather than a stale explicit size.
            set_off_t(&self.handle, Opt::PostFieldSizeLarge, -1)?;
        }
        set_ptr(&self.handle, key, c.as_ptr().cast())
    }

    fn attach_list(&mut self, key: Opt, list: List) -> Result<(), ConfigError> {
        set_ptr(&self.handle, key, list.as_ptr().cast_const().cast())?;
        // The previous list, if any, is freed only now that nothing points at it.
        if list.is_empty() {
            self.lists.remove(&key);
        } else {
            self.lists.insert(key, list);
        }
        Ok(())
    }

    fn attach_mime(&mut self, builder: MimeBuilder) -> Result<(), ConfigError> {
        let mime = builder.build(&self.handle)?;
        set_ptr(&self.handle, Opt::MimePost, mime.raw().cast_const().cast())?;
        self.mime = Some(mime);
        Ok(())
    }

    fn attach_callback(&mut self, cb: Callback) -> Result<(), ConfigError> {
        let inner = &mut *self.inner;
        match cb {
            Callback::Write(sink) => *inner.sink.get_mut() = SinkSlot::Owned(sink),
            Callback::Read(source) => *inner.source.get_mut() = Some(source),
            Callback::Header(sink) => *inner.header_sink.get_mut() = Some(sink),
            Callback::Progress(f) => {
                *inner.progress.get_mut() = Some(f);
                set_ptr(
                    &self.handle,
                    Opt::XferInfoFunction,
                    xferinfo_cb as *const c_void,
                )?;
                set_long(&self.handle, Opt::NoProgress, 0)?;
            }
            Callback::Debug(f) => {
                *inner.debug.get_mut() = Some(f);
                set_ptr(&self.handle, Opt::DebugFunction, debug_cb as *const c_void)?;
            }
        }
        Ok(())
    }

    fn detach_callback(&mut self, kind: CallbackKind) -> Result<(), ConfigError> {
        let inner = &mut *self.inner;
        match kind {
            CallbackKind::Write => *inner.sink.get_mut() = SinkSlot::Empty,
            CallbackKind::Read => *inner.source.get_mut() = None,
            CallbackKind::Header => *inner.header_sink.get_mut() = None,
            CallbackKind::Progress => {
                set_long(&self.handle, Opt::NoProgress, 1)?;
                *inner.progress.get_mut() = None;
            }
            // The trampoline stays installed and falls back to tracing.
            CallbackKind::Debug => *inner.debug.get_mut() = None,
        }
        Ok(())
    }

    // ─── Convenience setters ─────────────────────────────────────────────────

    pub fn url(&mut self, url: &str) -> Result<(), ConfigError> {
        self.set(Opt::Url, url)
    }

    /// Negative follows redirects without limit; 0 disables following.
    pub fn max_redirects(&mut self, max: i64) -> Result<(), ConfigError> {
        if max == 0 {
            return self.set(Opt::FollowLocation, false);
        }
        self.set(Opt::FollowLocation, true)?;
        self.set(Opt::MaxRedirs, Value::Integer(max.max(-1)))
    }

    /// Request headers for the server only; proxies get [`proxy_headers`](Self::proxy_headers).
    pub fn headers(&mut self, list: List) -> Result<(), ConfigError> {
        self.set(Opt::HeaderOpt, Value::Integer(i64::from(sys::CURLHEADER_SEPARATE)))?;
        self.set(Opt::HttpHeader, list)
    }

    pub fn proxy_headers(&mut self, list: List) -> Result<(), ConfigError> {
        self.set(Opt::HeaderOpt, Value::Integer(i64::from(sys::CURLHEADER_SEPARATE)))?;
        self.set(Opt::ProxyHeader, list)
    }

    pub fn resolve(&mut self, list: List) -> Result<(), ConfigError> {
        self.set(Opt::Resolve, list)
    }

    pub fn mail_rcpt(&mut self, list: List) -> Result<(), ConfigError> {
        self.set(Opt::MailRcpt, list)
    }

    /// Copy `data` as the POST body. The size is applied first; if the data
    /// itself is refused the size is reset so the two never disagree.
    pub fn post_fields(&mut self, data: &[u8]) -> Result<(), ConfigError> {
        let len = curl_off_t::try_from(data.len()).map_err(|_| ConfigError::OutOfRange {
            key: Opt::PostFieldSizeLarge,
        })?;
        set_off_t(&self.handle, Opt::PostFieldSizeLarge, len)?;
        if let Err(e) = set_ptr(&self.handle, Opt::CopyPostFields, data.as_ptr().cast()) {
            let _ = set_off_t(&self.handle, Opt::PostFieldSizeLarge, -1);
            return Err(e);
        }
        self.touch();
        Ok(())
    }

    pub fn share(&mut self, share: Arc<Share>) -> Result<(), ConfigError> {
        self.set(Opt::Share, Value::Share(share))
    }

    /// Attach a multipart body. The builder is consumed.
    ///
    /// ```compile_fail
    /// # use sluice::{MimeBuilder, Transfer};
    /// let mut a = Transfer::new().unwrap();
    /// let mut b = Transfer::new().unwrap();
    /// let mut form = MimeBuilder::new();
    /// form.field("k", "v");
    /// a.mime(form).unwrap();
    /// b.mime(form).unwrap(); // builder already moved into `a`
    /// ```
    pub fn mime(&mut self, builder: MimeBuilder) -> Result<(), ConfigError> {
        self.set(Opt::MimePost, Value::Mime(builder))
    }

    /// Opaque value for correlating completions; never interpreted.
    pub fn set_private(&mut self, value: usize) -> Result<(), ConfigError> {
        self.set(Opt::Private, Value::Opaque(value))
    }

    /// Attach a request body, replacing any copied with [`post_fields`](Self::post_fields).
    /// A seekable source has its length measured once and applied as both the
    /// upload and the POST size before the source itself is attached, so a
    /// size left over from an earlier body never reaches the engine.
    pub fn set_body(&mut self, source: impl BodySource + 'static) -> Result<(), ConfigError> {
        self.attach_body(Box::new(source))
    }

    /// POST the contents of `source`: size first, then the method, then the
    /// body. An unmeasurable source is sent chunked.
    pub fn post_body(&mut self, source: impl BodySource + 'static) -> Result<(), ConfigError> {
        let mut source: Box<dyn BodySource> = Box::new(source);
        let size = measure(source.as_mut());
        self.clear(Opt::CopyPostFields)?;
        set_off_t(&self.handle, Opt::PostFieldSizeLarge, size)?;
        set_long(&self.handle, Opt::Post, 1)?;
        *self.inner.source.get_mut() = Some(source);
        debug!(size, "post body attached");
        self.touch();
        Ok(())
    }

    fn attach_body(&mut self, mut source: Box<dyn BodySource>) -> Result<(), ConfigError> {
        let size = measure(source.as_mut());
        self.clear(Opt::CopyPostFields)?;
        set_off_t(&self.handle, Opt::InFileSizeLarge, size)?;
        set_off_t(&self.handle, Opt::PostFieldSizeLarge, size)?;
        *self.inner.source.get_mut() = Some(source);
        self.touch();
        Ok(())
    }

    /// Drop the request body, whether attached as a source or copied with
    /// [`post_fields`](Self::post_fields). Both sizes go back to unknown.
    pub fn clear_body(&mut self) -> Result<(), ConfigError> {
        self.clear(Opt::ReadFunction)?;
        self.clear(Opt::CopyPostFields)?;
        set_off_t(&self.handle, Opt::InFileSizeLarge, -1)?;
        set_off_t(&self.handle, Opt::PostFieldSizeLarge, -1)
    }

    /// Attach a response sink, replacing any previous one.
    pub fn set_response(&mut self, sink: impl BodySink + 'static) {
        *self.inner.sink.get_mut() = SinkSlot::Owned(Box::new(sink));
        self.touch();
    }

    /// Detach the response sink. Later body bytes are discarded.
    pub fn clear_response(&mut self) {
        *self.inner.sink.get_mut() = SinkSlot::Empty;
    }

    pub fn header_sink(&mut self, sink: impl BodySink + 'static) {
        *self.inner.header_sink.get_mut() = Some(Box::new(sink));
        self.touch();
    }

    /// Progress callback; returning `false` aborts the transfer.
    pub fn progress<F>(&mut self, f: F) -> Result<(), ConfigError>
    where
        F: FnMut(Progress) -> bool + Send + 'static,
    {
        self.set(
            Opt::XferInfoFunction,
            Value::Callback(Callback::Progress(Box::new(f))),
        )
    }

    /// Receive verbose output. Only called while [`Opt::Verbose`] is on.
    pub fn debug<F>(&mut self, f: F) -> Result<(), ConfigError>
    where
        F: FnMut(DebugKind, &[u8]) + Send + 'static,
    {
        self.set(
            Opt::DebugFunction,
            Value::Callback(Callback::Debug(Box::new(f))),
        )
    }

    /// Route verbose engine output to `tracing` (target `sluice::wire`).
    pub fn verbose_to_tracing(&mut self, enabled: bool) -> Result<(), ConfigError> {
        if enabled {
            *self.inner.debug.get_mut() = None;
            set_ptr(&self.handle, Opt::DebugFunction, debug_cb as *const c_void)?;
        }
        self.set(Opt::Verbose, enabled)
    }

    // ─── Execution ───────────────────────────────────────────────────────────

    fn perform(&mut self) -> Result<(), TransferError> {
        self.mark_executing();
        // SAFETY: live handle; trampolines and their data were installed at
        // construction and every attached object is owned by self.
        let result = check_code(unsafe { curl_easy_perform(self.handle.raw()) });
        *self.inner.sink.get_mut() = SinkSlot::Empty;
        self.mark_completed(result.clone());
        match &result {
            Ok(()) => debug!("transfer completed"),
            Err(e) => debug!(code = e.code, error = %e.message, "transfer failed"),
        }
        result
    }

    /// Run to completion on this thread. The response sink is always detached
    /// afterward, whatever the outcome.
    pub fn execute(&mut self) -> Result<(), TransferError> {
        self.perform()
    }

    /// Run to completion, delivering the body into `sink`. The sink is
    /// detached before this returns and is not replaced by any earlier one.
    pub fn execute_into(&mut self, sink: &mut dyn BodySink) -> Result<(), TransferError> {
        let scoped: NonNull<dyn BodySink + '_> = NonNull::from(sink);
        // SAFETY: perform() resets the slot to Empty before returning and no
        // callback can unwind past it, so the erased lifetime never escapes
        // this call.
        let scoped: NonNull<dyn BodySink> = unsafe { std::mem::transmute(scoped) };
        *self.inner.sink.get_mut() = SinkSlot::Scoped(scoped);
        self.perform()
    }

    // ─── Copy / reset ────────────────────────────────────────────────────────

    /// Copy the configuration into a fresh transfer. Lists are deep-copied,
    /// the share is shared, the multipart body is copied by the engine.
    /// Sources, sinks and callbacks are not carried over.
    pub fn duplicate(&self) -> Result<Transfer, Error> {
        // SAFETY: live handle; returns an independent handle or null.
        let raw = unsafe { curl_easy_duphandle(self.handle.raw()) };
        // SAFETY: fresh handle, owned by nobody else.
        let handle = unsafe { Owned::from_raw(raw) }.ok_or(InitError::Allocation("transfer"))?;
        let mut copy = Self::adopt(handle);
        for (&key, list) in &self.lists {
            copy.attach_list(key, list.try_clone()?)?;
        }
        copy.share.clone_from(&self.share);
        if self.inner.progress.borrow().is_some() {
            // The copied trampoline would find no closure; stop calling it.
            set_long(&copy.handle, Opt::NoProgress, 1)?;
        }
        Ok(copy)
    }

    /// Return every option to its default and drop all attachments.
    pub fn reset(&mut self) {
        // SAFETY: live handle; nothing native points at our objects afterward.
        unsafe { curl_easy_reset(self.handle.raw()) };
        self.lists.clear();
        self.share = None;
        self.mime = None;
        *self.inner = Inner::default();
        self.install_trampolines();
        let _ = set_long(&self.handle, Opt::NoSignal, 1);
        self.phase = Phase::Created;
    }

    pub fn pause(&mut self, mode: Pause) -> Result<(), TransferError> {
        // SAFETY: live handle.
        check_code(unsafe { curl_easy_pause(self.handle.raw(), mode.bits()) })
    }

    /// Read raw bytes from a connect-only transfer. `CURLE_AGAIN` means
    /// nothing is available yet (see [`TransferError::is_again`]).
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransferError> {
        let mut n: size_t = 0;
        // SAFETY: buf is valid for buf.len() bytes; n receives the count.
        let rc = unsafe {
            curl_easy_recv(
                self.handle.raw(),
                buf.as_mut_ptr().cast(),
                buf.len(),
                &mut n,
            )
        };
        check_code(rc).map(|()| n)
    }

    pub fn send(&mut self, data: &[u8]) -> Result<usize, TransferError> {
        let mut n: size_t = 0;
        // SAFETY: data is valid for data.len() bytes; n receives the count.
        let rc = unsafe {
            curl_easy_send(self.handle.raw(), data.as_ptr().cast(), data.len(), &mut n)
        };
        check_code(rc).map(|()| n)
    }

    pub fn escape(&self, input: &[u8]) -> Option<String> {
        crate::global::escape_with(self.handle.raw(), input)
    }

    pub fn unescape(&self, input: &str) -> Option<Vec<u8>> {
        crate::global::unescape_with(self.handle.raw(), input)
    }
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("handle", &self.handle)
            .field("phase", &self.phase)
            .field("lists", &self.lists.keys().collect::<Vec<_>>())
            .field("share", &self.share.is_some())
            .field("mime", &self.mime.is_some())
            .finish()
    }
}

/// Length of `source` as the engine expects it: -1 when unknown.
fn measure(source: &mut dyn BodySource) -> curl_off_t {
    match source.length() {
        Ok(Some(n)) => curl_off_t::try_from(n).unwrap_or(-1),
        Ok(None) => -1,
        Err(e) => {
            debug!(error = %e, "body length unavailable");
            -1
        }
    }
}

// ─── Introspection ───────────────────────────────────────────────────────────

/// Non-owning view of a transfer, handed out inside engine callbacks and by
/// [`Transfer::view`]. Never releases the handle.
#[derive(Debug, Clone, Copy)]
pub struct TransferRef<'a> {
    handle: Borrowed<'a, Easy>,
}

impl TransferRef<'_> {
    /// # Safety
    ///
    /// `raw` must be a live transfer handle for the chosen lifetime.
    pub(crate) unsafe fn from_raw(raw: *mut CURL) -> Option<Self> {
        Borrowed::from_raw(raw).map(|handle| Self { handle })
    }
}

/// Read side of the registry. Valid after at least one execution attempt;
/// values reflect the most recent one.
pub trait Introspect {
    #[doc(hidden)]
    fn easy(&self) -> Borrowed<'_, Easy>;

    fn get_info(&self, key: InfoKey) -> Result<InfoValue, ConfigError> {
        read_info(&self.easy(), key)
    }

    fn info_string(&self, key: InfoKey) -> Result<Option<String>, ConfigError> {
        match typed(self, key, InfoCategory::String)? {
            InfoValue::String(v) => Ok(v),
            other => Err(mismatch(key, &other)),
        }
    }

    fn info_integer(&self, key: InfoKey) -> Result<i64, ConfigError> {
        match typed(self, key, InfoCategory::Integer)? {
            InfoValue::Integer(v) => Ok(v),
            other => Err(mismatch(key, &other)),
        }
    }

    fn info_double(&self, key: InfoKey) -> Result<f64, ConfigError> {
        match typed(self, key, InfoCategory::Double)? {
            InfoValue::Double(v) => Ok(v),
            other => Err(mismatch(key, &other)),
        }
    }

    fn info_large(&self, key: InfoKey) -> Result<i64, ConfigError> {
        match typed(self, key, InfoCategory::LargeInteger)? {
            InfoValue::LargeInteger(v) => Ok(v),
            other => Err(mismatch(key, &other)),
        }
    }

    fn info_list(&self, key: InfoKey) -> Result<List, ConfigError> {
        match typed(self, key, InfoCategory::List)? {
            InfoValue::List(v) => Ok(v),
            other => Err(mismatch(key, &other)),
        }
    }

    /// Last URL used, after redirects.
    fn uri(&self) -> Result<Option<String>, ConfigError> {
        self.info_string(InfoKey::EffectiveUrl)
    }

    fn response_code(&self) -> Result<i64, ConfigError> {
        self.info_integer(InfoKey::ResponseCode)
    }

    fn private(&self) -> Result<usize, ConfigError> {
        match typed(self, InfoKey::Private, InfoCategory::Pointer)? {
            InfoValue::Pointer(v) => Ok(v),
            other => Err(mismatch(InfoKey::Private, &other)),
        }
    }

    /// Only meaningful while the connection is still open.
    fn socket_descriptor(&self) -> Result<Option<Socket>, ConfigError> {
        match typed(self, InfoKey::ActiveSocket, InfoCategory::Socket)? {
            InfoValue::Socket(v) => Ok(v),
            other => Err(mismatch(InfoKey::ActiveSocket, &other)),
        }
    }

    /// Requires [`Opt::CertInfo`] before execution.
    fn certificate_chain(&self) -> Result<CertificateChain, ConfigError> {
        match typed(self, InfoKey::CertInfo, InfoCategory::CertificateChain)? {
            InfoValue::CertificateChain(v) => Ok(v),
            other => Err(mismatch(InfoKey::CertInfo, &other)),
        }
    }

    fn tls_session(&self) -> Result<Option<TlsSessionInfo>, ConfigError> {
        match typed(self, InfoKey::TlsSslPtr, InfoCategory::TlsSessionInfo)? {
            InfoValue::TlsSessionInfo(v) => Ok(v),
            other => Err(mismatch(InfoKey::TlsSslPtr, &other)),
        }
    }
}

fn typed<T: Introspect + ?Sized>(
    target: &T,
    key: InfoKey,
    wanted: InfoCategory,
) -> Result<InfoValue, ConfigError> {
    expect_category(key, wanted)?;
    read_info(&target.easy(), key)
}

fn mismatch(key: InfoKey, value: &InfoValue) -> ConfigError {
    ConfigError::InfoCategory {
        key,
        expected: key.category(),
        found: value.category(),
    }
}

impl Introspect for Transfer {
    fn easy(&self) -> Borrowed<'_, Easy> {
        self.handle.borrow()
    }
}

impl Introspect for TransferRef<'_> {
    fn easy(&self) -> Borrowed<'_, Easy> {
        self.handle
    }
}

// ─── Trampolines ─────────────────────────────────────────────────────────────

/// Run `f`, turning a panic into `fallback` so it never crosses into C.
fn guard<R>(callback: &'static str, fallback: R, f: impl FnOnce() -> R) -> R {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        warn!(callback, "callback panicked; failing the transfer");
        fallback
    })
}

/// # Safety
///
/// `data` must be the `Inner` installed by `install_trampolines`.
unsafe fn inner<'a>(data: *mut c_void) -> &'a Inner {
    &*(data.cast::<Inner>())
}

fn deliver(sink: &mut dyn BodySink, bytes: &[u8]) -> size_t {
    match sink.write(bytes) {
        Ok(n) => n.min(bytes.len()),
        Err(e) => {
            debug!(error = %e, "sink refused data");
            0
        }
    }
}

extern "C" fn write_cb(ptr: *mut c_char, size: size_t, nmemb: size_t, data: *mut c_void) -> size_t {
    let len = size.saturating_mul(nmemb);
    if len == 0 {
        return 0;
    }
    guard("write", 0, || {
        // SAFETY: installed data pointer; ptr holds len bytes for this call.
        let (inner, bytes) = unsafe {
            (
                inner(data),
                std::slice::from_raw_parts(ptr.cast::<u8>(), len),
            )
        };
        let Ok(mut slot) = inner.sink.try_borrow_mut() else {
            return 0;
        };
        match &mut *slot {
            SinkSlot::Empty => len,
            SinkSlot::Owned(sink) => deliver(sink.as_mut(), bytes),
            // SAFETY: only set for the duration of execute_into.
            SinkSlot::Scoped(sink) => deliver(unsafe { sink.as_mut() }, bytes),
        }
    })
}

extern "C" fn header_cb(ptr: *mut c_char, size: size_t, nmemb: size_t, data: *mut c_void) -> size_t {
    let len = size.saturating_mul(nmemb);
    if len == 0 {
        return 0;
    }
    guard("header", 0, || {
        // SAFETY: installed data pointer; ptr holds len bytes for this call.
        let (inner, bytes) = unsafe {
            (
                inner(data),
                std::slice::from_raw_parts(ptr.cast::<u8>(), len),
            )
        };
        let Ok(mut slot) = inner.header_sink.try_borrow_mut() else {
            return 0;
        };
        match slot.as_mut() {
            Some(sink) => deliver(sink.as_mut(), bytes),
            None => len,
        }
    })
}

extern "C" fn read_cb(ptr: *mut c_char, size: size_t, nitems: size_t, data: *mut c_void) -> size_t {
    let len = size.saturating_mul(nitems);
    if len == 0 {
        return 0;
    }
    guard("read", CURL_READFUNC_ABORT, || {
        // SAFETY: installed data pointer; ptr is writable for len bytes.
        let (inner, buf) = unsafe {
            (
                inner(data),
                std::slice::from_raw_parts_mut(ptr.cast::<u8>(), len),
            )
        };
        let Ok(mut slot) = inner.source.try_borrow_mut() else {
            return CURL_READFUNC_ABORT;
        };
        match slot.as_mut() {
            None => 0,
            Some(source) => match source.read(buf) {
                Ok(n) => n.min(len),
                Err(e) => {
                    debug!(error = %e, "body source failed");
                    CURL_READFUNC_ABORT
                }
            },
        }
    })
}

extern "C" fn seek_cb(data: *mut c_void, offset: curl_off_t, origin: c_int) -> c_int {
    guard("seek", CURL_SEEKFUNC_FAIL, || {
        // SAFETY: installed data pointer.
        let inner = unsafe { inner(data) };
        let Ok(mut slot) = inner.source.try_borrow_mut() else {
            return CURL_SEEKFUNC_FAIL;
        };
        let Some(source) = slot.as_mut().filter(|s| s.seekable()) else {
            return CURL_SEEKFUNC_CANTSEEK;
        };
        let pos = match origin {
            libc::SEEK_SET => match u64::try_from(offset) {
                Ok(o) => SeekFrom::Start(o),
                Err(_) => return CURL_SEEKFUNC_FAIL,
            },
            libc::SEEK_CUR => SeekFrom::Current(offset),
            libc::SEEK_END => SeekFrom::End(offset),
            _ => return CURL_SEEKFUNC_FAIL,
        };
        match source.seek(pos) {
            Ok(_) => CURL_SEEKFUNC_OK,
            Err(e) => {
                debug!(error = %e, "body source seek failed");
                CURL_SEEKFUNC_FAIL
            }
        }
    })
}

extern "C" fn xferinfo_cb(
    data: *mut c_void,
    dltotal: curl_off_t,
    dlnow: curl_off_t,
    ultotal: curl_off_t,
    ulnow: curl_off_t,
) -> c_int {
    guard("progress", 1, || {
        // SAFETY: installed data pointer.
        let inner = unsafe { inner(data) };
        let Ok(mut slot) = inner.progress.try_borrow_mut() else {
            return 0;
        };
        let Some(f) = slot.as_mut() else {
            return 0;
        };
        let clamp = |v: curl_off_t| u64::try_from(v).unwrap_or(0);
        let keep_going = f(Progress {
            download_total: clamp(dltotal),
            downloaded: clamp(dlnow),
            upload_total: clamp(ultotal),
            uploaded: clamp(ulnow),
        });
        c_int::from(!keep_going)
    })
}

extern "C" fn debug_cb(
    _handle: *mut CURL,
    kind: curl_infotype,
    ptr: *mut c_char,
    size: size_t,
    data: *mut c_void,
) -> c_int {
    guard("debug", 0, || {
        let Some(kind) = DebugKind::from_raw(kind) else {
            return 0;
        };
        let bytes = if ptr.is_null() || size == 0 {
            &[][..]
        } else {
            // SAFETY: ptr holds size bytes for this call.
            unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), size) }
        };
        // SAFETY: installed data pointer.
        let inner = unsafe { inner(data) };
        if let Ok(mut slot) = inner.debug.try_borrow_mut() {
            if let Some(f) = slot.as_mut() {
                f(kind, bytes);
                return 0;
            }
        }
        match kind {
            DebugKind::Text | DebugKind::HeaderIn | DebugKind::HeaderOut => {
                trace!(target: "sluice::wire", ?kind, "{}", String::from_utf8_lossy(bytes).trim_end());
            }
            _ => trace!(target: "sluice::wire", ?kind, len = bytes.len()),
        }
        0
    })
}

// Keep the callback signatures in lockstep with the engine's typedefs.
const _: curl_write_callback = write_cb;
const _: curl_read_callback = read_cb;
const _: curl_seek_callback = seek_cb;
const _: sys::curl_xferinfo_callback = xferinfo_cb;
const _: curl_debug_callback = debug_cb;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Buffer;

    #[test]
    fn test_new_transfer_is_created() {
        let t = Transfer::new().unwrap();
        assert_eq!(t.phase(), &Phase::Created);
    }

    #[test]
    fn test_set_moves_to_configured() {
        let mut t = Transfer::new().unwrap();
        t.set(Opt::Url, "http://127.0.0.1:1/").unwrap();
        assert_eq!(t.phase(), &Phase::Configured);
    }

    #[test]
    fn test_category_mismatch_never_applies() {
        let mut t = Transfer::new().unwrap();
        let err = t.set(Opt::Timeout, "soon").unwrap_err();
        assert!(matches!(err, ConfigError::CategoryMismatch { .. }));
        assert_eq!(t.phase(), &Phase::Created);
    }

    #[test]
    fn test_interior_nul_string_rejected() {
        let mut t = Transfer::new().unwrap();
        let err = t.set(Opt::UserAgent, "a\0b").unwrap_err();
        assert!(matches!(err, ConfigError::InteriorNul { key: Opt::UserAgent }));
    }

    #[test]
    fn test_private_round_trip() {
        let mut t = Transfer::new().unwrap();
        t.set_private(0xdead).unwrap();
        assert_eq!(t.private().unwrap(), 0xdead);
        assert_eq!(t.view().private().unwrap(), 0xdead);
        t.clear(Opt::Private).unwrap();
        assert_eq!(t.private().unwrap(), 0);
    }

    #[test]
    fn test_info_category_mismatch() {
        let t = Transfer::new().unwrap();
        let err = t.info_double(InfoKey::ResponseCode).unwrap_err();
        assert!(matches!(err, ConfigError::InfoCategory { .. }));
    }

    #[test]
    fn test_lists_kept_alive_and_replaced() {
        let mut t = Transfer::new().unwrap();
        t.headers(List::from_items(["X-One: 1"]).unwrap()).unwrap();
        t.headers(List::from_items(["X-Two: 2"]).unwrap()).unwrap();
        assert_eq!(t.lists.len(), 1);
        assert_eq!(t.lists[&Opt::HttpHeader].len(), 1);
        t.clear(Opt::HttpHeader).unwrap();
        assert!(t.lists.is_empty());
    }

    #[test]
    fn test_set_body_accepts_seekable_and_plain() {
        let mut t = Transfer::new().unwrap();
        t.set_body(std::io::Cursor::new(b"payload".to_vec())).unwrap();
        t.set_body(crate::body::Reader(std::io::empty())).unwrap();
        t.clear_body().unwrap();
        assert!(t.inner.source.borrow().is_none());
    }

    #[test]
    fn test_measure_body_length() {
        assert_eq!(measure(&mut std::io::Cursor::new(b"abc".to_vec())), 3);
        assert_eq!(measure(&mut crate::body::Reader(std::io::empty())), -1);
    }

    #[test]
    fn test_clear_response_detaches() {
        let mut t = Transfer::new().unwrap();
        t.set_response(Buffer::new());
        assert!(matches!(*t.inner.sink.borrow(), SinkSlot::Owned(_)));
        t.clear_response();
        assert!(matches!(*t.inner.sink.borrow(), SinkSlot::Empty));
    }

    #[test]
    fn test_failed_execute_still_clears_sink() {
        let mut t = Transfer::new().unwrap();
        // Port 1 on loopback is closed everywhere we run tests.
        t.url("http://127.0.0.1:1/").unwrap();
        let mut sink = Vec::new();
        let err = t.execute_into(&mut sink).unwrap_err();
        assert!(err.is_couldnt_connect());
        assert!(matches!(*t.inner.sink.borrow(), SinkSlot::Empty));
        assert!(matches!(t.phase(), Phase::Completed(Err(_))));
    }

    #[test]
    fn test_duplicate_copies_lists_independently() {
        let mut t = Transfer::new().unwrap();
        t.resolve(List::from_items(["example.test:80:127.0.0.1"]).unwrap())
            .unwrap();
        t.set_private(7).unwrap();
        let mut copy = t.duplicate().unwrap();
        assert_eq!(copy.phase(), &Phase::Created);
        assert_eq!(copy.private().unwrap(), 7);
        assert_ne!(
            copy.lists[&Opt::Resolve].as_ptr(),
            t.lists[&Opt::Resolve].as_ptr()
        );
        copy.set_private(8).unwrap();
        assert_eq!(t.private().unwrap(), 7);
    }

    #[test]
    fn test_reset_drops_attachments() {
        let mut t = Transfer::new().unwrap();
        t.set_private(3).unwrap();
        t.headers(List::from_items(["A: b"]).unwrap()).unwrap();
        t.set_response(Vec::new());
        t.reset();
        assert_eq!(t.phase(), &Phase::Created);
        assert!(t.lists.is_empty());
        assert_eq!(t.private().unwrap(), 0);
    }

    #[test]
    fn test_escape_round_trip_on_handle() {
        let t = Transfer::new().unwrap();
        let escaped = t.escape(b"a b&c").unwrap();
        assert_eq!(escaped, "a%20b%26c");
        assert_eq!(t.unescape(&escaped).unwrap(), b"a b&c");
    }

    #[test]
    fn test_integer_out_of_range() {
        let mut t = Transfer::new().unwrap();
        if std::mem::size_of::<c_long>() < 8 {
            let err = t.set(Opt::Timeout, Value::Integer(i64::MAX)).unwrap_err();
            assert!(matches!(err, ConfigError::OutOfRange { .. }));
        } else {
            t.set(Opt::Timeout, Value::Integer(30)).unwrap();
        }
    }
}
