//! Transfer set: many transfers multiplexed over one event source.
//!
//! A [`TransferSet`] owns every [`Transfer`] registered with it and drives
//! them from a single thread. It is driven either by an external reactor
//! (forwarding readiness and timer expiry into [`TransferSet::socket_action`])
//! or by the built-in blocking helpers [`perform`](TransferSet::perform),
//! [`poll`](TransferSet::poll) and [`wait`](TransferSet::wait).
//!
//! The engine reports what it wants watched through the socket callback
//! ([`SocketRequest`]) and when it wants to be woken through the timer
//! callback ([`TimerRequest`]). Finished transfers come back, with ownership,
//! through [`drain_completions`](TransferSet::drain_completions). Drain after
//! every driving call.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ffi::{c_int, c_void};
use std::fmt;
use std::num::NonZeroUsize;
use std::ops::BitOr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use curl_sys::*;
use libc::{c_long, c_short, c_uint};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{check_code, check_multi, EngineError, InitError, TransferError};
use crate::fdset::FdSets;
use crate::handle::{Access, Multi, Owned};
use crate::transfer::{Transfer, TransferRef};

/// Native socket descriptor.
pub type Socket = curl_socket_t;

/// Identifies a registration within one [`TransferSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferKey(u64);

impl fmt::Display for TransferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Readiness the engine wants to be told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interest {
    Read,
    Write,
    ReadWrite,
}

impl Interest {
    fn from_raw(what: c_int) -> Option<Self> {
        match what {
            CURL_POLL_IN => Some(Interest::Read),
            CURL_POLL_OUT => Some(Interest::Write),
            CURL_POLL_INOUT => Some(Interest::ReadWrite),
            _ => None,
        }
    }

    pub fn is_readable(self) -> bool {
        matches!(self, Interest::Read | Interest::ReadWrite)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, Interest::Write | Interest::ReadWrite)
    }
}

/// Readiness observed by the caller, passed to [`Trigger::Ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness(c_int);

impl Readiness {
    pub const NONE: Readiness = Readiness(0);
    pub const READABLE: Readiness = Readiness(CURL_CSELECT_IN);
    pub const WRITABLE: Readiness = Readiness(CURL_CSELECT_OUT);
    pub const ERROR: Readiness = Readiness(CURL_CSELECT_ERR);

    pub fn is_readable(self) -> bool {
        self.0 & CURL_CSELECT_IN != 0
    }

    pub fn is_writable(self) -> bool {
        self.0 & CURL_CSELECT_OUT != 0
    }

    pub fn is_error(self) -> bool {
        self.0 & CURL_CSELECT_ERR != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Readiness {
    type Output = Readiness;

    fn bitor(self, rhs: Readiness) -> Readiness {
        Readiness(self.0 | rhs.0)
    }
}

/// What woke the caller up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The timer from the last [`TimerRequest`] fired.
    Timeout,
    Ready(Socket, Readiness),
}

/// The engine's record of one descriptor it wants watched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketWatch {
    pub socket: Socket,
    pub interest: Interest,
    /// Collaborator token, passed back unchanged on later requests.
    pub token: Option<NonZeroUsize>,
}

/// One socket-interest change, as seen by the socket callback.
pub struct SocketRequest<'a> {
    transfer: Option<TransferRef<'a>>,
    socket: Socket,
    interest: Option<Interest>,
    token: Option<NonZeroUsize>,
    assigned: &'a Cell<Option<NonZeroUsize>>,
}

impl SocketRequest<'_> {
    /// The transfer whose progress caused the change, if any.
    pub fn transfer(&self) -> Option<TransferRef<'_>> {
        self.transfer
    }

    pub fn socket(&self) -> Socket {
        self.socket
    }

    /// New interest, or `None` when the descriptor must no longer be watched.
    /// On removal the collaborator releases whatever it made for the token.
    pub fn interest(&self) -> Option<Interest> {
        self.interest
    }

    pub fn is_remove(&self) -> bool {
        self.interest.is_none()
    }

    /// Token recorded by an earlier [`assign`](Self::assign) for this descriptor.
    pub fn token(&self) -> Option<NonZeroUsize> {
        self.token
    }

    /// Record a token for a newly watched descriptor. Tokens are never
    /// replaced mid-life: returns `false` (and changes nothing) if one exists
    /// or the descriptor is being removed.
    pub fn assign(&self, token: NonZeroUsize) -> bool {
        if self.token.is_some() || self.interest.is_none() {
            warn!(socket = self.socket, "refusing to replace or assign a socket token");
            return false;
        }
        self.assigned.set(Some(token));
        true
    }
}

impl fmt::Debug for SocketRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketRequest")
            .field("socket", &self.socket)
            .field("interest", &self.interest)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

/// What the timer callback is asked to do. Only one timer is ever pending;
/// each request supersedes the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerRequest {
    Cancel,
    /// Call `socket_action(Trigger::Timeout)` after this long (at least 1ms).
    After(Duration),
}

/// Extra descriptor for [`TransferSet::poll`] / [`TransferSet::wait`].
#[repr(transparent)]
pub struct WaitFd(curl_waitfd);

impl WaitFd {
    pub fn new(fd: Socket, interest: Interest) -> Self {
        let mut events: c_short = 0;
        if interest.is_readable() {
            events |= CURL_WAIT_POLLIN;
        }
        if interest.is_writable() {
            events |= CURL_WAIT_POLLOUT;
        }
        Self(curl_waitfd {
            fd,
            events,
            revents: 0,
        })
    }

    pub fn fd(&self) -> Socket {
        self.0.fd
    }

    pub fn is_readable(&self) -> bool {
        self.0.revents & CURL_WAIT_POLLIN != 0
    }

    pub fn is_writable(&self) -> bool {
        self.0.revents & CURL_WAIT_POLLOUT != 0
    }
}

impl fmt::Debug for WaitFd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitFd")
            .field("fd", &self.0.fd)
            .field("events", &self.0.events)
            .field("revents", &self.0.revents)
            .finish()
    }
}

/// Where a registered transfer stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferState {
    /// Registered, not driven yet.
    Idle,
    Running,
    /// Finished; waiting in the completion queue.
    Done(Result<(), TransferError>),
}

/// A finished transfer handed back to the caller.
#[derive(Debug)]
pub struct CompletionRecord {
    pub key: TransferKey,
    pub transfer: Transfer,
    pub result: Result<(), TransferError>,
}

// ─── Callback state ──────────────────────────────────────────────────────────

type SocketFn = Box<dyn FnMut(SocketRequest<'_>) + Send>;
type TimerFn = Box<dyn FnMut(TimerRequest) + Send>;

/// Reached from the multi callbacks through a stable boxed pointer.
struct Hooks {
    multi: *mut CURLM,
    watches: RefCell<BTreeMap<Socket, SocketWatch>>,
    deadline: Cell<Option<Instant>>,
    on_socket: RefCell<Option<SocketFn>>,
    on_timer: RefCell<Option<TimerFn>>,
    failures: Cell<u64>,
}

impl Hooks {
    fn callback_failed(&self, which: &'static str) {
        self.failures.set(self.failures.get() + 1);
        warn!(callback = which, "collaborator callback panicked; ignoring");
    }
}

extern "C" fn socket_cb(
    easy: *mut CURL,
    socket: curl_socket_t,
    what: c_int,
    userp: *mut c_void,
    socketp: *mut c_void,
) -> c_int {
    // SAFETY: userp is the Hooks box installed in TransferSet::new, alive
    // until after the multi handle is cleaned up.
    let hooks = unsafe { &*userp.cast::<Hooks>() };

    let interest = if what == CURL_POLL_REMOVE {
        None
    } else if let Some(interest) = Interest::from_raw(what) {
        Some(interest)
    } else {
        trace!(socket, what, "ignoring socket request without interest");
        return 0;
    };

    let token = {
        let Ok(mut watches) = hooks.watches.try_borrow_mut() else {
            return 0;
        };
        let token = watches
            .get(&socket)
            .and_then(|w| w.token)
            .or(NonZeroUsize::new(socketp as usize));
        match interest {
            None => {
                watches.remove(&socket);
                debug!(socket, "socket watch removed");
            }
            Some(interest) => {
                let created = !watches.contains_key(&socket);
                watches.insert(
                    socket,
                    SocketWatch {
                        socket,
                        interest,
                        token,
                    },
                );
                debug!(socket, ?interest, created, "socket watch updated");
            }
        }
        token
    };

    let assigned = Cell::new(None);
    if let Ok(mut slot) = hooks.on_socket.try_borrow_mut() {
        if let Some(f) = slot.as_mut() {
            let request = SocketRequest {
                // SAFETY: the engine passes a live handle (or null) for the
                // duration of the callback.
                transfer: unsafe { TransferRef::from_raw(easy) },
                socket,
                interest,
                token,
                assigned: &assigned,
            };
            if panic::catch_unwind(AssertUnwindSafe(|| f(request))).is_err() {
                hooks.callback_failed("socket");
            }
        }
    }

    if let Some(token) = assigned.get() {
        // SAFETY: live multi; assigning from inside the socket callback is
        // explicitly supported by the engine.
        let rc = unsafe { curl_multi_assign(hooks.multi, socket, token.get() as *mut c_void) };
        if rc == CURLM_OK {
            if let Some(watch) = hooks.watches.borrow_mut().get_mut(&socket) {
                watch.token = Some(token);
            }
        } else {
            warn!(socket, code = rc, "engine refused socket token");
        }
    }
    0
}

extern "C" fn timer_cb(_multi: *mut CURLM, timeout_ms: c_long, userp: *mut c_void) -> c_int {
    // SAFETY: as in socket_cb.
    let hooks = unsafe { &*userp.cast::<Hooks>() };
    let request = match u64::try_from(timeout_ms) {
        Err(_) => {
            hooks.deadline.set(None);
            TimerRequest::Cancel
        }
        Ok(ms) => {
            let delay = Duration::from_millis(ms.max(1));
            hooks.deadline.set(Some(Instant::now() + delay));
            TimerRequest::After(delay)
        }
    };
    trace!(?request, "timer updated");
    if let Ok(mut slot) = hooks.on_timer.try_borrow_mut() {
        if let Some(f) = slot.as_mut() {
            if panic::catch_unwind(AssertUnwindSafe(|| f(request))).is_err() {
                hooks.callback_failed("timer");
            }
        }
    }
    0
}

const _: curl_socket_callback = socket_cb;
const _: curl_multi_timer_callback = timer_cb;

// ─── Waker ───────────────────────────────────────────────────────────────────

struct RawMulti(*mut CURLM);

// SAFETY: only used for curl_multi_wakeup, which may be called from any thread.
unsafe impl Send for RawMulti {}

/// Interrupts a blocking [`TransferSet::poll`] from another thread.
#[derive(Clone)]
pub struct Waker {
    multi: Arc<Mutex<Option<RawMulti>>>,
}

impl Waker {
    /// Returns `false` once the transfer set is gone.
    pub fn wake(&self) -> Result<bool, EngineError> {
        let guard = self.multi.lock();
        let Some(raw) = guard.as_ref() else {
            return Ok(false);
        };
        // SAFETY: the set clears this slot under the same lock before
        // cleaning up the handle.
        check_multi(unsafe { curl_multi_wakeup(raw.0) })?;
        Ok(true)
    }
}

impl fmt::Debug for Waker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waker")
            .field("alive", &self.multi.lock().is_some())
            .finish()
    }
}

// ─── Transfer set ────────────────────────────────────────────────────────────

struct Entry {
    transfer: Transfer,
    state: TransferState,
}

pub struct TransferSet {
    handle: Owned<Multi>,
    hooks: Box<Hooks>,
    entries: HashMap<TransferKey, Entry>,
    by_handle: HashMap<usize, TransferKey>,
    completed: VecDeque<TransferKey>,
    next_key: u64,
    waker: Arc<Mutex<Option<RawMulti>>>,
}

// SAFETY: the set is driven from one thread at a time (`&mut self`); the
// callbacks it stores are Send, and so is every Transfer.
unsafe impl Send for TransferSet {}

impl TransferSet {
    pub fn new() -> Result<Self, InitError> {
        // SAFETY: plain constructor; null means allocation failure.
        let raw = unsafe { curl_multi_init() };
        // SAFETY: fresh handle, owned by nobody else.
        let handle =
            unsafe { Owned::<Multi>::from_raw(raw) }.ok_or(InitError::Allocation("transfer-set"))?;
        let hooks = Box::new(Hooks {
            multi: raw,
            watches: RefCell::new(BTreeMap::new()),
            deadline: Cell::new(None),
            on_socket: RefCell::new(None),
            on_timer: RefCell::new(None),
            failures: Cell::new(0),
        });
        let data = std::ptr::addr_of!(*hooks).cast::<c_void>();
        // SAFETY: live multi; hooks outlives the handle (field order and Drop).
        unsafe {
            curl_multi_setopt(raw, CURLMOPT_SOCKETFUNCTION, socket_cb as curl_socket_callback);
            curl_multi_setopt(raw, CURLMOPT_SOCKETDATA, data);
            curl_multi_setopt(raw, CURLMOPT_TIMERFUNCTION, timer_cb as curl_multi_timer_callback);
            curl_multi_setopt(raw, CURLMOPT_TIMERDATA, data);
        }
        Ok(Self {
            handle,
            hooks,
            entries: HashMap::new(),
            by_handle: HashMap::new(),
            completed: VecDeque::new(),
            next_key: 0,
            waker: Arc::new(Mutex::new(Some(RawMulti(raw)))),
        })
    }

    /// Install the socket-interest collaborator.
    pub fn on_socket<F>(&mut self, f: F)
    where
        F: FnMut(SocketRequest<'_>) + Send + 'static,
    {
        *self.hooks.on_socket.get_mut() = Some(Box::new(f));
    }

    /// Install the timer collaborator.
    pub fn on_timer<F>(&mut self, f: F)
    where
        F: FnMut(TimerRequest) + Send + 'static,
    {
        *self.hooks.on_timer.get_mut() = Some(Box::new(f));
    }

    pub fn waker(&self) -> Waker {
        Waker {
            multi: Arc::clone(&self.waker),
        }
    }

    /// Cap on simultaneously open connections (0 = no cap).
    pub fn max_total_connections(&mut self, max: u32) -> Result<(), EngineError> {
        self.set_long(CURLMOPT_MAX_TOTAL_CONNECTIONS, max)
    }

    /// Size of the connection cache kept between transfers.
    pub fn max_connects(&mut self, max: u32) -> Result<(), EngineError> {
        self.set_long(CURLMOPT_MAXCONNECTS, max)
    }

    fn set_long(&mut self, option: CURLMoption, value: u32) -> Result<(), EngineError> {
        let value = c_long::try_from(value).unwrap_or(c_long::MAX);
        // SAFETY: live multi; option takes a long.
        check_multi(unsafe { curl_multi_setopt(self.handle.raw(), option, value) })
    }

    /// Register `transfer`. Its configuration should be complete: changing it
    /// while running is allowed but in-flight I/O may not observe it.
    ///
    /// A transfer can only be registered once, which ownership enforces:
    ///
    /// ```compile_fail
    /// # use sluice::{Transfer, TransferSet};
    /// let mut set = TransferSet::new().unwrap();
    /// let t = Transfer::new().unwrap();
    /// set.add(t).unwrap();
    /// set.add(t).unwrap(); // `t` was moved by the first add
    /// ```
    ///
    /// If the engine refuses the handle, the transfer comes back inside
    /// [`EngineError::Rejected`].
    pub fn add(&mut self, mut transfer: Transfer) -> Result<TransferKey, EngineError> {
        let raw = transfer.raw();
        // SAFETY: live handles; the set keeps the transfer alive until it is
        // removed from the multi again.
        if let Err(reason) = check_multi(unsafe { curl_multi_add_handle(self.handle.raw(), raw) }) {
            warn!(error = %reason, "engine refused transfer");
            return Err(EngineError::Rejected {
                transfer: Box::new(transfer),
                reason: Box::new(reason),
            });
        }
        let key = TransferKey(self.next_key);
        self.next_key += 1;
        transfer.mark_executing();
        self.by_handle.insert(raw as usize, key);
        self.entries.insert(
            key,
            Entry {
                transfer,
                state: TransferState::Idle,
            },
        );
        debug!(%key, "transfer registered");
        Ok(key)
    }

    /// Drive the engine with one event. Returns the number of transfers still
    /// running. Readiness for a socket that is not being watched is refused.
    pub fn socket_action(&mut self, trigger: Trigger) -> Result<usize, EngineError> {
        let (socket, mask) = match trigger {
            Trigger::Timeout => {
                self.hooks.deadline.set(None);
                (CURL_SOCKET_TIMEOUT, 0)
            }
            Trigger::Ready(socket, readiness) => {
                if !self.hooks.watches.borrow().contains_key(&socket) {
                    return Err(EngineError::UnknownSocket(socket));
                }
                (socket, readiness.0)
            }
        };
        let mut running: c_int = 0;
        // SAFETY: live multi; no RefCell borrow of hooks is held across the call.
        let rc = unsafe { curl_multi_socket_action(self.handle.raw(), socket, mask, &mut running) };
        self.after_drive();
        check_multi(rc)?;
        Ok(usize::try_from(running).unwrap_or(0))
    }

    /// Do whatever work is ready now, without waiting. Returns the number of
    /// transfers still running.
    pub fn perform(&mut self) -> Result<usize, EngineError> {
        let mut running: c_int = 0;
        // SAFETY: live multi.
        let rc = unsafe { curl_multi_perform(self.handle.raw(), &mut running) };
        self.after_drive();
        check_multi(rc)?;
        Ok(usize::try_from(running).unwrap_or(0))
    }

    /// Block until a watched or `extra` descriptor is ready, `timeout` passes,
    /// or a [`Waker`] fires; then drive once. Returns how many descriptors
    /// had activity.
    pub fn poll(&mut self, timeout: Duration, extra: &mut [WaitFd]) -> Result<usize, EngineError> {
        self.block(timeout, extra, curl_multi_poll)
    }

    /// Like [`poll`](Self::poll) but returns immediately when nothing is being
    /// watched, and cannot be woken.
    pub fn wait(&mut self, timeout: Duration, extra: &mut [WaitFd]) -> Result<usize, EngineError> {
        self.block(timeout, extra, curl_multi_wait)
    }

    fn block(
        &mut self,
        timeout: Duration,
        extra: &mut [WaitFd],
        call: unsafe extern "C" fn(*mut CURLM, *mut curl_waitfd, c_uint, c_int, *mut c_int) -> CURLMcode,
    ) -> Result<usize, EngineError> {
        let ms = c_int::try_from(timeout.as_millis()).unwrap_or(c_int::MAX);
        let nfds = c_uint::try_from(extra.len()).unwrap_or(c_uint::MAX);
        let mut ready: c_int = 0;
        // SAFETY: WaitFd is a transparent curl_waitfd; extra is valid for nfds.
        check_multi(unsafe {
            call(
                self.handle.raw(),
                extra.as_mut_ptr().cast::<curl_waitfd>(),
                nfds,
                ms,
                &mut ready,
            )
        })?;
        self.perform()?;
        Ok(usize::try_from(ready).unwrap_or(0))
    }

    /// How long the engine wants to wait before being driven again.
    /// `None` means no timeout is set.
    pub fn timeout(&self) -> Result<Option<Duration>, EngineError> {
        let mut ms: c_long = -1;
        // SAFETY: live multi.
        check_multi(unsafe { curl_multi_timeout(self.handle.raw(), &mut ms) })?;
        Ok(u64::try_from(ms).ok().map(Duration::from_millis))
    }

    /// Fill `fds` with the descriptors the engine is waiting on.
    pub fn fdset(&self, fds: &mut FdSets) -> Result<(), EngineError> {
        fds.clear();
        // SAFETY: live multi; all sets are initialized.
        check_multi(unsafe {
            curl_multi_fdset(
                self.handle.raw(),
                &mut fds.read,
                &mut fds.write,
                &mut fds.except,
                &mut fds.max_fd,
            )
        })
    }

    /// Deregister a transfer and hand it back. A running transfer is aborted:
    /// its watches are torn down before this returns and any completion it
    /// had queued is discarded.
    pub fn remove(&mut self, key: TransferKey) -> Result<Transfer, EngineError> {
        let entry = self
            .entries
            .remove(&key)
            .ok_or(EngineError::UnknownTransfer(key))?;
        let raw = entry.transfer.raw();
        // SAFETY: live handles; raw was added to this multi.
        let rc = unsafe { curl_multi_remove_handle(self.handle.raw(), raw) };
        if let Err(e) = check_multi(rc) {
            // Still attached natively: keep owning it.
            self.entries.insert(key, entry);
            return Err(e);
        }
        self.by_handle.remove(&(raw as usize));
        self.completed.retain(|k| *k != key);
        let Entry {
            mut transfer,
            state,
        } = entry;
        match state {
            TransferState::Done(result) => transfer.mark_completed(result),
            TransferState::Idle | TransferState::Running => transfer.mark_cancelled(),
        }
        debug!(%key, "transfer removed");
        Ok(transfer)
    }

    /// Yield finished transfers in the order they finished. Each record leaves
    /// the set as it is yielded; dropping the iterator early keeps the rest
    /// queued.
    pub fn drain_completions(&mut self) -> Drain<'_> {
        Drain { set: self }
    }

    fn after_drive(&mut self) {
        for entry in self.entries.values_mut() {
            if entry.state == TransferState::Idle {
                entry.state = TransferState::Running;
            }
        }
        loop {
            let mut queued: c_int = 0;
            // SAFETY: live multi; the message stays valid until the next
            // engine call, and is fully read before then.
            let msg = unsafe { curl_multi_info_read(self.handle.raw(), &mut queued) };
            // SAFETY: non-null messages point at an engine-owned CURLMsg.
            let Some(msg) = (unsafe { msg.as_ref() }) else {
                break;
            };
            if msg.msg != CURLMSG_DONE {
                continue;
            }
            // SAFETY: for DONE messages the data union holds the result code.
            let code = unsafe { *std::ptr::addr_of!(msg.data).cast::<CURLcode>() };
            let Some(&key) = self.by_handle.get(&(msg.easy_handle as usize)) else {
                warn!("completion for a handle this set does not own");
                continue;
            };
            let result = check_code(code);
            match &result {
                Ok(()) => debug!(%key, "transfer finished"),
                Err(e) => debug!(%key, code = e.code, error = %e.message, "transfer failed"),
            }
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.state = TransferState::Done(result);
                self.completed.push_back(key);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered transfers that have been driven and are not done.
    pub fn running(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.state == TransferState::Running)
            .count()
    }

    pub fn state(&self, key: TransferKey) -> Option<&TransferState> {
        self.entries.get(&key).map(|e| &e.state)
    }

    pub fn get(&self, key: TransferKey) -> Option<&Transfer> {
        self.entries.get(&key).map(|e| &e.transfer)
    }

    /// Mutable access between driving calls. See [`add`](Self::add) about
    /// reconfiguring a running transfer.
    pub fn get_mut(&mut self, key: TransferKey) -> Option<&mut Transfer> {
        self.entries.get_mut(&key).map(|e| &mut e.transfer)
    }

    pub fn keys(&self) -> impl Iterator<Item = TransferKey> + '_ {
        self.entries.keys().copied()
    }

    /// Current socket watches, ordered by descriptor.
    pub fn watches(&self) -> Vec<SocketWatch> {
        self.hooks.watches.borrow().values().copied().collect()
    }

    /// When the engine last asked to be woken, if a timer is pending.
    pub fn timer_deadline(&self) -> Option<Instant> {
        self.hooks.deadline.get()
    }

    /// Collaborator callbacks that panicked and were ignored.
    pub fn callback_failures(&self) -> u64 {
        self.hooks.failures.get()
    }
}

impl Drop for TransferSet {
    fn drop(&mut self) {
        *self.waker.lock() = None;
        let multi = self.handle.raw();
        for entry in self.entries.values() {
            // SAFETY: every entry is attached to this multi; detaching before
            // either side is freed.
            let rc = unsafe { curl_multi_remove_handle(multi, entry.transfer.raw()) };
            if rc != CURLM_OK {
                warn!(code = rc, "failed to detach transfer on drop");
            }
        }
        // Fields drop next: the multi handle (callbacks still see `hooks`),
        // then hooks, then the transfers.
    }
}

impl fmt::Debug for TransferSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferSet")
            .field("handle", &self.handle)
            .field("registered", &self.entries.len())
            .field("completed", &self.completed.len())
            .field("watches", &self.hooks.watches.borrow().len())
            .field("deadline", &self.hooks.deadline.get())
            .finish()
    }
}

/// Lazy, single-pass iterator over completed transfers.
pub struct Drain<'a> {
    set: &'a mut TransferSet,
}

impl Iterator for Drain<'_> {
    type Item = CompletionRecord;

    fn next(&mut self) -> Option<CompletionRecord> {
        while let Some(key) = self.set.completed.pop_front() {
            let Some(entry) = self.set.entries.remove(&key) else {
                continue;
            };
            let raw = entry.transfer.raw();
            // SAFETY: live handles; raw was added to this multi.
            let rc = unsafe { curl_multi_remove_handle(self.set.handle.raw(), raw) };
            if rc != CURLM_OK {
                warn!(%key, code = rc, "failed to detach finished transfer");
                self.set.entries.insert(key, entry);
                self.set.completed.push_front(key);
                return None;
            }
            self.set.by_handle.remove(&(raw as usize));
            let Entry {
                mut transfer,
                state,
            } = entry;
            let result = match state {
                TransferState::Done(result) => result,
                // Only Done entries are ever queued.
                TransferState::Idle | TransferState::Running => Ok(()),
            };
            transfer.mark_completed(result.clone());
            return Some(CompletionRecord {
                key,
                transfer,
                result,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::Phase;

    #[test]
    fn test_readiness_bits() {
        let r = Readiness::READABLE | Readiness::WRITABLE;
        assert!(r.is_readable());
        assert!(r.is_writable());
        assert!(!r.is_error());
        assert!(Readiness::NONE.is_empty());
    }

    #[test]
    fn test_interest_mapping() {
        assert_eq!(Interest::from_raw(CURL_POLL_IN), Some(Interest::Read));
        assert_eq!(Interest::from_raw(CURL_POLL_INOUT), Some(Interest::ReadWrite));
        assert_eq!(Interest::from_raw(CURL_POLL_REMOVE), None);
        assert!(Interest::ReadWrite.is_readable() && Interest::ReadWrite.is_writable());
    }

    #[test]
    fn test_add_and_remove_idle() {
        let mut set = TransferSet::new().unwrap();
        let mut t = Transfer::new().unwrap();
        t.url("http://127.0.0.1:1/").unwrap();
        let key = set.add(t).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.state(key), Some(&TransferState::Idle));
        assert_eq!(set.get(key).unwrap().phase(), &Phase::Executing);
        let t = set.remove(key).unwrap();
        assert!(set.is_empty());
        assert_eq!(t.phase(), &Phase::Configured);
        assert!(matches!(
            set.remove(key),
            Err(EngineError::UnknownTransfer(k)) if k == key
        ));
    }

    #[test]
    fn test_unknown_socket_rejected() {
        let mut set = TransferSet::new().unwrap();
        let err = set
            .socket_action(Trigger::Ready(12345, Readiness::READABLE))
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownSocket(12345)));
    }

    #[test]
    fn test_empty_set_drains_nothing() {
        let mut set = TransferSet::new().unwrap();
        assert_eq!(set.perform().unwrap(), 0);
        assert_eq!(set.drain_completions().count(), 0);
        assert_eq!(set.timeout().unwrap(), None);
    }

    #[test]
    fn test_timer_request_recorded() {
        let mut set = TransferSet::new().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        set.on_timer(move |req| sink.lock().push(req));
        let mut t = Transfer::new().unwrap();
        t.url("http://127.0.0.1:1/").unwrap();
        set.add(t).unwrap();
        // Adding asks for an immediate wake-up, clamped to 1ms.
        assert!(matches!(seen.lock().first(), Some(TimerRequest::After(d)) if *d >= Duration::from_millis(1)));
        assert!(set.timer_deadline().is_some());
    }

    #[test]
    fn test_panicking_timer_callback_is_contained() {
        let mut set = TransferSet::new().unwrap();
        set.on_timer(|_| panic!("collaborator bug"));
        let mut t = Transfer::new().unwrap();
        t.url("http://127.0.0.1:1/").unwrap();
        set.add(t).unwrap();
        assert!(set.callback_failures() >= 1);
    }

    #[test]
    fn test_waker_after_drop() {
        let set = TransferSet::new().unwrap();
        let waker = set.waker();
        assert!(waker.wake().unwrap());
        drop(set);
        assert!(!waker.wake().unwrap());
    }

    #[test]
    fn test_wait_fd_interest() {
        let fd = WaitFd::new(3, Interest::ReadWrite);
        assert_eq!(fd.fd(), 3);
        assert_eq!(fd.0.events, CURL_WAIT_POLLIN | CURL_WAIT_POLLOUT);
        assert!(!fd.is_readable());
    }
}
