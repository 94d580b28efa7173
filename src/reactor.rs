//! Tokio-backed event loop for a [`TransferSet`].
//!
//! The reactor plays the external collaborator: socket requests become
//! [`AsyncFd`] registrations, timer requests become a single deadline, and
//! every wake-up is forwarded into [`TransferSet::socket_action`] followed by
//! a completion drain.
//!
//! ```no_run
//! # async fn demo() -> sluice::Result<()> {
//! use sluice::{Reactor, Transfer, TransferSet};
//!
//! let mut reactor = Reactor::new(TransferSet::new()?)?;
//! reactor.add(Transfer::with_url("http://example.com/", 5)?)?;
//! reactor
//!     .run(|done| println!("{} finished: {:?}", done.key, done.result))
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::future::poll_fn;
use std::num::NonZeroUsize;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest as TokioInterest;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use crate::engine::{
    CompletionRecord, Interest, Readiness, Socket, SocketRequest, TimerRequest, TransferKey,
    TransferSet, Trigger,
};
use crate::error::{EngineError, Error};
use crate::transfer::Transfer;

/// Wake at least this often even if the engine never asks for a timer.
const FALLBACK_TICK: Duration = Duration::from_secs(1);

/// Borrowed descriptor; the engine owns and closes the socket.
struct Fd(RawFd);

impl AsRawFd for Fd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

struct Registration {
    fd: AsyncFd<Fd>,
    interest: Interest,
}

#[derive(Default)]
struct Shared {
    sockets: HashMap<Socket, Registration>,
    deadline: Option<Instant>,
    next_token: usize,
}

impl Shared {
    fn on_socket(&mut self, runtime: &Handle, request: &SocketRequest<'_>) {
        let socket = request.socket();
        let Some(interest) = request.interest() else {
            // Dropping the AsyncFd deregisters it; the socket stays open.
            self.sockets.remove(&socket);
            trace!(socket, "reactor watch dropped");
            return;
        };
        if let Some(reg) = self.sockets.get_mut(&socket) {
            reg.interest = interest;
            return;
        }
        let _enter = runtime.enter();
        let both = TokioInterest::READABLE | TokioInterest::WRITABLE;
        // SAFETY: the engine announces REMOVE before it closes a socket, and
        // the registration is dropped on REMOVE, so the fd outlives it.
        match unsafe { AsyncFd::register_with_interest(Fd(socket), both) } {
            Ok(fd) => {
                self.sockets.insert(socket, Registration { fd, interest });
                if request.token().is_none() {
                    self.next_token += 1;
                    if let Some(token) = NonZeroUsize::new(self.next_token) {
                        request.assign(token);
                    }
                }
                trace!(socket, ?interest, "reactor watch created");
            }
            Err(e) => warn!(socket, error = %e, "could not register socket with reactor"),
        }
    }

    fn on_timer(&mut self, request: TimerRequest) {
        self.deadline = match request {
            TimerRequest::Cancel => None,
            TimerRequest::After(delay) => Some(Instant::now() + delay),
        };
    }

    /// First watched socket that is actually ready, if any.
    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Trigger> {
        for (&socket, reg) in &self.sockets {
            let mut readiness = Readiness::NONE;
            if reg.interest.is_readable() {
                match reg.fd.poll_read_ready(cx) {
                    Poll::Ready(Ok(mut guard)) => {
                        if level_ready(socket, libc::POLLIN) {
                            readiness = readiness | Readiness::READABLE;
                        } else {
                            guard.clear_ready();
                        }
                    }
                    Poll::Ready(Err(_)) => readiness = readiness | Readiness::ERROR,
                    Poll::Pending => {}
                }
            }
            if reg.interest.is_writable() {
                match reg.fd.poll_write_ready(cx) {
                    Poll::Ready(Ok(mut guard)) => {
                        if level_ready(socket, libc::POLLOUT) {
                            readiness = readiness | Readiness::WRITABLE;
                        } else {
                            guard.clear_ready();
                        }
                    }
                    Poll::Ready(Err(_)) => readiness = readiness | Readiness::ERROR,
                    Poll::Pending => {}
                }
            }
            if !readiness.is_empty() {
                return Poll::Ready(Trigger::Ready(socket, readiness));
            }
        }
        Poll::Pending
    }
}

/// Edge notifications can be stale; confirm with a zero-timeout poll.
fn level_ready(fd: RawFd, events: libc::c_short) -> bool {
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    // SAFETY: one valid pollfd, zero timeout.
    let rc = unsafe { libc::poll(&mut pfd, 1, 0) };
    rc > 0 && pfd.revents & (events | libc::POLLERR | libc::POLLHUP) != 0
}

pub struct Reactor {
    set: TransferSet,
    shared: Arc<Mutex<Shared>>,
}

impl Reactor {
    /// Take over `set`, replacing its socket and timer callbacks. Must be
    /// called from within a Tokio runtime.
    pub fn new(mut set: TransferSet) -> Result<Self, Error> {
        let runtime = Handle::try_current().map_err(std::io::Error::other)?;
        let shared = Arc::new(Mutex::new(Shared::default()));

        let sockets = Arc::clone(&shared);
        set.on_socket(move |request| sockets.lock().on_socket(&runtime, &request));
        let timer = Arc::clone(&shared);
        set.on_timer(move |request| timer.lock().on_timer(request));

        Ok(Self { set, shared })
    }

    pub fn add(&mut self, transfer: Transfer) -> Result<TransferKey, EngineError> {
        self.set.add(transfer)
    }

    pub fn remove(&mut self, key: TransferKey) -> Result<Transfer, EngineError> {
        self.set.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn set(&self) -> &TransferSet {
        &self.set
    }

    pub fn set_mut(&mut self) -> &mut TransferSet {
        &mut self.set
    }

    /// Wait for the next socket event or timer expiry, drive the set once and
    /// return whatever finished. Cancel-safe: dropping the future before it
    /// completes loses nothing.
    pub async fn turn(&mut self) -> Result<Vec<CompletionRecord>, EngineError> {
        if self.set.is_empty() {
            return Ok(Vec::new());
        }
        let deadline = self
            .shared
            .lock()
            .deadline
            .unwrap_or_else(|| Instant::now() + FALLBACK_TICK);
        let shared = Arc::clone(&self.shared);
        let trigger = tokio::select! {
            trigger = poll_fn(|cx| shared.lock().poll_ready(cx)) => trigger,
            () = tokio::time::sleep_until(deadline.into()) => Trigger::Timeout,
        };

        match self.set.socket_action(trigger) {
            Ok(running) => trace!(?trigger, running, "reactor turn"),
            // The watch went away between wake-up and dispatch.
            Err(EngineError::UnknownSocket(socket)) => trace!(socket, "stale readiness"),
            Err(e) => return Err(e),
        }
        Ok(self.set.drain_completions().collect())
    }

    /// Turn until no transfers remain, handing each completion to `on_complete`.
    pub async fn run<F>(&mut self, mut on_complete: F) -> Result<(), EngineError>
    where
        F: FnMut(CompletionRecord),
    {
        while !self.set.is_empty() {
            for record in self.turn().await? {
                on_complete(record);
            }
        }
        debug!("reactor idle");
        Ok(())
    }

    /// Give the set back. Its callbacks still point at this reactor's state
    /// and should be replaced before driving it elsewhere.
    pub fn into_inner(self) -> TransferSet {
        self.set
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared.lock();
        f.debug_struct("Reactor")
            .field("set", &self.set)
            .field("sockets", &shared.sockets.len())
            .field("deadline", &shared.deadline)
            .finish()
    }
}
