#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::borrow_as_ptr)]
#![allow(clippy::ptr_as_ptr)]

//! sluice: a type-checked libcurl binding with owned handles and a
//! multi-transfer engine.
//!
//! The building blocks:
//! - `global`: process-wide init guard, version info, escaping, date parsing
//! - `registry`: option and info keys with their value categories
//! - `transfer`: a single configurable transfer and its borrowed view
//! - `engine`: the multi-transfer state machine and completion queue
//! - `reactor`: tokio event loop that drives an engine
//! - `fdset`: `select(2)` driving for callers without a reactor
//! - `list`, `mime`, `share`, `body`: owned resources attached to transfers
//! - `config`: TOML + env-var configuration for the CLI
//!
//! ```no_run
//! use sluice::{Buffer, Global, InitFlags, Introspect, Transfer};
//!
//! # fn main() -> sluice::Result<()> {
//! let _global = Global::init(InitFlags::DEFAULT)?;
//! let mut t = Transfer::with_url("http://example.com/", 5)?;
//! let body = Buffer::new();
//! t.set_response(body.clone());
//! t.execute()?;
//! println!("{} bytes, status {}", body.len(), t.response_code()?);
//! # Ok(())
//! # }
//! ```

pub mod body;
pub mod config;
pub mod engine;
pub mod error;
pub mod fdset;
pub mod global;
pub mod handle;
pub mod list;
pub mod mime;
pub mod reactor;
pub mod registry;
pub mod share;
mod sys;
pub mod transfer;

pub use body::{sink_fn, source_fn, BodySink, BodySource, Buffer};
pub use config::Config;
pub use engine::{
    CompletionRecord, Interest, Readiness, Socket, SocketRequest, SocketWatch, TimerRequest,
    TransferKey, TransferSet, TransferState, Trigger, WaitFd, Waker,
};
pub use error::{
    ConfigError, EngineError, Error, InitError, ListError, Result, ShareError, TransferError,
};
pub use fdset::FdSets;
pub use global::{Global, InitFlags, VersionInfo};
pub use list::List;
pub use mime::{Encoder, MimeBuilder, Part};
pub use reactor::Reactor;
pub use registry::{Category, InfoKey, InfoValue, Opt, Value};
pub use share::{ParkingLock, Share, ShareData, ShareLock};
pub use transfer::{DebugKind, Introspect, Pause, Phase, Progress, Transfer, TransferRef};
