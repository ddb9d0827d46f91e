//! Readiness backend adaptor.
//!
//! The emission contract is thin: register an fd for readiness, wait for
//! events, learn which fd fired. tokio's own reactor (mio) already
//! implements this contract, so each backend here is a named adaptor over
//! `tokio::io::unix::AsyncFd` rather than a hand-rolled syscall wrapper; the
//! emission mechanism is not mandated, only the observable
//! "register / wait / which fd" behavior.

use std::future::Future;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::pin::Pin;

/// A named readiness backend. `available()` is a compile-time link probe,
/// realized here as a `cfg!`/feature check since there is no foreign
/// library to link against a tokio-backed adaptor.
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;
    fn available(&self) -> bool;

    /// Gate on `fd` becoming readable through this backend. Every variant
    /// here delegates to the same `AsyncFd`-backed reactor; the trait
    /// still routes through `Backend` rather than a bare free function so
    /// the event loop waits on whichever backend `best_backend()` actually
    /// selected, instead of a hardcoded one.
    fn wait_readable<'a>(&'a self, fd: RawFd) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>> {
        Box::pin(wait_readable(fd))
    }
}

pub struct EpollBackend;
impl Backend for EpollBackend {
    fn name(&self) -> &'static str {
        "epoll"
    }
    fn available(&self) -> bool {
        cfg!(target_os = "linux")
    }
}

pub struct KqueueBackend;
impl Backend for KqueueBackend {
    fn name(&self) -> &'static str {
        "kqueue"
    }
    fn available(&self) -> bool {
        cfg!(any(target_os = "macos", target_os = "freebsd", target_os = "netbsd", target_os = "openbsd"))
    }
}

pub struct PollBackend;
impl Backend for PollBackend {
    fn name(&self) -> &'static str {
        "poll"
    }
    fn available(&self) -> bool {
        true
    }
}

/// io_uring is special: its create also submits an initial
/// accept SQE, and wait/dispatch decode a packed operation-type + fd from
/// the CQE. This crate does not carry an io_uring dependency; the variant
/// exists so `best_backend()`'s priority order is complete, and reports
/// unavailable unless explicitly enabled.
///
/// TODO: wire this up to `tokio-uring` once the event loop's connection
/// state machine (server::conn) is generic over the backend's I/O handle.
pub struct IoUringBackend;
impl Backend for IoUringBackend {
    fn name(&self) -> &'static str {
        "io_uring"
    }
    fn available(&self) -> bool {
        cfg!(all(feature = "io-uring", target_os = "linux"))
    }
}

/// Picks the first available backend in priority order:
/// `io_uring > epoll > kqueue > poll`.
pub fn best_backend() -> &'static dyn Backend {
    const IO_URING: IoUringBackend = IoUringBackend;
    const EPOLL: EpollBackend = EpollBackend;
    const KQUEUE: KqueueBackend = KqueueBackend;
    const POLL: PollBackend = PollBackend;

    if IO_URING.available() {
        &IO_URING
    } else if EPOLL.available() {
        &EPOLL
    } else if KQUEUE.available() {
        &KQUEUE
    } else {
        &POLL
    }
}

/// Borrowed-fd wrapper so a bare `RawFd` can be registered with tokio's
/// reactor without taking ownership (the connection owns the real socket).
struct BorrowedFd(RawFd);
impl AsRawFd for BorrowedFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

/// Waits for a raw fd to become readable, the adaptor's `gen_wait` +
/// `gen_get_fd` rolled into one async call — tokio resolves this through
/// whichever of epoll/kqueue/poll mio selected for the host OS.
pub async fn wait_readable(fd: RawFd) -> io::Result<()> {
    let async_fd = tokio::io::unix::AsyncFd::new(BorrowedFd(fd))?;
    let mut guard = async_fd.readable().await?;
    guard.clear_ready();
    Ok(())
}
