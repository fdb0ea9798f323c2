//! SIGTERM/SIGINT handling: the workspace carries `nix` but not
//! `signal-hook`, so the handler itself is the classic C-style "set a static
//! flag, do nothing else" — everything past that point runs on the main
//! thread's own poll loop.

use nix::sys::signal::{self, SigHandler, Signal};
use std::sync::atomic::{AtomicBool, Ordering};

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_signal(_: i32) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Install handlers for SIGTERM and SIGINT. Safe to call once at startup.
pub fn install() {
    let handler = SigHandler::Handler(handle_signal);
    // SAFETY: `handle_signal` only stores to an `AtomicBool`, which is
    // async-signal-safe; no allocation, locking, or panicking occurs.
    unsafe {
        signal::sigaction(Signal::SIGTERM, &signal::SigAction::new(handler, signal::SaFlags::empty(), signal::SigSet::empty()))
            .expect("failed to install SIGTERM handler");
        signal::sigaction(Signal::SIGINT, &signal::SigAction::new(handler, signal::SaFlags::empty(), signal::SigSet::empty()))
            .expect("failed to install SIGINT handler");
    }
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}
