// Interrupt handling for the accept loop.
//
// SIGINT and SIGTERM only raise a flag; the loop notices it between
// connections, so a request in flight always runs to completion.

use libc::{c_int, sigaction, sigemptyset, SIGINT, SIGTERM};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_interrupt(_signal: c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Flag raised once SIGINT or SIGTERM has been received.
pub fn interrupted() -> &'static AtomicBool {
    &INTERRUPTED
}

/// Installs the handler for SIGINT and SIGTERM.
///
/// No `SA_RESTART`: a blocked `pselect` returns `EINTR` so the loop checks
/// the flag right away.
pub fn install() -> io::Result<()> {
    for signal in [SIGINT, SIGTERM] {
        let mut action: sigaction = unsafe { std::mem::zeroed() };
        action.sa_sigaction = on_interrupt as extern "C" fn(c_int) as libc::sighandler_t;
        action.sa_flags = 0;
        unsafe { sigemptyset(&mut action.sa_mask) };

        let result = unsafe { sigaction(signal, &action, std::ptr::null_mut()) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
    }

    log::debug!("Interrupt handlers installed for SIGINT and SIGTERM");
    Ok(())
}
