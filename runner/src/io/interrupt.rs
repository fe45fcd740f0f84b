//! SIGINT handling that records an interrupt instead of terminating.
//!
//! While armed, SIGINT only sets an atomic flag. The orchestrator observes the
//! flag at checkpoints (loop top, between chunks, during backoff) and turns it
//! into [`Interrupted`], so in-flight tool calls are never unwound mid-way.

// sigaction has no safe wrapper in libc; the unsafe surface is confined here.
#![allow(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::error::Interrupted;

static INTERRUPT_REQUESTED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone)]
enum Flag {
    /// Process-wide flag written by the signal handler.
    Process,
    /// Private flag; nothing outside the controller writes it.
    Detached(Arc<AtomicBool>),
}

impl Flag {
    fn get(&self) -> &AtomicBool {
        match self {
            Flag::Process => &INTERRUPT_REQUESTED,
            Flag::Detached(flag) => flag.as_ref(),
        }
    }
}

/// Interrupt flag plus the knowledge of whether arming touches SIGINT.
#[derive(Debug, Clone)]
pub struct InterruptController {
    flag: Flag,
}

impl InterruptController {
    /// Controller backed by the process-wide flag; [`arm`](Self::arm)
    /// installs the SIGINT handler.
    pub fn process() -> Self {
        Self {
            flag: Flag::Process,
        }
    }

    /// Controller with a private flag; arming installs nothing.
    pub fn detached() -> Self {
        Self {
            flag: Flag::Detached(Arc::new(AtomicBool::new(false))),
        }
    }

    /// Record an interrupt request, exactly as the signal handler does.
    pub fn request(&self) {
        self.flag.get().store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.get().load(Ordering::SeqCst)
    }

    /// Consume a pending interrupt, if any.
    pub fn checkpoint(&self) -> Result<(), Interrupted> {
        if self.flag.get().swap(false, Ordering::SeqCst) {
            info!("interrupt observed at checkpoint");
            return Err(Interrupted);
        }
        Ok(())
    }

    /// Arm interrupt handling. The previous SIGINT disposition is restored
    /// when the returned guard is dropped or [`ArmedGuard::restore`]d.
    pub fn arm(&self) -> Result<ArmedGuard> {
        let previous = match self.flag {
            Flag::Process => Some(setup_interrupt_handling()?),
            Flag::Detached(_) => None,
        };
        Ok(ArmedGuard { previous })
    }
}

/// Armed interrupt handling; restores the prior handler on drop.
#[must_use = "dropping the guard immediately restores the previous handler"]
#[derive(Debug)]
pub struct ArmedGuard {
    previous: Option<PreviousHandler>,
}

impl ArmedGuard {
    /// Restore now and report the OS result.
    pub fn restore(mut self) -> Result<()> {
        match self.previous.take() {
            Some(previous) => restore_interrupt_handling(previous),
            None => Ok(()),
        }
    }
}

impl Drop for ArmedGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take()
            && let Err(err) = restore_interrupt_handling(previous)
        {
            warn!(err = %err, "failed to restore SIGINT handler");
        }
    }
}

pub use platform::PreviousHandler;

/// Install the recording SIGINT handler and return the one it replaced.
pub fn setup_interrupt_handling() -> Result<PreviousHandler> {
    let previous = platform::install().context("install SIGINT handler")?;
    debug!("SIGINT handler installed");
    Ok(previous)
}

/// Reinstate the handler that preceded [`setup_interrupt_handling`].
pub fn restore_interrupt_handling(previous: PreviousHandler) -> Result<()> {
    platform::restore(previous).context("restore SIGINT handler")?;
    debug!("SIGINT handler restored");
    Ok(())
}

#[cfg(unix)]
mod platform {
    use std::fmt;
    use std::io;
    use std::mem;
    use std::ptr;
    use std::sync::atomic::Ordering;

    use super::INTERRUPT_REQUESTED;

    /// Saved SIGINT disposition.
    pub struct PreviousHandler(libc::sigaction);

    impl fmt::Debug for PreviousHandler {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("PreviousHandler")
                .field("handler", &self.0.sa_sigaction)
                .finish()
        }
    }

    // Async-signal-safe: a single atomic store.
    extern "C" fn request_interrupt(_signum: libc::c_int) {
        INTERRUPT_REQUESTED.store(true, Ordering::SeqCst);
    }

    pub(super) fn handler_address() -> libc::sighandler_t {
        request_interrupt as extern "C" fn(libc::c_int) as *const () as libc::sighandler_t
    }

    pub(super) fn install() -> io::Result<PreviousHandler> {
        // SAFETY: both sigaction structs are zero-initialised plain C data,
        // the handler is an `extern "C"` fn with the expected signature, and
        // the pointers are valid for the duration of the call.
        unsafe {
            let mut action: libc::sigaction = mem::zeroed();
            action.sa_sigaction = handler_address();
            libc::sigemptyset(&mut action.sa_mask);
            action.sa_flags = libc::SA_RESTART;
            let mut previous: libc::sigaction = mem::zeroed();
            if libc::sigaction(libc::SIGINT, &action, &mut previous) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(PreviousHandler(previous))
        }
    }

    pub(super) fn restore(previous: PreviousHandler) -> io::Result<()> {
        // SAFETY: `previous` was filled in by a successful sigaction call.
        let rc = unsafe { libc::sigaction(libc::SIGINT, &previous.0, ptr::null_mut()) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(any(test, feature = "test-support"))]
    pub(super) fn current_handler() -> io::Result<libc::sighandler_t> {
        // SAFETY: a null new-action pointer only queries the disposition.
        unsafe {
            let mut current: libc::sigaction = mem::zeroed();
            if libc::sigaction(libc::SIGINT, ptr::null(), &mut current) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(current.sa_sigaction)
        }
    }

    #[cfg(any(test, feature = "test-support"))]
    pub(super) fn raise_sigint() -> io::Result<()> {
        // SAFETY: raise has no memory-safety preconditions.
        if unsafe { libc::raise(libc::SIGINT) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(not(unix))]
mod platform {
    use std::io;

    /// Placeholder; no OS handler is installed on this target.
    #[derive(Debug)]
    pub struct PreviousHandler;

    pub(super) fn install() -> io::Result<PreviousHandler> {
        Ok(PreviousHandler)
    }

    pub(super) fn restore(_previous: PreviousHandler) -> io::Result<()> {
        Ok(())
    }
}

/// Helpers for tests that exercise the real SIGINT path.
#[cfg(all(unix, any(test, feature = "test-support")))]
pub mod testing {
    use std::sync::{Mutex, MutexGuard, PoisonError};

    use anyhow::{Context, Result};

    static SIGNAL_LOCK: Mutex<()> = Mutex::new(());

    /// Serialise tests that touch the process-wide SIGINT disposition.
    pub fn signal_lock() -> MutexGuard<'static, ()> {
        SIGNAL_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Address of the currently installed SIGINT handler.
    pub fn current_handler() -> Result<usize> {
        Ok(super::platform::current_handler().context("query SIGINT handler")?)
    }

    /// Address of the recording handler installed by this module.
    pub fn recording_handler() -> usize {
        super::platform::handler_address()
    }

    /// Deliver SIGINT to the current thread.
    pub fn raise_sigint() -> Result<()> {
        super::platform::raise_sigint().context("raise SIGINT")
    }
}
