//! Named, process-visible counting gates.
//!
//! A [`SyncGate`] wraps a named POSIX semaphore (`sem_open`). `signal`
//! increments the count; `wait` blocks until the count is positive and
//! decrements it. Gates outlive the processes that open them until
//! [`SyncGate::unlink`] removes the name.

use crate::error::{Error, Result};
use std::ffi::CString;
use std::io;
use std::ptr::NonNull;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Permissions for newly created gates.
const GATE_MODE: libc::mode_t = 0o600;

/// A named counting semaphore.
pub struct SyncGate {
    sem: NonNull<libc::sem_t>,
    name: String,
}

impl SyncGate {
    /// Open the gate, creating it with count `initial` if it does not exist.
    ///
    /// An existing gate keeps its current count.
    pub fn create(name: &str, initial: u32) -> Result<Self> {
        let cname = c_name(name)?;
        // SAFETY: cname is a valid C string; the variadic arguments match
        // what sem_open reads when O_CREAT is set.
        let sem = unsafe {
            libc::sem_open(
                cname.as_ptr(),
                libc::O_CREAT,
                GATE_MODE as libc::c_uint,
                initial as libc::c_uint,
            )
        };
        let gate = Self::from_raw(sem, name)?;
        tracing::debug!("SyncGate: opened {} (create, initial {})", name, initial);
        Ok(gate)
    }

    /// Open an existing gate.
    ///
    /// Fails with [`Error::GateMissing`] when no gate has that name.
    pub fn open(name: &str) -> Result<Self> {
        let cname = c_name(name)?;
        // SAFETY: cname is a valid C string; without O_CREAT no variadic
        // arguments are read.
        let sem = unsafe { libc::sem_open(cname.as_ptr(), 0) };
        match Self::from_raw(sem, name) {
            Err(Error::Io(e)) if e.raw_os_error() == Some(libc::ENOENT) => {
                Err(Error::GateMissing(name.to_string()))
            }
            other => other,
        }
    }

    fn from_raw(sem: *mut libc::sem_t, name: &str) -> Result<Self> {
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error().into());
        }
        let sem = NonNull::new(sem).ok_or_else(|| Error::Io(io::Error::last_os_error()))?;
        Ok(Self {
            sem,
            name: name.to_string(),
        })
    }

    /// Remove the gate name. Processes that still hold it open keep a valid
    /// handle; a missing gate is not an error.
    pub fn unlink(name: &str) -> Result<()> {
        let cname = c_name(name)?;
        // SAFETY: cname is a valid C string.
        if unsafe { libc::sem_unlink(cname.as_ptr()) } == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                return Err(err.into());
            }
        }
        tracing::debug!("SyncGate: unlinked {}", name);
        Ok(())
    }

    /// Gate name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Increment the count, waking one waiter.
    pub fn signal(&self) -> Result<()> {
        // SAFETY: sem is a live handle returned by sem_open.
        if unsafe { libc::sem_post(self.sem.as_ptr()) } == -1 {
            return Err(io::Error::last_os_error().into());
        }
        tracing::trace!("SyncGate: signaled {}", self.name);
        Ok(())
    }

    /// Block until the count is positive, then decrement it.
    pub fn wait(&self) -> Result<()> {
        loop {
            // SAFETY: sem is a live handle returned by sem_open.
            if unsafe { libc::sem_wait(self.sem.as_ptr()) } == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                return Err(err.into());
            }
        }
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    ///
    /// Expiry fails with [`Error::WorkerTimeout`] naming this gate.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        let deadline = realtime_deadline(timeout)?;
        loop {
            // SAFETY: sem is a live handle; deadline is a valid timespec.
            if unsafe { libc::sem_timedwait(self.sem.as_ptr(), &deadline) } == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ETIMEDOUT) => {
                    return Err(Error::WorkerTimeout {
                        gate: self.name.clone(),
                        after: timeout,
                    });
                }
                _ => return Err(err.into()),
            }
        }
    }

    /// Wait, bounded when `timeout` is set.
    pub fn wait_for(&self, timeout: Option<Duration>) -> Result<()> {
        match timeout {
            Some(timeout) => self.wait_timeout(timeout),
            None => self.wait(),
        }
    }

    /// Decrement the count if it is positive. Never blocks.
    pub fn try_wait(&self) -> Result<bool> {
        loop {
            // SAFETY: sem is a live handle returned by sem_open.
            if unsafe { libc::sem_trywait(self.sem.as_ptr()) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::EAGAIN) => return Ok(false),
                _ => return Err(err.into()),
            }
        }
    }

    /// Consume every pending signal; returns how many were consumed.
    pub fn drain(&self) -> Result<usize> {
        let mut drained = 0;
        while self.try_wait()? {
            drained += 1;
        }
        Ok(drained)
    }

    /// Current count.
    pub fn value(&self) -> Result<usize> {
        let mut value: libc::c_int = 0;
        // SAFETY: sem is a live handle; value is a valid out pointer.
        if unsafe { libc::sem_getvalue(self.sem.as_ptr(), &mut value) } == -1 {
            return Err(io::Error::last_os_error().into());
        }
        // Linux reports 0 rather than a negative waiter count
        Ok(value.max(0) as usize)
    }
}

impl Drop for SyncGate {
    fn drop(&mut self) {
        // SAFETY: sem is a live handle and is not used after this.
        unsafe {
            libc::sem_close(self.sem.as_ptr());
        }
    }
}

impl std::fmt::Debug for SyncGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncGate").field("name", &self.name).finish()
    }
}

// SAFETY: POSIX semaphores may be used concurrently from any thread.
unsafe impl Send for SyncGate {}
unsafe impl Sync for SyncGate {}

fn c_name(name: &str) -> Result<CString> {
    CString::new(name).map_err(|e| Error::Config(format!("gate name {name:?}: {e}")))
}

/// Absolute CLOCK_REALTIME deadline for sem_timedwait.
fn realtime_deadline(timeout: Duration) -> Result<libc::timespec> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::Config(format!("system clock before epoch: {e}")))?;
    let deadline = now.saturating_add(timeout);
    Ok(libc::timespec {
        tv_sec: deadline.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
        tv_nsec: deadline.subsec_nanos() as libc::c_long,
    })
}
