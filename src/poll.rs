//! Waiting for readiness.
//!
//! This is a thin layer over `poll(2)`. It is the only place where the
//! process ever blocks.

use crate::resolver::WaitSet;
use std::io;
use std::time::Duration;

/// Waits until a descriptor in `set` becomes ready or `timeout` passes.
///
/// The readiness flags of every watch in `set` are overwritten with the
/// result. Errors and hang-ups count as readable so that the owner of the
/// descriptor gets to see them when it next reads.
///
/// Returns the number of descriptors that became ready, which is zero if
/// the wait timed out. An interrupted wait is reported as an error of kind
/// [`io::ErrorKind::Interrupted`] and leaves all flags cleared.
pub fn poll(set: &mut WaitSet, timeout: Duration) -> io::Result<usize> {
    let mut fds: Vec<libc::pollfd> = set
        .iter()
        .map(|watch| {
            let mut events = 0;
            if watch.interest().is_readable() {
                events |= libc::POLLIN;
            }
            if watch.interest().is_writable() {
                events |= libc::POLLOUT;
            }
            libc::pollfd {
                fd: watch.fd(),
                events,
                revents: 0,
            }
        })
        .collect();
    set.iter_mut().for_each(|watch| watch.set_ready(false, false));

    // SAFETY: `fds` is a valid, exclusively borrowed array of exactly
    // `fds.len()` pollfd structures for the duration of the call.
    let res = unsafe {
        libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, millis(timeout))
    };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }

    for (watch, fd) in set.iter_mut().zip(fds.iter()) {
        let readable = fd.revents
            & (libc::POLLIN | libc::POLLERR | libc::POLLHUP | libc::POLLNVAL)
            != 0;
        let writable = fd.revents & libc::POLLOUT != 0;
        watch.set_ready(readable, writable);
    }
    Ok(res as usize)
}

/// Converts a timeout into the milliseconds `poll(2)` wants.
///
/// Rounds up so that a deadline less than a millisecond away does not turn
/// into a zero timeout and a busy loop.
fn millis(timeout: Duration) -> libc::c_int {
    let mut ms = timeout.as_millis();
    if timeout.subsec_nanos() % 1_000_000 != 0 {
        ms += 1;
    }
    ms.min(libc::c_int::MAX as u128) as libc::c_int
}

//============ Tests =========================================================
