//! Non-blocking I/O primitive (spec §4.C): one read or write, tolerating a
//! single `EAGAIN` by waiting for readiness up to `report_interval` seconds
//! and retrying exactly once.
//!
//! Grounded in `nonblock_rw` of the original copytool: `read`/`write` ->
//! on `EAGAIN`, `select()` with `timeout.tv_sec = opt.o_report_int` -> on
//! timeout, give up; otherwise retry once. `compio` has no readiness-based
//! `EAGAIN` model (its ops either complete or don't), so this primitive runs
//! as ordinary blocking syscalls off the reactor thread via
//! `compio::runtime::spawn_blocking`, the same bridge `compio-fs-extended`
//! uses for `statx`/`futimens`.

use crate::error::{HsmError, Result};
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Direction of the non-blocking operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `read(2)`.
    Read,
    /// `write(2)`.
    Write,
}

fn do_rw(dir: Direction, fd: RawFd, buf: &mut [u8]) -> std::io::Result<usize> {
    let rc = match dir {
        Direction::Read => unsafe {
            libc::read(fd, buf.as_mut_ptr().cast(), buf.len())
        },
        Direction::Write => unsafe {
            libc::write(fd, buf.as_ptr().cast(), buf.len())
        },
    };
    if rc < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

/// Wait for `fd` to become readable (`Direction::Read`) or writable
/// (`Direction::Write`), up to `timeout`. Returns `Ok(true)` if ready,
/// `Ok(false)` on timeout.
fn poll_ready(dir: Direction, fd: RawFd, timeout: Duration) -> std::io::Result<bool> {
    let events = match dir {
        Direction::Read => libc::POLLIN,
        Direction::Write => libc::POLLOUT,
    };
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
    let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if rc < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(rc > 0)
    }
}

/// Perform one read or write on `fd` into/from `buf`. On `EAGAIN`, waits for
/// readiness up to `report_interval`, then retries exactly once. A second
/// `EAGAIN`, or a timed-out readiness wait, is reported as
/// [`HsmError::Timeout`].
///
/// `fd` must be the raw descriptor of a file opened (or fcntl'd) for
/// non-blocking I/O; this primitive does not set `O_NONBLOCK` itself.
///
/// # Errors
///
/// Returns an error if the syscall fails for any reason other than a single
/// retryable `EAGAIN`, or if the readiness wait itself fails or times out.
pub async fn nonblock_rw(
    dir: Direction,
    fd: RawFd,
    mut buf: Vec<u8>,
    report_interval: Duration,
) -> Result<(usize, Vec<u8>)> {
    let n = compio::runtime::spawn_blocking(move || -> Result<(usize, Vec<u8>)> {
        match do_rw(dir, fd, &mut buf) {
            Ok(n) => Ok((n, buf)),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if !poll_ready(dir, fd, report_interval)? {
                    return Err(HsmError::Timeout);
                }
                let n = do_rw(dir, fd, &mut buf)?;
                Ok((n, buf))
            }
            Err(e) => Err(e.into()),
        }
    })
    .await
    .map_err(|e| HsmError::Extended(compio_fs_extended::ExtendedError::spawn_join(e)))??;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;

    #[compio::test]
    async fn reads_ready_data_without_blocking() {
        let (mut writer, reader) = std::os::unix::net::UnixStream::pair().unwrap();
        std::io::Write::write_all(&mut writer, b"hello").unwrap();
        let fd = reader.as_raw_fd();
        let buf = vec![0u8; 16];
        let (n, buf) = nonblock_rw(Direction::Read, fd, buf, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(&buf[..n], b"hello");
        drop(reader);
    }

    #[compio::test]
    async fn read_times_out_when_nothing_arrives() {
        let (_writer, reader) = std::os::unix::net::UnixStream::pair().unwrap();
        reader.set_nonblocking(true).unwrap();
        let fd = reader.as_raw_fd();
        let buf = vec![0u8; 16];
        let result = nonblock_rw(Direction::Read, fd, buf, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(HsmError::Timeout)));
    }
}
