use libc::{FD_ISSET, FD_SET, FD_ZERO, fd_set, pselect, timespec};
use std::io;
use std::net::TcpListener;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

/// Waits for the listening socket to become readable, at most `timeout` at a time.
pub struct SelectHandler {
    listener_fd: RawFd,
    timeout: Duration,
}

impl SelectHandler {
    pub fn new(listener: &TcpListener, timeout: Duration) -> Self {
        Self {
            listener_fd: listener.as_raw_fd(),
            timeout,
        }
    }

    /// `Ok(true)` when a connection is pending. A timeout or a signal
    /// arriving during the wait yields `Ok(false)`.
    pub fn wait_for_connection(&self) -> io::Result<bool> {
        let mut read_set: fd_set = unsafe { std::mem::zeroed() };
        unsafe { FD_ZERO(&mut read_set) };
        unsafe { FD_SET(self.listener_fd, &mut read_set) };

        let timeout = timespec {
            tv_sec: self.timeout.as_secs() as _,
            tv_nsec: self.timeout.subsec_nanos() as _,
        };

        let ready_count = unsafe {
            pselect(
                self.listener_fd + 1,
                &mut read_set,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                &timeout,
                std::ptr::null(),
            )
        };

        if ready_count < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err);
        }

        Ok(ready_count > 0 && unsafe { FD_ISSET(self.listener_fd, &read_set) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream;

    #[test]
    fn times_out_without_clients() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let select = SelectHandler::new(&listener, Duration::from_millis(20));
        assert!(!select.wait_for_connection().unwrap());
    }

    #[test]
    fn reports_pending_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let _client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let select = SelectHandler::new(&listener, Duration::from_secs(2));
        assert!(select.wait_for_connection().unwrap());
    }
}
