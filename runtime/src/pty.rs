//! PTY allocation and async I/O on the master side.
//!
//! Children are started with the slave end as stdin and become session
//! leaders with the PTY as controlling terminal; the signalling protocol
//! relies on that session/group structure.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use tokio::io::unix::AsyncFd;
use tokio::process::Command;

pub struct Pty {
    pub master: OwnedFd,
    pub slave: OwnedFd,
}

pub fn open_pty() -> io::Result<Pty> {
    let winsize: Option<&nix::pty::Winsize> = None;
    let termios: Option<&nix::sys::termios::Termios> = None;
    let result = nix::pty::openpty(winsize, termios).map_err(io::Error::from)?;
    Ok(Pty {
        master: result.master,
        slave: result.slave,
    })
}

/// Make the child a session leader with its stdin (the PTY slave) as the
/// controlling terminal. Do not combine with an explicit setpgid.
pub fn set_controlling_tty(cmd: &mut Command) {
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() < 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::ioctl(0, libc::TIOCSCTTY, 0) < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

/// Nonblocking async handle on a PTY master fd.
pub struct PtyMaster {
    io: AsyncFd<std::fs::File>,
}

impl PtyMaster {
    pub fn new(fd: OwnedFd) -> io::Result<Self> {
        unsafe {
            let raw = fd.as_raw_fd();
            let flags = libc::fcntl(raw, libc::F_GETFL);
            if flags < 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(Self {
            io: AsyncFd::new(std::fs::File::from(fd))?,
        })
    }

    /// Duplicate the handle so reads and writes can proceed from separate
    /// tasks. The O_NONBLOCK status is shared through the open file
    /// description.
    pub fn try_clone(&self) -> io::Result<Self> {
        let file = self.io.get_ref().try_clone()?;
        Ok(Self {
            io: AsyncFd::new(file)?,
        })
    }

    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut ready = self.io.readable().await?;
            match ready.try_io(|inner| {
                use std::io::Read;
                inner.get_ref().read(buf)
            }) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    pub async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let mut written = 0;
        while written < buf.len() {
            let mut ready = self.io.writable().await?;
            match ready.try_io(|inner| {
                use std::io::Write;
                inner.get_ref().write(&buf[written..])
            }) {
                Ok(Ok(n)) => written += n,
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }

    /// Propagate a client window-size change to the terminal.
    pub fn resize(&self, rows: u16, cols: u16) -> io::Result<()> {
        let size = libc::winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        let rc = unsafe { libc::ioctl(self.io.get_ref().as_raw_fd(), libc::TIOCSWINSZ, &size) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
