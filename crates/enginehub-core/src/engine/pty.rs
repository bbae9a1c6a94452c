//! Pseudo-terminals for TTY execs run through an engine CLI.
//!
//! The CLI refuses `--tty` unless its stdin is a terminal, and it forwards
//! window size changes of that terminal to the engine. Running it on the
//! slave side of a pty gives it both, while the registry keeps the master
//! for I/O and resizing.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::process::Stdio;

use tokio::process::Command;

/// Size a new pty starts with until the first resize.
const INITIAL_SIZE: (u16, u16) = (80, 24);

fn winsize(width: u16, height: u16) -> libc::winsize {
    libc::winsize {
        ws_row: height,
        ws_col: width,
        ws_xpixel: 0,
        ws_ypixel: 0,
    }
}

/// An open master/slave pair.
pub(crate) struct Pty {
    master: OwnedFd,
    slave: OwnedFd,
}

/// The parent's side of a pty once the child holds the slave.
pub(crate) struct PtyMaster {
    pub(crate) reader: tokio::fs::File,
    pub(crate) writer: tokio::fs::File,
    /// Kept for [`resize`].
    pub(crate) control: OwnedFd,
}

impl Pty {
    pub(crate) fn open() -> io::Result<Self> {
        let mut master = -1;
        let mut slave = -1;
        let mut size = winsize(INITIAL_SIZE.0, INITIAL_SIZE.1);
        // SAFETY: the out-pointers are valid for writes; name and termios
        // may be null.
        let ret = unsafe {
            libc::openpty(
                &mut master,
                &mut slave,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                &mut size,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: openpty succeeded, so both descriptors are open and ours.
        let (master, slave) = unsafe { (OwnedFd::from_raw_fd(master), OwnedFd::from_raw_fd(slave)) };
        Ok(Self { master, slave })
    }

    /// Wire `cmd`'s stdio to the slave and make it the child's controlling
    /// terminal. `cmd` holds slave handles until it is dropped.
    pub(crate) fn connect_child(&self, cmd: &mut Command) -> io::Result<()> {
        cmd.stdin(Stdio::from(self.slave.try_clone()?))
            .stdout(Stdio::from(self.slave.try_clone()?))
            .stderr(Stdio::from(self.slave.try_clone()?));
        // SAFETY: setsid and ioctl are async-signal-safe and the closure
        // touches no parent state.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() < 0 {
                    return Err(io::Error::last_os_error());
                }
                if libc::ioctl(0, libc::TIOCSCTTY as _, 0) < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }
        Ok(())
    }

    /// Close the parent's copy of the slave and split the master.
    pub(crate) fn into_master(self) -> io::Result<PtyMaster> {
        let reader = std::fs::File::from(self.master.try_clone()?);
        let writer = std::fs::File::from(self.master.try_clone()?);
        drop(self.slave);
        Ok(PtyMaster {
            reader: tokio::fs::File::from_std(reader),
            writer: tokio::fs::File::from_std(writer),
            control: self.master,
        })
    }
}

pub(crate) fn resize(control: &OwnedFd, width: u16, height: u16) -> io::Result<()> {
    let size = winsize(width, height);
    // SAFETY: TIOCSWINSZ reads one winsize through a valid pointer.
    let ret = unsafe { libc::ioctl(control.as_raw_fd(), libc::TIOCSWINSZ as _, &size) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Reading the master fails with EIO once every slave handle is closed.
pub(crate) fn is_hangup(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EIO)
}
