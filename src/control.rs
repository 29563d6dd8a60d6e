//! FIFO control channel.
//!
//! One named pipe, world-writable, line-oriented. Writers open, write one
//! or more newline-separated commands, and close; the daemon reopens the
//! pipe for every burst, like the shell scripts on the other end expect.
//!
//! Two read modes drive the main loop:
//!
//! - **blocking**: used while no holdoff is pending. The open itself
//!   blocks until a writer shows up and is interruptible by SIGINT and
//!   SIGTERM (handlers are installed without SA_RESTART, and `nix` does
//!   not retry EINTR the way std's `File::open` does).
//!
//! - **polled**: used while a holdoff window needs servicing. A
//!   non-blocking open and read, then a short sleep when the pipe is
//!   empty, so [`crate::arbiter::MasterArbiter::tick`] keeps running.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use nix::errno::Errno;
use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::{mkfifo, read, unlink};
use tracing::{debug, info, warn};

use crate::command::Command;

pub struct ControlChannel {
    path: PathBuf,
    poll_interval: Duration,
    pending: VecDeque<String>,
    partial: String,
}

impl ControlChannel {
    /// Create the FIFO (reusing one left behind by a previous run) and
    /// make it writable by any user.
    pub fn create(path: PathBuf, poll_interval: Duration) -> anyhow::Result<Self> {
        match mkfifo(&path, Mode::from_bits_truncate(0o666)) {
            Ok(()) => {}
            Err(Errno::EEXIST) => debug!(path = %path.display(), "reusing existing fifo"),
            Err(e) => {
                return Err(e).with_context(|| format!("cannot create fifo {}", path.display()))
            }
        }
        // mkfifo is subject to the umask; fix the mode up afterwards so
        // unprivileged run scripts can write commands.
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o666))
            .with_context(|| format!("cannot chmod fifo {}", path.display()))?;
        info!(path = %path.display(), "control channel ready");
        Ok(ControlChannel {
            path,
            poll_interval,
            pending: VecDeque::new(),
            partial: String::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fetch the next command, if any.
    ///
    /// Returns `Ok(None)` when interrupted by a signal, when a writer
    /// connected without sending a complete command, or (in polled mode)
    /// when the pipe was empty; the caller decides what to do with the
    /// gap. Blank lines are swallowed here.
    pub fn next_command(&mut self, blocking: bool) -> anyhow::Result<Option<Command>> {
        if let Some(cmd) = self.pop_pending() {
            return Ok(Some(cmd));
        }
        self.read_burst(blocking)?;
        if let Some(cmd) = self.pop_pending() {
            return Ok(Some(cmd));
        }
        if !blocking {
            std::thread::sleep(self.poll_interval);
        }
        Ok(None)
    }

    fn pop_pending(&mut self) -> Option<Command> {
        while let Some(line) = self.pending.pop_front() {
            if let Some(cmd) = Command::parse(&line) {
                debug!(?cmd, "control command");
                return Some(cmd);
            }
        }
        None
    }

    /// Open the pipe, drain what a writer sent, close it again.
    fn read_burst(&mut self, blocking: bool) -> anyhow::Result<()> {
        let mut flags = OFlag::O_RDONLY;
        if !blocking {
            flags |= OFlag::O_NONBLOCK;
        }
        let fd = match open(&self.path, flags, Mode::empty()) {
            Ok(fd) => fd,
            Err(Errno::EINTR) => return Ok(()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("cannot open fifo {}", self.path.display()))
            }
        };

        let mut buf = [0u8; 512];
        loop {
            match read(&fd, &mut buf) {
                Ok(0) => {
                    // Writer closed; whatever trails without a newline is
                    // still a command.
                    if !self.partial.is_empty() {
                        let line = std::mem::take(&mut self.partial);
                        self.pending.push_back(line);
                    }
                    break;
                }
                // Keep draining until the writer closes: closing our end
                // mid-burst would drop whatever it has not written yet.
                Ok(n) => self.ingest(&buf[..n]),
                Err(Errno::EAGAIN) | Err(Errno::EINTR) => break,
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("read error on fifo {}", self.path.display()))
                }
            }
        }
        Ok(())
    }

    fn ingest(&mut self, bytes: &[u8]) {
        self.partial.push_str(&String::from_utf8_lossy(bytes));
        while let Some(pos) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=pos).collect();
            self.pending.push_back(line);
        }
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        if let Err(e) = unlink(&self.path) {
            warn!(path = %self.path.display(), "could not remove fifo: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fifo_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("marqueed-fifo-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn delivers_commands_in_order() {
        let path = fifo_path("order");
        let mut chan = ControlChannel::create(path.clone(), Duration::from_millis(10)).unwrap();

        let writer = std::thread::spawn(move || {
            let mut f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
            f.write_all(b"sf2\nexit\n").unwrap();
        });

        assert_eq!(
            chan.next_command(true).unwrap(),
            Some(Command::Show("sf2".into()))
        );
        assert_eq!(chan.next_command(true).unwrap(), Some(Command::Exit));
        writer.join().unwrap();
    }

    #[test]
    fn blank_lines_are_swallowed() {
        let path = fifo_path("blank");
        let mut chan = ControlChannel::create(path.clone(), Duration::from_millis(10)).unwrap();

        let writer = std::thread::spawn(move || {
            let mut f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
            f.write_all(b"\n  \nclear\n").unwrap();
        });

        assert_eq!(chan.next_command(true).unwrap(), Some(Command::Clear));
        writer.join().unwrap();
    }

    #[test]
    fn trailing_line_without_newline_counts() {
        let path = fifo_path("trailing");
        let mut chan = ControlChannel::create(path.clone(), Duration::from_millis(10)).unwrap();

        let writer = std::thread::spawn(move || {
            let mut f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
            f.write_all(b"pacman").unwrap();
        });

        assert_eq!(
            chan.next_command(true).unwrap(),
            Some(Command::Show("pacman".into()))
        );
        writer.join().unwrap();
    }

    #[test]
    fn long_bursts_are_drained_in_order() {
        let path = fifo_path("burst");
        let mut chan = ControlChannel::create(path.clone(), Duration::from_millis(10)).unwrap();

        // Well past one read() chunk, so delivery must span several reads.
        let writer = std::thread::spawn(move || {
            let mut f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
            let mut burst = String::new();
            for i in 0..200 {
                burst.push_str(&format!("key{i:03}\n"));
            }
            f.write_all(burst.as_bytes()).unwrap();
        });

        for i in 0..200 {
            assert_eq!(
                chan.next_command(true).unwrap(),
                Some(Command::Show(format!("key{i:03}")))
            );
        }
        writer.join().unwrap();
    }

    #[test]
    fn polled_read_returns_none_when_idle() {
        let path = fifo_path("idle");
        let mut chan = ControlChannel::create(path, Duration::from_millis(1)).unwrap();
        assert_eq!(chan.next_command(false).unwrap(), None);
    }

    #[test]
    fn create_reuses_existing_fifo() {
        let path = fifo_path("reuse");
        let first = ControlChannel::create(path.clone(), Duration::from_millis(1)).unwrap();
        drop(first);
        // A stale fifo from a crashed run must not be fatal either.
        mkfifo(&path, Mode::from_bits_truncate(0o666)).unwrap();
        let second = ControlChannel::create(path, Duration::from_millis(1));
        assert!(second.is_ok());
    }
}
