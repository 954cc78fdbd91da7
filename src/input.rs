//! Keyboard input for the interactive loop
//!
//! Keys:
//! - `w`/`s`/`a`/`d`: move the overlay up/down/left/right
//! - `q`: quit

use std::io::{self, Read};
use std::sync::mpsc;

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Move by (dx, dy) steps
    Move(i32, i32),
    Quit,
    Ignore,
}

impl Command {
    pub fn from_key(key: char) -> Self {
        match key {
            'w' => Command::Move(0, -1),
            's' => Command::Move(0, 1),
            'a' => Command::Move(-1, 0),
            'd' => Command::Move(1, 0),
            'q' => Command::Quit,
            _ => Command::Ignore,
        }
    }
}

/// Blocking source of key presses; `None` means the source is closed
pub trait InputSource {
    fn next_key(&mut self) -> io::Result<Option<char>>;
}

/// Reads one byte per key from a reader (stdin by default)
pub struct ReaderKeys<R> {
    reader: R,
}

impl<R: Read> ReaderKeys<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl ReaderKeys<io::Stdin> {
    pub fn stdin() -> Self {
        Self::new(io::stdin())
    }
}

impl<R: Read> InputSource for ReaderKeys<R> {
    fn next_key(&mut self) -> io::Result<Option<char>> {
        let mut byte = [0u8; 1];
        loop {
            match self.reader.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(char::from(byte[0]))),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

/// Keys pushed from another thread; dropping every sender closes the source
impl InputSource for mpsc::Receiver<char> {
    fn next_key(&mut self) -> io::Result<Option<char>> {
        Ok(self.recv().ok())
    }
}

/// Puts a terminal into non-canonical, no-echo mode until dropped
pub struct RawTerminal {
    fd: libc::c_int,
    saved: libc::termios,
}

impl RawTerminal {
    /// `None` if stdin is not a terminal or its mode cannot be changed
    pub fn stdin() -> Option<Self> {
        let fd = libc::STDIN_FILENO;
        // SAFETY: isatty only inspects the descriptor
        if unsafe { libc::isatty(fd) } != 1 {
            debug!("stdin is not a terminal, keeping line-buffered input");
            return None;
        }

        // SAFETY: termios is plain data; tcgetattr fills it completely on success
        let mut saved: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &mut saved) } != 0 {
            warn!("tcgetattr failed: {}", io::Error::last_os_error());
            return None;
        }

        let mut raw = saved;
        raw.c_lflag &= !(libc::ICANON | libc::ECHO);
        raw.c_cc[libc::VMIN] = 1;
        raw.c_cc[libc::VTIME] = 0;
        // SAFETY: raw is a valid termios derived from the current settings
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &raw) } != 0 {
            warn!("tcsetattr failed: {}", io::Error::last_os_error());
            return None;
        }

        debug!("Terminal switched to single-key input");
        Some(Self { fd, saved })
    }
}

impl Drop for RawTerminal {
    fn drop(&mut self) {
        // SAFETY: restoring the settings captured in stdin()
        if unsafe { libc::tcsetattr(self.fd, libc::TCSANOW, &self.saved) } != 0 {
            warn!("Failed to restore terminal: {}", io::Error::last_os_error());
        }
    }
}
