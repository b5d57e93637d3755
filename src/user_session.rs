use std::io;
use std::os::fd::RawFd;

use tokio::{
    io::{AsyncRead, AsyncReadExt, BufReader},
    sync::mpsc::{Receiver, Sender, channel},
    task::JoinHandle,
};

use crate::command::Command;

// Terminal mode //////////////////////////////////////////////////////////

/// Terminal switched to single key input. The saved mode is restored on
/// drop.
pub struct RawTerminal {
    fd: RawFd,
    saved: libc::termios,
}

impl RawTerminal {
    /// Returns None when `fd` is not a terminal.
    pub fn enable(fd: RawFd) -> io::Result<Option<Self>> {
        if unsafe { libc::isatty(fd) } == 0 {
            return Ok(None);
        }
        let mut saved: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &mut saved) } < 0 {
            return Err(io::Error::last_os_error());
        }
        let mut raw = saved;
        make_raw(&mut raw);
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &raw) } < 0 {
            return Err(io::Error::last_os_error());
        }
        return Ok(Some(Self { fd, saved }));
    }

    /// Raw mode on stdin, logging instead of failing.
    pub fn stdin() -> Option<Self> {
        match Self::enable(libc::STDIN_FILENO) {
            Ok(Some(terminal)) => Some(terminal),
            Ok(None) => {
                log::info!("stdin is not a terminal; keys need Enter");
                None
            }
            Err(e) => {
                log::warn!("Failed to set up the terminal: {}", e);
                None
            }
        }
    }
}

impl Drop for RawTerminal {
    fn drop(&mut self) {
        if unsafe { libc::tcsetattr(self.fd, libc::TCSANOW, &self.saved) } < 0 {
            log::error!(
                "Failed to restore the terminal: {}",
                io::Error::last_os_error()
            );
        }
    }
}

/// One byte per read, no echo. Output processing and Ctrl-C stay on so
/// log lines and signals behave as usual.
fn make_raw(termios: &mut libc::termios) {
    unsafe { libc::cfmakeraw(termios) };
    termios.c_oflag |= libc::OPOST;
    termios.c_lflag |= libc::ISIG;
    termios.c_cc[libc::VMIN] = 1;
    termios.c_cc[libc::VTIME] = 0;
}

// Keys ///////////////////////////////////////////////////////////////////

/// Reads keystrokes from stdin and forwards them as commands.
pub fn start() -> (Receiver<Command>, JoinHandle<()>) {
    let (command_tx, command_rx) = channel(8);
    let handle = tokio::spawn(async move {
        log::info!("Reading commands from the keyboard");
        if let Err(e) = read_keys(tokio::io::stdin(), command_tx).await {
            log::error!("Keyboard input error: {:?}", e);
        }
    });
    return (command_rx, handle);
}

pub async fn read_keys<R: AsyncRead + Unpin>(
    reader: R,
    command_tx: Sender<Command>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut keys = [0u8; 64];
    loop {
        let size = reader.read(&mut keys).await?;
        if size == 0 {
            log::debug!("Keyboard input closed");
            return Ok(());
        }
        for &key in &keys[..size] {
            let Some(command) = Command::from_key(key) else {
                if !key.is_ascii_whitespace() {
                    log::debug!("Unknown key {:?}", key as char);
                }
                continue;
            };
            if command_tx.send(command).await.is_err() {
                // nobody is listening anymore
                return Ok(());
            }
        }
    }
}
