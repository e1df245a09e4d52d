//! Operator console.
//!
//! The keyboard stands in for the lab's push buttons: each key press asserts
//! its signal for exactly one poll of the orchestrator. The terminal is put in
//! raw mode while a session runs so single key presses arrive without Enter,
//! and the status line is redrawn in place.

use std::io::{self, Write};
use std::time::Duration;

use crossterm::cursor::MoveToColumn;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::Print;
use crossterm::terminal::{self, Clear, ClearType};
use crossterm::queue;
use experiment_core::orchestrator::{DigitalInputs, Signal, StatusLine};

/// Key bindings shown in the console banner.
pub const KEY_HELP: &str = "space: detected   s: short   l: long   q/esc: stop";

/// Maps a key event to the signal it asserts.
#[must_use]
pub fn signal_for_key(key: &KeyEvent) -> Option<Signal> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Signal::Stop),
        KeyCode::Esc | KeyCode::Char('q') => Some(Signal::Stop),
        KeyCode::Char(' ' | 'd') => Some(Signal::UserDetect),
        KeyCode::Char('s') => Some(Signal::UserShortResponse),
        KeyCode::Char('l') => Some(Signal::UserLongResponse),
        _ => None,
    }
}

const fn slot(signal: Signal) -> usize {
    match signal {
        Signal::Stop => 0,
        Signal::UserDetect => 1,
        Signal::UserShortResponse => 2,
        Signal::UserLongResponse => 3,
    }
}

/// Keyboard-backed [`DigitalInputs`].
#[derive(Debug, Default)]
pub struct KeyboardInputs {
    interactive: bool,
    pressed: [bool; 4],
}

impl KeyboardInputs {
    /// Reads key events from the terminal on every [`refresh`](Self::refresh).
    #[must_use]
    pub fn interactive() -> Self {
        Self {
            interactive: true,
            pressed: [false; 4],
        }
    }

    /// Never asserts anything; sessions run until completion.
    #[must_use]
    pub fn headless() -> Self {
        Self::default()
    }

    /// Replaces the asserted signals with the keys pressed since the last call.
    pub fn refresh(&mut self) -> io::Result<()> {
        self.pressed = [false; 4];
        if !self.interactive {
            return Ok(());
        }
        while event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                self.press_key(&key);
            }
        }
        Ok(())
    }

    pub fn press_key(&mut self, key: &KeyEvent) {
        if let Some(signal) = signal_for_key(key) {
            self.pressed[slot(signal)] = true;
        }
    }
}

impl DigitalInputs for KeyboardInputs {
    fn read(&mut self, signal: Signal) -> bool {
        self.pressed[slot(signal)]
    }
}

/// Keeps the terminal in raw mode for its lifetime.
pub struct RawModeGuard(());

impl RawModeGuard {
    pub fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self(()))
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(err) = terminal::disable_raw_mode() {
            eprintln!("failed to restore terminal: {err}");
        }
    }
}

/// Redraws the status line in place.
pub struct StatusPrinter<W: Write> {
    out: W,
}

impl<W: Write> StatusPrinter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn show(&mut self, status: &StatusLine) -> io::Result<()> {
        queue!(
            self.out,
            MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            Print(status)
        )?;
        self.out.flush()
    }

    /// Ends the status line so later output starts on a fresh row.
    pub fn finish(&mut self) -> io::Result<()> {
        self.out.write_all(b"\r\n")?;
        self.out.flush()
    }
}

/// Stderr writer for log output while raw mode is active.
///
/// Raw mode disables the newline translation of the terminal, so every `\n`
/// is written as `\r\n`.
#[derive(Copy, Clone, Debug, Default)]
pub struct RawStderr;

impl Write for RawStderr {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut stderr = io::stderr().lock();
        for chunk in buf.split_inclusive(|byte| *byte == b'\n') {
            match chunk.strip_suffix(b"\n") {
                Some(line) => {
                    stderr.write_all(line)?;
                    stderr.write_all(b"\r\n")?;
                }
                None => stderr.write_all(chunk)?,
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}
