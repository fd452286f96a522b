//! VGA text-mode console
//!
//! 80x25 character cells at physical 0xB8000. Each cell is a `u16`: low
//! byte ASCII, high byte colour attribute.
//!
//! This is the kernel's only output device, so it is also the sink behind
//! `kprint!`, `kprintln!` and the `log` backend.

use core::fmt::{self, Write};
use spin::Mutex;

use crate::mm::address::VGA_TEXT_BUFFER;

pub const COLUMNS: usize = 80;
pub const ROWS: usize = 25;

/// Light grey on black.
const ATTRIBUTE: u8 = 0x07;

#[inline]
const fn cell(ch: u8) -> u16 {
    (ch as u16) | ((ATTRIBUTE as u16) << 8)
}

/// A cursor over a buffer of `COLUMNS * ROWS` cells.
pub struct Terminal {
    buffer: *mut u16,
    row: usize,
    col: usize,
    initialized: bool,
}

// SAFETY: the terminal is only reached through the CONSOLE mutex, and the
// buffer it points at is device memory owned by nobody else.
unsafe impl Send for Terminal {}

impl Terminal {
    /// Create a terminal over `buffer` (not yet initialized).
    ///
    /// Output is dropped until [`init`](Self::init) is called.
    pub const fn new(buffer: *mut u16) -> Self {
        Self {
            buffer,
            row: 0,
            col: 0,
            initialized: false,
        }
    }

    /// Clear the screen and home the cursor.
    ///
    /// # Safety
    /// `buffer` must be valid for reads and writes of `COLUMNS * ROWS`
    /// cells for as long as the terminal is used.
    pub unsafe fn init(&mut self) {
        self.initialized = true;
        for row in 0..ROWS {
            self.clear_row(row);
        }
        self.row = 0;
        self.col = 0;
    }

    #[inline]
    fn write_cell(&mut self, row: usize, col: usize, value: u16) {
        debug_assert!(row < ROWS && col < COLUMNS);
        // SAFETY: init() established that the buffer holds ROWS * COLUMNS
        // cells, and the indices are in range.
        unsafe { self.buffer.add(row * COLUMNS + col).write_volatile(value) };
    }

    /// Read back the cell at `row`, `col`.
    pub fn cell_at(&self, row: usize, col: usize) -> Option<u16> {
        if !self.initialized || row >= ROWS || col >= COLUMNS {
            return None;
        }
        // SAFETY: same as write_cell.
        Some(unsafe { self.buffer.add(row * COLUMNS + col).read_volatile() })
    }

    /// Current cursor position as (row, column).
    pub fn cursor(&self) -> (usize, usize) {
        (self.row, self.col)
    }

    fn clear_row(&mut self, row: usize) {
        for col in 0..COLUMNS {
            self.write_cell(row, col, cell(b' '));
        }
    }

    fn scroll_if_needed(&mut self) {
        if self.row < ROWS {
            return;
        }
        for row in 1..ROWS {
            for col in 0..COLUMNS {
                if let Some(value) = self.cell_at(row, col) {
                    self.write_cell(row - 1, col, value);
                }
            }
        }
        self.clear_row(ROWS - 1);
        self.row = ROWS - 1;
        self.col = 0;
    }

    /// Write one character and advance the cursor. Returns `ch`.
    ///
    /// `\r` returns to column 0, `\n` moves to the start of the next line.
    /// Lines wrap at column 80 and the screen scrolls past row 25.
    pub fn putc(&mut self, ch: u8) -> u8 {
        if !self.initialized {
            return ch;
        }

        match ch {
            b'\r' => self.col = 0,
            b'\n' => {
                self.row += 1;
                self.col = 0;
                self.scroll_if_needed();
            }
            _ => {
                if self.col >= COLUMNS {
                    self.col = 0;
                    self.row += 1;
                    self.scroll_if_needed();
                }
                self.write_cell(self.row, self.col, cell(ch));
                self.col += 1;
            }
        }
        ch
    }

    /// Write a string; `\n` becomes `\r\n`.
    pub fn write_str(&mut self, s: &str) {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.putc(b'\r');
            }
            self.putc(byte);
        }
    }
}

impl Write for Terminal {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        Terminal::write_str(self, s);
        Ok(())
    }
}

/// Global console protected by spinlock
pub static CONSOLE: Mutex<Terminal> = Mutex::new(Terminal::new(VGA_TEXT_BUFFER as *mut u16));

/// Print macro for kernel output
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let mut console = $crate::drivers::vga::CONSOLE.lock();
        let _ = write!(console, $($arg)*);
    }};
}

/// Println macro for kernel output
#[macro_export]
macro_rules! kprintln {
    () => {
        $crate::kprint!("\n")
    };
    ($($arg:tt)*) => {{
        $crate::kprint!($($arg)*);
        $crate::kprint!("\n");
    }};
}
