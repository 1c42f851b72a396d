use crate::{debug, mailbox::Mailbox, warn};
use core::fmt::{self, Write};

/// Longest line a message can carry, regardless of the panel's column count.
pub const LINE_CAPACITY: usize = 32;

pub type Line = heapless::String<LINE_CAPACITY>;

/// Two lines of status text for the character display.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "no-std", derive(defmt::Format))]
pub struct DisplayMessage {
    pub line1: Line,
    pub line2: Line,
}

impl DisplayMessage {
    pub fn new(line1: &str, line2: &str) -> Self {
        Self {
            line1: line(format_args!("{line1}")),
            line2: line(format_args!("{line2}")),
        }
    }

    pub fn from_lines(line1: Line, line2: Line) -> Self {
        Self { line1, line2 }
    }
}

struct Truncating<'a>(&'a mut Line);

impl Write for Truncating<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            if self.0.push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// Formats into a line, silently cutting off anything past its capacity.
pub fn line(args: fmt::Arguments<'_>) -> Line {
    let mut line = Line::new();
    let _ = Truncating(&mut line).write_fmt(args);
    line
}

/// The longest prefix of `text` that fits in `columns` character cells.
pub fn truncate_to_columns(text: &str, columns: usize) -> &str {
    match text.char_indices().nth(columns) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// A character cell display addressed by column and row.
pub trait CharacterDisplay {
    fn clear(&mut self) -> crate::Result<()>;
    fn set_cursor(&mut self, column: u8, row: u8) -> crate::Result<()>;
    fn write(&mut self, text: &str) -> crate::Result<()>;
}

/// Queues a progress message for the display, dropping it if the display is behind.
pub fn narrate<const N: usize>(
    mailbox: &Mailbox<DisplayMessage, N>,
    line1: &str,
    line2: &str,
) -> bool {
    debug!("Display: {} / {}", line1, line2);
    let sent = mailbox.try_send(DisplayMessage::new(line1, line2));
    if !sent {
        debug!("Display mailbox full, message dropped");
    }
    sent
}

pub struct Renderer<'a, D, const N: usize> {
    display: D,
    columns: usize,
    mailbox: &'a Mailbox<DisplayMessage, N>,
}

impl<'a, D: CharacterDisplay, const N: usize> Renderer<'a, D, N> {
    pub fn new(display: D, columns: usize, mailbox: &'a Mailbox<DisplayMessage, N>) -> Self {
        Self {
            display,
            columns,
            mailbox,
        }
    }

    pub fn render(&mut self, message: &DisplayMessage) -> crate::Result<()> {
        self.display.clear()?;
        self.display.set_cursor(0, 0)?;
        self.display
            .write(truncate_to_columns(&message.line1, self.columns))?;
        self.display.set_cursor(0, 1)?;
        self.display
            .write(truncate_to_columns(&message.line2, self.columns))?;
        Ok(())
    }

    /// Draws every message in arrival order, forever.
    pub async fn run(&mut self) -> ! {
        loop {
            let message = self.mailbox.receive().await;
            if let Err(e) = self.render(&message) {
                warn!("Failed to draw display message: {}", e);
            }
        }
    }
}
