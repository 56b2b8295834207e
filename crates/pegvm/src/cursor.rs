//! Input cursor: positions, savepoints and UTF-8 decoding.

use std::fmt;

use crate::error::ErrorCause;

/// A position in the input text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// 1-based line of the current rune.
    pub line: usize,
    /// 1-based column of the current rune, counted in code points.
    pub col: usize,
    /// 0-based byte offset of the start of the current rune.
    pub offset: usize,
}

impl Position {
    pub(crate) fn start() -> Position {
        Position {
            line: 1,
            col: 0,
            offset: 0,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.line, self.col, self.offset)
    }
}

/// Sentinel rune for EOF, mirroring the replacement character returned by
/// a failed decode. A width of zero distinguishes EOF from a literal
/// U+FFFD in the input.
pub(crate) const RUNE_ERROR: char = '\u{FFFD}';

/// All state required to restore the cursor exactly: the position plus the
/// current rune and its width in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Savepoint {
    pub pos: Position,
    pub rn: char,
    pub w: usize,
}

/// Cursor over the input bytes, decoding one code point at a time.
pub(crate) struct Cursor<'i> {
    pub data: &'i [u8],
    pub pt: Savepoint,
}

impl<'i> Cursor<'i> {
    pub fn new(data: &'i [u8]) -> Cursor<'i> {
        Cursor {
            data,
            pt: Savepoint {
                pos: Position::start(),
                rn: RUNE_ERROR,
                w: 0,
            },
        }
    }

    /// The current rune.
    #[inline]
    pub fn peek(&self) -> char {
        self.pt.rn
    }

    /// Advance to the next rune. Malformed UTF-8 terminates the parse.
    pub fn read(&mut self) -> Result<(), ErrorCause> {
        self.pt.pos.offset += self.pt.w;
        let rest = &self.data[self.pt.pos.offset..];
        if rest.is_empty() {
            self.pt.rn = RUNE_ERROR;
            self.pt.w = 0;
            return Ok(());
        }

        // A code point is at most four bytes; a longer valid prefix only
        // matters for its first char.
        let take = rest.len().min(4);
        let rn = match std::str::from_utf8(&rest[..take]) {
            Ok(s) => s.chars().next(),
            Err(e) => std::str::from_utf8(&rest[..e.valid_up_to()])
                .ok()
                .and_then(|s| s.chars().next()),
        };
        let Some(rn) = rn else {
            return Err(ErrorCause::InvalidEncoding);
        };

        self.pt.rn = rn;
        self.pt.w = rn.len_utf8();
        self.pt.pos.col += 1;
        if rn == '\n' {
            self.pt.pos.line += 1;
            self.pt.pos.col = 0;
        }
        Ok(())
    }

    /// Bytes from `start` to the current position, non-inclusive.
    #[inline]
    pub fn slice_from(&self, start: &Savepoint) -> &'i [u8] {
        &self.data[start.pos.offset..self.pt.pos.offset]
    }

    #[inline]
    pub fn restore(&mut self, pt: Savepoint) {
        self.pt = pt;
    }
}
