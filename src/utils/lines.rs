use std::fmt::{self, Display, Formatter};

use crate::error::CursorError;

/// One physical line of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub line_number: usize,
    pub text: String,
}

impl Line {
    pub fn new(line_number: usize, text: impl Into<String>) -> Self {
        Self {
            line_number,
            text: text.into(),
        }
    }

    // Split `text` into lines numbered from 1.
    pub fn from_text(text: &str) -> Vec<Line> {
        text.lines()
            .enumerate()
            .map(|(i, l)| Line::new(i + 1, l))
            .collect()
    }

    // Logs pulled off devices are not always valid UTF-8; bad bytes become U+FFFD.
    pub fn from_bytes(bytes: &[u8]) -> Vec<Line> {
        Self::from_text(&String::from_utf8_lossy(bytes))
    }
}

impl Display for Line {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:>6}: {}", self.line_number, self.text)
    }
}

/// Forward-only cursor over a slice of lines with one level of pushback.
///
/// Sub-parsers call [`rewind`](LineCursor::rewind) to hand a block header back
/// to a nested parser, which then reads it again with [`next`](LineCursor::next).
/// Only the most recent advance can be undone.
#[derive(Debug, Clone)]
pub struct LineCursor<'a> {
    lines: &'a [Line],
    pos: usize,
    can_rewind: bool,
}

impl<'a> LineCursor<'a> {
    pub fn new(lines: &'a [Line]) -> Self {
        Self {
            lines,
            pos: 0,
            can_rewind: false,
        }
    }

    pub fn has_next(&self) -> bool {
        self.pos < self.lines.len()
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<&'a Line, CursorError> {
        let line = self.lines.get(self.pos).ok_or(CursorError::EndOfInput)?;
        self.pos += 1;
        self.can_rewind = true;
        Ok(line)
    }

    pub fn rewind(&mut self) -> Result<(), CursorError> {
        if !self.can_rewind {
            return Err(CursorError::DoubleRewind);
        }
        self.pos -= 1;
        self.can_rewind = false;
        Ok(())
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> &'a [Line] {
        &self.lines[self.pos..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines() -> Vec<Line> {
        Line::from_text("first\nsecond\nthird")
    }

    #[test]
    fn test_from_bytes_is_lossy() {
        let lines = Line::from_bytes(b"ok\n\xff\xfe bad\nlast");
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].text, "\u{fffd}\u{fffd} bad");
        assert_eq!(lines[2], Line::new(3, "last"));
    }

    #[test]
    fn test_from_text_numbers_from_one() {
        let lines = lines();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], Line::new(1, "first"));
        assert_eq!(lines[2], Line::new(3, "third"));
    }

    #[test]
    fn test_next_until_end() {
        let lines = lines();
        let mut cursor = LineCursor::new(&lines);
        assert_eq!(cursor.next().unwrap().text, "first");
        assert_eq!(cursor.next().unwrap().text, "second");
        assert_eq!(cursor.next().unwrap().text, "third");
        assert!(!cursor.has_next());
        assert_eq!(cursor.next(), Err(CursorError::EndOfInput));
    }

    #[test]
    fn test_rewind_rereads_line() {
        let lines = lines();
        let mut cursor = LineCursor::new(&lines);
        cursor.next().unwrap();
        cursor.next().unwrap();
        cursor.rewind().unwrap();
        assert_eq!(cursor.position(), 1);
        assert_eq!(cursor.next().unwrap().line_number, 2);
    }

    #[test]
    fn test_rewind_after_last_line() {
        let lines = lines();
        let mut cursor = LineCursor::new(&lines);
        while cursor.has_next() {
            cursor.next().unwrap();
        }
        cursor.rewind().unwrap();
        assert!(cursor.has_next());
        assert_eq!(cursor.remaining().len(), 1);
    }

    #[test]
    fn test_double_rewind_is_rejected() {
        let lines = lines();
        let mut cursor = LineCursor::new(&lines);
        assert_eq!(cursor.rewind(), Err(CursorError::DoubleRewind));
        cursor.next().unwrap();
        cursor.rewind().unwrap();
        assert_eq!(cursor.rewind(), Err(CursorError::DoubleRewind));
        assert_eq!(cursor.position(), 0);
    }
}
