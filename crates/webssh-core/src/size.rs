//! Terminal dimensions and the bounds accepted from clients.

use serde::{Deserialize, Serialize};

/// Default terminal width when the client does not specify one.
pub const DEFAULT_COLS: u16 = 80;
/// Default terminal height when the client does not specify one.
pub const DEFAULT_ROWS: u16 = 24;

/// Inclusive column bounds accepted from a client resize.
pub const COLS_RANGE: std::ops::RangeInclusive<u16> = 20..=500;
/// Inclusive row bounds accepted from a client resize.
pub const ROWS_RANGE: std::ops::RangeInclusive<u16> = 10..=200;

/// Pseudo-terminal size in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

impl TermSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Whether the size falls inside the bounds clients may request.
    pub fn is_valid(&self) -> bool {
        COLS_RANGE.contains(&self.cols) && ROWS_RANGE.contains(&self.rows)
    }
}

impl Default for TermSize {
    fn default() -> Self {
        Self {
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        }
    }
}

impl std::fmt::Display for TermSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_80x24() {
        assert_eq!(TermSize::default(), TermSize::new(80, 24));
    }

    #[test]
    fn bounds() {
        assert!(TermSize::new(120, 40).is_valid());
        assert!(TermSize::new(20, 10).is_valid());
        assert!(TermSize::new(500, 200).is_valid());
        assert!(!TermSize::new(0, 24).is_valid());
        assert!(!TermSize::new(80, 201).is_valid());
        assert!(!TermSize::new(501, 24).is_valid());
    }
}
