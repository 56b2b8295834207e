//! Matchers: the terminal matching primitives referenced by Match
//! instructions.

use std::fmt;

use bumpalo::Bump;

use crate::charset::CharBitmap;
use crate::cursor::{Cursor, RUNE_ERROR};
use crate::error::{CompileError, ErrorCause};
use crate::grammar::CharClassExpr;
use crate::unicode::{resolve_class, UnicodeClass};

/// A matcher referenced by a Match instruction. Matchers are value-typed
/// and interned: identical matchers in a grammar share one table slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Matcher<'a> {
    /// `.` - any rune but EOF.
    Any,
    /// A literal string. `value` is pre-lowercased when `ignore_case`.
    Literal { value: &'a str, ignore_case: bool },
    /// A character class.
    CharClass(CharClassMatcher<'a>),
}

/// Compiled character class. Chars and range endpoints are pre-lowercased
/// when `ignore_case`; the sub-256 portion is baked into a bitmap.
#[derive(Debug, Clone, PartialEq)]
pub struct CharClassMatcher<'a> {
    pub chars: &'a [char],
    pub ranges: &'a [(char, char)],
    pub class_names: &'a [&'a str],
    pub ignore_case: bool,
    pub inverted: bool,
    classes: Vec<UnicodeClass>,
    bitmap: CharBitmap,
}

/// Unicode simple lowercase: single-rune mappings only, multi-rune
/// foldings are left untouched.
pub(crate) fn simple_lower(c: char) -> char {
    let mut mapping = c.to_lowercase();
    match (mapping.next(), mapping.next()) {
        (Some(l), None) => l,
        _ => c,
    }
}

impl<'a> Matcher<'a> {
    pub(crate) fn literal(
        arena: &'a Bump,
        value: &'a str,
        ignore_case: bool,
    ) -> Matcher<'a> {
        let value = if ignore_case {
            let lowered: String = value.chars().map(simple_lower).collect();
            arena.alloc_str(&lowered) as &str
        } else {
            value
        };
        Matcher::Literal { value, ignore_case }
    }

    pub(crate) fn char_class(
        arena: &'a Bump,
        class: &CharClassExpr<'a>,
    ) -> Result<Matcher<'a>, CompileError> {
        let (chars, ranges) = if class.ignore_case {
            let chars: Vec<char> = class.chars.iter().map(|&c| simple_lower(c)).collect();
            let ranges: Vec<(char, char)> = class
                .ranges
                .iter()
                .map(|&(lo, hi)| (simple_lower(lo), simple_lower(hi)))
                .collect();
            (
                arena.alloc_slice_copy(&chars) as &[char],
                arena.alloc_slice_copy(&ranges) as &[(char, char)],
            )
        } else {
            (class.chars, class.ranges)
        };

        let mut classes = Vec::with_capacity(class.classes.len());
        for name in class.classes {
            let resolved = resolve_class(name)
                .ok_or_else(|| CompileError::UnknownUnicodeClass(name.to_string()))?;
            classes.push(resolved);
        }

        Ok(Matcher::CharClass(CharClassMatcher {
            chars,
            ranges,
            class_names: class.classes,
            ignore_case: class.ignore_case,
            inverted: class.inverted,
            classes,
            bitmap: CharBitmap::build(chars, ranges),
        }))
    }

    /// Try to match at the cursor. The cursor advances on success and may
    /// advance partially on failure; the VM restores from its savepoint.
    pub(crate) fn matches(&self, cur: &mut Cursor<'_>) -> Result<bool, ErrorCause> {
        match self {
            Matcher::Any => {
                let rn = cur.peek();
                cur.read()?;
                Ok(rn != RUNE_ERROR)
            }
            Matcher::Literal { value, ignore_case } => {
                for want in value.chars() {
                    let mut rn = cur.peek();
                    if *ignore_case {
                        rn = simple_lower(rn);
                    }
                    if rn != want {
                        return Ok(false);
                    }
                    cur.read()?;
                }
                Ok(true)
            }
            Matcher::CharClass(class) => {
                let mut rn = cur.peek();
                cur.read()?;
                if class.ignore_case {
                    rn = simple_lower(rn);
                }
                Ok(class.matches_rune(rn))
            }
        }
    }
}

impl CharClassMatcher<'_> {
    fn matches_rune(&self, rn: char) -> bool {
        if (rn as u32) < 256 {
            if self.bitmap.contains(rn) {
                return !self.inverted;
            }
        } else {
            if self.chars.contains(&rn) {
                return !self.inverted;
            }
            for &(lo, hi) in self.ranges {
                if rn >= lo && rn <= hi {
                    return !self.inverted;
                }
            }
        }
        for class in &self.classes {
            if class.contains(rn) {
                return !self.inverted;
            }
        }
        self.inverted
    }
}

impl fmt::Display for Matcher<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Any => f.write_str("."),
            Matcher::Literal { value, ignore_case } => {
                write!(f, "{:?}", value)?;
                if *ignore_case {
                    f.write_str("i")?;
                }
                Ok(())
            }
            Matcher::CharClass(class) => {
                f.write_str("[")?;
                if class.inverted {
                    f.write_str("^")?;
                }
                for c in class.chars {
                    write!(f, "{}", c)?;
                }
                for (lo, hi) in class.ranges {
                    write!(f, "{}-{}", lo, hi)?;
                }
                if !class.class_names.is_empty() {
                    write!(f, "\\p{{{} classes}}", class.class_names.len())?;
                }
                f.write_str("]")?;
                if class.ignore_case {
                    f.write_str("i")?;
                }
                Ok(())
            }
        }
    }
}
