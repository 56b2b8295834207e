//! Values produced by matchers, accumulators and user thunks.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;

use crate::cursor::Position;

/// A value on the V stack, or the result of a parse.
///
/// `Failed` is the match-failure sentinel that drives ordered choice and
/// backtracking. `EmptySeq` seeds repetition accumulators; it is
/// observable as the result of a zero-or-more expression that matched
/// nothing, and compares equal to an empty list.
#[derive(Clone)]
pub enum Value<'i> {
    Failed,
    Nil,
    EmptySeq,
    /// A matched slice of the input.
    Bytes(Cow<'i, [u8]>),
    /// Sequence and repetition accumulator.
    List(Vec<Value<'i>>),
    /// Opaque value returned by a user action.
    User(Rc<dyn Any>),
}

impl<'i> Value<'i> {
    #[inline]
    pub fn failed(&self) -> bool {
        matches!(self, Value::Failed)
    }

    pub fn bytes(b: &'i [u8]) -> Value<'i> {
        Value::Bytes(Cow::Borrowed(b))
    }

    pub fn user<T: Any>(v: T) -> Value<'i> {
        Value::User(Rc::new(v))
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Matched bytes as text. Always valid for matcher results, since the
    /// VM rejects input that is not UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(self.as_bytes()?).ok()
    }

    pub fn as_list(&self) -> Option<&[Value<'i>]> {
        match self {
            Value::List(items) => Some(items),
            Value::EmptySeq => Some(&[]),
            _ => None,
        }
    }

    pub fn as_user<T: Any>(&self) -> Option<&T> {
        match self {
            Value::User(rc) => rc.downcast_ref(),
            _ => None,
        }
    }

    /// Deep-copy into a value that no longer borrows the input.
    pub fn into_owned(self) -> Value<'static> {
        match self {
            Value::Failed => Value::Failed,
            Value::Nil => Value::Nil,
            Value::EmptySeq => Value::EmptySeq,
            Value::Bytes(b) => Value::Bytes(Cow::Owned(b.into_owned())),
            Value::List(items) => {
                Value::List(items.into_iter().map(Value::into_owned).collect())
            }
            Value::User(rc) => Value::User(rc),
        }
    }
}

impl PartialEq for Value<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Failed, Value::Failed) => true,
            (Value::Nil, Value::Nil) => true,
            (Value::EmptySeq, Value::EmptySeq) => true,
            (Value::EmptySeq, Value::List(items)) | (Value::List(items), Value::EmptySeq) => {
                items.is_empty()
            }
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::User(a), Value::User(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Failed => write!(f, "Failed"),
            Value::Nil => write!(f, "Nil"),
            Value::EmptySeq => write!(f, "EmptySeq"),
            Value::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) => write!(f, "Bytes({:?})", s),
                Err(_) => write!(f, "Bytes({:?})", b),
            },
            Value::List(items) => f.debug_list().entries(items).finish(),
            Value::User(_) => write!(f, "User(..)"),
        }
    }
}

/// Matching state exposed to action and predicate thunks.
#[derive(Debug, Clone, Copy)]
pub struct Current<'i> {
    /// Start position of the current match.
    pub pos: Position,
    /// Raw text of the current match; empty in predicates.
    pub text: &'i [u8],
}

impl<'i> Current<'i> {
    /// Matched text as a string slice.
    pub fn text_str(&self) -> &'i str {
        std::str::from_utf8(self.text).unwrap_or("")
    }
}

/// Ordered label-to-value bindings passed to thunks. Binding a label that
/// is already present replaces its value in place.
#[derive(Debug, Clone, Default)]
pub struct ArgsSet<'i> {
    entries: Vec<(String, Value<'i>)>,
}

impl<'i> ArgsSet<'i> {
    pub fn new() -> ArgsSet<'i> {
        ArgsSet::default()
    }

    pub(crate) fn bind(&mut self, label: &str, value: Value<'i>) {
        for entry in &mut self.entries {
            if entry.0 == label {
                entry.1 = value;
                return;
            }
        }
        self.entries.push((label.to_string(), value));
    }

    pub fn get(&self, label: &str) -> Option<&Value<'i>> {
        self.entries
            .iter()
            .find(|(name, _)| name == label)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value<'i>)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
