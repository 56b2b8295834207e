//! The five VM stacks.
//!
//! Each stack is independently typed; nothing ever moves between them.
//! Underflow means the compiler emitted an unbalanced block, which is a
//! bug, so the accessors panic rather than propagate.

use crate::cursor::Savepoint;
use crate::value::{ArgsSet, Value};

/// Position stack: savepoints for backtracking and match slicing.
#[derive(Default)]
pub(crate) struct PStack(Vec<Savepoint>);

impl PStack {
    #[inline]
    pub fn push(&mut self, pt: Savepoint) {
        self.0.push(pt);
    }

    #[inline]
    pub fn pop(&mut self) -> Savepoint {
        self.0.pop().expect("P stack underflow")
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Instruction-index stack: return addresses and pending call targets.
#[derive(Default)]
pub(crate) struct IStack(Vec<u16>);

impl IStack {
    #[inline]
    pub fn push(&mut self, ix: u16) {
        self.0.push(ix);
    }

    #[inline]
    pub fn pop(&mut self) -> u16 {
        self.0.pop().expect("I stack underflow")
    }

    #[inline]
    pub fn peek(&self) -> Option<u16> {
        self.0.last().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Value stack: expression results and accumulators.
#[derive(Default)]
pub(crate) struct VStack<'i>(Vec<Value<'i>>);

impl<'i> VStack<'i> {
    #[inline]
    pub fn push(&mut self, v: Value<'i>) {
        self.0.push(v);
    }

    #[inline]
    pub fn pop(&mut self) -> Value<'i> {
        self.0.pop().expect("V stack underflow")
    }

    #[inline]
    pub fn peek(&self) -> &Value<'i> {
        self.0.last().expect("V stack underflow")
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// A list of pending dispatch targets on the L stack: the word index of
/// the Push instruction that created it, plus how many entries have been
/// taken so far. The actual indices are decoded from the program on
/// demand, so taking from the list never allocates.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopList {
    pub at: u16,
    pub taken: u16,
}

/// Loop stack: child lists for sequences and choices.
#[derive(Default)]
pub(crate) struct LStack(Vec<LoopList>);

impl LStack {
    #[inline]
    pub fn push(&mut self, list: LoopList) {
        self.0.push(list);
    }

    #[inline]
    pub fn pop(&mut self) -> LoopList {
        self.0.pop().expect("L stack underflow")
    }

    #[inline]
    pub fn peek_mut(&mut self) -> &mut LoopList {
        self.0.last_mut().expect("L stack underflow")
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Args-set stack: one label frame per active scope.
#[derive(Default)]
pub(crate) struct AStack<'i>(Vec<ArgsSet<'i>>);

impl<'i> AStack<'i> {
    #[inline]
    pub fn push(&mut self) {
        self.0.push(ArgsSet::new());
    }

    #[inline]
    pub fn pop(&mut self) {
        self.0.pop().expect("A stack underflow");
    }

    #[inline]
    pub fn peek(&self) -> &ArgsSet<'i> {
        self.0.last().expect("A stack underflow")
    }

    #[inline]
    pub fn peek_mut(&mut self) -> &mut ArgsSet<'i> {
        self.0.last_mut().expect("A stack underflow")
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}
