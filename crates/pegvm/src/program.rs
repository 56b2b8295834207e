//! Compiled programs: the instruction words plus the interned tables the
//! VM executes against.

use std::fmt;

use crate::instruction::{arg, arg_count, instr_len, opcode, stack_name, Op};
use crate::matcher::Matcher;

/// Descriptor for one action or predicate code block. The VM core treats
/// thunks as opaque callables; hosts use the descriptors to build the two
/// callable tables (and code emitters to name the generated methods).
#[derive(Debug, Clone, PartialEq)]
pub struct ThunkInfo<'a> {
    /// Name of the rule the code block appears in.
    pub rule_name: &'a str,
    /// Pre-order ordinal of the expression within its rule.
    pub expr_ix: usize,
    /// Labels in scope at the definition site, in declaration order.
    pub params: Vec<&'a str>,
    /// Raw user code text.
    pub code: &'a str,
}

/// A compiled grammar. Immutable once the compiler returns it; safe to
/// share across concurrent parses, each running its own VM.
#[derive(Debug)]
pub struct Program<'a> {
    /// Packed instruction words.
    pub instrs: Vec<u64>,
    /// Interned matcher table.
    pub matchers: Vec<Matcher<'a>>,
    /// Interned string table: rule names, display names, label names.
    pub strings: Vec<&'a str>,
    /// Action thunk descriptors.
    pub actions: Vec<ThunkInfo<'a>>,
    /// Predicate thunk descriptors.
    pub predicates: Vec<ThunkInfo<'a>>,
    /// Per-word index into `strings` naming the enclosing rule (the
    /// display name when the rule has one); None for the bootstrap
    /// prologue.
    pub instr_to_rule: Vec<Option<u16>>,
    /// Grammar initializer text, carried for code emitters.
    pub init: Option<&'a str>,
    /// (entry, exit) word indices of negative-lookahead blocks. The VM
    /// suppresses farthest-failure updates between them.
    pub(crate) not_spans: Vec<(u16, u16)>,
}

impl<'a> Program<'a> {
    /// Name of the rule at a diagnostics index, or "" for the bootstrap.
    pub fn rule_name_at(&self, ix: Option<u16>) -> &'a str {
        match ix {
            Some(ix) => self.strings.get(ix as usize).copied().unwrap_or(""),
            None => "",
        }
    }

    /// Rule-name index annotated on the instruction word at `at`.
    pub(crate) fn rule_ix_at(&self, at: usize) -> Option<u16> {
        self.instr_to_rule.get(at).copied().flatten()
    }

    /// Human-readable form of the instruction starting at `at`.
    pub fn instr_to_string(&self, at: usize) -> String {
        use fmt::Write;

        let word = self.instrs[at];
        let Some(op) = opcode(word) else {
            return format!("??? ({:#018x})", word);
        };
        let args: Vec<u16> = (0..arg_count(word))
            .map(|i| arg(&self.instrs, at, i))
            .collect();

        let rule = match self.rule_ix_at(at) {
            Some(ix) => self.rule_name_at(Some(ix)),
            None => "<bootstrap>",
        };

        let mut out = String::new();
        let _ = write!(out, "{}.{} {:?}", rule, op, args);
        match op {
            Op::Push | Op::Pop => {
                let _ = write!(out, " {}", stack_name(args[0] as usize));
            }
            Op::Match => {
                if let Some(m) = self.matchers.get(args[0] as usize) {
                    let _ = write!(out, " {}", m);
                }
            }
            Op::StoreIfT => {
                if let Some(label) = self.strings.get(args[0] as usize) {
                    let _ = write!(out, " {}", label);
                }
            }
            _ => {}
        }
        out
    }
}

impl fmt::Display for Program<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut at = 0;
        while at < self.instrs.len() {
            writeln!(f, "[{:3}]: {}", at, self.instr_to_string(at))?;
            at += instr_len(self.instrs[at]);
        }
        Ok(())
    }
}
