//! Grammar-to-bytecode compiler.
//!
//! Every expression compiles to a self-contained instruction block: entered
//! with its return address on the I stack, it leaves exactly one value on
//! the V stack (a match value or the failure sentinel) and returns by
//! popping I. Child blocks are emitted before the block that dispatches to
//! them, so a parent always knows its children's entry indices; only rule
//! references need patching, since a rule may be referenced before it is
//! compiled.

use bumpalo::Bump;
use common::debug::{create_logger, Logger};
use common::log_detail;
use hashbrown::HashMap;

use crate::error::CompileError;
use crate::grammar::{Expr, Grammar};
use crate::instruction::{
    encode, patch_arg, Op, A_STACK, I_STACK, L_STACK, P_STACK, V_EMPTY, V_FAILED, V_NIL,
    V_STACK,
};
use crate::matcher::Matcher;
use crate::program::{Program, ThunkInfo};

/// Compile a grammar into a program. The returned program borrows the
/// grammar's arena for its interned strings and matchers.
pub fn compile<'a>(arena: &'a Bump, grammar: &Grammar<'a>) -> Result<Program<'a>, CompileError> {
    if grammar.rules.is_empty() {
        return Err(CompileError::NoRule);
    }

    let mut compiler = Compiler {
        arena,
        instrs: Vec::new(),
        instr_to_rule: Vec::new(),
        matchers: Vec::new(),
        strings: Vec::new(),
        actions: Vec::new(),
        predicates: Vec::new(),
        not_spans: Vec::new(),
        rule_entries: HashMap::new(),
        rule_fixups: Vec::new(),
        cur_rule_ix: None,
        cur_rule_name: "",
        expr_ordinal: 0,
        scopes: Vec::new(),
        log: create_logger("pegcompile"),
    };

    // Bootstrap prologue: call the start rule, then exit with its value.
    // The entry index is patched once the first rule is compiled.
    compiler.emit(Op::Push, &[I_STACK, 0])?;
    compiler.emit(Op::Push, &[A_STACK])?;
    compiler.emit(Op::Call, &[])?;
    compiler.emit(Op::Exit, &[])?;

    for rule in grammar.rules {
        let name_ix = compiler.intern_string(rule.name);
        let diag_ix = match rule.display_name {
            Some(display) => compiler.intern_string(display),
            None => name_ix,
        };
        compiler.cur_rule_ix = Some(diag_ix as u16);
        compiler.cur_rule_name = rule.name;
        compiler.expr_ordinal = 0;
        compiler.scopes = vec![Vec::new()];

        let entry = compiler.compile_expr(&rule.expr)?;
        log_detail!(compiler.log, "rule {} entry [{}]", rule.name, entry);
        compiler.rule_entries.entry(rule.name).or_insert(entry);
    }

    // Start rule is the first declared rule.
    let start = compiler.rule_entries[grammar.rules[0].name];
    patch_arg(&mut compiler.instrs, 0, 1, start);

    // Resolve forward rule references.
    for (at, name) in std::mem::take(&mut compiler.rule_fixups) {
        let entry = *compiler
            .rule_entries
            .get(name)
            .ok_or_else(|| CompileError::UndefinedRule(name.to_string()))?;
        patch_arg(&mut compiler.instrs, at, 1, entry);
    }

    Ok(Program {
        instrs: compiler.instrs,
        matchers: compiler.matchers,
        strings: compiler.strings,
        actions: compiler.actions,
        predicates: compiler.predicates,
        instr_to_rule: compiler.instr_to_rule,
        init: grammar.initializer,
        not_spans: compiler.not_spans,
    })
}

struct Compiler<'a> {
    arena: &'a Bump,
    instrs: Vec<u64>,
    instr_to_rule: Vec<Option<u16>>,
    matchers: Vec<Matcher<'a>>,
    strings: Vec<&'a str>,
    actions: Vec<ThunkInfo<'a>>,
    predicates: Vec<ThunkInfo<'a>>,
    not_spans: Vec<(u16, u16)>,
    rule_entries: HashMap<&'a str, u16>,
    /// Word index of a rule-ref Push I whose target is patched at the end.
    rule_fixups: Vec<(usize, &'a str)>,

    // Per-rule state.
    cur_rule_ix: Option<u16>,
    cur_rule_name: &'a str,
    expr_ordinal: usize,
    /// Label scope frames, mirroring the runtime A-frame discipline.
    scopes: Vec<Vec<&'a str>>,

    log: Logger,
}

impl<'a> Compiler<'a> {
    /// Emit one instruction, returning the word index of its first word.
    fn emit(&mut self, op: Op, args: &[usize]) -> Result<u16, CompileError> {
        let at = self.instrs.len();
        let words = encode(op, args)?;
        for _ in 0..words.len() {
            self.instr_to_rule.push(self.cur_rule_ix);
        }
        self.instrs.extend(words);
        u16::try_from(at).map_err(|_| CompileError::EncodingOverflow)
    }

    fn here(&self) -> Result<u16, CompileError> {
        u16::try_from(self.instrs.len()).map_err(|_| CompileError::EncodingOverflow)
    }

    fn patch(&mut self, at: u16, arg_ix: usize, target: u16) {
        patch_arg(&mut self.instrs, at as usize, arg_ix, target);
    }

    fn intern_string(&mut self, s: &'a str) -> usize {
        match self.strings.iter().position(|&existing| existing == s) {
            Some(ix) => ix,
            None => {
                self.strings.push(s);
                self.strings.len() - 1
            }
        }
    }

    fn intern_matcher(&mut self, m: Matcher<'a>) -> usize {
        match self.matchers.iter().position(|existing| *existing == m) {
            Some(ix) => ix,
            None => {
                self.matchers.push(m);
                self.matchers.len() - 1
            }
        }
    }

    fn scope_mut(&mut self) -> &mut Vec<&'a str> {
        self.scopes.last_mut().expect("label scope underflow")
    }

    fn current_params(&self) -> Vec<&'a str> {
        self.scopes.last().cloned().unwrap_or_default()
    }

    /// Compile one expression block, returning its entry index.
    fn compile_expr(&mut self, expr: &Expr<'a>) -> Result<u16, CompileError> {
        self.expr_ordinal += 1;
        let ordinal = self.expr_ordinal;

        match *expr {
            Expr::AnyMatcher => {
                let ix = self.intern_matcher(Matcher::Any);
                self.emit_matcher_block(ix)
            }
            Expr::LitMatcher { value, ignore_case } => {
                let m = Matcher::literal(self.arena, value, ignore_case);
                let ix = self.intern_matcher(m);
                self.emit_matcher_block(ix)
            }
            Expr::CharClassMatcher(class) => {
                let m = Matcher::char_class(self.arena, class)?;
                let ix = self.intern_matcher(m);
                self.emit_matcher_block(ix)
            }

            Expr::RuleRef(name) => {
                let start = self.emit(Op::Push, &[I_STACK, 0])?;
                self.rule_fixups.push((start as usize, name));
                self.emit(Op::Push, &[A_STACK])?;
                self.emit(Op::Call, &[])?;
                self.emit(Op::Pop, &[A_STACK])?;
                self.emit(Op::Return, &[])?;
                Ok(start)
            }

            Expr::Sequence(children) => {
                // Labels bound by children stay in the enclosing frame.
                let mut entries = Vec::with_capacity(children.len());
                for child in children {
                    entries.push(self.compile_expr(child)? as usize);
                }
                let start = self.emit(Op::Push, &[P_STACK])?;
                self.emit(Op::Push, &[V_STACK, V_FAILED])?;
                let mut push_args = vec![L_STACK];
                push_args.extend(entries);
                self.emit(Op::Push, &push_args)?;
                let take = self.emit(Op::TakeLOrJump, &[0])?;
                self.emit(Op::Call, &[])?;
                self.emit(Op::CumulOrF, &[])?;
                let fail = self.emit(Op::JumpIfF, &[0])?;
                self.emit(Op::Jump, &[take as usize])?;
                let end = self.here()?;
                self.patch(take, 0, end);
                self.patch(fail, 0, end);
                self.emit(Op::Pop, &[L_STACK])?;
                self.emit(Op::RestoreIfF, &[])?;
                self.emit(Op::Return, &[])?;
                Ok(start)
            }

            Expr::Choice(alternatives) => {
                let mut entries = Vec::with_capacity(alternatives.len());
                for alt in alternatives {
                    // Each alternative binds labels into its own frame.
                    self.scopes.push(Vec::new());
                    let entry = self.compile_expr(alt);
                    self.scopes.pop();
                    entries.push(entry? as usize);
                }
                let mut push_args = vec![L_STACK];
                push_args.extend(entries);
                let start = self.emit(Op::Push, &push_args)?;
                let take = self.emit(Op::TakeLOrJump, &[0])?;
                self.emit(Op::Push, &[A_STACK])?;
                self.emit(Op::Call, &[])?;
                self.emit(Op::Pop, &[A_STACK])?;
                let done = self.emit(Op::JumpIfT, &[0])?;
                // Drop the losing alternative's failure before retrying,
                // keeping the block net +1 on the V stack.
                self.emit(Op::Pop, &[V_STACK])?;
                self.emit(Op::Jump, &[take as usize])?;
                let exhausted = self.here()?;
                self.patch(take, 0, exhausted);
                self.emit(Op::Push, &[V_STACK, V_FAILED])?;
                let end = self.here()?;
                self.patch(done, 0, end);
                self.emit(Op::Pop, &[L_STACK])?;
                self.emit(Op::Return, &[])?;
                Ok(start)
            }

            Expr::ZeroOrMore(child) => self.emit_repetition(child, V_EMPTY),
            Expr::OneOrMore(child) => self.emit_repetition(child, V_FAILED),

            Expr::Optional(child) => {
                self.scopes.push(Vec::new());
                let entry = self.compile_expr(child);
                self.scopes.pop();
                let entry = entry? as usize;
                let start = self.emit(Op::Push, &[I_STACK, entry])?;
                self.emit(Op::Push, &[A_STACK])?;
                self.emit(Op::Call, &[])?;
                self.emit(Op::Pop, &[A_STACK])?;
                let missing = self.emit(Op::PopVJumpIfF, &[0])?;
                self.emit(Op::Return, &[])?;
                let nil = self.here()?;
                self.patch(missing, 0, nil);
                self.emit(Op::Push, &[V_STACK, V_NIL])?;
                self.emit(Op::Return, &[])?;
                Ok(start)
            }

            Expr::And(child) => self.emit_predicate(child, true),
            Expr::Not(child) => self.emit_predicate(child, false),

            Expr::AndCode(code) => self.emit_code_predicate(code, ordinal, true),
            Expr::NotCode(code) => self.emit_code_predicate(code, ordinal, false),

            Expr::Labeled { label, expr } => {
                // The child gets its own frame, so labels bound inside it
                // are invisible once this binding is made.
                self.scopes.push(Vec::new());
                let entry = self.compile_expr(expr);
                self.scopes.pop();
                let entry = entry? as usize;
                let label_ix = self.intern_string(label);
                let start = self.emit(Op::Push, &[I_STACK, entry])?;
                self.emit(Op::Push, &[A_STACK])?;
                self.emit(Op::Call, &[])?;
                self.emit(Op::Pop, &[A_STACK])?;
                self.emit(Op::StoreIfT, &[label_ix])?;
                self.emit(Op::Return, &[])?;
                let scope = self.scope_mut();
                if !scope.contains(&label) {
                    scope.push(label);
                }
                Ok(start)
            }

            Expr::Action { expr, code } => {
                let entry = self.compile_expr(expr)? as usize;
                let action_ix = self.actions.len();
                self.actions.push(ThunkInfo {
                    rule_name: self.cur_rule_name,
                    expr_ix: ordinal,
                    params: self.current_params(),
                    code,
                });
                let start = self.emit(Op::Push, &[P_STACK])?;
                self.emit(Op::Push, &[I_STACK, entry])?;
                self.emit(Op::Call, &[])?;
                let fail = self.emit(Op::JumpIfF, &[0])?;
                self.emit(Op::CallA, &[action_ix])?;
                self.emit(Op::Return, &[])?;
                let discard = self.here()?;
                self.patch(fail, 0, discard);
                self.emit(Op::Pop, &[P_STACK])?;
                self.emit(Op::Return, &[])?;
                Ok(start)
            }
        }
    }

    fn emit_matcher_block(&mut self, matcher_ix: usize) -> Result<u16, CompileError> {
        let start = self.emit(Op::Push, &[P_STACK])?;
        self.emit(Op::Match, &[matcher_ix])?;
        self.emit(Op::RestoreIfF, &[])?;
        self.emit(Op::Return, &[])?;
        Ok(start)
    }

    fn emit_repetition(&mut self, child: &Expr<'a>, seed: usize) -> Result<u16, CompileError> {
        self.scopes.push(Vec::new());
        let entry = self.compile_expr(child);
        self.scopes.pop();
        let entry = entry? as usize;
        let start = self.emit(Op::Push, &[V_STACK, seed])?;
        let loop_at = self.emit(Op::Push, &[I_STACK, entry])?;
        self.emit(Op::Push, &[A_STACK])?;
        self.emit(Op::Call, &[])?;
        self.emit(Op::Pop, &[A_STACK])?;
        let done = self.emit(Op::PopVJumpIfF, &[0])?;
        self.emit(Op::CumulOrF, &[])?;
        self.emit(Op::Jump, &[loop_at as usize])?;
        let end = self.here()?;
        self.patch(done, 0, end);
        self.emit(Op::Return, &[])?;
        Ok(start)
    }

    fn emit_predicate(&mut self, child: &Expr<'a>, and: bool) -> Result<u16, CompileError> {
        self.scopes.push(Vec::new());
        let entry = self.compile_expr(child);
        self.scopes.pop();
        let entry = entry? as usize;
        let start = self.emit(Op::Push, &[P_STACK])?;
        self.emit(Op::Push, &[I_STACK, entry])?;
        self.emit(Op::Push, &[A_STACK])?;
        self.emit(Op::Call, &[])?;
        self.emit(Op::Pop, &[A_STACK])?;
        self.emit(if and { Op::NilIfT } else { Op::NilIfF }, &[])?;
        let restore = self.emit(Op::Restore, &[])?;
        self.emit(Op::Return, &[])?;
        if !and {
            self.not_spans.push((start, restore));
        }
        Ok(start)
    }

    fn emit_code_predicate(
        &mut self,
        code: &'a str,
        ordinal: usize,
        and: bool,
    ) -> Result<u16, CompileError> {
        let pred_ix = self.predicates.len();
        self.predicates.push(ThunkInfo {
            rule_name: self.cur_rule_name,
            expr_ix: ordinal,
            params: self.current_params(),
            code,
        });
        let start = self.emit(Op::CallB, &[pred_ix])?;
        self.emit(if and { Op::NilIfT } else { Op::NilIfF }, &[])?;
        self.emit(Op::Return, &[])?;
        Ok(start)
    }
}
