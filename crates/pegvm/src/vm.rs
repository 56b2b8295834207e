//! The parsing virtual machine.
//!
//! One VM executes one parse: it owns the five stacks, the input cursor,
//! the memoization table and the farthest-failure record. The compiled
//! program is shared and read-only. Dispatch is a flat fetch/advance/
//! execute loop; grammar recursion lives on the I stack, never on the
//! host call stack.

use std::io::{self, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};

use common::debug::{create_logger, Logger};
use common::log;
use hashbrown::HashMap;

use crate::cursor::{Cursor, Position, Savepoint};
use crate::error::{ErrorCause, ErrorList, ParserError, ThunkError};
use crate::instruction::{
    arg, arg_count, instr_len, opcode, Op, A_STACK, I_STACK, L_STACK, P_STACK, V_EMPTY,
    V_FAILED, V_NIL, V_STACK,
};
use crate::program::Program;
use crate::stacks::{AStack, IStack, LStack, LoopList, PStack, VStack};
use crate::value::{ArgsSet, Current, Value};

/// An action thunk: receives the current match state and the label
/// bindings in scope, returns the expression's value.
pub type ActionFn =
    Box<dyn for<'i> Fn(&Current<'i>, &ArgsSet<'i>) -> Result<Value<'i>, ThunkError>>;

/// A predicate thunk: same inputs as an action, returns whether the
/// predicate holds. `current.text` is always empty.
pub type PredicateFn =
    Box<dyn for<'i> Fn(&Current<'i>, &ArgsSet<'i>) -> Result<bool, ThunkError>>;

/// Runtime options for a parse.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Dump the program and execution snapshots to stderr.
    pub debug: bool,
    /// Cache matcher results, guaranteeing linear parse time at the cost
    /// of memory proportional to input length times matcher instructions.
    pub memoize: bool,
    /// Convert panics raised in thunks into recorded errors. Disable to
    /// get the full backtrace while debugging a grammar's code blocks.
    pub recover: bool,
}

impl Default for ParseOptions {
    fn default() -> ParseOptions {
        ParseOptions {
            debug: false,
            memoize: false,
            recover: true,
        }
    }
}

/// Host-facing parser: a compiled program plus the callable tables built
/// from its thunk descriptors. One `VmParser` serves any number of
/// sequential parses; each parse runs a fresh VM.
pub struct VmParser<'a> {
    program: &'a Program<'a>,
    actions: Vec<ActionFn>,
    predicates: Vec<PredicateFn>,
}

impl<'a> VmParser<'a> {
    pub fn new(
        program: &'a Program<'a>,
        actions: Vec<ActionFn>,
        predicates: Vec<PredicateFn>,
    ) -> VmParser<'a> {
        VmParser {
            program,
            actions,
            predicates,
        }
    }

    /// Parse `data`, using `filename` in error messages. Returned byte
    /// values alias `data`.
    pub fn parse<'i>(
        &self,
        filename: &str,
        data: &'i [u8],
        opts: &ParseOptions,
    ) -> Result<Value<'i>, ErrorList> {
        let mut vm = Vm::new(
            self.program,
            &self.actions,
            &self.predicates,
            filename,
            data,
            opts,
        );
        vm.run()
    }

    /// Parse the contents of the file at `path`.
    pub fn parse_file(&self, path: &str, opts: &ParseOptions) -> Result<Value<'static>, ErrorList> {
        match std::fs::File::open(path) {
            Ok(file) => self.parse_reader(path, file, opts),
            Err(err) => Err(io_error_list(path, err)),
        }
    }

    /// Buffer `reader` fully, then parse. The result is converted to an
    /// owned value since the buffer does not outlive the call.
    pub fn parse_reader(
        &self,
        filename: &str,
        mut reader: impl io::Read,
        opts: &ParseOptions,
    ) -> Result<Value<'static>, ErrorList> {
        let mut data = Vec::new();
        if let Err(err) = reader.read_to_end(&mut data) {
            return Err(io_error_list(filename, err));
        }
        self.parse(filename, &data, opts).map(Value::into_owned)
    }
}

fn io_error_list(filename: &str, err: io::Error) -> ErrorList {
    let mut errs = ErrorList::default();
    errs.add(ParserError {
        cause: ErrorCause::Io(err),
        pos: Position::start(),
        prefix: filename.to_string(),
    });
    errs
}

/// Farthest failure record.
struct Ffp {
    pos: Position,
    rule_ix: Option<u16>,
    rn: char,
    want: String,
}

#[derive(Clone)]
struct MemoEntry<'i> {
    value: Value<'i>,
    end: Savepoint,
}

#[derive(Default)]
struct Stats {
    matches: usize,
    calls: usize,
    actions: usize,
    predicates: usize,
}

enum Invoked<T> {
    Returned(T),
    Panicked(String),
}

fn invoke<T>(recover: bool, f: impl FnOnce() -> T) -> Invoked<T> {
    if !recover {
        return Invoked::Returned(f());
    }
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(v) => Invoked::Returned(v),
        Err(payload) => Invoked::Panicked(panic_message(payload)),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic in user code".to_string()
    }
}

struct Vm<'p, 'i> {
    program: &'p Program<'p>,
    actions: &'p [ActionFn],
    predicates: &'p [PredicateFn],

    filename: String,
    opts: ParseOptions,

    cursor: Cursor<'i>,
    cur: Current<'i>,
    pc: usize,

    p: PStack,
    i: IStack,
    v: VStack<'i>,
    l: LStack,
    a: AStack<'i>,

    /// Memoized matcher results, by instruction index then byte offset.
    memo: HashMap<u16, HashMap<usize, MemoEntry<'i>>>,
    ffp: Option<Ffp>,

    /// Negative-lookahead nesting; matcher failures inside do not move
    /// the farthest-failure position.
    not_depth: usize,
    not_entries: Vec<u16>,
    not_exits: Vec<u16>,

    stats: Stats,
    errs: ErrorList,
    log: Logger,
}

impl<'p, 'i> Vm<'p, 'i> {
    fn new(
        program: &'p Program<'p>,
        actions: &'p [ActionFn],
        predicates: &'p [PredicateFn],
        filename: &str,
        data: &'i [u8],
        opts: &ParseOptions,
    ) -> Vm<'p, 'i> {
        Vm {
            program,
            actions,
            predicates,
            filename: filename.to_string(),
            opts: opts.clone(),
            cursor: Cursor::new(data),
            cur: Current {
                pos: Position::start(),
                text: &[],
            },
            pc: 0,
            p: PStack::default(),
            i: IStack::default(),
            v: VStack::default(),
            l: LStack::default(),
            a: AStack::default(),
            memo: HashMap::new(),
            ffp: None,
            not_depth: 0,
            not_entries: program.not_spans.iter().map(|span| span.0).collect(),
            not_exits: program.not_spans.iter().map(|span| span.1).collect(),
            stats: Stats::default(),
            errs: ErrorList::default(),
            log: create_logger("pegvm"),
        }
    }

    fn run(&mut self) -> Result<Value<'i>, ErrorList> {
        if self.opts.debug {
            eprintln!("{}", self.program);
        }
        log!(
            self.log,
            "parse {:?} ({} bytes)",
            self.filename,
            self.cursor.data.len()
        );

        let outcome = self.dispatch();

        if self.opts.debug {
            eprintln!(
                "stats: {} matches, {} calls, {} actions, {} predicates",
                self.stats.matches, self.stats.calls, self.stats.actions, self.stats.predicates
            );
        }

        let value = match outcome {
            Ok(value) => value,
            Err(cause) => {
                let pos = self.cursor.pt.pos;
                self.add_err_at(cause, None, pos);
                return Err(self.take_errs());
            }
        };

        if value.failed() {
            if self.errs.is_empty() {
                match self.ffp.take() {
                    Some(ffp) => self.add_err_at(
                        ErrorCause::Expected {
                            want: ffp.want,
                            got: ffp.rn,
                        },
                        ffp.rule_ix,
                        ffp.pos,
                    ),
                    None => {
                        let pos = self.cursor.pt.pos;
                        self.add_err_at(ErrorCause::NoMatch, None, pos);
                    }
                }
            }
            return Err(self.take_errs());
        }

        if !self.errs.is_empty() {
            return Err(self.take_errs());
        }

        debug_assert!(
            self.v.len() == 0
                && self.i.len() == 0
                && self.p.len() == 0
                && self.l.len() == 0
                && self.a.len() == 1,
            "stack imbalance at exit: V={} I={} P={} L={} A={}",
            self.v.len(),
            self.i.len(),
            self.p.len(),
            self.l.len(),
            self.a.len()
        );
        Ok(value)
    }

    fn take_errs(&mut self) -> ErrorList {
        let mut errs = std::mem::take(&mut self.errs);
        errs.dedupe();
        errs
    }

    /// The dispatch loop. Terminates only via Exit or a fatal decode
    /// error; everything else is data on the stacks.
    fn dispatch(&mut self) -> Result<Value<'i>, ErrorCause> {
        let program = self.program;

        // Prime the cursor with the first rune.
        self.cursor.read()?;

        loop {
            let at = self.pc;
            let word = program.instrs[at];
            let Some(op) = opcode(word) else {
                panic!("unknown opcode in instruction at {}", at);
            };
            self.pc = at + instr_len(word);

            match op {
                Op::Exit => return Ok(self.v.pop()),

                Op::Call => {
                    if self.opts.debug {
                        self.dump_snapshot(at);
                    }
                    let target = self.i.pop();
                    self.i.push(self.pc as u16);
                    self.pc = target as usize;
                    self.stats.calls += 1;
                }

                Op::Return => {
                    self.pc = self.i.pop() as usize;
                }

                Op::Jump => {
                    self.pc = arg(&program.instrs, at, 0) as usize;
                }

                Op::JumpIfF => {
                    if self.v.peek().failed() {
                        self.pc = arg(&program.instrs, at, 0) as usize;
                    }
                }

                Op::JumpIfT => {
                    if !self.v.peek().failed() {
                        self.pc = arg(&program.instrs, at, 0) as usize;
                    }
                }

                Op::PopVJumpIfF => {
                    if self.v.peek().failed() {
                        self.v.pop();
                        self.pc = arg(&program.instrs, at, 0) as usize;
                    }
                }

                Op::Push => {
                    let stack = arg(&program.instrs, at, 0) as usize;
                    match stack {
                        P_STACK => {
                            self.p.push(self.cursor.pt);
                            if self.not_entries.binary_search(&(at as u16)).is_ok() {
                                self.not_depth += 1;
                            }
                        }
                        I_STACK => self.i.push(arg(&program.instrs, at, 1)),
                        V_STACK => {
                            let code = arg(&program.instrs, at, 1) as usize;
                            let value = match code {
                                V_NIL => Value::Nil,
                                V_FAILED => Value::Failed,
                                V_EMPTY => Value::EmptySeq,
                                _ => panic!("invalid push V stack argument: {}", code),
                            };
                            self.v.push(value);
                        }
                        A_STACK => self.a.push(),
                        L_STACK => self.l.push(LoopList {
                            at: at as u16,
                            taken: 0,
                        }),
                        _ => panic!("invalid push argument: {}", stack),
                    }
                }

                Op::Pop => {
                    let stack = arg(&program.instrs, at, 0) as usize;
                    match stack {
                        P_STACK => {
                            self.p.pop();
                        }
                        L_STACK => {
                            self.l.pop();
                        }
                        V_STACK => {
                            self.v.pop();
                        }
                        A_STACK => self.a.pop(),
                        _ => panic!("invalid pop argument: {}", stack),
                    }
                }

                Op::Restore => {
                    let pt = self.p.pop();
                    self.cursor.restore(pt);
                    if self.not_exits.binary_search(&(at as u16)).is_ok() {
                        self.not_depth = self.not_depth.saturating_sub(1);
                    }
                }

                Op::RestoreIfF => {
                    let pt = self.p.pop();
                    if self.v.peek().failed() {
                        self.cursor.restore(pt);
                    }
                }

                Op::Match => self.do_match(at)?,

                Op::CumulOrF => {
                    let child = self.v.pop();
                    let acc = self.v.pop();
                    if child.failed() {
                        self.v.push(Value::Failed);
                    } else {
                        match acc {
                            Value::List(mut items) => {
                                items.push(child);
                                self.v.push(Value::List(items));
                            }
                            // First cumulation: either repetition seed.
                            Value::EmptySeq | Value::Failed => {
                                self.v.push(Value::List(vec![child]));
                            }
                            other => panic!(
                                "invalid cumulOrF accumulator on the V stack: {:?}",
                                other
                            ),
                        }
                    }
                }

                Op::NilIfT => {
                    let top = self.v.pop();
                    self.v.push(if !top.failed() {
                        Value::Nil
                    } else {
                        Value::Failed
                    });
                }

                Op::NilIfF => {
                    let top = self.v.pop();
                    self.v.push(if top.failed() {
                        Value::Nil
                    } else {
                        Value::Failed
                    });
                }

                Op::StoreIfT => {
                    if !self.v.peek().failed() {
                        let value = self.v.peek().clone();
                        let string_ix = arg(&program.instrs, at, 0) as usize;
                        let Some(label) = program.strings.get(string_ix) else {
                            panic!("invalid storeIfT argument: {}", string_ix);
                        };
                        self.a.peek_mut().bind(label, value);
                    }
                }

                Op::TakeLOrJump => match self.take_l() {
                    Some(ix) => self.i.push(ix),
                    None => {
                        self.pc = arg(&program.instrs, at, 0) as usize;
                    }
                },

                Op::CallA => self.call_action(at),
                Op::CallB => self.call_predicate(at),
            }
        }
    }

    /// Take the next entry from the list at the top of the L stack, or
    /// None when it is exhausted. The list itself stays on the stack.
    fn take_l(&mut self) -> Option<u16> {
        let program = self.program;
        let list = self.l.peek_mut();
        let push_at = list.at as usize;
        // Argument 0 of the Push is the stack id; entries follow.
        let next = list.taken as usize + 1;
        if next >= arg_count(program.instrs[push_at]) {
            return None;
        }
        list.taken += 1;
        Some(arg(&program.instrs, push_at, next))
    }

    fn do_match(&mut self, at: usize) -> Result<(), ErrorCause> {
        let program = self.program;
        let start = self.cursor.pt;

        if self.opts.memoize && self.from_memo(at as u16, &start) {
            return Ok(());
        }

        let matcher_ix = arg(&program.instrs, at, 0) as usize;
        let Some(matcher) = program.matchers.get(matcher_ix) else {
            panic!("invalid match argument: {}", matcher_ix);
        };
        let matched = matcher.matches(&mut self.cursor)?;
        if self.opts.memoize {
            self.memoize(at as u16, start, matched);
        }
        self.stats.matches += 1;

        if matched {
            let text = self.cursor.slice_from(&start);
            self.v.push(Value::bytes(text));
            return Ok(());
        }

        // Record the farthest failure, except inside negative lookahead
        // where failing is the desired outcome.
        if self.not_depth == 0
            && self
                .ffp
                .as_ref()
                .is_none_or(|ffp| start.pos.offset > ffp.pos.offset)
        {
            self.ffp = Some(Ffp {
                pos: start.pos,
                rule_ix: program.rule_ix_at(at),
                rn: start.rn,
                want: matcher.to_string(),
            });
        }

        self.v.push(Value::Failed);
        self.cursor.restore(start);
        if self.opts.debug {
            self.dump_snapshot(at);
        }
        Ok(())
    }

    fn from_memo(&mut self, ix: u16, start: &Savepoint) -> bool {
        let entry = self
            .memo
            .get(&ix)
            .and_then(|by_offset| by_offset.get(&start.pos.offset));
        match entry {
            Some(entry) => {
                let entry = entry.clone();
                self.cursor.restore(entry.end);
                self.v.push(entry.value);
                true
            }
            None => false,
        }
    }

    fn memoize(&mut self, ix: u16, start: Savepoint, matched: bool) {
        let entry = if matched {
            MemoEntry {
                value: Value::bytes(self.cursor.slice_from(&start)),
                end: self.cursor.pt,
            }
        } else {
            MemoEntry {
                value: Value::Failed,
                end: start,
            }
        };
        self.memo
            .entry(ix)
            .or_default()
            .insert(start.pos.offset, entry);
    }

    fn call_action(&mut self, at: usize) {
        if self.opts.debug {
            self.dump_snapshot(at);
        }
        let program = self.program;

        // Discard the child's value; the action's return replaces it.
        self.v.pop();
        let start = self.p.pop();
        self.cur.pos = start.pos;
        self.cur.text = self.cursor.slice_from(&start);

        let action_ix = arg(&program.instrs, at, 0) as usize;
        let Some(thunk) = self.actions.get(action_ix) else {
            panic!("invalid callA argument: {}", action_ix);
        };
        let cur = self.cur;
        let recover = self.opts.recover;
        let outcome = {
            let frame = self.a.peek();
            invoke(recover, || thunk(&cur, frame))
        };

        let value = match outcome {
            Invoked::Returned(Ok(value)) => value,
            Invoked::Returned(Err(err)) => {
                self.add_err_at(ErrorCause::User(err), program.rule_ix_at(at), start.pos);
                Value::Nil
            }
            Invoked::Panicked(msg) => {
                let pos = self.cursor.pt.pos;
                self.add_err_at(ErrorCause::Panic(msg), program.rule_ix_at(at), pos);
                Value::Nil
            }
        };
        self.v.push(value);
        self.stats.actions += 1;
    }

    fn call_predicate(&mut self, at: usize) {
        if self.opts.debug {
            self.dump_snapshot(at);
        }
        let program = self.program;

        self.cur.pos = self.cursor.pt.pos;
        self.cur.text = &[];

        let pred_ix = arg(&program.instrs, at, 0) as usize;
        let Some(thunk) = self.predicates.get(pred_ix) else {
            panic!("invalid callB argument: {}", pred_ix);
        };
        let cur = self.cur;
        let recover = self.opts.recover;
        let outcome = {
            let frame = self.a.peek();
            invoke(recover, || thunk(&cur, frame))
        };
        self.stats.predicates += 1;

        let value = match outcome {
            Invoked::Returned(Ok(true)) => Value::Nil,
            Invoked::Returned(Ok(false)) => Value::Failed,
            Invoked::Returned(Err(err)) => {
                let pos = self.cursor.pt.pos;
                self.add_err_at(ErrorCause::User(err), program.rule_ix_at(at), pos);
                Value::Failed
            }
            Invoked::Panicked(msg) => {
                let pos = self.cursor.pt.pos;
                self.add_err_at(ErrorCause::Panic(msg), program.rule_ix_at(at), pos);
                Value::Nil
            }
        };
        self.v.push(value);
    }

    fn add_err_at(&mut self, cause: ErrorCause, rule_ix: Option<u16>, pos: Position) {
        let mut prefix = String::new();
        if !self.filename.is_empty() {
            prefix.push_str(&self.filename);
            prefix.push(':');
        }
        prefix.push_str(&pos.to_string());
        let rule = self.program.rule_name_at(rule_ix);
        if !rule.is_empty() {
            prefix.push_str(": rule ");
            prefix.push_str(rule);
        }
        self.errs.add(ParserError { cause, pos, prefix });
    }

    /// Dump the cursor, the five instructions around `at` (following the
    /// pending call target), and the stack depths.
    fn dump_snapshot(&self, at: usize) {
        let stderr = io::stderr();
        let mut out = stderr.lock();

        let pt = self.cursor.pt;
        if !self.filename.is_empty() {
            write!(out, "{}:", self.filename).ok();
        }
        writeln!(out, "{}: U+{:04X} {:?}", pt.pos, pt.rn as u32, pt.rn).ok();

        let mut ix = at;
        for _ in 0..5 {
            if ix >= self.program.instrs.len() {
                break;
            }
            let marker = if ix == at { '>' } else { '.' };
            writeln!(
                out,
                "{} [{:3}]: {}",
                marker,
                ix,
                self.program.instr_to_string(ix)
            )
            .ok();
            if opcode(self.program.instrs[ix]) == Some(Op::Call) {
                if let Some(target) = self.i.peek() {
                    ix = target as usize;
                    continue;
                }
            }
            ix += instr_len(self.program.instrs[ix]);
        }

        writeln!(
            out,
            "[ P:{} I:{} V:{} L:{} A:{} ]",
            self.p.len(),
            self.i.len(),
            self.v.len(),
            self.l.len(),
            self.a.len()
        )
        .ok();
    }
}
