//! pegvm: a PEG-to-bytecode compiler and parsing virtual machine.
//!
//! Instead of recursive descent over the grammar tree, the grammar is
//! compiled to a flat sequence of instructions for a small stack machine
//! and parsing is performed by interpreting that program. Host-stack depth
//! stays constant no matter how deeply the grammar nests; grammar
//! recursion becomes data on the VM's instruction-index stack. Instruction
//! indices also give memoization and farthest-failure diagnostics a stable
//! key.
//!
//! # Pipeline
//!
//! ```text
//! Grammar AST -> compile() -> Program -> VmParser::parse -> (value, errors)
//! ```
//!
//! The grammar front-end that turns PEG source text into a [`Grammar`] and
//! the emission of parser source around a compiled program are external
//! collaborators; this crate consumes structural grammars directly.
//!
//! # Example
//!
//! ```ignore
//! let arena = Bump::new();
//! let rules = [Rule { name: "A", display_name: None, expr: lit }];
//! let grammar = Grammar { initializer: None, rules: &rules };
//! let program = compile(&arena, &grammar)?;
//! let parser = VmParser::new(&program, vec![], vec![]);
//! let value = parser.parse("input.txt", b"a", &ParseOptions::default())?;
//! ```

mod charset;
pub mod compiler;
pub mod cursor;
pub mod error;
pub mod grammar;
pub mod instruction;
pub mod matcher;
pub mod program;
mod stacks;
mod unicode;
pub mod value;
pub mod vm;

// Re-export from pegvm-common.
pub use common::{create_logger, Logger};

pub use compiler::compile;
pub use cursor::{Position, Savepoint};
pub use error::{CompileError, ErrorCause, ErrorList, ParserError, ThunkError};
pub use grammar::{CharClassExpr, Expr, Grammar, Rule};
pub use matcher::Matcher;
pub use program::{Program, ThunkInfo};
pub use value::{ArgsSet, Current, Value};
pub use vm::{ActionFn, ParseOptions, PredicateFn, VmParser};
