//! The console scripting language.
//!
//! A script is plain text, one line per step:
//!
//! - ordinary lines are typed into the VM followed by Enter
//! - `NAME=value` binds a variable
//! - `<...>` lines are directives: keys, waits, screen-gated conditionals
//!   and loops, switches, functions and includes
//! - `#` starts a comment
//!
//! # Quick start
//!
//! ```rust
//! use vmscript::mode::DryRunMode;
//! use vmscript::script::{Executor, ExecutorSettings, Parser};
//!
//! let mut parser = Parser::new();
//! let script = parser.parse("USER=root\n<watch \"login:\">\n$USER\n").unwrap();
//! let mut exec = Executor::new(DryRunMode::new(), parser.into_expander(), ExecutorSettings::default());
//! let result = exec.execute(&script);
//! assert!(result.success);
//! assert!(exec.mode().narration().iter().any(|l| l.contains("\"root\"")));
//! ```

pub mod directive;
pub mod expand;
pub mod interp;
pub mod parse;
pub mod stmt;
pub mod validate;

// Re-exports for convenience.
pub use expand::Expander;
pub use interp::{ExecError, ExecutionResult, Executor, ExecutorSettings};
pub use parse::{ParseError, Parser};
pub use stmt::{Directive, LineType, ParsedLine, Script};
pub use validate::{validate_script, Issue, Severity};
