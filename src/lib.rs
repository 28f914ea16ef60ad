// Declare modules publicly so they are part of the library interface
pub mod ast;
pub mod environment;
pub mod evaluator;
pub mod highlight;
pub mod lexer;
pub mod logging;
pub mod parser;
pub mod pretty_print;
pub mod primitives;
pub mod source;
pub mod stack;
pub mod types;

pub use ast::Program;
pub use environment::{EnvError, Environment};
pub use evaluator::{EvalError, EvalResult, Interpreter};
pub use lexer::{LexerError, Token, TokenKind, tokenize};
pub use parser::{ParseError, Parser, parse_str};
pub use source::Span;
pub use types::Value;

use thiserror::Error;
use tracing::instrument;

/// Any failure from lexing, parsing or running a program.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("Lex error: {0}")]
    Lex(#[from] LexerError),
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Runtime error: {0}")]
    Runtime(#[from] EvalError),
}

/// The category an [`Error`] belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    LexError,
    ParseError,
    DeclarationError,
    BindingError,
    TypeError,
    ArityError,
    CallTargetError,
    ControlEscapeError,
    RecursionError,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Lex(_) | Error::Parse(ParseError::LexerError(_)) => ErrorKind::LexError,
            Error::Parse(_) => ErrorKind::ParseError,
            Error::Runtime(eval_err) => match eval_err {
                EvalError::Env(EnvError::DuplicateBinding { .. } | EnvError::ReservedName { .. }) => {
                    ErrorKind::DeclarationError
                }
                EvalError::Env(
                    EnvError::UndeclaredVariable { .. } | EnvError::ConstAssignment { .. },
                ) => ErrorKind::BindingError,
                EvalError::Env(EnvError::TypeMismatch { .. }) | EvalError::TypeError { .. } => {
                    ErrorKind::TypeError
                }
                EvalError::Arity { .. } => ErrorKind::ArityError,
                EvalError::NotCallable { .. } => ErrorKind::CallTargetError,
                EvalError::ControlEscape { .. } => ErrorKind::ControlEscapeError,
                EvalError::RecursionLimit { .. } => ErrorKind::RecursionError,
            },
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Error::Lex(e) => e.span,
            Error::Parse(e) => e.span(),
            Error::Runtime(e) => e.span(),
        }
    }
}

/// A successfully run program and everything it printed.
#[derive(Debug)]
pub struct RunOutput {
    pub program: Program,
    pub output: Vec<String>,
}

/// Lexes, parses and runs `code` in a fresh interpreter, collecting printed lines.
pub fn run_source(code: &str) -> Result<RunOutput, Error> {
    let mut output = Vec::new();
    let program = run_source_with(code, |line| output.push(line.to_string()))?;
    Ok(RunOutput { program, output })
}

/// Like [`run_source`], but hands each printed line to `on_output` as it is produced.
#[instrument(level = "debug", skip_all, fields(len = code.len()))]
pub fn run_source_with(code: &str, on_output: impl FnMut(&str)) -> Result<Program, Error> {
    let tokens = tokenize(code)?;
    let program = Parser::new(tokens).parse_program()?;
    Interpreter::new(on_output).run(&program)?;
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_kind(code: &str) -> ErrorKind {
        match run_source(code) {
            Ok(result) => panic!("Expected '{}' to fail, got {:?}", code, result.output),
            Err(e) => e.kind(),
        }
    }

    #[test]
    fn test_run_source_collects_output() {
        let result = run_source("let x = 10; print(x);").unwrap();
        assert_eq!(result.output, vec!["10"]);
        assert_eq!(result.program.body.len(), 2);
    }

    #[test]
    fn test_run_source_with_streams_lines() {
        let mut seen = Vec::new();
        run_source_with("print 1; print 2;", |line| seen.push(line.to_string())).unwrap();
        assert_eq!(seen, vec!["1", "2"]);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(error_kind("let a = ~;"), ErrorKind::LexError);
        assert_eq!(error_kind("let = 1;"), ErrorKind::ParseError);
        assert_eq!(error_kind("1 = 1;"), ErrorKind::ParseError);
        assert_eq!(error_kind("let a; let a;"), ErrorKind::DeclarationError);
        assert_eq!(error_kind("print missing;"), ErrorKind::BindingError);
        assert_eq!(error_kind("const c = 1; c = 2;"), ErrorKind::BindingError);
        assert_eq!(error_kind("let n = 1; n = \"s\";"), ErrorKind::TypeError);
        assert_eq!(error_kind("print 1 - \"s\";"), ErrorKind::TypeError);
        assert_eq!(error_kind("function f(a) {} f();"), ErrorKind::ArityError);
        assert_eq!(error_kind("null();"), ErrorKind::CallTargetError);
        assert_eq!(error_kind("continue;"), ErrorKind::ControlEscapeError);
    }

    #[test]
    fn test_error_span_points_into_source() {
        let code = "let a = 1;\na();";
        let err = run_source(code).unwrap_err();
        assert_eq!(&code[err.span().to_range()], "a()");
    }
}
