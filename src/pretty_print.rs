use crate::Error;
use crate::environment::EnvError;
use crate::evaluator::EvalError;
use crate::lexer::{LexerError, TokenKind};
use crate::parser::ParseError;
use crate::source::Span;
use ariadne::{Config, Label, Report, ReportKind, Source};
use std::io;
use std::ops::Range;

type Diagnostic<'a> = Report<'a, (&'a str, Range<usize>)>;

// Empty spans still need one column to point at. A span at end of input
// points at the last character, since ariadne drops labels past the end.
fn label_range(span: Span, source_len: usize) -> Range<usize> {
    if span.start >= source_len {
        source_len.saturating_sub(1)..source_len
    } else if span.is_empty() {
        span.start..span.start + 1
    } else {
        span.to_range()
    }
}

fn build<'a>(
    name: &'a str,
    source_len: usize,
    span: Span,
    message: impl ToString,
    label: impl ToString,
    color: bool,
) -> Diagnostic<'a> {
    let range = label_range(span, source_len);
    Report::build(ReportKind::Error, (name, range.clone()))
        .with_config(Config::default().with_color(color))
        .with_message(message)
        .with_label(Label::new((name, range)).with_message(label))
        .finish()
}

impl LexerError {
    fn diagnostic<'a>(&self, name: &'a str, source_len: usize, color: bool) -> Diagnostic<'a> {
        build(name, source_len, self.span, "Lexer Error", self.error.to_string(), color)
    }
}

impl ParseError {
    fn diagnostic<'a>(&self, name: &'a str, source_len: usize, color: bool) -> Diagnostic<'a> {
        match self {
            ParseError::UnexpectedToken { found, expected } => {
                let message = match found.kind {
                    TokenKind::Eof => format!("Unexpected end of input, expected {expected}"),
                    _ => format!("Unexpected token '{}'", found.lexeme),
                };
                build(name, source_len, found.span, message, format!("Expected {expected}"), color)
            }
            ParseError::InvalidAssignmentTarget { span, .. } => build(
                name,
                source_len,
                *span,
                "Invalid assignment target",
                "Only variables, members and indexes can be assigned to",
                color,
            ),
            ParseError::UnterminatedString { span, .. } => build(
                name,
                source_len,
                *span,
                "Unterminated string literal",
                "This string is missing its closing quote",
                color,
            ),
            ParseError::LexerError(lex_err) => lex_err.diagnostic(name, source_len, color),
        }
    }
}

impl EvalError {
    fn diagnostic<'a>(&self, name: &'a str, source_len: usize, color: bool) -> Diagnostic<'a> {
        let label = match self {
            EvalError::Env(env_error) => match env_error {
                EnvError::DuplicateBinding { .. } => "Already declared in this scope".to_string(),
                EnvError::ReservedName { .. } => "Reserved words cannot be used as names".to_string(),
                EnvError::UndeclaredVariable { .. } => {
                    "This name is not declared in any enclosing scope".to_string()
                }
                EnvError::ConstAssignment { .. } => "Constants cannot be reassigned".to_string(),
                EnvError::TypeMismatch {
                    expected, found, ..
                } => format!("Expected {expected}, found {found}"),
            },
            EvalError::TypeError { message, .. } => message.clone(),
            EvalError::Arity { found, .. } => format!("Called with {found} argument(s)"),
            EvalError::NotCallable { .. } => "This expression is not a function".to_string(),
            EvalError::ControlEscape { context, .. } => format!("Not inside {context}"),
            EvalError::RecursionLimit { .. } => "Too many nested calls".to_string(),
        };
        build(name, source_len, self.span(), self, label, color)
    }
}

impl Error {
    fn diagnostic<'a>(&self, name: &'a str, source_len: usize, color: bool) -> Diagnostic<'a> {
        match self {
            Error::Lex(e) => e.diagnostic(name, source_len, color),
            Error::Parse(e) => e.diagnostic(name, source_len, color),
            Error::Runtime(e) => e.diagnostic(name, source_len, color),
        }
    }

    /// Prints a coloured report to stderr. `name` labels the source (a file name or "REPL").
    pub fn pretty_print(&self, name: &str, source: &str) -> io::Result<()> {
        self.diagnostic(name, source.len(), true)
            .eprint((name, Source::from(source)))
    }

    /// Renders the report without colours.
    pub fn render(&self, name: &str, source: &str) -> String {
        let mut buffer = Vec::new();
        if self
            .diagnostic(name, source.len(), false)
            .write((name, Source::from(source)), &mut buffer)
            .is_err()
        {
            return self.to_string();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
