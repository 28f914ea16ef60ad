use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use loyal::lexer::{KEYWORDS, TokenKind};
use loyal::{Environment, Error, Interpreter, Value, highlight, logging, parse_str, tokenize};
use rustyline::error::ReadlineError;
use rustyline::highlight::{CmdKind, Highlighter};
use rustyline::validate::{ValidationContext, ValidationResult, Validator};
use rustyline::{Cmd, Completer, Context, EditMode, Editor, EventHandler, KeyCode, KeyEvent, Modifiers};
use rustyline::{Helper, Highlighter, Hinter, Validator};

/// REPL settings, read from the environment.
struct ReplConfig {
    history_path: PathBuf,
    edit_mode: EditMode,
}

impl ReplConfig {
    fn from_env() -> Self {
        let history_path = std::env::var("LOYAL_HISTORY")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".loyal_history"));
        let edit_mode = match std::env::var("LOYAL_EDIT_MODE").as_deref() {
            Ok("vi") => EditMode::Vi,
            _ => EditMode::Emacs,
        };
        ReplConfig {
            history_path,
            edit_mode,
        }
    }
}

struct LoyalCompleter {
    env: Rc<RefCell<Environment>>,
}

impl LoyalCompleter {
    fn new(env: Rc<RefCell<Environment>>) -> Self {
        LoyalCompleter { env }
    }
}

impl rustyline::completion::Completer for LoyalCompleter {
    type Candidate = String;
    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        let Ok(tokens) = tokenize(&line[..pos]) else {
            return Ok((pos, vec![]));
        };
        // The word under the cursor, if the last token is one
        let prefix = match tokens.iter().rev().find(|t| t.kind != TokenKind::Eof) {
            Some(token)
                if token.span.end == pos
                    && token.lexeme.starts_with(|c: char| c.is_alphabetic() || c == '_') =>
            {
                token.lexeme.clone()
            }
            _ => return Ok((pos, vec![])),
        };
        let mut candidates: Vec<String> = KEYWORDS
            .iter()
            .map(|(word, _)| word.to_string())
            .chain(self.env.borrow().get_identifiers())
            .filter(|word| word.starts_with(&prefix) && *word != prefix)
            .collect();
        candidates.sort();
        candidates.dedup();
        Ok((pos - prefix.len(), candidates))
    }
}

#[derive(Completer, Helper, Highlighter, Hinter, Validator)]
struct ReplHelper {
    #[rustyline(Validator)]
    validator: LoyalValidator,
    #[rustyline(Highlighter)]
    highlighter: LoyalHighlighter,
    #[rustyline(Completer)]
    completer: LoyalCompleter,
}

fn closes(open: TokenKind, close: TokenKind) -> bool {
    matches!(
        (open, close),
        (TokenKind::LeftParen, TokenKind::RightParen)
            | (TokenKind::LeftBrace, TokenKind::RightBrace)
            | (TokenKind::LeftBracket, TokenKind::RightBracket)
    )
}

struct LoyalValidator;

impl Validator for LoyalValidator {
    fn validate(&self, ctx: &mut ValidationContext) -> rustyline::Result<ValidationResult> {
        // Lexer errors are left for the parser to report
        let Ok(tokens) = tokenize(ctx.input()) else {
            return Ok(ValidationResult::Valid(None));
        };
        let mut stack = Vec::new();
        for token in &tokens {
            if token.is_unterminated_string() {
                return Ok(ValidationResult::Incomplete);
            }
            match token.kind {
                TokenKind::LeftParen | TokenKind::LeftBrace | TokenKind::LeftBracket => {
                    stack.push(token.kind)
                }
                TokenKind::RightParen | TokenKind::RightBrace | TokenKind::RightBracket => {
                    match stack.pop() {
                        Some(open) if closes(open, token.kind) => {}
                        _ => {
                            return Ok(ValidationResult::Invalid(Some(format!(
                                "  - Unmatched '{}' at {}:{}",
                                token.lexeme, token.line, token.column
                            ))));
                        }
                    }
                }
                _ => {}
            }
        }
        if stack.is_empty() {
            Ok(ValidationResult::Valid(None))
        } else {
            Ok(ValidationResult::Incomplete)
        }
    }
}

struct LoyalHighlighter;

impl Highlighter for LoyalHighlighter {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> std::borrow::Cow<'l, str> {
        std::borrow::Cow::Owned(highlight::highlight_ansi(line))
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _kind: CmdKind) -> bool {
        true
    }
}

fn main() -> rustyline::Result<()> {
    logging::init_tracing();
    let settings = ReplConfig::from_env();

    println!("Loyal REPL v{}", env!("CARGO_PKG_VERSION"));
    println!("Type 'exit' or press Ctrl-D to quit.");

    let mut interpreter = Interpreter::new(|line: &str| println!("{}", line));
    let h = ReplHelper {
        highlighter: LoyalHighlighter,
        validator: LoyalValidator,
        completer: LoyalCompleter::new(interpreter.globals()),
    };
    let config = rustyline::config::Config::builder()
        .edit_mode(settings.edit_mode)
        .auto_add_history(false)
        .build();
    let mut rl = Editor::with_config(config)?;
    rl.set_helper(Some(h));
    rl.bind_sequence(
        KeyEvent(KeyCode::Char('s'), Modifiers::CTRL),
        EventHandler::Simple(Cmd::Newline),
    );
    if rl.load_history(&settings.history_path).is_err() {
        println!("No previous history.");
    }

    loop {
        match rl.readline("loyal> ") {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                rl.add_history_entry(line.as_str())?;
                if input.eq_ignore_ascii_case("exit") {
                    break;
                }

                // Definitions persist: every line runs in the same interpreter
                let result = parse_str(input)
                    .map_err(Error::from)
                    .and_then(|program| interpreter.run(&program).map_err(Error::from));
                match result {
                    Ok(Value::Null) => {}
                    Ok(value) => println!("{}", value),
                    Err(e) => {
                        if e.pretty_print("REPL", input).is_err() {
                            eprintln!("Error: {}", e);
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl-C
                println!("Interrupted. Type 'exit' or Ctrl-D to quit.");
            }
            Err(ReadlineError::Eof) => {
                // Ctrl-D
                println!("\nExiting.");
                break;
            }
            Err(err) => {
                eprintln!("Readline Error: {:?}", err);
                break;
            }
        }
    }
    rl.save_history(&settings.history_path)
}
