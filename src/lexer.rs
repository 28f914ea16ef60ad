use logos::Logos;
use std::fmt;
use thiserror::Error;
use tracing::trace;

use crate::Span;

#[derive(Logos, Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[logos(skip r"//[^\n]*")] // Line comments
pub enum TokenKind {
    #[token("(")]
    LeftParen,
    #[token(")")]
    RightParen,
    #[token("{")]
    LeftBrace,
    #[token("}")]
    RightBrace,
    #[token("[")]
    LeftBracket,
    #[token("]")]
    RightBracket,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token("?")]
    Question,

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("!")]
    Bang,
    #[token("=")]
    Equal,
    #[token(">")]
    Greater,
    #[token("<")]
    Less,
    #[token("|")]
    Pipe,
    #[token("&")]
    Amp,

    #[token("!=")]
    BangEqual,
    #[token("==")]
    EqualEqual,
    #[token(">=")]
    GreaterEqual,
    #[token("<=")]
    LessEqual,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("+=")]
    PlusEqual,
    #[token("-=")]
    MinusEqual,
    #[token("*=")]
    StarEqual,
    #[token("/=")]
    SlashEqual,
    #[token("%=")]
    PercentEqual,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Identifier,
    #[token("\"", lex_string)]
    String,
    #[regex(r"[0-9]+(\.[0-9]+)?")]
    Number,

    // Keywords are never matched directly; identifiers are looked up in KEYWORDS.
    Var,
    Let,
    Const,
    Function,
    Return,
    Break,
    Continue,
    If,
    Else,
    While,
    For,
    True,
    False,
    Null,
    Print,
    StringType,
    NumberType,
    BooleanType,
    AnyType,
    Import,
    Export,
    From,
    As,
    Default,

    #[regex(r"[ \t\r\n]+")]
    Whitespace,
    // Never produced: the callback skips the whole comment.
    #[token("/*", lex_block_comment)]
    BlockComment,
    Eof,
}

/// Every spelling the language reserves, including the synonyms.
/// Shared by the lexer, the highlighter, reserved-name checks and REPL completion.
pub static KEYWORDS: &[(&str, TokenKind)] = &[
    ("var", TokenKind::Var),
    ("let", TokenKind::Let),
    ("const", TokenKind::Const),
    ("loyal", TokenKind::Const),
    ("function", TokenKind::Function),
    ("declare", TokenKind::Function),
    ("return", TokenKind::Return),
    ("emit", TokenKind::Return),
    ("break", TokenKind::Break),
    ("continue", TokenKind::Continue),
    ("if", TokenKind::If),
    ("else", TokenKind::Else),
    ("while", TokenKind::While),
    ("for", TokenKind::For),
    ("true", TokenKind::True),
    ("false", TokenKind::False),
    ("null", TokenKind::Null),
    ("print", TokenKind::Print),
    ("say", TokenKind::Print),
    ("string", TokenKind::StringType),
    ("number", TokenKind::NumberType),
    ("boolean", TokenKind::BooleanType),
    ("any", TokenKind::AnyType),
    ("import", TokenKind::Import),
    ("export", TokenKind::Export),
    ("from", TokenKind::From),
    ("as", TokenKind::As),
    ("default", TokenKind::Default),
    ("equals", TokenKind::Equal),
    ("plus", TokenKind::Plus),
    ("minus", TokenKind::Minus),
    ("into", TokenKind::Star),
    ("by", TokenKind::Slash),
    ("isgre", TokenKind::Greater),
    ("isless", TokenKind::Less),
];

pub fn keyword(ident: &str) -> Option<TokenKind> {
    KEYWORDS
        .iter()
        .find(|(word, _)| *word == ident)
        .map(|(_, kind)| *kind)
}

// Consumes the rest of a string literal after its opening quote.
// A missing closing quote is not an error here: the literal runs to end of input.
fn lex_string(lex: &mut logos::Lexer<TokenKind>) -> bool {
    let remainder = lex.remainder();
    let mut escaped = false;
    for (i, c) in remainder.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            lex.bump(i + 1);
            return true;
        }
    }
    lex.bump(remainder.len());
    true
}

// Skips a block comment after its opening `/*`.
// An unclosed comment runs to end of input.
fn lex_block_comment(lex: &mut logos::Lexer<TokenKind>) -> logos::Skip {
    let remainder = lex.remainder();
    let len = remainder.find("*/").map_or(remainder.len(), |i| i + 2);
    lex.bump(len);
    logos::Skip
}

impl TokenKind {
    pub fn is_whitespace(self) -> bool {
        self == TokenKind::Whitespace
    }

    fn describe(self) -> &'static str {
        match self {
            TokenKind::LeftParen => "(",
            TokenKind::RightParen => ")",
            TokenKind::LeftBrace => "{",
            TokenKind::RightBrace => "}",
            TokenKind::LeftBracket => "[",
            TokenKind::RightBracket => "]",
            TokenKind::Comma => ",",
            TokenKind::Dot => ".",
            TokenKind::Semicolon => ";",
            TokenKind::Colon => ":",
            TokenKind::Question => "?",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Bang => "!",
            TokenKind::Equal => "=",
            TokenKind::Greater => ">",
            TokenKind::Less => "<",
            TokenKind::Pipe => "|",
            TokenKind::Amp => "&",
            TokenKind::BangEqual => "!=",
            TokenKind::EqualEqual => "==",
            TokenKind::GreaterEqual => ">=",
            TokenKind::LessEqual => "<=",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::PlusEqual => "+=",
            TokenKind::MinusEqual => "-=",
            TokenKind::StarEqual => "*=",
            TokenKind::SlashEqual => "/=",
            TokenKind::PercentEqual => "%=",
            TokenKind::PlusPlus => "++",
            TokenKind::MinusMinus => "--",
            TokenKind::Identifier => "identifier",
            TokenKind::String => "string",
            TokenKind::Number => "number",
            TokenKind::Var => "var",
            TokenKind::Let => "let",
            TokenKind::Const => "const",
            TokenKind::Function => "function",
            TokenKind::Return => "return",
            TokenKind::Break => "break",
            TokenKind::Continue => "continue",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::While => "while",
            TokenKind::For => "for",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Null => "null",
            TokenKind::Print => "print",
            TokenKind::StringType => "string type",
            TokenKind::NumberType => "number type",
            TokenKind::BooleanType => "boolean type",
            TokenKind::AnyType => "any type",
            TokenKind::Import => "import",
            TokenKind::Export => "export",
            TokenKind::From => "from",
            TokenKind::As => "as",
            TokenKind::Default => "default",
            TokenKind::Whitespace => "whitespace",
            TokenKind::BlockComment => "comment",
            TokenKind::Eof => "end of input",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Literal payload carried by number, string, boolean and null tokens.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Str { value: String, unterminated: bool },
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// The exact source text of the token.
    pub lexeme: String,
    pub literal: Option<Literal>,
    pub span: Span,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn is_unterminated_string(&self) -> bool {
        matches!(
            self.literal,
            Some(Literal::Str {
                unterminated: true,
                ..
            })
        )
    }
}

mod unescape {
    // Decodes a raw string lexeme, opening quote included.
    // Returns the decoded value and whether the closing quote was missing.
    pub fn unescape(raw: &str) -> (String, bool) {
        let body = raw.strip_prefix('"').unwrap_or(raw);
        let mut result = String::with_capacity(body.len());
        let mut chars = body.chars();
        while let Some(c) = chars.next() {
            match c {
                '"' => return (result, false),
                '\\' => match chars.next() {
                    Some('"') => result.push('"'),
                    Some('n') => result.push('\n'),
                    Some('t') => result.push('\t'),
                    // Unknown escapes are kept verbatim
                    Some(other) => {
                        result.push('\\');
                        result.push(other);
                    }
                    None => result.push('\\'),
                },
                c => result.push(c),
            }
        }
        (result, true)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LexerErrorKind {
    #[error("Unexpected character '{0}'")]
    UnexpectedCharacter(char),
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{error} at {line}:{column}")]
pub struct LexerError {
    pub error: LexerErrorKind,
    pub span: Span,
    pub line: usize,
    pub column: usize,
}

// Result type alias for convenience
pub type LexerResult<T> = Result<T, LexerError>;

/// Streams tokens (whitespace included) followed by a single EOF token.
/// Stops after the first error.
pub struct TokenStream<'s> {
    source: &'s str,
    inner: logos::SpannedIter<'s, TokenKind>,
    offset: usize,
    line: usize,
    column: usize,
    done: bool,
}

impl<'s> TokenStream<'s> {
    pub fn new(source: &'s str) -> Self {
        TokenStream {
            source,
            inner: TokenKind::lexer(source).spanned(),
            offset: 0,
            line: 1,
            column: 1,
            done: false,
        }
    }

    // Moves the line/column counters up to `to`, over skipped comments too.
    fn advance_to(&mut self, to: usize) {
        for c in self.source[self.offset..to].chars() {
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.offset = to;
    }

    fn make_token(&mut self, kind: TokenKind, span: Span) -> Token {
        self.advance_to(span.start);
        let (line, column) = (self.line, self.column);
        let lexeme = &self.source[span.to_range()];

        let (kind, literal) = match kind {
            TokenKind::Identifier => match keyword(lexeme) {
                Some(TokenKind::True) => (TokenKind::True, Some(Literal::Bool(true))),
                Some(TokenKind::False) => (TokenKind::False, Some(Literal::Bool(false))),
                Some(TokenKind::Null) => (TokenKind::Null, Some(Literal::Null)),
                Some(kw) => (kw, None),
                None => (TokenKind::Identifier, None),
            },
            TokenKind::Number => {
                // The number regex only admits valid f64 text
                let n = lexeme.parse::<f64>().unwrap_or(f64::NAN);
                (TokenKind::Number, Some(Literal::Number(n)))
            }
            TokenKind::String => {
                let (value, unterminated) = unescape::unescape(lexeme);
                (
                    TokenKind::String,
                    Some(Literal::Str {
                        value,
                        unterminated,
                    }),
                )
            }
            other => (other, None),
        };

        let token = Token {
            kind,
            lexeme: lexeme.to_string(),
            literal,
            span,
            line,
            column,
        };
        self.advance_to(span.end);
        token
    }
}

impl Iterator for TokenStream<'_> {
    type Item = LexerResult<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.inner.next() {
            Some((Ok(kind), range)) => {
                Some(Ok(self.make_token(kind, Span::new(range.start, range.end))))
            }
            Some((Err(()), range)) => {
                self.done = true;
                self.advance_to(range.start);
                let c = self.source[range.start..].chars().next().unwrap_or('\0');
                Some(Err(LexerError {
                    error: LexerErrorKind::UnexpectedCharacter(c),
                    span: Span::new(range.start, range.end),
                    line: self.line,
                    column: self.column,
                }))
            }
            None => {
                self.done = true;
                self.advance_to(self.source.len());
                let end = self.source.len();
                Some(Ok(Token {
                    kind: TokenKind::Eof,
                    lexeme: String::new(),
                    literal: None,
                    span: Span::new(end, end),
                    line: self.line,
                    column: self.column,
                }))
            }
        }
    }
}

// Tokenizes the whole input, whitespace tokens included, ending with EOF.
pub fn tokenize(input: &str) -> LexerResult<Vec<Token>> {
    let tokens = TokenStream::new(input).collect::<LexerResult<Vec<Token>>>()?;
    trace!(count = tokens.len(), "tokenized source");
    Ok(tokens)
}
