//! Token-class markup for displaying source code.
//!
//! Highlighting reuses the lexer's token stream as-is, so the output always
//! reproduces the input byte-for-byte once the markup is stripped.

use crate::lexer::{Token, TokenKind, TokenStream};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TokenClass {
    Bracket,
    String,
    StringError,
    Number,
    Identifier,
    Keyword,
    Control,
    Boolean,
    Type,
    Operator,
    Default,
}

impl TokenClass {
    /// The CSS class used by the HTML renderer.
    pub fn css_class(self) -> &'static str {
        match self {
            TokenClass::Bracket => "tok-bracket",
            TokenClass::String => "tok-string",
            TokenClass::StringError => "tok-string-error",
            TokenClass::Number => "tok-number",
            TokenClass::Identifier => "tok-identifier",
            TokenClass::Keyword => "tok-keyword",
            TokenClass::Control => "tok-control",
            TokenClass::Boolean => "tok-boolean",
            TokenClass::Type => "tok-type",
            TokenClass::Operator => "tok-operator",
            TokenClass::Default => "tok-default",
        }
    }

    fn ansi_code(self) -> Option<&'static str> {
        match self {
            TokenClass::Bracket => Some("\x1b[34m"),       // Blue
            TokenClass::String => Some("\x1b[32m"),        // Green
            TokenClass::StringError => Some("\x1b[1;31m"), // Bold red
            TokenClass::Number => Some("\x1b[33m"),        // Yellow
            TokenClass::Keyword => Some("\x1b[35m"),       // Magenta
            TokenClass::Control => Some("\x1b[1;35m"),
            TokenClass::Boolean => Some("\x1b[36m"), // Cyan
            TokenClass::Type => Some("\x1b[1;36m"),
            TokenClass::Operator => Some("\x1b[37m"),
            TokenClass::Identifier | TokenClass::Default => None,
        }
    }
}

pub fn classify(token: &Token) -> TokenClass {
    match token.kind {
        TokenKind::LeftParen
        | TokenKind::RightParen
        | TokenKind::LeftBrace
        | TokenKind::RightBrace
        | TokenKind::LeftBracket
        | TokenKind::RightBracket => TokenClass::Bracket,
        TokenKind::String if token.is_unterminated_string() => TokenClass::StringError,
        TokenKind::String => TokenClass::String,
        TokenKind::Number => TokenClass::Number,
        TokenKind::Identifier => TokenClass::Identifier,
        TokenKind::Var
        | TokenKind::Let
        | TokenKind::Const
        | TokenKind::Function
        | TokenKind::Print
        | TokenKind::Import
        | TokenKind::Export
        | TokenKind::From
        | TokenKind::As
        | TokenKind::Default => TokenClass::Keyword,
        TokenKind::If
        | TokenKind::Else
        | TokenKind::While
        | TokenKind::For
        | TokenKind::Return
        | TokenKind::Break
        | TokenKind::Continue => TokenClass::Control,
        TokenKind::True | TokenKind::False | TokenKind::Null => TokenClass::Boolean,
        TokenKind::StringType
        | TokenKind::NumberType
        | TokenKind::BooleanType
        | TokenKind::AnyType => TokenClass::Type,
        TokenKind::Plus
        | TokenKind::Minus
        | TokenKind::Star
        | TokenKind::Slash
        | TokenKind::Percent
        | TokenKind::Bang
        | TokenKind::Equal
        | TokenKind::Greater
        | TokenKind::Less
        | TokenKind::Pipe
        | TokenKind::Amp
        | TokenKind::BangEqual
        | TokenKind::EqualEqual
        | TokenKind::GreaterEqual
        | TokenKind::LessEqual
        | TokenKind::AndAnd
        | TokenKind::OrOr
        | TokenKind::PlusEqual
        | TokenKind::MinusEqual
        | TokenKind::StarEqual
        | TokenKind::SlashEqual
        | TokenKind::PercentEqual
        | TokenKind::PlusPlus
        | TokenKind::MinusMinus => TokenClass::Operator,
        TokenKind::Comma
        | TokenKind::Dot
        | TokenKind::Semicolon
        | TokenKind::Colon
        | TokenKind::Question
        | TokenKind::Whitespace
        | TokenKind::BlockComment
        | TokenKind::Eof => TokenClass::Default,
    }
}

/// Output target for highlighted source.
pub trait Markup {
    /// A classified token's exact source text.
    fn push_token(&mut self, class: TokenClass, text: &str);
    /// Layout, comments, and anything after a lexing error.
    fn push_raw(&mut self, text: &str);
}

fn escape_html(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

#[derive(Debug, Default)]
pub struct HtmlMarkup {
    pub html: String,
}

impl Markup for HtmlMarkup {
    fn push_token(&mut self, class: TokenClass, text: &str) {
        self.html.push_str("<span class=\"");
        self.html.push_str(class.css_class());
        self.html.push_str("\">");
        escape_html(text, &mut self.html);
        self.html.push_str("</span>");
    }

    fn push_raw(&mut self, text: &str) {
        escape_html(text, &mut self.html);
    }
}

#[derive(Debug, Default)]
pub struct AnsiMarkup {
    pub text: String,
}

impl Markup for AnsiMarkup {
    fn push_token(&mut self, class: TokenClass, text: &str) {
        match class.ansi_code() {
            Some(code) => {
                self.text.push_str(code);
                self.text.push_str(text);
                self.text.push_str("\x1b[0m");
            }
            None => self.text.push_str(text),
        }
    }

    fn push_raw(&mut self, text: &str) {
        self.text.push_str(text);
    }
}

/// Feeds `source` through `markup`, token by token. Never fails.
pub fn highlight_with<M: Markup>(source: &str, markup: &mut M) {
    let mut cursor = 0;
    for result in TokenStream::new(source) {
        let token = match result {
            Ok(token) => token,
            Err(_) => break, // The rest goes out raw
        };
        // Skipped comments leave a gap between tokens
        if token.span.start > cursor {
            markup.push_raw(&source[cursor..token.span.start]);
        }
        match token.kind {
            TokenKind::Eof => {}
            TokenKind::Whitespace => markup.push_raw(&token.lexeme),
            _ => markup.push_token(classify(&token), &token.lexeme),
        }
        cursor = token.span.end;
    }
    if cursor < source.len() {
        markup.push_raw(&source[cursor..]);
    }
}

pub fn highlight_html(source: &str) -> String {
    let mut markup = HtmlMarkup::default();
    highlight_with(source, &mut markup);
    markup.html
}

pub fn highlight_ansi(source: &str) -> String {
    let mut markup = AnsiMarkup::default();
    highlight_with(source, &mut markup);
    markup.text
}
