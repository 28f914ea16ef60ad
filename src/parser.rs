use crate::Span;
use crate::ast::{
    AssignOp, BinaryOp, DeclKind, Expr, ExprKind, FunctionDecl, Param, Program, StepOp, Stmt,
    StmtKind, TypeAnnotation, UnaryOp,
};
use crate::lexer::{LexerError, Literal, Token, TokenKind};
use crate::stack::ensure_sufficient_stack;
use std::iter::Peekable;
use std::rc::Rc;
use std::vec::IntoIter; // To iterate over Vec<Token>
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Expected {expected}, found {} at {}:{}", describe_found(.found), .found.line, .found.column)]
    UnexpectedToken { found: Token, expected: String },
    #[error("Invalid assignment target at {line}:{column}")]
    InvalidAssignmentTarget {
        span: Span,
        line: usize,
        column: usize,
    },
    #[error("Unterminated string literal at {line}:{column}")]
    UnterminatedString {
        span: Span,
        line: usize,
        column: usize,
    },
    #[error("Lexer Error during parse: {0}")]
    LexerError(#[from] LexerError), // Propagate lexer errors when parsing straight from a string
}

fn describe_found(token: &Token) -> String {
    match token.kind {
        TokenKind::Eof => "end of input".to_string(),
        _ => format!("'{}'", token.lexeme),
    }
}

impl ParseError {
    pub fn span(&self) -> Span {
        match self {
            ParseError::UnexpectedToken { found, .. } => found.span,
            ParseError::InvalidAssignmentTarget { span, .. } => *span,
            ParseError::UnterminatedString { span, .. } => *span,
            ParseError::LexerError(lex_err) => lex_err.span,
        }
    }
}

// Result type alias for convenience
pub type ParseResult<T> = Result<T, ParseError>;

const EQUALITY: &[(TokenKind, BinaryOp)] = &[
    (TokenKind::EqualEqual, BinaryOp::Equal),
    (TokenKind::BangEqual, BinaryOp::NotEqual),
];
const COMPARISON: &[(TokenKind, BinaryOp)] = &[
    (TokenKind::Greater, BinaryOp::Greater),
    (TokenKind::GreaterEqual, BinaryOp::GreaterEqual),
    (TokenKind::Less, BinaryOp::Less),
    (TokenKind::LessEqual, BinaryOp::LessEqual),
];
const TERM: &[(TokenKind, BinaryOp)] = &[
    (TokenKind::Plus, BinaryOp::Add),
    (TokenKind::Minus, BinaryOp::Subtract),
];
const FACTOR: &[(TokenKind, BinaryOp)] = &[
    (TokenKind::Star, BinaryOp::Multiply),
    (TokenKind::Slash, BinaryOp::Divide),
    (TokenKind::Percent, BinaryOp::Remainder),
];

pub struct Parser {
    // Layout-free token stream: whitespace is filtered out up front.
    tokens: Peekable<IntoIter<Token>>,
    eof: Token,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        let tokens: Vec<Token> = tokens
            .into_iter()
            .filter(|t| !t.kind.is_whitespace())
            .collect();
        let eof = match tokens.last() {
            Some(last) if last.kind == TokenKind::Eof => last.clone(),
            last => {
                let end = last.map_or(0, |t| t.span.end);
                Token {
                    kind: TokenKind::Eof,
                    lexeme: String::new(),
                    literal: None,
                    span: Span::new(end, end),
                    line: last.map_or(1, |t| t.line),
                    column: last.map_or(1, |t| t.column + t.lexeme.chars().count()),
                }
            }
        };
        Parser {
            tokens: tokens.into_iter().peekable(),
            eof,
        }
    }

    // Peeks at the next token without consuming.
    fn peek(&mut self) -> &Token {
        match self.tokens.peek() {
            Some(token) => token,
            None => &self.eof,
        }
    }

    fn peek_kind(&mut self) -> TokenKind {
        self.peek().kind
    }

    // Consumes the next token; past the end this keeps returning EOF.
    fn advance(&mut self) -> Token {
        match self.tokens.next() {
            Some(token) => token,
            None => self.eof.clone(),
        }
    }

    fn check(&mut self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn match_kind(&mut self, kind: TokenKind) -> Option<Token> {
        if self.check(kind) {
            Some(self.advance())
        } else {
            None
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(ParseError::UnexpectedToken {
                found: self.peek().clone(),
                expected: expected.to_string(),
            })
        }
    }

    /// Parses every declaration up to EOF.
    pub fn parse_program(mut self) -> ParseResult<Program> {
        let mut body = Vec::new();
        while !self.check(TokenKind::Eof) {
            body.push(self.declaration()?);
        }
        debug!(statements = body.len(), "parsed program");
        Ok(Program { body })
    }

    fn declaration(&mut self) -> ParseResult<Stmt> {
        match self.peek_kind() {
            TokenKind::Var | TokenKind::Let => {
                let keyword = self.advance();
                self.var_declaration(keyword)
            }
            TokenKind::Const => {
                let keyword = self.advance();
                self.const_declaration(keyword)
            }
            _ => self.statement(),
        }
    }

    fn var_declaration(&mut self, keyword: Token) -> ParseResult<Stmt> {
        let kind = match keyword.kind {
            TokenKind::Let => DeclKind::Let,
            _ => DeclKind::Var,
        };
        let name = self.expect(TokenKind::Identifier, "variable name")?;
        let annotation = self.optional_type_annotation()?;
        let initializer = match self.match_kind(TokenKind::Equal) {
            Some(_) => Some(self.expression()?),
            None => None,
        };
        let end = self.expect(TokenKind::Semicolon, "';' after variable declaration")?;
        let declared_type = annotation.or_else(|| initializer.as_ref().map(TypeAnnotation::infer));
        Ok(Stmt::new(
            StmtKind::VarDecl {
                kind,
                name: name.lexeme,
                declared_type,
                initializer,
            },
            keyword.span.merge(end.span),
        ))
    }

    fn const_declaration(&mut self, keyword: Token) -> ParseResult<Stmt> {
        let name = self.expect(TokenKind::Identifier, "constant name")?;
        let annotation = self.optional_type_annotation()?;
        self.expect(TokenKind::Equal, "'=' and an initializer for constant")?;
        let initializer = self.expression()?;
        let end = self.expect(TokenKind::Semicolon, "';' after constant declaration")?;
        let declared_type = annotation.or_else(|| Some(TypeAnnotation::infer(&initializer)));
        Ok(Stmt::new(
            StmtKind::ConstDecl {
                name: name.lexeme,
                declared_type,
                initializer,
            },
            keyword.span.merge(end.span),
        ))
    }

    fn optional_type_annotation(&mut self) -> ParseResult<Option<TypeAnnotation>> {
        if self.match_kind(TokenKind::Colon).is_none() {
            return Ok(None);
        }
        let token = self.advance();
        let annotation = match token.kind {
            TokenKind::NumberType => TypeAnnotation::Number,
            TokenKind::StringType => TypeAnnotation::String,
            TokenKind::BooleanType => TypeAnnotation::Boolean,
            TokenKind::AnyType => TypeAnnotation::Any,
            _ => {
                return Err(ParseError::UnexpectedToken {
                    found: token,
                    expected: "type name (number, string, boolean, any)".to_string(),
                });
            }
        };
        Ok(Some(annotation))
    }

    fn statement(&mut self) -> ParseResult<Stmt> {
        ensure_sufficient_stack(|| self.statement_inner())
    }

    fn statement_inner(&mut self) -> ParseResult<Stmt> {
        match self.peek_kind() {
            TokenKind::Print => {
                let keyword = self.advance();
                let value = self.expression()?;
                let end = self.expect(TokenKind::Semicolon, "';' after print value")?;
                Ok(Stmt::new(StmtKind::Print(value), keyword.span.merge(end.span)))
            }
            TokenKind::If => self.if_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::For => self.for_statement(),
            TokenKind::Break => {
                let keyword = self.advance();
                let end = self.expect(TokenKind::Semicolon, "';' after 'break'")?;
                Ok(Stmt::new(StmtKind::Break, keyword.span.merge(end.span)))
            }
            TokenKind::Continue => {
                let keyword = self.advance();
                let end = self.expect(TokenKind::Semicolon, "';' after 'continue'")?;
                Ok(Stmt::new(StmtKind::Continue, keyword.span.merge(end.span)))
            }
            TokenKind::Return => {
                let keyword = self.advance();
                let value = if self.check(TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.expression()?)
                };
                let end = self.expect(TokenKind::Semicolon, "';' after return value")?;
                Ok(Stmt::new(
                    StmtKind::Return(value),
                    keyword.span.merge(end.span),
                ))
            }
            TokenKind::LeftBrace => {
                let (body, span) = self.block()?;
                Ok(Stmt::new(StmtKind::Block(body), span))
            }
            TokenKind::Function => {
                let keyword = self.advance();
                let function = self.function_rest(keyword.span)?;
                let span = function.span;
                if function.name.is_some() {
                    Ok(Stmt::new(StmtKind::FunctionDecl(Rc::new(function)), span))
                } else {
                    // An anonymous function in statement position is just an expression
                    let expr = Expr::new(ExprKind::Function(Rc::new(function)), span);
                    let end = self.expect(TokenKind::Semicolon, "';' after expression")?;
                    Ok(Stmt::new(StmtKind::Expr(expr), span.merge(end.span)))
                }
            }
            _ => self.expression_statement(),
        }
    }

    fn expression_statement(&mut self) -> ParseResult<Stmt> {
        let expr = self.expression()?;
        let end = self.expect(TokenKind::Semicolon, "';' after expression")?;
        let span = expr.span.merge(end.span);
        Ok(Stmt::new(StmtKind::Expr(expr), span))
    }

    /// Parses `{ declaration* }`, returning the statements and the span including braces.
    fn block(&mut self) -> ParseResult<(Vec<Stmt>, Span)> {
        let open = self.expect(TokenKind::LeftBrace, "'{' to start a block")?;
        let mut body = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            body.push(self.declaration()?);
        }
        let close = self.expect(TokenKind::RightBrace, "'}' after block")?;
        Ok((body, open.span.merge(close.span)))
    }

    fn if_statement(&mut self) -> ParseResult<Stmt> {
        let keyword = self.advance();
        self.expect(TokenKind::LeftParen, "'(' after 'if'")?;
        let condition = self.expression()?;
        self.expect(TokenKind::RightParen, "')' after if condition")?;
        let then_branch = self.statement()?;
        let mut span = keyword.span.merge(then_branch.span);
        let else_branch = match self.match_kind(TokenKind::Else) {
            Some(_) => {
                let branch = self.statement()?;
                span = span.merge(branch.span);
                Some(Box::new(branch))
            }
            None => None,
        };
        Ok(Stmt::new(
            StmtKind::If {
                condition,
                then_branch: Box::new(then_branch),
                else_branch,
            },
            span,
        ))
    }

    fn while_statement(&mut self) -> ParseResult<Stmt> {
        let keyword = self.advance();
        self.expect(TokenKind::LeftParen, "'(' after 'while'")?;
        let condition = self.expression()?;
        self.expect(TokenKind::RightParen, "')' after while condition")?;
        let body = self.statement()?;
        let span = keyword.span.merge(body.span);
        Ok(Stmt::new(
            StmtKind::While {
                condition,
                body: Box::new(body),
            },
            span,
        ))
    }

    fn for_statement(&mut self) -> ParseResult<Stmt> {
        let keyword = self.advance();
        self.expect(TokenKind::LeftParen, "'(' after 'for'")?;

        let init = match self.peek_kind() {
            TokenKind::Semicolon => {
                self.advance();
                None
            }
            TokenKind::Var | TokenKind::Let => {
                let decl_keyword = self.advance();
                Some(Box::new(self.var_declaration(decl_keyword)?))
            }
            TokenKind::Const => {
                let decl_keyword = self.advance();
                Some(Box::new(self.const_declaration(decl_keyword)?))
            }
            _ => Some(Box::new(self.expression_statement()?)),
        };

        let condition = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(TokenKind::Semicolon, "';' after loop condition")?;

        let update = if self.check(TokenKind::RightParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(TokenKind::RightParen, "')' after for clauses")?;

        let body = self.statement()?;
        let span = keyword.span.merge(body.span);
        Ok(Stmt::new(
            StmtKind::For {
                init,
                condition,
                update,
                body: Box::new(body),
            },
            span,
        ))
    }

    // Everything after the `function` keyword: optional name, typed params, return type, body.
    fn function_rest(&mut self, start: Span) -> ParseResult<FunctionDecl> {
        let name = self.match_kind(TokenKind::Identifier).map(|t| t.lexeme);
        self.expect(TokenKind::LeftParen, "'(' before parameters")?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                let param = self.expect(TokenKind::Identifier, "parameter name")?;
                let declared_type = self.optional_type_annotation()?;
                params.push(Param {
                    name: param.lexeme,
                    declared_type,
                    span: param.span,
                });
                if self.match_kind(TokenKind::Comma).is_none() {
                    break;
                }
            }
        }
        self.expect(TokenKind::RightParen, "')' after parameters")?;
        let return_type = self.optional_type_annotation()?;
        let (body, body_span) = self.block()?;
        Ok(FunctionDecl {
            name,
            params,
            return_type,
            body,
            span: start.merge(body_span),
        })
    }

    pub fn expression(&mut self) -> ParseResult<Expr> {
        ensure_sufficient_stack(|| self.assignment())
    }

    fn assignment_op(kind: TokenKind) -> Option<AssignOp> {
        match kind {
            TokenKind::Equal => Some(AssignOp::Assign),
            TokenKind::PlusEqual => Some(AssignOp::Add),
            TokenKind::MinusEqual => Some(AssignOp::Subtract),
            TokenKind::StarEqual => Some(AssignOp::Multiply),
            TokenKind::SlashEqual => Some(AssignOp::Divide),
            TokenKind::PercentEqual => Some(AssignOp::Remainder),
            _ => None,
        }
    }

    fn assignment(&mut self) -> ParseResult<Expr> {
        let target = self.ternary()?;
        let Some(op) = Self::assignment_op(self.peek_kind()) else {
            return Ok(target);
        };
        let op_token = self.advance();
        if !target.is_assignable() {
            return Err(ParseError::InvalidAssignmentTarget {
                span: target.span,
                line: op_token.line,
                column: op_token.column,
            });
        }
        // Right-associative: a = b = c
        let value = self.assignment()?;
        let span = target.span.merge(value.span);
        Ok(Expr::new(
            ExprKind::Assignment {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            span,
        ))
    }

    fn ternary(&mut self) -> ParseResult<Expr> {
        let condition = self.logic_or()?;
        if self.match_kind(TokenKind::Question).is_none() {
            return Ok(condition);
        }
        let then_branch = self.assignment()?;
        self.expect(TokenKind::Colon, "':' in conditional expression")?;
        let else_branch = self.assignment()?;
        let span = condition.span.merge(else_branch.span);
        Ok(Expr::new(
            ExprKind::Ternary {
                condition: Box::new(condition),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
            },
            span,
        ))
    }

    // One left-associative precedence level.
    fn binary_level(
        &mut self,
        operand: fn(&mut Self) -> ParseResult<Expr>,
        operators: &[(TokenKind, BinaryOp)],
    ) -> ParseResult<Expr> {
        let mut left = operand(self)?;
        loop {
            let next = self.peek_kind();
            let Some(&(_, op)) = operators.iter().find(|(kind, _)| *kind == next) else {
                break;
            };
            self.advance();
            let right = operand(self)?;
            let span = left.span.merge(right.span);
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn logic_or(&mut self) -> ParseResult<Expr> {
        self.binary_level(Self::logic_and, &[(TokenKind::OrOr, BinaryOp::Or)])
    }

    fn logic_and(&mut self) -> ParseResult<Expr> {
        self.binary_level(Self::equality, &[(TokenKind::AndAnd, BinaryOp::And)])
    }

    fn equality(&mut self) -> ParseResult<Expr> {
        self.binary_level(Self::comparison, EQUALITY)
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        self.binary_level(Self::term, COMPARISON)
    }

    fn term(&mut self) -> ParseResult<Expr> {
        self.binary_level(Self::factor, TERM)
    }

    fn factor(&mut self) -> ParseResult<Expr> {
        self.binary_level(Self::unary, FACTOR)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        let op = match self.peek_kind() {
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Negate,
            TokenKind::PlusPlus => UnaryOp::Step(StepOp::Increment),
            TokenKind::MinusMinus => UnaryOp::Step(StepOp::Decrement),
            _ => return self.postfix(),
        };
        let op_token = self.advance();
        let operand = ensure_sufficient_stack(|| self.unary())?;
        let span = op_token.span.merge(operand.span);
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    fn postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.call_or_member()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::PlusPlus => StepOp::Increment,
                TokenKind::MinusMinus => StepOp::Decrement,
                _ => break,
            };
            let op_token = self.advance();
            let span = expr.span.merge(op_token.span);
            expr = Expr::new(
                ExprKind::Postfix {
                    op,
                    operand: Box::new(expr),
                },
                span,
            );
        }
        Ok(expr)
    }

    fn call_or_member(&mut self) -> ParseResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            match self.peek_kind() {
                TokenKind::LeftParen => {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.check(TokenKind::RightParen) {
                        loop {
                            args.push(self.expression()?);
                            if self.match_kind(TokenKind::Comma).is_none() {
                                break;
                            }
                        }
                    }
                    let close = self.expect(TokenKind::RightParen, "')' after arguments")?;
                    let span = expr.span.merge(close.span);
                    expr = Expr::new(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        span,
                    );
                }
                TokenKind::Dot => {
                    self.advance();
                    let property = self.expect(TokenKind::Identifier, "property name after '.'")?;
                    let span = expr.span.merge(property.span);
                    expr = Expr::new(
                        ExprKind::Member {
                            object: Box::new(expr),
                            property: property.lexeme,
                        },
                        span,
                    );
                }
                TokenKind::LeftBracket => {
                    self.advance();
                    let index = self.expression()?;
                    let close = self.expect(TokenKind::RightBracket, "']' after index")?;
                    let span = expr.span.merge(close.span);
                    expr = Expr::new(
                        ExprKind::Index {
                            object: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    );
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let token = self.advance();
        let span = token.span;
        let kind = match token.kind {
            TokenKind::Number => match token.literal {
                Some(Literal::Number(n)) => ExprKind::Number(n),
                _ => ExprKind::Number(token.lexeme.parse().unwrap_or(f64::NAN)),
            },
            TokenKind::String => match token.literal {
                Some(Literal::Str {
                    unterminated: true, ..
                }) => {
                    return Err(ParseError::UnterminatedString {
                        span,
                        line: token.line,
                        column: token.column,
                    });
                }
                Some(Literal::Str { value, .. }) => ExprKind::String(value),
                _ => ExprKind::String(token.lexeme.trim_matches('"').to_string()),
            },
            TokenKind::True => ExprKind::Boolean(true),
            TokenKind::False => ExprKind::Boolean(false),
            TokenKind::Null => ExprKind::Null,
            TokenKind::Identifier => ExprKind::Identifier(token.lexeme),
            TokenKind::LeftParen => {
                let inner = self.expression()?;
                let close = self.expect(TokenKind::RightParen, "')' after expression")?;
                return Ok(Expr::new(
                    ExprKind::Grouping(Box::new(inner)),
                    span.merge(close.span),
                ));
            }
            TokenKind::LeftBracket => return self.array_literal(span),
            TokenKind::LeftBrace => return self.object_literal(span),
            TokenKind::Function => {
                let function = self.function_rest(span)?;
                let span = function.span;
                return Ok(Expr::new(ExprKind::Function(Rc::new(function)), span));
            }
            _ => {
                return Err(ParseError::UnexpectedToken {
                    found: token,
                    expected: "expression".to_string(),
                });
            }
        };
        Ok(Expr::new(kind, span))
    }

    fn array_literal(&mut self, open: Span) -> ParseResult<Expr> {
        let mut elements = Vec::new();
        while !self.check(TokenKind::RightBracket) {
            elements.push(self.expression()?);
            if self.match_kind(TokenKind::Comma).is_none() {
                break;
            }
        }
        let close = self.expect(TokenKind::RightBracket, "']' after array elements")?;
        Ok(Expr::new(ExprKind::Array(elements), open.merge(close.span)))
    }

    fn object_literal(&mut self, open: Span) -> ParseResult<Expr> {
        let mut properties = Vec::new();
        while !self.check(TokenKind::RightBrace) {
            let key_token = self.advance();
            let key = match key_token.kind {
                TokenKind::Identifier => key_token.lexeme,
                TokenKind::String if !key_token.is_unterminated_string() => {
                    match key_token.literal {
                        Some(Literal::Str { value, .. }) => value,
                        _ => key_token.lexeme.trim_matches('"').to_string(),
                    }
                }
                _ => {
                    return Err(ParseError::UnexpectedToken {
                        found: key_token,
                        expected: "property name".to_string(),
                    });
                }
            };
            self.expect(TokenKind::Colon, "':' after property name")?;
            let value = self.expression()?;
            properties.push((key, value));
            if self.match_kind(TokenKind::Comma).is_none() {
                break;
            }
        }
        let close = self.expect(TokenKind::RightBrace, "'}' after object properties")?;
        Ok(Expr::new(ExprKind::Object(properties), open.merge(close.span)))
    }
}

// Helper function to lex and parse a string directly (useful for tests and REPL)
pub fn parse_str(input: &str) -> ParseResult<Program> {
    let tokens = crate::lexer::tokenize(input)?;
    Parser::new(tokens).parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::{LexerErrorKind, tokenize};

    fn parse(input: &str) -> Program {
        match parse_str(input) {
            Ok(program) => program,
            Err(e) => panic!("Parsing failed for input '{}': {}", input, e),
        }
    }

    // Parses a single expression statement and returns its expression
    fn parse_expr(input: &str) -> Expr {
        let mut program = parse(input);
        assert_eq!(program.body.len(), 1, "Input: '{}'", input);
        match program.body.remove(0).kind {
            StmtKind::Expr(expr) => expr,
            other => panic!("Expected expression statement, got {:?}", other),
        }
    }

    // Helper for asserting parse errors
    fn assert_parse_error(input: &str, expected_error_variant: ParseError) -> ParseError {
        match parse_str(input) {
            Ok(result) => panic!(
                "Expected parsing to fail for input '{}', but got: {:?}",
                input, result
            ),
            Err(e) => {
                // Compare enum variants, ignoring specific content for simplicity
                assert_eq!(
                    std::mem::discriminant(&e),
                    std::mem::discriminant(&expected_error_variant),
                    "Input: '{}', Expected error variant like {:?}, got: {:?}",
                    input,
                    expected_error_variant,
                    e
                );
                e
            }
        }
    }

    fn unexpected() -> ParseError {
        ParseError::UnexpectedToken {
            found: Token {
                kind: TokenKind::Eof,
                lexeme: String::new(),
                literal: None,
                span: Span::default(),
                line: 0,
                column: 0,
            },
            expected: String::new(),
        }
    }

    fn invalid_target() -> ParseError {
        ParseError::InvalidAssignmentTarget {
            span: Span::default(),
            line: 0,
            column: 0,
        }
    }

    fn binary_parts(expr: &Expr) -> (BinaryOp, &Expr, &Expr) {
        match &expr.kind {
            ExprKind::Binary { op, left, right } => (*op, left, right),
            other => panic!("Expected binary expression, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence() {
        let expr = parse_expr("1 + 2 * 3;");
        let (op, left, right) = binary_parts(&expr);
        assert_eq!(op, BinaryOp::Add);
        assert_eq!(left.kind, ExprKind::Number(1.0));
        let (inner, _, _) = binary_parts(right);
        assert_eq!(inner, BinaryOp::Multiply);

        // || binds looser than &&, which binds looser than ==
        let expr = parse_expr("a || b && c == d;");
        let (op, _, right) = binary_parts(&expr);
        assert_eq!(op, BinaryOp::Or);
        let (op, _, right) = binary_parts(right);
        assert_eq!(op, BinaryOp::And);
        assert_eq!(binary_parts(right).0, BinaryOp::Equal);
    }

    #[test]
    fn test_left_associativity() {
        let expr = parse_expr("10 - 4 - 3;");
        let (op, left, right) = binary_parts(&expr);
        assert_eq!(op, BinaryOp::Subtract);
        assert_eq!(binary_parts(left).0, BinaryOp::Subtract);
        assert_eq!(right.kind, ExprKind::Number(3.0));
    }

    #[test]
    fn test_keyword_operators() {
        let expr = parse_expr("a plus b into c;");
        let (op, _, right) = binary_parts(&expr);
        assert_eq!(op, BinaryOp::Add);
        assert_eq!(binary_parts(right).0, BinaryOp::Multiply);
        let expr = parse_expr("a isgre b;");
        assert_eq!(binary_parts(&expr).0, BinaryOp::Greater);
    }

    #[test]
    fn test_assignment_is_right_associative() {
        let expr = parse_expr("a = b += 1;");
        match expr.kind {
            ExprKind::Assignment { op, target, value } => {
                assert_eq!(op, AssignOp::Assign);
                assert_eq!(target.kind, ExprKind::Identifier("a".into()));
                assert!(matches!(
                    value.kind,
                    ExprKind::Assignment {
                        op: AssignOp::Add,
                        ..
                    }
                ));
            }
            other => panic!("Expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_assignment_targets() {
        assert!(matches!(
            parse_expr("a.b = 1;").kind,
            ExprKind::Assignment { .. }
        ));
        assert!(matches!(
            parse_expr("a[0] %= 2;").kind,
            ExprKind::Assignment {
                op: AssignOp::Remainder,
                ..
            }
        ));
        assert_parse_error("1 = 2;", invalid_target());
        assert_parse_error("a + b = 3;", invalid_target());
        let err = assert_parse_error("f() = 3;", invalid_target());
        assert_eq!(err.span(), Span::new(0, 3));
    }

    #[test]
    fn test_unary_and_postfix() {
        assert!(matches!(
            parse_expr("-x;").kind,
            ExprKind::Unary {
                op: UnaryOp::Negate,
                ..
            }
        ));
        assert!(matches!(
            parse_expr("!!x;").kind,
            ExprKind::Unary {
                op: UnaryOp::Not,
                ..
            }
        ));
        assert!(matches!(
            parse_expr("++i;").kind,
            ExprKind::Unary {
                op: UnaryOp::Step(StepOp::Increment),
                ..
            }
        ));
        assert!(matches!(
            parse_expr("i--;").kind,
            ExprKind::Postfix {
                op: StepOp::Decrement,
                ..
            }
        ));
    }

    #[test]
    fn test_ternary() {
        match parse_expr("a ? 1 : b ? 2 : 3;").kind {
            ExprKind::Ternary { else_branch, .. } => {
                assert!(matches!(else_branch.kind, ExprKind::Ternary { .. }));
            }
            other => panic!("Expected ternary, got {:?}", other),
        }
    }

    #[test]
    fn test_call_member_index_chain() {
        let expr = parse_expr("a.b[0](1, 2);");
        match expr.kind {
            ExprKind::Call { callee, args } => {
                assert_eq!(args.len(), 2);
                match callee.kind {
                    ExprKind::Index { object, index } => {
                        assert_eq!(index.kind, ExprKind::Number(0.0));
                        assert!(matches!(
                            object.kind,
                            ExprKind::Member { ref property, .. } if property == "b"
                        ));
                    }
                    other => panic!("Expected index, got {:?}", other),
                }
            }
            other => panic!("Expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_array_and_object_literals() {
        let expr = parse_expr(r#"x = {a: 1, "b c": [1, 2,],};"#);
        let ExprKind::Assignment { value, .. } = expr.kind else {
            panic!("Expected assignment");
        };
        match value.kind {
            ExprKind::Object(properties) => {
                assert_eq!(properties.len(), 2);
                assert_eq!(properties[0].0, "a");
                assert_eq!(properties[1].0, "b c");
                assert!(matches!(&properties[1].1.kind, ExprKind::Array(e) if e.len() == 2));
            }
            other => panic!("Expected object, got {:?}", other),
        }
        assert!(matches!(parse_expr("[];").kind, ExprKind::Array(e) if e.is_empty()));
        assert_parse_error("x = {1: 2};", unexpected());
    }

    #[test]
    fn test_var_declarations_and_inference() {
        let program = parse("let x = 10; var s: string; let y; let z = x; var b = true;");
        let types: Vec<Option<TypeAnnotation>> = program
            .body
            .iter()
            .map(|stmt| match &stmt.kind {
                StmtKind::VarDecl { declared_type, .. } => *declared_type,
                other => panic!("Expected var decl, got {:?}", other),
            })
            .collect();
        assert_eq!(
            types,
            vec![
                Some(TypeAnnotation::Number),
                Some(TypeAnnotation::String),
                None,
                Some(TypeAnnotation::Any),
                Some(TypeAnnotation::Boolean),
            ]
        );
        assert!(matches!(
            program.body[0].kind,
            StmtKind::VarDecl {
                kind: DeclKind::Let,
                ..
            }
        ));
    }

    #[test]
    fn test_const_declarations() {
        let program = parse("const a: any = 1; loyal b = \"s\";");
        assert!(matches!(
            program.body[0].kind,
            StmtKind::ConstDecl {
                declared_type: Some(TypeAnnotation::Any),
                ..
            }
        ));
        assert!(matches!(
            program.body[1].kind,
            StmtKind::ConstDecl {
                declared_type: Some(TypeAnnotation::String),
                ..
            }
        ));
        let err = assert_parse_error("const c;", unexpected());
        assert!(err.to_string().contains("initializer"), "{}", err);
    }

    #[test]
    fn test_function_declaration() {
        let program =
            parse("declare add(n1: number, n2: number): number { return n1 + n2; } print(add(2,3));");
        assert_eq!(program.body.len(), 2);
        match &program.body[0].kind {
            StmtKind::FunctionDecl(function) => {
                assert_eq!(function.name.as_deref(), Some("add"));
                assert_eq!(function.params.len(), 2);
                assert_eq!(
                    function.params[1].declared_type,
                    Some(TypeAnnotation::Number)
                );
                assert_eq!(function.return_type, Some(TypeAnnotation::Number));
                assert!(matches!(function.body[0].kind, StmtKind::Return(Some(_))));
            }
            other => panic!("Expected function declaration, got {:?}", other),
        }
        assert!(matches!(program.body[1].kind, StmtKind::Print(_)));
    }

    #[test]
    fn test_function_expression() {
        let program = parse("var f = function(a) { emit a; };");
        match &program.body[0].kind {
            StmtKind::VarDecl {
                initializer: Some(init),
                declared_type,
                ..
            } => {
                assert!(matches!(&init.kind, ExprKind::Function(f) if f.name.is_none()));
                assert_eq!(*declared_type, Some(TypeAnnotation::Any));
            }
            other => panic!("Expected var decl, got {:?}", other),
        }
    }

    #[test]
    fn test_control_flow_statements() {
        let program = parse(
            "if (a) { b; } else if (c) d; else { e; }
             while (x < 3) { x++; continue; }
             for (;;) { break; }
             for (i = 0; i < 3; i++) {}
             for (let j = 0; ; ) {}",
        );
        assert_eq!(program.body.len(), 5);
        match &program.body[0].kind {
            StmtKind::If {
                else_branch: Some(else_branch),
                ..
            } => assert!(matches!(else_branch.kind, StmtKind::If { .. })),
            other => panic!("Expected if/else, got {:?}", other),
        }
        assert!(matches!(
            program.body[2].kind,
            StmtKind::For {
                init: None,
                condition: None,
                update: None,
                ..
            }
        ));
        match &program.body[3].kind {
            StmtKind::For {
                init: Some(init),
                update: Some(_),
                ..
            } => assert!(matches!(init.kind, StmtKind::Expr(_))),
            other => panic!("Expected for loop, got {:?}", other),
        }
        match &program.body[4].kind {
            StmtKind::For {
                init: Some(init),
                condition: None,
                update: None,
                ..
            } => assert!(matches!(init.kind, StmtKind::VarDecl { .. })),
            other => panic!("Expected for loop, got {:?}", other),
        }
    }

    #[test]
    fn test_statement_spans_ignore_whitespace() {
        let program = parse("  let  x = 1;\n");
        assert_eq!(program.body[0].span, Span::new(2, 13));
    }

    #[test]
    fn test_unexpected_token_reports_position() {
        let err = assert_parse_error("let a = 1;\nlet = 5;", unexpected());
        match err {
            ParseError::UnexpectedToken { found, expected } => {
                assert_eq!(found.kind, TokenKind::Equal);
                assert_eq!((found.line, found.column), (2, 5));
                assert_eq!(expected, "variable name");
            }
            other => panic!("Unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_missing_semicolon_reports_eof() {
        let err = assert_parse_error("print 1", unexpected());
        assert_eq!(
            err.to_string(),
            "Expected ';' after print value, found end of input at 1:8"
        );
        assert_parse_error("{ let a = 1;", unexpected());
        assert_parse_error("(1 + 2;", unexpected());
    }

    #[test]
    fn test_unterminated_string_is_a_parse_error() {
        assert_parse_error(
            "print \"abc",
            ParseError::UnterminatedString {
                span: Span::default(),
                line: 0,
                column: 0,
            },
        );
    }

    #[test]
    fn test_parse_lexer_error_propagation() {
        let err = assert_parse_error(
            "let a = #;",
            ParseError::LexerError(LexerError {
                error: LexerErrorKind::UnexpectedCharacter('#'),
                span: Span::default(),
                line: 0,
                column: 0,
            }),
        );
        assert_eq!(err.span(), Span::new(8, 9));
    }

    #[test]
    fn test_reparsing_round_tripped_tokens_is_idempotent() {
        let source = "let total = 0;\nfor (var i = 0; i < 3; i++) {\n  total += i * 2;\n}\nsay(total);";
        let rebuilt: String = tokenize(source)
            .unwrap()
            .iter()
            .map(|t| t.lexeme.as_str())
            .collect();
        let original = Parser::new(tokenize(source).unwrap()).parse_program().unwrap();
        let reparsed = Parser::new(tokenize(&rebuilt).unwrap()).parse_program().unwrap();
        assert_eq!(original, reparsed);
    }
}
