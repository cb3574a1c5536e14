//! Recursive descent parser for rule expressions.
//!
//! Precedence, lowest first: `or`, `and`, `not`, comparisons (including
//! `in` / `not in`), `+ -`, `* / %`, unary sign, then postfix attribute
//! access, calls and indexing.

use crate::ast::{BinaryOp, Expr, ExprKind, UnaryOp};
use crate::error::ParseError;
use crate::lexer::{Lexer, SpannedToken, Token};
use crate::span::Span;

/// Maximum nesting of brackets and unary operators.
pub const MAX_DEPTH: usize = 64;

/// Parser for rule expressions.
pub struct Parser<'source> {
    lexer: Lexer<'source>,
    depth: usize,
}

impl<'source> Parser<'source> {
    /// Create a new parser for the given source.
    pub fn new(source: &'source str) -> Self {
        Self {
            lexer: Lexer::new(source),
            depth: 0,
        }
    }

    /// Parse a complete expression; trailing input is an error.
    pub fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_or()?;
        if let Some(tok) = self.lexer.next_token()? {
            return Err(ParseError::new(
                format!("unexpected {:?} after expression", tok.token),
                tok.span,
            ));
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or)? {
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_not()?;
        while self.eat(&Token::And)? {
            let right = self.parse_not()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if let Some(tok) = self.lexer.peek()? {
            if tok.token == Token::Not {
                let start = tok.span;
                self.lexer.next_token()?;
                self.enter(start)?;
                let operand = self.parse_not()?;
                self.depth -= 1;
                let span = start.merge(operand.span);
                return Ok(Expr::new(ExprKind::Unary(UnaryOp::Not, Box::new(operand)), span));
            }
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_additive()?;

        let op = match self.lexer.peek()?.map(|t| &t.token) {
            Some(Token::EqEq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            Some(Token::In) => BinaryOp::In,
            Some(Token::Not) => {
                self.lexer.next_token()?;
                self.expect(Token::In)
                    .map_err(|e| e.with_hint("only 'not in' may follow an operand"))?;
                let right = self.parse_additive()?;
                return Ok(binary(BinaryOp::NotIn, left, right));
            }
            _ => return Ok(left),
        };
        self.lexer.next_token()?;
        let right = self.parse_additive()?;
        Ok(binary(op, left, right))
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.lexer.peek()?.map(|t| &t.token) {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.lexer.next_token()?;
            let right = self.parse_term()?;
            left = binary(op, left, right);
        }
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.lexer.peek()?.map(|t| &t.token) {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.lexer.next_token()?;
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.lexer.peek()? {
            Some(SpannedToken { token: Token::Minus, span }) => Some((UnaryOp::Neg, *span)),
            Some(SpannedToken { token: Token::Plus, span }) => Some((UnaryOp::Pos, *span)),
            _ => None,
        };
        match op {
            Some((op, start)) => {
                self.lexer.next_token()?;
                self.enter(start)?;
                let operand = self.parse_unary()?;
                self.depth -= 1;
                let span = start.merge(operand.span);
                Ok(Expr::new(ExprKind::Unary(op, Box::new(operand)), span))
            }
            None => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.lexer.peek()?.map(|t| &t.token) {
                Some(Token::Dot) => {
                    self.lexer.next_token()?;
                    let tok = self.next()?;
                    let name = match tok.token {
                        Token::Ident(name) => name,
                        other => {
                            return Err(ParseError::new(
                                format!("expected attribute name, found {:?}", other),
                                tok.span,
                            ))
                        }
                    };
                    let span = expr.span.merge(tok.span);
                    expr = Expr::new(ExprKind::Attr(Box::new(expr), name), span);
                }
                Some(Token::LParen) => {
                    let open = self.next()?.span;
                    self.enter(open)?;
                    let (args, end) = self.parse_sequence(Token::RParen)?;
                    self.depth -= 1;
                    let span = expr.span.merge(end);
                    expr = Expr::new(ExprKind::Call(Box::new(expr), args), span);
                }
                Some(Token::LBracket) => {
                    let open = self.next()?.span;
                    self.enter(open)?;
                    let index = self.parse_or()?;
                    let end = self.expect(Token::RBracket)?;
                    self.depth -= 1;
                    let span = expr.span.merge(end);
                    expr = Expr::new(ExprKind::Index(Box::new(expr), Box::new(index)), span);
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let tok = self.next()?;
        let span = tok.span;
        let kind = match tok.token {
            Token::Int(i) => ExprKind::Int(i),
            Token::Float(f) => ExprKind::Float(f),
            Token::Str(s) => ExprKind::Str(s),
            Token::True => ExprKind::Bool(true),
            Token::False => ExprKind::Bool(false),
            Token::None => ExprKind::None,
            Token::Ident(name) => ExprKind::Name(name),
            Token::LBracket => {
                self.enter(span)?;
                let (items, end) = self.parse_sequence(Token::RBracket)?;
                self.depth -= 1;
                return Ok(Expr::new(ExprKind::List(items), span.merge(end)));
            }
            Token::LParen => {
                self.enter(span)?;
                let result = self.parse_parenthesized(span);
                self.depth -= 1;
                return result;
            }
            other => {
                return Err(ParseError::new(
                    format!("expected an expression, found {:?}", other),
                    span,
                ))
            }
        };
        Ok(Expr::new(kind, span))
    }

    /// `()` is an empty tuple, `(x)` a grouping, `(x,)` and `(x, y)` tuples.
    fn parse_parenthesized(&mut self, open: Span) -> Result<Expr, ParseError> {
        if self.eat(&Token::RParen)? {
            return Ok(Expr::new(ExprKind::Tuple(Vec::new()), open));
        }
        let first = self.parse_or()?;
        if self.eat(&Token::RParen)? {
            return Ok(first);
        }
        self.expect(Token::Comma)?;
        let mut items = vec![first];
        let (rest, end) = self.parse_sequence(Token::RParen)?;
        items.extend(rest);
        Ok(Expr::new(ExprKind::Tuple(items), open.merge(end)))
    }

    /// Comma-separated expressions up to `close`, trailing comma allowed.
    fn parse_sequence(&mut self, close: Token) -> Result<(Vec<Expr>, Span), ParseError> {
        let mut items = Vec::new();
        loop {
            if let Some(tok) = self.lexer.peek()? {
                if tok.token == close {
                    let end = tok.span;
                    self.lexer.next_token()?;
                    return Ok((items, end));
                }
            }
            items.push(self.parse_or()?);
            if !self.eat(&Token::Comma)? {
                let end = self.expect(close)?;
                return Ok((items, end));
            }
        }
    }

    fn enter(&mut self, span: Span) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ParseError::new("expression nested too deeply", span));
        }
        Ok(())
    }

    fn eat(&mut self, token: &Token) -> Result<bool, ParseError> {
        match self.lexer.peek()? {
            Some(tok) if &tok.token == token => {
                self.lexer.next_token()?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn next(&mut self) -> Result<SpannedToken, ParseError> {
        let end = self.lexer.source_len();
        self.lexer
            .next_token()?
            .ok_or_else(|| ParseError::new("unexpected end of expression", Span::new(end, end)))
    }

    fn expect(&mut self, expected: Token) -> Result<Span, ParseError> {
        let tok = self.next()?;
        if tok.token == expected {
            Ok(tok.span)
        } else {
            Err(ParseError::new(
                format!("expected {:?}, found {:?}", expected, tok.token),
                tok.span,
            ))
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    let span = left.span.merge(right.span);
    Expr::new(ExprKind::Binary(op, Box::new(left), Box::new(right)), span)
}

/// Parse a source string into an expression.
pub fn parse(source: &str) -> Result<Expr, ParseError> {
    Parser::new(source).parse_expression()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kind(source: &str) -> ExprKind {
        parse(source).unwrap().kind
    }

    #[test]
    fn test_parse_domain_literal() {
        let expr = parse("['|', ('a', '=', 1), ('b', '=', user.id)]").unwrap();
        let ExprKind::List(items) = expr.kind else {
            panic!("expected list");
        };
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].kind, ExprKind::Str("|".into()));
        let ExprKind::Tuple(leaf) = &items[2].kind else {
            panic!("expected tuple");
        };
        assert_eq!(leaf[2].kind.callee_path(), Some("user.id".into()));
    }

    #[test]
    fn test_precedence() {
        let ExprKind::Binary(op, left, _) = kind("1 + 2 * 3") else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Add);
        assert_eq!(left.kind, ExprKind::Int(1));

        let ExprKind::Binary(op, ..) = kind("a or b and c") else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Or);
    }

    #[test]
    fn test_not_in() {
        let ExprKind::Binary(op, ..) = kind("1 not in [2, 3]") else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::NotIn);
    }

    #[test]
    fn test_tuples_and_grouping() {
        assert_eq!(kind("()"), ExprKind::Tuple(vec![]));
        assert_eq!(kind("(1)"), ExprKind::Int(1));
        assert!(matches!(kind("(1,)"), ExprKind::Tuple(items) if items.len() == 1));
        assert!(matches!(kind("[1, 2,]"), ExprKind::List(items) if items.len() == 2));
    }

    #[test]
    fn test_calls_and_index() {
        assert!(matches!(kind("len(user.group_ids)"), ExprKind::Call(_, args) if args.len() == 1));
        assert!(matches!(kind("company_ids[0]"), ExprKind::Index(..)));
    }

    #[test]
    fn test_errors() {
        assert!(parse("[1, 2").is_err());
        assert!(parse("1 2").is_err());
        assert!(parse("user.").is_err());
        assert!(parse("a not b").is_err());
    }

    #[test]
    fn test_depth_limit() {
        let deep = format!("{}1{}", "[".repeat(MAX_DEPTH + 1), "]".repeat(MAX_DEPTH + 1));
        let err = parse(&deep).unwrap_err();
        assert!(err.message.contains("nested too deeply"));

        let ok = format!("{}1{}", "[".repeat(8), "]".repeat(8));
        assert!(parse(&ok).is_ok());
    }
}
