//! Lexer for rule expressions using logos.

use crate::error::ParseError;
use crate::span::Span;
use logos::Logos;

/// Token types for rule expressions.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    // Keyword literals (both spellings are accepted)
    #[token("True")]
    #[token("true")]
    True,
    #[token("False")]
    #[token("false")]
    False,
    #[token("None")]
    #[token("null")]
    None,

    // Boolean keywords
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,
    #[token("in")]
    In,

    // Comparison operators
    #[token("==")]
    EqEq,
    #[token("!=")]
    Ne,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,

    // Arithmetic
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

    // Identifier
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // String literal (double-quoted)
    #[regex(r#""([^"\\]|\\.)*""#, |lex| {
        let s = lex.slice();
        unescape_string(&s[1..s.len() - 1])
    })]
    // String literal (single-quoted)
    #[regex(r#"'([^'\\]|\\.)*'"#, |lex| {
        let s = lex.slice();
        unescape_string(&s[1..s.len() - 1])
    })]
    Str(String),

    // Integer literal; the sign is a unary operator
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    // Float literal
    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    // Punctuation
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
}

/// Unescape a string literal, handling common escape sequences.
fn unescape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('r') => result.push('\r'),
                Some('t') => result.push('\t'),
                Some('\\') => result.push('\\'),
                Some('"') => result.push('"'),
                Some('\'') => result.push('\''),
                Some(other) => {
                    result.push('\\');
                    result.push(other);
                }
                None => result.push('\\'),
            }
        } else {
            result.push(c);
        }
    }

    result
}

/// A token with its span in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Lexer that produces spanned tokens.
///
/// Unlike a permissive tokenizer, unrecognised input is an error: a rule
/// expression that does not lex cleanly is never evaluated.
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
    peeked: Option<Option<Result<SpannedToken, ParseError>>>,
}

impl<'source> Lexer<'source> {
    /// Create a new lexer for the given source.
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Token::lexer(source),
            peeked: None,
        }
    }

    /// Peek at the next token without consuming it.
    pub fn peek(&mut self) -> Result<Option<&SpannedToken>, ParseError> {
        if self.peeked.is_none() {
            self.peeked = Some(self.next_inner());
        }
        match self.peeked.as_ref() {
            Some(Some(Ok(tok))) => Ok(Some(tok)),
            Some(Some(Err(e))) => Err(e.clone()),
            _ => Ok(None),
        }
    }

    /// Get the next token.
    pub fn next_token(&mut self) -> Result<Option<SpannedToken>, ParseError> {
        let next = match self.peeked.take() {
            Some(peeked) => peeked,
            None => self.next_inner(),
        };
        next.transpose()
    }

    fn next_inner(&mut self) -> Option<Result<SpannedToken, ParseError>> {
        let token = self.inner.next()?;
        let span: Span = self.inner.span().into();
        Some(match token {
            Ok(token) => Ok(SpannedToken { token, span }),
            Err(()) => Err(ParseError::new(
                format!("unexpected input '{}'", self.inner.slice()),
                span,
            )),
        })
    }

    /// Byte length of the source, used for end-of-input spans.
    pub fn source_len(&self) -> usize {
        self.inner.source().len()
    }
}

/// Tokenize a source string into a vector of spanned tokens.
pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>, ParseError> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    while let Some(tok) = lexer.next_token()? {
        tokens.push(tok);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn test_domain_tokens() {
        assert_eq!(
            kinds("[('user_id', '=', user.id)]"),
            vec![
                Token::LBracket,
                Token::LParen,
                Token::Str("user_id".into()),
                Token::Comma,
                Token::Str("=".into()),
                Token::Comma,
                Token::Ident("user".into()),
                Token::Dot,
                Token::Ident("id".into()),
                Token::RParen,
                Token::RBracket,
            ]
        );
    }

    #[test]
    fn test_numbers_and_keywords() {
        assert_eq!(
            kinds("1 - 2.5 not in None"),
            vec![
                Token::Int(1),
                Token::Minus,
                Token::Float(2.5),
                Token::Not,
                Token::In,
                Token::None,
            ]
        );
        assert_eq!(kinds("True false"), vec![Token::True, Token::False]);
    }

    #[test]
    fn test_escapes() {
        assert_eq!(kinds(r#"'it\'s'"#), vec![Token::Str("it's".into())]);
        assert_eq!(kinds(r#""a\nb""#), vec![Token::Str("a\nb".into())]);
    }

    #[test]
    fn test_rejects_unknown_input() {
        let err = tokenize("user.id; import os").unwrap_err();
        assert_eq!(err.span, Span::new(7, 8));
    }
}
