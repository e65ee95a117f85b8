//! Token stream for the parser.
//!
//! Recognition itself is generated by `logos`; this module adds the one-token
//! lookahead the parser consumes and turns logos failures into spanned errors.

mod token;

pub use token::{LexError, Token};

use logos::Logos;

use crate::Span;

/// A lexical error together with where it happened.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedLexError {
    pub error: LexError,
    pub span: Span,
}

/// On-demand tokenizer with one token of lookahead.
///
/// `peek()` is the current (not yet consumed) token, `None` once the source is
/// exhausted. `advance()` consumes it and hands it back to the caller, which
/// is how the parser reads the payload of the "previous" token.
pub struct Lexer<'src> {
    inner: logos::Lexer<'src, Token>,
    current: Option<Token>,
    span: Span,
    prev_span: Span,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Result<Self, SpannedLexError> {
        let mut lexer = Lexer {
            inner: Token::lexer(source),
            current: None,
            span: Span::default(),
            prev_span: Span::default(),
        };
        lexer.advance()?;
        Ok(lexer)
    }

    pub fn source(&self) -> &'src str {
        self.inner.source()
    }

    /// The lookahead token, or `None` at end of input.
    pub fn peek(&self) -> Option<&Token> {
        self.current.as_ref()
    }

    /// Span of the lookahead token (an empty span at the end of input).
    pub fn span(&self) -> Span {
        self.span.clone()
    }

    /// Span of the most recently consumed token.
    pub fn prev_span(&self) -> Span {
        self.prev_span.clone()
    }

    /// Consumes the lookahead token and returns it.
    pub fn advance(&mut self) -> Result<Option<Token>, SpannedLexError> {
        self.prev_span = self.span.clone();
        let next = match self.inner.next() {
            None => {
                let end = self.inner.source().len();
                self.span = Span::new(end, end);
                None
            }
            Some(result) => {
                let range = self.inner.span();
                self.span = Span(range.clone());
                match result {
                    Ok(token) => Some(token),
                    Err(LexError::Unrecognized) => {
                        let c = self.inner.slice().chars().next().unwrap_or('\0');
                        return Err(SpannedLexError {
                            error: LexError::InvalidCharacter(c),
                            span: Span(range),
                        });
                    }
                    Err(error) => {
                        return Err(SpannedLexError {
                            error,
                            span: Span(range),
                        });
                    }
                }
            }
        };
        Ok(core::mem::replace(&mut self.current, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tokens(source: &str) -> Result<Vec<Token>, SpannedLexError> {
        let mut lexer = Lexer::new(source)?;
        let mut out = Vec::new();
        while lexer.peek().is_some() {
            out.extend(lexer.advance()?);
        }
        Ok(out)
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            tokens("let lettuce fn while_ loop break").unwrap(),
            vec![
                Token::Let,
                Token::Ident("lettuce".into()),
                Token::Fn,
                Token::Ident("while_".into()),
                Token::Loop,
                Token::Break,
            ]
        );
    }

    #[test]
    fn test_operators_longest_match() {
        assert_eq!(
            tokens("+= ++ + != ! <= << < ... .. . && &").unwrap(),
            vec![
                Token::PlusAssign,
                Token::PlusPlus,
                Token::Plus,
                Token::NotEq,
                Token::Bang,
                Token::Le,
                Token::Shl,
                Token::Lt,
                Token::Ellipsis,
                Token::DotDot,
                Token::Dot,
                Token::AndAnd,
                Token::Amp,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            tokens("0 42 3.25 9223372036854775807").unwrap(),
            vec![
                Token::Int(0),
                Token::Int(42),
                Token::Float(3.25),
                Token::Int(i64::MAX),
            ]
        );
    }

    #[test]
    fn test_integer_overflow() {
        let err = tokens("99999999999999999999").unwrap_err();
        assert_eq!(err.error, LexError::IntegerOverflow);
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            tokens(r#""a\tb\n\"q\"""#).unwrap(),
            vec![Token::Str("a\tb\n\"q\"".into())]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokens("let s = \"abc").unwrap_err();
        assert_eq!(err.error, LexError::UnterminatedString);
        assert_eq!(err.span, Span::new(8, 12));

        let err = tokens("\"abc\ndef\"").unwrap_err();
        assert_eq!(err.error, LexError::UnterminatedString);
    }

    #[test]
    fn test_invalid_escape() {
        let err = tokens(r#""\q""#).unwrap_err();
        assert_eq!(err.error, LexError::InvalidEscape('q'));
    }

    #[test]
    fn test_invalid_character() {
        let err = tokens("let a = 1 @ 2").unwrap_err();
        assert_eq!(err.error, LexError::InvalidCharacter('@'));
        assert_eq!(err.span, Span::new(10, 11));
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            tokens("1 // one\n2").unwrap(),
            vec![Token::Int(1), Token::Int(2)]
        );
    }

    #[test]
    fn test_lookahead_and_spans() {
        let mut lexer = Lexer::new("let x").unwrap();
        assert_eq!(lexer.peek(), Some(&Token::Let));
        assert_eq!(lexer.span(), Span::new(0, 3));
        assert_eq!(lexer.advance().unwrap(), Some(Token::Let));
        assert_eq!(lexer.prev_span(), Span::new(0, 3));
        assert_eq!(lexer.peek(), Some(&Token::Ident("x".into())));
        lexer.advance().unwrap();
        assert_eq!(lexer.peek(), None);
        assert_eq!(lexer.span(), Span::new(5, 5));
    }
}
