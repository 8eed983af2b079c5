mod token;

pub use token::*;

use std::{error::Error, fmt::Display, iter::Peekable, rc::Rc, str::Chars};

use once_cell::sync::Lazy;

use crate::location::SourceLocation;

/// Keywords that lex as their own token kind rather than a bare identifier.
static KEYWORDS: Lazy<&'static [(&'static str, TokenKind)]> = Lazy::new(|| {
    &[
        ("true", TokenKind::Boolean(true)),
        ("false", TokenKind::Boolean(false)),
    ]
});

#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub message: String,
    pub location: SourceLocation,
}

impl Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.message, self.location)
    }
}

impl Error for LexError {}

pub type LexResult<T> = Result<T, LexError>;

/// Scans XMD source text into a dense token sequence.
///
/// Strings are stored with their escape sequences untouched (see
/// [`TokenKind::String`]), which matters for directive bodies such as
/// `set cmd "grep -E \"a|b\""`, where the evaluator and ultimately the shell
/// capability need to see the original quoting.
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    tokens: Vec<Token>,
    iterator: Peekable<Chars<'a>>,
    line: usize,
    col: usize,
    filename: Rc<str>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str, filename: impl Into<Rc<str>>) -> Self {
        Self {
            tokens: vec![],
            iterator: input.chars().peekable(),
            line: 1,
            col: 1,
            filename: filename.into(),
        }
    }

    fn here(&self) -> SourceLocation {
        SourceLocation::new(self.line, self.col, self.filename.clone())
    }

    fn peek(&mut self) -> Option<char> {
        self.iterator.peek().copied()
    }

    fn peek2(&self) -> Option<char> {
        let mut clone = self.iterator.clone();
        clone.next();
        clone.next()
    }

    fn advance(&mut self) -> Option<char> {
        let next = self.iterator.next();
        match next {
            Some('\n') => {
                self.line += 1;
                self.col = 1;
            }
            Some(_) => self.col += 1,
            None => {}
        }
        next
    }

    fn eat_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.advance();
        }
    }

    /// Scans the whole input, producing a token sequence terminated by `Eof`.
    pub fn lex(mut self) -> LexResult<Vec<Token>> {
        loop {
            self.eat_whitespace();

            let Some(next) = self.peek() else {
                self.tokens.push(Token::new(TokenKind::Eof, self.here()));
                break;
            };

            match next {
                c if c == '_' || c.is_alphabetic() => self.lex_identifier(),
                c if c.is_ascii_digit() => self.lex_number()?,
                '"' => self.lex_string()?,
                '(' => self.push_single(TokenKind::LParen),
                ')' => self.push_single(TokenKind::RParen),
                '[' => self.push_single(TokenKind::LBracket),
                ']' => self.push_single(TokenKind::RBracket),
                '{' => self.push_single(TokenKind::LBrace),
                '}' => self.push_single(TokenKind::RBrace),
                ',' => self.push_single(TokenKind::Comma),
                ';' => self.push_single(TokenKind::Semicolon),
                ':' => self.push_single(TokenKind::Colon),
                _ => self.lex_operator()?,
            }
        }

        Ok(self.tokens)
    }

    fn push_single(&mut self, kind: TokenKind) {
        let location = self.here();
        self.advance();
        self.tokens.push(Token::new(kind, location));
    }

    fn lex_identifier(&mut self) {
        let location = self.here();
        let mut name = String::new();

        while matches!(self.peek(), Some(c) if c == '_' || c.is_alphanumeric()) {
            name.push(self.advance().unwrap());
        }

        let kind = KEYWORDS
            .iter()
            .find(|(keyword, _)| *keyword == name)
            .map(|(_, kind)| kind.clone())
            .unwrap_or(TokenKind::Identifier(name));

        self.tokens.push(Token::new(kind, location));
    }

    fn lex_number(&mut self) -> LexResult<()> {
        let location = self.here();
        let mut text = String::new();

        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            text.push(self.advance().unwrap());
        }

        if self.peek() == Some('.') && matches!(self.peek2(), Some(c) if c.is_ascii_digit()) {
            text.push(self.advance().unwrap());
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                text.push(self.advance().unwrap());
            }
        }

        let value = text.parse::<f64>().map_err(|_| LexError {
            message: format!("failed to parse number '{text}'"),
            location: location.clone(),
        })?;

        self.tokens
            .push(Token::new(TokenKind::Number(value), location));

        Ok(())
    }

    /// Scans a string literal, preserving escape sequences verbatim. An
    /// unterminated string stops the scan at the offending character so the
    /// parser can report a syntax error located there.
    fn lex_string(&mut self) -> LexResult<()> {
        let location = self.here();
        self.advance(); // opening quote

        let mut value = String::new();
        loop {
            match self.advance() {
                Some('"') => {
                    self.tokens
                        .push(Token::new(TokenKind::String(value), location));
                    return Ok(());
                }
                Some('\\') => {
                    value.push('\\');
                    if let Some(escaped) = self.advance() {
                        value.push(escaped);
                    }
                }
                Some(c) => value.push(c),
                None => {
                    return Err(LexError {
                        message: "unterminated string literal".to_owned(),
                        location,
                    });
                }
            }
        }
    }

    fn lex_operator(&mut self) -> LexResult<()> {
        let location = self.here();
        let first = self.peek().unwrap();
        let second = self.peek2();

        let two_char = second.map(|s| format!("{first}{s}"));
        let op = match two_char.as_deref() {
            Some("==") => Some(Operator::EqEq),
            Some("!=") => Some(Operator::NotEq),
            Some("<=") => Some(Operator::LtEq),
            Some(">=") => Some(Operator::GtEq),
            Some("&&") => Some(Operator::And),
            Some("||") => Some(Operator::Or),
            Some("+=") => Some(Operator::PlusEq),
            _ => None,
        };

        let op = match op {
            Some(op) => {
                self.advance();
                self.advance();
                op
            }
            None => {
                let op = match first {
                    '=' => Operator::Eq,
                    '+' => Operator::Plus,
                    '-' => Operator::Minus,
                    '*' => Operator::Star,
                    '/' => Operator::Slash,
                    '<' => Operator::Lt,
                    '>' => Operator::Gt,
                    '!' => Operator::Not,
                    other => {
                        return Err(LexError {
                            message: format!("unexpected character '{other}'"),
                            location,
                        });
                    }
                };
                self.advance();
                op
            }
        };

        self.tokens
            .push(Token::new(TokenKind::Operator(op), location));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(src: &str) -> Vec<TokenKind> {
        Lexer::new(src, "test.xmd")
            .lex()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_identifiers_and_keywords() {
        assert_eq!(
            lex("foo_bar true false"),
            vec![
                TokenKind::Identifier("foo_bar".into()),
                TokenKind::Boolean(true),
                TokenKind::Boolean(false),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_numbers() {
        assert_eq!(
            lex("42 3.5"),
            vec![
                TokenKind::Number(42.0),
                TokenKind::Number(3.5),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn preserves_escape_sequences_in_strings() {
        let tokens = lex(r#""grep -E \"a|b\"""#);
        assert_eq!(
            tokens[0],
            TokenKind::String(r#"grep -E \"a|b\""#.to_owned())
        );
    }

    #[test]
    fn unterminated_string_is_a_located_error() {
        let err = Lexer::new(r#""unterminated"#, "test.xmd").lex().unwrap_err();
        assert_eq!(err.location.line, 1);
        assert_eq!(err.location.column, 1);
    }

    #[test]
    fn greedy_longest_match_operators() {
        assert_eq!(
            lex("a += 1"),
            vec![
                TokenKind::Identifier("a".into()),
                TokenKind::Operator(Operator::PlusEq),
                TokenKind::Number(1.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn minus_always_lexes_as_operator() {
        assert_eq!(
            lex("-5"),
            vec![
                TokenKind::Operator(Operator::Minus),
                TokenKind::Number(5.0),
                TokenKind::Eof,
            ]
        );
    }
}
