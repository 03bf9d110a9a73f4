use std::{collections::BTreeMap, str::Chars};

use itertools::{PeekNth, peek_nth};
use once_cell::sync::Lazy;
use strum::EnumString;

use super::{SourceFile, error::CompileError};

#[derive(Debug)]
pub struct Lexer<'source> {
    source: &'source SourceFile,
    position: usize,
    chars: PeekNth<Chars<'source>>,
    peeked: Option<Token>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /* Words */
    Keyword(Keyword), // fun
    Identifier,       // main

    /* Literals */
    IntegerLiteral, // 1
    CharLiteral,    // 'A'
    StringLiteral,  // "hello, world"

    /* Delimiters */
    OpenParen,  // (
    CloseParen, // )
    Comma,      // ,

    /* Unary Ops */
    Bang,  // !
    Caret, // ^

    /* Unary + Binary Ops */
    Plus,  // +
    Minus, // -

    /* Binary Ops */
    Asterisk,             // *
    Divide,               // /
    Modulus,              // %
    LogicalAnd,           // &&
    LogicalOr,            // ||
    DoubleEquals,         // ==
    NotEquals,            // !=
    LessThan,             // <
    LessThanOrEqualTo,    // <=
    GreaterThan,          // >
    GreaterThanOrEqualTo, // >=

    /* Assignment */
    Equals, // =

    EndOfFile,
}

impl TokenKind {
    pub fn is_comparison_operator(&self) -> bool {
        matches!(
            self,
            Self::NotEquals
                | Self::DoubleEquals
                | Self::LessThan
                | Self::LessThanOrEqualTo
                | Self::GreaterThan
                | Self::GreaterThanOrEqualTo
        )
    }

    pub fn is_term_operator(&self) -> bool {
        matches!(self, Self::Plus | Self::Minus)
    }

    pub fn is_factor_operator(&self) -> bool {
        matches!(self, Self::Asterisk | Self::Divide | Self::Modulus)
    }

    pub fn is_prefix_operator(&self) -> bool {
        matches!(self, Self::Bang | Self::Plus | Self::Minus | Self::Caret)
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Self::IntegerLiteral | Self::CharLiteral | Self::StringLiteral
        )
    }
}

impl core::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            TokenKind::Keyword(keyword) => return write!(f, "'{}'", keyword.as_ref()),
            TokenKind::Identifier => "identifier",
            TokenKind::IntegerLiteral => "integer constant",
            TokenKind::CharLiteral => "character constant",
            TokenKind::StringLiteral => "string constant",
            TokenKind::OpenParen => "'('",
            TokenKind::CloseParen => "')'",
            TokenKind::Comma => "','",
            TokenKind::Bang => "'!'",
            TokenKind::Caret => "'^'",
            TokenKind::Plus => "'+'",
            TokenKind::Minus => "'-'",
            TokenKind::Asterisk => "'*'",
            TokenKind::Divide => "'/'",
            TokenKind::Modulus => "'%'",
            TokenKind::LogicalAnd => "'&&'",
            TokenKind::LogicalOr => "'||'",
            TokenKind::DoubleEquals => "'=='",
            TokenKind::NotEquals => "'!='",
            TokenKind::LessThan => "'<'",
            TokenKind::LessThanOrEqualTo => "'<='",
            TokenKind::GreaterThan => "'>'",
            TokenKind::GreaterThanOrEqualTo => "'>='",
            TokenKind::Equals => "'='",
            TokenKind::EndOfFile => "end of file",
        };

        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Keyword {
    Fun,
    Var,
    If,
    Then,
    Else,
    While,
    Do,
    Let,
    In,
    End,
}

/// Table of single char tokens (matched after longer sequences are checked for)
static SINGLE_TOKENS: Lazy<BTreeMap<char, TokenKind>> = Lazy::new(|| {
    BTreeMap::from([
        ('(', TokenKind::OpenParen),
        (')', TokenKind::CloseParen),
        (',', TokenKind::Comma),
        ('!', TokenKind::Bang),
        ('^', TokenKind::Caret),
        ('+', TokenKind::Plus),
        ('-', TokenKind::Minus),
        ('*', TokenKind::Asterisk),
        ('/', TokenKind::Divide),
        ('%', TokenKind::Modulus),
        ('=', TokenKind::Equals),
        ('<', TokenKind::LessThan),
        ('>', TokenKind::GreaterThan),
    ])
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// The smallest span covering both `self` and `other`
    pub fn to(self, other: Span) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source SourceFile) -> Self {
        Self {
            source,
            chars: peek_nth(source.contents.chars()),
            position: 0,
            peeked: None,
        }
    }

    pub fn source(&self) -> &'source SourceFile {
        self.source
    }

    fn error(&self, start: usize, message: impl Into<String>) -> CompileError {
        CompileError::new(Span::new(start, self.position.max(start + 1)), message)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.position += c.len_utf8();
        Some(c)
    }

    fn ignore_whitespace(&mut self) {
        while let Some(c) = self.chars.peek().copied() {
            if !c.is_ascii_whitespace() {
                break;
            }

            self.bump();
        }
    }

    fn ignore_line(&mut self) {
        while let Some(c) = self.chars.peek().copied() {
            if c == '\n' {
                break;
            }

            self.bump();
        }
    }

    /// Reads one (possibly escaped) character of a char or string constant
    fn read_escapable(&mut self, wrapper: char, start: usize) -> Result<(), CompileError> {
        let Some(c) = self.bump() else {
            return Err(self.error(start, "Reached end of file while reading a constant."));
        };

        match c {
            '\\' => match self.bump() {
                Some('n' | '\\') => Ok(()),
                Some(quote) if quote == wrapper => Ok(()),
                Some(first) if is_upper_hex_digit(first) => match self.bump() {
                    Some(second) if is_upper_hex_digit(second) => Ok(()),
                    _ => Err(self.error(start, "Illegal escape sequence.")),
                },
                _ => Err(self.error(start, "Illegal escape sequence.")),
            },
            '\n' => Err(self.error(start, "Reached end of line while reading a constant.")),
            c if (' '..='~').contains(&c) => Ok(()),
            c => Err(self.error(start, format!("Illegal character {c:?} in a constant."))),
        }
    }

    fn read_char_literal(&mut self) -> Result<Token, CompileError> {
        let start_position = self.position;

        assert_eq!(self.bump(), Some('\''));

        if self.chars.peek() == Some(&'\'') {
            self.bump();
            return Err(self.error(start_position, "Empty character constant."));
        }

        self.read_escapable('\'', start_position)?;

        if self.bump() != Some('\'') {
            return Err(self.error(start_position, "Unterminated character constant."));
        }

        Ok(Token {
            kind: TokenKind::CharLiteral,
            span: self.new_span(start_position),
        })
    }

    fn read_string_literal(&mut self) -> Result<Token, CompileError> {
        let start_position = self.position;

        assert_eq!(self.bump(), Some('"'));

        loop {
            match self.chars.peek().copied() {
                Some('"') => {
                    self.bump();
                    break;
                }
                Some(_) => self.read_escapable('"', start_position)?,
                None => {
                    return Err(self.error(start_position, "Unterminated string constant."));
                }
            }
        }

        Ok(Token {
            kind: TokenKind::StringLiteral,
            span: self.new_span(start_position),
        })
    }

    // Keyword or identifier
    fn read_word(&mut self) -> Token {
        let start_position = self.position;

        while let Some(c) = self.chars.peek().copied() {
            if !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }

            self.bump();
        }

        let span = self.new_span(start_position);
        let value = self.source.value_of_span(span);

        let kind = if let Ok(keyword) = value.parse() {
            TokenKind::Keyword(keyword)
        } else {
            TokenKind::Identifier
        };

        Token { kind, span }
    }

    fn read_number(&mut self) -> Token {
        let start_position = self.position;

        while let Some(c) = self.chars.peek().copied() {
            if !c.is_ascii_digit() {
                break;
            }

            self.bump();
        }

        Token {
            kind: TokenKind::IntegerLiteral,
            span: self.new_span(start_position),
        }
    }

    fn read_single(&mut self, kind: TokenKind) -> Token {
        let start_position = self.position;

        self.bump();

        Token {
            kind,
            span: self.new_span(start_position),
        }
    }

    fn read_double(&mut self, kind: TokenKind) -> Token {
        let start_position = self.position;

        self.bump();
        self.bump();

        Token {
            kind,
            span: self.new_span(start_position),
        }
    }

    fn new_span(&self, start: usize) -> Span {
        Span {
            start,
            end: self.position,
        }
    }

    pub fn peek(&mut self) -> Result<Token, CompileError> {
        if let Some(token) = self.peeked {
            return Ok(token);
        }

        let token = self.next()?;
        self.peeked = Some(token);

        Ok(token)
    }

    pub fn next(&mut self) -> Result<Token, CompileError> {
        if let Some(token) = self.peeked.take() {
            return Ok(token);
        }

        while let Some(c) = self.chars.peek().copied() {
            let token = match c {
                // Ignore whitespace
                c if c.is_ascii_whitespace() => {
                    self.ignore_whitespace();
                    continue;
                }
                // Ignore comments
                '#' => {
                    self.ignore_line();
                    continue;
                }

                '"' => self.read_string_literal()?,
                '\'' => self.read_char_literal()?,

                n if n.is_ascii_digit() => self.read_number(),
                a if a.is_ascii_alphabetic() || a == '_' => self.read_word(),

                '=' if self.chars.peek_nth(1).is_some_and(|c| *c == '=') => {
                    self.read_double(TokenKind::DoubleEquals)
                }
                '!' if self.chars.peek_nth(1).is_some_and(|c| *c == '=') => {
                    self.read_double(TokenKind::NotEquals)
                }
                '<' if self.chars.peek_nth(1).is_some_and(|c| *c == '=') => {
                    self.read_double(TokenKind::LessThanOrEqualTo)
                }
                '>' if self.chars.peek_nth(1).is_some_and(|c| *c == '=') => {
                    self.read_double(TokenKind::GreaterThanOrEqualTo)
                }
                '&' if self.chars.peek_nth(1).is_some_and(|c| *c == '&') => {
                    self.read_double(TokenKind::LogicalAnd)
                }
                '|' if self.chars.peek_nth(1).is_some_and(|c| *c == '|') => {
                    self.read_double(TokenKind::LogicalOr)
                }

                s if SINGLE_TOKENS.contains_key(&s) => self.read_single(SINGLE_TOKENS[&s]),
                c => {
                    let start = self.position;
                    self.bump();
                    return Err(self.error(start, format!("Unexpected character {c:?}.")));
                }
            };

            return Ok(token);
        }

        Ok(Token {
            kind: TokenKind::EndOfFile,
            span: Span::new(self.position, self.position),
        })
    }
}

fn is_upper_hex_digit(c: char) -> bool {
    c.is_ascii_digit() || ('A'..='F').contains(&c)
}

/// Decodes the text of a char or string constant (including its quotes) that
/// the lexer has already validated
pub fn unescape_literal(raw: &str) -> Vec<char> {
    let inner = &raw[1..raw.len() - 1];
    let mut chars = inner.chars();
    let mut decoded = Vec::with_capacity(inner.len());

    while let Some(c) = chars.next() {
        if c != '\\' {
            decoded.push(c);
            continue;
        }

        match chars.next() {
            Some('n') => decoded.push('\n'),
            Some(first) if is_upper_hex_digit(first) && first != '\\' => {
                let second = chars.next().unwrap_or('0');
                let code = first.to_digit(16).unwrap_or(0) * 16 + second.to_digit(16).unwrap_or(0);
                decoded.push(char::from_u32(code).unwrap_or('\0'));
            }
            Some(other) => decoded.push(other),
            None => {}
        }
    }

    decoded
}
