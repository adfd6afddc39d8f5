//! Token scanner for structured-text control logic.
//!
//! Only as much of the language as fact extraction needs: comments and
//! pragmas are recognised so their contents never leak into declarations,
//! and I/O addresses come out as their own token kind.

use logicdeploy_state::VendorDialect;

/// Kind of a lexed token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Number,
    /// Direct I/O address such as `%IX0.1`.
    Address,
    StringLit,
    /// Contents of `{ ... }`.
    Pragma,
    /// `:=`
    Assign,
    /// `=>`
    OutputAssign,
    Colon,
    Semicolon,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    /// `..`
    Range,
    /// Any other operator character.
    Op,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: u32,
}

impl Token {
    /// Whether this is an identifier equal to `keyword`, ignoring case.
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Ident && self.text.eq_ignore_ascii_case(keyword)
    }

    /// Uppercased text, the canonical identifier form.
    pub fn upper(&self) -> String {
        self.text.to_ascii_uppercase()
    }
}

/// Problems found while scanning. Scanning never aborts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexIssue {
    UnterminatedComment { line: u32 },
    UnterminatedString { line: u32 },
    UnterminatedPragma { line: u32 },
}

#[derive(Debug, Clone, Default)]
pub struct Lexed {
    pub tokens: Vec<Token>,
    pub issues: Vec<LexIssue>,
}

/// Single-pass scanner over one file.
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    dialect: VendorDialect,
    out: Lexed,
}

impl Lexer {
    pub fn new(source: &str, dialect: VendorDialect) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            dialect,
            out: Lexed::default(),
        }
    }

    /// Scan the whole input.
    pub fn tokenize(mut self) -> Lexed {
        while let Some(c) = self.peek(0) {
            match c {
                '\n' => {
                    self.line += 1;
                    self.pos += 1;
                }
                c if c.is_whitespace() => self.pos += 1,
                '(' if self.peek(1) == Some('*') => self.block_comment("*)"),
                '/' if self.peek(1) == Some('*') && self.dialect == VendorDialect::SiemensScl => {
                    self.block_comment("*/")
                }
                '/' if self.peek(1) == Some('/') => self.line_comment(),
                '{' => self.pragma(),
                '\'' => self.string('\''),
                '"' if self.dialect == VendorDialect::SiemensScl => self.quoted_ident(),
                '"' => self.string('"'),
                '%' => self.address(),
                '#' if self.peek(1).is_some_and(is_ident_start) => {
                    // SCL local-variable prefix
                    self.pos += 1;
                    self.ident();
                }
                c if is_ident_start(c) => self.ident(),
                c if c.is_ascii_digit() => self.number(),
                _ => self.punct(),
            }
        }
        self.out
    }

    fn peek(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn push(&mut self, kind: TokenKind, text: String, line: u32) {
        self.out.tokens.push(Token { kind, text, line });
    }

    fn block_comment(&mut self, close: &str) {
        let start_line = self.line;
        let close: Vec<char> = close.chars().collect();
        self.pos += 2;
        loop {
            match self.peek(0) {
                None => {
                    self.out
                        .issues
                        .push(LexIssue::UnterminatedComment { line: start_line });
                    return;
                }
                Some(c) if c == close[0] && self.peek(1) == Some(close[1]) => {
                    self.pos += 2;
                    return;
                }
                Some('\n') => {
                    self.line += 1;
                    self.pos += 1;
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    fn line_comment(&mut self) {
        while let Some(c) = self.peek(0) {
            if c == '\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn pragma(&mut self) {
        let start_line = self.line;
        self.pos += 1;
        let mut text = String::new();
        loop {
            match self.peek(0) {
                None => {
                    self.out
                        .issues
                        .push(LexIssue::UnterminatedPragma { line: start_line });
                    return;
                }
                Some('}') => {
                    self.pos += 1;
                    break;
                }
                Some(c) => {
                    if c == '\n' {
                        self.line += 1;
                    }
                    text.push(c);
                    self.pos += 1;
                }
            }
        }
        self.push(TokenKind::Pragma, text.trim().to_string(), start_line);
    }

    fn string(&mut self, quote: char) {
        let start_line = self.line;
        self.pos += 1;
        let mut text = String::new();
        loop {
            match self.peek(0) {
                None | Some('\n') => {
                    self.out
                        .issues
                        .push(LexIssue::UnterminatedString { line: start_line });
                    break;
                }
                Some('$') => {
                    // `$` escapes the next character
                    text.push('$');
                    if let Some(next) = self.peek(1) {
                        text.push(next);
                        self.pos += 2;
                    } else {
                        self.pos += 1;
                    }
                }
                Some(c) if c == quote => {
                    self.pos += 1;
                    break;
                }
                Some(c) => {
                    text.push(c);
                    self.pos += 1;
                }
            }
        }
        self.push(TokenKind::StringLit, text, start_line);
    }

    fn quoted_ident(&mut self) {
        let start_line = self.line;
        self.pos += 1;
        let mut text = String::new();
        loop {
            match self.peek(0) {
                None | Some('\n') => {
                    self.out
                        .issues
                        .push(LexIssue::UnterminatedString { line: start_line });
                    break;
                }
                Some('"') => {
                    self.pos += 1;
                    break;
                }
                Some(c) => {
                    text.push(c);
                    self.pos += 1;
                }
            }
        }
        self.push(TokenKind::Ident, text, start_line);
    }

    fn address(&mut self) {
        let line = self.line;
        let mut text = String::from('%');
        self.pos += 1;
        while let Some(c) = self.peek(0) {
            let digit_follows = self.peek(1).is_some_and(|n| n.is_ascii_digit());
            if c.is_ascii_alphanumeric() || c == '*' || (c == '.' && digit_follows) {
                text.push(c.to_ascii_uppercase());
                self.pos += 1;
            } else {
                break;
            }
        }
        if text.len() == 1 {
            self.push(TokenKind::Op, text, line);
        } else {
            self.push(TokenKind::Address, text, line);
        }
    }

    fn ident(&mut self) {
        let line = self.line;
        let mut text = String::new();
        while let Some(c) = self.peek(0) {
            if c.is_ascii_alphanumeric() || c == '_' {
                text.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        // Typed literal such as T#5s or INT#16#FF
        if self.peek(0) == Some('#') {
            text.push('#');
            self.pos += 1;
            self.literal_tail(&mut text);
            self.push(TokenKind::Number, text, line);
            return;
        }
        self.push(TokenKind::Ident, text, line);
    }

    fn number(&mut self) {
        let line = self.line;
        let mut text = String::new();
        self.literal_tail(&mut text);
        self.push(TokenKind::Number, text, line);
    }

    fn literal_tail(&mut self, text: &mut String) {
        while let Some(c) = self.peek(0) {
            let digit_follows = self.peek(1).is_some_and(|n| n.is_ascii_digit());
            let exponent_sign = (c == '-' || c == '+')
                && text.ends_with(['e', 'E'])
                && !text.contains('#')
                && digit_follows;
            if c.is_ascii_alphanumeric()
                || c == '_'
                || c == '#'
                || (c == '.' && digit_follows)
                || exponent_sign
            {
                text.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn punct(&mut self) {
        let line = self.line;
        let c = self.peek(0).unwrap_or_default();
        let next = self.peek(1);
        let (kind, len) = match (c, next) {
            (':', Some('=')) => (TokenKind::Assign, 2),
            ('=', Some('>')) => (TokenKind::OutputAssign, 2),
            ('.', Some('.')) => (TokenKind::Range, 2),
            (':', _) => (TokenKind::Colon, 1),
            (';', _) => (TokenKind::Semicolon, 1),
            (',', _) => (TokenKind::Comma, 1),
            ('(', _) => (TokenKind::LParen, 1),
            (')', _) => (TokenKind::RParen, 1),
            ('[', _) => (TokenKind::LBracket, 1),
            (']', _) => (TokenKind::RBracket, 1),
            ('.', _) => (TokenKind::Dot, 1),
            _ => (TokenKind::Op, 1),
        };
        let text: String = self.chars[self.pos..self.pos + len].iter().collect();
        self.pos += len;
        self.push(kind, text, line);
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

/// Tokenize `source` in the given dialect.
pub fn tokenize(source: &str, dialect: VendorDialect) -> Lexed {
    Lexer::new(source, dialect).tokenize()
}
