//! Lexer for the Lua source subset accepted by the compiler

use crate::vm::error::CompileError;
use std::iter::Peekable;
use std::str::Chars;

/// Token kinds
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Number(f64),
    Str(String),
    Name(String),

    // Keywords
    And,
    Break,
    Do,
    Else,
    Elseif,
    End,
    False,
    For,
    Function,
    If,
    In,
    Local,
    Nil,
    Not,
    Or,
    Repeat,
    Return,
    Then,
    True,
    Until,
    While,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Hash,
    EqEq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Assign,
    Concat,
    Ellipsis,

    // Punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Semi,
    Colon,
    Comma,
    Dot,

    Eof,
}

/// A token with its source line
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
}

type LexResult<T> = std::result::Result<T, CompileError>;

/// Character-stream lexer
pub struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: u32,
}

impl<'a> Lexer<'a> {
    /// Create a lexer over the given source text
    pub fn new(source: &'a str) -> Self {
        Lexer {
            chars: source.chars().peekable(),
            line: 1,
        }
    }

    /// Produce the next token, skipping whitespace and comments
    pub fn next_token(&mut self) -> LexResult<Token> {
        self.skip_trivia()?;
        let line = self.line;

        let c = match self.chars.next() {
            Some(c) => c,
            None => return Ok(Token { kind: TokenKind::Eof, line }),
        };

        let kind = match c {
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '^' => TokenKind::Caret,
            '#' => TokenKind::Hash,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ']' => TokenKind::RBracket,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            ';' => TokenKind::Semi,
            ':' => TokenKind::Colon,
            ',' => TokenKind::Comma,
            '[' => {
                if self.chars.peek() == Some(&'[') {
                    return Err(CompileError::new("long strings are not supported", line));
                }
                TokenKind::LBracket
            }
            '=' => {
                if self.eat('=') {
                    TokenKind::EqEq
                } else {
                    TokenKind::Assign
                }
            }
            '~' => {
                if self.eat('=') {
                    TokenKind::NotEq
                } else {
                    return Err(CompileError::new("unexpected character '~'", line));
                }
            }
            '<' => {
                if self.eat('=') {
                    TokenKind::LtEq
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.eat('=') {
                    TokenKind::GtEq
                } else {
                    TokenKind::Gt
                }
            }
            '.' => {
                if self.eat('.') {
                    if self.eat('.') {
                        TokenKind::Ellipsis
                    } else {
                        TokenKind::Concat
                    }
                } else if self.chars.peek().map_or(false, |c| c.is_ascii_digit()) {
                    return self.number('.').map(|kind| Token { kind, line });
                } else {
                    TokenKind::Dot
                }
            }
            '"' | '\'' => return self.string(c).map(|kind| Token { kind, line }),
            c if c.is_ascii_digit() => return self.number(c).map(|kind| Token { kind, line }),
            c if c.is_alphabetic() || c == '_' => self.name(c),
            c => return Err(CompileError::new(format!("unexpected character '{}'", c), line)),
        };

        Ok(Token { kind, line })
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.chars.peek() == Some(&expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn skip_trivia(&mut self) -> LexResult<()> {
        loop {
            match self.chars.peek() {
                Some('\n') => {
                    self.line += 1;
                    self.chars.next();
                }
                Some(c) if c.is_whitespace() => {
                    self.chars.next();
                }
                Some('-') => {
                    // Might be a comment; need two dashes
                    let mut probe = self.chars.clone();
                    probe.next();
                    if probe.peek() == Some(&'-') {
                        self.chars.next();
                        self.chars.next();
                        self.skip_comment()?;
                    } else {
                        return Ok(());
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn skip_comment(&mut self) -> LexResult<()> {
        if self.chars.peek() == Some(&'[') {
            let mut probe = self.chars.clone();
            probe.next();
            if probe.peek() == Some(&'[') {
                self.chars.next();
                self.chars.next();
                return self.skip_long_comment();
            }
        }
        // Line comment: consume to end of line
        for c in self.chars.by_ref() {
            if c == '\n' {
                self.line += 1;
                break;
            }
        }
        Ok(())
    }

    fn skip_long_comment(&mut self) -> LexResult<()> {
        let start = self.line;
        loop {
            match self.chars.next() {
                Some('\n') => self.line += 1,
                Some(']') => {
                    if self.eat(']') {
                        return Ok(());
                    }
                }
                Some(_) => {}
                None => {
                    return Err(CompileError::new("unterminated long comment", start));
                }
            }
        }
    }

    fn string(&mut self, quote: char) -> LexResult<TokenKind> {
        let start = self.line;
        let mut text = String::new();
        loop {
            match self.chars.next() {
                Some(c) if c == quote => return Ok(TokenKind::Str(text)),
                Some('\n') | None => {
                    return Err(CompileError::new("unterminated string", start));
                }
                Some('\\') => match self.chars.next() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some('\\') => text.push('\\'),
                    Some('"') => text.push('"'),
                    Some('\'') => text.push('\''),
                    Some('0') => text.push('\0'),
                    Some(c) => {
                        return Err(CompileError::new(
                            format!("unknown escape '\\{}'", c),
                            self.line,
                        ));
                    }
                    None => {
                        return Err(CompileError::new("unterminated string", start));
                    }
                },
                Some(c) => text.push(c),
            }
        }
    }

    fn number(&mut self, first: char) -> LexResult<TokenKind> {
        let line = self.line;
        let mut text = String::new();
        text.push(first);

        // Hex literal
        if first == '0' && matches!(self.chars.peek(), Some('x') | Some('X')) {
            self.chars.next();
            let mut digits = String::new();
            while let Some(&c) = self.chars.peek() {
                if c.is_ascii_hexdigit() {
                    digits.push(c);
                    self.chars.next();
                } else {
                    break;
                }
            }
            if digits.is_empty() {
                return Err(CompileError::new("malformed hex number", line));
            }
            return u64::from_str_radix(&digits, 16)
                .map(|v| TokenKind::Number(v as f64))
                .map_err(|_| CompileError::new("malformed hex number", line));
        }

        let mut seen_dot = first == '.';
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.chars.next();
            } else if c == '.' && !seen_dot {
                seen_dot = true;
                text.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        if matches!(self.chars.peek(), Some('e') | Some('E')) {
            text.push('e');
            self.chars.next();
            if matches!(self.chars.peek(), Some('+') | Some('-')) {
                if let Some(sign) = self.chars.next() {
                    text.push(sign);
                }
            }
            let mut any = false;
            while let Some(&c) = self.chars.peek() {
                if c.is_ascii_digit() {
                    any = true;
                    text.push(c);
                    self.chars.next();
                } else {
                    break;
                }
            }
            if !any {
                return Err(CompileError::new("malformed number", line));
            }
        }

        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| CompileError::new("malformed number", line))
    }

    fn name(&mut self, first: char) -> TokenKind {
        let mut text = String::new();
        text.push(first);
        while let Some(&c) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                text.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        match text.as_str() {
            "and" => TokenKind::And,
            "break" => TokenKind::Break,
            "do" => TokenKind::Do,
            "else" => TokenKind::Else,
            "elseif" => TokenKind::Elseif,
            "end" => TokenKind::End,
            "false" => TokenKind::False,
            "for" => TokenKind::For,
            "function" => TokenKind::Function,
            "if" => TokenKind::If,
            "in" => TokenKind::In,
            "local" => TokenKind::Local,
            "nil" => TokenKind::Nil,
            "not" => TokenKind::Not,
            "or" => TokenKind::Or,
            "repeat" => TokenKind::Repeat,
            "return" => TokenKind::Return,
            "then" => TokenKind::Then,
            "true" => TokenKind::True,
            "until" => TokenKind::Until,
            "while" => TokenKind::While,
            _ => TokenKind::Name(text),
        }
    }
}
