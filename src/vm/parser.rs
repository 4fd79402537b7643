//! Recursive descent parser for the Lua source subset.
//!
//! Constructs the compiler does not support (numeric/generic `for`,
//! `repeat`, `break`, varargs, method syntax) are rejected with a clear
//! diagnostic rather than silently misparsed.

use crate::vm::ast::{BinOp, Block, Expr, Field, FunctionBody, Stat, StatKind, Target, UnOp};
use crate::vm::error::CompileError;
use crate::vm::lexer::{Lexer, Token, TokenKind};

type ParseResult<T> = std::result::Result<T, CompileError>;

/// The parser
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    peeked: Option<Token>,
}

impl<'a> Parser<'a> {
    /// Create a parser over the given source text
    pub fn new(source: &'a str) -> Self {
        Parser {
            lexer: Lexer::new(source),
            current: Token {
                kind: TokenKind::Eof,
                line: 1,
            },
            peeked: None,
        }
    }

    /// Parse a whole chunk
    pub fn parse_chunk(mut self) -> ParseResult<Block> {
        self.advance()?;
        let block = self.block()?;
        if self.current.kind != TokenKind::Eof {
            return Err(self.unexpected("end of chunk"));
        }
        Ok(block)
    }

    fn advance(&mut self) -> ParseResult<()> {
        self.current = match self.peeked.take() {
            Some(token) => token,
            None => self.lexer.next_token()?,
        };
        Ok(())
    }

    fn peek_kind(&mut self) -> ParseResult<&TokenKind> {
        if self.peeked.is_none() {
            self.peeked = Some(self.lexer.next_token()?);
        }
        match &self.peeked {
            Some(token) => Ok(&token.kind),
            None => Err(CompileError::new("lookahead failure", self.current.line)),
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.current.kind == *kind
    }

    fn accept(&mut self, kind: &TokenKind) -> ParseResult<bool> {
        if self.check(kind) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> ParseResult<()> {
        if self.check(&kind) {
            self.advance()
        } else {
            Err(self.unexpected(what))
        }
    }

    fn expect_name(&mut self) -> ParseResult<String> {
        match &self.current.kind {
            TokenKind::Name(name) => {
                let name = name.clone();
                self.advance()?;
                Ok(name)
            }
            _ => Err(self.unexpected("name")),
        }
    }

    fn unexpected(&self, what: &str) -> CompileError {
        CompileError::new(
            format!("expected {} near {:?}", what, self.current.kind),
            self.current.line,
        )
    }

    fn at_block_end(&self) -> bool {
        matches!(
            self.current.kind,
            TokenKind::Eof
                | TokenKind::End
                | TokenKind::Else
                | TokenKind::Elseif
                | TokenKind::Until
        )
    }

    fn block(&mut self) -> ParseResult<Block> {
        let mut stats = Vec::new();
        loop {
            if self.at_block_end() {
                return Ok(Block { stats });
            }
            if self.accept(&TokenKind::Semi)? {
                continue;
            }
            let is_return = self.check(&TokenKind::Return);
            stats.push(self.statement()?);
            if is_return {
                // `return` closes the block
                while self.accept(&TokenKind::Semi)? {}
                if !self.at_block_end() {
                    return Err(self.unexpected("end of block after 'return'"));
                }
                return Ok(Block { stats });
            }
        }
    }

    fn statement(&mut self) -> ParseResult<Stat> {
        let line = self.current.line;
        let kind = match &self.current.kind {
            TokenKind::Local => {
                self.advance()?;
                if self.accept(&TokenKind::Function)? {
                    let name = self.expect_name()?;
                    let func = self.function_body(line)?;
                    StatKind::LocalFunction { name, func }
                } else {
                    let mut names = vec![self.expect_name()?];
                    while self.accept(&TokenKind::Comma)? {
                        names.push(self.expect_name()?);
                    }
                    let exprs = if self.accept(&TokenKind::Assign)? {
                        self.expr_list()?
                    } else {
                        Vec::new()
                    };
                    StatKind::Local { names, exprs }
                }
            }
            TokenKind::If => {
                self.advance()?;
                self.if_statement()?
            }
            TokenKind::While => {
                self.advance()?;
                let cond = self.expression()?;
                self.expect(TokenKind::Do, "'do'")?;
                let body = self.block()?;
                self.expect(TokenKind::End, "'end'")?;
                StatKind::While { cond, body }
            }
            TokenKind::Do => {
                self.advance()?;
                let body = self.block()?;
                self.expect(TokenKind::End, "'end'")?;
                StatKind::Do(body)
            }
            TokenKind::Function => {
                self.advance()?;
                let name = self.expect_name()?;
                if matches!(self.current.kind, TokenKind::Dot | TokenKind::Colon) {
                    return Err(CompileError::new(
                        "method definitions are not supported by this compiler",
                        line,
                    ));
                }
                let func = self.function_body(line)?;
                StatKind::Function { name, func }
            }
            TokenKind::Return => {
                self.advance()?;
                let exprs = if self.at_block_end() || self.check(&TokenKind::Semi) {
                    Vec::new()
                } else {
                    self.expr_list()?
                };
                StatKind::Return(exprs)
            }
            TokenKind::For => {
                return Err(CompileError::new(
                    "'for' loops are not supported by this compiler",
                    line,
                ));
            }
            TokenKind::Repeat => {
                return Err(CompileError::new(
                    "'repeat' loops are not supported by this compiler",
                    line,
                ));
            }
            TokenKind::Break => {
                return Err(CompileError::new(
                    "'break' is not supported by this compiler",
                    line,
                ));
            }
            _ => self.expr_statement()?,
        };
        Ok(Stat { kind, line })
    }

    fn if_statement(&mut self) -> ParseResult<StatKind> {
        let mut arms = Vec::new();
        loop {
            let cond = self.expression()?;
            self.expect(TokenKind::Then, "'then'")?;
            let body = self.block()?;
            arms.push((cond, body));
            if self.accept(&TokenKind::Elseif)? {
                continue;
            }
            let else_block = if self.accept(&TokenKind::Else)? {
                Some(self.block()?)
            } else {
                None
            };
            self.expect(TokenKind::End, "'end'")?;
            return Ok(StatKind::If { arms, else_block });
        }
    }

    /// Statement starting with an expression: assignment or call
    fn expr_statement(&mut self) -> ParseResult<StatKind> {
        let line = self.current.line;
        let first = self.suffixed_expr()?;

        if self.check(&TokenKind::Assign) || self.check(&TokenKind::Comma) {
            let mut targets = vec![self.as_target(first, line)?];
            while self.accept(&TokenKind::Comma)? {
                let next = self.suffixed_expr()?;
                targets.push(self.as_target(next, line)?);
            }
            if targets.len() > 1 && targets.iter().any(|t| matches!(t, Target::Index { .. })) {
                return Err(CompileError::new(
                    "multiple assignment targets must be plain names",
                    line,
                ));
            }
            self.expect(TokenKind::Assign, "'='")?;
            let exprs = self.expr_list()?;
            return Ok(StatKind::Assign { targets, exprs });
        }

        match first {
            call @ Expr::Call { .. } => Ok(StatKind::Call(call)),
            _ => Err(CompileError::new("unexpected expression statement", line)),
        }
    }

    fn as_target(&self, expr: Expr, line: u32) -> ParseResult<Target> {
        match expr {
            Expr::Name(name) => Ok(Target::Name(name)),
            Expr::Index { object, key } => Ok(Target::Index {
                object: *object,
                key: *key,
            }),
            _ => Err(CompileError::new("cannot assign to this expression", line)),
        }
    }

    fn function_body(&mut self, line: u32) -> ParseResult<FunctionBody> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                if self.check(&TokenKind::Ellipsis) {
                    return Err(CompileError::new(
                        "varargs are not supported by this compiler",
                        self.current.line,
                    ));
                }
                params.push(self.expect_name()?);
                if !self.accept(&TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        let body = self.block()?;
        self.expect(TokenKind::End, "'end'")?;
        Ok(FunctionBody { params, body, line })
    }

    fn expr_list(&mut self) -> ParseResult<Vec<Expr>> {
        let mut exprs = vec![self.expression()?];
        while self.accept(&TokenKind::Comma)? {
            exprs.push(self.expression()?);
        }
        Ok(exprs)
    }

    fn expression(&mut self) -> ParseResult<Expr> {
        self.binary_expr(0)
    }

    // Unary operators bind tighter than every binary operator except `^`
    const UNARY_PRECEDENCE: u8 = 8;

    fn binary_expr(&mut self, limit: u8) -> ParseResult<Expr> {
        let mut lhs = if let Some(op) = unary_op(&self.current.kind) {
            self.advance()?;
            let operand = self.binary_expr(Self::UNARY_PRECEDENCE)?;
            Expr::Unary {
                op,
                operand: Box::new(operand),
            }
        } else {
            self.simple_expr()?
        };

        while let Some((op, left_prec, right_prec)) = binary_op(&self.current.kind) {
            if left_prec <= limit {
                break;
            }
            self.advance()?;
            let rhs = self.binary_expr(right_prec)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn simple_expr(&mut self) -> ParseResult<Expr> {
        let line = self.current.line;
        let expr = match &self.current.kind {
            TokenKind::Nil => {
                self.advance()?;
                Expr::Nil
            }
            TokenKind::True => {
                self.advance()?;
                Expr::True
            }
            TokenKind::False => {
                self.advance()?;
                Expr::False
            }
            TokenKind::Number(n) => {
                let n = *n;
                self.advance()?;
                Expr::Number(n)
            }
            TokenKind::Str(s) => {
                let s = s.clone();
                self.advance()?;
                Expr::Str(s)
            }
            TokenKind::Function => {
                self.advance()?;
                let func = self.function_body(line)?;
                Expr::Function(Box::new(func))
            }
            TokenKind::LBrace => self.table_constructor()?,
            TokenKind::Ellipsis => {
                return Err(CompileError::new(
                    "varargs are not supported by this compiler",
                    line,
                ));
            }
            _ => self.suffixed_expr()?,
        };
        Ok(expr)
    }

    fn suffixed_expr(&mut self) -> ParseResult<Expr> {
        let mut expr = self.primary_expr()?;
        loop {
            match &self.current.kind {
                TokenKind::Dot => {
                    self.advance()?;
                    let name = self.expect_name()?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        key: Box::new(Expr::Str(name)),
                    };
                }
                TokenKind::LBracket => {
                    self.advance()?;
                    let key = self.expression()?;
                    self.expect(TokenKind::RBracket, "']'")?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        key: Box::new(key),
                    };
                }
                TokenKind::LParen => {
                    self.advance()?;
                    let args = if self.check(&TokenKind::RParen) {
                        Vec::new()
                    } else {
                        self.expr_list()?
                    };
                    self.expect(TokenKind::RParen, "')'")?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                    };
                }
                TokenKind::Colon => {
                    return Err(CompileError::new(
                        "method calls are not supported by this compiler",
                        self.current.line,
                    ));
                }
                _ => return Ok(expr),
            }
        }
    }

    fn primary_expr(&mut self) -> ParseResult<Expr> {
        match &self.current.kind {
            TokenKind::Name(name) => {
                let name = name.clone();
                self.advance()?;
                Ok(Expr::Name(name))
            }
            TokenKind::LParen => {
                self.advance()?;
                let expr = self.expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            _ => Err(self.unexpected("expression")),
        }
    }

    fn table_constructor(&mut self) -> ParseResult<Expr> {
        self.expect(TokenKind::LBrace, "'{'")?;
        let mut fields = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            let name = match &self.current.kind {
                TokenKind::Name(name) => Some(name.clone()),
                _ => None,
            };
            if let Some(name) = name.filter(|_| {
                matches!(self.peek_kind(), Ok(kind) if *kind == TokenKind::Assign)
            }) {
                self.advance()?;
                self.advance()?;
                fields.push(Field::Named(name, self.expression()?));
            } else if self.check(&TokenKind::LBracket) {
                self.advance()?;
                let key = self.expression()?;
                self.expect(TokenKind::RBracket, "']'")?;
                self.expect(TokenKind::Assign, "'='")?;
                fields.push(Field::Keyed(key, self.expression()?));
            } else {
                fields.push(Field::Item(self.expression()?));
            }
            if !(self.accept(&TokenKind::Comma)? || self.accept(&TokenKind::Semi)?) {
                break;
            }
        }
        self.expect(TokenKind::RBrace, "'}'")?;
        Ok(Expr::Table(fields))
    }
}

fn unary_op(kind: &TokenKind) -> Option<UnOp> {
    match kind {
        TokenKind::Minus => Some(UnOp::Neg),
        TokenKind::Not => Some(UnOp::Not),
        TokenKind::Hash => Some(UnOp::Len),
        _ => None,
    }
}

/// Binary operator with (left, right) binding powers; a smaller right
/// power makes the operator right-associative.
fn binary_op(kind: &TokenKind) -> Option<(BinOp, u8, u8)> {
    match kind {
        TokenKind::Or => Some((BinOp::Or, 1, 1)),
        TokenKind::And => Some((BinOp::And, 2, 2)),
        TokenKind::Lt => Some((BinOp::Lt, 3, 3)),
        TokenKind::Gt => Some((BinOp::Gt, 3, 3)),
        TokenKind::LtEq => Some((BinOp::Le, 3, 3)),
        TokenKind::GtEq => Some((BinOp::Ge, 3, 3)),
        TokenKind::EqEq => Some((BinOp::Eq, 3, 3)),
        TokenKind::NotEq => Some((BinOp::Ne, 3, 3)),
        TokenKind::Concat => Some((BinOp::Concat, 5, 4)),
        TokenKind::Plus => Some((BinOp::Add, 6, 6)),
        TokenKind::Minus => Some((BinOp::Sub, 6, 6)),
        TokenKind::Star => Some((BinOp::Mul, 7, 7)),
        TokenKind::Slash => Some((BinOp::Div, 7, 7)),
        TokenKind::Percent => Some((BinOp::Mod, 7, 7)),
        TokenKind::Caret => Some((BinOp::Pow, 10, 9)),
        _ => None,
    }
}
