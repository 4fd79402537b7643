//! Bytecode generation from the AST.
//!
//! Each function compiles to a `Proto`. Locals occupy fixed frame slots
//! assigned at declaration; temporaries live above them on the value
//! stack. Closures may not capture enclosing locals (no upvalues); the
//! compiler rejects such references instead of miscompiling them.

use crate::vm::ast::{BinOp, Block, Expr, Field, FunctionBody, Stat, StatKind, Target, UnOp};
use crate::vm::bytecode::{Constant, LocalVar, Op, Proto};
use crate::vm::error::CompileError;
use std::rc::Rc;

type CompileResult<T> = std::result::Result<T, CompileError>;

const MAX_LOCALS: usize = 200;

/// The bytecode compiler
pub struct Compiler {
    chunk_name: String,
}

impl Compiler {
    /// Create a compiler for the given chunk name
    pub fn new(chunk_name: &str) -> Self {
        Compiler {
            chunk_name: chunk_name.to_string(),
        }
    }

    /// Compile a parsed chunk into its main prototype
    pub fn compile_chunk(&self, block: &Block) -> CompileResult<Proto> {
        let mut func = FuncState::new(0, Vec::new());
        func.block(block)?;
        func.emit(Op::Return(0));
        Ok(func.into_proto(&self.chunk_name))
    }
}

struct ScopeEntry {
    name: String,
    slot: u8,
}

struct FuncState {
    code: Vec<Op>,
    lines: Vec<u32>,
    consts: Vec<Constant>,
    locals: Vec<LocalVar>,
    scope: Vec<ScopeEntry>,
    protos: Vec<Rc<Proto>>,
    param_count: u8,
    line_defined: u32,

    /// Locals of enclosing functions, for rejecting upvalue captures
    outer_names: Vec<String>,

    /// Line of the statement currently being compiled
    line: u32,
}

impl FuncState {
    fn new(line_defined: u32, outer_names: Vec<String>) -> Self {
        FuncState {
            code: Vec::new(),
            lines: Vec::new(),
            consts: Vec::new(),
            locals: Vec::new(),
            scope: Vec::new(),
            protos: Vec::new(),
            param_count: 0,
            line_defined,
            outer_names,
            line: line_defined,
        }
    }

    fn into_proto(self, chunk_name: &str) -> Proto {
        Proto {
            chunk_name: chunk_name.to_string(),
            line_defined: self.line_defined,
            param_count: self.param_count,
            locals: self.locals,
            consts: self.consts,
            code: self.code,
            lines: self.lines,
            protos: self.protos,
        }
    }

    fn emit(&mut self, op: Op) {
        self.code.push(op);
        self.lines.push(self.line);
    }

    fn emit_jump(&mut self, op: Op) -> usize {
        self.emit(op);
        self.code.len() - 1
    }

    fn patch_jump(&mut self, at: usize) -> CompileResult<()> {
        let target = self.code.len() as i64;
        let offset = i16::try_from(target - (at as i64 + 1))
            .map_err(|_| CompileError::new("control structure too long", self.line))?;
        self.code[at] = match self.code[at] {
            Op::Jump(_) => Op::Jump(offset),
            Op::JumpIfFalse(_) => Op::JumpIfFalse(offset),
            Op::AndJump(_) => Op::AndJump(offset),
            Op::OrJump(_) => Op::OrJump(offset),
            other => other,
        };
        Ok(())
    }

    fn add_const(&mut self, c: Constant) -> CompileResult<u16> {
        if let Some(i) = self.consts.iter().position(|e| const_eq(e, &c)) {
            return Ok(i as u16);
        }
        if self.consts.len() > u16::MAX as usize {
            return Err(CompileError::new("too many constants", self.line));
        }
        self.consts.push(c);
        Ok((self.consts.len() - 1) as u16)
    }

    fn add_local(&mut self, name: &str) -> CompileResult<u8> {
        if self.locals.len() >= MAX_LOCALS {
            return Err(CompileError::new("too many local variables", self.line));
        }
        let slot = self.locals.len() as u8;
        self.locals.push(LocalVar {
            name: name.to_string(),
            slot,
        });
        self.scope.push(ScopeEntry {
            name: name.to_string(),
            slot,
        });
        Ok(slot)
    }

    fn resolve(&self, name: &str) -> Option<u8> {
        self.scope
            .iter()
            .rev()
            .find(|entry| entry.name == name)
            .map(|entry| entry.slot)
    }

    fn block(&mut self, block: &Block) -> CompileResult<()> {
        let scope_mark = self.scope.len();
        for stat in &block.stats {
            self.statement(stat)?;
        }
        self.scope.truncate(scope_mark);
        Ok(())
    }

    fn statement(&mut self, stat: &Stat) -> CompileResult<()> {
        self.line = stat.line;
        match &stat.kind {
            StatKind::Local { names, exprs } => {
                self.expr_list_adjusted(exprs, names.len())?;
                let mut slots = Vec::with_capacity(names.len());
                for name in names {
                    slots.push(self.add_local(name)?);
                }
                for slot in slots.into_iter().rev() {
                    self.emit(Op::SetLocal(slot));
                }
                Ok(())
            }
            StatKind::LocalFunction { name, func } => {
                let slot = self.add_local(name)?;
                let proto_idx = self.function_literal(func)?;
                self.emit(Op::Closure(proto_idx));
                self.emit(Op::SetLocal(slot));
                Ok(())
            }
            StatKind::Assign { targets, exprs } => self.assignment(targets, exprs),
            StatKind::Call(expr) => match expr {
                Expr::Call { func, args } => self.call_expr(func, args, 0),
                _ => Err(CompileError::new("malformed call statement", stat.line)),
            },
            StatKind::If { arms, else_block } => {
                let mut end_jumps = Vec::new();
                for (i, (cond, body)) in arms.iter().enumerate() {
                    self.expression(cond)?;
                    let skip = self.emit_jump(Op::JumpIfFalse(0));
                    self.block(body)?;
                    let has_more = i + 1 < arms.len() || else_block.is_some();
                    if has_more {
                        end_jumps.push(self.emit_jump(Op::Jump(0)));
                    }
                    self.patch_jump(skip)?;
                }
                if let Some(else_block) = else_block {
                    self.block(else_block)?;
                }
                for jump in end_jumps {
                    self.patch_jump(jump)?;
                }
                Ok(())
            }
            StatKind::While { cond, body } => {
                let start = self.code.len();
                self.expression(cond)?;
                let exit = self.emit_jump(Op::JumpIfFalse(0));
                self.block(body)?;
                let back = i16::try_from(start as i64 - (self.code.len() as i64 + 1))
                    .map_err(|_| CompileError::new("loop body too long", self.line))?;
                self.emit(Op::Jump(back));
                self.patch_jump(exit)?;
                Ok(())
            }
            StatKind::Do(body) => self.block(body),
            StatKind::Function { name, func } => {
                let proto_idx = self.function_literal(func)?;
                self.emit(Op::Closure(proto_idx));
                let name_const = self.add_const(Constant::Str(name.clone()))?;
                self.emit(Op::SetGlobal(name_const));
                Ok(())
            }
            StatKind::Return(exprs) => {
                if exprs.len() > u8::MAX as usize {
                    return Err(CompileError::new("too many return values", stat.line));
                }
                for expr in exprs {
                    self.expression(expr)?;
                }
                self.emit(Op::Return(exprs.len() as u8));
                Ok(())
            }
        }
    }

    fn assignment(&mut self, targets: &[Target], exprs: &[Expr]) -> CompileResult<()> {
        // Single table-slot assignment keeps Lua's evaluation order:
        // object and key before the value.
        if let [Target::Index { object, key }] = targets {
            self.expression(object)?;
            self.expression(key)?;
            self.expr_list_adjusted(exprs, 1)?;
            self.emit(Op::SetIndex);
            return Ok(());
        }

        self.expr_list_adjusted(exprs, targets.len())?;
        for target in targets.iter().rev() {
            match target {
                Target::Name(name) => {
                    if let Some(slot) = self.resolve(name) {
                        self.emit(Op::SetLocal(slot));
                    } else if self.outer_names.iter().any(|n| n == name) {
                        return Err(CompileError::new(
                            format!("cannot assign to upvalue '{}'", name),
                            self.line,
                        ));
                    } else {
                        let name_const = self.add_const(Constant::Str(name.clone()))?;
                        self.emit(Op::SetGlobal(name_const));
                    }
                }
                Target::Index { .. } => {
                    // Parser rejects this combination
                    return Err(CompileError::new("unsupported assignment", self.line));
                }
            }
        }
        Ok(())
    }

    /// Compile an expression list producing exactly `want` values
    fn expr_list_adjusted(&mut self, exprs: &[Expr], want: usize) -> CompileResult<()> {
        for expr in exprs {
            self.expression(expr)?;
        }
        if exprs.len() < want {
            for _ in exprs.len()..want {
                self.emit(Op::LoadNil);
            }
        } else if exprs.len() > want {
            let extra = exprs.len() - want;
            if extra > u8::MAX as usize {
                return Err(CompileError::new("expression list too long", self.line));
            }
            self.emit(Op::Pop(extra as u8));
        }
        Ok(())
    }

    fn expression(&mut self, expr: &Expr) -> CompileResult<()> {
        match expr {
            Expr::Nil => {
                self.emit(Op::LoadNil);
                Ok(())
            }
            Expr::True => {
                self.emit(Op::LoadTrue);
                Ok(())
            }
            Expr::False => {
                self.emit(Op::LoadFalse);
                Ok(())
            }
            Expr::Number(n) => {
                let idx = self.add_const(Constant::Number(*n))?;
                self.emit(Op::LoadConst(idx));
                Ok(())
            }
            Expr::Str(s) => {
                let idx = self.add_const(Constant::Str(s.clone()))?;
                self.emit(Op::LoadConst(idx));
                Ok(())
            }
            Expr::Name(name) => {
                if let Some(slot) = self.resolve(name) {
                    self.emit(Op::GetLocal(slot));
                } else if self.outer_names.iter().any(|n| n == name) {
                    return Err(CompileError::new(
                        format!("cannot capture upvalue '{}'", name),
                        self.line,
                    ));
                } else {
                    let idx = self.add_const(Constant::Str(name.clone()))?;
                    self.emit(Op::GetGlobal(idx));
                }
                Ok(())
            }
            Expr::Index { object, key } => {
                self.expression(object)?;
                self.expression(key)?;
                self.emit(Op::GetIndex);
                Ok(())
            }
            Expr::Call { func, args } => self.call_expr(func, args, 1),
            Expr::Function(body) => {
                let proto_idx = self.function_literal(body)?;
                self.emit(Op::Closure(proto_idx));
                Ok(())
            }
            Expr::Table(fields) => self.table_constructor(fields),
            Expr::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs),
            Expr::Unary { op, operand } => {
                self.expression(operand)?;
                self.emit(match op {
                    UnOp::Neg => Op::Neg,
                    UnOp::Not => Op::Not,
                    UnOp::Len => Op::Len,
                });
                Ok(())
            }
        }
    }

    fn call_expr(&mut self, func: &Expr, args: &[Expr], nresults: u8) -> CompileResult<()> {
        self.expression(func)?;
        if args.len() > u8::MAX as usize {
            return Err(CompileError::new("too many arguments", self.line));
        }
        for arg in args {
            self.expression(arg)?;
        }
        self.emit(Op::Call(args.len() as u8, nresults));
        Ok(())
    }

    fn binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> CompileResult<()> {
        match op {
            BinOp::And => {
                self.expression(lhs)?;
                let skip = self.emit_jump(Op::AndJump(0));
                self.expression(rhs)?;
                self.patch_jump(skip)
            }
            BinOp::Or => {
                self.expression(lhs)?;
                let skip = self.emit_jump(Op::OrJump(0));
                self.expression(rhs)?;
                self.patch_jump(skip)
            }
            _ => {
                self.expression(lhs)?;
                self.expression(rhs)?;
                self.emit(match op {
                    BinOp::Add => Op::Add,
                    BinOp::Sub => Op::Sub,
                    BinOp::Mul => Op::Mul,
                    BinOp::Div => Op::Div,
                    BinOp::Mod => Op::Mod,
                    BinOp::Pow => Op::Pow,
                    BinOp::Concat => Op::Concat,
                    BinOp::Eq => Op::Eq,
                    BinOp::Ne => Op::Ne,
                    BinOp::Lt => Op::Lt,
                    BinOp::Le => Op::Le,
                    BinOp::Gt => Op::Gt,
                    BinOp::Ge => Op::Ge,
                    BinOp::And | BinOp::Or => unreachable!(),
                });
                Ok(())
            }
        }
    }

    fn table_constructor(&mut self, fields: &[Field]) -> CompileResult<()> {
        let items = fields
            .iter()
            .filter(|f| matches!(f, Field::Item(_)))
            .count();
        self.emit(Op::NewTable(items.min(u8::MAX as usize) as u8));

        let mut next_item = 1u32;
        for field in fields {
            self.emit(Op::Dup);
            match field {
                Field::Item(value) => {
                    let idx = self.add_const(Constant::Number(next_item as f64))?;
                    next_item += 1;
                    self.emit(Op::LoadConst(idx));
                    self.expression(value)?;
                }
                Field::Named(name, value) => {
                    let idx = self.add_const(Constant::Str(name.clone()))?;
                    self.emit(Op::LoadConst(idx));
                    self.expression(value)?;
                }
                Field::Keyed(key, value) => {
                    self.expression(key)?;
                    self.expression(value)?;
                }
            }
            self.emit(Op::SetIndex);
        }
        Ok(())
    }

    fn function_literal(&mut self, func: &FunctionBody) -> CompileResult<u16> {
        if func.params.len() > u8::MAX as usize {
            return Err(CompileError::new("too many parameters", func.line));
        }

        let mut outer = self.outer_names.clone();
        outer.extend(self.scope.iter().map(|entry| entry.name.clone()));

        let mut child = FuncState::new(func.line, outer);
        for param in &func.params {
            child.add_local(param)?;
        }
        child.param_count = func.params.len() as u8;
        child.block(&func.body)?;
        child.emit(Op::Return(0));

        if self.protos.len() > u16::MAX as usize {
            return Err(CompileError::new("too many nested functions", func.line));
        }
        // Nested protos inherit the chunk name when bound at load time;
        // fill it here for direct (unserialized) use as well.
        self.protos.push(Rc::new(child.into_proto("")));
        Ok((self.protos.len() - 1) as u16)
    }
}

fn const_eq(a: &Constant, b: &Constant) -> bool {
    match (a, b) {
        (Constant::Nil, Constant::Nil) => true,
        (Constant::True, Constant::True) => true,
        (Constant::False, Constant::False) => true,
        (Constant::Number(x), Constant::Number(y)) => x.to_bits() == y.to_bits(),
        (Constant::Str(x), Constant::Str(y)) => x == y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::parser::Parser;

    fn compile(source: &str) -> Proto {
        let chunk = Parser::new(source).parse_chunk().expect("parse failure");
        Compiler::new("test")
            .compile_chunk(&chunk)
            .expect("compile failure")
    }

    fn compile_err(source: &str) -> CompileError {
        let chunk = Parser::new(source).parse_chunk().expect("parse failure");
        Compiler::new("test")
            .compile_chunk(&chunk)
            .expect_err("expected compile failure")
    }

    #[test]
    fn locals_get_frame_slots() {
        let proto = compile("local a = 1 local b = 2 return a + b");
        assert_eq!(proto.locals.len(), 2);
        assert_eq!(proto.locals[0].slot, 0);
        assert_eq!(proto.locals[1].slot, 1);
    }

    #[test]
    fn constants_are_deduplicated() {
        let proto = compile("return 1 + 1 + 1");
        let numbers = proto
            .consts
            .iter()
            .filter(|c| matches!(c, Constant::Number(_)))
            .count();
        assert_eq!(numbers, 1);
    }

    #[test]
    fn nested_functions_become_protos() {
        let proto = compile("function f(x) return x end return f");
        assert_eq!(proto.protos.len(), 1);
        assert_eq!(proto.protos[0].param_count, 1);
        assert_eq!(proto.protos[0].line_defined, 1);
    }

    #[test]
    fn upvalue_capture_is_rejected() {
        let err = compile_err("local x = 1 function f() return x end");
        assert!(err.message.contains("upvalue"));
    }

    #[test]
    fn statement_lines_reach_line_info() {
        let proto = compile("local a = 1\nreturn a");
        assert_eq!(proto.code.len(), proto.lines.len());
        assert!(proto.lines.contains(&1));
        assert!(proto.lines.contains(&2));
    }
}
