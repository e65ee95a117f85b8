//! Recursive-descent parser that emits bytecode as it recognizes the grammar.
//!
//! There is no syntax tree. Every expression rule emits the code computing its
//! value and returns an [`Operand`]: a fresh slot owned by the caller, which
//! must either bind it, consume it or release it. Statements thread the
//! current [`Frame`] and patch their own branches before they return.
//!
//! Expression precedence, lowest first:
//!
//! ```text
//! assignment   = += -= *= /= %=        (right associative)
//! ||  &&  |  ^  &
//! relational   < <= > >= == !=
//! shift        << >>
//! additive     + -
//! multiplicative * / %
//! unary        - ! ~
//! primary      literal, variable, call, ( expression )
//! ```

use std::ffi::CString;

use hashbrown::HashMap;

use crate::{
    Span,
    api::{CompilationOptions, Diagnostic, RelatedInfo, Severity},
    lexer::{Lexer, Token},
    types::{FunctionId, NativeKind, NumericClass, Type, TypeTable},
    vm::{Bytecode, NativeSymbol, Opcode, Program, UnitId, Value},
};

use super::{
    emitter::PendingJump,
    error::{CompileError, CompileErrorKind},
    scope::{Frame, LoopContext, Slot},
};

/// The value of a compiled expression.
#[derive(Debug, Clone, Copy)]
struct Operand {
    slot: Slot,
    ty: Type,
    /// Home slot of the variable this value was read from, if it is one.
    place: Option<Slot>,
}

impl Operand {
    fn value(slot: Slot, ty: Type) -> Self {
        Operand {
            slot,
            ty,
            place: None,
        }
    }
}

#[derive(Debug, Clone)]
enum Callable {
    Script {
        unit: UnitId,
        signature: FunctionId,
    },
    Native {
        index: u16,
        signature: FunctionId,
        kinds: Vec<NativeKind>,
    },
}

impl Callable {
    fn signature(&self) -> FunctionId {
        match self {
            Callable::Script { signature, .. } | Callable::Native { signature, .. } => *signature,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    LogicalOr,
    LogicalAnd,
    BitOr,
    BitXor,
    BitAnd,
    Relational,
    Shift,
    Additive,
    Multiplicative,
}

impl Precedence {
    fn tighter(self) -> Option<Precedence> {
        use Precedence::*;
        Some(match self {
            LogicalOr => LogicalAnd,
            LogicalAnd => BitOr,
            BitOr => BitXor,
            BitXor => BitAnd,
            BitAnd => Relational,
            Relational => Shift,
            Shift => Additive,
            Additive => Multiplicative,
            Multiplicative => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arith {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Infix {
    LogicalAnd,
    LogicalOr,
    Arith(Arith),
    Compare(Relation),
}

fn infix(token: &Token) -> Option<(Precedence, Infix)> {
    use Precedence as P;
    Some(match token {
        Token::OrOr => (P::LogicalOr, Infix::LogicalOr),
        Token::AndAnd => (P::LogicalAnd, Infix::LogicalAnd),
        Token::Pipe => (P::BitOr, Infix::Arith(Arith::Or)),
        Token::Caret => (P::BitXor, Infix::Arith(Arith::Xor)),
        Token::Amp => (P::BitAnd, Infix::Arith(Arith::And)),
        Token::Lt => (P::Relational, Infix::Compare(Relation::Lt)),
        Token::Le => (P::Relational, Infix::Compare(Relation::Le)),
        Token::Gt => (P::Relational, Infix::Compare(Relation::Gt)),
        Token::Ge => (P::Relational, Infix::Compare(Relation::Ge)),
        Token::EqEq => (P::Relational, Infix::Compare(Relation::Eq)),
        Token::NotEq => (P::Relational, Infix::Compare(Relation::Ne)),
        Token::Shl => (P::Shift, Infix::Arith(Arith::Shl)),
        Token::Shr => (P::Shift, Infix::Arith(Arith::Shr)),
        Token::Plus => (P::Additive, Infix::Arith(Arith::Add)),
        Token::Minus => (P::Additive, Infix::Arith(Arith::Sub)),
        Token::Star => (P::Multiplicative, Infix::Arith(Arith::Mul)),
        Token::Slash => (P::Multiplicative, Infix::Arith(Arith::Div)),
        Token::Percent => (P::Multiplicative, Infix::Arith(Arith::Mod)),
        _ => return None,
    })
}

/// `None` for plain `=`.
fn assignment_operator(token: &Token) -> Option<Option<Arith>> {
    Some(match token {
        Token::Assign => None,
        Token::PlusAssign => Some(Arith::Add),
        Token::MinusAssign => Some(Arith::Sub),
        Token::StarAssign => Some(Arith::Mul),
        Token::SlashAssign => Some(Arith::Div),
        Token::PercentAssign => Some(Arith::Mod),
        _ => return None,
    })
}

/// Attaches a source location to an error raised by the emitter or allocator.
trait At<T> {
    fn at(self, span: &Span) -> Result<T, CompileError>;
}

impl<T> At<T> for Result<T, CompileErrorKind> {
    fn at(self, span: &Span) -> Result<T, CompileError> {
        self.map_err(|kind| CompileError::new(kind, span.clone()))
    }
}

/// Output of a successful compilation.
#[derive(Debug)]
pub struct Compilation {
    pub program: Program,
    /// Non-fatal diagnostics, such as redeclarations in one scope.
    pub warnings: Vec<Diagnostic>,
}

/// Compiles a whole source file. Native functions named by `extern fn`
/// declarations are resolved against `natives`.
pub fn compile(
    source: &str,
    natives: &[NativeSymbol],
    options: &CompilationOptions,
) -> Result<Compilation, CompileError> {
    tracing::debug!(len = source.len(), "compiling");
    Parser::new(source, natives, options)?.parse_program()
}

pub struct Parser<'src, 'env> {
    lexer: Lexer<'src>,
    options: CompilationOptions,
    environment: &'env [NativeSymbol],
    /// The function being compiled. Enclosing frames are saved by
    /// `function_declaration` while a nested body is compiled.
    frame: Frame,
    units: Vec<Option<Bytecode>>,
    functions: HashMap<String, Callable>,
    natives: Vec<NativeSymbol>,
    types: TypeTable,
    strings: Vec<CString>,
    warnings: Vec<Diagnostic>,
}

impl<'src, 'env> Parser<'src, 'env> {
    pub fn new(
        source: &'src str,
        environment: &'env [NativeSymbol],
        options: &CompilationOptions,
    ) -> Result<Self, CompileError> {
        let mut main = Frame::new(
            "main".to_owned(),
            UnitId(0),
            options.max_slots,
            options.max_constants,
        );
        main.checked_return = false;
        Ok(Parser {
            lexer: Lexer::new(source)?,
            options: options.clone(),
            environment,
            frame: main,
            units: vec![None],
            functions: HashMap::new(),
            natives: Vec::new(),
            types: TypeTable::new(),
            strings: Vec::new(),
            warnings: Vec::new(),
        })
    }

    /// Compiles statements until end of input into the entry unit `main`.
    pub fn parse_program(mut self) -> Result<Compilation, CompileError> {
        while self.lexer.peek().is_some() {
            self.statement()?;
        }
        let end = self.lexer.span();
        self.frame.emitter.ret();
        let main = core::mem::replace(
            &mut self.frame,
            Frame::new(String::new(), UnitId(0), 0, 0),
        );
        self.seal(main, &end)?;

        let units = self
            .units
            .into_iter()
            .map(|unit| unit.expect("every reserved unit is sealed before parsing ends"))
            .collect();
        Ok(Compilation {
            program: Program {
                units,
                entry: UnitId(0),
                natives: self.natives,
                types: self.types,
                strings: self.strings,
            },
            warnings: self.warnings,
        })
    }

    // === Token helpers ===

    fn advance(&mut self) -> Result<Option<Token>, CompileError> {
        Ok(self.lexer.advance()?)
    }

    fn check(&self, token: &Token) -> bool {
        self.lexer.peek() == Some(token)
    }

    /// Consumes the lookahead if it is `token`.
    fn eat(&mut self, token: &Token) -> Result<bool, CompileError> {
        if self.check(token) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn describe(token: Option<&Token>) -> String {
        token.map_or_else(|| "end of input".to_owned(), Token::to_string)
    }

    fn unexpected(&self, expected: &str) -> CompileError {
        CompileError::new(
            CompileErrorKind::UnexpectedToken {
                expected: expected.to_owned(),
                found: Self::describe(self.lexer.peek()),
            },
            self.lexer.span(),
        )
    }

    /// Consumes `token` or fails; returns its span.
    fn expect(&mut self, token: Token) -> Result<Span, CompileError> {
        if self.check(&token) {
            self.advance()?;
            Ok(self.lexer.prev_span())
        } else {
            Err(self.unexpected(&token.to_string()))
        }
    }

    fn expect_ident(&mut self) -> Result<(String, Span), CompileError> {
        match self.lexer.peek() {
            Some(Token::Ident(_)) => match self.advance()? {
                Some(Token::Ident(name)) => Ok((name, self.lexer.prev_span())),
                _ => unreachable!("lookahead was an identifier"),
            },
            _ => Err(self.unexpected("identifier")),
        }
    }

    /// Span from `start` to the end of the last consumed token.
    fn since(&self, start: &Span) -> Span {
        Span::combine(start, &self.lexer.prev_span())
    }

    // === Diagnostics ===

    fn type_name(&self, ty: Type) -> String {
        match ty {
            Type::Struct(id) => self.types.struct_type(id).name.clone(),
            other => other.to_string(),
        }
    }

    fn mismatch(&self, expected: &str, found: Type, span: &Span) -> CompileError {
        CompileError::new(
            CompileErrorKind::TypeMismatch {
                expected: expected.to_owned(),
                found: self.type_name(found),
            },
            span.clone(),
        )
    }

    fn check_type(&self, expected: Type, found: Type, span: &Span) -> Result<(), CompileError> {
        if expected.accepts(found) {
            Ok(())
        } else {
            Err(self.mismatch(&self.type_name(expected), found, span))
        }
    }

    fn warn_redeclared(&mut self, name: &str, span: Span, previous: Span) {
        tracing::warn!(name, ?span, "redeclared in the same scope");
        self.warnings.push(Diagnostic {
            severity: Severity::Warning,
            message: format!("`{name}` is already declared in this scope"),
            span,
            related: vec![RelatedInfo {
                span: previous,
                message: "previously declared here".to_owned(),
            }],
            help: Some("the new declaration shadows the old one".to_owned()),
            code: Some("W001".to_owned()),
        });
    }

    // === Units ===

    fn reserve_unit(&mut self, span: &Span) -> Result<UnitId, CompileError> {
        let index = u16::try_from(self.units.len())
            .map_err(|_| CompileErrorKind::TooManyFunctions {
                limit: u16::MAX as usize + 1,
            })
            .at(span)?;
        self.units.push(None);
        Ok(UnitId(index))
    }

    fn seal(&mut self, frame: Frame, span: &Span) -> Result<(), CompileError> {
        let stack_size = frame.stack_size();
        let unit = frame.unit;
        let bytecode = frame
            .emitter
            .finalize(frame.name, frame.params, frame.return_type, stack_size)
            .at(span)?;
        tracing::debug!(
            unit = %bytecode.name,
            instructions = bytecode.instructions.len(),
            stack_size,
            "unit finalized"
        );
        tracing::trace!("\n{:?}", bytecode);
        self.units[unit.0 as usize] = Some(bytecode);
        Ok(())
    }

    // === Statements ===

    /// Compiles one statement. Returns whether every path through it ends in
    /// a `return`, so that control can never fall off its end.
    fn statement(&mut self) -> Result<bool, CompileError> {
        let returns = match self.lexer.peek() {
            Some(Token::LBrace) => self.block()?,
            Some(Token::Let) => {
                self.let_statement()?;
                false
            }
            Some(Token::If) => self.if_statement()?,
            Some(Token::While) => {
                self.while_statement()?;
                false
            }
            Some(Token::Loop) => self.loop_statement()?,
            Some(Token::Break) => {
                self.break_statement()?;
                false
            }
            Some(Token::Return) => {
                self.return_statement()?;
                true
            }
            Some(Token::Fn) => {
                self.function_declaration()?;
                false
            }
            Some(Token::Extern) => {
                self.extern_declaration()?;
                false
            }
            Some(Token::Struct) => {
                self.struct_declaration()?;
                false
            }
            Some(Token::Semicolon) => false,
            _ => {
                let value = self.expression()?;
                self.frame.release(value.slot);
                false
            }
        };
        self.eat(&Token::Semicolon)?;
        Ok(returns)
    }

    fn block(&mut self) -> Result<bool, CompileError> {
        self.expect(Token::LBrace)?;
        self.frame.push_scope();
        let mut returns = false;
        while !matches!(self.lexer.peek(), Some(Token::RBrace) | None) {
            returns |= self.statement()?;
        }
        self.expect(Token::RBrace)?;
        self.frame.pop_scope();
        Ok(returns)
    }

    /// A branch or loop body: one statement in its own scope.
    fn body(&mut self) -> Result<bool, CompileError> {
        self.frame.push_scope();
        let returns = self.statement()?;
        self.frame.pop_scope();
        Ok(returns)
    }

    fn let_statement(&mut self) -> Result<(), CompileError> {
        self.expect(Token::Let)?;
        let (name, name_span) = self.expect_ident()?;
        let annotation = if self.eat(&Token::Colon)? {
            Some(self.type_annotation()?)
        } else {
            None
        };
        self.expect(Token::Assign)?;

        let start = self.lexer.span();
        let value = self.expression()?;
        let span = self.since(&start);
        if value.ty == Type::Void {
            return Err(self.mismatch("a value", value.ty, &span));
        }
        let ty = match annotation {
            Some(ty) => {
                self.check_type(ty, value.ty, &span)?;
                ty
            }
            None => value.ty,
        };

        if let Some(previous) = self.frame.declare(&name, value.slot, ty, name_span.clone()) {
            self.warn_redeclared(&name, name_span, previous.span);
        }
        Ok(())
    }

    /// Evaluates a condition and sets the flag from it; `je` then skips when false.
    fn condition(&mut self) -> Result<(), CompileError> {
        let start = self.lexer.span();
        let cond = self.expression()?;
        self.test_condition(cond, &self.since(&start))?;
        self.frame.release(cond.slot);
        Ok(())
    }

    fn test_condition(&mut self, cond: Operand, span: &Span) -> Result<(), CompileError> {
        if !matches!(cond.ty, Type::Bool | Type::Int(_)) {
            return Err(self.mismatch("bool", cond.ty, span));
        }
        self.frame.emitter.test(cond.slot);
        Ok(())
    }

    fn if_statement(&mut self) -> Result<bool, CompileError> {
        let span = self.expect(Token::If)?;
        self.condition()?;
        let skip_then = self.frame.emitter.jump(Opcode::Je);
        let then_returns = self.body()?;

        if self.eat(&Token::Else)? {
            let skip_else = self.frame.emitter.jump(Opcode::Jmp);
            self.frame.emitter.patch_here(skip_then).at(&span)?;
            let else_returns = self.body()?;
            self.frame.emitter.patch_here(skip_else).at(&span)?;
            Ok(then_returns && else_returns)
        } else {
            self.frame.emitter.patch_here(skip_then).at(&span)?;
            Ok(false)
        }
    }

    fn while_statement(&mut self) -> Result<(), CompileError> {
        let span = self.expect(Token::While)?;
        let top = self.frame.emitter.label();
        self.condition()?;
        let exit = self.frame.emitter.jump(Opcode::Je);
        self.loop_body(top, &span)?;
        self.frame.emitter.patch_here(exit).at(&span)
    }

    /// A `loop` without any `break` can only be left through `return`.
    fn loop_statement(&mut self) -> Result<bool, CompileError> {
        let span = self.expect(Token::Loop)?;
        let top = self.frame.emitter.label();
        let breaks = self.loop_body(top, &span)?;
        Ok(breaks == 0)
    }

    /// Compiles a loop body ending in a jump back to `top`, then sends every
    /// `break` inside it to the instruction after that jump. Returns how many
    /// breaks there were.
    fn loop_body(&mut self, top: usize, span: &Span) -> Result<usize, CompileError> {
        self.frame.loops.push(LoopContext::default());
        self.body()?;
        self.frame.emitter.jump_to(Opcode::Jmp, top).at(span)?;
        let context = self.frame.loops.pop().unwrap_or_default();
        let breaks = context.breaks.len();
        for jump in context.breaks {
            self.frame.emitter.patch_here(jump).at(span)?;
        }
        Ok(breaks)
    }

    fn break_statement(&mut self) -> Result<(), CompileError> {
        let span = self.expect(Token::Break)?;
        if self.frame.loops.is_empty() {
            return Err(CompileError::new(CompileErrorKind::BreakOutsideLoop, span));
        }
        let jump: PendingJump = self.frame.emitter.jump(Opcode::Jmp);
        if let Some(context) = self.frame.loops.last_mut() {
            context.breaks.push(jump);
        }
        Ok(())
    }

    fn return_statement(&mut self) -> Result<(), CompileError> {
        let start = self.expect(Token::Return)?;
        let value = if matches!(
            self.lexer.peek(),
            None | Some(Token::Semicolon) | Some(Token::RBrace)
        ) {
            None
        } else {
            Some(self.expression()?)
        };
        let span = self.since(&start);
        let ty = value.map_or(Type::Void, |v| v.ty);

        if self.frame.checked_return || self.frame.return_type != Type::Void {
            self.check_type(self.frame.return_type, ty, &span)?;
        } else {
            self.frame.return_type = ty;
        }

        match value {
            Some(value) => {
                self.frame.emitter.ret_value(value.slot);
                self.frame.release(value.slot);
            }
            None => {
                self.frame.emitter.ret();
            }
        }
        Ok(())
    }

    fn type_annotation(&mut self) -> Result<Type, CompileError> {
        let (name, span) = self.expect_ident()?;
        self.types
            .lookup(&name)
            .ok_or_else(|| CompileError::new(CompileErrorKind::UnknownType(name), span))
    }

    /// `( name: type, ... )`
    fn parameter_list(&mut self) -> Result<Vec<(String, Type, Span)>, CompileError> {
        self.expect(Token::LParen)?;
        let mut params = Vec::new();
        while !self.check(&Token::RParen) {
            let (name, span) = self.expect_ident()?;
            self.expect(Token::Colon)?;
            let ty = self.type_annotation()?;
            params.push((name, ty, span));
            if !self.eat(&Token::Comma)? {
                break;
            }
        }
        self.expect(Token::RParen)?;
        Ok(params)
    }

    fn declare_function(&mut self, name: String, callable: Callable, span: Span) {
        if self.functions.insert(name.clone(), callable).is_some() {
            tracing::warn!(name = %name, "function redeclared");
            self.warnings.push(Diagnostic {
                severity: Severity::Warning,
                message: format!("function `{name}` is already declared"),
                span,
                related: Vec::new(),
                help: Some("later calls use the new declaration".to_owned()),
                code: Some("W002".to_owned()),
            });
        }
    }

    fn function_declaration(&mut self) -> Result<(), CompileError> {
        self.expect(Token::Fn)?;
        let (name, name_span) = self.expect_ident()?;
        let params = self.parameter_list()?;
        let return_type = if self.eat(&Token::Colon)? {
            self.type_annotation()?
        } else {
            Type::Void
        };

        let param_types = params.iter().map(|(_, ty, _)| *ty).collect();
        let signature = self.types.function(param_types, return_type);
        let unit = self.reserve_unit(&name_span)?;
        // Visible before the body so the function can call itself.
        self.declare_function(
            name.clone(),
            Callable::Script { unit, signature },
            name_span.clone(),
        );

        let mut frame = Frame::new(
            name,
            unit,
            self.options.max_slots,
            self.options.max_constants,
        );
        frame.return_type = return_type;
        for (param, ty, span) in params {
            let slot = frame.allocate().at(&span)?;
            if let Some(previous) = frame.declare(&param, slot, ty, span.clone()) {
                self.warn_redeclared(&param, span, previous.span);
            }
            frame.params.push(param);
        }

        let enclosing = core::mem::replace(&mut self.frame, frame);
        let body = self.block();
        let mut frame = core::mem::replace(&mut self.frame, enclosing);
        let returns = body?;
        if frame.return_type != Type::Void && !returns {
            return Err(CompileError::new(
                CompileErrorKind::MissingReturn {
                    function: frame.name,
                    ty: self.type_name(frame.return_type),
                },
                name_span,
            ));
        }

        frame.emitter.ret();
        self.seal(frame, &name_span)
    }

    fn extern_declaration(&mut self) -> Result<(), CompileError> {
        self.expect(Token::Extern)?;
        self.expect(Token::Fn)?;
        let (name, name_span) = self.expect_ident()?;
        let params = self.parameter_list()?;

        let mut kinds = Vec::with_capacity(params.len());
        for (_, ty, span) in &params {
            let kind = ty.native_kind().ok_or_else(|| {
                CompileError::new(
                    CompileErrorKind::UnsupportedNativeType {
                        function: name.clone(),
                        ty: self.type_name(*ty),
                    },
                    span.clone(),
                )
            })?;
            kinds.push(kind);
        }
        if self.eat(&Token::Colon)? {
            let start = self.lexer.span();
            if self.type_annotation()? != Type::Void {
                return Err(CompileError::new(
                    CompileErrorKind::NonVoidExtern(name),
                    self.since(&start),
                ));
            }
        }

        let environment = self.environment;
        let Some(symbol) = environment.iter().find(|s| s.name == name) else {
            return Err(CompileError::new(
                CompileErrorKind::UnknownNativeSymbol(name),
                name_span,
            ));
        };
        let index = match self.natives.iter().position(|s| s.name == name) {
            Some(index) => index,
            None => {
                self.natives.push(symbol.clone());
                self.natives.len() - 1
            }
        };
        let index = u16::try_from(index)
            .map_err(|_| CompileErrorKind::TooManyFunctions {
                limit: u16::MAX as usize + 1,
            })
            .at(&name_span)?;

        let param_types = params.iter().map(|(_, ty, _)| *ty).collect();
        let signature = self.types.function(param_types, Type::Void);
        self.declare_function(
            name,
            Callable::Native {
                index,
                signature,
                kinds,
            },
            name_span,
        );
        Ok(())
    }

    fn struct_declaration(&mut self) -> Result<(), CompileError> {
        self.expect(Token::Struct)?;
        let (name, _) = self.expect_ident()?;
        self.expect(Token::LBrace)?;
        let mut fields = Vec::new();
        while !self.check(&Token::RBrace) {
            let (field, _) = self.expect_ident()?;
            self.expect(Token::Colon)?;
            let ty = self.type_annotation()?;
            fields.push((field, ty));
            if !(self.eat(&Token::Comma)? || self.eat(&Token::Semicolon)?) {
                break;
            }
        }
        self.expect(Token::RBrace)?;
        self.types.declare_struct(&name, fields);
        Ok(())
    }

    // === Expressions ===

    fn expression(&mut self) -> Result<Operand, CompileError> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Operand, CompileError> {
        let start = self.lexer.span();
        let target = self.binary(Precedence::LogicalOr)?;
        let Some(op) = self.lexer.peek().and_then(assignment_operator) else {
            return Ok(target);
        };
        self.advance()?;
        let Some(home) = target.place else {
            return Err(CompileError::new(
                CompileErrorKind::InvalidAssignmentTarget,
                self.since(&start),
            ));
        };

        let value = self.assignment()?;
        let span = self.since(&start);
        match op {
            None => {
                self.check_type(target.ty, value.ty, &span)?;
                self.frame.emitter.mov(home, value.slot);
                self.frame.release(target.slot);
                Ok(Operand::value(value.slot, target.ty))
            }
            Some(op) => {
                let result = self.arithmetic(op, target, value, &span)?;
                self.frame.emitter.mov(home, result.slot);
                Ok(result)
            }
        }
    }

    /// Precedence climbing over every binary level at or above `min`.
    fn binary(&mut self, min: Precedence) -> Result<Operand, CompileError> {
        let start = self.lexer.span();
        let mut lhs = self.unary()?;
        while let Some((precedence, op)) = self.lexer.peek().and_then(infix) {
            if precedence < min {
                break;
            }
            self.advance()?;
            lhs = match op {
                Infix::LogicalAnd | Infix::LogicalOr => {
                    self.short_circuit(op == Infix::LogicalAnd, lhs, precedence, &start)?
                }
                Infix::Arith(op) => {
                    let rhs = self.operand_above(precedence)?;
                    self.arithmetic(op, lhs, rhs, &self.since(&start))?
                }
                Infix::Compare(relation) => {
                    let rhs = self.operand_above(precedence)?;
                    self.compare(relation, lhs, rhs, &self.since(&start))?
                }
            };
        }
        Ok(lhs)
    }

    /// Right operand of a left-associative operator at `precedence`.
    fn operand_above(&mut self, precedence: Precedence) -> Result<Operand, CompileError> {
        match precedence.tighter() {
            Some(next) => self.binary(next),
            None => self.unary(),
        }
    }

    /// `lhs = lhs <op> rhs`, releasing `rhs`.
    fn arithmetic(
        &mut self,
        op: Arith,
        lhs: Operand,
        rhs: Operand,
        span: &Span,
    ) -> Result<Operand, CompileError> {
        let Some(class) = lhs.ty.numeric_class() else {
            return Err(self.mismatch("int or float", lhs.ty, span));
        };
        if rhs.ty.numeric_class() != Some(class) {
            return Err(self.mismatch(&self.type_name(lhs.ty), rhs.ty, span));
        }

        let opcode = match (op, class) {
            (Arith::Add, NumericClass::Integer) => Opcode::IAdd,
            (Arith::Sub, NumericClass::Integer) => Opcode::ISub,
            (Arith::Mul, NumericClass::Integer) => Opcode::IMul,
            (Arith::Div, NumericClass::Integer) => Opcode::IDiv,
            (Arith::Mod, NumericClass::Integer) => Opcode::IMod,
            (Arith::And, NumericClass::Integer) => Opcode::IAnd,
            (Arith::Or, NumericClass::Integer) => Opcode::IOr,
            (Arith::Xor, NumericClass::Integer) => Opcode::IXor,
            (Arith::Shl, NumericClass::Integer) => Opcode::IShl,
            (Arith::Shr, NumericClass::Integer) => Opcode::IShr,
            (Arith::Add, NumericClass::Float) => Opcode::FAdd,
            (Arith::Sub, NumericClass::Float) => Opcode::FSub,
            (Arith::Mul, NumericClass::Float) => Opcode::FMul,
            (Arith::Div, NumericClass::Float) => Opcode::FDiv,
            (_, NumericClass::Float) => return Err(self.mismatch("int", lhs.ty, span)),
        };
        self.frame
            .emitter
            .binary(opcode, lhs.slot, lhs.slot, rhs.slot);
        self.frame.release(rhs.slot);
        Ok(Operand::value(lhs.slot, lhs.ty))
    }

    /// Compares, then turns the flag into 0 or 1 in the left operand's slot.
    fn compare(
        &mut self,
        relation: Relation,
        lhs: Operand,
        rhs: Operand,
        span: &Span,
    ) -> Result<Operand, CompileError> {
        let opcode = match (lhs.ty.numeric_class(), rhs.ty.numeric_class()) {
            (Some(NumericClass::Integer), Some(NumericClass::Integer)) => Opcode::ICmp,
            (Some(NumericClass::Float), Some(NumericClass::Float)) => Opcode::FCmp,
            (None, None)
                if lhs.ty.accepts(rhs.ty)
                    && matches!(lhs.ty, Type::Bool | Type::Pointer | Type::String) =>
            {
                Opcode::ICmp
            }
            _ => return Err(self.mismatch(&self.type_name(lhs.ty), rhs.ty, span)),
        };
        let branch = match relation {
            Relation::Lt => Opcode::Jlt,
            Relation::Le => Opcode::Jle,
            Relation::Gt => Opcode::Jgt,
            Relation::Ge => Opcode::Jge,
            Relation::Eq => Opcode::Je,
            Relation::Ne => Opcode::Jne,
        };

        let emitter = &mut self.frame.emitter;
        emitter.compare(opcode, lhs.slot, rhs.slot);
        let when_true = emitter.jump(branch);
        emitter.load_int(lhs.slot, 0);
        let done = emitter.jump(Opcode::Jmp);
        emitter.patch_here(when_true).at(span)?;
        emitter.load_int(lhs.slot, 1);
        emitter.patch_here(done).at(span)?;
        self.frame.release(rhs.slot);
        Ok(Operand::value(lhs.slot, Type::Bool))
    }

    /// `&&` and `||`: the right operand only runs when the left one does not
    /// already decide the result.
    fn short_circuit(
        &mut self,
        is_and: bool,
        lhs: Operand,
        precedence: Precedence,
        start: &Span,
    ) -> Result<Operand, CompileError> {
        // `&&` bails out on a zero operand, `||` on a non-zero one.
        let (decide, decided, fallthrough) = if is_and {
            (Opcode::Je, 0, 1)
        } else {
            (Opcode::Jne, 1, 0)
        };

        self.test_condition(lhs, &self.since(start))?;
        let mut shortcuts = vec![self.frame.emitter.jump(decide)];

        let rhs_start = self.lexer.span();
        let rhs = self.operand_above(precedence)?;
        self.test_condition(rhs, &self.since(&rhs_start))?;
        self.frame.release(rhs.slot);
        shortcuts.push(self.frame.emitter.jump(decide));

        let span = self.since(start);
        let emitter = &mut self.frame.emitter;
        emitter.load_int(lhs.slot, fallthrough);
        let done = emitter.jump(Opcode::Jmp);
        for jump in shortcuts {
            emitter.patch_here(jump).at(&span)?;
        }
        emitter.load_int(lhs.slot, decided);
        emitter.patch_here(done).at(&span)?;
        Ok(Operand::value(lhs.slot, Type::Bool))
    }

    fn unary(&mut self) -> Result<Operand, CompileError> {
        let op = match self.lexer.peek() {
            Some(Token::Minus) => Token::Minus,
            Some(Token::Bang) => Token::Bang,
            Some(Token::Tilde) => Token::Tilde,
            _ => return self.primary(),
        };
        let start = self.expect(op.clone())?;
        let operand = self.unary()?;
        let span = self.since(&start);

        let (opcode, ty) = match (op, operand.ty.numeric_class()) {
            (Token::Minus, Some(NumericClass::Integer)) => (Opcode::INeg, operand.ty),
            (Token::Minus, Some(NumericClass::Float)) => (Opcode::FNeg, operand.ty),
            (Token::Minus, None) => return Err(self.mismatch("int or float", operand.ty, &span)),
            (Token::Tilde, Some(NumericClass::Integer)) => (Opcode::IBNot, operand.ty),
            (Token::Tilde, _) => return Err(self.mismatch("int", operand.ty, &span)),
            (_, _) if matches!(operand.ty, Type::Bool | Type::Int(_)) => (Opcode::Not, Type::Bool),
            (_, _) => return Err(self.mismatch("bool", operand.ty, &span)),
        };
        self.frame.emitter.unary(opcode, operand.slot, operand.slot);
        Ok(Operand::value(operand.slot, ty))
    }

    fn primary(&mut self) -> Result<Operand, CompileError> {
        let token = self.advance()?;
        let span = self.lexer.prev_span();
        match token {
            Some(Token::Int(value)) => self.integer_literal(value, &span),
            Some(Token::Float(value)) => {
                let slot = self.frame.allocate().at(&span)?;
                let index = self.frame.emitter.constant(Value::from_float(value)).at(&span)?;
                self.frame.emitter.load_const(slot, index);
                Ok(Operand::value(slot, Type::FLOAT))
            }
            Some(Token::True) => self.bool_literal(true, &span),
            Some(Token::False) => self.bool_literal(false, &span),
            Some(Token::Str(text)) => self.string_literal(text, &span),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(Operand::value(inner.slot, inner.ty))
            }
            Some(Token::Ident(name)) if self.check(&Token::LParen) => self.call(name, span),
            Some(Token::Ident(name)) => self.variable(name, span),
            other => Err(CompileError::new(
                CompileErrorKind::UnexpectedToken {
                    expected: "expression".to_owned(),
                    found: Self::describe(other.as_ref()),
                },
                span,
            )),
        }
    }

    /// Small integers are immediates; anything wider goes to the constant pool.
    fn integer_literal(&mut self, value: i64, span: &Span) -> Result<Operand, CompileError> {
        let slot = self.frame.allocate().at(span)?;
        match i16::try_from(value) {
            Ok(small) => {
                self.frame.emitter.load_int(slot, small);
            }
            Err(_) => {
                let index = self.frame.emitter.constant(Value::from_int(value)).at(span)?;
                self.frame.emitter.load_const(slot, index);
            }
        }
        Ok(Operand::value(slot, Type::INT))
    }

    fn bool_literal(&mut self, value: bool, span: &Span) -> Result<Operand, CompileError> {
        let slot = self.frame.allocate().at(span)?;
        self.frame.emitter.load_int(slot, value as i16);
        Ok(Operand::value(slot, Type::Bool))
    }

    /// String literals become NUL-terminated buffers owned by the program and
    /// are loaded as pointers.
    fn string_literal(&mut self, text: String, span: &Span) -> Result<Operand, CompileError> {
        let owned = CString::new(text)
            .map_err(|_| CompileErrorKind::Lex(crate::lexer::LexError::InvalidCharacter('\0')))
            .at(span)?;
        let pointer = Value::from_ptr(owned.as_ptr());
        self.strings.push(owned);

        let slot = self.frame.allocate().at(span)?;
        let index = self.frame.emitter.constant(pointer).at(span)?;
        self.frame.emitter.load_const(slot, index);
        Ok(Operand::value(slot, Type::String))
    }

    /// Reads a variable into a fresh slot, remembering where it came from.
    fn variable(&mut self, name: String, span: Span) -> Result<Operand, CompileError> {
        let Some(variable) = self.frame.lookup(&name).cloned() else {
            return Err(CompileError::new(
                CompileErrorKind::UndefinedVariable(name),
                span,
            ));
        };
        let slot = self.frame.allocate().at(&span)?;
        self.frame.emitter.mov(slot, variable.slot);
        Ok(Operand {
            slot,
            ty: variable.ty,
            place: Some(variable.slot),
        })
    }

    /// Evaluates every argument, then stages them all, then calls.
    fn call(&mut self, name: String, name_span: Span) -> Result<Operand, CompileError> {
        let Some(callee) = self.functions.get(&name).cloned() else {
            return Err(CompileError::new(
                CompileErrorKind::UndefinedFunction(name),
                name_span,
            ));
        };
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        while !self.check(&Token::RParen) {
            let start = self.lexer.span();
            let arg = self.expression()?;
            args.push((arg, self.since(&start)));
            if !self.eat(&Token::Comma)? {
                break;
            }
        }
        self.expect(Token::RParen)?;
        let span = self.since(&name_span);

        let signature = self.types.function_type(callee.signature()).clone();
        if args.len() != signature.params.len() {
            return Err(CompileError::new(
                CompileErrorKind::ArityMismatch {
                    function: name,
                    expected: signature.params.len(),
                    found: args.len(),
                },
                span,
            ));
        }
        for ((arg, arg_span), &param) in args.iter().zip(&signature.params) {
            self.check_type(param, arg.ty, arg_span)?;
        }

        match callee {
            Callable::Script { unit, .. } => {
                for (arg, _) in &args {
                    self.frame.emitter.param(arg.slot);
                }
                for (arg, _) in args.iter().rev() {
                    self.frame.release(arg.slot);
                }
                let result = self.frame.allocate().at(&span)?;
                self.frame.emitter.call(result, unit.0);
                Ok(Operand::value(result, signature.ret))
            }
            Callable::Native { index, kinds, .. } => {
                for ((arg, _), &kind) in args.iter().zip(&kinds) {
                    self.frame.emitter.push_native(kind, arg.slot);
                }
                for (arg, _) in args.iter().rev() {
                    self.frame.release(arg.slot);
                }
                let function = self.frame.allocate().at(&span)?;
                self.frame.emitter.load_native(function, index);
                self.frame.emitter.call_native_void(function);
                Ok(Operand::value(function, Type::Void))
            }
        }
    }
}
