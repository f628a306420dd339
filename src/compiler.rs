// I found https://matklad.github.io/2020/04/13/simple-but-powerful-pratt-parsing.html
// to be a very helpful guide to writing a Pratt parser in Rust.

use std::borrow::Cow;
use std::collections::HashSet;
use std::convert::TryFrom;
use std::fmt::Display;
use std::rc::Rc;

use thiserror::Error;

use crate::chunk::{Chunk, Function, Instruction, Literal, Program};
use crate::functions::HostFunctions;
use crate::scanner::{Scanner, Token, TokenType};
use crate::value::Member;

/// Most locals (the reserved slot 0 included) one function can have.
pub const MAX_LOCALS: usize = u8::MAX as usize + 1;
/// Most parameters a function can declare, and most arguments a call can pass.
pub const MAX_ARGS: usize = u8::MAX as usize;

/// Where in the source a diagnostic points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// At the end of the input.
    AtEnd,
    /// At the given lexeme.
    At(String),
    /// Lexical errors carry their own description.
    Nowhere,
}

/// One compile error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    #[allow(missing_docs)]
    pub line: usize,
    #[allow(missing_docs)]
    pub location: Location,
    #[allow(missing_docs)]
    pub message: String,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[line {}] Error", self.line)?;
        match &self.location {
            Location::AtEnd => write!(f, " at end")?,
            Location::At(lexeme) => write!(f, " at '{}'", lexeme)?,
            Location::Nowhere => {}
        }
        write!(f, ": {}", self.message)
    }
}

/// Compilation failed; every error found in the single pass is listed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", join_lines(.diagnostics))]
pub struct CompileError {
    #[allow(missing_docs)]
    pub diagnostics: Vec<Diagnostic>,
}

fn join_lines(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(Diagnostic::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

mod precedence {
    // The book uses a C enum. The key, really, is a comparable enum, thus we derive Ord.
    // The book also uses an array indexed by the enums, but that's really just a match statement.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    pub enum Precedence {
        Assignment,
        Or,
        And,
        Equality,
        Comparison,
        Term,
        Factor,
        Unary,
        Call,
        Primary,
    }
    use Precedence::*;

    impl Precedence {
        pub fn next(&self) -> Precedence {
            match self {
                Assignment => Or,
                Or => And,
                And => Equality,
                Equality => Comparison,
                Comparison => Term,
                Term => Factor,
                Factor => Unary,
                Unary => Call,
                Call => Primary,
                Primary => Primary,
            }
        }
    }

    use crate::scanner::TokenType;

    pub fn infix_precedence(typ: &TokenType) -> Option<Precedence> {
        match typ {
            TokenType::Or => Some(Or),
            TokenType::And => Some(And),
            TokenType::EqualEqual | TokenType::BangEqual => Some(Equality),
            TokenType::Greater
            | TokenType::GreaterEqual
            | TokenType::Less
            | TokenType::LessEqual => Some(Comparison),
            TokenType::Minus | TokenType::Plus => Some(Term),
            TokenType::Slash | TokenType::Star => Some(Factor),
            TokenType::LeftParen | TokenType::Dot => Some(Call),
            _ => None,
        }
    }
}

use precedence::*;

#[derive(Debug)]
struct Local<'a> {
    name: Cow<'a, str>,
    // None while the initializer is being compiled.
    depth: Option<usize>,
}

#[derive(Debug)]
struct FunctionState<'a> {
    function: Function,
    locals: Vec<Local<'a>>,
    scope_depth: usize,
}

impl<'a> FunctionState<'a> {
    fn new(name: Option<String>) -> FunctionState<'a> {
        FunctionState {
            function: Function {
                name,
                arity: 0,
                chunk: Chunk::new(),
            },
            // slot 0 holds the function being called
            locals: vec![Local {
                name: Cow::Borrowed(""),
                depth: Some(0),
            }],
            scope_depth: 0,
        }
    }
}

#[derive(Clone, Copy)]
enum Target {
    Local(u8),
    Global(u8),
}

// Parser takes a source of tokens, and spits out a program.
// The public API for Parser is the compile() function.
#[derive(Debug)]
struct Parser<'a, T> {
    tokens: T,
    previous: Token<'a>,
    current_token: Token<'a>,
    function: FunctionState<'a>,
    enclosing: Vec<FunctionState<'a>>,
    // Globals a script may reference: host functions plus top-level declarations seen so far.
    globals: HashSet<String>,
    strings: Vec<Rc<str>>,
    diagnostics: Vec<Diagnostic>,
    had_error: bool,
    in_panic_mode: bool,
}

impl<'a, T> Parser<'a, T>
where
    T: Iterator<Item = Token<'a>>,
{
    fn compile(mut self) -> Result<Program, CompileError> {
        self.advance();
        while !self.matches(TokenType::Eof) {
            self.declaration();
        }
        self.emit_return();

        if self.had_error {
            return Err(CompileError {
                diagnostics: self.diagnostics,
            });
        }
        let main = self.function.function;
        log::debug!(
            "compiled script: {} instructions, {} literals, {} strings",
            main.chunk.len(),
            main.chunk.literals().len(),
            self.strings.len()
        );
        Ok(Program::new(main, self.strings))
    }

    fn advance(&mut self) {
        let next = loop {
            let next = self
                .tokens
                .next()
                .unwrap_or_else(|| Token::eof(self.current_token.line));
            if let TokenType::Error = next.typ {
                self.error_at(&next, &next.raw)
            } else {
                break next;
            }
        };
        self.previous = std::mem::replace(&mut self.current_token, next);
    }

    fn check(&self, typ: TokenType) -> bool {
        self.current_token.typ == typ
    }

    fn matches(&mut self, typ: TokenType) -> bool {
        if self.check(typ) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, expected_type: TokenType, message_if_missing: &str) {
        if self.current_token.typ == expected_type {
            self.advance();
        } else {
            self.error_at_current(message_if_missing);
        }
    }

    // ---- declarations and statements ----

    fn declaration(&mut self) {
        if self.matches(TokenType::Fun) {
            self.fun_declaration();
        } else if self.matches(TokenType::Let) {
            self.let_declaration();
        } else {
            self.statement();
        }

        if self.in_panic_mode {
            self.synchronize();
        }
    }

    fn let_declaration(&mut self) {
        self.consume(TokenType::Identifier, "Expect variable name.");
        let name = self.previous.raw.clone();
        self.declare_variable(&name);

        if self.matches(TokenType::Equal) {
            self.expression();
        } else {
            self.write_instruction(Instruction::Nil);
        }
        self.consume(
            TokenType::Semicolon,
            "Expect ';' after variable declaration.",
        );
        self.define_variable(name);
    }

    fn fun_declaration(&mut self) {
        self.consume(TokenType::Identifier, "Expect function name.");
        let name = self.previous.raw.clone();
        if self.function.scope_depth == 0 {
            // visible inside its own body, so it can recurse
            self.globals.insert(name.to_string());
        } else {
            self.declare_variable(&name);
            self.mark_initialized();
        }
        self.function_body(name.to_string());
        self.define_variable(name);
    }

    fn function_body(&mut self, name: String) {
        let outer = std::mem::replace(&mut self.function, FunctionState::new(Some(name)));
        self.enclosing.push(outer);
        self.begin_scope();

        self.consume(TokenType::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenType::RightParen) {
            loop {
                if self.function.function.arity == MAX_ARGS {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                self.function.function.arity += 1;
                self.consume(TokenType::Identifier, "Expect parameter name.");
                let param = self.previous.raw.clone();
                self.declare_variable(&param);
                self.mark_initialized();
                if !self.matches(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expect ')' after parameters.");
        self.consume(TokenType::LeftBrace, "Expect '{' before function body.");
        self.block();
        self.emit_return();

        let Some(outer) = self.enclosing.pop() else {
            return;
        };
        let inner = std::mem::replace(&mut self.function, outer);
        let idx = self.make_literal(Literal::Function(Rc::new(inner.function)));
        self.write_instruction(Instruction::Literal(idx));
    }

    fn statement(&mut self) {
        if self.matches(TokenType::Print) {
            self.expression();
            self.consume(TokenType::Semicolon, "Expect ';' after value.");
            self.write_instruction(Instruction::Print);
        } else if self.matches(TokenType::If) {
            self.if_statement();
        } else if self.matches(TokenType::While) {
            self.while_statement();
        } else if self.matches(TokenType::Return) {
            self.return_statement();
        } else if self.matches(TokenType::Yield) {
            self.consume(TokenType::Semicolon, "Expect ';' after 'yield'.");
            self.write_instruction(Instruction::Yield);
        } else if self.matches(TokenType::End) {
            self.consume(TokenType::Semicolon, "Expect ';' after 'end'.");
            self.write_instruction(Instruction::End);
        } else if self.matches(TokenType::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression();
            self.consume(TokenType::Semicolon, "Expect ';' after expression.");
            self.write_instruction(Instruction::Pop);
        }
    }

    fn block(&mut self) {
        while !self.check(TokenType::RightBrace) && !self.check(TokenType::Eof) {
            self.declaration();
        }
        self.consume(TokenType::RightBrace, "Expect '}' after block.");
    }

    fn if_statement(&mut self) {
        self.consume(TokenType::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(Instruction::JumpIfFalse);
        self.write_instruction(Instruction::Pop);
        self.statement();
        let else_jump = self.emit_jump(Instruction::Jump);

        self.patch_jump(then_jump);
        self.write_instruction(Instruction::Pop);
        if self.matches(TokenType::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk().len();
        self.consume(TokenType::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenType::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(Instruction::JumpIfFalse);
        self.write_instruction(Instruction::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.write_instruction(Instruction::Pop);
    }

    fn return_statement(&mut self) {
        if self.matches(TokenType::Semicolon) {
            self.emit_return();
        } else {
            self.expression();
            self.consume(TokenType::Semicolon, "Expect ';' after return value.");
            self.write_instruction(Instruction::Return);
        }
    }

    fn synchronize(&mut self) {
        self.in_panic_mode = false;
        while self.current_token.typ != TokenType::Eof {
            if self.previous.typ == TokenType::Semicolon {
                return;
            }
            match self.current_token.typ {
                TokenType::Fun
                | TokenType::Let
                | TokenType::If
                | TokenType::While
                | TokenType::Print
                | TokenType::Return
                | TokenType::Yield
                | TokenType::End => return,
                _ => self.advance(),
            }
        }
    }

    // ---- scopes and variables ----

    fn begin_scope(&mut self) {
        self.function.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.function.scope_depth -= 1;
        loop {
            let depth = self.function.scope_depth;
            let leaving = match self.function.locals.last() {
                Some(local) => local.depth.map_or(true, |d| d > depth),
                None => false,
            };
            if !leaving {
                break;
            }
            self.function.locals.pop();
            self.write_instruction(Instruction::Pop);
        }
    }

    // Globals are late bound, so only locals are recorded here.
    fn declare_variable(&mut self, name: &Cow<'a, str>) {
        if self.function.scope_depth == 0 {
            return;
        }
        let depth = self.function.scope_depth;
        let duplicate = self
            .function
            .locals
            .iter()
            .rev()
            .take_while(|local| local.depth.map_or(true, |d| d >= depth))
            .any(|local| local.name == *name);
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name.clone());
    }

    fn add_local(&mut self, name: Cow<'a, str>) {
        if self.function.locals.len() == MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.function.locals.push(Local { name, depth: None });
    }

    fn mark_initialized(&mut self) {
        let depth = self.function.scope_depth;
        if depth == 0 {
            return;
        }
        if let Some(local) = self.function.locals.last_mut() {
            local.depth = Some(depth);
        }
    }

    fn define_variable(&mut self, name: Cow<'a, str>) {
        if self.function.scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        let idx = self.identifier_literal(&name);
        self.write_instruction(Instruction::DefineGlobal(idx));
        self.globals.insert(name.into_owned());
    }

    fn resolve_local(&mut self, name: &str) -> Option<u8> {
        let (slot, initialized) = self
            .function
            .locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, local)| local.name == name)
            .map(|(slot, local)| (slot, local.depth.is_some()))?;
        if !initialized {
            self.error("Can't read local variable in its own initializer.");
        }
        // add_local keeps the count within a byte
        u8::try_from(slot).ok()
    }

    fn resolve(&mut self, name: &str) -> Option<Target> {
        if let Some(slot) = self.resolve_local(name) {
            return Some(Target::Local(slot));
        }
        if self.globals.contains(name) {
            return Some(Target::Global(self.identifier_literal(name)));
        }
        self.error(&format!("Undefined variable '{}'.", name));
        None
    }

    fn named_variable(&mut self, name: &str, can_assign: bool) {
        let Some(target) = self.resolve(name) else {
            return;
        };
        let (get, set) = match target {
            Target::Local(slot) => (Instruction::GetLocal(slot), Instruction::SetLocal(slot)),
            Target::Global(idx) => (Instruction::GetGlobal(idx), Instruction::SetGlobal(idx)),
        };

        if can_assign && self.matches(TokenType::Equal) {
            self.expression();
            self.write_instruction(set);
        } else if can_assign && self.matches(TokenType::Dot) {
            // `name.member` may turn out to be an assignment, which must go straight to the variable
            let Some(member) = self.member_name() else {
                return;
            };
            if self.matches(TokenType::Equal) {
                self.expression();
                self.write_instruction(match target {
                    Target::Local(slot) => Instruction::SetLocalMember(slot, member),
                    Target::Global(idx) => Instruction::SetGlobalMember(idx, member),
                });
            } else {
                self.write_instruction(get);
                self.write_instruction(Instruction::GetMember(member));
            }
        } else {
            self.write_instruction(get);
        }
    }

    fn member_name(&mut self) -> Option<Member> {
        self.consume(TokenType::Identifier, "Expect member name after '.'.");
        if self.previous.typ != TokenType::Identifier {
            return None;
        }
        let member = Member::from_name(&self.previous.raw);
        if member.is_none() {
            let message = format!(
                "Unknown member '{}'; expected r, t, x or y.",
                self.previous.raw
            );
            self.error(&message);
        }
        member
    }

    // ---- expressions ----

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    // The contract of this function is to consume an expression and emit bytecode to the chunk
    // such that the bytecode is a stack-ified version of the expression e.g.
    // if the tokens are 1 + 2, it should emit two literal instructions then an add.
    fn parse_precedence(&mut self, min_precedence: Precedence) {
        self.advance();
        let can_assign = min_precedence <= Precedence::Assignment;
        if !self.prefix(self.previous.typ, can_assign) {
            self.error("Expect expression.");
            return;
        }

        while let Some(prec) = infix_precedence(&self.current_token.typ) {
            if prec < min_precedence {
                break;
            }
            self.advance();
            self.infix(self.previous.typ, prec);
        }

        if can_assign && self.matches(TokenType::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    // Returns false if the token can't start an expression.
    fn prefix(&mut self, typ: TokenType, can_assign: bool) -> bool {
        match typ {
            TokenType::Number => self.number(),
            TokenType::String => {
                let raw = self.previous.raw.clone();
                let contents = raw.get(1..raw.len() - 1).unwrap_or_default();
                let idx = self.make_literal(Literal::String(contents.into()));
                self.write_instruction(Instruction::Literal(idx));
            }
            TokenType::True => self.write_instruction(Instruction::True),
            TokenType::False => self.write_instruction(Instruction::False),
            TokenType::Nil => self.write_instruction(Instruction::Nil),
            TokenType::Identifier => {
                let name = self.previous.raw.clone();
                self.named_variable(&name, can_assign);
            }
            TokenType::LeftParen => {
                self.expression(); // parens reset the precedence
                self.consume(TokenType::RightParen, "Expect ')' after expression.");
            }
            TokenType::Minus => {
                self.parse_precedence(Precedence::Unary);
                self.write_instruction(Instruction::Negate);
            }
            TokenType::Bang => {
                self.parse_precedence(Precedence::Unary);
                self.write_instruction(Instruction::Not);
            }
            _ => return false,
        }
        true
    }

    fn infix(&mut self, typ: TokenType, prec: Precedence) {
        match typ {
            TokenType::LeftParen => {
                let args = self.argument_list();
                self.write_instruction(Instruction::Call(args));
            }
            TokenType::Dot => {
                if let Some(member) = self.member_name() {
                    self.write_instruction(Instruction::GetMember(member));
                }
            }
            TokenType::And | TokenType::Or => {
                self.error("Logical operators 'and' and 'or' are not supported.");
                self.parse_precedence(prec.next());
            }
            _ => {
                self.parse_precedence(prec.next());
                match typ {
                    TokenType::Plus => self.write_instruction(Instruction::Add),
                    TokenType::Minus => self.write_instruction(Instruction::Subtract),
                    TokenType::Star => self.write_instruction(Instruction::Multiply),
                    TokenType::Slash => self.write_instruction(Instruction::Divide),
                    TokenType::EqualEqual => self.write_instruction(Instruction::Equal),
                    TokenType::BangEqual => {
                        self.write_instruction(Instruction::Equal);
                        self.write_instruction(Instruction::Not);
                    }
                    TokenType::Greater => self.write_instruction(Instruction::Greater),
                    TokenType::GreaterEqual => {
                        self.write_instruction(Instruction::Less);
                        self.write_instruction(Instruction::Not);
                    }
                    TokenType::Less => self.write_instruction(Instruction::Less),
                    TokenType::LessEqual => {
                        self.write_instruction(Instruction::Greater);
                        self.write_instruction(Instruction::Not);
                    }
                    _ => self.error("Unexpected token in infix operator position."),
                }
            }
        }
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: usize = 0;
        if !self.check(TokenType::RightParen) {
            loop {
                self.expression();
                if count == MAX_ARGS {
                    self.error("Can't have more than 255 arguments.");
                }
                count += 1;
                if !self.matches(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expect ')' after arguments.");
        u8::try_from(count).unwrap_or(u8::MAX)
    }

    fn number(&mut self) {
        let raw = self.previous.raw.clone();
        let literal = if raw.contains('.') {
            raw.parse().map(Literal::Float).ok()
        } else {
            raw.parse().map(Literal::Int).ok()
        };
        match literal {
            Some(literal) => {
                let idx = self.make_literal(literal);
                self.write_instruction(Instruction::Literal(idx));
            }
            None => self.error("Number literal is out of range."),
        }
    }

    // ---- emitting ----

    fn chunk(&self) -> &Chunk {
        &self.function.function.chunk
    }

    fn write_instruction(&mut self, instruction: Instruction) {
        let line = self.previous.line;
        self.function
            .function
            .chunk
            .write_instruction(instruction, line)
    }

    fn emit_return(&mut self) {
        self.write_instruction(Instruction::Nil);
        self.write_instruction(Instruction::Return);
    }

    // Emits a jump with a placeholder offset, returning where it is so it can be patched.
    fn emit_jump(&mut self, jump: fn(u16) -> Instruction) -> usize {
        self.write_instruction(jump(u16::MAX));
        self.chunk().len() - 1
    }

    fn patch_jump(&mut self, at: usize) {
        let Ok(offset) = u16::try_from(self.chunk().len() - at - 1) else {
            self.error("Too much code to jump over.");
            return;
        };
        if let Err(e) = self.function.function.chunk.patch_jump(at, offset) {
            self.error(&e.to_string());
        }
    }

    fn emit_loop(&mut self, loop_start: usize) {
        // +1 because the VM has already moved past the loop instruction when it jumps
        match u16::try_from(self.chunk().len() - loop_start + 1) {
            Ok(offset) => self.write_instruction(Instruction::Loop(offset)),
            Err(_) => self.error("Loop body too large."),
        }
    }

    fn make_literal(&mut self, literal: Literal) -> u8 {
        if let Literal::String(s) = &literal {
            if !self.strings.contains(s) {
                self.strings.push(Rc::clone(s));
            }
        }
        match self.function.function.chunk.add_literal(literal) {
            Ok(idx) => idx,
            Err(e) => {
                self.error(&e.to_string());
                0
            }
        }
    }

    // Names of globals reuse an existing string literal when there is one.
    fn identifier_literal(&mut self, name: &str) -> u8 {
        match self.chunk().find_string(name) {
            Some(idx) => idx,
            None => self.make_literal(Literal::String(name.into())),
        }
    }

    // ---- errors ----

    fn error(&mut self, message: &str) {
        let previous = self.previous.clone();
        self.error_at(&previous, message);
    }

    fn error_at_current(&mut self, message: &str) {
        let current_token = self.current_token.clone();
        self.error_at(&current_token, message);
    }

    fn error_at(&mut self, token: &Token<'a>, message: &str) {
        if self.in_panic_mode {
            return;
        }
        self.in_panic_mode = true;
        let location = match token.typ {
            TokenType::Eof => Location::AtEnd,
            TokenType::Error => Location::Nowhere,
            _ => Location::At(token.raw.to_string()),
        };
        let diagnostic = Diagnostic {
            line: token.line,
            location,
            message: message.to_string(),
        };
        log::warn!("{}", diagnostic);
        self.diagnostics.push(diagnostic);
        self.had_error = true;
    }
}

/// Take a source of tokens and compile it against the given host functions, whose
/// names scripts may use as globals. Every error found is returned; a script with
/// any error produces no program at all.
pub fn compile<'a, T>(tokens: T, host: &HostFunctions) -> Result<Program, CompileError>
where
    T: Iterator<Item = Token<'a>>,
{
    let parser = Parser {
        tokens,
        previous: Token::eof(1),
        current_token: Token::eof(1),
        function: FunctionState::new(None),
        enclosing: Vec::new(),
        globals: host.names().map(str::to_string).collect(),
        strings: Vec::new(),
        diagnostics: Vec::new(),
        had_error: false,
        in_panic_mode: false,
    };
    parser.compile()
}

/// Scan and compile script text.
pub fn compile_source(source: &str, host: &HostFunctions) -> Result<Program, CompileError> {
    compile(Scanner::new(source), host)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::chunk::Literal;
    use Instruction::*;

    fn compile_ok(text: &str) -> Program {
        match compile_source(text, &HostFunctions::with_builtins()) {
            Ok(program) => program,
            Err(e) => panic!("compiling {:?} failed:\n{}", text, e),
        }
    }

    fn compile_err(text: &str) -> Vec<Diagnostic> {
        match compile_source(text, &HostFunctions::with_builtins()) {
            Ok(program) => panic!("expected an error, got:\n{}", program.disassemble()),
            Err(e) => e.diagnostics,
        }
    }

    fn messages(text: &str) -> Vec<String> {
        compile_err(text).into_iter().map(|d| d.message).collect()
    }

    #[test]
    fn test_thing() {
        let program = compile_ok("print (1 + 3 ) / -(-1 + -2.5);");
        let debug_text = program.disassemble();
        assert!(debug_text.starts_with("== <script> ==\n"));
        assert!(debug_text.contains("OP_DIVIDE"));
    }

    #[test]
    fn globals_use_named_instructions() {
        let program = compile_ok("let x = 1; x = x + 1; print x;");
        assert_eq!(
            program.main().chunk().code(),
            &[
                Literal(0),
                DefineGlobal(1),
                GetGlobal(1),
                Literal(2),
                Add,
                SetGlobal(1),
                Pop,
                GetGlobal(1),
                Print,
                Nil,
                Return
            ]
        );
        assert_eq!(program.strings().len(), 1);
        assert_eq!(&*program.strings()[0], "x");
    }

    #[test]
    fn locals_use_slots() {
        let program = compile_ok("{ let a = 1; let b = a; print b; }");
        assert_eq!(
            program.main().chunk().code(),
            &[Literal(0), GetLocal(1), GetLocal(2), Print, Pop, Pop, Nil, Return]
        );
    }

    #[test]
    fn shadowing_picks_the_nearest_declaration() {
        let program = compile_ok("{ let a = 1; { let a = 2; print a; } print a; }");
        let code = program.main().chunk().code();
        assert!(code.contains(&GetLocal(2)));
        assert!(code.contains(&GetLocal(1)));
        // one pop for the inner block, one for the outer
        assert_eq!(code.iter().filter(|i| **i == Pop).count(), 2);
    }

    #[test]
    fn leaving_a_scope_pops_each_local() {
        let program = compile_ok("{ let a; let b; let c; }");
        let pops = program
            .main()
            .chunk()
            .code()
            .iter()
            .filter(|i| **i == Pop)
            .count();
        assert_eq!(pops, 3);
    }

    #[test]
    fn block_locals_are_not_visible_after_the_block() {
        let diagnostics = compile_err("{ let x = 1; } print x;");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics[0].to_string(),
            "[line 1] Error at 'x': Undefined variable 'x'."
        );
    }

    #[test]
    fn host_functions_are_known_globals() {
        let program = compile_ok("let v = vector(1, 0); print v.r;");
        let code = program.main().chunk().code();
        assert!(code.contains(&Call(2)));
        assert!(code.contains(&GetMember(Member::R)));
    }

    #[test]
    fn member_assignment_targets_the_variable() {
        let program = compile_ok("let p = point(0, 0); p.x = 3; { let v = vector(1, 0); v.t = 2; }");
        let code = program.main().chunk().code();
        assert!(code.iter().any(|i| matches!(i, SetGlobalMember(_, Member::X))));
        assert!(code.contains(&SetLocalMember(1, Member::T)));
    }

    #[test]
    fn invalid_assignment_targets() {
        assert_eq!(messages("1 = 2;"), vec!["Invalid assignment target."]);
        assert_eq!(
            messages("let v = vector(1, 2); vector(1, 2).r = 3;"),
            vec!["Invalid assignment target."]
        );
    }

    #[test]
    fn unknown_member_is_an_error() {
        assert_eq!(
            messages("let p = point(1, 2); print p.z;"),
            vec!["Unknown member 'z'; expected r, t, x or y."]
        );
    }

    #[test]
    fn local_errors() {
        assert_eq!(
            messages("{ let a = 1; let a = 2; }"),
            vec!["Already a variable with this name in this scope."]
        );
        assert_eq!(
            messages("{ let a = a; }"),
            vec!["Can't read local variable in its own initializer."]
        );
        // the same name in a nested scope is fine
        compile_ok("{ let a = 1; { let a = 2; } }");
    }

    #[test]
    fn too_many_locals() {
        let mut text = String::from("{");
        for i in 0..MAX_LOCALS {
            text.push_str(&format!(" let v{};", i));
        }
        text.push('}');
        assert_eq!(messages(&text), vec!["Too many local variables in function."]);
    }

    #[test]
    fn too_many_literals() {
        let text: String = (0..=MAX_LOCALS).map(|i| format!("print {};", i)).collect();
        assert_eq!(messages(&text), vec!["Too many literals in one function."]);
    }

    #[test]
    fn panic_mode_reports_each_statement_once() {
        let diagnostics = compile_err("print ok;\nlet = 1;\nprint 1 +;\nprint 3;\n\"open");
        let lines: Vec<_> = diagnostics.iter().map(|d| d.line).collect();
        assert_eq!(lines, vec![1, 2, 3, 5]);
        assert_eq!(diagnostics[0].message, "Undefined variable 'ok'.");
        assert_eq!(diagnostics[1].message, "Expect variable name.");
        assert_eq!(diagnostics[2].message, "Expect expression.");
        assert_eq!(diagnostics[3].location, Location::Nowhere);
        assert_eq!(diagnostics[3].message, "Unterminated string.");
    }

    #[test]
    fn missing_semicolon_at_end() {
        let diagnostics = compile_err("print 1");
        assert_eq!(
            diagnostics[0].to_string(),
            "[line 1] Error at end: Expect ';' after value."
        );
    }

    #[test]
    fn logical_operators_are_rejected() {
        assert_eq!(
            messages("print true and false;"),
            vec!["Logical operators 'and' and 'or' are not supported."]
        );
        assert_eq!(
            messages("print true or false;"),
            vec!["Logical operators 'and' and 'or' are not supported."]
        );
    }

    #[test]
    fn while_loops_jump_back_to_the_condition() {
        let program = compile_ok("let i = 0; while (i < 3) { yield; i = i + 1; }");
        let code = program.main().chunk().code();
        let loop_at = code
            .iter()
            .position(|i| matches!(i, Loop(_)))
            .expect("a loop instruction");
        let Loop(offset) = code[loop_at] else {
            unreachable!()
        };
        // lands on the first instruction of the condition
        assert_eq!(loop_at + 1 - usize::from(offset), 2);
        assert_eq!(code[2], GetGlobal(1));
        assert!(code.contains(&Yield));
    }

    #[test]
    fn if_else_jumps_over_the_other_branch() {
        let program = compile_ok("if (true) print 1; else print 2;");
        let code = program.main().chunk().code();
        assert_eq!(code[0], True);
        // jump past then-branch (pop, literal, print, jump) to the else pop
        assert_eq!(code[1], JumpIfFalse(4));
        assert_eq!(code[5], Jump(3));
        assert_eq!(code[6], Pop);
    }

    #[test]
    fn functions_are_nested_literals() {
        let program = compile_ok("fun add(a, b) { return a + b; } print add(1, 2);");
        let add = program.function("add").expect("add is declared");
        assert_eq!(add.arity(), 2);
        assert_eq!(
            add.chunk().code(),
            &[GetLocal(1), GetLocal(2), Add, Return, Nil, Return]
        );
        assert!(program.disassemble().contains("== add/2 =="));
    }

    #[test]
    fn functions_can_recurse_but_not_see_enclosing_locals() {
        compile_ok("fun count(n) { if (n > 0) count(n - 1); }");
        assert_eq!(
            messages("{ let hidden = 1; fun peek() { return hidden; } }"),
            vec!["Undefined variable 'hidden'."]
        );
    }

    #[test]
    fn globals_must_be_declared_before_use() {
        assert_eq!(messages("let a = a;"), vec!["Undefined variable 'a'."]);
        compile_ok("let a = 1; let a = a + 1;");
    }

    #[test]
    fn integer_and_float_literals() {
        let program = compile_ok("print 12; print 1.5;");
        let literals = program.main().chunk().literals();
        assert_eq!(literals[0], Literal::Int(12));
        assert_eq!(literals[1], Literal::Float(1.5));
        assert_eq!(
            messages("print 99999999999999999999;"),
            vec!["Number literal is out of range."]
        );
    }
}
