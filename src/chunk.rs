use std::convert::TryFrom;
use std::fmt::Display;
use std::rc::Rc;

use thiserror::Error;

use crate::value::Member;

/// A single instruction, with its operands carried in the variant.
/// The compiler emits these straight into a `Chunk` and the VM matches on them; there is
/// no byte encoding in between since programs are never written to disk.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Push a literal by its index into the literal pool.
    Literal(u8),
    /// Put Nil on the stack
    Nil,
    /// Put true on the stack
    True,
    /// Put false on the stack
    False,
    /// Discard the top value
    Pop,
    /// Pop the top value into a new global named by a string literal.
    DefineGlobal(u8),
    /// Push the global named by a string literal.
    GetGlobal(u8),
    /// Store the top value (without popping) into an existing global.
    SetGlobal(u8),
    /// Push the local in the given frame-relative slot.
    GetLocal(u8),
    /// Store the top value (without popping) into a frame-relative slot.
    SetLocal(u8),
    /// Replace the top value with one of its members.
    GetMember(Member),
    /// Pop a number into a member of a global, pushing the stored number back.
    SetGlobalMember(u8, Member),
    /// Pop a number into a member of a local, pushing the stored number back.
    SetLocalMember(u8, Member),
    /// Pop two and push a bool for if they are equal or not
    Equal,
    /// If stack is TOP: b, a, ..., push the bool a>b
    Greater,
    /// If stack is TOP: b, a, ..., push the bool a<b
    Less,
    /// If stack is TOP: b, a ..., pop two and push (a+b)
    Add,
    /// If stack is TOP: b, a ..., pop two and push (a-b)
    Subtract,
    /// If stack is TOP: b, a ..., pop two and push (a*b)
    Multiply,
    /// If stack is TOP: b, a ..., pop two and push (a/b)
    Divide,
    /// Logical negation of the top stack item
    Not,
    /// Negate the top value on the stack
    Negate,
    /// Pop and print the top value
    Print,
    /// Skip forward this many instructions.
    Jump(u16),
    /// Skip forward if the top value is exactly `false`. Leaves the value on the stack.
    JumpIfFalse(u16),
    /// Jump backward this many instructions.
    Loop(u16),
    /// Call the value below this many arguments.
    Call(u8),
    /// Return the top value from the current function.
    Return,
    /// Suspend the VM until it is resumed.
    Yield,
    /// Stop the whole program.
    End,
}

impl Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Instruction::Literal(u) => write!(f, "OP_LITERAL {:4}", u),
            Instruction::Nil => write!(f, "OP_NIL"),
            Instruction::True => write!(f, "OP_TRUE"),
            Instruction::False => write!(f, "OP_FALSE"),
            Instruction::Pop => write!(f, "OP_POP"),
            Instruction::DefineGlobal(u) => write!(f, "OP_DEFINE_GLOBAL {:4}", u),
            Instruction::GetGlobal(u) => write!(f, "OP_GET_GLOBAL {:4}", u),
            Instruction::SetGlobal(u) => write!(f, "OP_SET_GLOBAL {:4}", u),
            Instruction::GetLocal(u) => write!(f, "OP_GET_LOCAL {:4}", u),
            Instruction::SetLocal(u) => write!(f, "OP_SET_LOCAL {:4}", u),
            Instruction::GetMember(m) => write!(f, "OP_GET_MEMBER .{}", m),
            Instruction::SetGlobalMember(u, m) => write!(f, "OP_SET_GLOBAL_MEMBER {:4} .{}", u, m),
            Instruction::SetLocalMember(u, m) => write!(f, "OP_SET_LOCAL_MEMBER {:4} .{}", u, m),
            Instruction::Equal => write!(f, "OP_EQUAL"),
            Instruction::Greater => write!(f, "OP_GREATER"),
            Instruction::Less => write!(f, "OP_LESS"),
            Instruction::Add => write!(f, "OP_ADD"),
            Instruction::Subtract => write!(f, "OP_SUBTRACT"),
            Instruction::Multiply => write!(f, "OP_MULTIPLY"),
            Instruction::Divide => write!(f, "OP_DIVIDE"),
            Instruction::Not => write!(f, "OP_NOT"),
            Instruction::Negate => write!(f, "OP_NEGATE"),
            Instruction::Print => write!(f, "OP_PRINT"),
            Instruction::Jump(o) => write!(f, "OP_JUMP {:4}", o),
            Instruction::JumpIfFalse(o) => write!(f, "OP_JUMP_IF_FALSE {:4}", o),
            Instruction::Loop(o) => write!(f, "OP_LOOP {:4}", o),
            Instruction::Call(n) => write!(f, "OP_CALL {:4}", n),
            Instruction::Return => write!(f, "OP_RETURN"),
            Instruction::Yield => write!(f, "OP_YIELD"),
            Instruction::End => write!(f, "OP_END"),
        }
    }
}

/// A compile-time constant referenced from the instruction stream by index.
#[derive(Debug, Clone)]
pub enum Literal {
    #[allow(missing_docs)]
    Int(i64),
    #[allow(missing_docs)]
    Float(f64),
    /// String contents; the VM interns them into its own heap.
    String(Rc<str>),
    /// A function nested in this one.
    Function(Rc<Function>),
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Literal::Int(a), Literal::Int(b)) => a == b,
            (Literal::Float(a), Literal::Float(b)) => a.to_bits() == b.to_bits(),
            (Literal::String(a), Literal::String(b)) => a == b,
            (Literal::Function(a), Literal::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Int(i) => write!(f, "{}", i),
            Literal::Float(x) => write!(f, "{}", x),
            Literal::String(s) => write!(f, r#""{}""#, s),
            Literal::Function(func) => Display::fmt(func, f),
        }
    }
}

/// Errors from building a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    /// Literal indices are a single byte.
    #[error("Too many literals in one function.")]
    TooManyLiterals,
    /// Tried to patch something that is not a forward jump.
    #[error("No jump to patch at instruction {0}.")]
    NotAJump(usize),
}

/// Most literals one chunk can hold.
pub const MAX_LITERALS: usize = u8::MAX as usize + 1;

/// A chunk is an append-only instruction stream, the source line of every
/// instruction, and the literal pool the instructions index into.
#[derive(Debug, Default)]
pub struct Chunk {
    code: Vec<Instruction>,
    lines: Vec<usize>,
    literals: Vec<Literal>,
}

impl Chunk {
    /// A new chunk is empty.
    pub fn new() -> Self {
        Chunk::default()
    }

    /// Add an instruction to the chunk's code.
    pub fn write_instruction(&mut self, instruction: Instruction, line: usize) {
        self.code.push(instruction);
        self.lines.push(line);
    }

    /// Add a literal to the chunk's pool, returning its index.
    pub fn add_literal(&mut self, literal: Literal) -> Result<u8, ChunkError> {
        let idx = u8::try_from(self.literals.len()).map_err(|_| ChunkError::TooManyLiterals)?;
        self.literals.push(literal);
        Ok(idx)
    }

    /// Index of an existing string literal with these contents, if any.
    pub fn find_string(&self, value: &str) -> Option<u8> {
        self.literals
            .iter()
            .position(|l| matches!(l, Literal::String(s) if &**s == value))
            .and_then(|i| u8::try_from(i).ok())
    }

    /// Set the offset of the forward jump at `at`.
    pub fn patch_jump(&mut self, at: usize, offset: u16) -> Result<(), ChunkError> {
        match self.code.get_mut(at) {
            Some(Instruction::Jump(o)) | Some(Instruction::JumpIfFalse(o)) => {
                *o = offset;
                Ok(())
            }
            _ => Err(ChunkError::NotAJump(at)),
        }
    }

    #[allow(missing_docs)]
    pub fn instruction(&self, ip: usize) -> Option<Instruction> {
        self.code.get(ip).copied()
    }

    /// Source line of the instruction at `ip`.
    pub fn line(&self, ip: usize) -> Option<usize> {
        self.lines.get(ip).copied()
    }

    #[allow(missing_docs)]
    pub fn literal(&self, idx: u8) -> Option<&Literal> {
        self.literals.get(usize::from(idx))
    }

    #[allow(missing_docs)]
    pub fn literals(&self) -> &[Literal] {
        &self.literals
    }

    #[allow(missing_docs)]
    pub fn code(&self) -> &[Instruction] {
        &self.code
    }

    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.code.len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// One line of disassembly.
    pub fn disassemble_instruction(&self, ip: usize) -> String {
        let (instruction, line) = match (self.instruction(ip), self.line(ip)) {
            (Some(i), Some(l)) => (i, l),
            _ => return format!("i{:04} <out of range>", ip),
        };
        let mut ret = format!("i{:04} {:04} {}", ip, line, instruction);
        match instruction {
            Instruction::Literal(u)
            | Instruction::DefineGlobal(u)
            | Instruction::GetGlobal(u)
            | Instruction::SetGlobal(u)
            | Instruction::SetGlobalMember(u, _) => match self.literal(u) {
                Some(literal) => ret.push_str(&format!(" '{}'", literal)),
                None => ret.push_str(" <bad literal>"),
            },
            Instruction::Jump(o) | Instruction::JumpIfFalse(o) => {
                ret.push_str(&format!(" -> i{:04}", ip + 1 + usize::from(o)))
            }
            Instruction::Loop(o) => ret.push_str(&format!(
                " -> i{:04}",
                (ip + 1).saturating_sub(usize::from(o))
            )),
            _ => {}
        }
        ret
    }

    /// Return a human-readable string for a chunk.
    pub fn disassemble(&self, title: &str) -> String {
        let mut ret = format!("== {} ==\n", title);
        for ip in 0..self.code.len() {
            ret.push_str(&self.disassemble_instruction(ip));
            ret.push('\n');
        }
        ret
    }
}

/// A compiled function: the top-level script is one too, without a name.
#[derive(Debug)]
pub struct Function {
    pub(crate) name: Option<String>,
    pub(crate) arity: usize,
    pub(crate) chunk: Chunk,
}

impl Function {
    #[allow(missing_docs)]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The name used in stack traces.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed script")
    }

    #[allow(missing_docs)]
    pub fn arity(&self) -> usize {
        self.arity
    }

    #[allow(missing_docs)]
    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    /// Disassembly of this function and, after it, every function nested in it.
    pub fn disassemble(&self) -> String {
        let title = match &self.name {
            Some(name) => format!("{}/{}", name, self.arity),
            None => "<script>".to_string(),
        };
        let mut ret = self.chunk.disassemble(&title);
        for literal in self.chunk.literals() {
            if let Literal::Function(nested) = literal {
                ret.push_str(&nested.disassemble());
            }
        }
        ret
    }
}

impl Display for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name.as_ref() {
            None => write!(f, "<script>"),
            Some(name) => write!(f, "<fn {}>", name),
        }
    }
}

/// A standalone compiled script: its entry function plus every string any of its
/// functions uses, which a VM copies into its intern table when it loads the program.
#[derive(Debug)]
pub struct Program {
    main: Rc<Function>,
    strings: Vec<Rc<str>>,
}

impl Program {
    pub(crate) fn new(main: Function, strings: Vec<Rc<str>>) -> Program {
        Program {
            main: Rc::new(main),
            strings,
        }
    }

    /// The function the VM calls to run the script.
    pub fn main(&self) -> &Rc<Function> {
        &self.main
    }

    /// Every compile-time string in the program, deduplicated.
    pub fn strings(&self) -> &[Rc<str>] {
        &self.strings
    }

    /// The functions declared at the top level of the script.
    pub fn functions(&self) -> impl Iterator<Item = &Rc<Function>> + '_ {
        self.main.chunk.literals().iter().filter_map(|l| match l {
            Literal::Function(f) => Some(f),
            _ => None,
        })
    }

    /// A top-level function by name, for registering as a user function.
    pub fn function(&self, name: &str) -> Option<Rc<Function>> {
        self.functions().find(|f| f.name() == Some(name)).cloned()
    }

    #[allow(missing_docs)]
    pub fn disassemble(&self) -> String {
        self.main.disassemble()
    }
}
