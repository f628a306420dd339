use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::io::Write;
use std::rc::Rc;

use thiserror::Error;

use crate::chunk::{Function, Instruction, Literal, Program};
use crate::functions::HostFunctions;
use crate::heap::{Heap, Object};
use crate::value::{Value, ValueError};

macro_rules! binary_op {
    ($self:ident, $method:ident) => {{
        let b = $self.stack_pop()?;
        let a = $self.stack_pop()?;
        $self.stack_push(a.$method(b)?)?
    }};
}

/// Slots in the value stack, shared by every call frame.
pub const STACK_MAX: usize = 256;
/// Deepest call nesting a script may reach.
pub const FRAMES_MAX: usize = 16;

// One active function invocation. Its locals are the stack window starting at `base`,
// where slot 0 holds the function itself.
#[derive(Debug, Clone)]
struct CallFrame {
    function: Rc<Function>,
    ip: usize,
    base: usize,
}

/// Where a VM is in its lifecycle. Only `Ready` and `Suspended` VMs can be resumed; a
/// suspended VM's stack and frames are its continuation and stay untouched until then.
#[derive(Debug, Clone, PartialEq)]
pub enum VmState {
    /// Nothing loaded.
    Empty,
    /// Loaded, not started yet.
    Ready,
    /// Inside `run` or `resume`.
    Running,
    /// Stopped at a `yield`.
    Suspended,
    /// Returned from the script or hit `end`.
    Finished,
    /// Stopped by a runtime error; only a reset or a new load gets out of here.
    Faulted(RuntimeError),
}

impl VmState {
    fn describe(&self) -> &'static str {
        match self {
            VmState::Empty => "empty",
            VmState::Ready => "ready",
            VmState::Running => "running",
            VmState::Suspended => "suspended",
            VmState::Finished => "finished",
            VmState::Faulted(_) => "faulted",
        }
    }
}

/// Why `run` or `resume` handed control back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The script yielded and wants to be resumed next tick.
    Yielded,
    /// The script is done.
    Finished,
}

/// What went wrong while running a script.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeErrorKind {
    /// We have a hardcoded max stack size
    #[error("Value stack overflow.")]
    ValueStackOverflow,
    /// Too many nested calls.
    #[error("Stack overflow.")]
    StackOverflow,
    #[allow(missing_docs)]
    #[error("Stack underflow.")]
    StackUnderflow,
    #[allow(missing_docs)]
    #[error("Expected {expected} arguments but got {got}.")]
    ArityMismatch { expected: usize, got: usize },
    #[allow(missing_docs)]
    #[error("Undefined variable '{0}'.")]
    UndefinedVariable(String),
    /// Called something that is not a function; carries the tag.
    #[error("Can only call functions, not {0}.")]
    NotCallable(&'static str),
    #[allow(missing_docs)]
    #[error(transparent)]
    Value(#[from] ValueError),
    /// A native function reported a failure.
    #[error("{name}: {message}")]
    Native {
        /// The native's registered name.
        name: String,
        /// What the native returned as its error.
        message: String,
    },
    #[allow(missing_docs)]
    #[error("Failed to write output: {0}")]
    Output(String),
    /// `run` on a VM that isn't ready, or `resume` on one that isn't suspended or ready.
    #[error("Can't run a VM that is {0}.")]
    NotResumable(&'static str),
    // The rest should not occur for code that compiled successfully, but just in case.
    #[allow(missing_docs)]
    #[error("No literal at index {0}.")]
    BadLiteral(u8),
    #[allow(missing_docs)]
    #[error("Ran past the end of {0}.")]
    RanOffEnd(String),
    #[allow(missing_docs)]
    #[error("Jumped before the start of {0}.")]
    BadJump(String),
    #[allow(missing_docs)]
    #[error("No function is running.")]
    NoFrame,
    #[allow(missing_docs)]
    #[error("Object reference is no longer valid.")]
    DanglingObject,
}

/// One line of a runtime stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    /// Function name, None for the top-level script.
    pub function: Option<String>,
    #[allow(missing_docs)]
    pub line: usize,
}

impl Display for TraceFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.function {
            Some(name) => write!(f, "[line {}] in {}()", self.line, name),
            None => write!(f, "[line {}] in unnamed script", self.line),
        }
    }
}

/// The active call frames when an error happened, innermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackTrace(pub Vec<TraceFrame>);

impl Display for StackTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for frame in &self.0 {
            write!(f, "\n{}", frame)?;
        }
        Ok(())
    }
}

/// A runtime error and where it happened. It ends the script that raised it, nothing more.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}{trace}")]
pub struct RuntimeError {
    #[allow(missing_docs)]
    pub kind: RuntimeErrorKind,
    #[allow(missing_docs)]
    pub trace: StackTrace,
}

impl RuntimeError {
    fn untraced(kind: RuntimeErrorKind) -> RuntimeError {
        RuntimeError {
            kind,
            trace: StackTrace::default(),
        }
    }
}

/// A cloneable in-memory sink for script output.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer(Rc<RefCell<Vec<u8>>>);

impl OutputBuffer {
    #[allow(missing_docs)]
    pub fn new() -> OutputBuffer {
        OutputBuffer::default()
    }

    /// Everything written so far.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }

    /// Empty the buffer.
    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

impl Write for OutputBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct Output(Box<dyn Write>);

impl Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<output>")
    }
}

/// A Vm is a stateful executor of programs. It is built once, then loaded, run and reset
/// any number of times; the pool relies on that to reuse instances.
#[derive(Debug)]
pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: HashMap<String, Value>,
    heap: Heap,
    functions: Rc<HostFunctions>,
    state: VmState,
    output: Output,
}

impl Vm {
    /// A VM that installs the given host functions whenever it loads a program.
    /// Output goes to stdout until `set_output` says otherwise.
    pub fn new(functions: Rc<HostFunctions>) -> Vm {
        Vm {
            stack: Vec::with_capacity(STACK_MAX),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: HashMap::new(),
            heap: Heap::new(),
            functions,
            state: VmState::Empty,
            output: Output(Box::new(std::io::stdout())),
        }
    }

    /// Send `print` output somewhere else. Survives resets.
    pub fn set_output<W>(&mut self, output: W)
    where
        W: Write + 'static,
    {
        self.output = Output(Box::new(output));
    }

    /// Prepare to run a program from the start, throwing away whatever was there before.
    pub fn load(&mut self, program: &Program) {
        self.reset();
        for s in program.strings() {
            self.heap.intern(s);
        }
        for (name, native) in self.functions.natives() {
            let obj = self.heap.alloc(Object::Native(native.clone()));
            self.globals.insert(name.to_string(), Value::Object(obj));
        }
        for (name, function) in self.functions.user_functions() {
            let obj = self.heap.alloc(Object::Function(Rc::clone(function)));
            self.globals.insert(name.to_string(), Value::Object(obj));
        }

        let main = Rc::clone(program.main());
        let obj = self.heap.alloc(Object::Function(Rc::clone(&main)));
        self.stack.push(Value::Object(obj));
        self.frames.push(CallFrame {
            function: main,
            ip: 0,
            base: 0,
        });
        self.state = VmState::Ready;
        log::debug!(
            "loaded script: {} globals, {} objects",
            self.globals.len(),
            self.heap.len()
        );
    }

    /// Start a freshly loaded program. Runs until the script yields, finishes or fails.
    pub fn run(&mut self) -> Result<Exit, RuntimeError> {
        match self.state {
            VmState::Ready => self.interpret(),
            _ => Err(RuntimeError::untraced(RuntimeErrorKind::NotResumable(
                self.state.describe(),
            ))),
        }
    }

    /// Continue a suspended program right after its `yield`, or start a ready one.
    pub fn resume(&mut self) -> Result<Exit, RuntimeError> {
        match self.state {
            VmState::Ready | VmState::Suspended => self.interpret(),
            _ => Err(RuntimeError::untraced(RuntimeErrorKind::NotResumable(
                self.state.describe(),
            ))),
        }
    }

    /// Drop everything the last program left behind: stack, frames, globals and every object.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.globals.clear();
        self.heap.clear();
        self.state = VmState::Empty;
    }

    #[allow(missing_docs)]
    pub fn state(&self) -> &VmState {
        &self.state
    }

    /// Number of values on the stack.
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Number of active call frames.
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    /// Index of the next instruction the innermost frame will execute.
    pub fn instruction_cursor(&self) -> Option<usize> {
        self.frames.last().map(|f| f.ip)
    }

    /// Current value of a global.
    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).copied()
    }

    /// Number of globals, host functions included.
    pub fn globals_len(&self) -> usize {
        self.globals.len()
    }

    /// The objects this VM owns.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// A value as `print` would show it.
    pub fn display(&self, value: &Value) -> String {
        self.heap.display(value).to_string()
    }

    /// Run the interpreter until code yields, finishes executing or an error occurs.
    fn interpret(&mut self) -> Result<Exit, RuntimeError> {
        self.state = VmState::Running;
        loop {
            #[cfg(feature = "trace")]
            self.trace_instruction();
            match self.step() {
                Ok(None) => {}
                Ok(Some(exit)) => {
                    self.state = match exit {
                        Exit::Yielded => VmState::Suspended,
                        Exit::Finished => VmState::Finished,
                    };
                    return Ok(exit);
                }
                Err(kind) => {
                    let error = RuntimeError {
                        kind,
                        trace: self.stack_trace(),
                    };
                    log::debug!("script faulted: {}", error);
                    self.stack.clear();
                    self.frames.clear();
                    self.state = VmState::Faulted(error.clone());
                    return Err(error);
                }
            }
        }
    }

    #[cfg(feature = "trace")]
    fn trace_instruction(&self) {
        if let Some(frame) = self.frames.last() {
            let stack: Vec<String> = self.stack.iter().map(|v| self.display(v)).collect();
            log::trace!("[ {} ]", stack.join(" "));
            log::trace!("{}", frame.function.chunk().disassemble_instruction(frame.ip));
        }
    }

    // Execute one instruction. Some(exit) means the dispatch loop should stop.
    fn step(&mut self) -> Result<Option<Exit>, RuntimeErrorKind> {
        let instruction = self.read_instruction()?;
        match instruction {
            Instruction::Literal(idx) => {
                let value = match self.literal(idx)? {
                    Literal::Int(i) => Value::Int(i),
                    Literal::Float(f) => Value::Float(f),
                    Literal::String(s) => Value::Object(self.heap.intern(&s)),
                    Literal::Function(f) => Value::Object(self.heap.function(f)),
                };
                self.stack_push(value)?;
            }
            Instruction::Nil => self.stack_push(Value::Nil)?,
            Instruction::True => self.stack_push(Value::Bool(true))?,
            Instruction::False => self.stack_push(Value::Bool(false))?,
            Instruction::Pop => {
                self.stack_pop()?;
            }
            Instruction::DefineGlobal(idx) => {
                let name = self.literal_name(idx)?;
                let value = self.stack_pop()?;
                self.globals.insert(name.to_string(), value);
            }
            Instruction::GetGlobal(idx) => {
                let name = self.literal_name(idx)?;
                let value = *self.global_mut(&name)?;
                self.stack_push(value)?;
            }
            Instruction::SetGlobal(idx) => {
                let name = self.literal_name(idx)?;
                let value = self.peek()?;
                *self.global_mut(&name)? = value;
            }
            Instruction::GetLocal(slot) => {
                let value = *self.local_mut(slot)?;
                self.stack_push(value)?;
            }
            Instruction::SetLocal(slot) => {
                let value = self.peek()?;
                *self.local_mut(slot)? = value;
            }
            Instruction::GetMember(member) => {
                let value = self.stack_pop()?;
                self.stack_push(value.member(member)?)?;
            }
            Instruction::SetGlobalMember(idx, member) => {
                let name = self.literal_name(idx)?;
                let assigned = self.stack_pop()?;
                let stored = self.global_mut(&name)?.set_member(member, assigned)?;
                self.stack_push(Value::Float(stored))?;
            }
            Instruction::SetLocalMember(slot, member) => {
                let assigned = self.stack_pop()?;
                let stored = self.local_mut(slot)?.set_member(member, assigned)?;
                self.stack_push(Value::Float(stored))?;
            }
            Instruction::Equal => {
                let b = self.stack_pop()?;
                let a = self.stack_pop()?;
                let equal = self.heap.values_equal(&a, &b);
                self.stack_push(Value::Bool(equal))?;
            }
            Instruction::Greater => binary_op!(self, greater),
            Instruction::Less => binary_op!(self, less),
            Instruction::Add => {
                let b = self.stack_pop()?;
                let a = self.stack_pop()?;
                let sum = match (a, b) {
                    (Value::Object(x), Value::Object(y)) => {
                        let joined = match (
                            self.heap.get(x).and_then(Object::as_string),
                            self.heap.get(y).and_then(Object::as_string),
                        ) {
                            (Some(x), Some(y)) => format!("{}{}", x, y),
                            _ => {
                                return Err(ValueError::BinaryMismatch {
                                    op: "+",
                                    lhs: a.type_name(),
                                    rhs: b.type_name(),
                                }
                                .into())
                            }
                        };
                        Value::Object(self.heap.intern_owned(joined))
                    }
                    (a, b) => a.add(b)?,
                };
                self.stack_push(sum)?;
            }
            Instruction::Subtract => binary_op!(self, subtract),
            Instruction::Multiply => binary_op!(self, multiply),
            Instruction::Divide => binary_op!(self, divide),
            Instruction::Not => {
                let value = self.stack_pop()?;
                self.stack_push(value.not()?)?;
            }
            Instruction::Negate => {
                let value = self.stack_pop()?;
                self.stack_push(value.negate()?)?;
            }
            Instruction::Print => {
                let value = self.stack_pop()?;
                let text = self.display(&value);
                writeln!(self.output.0, "{}", text)
                    .map_err(|e| RuntimeErrorKind::Output(e.to_string()))?;
            }
            Instruction::Jump(offset) => {
                self.frame_mut()?.ip += usize::from(offset);
            }
            Instruction::JumpIfFalse(offset) => {
                // only a real `false` jumps; any other value falls through
                if let Value::Bool(false) = self.peek()? {
                    self.frame_mut()?.ip += usize::from(offset);
                }
            }
            Instruction::Loop(offset) => {
                let frame = self.frame_mut()?;
                frame.ip = frame
                    .ip
                    .checked_sub(usize::from(offset))
                    .ok_or_else(|| {
                        RuntimeErrorKind::BadJump(frame.function.display_name().to_string())
                    })?;
            }
            Instruction::Call(args) => self.call_value(usize::from(args))?,
            Instruction::Return => {
                let result = self.stack_pop()?;
                let frame = self.frames.pop().ok_or(RuntimeErrorKind::NoFrame)?;
                self.stack.truncate(frame.base);
                if self.frames.is_empty() {
                    return Ok(Some(Exit::Finished));
                }
                self.stack_push(result)?;
            }
            Instruction::Yield => return Ok(Some(Exit::Yielded)),
            Instruction::End => {
                self.frames.clear();
                self.stack.clear();
                return Ok(Some(Exit::Finished));
            }
        }
        Ok(None)
    }

    fn call_value(&mut self, args: usize) -> Result<(), RuntimeErrorKind> {
        let callee_slot = self
            .stack
            .len()
            .checked_sub(args + 1)
            .ok_or(RuntimeErrorKind::StackUnderflow)?;
        let callee = self.stack[callee_slot];
        let Value::Object(obj) = callee else {
            return Err(RuntimeErrorKind::NotCallable(callee.type_name()));
        };
        match self.heap.get(obj) {
            Some(Object::Function(function)) => {
                let function = Rc::clone(function);
                if function.arity() != args {
                    return Err(RuntimeErrorKind::ArityMismatch {
                        expected: function.arity(),
                        got: args,
                    });
                }
                if self.frames.len() >= FRAMES_MAX {
                    return Err(RuntimeErrorKind::StackOverflow);
                }
                self.frames.push(CallFrame {
                    function,
                    ip: 0,
                    base: callee_slot,
                });
            }
            Some(Object::Native(native)) => {
                let native = native.clone();
                if let Some(expected) = native.arity() {
                    if expected != args {
                        return Err(RuntimeErrorKind::ArityMismatch {
                            expected,
                            got: args,
                        });
                    }
                }
                let result = native.call(&self.stack[callee_slot + 1..]).map_err(|message| {
                    RuntimeErrorKind::Native {
                        name: native.name().to_string(),
                        message,
                    }
                })?;
                self.stack.truncate(callee_slot);
                self.stack_push(result)?;
            }
            Some(Object::String(_)) => return Err(RuntimeErrorKind::NotCallable("string")),
            None => return Err(RuntimeErrorKind::DanglingObject),
        }
        Ok(())
    }

    fn read_instruction(&mut self) -> Result<Instruction, RuntimeErrorKind> {
        let frame = self.frame_mut()?;
        let instruction = frame.function.chunk().instruction(frame.ip).ok_or_else(|| {
            RuntimeErrorKind::RanOffEnd(frame.function.display_name().to_string())
        })?;
        frame.ip += 1;
        Ok(instruction)
    }

    fn frame_mut(&mut self) -> Result<&mut CallFrame, RuntimeErrorKind> {
        self.frames.last_mut().ok_or(RuntimeErrorKind::NoFrame)
    }

    fn literal(&self, idx: u8) -> Result<Literal, RuntimeErrorKind> {
        let frame = self.frames.last().ok_or(RuntimeErrorKind::NoFrame)?;
        frame
            .function
            .chunk()
            .literal(idx)
            .cloned()
            .ok_or(RuntimeErrorKind::BadLiteral(idx))
    }

    fn literal_name(&self, idx: u8) -> Result<Rc<str>, RuntimeErrorKind> {
        match self.literal(idx)? {
            Literal::String(name) => Ok(name),
            _ => Err(RuntimeErrorKind::BadLiteral(idx)),
        }
    }

    fn global_mut(&mut self, name: &str) -> Result<&mut Value, RuntimeErrorKind> {
        self.globals
            .get_mut(name)
            .ok_or_else(|| RuntimeErrorKind::UndefinedVariable(name.to_string()))
    }

    fn local_mut(&mut self, slot: u8) -> Result<&mut Value, RuntimeErrorKind> {
        let base = self.frames.last().ok_or(RuntimeErrorKind::NoFrame)?.base;
        self.stack
            .get_mut(base + usize::from(slot))
            .ok_or(RuntimeErrorKind::StackUnderflow)
    }

    fn stack_push(&mut self, value: Value) -> Result<(), RuntimeErrorKind> {
        if self.stack.len() >= STACK_MAX {
            Err(RuntimeErrorKind::ValueStackOverflow)
        } else {
            self.stack.push(value);
            Ok(())
        }
    }

    // Never pops into the current frame's slot 0.
    fn stack_pop(&mut self) -> Result<Value, RuntimeErrorKind> {
        let floor = self.frames.last().map_or(0, |f| f.base + 1);
        if self.stack.len() <= floor {
            return Err(RuntimeErrorKind::StackUnderflow);
        }
        self.stack.pop().ok_or(RuntimeErrorKind::StackUnderflow)
    }

    fn peek(&self) -> Result<Value, RuntimeErrorKind> {
        self.stack
            .last()
            .copied()
            .ok_or(RuntimeErrorKind::StackUnderflow)
    }

    fn stack_trace(&self) -> StackTrace {
        StackTrace(
            self.frames
                .iter()
                .rev()
                .map(|frame| TraceFrame {
                    function: frame.function.name().map(str::to_string),
                    line: frame
                        .function
                        .chunk()
                        .line(frame.ip.saturating_sub(1))
                        .unwrap_or(0),
                })
                .collect(),
        )
    }
}
