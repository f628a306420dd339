//! The lib crate for tickscript, a small scripting language for game entities: a bytecode
//! compiler, a VM whose scripts can yield and be resumed on a later tick, and a pool of
//! reusable VMs.
#![warn(missing_debug_implementations, missing_docs, rust_2018_idioms)]

/// scanner scans!
pub mod scanner;

/// Takes tokens from the scanner and emits bytecode
pub mod compiler;

/// Instructions, literal pools, compiled functions and programs.
pub mod chunk;

pub mod value;

/// Per-VM object storage.
pub mod heap;

/// vm is the bits about running code.
pub mod vm;

pub mod functions;

pub mod pool;

pub mod scripts;

/// Compiled scripts by name.
pub mod cache;

pub use cache::{LoadError, ScriptCache};
pub use chunk::{Function, Program};
pub use compiler::{compile, compile_source, CompileError};
pub use functions::HostFunctions;
pub use pool::{PoolConfig, PoolError, VmHandle, VmPool};
pub use scripts::{AttachError, Scripts, TickReport};
pub use value::{Point, Value, Vector};
pub use vm::{Exit, OutputBuffer, RuntimeError, Vm, VmState};
