//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::rc::Rc;

use tickscript::{compile_source, Exit, HostFunctions, OutputBuffer, Program, RuntimeError, Vm};

pub fn builtins() -> Rc<HostFunctions> {
    Rc::new(HostFunctions::with_builtins())
}

pub fn compile(source: &str, functions: &HostFunctions) -> Program {
    match compile_source(source, functions) {
        Ok(program) => program,
        Err(e) => panic!("compiling {:?} failed:\n{}", source, e),
    }
}

/// A VM loaded with `source`, printing into the returned buffer.
pub fn loaded_vm(source: &str, functions: Rc<HostFunctions>) -> (Vm, OutputBuffer) {
    let program = compile(source, &functions);
    let mut vm = Vm::new(functions);
    let out = OutputBuffer::new();
    vm.set_output(out.clone());
    vm.load(&program);
    (vm, out)
}

/// Run a script to the end, resuming through every yield.
pub fn run_to_end(source: &str) -> (Result<(), RuntimeError>, String) {
    let (mut vm, out) = loaded_vm(source, builtins());
    let mut result = vm.run();
    while let Ok(Exit::Yielded) = result {
        result = vm.resume();
    }
    (result.map(|_| ()), out.contents())
}

/// Output of a script that must run cleanly.
pub fn output_of(source: &str) -> String {
    match run_to_end(source) {
        (Ok(()), output) => output,
        (Err(e), _) => panic!("running {:?} failed:\n{}", source, e),
    }
}
