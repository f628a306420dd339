//! The functions a host makes available to scripts.
//!
//! Natives are Rust closures; user functions are compiled script functions, usually
//! taken from a library script with `Program::function`. Both are installed into a
//! VM's globals by name when a program is loaded, and their names are known to the
//! compiler so scripts can refer to them.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::chunk::{Function, Program};
use crate::heap::NativeFunction;
use crate::value::{Point, Value, Vector};

/// Name tables for native and user functions.
#[derive(Debug, Default)]
pub struct HostFunctions {
    natives: BTreeMap<String, NativeFunction>,
    user: BTreeMap<String, Rc<Function>>,
}

impl HostFunctions {
    /// No functions at all.
    pub fn new() -> HostFunctions {
        HostFunctions::default()
    }

    /// The built-in natives: `vector`, `vector_xy`, `point`, `sqrt`, `abs`, `floor`, `float`, `int`.
    pub fn with_builtins() -> HostFunctions {
        let mut functions = HostFunctions::new();
        builtins::install(&mut functions);
        functions
    }

    /// Register a native under `name`, replacing any earlier one.
    pub fn register_native<F>(&mut self, name: &str, arity: Option<usize>, func: F)
    where
        F: Fn(&[Value]) -> Result<Value, String> + 'static,
    {
        self.natives
            .insert(name.to_string(), NativeFunction::new(name, arity, func));
    }

    /// Register a compiled script function under `name`, replacing any earlier one.
    pub fn register_user(&mut self, name: &str, function: Rc<Function>) {
        self.user.insert(name.to_string(), function);
    }

    /// Register every top-level function of a library script as a user function.
    /// Returns how many were registered.
    pub fn register_program(&mut self, program: &Program) -> usize {
        let mut count = 0;
        for function in program.functions() {
            if let Some(name) = function.name() {
                self.user.insert(name.to_string(), Rc::clone(function));
                count += 1;
            }
        }
        count
    }

    #[allow(missing_docs)]
    pub fn natives(&self) -> impl Iterator<Item = (&str, &NativeFunction)> + '_ {
        self.natives.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[allow(missing_docs)]
    pub fn user_functions(&self) -> impl Iterator<Item = (&str, &Rc<Function>)> + '_ {
        self.user.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Every name a script may use without declaring it.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.natives.keys().chain(self.user.keys()).map(String::as_str)
    }

    #[allow(missing_docs)]
    pub fn contains(&self, name: &str) -> bool {
        self.natives.contains_key(name) || self.user.contains_key(name)
    }
}

mod builtins {
    use super::*;

    fn number(args: &[Value], i: usize) -> Result<f64, String> {
        let arg = args
            .get(i)
            .ok_or_else(|| format!("missing argument {}", i + 1))?;
        arg.as_float()
            .ok_or_else(|| format!("argument {} must be a number, got {}", i + 1, arg.type_name()))
    }

    pub(super) fn install(functions: &mut HostFunctions) {
        functions.register_native("vector", Some(2), |args| {
            Ok(Vector::polar(number(args, 0)?, number(args, 1)?).into())
        });
        functions.register_native("vector_xy", Some(2), |args| {
            Ok(Vector::cartesian(number(args, 0)?, number(args, 1)?).into())
        });
        functions.register_native("point", Some(2), |args| {
            Ok(Point::new(number(args, 0)?, number(args, 1)?).into())
        });
        functions.register_native("sqrt", Some(1), |args| Ok(number(args, 0)?.sqrt().into()));
        functions.register_native("abs", Some(1), |args| match args.first() {
            Some(Value::Int(i)) => i
                .checked_abs()
                .map(Value::Int)
                .ok_or_else(|| "integer overflow".to_string()),
            _ => Ok(number(args, 0)?.abs().into()),
        });
        functions.register_native("floor", Some(1), |args| to_int(number(args, 0)?.floor()));
        functions.register_native("int", Some(1), |args| match args.first() {
            Some(Value::Int(i)) => Ok(Value::Int(*i)),
            _ => to_int(number(args, 0)?.trunc()),
        });
        functions.register_native("float", Some(1), |args| Ok(number(args, 0)?.into()));
    }

    fn to_int(f: f64) -> Result<Value, String> {
        if f.is_finite() && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
            Ok(Value::Int(f as i64))
        } else {
            Err(format!("{} does not fit in an int", f))
        }
    }
}
