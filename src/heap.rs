// heap is the VM's store for objects: interned strings, script functions and native functions.
//
// The entry point is the `Heap` type and its `intern`/`alloc` methods. These put an object in the
// heap and return an `ObjRef`, a plain index that `Value::Object` carries around. Objects are not
// reference counted and are never freed one at a time: the heap owns every object it ever handed
// out and `Heap::clear` drops them all at once when the VM is reset. An `ObjRef` from before a
// clear must not be used afterwards; `get` returns None for indices past the end, but an index
// that has been reused points at whatever object lives there now.
//
// ```rust
//    let mut heap = Heap::new();
//    let hello = heap.intern("hello");
//    assert_eq!(heap.intern("hello"), hello);
//    assert_eq!(heap.get(hello).and_then(Object::as_string), Some("hello"));
// ```

use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::rc::Rc;

use crate::chunk::Function;
use crate::value::Value;

/// Signature of a host function callable from scripts. It gets its arguments as a
/// slice of the VM's stack and returns one value, or a message describing why it failed.
pub type NativeFn = dyn Fn(&[Value]) -> Result<Value, String>;

/// A host-defined function, shared between every VM that installs it.
#[derive(Clone)]
pub struct NativeFunction {
    name: Rc<str>,
    arity: Option<usize>,
    func: Rc<NativeFn>,
}

impl NativeFunction {
    /// `arity` of None accepts any number of arguments.
    pub fn new<F>(name: &str, arity: Option<usize>, func: F) -> NativeFunction
    where
        F: Fn(&[Value]) -> Result<Value, String> + 'static,
    {
        NativeFunction {
            name: name.into(),
            arity,
            func: Rc::new(func),
        }
    }

    #[allow(missing_docs)]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[allow(missing_docs)]
    pub fn arity(&self) -> Option<usize> {
        self.arity
    }

    /// Invoke the host function on an argument window.
    pub fn call(&self, args: &[Value]) -> Result<Value, String> {
        (self.func)(args)
    }
}

impl Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<native fn {}>", self.name)
    }
}

/// Anything a `Value::Object` can point at.
#[derive(Debug)]
pub enum Object {
    /// Interned; the same contents always live in the same object.
    String(Rc<str>),
    /// A compiled script function. The function itself is shared with the program it came from.
    Function(Rc<Function>),
    #[allow(missing_docs)]
    Native(NativeFunction),
}

impl Object {
    #[allow(missing_docs)]
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    #[allow(missing_docs)]
    pub fn as_function(&self) -> Option<&Rc<Function>> {
        match self {
            Object::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Objects compare by contents: strings by text, functions by identity.
    pub fn same_as(&self, other: &Object) -> bool {
        match (self, other) {
            (Object::String(a), Object::String(b)) => a == b,
            (Object::Function(a), Object::Function(b)) => Rc::ptr_eq(a, b),
            (Object::Native(a), Object::Native(b)) => Rc::ptr_eq(&a.func, &b.func),
            _ => false,
        }
    }
}

impl Display for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Object::String(s) => write!(f, "{}", s),
            Object::Function(func) => Display::fmt(func, f),
            Object::Native(n) => write!(f, "<native fn {}>", n.name),
        }
    }
}

/// Handle to an object in a `Heap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(usize);

impl ObjRef {
    /// Position of the object in its heap.
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Default)]
/// A type for allocating and tracking the objects of one VM.
pub struct Heap {
    objects: Vec<Object>,
    strings: HashMap<Rc<str>, ObjRef>,
    // keyed by the function's address; the object itself keeps the Rc alive
    functions: HashMap<*const Function, ObjRef>,
}

impl Heap {
    /// A new, empty heap.
    pub fn new() -> Heap {
        Heap::default()
    }

    /// Find the string object with these contents, creating it if this is the first time we see them.
    pub fn intern(&mut self, value: &str) -> ObjRef {
        if let Some(existing) = self.strings.get(value) {
            return *existing;
        }
        let value: Rc<str> = value.into();
        let obj = self.push(Object::String(Rc::clone(&value)));
        self.strings.insert(value, obj);
        obj
    }

    /// Same as `intern` but takes ownership, for strings built at runtime.
    pub fn intern_owned(&mut self, value: String) -> ObjRef {
        if let Some(existing) = self.strings.get(value.as_str()) {
            return *existing;
        }
        let value: Rc<str> = value.into();
        let obj = self.push(Object::String(Rc::clone(&value)));
        self.strings.insert(value, obj);
        obj
    }

    /// Put a function or native in the heap. Strings go through `intern` and script functions
    /// through `function` so they stay deduplicated.
    pub fn alloc(&mut self, object: Object) -> ObjRef {
        match object {
            Object::String(s) => self.intern(&s),
            Object::Function(f) => self.function(f),
            other => self.push(other),
        }
    }

    /// The object for a compiled function. Evaluating the same `fun` again reuses it.
    pub fn function(&mut self, function: Rc<Function>) -> ObjRef {
        let key = Rc::as_ptr(&function);
        if let Some(existing) = self.functions.get(&key) {
            return *existing;
        }
        let obj = self.push(Object::Function(function));
        self.functions.insert(key, obj);
        obj
    }

    fn push(&mut self, object: Object) -> ObjRef {
        self.objects.push(object);
        ObjRef(self.objects.len() - 1)
    }

    #[allow(missing_docs)]
    pub fn get(&self, obj: ObjRef) -> Option<&Object> {
        self.objects.get(obj.0)
    }

    /// Number of live objects, strings included.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Number of distinct interned strings.
    pub fn interned_len(&self) -> usize {
        self.strings.len()
    }

    /// Free every object and forget every interned string.
    pub fn clear(&mut self) {
        self.objects.clear();
        self.strings.clear();
        self.functions.clear();
    }

    /// Equality that looks through object handles.
    pub fn values_equal(&self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Object(x), Value::Object(y)) => match (self.get(*x), self.get(*y)) {
                (Some(x), Some(y)) => x.same_as(y),
                _ => false,
            },
            _ => a.equals_plain(b),
        }
    }

    /// A Display adapter that shows objects by their contents.
    pub fn display<'h>(&'h self, value: &'h Value) -> Displayed<'h> {
        Displayed { heap: self, value }
    }

    // Print out all the objects on the heap in order for debugging.
    #[allow(dead_code)]
    fn dump(&self) {
        for (i, object) in self.objects.iter().enumerate() {
            println!("{:4} {}", i, object);
        }
    }
}

/// See `Heap::display`.
#[derive(Debug)]
pub struct Displayed<'h> {
    heap: &'h Heap,
    value: &'h Value,
}

impl Display for Displayed<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.value {
            Value::Object(obj) => match self.heap.get(*obj) {
                Some(object) => Display::fmt(object, f),
                None => write!(f, "<dangling object {}>", obj.index()),
            },
            other => Display::fmt(other, f),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_heap() {
        let mut heap = Heap::new();
        let n1 = heap.intern("Goodbye, world");
        let n2 = heap.intern_owned("Hello, world".to_string());

        assert_eq!(heap.get(n1).and_then(Object::as_string), Some("Goodbye, world"));
        assert_eq!(heap.get(n2).and_then(Object::as_string), Some("Hello, world"));
        assert_eq!(heap.intern("Hello, world"), n2);
        assert_eq!(heap.len(), 2);

        heap.dump();
    }

    #[test]
    fn alloc_routes_strings_through_the_intern_table() {
        let mut heap = Heap::new();
        let a = heap.intern("same");
        let b = heap.alloc(Object::String("same".into()));
        assert_eq!(a, b);
        assert_eq!(heap.interned_len(), 1);
    }

    #[test]
    fn clear_frees_everything() {
        let mut heap = Heap::new();
        heap.intern("a");
        heap.alloc(Object::Native(NativeFunction::new("zero", Some(0), |_| {
            Ok(Value::Int(0))
        })));
        assert_eq!(heap.len(), 2);
        heap.clear();
        assert!(heap.is_empty());
        assert_eq!(heap.interned_len(), 0);
    }

    #[test]
    fn equality_looks_at_contents() {
        let mut heap = Heap::new();
        let native = NativeFunction::new("zero", Some(0), |_| Ok(Value::Int(0)));
        let a = Value::Object(heap.alloc(Object::Native(native.clone())));
        let b = Value::Object(heap.alloc(Object::Native(native)));
        assert_ne!(a, b);
        assert!(heap.values_equal(&a, &b));

        let s = Value::Object(heap.intern("s"));
        assert!(!heap.values_equal(&a, &s));
        assert!(heap.values_equal(&Value::Int(3), &Value::Int(3)));
    }

    #[test]
    fn display_shows_contents() {
        let mut heap = Heap::new();
        let s = Value::Object(heap.intern("text"));
        assert_eq!(heap.display(&s).to_string(), "text");
        assert_eq!(heap.display(&Value::Int(4)).to_string(), "4");
    }

    fn named_function(name: &str) -> Rc<Function> {
        Rc::new(Function {
            name: Some(name.to_string()),
            arity: 0,
            chunk: crate::chunk::Chunk::new(),
        })
    }

    #[test]
    fn functions_are_stored_once() {
        let mut heap = Heap::new();
        let function = named_function("f");
        let a = heap.function(Rc::clone(&function));
        let b = heap.alloc(Object::Function(Rc::clone(&function)));
        assert_eq!(a, b);
        assert_eq!(heap.len(), 1);

        let other = heap.function(named_function("f"));
        assert_ne!(a, other);
        heap.clear();
        assert_eq!(heap.function(function), ObjRef(0));
    }
}
