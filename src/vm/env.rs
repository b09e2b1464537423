//! Host interfaces: native functions, module resolution and the default
//! function set.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;

use super::{ErrorCode, Vm};
use crate::compiler::{CompileError, Compiler};
use crate::program::Program;
use crate::value::Value;

/// How a native call finished.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// Continue the script with this value as the call result.
    Value(Value),
    /// Halt the script; the value becomes the result of the run.
    Stop(Value),
}

pub type NativeResult = Result<Completion, ErrorCode>;

/// Names registered by [`Environment::standard`]; the compiler accepts
/// calls to them without a script definition.
pub const STANDARD_FUNCTIONS: &[&str] = &["typeof", "classof", "random", "storage_read", "storage_write", "trace"];

type Handler = dyn Fn(&[Value], &mut Vm) -> NativeResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    Variadic,
}

#[derive(Clone)]
pub struct NativeFunction {
    name: String,
    arity: Arity,
    handler: Rc<Handler>,
}

impl NativeFunction {
    pub fn new(
        name: impl Into<String>,
        arity: Arity,
        handler: impl Fn(&[Value], &mut Vm) -> NativeResult + 'static,
    ) -> Self {
        NativeFunction { name: name.into(), arity, handler: Rc::new(handler) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }

    pub fn call(&self, args: &[Value], vm: &mut Vm) -> NativeResult {
        if let Arity::Fixed(n) = self.arity {
            if args.len() != n {
                return Err(ErrorCode::InvalidArgumentCount);
            }
        }
        (self.handler)(args, vm)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction").field("name", &self.name).field("arity", &self.arity).finish()
    }
}

/// Locates modules named by `use` statements.
pub trait ModuleResolver {
    fn resolve(&self, name: &str) -> Result<Option<Program>, CompileError>;
}

/// Modules held in memory, keyed by name.
#[derive(Debug, Default)]
pub struct ModuleMap {
    modules: HashMap<String, Program>,
    compiler: Compiler,
}

impl ModuleMap {
    pub fn new() -> Self {
        ModuleMap::default()
    }

    /// Compiler used by [`ModuleMap::insert_source`].
    pub fn with_compiler(mut self, compiler: Compiler) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, program: Program) {
        self.modules.insert(name.into(), program);
    }

    pub fn insert_source(&mut self, name: impl Into<String>, source: &str) -> Result<(), CompileError> {
        let program = self.compiler.compile(source)?;
        self.insert(name, program);
        Ok(())
    }
}

impl ModuleResolver for ModuleMap {
    fn resolve(&self, name: &str) -> Result<Option<Program>, CompileError> {
        Ok(self.modules.get(name).cloned())
    }
}

/// Compiles `<dir>/<name>.ks` from the first directory that has it.
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    roots: Vec<PathBuf>,
    compiler: Compiler,
}

impl DirectoryResolver {
    pub fn new(roots: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        DirectoryResolver { roots: roots.into_iter().map(Into::into).collect(), compiler: Compiler::new() }
    }

    pub fn with_compiler(mut self, compiler: Compiler) -> Self {
        self.compiler = compiler;
        self
    }
}

impl ModuleResolver for DirectoryResolver {
    fn resolve(&self, name: &str) -> Result<Option<Program>, CompileError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Ok(None);
        }
        for root in &self.roots {
            let path = root.join(format!("{name}.ks"));
            let source = match std::fs::read_to_string(&path) {
                Ok(source) => source,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    log::warn!("cannot read module {}: {e}", path.display());
                    continue;
                }
            };
            log::debug!("compiling module {name} from {}", path.display());
            return self.compiler.compile(&source).map(Some);
        }
        Ok(None)
    }
}

/// Everything a VM can call outside the script: native functions, the
/// module resolver and the `print` sink.
pub struct Environment {
    functions: HashMap<String, Rc<NativeFunction>>,
    resolver: Option<Box<dyn ModuleResolver>>,
    printer: RefCell<Box<dyn FnMut(&str)>>,
}

impl Default for Environment {
    fn default() -> Self {
        Environment::new()
    }
}

impl Environment {
    /// Empty environment printing to stdout.
    pub fn new() -> Self {
        Environment {
            functions: HashMap::new(),
            resolver: None,
            printer: RefCell::new(Box::new(|text| print!("{text}"))),
        }
    }

    /// Environment with the default function set registered.
    pub fn standard() -> Self {
        let mut env = Environment::new();
        register_standard(&mut env);
        env
    }

    pub fn register(&mut self, function: NativeFunction) {
        self.functions.insert(function.name.clone(), Rc::new(function));
    }

    pub fn register_fn(
        &mut self,
        name: &str,
        arity: Arity,
        handler: impl Fn(&[Value], &mut Vm) -> NativeResult + 'static,
    ) {
        self.register(NativeFunction::new(name, arity, handler));
    }

    pub fn function(&self, name: &str) -> Option<Rc<NativeFunction>> {
        self.functions.get(name).cloned()
    }

    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn with_resolver(mut self, resolver: impl ModuleResolver + 'static) -> Self {
        self.resolver = Some(Box::new(resolver));
        self
    }

    pub fn with_printer(self, printer: impl FnMut(&str) + 'static) -> Self {
        *self.printer.borrow_mut() = Box::new(printer);
        self
    }

    pub fn print(&self, text: &str) {
        (*self.printer.borrow_mut())(text);
    }

    pub fn resolve_module(&self, name: &str) -> Result<Option<Program>, CompileError> {
        match &self.resolver {
            Some(resolver) => resolver.resolve(name),
            None => Ok(None),
        }
    }
}

fn integer_arg(value: &Value) -> Result<i64, ErrorCode> {
    value.to_integer().ok_or(ErrorCode::NotInteger)
}

fn string_arg(value: &Value) -> Result<String, ErrorCode> {
    match value {
        Value::String(s) => Ok(s.to_string()),
        Value::Null | Value::Array(_) | Value::HashMap(_) | Value::Object(_) | Value::Iterator(_) => {
            Err(ErrorCode::NotString)
        }
        scalar => Ok(scalar.to_text()),
    }
}

fn register_standard(env: &mut Environment) {
    env.register_fn("typeof", Arity::Fixed(1), |args, _| {
        Ok(Completion::Value(Value::from(args[0].type_name())))
    });

    env.register_fn("classof", Arity::Fixed(1), |args, _| match &args[0] {
        Value::Object(o) => Ok(Completion::Value(Value::from(o.class_name()))),
        _ => Err(ErrorCode::NotObject),
    });

    env.register_fn("random", Arity::Fixed(2), |args, _| {
        let (a, b) = (integer_arg(&args[0])?, integer_arg(&args[1])?);
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let n = fastrand::i64(lo..=hi);
        Ok(Completion::Value(i32::try_from(n).map_or(Value::Int64(n), Value::Int32)))
    });

    env.register_fn("storage_read", Arity::Fixed(1), |args, vm| {
        let key = string_arg(&args[0])?;
        let value = vm.storage().read(&key).map_or(Value::Null, Value::from);
        Ok(Completion::Value(value))
    });

    env.register_fn("storage_write", Arity::Fixed(2), |args, vm| {
        let key = string_arg(&args[0])?;
        let value = match &args[1] {
            Value::Null => None,
            other => Some(string_arg(other)?),
        };
        vm.storage().write(&key, value.as_deref());
        Ok(Completion::Value(Value::Null))
    });

    env.register_fn("trace", Arity::Fixed(2), |args, _| {
        let level = integer_arg(&args[0])?;
        let text = args[1].to_text();
        match level {
            i64::MIN..=1 => log::info!(target: "kestrel::script", "{text}"),
            2..=5 => log::debug!(target: "kestrel::script", "{text}"),
            _ => log::trace!(target: "kestrel::script", "{text}"),
        }
        Ok(Completion::Value(Value::Null))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_arity_is_checked() {
        let env = Environment::standard();
        let mut vm = Vm::new(Environment::new());
        let typeof_fn = env.function("typeof").unwrap();
        assert_eq!(typeof_fn.call(&[], &mut vm), Err(ErrorCode::InvalidArgumentCount));
        assert_eq!(
            typeof_fn.call(&[Value::Int64(1)], &mut vm),
            Ok(Completion::Value(Value::from("int64")))
        );
    }

    #[test]
    fn random_stays_in_range() {
        let env = Environment::standard();
        let mut vm = Vm::new(Environment::new());
        let random = env.function("random").unwrap();
        for _ in 0..50 {
            let Ok(Completion::Value(Value::Int32(n))) = random.call(&[Value::Int32(5), Value::Int32(1)], &mut vm)
            else {
                panic!("random must return an int32");
            };
            assert!((1..=5).contains(&n));
        }
    }

    #[test]
    fn storage_functions_use_vm_storage() {
        let env = Environment::standard();
        let mut vm = Vm::new(Environment::new());
        let write = env.function("storage_write").unwrap();
        let read = env.function("storage_read").unwrap();
        write.call(&[Value::from("k"), Value::Int32(5)], &mut vm).unwrap();
        assert_eq!(read.call(&[Value::from("k")], &mut vm), Ok(Completion::Value(Value::from("5"))));
        write.call(&[Value::from("k"), Value::Null], &mut vm).unwrap();
        assert_eq!(read.call(&[Value::from("k")], &mut vm), Ok(Completion::Value(Value::Null)));
    }

    #[test]
    fn standard_set_matches_registered_names() {
        let env = Environment::standard();
        for name in STANDARD_FUNCTIONS {
            assert!(env.function(name).is_some(), "{name} is not registered");
        }
    }

    #[test]
    fn module_map_resolves_by_name() {
        let mut modules = ModuleMap::new();
        modules.insert_source("util", "function f() { return 1; }").unwrap();
        assert!(modules.resolve("util").unwrap().is_some());
        assert!(modules.resolve("other").unwrap().is_none());
    }

    #[test]
    fn directory_resolver_rejects_paths() {
        let resolver = DirectoryResolver::new(["."]);
        assert!(resolver.resolve("../etc/passwd").unwrap().is_none());
    }
}
