//! Stack machine executing compiled programs.
//!
//! A [`Vm`] owns a private copy of the loaded code (so modules can be linked
//! into it), three stacks (data, control, catch) and the variable systems
//! of the running script. Hosts extend it through an [`Environment`] of
//! native functions, [`Object`]s with a [`Class`], a [`Storage`] and an
//! optional context object whose attributes read as variables.

pub mod config;
pub mod context;
pub mod env;
pub mod error;
mod exec;
mod methods;
pub mod object;
pub(crate) mod stack;
pub mod storage;
pub mod variables;

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub use config::VmConfig;
pub use context::ExecutionContext;
pub use env::{Arity, Completion, DirectoryResolver, Environment, ModuleMap, ModuleResolver, NativeFunction, NativeResult};
pub use error::{ErrorCode, RuntimeError};
pub use object::{Class, Object};
pub use storage::{MemoryStorage, Storage};
pub use variables::Scope;

use error::{Exec, Fault};
use stack::DataStack;
use variables::{Binding, InlineCache, VariableSystem};

use crate::program::{Function, INVALID_ADDRESS, Instruction, Program};
use crate::value::Value;

/// A linked module: where its code and function entries landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub name: String,
    pub code_start: usize,
    pub code_len: usize,
    pub functions_start: usize,
    pub functions_len: usize,
}

/// Saved caller state of a script call.
#[derive(Debug)]
struct Frame {
    return_addr: usize,
    locals: VariableSystem,
    expressions: VariableSystem,
    bind_pos: usize,
    data_depth: usize,
}

#[derive(Debug, Clone, Copy)]
struct CatchPoint {
    addr: usize,
    data_depth: usize,
    sub_level: usize,
}

#[derive(Debug, Clone)]
enum CallTarget {
    Script(usize),
    Native(Rc<NativeFunction>),
}

/// Result of handling a fault: continue at a catch handler or stop.
enum Flow {
    Resume,
    Halt(RuntimeError),
}

pub struct Vm {
    config: VmConfig,
    env: Rc<Environment>,
    storage: Rc<dyn Storage>,
    context: ExecutionContext,
    stop: Arc<AtomicBool>,

    code: Rc<Vec<Instruction>>,
    functions: Vec<Function>,
    modules: Vec<Module>,

    constants: VariableSystem,
    globals: VariableSystem,
    locals: VariableSystem,
    expressions: VariableSystem,
    context_vars: VariableSystem,
    context_object: Option<Rc<Object>>,

    data: DataStack,
    frames: Vec<Frame>,
    catches: Vec<CatchPoint>,
    cache: InlineCache,
    calls: HashMap<usize, CallTarget>,
    ip: usize,
    /// Instruction being executed, for error locations.
    current: usize,
    bind_pos: usize,
}

impl Vm {
    pub fn new(env: Environment) -> Self {
        Vm::with_config(env, VmConfig::default())
    }

    pub fn with_config(env: Environment, config: VmConfig) -> Self {
        let context = ExecutionContext::new(config.max_nesting_depth);
        Vm::assemble(Rc::new(env), config, Rc::new(MemoryStorage::new()), context, Arc::default())
    }

    fn assemble(
        env: Rc<Environment>,
        config: VmConfig,
        storage: Rc<dyn Storage>,
        context: ExecutionContext,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Vm {
            data: DataStack::new(config.data_stack_limit),
            cache: InlineCache::new(config.inline_cache),
            config,
            env,
            storage,
            context,
            stop,
            code: Rc::new(Vec::new()),
            functions: Vec::new(),
            modules: Vec::new(),
            constants: VariableSystem::new(Scope::Constant),
            globals: VariableSystem::new(Scope::Global),
            locals: VariableSystem::new(Scope::Local),
            expressions: VariableSystem::new(Scope::Expression),
            context_vars: VariableSystem::new(Scope::Context),
            context_object: None,
            frames: Vec::new(),
            catches: Vec::new(),
            calls: HashMap::new(),
            ip: INVALID_ADDRESS,
            current: INVALID_ADDRESS,
            bind_pos: 0,
        }
    }

    /// A fresh VM sharing this one's environment, storage, stop flag and
    /// nesting counter. Native functions use it to run other scripts.
    pub fn nested(&self) -> Vm {
        Vm::assemble(
            self.env.clone(),
            self.config.clone(),
            self.storage.clone(),
            self.context.clone(),
            self.stop.clone(),
        )
    }

    pub fn with_storage(mut self, storage: Rc<dyn Storage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn env(&self) -> &Rc<Environment> {
        &self.env
    }

    pub fn storage(&self) -> &Rc<dyn Storage> {
        &self.storage
    }

    pub fn execution_context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Flag checked before every instruction; setting it from any thread
    /// ends the run with [`ErrorCode::Interrupted`].
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.code
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn function_address(&self, name: &str) -> Option<usize> {
        self.functions.iter().find(|f| f.name == name).map(|f| f.address)
    }

    pub fn is_module_loaded(&self, name: &str) -> bool {
        self.modules.iter().any(|m| m.name == name)
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.set(name, value);
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.value(name).cloned()
    }

    pub fn globals(&self) -> impl Iterator<Item = &variables::Variable> {
        self.globals.iter()
    }

    pub fn reset_globals(&mut self) {
        self.globals.clear();
    }

    pub fn set_constant(&mut self, name: &str, value: Value) {
        self.constants.set(name, value);
        self.cache.clear();
    }

    pub fn constant(&self, name: &str) -> Option<Value> {
        self.constants.value(name).cloned()
    }

    /// Binds a host object whose attributes can be read (and written) as
    /// plain variables.
    pub fn set_context_object(&mut self, object: Option<Rc<Object>>) {
        self.context_object = object;
        self.context_vars.clear();
    }

    /// Replaces the loaded code with `program` and links the modules it
    /// requires through the environment's resolver.
    pub fn load(&mut self, program: &Program) -> Result<(), RuntimeError> {
        self.code = Rc::new(program.instructions.clone());
        self.functions = program.functions.clone();
        self.modules.clear();
        self.cache.clear();
        self.calls.clear();
        for (name, value) in &program.constants {
            self.constants.set(name, value.clone());
        }
        log::debug!(
            "loaded program: {} instructions, {} functions",
            self.code.len(),
            self.functions.len()
        );
        self.load_required(&program.required_modules)
    }

    fn load_required(&mut self, names: &[String]) -> Result<(), RuntimeError> {
        for name in names {
            if self.is_module_loaded(name) {
                continue;
            }
            let not_found = |message: String| RuntimeError {
                code: ErrorCode::ModuleNotFound.code(),
                line: 0,
                message,
                module: Some(name.clone()),
            };
            let program = self
                .env
                .resolve_module(name)
                .map_err(|e| not_found(format!("{}: {e}", ErrorCode::ModuleNotFound)))?
                .ok_or_else(|| not_found(ErrorCode::ModuleNotFound.to_string()))?;
            self.load_module(name, &program)?;
        }
        Ok(())
    }

    /// Links `program` into the loaded code under `name`. Loading a module
    /// twice is a no-op.
    pub fn load_module(&mut self, name: &str, program: &Program) -> Result<(), RuntimeError> {
        if self.is_module_loaded(name) {
            log::debug!("module {name} already loaded");
            return Ok(());
        }
        let code_start = self.code.len();
        let functions_start = self.functions.len();
        // registered before linking its dependencies so cycles terminate
        self.modules.push(Module {
            name: name.to_string(),
            code_start,
            code_len: program.len(),
            functions_start,
            functions_len: 0,
        });

        let code = Rc::make_mut(&mut self.code);
        code.extend(program.instructions.iter().map(|instr| {
            let mut instr = instr.clone();
            instr.relocate(code_start);
            instr
        }));

        for f in &program.functions {
            let address = f.address + code_start;
            self.functions.push(Function { name: format!("{name}::{}", f.name), address });
            let private = f.name == "main" || f.name.starts_with('$') || f.name.contains("::");
            if self.config.import_unqualified && !private && self.function_address(&f.name).is_none() {
                self.functions.push(Function { name: f.name.clone(), address });
            }
        }
        for (constant, value) in &program.constants {
            if self.constants.find(constant).is_none() {
                self.constants.set(constant, value.clone());
            }
        }
        let functions_len = self.functions.len() - functions_start;
        if let Some(module) = self.modules.iter_mut().find(|m| m.name == name) {
            module.functions_len = functions_len;
        }
        self.calls.clear();
        log::debug!("linked module {name} at {code_start:04X} ({} instructions)", program.len());

        self.load_required(&program.required_modules)
    }

    /// Runs from `main`, or from the top-level code when there is no `main`.
    pub fn run(&mut self, args: Vec<Value>) -> Result<Value, RuntimeError> {
        self.run_entry(None, args)
    }

    /// Runs from the named function (or the default entry for `None`).
    /// Arguments are visible as `$1..$n` and bind to declared parameters.
    pub fn run_entry(&mut self, entry: Option<&str>, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let _guard = self.context.enter().map_err(RuntimeError::detached)?;
        let start = match entry {
            Some(name) => self.function_address(name),
            None => self.function_address("main").or_else(|| self.function_address("$main")),
        }
        .ok_or_else(|| RuntimeError::detached(ErrorCode::NoEntryPoint))?;

        self.reset_run_state();
        for (i, arg) in args.into_iter().enumerate() {
            self.locals.create(format!("${}", i + 1).into(), arg, false);
        }
        self.ip = start;
        log::debug!("run started at {start:04X}");

        let result = self.execute();
        let mut locals = std::mem::replace(&mut self.locals, VariableSystem::new(Scope::Local));
        self.cache.invalidate(&mut locals);
        self.cache.clear();
        match &result {
            Ok(value) => log::debug!("run finished: {value}"),
            Err(e) => log::debug!("run failed: {e}"),
        }
        result
    }

    fn reset_run_state(&mut self) {
        self.data.clear();
        self.frames.clear();
        self.catches.clear();
        self.cache.clear();
        self.locals = VariableSystem::new(Scope::Local);
        self.expressions = VariableSystem::new(Scope::Expression);
        self.bind_pos = 0;
        self.current = INVALID_ADDRESS;
    }

    fn execute(&mut self) -> Result<Value, RuntimeError> {
        loop {
            match self.dispatch() {
                Ok(()) => {
                    // detach from any variable slot the value may alias
                    let result = self.data.pop().unwrap_or(Value::Null).clone();
                    return Ok(result);
                }
                Err(fault) => match self.raise(fault) {
                    Flow::Resume => continue,
                    Flow::Halt(error) => return Err(error),
                },
            }
        }
    }

    fn dispatch(&mut self) -> Exec {
        loop {
            let code = Rc::clone(&self.code);
            let Some(instr) = code.get(self.ip) else {
                return Ok(());
            };
            if self.stop.load(Ordering::Relaxed) {
                self.current = self.ip;
                return Err(ErrorCode::Interrupted.into());
            }
            self.current = self.ip;
            self.ip += 1;
            log::trace!("{:04X} {}", self.current, instr.opcode.mnemonic());
            self.step(instr)?;
        }
    }

    /// Routes a fault to the innermost catch point, or stops the run.
    fn raise(&mut self, fault: Fault) -> Flow {
        let line = self.code.get(self.current).map_or(0, |i| i.line);
        let module = self.module_at(self.current).map(|m| m.name.clone());
        let error = RuntimeError { code: fault.code, line, message: fault.message, module };

        if error.kind() != Some(ErrorCode::Interrupted) {
            if let Some(point) = self.catches.pop() {
                self.unwind_to(point.sub_level);
                self.data.truncate(point.data_depth);
                self.publish_error(&error);
                self.ip = point.addr;
                log::debug!("error {} caught, resuming at {:04X}", error.code, point.addr);
                return Flow::Resume;
            }
        }
        self.ip = INVALID_ADDRESS;
        Flow::Halt(error)
    }

    fn publish_error(&mut self, error: &RuntimeError) {
        self.globals.set("$errorcode", Value::Int32(error.code));
        self.globals.set("$errorline", Value::Int32(i32::try_from(error.line).unwrap_or(i32::MAX)));
        self.globals.set("$errortext", Value::from(error.to_string()));
        let module = error.module.as_deref().map_or(Value::Null, Value::from);
        self.globals.set("$errormodule", module);
    }

    fn module_at(&self, addr: usize) -> Option<&Module> {
        self.modules.iter().find(|m| addr >= m.code_start && addr < m.code_start + m.code_len)
    }

    /// Pops frames until `level` frames remain, restoring caller variables.
    fn unwind_to(&mut self, level: usize) {
        while self.frames.len() > level {
            if let Some(frame) = self.frames.pop() {
                self.restore_frame(frame);
            }
        }
    }

    fn restore_frame(&mut self, frame: Frame) {
        let mut locals = std::mem::replace(&mut self.locals, frame.locals);
        let mut expressions = std::mem::replace(&mut self.expressions, frame.expressions);
        self.cache.invalidate(&mut locals);
        self.cache.invalidate(&mut expressions);
        self.bind_pos = frame.bind_pos;
    }

    /// Enters the script function at `address`, binding the top `argc`
    /// stack entries as arguments.
    fn call_script(&mut self, address: usize, argc: usize) -> Exec {
        if self.frames.len() >= self.config.control_stack_limit {
            return Err(ErrorCode::ControlStackOverflow.into());
        }
        let args = self.data.pop_n(argc)?;
        let mut locals = VariableSystem::new(Scope::Local);
        for (i, arg) in args.into_iter().enumerate() {
            let value = arg.value.clone();
            if let Some(name) = &arg.name {
                locals.set(&format!("${name}"), value.clone());
            }
            locals.set(&format!("${}", i + 1), value);
        }

        let mut caller_locals = std::mem::replace(&mut self.locals, locals);
        let mut caller_expressions =
            std::mem::replace(&mut self.expressions, VariableSystem::new(Scope::Expression));
        self.cache.invalidate(&mut caller_locals);
        self.cache.invalidate(&mut caller_expressions);
        self.frames.push(Frame {
            return_addr: self.ip,
            locals: caller_locals,
            expressions: caller_expressions,
            bind_pos: std::mem::replace(&mut self.bind_pos, 0),
            data_depth: self.data.len(),
        });
        self.ip = address;
        Ok(())
    }

    fn return_from_call(&mut self, value: Value) -> Exec {
        // detached: the value may alias a variable of the finished frame
        let value = value.clone();
        let Some(frame) = self.frames.pop() else {
            return self.finish(value);
        };
        let level = self.frames.len();
        self.catches.retain(|c| c.sub_level <= level);
        self.data.truncate(frame.data_depth);
        self.ip = frame.return_addr;
        self.restore_frame(frame);
        self.data.push(value)
    }

    /// Ends the run with `value` as its result.
    fn finish(&mut self, value: Value) -> Exec {
        self.data.push(value)?;
        self.ip = self.code.len();
        Ok(())
    }

    fn lookup(&mut self, name: &str) -> Option<Binding> {
        let found = |scope, slot: Option<usize>| slot.map(|slot| Binding { scope, slot });
        found(Scope::Constant, self.constants.find(name))
            .or_else(|| found(Scope::Local, self.locals.find(name)))
            .or_else(|| found(Scope::Expression, self.expressions.find(name)))
            .or_else(|| {
                let object = self.context_object.as_ref()?;
                let value = object.class().get_attribute(object, name)?;
                Some(Binding { scope: Scope::Context, slot: self.context_vars.set(name, value) })
            })
            .or_else(|| found(Scope::Global, self.globals.find(name)))
    }

    /// Resolves `name` for the instruction at `ip`, creating a local when
    /// nothing matches, and records cacheable results.
    fn resolve(&mut self, ip: usize, name: &str) -> Binding {
        if let Some(binding) = self.cache.get(ip) {
            return binding;
        }
        let binding = self.lookup(name).unwrap_or_else(|| Binding {
            scope: Scope::Local,
            slot: self.locals.create(name.into(), Value::Null, false),
        });
        let owner = match binding.scope {
            Scope::Constant => &mut self.constants,
            Scope::Local => &mut self.locals,
            Scope::Expression => &mut self.expressions,
            Scope::Context => &mut self.context_vars,
            Scope::Global => &mut self.globals,
        };
        self.cache.remember(ip, binding, owner);
        binding
    }

    fn system(&self, scope: Scope) -> &VariableSystem {
        match scope {
            Scope::Constant => &self.constants,
            Scope::Local => &self.locals,
            Scope::Expression => &self.expressions,
            Scope::Context => &self.context_vars,
            Scope::Global => &self.globals,
        }
    }

    fn system_mut(&mut self, scope: Scope) -> &mut VariableSystem {
        match scope {
            Scope::Constant => &mut self.constants,
            Scope::Local => &mut self.locals,
            Scope::Expression => &mut self.expressions,
            Scope::Context => &mut self.context_vars,
            Scope::Global => &mut self.globals,
        }
    }

    fn read(&self, binding: Binding) -> Exec<&Value> {
        self.system(binding.scope)
            .get(binding.slot)
            .map(|v| &v.value)
            .ok_or_else(|| ErrorCode::Internal.into())
    }

    /// Stores `value` into the variable, writing context variables through
    /// to the bound object.
    fn assign(&mut self, binding: Binding, value: Value) -> Exec {
        match binding.scope {
            Scope::Constant => Err(ErrorCode::AssignmentToConstant.into()),
            Scope::Context => {
                let name = self
                    .context_vars
                    .get(binding.slot)
                    .map(|v| v.name().to_string())
                    .ok_or(ErrorCode::Internal)?;
                let object = self.context_object.clone().ok_or(ErrorCode::Internal)?;
                if !object.class().set_attribute(&object, &name, value.clone()) {
                    return Err(ErrorCode::NoSuchAttribute.into());
                }
                self.context_vars.set(&name, value);
                Ok(())
            }
            scope => {
                let variable = self.system_mut(scope).get_mut(binding.slot).ok_or(ErrorCode::Internal)?;
                variable.value = value;
                Ok(())
            }
        }
    }

    /// Finds or creates a variable by name without consulting the cache.
    fn assign_by_name(&mut self, name: &str, value: Value) -> Exec {
        let binding = match self.lookup(name) {
            Some(binding) => binding,
            None => Binding { scope: Scope::Local, slot: self.locals.create(name.into(), Value::Null, false) },
        };
        self.assign(binding, value)
    }
}
