// Lua virtual machine
// Owns the per-state world: globals, intern pool, threads, metatable
// registry, debugger and cancellation; executes compiled prototypes.

mod debug_api;
pub mod execute;
mod lua_call_frame;
mod lua_context;
mod lua_error;
pub mod opcode;
mod string_interner;

pub use debug_api::LuaDebugger;
pub use lua_call_frame::CallFrame;
pub use lua_context::LuaContext;
pub use lua_error::{ErrorKind, LuaError, LuaResult, RuntimeError};
pub use opcode::{Instruction, OpCode};
pub use string_interner::StringInterner;

use crate::compiler;
use crate::lua_value::{
    CoroutineStatus, HostFn, HostFunction, LuaClosure, LuaTable, LuaThread, LuaValue,
    Prototype, Upvalue,
};
use crate::lua_vm::execute::metamethod::MetaEvent;
use ahash::AHashMap;
use rand::SeedableRng;
use smol_str::SmolStr;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Host-provided cancellation token. Settable from any thread; the VM
/// polls it at call boundaries and yield/resume points.
#[derive(Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a `run` call that may suspend on a pending host call.
#[derive(Debug)]
pub enum RunOutcome {
    Done(Vec<LuaValue>),
    /// A host function suspended; complete with
    /// [`LuaVM::complete_pending`] using this token.
    Pending(u64),
}

/// Per-state VM: the embedding entry point.
pub struct LuaVM {
    pub(crate) globals: Rc<RefCell<LuaTable>>,
    pub(crate) interner: StringInterner,
    pub(crate) main_thread: Rc<RefCell<LuaThread>>,
    pub(crate) current: Rc<RefCell<LuaThread>>,
    /// Parents of the running coroutine, outermost first.
    pub(crate) thread_chain: Vec<Rc<RefCell<LuaThread>>>,
    pub(crate) string_mt: Option<Rc<RefCell<LuaTable>>>,
    pub(crate) type_metatables: AHashMap<SmolStr, Rc<RefCell<LuaTable>>>,
    pub(crate) debugger: Option<Rc<dyn LuaDebugger>>,
    pub(crate) cancel: CancelToken,
    /// Interned metamethod event names, indexed by MetaEvent.
    pub(crate) meta_keys: Vec<Rc<str>>,
    pub(crate) rng: rand::rngs::StdRng,
    pub(crate) start_time: std::time::Instant,
    next_pending: u64,
    pending_token: Option<u64>,
    /// Saved (result slot, frame depth) of a run suspended on Pending.
    pending_run: Option<(usize, usize)>,
}

impl LuaVM {
    pub fn new() -> Box<Self> {
        let mut interner = StringInterner::new();
        let meta_keys = MetaEvent::ALL
            .iter()
            .map(|ev| interner.intern(ev.name()))
            .collect();
        let main_thread = Rc::new(RefCell::new(LuaThread::new(true)));
        let globals = Rc::new(RefCell::new(LuaTable::with_capacity(0, 32)));

        let mut vm = Box::new(LuaVM {
            globals: globals.clone(),
            interner,
            main_thread: main_thread.clone(),
            current: main_thread,
            thread_chain: Vec::new(),
            string_mt: None,
            type_metatables: AHashMap::new(),
            debugger: None,
            cancel: CancelToken::new(),
            meta_keys,
            rng: rand::rngs::StdRng::seed_from_u64(0x6c756d61),
            start_time: std::time::Instant::now(),
            next_pending: 1,
            pending_token: None,
            pending_run: None,
        });

        // _G refers to the global table itself
        let g = LuaValue::Table(globals);
        vm.set_global("_G", g.clone());
        let version = vm.new_string("Lua 5.1");
        vm.set_global("_VERSION", version);
        vm
    }

    // ===== Strings and tables =====

    #[inline]
    pub fn intern(&mut self, s: &str) -> Rc<str> {
        self.interner.intern(s)
    }

    #[inline]
    pub fn new_string(&mut self, s: &str) -> LuaValue {
        LuaValue::String(self.interner.intern(s))
    }

    #[inline]
    pub fn new_string_owned(&mut self, s: String) -> LuaValue {
        LuaValue::String(self.interner.intern_owned(s))
    }

    pub fn new_table(&self) -> LuaValue {
        LuaValue::Table(Rc::new(RefCell::new(LuaTable::new())))
    }

    pub fn new_table_with(&self, array: usize, hash: usize) -> LuaValue {
        LuaValue::Table(Rc::new(RefCell::new(LuaTable::with_capacity(array, hash))))
    }

    // ===== Globals =====

    pub fn get_global(&mut self, name: &str) -> LuaValue {
        let key = self.new_string(name);
        self.globals.borrow().raw_get(&key)
    }

    pub fn set_global(&mut self, name: &str, value: LuaValue) {
        let key = self.new_string(name);
        // Global names are valid keys; this cannot fail
        let _ = self.globals.borrow_mut().raw_set(key, value);
    }

    pub fn globals(&self) -> Rc<RefCell<LuaTable>> {
        self.globals.clone()
    }

    // ===== Host function registration =====

    pub fn register_function(&mut self, name: &str, func: HostFn) {
        let f = LuaValue::host_function(HostFunction::new(name, func));
        self.set_global(name, f);
    }

    pub fn register_yieldable_function(&mut self, name: &str, func: HostFn) {
        let f = LuaValue::host_function(HostFunction::new_yieldable(name, func));
        self.set_global(name, f);
    }

    // ===== Metatables =====

    /// Install the shared string metatable (the string library sets its
    /// `__index` here so `("x"):upper()` works).
    pub fn set_string_metatable(&mut self, mt: LuaValue) {
        self.string_mt = mt.as_table().cloned();
    }

    pub fn register_type_metatable(&mut self, type_name: &str, mt: LuaValue) {
        if let Some(t) = mt.as_table() {
            self.type_metatables.insert(SmolStr::new(type_name), t.clone());
        }
    }

    #[inline]
    pub(crate) fn meta_key(&self, ev: MetaEvent) -> Rc<str> {
        self.meta_keys[ev as usize].clone()
    }

    // ===== Debugger =====

    pub fn set_debugger(&mut self, debugger: Rc<dyn LuaDebugger>) {
        self.debugger = Some(debugger);
    }

    pub fn clear_debugger(&mut self) {
        self.debugger = None;
    }

    pub fn debugger(&self) -> Option<Rc<dyn LuaDebugger>> {
        self.debugger.clone()
    }

    // ===== Cancellation =====

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    // ===== Standard libraries =====

    /// Open the full bundled stdlib.
    pub fn open_libs(&mut self) -> LuaResult<()> {
        crate::lib_registry::create_standard_registry().load_all(self)
    }

    /// Open a named subset of the stdlib modules
    /// ("_G", "string", "table", "math", "io", "os", "coroutine").
    pub fn open_selected(&mut self, names: &[&str]) -> LuaResult<()> {
        let registry = crate::lib_registry::create_standard_registry();
        for name in names {
            if let Some(module) = registry.get_module(name) {
                registry.load_module(self, module)?;
            }
        }
        Ok(())
    }

    // ===== Compilation =====

    /// Compile `source` into a closure bound to the global environment.
    /// The chunk-name convention: `@path` for files, `=name` for opaque
    /// sources, anything else is shown as a source excerpt.
    pub fn load_string(&mut self, source: &str, chunk_name: &str) -> LuaResult<LuaValue> {
        let proto = compiler::compile(source, chunk_name, &mut self.interner)
            .map_err(LuaError::Compile)?;
        let proto = Rc::new(proto);
        self.register_prototypes(&proto);
        let env = Upvalue::new_closed(LuaValue::Table(self.globals.clone()));
        let closure = LuaClosure::new(proto, vec![env]);
        Ok(LuaValue::closure(closure))
    }

    /// `load_string` with an explicit environment table bound as the
    /// chunk's `_ENV` upvalue.
    pub fn load_string_with_env(
        &mut self,
        source: &str,
        chunk_name: &str,
        env: LuaValue,
    ) -> LuaResult<LuaValue> {
        let proto = compiler::compile(source, chunk_name, &mut self.interner)
            .map_err(LuaError::Compile)?;
        let proto = Rc::new(proto);
        self.register_prototypes(&proto);
        let env = Upvalue::new_closed(env);
        let closure = LuaClosure::new(proto, vec![env]);
        Ok(LuaValue::closure(closure))
    }

    pub fn load_file(&mut self, path: &str) -> LuaResult<LuaValue> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| LuaError::Compile(format!("cannot open {}: {}", path, e)))?;
        let chunk_name = format!("@{}", path);
        self.load_string(&source, &chunk_name)
    }

    fn register_prototypes(&self, proto: &Rc<Prototype>) {
        if let Some(dbg) = &self.debugger {
            dbg.register_prototype(proto);
        }
        for nested in &proto.protos {
            self.register_prototypes(nested);
        }
    }

    // ===== Execution =====

    /// Compile and run a source string on the main thread.
    pub fn execute(&mut self, source: &str) -> LuaResult<Vec<LuaValue>> {
        let func = self.load_string(source, source)?;
        self.call(func, Vec::new())
    }

    pub fn execute_file(&mut self, path: &str) -> LuaResult<Vec<LuaValue>> {
        let func = self.load_file(path)?;
        self.call(func, Vec::new())
    }

    /// Call a function value with arguments and collect all results.
    pub fn call(&mut self, func: LuaValue, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
        let depth = self.current.borrow().frames.len();
        let top = self.current.borrow().top;
        match execute::call_function(self, func, args) {
            Ok(results) => Ok(results),
            Err(e) => {
                execute::unwind_to(self, depth, top);
                Err(e)
            }
        }
    }

    /// Like [`call`](Self::call) but surfaces pending host-call
    /// suspensions instead of treating them as errors.
    pub fn run(&mut self, func: LuaValue, args: Vec<LuaValue>) -> LuaResult<RunOutcome> {
        let depth = self.current.borrow().frames.len();
        let top = self.current.borrow().top;
        match execute::call_function(self, func, args) {
            Ok(results) => Ok(RunOutcome::Done(results)),
            Err(LuaError::Pending(token)) => {
                self.pending_run = Some((top, depth));
                Ok(RunOutcome::Pending(token))
            }
            Err(e) => {
                execute::unwind_to(self, depth, top);
                Err(e)
            }
        }
    }

    /// Complete a pending host call: deliver its results and resume
    /// dispatch where it suspended.
    pub fn complete_pending(
        &mut self,
        token: u64,
        results: Vec<LuaValue>,
    ) -> LuaResult<RunOutcome> {
        match self.pending_token {
            Some(t) if t == token => {
                self.pending_token = None;
            }
            _ => return Err(LuaError::runtime("no such pending call".to_string())),
        }
        let Some((func_pos, depth)) = self.pending_run else {
            return Err(LuaError::runtime("no suspended run".to_string()));
        };
        let cur = self.current.clone();
        execute::deliver_resume_values(&cur, results);
        match execute::execute_until(self, depth) {
            Ok(()) => {
                self.pending_run = None;
                let cur = self.current.clone();
                let mut t = cur.borrow_mut();
                let results = t.stack[func_pos..t.top].to_vec();
                t.top = func_pos;
                Ok(RunOutcome::Done(results))
            }
            Err(LuaError::Pending(tok)) => Ok(RunOutcome::Pending(tok)),
            Err(e) => {
                self.pending_run = None;
                execute::unwind_to(self, depth, func_pos);
                Err(e)
            }
        }
    }

    pub(crate) fn new_pending_token(&mut self) -> u64 {
        let token = self.next_pending;
        self.next_pending += 1;
        self.pending_token = Some(token);
        token
    }

    // ===== Protected calls =====

    /// pcall semantics: convert catchable errors into (false, err).
    /// Yields pass through; cancellation is observed and re-raised.
    pub fn pcall(&mut self, func: LuaValue, args: Vec<LuaValue>) -> LuaResult<(bool, Vec<LuaValue>)> {
        let depth = self.current.borrow().frames.len();
        let top = self.current.borrow().top;
        match execute::call_function(self, func, args) {
            Ok(results) => Ok((true, results)),
            Err(e) if e.is_catchable() => {
                execute::unwind_to(self, depth, top);
                Ok((false, vec![e.error_value()]))
            }
            Err(LuaError::Cancelled) => {
                execute::unwind_to(self, depth, top);
                Err(LuaError::Cancelled)
            }
            Err(e) => Err(e),
        }
    }

    /// xpcall semantics: run `handler` on the error value before
    /// unwinding, then deliver (false, handler_result).
    pub fn xpcall(
        &mut self,
        func: LuaValue,
        args: Vec<LuaValue>,
        handler: LuaValue,
    ) -> LuaResult<(bool, Vec<LuaValue>)> {
        let depth = self.current.borrow().frames.len();
        let top = self.current.borrow().top;
        match execute::call_function(self, func, args) {
            Ok(results) => Ok((true, results)),
            Err(e) if e.is_catchable() => {
                // The handler runs while the erroring frames are still
                // in place, so it can inspect the stack.
                let handled = execute::call_function(self, handler, vec![e.error_value()]);
                execute::unwind_to(self, depth, top);
                match handled {
                    Ok(mut r) => {
                        let first = if r.is_empty() { LuaValue::Nil } else { r.remove(0) };
                        Ok((false, vec![first]))
                    }
                    Err(_) => Ok((
                        false,
                        vec![LuaValue::String("error in error handling".into())],
                    )),
                }
            }
            Err(LuaError::Cancelled) => {
                // Cancellation is visible to the handler but re-raised
                let _ = execute::call_function(self, handler, vec![LuaError::Cancelled.error_value()]);
                execute::unwind_to(self, depth, top);
                Err(LuaError::Cancelled)
            }
            Err(e) => Err(e),
        }
    }

    // ===== Coroutines =====

    pub fn new_coroutine(&mut self, func: LuaValue) -> LuaValue {
        LuaValue::Thread(Rc::new(RefCell::new(LuaThread::new_coroutine(func))))
    }

    /// Transfer control to a coroutine. Returns (true, values) when it
    /// yields or finishes, (false, error) when it dies with an error.
    pub fn resume(
        &mut self,
        co: Rc<RefCell<LuaThread>>,
        args: Vec<LuaValue>,
    ) -> LuaResult<(bool, Vec<LuaValue>)> {
        if self.cancel.is_cancelled() {
            return Err(LuaError::Cancelled);
        }
        {
            let t = co.borrow();
            if t.is_main {
                return Ok((false, vec![self.new_string("cannot resume main thread")]));
            }
            match t.status {
                CoroutineStatus::Dead => {
                    return Ok((false, vec![self.new_string("cannot resume dead coroutine")]));
                }
                CoroutineStatus::Running | CoroutineStatus::Normal => {
                    return Ok((
                        false,
                        vec![self.new_string("cannot resume non-suspended coroutine")],
                    ));
                }
                CoroutineStatus::Suspended => {}
            }
        }

        // Switch: caller becomes Normal, callee Running
        let parent = self.current.clone();
        parent.borrow_mut().status = CoroutineStatus::Normal;
        self.thread_chain.push(parent.clone());
        self.current = co.clone();
        co.borrow_mut().status = CoroutineStatus::Running;

        let outcome = execute::resume_body(self, &co, args);

        // A dying coroutine unwinds while it is still current, so its
        // upvalues close and frame-pop hooks fire
        if let Err(e) = &outcome {
            if e.is_catchable() || matches!(e, LuaError::Cancelled) {
                execute::unwind_to(self, 0, 0);
            }
        }

        // Switch back
        self.current = self.thread_chain.pop().unwrap_or_else(|| self.main_thread.clone());
        self.current.borrow_mut().status = CoroutineStatus::Running;

        match outcome {
            Ok(results) => {
                co.borrow_mut().status = CoroutineStatus::Dead;
                Ok((true, results))
            }
            Err(LuaError::Yield(values)) => {
                co.borrow_mut().status = CoroutineStatus::Suspended;
                Ok((true, values))
            }
            Err(e) if e.is_catchable() => {
                let mut t = co.borrow_mut();
                t.status = CoroutineStatus::Dead;
                drop(t);
                Ok((false, vec![e.error_value()]))
            }
            Err(e) => {
                // Cancellation (or a nested pending) aborts the coroutine
                co.borrow_mut().status = CoroutineStatus::Dead;
                Err(e)
            }
        }
    }

    /// Yield from the running coroutine. Returns the signal to raise.
    pub fn do_yield(&mut self, values: Vec<LuaValue>) -> LuaError {
        let t = self.current.borrow();
        if t.is_main {
            drop(t);
            return self.rt_error("attempt to yield from outside a coroutine".to_string());
        }
        if t.nny > 0 {
            drop(t);
            return self.rt_error("attempt to yield across C-call boundary".to_string());
        }
        LuaError::Yield(values)
    }

    pub fn current_thread(&self) -> Rc<RefCell<LuaThread>> {
        self.current.clone()
    }

    pub fn main_thread(&self) -> Rc<RefCell<LuaThread>> {
        self.main_thread.clone()
    }

    pub fn is_current_main(&self) -> bool {
        Rc::ptr_eq(&self.current, &self.main_thread)
    }

    // ===== Errors =====

    /// Position string "source:line:" of the active Lua frame.
    pub fn where_(&self) -> String {
        let t = self.current.borrow();
        match t.frames.last() {
            Some(f) => format!(
                "{}:{}: ",
                f.closure.proto.source_name(),
                f.current_line()
            ),
            None => String::new(),
        }
    }

    /// Raise a runtime error with position prefix and traceback.
    pub fn rt_error(&self, message: String) -> LuaError {
        let full = format!("{}{}", self.where_(), message);
        LuaError::Runtime(Box::new(RuntimeError {
            value: LuaValue::String(full.into()),
            kind: ErrorKind::Runtime,
            traceback: Some(self.build_traceback()),
        }))
    }

    /// Raise with an arbitrary error value (no prefixing).
    pub fn rt_error_value(&self, value: LuaValue) -> LuaError {
        LuaError::Runtime(Box::new(RuntimeError {
            value,
            kind: ErrorKind::Runtime,
            traceback: Some(self.build_traceback()),
        }))
    }

    /// Textual traceback of the current thread: host frames first,
    /// then Lua frames innermost to outermost.
    pub fn build_traceback(&self) -> String {
        let t = self.current.borrow();
        let mut lines = vec!["stack traceback:".to_string()];
        for name in t.host_frames.iter().rev() {
            lines.push(format!("\t[C]: in function '{}'", name));
        }
        for frame in t.frames.iter().rev() {
            let proto = &frame.closure.proto;
            let location = format!("{}:{}:", proto.source_name(), frame.current_line());
            let what = if proto.is_main_chunk() {
                "in main chunk".to_string()
            } else if frame.is_tail {
                "in function <tail call>".to_string()
            } else {
                format!(
                    "in function <{}:{}>",
                    proto.source_name(),
                    proto.line_defined
                )
            };
            lines.push(format!("\t{} {}", location, what));
        }
        if t.frames.is_empty() && t.host_frames.is_empty() {
            lines.push("\t[C]: in ?".to_string());
        }
        lines.join("\n")
    }
}

impl Default for Box<LuaVM> {
    fn default() -> Self {
        LuaVM::new()
    }
}
