// Host-function call context.
// Gives registered functions typed access to their arguments, a result
// buffer, the running thread and the VM itself.

use crate::lua_value::{HostFunction, LuaTable, LuaThread, LuaValue};
use crate::lua_vm::{LuaError, LuaResult, LuaVM};
use std::cell::RefCell;
use std::rc::Rc;

pub struct LuaContext<'a> {
    vm: &'a mut LuaVM,
    thread: Rc<RefCell<LuaThread>>,
    host: Rc<HostFunction>,
    arg_base: usize,
    nargs: usize,
    pub(crate) results: Vec<LuaValue>,
}

impl<'a> LuaContext<'a> {
    pub(crate) fn new(
        vm: &'a mut LuaVM,
        host: Rc<HostFunction>,
        arg_base: usize,
        nargs: usize,
    ) -> Self {
        let thread = vm.current_thread();
        LuaContext {
            vm,
            thread,
            host,
            arg_base,
            nargs,
            results: Vec::new(),
        }
    }

    // ===== Arguments =====

    #[inline]
    pub fn arg_count(&self) -> usize {
        self.nargs
    }

    /// Argument by 1-based index; nil when absent.
    pub fn arg(&self, index: usize) -> LuaValue {
        if index == 0 || index > self.nargs {
            return LuaValue::Nil;
        }
        self.thread.borrow().stack[self.arg_base + index - 1].clone()
    }

    pub fn args(&self) -> Vec<LuaValue> {
        let t = self.thread.borrow();
        t.stack[self.arg_base..self.arg_base + self.nargs].to_vec()
    }

    /// `bad argument #N to 'name' (expected T, got U)`
    pub fn bad_argument(&self, index: usize, expected: &str) -> LuaError {
        let got = self.arg(index).type_name();
        let got = if index > self.nargs { "no value" } else { got };
        LuaError::bad_argument(format!(
            "{}bad argument #{} to '{}' (expected {}, got {})",
            self.vm.where_(),
            index,
            self.host.name,
            expected,
            got
        ))
    }

    pub fn check_any(&self, index: usize) -> LuaResult<LuaValue> {
        if index > self.nargs {
            return Err(self.bad_argument(index, "value"));
        }
        Ok(self.arg(index))
    }

    pub fn check_number(&self, index: usize) -> LuaResult<f64> {
        match self.arg(index).coerce_number() {
            Some(n) => Ok(n),
            None => Err(self.bad_argument(index, "number")),
        }
    }

    pub fn check_integer(&self, index: usize) -> LuaResult<i64> {
        Ok(self.check_number(index)?.floor() as i64)
    }

    pub fn check_string(&self, index: usize) -> LuaResult<Rc<str>> {
        match self.arg(index) {
            LuaValue::String(s) => Ok(s),
            LuaValue::Number(n) => {
                Ok(crate::lua_value::number_to_string(n).into())
            }
            _ => Err(self.bad_argument(index, "string")),
        }
    }

    pub fn check_table(&self, index: usize) -> LuaResult<Rc<RefCell<LuaTable>>> {
        match self.arg(index) {
            LuaValue::Table(t) => Ok(t),
            _ => Err(self.bad_argument(index, "table")),
        }
    }

    pub fn check_function(&self, index: usize) -> LuaResult<LuaValue> {
        let v = self.arg(index);
        if v.is_function() {
            Ok(v)
        } else {
            Err(self.bad_argument(index, "function"))
        }
    }

    pub fn check_thread(&self, index: usize) -> LuaResult<Rc<RefCell<LuaThread>>> {
        match self.arg(index) {
            LuaValue::Thread(t) => Ok(t),
            _ => Err(self.bad_argument(index, "thread")),
        }
    }

    pub fn opt_number(&self, index: usize, default: f64) -> LuaResult<f64> {
        match self.arg(index) {
            LuaValue::Nil => Ok(default),
            v => v
                .coerce_number()
                .ok_or_else(|| self.bad_argument(index, "number")),
        }
    }

    pub fn opt_integer(&self, index: usize, default: i64) -> LuaResult<i64> {
        Ok(self.opt_number(index, default as f64)?.floor() as i64)
    }

    pub fn opt_string(&self, index: usize, default: &str) -> LuaResult<Rc<str>> {
        match self.arg(index) {
            LuaValue::Nil => Ok(default.into()),
            _ => self.check_string(index),
        }
    }

    // ===== Results =====

    #[inline]
    pub fn push(&mut self, value: LuaValue) {
        self.results.push(value);
    }

    pub fn push_all(&mut self, values: impl IntoIterator<Item = LuaValue>) {
        self.results.extend(values);
    }

    #[inline]
    pub fn result_count(&self) -> usize {
        self.results.len()
    }

    // ===== VM and thread access =====

    pub fn vm(&mut self) -> &mut LuaVM {
        self.vm
    }

    pub fn vm_ref(&self) -> &LuaVM {
        self.vm
    }

    pub fn thread(&self) -> Rc<RefCell<LuaThread>> {
        self.thread.clone()
    }

    pub fn intern(&mut self, s: &str) -> LuaValue {
        self.vm.new_string(s)
    }

    /// Captured upvalue of a host closure.
    pub fn upvalue(&self, index: usize) -> LuaValue {
        self.host.upvalues.get(index).cloned().unwrap_or(LuaValue::Nil)
    }

    pub fn function_name(&self) -> &str {
        &self.host.name
    }

    // ===== Control =====

    pub fn is_cancelled(&self) -> bool {
        self.vm.cancel.is_cancelled()
    }

    /// Yield the running coroutine with `values`. The returned signal
    /// must be propagated (`return Err(ctx.do_yield(values))`).
    pub fn do_yield(&mut self, values: Vec<LuaValue>) -> LuaError {
        self.vm.do_yield(values)
    }

    /// Suspend on a pending host awaitable. Only legal from a yieldable
    /// host function running on the main thread outside any
    /// resume/metamethod boundary.
    pub fn suspend_pending(&mut self) -> LuaError {
        if !self.vm.is_current_main() {
            return self
                .vm
                .rt_error("attempt to suspend inside a coroutine".to_string());
        }
        let nny = self.thread.borrow().nny;
        if !self.host.yieldable || nny > 0 {
            return self
                .vm
                .rt_error("attempt to suspend across a call boundary".to_string());
        }
        LuaError::Pending(self.vm.new_pending_token())
    }
}
