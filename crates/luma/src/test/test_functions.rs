// Calls, multi-return, varargs, closures, upvalues, tail calls
use crate::*;

fn run_ok(source: &str) {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    let result = vm.execute(source);
    if let Err(e) = &result {
        eprintln!("Error: {}", e);
    }
    assert!(result.is_ok());
}

#[test]
fn test_multi_return_and_varargs() {
    // S2: select('#', ...) plus vararg forwarding
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    let results = vm
        .execute("local function f(...) return select('#', ...), ... end return f(10,20,30)")
        .unwrap();
    let nums: Vec<f64> = results.iter().filter_map(|v| v.as_number()).collect();
    assert_eq!(nums, vec![3.0, 10.0, 20.0, 30.0]);
}

#[test]
fn test_multi_return_adjustment() {
    run_ok(
        r#"
        local function three() return 1, 2, 3 end
        local a, b = three()
        assert(a == 1 and b == 2)
        local c, d, e, f = three()
        assert(e == 3 and f == nil)
        -- parentheses truncate to one value
        local g, h = (three())
        assert(g == 1 and h == nil)
        -- only the last call expands
        local t = {three(), three()}
        assert(#t == 4)
    "#,
    );
}

#[test]
fn test_vararg_propagation() {
    run_ok(
        r#"
        local function pass(...) return ... end
        local a, b, c = pass(7, 8, 9)
        assert(a == 7 and b == 8 and c == 9)
        local function count(...) return select('#', ...) end
        assert(count() == 0)
        assert(count(nil) == 1)
        assert(count(nil, nil) == 2)
    "#,
    );
}

#[test]
fn test_closure_upvalue_sharing() {
    // S6: two closures over the same local share one upvalue cell
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    let results = vm
        .execute(
            r#"
            local function mk()
                local x = 0
                return function() x = x + 1 return x end,
                       function() return x end
            end
            local inc, get = mk()
            inc() inc()
            return get()
        "#,
        )
        .unwrap();
    assert_eq!(results[0].as_number(), Some(2.0));
}

#[test]
fn test_upvalue_close_on_scope_exit() {
    run_ok(
        r#"
        local fns = {}
        for i = 1, 3 do
            local v = i * 10
            fns[i] = function() return v end
        end
        -- each iteration captured its own cell
        assert(fns[1]() == 10 and fns[2]() == 20 and fns[3]() == 30)
    "#,
    );
}

#[test]
fn test_nested_upvalue_capture() {
    run_ok(
        r#"
        local a = 1
        local function outer()
            local function inner()
                a = a + 1
                return a
            end
            return inner()
        end
        assert(outer() == 2)
        assert(outer() == 3)
        assert(a == 3)
    "#,
    );
}

#[test]
fn test_recursion() {
    run_ok(
        r#"
        local function fib(n)
            if n < 2 then return n end
            return fib(n - 1) + fib(n - 2)
        end
        assert(fib(15) == 610)
    "#,
    );
}

#[test]
fn test_tail_call_bounded_frames() {
    // Deep tail recursion must not grow the frame stack
    run_ok(
        r#"
        local function loop(n)
            if n == 0 then return 0 end
            return loop(n - 1)
        end
        assert(loop(100000) == 0)
    "#,
    );
}

#[test]
fn test_tail_call_frame_depth() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    vm.execute(
        r#"
        function probe(n)
            if n == 0 then return 0 end
            return probe(n - 1)
        end
    "#,
    )
    .unwrap();
    let results = vm.execute("return probe(50000)").unwrap();
    assert_eq!(results[0].as_number(), Some(0.0));
    // The thread is idle again: no leftover frames
    assert_eq!(vm.current_thread().borrow().frames.len(), 0);
}

#[test]
fn test_method_calls() {
    run_ok(
        r#"
        local account = { balance = 0 }
        function account:deposit(n) self.balance = self.balance + n end
        account:deposit(10)
        account:deposit(32)
        assert(account.balance == 42)
    "#,
    );
}

#[test]
fn test_local_function_recursion() {
    run_ok(
        r#"
        local function even(n)
            if n == 0 then return true end
            return not even(n - 1)
        end
        assert(even(10) == true)
        assert(even(7) == false)
    "#,
    );
}

#[test]
fn test_function_path_definition() {
    run_ok(
        r#"
        lib = { inner = {} }
        function lib.inner.helper(x) return x * 2 end
        function lib.inner:method() return self end
        assert(lib.inner.helper(21) == 42)
        assert(lib.inner:method() == lib.inner)
    "#,
    );
}

#[test]
fn test_host_function_registration() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    vm.register_function("double", |ctx| {
        let n = ctx.check_number(1)?;
        ctx.push(LuaValue::Number(n * 2.0));
        Ok(1)
    });
    let results = vm.execute("return double(21)").unwrap();
    assert_eq!(results[0].as_number(), Some(42.0));
}

#[test]
fn test_host_function_bad_argument() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    vm.register_function("need_num", |ctx| {
        let n = ctx.check_number(1)?;
        ctx.push(LuaValue::Number(n));
        Ok(1)
    });
    let results = vm
        .execute("local ok, err = pcall(need_num, {}) return ok, err")
        .unwrap();
    assert!(!results[0].is_truthy());
    let msg = results[1].as_str().unwrap().to_string();
    assert!(msg.contains("bad argument #1 to 'need_num'"), "got {}", msg);
}

#[test]
fn test_call_host_api() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    vm.execute("function add(a, b) return a + b end").unwrap();
    let f = vm.get_global("add");
    let results = vm
        .call(f, vec![LuaValue::Number(40.0), LuaValue::Number(2.0)])
        .unwrap();
    assert_eq!(results[0].as_number(), Some(42.0));
}
