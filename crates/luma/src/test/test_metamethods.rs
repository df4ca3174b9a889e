// Metatable dispatch
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
fn test_add_metamethod() {
    // S1: t + 1 resolves through __add
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    let results = vm
        .execute(
            r#"
            local t = setmetatable({}, {__add = function(a, b) return 42 end})
            return t + 1
        "#,
        )
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].as_number(), Some(42.0));
}

#[test]
fn test_arith_metamethods() {
    run_ok(
        r#"
        local mt = {
            __sub = function() return "sub" end,
            __mul = function() return "mul" end,
            __div = function() return "div" end,
            __mod = function() return "mod" end,
            __pow = function() return "pow" end,
            __unm = function() return "unm" end,
            __idiv = function() return "idiv" end,
        }
        local t = setmetatable({}, mt)
        assert(t - 1 == "sub")
        assert(1 * t == "mul")
        assert(t / t == "div")
        assert(t % 2 == "mod")
        assert(t ^ 2 == "pow")
        assert(-t == "unm")
        assert(t // 2 == "idiv")
    "#,
    );
}

#[test]
fn test_index_function_and_chain() {
    run_ok(
        r#"
        local base = {greeting = "hi"}
        local mid = setmetatable({}, {__index = base})
        local leaf = setmetatable({}, {__index = mid})
        assert(leaf.greeting == "hi")

        local computed = setmetatable({}, {__index = function(t, k) return k .. "!" end})
        assert(computed.boom == "boom!")
    "#,
    );
}

#[test]
fn test_newindex() {
    run_ok(
        r#"
        local store = {}
        local proxy = setmetatable({}, {__newindex = function(t, k, v) store[k] = v end})
        proxy.x = 42
        assert(rawget(proxy, "x") == nil)
        assert(store.x == 42)

        -- present keys bypass __newindex
        rawset(proxy, "y", 1)
        proxy.y = 2
        assert(rawget(proxy, "y") == 2)

        -- table-valued __newindex forwards the write
        local sink = {}
        local fwd = setmetatable({}, {__newindex = sink})
        fwd.z = 9
        assert(sink.z == 9)
    "#,
    );
}

#[test]
fn test_call_metamethod() {
    run_ok(
        r#"
        local callable = setmetatable({}, {__call = function(self, a, b) return a + b end})
        assert(callable(40, 2) == 42)
    "#,
    );
}

#[test]
fn test_eq_lt_le() {
    run_ok(
        r#"
        local mt = {
            __eq = function(a, b) return a.id == b.id end,
            __lt = function(a, b) return a.id < b.id end,
            __le = function(a, b) return a.id <= b.id end,
        }
        local a = setmetatable({id = 1}, mt)
        local b = setmetatable({id = 1}, mt)
        local c = setmetatable({id = 2}, mt)
        assert(a == b)
        assert(a ~= c)
        assert(a < c)
        assert(a <= b)
        assert(not (c < a))
        -- __eq never fires for different primitive types
        assert((a == 1) == false)
    "#,
    );
}

#[test]
fn test_concat_metamethod() {
    run_ok(
        r#"
        local t = setmetatable({}, {__concat = function(a, b) return "joined" end})
        assert(t .. "x" == "joined")
        assert("x" .. t == "joined")
    "#,
    );
}

#[test]
fn test_len_metamethod() {
    run_ok(
        r#"
        local t = setmetatable({}, {__len = function() return 7 end})
        assert(#t == 7)
    "#,
    );
}

#[test]
fn test_tostring_metamethod() {
    run_ok(
        r#"
        local t = setmetatable({}, {__tostring = function() return "<thing>" end})
        assert(tostring(t) == "<thing>")
    "#,
    );
}

#[test]
fn test_metatable_protection() {
    run_ok(
        r#"
        local t = setmetatable({}, {__metatable = "locked"})
        assert(getmetatable(t) == "locked")
        local ok = pcall(setmetatable, t, {})
        assert(ok == false)
    "#,
    );
}

#[test]
fn test_rawequal_vs_eq() {
    run_ok(
        r#"
        local mt = {__eq = function() return true end}
        local a = setmetatable({}, mt)
        local b = setmetatable({}, mt)
        assert(a == b)
        assert(rawequal(a, b) == false)
        assert(rawequal(a, a) == true and a == a)
    "#,
    );
}

#[test]
fn test_string_method_metatable() {
    run_ok(
        r#"
        assert(("hello"):upper() == "HELLO")
        assert(("abc"):len() == 3)
    "#,
    );
}

#[test]
fn test_self_instruction_with_index() {
    run_ok(
        r#"
        local methods = {}
        function methods:answer() return self.n end
        local obj = setmetatable({n = 42}, {__index = methods})
        assert(obj:answer() == 42)
    "#,
    );
}
