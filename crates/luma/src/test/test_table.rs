// Table semantics and the table library
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
fn test_constructor_forms() {
    run_ok(
        r#"
        local t = {1, 2, 3, x = "a", ["y"] = "b", [10] = "c"}
        assert(t[1] == 1 and t[3] == 3)
        assert(t.x == "a" and t.y == "b" and t[10] == "c")
        assert(#t == 3)
    "#,
    );
}

#[test]
fn test_length_border() {
    run_ok(
        r#"
        local t = {1, 2, 3, 4, 5}
        assert(#t == 5)
        t[5] = nil
        assert(#t == 4)
        t = {}
        assert(#t == 0)
        -- out-of-order fill still reaches a dense border
        local u = {}
        u[2] = true; u[1] = true; u[3] = true
        assert(#u == 3)
    "#,
    );
}

#[test]
fn test_nil_deletes_keys() {
    run_ok(
        r#"
        local t = {a = 1}
        t.a = nil
        assert(next(t) == nil)
        local ok = pcall(function() t[nil] = 1 end)
        assert(ok == false)
        local ok2 = pcall(function() t[0/0] = 1 end)
        assert(ok2 == false)
    "#,
    );
}

#[test]
fn test_pairs_visits_each_key_once_in_order() {
    run_ok(
        r#"
        local t = {10, 20, 30}
        t.a = 1
        t.b = 2
        local keys = {}
        for k in pairs(t) do keys[#keys + 1] = k end
        assert(#keys == 5)
        -- array part first, in index order
        assert(keys[1] == 1 and keys[2] == 2 and keys[3] == 3)
        -- hash part in insertion order
        assert(keys[4] == "a" and keys[5] == "b")
    "#,
    );
}

#[test]
fn test_ipairs_stops_at_hole() {
    run_ok(
        r#"
        local t = {1, 2, nil, 4}
        local count = 0
        for i, v in ipairs(t) do count = count + 1 end
        assert(count == 2)
    "#,
    );
}

#[test]
fn test_delete_current_key_during_next() {
    run_ok(
        r#"
        local t = {a = 1, b = 2, c = 3}
        local seen = 0
        for k in pairs(t) do
            seen = seen + 1
            t[k] = nil
        end
        assert(seen == 3)
        assert(next(t) == nil)
    "#,
    );
}

#[test]
fn test_generic_for_with_next() {
    run_ok(
        r#"
        local t = {x = 1, y = 2}
        local total = 0
        for k, v in next, t do total = total + v end
        assert(total == 3)
    "#,
    );
}

#[test]
fn test_insert_remove() {
    run_ok(
        r#"
        local t = {}
        table.insert(t, "a")
        table.insert(t, "c")
        table.insert(t, 2, "b")
        assert(t[1] == "a" and t[2] == "b" and t[3] == "c")
        local removed = table.remove(t, 1)
        assert(removed == "a" and t[1] == "b" and #t == 2)
        assert(table.remove(t) == "c")
        assert(#t == 1)
    "#,
    );
}

#[test]
fn test_concat_unpack_pack() {
    run_ok(
        r#"
        assert(table.concat({1, 2, 3}, "-") == "1-2-3")
        assert(table.concat({}) == "")
        local a, b = table.unpack({7, 8})
        assert(a == 7 and b == 8)
        local p = table.pack(4, 5, 6)
        assert(p.n == 3 and p[2] == 5)
    "#,
    );
}

#[test]
fn test_sort() {
    run_ok(
        r#"
        local t = {5, 2, 8, 1, 9, 3}
        table.sort(t)
        assert(table.concat(t, ",") == "1,2,3,5,8,9")
        table.sort(t, function(a, b) return a > b end)
        assert(table.concat(t, ",") == "9,8,5,3,2,1")
        local words = {"pear", "apple", "fig"}
        table.sort(words)
        assert(words[1] == "apple" and words[3] == "pear")
    "#,
    );
}

#[test]
fn test_setlist_large_constructor() {
    // Crosses the SETLIST flush boundary
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    let mut src = String::from("local t = {");
    for i in 1..=120 {
        src.push_str(&format!("{},", i));
    }
    src.push_str("} return #t, t[1], t[60], t[120]");
    let results = vm.execute(&src).unwrap();
    let nums: Vec<f64> = results.iter().filter_map(|v| v.as_number()).collect();
    assert_eq!(nums, vec![120.0, 1.0, 60.0, 120.0]);
}

#[test]
fn test_shared_reference_semantics() {
    run_ok(
        r#"
        local a = {}
        local b = a
        b.x = 1
        assert(a.x == 1)
        assert(a == b)
        assert({} ~= {})
    "#,
    );
}
