// Pending host calls: suspension tokens driven from an async executor
use crate::*;

#[test]
fn test_pending_host_call_completes() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    vm.register_yieldable_function("fetch", |ctx| Err(ctx.suspend_pending()));
    let func = vm.load_string("return fetch() + 1", "=pending").unwrap();
    let outcome = vm.run(func, vec![]).unwrap();
    let token = match outcome {
        RunOutcome::Pending(token) => token,
        RunOutcome::Done(_) => panic!("expected suspension"),
    };
    let outcome = vm
        .complete_pending(token, vec![LuaValue::Number(41.0)])
        .unwrap();
    match outcome {
        RunOutcome::Done(results) => assert_eq!(results[0].as_number(), Some(42.0)),
        RunOutcome::Pending(_) => panic!("expected completion"),
    }
}

#[test]
fn test_pending_twice_in_sequence() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    vm.register_yieldable_function("await_next", |ctx| Err(ctx.suspend_pending()));
    let func = vm
        .load_string("return await_next() + await_next()", "=pending2")
        .unwrap();
    let mut outcome = vm.run(func, vec![]).unwrap();
    let mut delivered = 10.0;
    loop {
        match outcome {
            RunOutcome::Pending(token) => {
                outcome = vm
                    .complete_pending(token, vec![LuaValue::Number(delivered)])
                    .unwrap();
                delivered += 10.0;
            }
            RunOutcome::Done(results) => {
                assert_eq!(results[0].as_number(), Some(30.0));
                break;
            }
        }
    }
}

#[tokio::test]
async fn test_pending_driven_by_tokio() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    vm.register_yieldable_function("sleep_for_answer", |ctx| Err(ctx.suspend_pending()));
    let func = vm
        .load_string("return sleep_for_answer() * 2", "=async")
        .unwrap();
    let token = match vm.run(func, vec![]).unwrap() {
        RunOutcome::Pending(token) => token,
        RunOutcome::Done(_) => panic!("expected suspension"),
    };
    // The awaitable resolves on the executor; the VM resumes after
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    match vm.complete_pending(token, vec![LuaValue::Number(21.0)]).unwrap() {
        RunOutcome::Done(results) => assert_eq!(results[0].as_number(), Some(42.0)),
        RunOutcome::Pending(_) => panic!("expected completion"),
    }
}

#[test]
fn test_pending_inside_coroutine_is_rejected() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    vm.register_yieldable_function("fetch", |ctx| Err(ctx.suspend_pending()));
    let results = vm
        .execute(
            r#"
            local co = coroutine.create(function() return fetch() end)
            local ok, err = coroutine.resume(co)
            return ok, err
        "#,
        )
        .unwrap();
    assert!(!results[0].is_truthy());
    let msg = results[1].as_str().unwrap().to_string();
    assert!(msg.contains("suspend"), "got {}", msg);
}

#[test]
fn test_wrong_pending_token_rejected() {
    let mut vm = LuaVM::new();
    vm.open_libs().unwrap();
    vm.register_yieldable_function("fetch", |ctx| Err(ctx.suspend_pending()));
    let func = vm.load_string("return fetch()", "=tok").unwrap();
    match vm.run(func, vec![]).unwrap() {
        RunOutcome::Pending(token) => {
            assert!(vm.complete_pending(token + 999, vec![]).is_err());
            // The real token still works
            let done = vm.complete_pending(token, vec![LuaValue::Nil]).unwrap();
            assert!(matches!(done, RunOutcome::Done(_)));
        }
        RunOutcome::Done(_) => panic!("expected suspension"),
    }
}
