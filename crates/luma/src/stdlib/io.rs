// Minimal io: write to stdout, read a line/number/all from stdin.
// File handles are host territory and stay outside the runtime.

use crate::lib_registry::LibraryModule;
use crate::lua_value::{LuaValue, number_to_string};
use crate::lua_vm::{LuaContext, LuaResult};
use std::io::{BufRead, Read, Write};

pub fn create_io_lib() -> LibraryModule {
    crate::lib_module!("io", {
        "write" => io_write,
        "read" => io_read,
    })
}

fn io_write(ctx: &mut LuaContext) -> LuaResult<usize> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for i in 1..=ctx.arg_count() {
        match ctx.arg(i) {
            LuaValue::String(s) => {
                let _ = out.write_all(s.as_bytes());
            }
            LuaValue::Number(n) => {
                let _ = out.write_all(number_to_string(n).as_bytes());
            }
            _ => return Err(ctx.bad_argument(i, "string")),
        }
    }
    let _ = out.flush();
    Ok(0)
}

fn io_read(ctx: &mut LuaContext) -> LuaResult<usize> {
    let mode = ctx.opt_string(1, "l")?;
    let mode = mode.trim_start_matches('*');
    let stdin = std::io::stdin();
    match mode.chars().next().unwrap_or('l') {
        'l' | 'L' => {
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => ctx.push(LuaValue::Nil),
                Ok(_) => {
                    if mode.starts_with('l') {
                        while line.ends_with('\n') || line.ends_with('\r') {
                            line.pop();
                        }
                    }
                    let v = ctx.vm().new_string_owned(line);
                    ctx.push(v);
                }
                Err(_) => ctx.push(LuaValue::Nil),
            }
        }
        'n' => {
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(_) => match line.trim().parse::<f64>() {
                    Ok(n) => ctx.push(LuaValue::Number(n)),
                    Err(_) => ctx.push(LuaValue::Nil),
                },
                Err(_) => ctx.push(LuaValue::Nil),
            }
        }
        'a' => {
            let mut all = String::new();
            let _ = stdin.lock().read_to_string(&mut all);
            let v = ctx.vm().new_string_owned(all);
            ctx.push(v);
        }
        _ => return Err(ctx.bad_argument(1, "valid read mode")),
    }
    Ok(1)
}
