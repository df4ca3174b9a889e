// Standalone interpreter in the style of the reference `lua` binary.

use luma::{LuaValue, LuaVM};
use std::env;
use std::io::{self, BufRead, Write};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const VERSION: &str = "Luma 5.1 (compatible)";

fn print_usage() {
    eprintln!("usage: luma [options] [script [args]]");
    eprintln!("Available options are:");
    eprintln!("  -e stat        execute string 'stat'");
    eprintln!("  -i             enter interactive mode after executing 'script'");
    eprintln!("  -b file:line   trace a breakpoint (may be repeated)");
    eprintln!("  -v             show version information");
    eprintln!("  --             stop handling options");
}

#[derive(Default)]
struct Options {
    execute_strings: Vec<String>,
    interactive: bool,
    script_file: Option<String>,
    script_args: Vec<String>,
    breakpoints: Vec<(String, u32)>,
    show_version: bool,
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();
    let mut opts = Options::default();
    let mut stop_options = false;
    let mut i = 1;
    while i < args.len() {
        let arg = &args[i];
        if !stop_options && arg.starts_with('-') && arg.len() > 1 {
            match arg.as_str() {
                "-e" => {
                    i += 1;
                    if i >= args.len() {
                        return Err("'-e' needs argument".to_string());
                    }
                    opts.execute_strings.push(args[i].clone());
                }
                "-i" => opts.interactive = true,
                "-b" => {
                    i += 1;
                    if i >= args.len() {
                        return Err("'-b' needs argument".to_string());
                    }
                    let spec = &args[i];
                    let (path, line) = spec
                        .rsplit_once(':')
                        .ok_or_else(|| format!("bad breakpoint '{}'", spec))?;
                    let line: u32 = line
                        .parse()
                        .map_err(|_| format!("bad breakpoint line in '{}'", spec))?;
                    opts.breakpoints.push((path.to_string(), line));
                }
                "-v" => opts.show_version = true,
                "--" => stop_options = true,
                other => return Err(format!("unrecognized option '{}'", other)),
            }
        } else if opts.script_file.is_none() {
            opts.script_file = Some(arg.clone());
        } else {
            opts.script_args.push(arg.clone());
        }
        i += 1;
    }
    Ok(opts)
}

fn report(result: luma::LuaResult<Vec<LuaValue>>) -> bool {
    match result {
        Ok(_) => true,
        Err(e) => {
            eprintln!("luma: {}", e);
            if let Some(tb) = e.traceback() {
                eprintln!("{}", tb);
            }
            false
        }
    }
}

fn repl(vm: &mut LuaVM) {
    println!("{}", VERSION);
    let stdin = io::stdin();
    loop {
        print!("> ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(_) => break,
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        // Expression first (prints its value), statement as fallback
        let as_expr = format!("return {}", line);
        let result = match vm.load_string(&as_expr, "=stdin") {
            Ok(func) => vm.call(func, Vec::new()),
            Err(_) => vm.execute(line),
        };
        match result {
            Ok(values) => {
                if !values.is_empty() {
                    let rendered: Vec<String> =
                        values.iter().map(|v| v.display()).collect();
                    println!("{}", rendered.join("\t"));
                }
            }
            Err(e) => eprintln!("luma: {}", e),
        }
    }
}

fn main() {
    let opts = match parse_args() {
        Ok(o) => o,
        Err(msg) => {
            eprintln!("luma: {}", msg);
            print_usage();
            std::process::exit(1);
        }
    };

    if opts.show_version {
        println!("{}", VERSION);
        if opts.execute_strings.is_empty() && opts.script_file.is_none() {
            return;
        }
    }

    let mut vm = LuaVM::new();
    if let Err(e) = vm.open_libs() {
        eprintln!("luma: failed to open libraries: {}", e);
        std::process::exit(1);
    }

    // Breakpoint tracing: stops print and execution continues, with
    // the controller on its own thread as a debug adapter would be
    if !opts.breakpoints.is_empty() {
        let (debugger, control) = luma_debugger::VmDebugger::new();
        vm.set_debugger(debugger);
        for (path, line) in &opts.breakpoints {
            control.set_breakpoint(path, *line);
        }
        std::thread::spawn(move || {
            while let Some(stop) = control.wait_stop() {
                eprintln!("luma: breakpoint at {}:{}", stop.source, stop.line);
                if let Some(frame) = stop.frames.first() {
                    for var in &frame.locals {
                        eprintln!("    {} = {} ({})", var.name, var.value, var.type_name);
                    }
                }
                control.resume();
            }
        });
    }

    // Script arguments live in the conventional `arg` table
    if let Some(script) = &opts.script_file {
        let arg_table = vm.new_table_with(opts.script_args.len(), 1);
        if let Some(t) = arg_table.as_table() {
            let mut t = t.borrow_mut();
            let name = script.clone();
            let _ = t.raw_set(LuaValue::Number(0.0), LuaValue::String(name.into()));
            for (i, a) in opts.script_args.iter().enumerate() {
                t.raw_seti((i + 1) as i64, LuaValue::String(a.as_str().into()));
            }
        }
        vm.set_global("arg", arg_table);
    }

    let mut ok = true;
    for chunk in &opts.execute_strings {
        ok &= report(vm.execute(chunk));
    }
    if let Some(script) = &opts.script_file {
        ok &= report(vm.execute_file(script));
    }
    if opts.interactive || (opts.execute_strings.is_empty() && opts.script_file.is_none()) {
        repl(&mut vm);
    }
    if !ok {
        std::process::exit(1);
    }
}
