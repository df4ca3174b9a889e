// Disassembler: compile a chunk and print its prototype tree.

use luma::{Instruction, LuaFunction, LuaValue, LuaVM, Prototype};
use std::env;
use std::rc::Rc;

fn dump_proto(proto: &Rc<Prototype>, depth: usize) {
    let indent = "  ".repeat(depth);
    let kind = if proto.is_main_chunk() { "main" } else { "function" };
    println!(
        "{}{} <{}:{},{}> ({} instructions)",
        indent,
        kind,
        proto.source_name(),
        proto.line_defined,
        proto.last_line_defined,
        proto.code.borrow().len()
    );
    println!(
        "{}{} params, {} slots, {} upvalues, {} locals, {} constants, {} functions",
        indent,
        proto.num_params,
        proto.max_stack_size,
        proto.upvalues.len(),
        proto.locals.len(),
        proto.constants.len(),
        proto.protos.len()
    );

    let code = proto.code.borrow();
    for (pc, &instr) in code.iter().enumerate() {
        let op = Instruction::get_opcode(instr);
        let line = proto.line_at(pc);
        let operands = match op.get_mode() {
            luma::lua_vm::opcode::OpMode::IABC => format!(
                "{} {} {}",
                Instruction::get_a(instr),
                Instruction::get_b(instr),
                Instruction::get_c(instr)
            ),
            luma::lua_vm::opcode::OpMode::IABx => format!(
                "{} {}",
                Instruction::get_a(instr),
                Instruction::get_bx(instr)
            ),
            luma::lua_vm::opcode::OpMode::IAsBx => format!(
                "{} {}",
                Instruction::get_a(instr),
                Instruction::get_sbx(instr)
            ),
            luma::lua_vm::opcode::OpMode::IAx => format!("{}", Instruction::get_ax(instr)),
        };
        println!("{}  [{:>4}] line {:<4} {:<10} {}", indent, pc, line, op.name(), operands);
    }

    for (i, k) in proto.constants.iter().enumerate() {
        println!("{}  K[{}] = {:?}", indent, i, k);
    }
    for (i, uv) in proto.upvalues.iter().enumerate() {
        println!(
            "{}  U[{}] = {} ({} {})",
            indent,
            i,
            uv.name,
            if uv.in_stack { "register" } else { "upvalue" },
            uv.index
        );
    }
    for local in &proto.locals {
        println!(
            "{}  local {} @r{} [{}..{})",
            indent, local.name, local.register, local.start_pc, local.end_pc
        );
    }

    for nested in &proto.protos {
        dump_proto(nested, depth + 1);
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("usage: bytecode_dump <script.lua>");
        eprintln!("       bytecode_dump -e <source>");
        std::process::exit(1);
    }

    let mut vm = LuaVM::new();
    let loaded = if args[1] == "-e" && args.len() > 2 {
        vm.load_string(&args[2], "=(command line)")
    } else {
        vm.load_file(&args[1])
    };

    match loaded {
        Ok(LuaValue::Function(LuaFunction::Lua(closure))) => {
            dump_proto(&closure.proto, 0);
        }
        Ok(_) => {
            eprintln!("bytecode_dump: chunk did not compile to a Lua closure");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("bytecode_dump: {}", e);
            std::process::exit(1);
        }
    }
}
