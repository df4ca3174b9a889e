// Per-function compilation state: emitted code, constant pool with
// dedup, scoped locals, upvalue descriptors, jump patching.

use crate::lua_value::{LocalVar, LuaValue, Prototype, UpvalDesc};
use crate::lua_vm::{Instruction, OpCode};
use ahash::AHashMap;
use smol_str::SmolStr;
use std::cell::RefCell;
use std::rc::Rc;

/// Register ceiling per function (leaves headroom under the 8-bit A field).
pub(crate) const MAX_REGISTERS: usize = 250;

#[derive(Hash, PartialEq, Eq)]
pub(crate) enum ConstKey {
    Nil,
    Bool(bool),
    Num(u64),
    Str(Rc<str>),
}

pub(crate) struct ActiveLocal {
    pub name: SmolStr,
    pub reg: usize,
    pub start_pc: usize,
    pub captured: bool,
}

pub(crate) struct BlockCx {
    pub is_loop: bool,
    pub locals_at_entry: usize,
    pub break_jumps: Vec<usize>,
}

pub(crate) struct FuncState {
    pub chunk_name: SmolStr,
    pub code: Vec<u32>,
    pub line_info: Vec<u32>,
    pub constants: Vec<LuaValue>,
    pub const_map: AHashMap<ConstKey, usize>,
    pub protos: Vec<Rc<Prototype>>,
    pub upvalues: Vec<UpvalDesc>,
    pub locals: Vec<ActiveLocal>,
    pub local_records: Vec<LocalVar>,
    pub blocks: Vec<BlockCx>,
    pub free_reg: usize,
    pub max_stack: usize,
    pub num_params: u8,
    pub is_vararg: bool,
    pub line_defined: u32,
    pub last_line_defined: u32,
}

impl FuncState {
    pub fn new(chunk_name: SmolStr, num_params: u8, is_vararg: bool, line_defined: u32) -> Self {
        FuncState {
            chunk_name,
            code: Vec::new(),
            line_info: Vec::new(),
            constants: Vec::new(),
            const_map: AHashMap::new(),
            protos: Vec::new(),
            upvalues: Vec::new(),
            locals: Vec::new(),
            local_records: Vec::new(),
            blocks: Vec::new(),
            free_reg: 0,
            max_stack: 2,
            num_params,
            is_vararg,
            line_defined,
            last_line_defined: 0,
        }
    }

    #[inline]
    pub fn here(&self) -> usize {
        self.code.len()
    }

    pub fn emit(&mut self, instr: u32, line: u32) -> usize {
        let pc = self.code.len();
        self.code.push(instr);
        self.line_info.push(line);
        pc
    }

    /// Forward jump placeholder; patch with `patch_jump_to`.
    pub fn emit_jump(&mut self, line: u32) -> usize {
        self.emit(Instruction::create_asbx(OpCode::Jmp, 0, 0), line)
    }

    /// Jump that also closes upvalues >= close_reg (A = reg + 1).
    pub fn emit_close_jump(&mut self, close_reg: usize, line: u32) -> usize {
        self.emit(
            Instruction::create_asbx(OpCode::Jmp, close_reg as u32 + 1, 0),
            line,
        )
    }

    pub fn patch_jump_to(&mut self, jump_pc: usize, target: usize) {
        let sbx = target as i64 - (jump_pc as i64 + 1);
        let mut instr = self.code[jump_pc];
        Instruction::set_sbx(&mut instr, sbx as i32);
        self.code[jump_pc] = instr;
    }

    pub fn patch_jump_here(&mut self, jump_pc: usize) {
        let here = self.here();
        self.patch_jump_to(jump_pc, here);
    }

    /// Reserve `n` consecutive registers; returns the first.
    pub fn reserve(&mut self, n: usize) -> Result<usize, String> {
        let first = self.free_reg;
        let new_top = first + n;
        if new_top > MAX_REGISTERS {
            return Err("function or expression needs too many registers".to_string());
        }
        self.free_reg = new_top;
        if new_top > self.max_stack {
            self.max_stack = new_top;
        }
        Ok(first)
    }

    pub fn free_to(&mut self, reg: usize) {
        debug_assert!(reg <= self.free_reg);
        self.free_reg = reg;
    }

    fn const_key(value: &LuaValue) -> ConstKey {
        match value {
            LuaValue::Nil => ConstKey::Nil,
            LuaValue::Boolean(b) => ConstKey::Bool(*b),
            LuaValue::Number(n) => {
                let n = if *n == 0.0 { 0.0 } else { *n };
                ConstKey::Num(n.to_bits())
            }
            LuaValue::String(s) => ConstKey::Str(s.clone()),
            _ => unreachable!("non-scalar constant"),
        }
    }

    /// Intern a constant into the pool, deduplicating.
    pub fn add_constant(&mut self, value: LuaValue) -> usize {
        let key = Self::const_key(&value);
        if let Some(&idx) = self.const_map.get(&key) {
            return idx;
        }
        let idx = self.constants.len();
        self.constants.push(value);
        self.const_map.insert(key, idx);
        idx
    }

    pub fn declare_local(&mut self, name: SmolStr, reg: usize) {
        let start_pc = self.here();
        self.locals.push(ActiveLocal {
            name,
            reg,
            start_pc,
            captured: false,
        });
    }

    pub fn find_local(&self, name: &str) -> Option<usize> {
        self.locals
            .iter()
            .rev()
            .find(|l| l.name == name)
            .map(|l| l.reg)
    }

    pub fn begin_block(&mut self, is_loop: bool) {
        self.blocks.push(BlockCx {
            is_loop,
            locals_at_entry: self.locals.len(),
            break_jumps: Vec::new(),
        });
    }

    pub fn end_block(&mut self) -> BlockCx {
        self.blocks.pop().expect("unbalanced block")
    }

    /// Close the lexical scope back down to `from_len` active locals:
    /// record their spans, free their registers and emit an
    /// upvalue-close jump if any was captured.
    pub fn end_scope(&mut self, from_len: usize, line: u32) {
        let here = self.here() as u32;
        let mut close_reg: Option<usize> = None;
        while self.locals.len() > from_len {
            let l = self.locals.pop().unwrap();
            self.local_records.push(LocalVar {
                name: l.name,
                register: l.reg as u8,
                start_pc: l.start_pc as u32,
                end_pc: here,
            });
            if l.captured {
                close_reg = Some(l.reg);
            }
            self.free_reg = l.reg;
        }
        if let Some(reg) = close_reg {
            self.emit_close_jump(reg, line);
        }
    }

    /// Pop and record locals without emitting a close jump; used when
    /// the following jump instruction carries the close level itself.
    pub fn end_scope_records(&mut self, from_len: usize) {
        let here = self.here() as u32;
        while self.locals.len() > from_len {
            let l = self.locals.pop().unwrap();
            self.local_records.push(LocalVar {
                name: l.name,
                register: l.reg as u8,
                start_pc: l.start_pc as u32,
                end_pc: here,
            });
            self.free_reg = l.reg;
        }
    }

    /// A-field for a break/loop-back jump that must close per-iteration
    /// upvalues; 0 when nothing is captured in scope since `from_len`.
    pub fn close_level_since(&self, from_len: usize) -> u32 {
        for l in &self.locals[from_len.min(self.locals.len())..] {
            if l.captured {
                return l.reg as u32 + 1;
            }
        }
        0
    }

    /// Finish compilation and produce the immutable prototype.
    pub fn into_prototype(mut self, end_line: u32) -> Prototype {
        self.last_line_defined = end_line;
        // Close any remaining scope (function parameters)
        let here = self.here() as u32;
        while let Some(l) = self.locals.pop() {
            self.local_records.push(LocalVar {
                name: l.name,
                register: l.reg as u8,
                start_pc: l.start_pc as u32,
                end_pc: here,
            });
        }
        Prototype {
            chunk_name: self.chunk_name,
            line_defined: self.line_defined,
            last_line_defined: self.last_line_defined,
            num_params: self.num_params,
            is_vararg: self.is_vararg,
            max_stack_size: self.max_stack.max(2) as u8,
            code: RefCell::new(self.code),
            constants: self.constants,
            upvalues: self.upvalues,
            line_info: self.line_info,
            locals: self.local_records,
            protos: self.protos,
        }
    }
}
