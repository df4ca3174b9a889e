// Compiler front-end: lexer -> parser -> register-bytecode codegen.
// The parser builds a syntax tree; codegen lowers it function by
// function through a stack of FuncStates (innermost last), which is
// also how upvalue capture walks enclosing scopes.

pub mod ast;
mod expr;
mod func_state;
mod lexer;
mod parser;
mod stmt;

pub use lexer::{Lexer, Token};
pub use parser::Parser;

use crate::compiler::ast::{Block, FuncBody};
use crate::compiler::func_state::FuncState;
use crate::lua_value::{Prototype, UpvalDesc, format_source};
use crate::lua_vm::{Instruction, OpCode, StringInterner};
use smol_str::SmolStr;
use std::rc::Rc;

pub type CompileResult<T> = Result<T, String>;

/// Variable access classes resolved by the scope walk.
pub(crate) enum VarAccess {
    Local(usize),
    Upvalue(usize),
    Global(SmolStr),
}

pub(crate) struct Compiler<'a> {
    pub(crate) interner: &'a mut StringInterner,
    pub(crate) chunk_name: SmolStr,
    pub(crate) states: Vec<FuncState>,
    /// Line of the statement being compiled (error positions).
    pub(crate) cur_line: u32,
}

/// Compile a source chunk into its root prototype.
/// Main chunks are vararg and carry `_ENV` as upvalue 0.
pub fn compile(
    source: &str,
    chunk_name: &str,
    interner: &mut StringInterner,
) -> CompileResult<Prototype> {
    let mut parser = Parser::new(source)
        .map_err(|e| format!("{}:1: {}", format_source(chunk_name), e))?;
    let block = parser
        .parse_chunk()
        .map_err(|e| format!("{}:{}: {}", format_source(chunk_name), parser.line, e))?;

    let mut root = FuncState::new(SmolStr::new(chunk_name), 0, true, 0);
    root.upvalues.push(UpvalDesc {
        name: SmolStr::new("_ENV"),
        in_stack: false,
        index: 0,
    });

    let mut compiler = Compiler {
        interner,
        chunk_name: SmolStr::new(chunk_name),
        states: vec![root],
        cur_line: 1,
    };
    compiler
        .compile_block(&block)
        .map_err(|e| compiler.position_error(e))?;

    let end_line = parser.line;
    let mut fs = compiler.states.pop().unwrap();
    fs.emit(
        Instruction::create_abc(OpCode::Return, 0, 1, 0),
        end_line,
    );
    Ok(fs.into_prototype(end_line))
}

impl<'a> Compiler<'a> {
    #[inline]
    pub(crate) fn cur(&mut self) -> &mut FuncState {
        self.states.last_mut().unwrap()
    }

    pub(crate) fn position_error(&self, message: String) -> String {
        if message.contains(':') && message.starts_with(format_source(&self.chunk_name).as_str()) {
            return message;
        }
        format!(
            "{}:{}: {}",
            format_source(&self.chunk_name),
            self.cur_line,
            message
        )
    }

    /// Resolve a name: active local, upvalue (possibly created through
    /// the enclosing-function chain), or global.
    pub(crate) fn resolve_var(&mut self, name: &SmolStr) -> VarAccess {
        let top = self.states.len() - 1;
        if let Some(reg) = self.states[top].find_local(name) {
            return VarAccess::Local(reg);
        }
        if let Some(idx) = self.find_upvalue(top, name) {
            return VarAccess::Upvalue(idx);
        }
        VarAccess::Global(name.clone())
    }

    fn find_upvalue(&mut self, state_idx: usize, name: &SmolStr) -> Option<usize> {
        if let Some(idx) = self.states[state_idx]
            .upvalues
            .iter()
            .position(|u| u.name == *name)
        {
            return Some(idx);
        }
        if state_idx == 0 {
            return None;
        }
        let parent = state_idx - 1;
        if let Some(reg) = self.states[parent].find_local(name) {
            // Mark the parent local captured so scope exits close it
            for l in self.states[parent].locals.iter_mut().rev() {
                if l.name == *name {
                    l.captured = true;
                    break;
                }
            }
            let idx = self.states[state_idx].upvalues.len();
            self.states[state_idx].upvalues.push(UpvalDesc {
                name: name.clone(),
                in_stack: true,
                index: reg as u8,
            });
            return Some(idx);
        }
        if let Some(parent_idx) = self.find_upvalue(parent, name) {
            let idx = self.states[state_idx].upvalues.len();
            self.states[state_idx].upvalues.push(UpvalDesc {
                name: name.clone(),
                in_stack: false,
                index: parent_idx as u8,
            });
            return Some(idx);
        }
        None
    }

    /// Access path for `_ENV` (always resolvable: the root carries it).
    pub(crate) fn resolve_env(&mut self) -> VarAccess {
        self.resolve_var(&SmolStr::new("_ENV"))
    }

    /// Compile a nested function body; returns its index in the
    /// enclosing prototype's proto list.
    pub(crate) fn compile_function(&mut self, body: &FuncBody) -> CompileResult<usize> {
        let fs = FuncState::new(
            self.chunk_name.clone(),
            body.params.len() as u8,
            body.is_vararg,
            body.line,
        );
        self.states.push(fs);
        for (i, p) in body.params.iter().enumerate() {
            self.cur().reserve(1)?;
            self.cur().declare_local(p.clone(), i);
        }
        self.compile_block(&body.block)?;
        let end_line = body.end_line;
        self.cur()
            .emit(Instruction::create_abc(OpCode::Return, 0, 1, 0), end_line);
        let fs = self.states.pop().unwrap();
        let proto = Rc::new(fs.into_prototype(end_line));
        let parent = self.cur();
        let idx = parent.protos.len();
        parent.protos.push(proto);
        Ok(idx)
    }

    pub(crate) fn compile_block(&mut self, block: &Block) -> CompileResult<()> {
        for stmt in &block.stmts {
            self.compile_statement(stmt)?;
        }
        Ok(())
    }

    /// Compile a block in its own lexical scope.
    pub(crate) fn compile_scoped_block(&mut self, block: &Block, line: u32) -> CompileResult<()> {
        let locals_len = self.cur().locals.len();
        self.compile_block(block)?;
        self.cur().end_scope(locals_len, line);
        Ok(())
    }
}
