use crate::lua_value::LuaValue;
use smol_str::SmolStr;
use std::cell::RefCell;
use std::rc::Rc;

/// Descriptor of one upvalue of a prototype: captured either from the
/// enclosing function's register (`in_stack`) or from its upvalue list.
#[derive(Debug, Clone)]
pub struct UpvalDesc {
    pub name: SmolStr,
    pub in_stack: bool,
    pub index: u8,
}

/// A local variable's register and bytecode scope, recorded for frame
/// introspection.
#[derive(Debug, Clone)]
pub struct LocalVar {
    pub name: SmolStr,
    pub register: u8,
    pub start_pc: u32,
    pub end_pc: u32,
}

/// Immutable compiled function body.
///
/// The single exception to immutability is `code`: the debugger patches
/// instructions in place to install traps, always from the VM thread.
pub struct Prototype {
    /// Chunk name; `@path` marks a file-sourced chunk, `=name` an opaque
    /// source, anything else a literal source string.
    pub chunk_name: SmolStr,
    pub line_defined: u32,
    pub last_line_defined: u32,
    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack_size: u8,
    pub code: RefCell<Vec<u32>>,
    pub constants: Vec<LuaValue>,
    pub upvalues: Vec<UpvalDesc>,
    /// Source line per instruction; always the same length as `code`.
    pub line_info: Vec<u32>,
    pub locals: Vec<LocalVar>,
    pub protos: Vec<Rc<Prototype>>,
}

impl Prototype {
    /// Source line for a pc, 0 when out of range.
    #[inline]
    pub fn line_at(&self, pc: usize) -> u32 {
        self.line_info.get(pc).copied().unwrap_or(0)
    }

    /// Copy of the code array as currently stored (may contain traps).
    pub fn code_snapshot(&self) -> Vec<u32> {
        self.code.borrow().clone()
    }

    /// Is this prototype sourced from a file (`@path` chunk name)?
    pub fn file_path(&self) -> Option<&str> {
        self.chunk_name.strip_prefix('@')
    }

    /// Short display form of the chunk name for messages and tracebacks.
    pub fn source_name(&self) -> String {
        format_source(&self.chunk_name)
    }

    /// Locals whose scope contains `pc`.
    pub fn locals_at(&self, pc: usize) -> Vec<&LocalVar> {
        let pc = pc as u32;
        self.locals
            .iter()
            .filter(|l| l.start_pc <= pc && pc < l.end_pc)
            .collect()
    }

    pub fn is_main_chunk(&self) -> bool {
        self.line_defined == 0
    }
}

/// Format a chunk name the way error messages display it:
/// `@path` -> `path`, `=name` -> `name`, otherwise a quoted excerpt.
pub fn format_source(chunk_name: &str) -> String {
    if let Some(path) = chunk_name.strip_prefix('@') {
        return path.to_string();
    }
    if let Some(name) = chunk_name.strip_prefix('=') {
        return name.to_string();
    }
    let first_line = chunk_name.lines().next().unwrap_or("");
    let excerpt: String = first_line.chars().take(40).collect();
    if excerpt.len() < chunk_name.len() {
        format!("[string \"{}...\"]", excerpt)
    } else {
        format!("[string \"{}\"]", excerpt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_source() {
        assert_eq!(format_source("@test.lua"), "test.lua");
        assert_eq!(format_source("=stdin"), "stdin");
        assert_eq!(format_source("return 1"), "[string \"return 1\"]");
    }
}
