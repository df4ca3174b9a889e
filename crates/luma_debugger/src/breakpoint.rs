// Breakpoint store: per-prototype patch tables remembering original
// instructions so traps stay transparent.

use luma::{Instruction, OpCode, Prototype};
use std::collections::HashMap;
use std::rc::Rc;

struct ProtoRecord {
    proto: Rc<Prototype>,
    /// pc -> original instruction, for every installed trap.
    patched: HashMap<usize, u32>,
    /// Subset of `patched` installed as one-shot step traps.
    one_shot: Vec<usize>,
}

/// Keyed by prototype identity (the Rc allocation address).
pub struct BreakpointStore {
    protos: HashMap<usize, ProtoRecord>,
}

fn proto_key(proto: &Rc<Prototype>) -> usize {
    Rc::as_ptr(proto) as usize
}

impl BreakpointStore {
    pub fn new() -> Self {
        BreakpointStore {
            protos: HashMap::new(),
        }
    }

    /// Track a prototype so breakpoints can resolve into it.
    pub fn register(&mut self, proto: &Rc<Prototype>) {
        self.protos.entry(proto_key(proto)).or_insert(ProtoRecord {
            proto: proto.clone(),
            patched: HashMap::new(),
            one_shot: Vec::new(),
        });
    }

    /// First pc of `line` in a registered prototype of `path`
    /// (`@path` chunks only).
    pub fn resolve_line(&self, path: &str, line: u32) -> Option<(Rc<Prototype>, usize)> {
        for record in self.protos.values() {
            let Some(proto_path) = record.proto.file_path() else {
                continue;
            };
            if proto_path != path {
                continue;
            }
            if let Some(pc) = record.proto.line_info.iter().position(|&l| l == line) {
                return Some((record.proto.clone(), pc));
            }
        }
        None
    }

    /// Swap the instruction at pc for the reserved trap, remembering
    /// the original. Idempotent per (proto, pc).
    pub fn install(&mut self, proto: &Rc<Prototype>, pc: usize, one_shot: bool) {
        self.register(proto);
        let record = self.protos.get_mut(&proto_key(proto)).unwrap();
        if record.patched.contains_key(&pc) {
            if one_shot && !record.one_shot.contains(&pc) {
                // Upgrading a persistent trap to also be one-shot would
                // remove it on the next step; leave it persistent.
            }
            return;
        }
        let mut code = proto.code.borrow_mut();
        let original = code[pc];
        code[pc] = Instruction::create_abc(OpCode::DebugBreak, 0, 0, 0);
        record.patched.insert(pc, original);
        if one_shot {
            record.one_shot.push(pc);
        }
    }

    /// Restore the original instruction at pc.
    pub fn remove(&mut self, proto: &Rc<Prototype>, pc: usize) {
        if let Some(record) = self.protos.get_mut(&proto_key(proto)) {
            if let Some(original) = record.patched.remove(&pc) {
                proto.code.borrow_mut()[pc] = original;
                record.one_shot.retain(|&p| p != pc);
            }
        }
    }

    /// Remove every one-shot step trap (across all prototypes).
    pub fn clear_one_shots(&mut self) {
        for record in self.protos.values_mut() {
            let pcs = std::mem::take(&mut record.one_shot);
            for pc in pcs {
                if let Some(original) = record.patched.remove(&pc) {
                    record.proto.code.borrow_mut()[pc] = original;
                }
            }
        }
    }

    /// Original instruction behind a trap, if one is installed here.
    pub fn original_at(&self, proto: &Rc<Prototype>, pc: usize) -> Option<u32> {
        self.protos
            .get(&proto_key(proto))
            .and_then(|r| r.patched.get(&pc).copied())
    }

    pub fn is_one_shot(&self, proto: &Rc<Prototype>, pc: usize) -> bool {
        self.protos
            .get(&proto_key(proto))
            .map(|r| r.one_shot.contains(&pc))
            .unwrap_or(false)
    }

    /// Code as an observer should see it: every trap replaced by its
    /// original instruction.
    pub fn normalized_code(&self, proto: &Rc<Prototype>) -> Vec<u32> {
        let mut code = proto.code_snapshot();
        if let Some(record) = self.protos.get(&proto_key(proto)) {
            for (&pc, &original) in &record.patched {
                code[pc] = original;
            }
        }
        code
    }

    /// Remove every persistent breakpoint, leaving one-shot step traps.
    pub fn clear_persistent(&mut self) {
        for record in self.protos.values_mut() {
            let pcs: Vec<usize> = record
                .patched
                .keys()
                .copied()
                .filter(|pc| !record.one_shot.contains(pc))
                .collect();
            for pc in pcs {
                if let Some(original) = record.patched.remove(&pc) {
                    record.proto.code.borrow_mut()[pc] = original;
                }
            }
        }
    }

    /// Plant one-shot traps on every line start whose line differs from
    /// `current_line`; covers forward flow, branch targets and loop
    /// back-edges alike.
    pub fn plant_step_traps(&mut self, proto: &Rc<Prototype>, current_line: u32) {
        let boundaries: Vec<usize> = {
            let lines = &proto.line_info;
            (0..lines.len())
                .filter(|&pc| {
                    let starts_line = pc == 0 || lines[pc] != lines[pc - 1];
                    starts_line && lines[pc] != current_line
                })
                .collect()
        };
        for pc in boundaries {
            self.install(proto, pc, true);
        }
    }
}

impl Default for BreakpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luma::LuaVM;

    fn proto_of(vm: &mut LuaVM, source: &str, name: &str) -> Rc<Prototype> {
        let func = vm.load_string(source, name).unwrap();
        match func {
            luma::LuaValue::Function(luma::LuaFunction::Lua(c)) => c.proto.clone(),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_install_remove_restores_bits() {
        let mut vm = LuaVM::new();
        let proto = proto_of(&mut vm, "local a = 1\nreturn a", "@bp.lua");
        let before = proto.code_snapshot();
        let mut store = BreakpointStore::new();
        store.install(&proto, 0, false);
        assert_ne!(proto.code_snapshot(), before);
        store.remove(&proto, 0);
        assert_eq!(proto.code_snapshot(), before);
    }

    #[test]
    fn test_normalized_code_matches_original() {
        let mut vm = LuaVM::new();
        let proto = proto_of(&mut vm, "local a = 1\nlocal b = 2\nreturn a + b", "@norm.lua");
        let before = proto.code_snapshot();
        let mut store = BreakpointStore::new();
        store.install(&proto, 0, false);
        store.install(&proto, 2, false);
        // Patched in memory, pristine to observers
        assert_ne!(proto.code_snapshot(), before);
        assert_eq!(store.normalized_code(&proto), before);
    }

    #[test]
    fn test_resolve_line() {
        let mut vm = LuaVM::new();
        let proto = proto_of(&mut vm, "local a = 1\nlocal b = 2\nreturn a", "@res.lua");
        let mut store = BreakpointStore::new();
        store.register(&proto);
        let (found, pc) = store.resolve_line("res.lua", 2).unwrap();
        assert!(Rc::ptr_eq(&found, &proto));
        assert_eq!(proto.line_info[pc], 2);
        assert!(store.resolve_line("other.lua", 2).is_none());
    }

    #[test]
    fn test_clear_one_shots_keeps_persistent() {
        let mut vm = LuaVM::new();
        let proto = proto_of(&mut vm, "local a = 1\nlocal b = 2\nreturn a", "@mix.lua");
        let before = proto.code_snapshot();
        let mut store = BreakpointStore::new();
        store.install(&proto, 0, false);
        store.install(&proto, 1, true);
        store.clear_one_shots();
        // One-shot gone, persistent trap still present
        assert!(store.original_at(&proto, 1).is_none());
        assert!(store.original_at(&proto, 0).is_some());
        assert_eq!(proto.code.borrow()[1], before[1]);
        assert_ne!(proto.code.borrow()[0], before[0]);
    }
}
