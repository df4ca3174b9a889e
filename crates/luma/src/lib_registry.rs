// Library registration: how host code (including the bundled stdlib)
// exposes functions and values to Lua.

use crate::lua_value::{HostFn, HostFunction, LuaValue};
use crate::lua_vm::{LuaResult, LuaVM};

/// Creates a value when the module loads (constants like math.pi).
pub type ValueInitializer = fn(&mut LuaVM) -> LuaValue;

pub enum LibraryEntry {
    Function(HostFn),
    /// A function participating in the yield protocol.
    Yieldable(HostFn),
    Value(ValueInitializer),
}

/// A library module: named functions and values, loaded as one table
/// (or straight into the globals for `_G`).
pub struct LibraryModule {
    pub name: &'static str,
    pub entries: Vec<(&'static str, LibraryEntry)>,
}

impl LibraryModule {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Vec::new(),
        }
    }

    pub fn with_function(mut self, name: &'static str, func: HostFn) -> Self {
        self.entries.push((name, LibraryEntry::Function(func)));
        self
    }

    pub fn with_yieldable(mut self, name: &'static str, func: HostFn) -> Self {
        self.entries.push((name, LibraryEntry::Yieldable(func)));
        self
    }

    pub fn with_value(mut self, name: &'static str, init: ValueInitializer) -> Self {
        self.entries.push((name, LibraryEntry::Value(init)));
        self
    }
}

/// Builder macro for library modules.
#[macro_export]
macro_rules! lib_module {
    ($name:expr, {
        $($item_name:expr => $item:expr),* $(,)?
    }) => {{
        let mut module = $crate::lib_registry::LibraryModule::new($name);
        $(
            module.entries.push(($item_name, $crate::lib_registry::LibraryEntry::Function($item)));
        )*
        module
    }};
}

/// Registry of library modules, loaded in insertion order.
pub struct LibraryRegistry {
    modules: Vec<LibraryModule>,
}

impl LibraryRegistry {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    pub fn register(&mut self, module: LibraryModule) {
        self.modules.push(module);
    }

    pub fn load_all(&self, vm: &mut LuaVM) -> LuaResult<()> {
        for module in &self.modules {
            self.load_module(vm, module)?;
        }
        Ok(())
    }

    pub fn load_module(&self, vm: &mut LuaVM, module: &LibraryModule) -> LuaResult<()> {
        if module.name == "_G" {
            for (name, entry) in &module.entries {
                let value = Self::make_value(vm, name, entry);
                vm.set_global(name, value);
            }
            return Ok(());
        }

        let lib_table = vm.new_table_with(0, module.entries.len());
        for (name, entry) in &module.entries {
            let value = Self::make_value(vm, name, entry);
            let key = vm.new_string(name);
            if let Some(t) = lib_table.as_table() {
                let _ = t.borrow_mut().raw_set(key, value);
            }
        }
        vm.set_global(module.name, lib_table.clone());

        // All strings share a metatable whose __index is the string
        // library, enabling ("x"):upper() style calls
        if module.name == "string" {
            let mt = vm.new_table_with(0, 1);
            let index_key = vm.new_string("__index");
            if let Some(t) = mt.as_table() {
                let _ = t.borrow_mut().raw_set(index_key, lib_table);
            }
            vm.set_string_metatable(mt);
        }
        Ok(())
    }

    fn make_value(vm: &mut LuaVM, name: &'static str, entry: &LibraryEntry) -> LuaValue {
        match entry {
            LibraryEntry::Function(f) => LuaValue::host_function(HostFunction::new(name, *f)),
            LibraryEntry::Yieldable(f) => {
                LuaValue::host_function(HostFunction::new_yieldable(name, *f))
            }
            LibraryEntry::Value(init) => init(vm),
        }
    }

    pub fn get_module(&self, name: &str) -> Option<&LibraryModule> {
        self.modules.iter().find(|m| m.name == name)
    }
}

impl Default for LibraryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry holding every bundled standard library.
pub fn create_standard_registry() -> LibraryRegistry {
    let mut registry = LibraryRegistry::new();
    registry.register(crate::stdlib::basic::create_basic_lib());
    registry.register(crate::stdlib::string::create_string_lib());
    registry.register(crate::stdlib::table::create_table_lib());
    registry.register(crate::stdlib::math::create_math_lib());
    registry.register(crate::stdlib::io::create_io_lib());
    registry.register(crate::stdlib::os::create_os_lib());
    registry.register(crate::stdlib::coroutine::create_coroutine_lib());
    registry
}
