// Test module organization
pub mod test_async;
pub mod test_basic;
pub mod test_coroutine;
pub mod test_debug_hooks;
pub mod test_errors;
pub mod test_functions;
pub mod test_metamethods;
pub mod test_stack;
pub mod test_string;
pub mod test_table;
