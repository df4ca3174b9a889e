// Debugger layer over the luma runtime: transparent breakpoints via
// instruction patching, step control, frame introspection, and a
// thread-safe command queue for an external (e.g. JSON-RPC) controller.
//
// All code patching happens on the VM thread inside the runtime's hook
// callbacks; the controller thread only ever touches the command
// channel, which carries plain data.

mod breakpoint;
mod debugger;
pub mod protocol;

pub use breakpoint::BreakpointStore;
pub use debugger::{DebugControl, VmDebugger};
pub use protocol::{DebugCommand, FrameSnapshot, StopEvent, StopReason, Variable};
