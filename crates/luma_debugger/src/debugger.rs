// VmDebugger: the runtime-facing half of the debugger.
//
// Runs entirely on the VM thread through the LuaDebugger hook
// callbacks. An external controller (a DAP reader, a test harness)
// holds the DebugControl end: a command sender and a stop-event
// receiver. The command queue is drained at every hook; when a trap
// publishes a stop, the VM thread blocks on the queue until a resume
// command arrives.

use crate::breakpoint::BreakpointStore;
use crate::protocol::{DebugCommand, FrameSnapshot, StopEvent, StopReason, Variable};
use luma::{LuaClosure, LuaDebugger, LuaThread, LuaValue, Prototype};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepMode {
    Run,
    /// Arm an entry trap on the next pushed frame.
    In,
    /// Trap the caller's resume pc once depth drops below the mark.
    Out { below_depth: usize },
}

struct DebuggerState {
    store: BreakpointStore,
    /// Breakpoints requested by path+line, applied to every prototype
    /// (present and future) whose chunk matches.
    requested: Vec<(String, u32)>,
    step: StepMode,
    stops: usize,
}

impl DebuggerState {
    fn apply_breakpoint_command(&mut self, cmd: &DebugCommand) -> bool {
        match cmd {
            DebugCommand::SetBreakpoint { path, line } => {
                if !self.requested.iter().any(|(p, l)| p == path && l == line) {
                    self.requested.push((path.clone(), *line));
                }
                if let Some((proto, pc)) = self.store.resolve_line(path, *line) {
                    self.store.install(&proto, pc, false);
                }
                true
            }
            DebugCommand::ClearBreakpoint { path, line } => {
                self.requested.retain(|(p, l)| !(p == path && l == line));
                if let Some((proto, pc)) = self.store.resolve_line(path, *line) {
                    self.store.remove(&proto, pc);
                }
                true
            }
            DebugCommand::ClearAllBreakpoints => {
                self.requested.clear();
                self.store.clear_persistent();
                true
            }
            _ => false,
        }
    }

    /// Non-blocking drain of the control queue; resume commands are
    /// ignored outside a stop.
    fn drain(&mut self, commands: &Receiver<DebugCommand>) {
        loop {
            match commands.try_recv() {
                Ok(cmd) => {
                    self.apply_breakpoint_command(&cmd);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }
}

/// Controller half, movable to another OS thread.
pub struct DebugControl {
    pub commands: Sender<DebugCommand>,
    pub events: Receiver<StopEvent>,
}

impl DebugControl {
    pub fn set_breakpoint(&self, path: &str, line: u32) {
        let _ = self.commands.send(DebugCommand::SetBreakpoint {
            path: path.to_string(),
            line,
        });
    }

    pub fn clear_breakpoint(&self, path: &str, line: u32) {
        let _ = self.commands.send(DebugCommand::ClearBreakpoint {
            path: path.to_string(),
            line,
        });
    }

    pub fn resume(&self) {
        let _ = self.commands.send(DebugCommand::Continue);
    }

    pub fn step_over(&self) {
        let _ = self.commands.send(DebugCommand::StepOver);
    }

    pub fn step_in(&self) {
        let _ = self.commands.send(DebugCommand::StepIn);
    }

    pub fn step_out(&self) {
        let _ = self.commands.send(DebugCommand::StepOut);
    }

    /// Block until the VM publishes the next stop.
    pub fn wait_stop(&self) -> Option<StopEvent> {
        self.events.recv().ok()
    }
}

pub struct VmDebugger {
    state: RefCell<DebuggerState>,
    commands: Receiver<DebugCommand>,
    events: Sender<StopEvent>,
}

impl VmDebugger {
    /// Build the VM-side debugger and its controller handle.
    pub fn new() -> (Rc<VmDebugger>, DebugControl) {
        let (command_tx, command_rx) = channel();
        let (event_tx, event_rx) = channel();
        let debugger = Rc::new(VmDebugger {
            state: RefCell::new(DebuggerState {
                store: BreakpointStore::new(),
                requested: Vec::new(),
                step: StepMode::Run,
                stops: 0,
            }),
            commands: command_rx,
            events: event_tx,
        });
        let control = DebugControl {
            commands: command_tx,
            events: event_rx,
        };
        (debugger, control)
    }

    pub fn stop_count(&self) -> usize {
        self.state.borrow().stops
    }

    /// Observer view of a prototype's code: traps normalized away.
    pub fn normalized_code(&self, proto: &Rc<Prototype>) -> Vec<u32> {
        self.state.borrow().store.normalized_code(proto)
    }

    fn build_stop_event(
        thread: &LuaThread,
        trap_pc: usize,
        proto: &Rc<Prototype>,
        reason: StopReason,
    ) -> StopEvent {
        let mut frames = Vec::new();
        let top = thread.frames.len();
        for (i, frame) in thread.frames.iter().enumerate().rev() {
            let fproto = &frame.closure.proto;
            // The stopped frame sits at the trap; callers sit at their
            // in-flight CALL (saved pc points past it)
            let fpc = if i + 1 == top {
                trap_pc
            } else {
                frame.pc.saturating_sub(1)
            };
            let locals = fproto
                .locals_at(fpc)
                .into_iter()
                .map(|local| {
                    let value = thread
                        .stack
                        .get(frame.base + local.register as usize)
                        .cloned()
                        .unwrap_or(LuaValue::Nil);
                    Variable {
                        name: local.name.to_string(),
                        value: value.display(),
                        type_name: value.type_name().to_string(),
                    }
                })
                .collect();
            frames.push(FrameSnapshot {
                source: fproto.source_name(),
                line: fproto.line_at(fpc),
                what: if fproto.is_main_chunk() {
                    "main chunk".to_string()
                } else {
                    "function".to_string()
                },
                locals,
            });
        }
        StopEvent {
            reason,
            source: proto.source_name(),
            line: proto.line_at(trap_pc),
            frames,
        }
    }
}

impl LuaDebugger for VmDebugger {
    fn register_prototype(&self, proto: &Rc<Prototype>) {
        let mut state = self.state.borrow_mut();
        state.drain(&self.commands);
        state.store.register(proto);
        let requested = state.requested.clone();
        for (path, line) in requested {
            if proto.file_path() == Some(path.as_str()) {
                if let Some(pc) = proto.line_info.iter().position(|&l| l == line) {
                    state.store.install(proto, pc, false);
                }
            }
        }
    }

    fn on_frame_push(&self, thread: &LuaThread) {
        let mut state = self.state.borrow_mut();
        state.drain(&self.commands);
        if state.step == StepMode::In {
            if let Some(frame) = thread.frames.last() {
                let proto = frame.closure.proto.clone();
                if !proto.line_info.is_empty() {
                    state.store.install(&proto, 0, true);
                }
            }
            state.step = StepMode::Run;
        }
    }

    fn on_frame_pop(&self, thread: &LuaThread, _popped: &luma::CallFrame) {
        let mut state = self.state.borrow_mut();
        state.drain(&self.commands);
        if let StepMode::Out { below_depth } = state.step {
            if thread.frames.len() < below_depth {
                if let Some(frame) = thread.frames.last() {
                    let proto = frame.closure.proto.clone();
                    let resume_pc = frame.pc;
                    if resume_pc < proto.line_info.len() {
                        state.store.install(&proto, resume_pc, true);
                    }
                }
                state.step = StepMode::Run;
            }
        }
    }

    fn handle_debug_break(&self, thread: &LuaThread, pc: usize, closure: &Rc<LuaClosure>) -> u32 {
        let proto = closure.proto.clone();
        let mut state = self.state.borrow_mut();
        // Read the trap's identity before the drain: a queued clear
        // command may remove this very breakpoint
        let original = state.store.original_at(&proto, pc);
        let one_shot = state.store.is_one_shot(&proto, pc);
        state.drain(&self.commands);
        let Some(original) = original else {
            // Spurious trap (no record): execute whatever is there now
            return proto.code.borrow()[pc];
        };
        if !one_shot && state.store.original_at(&proto, pc).is_none() {
            // The breakpoint was cleared while the trap was in flight
            return original;
        }
        let reason = if one_shot {
            StopReason::Step
        } else {
            StopReason::Breakpoint
        };
        // All one-shot traps come out before the stop is published
        state.store.clear_one_shots();
        state.step = StepMode::Run;
        state.stops += 1;

        let event = Self::build_stop_event(thread, pc, &proto, reason);
        let _ = self.events.send(event);

        // Hold the VM until the controller resumes us
        loop {
            let Ok(cmd) = self.commands.recv() else {
                // Controller hung up: keep running
                break;
            };
            if state.apply_breakpoint_command(&cmd) {
                continue;
            }
            match cmd {
                DebugCommand::Continue => break,
                DebugCommand::StepOver => {
                    let line = proto.line_at(pc);
                    state.store.plant_step_traps(&proto, line);
                    state.step = StepMode::Out {
                        below_depth: thread.frames.len(),
                    };
                    break;
                }
                DebugCommand::StepIn => {
                    let line = proto.line_at(pc);
                    state.store.plant_step_traps(&proto, line);
                    state.step = StepMode::In;
                    break;
                }
                DebugCommand::StepOut => {
                    state.step = StepMode::Out {
                        below_depth: thread.frames.len(),
                    };
                    break;
                }
                _ => {}
            }
        }
        original
    }
}
