// Wire-ready protocol types exchanged with a debug-adapter frontend.
// Only plain data crosses the thread boundary: paths, lines, action
// tags, stringified values.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum DebugCommand {
    SetBreakpoint { path: String, line: u32 },
    ClearBreakpoint { path: String, line: u32 },
    ClearAllBreakpoints,
    Continue,
    StepOver,
    StepIn,
    StepOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    Breakpoint,
    Step,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    pub value: String,
    pub type_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameSnapshot {
    pub source: String,
    pub line: u32,
    pub what: String,
    pub locals: Vec<Variable>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopEvent {
    pub reason: StopReason,
    pub source: String,
    pub line: u32,
    pub frames: Vec<FrameSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_round_trips_through_json() {
        let cmd = DebugCommand::SetBreakpoint {
            path: "t.lua".to_string(),
            line: 2,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        let back: DebugCommand = serde_json::from_str(&json).unwrap();
        match back {
            DebugCommand::SetBreakpoint { path, line } => {
                assert_eq!(path, "t.lua");
                assert_eq!(line, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_stop_event_serializes() {
        let event = StopEvent {
            reason: StopReason::Breakpoint,
            source: "t.lua".to_string(),
            line: 2,
            frames: vec![FrameSnapshot {
                source: "t.lua".to_string(),
                line: 2,
                what: "main chunk".to_string(),
                locals: vec![Variable {
                    name: "x".to_string(),
                    value: "1".to_string(),
                    type_name: "number".to_string(),
                }],
            }],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"breakpoint\""));
        assert!(json.contains("\"t.lua\""));
    }
}
