use crate::lua_value::LuaValue;

pub type LuaResult<T> = Result<T, LuaError>;

/// Error and control signal of the runtime.
///
/// Coroutine yields and pending host calls ride the error channel so
/// that they unwind the dispatch loop exactly like errors do, without a
/// second plumbing path; protected calls catch only the error variants
/// and let the control variants pass through.
#[derive(Debug, Clone)]
pub enum LuaError {
    /// A raised Lua error: value, kind tag and captured traceback.
    Runtime(Box<RuntimeError>),
    /// Compile error; `load`-style APIs return it as (nil, message).
    Compile(String),
    /// Coroutine yield in flight, carrying the yielded values.
    Yield(Vec<LuaValue>),
    /// A host function suspended on a pending awaitable.
    Pending(u64),
    /// Host-requested cancellation. Protected calls observe it but
    /// cannot swallow it; the runtime re-raises.
    Cancelled,
    /// Value-stack or call-depth overflow.
    StackOverflow,
}

/// Kind tag of a raised error, surfaced to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Runtime,
    Assertion,
    BadArgument,
}

#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub value: LuaValue,
    pub kind: ErrorKind,
    pub traceback: Option<String>,
}

impl LuaError {
    pub fn runtime(message: String) -> Self {
        LuaError::Runtime(Box::new(RuntimeError {
            value: LuaValue::String(message.into()),
            kind: ErrorKind::Runtime,
            traceback: None,
        }))
    }

    pub fn runtime_value(value: LuaValue) -> Self {
        LuaError::Runtime(Box::new(RuntimeError {
            value,
            kind: ErrorKind::Runtime,
            traceback: None,
        }))
    }

    pub fn assertion(value: LuaValue) -> Self {
        LuaError::Runtime(Box::new(RuntimeError {
            value,
            kind: ErrorKind::Assertion,
            traceback: None,
        }))
    }

    pub fn bad_argument(message: String) -> Self {
        LuaError::Runtime(Box::new(RuntimeError {
            value: LuaValue::String(message.into()),
            kind: ErrorKind::BadArgument,
            traceback: None,
        }))
    }

    /// The Lua error value a protected call would deliver.
    pub fn error_value(&self) -> LuaValue {
        match self {
            LuaError::Runtime(e) => e.value.clone(),
            LuaError::Compile(msg) => LuaValue::String(msg.as_str().into()),
            LuaError::Cancelled => LuaValue::String("cancelled".into()),
            LuaError::StackOverflow => LuaValue::String("stack overflow".into()),
            LuaError::Yield(_) | LuaError::Pending(_) => LuaValue::Nil,
        }
    }

    /// True for the variants a protected call may convert into
    /// (false, error_value); yields, pending suspensions and
    /// cancellation pass through.
    pub fn is_catchable(&self) -> bool {
        matches!(
            self,
            LuaError::Runtime(_) | LuaError::Compile(_) | LuaError::StackOverflow
        )
    }

    pub fn traceback(&self) -> Option<&str> {
        match self {
            LuaError::Runtime(e) => e.traceback.as_deref(),
            _ => None,
        }
    }
}

impl std::fmt::Display for LuaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LuaError::Runtime(e) => match &e.value {
                LuaValue::String(s) => write!(f, "{}", s),
                other => write!(f, "{}", other.display()),
            },
            LuaError::Compile(msg) => write!(f, "{}", msg),
            LuaError::Yield(_) => write!(f, "coroutine yield"),
            LuaError::Pending(_) => write!(f, "pending host call"),
            LuaError::Cancelled => write!(f, "cancelled"),
            LuaError::StackOverflow => write!(f, "stack overflow"),
        }
    }
}

impl std::error::Error for LuaError {}
