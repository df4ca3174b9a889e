mod instruction;

pub use instruction::Instruction;

/// Instruction format modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    IABC,
    IABx,
    IAsBx,
    IAx,
}

/// Opcode set: 40 regular opcodes plus the reserved debugger trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    // Load/Move operations
    Move = 0, // R[A] := R[B]
    LoadK,    // R[A] := K[Bx]
    LoadBool, // R[A] := (B != 0); if C != 0 then pc++
    LoadNil,  // R[A], R[A+1], ..., R[A+B] := nil

    // Upvalue and global (via _ENV upvalue) operations
    GetUpval, // R[A] := UpValue[B]
    GetTabUp, // R[A] := UpValue[B][RK(C)]
    GetTable, // R[A] := R[B][RK(C)]
    SetTabUp, // UpValue[A][RK(B)] := RK(C)
    SetUpval, // UpValue[B] := R[A]
    SetTable, // R[A][RK(B)] := RK(C)

    // Table creation
    NewTable, // R[A] := {} (array hint B, hash hint C)

    // Self call
    Self_, // R[A+1] := R[B]; R[A] := R[B][RK(C)]

    // Arithmetic operations
    Add,  // R[A] := RK(B) + RK(C)
    Sub,  // R[A] := RK(B) - RK(C)
    Mul,  // R[A] := RK(B) * RK(C)
    Div,  // R[A] := RK(B) / RK(C)
    Mod,  // R[A] := RK(B) % RK(C)
    Pow,  // R[A] := RK(B) ^ RK(C)
    Unm,  // R[A] := -R[B]
    IDiv, // R[A] := RK(B) // RK(C)

    // Unary operations
    Not, // R[A] := not R[B]
    Len, // R[A] := #R[B]

    // Concatenation
    Concat, // R[A] := R[B] .. R[B+1] .. ... .. R[C]

    // Jump; A != 0 also closes upvalues >= R[A-1]
    Jmp, // pc += sBx

    // Comparison operations (skip next instruction when result != A)
    Eq, // if ((RK(B) == RK(C)) ~= A) then pc++
    Lt, // if ((RK(B) <  RK(C)) ~= A) then pc++
    Le, // if ((RK(B) <= RK(C)) ~= A) then pc++

    // Test operations
    Test,    // if (truthy(R[A]) ~= C) then pc++
    TestSet, // if (truthy(R[B]) == C) then R[A] := R[B] else pc++

    // Call operations
    Call,     // R[A], ..., R[A+C-2] := R[A](R[A+1], ..., R[A+B-1])
    TailCall, // return R[A](R[A+1], ..., R[A+B-1])
    Return,   // return R[A], ..., R[A+B-2]

    // Numeric for loops
    ForPrep, // R[A] -= R[A+2]; pc += sBx
    ForLoop, // R[A] += R[A+2]; if R[A] within limit then { pc += sBx; R[A+3] := R[A] }

    // Generic for loops
    TForCall, // R[A+3], ..., R[A+2+C] := R[A](R[A+1], R[A+2])
    TForLoop, // if R[A+1] ~= nil then { R[A] := R[A+1]; pc += sBx }

    // Table list initialization
    SetList, // R[A][(C-1)*FPF + i] := R[A+i], 1 <= i <= B

    // Closure creation
    Closure, // R[A] := closure(proto[Bx])

    // Vararg
    Vararg, // R[A], R[A+1], ..., R[A+B-2] := ...

    // Extra (larger) argument for the previous opcode
    ExtraArg, // Ax

    // Reserved debugger trap: the debugger answers with the original
    // instruction, which is re-executed at the same pc.
    DebugBreak = 40,
}

impl OpCode {
    #[inline(always)]
    pub fn from_u8(byte: u8) -> Self {
        debug_assert!(byte <= OpCode::DebugBreak as u8, "invalid opcode {}", byte);
        // Clamped so the transmute stays in range even on a corrupted stream.
        unsafe { std::mem::transmute(byte.min(OpCode::DebugBreak as u8)) }
    }

    /// Get the instruction format mode for this opcode
    pub fn get_mode(self) -> OpMode {
        use OpCode::*;
        match self {
            LoadK | Closure => OpMode::IABx,
            Jmp | ForPrep | ForLoop | TForLoop => OpMode::IAsBx,
            ExtraArg => OpMode::IAx,
            _ => OpMode::IABC,
        }
    }

    /// Instruction name as used by the disassembler
    pub fn name(self) -> &'static str {
        use OpCode::*;
        match self {
            Move => "MOVE",
            LoadK => "LOADK",
            LoadBool => "LOADBOOL",
            LoadNil => "LOADNIL",
            GetUpval => "GETUPVAL",
            GetTabUp => "GETTABUP",
            GetTable => "GETTABLE",
            SetTabUp => "SETTABUP",
            SetUpval => "SETUPVAL",
            SetTable => "SETTABLE",
            NewTable => "NEWTABLE",
            Self_ => "SELF",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Div => "DIV",
            Mod => "MOD",
            Pow => "POW",
            Unm => "UNM",
            IDiv => "IDIV",
            Not => "NOT",
            Len => "LEN",
            Concat => "CONCAT",
            Jmp => "JMP",
            Eq => "EQ",
            Lt => "LT",
            Le => "LE",
            Test => "TEST",
            TestSet => "TESTSET",
            Call => "CALL",
            TailCall => "TAILCALL",
            Return => "RETURN",
            ForPrep => "FORPREP",
            ForLoop => "FORLOOP",
            TForCall => "TFORCALL",
            TForLoop => "TFORLOOP",
            SetList => "SETLIST",
            Closure => "CLOSURE",
            Vararg => "VARARG",
            ExtraArg => "EXTRAARG",
            DebugBreak => "DEBUG_BREAK",
        }
    }
}
