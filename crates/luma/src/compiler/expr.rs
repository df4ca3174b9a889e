// Expression codegen: every expression lands in a requested register;
// temporaries live above free_reg and are released by the caller's
// mark/free pairs.

use crate::compiler::ast::{BinOp, Expr, TableField, UnOp};
use crate::compiler::{CompileResult, Compiler, VarAccess};
use crate::lua_value::LuaValue;
use crate::lua_vm::execute::FIELDS_PER_FLUSH;
use crate::lua_vm::{Instruction, OpCode};

impl<'a> Compiler<'a> {
    /// Constant pool index, with the Bx field range enforced.
    fn const_index(&mut self, value: LuaValue) -> CompileResult<usize> {
        let idx = self.cur().add_constant(value);
        if idx as u32 > Instruction::MAX_BX {
            return Err("too many constants in one function".to_string());
        }
        Ok(idx)
    }

    pub(crate) fn string_const(&mut self, s: &str) -> CompileResult<usize> {
        let v = LuaValue::String(self.interner.intern(s));
        self.const_index(v)
    }

    /// RK operand for a constant: encoded constant when it fits the
    /// 8-bit RK index, otherwise materialized into a temp register.
    pub(crate) fn rk_of_const(&mut self, idx: usize, line: u32) -> CompileResult<u32> {
        if idx as u32 <= Instruction::MAX_INDEX_RK {
            Ok(Instruction::rk_as_k(idx as u32))
        } else {
            let reg = self.cur().reserve(1)?;
            self.cur().emit(
                Instruction::create_abx(OpCode::LoadK, reg as u32, idx as u32),
                line,
            );
            Ok(reg as u32)
        }
    }

    /// RK operand for an expression: constants encode directly,
    /// anything else evaluates into a register.
    pub(crate) fn compile_expr_rk(&mut self, e: &Expr) -> CompileResult<u32> {
        match e {
            Expr::Nil(line) => {
                let idx = self.const_index(LuaValue::Nil)?;
                self.rk_of_const(idx, *line)
            }
            Expr::True(line) => {
                let idx = self.const_index(LuaValue::Boolean(true))?;
                self.rk_of_const(idx, *line)
            }
            Expr::False(line) => {
                let idx = self.const_index(LuaValue::Boolean(false))?;
                self.rk_of_const(idx, *line)
            }
            Expr::Number(n, line) => {
                let idx = self.const_index(LuaValue::Number(*n))?;
                self.rk_of_const(idx, *line)
            }
            Expr::Str(s, line) => {
                let idx = self.string_const(s)?;
                self.rk_of_const(idx, *line)
            }
            _ => Ok(self.compile_expr_anyreg(e)? as u32),
        }
    }

    /// Register holding the expression's value: an existing local when
    /// possible, otherwise a fresh temporary.
    pub(crate) fn compile_expr_anyreg(&mut self, e: &Expr) -> CompileResult<usize> {
        match e {
            Expr::Name(n, _) => {
                if let VarAccess::Local(reg) = self.resolve_var(n) {
                    return Ok(reg);
                }
                let reg = self.cur().reserve(1)?;
                self.compile_expr_to(e, reg)?;
                Ok(reg)
            }
            Expr::Paren(inner) => self.compile_expr_anyreg(inner),
            _ => {
                let reg = self.cur().reserve(1)?;
                self.compile_expr_to(e, reg)?;
                Ok(reg)
            }
        }
    }

    /// Evaluate `e` into register `dst`.
    pub(crate) fn compile_expr_to(&mut self, e: &Expr, dst: usize) -> CompileResult<()> {
        match e {
            Expr::Nil(line) => {
                self.cur()
                    .emit(Instruction::create_abc(OpCode::LoadNil, dst as u32, 0, 0), *line);
            }
            Expr::True(line) => {
                self.cur().emit(
                    Instruction::create_abc(OpCode::LoadBool, dst as u32, 1, 0),
                    *line,
                );
            }
            Expr::False(line) => {
                self.cur().emit(
                    Instruction::create_abc(OpCode::LoadBool, dst as u32, 0, 0),
                    *line,
                );
            }
            Expr::Number(n, line) => {
                let idx = self.const_index(LuaValue::Number(*n))?;
                self.cur().emit(
                    Instruction::create_abx(OpCode::LoadK, dst as u32, idx as u32),
                    *line,
                );
            }
            Expr::Str(s, line) => {
                let idx = self.string_const(s)?;
                self.cur().emit(
                    Instruction::create_abx(OpCode::LoadK, dst as u32, idx as u32),
                    *line,
                );
            }
            Expr::Vararg(line) => {
                self.cur().emit(
                    Instruction::create_abc(OpCode::Vararg, dst as u32, 2, 0),
                    *line,
                );
            }
            Expr::Function(body) => {
                let idx = self.compile_function(body)?;
                if idx as u32 > Instruction::MAX_BX {
                    return Err("too many nested functions".to_string());
                }
                self.cur().emit(
                    Instruction::create_abx(OpCode::Closure, dst as u32, idx as u32),
                    body.line,
                );
            }
            Expr::Name(n, line) => match self.resolve_var(n) {
                VarAccess::Local(reg) => {
                    if reg != dst {
                        self.cur().emit(
                            Instruction::create_abc(OpCode::Move, dst as u32, reg as u32, 0),
                            *line,
                        );
                    }
                }
                VarAccess::Upvalue(idx) => {
                    self.cur().emit(
                        Instruction::create_abc(OpCode::GetUpval, dst as u32, idx as u32, 0),
                        *line,
                    );
                }
                VarAccess::Global(name) => {
                    let mark = self.cur().free_reg;
                    let kidx = self.string_const(&name)?;
                    let rkk = self.rk_of_const(kidx, *line)?;
                    match self.resolve_env() {
                        VarAccess::Upvalue(env) => {
                            self.cur().emit(
                                Instruction::create_abc(
                                    OpCode::GetTabUp,
                                    dst as u32,
                                    env as u32,
                                    rkk,
                                ),
                                *line,
                            );
                        }
                        VarAccess::Local(env) => {
                            self.cur().emit(
                                Instruction::create_abc(
                                    OpCode::GetTable,
                                    dst as u32,
                                    env as u32,
                                    rkk,
                                ),
                                *line,
                            );
                        }
                        VarAccess::Global(_) => unreachable!("_ENV always resolves"),
                    }
                    self.cur().free_to(mark);
                }
            },
            Expr::Index(obj, key, line) => {
                let mark = self.cur().free_reg;
                let robj = self.compile_expr_anyreg(obj)?;
                let rkk = self.compile_expr_rk(key)?;
                self.cur().emit(
                    Instruction::create_abc(OpCode::GetTable, dst as u32, robj as u32, rkk),
                    *line,
                );
                self.cur().free_to(mark);
            }
            Expr::Call { .. } | Expr::MethodCall { .. } => {
                let mark = self.cur().free_reg;
                let base = self.cur().reserve(1)?;
                self.compile_call_expr(e, base, 1, false)?;
                if base != dst {
                    self.cur().emit(
                        Instruction::create_abc(OpCode::Move, dst as u32, base as u32, 0),
                        e.line(),
                    );
                }
                self.cur().free_to(mark);
            }
            Expr::Paren(inner) => self.compile_expr_to(inner, dst)?,
            Expr::Table { fields, line } => self.compile_table(fields, dst, *line)?,
            Expr::Unary { op, operand, line } => {
                let mark = self.cur().free_reg;
                let r = self.compile_expr_anyreg(operand)?;
                let opcode = match op {
                    UnOp::Neg => OpCode::Unm,
                    UnOp::Not => OpCode::Not,
                    UnOp::Len => OpCode::Len,
                };
                self.cur().emit(
                    Instruction::create_abc(opcode, dst as u32, r as u32, 0),
                    *line,
                );
                self.cur().free_to(mark);
            }
            Expr::Binary { op, lhs, rhs, line } => {
                self.compile_binary(*op, lhs, rhs, dst, *line)?;
            }
        }
        Ok(())
    }

    fn compile_binary(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        dst: usize,
        line: u32,
    ) -> CompileResult<()> {
        match op {
            BinOp::And => {
                self.compile_expr_to(lhs, dst)?;
                self.cur()
                    .emit(Instruction::create_abc(OpCode::Test, dst as u32, 0, 0), line);
                let skip = self.cur().emit_jump(line);
                self.compile_expr_to(rhs, dst)?;
                self.cur().patch_jump_here(skip);
            }
            BinOp::Or => {
                self.compile_expr_to(lhs, dst)?;
                self.cur()
                    .emit(Instruction::create_abc(OpCode::Test, dst as u32, 0, 1), line);
                let skip = self.cur().emit_jump(line);
                self.compile_expr_to(rhs, dst)?;
                self.cur().patch_jump_here(skip);
            }
            BinOp::Concat => {
                let mut pieces = Vec::new();
                collect_concat(lhs, &mut pieces);
                collect_concat(rhs, &mut pieces);
                let mark = self.cur().free_reg;
                let first = self.cur().reserve(1)?;
                self.compile_expr_to(pieces[0], first)?;
                for piece in &pieces[1..] {
                    let r = self.cur().reserve(1)?;
                    self.compile_expr_to(piece, r)?;
                }
                let last = first + pieces.len() - 1;
                self.cur().emit(
                    Instruction::create_abc(OpCode::Concat, dst as u32, first as u32, last as u32),
                    line,
                );
                self.cur().free_to(mark);
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                self.compile_comparison(op, lhs, rhs, dst, line)?;
            }
            BinOp::Add
            | BinOp::Sub
            | BinOp::Mul
            | BinOp::Div
            | BinOp::IDiv
            | BinOp::Mod
            | BinOp::Pow => {
                let opcode = match op {
                    BinOp::Add => OpCode::Add,
                    BinOp::Sub => OpCode::Sub,
                    BinOp::Mul => OpCode::Mul,
                    BinOp::Div => OpCode::Div,
                    BinOp::IDiv => OpCode::IDiv,
                    BinOp::Mod => OpCode::Mod,
                    BinOp::Pow => OpCode::Pow,
                    _ => unreachable!(),
                };
                let mark = self.cur().free_reg;
                let rkb = self.compile_expr_rk(lhs)?;
                let rkc = self.compile_expr_rk(rhs)?;
                self.cur().emit(
                    Instruction::create_abc(opcode, dst as u32, rkb, rkc),
                    line,
                );
                self.cur().free_to(mark);
            }
        }
        Ok(())
    }

    /// Comparisons materialize a boolean via the skip-and-load pattern.
    fn compile_comparison(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        dst: usize,
        line: u32,
    ) -> CompileResult<()> {
        let (opcode, a_flag, swap) = match op {
            BinOp::Eq => (OpCode::Eq, 1u32, false),
            BinOp::Ne => (OpCode::Eq, 0, false),
            BinOp::Lt => (OpCode::Lt, 1, false),
            BinOp::Le => (OpCode::Le, 1, false),
            BinOp::Gt => (OpCode::Lt, 1, true),
            BinOp::Ge => (OpCode::Le, 1, true),
            _ => unreachable!(),
        };
        let mark = self.cur().free_reg;
        let mut rkb = self.compile_expr_rk(lhs)?;
        let mut rkc = self.compile_expr_rk(rhs)?;
        if swap {
            std::mem::swap(&mut rkb, &mut rkc);
        }
        self.cur().free_to(mark);
        self.cur()
            .emit(Instruction::create_abc(opcode, a_flag, rkb, rkc), line);
        self.cur()
            .emit(Instruction::create_asbx(OpCode::Jmp, 0, 1), line);
        self.cur().emit(
            Instruction::create_abc(OpCode::LoadBool, dst as u32, 0, 1),
            line,
        );
        self.cur().emit(
            Instruction::create_abc(OpCode::LoadBool, dst as u32, 1, 0),
            line,
        );
        Ok(())
    }

    /// Compile a call (or method call) at `base` (already reserved).
    /// Results land at `base..`; `nresults` of -1 keeps all results.
    pub(crate) fn compile_call_expr(
        &mut self,
        e: &Expr,
        base: usize,
        nresults: i32,
        tail: bool,
    ) -> CompileResult<()> {
        match e {
            Expr::Call { func, args, line } => {
                self.compile_expr_to(func, base)?;
                let open = self.compile_expr_list_open(args, base + 1)?;
                let b = match open {
                    None => 0,
                    Some(n) => n as u32 + 1,
                };
                self.emit_call(base, b, nresults, tail, *line);
            }
            Expr::MethodCall {
                obj,
                name,
                args,
                line,
            } => {
                self.compile_expr_to(obj, base)?;
                let kidx = self.string_const(name)?;
                let rkk = self.rk_of_const(kidx, *line)?;
                self.cur().emit(
                    Instruction::create_abc(OpCode::Self_, base as u32, base as u32, rkk),
                    *line,
                );
                // the implicit self occupies base + 1
                let self_slot = self.cur().free_reg;
                debug_assert_eq!(self_slot, base + 1);
                self.cur().reserve(1)?;
                let open = self.compile_expr_list_open(args, base + 2)?;
                let b = match open {
                    None => 0,
                    Some(n) => n as u32 + 2,
                };
                self.emit_call(base, b, nresults, tail, *line);
            }
            _ => unreachable!("not a call expression"),
        }
        Ok(())
    }

    fn emit_call(&mut self, base: usize, b: u32, nresults: i32, tail: bool, line: u32) {
        if tail {
            self.cur().emit(
                Instruction::create_abc(OpCode::TailCall, base as u32, b, 0),
                line,
            );
        } else {
            let c = (nresults + 1) as u32;
            self.cur().emit(
                Instruction::create_abc(OpCode::Call, base as u32, b, c),
                line,
            );
            // keep result slots reserved for the caller
            let keep = if nresults > 0 { nresults as usize } else { 1 };
            let fs = self.cur();
            if fs.free_reg > base + keep {
                fs.free_to(base + keep);
            } else {
                let _ = fs.reserve((base + keep).saturating_sub(fs.free_reg));
            }
        }
    }

    /// Compile an expression list into consecutive registers starting
    /// at `first` (must equal free_reg). Returns None when the last
    /// expression is open-ended ("to top"), otherwise the value count.
    pub(crate) fn compile_expr_list_open(
        &mut self,
        exprs: &[Expr],
        first: usize,
    ) -> CompileResult<Option<usize>> {
        debug_assert_eq!(first, self.states.last().unwrap().free_reg);
        if exprs.is_empty() {
            return Ok(Some(0));
        }
        for e in &exprs[..exprs.len() - 1] {
            let r = self.cur().reserve(1)?;
            self.compile_expr_to(e, r)?;
        }
        let last = &exprs[exprs.len() - 1];
        if last.is_multivalue() {
            let base = self.cur().reserve(1)?;
            self.compile_multivalue(last, base, -1)?;
            Ok(None)
        } else {
            let r = self.cur().reserve(1)?;
            self.compile_expr_to(last, r)?;
            Ok(Some(exprs.len()))
        }
    }

    /// Compile an expression list adjusted to exactly `want` values at
    /// `first` (must equal free_reg); free_reg ends at `first + want`.
    pub(crate) fn compile_expr_list_fixed(
        &mut self,
        exprs: &[Expr],
        first: usize,
        want: usize,
    ) -> CompileResult<()> {
        debug_assert_eq!(first, self.states.last().unwrap().free_reg);
        let n = exprs.len();
        if n == 0 {
            if want > 0 {
                let line = self.cur_line;
                self.cur().reserve(want)?;
                self.cur().emit(
                    Instruction::create_abc(
                        OpCode::LoadNil,
                        first as u32,
                        (want - 1) as u32,
                        0,
                    ),
                    line,
                );
            }
            return Ok(());
        }
        for e in &exprs[..n - 1] {
            let r = self.cur().reserve(1)?;
            self.compile_expr_to(e, r)?;
        }
        let last = &exprs[n - 1];
        if n <= want {
            let missing = want - n;
            if last.is_multivalue() && missing > 0 {
                let base = self.cur().reserve(1)?;
                self.compile_multivalue(last, base, (missing + 1) as i32)?;
                // Normalize the register watermark to the value count
                // (the two multi-value paths leave it differently)
                let target = first + want;
                let fs = self.cur();
                if fs.free_reg < target {
                    let shortfall = target - fs.free_reg;
                    fs.reserve(shortfall)?;
                } else {
                    fs.free_to(target);
                }
            } else {
                let r = self.cur().reserve(1)?;
                self.compile_expr_to(last, r)?;
                if missing > 0 {
                    let pad = self.cur().reserve(missing)?;
                    self.cur().emit(
                        Instruction::create_abc(
                            OpCode::LoadNil,
                            pad as u32,
                            (missing - 1) as u32,
                            0,
                        ),
                        last.line(),
                    );
                }
            }
        } else {
            // Extra expressions are evaluated for their effects
            let r = self.cur().reserve(1)?;
            self.compile_expr_to(last, r)?;
            self.cur().free_to(first + want);
        }
        Ok(())
    }

    /// Compile a multi-value producer (call or vararg) with a result
    /// protocol: -1 keeps everything.
    pub(crate) fn compile_multivalue(
        &mut self,
        e: &Expr,
        base: usize,
        nresults: i32,
    ) -> CompileResult<()> {
        match e {
            Expr::Call { .. } | Expr::MethodCall { .. } => {
                self.compile_call_expr(e, base, nresults, false)
            }
            Expr::Vararg(line) => {
                let b = if nresults < 0 { 0 } else { nresults as u32 + 1 };
                self.cur().emit(
                    Instruction::create_abc(OpCode::Vararg, base as u32, b, 0),
                    *line,
                );
                Ok(())
            }
            _ => unreachable!("not a multi-value expression"),
        }
    }

    fn compile_table(
        &mut self,
        fields: &[TableField],
        dst: usize,
        line: u32,
    ) -> CompileResult<()> {
        let in_place = dst + 1 == self.cur().free_reg;
        let mark = self.cur().free_reg;
        let treg = if in_place { dst } else { self.cur().reserve(1)? };

        let array_hint = fields
            .iter()
            .filter(|f| matches!(f, TableField::Item(_)))
            .count()
            .min(255);
        let hash_hint = (fields.len() - array_hint).min(255);
        self.cur().emit(
            Instruction::create_abc(
                OpCode::NewTable,
                treg as u32,
                array_hint as u32,
                hash_hint as u32,
            ),
            line,
        );

        let mut pending = 0usize;
        let mut batch = 0usize;
        let item_count = fields
            .iter()
            .filter(|f| matches!(f, TableField::Item(_)))
            .count();
        let mut item_idx = 0usize;
        for field in fields {
            match field {
                TableField::Item(e) => {
                    item_idx += 1;
                    let is_last_item = item_idx == item_count;
                    if is_last_item && e.is_multivalue() {
                        let base = self.cur().reserve(1)?;
                        self.compile_multivalue(e, base, -1)?;
                        batch += 1;
                        self.emit_setlist(treg, 0, batch, e.line())?;
                        pending = 0;
                    } else {
                        let r = self.cur().reserve(1)?;
                        self.compile_expr_to(e, r)?;
                        pending += 1;
                        if pending == FIELDS_PER_FLUSH {
                            batch += 1;
                            self.emit_setlist(treg, pending, batch, e.line())?;
                            self.cur().free_to(treg + 1);
                            pending = 0;
                        }
                    }
                }
                TableField::Named(name, value) => {
                    let inner_mark = self.cur().free_reg;
                    let kidx = self.string_const(name)?;
                    let rkk = self.rk_of_const(kidx, line)?;
                    let rkv = self.compile_expr_rk(value)?;
                    self.cur().emit(
                        Instruction::create_abc(OpCode::SetTable, treg as u32, rkk, rkv),
                        value.line(),
                    );
                    self.cur().free_to(inner_mark);
                }
                TableField::Keyed(key, value) => {
                    let inner_mark = self.cur().free_reg;
                    let rkk = self.compile_expr_rk(key)?;
                    let rkv = self.compile_expr_rk(value)?;
                    self.cur().emit(
                        Instruction::create_abc(OpCode::SetTable, treg as u32, rkk, rkv),
                        value.line(),
                    );
                    self.cur().free_to(inner_mark);
                }
            }
        }
        if pending > 0 {
            batch += 1;
            self.emit_setlist(treg, pending, batch, line)?;
            self.cur().free_to(treg + 1);
        }
        if !in_place {
            self.cur().emit(
                Instruction::create_abc(OpCode::Move, dst as u32, treg as u32, 0),
                line,
            );
        }
        self.cur().free_to(mark);
        Ok(())
    }

    fn emit_setlist(
        &mut self,
        treg: usize,
        count: usize,
        batch: usize,
        line: u32,
    ) -> CompileResult<()> {
        if batch as u32 <= Instruction::MAX_C {
            self.cur().emit(
                Instruction::create_abc(
                    OpCode::SetList,
                    treg as u32,
                    count as u32,
                    batch as u32,
                ),
                line,
            );
        } else {
            self.cur().emit(
                Instruction::create_abc(OpCode::SetList, treg as u32, count as u32, 0),
                line,
            );
            self.cur().emit(
                Instruction::create_ax(OpCode::ExtraArg, batch as u32),
                line,
            );
        }
        Ok(())
    }
}

/// Flatten a (right-nested) concat chain into its pieces.
fn collect_concat<'e>(e: &'e Expr, out: &mut Vec<&'e Expr>) {
    match e {
        Expr::Binary {
            op: BinOp::Concat,
            lhs,
            rhs,
            ..
        } => {
            collect_concat(lhs, out);
            collect_concat(rhs, out);
        }
        other => out.push(other),
    }
}
