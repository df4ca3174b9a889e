// Statement codegen: control flow, scopes, assignments, loops.

use crate::compiler::ast::{Block, Expr, FuncName, Stmt};
use crate::compiler::{CompileResult, Compiler, VarAccess};
use crate::lua_value::LuaValue;
use crate::lua_vm::{Instruction, OpCode};

/// Prepared assignment target (left side evaluated, store pending).
enum Target {
    Local(usize),
    Upvalue(usize),
    GlobalUp(usize, u32),
    GlobalLocal(usize, u32),
    Table(usize, u32),
}

impl<'a> Compiler<'a> {
    pub(crate) fn compile_statement(&mut self, stmt: &Stmt) -> CompileResult<()> {
        match stmt {
            Stmt::Expr(e) => {
                self.cur_line = e.line();
                let mark = self.cur().free_reg;
                let base = self.cur().reserve(1)?;
                self.compile_call_expr(e, base, 0, false)?;
                self.cur().free_to(mark);
                Ok(())
            }
            Stmt::Local { names, exprs, line } => {
                self.cur_line = *line;
                let first = self.cur().free_reg;
                self.compile_expr_list_fixed(exprs, first, names.len())?;
                for (i, name) in names.iter().enumerate() {
                    self.cur().declare_local(name.clone(), first + i);
                }
                Ok(())
            }
            Stmt::Assign {
                targets,
                exprs,
                line,
            } => self.compile_assign(targets, exprs, *line),
            Stmt::If {
                arms,
                else_block,
                line,
            } => self.compile_if(arms, else_block.as_ref(), *line),
            Stmt::While { cond, body, line } => self.compile_while(cond, body, *line),
            Stmt::Repeat { body, cond, line } => self.compile_repeat(body, cond, *line),
            Stmt::NumericFor {
                var,
                init,
                limit,
                step,
                body,
                line,
            } => self.compile_numeric_for(var, init, limit, step.as_ref(), body, *line),
            Stmt::GenericFor {
                names,
                exprs,
                body,
                line,
            } => self.compile_generic_for(names, exprs, body, *line),
            Stmt::Do(block) => {
                let line = self.cur_line;
                self.compile_scoped_block(block, line)
            }
            Stmt::Return { exprs, line } => self.compile_return(exprs, *line),
            Stmt::Break { line } => self.compile_break(*line),
            Stmt::Function { name, body, line } => self.compile_function_stmt(name, body, *line),
            Stmt::LocalFunction { name, body, line } => {
                self.cur_line = *line;
                let reg = self.cur().reserve(1)?;
                // Declared before the body compiles, so the function
                // can call itself through the local
                self.cur().declare_local(name.clone(), reg);
                let idx = self.compile_function(body)?;
                self.cur().emit(
                    Instruction::create_abx(OpCode::Closure, reg as u32, idx as u32),
                    *line,
                );
                Ok(())
            }
        }
    }

    fn compile_assign(
        &mut self,
        targets: &[Expr],
        exprs: &[Expr],
        line: u32,
    ) -> CompileResult<()> {
        self.cur_line = line;
        let mark = self.cur().free_reg;
        let mut prepared = Vec::with_capacity(targets.len());
        for target in targets {
            let t = match target {
                Expr::Name(n, _) => match self.resolve_var(n) {
                    VarAccess::Local(reg) => Target::Local(reg),
                    VarAccess::Upvalue(idx) => Target::Upvalue(idx),
                    VarAccess::Global(name) => {
                        let kidx = self.string_const(&name)?;
                        let rkk = self.rk_of_const(kidx, line)?;
                        match self.resolve_env() {
                            VarAccess::Upvalue(env) => Target::GlobalUp(env, rkk),
                            VarAccess::Local(env) => Target::GlobalLocal(env, rkk),
                            VarAccess::Global(_) => unreachable!("_ENV always resolves"),
                        }
                    }
                },
                Expr::Index(obj, key, _) => {
                    let robj = self.compile_expr_anyreg(obj)?;
                    let rkk = self.compile_expr_rk(key)?;
                    Target::Table(robj, rkk)
                }
                _ => return Err("cannot assign to this expression".to_string()),
            };
            prepared.push(t);
        }

        let values = self.cur().free_reg;
        self.compile_expr_list_fixed(exprs, values, targets.len())?;

        for (i, target) in prepared.iter().enumerate() {
            let vreg = (values + i) as u32;
            match target {
                Target::Local(reg) => {
                    if *reg != values + i {
                        self.cur().emit(
                            Instruction::create_abc(OpCode::Move, *reg as u32, vreg, 0),
                            line,
                        );
                    }
                }
                Target::Upvalue(idx) => {
                    self.cur().emit(
                        Instruction::create_abc(OpCode::SetUpval, vreg, *idx as u32, 0),
                        line,
                    );
                }
                Target::GlobalUp(env, rkk) => {
                    self.cur().emit(
                        Instruction::create_abc(OpCode::SetTabUp, *env as u32, *rkk, vreg),
                        line,
                    );
                }
                Target::GlobalLocal(env, rkk) => {
                    self.cur().emit(
                        Instruction::create_abc(OpCode::SetTable, *env as u32, *rkk, vreg),
                        line,
                    );
                }
                Target::Table(robj, rkk) => {
                    self.cur().emit(
                        Instruction::create_abc(OpCode::SetTable, *robj as u32, *rkk, vreg),
                        line,
                    );
                }
            }
        }
        self.cur().free_to(mark);
        Ok(())
    }

    /// Condition helper: evaluates `cond` and emits a jump taken when
    /// it is falsy. Returns the jump to patch.
    fn cond_false_jump(&mut self, cond: &Expr) -> CompileResult<usize> {
        let line = cond.line();
        let mark = self.cur().free_reg;
        let reg = self.compile_expr_anyreg(cond)?;
        self.cur().free_to(mark);
        self.cur()
            .emit(Instruction::create_abc(OpCode::Test, reg as u32, 0, 0), line);
        Ok(self.cur().emit_jump(line))
    }

    fn compile_if(
        &mut self,
        arms: &[(Expr, Block)],
        else_block: Option<&Block>,
        line: u32,
    ) -> CompileResult<()> {
        self.cur_line = line;
        let mut end_jumps = Vec::new();
        for (i, (cond, body)) in arms.iter().enumerate() {
            let false_jump = self.cond_false_jump(cond)?;
            self.compile_scoped_block(body, line)?;
            let has_more = i + 1 < arms.len() || else_block.is_some();
            if has_more {
                end_jumps.push(self.cur().emit_jump(line));
            }
            self.cur().patch_jump_here(false_jump);
        }
        if let Some(block) = else_block {
            self.compile_scoped_block(block, line)?;
        }
        for j in end_jumps {
            self.cur().patch_jump_here(j);
        }
        Ok(())
    }

    fn compile_while(&mut self, cond: &Expr, body: &Block, line: u32) -> CompileResult<()> {
        self.cur_line = line;
        let start = self.cur().here();
        self.cur().begin_block(true);
        let exit_jump = self.cond_false_jump(cond)?;
        let locals_len = self.cur().locals.len();
        self.compile_block(body)?;
        let close = self.cur().close_level_since(locals_len);
        self.cur().end_scope_records(locals_len);
        let back = self
            .cur()
            .emit(Instruction::create_asbx(OpCode::Jmp, close, 0), line);
        self.cur().patch_jump_to(back, start);
        self.cur().patch_jump_here(exit_jump);
        let block = self.cur().end_block();
        for j in block.break_jumps {
            self.cur().patch_jump_here(j);
        }
        Ok(())
    }

    fn compile_repeat(&mut self, body: &Block, cond: &Expr, line: u32) -> CompileResult<()> {
        self.cur_line = line;
        self.cur().begin_block(true);
        let start = self.cur().here();
        let locals_len = self.cur().locals.len();
        // The until-condition sees the body's locals, so the scope
        // stays open through it
        self.compile_block(body)?;
        let mark = self.cur().free_reg;
        let creg = self.compile_expr_anyreg(cond)?;
        self.cur().free_to(mark);
        self.cur().emit(
            Instruction::create_abc(OpCode::Test, creg as u32, 0, 0),
            cond.line(),
        );
        let close = self.cur().close_level_since(locals_len);
        let back = self
            .cur()
            .emit(Instruction::create_asbx(OpCode::Jmp, close, 0), line);
        self.cur().patch_jump_to(back, start);
        self.cur().end_scope(locals_len, line);
        let block = self.cur().end_block();
        for j in block.break_jumps {
            self.cur().patch_jump_here(j);
        }
        Ok(())
    }

    fn compile_numeric_for(
        &mut self,
        var: &smol_str::SmolStr,
        init: &Expr,
        limit: &Expr,
        step: Option<&Expr>,
        body: &Block,
        line: u32,
    ) -> CompileResult<()> {
        self.cur_line = line;
        let mark = self.cur().free_reg;
        // Three hidden control registers, then the user variable
        let base = self.cur().reserve(1)?;
        self.compile_expr_to(init, base)?;
        let r_limit = self.cur().reserve(1)?;
        self.compile_expr_to(limit, r_limit)?;
        let r_step = self.cur().reserve(1)?;
        match step {
            Some(s) => self.compile_expr_to(s, r_step)?,
            None => {
                let idx = self.cur().add_constant(LuaValue::Number(1.0));
                self.cur().emit(
                    Instruction::create_abx(OpCode::LoadK, r_step as u32, idx as u32),
                    line,
                );
            }
        }
        let prep = self
            .cur()
            .emit(Instruction::create_asbx(OpCode::ForPrep, base as u32, 0), line);

        self.cur().begin_block(true);
        let body_start = self.cur().here();
        let locals_len = self.cur().locals.len();
        let vreg = self.cur().reserve(1)?;
        debug_assert_eq!(vreg, base + 3);
        self.cur().declare_local(var.clone(), vreg);
        self.compile_block(body)?;
        self.cur().end_scope(locals_len, line);

        let forloop_pc = self.cur().here();
        self.cur().patch_jump_to(prep, forloop_pc);
        let fl = self
            .cur()
            .emit(Instruction::create_asbx(OpCode::ForLoop, base as u32, 0), line);
        self.cur().patch_jump_to(fl, body_start);

        let block = self.cur().end_block();
        for j in block.break_jumps {
            self.cur().patch_jump_here(j);
        }
        self.cur().free_to(mark);
        Ok(())
    }

    fn compile_generic_for(
        &mut self,
        names: &[smol_str::SmolStr],
        exprs: &[Expr],
        body: &Block,
        line: u32,
    ) -> CompileResult<()> {
        self.cur_line = line;
        let mark = self.cur().free_reg;
        // iterator function, state, control
        let base = self.cur().free_reg;
        self.compile_expr_list_fixed(exprs, base, 3)?;

        let prep_jump = self.cur().emit_jump(line);

        self.cur().begin_block(true);
        let body_start = self.cur().here();
        let locals_len = self.cur().locals.len();
        let first_var = self.cur().reserve(names.len())?;
        debug_assert_eq!(first_var, base + 3);
        for (i, name) in names.iter().enumerate() {
            self.cur().declare_local(name.clone(), first_var + i);
        }
        self.compile_block(body)?;
        self.cur().end_scope(locals_len, line);

        self.cur().patch_jump_here(prep_jump);
        self.cur().emit(
            Instruction::create_abc(OpCode::TForCall, base as u32, 0, names.len() as u32),
            line,
        );
        let tfl = self.cur().emit(
            Instruction::create_asbx(OpCode::TForLoop, (base + 2) as u32, 0),
            line,
        );
        self.cur().patch_jump_to(tfl, body_start);

        let block = self.cur().end_block();
        for j in block.break_jumps {
            self.cur().patch_jump_here(j);
        }
        self.cur().free_to(mark);
        Ok(())
    }

    fn compile_return(&mut self, exprs: &[Expr], line: u32) -> CompileResult<()> {
        self.cur_line = line;
        // Tail-call position: a single call expression
        if exprs.len() == 1
            && matches!(exprs[0], Expr::Call { .. } | Expr::MethodCall { .. })
        {
            let mark = self.cur().free_reg;
            let base = self.cur().reserve(1)?;
            self.compile_call_expr(&exprs[0], base, -1, true)?;
            self.cur().emit(
                Instruction::create_abc(OpCode::Return, base as u32, 0, 0),
                line,
            );
            self.cur().free_to(mark);
            return Ok(());
        }
        let first = self.cur().free_reg;
        let open = self.compile_expr_list_open(exprs, first)?;
        match open {
            None => {
                self.cur().emit(
                    Instruction::create_abc(OpCode::Return, first as u32, 0, 0),
                    line,
                );
            }
            Some(n) => {
                self.cur().emit(
                    Instruction::create_abc(OpCode::Return, first as u32, (n + 1) as u32, 0),
                    line,
                );
            }
        }
        self.cur().free_to(first);
        Ok(())
    }

    fn compile_break(&mut self, line: u32) -> CompileResult<()> {
        let fs = self.cur();
        let Some(loop_idx) = fs.blocks.iter().rposition(|b| b.is_loop) else {
            return Err("break outside a loop".to_string());
        };
        let close = fs.close_level_since(fs.blocks[loop_idx].locals_at_entry);
        let j = fs.emit(Instruction::create_asbx(OpCode::Jmp, close, 0), line);
        fs.blocks[loop_idx].break_jumps.push(j);
        Ok(())
    }

    fn compile_function_stmt(
        &mut self,
        name: &FuncName,
        body: &crate::compiler::ast::FuncBody,
        line: u32,
    ) -> CompileResult<()> {
        self.cur_line = line;
        let idx = self.compile_function(body)?;
        let mark = self.cur().free_reg;
        let freg = self.cur().reserve(1)?;
        self.cur().emit(
            Instruction::create_abx(OpCode::Closure, freg as u32, idx as u32),
            line,
        );

        let mut segments: Vec<&smol_str::SmolStr> = name.path.iter().collect();
        if let Some(m) = &name.method {
            segments.push(m);
        }

        if segments.is_empty() {
            // Plain `function f()`: assign to the variable f
            match self.resolve_var(&name.base) {
                VarAccess::Local(reg) => {
                    self.cur().emit(
                        Instruction::create_abc(OpCode::Move, reg as u32, freg as u32, 0),
                        line,
                    );
                }
                VarAccess::Upvalue(uidx) => {
                    self.cur().emit(
                        Instruction::create_abc(OpCode::SetUpval, freg as u32, uidx as u32, 0),
                        line,
                    );
                }
                VarAccess::Global(n) => {
                    let kidx = self.string_const(&n)?;
                    let rkk = self.rk_of_const(kidx, line)?;
                    match self.resolve_env() {
                        VarAccess::Upvalue(env) => {
                            self.cur().emit(
                                Instruction::create_abc(
                                    OpCode::SetTabUp,
                                    env as u32,
                                    rkk,
                                    freg as u32,
                                ),
                                line,
                            );
                        }
                        VarAccess::Local(env) => {
                            self.cur().emit(
                                Instruction::create_abc(
                                    OpCode::SetTable,
                                    env as u32,
                                    rkk,
                                    freg as u32,
                                ),
                                line,
                            );
                        }
                        VarAccess::Global(_) => unreachable!("_ENV always resolves"),
                    }
                }
            }
        } else {
            // `function a.b.c()` / `function a:m()`: index down and
            // store into the last segment
            let base_expr = Expr::Name(name.base.clone(), line);
            let mut obj = self.compile_expr_anyreg(&base_expr)?;
            for seg in &segments[..segments.len() - 1] {
                let kidx = self.string_const(seg)?;
                let rkk = self.rk_of_const(kidx, line)?;
                let t = self.cur().reserve(1)?;
                self.cur().emit(
                    Instruction::create_abc(OpCode::GetTable, t as u32, obj as u32, rkk),
                    line,
                );
                obj = t;
            }
            let last = segments.last().unwrap();
            let kidx = self.string_const(last)?;
            let rkk = self.rk_of_const(kidx, line)?;
            self.cur().emit(
                Instruction::create_abc(OpCode::SetTable, obj as u32, rkk, freg as u32),
                line,
            );
        }
        self.cur().free_to(mark);
        Ok(())
    }
}
