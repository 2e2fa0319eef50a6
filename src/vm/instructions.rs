//! This module contains the semantics of the individual instructions.

use crate::{
    constant::POINTER_WIDTH_BITS,
    error::{
        container::Locatable,
        execution::{Error, Result},
    },
    expr::{mask, BinaryKind, Expr, ExprRef},
    program::{
        BinaryOp,
        BlockId,
        Callee,
        CastOp,
        Instruction,
        IntPredicate,
        Operand,
        Register,
    },
    vm::{intrinsics::truthy, state::ExecutionState, Executor},
};

/// Gets the expression operation that implements `op`.
fn binary_kind(op: BinaryOp) -> BinaryKind {
    match op {
        BinaryOp::Add => BinaryKind::Add,
        BinaryOp::Sub => BinaryKind::Sub,
        BinaryOp::Mul => BinaryKind::Mul,
        BinaryOp::UDiv => BinaryKind::UDiv,
        BinaryOp::SDiv => BinaryKind::SDiv,
        BinaryOp::URem => BinaryKind::URem,
        BinaryOp::SRem => BinaryKind::SRem,
        BinaryOp::And => BinaryKind::And,
        BinaryOp::Or => BinaryKind::Or,
        BinaryOp::Xor => BinaryKind::Xor,
        BinaryOp::Shl => BinaryKind::Shl,
        BinaryOp::LShr => BinaryKind::LShr,
        BinaryOp::AShr => BinaryKind::AShr,
    }
}

fn compare(predicate: IntPredicate, lhs: ExprRef, rhs: ExprRef) -> ExprRef {
    match predicate {
        IntPredicate::Eq => Expr::eq(lhs, rhs),
        IntPredicate::Ne => Expr::ne(lhs, rhs),
        IntPredicate::Ugt => Expr::ugt(lhs, rhs),
        IntPredicate::Uge => Expr::uge(lhs, rhs),
        IntPredicate::Ult => Expr::ult(lhs, rhs),
        IntPredicate::Ule => Expr::ule(lhs, rhs),
        IntPredicate::Sgt => Expr::sgt(lhs, rhs),
        IntPredicate::Sge => Expr::sge(lhs, rhs),
        IntPredicate::Slt => Expr::slt(lhs, rhs),
        IntPredicate::Sle => Expr::sle(lhs, rhs),
    }
}

/// Checks that two operands have the same width.
fn same_width(lhs: &ExprRef, rhs: &ExprRef) -> std::result::Result<(), Error> {
    if lhs.width() == rhs.width() {
        Ok(())
    } else {
        Err(Error::WidthMismatch {
            lhs: lhs.width(),
            rhs: rhs.width(),
        })
    }
}

impl Executor {
    /// Executes `instruction` on `state`.
    ///
    /// The program counter of the current thread has already been advanced
    /// past the instruction, so instructions that do not transfer control
    /// need not touch it.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the instruction fails for `state`. Failures in
    /// states forked off along the way terminate those states instead.
    pub(crate) fn execute_instruction(
        &mut self,
        state: &mut ExecutionState,
        instruction: &Instruction,
    ) -> Result<()> {
        let location = self.location;
        match instruction {
            Instruction::Ret { value } => {
                let value = value.map(|v| self.eval(state, v)).transpose()?;
                self.execute_return(state, value)
            }
            Instruction::Br { target } => {
                self.transfer_to_block(state, *target);
                Ok(())
            }
            Instruction::CondBr {
                condition,
                if_true,
                if_false,
            } => {
                let condition = truthy(self.eval(state, *condition)?);
                let (on_true, on_false) = self.fork(state, condition, false)?;
                for (branch, target) in [(on_true, *if_true), (on_false, *if_false)] {
                    let Some(branch) = branch else { continue };
                    self.with_branch(state, branch, |executor, state| {
                        executor.transfer_to_block(state, target);
                        Ok(())
                    })?;
                }
                Ok(())
            }
            Instruction::Switch {
                condition,
                default,
                cases,
            } => {
                let value = self.eval(state, *condition)?;
                self.execute_switch(state, value, *default, cases)
            }
            Instruction::Unreachable => Err(Error::Unreachable.locate(location)),
            Instruction::Call {
                callee,
                arguments,
                destination,
            } => {
                let arguments = arguments
                    .iter()
                    .map(|a| self.eval(state, *a))
                    .collect::<Result<Vec<_>>>()?;
                match callee {
                    Callee::Function(function) => {
                        self.execute_call(state, *function, arguments, *destination)
                    }
                    Callee::Pointer(pointer) => {
                        let pointer = self.eval_pointer(state, *pointer)?;
                        self.execute_indirect_call(state, pointer, arguments, *destination)
                    }
                    Callee::Intrinsic(intrinsic) => {
                        self.execute_intrinsic(state, intrinsic, arguments, *destination)
                    }
                }
            }
            Instruction::Binary {
                op,
                lhs,
                rhs,
                destination,
            } => {
                let lhs = self.eval(state, *lhs)?;
                let rhs = self.eval(state, *rhs)?;
                same_width(&lhs, &rhs).locate(location)?;
                self.execute_binary(state, *op, lhs, rhs, *destination)
            }
            Instruction::ICmp {
                predicate,
                lhs,
                rhs,
                destination,
            } => {
                let lhs = self.eval(state, *lhs)?;
                let rhs = self.eval(state, *rhs)?;
                same_width(&lhs, &rhs).locate(location)?;
                state.frame_mut().write(*destination, compare(*predicate, lhs, rhs));
                Ok(())
            }
            Instruction::Select {
                condition,
                if_true,
                if_false,
                destination,
            } => {
                let condition = truthy(self.eval(state, *condition)?);
                let if_true = self.eval(state, *if_true)?;
                let if_false = self.eval(state, *if_false)?;
                same_width(&if_true, &if_false).locate(location)?;
                let value = Expr::select(condition, if_true, if_false);
                state.frame_mut().write(*destination, value);
                Ok(())
            }
            Instruction::Cast {
                op,
                value,
                width,
                destination,
            } => {
                let value = self.eval(state, *value)?;
                let result = match op {
                    CastOp::Trunc => Expr::truncate(value, *width),
                    CastOp::ZExt | CastOp::PtrToInt | CastOp::IntToPtr => Expr::zext(value, *width),
                    CastOp::SExt => Expr::sext(value, *width),
                    CastOp::BitCast if value.width() == *width => value,
                    CastOp::BitCast => {
                        let error = Error::WidthMismatch {
                            lhs: value.width(),
                            rhs: *width,
                        };
                        return Err(error.locate(location));
                    }
                };
                state.frame_mut().write(*destination, result);
                Ok(())
            }
            Instruction::FBinary {
                op,
                lhs,
                rhs,
                destination,
            } => {
                let lhs = self.eval(state, *lhs)?;
                let rhs = self.eval(state, *rhs)?;
                self.execute_float_binary(state, *op, &lhs, &rhs, *destination)
            }
            Instruction::FCmp {
                predicate,
                lhs,
                rhs,
                destination,
            } => {
                let lhs = self.eval(state, *lhs)?;
                let rhs = self.eval(state, *rhs)?;
                self.execute_float_compare(state, *predicate, &lhs, &rhs, *destination)
            }
            Instruction::FCast {
                op,
                value,
                width,
                destination,
            } => {
                let value = self.eval(state, *value)?;
                self.execute_float_cast(state, *op, &value, *width, *destination)
            }
            Instruction::Alloca {
                element_size,
                count,
                destination,
            } => {
                let count = Expr::zext(self.eval(state, *count)?, POINTER_WIDTH_BITS);
                let size = Expr::mul(Expr::pointer(*element_size), count);
                self.execute_alloc(state, size, true, Some(*destination), None)
            }
            Instruction::Load {
                address,
                width,
                destination,
            } => {
                let address = self.eval_pointer(state, *address)?;
                self.execute_memory_operation(state, address, None, *width, Some(*destination))
            }
            Instruction::Store { address, value } => {
                let address = self.eval_pointer(state, *address)?;
                let value = self.eval(state, *value)?;
                let width = value.width();
                self.execute_memory_operation(state, address, Some(value), width, None)
            }
            Instruction::GetElementPtr {
                base,
                indices,
                offset,
                destination,
            } => {
                let mut address = self.eval_pointer(state, *base)?;
                for (index, scale) in indices {
                    let index = Expr::sext(self.eval(state, *index)?, POINTER_WIDTH_BITS);
                    address = Expr::add(address, Expr::mul(index, Expr::pointer(*scale)));
                }
                if *offset != 0 {
                    address = Expr::add(address, Expr::pointer(*offset));
                }
                state.frame_mut().write(*destination, address);
                Ok(())
            }
            Instruction::Phi {
                incoming,
                destination,
            } => {
                let missing = || {
                    let name = "phi without predecessor".into();
                    Error::UnsupportedInstruction { name }.locate(location)
                };
                let from = state.thread().incoming_block.ok_or_else(missing)?;
                let operand = incoming
                    .iter()
                    .find(|(block, _)| *block == from)
                    .map(|(_, operand)| *operand)
                    .ok_or_else(missing)?;
                let value = self.eval(state, operand)?;
                state.frame_mut().write(*destination, value);
                Ok(())
            }
            Instruction::Unsupported { name } => {
                let name = name.clone();
                Err(Error::UnsupportedInstruction { name }.locate(location))
            }
        }
    }

    /// Gets the value of `operand` in the innermost frame of `state`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the operand is a register that was never written.
    pub(crate) fn eval(&self, state: &ExecutionState, operand: Operand) -> Result<ExprRef> {
        match operand {
            Operand::Register(register) => state.frame().read(register, self.location),
            Operand::Constant(constant) => Ok(self.constants[constant.index()].clone()),
        }
    }

    /// Gets the value of `operand` as a pointer-width value.
    fn eval_pointer(&self, state: &ExecutionState, operand: Operand) -> Result<ExprRef> {
        Ok(Expr::zext(self.eval(state, operand)?, POINTER_WIDTH_BITS))
    }

    fn execute_binary(
        &mut self,
        state: &mut ExecutionState,
        op: BinaryOp,
        lhs: ExprRef,
        rhs: ExprRef,
        destination: Register,
    ) -> Result<()> {
        let location = self.location;
        let kind = binary_kind(op);
        if !(op.is_division() && self.config.check_division_by_zero) {
            state.frame_mut().write(destination, Expr::binary(kind, lhs, rhs));
            return Ok(());
        }

        let (zero, non_zero) = self.fork(state, Expr::is_zero(rhs.clone()), true)?;
        if let Some(zero) = zero {
            self.with_branch(state, zero, |_, _| Err(Error::DivisionByZero.locate(location)))?;
        }
        if let Some(non_zero) = non_zero {
            self.with_branch(state, non_zero, |_, state| {
                state.frame_mut().write(destination, Expr::binary(kind, lhs, rhs));
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Transfers control to one target of a switch per feasible value of
    /// `value`, forking where several are feasible.
    fn execute_switch(
        &mut self,
        state: &mut ExecutionState,
        value: ExprRef,
        default: BlockId,
        cases: &[(u64, BlockId)],
    ) -> Result<()> {
        let value = self.to_unique(state, &value);
        let width = value.width();
        if let Some(concrete) = value.as_constant() {
            let target = cases
                .iter()
                .find(|(case, _)| case & mask(width) == concrete)
                .map_or(default, |(_, block)| *block);
            self.transfer_to_block(state, target);
            return Ok(());
        }

        let mut sorted = cases.to_vec();
        sorted.sort_by_key(|(case, _)| *case);

        // The condition under which each target is taken, in order of first
        // appearance.
        let mut targets: Vec<(BlockId, ExprRef)> = Vec::new();
        let mut add_target = |block: BlockId, condition: ExprRef| {
            match targets.iter_mut().find(|(b, _)| *b == block) {
                Some((_, existing)) => *existing = Expr::or(existing.clone(), condition),
                None => targets.push((block, condition)),
            }
        };

        let mut default_condition = Expr::bool(true);
        let mut any_case = false;
        for (case, block) in sorted {
            let matches = Expr::eq(value.clone(), Expr::constant(case, width));
            default_condition = Expr::and(default_condition, Expr::is_zero(matches.clone()));
            let feasible = self
                .solver
                .may_be_true(state, &matches)
                .map_err(|_| self.query_failed())?;
            if feasible {
                add_target(block, matches);
                any_case = true;
            }
        }
        let default_feasible = self
            .solver
            .may_be_true(state, &default_condition)
            .map_err(|_| self.query_failed())?;
        if default_feasible || !any_case {
            add_target(default, default_condition);
        }

        let conditions: Vec<ExprRef> = targets.iter().map(|(_, c)| c.clone()).collect();
        let arms = self.branch(state, &conditions)?;
        for ((block, _), arm) in targets.into_iter().zip(arms) {
            let Some(arm) = arm else { continue };
            self.with_branch(state, arm, |executor, state| {
                executor.transfer_to_block(state, block);
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Moves the current thread of `state` to the start of `block`, merging
    /// the state with another one waiting there if merging is enabled.
    pub(crate) fn transfer_to_block(&mut self, state: &mut ExecutionState, block: BlockId) {
        state.thread_mut().jump_to(block);
        if !self.config.merge_at_join_points {
            return;
        }

        let pc = state.pc();
        let starts_with_phi = matches!(
            self.program
                .function(pc.function)
                .blocks()
                .get(block.index())
                .and_then(|b| b.instructions.first()),
            Some(Instruction::Phi { .. })
        );
        if !starts_with_phi {
            self.try_merge(state);
        }
    }

    /// Merges `state` into another live state at the same instruction, if
    /// there is one it can be merged with, and terminates `state`.
    fn try_merge(&mut self, state: &mut ExecutionState) -> bool {
        let pc = state.pc();
        let candidates: Vec<_> = self
            .states
            .iter()
            .filter(|(id, other)| {
                **id != state.id()
                    && !self.removed.contains(*id)
                    && other.has_current_thread()
                    && other.pc() == pc
            })
            .map(|(id, _)| *id)
            .collect();

        for id in candidates {
            let Some(other) = self.states.get(&id) else {
                continue;
            };
            let Some(mut merged) = other.merge(state) else {
                continue;
            };
            if let (Some(first), Some(second)) = (other.ptree_node, state.ptree_node) {
                merged.ptree_node = Some(self.process_tree.merge(first, second, id));
            }
            if let Some(seeds) = self.seed_map.remove(&state.id()) {
                self.seed_map.entry(id).or_default().extend(seeds);
            }

            tracing::debug!(into = %id, from = %state.id(), %pc, "merged states");
            self.states.insert(id, merged);
            self.terminate_state(state);
            return true;
        }
        false
    }
}
