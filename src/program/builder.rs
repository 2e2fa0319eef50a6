//! This module contains a builder for programs, which takes care of allocating
//! registers, blocks and constant table entries.

use crate::{
    expr::Width,
    program::{
        BasicBlock,
        BinaryOp,
        BlockId,
        Callee,
        CastOp,
        Constant,
        ConstantId,
        FloatCastOp,
        FloatOp,
        FloatPredicate,
        Function,
        FunctionBody,
        FunctionId,
        Global,
        GlobalId,
        Instruction,
        IntPredicate,
        Intrinsic,
        Operand,
        Program,
        Register,
    },
};

/// Builds a [`Program`] incrementally.
///
/// Functions are declared first so that they can be referenced before their
/// bodies exist, and are then given bodies through [`Self::define`].
#[derive(Clone, Debug, Default)]
pub struct ProgramBuilder {
    functions: Vec<Function>,
    globals:   Vec<Global>,
    constants: Vec<Constant>,
}

impl ProgramBuilder {
    /// Creates a new builder for an empty program.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a function that will be given a body by [`Self::define`].
    pub fn declare_function(
        &mut self,
        name: impl Into<String>,
        parameters: u32,
        variadic: bool,
    ) -> FunctionId {
        let body = FunctionBody::Defined { blocks: vec![] };
        self.push_function(name.into(), parameters, variadic, body)
    }

    /// Declares a function that is implemented by the host.
    pub fn declare_external(
        &mut self,
        name: impl Into<String>,
        parameters: u32,
        variadic: bool,
        result_width: Option<Width>,
    ) -> FunctionId {
        let body = FunctionBody::External { result_width };
        self.push_function(name.into(), parameters, variadic, body)
    }

    fn push_function(
        &mut self,
        name: String,
        parameters: u32,
        variadic: bool,
        body: FunctionBody,
    ) -> FunctionId {
        let id = FunctionId(self.functions.len() as u32);
        self.functions.push(Function {
            name,
            parameters,
            variadic,
            registers: parameters,
            body,
        });
        id
    }

    /// Adds a global object of `size` bytes, zero-initialized unless an
    /// `initializer` is provided.
    pub fn add_global(
        &mut self,
        name: impl Into<String>,
        size: u64,
        initializer: Option<Vec<u8>>,
        read_only: bool,
    ) -> GlobalId {
        let id = GlobalId(self.globals.len() as u32);
        self.globals.push(Global {
            name: name.into(),
            size,
            initializer,
            read_only,
        });
        id
    }

    /// Adds `constant` to the constant table, reusing an existing equal entry.
    pub fn constant(&mut self, constant: Constant) -> Operand {
        let index = self.constants.iter().position(|c| *c == constant).unwrap_or_else(|| {
            self.constants.push(constant);
            self.constants.len() - 1
        });
        Operand::Constant(ConstantId(index as u32))
    }

    /// Adds an integer constant of `width` bits.
    pub fn int(&mut self, value: u64, width: Width) -> Operand {
        self.constant(Constant::int(value, width))
    }

    /// Starts defining the body of `function`.
    pub fn define(&mut self, function: FunctionId) -> FunctionBuilder<'_> {
        let registers = self.functions[function.index()].parameters;
        FunctionBuilder {
            program: self,
            function,
            blocks:  vec![BasicBlock::default()],
            current: BlockId(0),
            registers,
        }
    }

    /// Finishes the program with `entry` as the function where execution
    /// starts.
    #[must_use]
    pub fn build(self, entry: FunctionId) -> Program {
        Program::new(self.functions, self.globals, self.constants, entry)
    }
}

/// Builds the body of a single function.
///
/// The builder starts positioned at the function's entry block. Changes are
/// only written back into the program by [`Self::finish`].
#[derive(Debug)]
pub struct FunctionBuilder<'a> {
    program:   &'a mut ProgramBuilder,
    function:  FunctionId,
    blocks:    Vec<BasicBlock>,
    current:   BlockId,
    registers: u32,
}

impl<'a> FunctionBuilder<'a> {
    /// Gets the register holding parameter `index`.
    #[must_use]
    pub fn param(&self, index: u32) -> Operand {
        Operand::Register(Register(index))
    }

    /// Allocates a fresh register.
    pub fn fresh(&mut self) -> Register {
        let register = Register(self.registers);
        self.registers += 1;
        register
    }

    /// Creates a new, empty, block without moving to it.
    pub fn block(&mut self) -> BlockId {
        self.blocks.push(BasicBlock::default());
        BlockId(self.blocks.len() as u32 - 1)
    }

    /// Positions the builder at the end of `block`.
    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    /// Gets the block the builder is positioned in.
    #[must_use]
    pub fn current_block(&self) -> BlockId {
        self.current
    }

    /// Appends `instruction` to the current block.
    pub fn push(&mut self, instruction: Instruction) {
        self.blocks[self.current.index()].instructions.push(instruction);
    }

    /// Adds an integer constant.
    pub fn int(&mut self, value: u64, width: Width) -> Operand {
        self.program.int(value, width)
    }

    /// Adds a constant to the program's constant table.
    pub fn constant(&mut self, constant: Constant) -> Operand {
        self.program.constant(constant)
    }

    /// Refers to the address of `global`.
    pub fn global(&mut self, global: GlobalId) -> Operand {
        self.program.constant(Constant::GlobalAddress { global, offset: 0 })
    }

    /// Refers to the address of `function`.
    pub fn function_pointer(&mut self, function: FunctionId) -> Operand {
        self.program.constant(Constant::FunctionAddress(function))
    }

    /// Refers to the null pointer.
    pub fn null(&mut self) -> Operand {
        self.program.constant(Constant::Null)
    }

    fn with_destination(&mut self, build: impl FnOnce(Register) -> Instruction) -> Operand {
        let destination = self.fresh();
        let instruction = build(destination);
        self.push(instruction);
        Operand::Register(destination)
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: Operand, rhs: Operand) -> Operand {
        self.with_destination(|destination| Instruction::Binary {
            op,
            lhs,
            rhs,
            destination,
        })
    }

    pub fn icmp(&mut self, predicate: IntPredicate, lhs: Operand, rhs: Operand) -> Operand {
        self.with_destination(|destination| Instruction::ICmp {
            predicate,
            lhs,
            rhs,
            destination,
        })
    }

    pub fn select(&mut self, condition: Operand, if_true: Operand, if_false: Operand) -> Operand {
        self.with_destination(|destination| Instruction::Select {
            condition,
            if_true,
            if_false,
            destination,
        })
    }

    pub fn cast(&mut self, op: CastOp, value: Operand, width: Width) -> Operand {
        self.with_destination(|destination| Instruction::Cast {
            op,
            value,
            width,
            destination,
        })
    }

    pub fn fbinary(&mut self, op: FloatOp, lhs: Operand, rhs: Operand) -> Operand {
        self.with_destination(|destination| Instruction::FBinary {
            op,
            lhs,
            rhs,
            destination,
        })
    }

    pub fn fcmp(&mut self, predicate: FloatPredicate, lhs: Operand, rhs: Operand) -> Operand {
        self.with_destination(|destination| Instruction::FCmp {
            predicate,
            lhs,
            rhs,
            destination,
        })
    }

    pub fn fcast(&mut self, op: FloatCastOp, value: Operand, width: Width) -> Operand {
        self.with_destination(|destination| Instruction::FCast {
            op,
            value,
            width,
            destination,
        })
    }

    /// Allocates `count` elements of `element_size` bytes on the stack.
    pub fn alloca(&mut self, element_size: u64, count: Operand) -> Operand {
        self.with_destination(|destination| Instruction::Alloca {
            element_size,
            count,
            destination,
        })
    }

    pub fn load(&mut self, address: Operand, width: Width) -> Operand {
        self.with_destination(|destination| Instruction::Load {
            address,
            width,
            destination,
        })
    }

    pub fn store(&mut self, address: Operand, value: Operand) {
        self.push(Instruction::Store { address, value });
    }

    /// Computes `base + offset + sum(index * size)`.
    pub fn gep(&mut self, base: Operand, indices: Vec<(Operand, u64)>, offset: u64) -> Operand {
        self.with_destination(|destination| Instruction::GetElementPtr {
            base,
            indices,
            offset,
            destination,
        })
    }

    pub fn phi(&mut self, incoming: Vec<(BlockId, Operand)>) -> Operand {
        self.with_destination(|destination| Instruction::Phi {
            incoming,
            destination,
        })
    }

    /// Calls `callee` and keeps its result.
    pub fn call(&mut self, callee: Callee, arguments: Vec<Operand>) -> Operand {
        self.with_destination(|destination| Instruction::Call {
            callee,
            arguments,
            destination: Some(destination),
        })
    }

    /// Calls `callee`, discarding any result.
    pub fn call_void(&mut self, callee: Callee, arguments: Vec<Operand>) {
        self.push(Instruction::Call {
            callee,
            arguments,
            destination: None,
        });
    }

    /// Invokes `intrinsic` and keeps its result.
    pub fn intrinsic(&mut self, intrinsic: Intrinsic, arguments: Vec<Operand>) -> Operand {
        self.call(Callee::Intrinsic(intrinsic), arguments)
    }

    /// Invokes `intrinsic`, discarding any result.
    pub fn intrinsic_void(&mut self, intrinsic: Intrinsic, arguments: Vec<Operand>) {
        self.call_void(Callee::Intrinsic(intrinsic), arguments);
    }

    pub fn ret(&mut self, value: Option<Operand>) {
        self.push(Instruction::Ret { value });
    }

    pub fn br(&mut self, target: BlockId) {
        self.push(Instruction::Br { target });
    }

    pub fn cond_br(&mut self, condition: Operand, if_true: BlockId, if_false: BlockId) {
        self.push(Instruction::CondBr {
            condition,
            if_true,
            if_false,
        });
    }

    pub fn switch(&mut self, condition: Operand, default: BlockId, cases: Vec<(u64, BlockId)>) {
        self.push(Instruction::Switch {
            condition,
            default,
            cases,
        });
    }

    pub fn unreachable(&mut self) {
        self.push(Instruction::Unreachable);
    }

    /// Writes the body back into the program under construction.
    pub fn finish(self) {
        let function = &mut self.program.functions[self.function.index()];
        function.registers = self.registers;
        function.body = FunctionBody::Defined {
            blocks: self.blocks,
        };
    }
}

#[cfg(test)]
mod test {
    use crate::program::{BinaryOp, BlockId, Callee, FunctionBody, ProgramBuilder};

    #[test]
    fn builds_a_valid_program() -> anyhow::Result<()> {
        let mut builder = ProgramBuilder::new();
        let main = builder.declare_function("main", 0, false);
        let helper = builder.declare_function("double", 1, false);

        let mut f = builder.define(helper);
        let x = f.param(0);
        let doubled = f.binary(BinaryOp::Add, x, x);
        f.ret(Some(doubled));
        f.finish();

        let mut f = builder.define(main);
        let exit = f.block();
        let seven = f.int(7, 32);
        let result = f.call(Callee::Function(helper), vec![seven]);
        f.br(exit);
        f.switch_to(exit);
        f.ret(Some(result));
        f.finish();

        let program = builder.build(main);
        program.validate()?;

        assert_eq!(program.function(helper).registers, 2);
        match &program.function(main).body {
            FunctionBody::Defined { blocks } => assert_eq!(blocks.len(), 2),
            FunctionBody::External { .. } => panic!("main should be defined"),
        }
        assert_eq!(program.function_by_name("double"), Some(helper));
        assert_eq!(exit, BlockId(1));

        Ok(())
    }

    #[test]
    fn constants_are_deduplicated() {
        let mut builder = ProgramBuilder::new();
        let a = builder.int(1, 32);
        let b = builder.int(1, 32);
        let c = builder.int(1, 64);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
