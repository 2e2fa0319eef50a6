//! This module contains the representation of the programs that the executor
//! runs.
//!
//! A [`Program`] is a collection of functions, globals and constants. Defined
//! functions are made of basic blocks of [`Instruction`]s, while external
//! functions have no body and are dispatched to the host when called.
//!
//! Programs are usually put together using the [`ProgramBuilder`], and are
//! validated by the executor before any execution takes place.

pub mod builder;
pub mod instruction;

use std::fmt::{Display, Formatter};

pub use builder::{FunctionBuilder, ProgramBuilder};
pub use instruction::{
    BinaryOp,
    Callee,
    CastOp,
    FloatCastOp,
    FloatOp,
    FloatPredicate,
    Instruction,
    IntPredicate,
    Intrinsic,
    Operand,
};
use serde::{Deserialize, Serialize};

use crate::{
    constant::{FUNCTION_ADDRESS_STRIDE, FUNCTION_REGION_BASE},
    error::{
        container::Locatable,
        program::{Error, Errors},
    },
    expr::{Width, MAX_WIDTH},
};

macro_rules! index_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
        )]
        pub struct $name(pub u32);

        impl $name {
            /// Gets the index as a `usize` suitable for indexing tables.
            #[must_use]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

index_type!(
    /// Identifies a function within a [`Program`].
    FunctionId,
    "@"
);
index_type!(
    /// Identifies a basic block within a function.
    BlockId,
    "bb"
);
index_type!(
    /// Identifies a register within a function's frame.
    Register,
    "%"
);
index_type!(
    /// Identifies an entry in the program's constant table.
    ConstantId,
    "#"
);
index_type!(
    /// Identifies a global object of the program.
    GlobalId,
    "g"
);

/// The location of a single instruction in a [`Program`].
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct InstructionRef {
    pub function: FunctionId,
    pub block:    BlockId,
    pub index:    u32,
}

impl InstructionRef {
    /// Constructs a reference to the `index`th instruction of `block` in
    /// `function`.
    #[must_use]
    pub fn new(function: FunctionId, block: BlockId, index: u32) -> Self {
        Self {
            function,
            block,
            index,
        }
    }

    /// Constructs a reference to the first instruction of `block`.
    #[must_use]
    pub fn block_start(function: FunctionId, block: BlockId) -> Self {
        Self::new(function, block, 0)
    }

    /// Constructs a reference to the first instruction of `function`.
    #[must_use]
    pub fn entry(function: FunctionId) -> Self {
        Self::block_start(function, BlockId(0))
    }

    /// Gets the location of the instruction that follows this one within the
    /// same block.
    #[must_use]
    pub fn next(self) -> Self {
        Self {
            index: self.index + 1,
            ..self
        }
    }
}

impl Display for InstructionRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.function, self.block, self.index)
    }
}

/// An entry in the constant table of the program.
///
/// Floating point constants are stored as [`Self::Int`] holding their IEEE-754
/// bit pattern.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Constant {
    Int { value: u64, width: Width },
    GlobalAddress { global: GlobalId, offset: u64 },
    FunctionAddress(FunctionId),
    Null,
}

impl Constant {
    /// Constructs an integer constant.
    #[must_use]
    pub fn int(value: u64, width: Width) -> Self {
        Self::Int { value, width }
    }

    /// Constructs a single-precision floating point constant.
    #[must_use]
    pub fn f32(value: f32) -> Self {
        Self::int(u64::from(value.to_bits()), 32)
    }

    /// Constructs a double-precision floating point constant.
    #[must_use]
    pub fn f64(value: f64) -> Self {
        Self::int(value.to_bits(), 64)
    }
}

/// A global object of the program.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Global {
    pub name:        String,
    pub size:        u64,
    pub initializer: Option<Vec<u8>>,
    pub read_only:   bool,
}

/// A sequence of instructions that ends with exactly one terminator.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct BasicBlock {
    pub instructions: Vec<Instruction>,
}

/// The implementation of a function.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum FunctionBody {
    /// A function whose code is part of the program.
    Defined { blocks: Vec<BasicBlock> },

    /// A function implemented by the host, returning a value of
    /// `result_width` bits if it returns anything at all.
    External { result_width: Option<Width> },
}

/// A function of the program.
///
/// Arguments are passed in the first `parameters` registers of the callee's
/// frame.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Function {
    pub name:       String,
    pub parameters: u32,
    pub variadic:   bool,
    pub registers:  u32,
    pub body:       FunctionBody,
}

impl Function {
    /// Checks if the function is implemented by the host.
    #[must_use]
    pub fn is_external(&self) -> bool {
        matches!(self.body, FunctionBody::External { .. })
    }

    /// Gets the register that receives argument `index`.
    #[must_use]
    pub fn argument_register(&self, index: u32) -> Register {
        Register(index)
    }

    /// Gets the basic blocks of the function, which are empty for externals.
    #[must_use]
    pub fn blocks(&self) -> &[BasicBlock] {
        match &self.body {
            FunctionBody::Defined { blocks } => blocks,
            FunctionBody::External { .. } => &[],
        }
    }
}

/// A complete program that can be executed.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Program {
    functions: Vec<Function>,
    globals:   Vec<Global>,
    constants: Vec<Constant>,
    entry:     FunctionId,
}

impl Program {
    /// Constructs a new program from its parts.
    ///
    /// The program is not validated here, see [`Self::validate`].
    #[must_use]
    pub fn new(
        functions: Vec<Function>,
        globals: Vec<Global>,
        constants: Vec<Constant>,
        entry: FunctionId,
    ) -> Self {
        Self {
            functions,
            globals,
            constants,
            entry,
        }
    }

    /// Gets the function at which execution starts.
    #[must_use]
    pub fn entry(&self) -> FunctionId {
        self.entry
    }

    /// Gets the function with the provided `id`.
    ///
    /// # Panics
    ///
    /// If `id` does not name a function in the program, which cannot happen
    /// for a validated program.
    #[must_use]
    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.index()]
    }

    /// Gets the function with the provided `id` if it exists.
    #[must_use]
    pub fn get_function(&self, id: FunctionId) -> Option<&Function> {
        self.functions.get(id.index())
    }

    /// Iterates over all functions with their identifiers.
    pub fn functions(&self) -> impl Iterator<Item = (FunctionId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (FunctionId(i as u32), f))
    }

    /// Looks up a function by `name`.
    #[must_use]
    pub fn function_by_name(&self, name: &str) -> Option<FunctionId> {
        self.functions().find(|(_, f)| f.name == name).map(|(id, _)| id)
    }

    /// Gets the address used for pointers to `function`.
    #[must_use]
    pub fn function_address(&self, function: FunctionId) -> u64 {
        FUNCTION_REGION_BASE + u64::from(function.0) * FUNCTION_ADDRESS_STRIDE
    }

    /// Maps an address back to the function it points to, if any.
    #[must_use]
    pub fn function_at_address(&self, address: u64) -> Option<FunctionId> {
        let offset = address.checked_sub(FUNCTION_REGION_BASE)?;
        if offset % FUNCTION_ADDRESS_STRIDE != 0 {
            return None;
        }
        let index = u32::try_from(offset / FUNCTION_ADDRESS_STRIDE).ok()?;
        let id = FunctionId(index);
        self.get_function(id).map(|_| id)
    }

    /// Gets the global with the provided `id`.
    ///
    /// # Panics
    ///
    /// If `id` does not name a global in the program.
    #[must_use]
    pub fn global(&self, id: GlobalId) -> &Global {
        &self.globals[id.index()]
    }

    /// Iterates over all globals with their identifiers.
    pub fn globals(&self) -> impl Iterator<Item = (GlobalId, &Global)> {
        self.globals
            .iter()
            .enumerate()
            .map(|(i, g)| (GlobalId(i as u32), g))
    }

    /// Gets the constant table of the program.
    #[must_use]
    pub fn constants(&self) -> &[Constant] {
        &self.constants
    }

    /// Gets the instruction at `location`.
    ///
    /// # Panics
    ///
    /// If `location` is not inside a defined function of the program.
    #[must_use]
    pub fn instruction(&self, location: InstructionRef) -> &Instruction {
        &self.function(location.function).blocks()[location.block.index()].instructions
            [location.index as usize]
    }

    /// Checks the structural well-formedness of the program, reporting every
    /// problem found.
    ///
    /// # Errors
    ///
    /// If any function, block, instruction or constant is malformed.
    pub fn validate(&self) -> Result<(), Errors> {
        let mut errors = Errors::new();

        match self.get_function(self.entry) {
            None => errors.add_located(
                InstructionRef::entry(self.entry),
                Error::UnknownFunction {
                    function: self.entry,
                },
            ),
            Some(f) if f.is_external() => errors.add_located(
                InstructionRef::entry(self.entry),
                Error::ExternalEntry {
                    name: f.name.clone(),
                },
            ),
            Some(_) => (),
        }

        for constant in &self.constants {
            match constant {
                Constant::Int { width, .. } if *width == 0 || *width > MAX_WIDTH => errors
                    .add_located(InstructionRef::default(), Error::InvalidWidth { width: *width }),
                Constant::GlobalAddress { global, .. } if global.index() >= self.globals.len() => {
                    errors.add_located(
                        InstructionRef::default(),
                        Error::UnknownGlobal { global: *global },
                    );
                }
                Constant::FunctionAddress(function) if self.get_function(*function).is_none() => {
                    errors.add_located(
                        InstructionRef::default(),
                        Error::UnknownFunction {
                            function: *function,
                        },
                    );
                }
                _ => (),
            }
        }

        for (id, function) in self.functions() {
            if let Err(e) = self.validate_function(id, function) {
                errors.add_many_located(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_function(&self, id: FunctionId, function: &Function) -> Result<(), Errors> {
        let mut errors = Errors::new();
        let FunctionBody::Defined { blocks } = &function.body else {
            return Ok(());
        };

        if blocks.is_empty() {
            errors.add_located(
                InstructionRef::entry(id),
                Error::EmptyFunction {
                    name: function.name.clone(),
                },
            );
        }
        if function.parameters > function.registers {
            errors.add_located(
                InstructionRef::entry(id),
                Error::RegisterOutOfRange {
                    register:  Register(function.parameters - 1),
                    available: function.registers,
                },
            );
        }

        for (block_index, block) in blocks.iter().enumerate() {
            let block_id = BlockId(block_index as u32);
            let last = block.instructions.len().saturating_sub(1);
            if block.instructions.last().map_or(true, |i| !i.is_terminator()) {
                errors.add_located(
                    InstructionRef::new(id, block_id, last as u32),
                    Error::MissingTerminator,
                );
            }

            for (index, instruction) in block.instructions.iter().enumerate() {
                let location = InstructionRef::new(id, block_id, index as u32);
                if index != last && instruction.is_terminator() {
                    errors.add_located(location, Error::TerminatorNotLast);
                }
                if let Err(e) = self.validate_instruction(function, blocks.len(), instruction) {
                    errors.add(e.locate(location));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_instruction(
        &self,
        function: &Function,
        block_count: usize,
        instruction: &Instruction,
    ) -> Result<(), Error> {
        let check_register = |register: Register| {
            if register.0 < function.registers {
                Ok(())
            } else {
                Err(Error::RegisterOutOfRange {
                    register,
                    available: function.registers,
                })
            }
        };

        for operand in instruction.operands() {
            match operand {
                Operand::Register(r) => check_register(r)?,
                Operand::Constant(c) if c.index() >= self.constants.len() => {
                    return Err(Error::UnknownConstant { constant: c });
                }
                Operand::Constant(_) => (),
            }
        }
        if let Some(destination) = instruction.destination() {
            check_register(destination)?;
        }
        for block in instruction.successors() {
            if block.index() >= block_count {
                return Err(Error::UnknownBlock { block });
            }
        }

        match instruction {
            Instruction::Phi { incoming, .. } => {
                if let Some((block, _)) = incoming.iter().find(|(b, _)| b.index() >= block_count) {
                    return Err(Error::UnknownBlock { block: *block });
                }
            }
            Instruction::Call {
                callee: Callee::Function(f),
                ..
            } if self.get_function(*f).is_none() => {
                return Err(Error::UnknownFunction { function: *f });
            }
            Instruction::Call {
                callee: Callee::Intrinsic(intrinsic),
                arguments,
                ..
            } if arguments.len() != intrinsic.arity() => {
                return Err(Error::IntrinsicArity {
                    name:     intrinsic.name().to_string(),
                    expected: intrinsic.arity(),
                    actual:   arguments.len(),
                });
            }
            Instruction::Load { width, .. }
            | Instruction::Cast { width, .. }
            | Instruction::FCast { width, .. }
                if *width == 0 || *width > MAX_WIDTH =>
            {
                return Err(Error::InvalidWidth { width: *width });
            }
            _ => (),
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::{
        error::program::Error,
        program::{
            BasicBlock,
            BlockId,
            Function,
            FunctionBody,
            FunctionId,
            Instruction,
            InstructionRef,
            Program,
            ProgramBuilder,
        },
    };

    #[test]
    fn instruction_refs_order_by_position() {
        let a = InstructionRef::new(FunctionId(0), BlockId(1), 4);
        let b = a.next();
        assert!(a < b);
        assert_eq!(b.to_string(), "@0:bb1:5");
    }

    #[test]
    fn function_addresses_round_trip() {
        let mut builder = ProgramBuilder::new();
        let main = builder.declare_function("main", 0, false);
        let mut f = builder.define(main);
        f.ret(None);
        f.finish();
        let program = builder.build(main);

        let address = program.function_address(main);
        assert_eq!(program.function_at_address(address), Some(main));
        assert_eq!(program.function_at_address(address + 1), None);
        assert_eq!(program.function_at_address(0), None);
    }

    #[test]
    fn validation_reports_every_problem() {
        let blocks = vec![BasicBlock {
            instructions: vec![
                Instruction::Ret { value: None },
                Instruction::Br {
                    target: BlockId(7),
                },
            ],
        }];
        let main = Function {
            name:       "main".into(),
            parameters: 0,
            variadic:   false,
            registers:  0,
            body:       FunctionBody::Defined { blocks },
        };
        let program = Program::new(vec![main], vec![], vec![], FunctionId(0));

        let errors = program.validate().expect_err("program is malformed");
        let payloads = errors.payloads().iter().map(|e| e.payload.clone()).collect::<Vec<_>>();
        assert!(payloads.contains(&Error::TerminatorNotLast));
        assert!(payloads.contains(&Error::UnknownBlock { block: BlockId(7) }));
    }
}
