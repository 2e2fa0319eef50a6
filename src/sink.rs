//! This module contains the records the executor emits for every terminated
//! state, and the sinks that receive them.

use std::fmt::{Debug, Display, Formatter};

use downcast_rs::{impl_downcast, Downcast};
use serde::{Deserialize, Serialize};

use crate::{
    error::execution::ErrorKind,
    program::InstructionRef,
    vm::state::{StackTraceEntry, StateId},
};

/// Why a state stopped being explored.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Termination {
    /// The program exited normally.
    Exit,

    /// The program did something wrong.
    Error { kind: ErrorKind, message: String },

    /// The executor gave up on the state.
    Early { reason: String },
}

impl Termination {
    /// Gets the tag of the termination, `exit`, `error:<kind>` or
    /// `early:<reason>`.
    #[must_use]
    pub fn tag(&self) -> String {
        self.to_string()
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

impl Display for Termination {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exit => write!(f, "exit"),
            Self::Error { kind, .. } => write!(f, "error:{kind}"),
            Self::Early { reason } => write!(f, "early:{reason}"),
        }
    }
}

/// The concrete contents of one symbolic input.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TestInput {
    pub name: String,

    #[serde(with = "hex_bytes")]
    pub bytes: Vec<u8>,
}

/// Concrete inputs that drive the program down the path of a state.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "type", content = "inputs", rename_all = "snake_case")]
pub enum Solution {
    Inputs(Vec<TestInput>),

    /// The path constraints have no solution.
    NoSolution,

    /// The solver could not decide the path constraints.
    SolverFailure,
}

impl Solution {
    /// Gets the bytes of the input called `name`, if there is a solution.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&[u8]> {
        match self {
            Self::Inputs(inputs) => inputs
                .iter()
                .find(|i| i.name == name)
                .map(|i| i.bytes.as_slice()),
            _ => None,
        }
    }
}

/// The record of one terminated state.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TestCase {
    pub state: StateId,

    pub termination: Termination,

    /// The path constraints of the state, rendered for humans.
    pub constraints: Vec<String>,

    pub solution: Solution,

    /// The instruction the state executed last.
    pub location: InstructionRef,

    /// The call stack at termination, innermost frame first.
    pub stack_trace: Vec<StackTraceEntry>,

    /// The branch directions taken at each fork along the path.
    pub path: Vec<bool>,

    /// Extra information about an error, such as where a bad pointer could
    /// point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// The receiver of test cases.
pub trait TestCaseSink
where
    Self: Debug + Downcast,
{
    /// Accepts the test case of a terminated state.
    fn process_test_case(&mut self, test_case: TestCase);
}
impl_downcast!(TestCaseSink);

/// A dynamically dispatched [`TestCaseSink`] instance.
pub type DynSink = Box<dyn TestCaseSink>;

/// A sink that keeps every test case in memory.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    test_cases: Vec<TestCase>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn test_cases(&self) -> &[TestCase] {
        &self.test_cases
    }

    /// Takes the collected test cases out of the sink.
    pub fn take(&mut self) -> Vec<TestCase> {
        std::mem::take(&mut self.test_cases)
    }
}

impl TestCaseSink for MemorySink {
    fn process_test_case(&mut self, test_case: TestCase) {
        self.test_cases.push(test_case);
    }
}

/// A sink that drops every test case.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl TestCaseSink for NullSink {
    fn process_test_case(&mut self, _test_case: TestCase) {}
}

/// Serializes byte buffers as hex strings.
mod hex_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::{
        error::execution::ErrorKind,
        program::{FunctionId, InstructionRef},
        sink::{MemorySink, Solution, TestCase, TestCaseSink, TestInput, Termination},
        vm::state::StateId,
    };

    fn test_case(termination: Termination) -> TestCase {
        TestCase {
            state: StateId(3),
            termination,
            constraints: vec!["(Ult x 10)".into()],
            solution: Solution::Inputs(vec![TestInput {
                name:  "x".into(),
                bytes: vec![0x0a, 0xff],
            }]),
            location:    InstructionRef::entry(FunctionId(0)),
            stack_trace: vec![],
            path:        vec![true, false],
            details:     None,
        }
    }

    #[test]
    fn terminations_render_as_tags() {
        assert_eq!(Termination::Exit.tag(), "exit");
        let error = Termination::Error {
            kind:    ErrorKind::Pointer,
            message: "memory error: out of bound pointer".into(),
        };
        assert_eq!(error.tag(), "error:ptr");
        assert!(error.is_error());
        let early = Termination::Early {
            reason: "memory limit".into(),
        };
        assert_eq!(early.tag(), "early:memory limit");
    }

    #[test]
    fn test_cases_serialize_inputs_as_hex() -> anyhow::Result<()> {
        let case = test_case(Termination::Exit);
        let json = serde_json::to_value(&case)?;
        assert_eq!(json["solution"]["inputs"][0]["bytes"], "0aff");
        assert_eq!(json["termination"]["type"], "exit");

        let back: TestCase = serde_json::from_value(json)?;
        assert_eq!(back, case);
        assert_eq!(back.solution.input("x"), Some(&[0x0a, 0xff][..]));
        Ok(())
    }

    #[test]
    fn memory_sink_collects_cases() {
        let mut sink = MemorySink::new();
        sink.process_test_case(test_case(Termination::Exit));
        assert_eq!(sink.test_cases().len(), 1);
        assert_eq!(sink.take().len(), 1);
        assert!(sink.test_cases().is_empty());
    }
}
