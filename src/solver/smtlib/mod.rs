//! This module contains a solver backend that drives an external SMT solver
//! process through SMT-LIB 2 over its standard input and output.
//!
//! The process is started lazily on the first query and reused for every
//! query after that. Each query runs in its own `push`/`pop` scope, so the
//! solver never accumulates state between queries.

pub mod parse;
pub mod serialize;

use std::{
    fmt::Write as _,
    io::{BufRead, BufReader, BufWriter, Read, Write},
    process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio},
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use crate::{
    expr::Array,
    solver::{
        smtlib::{
            parse::{count_parens, parse_values},
            serialize::{literal, Serializer},
        },
        Error,
        Query,
        Result,
        Solver,
        Validity,
    },
};

/// A description of how to launch and talk to a particular SMT solver binary.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SolverBinary {
    /// The name of the executable, looked up on the `PATH`.
    pub name: &'static str,

    /// The arguments that put the solver into incremental SMT-LIB mode.
    pub args: &'static [&'static str],

    /// Boolean options to enable once the solver has started.
    pub options: &'static [&'static str],

    /// The option that sets a per-query timeout in milliseconds, if the solver
    /// supports one.
    pub timeout_option: Option<&'static str>,
}

/// The Z3 solver.
pub const Z3: SolverBinary = SolverBinary {
    name:           "z3",
    args:           &["-in", "-smt2"],
    options:        &["produce-models"],
    timeout_option: Some("timeout"),
};

/// The Bitwuzla solver.
pub const BITWUZLA: SolverBinary = SolverBinary {
    name:           "bitwuzla",
    args:           &[],
    options:        &["incremental", "produce-models"],
    timeout_option: Some("time-limit-per"),
};

/// The Yices2 solver.
pub const YICES2: SolverBinary = SolverBinary {
    name:           "yices-smt2",
    args:           &["--incremental"],
    options:        &["produce-models"],
    timeout_option: None,
};

/// The answer to a `(check-sat)` command.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum CheckSat {
    Sat,
    Unsat,
    Unknown,
}

/// A running solver process.
#[derive(Debug)]
struct Process {
    child:  Child,
    stdin:  BufWriter<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    stderr: ChildStderr,

    /// Set once the solver reported an error, after which it may no longer
    /// respond.
    has_error: bool,
}

/// A [`Solver`] that answers queries using an external SMT solver.
#[derive(Debug)]
pub struct SmtLibSolver {
    binary:  SolverBinary,
    process: Option<Process>,
}

impl SmtLibSolver {
    /// Constructs a solver backed by `binary`. The process is only started when
    /// the first query arrives.
    #[must_use]
    pub fn new(binary: SolverBinary) -> Self {
        let process = None;
        Self { binary, process }
    }

    #[must_use]
    pub fn binary(&self) -> &SolverBinary {
        &self.binary
    }

    /// Gets the running process, starting it if necessary.
    fn process(&mut self) -> Result<&mut Process> {
        if self.process.as_ref().is_some_and(|p| p.has_error) {
            self.process = None;
        }
        if self.process.is_none() {
            let process = start(&self.binary)?;
            self.process = Some(process);
        }
        self.process.as_mut().ok_or_else(|| Error::Process {
            message: format!("{} is not running", self.binary.name),
        })
    }

    /// Sends `script` to the solver.
    fn send(&mut self, script: &str) -> Result<()> {
        let name = self.binary.name;
        let process = self.process()?;
        let result = process.stdin.write_all(script.as_bytes()).and_then(|()| process.stdin.flush());
        result.map_err(|e| {
            process.has_error = true;
            Error::Process {
                message: format!("{name} is unreachable: {e}"),
            }
        })
    }

    /// Reads a complete response from the solver.
    fn receive(&mut self) -> Result<String> {
        let name = self.binary.name;
        let process = self.process()?;
        let io_error = |e: std::io::Error| Error::Process {
            message: format!("{name}: {e}"),
        };

        let mut response = String::new();
        process.stdout.read_line(&mut response).map_err(io_error)?;
        while count_parens(&response) > 0 {
            response.push(' ');
            if process.stdout.read_line(&mut response).map_err(io_error)? == 0 {
                break;
            }
        }

        if response.trim_start().starts_with("(error") {
            process.has_error = true;
            return Err(Error::Process {
                message: format!("{name} reported an error: {}", response.trim()),
            });
        }
        if response.is_empty() {
            process.has_error = true;
            let mut stderr = String::new();
            let _ = process.stderr.read_to_string(&mut stderr);
            return Err(Error::Process {
                message: format!("{name} exited unexpectedly: {}", stderr.trim()),
            });
        }
        Ok(response)
    }

    /// Runs `(check-sat)`, turning an `unknown` answer into an error.
    fn check_sat(&mut self, started: Instant, timeout: Option<Duration>) -> Result<bool> {
        self.send("(check-sat)\n")?;
        let response = self.receive()?;
        let answer = match response.trim() {
            "sat" => CheckSat::Sat,
            "unsat" => CheckSat::Unsat,
            "unknown" => CheckSat::Unknown,
            other => {
                return Err(Error::Response {
                    response: other.to_string(),
                    reason:   "expected sat, unsat or unknown".to_string(),
                })
            }
        };

        match answer {
            CheckSat::Sat => Ok(true),
            CheckSat::Unsat => Ok(false),
            CheckSat::Unknown => {
                let elapsed = started.elapsed();
                if timeout.is_some_and(|t| elapsed >= t) {
                    Err(Error::Timeout { elapsed })
                } else {
                    Err(Error::Unsupported {
                        solver: self.binary.name.to_string(),
                        reason: "the solver answered unknown".to_string(),
                    })
                }
            }
        }
    }

    /// Opens a scope asserting the constraints of `query` and defining
    /// `query.expr` and `arrays`.
    ///
    /// The serializer is returned so that further terms can refer to the
    /// definitions made in the scope.
    fn open_scope(&mut self, query: &Query, arrays: &[Arc<Array>]) -> Result<Serializer> {
        let mut serializer = Serializer::new();
        let mut assertions = String::new();
        for constraint in query.constraints {
            let _ = writeln!(assertions, "(assert {})", serializer.assertion(constraint));
        }
        serializer.term(&query.expr);
        for array in arrays {
            serializer.array(array);
        }

        let mut script = String::from("(push 1)\n");
        if let (Some(option), Some(timeout)) = (self.binary.timeout_option, query.timeout) {
            let _ = writeln!(script, "(set-option :{option} {})", timeout.as_millis().max(1));
        }
        script.push_str(&serializer.preamble());
        script.push_str(&assertions);
        self.send(&script)?;
        Ok(serializer)
    }

    fn close_scope(&mut self) -> Result<()> {
        self.send("(pop 1)\n")
    }

    /// Checks whether `assertion` is satisfiable in the current scope.
    fn check_assuming(
        &mut self,
        assertion: &str,
        started: Instant,
        timeout: Option<Duration>,
    ) -> Result<bool> {
        self.send(&format!("(push 1)\n(assert {assertion})\n"))?;
        let result = self.check_sat(started, timeout);
        self.close_scope()?;
        result
    }

    /// Runs `body` in a fresh scope for `query`, always closing the scope
    /// again.
    fn scoped<T>(
        &mut self,
        query: &Query,
        arrays: &[Arc<Array>],
        body: impl FnOnce(&mut Self, &mut Serializer) -> Result<T>,
    ) -> Result<T> {
        let mut serializer = self.open_scope(query, arrays)?;
        let result = body(self, &mut serializer);
        let closed = self.close_scope();
        let value = result?;
        closed?;
        Ok(value)
    }

    fn get_values(&mut self, terms: &[String]) -> Result<Vec<u64>> {
        if terms.is_empty() {
            return Ok(vec![]);
        }
        self.send(&format!("(get-value ({}))\n", terms.join(" ")))?;
        let response = self.receive()?;
        let values = parse_values(&response)?;
        if values.len() == terms.len() {
            Ok(values)
        } else {
            Err(Error::Response {
                response,
                reason: format!("expected {} values", terms.len()),
            })
        }
    }
}

impl Solver for SmtLibSolver {
    fn name(&self) -> &str {
        self.binary.name
    }

    fn evaluate(&mut self, query: &Query) -> Result<Validity> {
        let started = Instant::now();
        self.scoped(query, &[], |solver, serializer| {
            let term = serializer.term(&query.expr);
            let may_be_false =
                solver.check_assuming(&format!("(= {term} #b0)"), started, query.timeout)?;
            if !may_be_false {
                return Ok(Validity::True);
            }
            let may_be_true =
                solver.check_assuming(&format!("(= {term} #b1)"), started, query.timeout)?;
            Ok(if may_be_true {
                Validity::Unknown
            } else {
                Validity::False
            })
        })
    }

    fn get_value(&mut self, query: &Query) -> Result<u64> {
        let started = Instant::now();
        self.scoped(query, &[], |solver, serializer| {
            if !solver.check_sat(started, query.timeout)? {
                return Err(Error::Unsatisfiable);
            }
            let term = serializer.term(&query.expr);
            let values = solver.get_values(&[term])?;
            values.first().copied().ok_or(Error::Unsatisfiable)
        })
    }

    fn get_initial_values(
        &mut self,
        query: &Query,
        arrays: &[Arc<Array>],
    ) -> Result<Option<Vec<Vec<u8>>>> {
        let started = Instant::now();
        self.scoped(query, arrays, |solver, serializer| {
            let term = serializer.term(&query.expr);
            solver.send(&format!("(assert (= {term} #b0))\n"))?;
            if !solver.check_sat(started, query.timeout)? {
                return Ok(None);
            }

            let mut solution = Vec::with_capacity(arrays.len());
            for array in arrays {
                let name = serializer.array(array);
                let terms: Vec<String> = (0..array.size())
                    .map(|i| format!("(select {name} {})", literal(i, 32)))
                    .collect();
                let bytes = solver.get_values(&terms)?;
                solution.push(bytes.into_iter().map(|b| b as u8).collect());
            }
            Ok(Some(solution))
        })
    }
}

impl Drop for SmtLibSolver {
    fn drop(&mut self) {
        let Some(mut process) = self.process.take() else {
            return;
        };
        if process.has_error {
            let _ = process.child.kill();
        } else if process.stdin.write_all(b"(exit)\n").and_then(|()| process.stdin.flush()).is_err() {
            warn!(solver = self.binary.name, "failed to ask the solver to exit");
            let _ = process.child.kill();
        }
        let _ = process.child.wait();
    }
}

/// Launches `binary` and configures it for incremental use.
fn start(binary: &SolverBinary) -> Result<Process> {
    let spawn_error = |e: std::io::Error| Error::Process {
        message: format!("could not start {}: {e}", binary.name),
    };
    let mut child = Command::new(binary.name)
        .args(binary.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(spawn_error)?;

    let missing = |stream: &str| Error::Process {
        message: format!("{} has no {stream}", binary.name),
    };
    let stdin = BufWriter::new(child.stdin.take().ok_or_else(|| missing("stdin"))?);
    let stdout = BufReader::new(child.stdout.take().ok_or_else(|| missing("stdout"))?);
    let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;
    let mut process = Process {
        child,
        stdin,
        stdout,
        stderr,
        has_error: false,
    };

    let mut script = String::new();
    for option in binary.options {
        let _ = writeln!(script, "(set-option :{option} true)");
    }
    script.push_str("(set-logic QF_ABV)\n");
    process
        .stdin
        .write_all(script.as_bytes())
        .and_then(|()| process.stdin.flush())
        .map_err(spawn_error)?;

    debug!(solver = binary.name, "started solver process");
    Ok(process)
}

#[cfg(test)]
mod test {
    use crate::{
        expr::{Array, ConstraintSet, Expr, UpdateList},
        solver::{
            smtlib::{SmtLibSolver, Z3},
            Query,
            Solver,
            Validity,
        },
    };

    #[test]
    #[ignore = "requires z3 on the PATH"]
    fn answers_queries_with_z3() -> anyhow::Result<()> {
        let array = Array::symbolic("x", 1);
        let x = Expr::read(UpdateList::new(array.clone()), Expr::constant(0, 32));
        let mut solver = SmtLibSolver::new(Z3);
        let mut constraints = ConstraintSet::new();

        let below_ten = Expr::ult(x.clone(), Expr::constant(10, 8));
        assert_eq!(solver.evaluate(&Query::new(&constraints, below_ten.clone()))?, Validity::Unknown);

        constraints.add(below_ten);
        let below_twenty = Expr::ult(x.clone(), Expr::constant(20, 8));
        assert_eq!(solver.evaluate(&Query::new(&constraints, below_twenty))?, Validity::True);

        let values = solver
            .get_initial_values(&Query::new(&constraints, Expr::bool(false)), &[array])?
            .expect("constraints are satisfiable");
        assert!(values[0][0] < 10);

        Ok(())
    }

    #[test]
    fn missing_binaries_are_reported() {
        let mut solver = SmtLibSolver::new(super::SolverBinary {
            name:           "definitely-not-an-smt-solver",
            args:           &[],
            options:        &[],
            timeout_option: None,
        });
        let constraints = ConstraintSet::new();
        let x = Expr::read(UpdateList::new(Array::symbolic("x", 1)), Expr::constant(0, 32));
        let result = solver.evaluate(&Query::new(&constraints, Expr::eq(x, Expr::constant(0, 8))));
        assert!(matches!(result, Err(crate::solver::Error::Process { .. })));
    }
}
