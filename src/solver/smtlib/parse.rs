//! This module contains a small parser for the s-expressions that SMT solvers
//! respond with.

use crate::solver::{Error, Result};

/// A parsed s-expression.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SExpr {
    Atom(String),
    List(Vec<SExpr>),
}

impl SExpr {
    /// Gets the elements of the expression if it is a list.
    #[must_use]
    pub fn as_list(&self) -> Option<&[SExpr]> {
        match self {
            Self::List(items) => Some(items),
            Self::Atom(_) => None,
        }
    }

    /// Interprets the expression as a bit-vector value.
    ///
    /// Supports the binary (`#b0101`) and hexadecimal (`#x0f`) literal forms as
    /// well as the indexed form `(_ bv15 8)`.
    #[must_use]
    pub fn as_bitvector(&self) -> Option<u64> {
        match self {
            Self::Atom(atom) => {
                if let Some(bits) = atom.strip_prefix("#b") {
                    u64::from_str_radix(bits, 2).ok()
                } else if let Some(digits) = atom.strip_prefix("#x") {
                    u64::from_str_radix(digits, 16).ok()
                } else {
                    None
                }
            }
            Self::List(items) => match items.as_slice() {
                [Self::Atom(underscore), Self::Atom(value), Self::Atom(_)] if underscore == "_" => {
                    value.strip_prefix("bv").and_then(|v| v.parse().ok())
                }
                _ => None,
            },
        }
    }
}

/// Parses a single s-expression from `input`.
///
/// # Errors
///
/// Returns [`Err`] if `input` is not exactly one well-formed s-expression.
pub fn parse(input: &str) -> Result<SExpr> {
    let error = |reason: &str| Error::Response {
        response: input.to_string(),
        reason:   reason.to_string(),
    };

    let mut stack: Vec<Vec<SExpr>> = vec![vec![]];
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '(' => stack.push(vec![]),
            ')' => {
                let items = stack.pop().ok_or_else(|| error("unbalanced parentheses"))?;
                stack
                    .last_mut()
                    .ok_or_else(|| error("unbalanced parentheses"))?
                    .push(SExpr::List(items));
            }
            '|' => {
                let mut atom = String::from('|');
                for c in chars.by_ref() {
                    atom.push(c);
                    if c == '|' {
                        break;
                    }
                }
                push_atom(&mut stack, atom);
            }
            '"' => {
                let mut atom = String::new();
                for c in chars.by_ref() {
                    if c == '"' {
                        break;
                    }
                    atom.push(c);
                }
                push_atom(&mut stack, atom);
            }
            c if c.is_whitespace() => (),
            c => {
                let mut atom = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || next == '(' || next == ')' {
                        break;
                    }
                    atom.push(next);
                    chars.next();
                }
                push_atom(&mut stack, atom);
            }
        }
    }

    if stack.len() != 1 {
        return Err(error("unbalanced parentheses"));
    }
    let mut top = stack.pop().unwrap_or_default();
    if top.len() != 1 {
        return Err(error("expected a single expression"));
    }
    Ok(top.remove(0))
}

fn push_atom(stack: &mut [Vec<SExpr>], atom: String) {
    if let Some(top) = stack.last_mut() {
        top.push(SExpr::Atom(atom));
    }
}

/// Gets the values from a `get-value` response, in order.
///
/// # Errors
///
/// Returns [`Err`] if `response` is not a well-formed list of bit-vector
/// bindings.
pub fn parse_values(response: &str) -> Result<Vec<u64>> {
    let error = |reason: &str| Error::Response {
        response: response.to_string(),
        reason:   reason.to_string(),
    };

    let parsed = parse(response)?;
    let bindings = parsed.as_list().ok_or_else(|| error("expected a list of bindings"))?;
    bindings
        .iter()
        .map(|binding| match binding.as_list() {
            Some([_, value]) => value.as_bitvector().ok_or_else(|| error("expected a bit-vector")),
            _ => Err(error("expected a (term value) pair")),
        })
        .collect()
}

/// Counts the open parentheses in `s` that are not closed.
#[must_use]
pub fn count_parens(s: &str) -> i64 {
    s.chars().fold(0, |count, c| match c {
        '(' => count + 1,
        ')' => count - 1,
        _ => count,
    })
}

#[cfg(test)]
mod test {
    use crate::solver::smtlib::parse::{parse, parse_values, SExpr};

    #[test]
    fn parses_nested_lists() -> anyhow::Result<()> {
        let parsed = parse("((a #b01) (|odd name| (_ bv5 8)))")?;
        let items = parsed.as_list().expect("is a list");
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].as_list().expect("is a list")[0], SExpr::Atom("|odd name|".into()));
        Ok(())
    }

    #[test]
    fn parses_values_in_every_literal_form() -> anyhow::Result<()> {
        let values = parse_values("((!e1 #b00000101) ((select |in_x| (_ bv0 32)) #x0a) (!e2 (_ bv7 8)))")?;
        assert_eq!(values, vec![5, 10, 7]);
        Ok(())
    }

    #[test]
    fn rejects_unbalanced_input() {
        assert!(parse("((a b)").is_err());
        assert!(parse("a b").is_err());
    }
}
