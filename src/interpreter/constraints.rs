//! Interpreter constraints
//!
//! Requirement-style predicates over interpreters, e.g. `CPython>=3.8,<3.12`,
//! `>=3.9` or `PyPy`. Commas AND specifiers together; multiple constraints
//! are OR-ed.

use crate::error::{PexError, PexResult};
use crate::interpreter::descriptor::{Implementation, Interpreter};
use semver::{Comparator, Op, Prerelease, Version};
use std::fmt;

/// One version specifier, e.g. `>=3.8` or `!=3.9.*`
#[derive(Debug, Clone)]
struct Specifier {
    comparators: Vec<Comparator>,
    negate: bool,
}

impl Specifier {
    fn matches(&self, version: &Version) -> bool {
        self.comparators.iter().all(|c| c.matches(version)) != self.negate
    }
}

/// A single interpreter constraint
#[derive(Debug, Clone)]
pub struct InterpreterConstraint {
    raw: String,
    implementation: Option<Implementation>,
    specifiers: Vec<Specifier>,
}

impl InterpreterConstraint {
    /// Parse and validate a constraint expression.
    pub fn parse(raw: &str) -> PexResult<Self> {
        let invalid = |reason: String| PexError::InvalidConstraint {
            constraint: raw.to_string(),
            reason,
        };

        let text = raw.trim();
        if text.is_empty() {
            return Err(invalid("constraint is empty".to_string()));
        }

        let name_len = text
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(text.len());
        let (name, rest) = text.split_at(name_len);

        let implementation = if name.is_empty() {
            None
        } else {
            match Implementation::from_name(name) {
                Implementation::Other(other) => {
                    return Err(invalid(format!(
                        "unknown interpreter implementation '{}'; expected CPython or PyPy",
                        other
                    )))
                }
                known => Some(known),
            }
        };

        let rest = rest.trim();
        if implementation.is_none() && rest.is_empty() {
            return Err(invalid("constraint has no version specifiers".to_string()));
        }

        let specifiers = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split(',')
                .map(|s| parse_specifier(s.trim()).map_err(&invalid))
                .collect::<PexResult<Vec<_>>>()?
        };

        Ok(Self {
            raw: text.to_string(),
            implementation,
            specifiers,
        })
    }

    /// Whether the interpreter satisfies this constraint.
    pub fn matches(&self, interpreter: &Interpreter) -> bool {
        if let Some(implementation) = &self.implementation {
            if implementation != interpreter.implementation() {
                return false;
            }
        }
        self.specifiers
            .iter()
            .all(|s| s.matches(interpreter.version()))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for InterpreterConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A set of OR-ed interpreter constraints
#[derive(Debug, Clone, Default)]
pub struct InterpreterConstraints(Vec<InterpreterConstraint>);

impl InterpreterConstraints {
    /// Parse every constraint, failing on the first malformed one.
    pub fn parse_all<S: AsRef<str>>(raw: &[S]) -> PexResult<Self> {
        raw.iter()
            .map(|c| InterpreterConstraint::parse(c.as_ref()))
            .collect::<PexResult<Vec<_>>>()
            .map(Self)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when the interpreter satisfies at least one constraint.
    pub fn matches_any(&self, interpreter: &Interpreter) -> bool {
        self.0.iter().any(|c| c.matches(interpreter))
    }

    pub fn iter(&self) -> impl Iterator<Item = &InterpreterConstraint> {
        self.0.iter()
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(|c| c.raw.clone()).collect()
    }
}

fn parse_specifier(spec: &str) -> Result<Specifier, String> {
    const OPERATORS: [&str; 7] = ["~=", "==", "!=", ">=", "<=", ">", "<"];

    let op = OPERATORS
        .iter()
        .find(|op| spec.starts_with(**op))
        .ok_or_else(|| format!("'{}' does not start with a comparison operator", spec))?;
    let version = spec[op.len()..].trim();
    if version.starts_with('=') {
        return Err(format!("unsupported operator in '{}'", spec));
    }

    let (version, wildcard) = match version.strip_suffix(".*") {
        Some(prefix) => (prefix, true),
        None => (version, false),
    };
    if wildcard && !matches!(*op, "==" | "!=") {
        return Err(format!("wildcard versions are only valid with == and != in '{}'", spec));
    }

    let parts = version
        .split('.')
        .map(|p| p.parse::<u64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| format!("invalid version '{}' in '{}'", version, spec))?;
    if parts.is_empty() || parts.len() > 3 {
        return Err(format!("invalid version '{}' in '{}'", version, spec));
    }

    let major = parts[0];
    let minor = parts.get(1).copied();
    let patch = parts.get(2).copied();
    let padded = |op: Op| comparator(op, major, Some(minor.unwrap_or(0)), Some(patch.unwrap_or(0)));

    let specifier = match *op {
        ">=" => single(padded(Op::GreaterEq)),
        "<=" => single(padded(Op::LessEq)),
        ">" => single(padded(Op::Greater)),
        "<" => single(padded(Op::Less)),
        "==" | "!=" => {
            let exact = if wildcard {
                comparator(Op::Exact, major, minor, patch)
            } else {
                padded(Op::Exact)
            };
            Specifier {
                comparators: vec![exact],
                negate: *op == "!=",
            }
        }
        "~=" => {
            if minor.is_none() {
                return Err(format!("'~=' requires at least two version components in '{}'", spec));
            }
            let prefix = match patch {
                Some(_) => comparator(Op::Exact, major, minor, None),
                None => comparator(Op::Exact, major, None, None),
            };
            Specifier {
                comparators: vec![padded(Op::GreaterEq), prefix],
                negate: false,
            }
        }
        _ => return Err(format!("unsupported operator in '{}'", spec)),
    };
    Ok(specifier)
}

fn comparator(op: Op, major: u64, minor: Option<u64>, patch: Option<u64>) -> Comparator {
    Comparator {
        op,
        major,
        minor,
        patch,
        pre: Prerelease::EMPTY,
    }
}

fn single(comparator: Comparator) -> Specifier {
    Specifier {
        comparators: vec![comparator],
        negate: false,
    }
}
