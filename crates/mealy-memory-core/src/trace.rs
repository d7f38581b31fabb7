//! Observed input/output histories.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::automaton::Symbol;
use crate::error::TraceParseError;

/// An ordered sequence of `(input, output)` pairs.
///
/// Traces are values: extending one produces a new trace and leaves the
/// original untouched. Equality and hashing are by content.
///
/// The store encoding is `input:output` steps joined by `;`, so the trace
/// `[(0, 1), (1, 1)]` is stored as `0:1;1:1` and the empty trace as `""`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Trace {
    steps: Vec<(Symbol, Symbol)>,
}

impl Trace {
    /// The empty trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// A trace of a single step.
    pub fn single(input: Symbol, output: Symbol) -> Self {
        Self {
            steps: vec![(input, output)],
        }
    }

    /// Build a trace from its steps.
    pub fn from_steps(steps: impl IntoIterator<Item = (Symbol, Symbol)>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
        }
    }

    /// Number of steps (the memory order this trace belongs to).
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// All `(input, output)` steps, oldest first.
    pub fn steps(&self) -> &[(Symbol, Symbol)] {
        &self.steps
    }

    /// Input symbols, oldest first.
    pub fn inputs(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.steps.iter().map(|(x, _)| *x)
    }

    /// Output symbols, oldest first.
    pub fn outputs(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.steps.iter().map(|(_, y)| *y)
    }

    /// A new trace with one more step appended.
    pub fn extended(&self, input: Symbol, output: Symbol) -> Self {
        let mut steps = Vec::with_capacity(self.steps.len() + 1);
        steps.extend_from_slice(&self.steps);
        steps.push((input, output));
        Self { steps }
    }

    /// Store encoding of this trace.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Parse the store encoding.
    pub fn decode(encoded: &str) -> Result<Self, TraceParseError> {
        if encoded.is_empty() {
            return Ok(Self::new());
        }

        let steps = encoded
            .split(';')
            .map(|segment| {
                let (input, output) =
                    segment
                        .split_once(':')
                        .ok_or_else(|| TraceParseError::MissingSeparator {
                            segment: segment.to_string(),
                        })?;
                let invalid = || TraceParseError::InvalidSymbol {
                    segment: segment.to_string(),
                };
                Ok((
                    input.parse().map_err(|_| invalid())?,
                    output.parse().map_err(|_| invalid())?,
                ))
            })
            .collect::<Result<Vec<_>, TraceParseError>>()?;

        Ok(Self { steps })
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (input, output)) in self.steps.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{input}:{output}")?;
        }
        Ok(())
    }
}

impl FromStr for Trace {
    type Err = TraceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}
