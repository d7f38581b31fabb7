//! Error types for automaton construction and trace decoding.

use thiserror::Error;

/// Result type alias for automaton construction.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while building an automaton.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Shift register length outside `1..=32`.
    #[error("invalid register length: {length} (must be 1..=32)")]
    InvalidRegisterLength { length: u8 },

    /// A function table does not have the size the automaton requires.
    #[error("table {table} has {actual} entries, expected {expected}")]
    TableSize {
        table: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A bit table contained something other than `0`, `1` or whitespace.
    #[error("invalid bit {ch:?} at position {position}")]
    InvalidBit { ch: char, position: usize },

    /// A transition table points outside the state range.
    #[error("state {state} out of range (automaton has {num_states} states)")]
    StateOutOfRange { state: u64, num_states: u64 },

    /// The automaton has no states or no input symbols.
    #[error("automaton must have at least one state and one input symbol")]
    EmptyAlphabet,

    /// The state space is too large to be held in memory.
    #[error("state space of {num_states} states is too large to tabulate")]
    TooManyStates { num_states: u64 },
}

/// Errors raised while decoding a stored trace.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TraceParseError {
    /// A step lacks the `:` separating input from output.
    #[error("trace step {segment:?} is missing the ':' separator")]
    MissingSeparator { segment: String },

    /// A step contains a non-numeric symbol.
    #[error("trace step {segment:?} contains an invalid symbol")]
    InvalidSymbol { segment: String },
}
