//! Mealy automaton model shared across the mealy-memory workspace.
//!
//! A Mealy automaton is a deterministic finite-state transducer: on every step
//! it consumes an input symbol, emits an output symbol that depends on both the
//! current state and the input, and moves to a successor state. The memory
//! engine only ever sees automata through the [`Automaton`] trait.
//!
//! ## Core Concepts
//!
//! - **Automaton**: the `{state_function, output_function, num_states, num_inputs,
//!   memory_upper_bound}` contract consumed by the engine
//! - **Trace**: an observed input/output history of fixed length
//! - **ShiftRegister**: binary feedback shift register with output table
//! - **TableAutomaton**: explicit transition/output tables
//! - **Minimized**: equivalence-class reduction that supplies the memory bound
//!
//! ```text
//! state' = δ(state, x)
//! y      = λ(state, x)
//! trace  = [(x₁, y₁), (x₂, y₂), …, (xₘ, yₘ)]
//! ```

mod automaton;
mod error;
mod minimized;
mod shift_register;
mod table;
mod trace;

pub use automaton::{pairwise_bound, Automaton, StateId, Symbol};
pub use error::{CoreError, CoreResult, TraceParseError};
pub use minimized::Minimized;
pub use shift_register::ShiftRegister;
pub use table::TableAutomaton;
pub use trace::Trace;
