//! Automata given by explicit transition and output tables.

use crate::automaton::{pairwise_bound, Automaton, StateId, Symbol};
use crate::error::{CoreError, CoreResult};

/// A Mealy automaton over states `0..n` and inputs `0..k` stored as two
/// row-major `n × k` tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableAutomaton {
    num_states: u64,
    num_inputs: Symbol,
    transitions: Vec<StateId>,
    outputs: Vec<Symbol>,
    upper_bound: u64,
}

impl TableAutomaton {
    /// Create an automaton from row-major tables indexed by `state * k + input`.
    ///
    /// The memory bound defaults to `n(n-1)/2` over the raw state count; use
    /// [`with_memory_upper_bound`](Self::with_memory_upper_bound) or wrap the
    /// automaton in [`Minimized`](crate::Minimized) for a tighter one.
    pub fn new(
        num_states: u64,
        num_inputs: Symbol,
        transitions: Vec<StateId>,
        outputs: Vec<Symbol>,
    ) -> CoreResult<Self> {
        if num_states == 0 || num_inputs == 0 {
            return Err(CoreError::EmptyAlphabet);
        }

        let expected = usize::try_from(num_states)
            .ok()
            .and_then(|n| n.checked_mul(num_inputs as usize))
            .ok_or(CoreError::TooManyStates { num_states })?;

        if transitions.len() != expected {
            return Err(CoreError::TableSize {
                table: "transitions",
                expected,
                actual: transitions.len(),
            });
        }
        if outputs.len() != expected {
            return Err(CoreError::TableSize {
                table: "outputs",
                expected,
                actual: outputs.len(),
            });
        }
        if let Some(&state) = transitions.iter().find(|&&s| s >= num_states) {
            return Err(CoreError::StateOutOfRange { state, num_states });
        }

        Ok(Self {
            num_states,
            num_inputs,
            transitions,
            outputs,
            upper_bound: pairwise_bound(num_states),
        })
    }

    /// Tabulate an automaton from a `(state, input) -> (next, output)` function.
    pub fn from_fn<F>(num_states: u64, num_inputs: Symbol, step: F) -> CoreResult<Self>
    where
        F: Fn(StateId, Symbol) -> (StateId, Symbol),
    {
        let mut transitions = Vec::new();
        let mut outputs = Vec::new();
        for state in 0..num_states {
            for input in 0..num_inputs {
                let (next, output) = step(state, input);
                transitions.push(next);
                outputs.push(output);
            }
        }
        Self::new(num_states, num_inputs, transitions, outputs)
    }

    /// Tabulate any other automaton.
    pub fn from_automaton(automaton: &dyn Automaton) -> CoreResult<Self> {
        Ok(Self::from_fn(automaton.num_states(), automaton.num_inputs(), |s, x| {
            (automaton.state_function(s, x), automaton.output_function(s, x))
        })?
        .with_memory_upper_bound(automaton.memory_upper_bound()))
    }

    /// Override the memory bound reported to the engine.
    pub fn with_memory_upper_bound(mut self, bound: u64) -> Self {
        self.upper_bound = bound;
        self
    }

    fn index(&self, state: StateId, input: Symbol) -> usize {
        (state as usize) * (self.num_inputs as usize) + input as usize
    }
}

impl Automaton for TableAutomaton {
    fn state_function(&self, state: StateId, input: Symbol) -> StateId {
        self.transitions[self.index(state, input)]
    }

    fn output_function(&self, state: StateId, input: Symbol) -> Symbol {
        self.outputs[self.index(state, input)]
    }

    fn num_states(&self) -> u64 {
        self.num_states
    }

    fn num_inputs(&self) -> Symbol {
        self.num_inputs
    }

    fn memory_upper_bound(&self) -> u64 {
        self.upper_bound
    }

    fn name(&self) -> &str {
        "table"
    }
}
