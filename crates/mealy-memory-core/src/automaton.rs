//! The automaton contract consumed by the memory engine.

use std::sync::Arc;

/// Opaque state identifier in `[0, num_states)`.
///
/// Variants may encode a register bit-vector or a field-vector index in it.
pub type StateId = u64;

/// Input or output symbol.
pub type Symbol = u32;

/// A deterministic Mealy automaton.
///
/// Implementations must be pure: calling `state_function` or `output_function`
/// twice with the same arguments yields the same result. The engine calls them
/// concurrently from several workers.
pub trait Automaton: Send + Sync {
    /// Successor of `state` after consuming `input`.
    fn state_function(&self, state: StateId, input: Symbol) -> StateId;

    /// Output emitted in `state` when consuming `input`.
    fn output_function(&self, state: StateId, input: Symbol) -> Symbol;

    /// Number of states; valid states are `0..num_states()`.
    fn num_states(&self) -> u64;

    /// Size of the input alphabet; valid inputs are `0..num_inputs()`.
    fn num_inputs(&self) -> Symbol;

    /// Largest memory order worth checking.
    ///
    /// If trace sets still collide at this order the automaton has infinite
    /// memory. Usually `n(n-1)/2` for `n` minimized states.
    fn memory_upper_bound(&self) -> u64;

    /// Human readable label used in logs.
    fn name(&self) -> &str {
        "automaton"
    }
}

impl<A: Automaton + ?Sized> Automaton for Arc<A> {
    fn state_function(&self, state: StateId, input: Symbol) -> StateId {
        (**self).state_function(state, input)
    }

    fn output_function(&self, state: StateId, input: Symbol) -> Symbol {
        (**self).output_function(state, input)
    }

    fn num_states(&self) -> u64 {
        (**self).num_states()
    }

    fn num_inputs(&self) -> Symbol {
        (**self).num_inputs()
    }

    fn memory_upper_bound(&self) -> u64 {
        (**self).memory_upper_bound()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// `n(n-1)/2`, the classical memory bound for `n` pairwise distinguishable states.
pub fn pairwise_bound(n: u64) -> u64 {
    let (even, odd) = if n % 2 == 0 {
        (n / 2, n.saturating_sub(1))
    } else {
        ((n - 1) / 2, n)
    };
    even.saturating_mul(odd)
}
