//! Equivalence-class reduction of an automaton.
//!
//! Two states are equivalent when no input sequence makes them emit different
//! outputs. Classes are computed by Moore partition refinement: start from the
//! partition induced by the output rows, then repeatedly split classes whose
//! members move to different classes, until the partition stops changing.

use std::collections::HashMap;

use tracing::debug;

use crate::automaton::{pairwise_bound, Automaton, StateId, Symbol};
use crate::error::{CoreError, CoreResult};

/// An automaton whose transitions land on class representatives.
///
/// State ids are unchanged, but every successor is replaced by the smallest
/// state of its equivalence class, so after one step only representatives are
/// reachable. The memory bound is `c(c-1)/2` for `c` classes.
#[derive(Debug, Clone)]
pub struct Minimized<A> {
    inner: A,
    representative: Vec<StateId>,
    class_count: u64,
    rounds: usize,
}

impl<A: Automaton> Minimized<A> {
    /// Partition the states of `inner` into equivalence classes.
    pub fn new(inner: A) -> CoreResult<Self> {
        let num_states = inner.num_states();
        let n = usize::try_from(num_states)
            .map_err(|_| CoreError::TooManyStates { num_states })?;
        let k = inner.num_inputs();
        if n == 0 || k == 0 {
            return Err(CoreError::EmptyAlphabet);
        }

        let successors: Vec<Vec<usize>> = (0..num_states)
            .map(|s| {
                (0..k)
                    .map(|x| inner.state_function(s, x))
                    .map(|next| {
                        if next < num_states {
                            Ok(next as usize)
                        } else {
                            Err(CoreError::StateOutOfRange {
                                state: next,
                                num_states,
                            })
                        }
                    })
                    .collect()
            })
            .collect::<CoreResult<_>>()?;

        let mut class = relabel((0..num_states).map(|s| {
            (0..k)
                .map(|x| inner.output_function(s, x))
                .collect::<Vec<Symbol>>()
        }));
        let mut class_count = count(&class);
        let mut rounds = 1;

        loop {
            let refined = relabel((0..n).map(|s| {
                let mut signature = Vec::with_capacity(successors[s].len() + 1);
                signature.push(class[s]);
                signature.extend(successors[s].iter().map(|&next| class[next]));
                signature
            }));
            let refined_count = count(&refined);
            class = refined;
            if refined_count == class_count {
                break;
            }
            class_count = refined_count;
            rounds += 1;
        }

        let mut leader: Vec<Option<StateId>> = vec![None; class_count];
        let representative = class
            .iter()
            .enumerate()
            .map(|(s, &c)| *leader[c].get_or_insert(s as StateId))
            .collect();

        debug!(
            automaton = inner.name(),
            states = num_states,
            classes = class_count,
            rounds,
            "automaton_minimized"
        );

        Ok(Self {
            inner,
            representative,
            class_count: class_count as u64,
            rounds,
        })
    }

    /// Number of equivalence classes.
    pub fn class_count(&self) -> u64 {
        self.class_count
    }

    /// Number of refinement rounds, i.e. the degree of distinguishability:
    /// inequivalent states are told apart by some input sequence of this length.
    pub fn refinement_rounds(&self) -> usize {
        self.rounds
    }

    /// Representative (smallest member) of the class containing `state`.
    pub fn representative(&self, state: StateId) -> StateId {
        self.representative[state as usize]
    }

    /// Check whether two states are equivalent.
    pub fn equivalent(&self, a: StateId, b: StateId) -> bool {
        self.representative(a) == self.representative(b)
    }
}

impl<A: Automaton> Automaton for Minimized<A> {
    fn state_function(&self, state: StateId, input: Symbol) -> StateId {
        self.representative(self.inner.state_function(state, input))
    }

    fn output_function(&self, state: StateId, input: Symbol) -> Symbol {
        self.inner.output_function(state, input)
    }

    fn num_states(&self) -> u64 {
        self.inner.num_states()
    }

    fn num_inputs(&self) -> Symbol {
        self.inner.num_inputs()
    }

    fn memory_upper_bound(&self) -> u64 {
        pairwise_bound(self.class_count)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Assign dense class ids in order of first appearance.
fn relabel<K, I>(signatures: I) -> Vec<usize>
where
    K: std::hash::Hash + Eq,
    I: IntoIterator<Item = K>,
{
    let mut ids: HashMap<K, usize> = HashMap::new();
    signatures
        .into_iter()
        .map(|signature| {
            let next = ids.len();
            *ids.entry(signature).or_insert(next)
        })
        .collect()
}

fn count(class: &[usize]) -> usize {
    class.iter().max().map_or(0, |max| max + 1)
}
