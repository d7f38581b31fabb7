//! End-to-end memory-order runs against the in-process store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use mealy_memory::{
    BackoffPolicy, DriverPhase, EngineConfig, MemoryBackend, MemoryEngine, MemoryError,
    MemoryOrder, MemoryReport, StoreError,
};
use mealy_memory_core::{Automaton, Minimized, ShiftRegister, StateId, Symbol, TableAutomaton};

// ============================================================================
// Fixtures
// ============================================================================

fn engine(workers: usize) -> MemoryEngine<MemoryBackend> {
    MemoryEngine::in_memory(EngineConfig::fast().with_workers(workers))
}

async fn run(automaton: impl Automaton + 'static, workers: usize) -> MemoryReport {
    engine(workers)
        .compute(Arc::new(automaton))
        .await
        .expect("run should succeed")
}

/// Two-bit register printing its oldest bit: one step cannot tell `00` from
/// `10`, two steps reveal the whole state.
fn oldest_bit_register() -> ShiftRegister {
    ShiftRegister::from_bits(2, "0101 0101", "0000 1111").unwrap()
}

/// Small deterministic pseudo-random automata.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: u64) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) % bound
    }

    fn automaton(&mut self, states: u64, inputs: Symbol, outputs: u64) -> TableAutomaton {
        let mut table = Vec::new();
        for _ in 0..states * u64::from(inputs) {
            table.push((self.next(states), self.next(outputs) as Symbol));
        }
        TableAutomaton::from_fn(states, inputs, |s, x| {
            table[(s * u64::from(inputs) + u64::from(x)) as usize]
        })
        .unwrap()
    }
}

/// Memory order by direct enumeration: at order `m`, every length-`m`
/// history must end in exactly one state.
fn brute_force(automaton: &dyn Automaton) -> MemoryOrder {
    let bound = automaton.memory_upper_bound();
    if bound == 0 {
        return MemoryOrder::Finite(0);
    }

    for m in 1..=bound {
        let mut endings: HashMap<Vec<(Symbol, Symbol)>, HashSet<StateId>> = HashMap::new();
        for start in 0..automaton.num_states() {
            walk(automaton, start, m, &mut Vec::new(), &mut endings);
        }
        if endings.values().all(|states| states.len() == 1) {
            return MemoryOrder::Finite(m);
        }
    }
    MemoryOrder::Infinite
}

fn walk(
    automaton: &dyn Automaton,
    state: StateId,
    remaining: u64,
    history: &mut Vec<(Symbol, Symbol)>,
    endings: &mut HashMap<Vec<(Symbol, Symbol)>, HashSet<StateId>>,
) {
    if remaining == 0 {
        endings.entry(history.clone()).or_default().insert(state);
        return;
    }
    for x in 0..automaton.num_inputs() {
        history.push((x, automaton.output_function(state, x)));
        walk(
            automaton,
            automaton.state_function(state, x),
            remaining - 1,
            history,
            endings,
        );
        history.pop();
    }
}

// ============================================================================
// Reference scenarios
// ============================================================================

#[tokio::test]
async fn test_identity_register_has_memory_zero() {
    let automaton = Minimized::new(ShiftRegister::identity(1).unwrap()).unwrap();
    assert_eq!(automaton.memory_upper_bound(), 0);

    let report = run(automaton, 4).await;

    assert_eq!(report.memory, MemoryOrder::Finite(0));
    assert!(report.orders.is_empty());
}

#[tokio::test]
async fn test_constant_output_is_infinite() {
    // Three states cycling on input 1, staying on input 0, always printing 0.
    let automaton = TableAutomaton::from_fn(3, 2, |s, x| ((s + u64::from(x)) % 3, 0)).unwrap();
    assert_eq!(automaton.memory_upper_bound(), 3);

    let report = run(automaton, 2).await;

    assert_eq!(report.memory, MemoryOrder::Infinite);
    assert_eq!(report.final_phase, DriverPhase::Exhausted);
    assert_eq!(report.orders_checked(), 3);
    assert!(report.orders.iter().all(|stats| !stats.sufficient));
}

#[tokio::test]
async fn test_xor_output_matches_brute_force() {
    // Output and successor are both state XOR input.
    let automaton = TableAutomaton::from_fn(2, 2, |s, x| {
        let v = s ^ u64::from(x);
        (v, v as Symbol)
    })
    .unwrap();
    let expected = brute_force(&automaton);

    let report = run(automaton, 2).await;

    assert_eq!(report.memory, expected);
    assert_eq!(report.memory, MemoryOrder::Finite(1));
}

#[tokio::test]
async fn test_two_step_register_needs_order_two() {
    let automaton = Minimized::new(oldest_bit_register()).unwrap();
    assert_eq!(automaton.memory_upper_bound(), 6);

    let report = run(automaton, 3).await;

    assert_eq!(report.memory, MemoryOrder::Finite(2));
    assert_eq!(report.final_phase, DriverPhase::Converged(2));
    assert!(!report.orders[0].sufficient);
    assert!(report.orders[0].witness.is_some());
    assert!(report.orders[1].sufficient);
    assert_eq!(report.orders[1].witness, None);
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test]
async fn test_random_automata_match_brute_force() {
    let mut rng = Lcg(7);
    for case in 0..24 {
        let states = 2 + rng.next(3);
        let outputs = 1 + rng.next(2);
        let automaton = Minimized::new(rng.automaton(states, 2, outputs)).unwrap();
        let expected = brute_force(&automaton);

        let report = run(automaton, 3).await;
        assert_eq!(report.memory, expected, "case {case}: {states} states");
    }
}

#[tokio::test]
async fn test_worker_count_does_not_change_the_result() {
    let mut rng = Lcg(42);
    for _ in 0..8 {
        let automaton = Arc::new(Minimized::new(rng.automaton(4, 2, 2)).unwrap());

        let single = engine(1).compute(automaton.clone()).await.unwrap();
        let many = engine(4).compute(automaton).await.unwrap();

        assert_eq!(single.memory, many.memory);
        let sizes = |r: &MemoryReport| r.orders.iter().map(|s| s.traces).collect::<Vec<_>>();
        assert_eq!(sizes(&single), sizes(&many));
    }
}

#[tokio::test]
async fn test_trace_sets_grow_at_most_by_alphabet_size() {
    let automaton = TableAutomaton::from_fn(4, 3, |s, x| ((s * 3 + u64::from(x)) % 4, (s % 2) as Symbol))
        .unwrap()
        .with_memory_upper_bound(4);

    let report = run(automaton, 2).await;

    for pair in report.orders.windows(2) {
        assert!(pair[1].traces <= 3 * pair[0].traces);
    }
}

#[tokio::test]
async fn test_no_order_beyond_the_bound_is_built() {
    let automaton = TableAutomaton::from_fn(2, 1, |s, _| (s, 0))
        .unwrap()
        .with_memory_upper_bound(5);

    let report = run(automaton, 2).await;

    assert_eq!(report.memory, MemoryOrder::Infinite);
    assert_eq!(report.orders_checked(), 5);
    assert_eq!(report.upper_bound, 5);
}

// ============================================================================
// Store behavior
// ============================================================================

#[tokio::test]
async fn test_transient_failures_are_absorbed() {
    let backend = MemoryBackend::new();
    let engine = MemoryEngine::new(backend.clone(), EngineConfig::fast().with_workers(1));
    backend.inject_failures(2);

    let report = engine
        .compute(Arc::new(Minimized::new(oldest_bit_register()).unwrap()))
        .await
        .unwrap();

    assert_eq!(report.memory, MemoryOrder::Finite(2));
    assert_eq!(backend.pending_failures(), 0);
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_run() {
    let backend = MemoryBackend::new();
    let config = EngineConfig::fast()
        .with_workers(1)
        .with_backoff(BackoffPolicy::fast());
    let engine = MemoryEngine::new(backend.clone(), config);
    backend.inject_verb_failures("SADD", usize::MAX);

    let err = engine
        .compute(Arc::new(oldest_bit_register()))
        .await
        .unwrap_err();

    match err {
        MemoryError::Store(StoreError::Exhausted {
            command, attempts, ..
        }) => {
            assert!(command.starts_with("SADD "), "{command}");
            assert_eq!(attempts, 3);
        }
        other => panic!("expected exhausted store error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_store_is_empty_after_a_run() {
    let backend = MemoryBackend::new();
    let engine = MemoryEngine::new(backend.clone(), EngineConfig::fast().with_workers(2));

    engine
        .compute(Arc::new(Minimized::new(oldest_bit_register()).unwrap()))
        .await
        .unwrap();

    assert_eq!(backend.key_count(), 0);
}

#[tokio::test]
async fn test_retention_keeps_every_order() {
    let backend = MemoryBackend::new();
    let config = EngineConfig::fast()
        .with_workers(2)
        .with_retention(true)
        .with_key_prefix("t:");
    let engine = MemoryEngine::new(backend.clone(), config);

    engine
        .compute(Arc::new(Minimized::new(oldest_bit_register()).unwrap()))
        .await
        .unwrap();

    let keys = backend.keys();
    assert!(keys.iter().all(|key| key.starts_with("t:")));
    for state in 0..4 {
        assert!(keys.contains(&format!("t:{state}_1")));
        assert!(keys.contains(&format!("t:{state}_2")));
    }
    // State 3 ends every history whose last two inputs are 1 1.
    assert_eq!(
        backend.snapshot("t:3_2"),
        ["1:0;1:0", "1:0;1:1", "1:1;1:0", "1:1;1:1"]
            .iter()
            .map(|s| s.to_string())
            .collect::<HashSet<_>>()
    );
}

fn xor_automaton() -> TableAutomaton {
    TableAutomaton::from_fn(2, 2, |s, x| {
        let v = s ^ u64::from(x);
        (v, v as Symbol)
    })
    .unwrap()
}

#[tokio::test]
async fn test_store_is_reusable_after_a_failed_run() {
    let backend = MemoryBackend::new();
    let engine = MemoryEngine::new(backend.clone(), EngineConfig::fast().with_workers(1));

    // Order 1 is built and checked, then the first scan of order 2 fails.
    backend.inject_verb_failures("SSCAN", 3);
    let err = engine
        .compute(Arc::new(Minimized::new(oldest_bit_register()).unwrap()))
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::Store(StoreError::Exhausted { .. })));
    assert_eq!(backend.key_count(), 0);

    let report = engine.compute(Arc::new(xor_automaton())).await.unwrap();
    assert_eq!(report.memory, MemoryOrder::Finite(1));
}

#[tokio::test]
async fn test_retained_sets_are_not_merged_into_the_next_run() {
    let backend = MemoryBackend::new();
    let constant = TableAutomaton::from_fn(3, 2, |s, x| ((s + u64::from(x)) % 3, 0)).unwrap();
    let retaining = MemoryEngine::new(
        backend.clone(),
        EngineConfig::fast().with_workers(2).with_retention(true),
    );
    retaining.compute(Arc::new(constant)).await.unwrap();
    let retained = backend.keys();

    let plain = MemoryEngine::new(backend.clone(), EngineConfig::fast().with_workers(2));
    let err = plain.compute(Arc::new(xor_automaton())).await.unwrap_err();
    assert!(matches!(err, MemoryError::StaleKeys { .. }), "{err}");
    assert_eq!(backend.keys(), retained);

    let separate = MemoryEngine::new(
        backend.clone(),
        EngineConfig::fast().with_workers(2).with_key_prefix("next:"),
    );
    let report = separate.compute(Arc::new(xor_automaton())).await.unwrap();
    assert_eq!(report.memory, MemoryOrder::Finite(1));
    assert_eq!(backend.keys(), retained);
}

#[tokio::test]
async fn test_lost_replies_undercount_traces_only() {
    let automaton = Arc::new(Minimized::new(oldest_bit_register()).unwrap());
    let clean = engine(1).compute(automaton.clone()).await.unwrap();

    let backend = MemoryBackend::new();
    let engine = MemoryEngine::new(backend.clone(), EngineConfig::fast().with_workers(1));
    backend.inject_lost_replies("SADD", 1);
    let lossy = engine.compute(automaton).await.unwrap();

    assert_eq!(lossy.memory, clean.memory);
    assert_eq!(lossy.orders[0].traces, clean.orders[0].traces - 1);
    assert_eq!(lossy.orders[1].traces, clean.orders[1].traces);
}

#[cfg(feature = "redis")]
#[tokio::test]
#[ignore = "needs a Redis server at MEALY_MEMORY_REDIS_URL"]
async fn test_redis_backend_end_to_end() {
    let config = EngineConfig::fast()
        .with_workers(2)
        .with_key_prefix("mealy-memory-test:")
        .with_env_overrides()
        .unwrap();
    let engine = MemoryEngine::redis(config).unwrap();

    let report = engine
        .compute(Arc::new(Minimized::new(oldest_bit_register()).unwrap()))
        .await
        .unwrap();

    assert_eq!(report.memory, MemoryOrder::Finite(2));
}
