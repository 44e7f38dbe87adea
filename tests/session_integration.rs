//! Session store integration tests.
//!
//! These tests exercise the store and engine together through the public
//! library API, without the HTTP layer.

use std::collections::HashSet;
use std::sync::Arc;

use repl_tunnel::{Engine, EngineConfig, ReplTunnelError, SessionId, SessionStore, Value};

fn repr_of(store: &SessionStore, id: &SessionId, src: &str) -> Option<String> {
    store.evaluate_on(id, src).unwrap().repr
}

// ============================================================================
// Trailing Expression Tests
// ============================================================================

#[test]
fn test_assignment_returns_absent() {
    let store = SessionStore::new();
    let id = store.create();

    let result = store.evaluate_on(&id, "a = 0").unwrap();
    assert!(result.value.is_none());

    let session = store.get(&id).unwrap();
    let scope = session.lock_scope().unwrap();
    assert!(matches!(scope.get("a"), Some(Value::Int(0))));
}

#[test]
fn test_trailing_expression_value() {
    let store = SessionStore::new();
    let id = store.create();

    let result = store.evaluate_on(&id, "a = 10\na").unwrap();
    assert!(matches!(result.value, Some(Value::Int(10))));

    let result = store.evaluate_on(&id, "a = 10.3\na").unwrap();
    assert!(matches!(result.value, Some(Value::Float(f)) if f == 10.3));
    assert_eq!(result.type_name().as_deref(), Some("float"));
}

#[test]
fn test_expression_only_chunk() {
    let store = SessionStore::new();
    let id = store.create();

    assert_eq!(repr_of(&store, &id, "2 ** 10").as_deref(), Some("1024"));
}

#[test]
fn test_empty_chunk() {
    let store = SessionStore::new();
    let id = store.create();

    let result = store.evaluate_on(&id, "").unwrap();
    assert!(result.value.is_none());
    assert!(result.output.is_empty());
}

#[test]
fn test_class_definition_then_assignment_returns_absent() {
    let store = SessionStore::new();
    let id = store.create();

    let src = "class Counter:\n    def __init__(self):\n        self.n = 0\n    def bump(self):\n        self.n += 1\n        return self.n\nc = Counter()";
    let result = store.evaluate_on(&id, src).unwrap();
    assert!(result.value.is_none());

    assert_eq!(repr_of(&store, &id, "c.bump()\nc.bump()").as_deref(), Some("2"));
}

#[test]
fn test_nested_expression_is_not_trailing() {
    let store = SessionStore::new();
    let id = store.create();

    let result = store.evaluate_on(&id, "if True:\n    42\n").unwrap();
    assert!(result.value.is_none());
}

// ============================================================================
// Scope Persistence Tests
// ============================================================================

#[test]
fn test_scope_persists_across_chunks() {
    let store = SessionStore::new();
    let id = store.create();

    assert!(matches!(
        store.evaluate_on(&id, "b"),
        Err(ReplTunnelError::Evaluation(ref e)) if e.kind == "NameError"
    ));

    store.evaluate_on(&id, "a = 0").unwrap();
    store.evaluate_on(&id, "b = 0").unwrap();

    assert_eq!(repr_of(&store, &id, "(a, b)").as_deref(), Some("(0, 0)"));
    assert!(store.evaluate_on(&id, "c").is_err());
}

#[test]
fn test_expression_chunks_leave_scope_unchanged() {
    let store = SessionStore::new();
    let id = store.create();
    store.evaluate_on(&id, "x = [1, 2]").unwrap();

    let session = store.get(&id).unwrap();
    let before = session.snapshot().unwrap();

    store.evaluate_on(&id, "len(x)").unwrap();
    store.evaluate_on(&id, "x[0] + x[1]").unwrap();

    assert_eq!(session.snapshot().unwrap(), before);
}

#[test]
fn test_functions_and_closures_persist() {
    let store = SessionStore::new();
    let id = store.create();

    store
        .evaluate_on(
            &id,
            "def make_adder(n):\n    def add(x):\n        return x + n\n    return add\nadd5 = make_adder(5)",
        )
        .unwrap();

    assert_eq!(repr_of(&store, &id, "add5(10)").as_deref(), Some("15"));
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[test]
fn test_ten_thousand_unique_ids() {
    let store = SessionStore::new();
    let ids: HashSet<SessionId> = (0..10_000).map(|_| store.create()).collect();

    assert_eq!(ids.len(), 10_000);
    assert_eq!(store.count(), 10_000);
}

#[test]
fn test_delete_unknown_and_twice() {
    let store = SessionStore::new();

    assert!(matches!(
        store.delete(&SessionId::from_raw(7)),
        Err(ReplTunnelError::SessionNotFound(_))
    ));

    let id = store.create();
    store.evaluate_on(&id, "kept = 'yes'").unwrap();

    let removed = store.delete(&id).unwrap();
    assert!(removed.lock_scope().unwrap().contains("kept"));

    assert!(matches!(
        store.delete(&id),
        Err(ReplTunnelError::SessionNotFound(_))
    ));
    assert!(store.get(&id).is_none());
    assert!(matches!(
        store.evaluate_on(&id, "1"),
        Err(ReplTunnelError::SessionNotFound(_))
    ));
}

// ============================================================================
// Error Classification Tests
// ============================================================================

#[test]
fn test_parse_error_leaves_scope_untouched() {
    let store = SessionStore::new();
    let id = store.create();

    let err = store.evaluate_on(&id, "a = 1\nb = (").unwrap_err();
    assert!(matches!(err, ReplTunnelError::Parse(_)));

    let session = store.get(&id).unwrap();
    assert_eq!(session.variable_count().unwrap(), 0);
}

#[test]
fn test_evaluation_error_keeps_partial_mutations() {
    let store = SessionStore::new();
    let id = store.create();

    let err = store
        .evaluate_on(&id, "a = 1\nraise ValueError('bad value')\nb = 2")
        .unwrap_err();
    match err {
        ReplTunnelError::Evaluation(e) => {
            assert_eq!(e.kind, "ValueError");
            assert_eq!(e.message, "bad value");
            assert_eq!(e.line, Some(2));
        }
        other => panic!("Expected evaluation error, got {:?}", other),
    }

    let session = store.get(&id).unwrap();
    let scope = session.lock_scope().unwrap();
    assert!(scope.contains("a"));
    assert!(!scope.contains("b"));
}

#[test]
fn test_faulty_session_does_not_affect_others() {
    let store = SessionStore::new();
    let good = store.create();
    let bad = store.create();

    store.evaluate_on(&good, "v = 1").unwrap();
    assert!(store.evaluate_on(&bad, "def f():\n    return f()\nf()").is_err());

    assert_eq!(repr_of(&store, &good, "v").as_deref(), Some("1"));
    assert_eq!(repr_of(&store, &bad, "1 + 1").as_deref(), Some("2"));
}

#[test]
fn test_recursion_limit_from_engine_config() {
    let store = SessionStore::with_engine(Engine::new(EngineConfig {
        max_call_depth: 10,
        ..EngineConfig::default()
    }));
    let id = store.create();

    store
        .evaluate_on(&id, "def depth(n):\n    return 0 if n == 0 else 1 + depth(n - 1)")
        .unwrap();

    assert_eq!(repr_of(&store, &id, "depth(5)").as_deref(), Some("5"));
    assert!(matches!(
        store.evaluate_on(&id, "depth(50)"),
        Err(ReplTunnelError::Evaluation(ref e)) if e.kind == "RecursionError"
    ));
}

// ============================================================================
// Deep Structure Tests
// ============================================================================

#[test]
fn test_deeply_nested_list_is_released_on_rebind() {
    let store = SessionStore::new();
    let id = store.create();

    store
        .evaluate_on(&id, "x = []
for i in range(1000000):
    x = [x]")
        .unwrap();
    store.evaluate_on(&id, "x = None").unwrap();

    assert_eq!(repr_of(&store, &id, "x").as_deref(), Some("None"));
}

#[test]
fn test_deeply_nested_values_are_released_on_delete() {
    let store = SessionStore::new();
    let id = store.create();

    store
        .evaluate_on(
            &id,
            "x = []
t = ()
for i in range(1000000):
    x = [x]
    t = (t, i)",
        )
        .unwrap();
    store.delete(&id).unwrap();

    assert!(!store.contains(&id));
    let other = store.create();
    assert_eq!(repr_of(&store, &other, "1 + 1").as_deref(), Some("2"));
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[test]
fn test_parallel_sessions() {
    let store = Arc::new(SessionStore::new());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                let id = store.create();
                store.evaluate_on(&id, &format!("mine = {}", i)).unwrap();
                for _ in 0..10 {
                    store.evaluate_on(&id, "mine = mine + 0").unwrap();
                }
                (id, i)
            })
        })
        .collect();

    for handle in handles {
        let (id, i) = handle.join().unwrap();
        assert_eq!(repr_of(&store, &id, "mine"), Some(i.to_string()));
    }
}
