//! Session storage and management.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::SessionId;
use crate::error::ReplTunnelError;
use crate::script::{Engine, Evaluation, Scope};
use crate::Result;

/// One binding of a session scope, rendered for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableInfo {
    pub name: String,
    pub type_name: String,
    pub repr: String,
}

/// A session: a persistent scope plus bookkeeping.
#[derive(Debug)]
pub struct Session {
    /// Unique identifier.
    pub id: SessionId,
    /// Global namespace shared by every chunk run on this session.
    scope: Mutex<Scope>,
    /// Time when session was created.
    pub created_at: Instant,
    /// Nanoseconds from `created_at` to the last activity.
    last_activity_nanos: AtomicU64,
    /// Completed evaluations, successful or not.
    execution_count: AtomicU64,
}

impl Session {
    /// Create a new session with an empty scope.
    pub fn new(id: SessionId) -> Self {
        let now = Instant::now();
        Self {
            id,
            scope: Mutex::new(Scope::new()),
            created_at: now,
            last_activity_nanos: AtomicU64::new(0),
            execution_count: AtomicU64::new(0),
        }
    }

    /// Run `source` against this session's scope.
    ///
    /// Holds the scope lock for the whole evaluation, so concurrent calls on
    /// the same session queue behind each other.
    pub fn evaluate(&self, engine: &Engine, source: &str) -> Result<Evaluation> {
        let mut scope = self.lock_scope()?;
        let result = engine.evaluate(source, &mut scope);
        drop(scope);

        self.execution_count.fetch_add(1, Ordering::Relaxed);
        self.touch();
        Ok(result?)
    }

    /// Lock the scope for direct access.
    ///
    /// A poisoned scope is reported as [`ReplTunnelError::LockPoisoned`] on
    /// every access; its bindings may be half-updated.
    pub fn lock_scope(&self) -> Result<MutexGuard<'_, Scope>> {
        self.scope.lock().map_err(|_| ReplTunnelError::LockPoisoned)
    }

    /// Bindings in the scope, sorted by name.
    pub fn snapshot(&self) -> Result<Vec<VariableInfo>> {
        let scope = self.lock_scope()?;
        let mut vars: Vec<VariableInfo> = scope
            .iter()
            .map(|(name, value)| VariableInfo {
                name: name.clone(),
                type_name: value.type_name(),
                repr: value.plain_repr(),
            })
            .collect();
        vars.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(vars)
    }

    /// Number of bindings in the scope.
    pub fn variable_count(&self) -> Result<usize> {
        Ok(self.lock_scope()?.len())
    }

    pub fn execution_count(&self) -> u64 {
        self.execution_count.load(Ordering::Relaxed)
    }

    /// Update the last activity timestamp.
    pub fn touch(&self) {
        let nanos = u64::try_from(self.created_at.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.last_activity_nanos.fetch_max(nanos, Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> Instant {
        self.created_at + Duration::from_nanos(self.last_activity_nanos.load(Ordering::Relaxed))
    }

    /// Get the idle duration since last activity.
    pub fn idle_duration(&self) -> Duration {
        self.last_activity().elapsed()
    }
}

/// Thread-safe storage for sessions.
///
/// The table lock is only held while the map itself is read or changed;
/// evaluation happens on a cloned session handle so a long-running chunk
/// never blocks other sessions.
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    engine: Engine,
}

impl SessionStore {
    /// Create a new empty session store.
    pub fn new() -> Self {
        Self::with_engine(Engine::default())
    }

    /// Create a store whose sessions evaluate with `engine`.
    pub fn with_engine(engine: Engine) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            engine,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    // A writer cannot panic halfway through a map operation, so a poisoned
    // table is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<SessionId, Arc<Session>>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, Arc<Session>>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a new session with an empty scope.
    ///
    /// Returns the newly assigned session ID.
    pub fn create(&self) -> SessionId {
        let id = SessionId::generate();
        self.write().insert(id, Arc::new(Session::new(id)));
        info!(session = %id, "session created");
        id
    }

    /// Look up a session.
    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.read().get(id).cloned()
    }

    /// Check if a session exists.
    pub fn contains(&self, id: &SessionId) -> bool {
        self.read().contains_key(id)
    }

    /// Remove a session, returning its final state.
    pub fn delete(&self, id: &SessionId) -> Result<Arc<Session>> {
        let removed = self
            .write()
            .remove(id)
            .ok_or_else(|| ReplTunnelError::SessionNotFound(id.to_string()))?;
        info!(session = %id, executions = removed.execution_count(), "session deleted");
        Ok(removed)
    }

    /// Evaluate a chunk on the session with the given ID.
    pub fn evaluate_on(&self, id: &SessionId, source: &str) -> Result<Evaluation> {
        let session = self
            .get(id)
            .ok_or_else(|| ReplTunnelError::SessionNotFound(id.to_string()))?;

        let started = Instant::now();
        let result = session.evaluate(&self.engine, source);
        debug!(
            session = %id,
            ok = result.is_ok(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "chunk evaluated"
        );
        result
    }

    /// Get the number of sessions in the store.
    pub fn count(&self) -> usize {
        self.read().len()
    }

    /// List all session IDs.
    pub fn list_ids(&self) -> Vec<SessionId> {
        self.read().keys().copied().collect()
    }

    /// All sessions, oldest first.
    pub fn list(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<Arc<Session>> = self.read().values().cloned().collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Value;

    #[test]
    fn test_create_session() {
        let store = SessionStore::new();
        let id = store.create();

        assert!(store.contains(&id));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_get_session() {
        let store = SessionStore::new();
        let id = store.create();

        let session = store.get(&id).unwrap();
        assert_eq!(session.id, id);
        assert_eq!(session.execution_count(), 0);
        assert_eq!(session.variable_count().unwrap(), 0);
    }

    #[test]
    fn test_get_nonexistent() {
        let store = SessionStore::new();
        let fake_id = SessionId::from_raw(999999);

        assert!(store.get(&fake_id).is_none());
    }

    #[test]
    fn test_delete_session() {
        let store = SessionStore::new();
        let id = store.create();
        store.evaluate_on(&id, "x = 1").unwrap();

        let removed = store.delete(&id).unwrap();
        assert_eq!(removed.id, id);
        assert_eq!(removed.snapshot().unwrap()[0].name, "x");

        assert!(!store.contains(&id));
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_delete_unknown_or_twice() {
        let store = SessionStore::new();
        let fake_id = SessionId::from_raw(7);
        assert!(matches!(
            store.delete(&fake_id),
            Err(ReplTunnelError::SessionNotFound(_))
        ));

        let id = store.create();
        store.delete(&id).unwrap();
        assert!(matches!(
            store.delete(&id),
            Err(ReplTunnelError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_evaluate_on_unknown_session() {
        let store = SessionStore::new();
        let fake_id = SessionId::from_raw(7);
        assert!(matches!(
            store.evaluate_on(&fake_id, "1"),
            Err(ReplTunnelError::SessionNotFound(_))
        ));

        let id = store.create();
        store.delete(&id).unwrap();
        assert!(matches!(
            store.evaluate_on(&id, "1"),
            Err(ReplTunnelError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_scope_persists_across_evaluations() {
        let store = SessionStore::new();
        let id = store.create();

        assert!(store.evaluate_on(&id, "a = 0").unwrap().value.is_none());
        assert!(store.evaluate_on(&id, "b = a + 1").unwrap().value.is_none());
        let result = store.evaluate_on(&id, "a + b").unwrap();
        assert_eq!(result.value, Some(Value::Int(1)));

        let session = store.get(&id).unwrap();
        assert_eq!(session.execution_count(), 3);
        let names: Vec<String> = session
            .snapshot()
            .unwrap()
            .into_iter()
            .map(|v| v.name)
            .collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn test_errors_are_classified() {
        let store = SessionStore::new();
        let id = store.create();

        assert!(matches!(
            store.evaluate_on(&id, "x = ("),
            Err(ReplTunnelError::Parse(_))
        ));
        assert!(matches!(
            store.evaluate_on(&id, "x = 1\nundefined_name"),
            Err(ReplTunnelError::Evaluation(ref e)) if e.kind == "NameError"
        ));

        // The failed chunk's assignment stuck; the session is still usable.
        let result = store.evaluate_on(&id, "x").unwrap();
        assert_eq!(result.value, Some(Value::Int(1)));
        assert_eq!(store.get(&id).unwrap().execution_count(), 3);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let store = SessionStore::new();
        let a = store.create();
        let b = store.create();

        store.evaluate_on(&a, "x = 'a'").unwrap();
        store.evaluate_on(&b, "x = 'b'").unwrap();

        assert_eq!(
            store.evaluate_on(&a, "x").unwrap().value,
            Some(Value::str("a"))
        );
        assert_eq!(
            store.evaluate_on(&b, "x").unwrap().value,
            Some(Value::str("b"))
        );
    }

    #[test]
    fn test_snapshot_reports_types() {
        let store = SessionStore::new();
        let id = store.create();
        store
            .evaluate_on(&id, "n = 3\ns = 'hi'\ndef f():\n    pass")
            .unwrap();

        let vars = store.get(&id).unwrap().snapshot().unwrap();
        let summary: Vec<(&str, &str, &str)> = vars
            .iter()
            .map(|v| (v.name.as_str(), v.type_name.as_str(), v.repr.as_str()))
            .collect();
        assert_eq!(summary[1], ("n", "int", "3"));
        assert_eq!(summary[2], ("s", "str", "'hi'"));
        assert_eq!(summary[0].1, "function");
    }

    #[test]
    fn test_list_ids() {
        let store = SessionStore::new();
        let id1 = store.create();
        let id2 = store.create();
        let id3 = store.create();

        let ids = store.list_ids();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&id1));
        assert!(ids.contains(&id2));
        assert!(ids.contains(&id3));

        let listed: Vec<SessionId> = store.list().iter().map(|s| s.id).collect();
        assert_eq!(listed.len(), 3);
    }

    #[test]
    fn test_concurrent_access() {
        use std::thread;

        let store = Arc::new(SessionStore::new());
        let mut handles = vec![];

        // Spawn 100 threads that each create a session
        for _ in 0..100 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || store.create()));
        }

        let ids: Vec<SessionId> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        // All IDs should be unique
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 100);

        // Store should have 100 sessions
        assert_eq!(store.count(), 100);
    }

    #[test]
    fn test_concurrent_evaluations_on_one_session_are_serialized() {
        use std::thread;

        let store = Arc::new(SessionStore::new());
        let id = store.create();
        store.evaluate_on(&id, "n = 0\nlog = []").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..25 {
                        let chunk = format!(
                            "current = n\nlog.append({})\nn = current + 1",
                            worker
                        );
                        store.evaluate_on(&id, &chunk).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let result = store.evaluate_on(&id, "(n, len(log))").unwrap();
        assert_eq!(result.repr.as_deref(), Some("(200, 200)"));
        assert_eq!(store.get(&id).unwrap().execution_count(), 202);
    }

    #[test]
    fn test_activity_tracking_is_lock_free() {
        let session = Session::new(SessionId::from_raw(1));
        assert_eq!(session.last_activity(), session.created_at);

        std::thread::sleep(Duration::from_millis(5));
        session.touch();
        let touched = session.last_activity();
        assert!(touched > session.created_at);
        assert!(session.idle_duration() < Duration::from_secs(5));
    }

    #[test]
    fn test_poisoned_scope_is_reported() {
        let store = Arc::new(SessionStore::new());
        let id = store.create();
        store.evaluate_on(&id, "x = 1").unwrap();

        let session = store.get(&id).unwrap();
        let poisoner = Arc::clone(&session);
        let joined = std::thread::spawn(move || {
            let _guard = poisoner.scope.lock().unwrap();
            panic!("poison the scope");
        })
        .join();
        assert!(joined.is_err());

        assert!(matches!(
            store.evaluate_on(&id, "x"),
            Err(ReplTunnelError::LockPoisoned)
        ));
        assert!(matches!(session.snapshot(), Err(ReplTunnelError::LockPoisoned)));
        assert!(matches!(
            session.variable_count(),
            Err(ReplTunnelError::LockPoisoned)
        ));

        // Bookkeeping never takes the scope lock.
        session.touch();
        assert!(session.last_activity() >= session.created_at);
        assert_eq!(session.execution_count(), 1);

        // Other sessions are unaffected, and the poisoned one can be removed.
        let other = store.create();
        assert_eq!(store.evaluate_on(&other, "2").unwrap().value, Some(Value::Int(2)));
        store.delete(&id).unwrap();
    }
}
