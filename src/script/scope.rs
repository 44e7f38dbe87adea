//! Variable namespaces: the persistent session scope and function frames.

use std::collections::hash_map;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::ast::ScopeInfo;
use super::value::{Function, Value};

/// A session's global namespace.
///
/// Every chunk evaluated on a session reads and writes the same `Scope`, so
/// bindings made by one chunk are visible to the next.
#[derive(Debug, Default, Clone)]
pub struct Scope {
    vars: HashMap<String, Value>,
}

impl Scope {
    /// Create an empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Bind `name`, returning the previous value if it was bound.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.vars.insert(name.into(), value)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Bound names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.vars.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, Value> {
        self.vars.iter()
    }
}

/// Local variables of one function call or comprehension.
pub struct Frame {
    vars: Mutex<HashMap<String, Value>>,
    pub info: Arc<ScopeInfo>,
    pub parent: Option<Arc<Frame>>,
    /// The function being executed; `None` for comprehensions.
    pub function: Option<Arc<Function>>,
}

impl Frame {
    pub fn new(
        vars: HashMap<String, Value>,
        info: Arc<ScopeInfo>,
        parent: Option<Arc<Frame>>,
        function: Option<Arc<Function>>,
    ) -> Self {
        Self {
            vars: Mutex::new(vars),
            info,
            parent,
            function,
        }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.lock().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.lock().insert(name.into(), value);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.lock().remove(name)
    }

    /// Nearest enclosing frame, starting at `self`, that owns `name` as a local.
    pub fn defining(self: &Arc<Self>, name: &str) -> Option<Arc<Frame>> {
        let mut frame = Some(Arc::clone(self));
        while let Some(current) = frame {
            if current.info.is_local(name) {
                return Some(current);
            }
            frame = current.parent.clone();
        }
        None
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        self.vars.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_scope_mapping_semantics() {
        let mut scope = Scope::new();
        assert!(scope.is_empty());

        assert!(scope.insert("a", Value::Int(0)).is_none());
        assert_eq!(scope.insert("a", Value::Int(1)), Some(Value::Int(0)));
        scope.insert("b", Value::str("x"));

        assert_eq!(scope.len(), 2);
        assert_eq!(scope.get("a"), Some(&Value::Int(1)));
        assert_eq!(scope.names(), ["a", "b"]);

        assert_eq!(scope.remove("a"), Some(Value::Int(1)));
        assert!(!scope.contains("a"));
        assert!(scope.remove("a").is_none());
    }

    #[test]
    fn test_frame_defining_walks_parents() {
        let outer_info = ScopeInfo {
            locals: HashSet::from(["x".to_string()]),
            ..ScopeInfo::default()
        };
        let outer = Arc::new(Frame::new(HashMap::new(), Arc::new(outer_info), None, None));
        outer.set("x", Value::Int(5));

        let inner = Arc::new(Frame::new(
            HashMap::new(),
            Arc::new(ScopeInfo::default()),
            Some(outer.clone()),
            None,
        ));

        let found = inner.defining("x").unwrap();
        assert!(Arc::ptr_eq(&found, &outer));
        assert_eq!(found.get("x"), Some(Value::Int(5)));
        assert!(inner.defining("y").is_none());
    }

    #[test]
    fn test_scope_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Scope>();
        assert_send_sync::<Value>();
    }
}
