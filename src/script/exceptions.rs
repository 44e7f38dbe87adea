//! Built-in exception hierarchy and the in-flight exception carrier.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use super::value::{Builtin, BuiltinFunction, Class, Instance, Shared, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExcKind {
    BaseException,
    Exception,
    ArithmeticError,
    ZeroDivisionError,
    OverflowError,
    LookupError,
    KeyError,
    IndexError,
    ValueError,
    TypeError,
    NameError,
    UnboundLocalError,
    AttributeError,
    RuntimeError,
    RecursionError,
    NotImplementedError,
    AssertionError,
    StopIteration,
    ImportError,
    ModuleNotFoundError,
    MemoryError,
}

impl ExcKind {
    /// Every kind, parents before children.
    pub const ALL: [ExcKind; 21] = [
        ExcKind::BaseException,
        ExcKind::Exception,
        ExcKind::ArithmeticError,
        ExcKind::ZeroDivisionError,
        ExcKind::OverflowError,
        ExcKind::LookupError,
        ExcKind::KeyError,
        ExcKind::IndexError,
        ExcKind::ValueError,
        ExcKind::TypeError,
        ExcKind::NameError,
        ExcKind::UnboundLocalError,
        ExcKind::AttributeError,
        ExcKind::RuntimeError,
        ExcKind::RecursionError,
        ExcKind::NotImplementedError,
        ExcKind::AssertionError,
        ExcKind::StopIteration,
        ExcKind::ImportError,
        ExcKind::ModuleNotFoundError,
        ExcKind::MemoryError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ExcKind::BaseException => "BaseException",
            ExcKind::Exception => "Exception",
            ExcKind::ArithmeticError => "ArithmeticError",
            ExcKind::ZeroDivisionError => "ZeroDivisionError",
            ExcKind::OverflowError => "OverflowError",
            ExcKind::LookupError => "LookupError",
            ExcKind::KeyError => "KeyError",
            ExcKind::IndexError => "IndexError",
            ExcKind::ValueError => "ValueError",
            ExcKind::TypeError => "TypeError",
            ExcKind::NameError => "NameError",
            ExcKind::UnboundLocalError => "UnboundLocalError",
            ExcKind::AttributeError => "AttributeError",
            ExcKind::RuntimeError => "RuntimeError",
            ExcKind::RecursionError => "RecursionError",
            ExcKind::NotImplementedError => "NotImplementedError",
            ExcKind::AssertionError => "AssertionError",
            ExcKind::StopIteration => "StopIteration",
            ExcKind::ImportError => "ImportError",
            ExcKind::ModuleNotFoundError => "ModuleNotFoundError",
            ExcKind::MemoryError => "MemoryError",
        }
    }

    pub fn parent(self) -> Option<ExcKind> {
        let parent = match self {
            ExcKind::BaseException => return None,
            ExcKind::Exception => ExcKind::BaseException,
            ExcKind::ZeroDivisionError | ExcKind::OverflowError => ExcKind::ArithmeticError,
            ExcKind::KeyError | ExcKind::IndexError => ExcKind::LookupError,
            ExcKind::UnboundLocalError => ExcKind::NameError,
            ExcKind::RecursionError | ExcKind::NotImplementedError => ExcKind::RuntimeError,
            ExcKind::ModuleNotFoundError => ExcKind::ImportError,
            _ => ExcKind::Exception,
        };
        Some(parent)
    }

    pub fn from_name(name: &str) -> Option<ExcKind> {
        ExcKind::ALL.iter().copied().find(|kind| kind.name() == name)
    }

    /// The shared class object for this kind.
    pub fn class(self) -> Arc<Class> {
        let index = ExcKind::ALL
            .iter()
            .position(|kind| *kind == self)
            .unwrap_or(0);
        Arc::clone(&classes()[index])
    }
}

fn classes() -> &'static [Arc<Class>] {
    static CLASSES: OnceLock<Vec<Arc<Class>>> = OnceLock::new();
    CLASSES.get_or_init(|| {
        let mut built: Vec<Arc<Class>> = Vec::with_capacity(ExcKind::ALL.len());
        for kind in ExcKind::ALL {
            let (bases, mro) = match kind.parent() {
                Some(parent) => {
                    let index = ExcKind::ALL
                        .iter()
                        .position(|k| *k == parent)
                        .unwrap_or(0);
                    let parent = Arc::clone(&built[index]);
                    (vec![Arc::clone(&parent)], parent.linearization())
                }
                None => (Vec::new(), Vec::new()),
            };
            let mut attrs = HashMap::new();
            if kind == ExcKind::BaseException {
                attrs.insert(
                    "__init__".to_string(),
                    Value::Builtin(Builtin::Function(BuiltinFunction::ExceptionInit)),
                );
            }
            built.push(Arc::new(Class {
                name: kind.name().to_string(),
                bases,
                mro,
                attrs: Shared::new(attrs),
                builtin: true,
            }));
        }
        built
    })
}

/// Whether `class` derives from `BaseException`.
pub fn is_exception_class(class: &Arc<Class>) -> bool {
    class.is_subclass_of(&ExcKind::BaseException.class())
}

/// A fresh exception instance with `args` set.
pub fn new_exception(class: Arc<Class>, args: Vec<Value>) -> Value {
    let instance = Instance::new(class);
    instance
        .attrs
        .lock()
        .insert("args".to_string(), Value::tuple(args));
    Value::Instance(Arc::new(instance))
}

/// An exception propagating out of the code that raised it.
#[derive(Debug, Clone)]
pub struct Raised {
    /// The exception instance.
    pub exc: Value,
    /// Line of the innermost statement the exception passed through.
    pub line: Option<u32>,
}

impl Raised {
    /// Raise `kind` with a single message argument, or none if empty.
    pub fn new(kind: ExcKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let args = if message.is_empty() {
            Vec::new()
        } else {
            vec![Value::str(message)]
        };
        Self::with_args(kind, args)
    }

    pub fn with_args(kind: ExcKind, args: Vec<Value>) -> Self {
        Self::from_value(new_exception(kind.class(), args))
    }

    pub fn from_value(exc: Value) -> Self {
        Self { exc, line: None }
    }

    pub fn class(&self) -> Option<Arc<Class>> {
        match &self.exc {
            Value::Instance(inst) => Some(Arc::clone(&inst.class)),
            _ => None,
        }
    }

    /// Whether the exception is an instance of `kind` or a subclass.
    pub fn is(&self, kind: ExcKind) -> bool {
        self.class()
            .is_some_and(|class| class.is_subclass_of(&kind.class()))
    }

    pub fn class_name(&self) -> String {
        self.exc.type_name()
    }

    /// The exception's `args` tuple.
    pub fn args(&self) -> Vec<Value> {
        exception_args(&self.exc)
    }
}

/// `args` of an exception instance; empty for anything else.
pub fn exception_args(exc: &Value) -> Vec<Value> {
    let Value::Instance(inst) = exc else {
        return Vec::new();
    };
    match inst.attrs.lock().get("args") {
        Some(Value::Tuple(items)) => items.to_vec(),
        Some(other) => vec![other.clone()],
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hierarchy() {
        let zero = ExcKind::ZeroDivisionError.class();
        assert!(zero.is_subclass_of(&ExcKind::ArithmeticError.class()));
        assert!(zero.is_subclass_of(&ExcKind::Exception.class()));
        assert!(zero.is_subclass_of(&ExcKind::BaseException.class()));
        assert!(!zero.is_subclass_of(&ExcKind::LookupError.class()));
        assert!(ExcKind::KeyError
            .class()
            .is_subclass_of(&ExcKind::LookupError.class()));
    }

    #[test]
    fn test_classes_are_shared() {
        assert!(Arc::ptr_eq(
            &ExcKind::ValueError.class(),
            &ExcKind::ValueError.class()
        ));
    }

    #[test]
    fn test_raised_carries_args() {
        let raised = Raised::new(ExcKind::ValueError, "bad value");
        assert!(raised.is(ExcKind::ValueError));
        assert!(raised.is(ExcKind::Exception));
        assert!(!raised.is(ExcKind::TypeError));
        assert_eq!(raised.class_name(), "ValueError");
        assert_eq!(raised.args(), vec![Value::str("bad value")]);

        assert!(Raised::new(ExcKind::StopIteration, "").args().is_empty());
    }

    #[test]
    fn test_from_name() {
        assert_eq!(ExcKind::from_name("KeyError"), Some(ExcKind::KeyError));
        assert_eq!(ExcKind::from_name("Nope"), None);
    }

    #[test]
    fn test_is_exception_class() {
        assert!(is_exception_class(&ExcKind::RecursionError.class()));
        let plain = Arc::new(Class::new("Plain", vec![], HashMap::new()).unwrap());
        assert!(!is_exception_class(&plain));
    }
}
