//! Runtime values.
//!
//! Mutable containers are reference-shared through [`Shared`], so two names
//! bound to one list observe each other's mutations. Every variant is
//! `Send + Sync`, which lets a session scope move between worker threads.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::{FromPrimitive, ToPrimitive};

use super::ast::FunctionDef;
use super::format::{float_repr, quote_str};
use super::scope::Frame;

thread_local! {
    static TEARDOWN: Teardown = const {
        Teardown {
            pending: RefCell::new(Vec::new()),
            draining: Cell::new(false),
        }
    };
}

/// Values whose drop was deferred so that nested containers are freed in a
/// loop instead of through recursive `Drop` calls.
struct Teardown {
    pending: RefCell<Vec<Value>>,
    draining: Cell<bool>,
}

/// Move the children of a container that is being freed onto the teardown
/// queue, then free the queue unless an outer call is already doing so.
///
/// Each queued value drops with at most one level of nesting, so dropping a
/// list nested a million deep uses constant stack.
fn release(fill: impl FnOnce(&mut Vec<Value>)) {
    let owner = TEARDOWN.try_with(|teardown| {
        fill(&mut teardown.pending.borrow_mut());
        !teardown.draining.replace(true)
    });
    if !matches!(owner, Ok(true)) {
        return;
    }
    loop {
        let next = TEARDOWN
            .try_with(|teardown| teardown.pending.borrow_mut().pop())
            .ok()
            .flatten();
        match next {
            Some(value) => drop(value),
            None => break,
        }
    }
    let _ = TEARDOWN.try_with(|teardown| teardown.draining.set(false));
}

/// Storage whose values can be moved out for deferred teardown.
pub trait Release {
    fn release_into(&mut self, out: &mut Vec<Value>);
}

impl Release for Vec<Value> {
    fn release_into(&mut self, out: &mut Vec<Value>) {
        out.append(self);
    }
}

impl Release for DictMap {
    fn release_into(&mut self, out: &mut Vec<Value>) {
        for (_, (key, value)) in self.drain(..) {
            out.push(key);
            out.push(value);
        }
    }
}

impl Release for SetMap {
    fn release_into(&mut self, out: &mut Vec<Value>) {
        out.extend(self.drain(..).map(|(_, value)| value));
    }
}

impl Release for HashMap<String, Value> {
    fn release_into(&mut self, out: &mut Vec<Value>) {
        out.extend(self.drain().map(|(_, value)| value));
    }
}

/// Interior-mutable, reference-shared storage.
pub struct Shared<T: Release>(Arc<Mutex<T>>);

impl<T: Release> Shared<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(Mutex::new(value)))
    }

    /// Lock the contents. A poisoned lock is recovered, since every writer
    /// leaves the container in a valid state between operations.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl<T: Release + Clone> Shared<T> {
    /// Copy of the current contents, taken without holding the lock afterwards.
    pub fn snapshot(&self) -> T {
        self.lock().clone()
    }
}

impl<T: Release> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: Release> Drop for Shared<T> {
    fn drop(&mut self) {
        if let Some(mutex) = Arc::get_mut(&mut self.0) {
            let inner = mutex.get_mut().unwrap_or_else(PoisonError::into_inner);
            release(|out| inner.release_into(out));
        }
    }
}

/// Immutable tuple storage.
#[derive(Clone)]
pub struct Tuple(Arc<[Value]>);

impl Tuple {
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl Deref for Tuple {
    type Target = [Value];

    fn deref(&self) -> &[Value] {
        &self.0
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self[..] == other[..]
    }
}

impl From<Vec<Value>> for Tuple {
    fn from(items: Vec<Value>) -> Self {
        Self(items.into())
    }
}

impl Drop for Tuple {
    fn drop(&mut self) {
        if let Some(items) = Arc::get_mut(&mut self.0) {
            if items.is_empty() {
                return;
            }
            release(|out| out.extend(items.iter_mut().map(mem::take)));
        }
    }
}

/// Dict storage: insertion ordered, keyed by the hashed form of the key.
pub type DictMap = IndexMap<HashKey, (Value, Value)>;

/// Set storage: insertion ordered, keyed by the hashed form of the member.
pub type SetMap = IndexMap<HashKey, Value>;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    /// An integer outside the `i64` range.
    LongInt(Arc<BigInt>),
    Float(f64),
    Str(Arc<str>),
    List(Shared<Vec<Value>>),
    Tuple(Tuple),
    Dict(Shared<DictMap>),
    Set(Shared<SetMap>),
    Range(Range),
    Function(Arc<Function>),
    Builtin(Builtin),
    BoundMethod(Arc<BoundMethod>),
    NativeMethod(Arc<NativeMethod>),
    Class(Arc<Class>),
    Instance(Arc<Instance>),
    Module(Arc<Module>),
    Property(Arc<Property>),
    StaticMethod(Arc<Value>),
    ClassMethod(Arc<Value>),
    Super(Arc<SuperProxy>),
    Ellipsis,
    NotImplemented,
}

impl Value {
    pub fn str(text: impl Into<Arc<str>>) -> Self {
        Value::Str(text.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Shared::new(items))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(items.into())
    }

    pub fn dict(map: DictMap) -> Self {
        Value::Dict(Shared::new(map))
    }

    pub fn set(map: SetMap) -> Self {
        Value::Set(Shared::new(map))
    }

    /// The value as an integer, treating `bool` as a subtype of `int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// The value as a float, accepting any numeric variant.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::LongInt(n) => n.to_f64(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Name of the value's type as `type(v).__name__` reports it.
    pub fn type_name(&self) -> String {
        match self {
            Value::Instance(inst) => inst.class.name.clone(),
            other => other.builtin_type().name().to_string(),
        }
    }

    /// Built-in type of the value. Instances report `object`.
    pub fn builtin_type(&self) -> BuiltinType {
        match self {
            Value::None => BuiltinType::NoneType,
            Value::Bool(_) => BuiltinType::Bool,
            Value::Int(_) | Value::LongInt(_) => BuiltinType::Int,
            Value::Float(_) => BuiltinType::Float,
            Value::Str(_) => BuiltinType::Str,
            Value::List(_) => BuiltinType::List,
            Value::Tuple(_) => BuiltinType::Tuple,
            Value::Dict(_) => BuiltinType::Dict,
            Value::Set(_) => BuiltinType::Set,
            Value::Range(_) => BuiltinType::Range,
            Value::Function(_) => BuiltinType::Function,
            Value::Builtin(Builtin::Type(_)) | Value::Class(_) => BuiltinType::Type,
            Value::Builtin(_) | Value::NativeMethod(_) => BuiltinType::BuiltinFunction,
            Value::BoundMethod(_) => BuiltinType::Method,
            Value::Module(_) => BuiltinType::Module,
            Value::Property(_) => BuiltinType::Property,
            Value::StaticMethod(_) => BuiltinType::StaticMethod,
            Value::ClassMethod(_) => BuiltinType::ClassMethod,
            Value::Super(_) => BuiltinType::Super,
            Value::Ellipsis => BuiltinType::Ellipsis,
            Value::NotImplemented => BuiltinType::NotImplementedType,
            Value::Instance(_) => BuiltinType::Object,
        }
    }

    /// Address of the shared allocation behind reference-typed values.
    pub fn identity(&self) -> Option<usize> {
        fn addr<T: ?Sized>(arc: &Arc<T>) -> usize {
            Arc::as_ptr(arc) as *const () as usize
        }
        match self {
            Value::Str(s) => Some(addr(s)),
            Value::List(l) => Some(l.addr()),
            Value::Tuple(t) => Some(t.addr()),
            Value::Dict(d) => Some(d.addr()),
            Value::Set(s) => Some(s.addr()),
            Value::Function(f) => Some(addr(f)),
            Value::BoundMethod(m) => Some(addr(m)),
            Value::NativeMethod(m) => Some(addr(m)),
            Value::Class(c) => Some(addr(c)),
            Value::Instance(i) => Some(addr(i)),
            Value::Module(m) => Some(addr(m)),
            Value::Property(p) => Some(addr(p)),
            Value::StaticMethod(v) | Value::ClassMethod(v) => Some(addr(v)),
            Value::Super(s) => Some(addr(s)),
            _ => None,
        }
    }

    /// Identity comparison, as the `is` operator performs it.
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None)
            | (Value::Ellipsis, Value::Ellipsis)
            | (Value::NotImplemented, Value::NotImplemented) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::LongInt(a), Value::LongInt(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Range(a), Value::Range(b)) => a == b,
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) if a.is_empty() && b.is_empty() => true,
            _ => match (self.identity(), other.identity()) {
                (Some(a), Some(b)) => a == b && self.builtin_type() == other.builtin_type(),
                _ => false,
            },
        }
    }

    /// Representation that never runs user code. Used for logging and
    /// inspection outside an evaluation.
    pub fn plain_repr(&self) -> String {
        let mut out = String::new();
        self.write_plain(&mut out, 0);
        out
    }

    fn write_plain(&self, out: &mut String, depth: usize) {
        const MAX_DEPTH: usize = 16;
        if depth > MAX_DEPTH {
            out.push_str("...");
            return;
        }
        let join = |out: &mut String, items: &[Value]| {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                item.write_plain(out, depth + 1);
            }
        };
        match self {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::LongInt(n) => out.push_str(&n.to_string()),
            Value::Float(f) => out.push_str(&float_repr(*f)),
            Value::Str(s) => out.push_str(&quote_str(s)),
            Value::List(list) => {
                let items = list.snapshot();
                out.push('[');
                join(out, &items);
                out.push(']');
            }
            Value::Tuple(items) => {
                out.push('(');
                join(out, items);
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Value::Dict(dict) => {
                let pairs: Vec<(Value, Value)> = dict.lock().values().cloned().collect();
                out.push('{');
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.write_plain(out, depth + 1);
                    out.push_str(": ");
                    v.write_plain(out, depth + 1);
                }
                out.push('}');
            }
            Value::Set(set) => {
                let items: Vec<Value> = set.lock().values().cloned().collect();
                if items.is_empty() {
                    out.push_str("set()");
                } else {
                    out.push('{');
                    join(out, &items);
                    out.push('}');
                }
            }
            Value::Range(r) => out.push_str(&r.to_string()),
            Value::Function(f) => out.push_str(&format!("<function {}>", f.def.name)),
            Value::Builtin(Builtin::Type(t)) => out.push_str(&format!("<class '{}'>", t.name())),
            Value::Builtin(b) => out.push_str(&format!("<built-in function {}>", b.name())),
            Value::BoundMethod(m) => {
                out.push_str(&format!("<bound method of {}>", m.receiver.type_name()))
            }
            Value::NativeMethod(m) => out.push_str(&format!(
                "<built-in method {} of {} object>",
                m.name,
                m.receiver.type_name()
            )),
            Value::Class(c) => out.push_str(&format!("<class '{}'>", c.qualified_name())),
            Value::Instance(inst) => {
                out.push_str(&format!("<{} object>", inst.class.qualified_name()))
            }
            Value::Module(m) => out.push_str(&format!("<module '{}'>", m.name)),
            Value::Property(_) => out.push_str("<property object>"),
            Value::StaticMethod(_) => out.push_str("<staticmethod object>"),
            Value::ClassMethod(_) => out.push_str("<classmethod object>"),
            Value::Super(s) => out.push_str(&format!("<super: <class '{}'>>", s.class.name)),
            Value::Ellipsis => out.push_str("Ellipsis"),
            Value::NotImplemented => out.push_str("NotImplemented"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.plain_repr())
    }
}

/// Structural equality for data and identity for objects. The interpreter
/// uses its own comparison, which honours `__eq__`; this one exists for
/// host code and tests.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => a.ptr_eq(b) || a.snapshot() == b.snapshot(),
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => {
                if a.ptr_eq(b) {
                    return true;
                }
                let (a, b) = (a.snapshot(), b.snapshot());
                a.len() == b.len()
                    && a.iter()
                        .all(|(key, (_, v))| b.get(key).is_some_and(|(_, w)| v == w))
            }
            (Value::Set(a), Value::Set(b)) => {
                if a.ptr_eq(b) {
                    return true;
                }
                let (a, b) = (a.snapshot(), b.snapshot());
                a.len() == b.len() && a.keys().all(|key| b.contains_key(key))
            }
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::LongInt(a), Value::LongInt(b)) => a == b,
            (Value::LongInt(_), Value::Int(_) | Value::Bool(_))
            | (Value::Int(_) | Value::Bool(_), Value::LongInt(_)) => false,
            _ => match (self.as_float(), other.as_float()) {
                (Some(a), Some(b)) => a == b,
                _ => self.is_same(other),
            },
        }
    }
}

/// Hashed form of a dict key or set member.
///
/// Numbers that compare equal hash equal: `True`, `1` and `1.0` are one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    None,
    Int(i64),
    LongInt(BigInt),
    Float(u64),
    Str(Arc<str>),
    Tuple(Vec<HashKey>),
    Range(i64, i64, i64),
    Builtin(Builtin),
    Identity(usize),
    Custom(i64),
    Ellipsis,
}

impl HashKey {
    pub fn from_float(f: f64) -> Self {
        if f.fract() == 0.0 && f.is_finite() && f.abs() < 9.2e18 {
            HashKey::Int(f as i64)
        } else if f.fract() == 0.0 && f.is_finite() {
            BigInt::from_f64(f).map_or(HashKey::Float(f.to_bits()), HashKey::from_bigint)
        } else {
            HashKey::Float(f.to_bits())
        }
    }

    /// Key of an integer of any size. Values in the `i64` range use `Int`.
    pub fn from_bigint(n: BigInt) -> Self {
        match n.to_i64() {
            Some(i) => HashKey::Int(i),
            None => HashKey::LongInt(n),
        }
    }
}

/// `range(start, stop, step)`, iterated lazily.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl Range {
    pub fn len(&self) -> i64 {
        let (start, stop, step) = (self.start as i128, self.stop as i128, self.step as i128);
        let len = if step > 0 && start < stop {
            (stop - start - 1) / step + 1
        } else if step < 0 && start > stop {
            (start - stop - 1) / (-step) + 1
        } else {
            0
        };
        len as i64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at a non-negative index below `len()`.
    pub fn get(&self, index: i64) -> i64 {
        self.start + index * self.step
    }

    pub fn contains(&self, value: i64) -> bool {
        let in_bounds = if self.step > 0 {
            self.start <= value && value < self.stop
        } else {
            self.stop < value && value <= self.start
        };
        in_bounds && (value as i128 - self.start as i128) % self.step as i128 == 0
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.step == 1 {
            write!(f, "range({}, {})", self.start, self.stop)
        } else {
            write!(f, "range({}, {}, {})", self.start, self.stop, self.step)
        }
    }
}

/// A user-defined function or lambda.
pub struct Function {
    pub def: Arc<FunctionDef>,
    /// Defaults aligned with `def.params.positional`.
    pub defaults: Vec<Option<Value>>,
    pub kw_defaults: HashMap<String, Value>,
    /// Enclosing function frame, for closures.
    pub closure: Option<Arc<Frame>>,
    /// Class whose body defined the function; used by zero-argument `super()`.
    pub owner: OnceLock<Weak<Class>>,
}

impl Function {
    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn owner(&self) -> Option<Arc<Class>> {
        self.owner.get().and_then(Weak::upgrade)
    }
}

pub struct BoundMethod {
    pub receiver: Value,
    pub func: Value,
}

/// A method of a built-in type, bound to its receiver.
pub struct NativeMethod {
    pub receiver: Value,
    pub name: String,
}

pub struct Property {
    pub getter: Value,
    pub setter: Option<Value>,
}

pub struct SuperProxy {
    /// Lookups start after this class in the receiver's MRO.
    pub class: Arc<Class>,
    pub receiver: Value,
}

pub struct Module {
    pub name: String,
    pub attrs: HashMap<String, Value>,
}

pub struct Class {
    pub name: String,
    pub bases: Vec<Arc<Class>>,
    /// Ancestors in method resolution order, nearest first, excluding the
    /// class itself.
    pub mro: Vec<Arc<Class>>,
    pub attrs: Shared<HashMap<String, Value>>,
    /// Whether the class is one of the built-in exception types.
    pub builtin: bool,
}

impl Class {
    /// Build a class, computing its C3 linearization.
    pub fn new(
        name: impl Into<String>,
        bases: Vec<Arc<Class>>,
        attrs: HashMap<String, Value>,
    ) -> Result<Self, String> {
        let mro = c3_merge(&bases)?;
        Ok(Self {
            name: name.into(),
            bases,
            mro,
            attrs: Shared::new(attrs),
            builtin: false,
        })
    }

    /// The class followed by its ancestors.
    pub fn linearization(self: &Arc<Self>) -> Vec<Arc<Class>> {
        let mut out = Vec::with_capacity(self.mro.len() + 1);
        out.push(Arc::clone(self));
        out.extend(self.mro.iter().cloned());
        out
    }

    /// Find an attribute on the class or the first ancestor defining it.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.attrs.lock().get(name) {
            return Some(value.clone());
        }
        self.mro
            .iter()
            .find_map(|class| class.attrs.lock().get(name).cloned())
    }

    pub fn is_subclass_of(self: &Arc<Self>, other: &Arc<Class>) -> bool {
        Arc::ptr_eq(self, other) || self.mro.iter().any(|c| Arc::ptr_eq(c, other))
    }

    /// Name as shown in reprs: user classes live in `__main__`.
    pub fn qualified_name(&self) -> String {
        if self.builtin {
            self.name.clone()
        } else {
            format!("__main__.{}", self.name)
        }
    }
}

fn c3_merge(bases: &[Arc<Class>]) -> Result<Vec<Arc<Class>>, String> {
    let mut sequences: Vec<Vec<Arc<Class>>> = bases.iter().map(|b| b.linearization()).collect();
    sequences.push(bases.to_vec());

    let mut result = Vec::new();
    loop {
        sequences.retain(|seq| !seq.is_empty());
        if sequences.is_empty() {
            return Ok(result);
        }
        let candidate = sequences
            .iter()
            .map(|seq| &seq[0])
            .find(|head| {
                !sequences
                    .iter()
                    .any(|seq| seq[1..].iter().any(|c| Arc::ptr_eq(c, head)))
            })
            .cloned();
        let Some(next) = candidate else {
            return Err("Cannot create a consistent method resolution order (MRO)".to_string());
        };
        for seq in sequences.iter_mut() {
            if Arc::ptr_eq(&seq[0], &next) {
                seq.remove(0);
            }
        }
        result.push(next);
    }
}

pub struct Instance {
    pub class: Arc<Class>,
    pub attrs: Shared<HashMap<String, Value>>,
}

impl Instance {
    pub fn new(class: Arc<Class>) -> Self {
        Self {
            class,
            attrs: Shared::new(HashMap::new()),
        }
    }
}

macro_rules! named_enum {
    ($(#[$meta:meta])* $vis:vis enum $name:ident { $($variant:ident => $text:literal,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant,)*
        }

        impl $name {
            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)*
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($text => Some($name::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

named_enum! {
    /// Free functions of the builtins namespace.
    pub enum BuiltinFunction {
        Print => "print",
        Len => "len",
        Repr => "repr",
        Isinstance => "isinstance",
        Issubclass => "issubclass",
        Abs => "abs",
        Min => "min",
        Max => "max",
        Sum => "sum",
        Sorted => "sorted",
        Reversed => "reversed",
        Enumerate => "enumerate",
        Zip => "zip",
        Map => "map",
        Filter => "filter",
        Any => "any",
        All => "all",
        Round => "round",
        Hasattr => "hasattr",
        Getattr => "getattr",
        Setattr => "setattr",
        Delattr => "delattr",
        Callable => "callable",
        Divmod => "divmod",
        Pow => "pow",
        Chr => "chr",
        Ord => "ord",
        Id => "id",
        Hash => "hash",
        Hex => "hex",
        Oct => "oct",
        Bin => "bin",
        Format => "format",
        ExceptionInit => "__init__",
    }
}

named_enum! {
    /// Built-in types. Only some are reachable by name from scripts.
    pub enum BuiltinType {
        Object => "object",
        Int => "int",
        Float => "float",
        Str => "str",
        Bool => "bool",
        List => "list",
        Tuple => "tuple",
        Dict => "dict",
        Set => "set",
        Range => "range",
        Type => "type",
        StaticMethod => "staticmethod",
        ClassMethod => "classmethod",
        Property => "property",
        Super => "super",
        NoneType => "NoneType",
        Function => "function",
        BuiltinFunction => "builtin_function_or_method",
        Method => "method",
        Module => "module",
        Ellipsis => "ellipsis",
        NotImplementedType => "NotImplementedType",
    }
}

named_enum! {
    /// Functions of the built-in `math` module.
    pub enum MathFunction {
        Sqrt => "sqrt",
        Isqrt => "isqrt",
        Floor => "floor",
        Ceil => "ceil",
        Trunc => "trunc",
        Fabs => "fabs",
        Fmod => "fmod",
        Exp => "exp",
        Log => "log",
        Log2 => "log2",
        Log10 => "log10",
        Pow => "pow",
        Sin => "sin",
        Cos => "cos",
        Tan => "tan",
        Asin => "asin",
        Acos => "acos",
        Atan => "atan",
        Atan2 => "atan2",
        Hypot => "hypot",
        Degrees => "degrees",
        Radians => "radians",
        Copysign => "copysign",
        Gcd => "gcd",
        Lcm => "lcm",
        Factorial => "factorial",
        Comb => "comb",
        Perm => "perm",
        Fsum => "fsum",
        Prod => "prod",
        Isclose => "isclose",
        Isnan => "isnan",
        Isinf => "isinf",
        Isfinite => "isfinite",
    }
}

impl BuiltinType {
    /// Types a script can name directly.
    pub fn is_public(self) -> bool {
        !matches!(
            self,
            BuiltinType::NoneType
                | BuiltinType::Function
                | BuiltinType::BuiltinFunction
                | BuiltinType::Method
                | BuiltinType::Module
                | BuiltinType::Ellipsis
                | BuiltinType::NotImplementedType
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Function(BuiltinFunction),
    Type(BuiltinType),
    Math(MathFunction),
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Function(f) => f.name(),
            Builtin::Type(t) => t.name(),
            Builtin::Math(m) => m.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(name: &str, bases: Vec<Arc<Class>>) -> Arc<Class> {
        Arc::new(Class::new(name, bases, HashMap::new()).unwrap())
    }

    #[test]
    fn test_shared_list_aliasing() {
        let list = Value::list(vec![Value::Int(1)]);
        let alias = list.clone();
        if let Value::List(items) = &alias {
            items.lock().push(Value::Int(2));
        }
        assert_eq!(list, Value::list(vec![Value::Int(1), Value::Int(2)]));
        assert!(list.is_same(&alias));
    }

    #[test]
    fn test_numeric_equality_across_types() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_eq!(Value::Bool(true), Value::Int(1));
        assert_ne!(Value::Int(1), Value::str("1"));
    }

    #[test]
    fn test_hash_key_normalizes_integral_floats() {
        assert_eq!(HashKey::from_float(2.0), HashKey::Int(2));
        assert_ne!(HashKey::from_float(2.5), HashKey::Int(2));
    }

    #[test]
    fn test_range_len_and_contains() {
        let r = Range { start: 0, stop: 10, step: 3 };
        assert_eq!(r.len(), 4);
        assert!(r.contains(9));
        assert!(!r.contains(10));

        let down = Range { start: 5, stop: 0, step: -2 };
        assert_eq!(down.len(), 3);
        assert_eq!(down.get(2), 1);
        assert!(down.contains(3));
        assert!(!down.contains(0));

        assert!(Range { start: 3, stop: 3, step: 1 }.is_empty());
    }

    #[test]
    fn test_c3_linearization() {
        let a = class("A", vec![]);
        let b = class("B", vec![a.clone()]);
        let c = class("C", vec![a.clone()]);
        let d = class("D", vec![b.clone(), c.clone()]);
        let names: Vec<&str> = d.mro.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["B", "C", "A"]);
        assert!(d.is_subclass_of(&a));
        assert!(!a.is_subclass_of(&d));
    }

    #[test]
    fn test_inconsistent_mro_is_rejected() {
        let a = class("A", vec![]);
        let b = class("B", vec![a.clone()]);
        assert!(Class::new("C", vec![a, b], HashMap::new()).is_err());
    }

    #[test]
    fn test_class_lookup_follows_mro() {
        let base = class("Base", vec![]);
        base.attrs.lock().insert("x".into(), Value::Int(1));
        let derived = class("Derived", vec![base]);
        assert_eq!(derived.lookup("x"), Some(Value::Int(1)));
        assert_eq!(derived.lookup("y"), None);
    }

    #[test]
    fn test_plain_repr() {
        let value = Value::tuple(vec![
            Value::Int(1),
            Value::str("a"),
            Value::list(vec![Value::None, Value::Float(0.5)]),
        ]);
        assert_eq!(value.plain_repr(), "(1, 'a', [None, 0.5])");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).plain_repr(), "(1,)");
        assert_eq!(Value::set(SetMap::new()).plain_repr(), "set()");
    }

    #[test]
    fn test_builtin_names_round_trip() {
        assert_eq!(BuiltinFunction::from_name("len"), Some(BuiltinFunction::Len));
        assert_eq!(BuiltinType::from_name("dict"), Some(BuiltinType::Dict));
        assert_eq!(MathFunction::Sqrt.name(), "sqrt");
        assert!(!BuiltinType::NoneType.is_public());
    }

    const DEEP: usize = 1_000_000;

    #[test]
    fn test_deeply_nested_lists_drop_iteratively() {
        let mut value = Value::None;
        for _ in 0..DEEP {
            value = Value::list(vec![value]);
        }
        drop(value);
    }

    #[test]
    fn test_deeply_nested_tuples_and_dicts_drop_iteratively() {
        let mut value = Value::Int(0);
        for depth in 0..DEEP {
            value = if depth % 2 == 0 {
                Value::tuple(vec![value, Value::str("x")])
            } else {
                let mut map = DictMap::new();
                map.insert(HashKey::Str("k".into()), (Value::str("k"), value));
                Value::dict(map)
            };
        }
        drop(value);
    }

    #[test]
    fn test_teardown_keeps_shared_children() {
        let child = Value::list(vec![Value::Int(7)]);
        let parent = Value::tuple(vec![child.clone(), Value::list(vec![child.clone()])]);
        drop(parent);
        let Value::List(items) = &child else {
            panic!("expected a list");
        };
        assert_eq!(items.snapshot(), vec![Value::Int(7)]);
    }
}
