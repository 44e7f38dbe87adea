//! Tree-walking evaluator over the parsed statements.
//!
//! The interpreter borrows a session [`Scope`] as its module namespace for
//! the duration of one chunk. Function frames, closures and class bodies are
//! resolved against that scope through [`Env`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use num_bigint::BigInt;

use super::ast::{
    Arg, BinOp, BoolOp, CmpOp, Comprehension, Constant, DictItem, ExceptHandler, Expr,
    FStringPart, FunctionDef, ScopeInfo, Stmt, StmtKind, UnaryOp,
};
use super::builtins;
use super::long_int;
use super::error::EvalError;
use super::exceptions::{exception_args, is_exception_class, ExcKind, Raised};
use super::format::{
    format_float, format_int, format_integer, format_str, parse_percent, FormatSpec, PercentPiece,
};
use super::scope::{Frame, Scope};
use super::value::{
    BoundMethod, Builtin, BuiltinFunction, BuiltinType, Class, DictMap, Function, HashKey,
    Instance, SetMap, SuperProxy, Value,
};

/// Result of evaluating an expression or running a helper.
pub type EvalResult<T = Value> = Result<T, Raised>;

/// Nesting allowed for recursive value operations such as `repr` and `==`.
const NESTING_LIMIT: usize = 400;

/// Largest sequence a single operation may materialize.
pub(crate) const MAX_SEQUENCE: usize = 1 << 27;

/// Where names are resolved and bound.
pub(crate) enum Env {
    /// Top level of the chunk: the session scope.
    Module,
    /// Inside a function call or comprehension.
    Local(Arc<Frame>),
    /// Inside a class body.
    Class {
        namespace: RefCell<HashMap<String, Value>>,
        outer: Option<Arc<Frame>>,
    },
}

impl Env {
    /// Innermost function frame visible from this environment.
    fn frame(&self) -> Option<&Arc<Frame>> {
        match self {
            Env::Module => None,
            Env::Local(frame) => Some(frame),
            Env::Class { outer, .. } => outer.as_ref(),
        }
    }
}

/// How a statement finished.
pub(crate) enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Lazy iteration state for `for` loops and comprehensions.
pub(crate) enum ValueIter {
    Items(std::vec::IntoIter<Value>),
    Range { next: i64, remaining: i64, step: i64 },
    Protocol(Value),
}

/// Evaluated bounds of `a[lower:upper:step]`.
pub(crate) struct SliceBounds {
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
}

pub struct Interpreter<'a> {
    globals: &'a mut Scope,
    max_depth: usize,
    depth: usize,
    nesting: usize,
    repr_guard: Vec<usize>,
    handling: Vec<Value>,
    output: String,
}

fn type_error(message: impl Into<String>) -> Raised {
    Raised::new(ExcKind::TypeError, message)
}

fn value_error(message: impl Into<String>) -> Raised {
    Raised::new(ExcKind::ValueError, message)
}

fn attribute_error(obj: &Value, name: &str) -> Raised {
    Raised::new(
        ExcKind::AttributeError,
        format!("'{}' object has no attribute '{}'", obj.type_name(), name),
    )
}

fn zero_division(message: &str) -> Raised {
    Raised::new(ExcKind::ZeroDivisionError, message)
}

/// Normalize a possibly negative index against `len`.
pub(crate) fn seq_index(index: &Value, len: usize, kind: &str) -> EvalResult<usize> {
    if let Value::LongInt(_) = index {
        return Err(Raised::new(
            ExcKind::IndexError,
            "cannot fit 'int' into an index-sized integer",
        ));
    }
    let i = index.as_int().ok_or_else(|| {
        type_error(format!(
            "{} indices must be integers or slices, not {}",
            kind,
            index.type_name()
        ))
    })?;
    let len = len as i64;
    let adjusted = if i < 0 { i + len } else { i };
    if adjusted < 0 || adjusted >= len {
        let kind = if kind == "str" { "string" } else { kind };
        return Err(Raised::new(
            ExcKind::IndexError,
            format!("{} index out of range", kind),
        ));
    }
    Ok(adjusted as usize)
}

/// Indices selected by a slice over a sequence of `len` items.
pub(crate) fn slice_indices(len: usize, bounds: &SliceBounds) -> EvalResult<Vec<usize>> {
    let (start, stop, step) = slice_range(len, bounds)?;
    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(i as usize);
        i += step;
    }
    Ok(out)
}

fn slice_range(len: usize, bounds: &SliceBounds) -> EvalResult<(i64, i64, i64)> {
    let len = len as i64;
    let step = bounds.step.unwrap_or(1);
    if step == 0 {
        return Err(value_error("slice step cannot be zero"));
    }
    let clamp = |value: i64, low: i64, high: i64| {
        let value = if value < 0 { value + len } else { value };
        value.clamp(low, high)
    };
    let (start, stop) = if step > 0 {
        (
            bounds.lower.map_or(0, |v| clamp(v, 0, len)),
            bounds.upper.map_or(len, |v| clamp(v, 0, len)),
        )
    } else {
        (
            bounds.lower.map_or(len - 1, |v| clamp(v, -1, len - 1)),
            bounds.upper.map_or(-1, |v| clamp(v, -1, len - 1)),
        )
    };
    Ok((start, stop, step))
}

fn repeat_count(len: usize, times: i64) -> EvalResult<usize> {
    if times <= 0 || len == 0 {
        return Ok(0);
    }
    let total = len.saturating_mul(times as usize);
    if total > MAX_SEQUENCE {
        return Err(Raised::new(ExcKind::MemoryError, "repeated sequence is too long"));
    }
    Ok(times as usize)
}

pub(crate) fn repeat_items(items: &[Value], times: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len() * times);
    for _ in 0..times {
        out.extend_from_slice(items);
    }
    out
}

fn floor_div(a: i64, b: i64) -> EvalResult<i64> {
    if b == 0 {
        return Err(zero_division("integer division or modulo by zero"));
    }
    let q = a.wrapping_div(b);
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

fn floor_mod(a: i64, b: i64) -> EvalResult<i64> {
    if b == 0 {
        return Err(zero_division("integer division or modulo by zero"));
    }
    let r = a.checked_rem(b).unwrap_or(0);
    if r != 0 && ((r < 0) != (b < 0)) {
        Ok(r + b)
    } else {
        Ok(r)
    }
}

fn is_number(value: &Value) -> bool {
    matches!(
        value,
        Value::Int(_) | Value::Bool(_) | Value::LongInt(_) | Value::Float(_)
    )
}

/// A numeric operand converted for float arithmetic.
fn float_operand(value: &Value) -> EvalResult<f64> {
    match value {
        Value::LongInt(n) => long_int::to_f64(n),
        other => Ok(other.as_float().unwrap_or(0.0)),
    }
}

fn float_mod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
        r + b
    } else {
        r
    }
}

pub(crate) fn int_pow(base: i64, exp: i64) -> EvalResult {
    if exp < 0 {
        if base == 0 {
            return Err(zero_division("0.0 cannot be raised to a negative power"));
        }
        return Ok(Value::Float((base as f64).powf(exp as f64)));
    }
    match base {
        0 | 1 => return Ok(Value::Int(if exp == 0 { 1 } else { base })),
        -1 => return Ok(Value::Int(if exp % 2 == 0 { 1 } else { -1 })),
        _ => {}
    }
    match u32::try_from(exp).ok().and_then(|e| base.checked_pow(e)) {
        Some(value) => Ok(Value::Int(value)),
        None => long_int::pow(&base.into(), &exp.into()),
    }
}

pub(crate) fn float_pow(base: f64, exp: f64) -> EvalResult {
    if base == 0.0 && exp < 0.0 {
        return Err(zero_division("0.0 cannot be raised to a negative power"));
    }
    if base < 0.0 && exp.fract() != 0.0 && exp.is_finite() {
        return Err(value_error("math domain error"));
    }
    let result = base.powf(exp);
    if result.is_infinite() && base.is_finite() && exp.is_finite() {
        return Err(Raised::new(
            ExcKind::OverflowError,
            "(34, 'Numerical result out of range')",
        ));
    }
    Ok(Value::Float(result))
}

impl<'a> Interpreter<'a> {
    pub fn new(globals: &'a mut Scope, max_depth: usize) -> Self {
        Self {
            globals,
            max_depth,
            depth: 0,
            nesting: 0,
            repr_guard: Vec::new(),
            handling: Vec::new(),
            output: String::new(),
        }
    }

    /// Execute top-level statements against the module scope.
    pub fn run(&mut self, stmts: &[Stmt]) -> EvalResult<()> {
        self.exec_block(stmts, &Env::Module).map(|_| ())
    }

    /// Evaluate an expression statement at module level and return its value.
    pub fn eval_statement_value(&mut self, stmt: &Stmt) -> EvalResult {
        let result = match &stmt.kind {
            StmtKind::Expr(expr) => self.eval(expr, &Env::Module),
            _ => {
                self.exec_stmt(stmt, &Env::Module)?;
                Ok(Value::None)
            }
        };
        result.map_err(|mut raised| {
            raised.line.get_or_insert(stmt.line);
            raised
        })
    }

    /// Text written by `print` so far.
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    pub(crate) fn write_output(&mut self, text: &str) {
        self.output.push_str(text);
    }

    /// Turn an uncaught exception into the error reported to the caller.
    pub fn describe_error(&mut self, raised: Raised) -> EvalError {
        let message = self
            .exception_str(&raised.exc)
            .unwrap_or_else(|_| raised.exc.plain_repr());
        EvalError {
            kind: raised.class_name(),
            message,
            line: raised.line,
            output: self.output.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn exec_block(&mut self, body: &[Stmt], env: &Env) -> EvalResult<Flow> {
        for stmt in body {
            match self.exec_stmt(stmt, env) {
                Ok(Flow::Normal) => {}
                Ok(flow) => return Ok(flow),
                Err(mut raised) => {
                    raised.line.get_or_insert(stmt.line);
                    return Err(raised);
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, env: &Env) -> EvalResult<Flow> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr, env)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value, env)?;
                for target in targets {
                    self.assign(target, value.clone(), env)?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value, env)?,
            StmtKind::Pass | StmtKind::Global(_) | StmtKind::Nonlocal(_) => {}
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, env)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.delete(target, env)?;
                }
            }
            StmtKind::If { test, body, orelse } => {
                let test = self.eval(test, env)?;
                return if self.truthy(&test)? {
                    self.exec_block(body, env)
                } else {
                    self.exec_block(orelse, env)
                };
            }
            StmtKind::While { test, body, orelse } => {
                loop {
                    let value = self.eval(test, env)?;
                    if !self.truthy(&value)? {
                        break;
                    }
                    match self.exec_block(body, env)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                return self.exec_block(orelse, env);
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(iter, env)?;
                let mut items = self.iter_of(&iterable)?;
                while let Some(item) = self.next_item(&mut items)? {
                    self.assign(target, item, env)?;
                    match self.exec_block(body, env)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                return self.exec_block(orelse, env);
            }
            StmtKind::FunctionDef { def, decorators } => {
                let decorators = self.eval_all(decorators, env)?;
                let func = Value::Function(self.make_function(def, env)?);
                let value = self.decorate(decorators, func)?;
                self.store(&def.name, value, env)?;
            }
            StmtKind::ClassDef {
                name,
                bases,
                body,
                decorators,
            } => {
                let decorators = self.eval_all(decorators, env)?;
                let class = self.make_class(name, bases, body, env)?;
                let value = self.decorate(decorators, class)?;
                self.store(name, value, env)?;
            }
            StmtKind::Raise(exc) => {
                let exc = match exc {
                    Some(expr) => {
                        let value = self.eval(expr, env)?;
                        self.make_exception(value)?
                    }
                    None => self.handling.last().cloned().ok_or_else(|| {
                        Raised::new(ExcKind::RuntimeError, "No active exception to reraise")
                    })?,
                };
                return Err(Raised::from_value(exc));
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => return self.exec_try(body, handlers, orelse, finalbody, env),
            StmtKind::Assert { test, msg } => {
                let value = self.eval(test, env)?;
                if !self.truthy(&value)? {
                    let args = match msg {
                        Some(expr) => vec![self.eval(expr, env)?],
                        None => Vec::new(),
                    };
                    return Err(Raised::with_args(ExcKind::AssertionError, args));
                }
            }
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    let module = builtins::import_module(&alias.name).ok_or_else(|| {
                        Raised::new(
                            ExcKind::ModuleNotFoundError,
                            format!("No module named '{}'", alias.name),
                        )
                    })?;
                    self.store(alias.bound_name(), module, env)?;
                }
            }
            StmtKind::ImportFrom { module, names } => {
                let module_value = builtins::import_module(module).ok_or_else(|| {
                    Raised::new(
                        ExcKind::ModuleNotFoundError,
                        format!("No module named '{}'", module),
                    )
                })?;
                for alias in names {
                    let value = self.get_attr(&module_value, &alias.name).map_err(|_| {
                        Raised::new(
                            ExcKind::ImportError,
                            format!("cannot import name '{}' from '{}'", alias.name, module),
                        )
                    })?;
                    self.store(alias.bound_name(), value, env)?;
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
        env: &Env,
    ) -> EvalResult<Flow> {
        let result = match self.exec_block(body, env) {
            Ok(Flow::Normal) => self.exec_block(orelse, env),
            Ok(flow) => Ok(flow),
            Err(raised) => self.handle_exception(raised, handlers, env),
        };
        if finalbody.is_empty() {
            return result;
        }
        match self.exec_block(finalbody, env)? {
            Flow::Normal => result,
            flow => Ok(flow),
        }
    }

    fn handle_exception(
        &mut self,
        raised: Raised,
        handlers: &[ExceptHandler],
        env: &Env,
    ) -> EvalResult<Flow> {
        for handler in handlers {
            let matched = match &handler.typ {
                None => true,
                Some(expr) => {
                    let typ = self.eval(expr, env)?;
                    self.exception_matches(&raised.exc, &typ)?
                }
            };
            if !matched {
                continue;
            }
            if let Some(name) = &handler.name {
                self.store(name, raised.exc.clone(), env)?;
            }
            self.handling.push(raised.exc.clone());
            let result = self.exec_block(&handler.body, env);
            self.handling.pop();
            if let Some(name) = &handler.name {
                let _ = self.unbind(name, env);
            }
            return result;
        }
        Err(raised)
    }

    fn exception_matches(&mut self, exc: &Value, typ: &Value) -> EvalResult<bool> {
        match typ {
            Value::Class(class) if is_exception_class(class) => Ok(match exc {
                Value::Instance(inst) => inst.class.is_subclass_of(class),
                _ => false,
            }),
            Value::Tuple(items) => {
                for item in items.iter() {
                    if self.exception_matches(exc, item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => Err(type_error(
                "catching classes that do not inherit from BaseException is not allowed",
            )),
        }
    }

    fn make_exception(&mut self, value: Value) -> EvalResult {
        match &value {
            Value::Class(class) if is_exception_class(class) => {
                self.instantiate(class, Vec::new(), Vec::new())
            }
            Value::Instance(inst) if is_exception_class(&inst.class) => Ok(value),
            _ => Err(type_error("exceptions must derive from BaseException")),
        }
    }

    fn eval_all(&mut self, exprs: &[Expr], env: &Env) -> EvalResult<Vec<Value>> {
        exprs.iter().map(|expr| self.eval(expr, env)).collect()
    }

    fn decorate(&mut self, decorators: Vec<Value>, mut value: Value) -> EvalResult {
        for decorator in decorators.iter().rev() {
            value = self.call(decorator, vec![value], Vec::new())?;
        }
        Ok(value)
    }

    fn make_function(&mut self, def: &Arc<FunctionDef>, env: &Env) -> EvalResult<Arc<Function>> {
        let mut defaults = Vec::with_capacity(def.params.positional.len());
        for param in &def.params.positional {
            defaults.push(match &param.default {
                Some(expr) => Some(self.eval(expr, env)?),
                None => None,
            });
        }
        let mut kw_defaults = HashMap::new();
        for param in &def.params.kwonly {
            if let Some(expr) = &param.default {
                kw_defaults.insert(param.name.clone(), self.eval(expr, env)?);
            }
        }
        Ok(Arc::new(Function {
            def: Arc::clone(def),
            defaults,
            kw_defaults,
            closure: env.frame().cloned(),
            owner: Default::default(),
        }))
    }

    fn make_class(
        &mut self,
        name: &str,
        base_exprs: &[Expr],
        body: &[Stmt],
        env: &Env,
    ) -> EvalResult {
        let mut bases = Vec::new();
        for expr in base_exprs {
            match self.eval(expr, env)? {
                Value::Class(class) => bases.push(class),
                Value::Builtin(Builtin::Type(BuiltinType::Object)) => {}
                Value::Builtin(Builtin::Type(t)) => {
                    return Err(type_error(format!(
                        "subclassing built-in type '{}' is not supported",
                        t.name()
                    )))
                }
                other => {
                    return Err(type_error(format!(
                        "bases must be types, not '{}'",
                        other.type_name()
                    )))
                }
            }
        }

        let class_env = Env::Class {
            namespace: RefCell::new(HashMap::new()),
            outer: env.frame().cloned(),
        };
        self.exec_block(body, &class_env)?;
        let attrs = match class_env {
            Env::Class { namespace, .. } => namespace.into_inner(),
            _ => HashMap::new(),
        };

        let class = Arc::new(Class::new(name, bases, attrs).map_err(type_error)?);
        let methods: Vec<Arc<Function>> = class
            .attrs
            .lock()
            .values()
            .flat_map(|value| match value {
                Value::Function(f) => vec![Arc::clone(f)],
                Value::StaticMethod(inner) | Value::ClassMethod(inner) => match &**inner {
                    Value::Function(f) => vec![Arc::clone(f)],
                    _ => Vec::new(),
                },
                Value::Property(p) => [Some(&p.getter), p.setter.as_ref()]
                    .into_iter()
                    .flatten()
                    .filter_map(|v| match v {
                        Value::Function(f) => Some(Arc::clone(f)),
                        _ => None,
                    })
                    .collect(),
                _ => Vec::new(),
            })
            .collect();
        for method in methods {
            let _ = method.owner.set(Arc::downgrade(&class));
        }
        Ok(Value::Class(class))
    }

    // ------------------------------------------------------------------
    // Names
    // ------------------------------------------------------------------

    fn load(&self, name: &str, env: &Env) -> EvalResult {
        match env {
            Env::Module => self.load_global(name),
            Env::Local(frame) => self.load_from_frame(frame, name),
            Env::Class { namespace, outer } => {
                let found = namespace.borrow().get(name).cloned();
                match (found, outer) {
                    (Some(value), _) => Ok(value),
                    (None, Some(frame)) => self.load_from_frame(frame, name),
                    (None, None) => self.load_global(name),
                }
            }
        }
    }

    fn load_global(&self, name: &str) -> EvalResult {
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        builtins::lookup(name).ok_or_else(|| {
            Raised::new(
                ExcKind::NameError,
                format!("name '{}' is not defined", name),
            )
        })
    }

    fn load_from_frame(&self, frame: &Arc<Frame>, name: &str) -> EvalResult {
        if frame.info.globals.contains(name) {
            return self.load_global(name);
        }
        if frame.info.is_local(name) {
            return frame.get(name).ok_or_else(|| {
                Raised::new(
                    ExcKind::UnboundLocalError,
                    format!(
                        "cannot access local variable '{}' where it is not associated with a value",
                        name
                    ),
                )
            });
        }
        let mut parent = frame.parent.clone();
        while let Some(current) = parent {
            if current.info.globals.contains(name) {
                break;
            }
            if current.info.is_local(name) {
                return current.get(name).ok_or_else(|| {
                    Raised::new(
                        ExcKind::NameError,
                        format!(
                            "cannot access free variable '{}' where it is not associated with a value in enclosing scope",
                            name
                        ),
                    )
                });
            }
            parent = current.parent.clone();
        }
        self.load_global(name)
    }

    fn store(&mut self, name: &str, value: Value, env: &Env) -> EvalResult<()> {
        match env {
            Env::Module => {
                self.globals.insert(name, value);
            }
            Env::Local(frame) => {
                if frame.info.globals.contains(name) {
                    self.globals.insert(name, value);
                } else if frame.info.nonlocals.contains(name) {
                    let target = frame
                        .parent
                        .as_ref()
                        .and_then(|parent| parent.defining(name))
                        .ok_or_else(|| {
                            Raised::new(
                                ExcKind::NameError,
                                format!("no binding for nonlocal '{}' found", name),
                            )
                        })?;
                    target.set(name, value);
                } else {
                    frame.set(name, value);
                }
            }
            Env::Class { namespace, .. } => {
                namespace.borrow_mut().insert(name.to_string(), value);
            }
        }
        Ok(())
    }

    fn unbind(&mut self, name: &str, env: &Env) -> EvalResult<()> {
        let removed = match env {
            Env::Module => self.globals.remove(name),
            Env::Local(frame) => {
                if frame.info.globals.contains(name) {
                    self.globals.remove(name)
                } else if frame.info.nonlocals.contains(name) {
                    frame
                        .parent
                        .as_ref()
                        .and_then(|parent| parent.defining(name))
                        .and_then(|target| target.remove(name))
                } else {
                    frame.remove(name)
                }
            }
            Env::Class { namespace, .. } => namespace.borrow_mut().remove(name),
        };
        removed.map(|_| ()).ok_or_else(|| {
            Raised::new(
                ExcKind::NameError,
                format!("name '{}' is not defined", name),
            )
        })
    }

    // ------------------------------------------------------------------
    // Assignment targets
    // ------------------------------------------------------------------

    fn assign(&mut self, target: &Expr, value: Value, env: &Env) -> EvalResult<()> {
        match target {
            Expr::Name(name) => self.store(name, value, env),
            Expr::Attribute { value: obj, attr } => {
                let obj = self.eval(obj, env)?;
                self.set_attr(&obj, attr, value)
            }
            Expr::Subscript { value: obj, index } => {
                let obj = self.eval(obj, env)?;
                if let Expr::Slice { .. } = &**index {
                    let bounds = self.slice_bounds(index, env)?;
                    self.set_slice(&obj, &bounds, value)
                } else {
                    let index = self.eval(index, env)?;
                    self.set_item(&obj, &index, value)
                }
            }
            Expr::Tuple(targets) | Expr::List(targets) => self.unpack(targets, value, env),
            Expr::Starred(inner) => self.assign(inner, value, env),
            _ => Err(type_error("cannot assign to expression")),
        }
    }

    fn unpack(&mut self, targets: &[Expr], value: Value, env: &Env) -> EvalResult<()> {
        let mut items = self.iterate(&value)?;
        let star = targets.iter().position(|t| matches!(t, Expr::Starred(_)));

        let Some(star) = star else {
            if items.len() != targets.len() {
                let message = if items.len() > targets.len() {
                    format!("too many values to unpack (expected {})", targets.len())
                } else {
                    format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    )
                };
                return Err(value_error(message));
            }
            for (target, item) in targets.iter().zip(items) {
                self.assign(target, item, env)?;
            }
            return Ok(());
        };

        let after = targets.len() - star - 1;
        if items.len() < star + after {
            return Err(value_error(format!(
                "not enough values to unpack (expected at least {}, got {})",
                star + after,
                items.len()
            )));
        }
        let tail = items.split_off(items.len() - after);
        let middle = items.split_off(star);
        for (target, item) in targets[..star].iter().zip(items) {
            self.assign(target, item, env)?;
        }
        self.assign(&targets[star], Value::list(middle), env)?;
        for (target, item) in targets[star + 1..].iter().zip(tail) {
            self.assign(target, item, env)?;
        }
        Ok(())
    }

    fn aug_assign(&mut self, target: &Expr, op: BinOp, value: &Expr, env: &Env) -> EvalResult<()> {
        match target {
            Expr::Name(name) => {
                let current = self.load(name, env)?;
                let rhs = self.eval(value, env)?;
                let result = self.inplace_op(op, &current, &rhs)?;
                self.store(name, result, env)
            }
            Expr::Attribute { value: obj, attr } => {
                let obj = self.eval(obj, env)?;
                let current = self.get_attr(&obj, attr)?;
                let rhs = self.eval(value, env)?;
                let result = self.inplace_op(op, &current, &rhs)?;
                self.set_attr(&obj, attr, result)
            }
            Expr::Subscript { value: obj, index } => {
                let obj = self.eval(obj, env)?;
                let index = self.eval(index, env)?;
                let current = self.get_item(&obj, &index)?;
                let rhs = self.eval(value, env)?;
                let result = self.inplace_op(op, &current, &rhs)?;
                self.set_item(&obj, &index, result)
            }
            _ => Err(type_error("illegal expression for augmented assignment")),
        }
    }

    fn inplace_op(&mut self, op: BinOp, current: &Value, rhs: &Value) -> EvalResult {
        if let Value::Instance(_) = current {
            let name = format!("__i{}", &op.dunder()[2..]);
            if let Some(result) = self.call_dunder(current, &name, vec![rhs.clone()])? {
                if !matches!(result, Value::NotImplemented) {
                    return Ok(result);
                }
            }
        }
        match (op, current) {
            (BinOp::Add, Value::List(list)) => {
                let items = self.iterate(rhs)?;
                list.lock().extend(items);
                Ok(current.clone())
            }
            (BinOp::BitOr, Value::Set(set)) if matches!(rhs, Value::Set(_)) => {
                let other = self.set_members(rhs)?;
                let mut set = set.lock();
                for (key, value) in other {
                    set.entry(key).or_insert(value);
                }
                drop(set);
                Ok(current.clone())
            }
            (BinOp::BitOr, Value::Dict(dict)) if matches!(rhs, Value::Dict(_)) => {
                if let Value::Dict(other) = rhs {
                    let other = other.snapshot();
                    let mut dict = dict.lock();
                    for (key, pair) in other {
                        dict.insert(key, pair);
                    }
                }
                Ok(current.clone())
            }
            _ => self.binary_op(op, current, rhs),
        }
    }

    fn delete(&mut self, target: &Expr, env: &Env) -> EvalResult<()> {
        match target {
            Expr::Name(name) => self.unbind(name, env),
            Expr::Attribute { value, attr } => {
                let obj = self.eval(value, env)?;
                self.del_attr(&obj, attr)
            }
            Expr::Subscript { value, index } => {
                let obj = self.eval(value, env)?;
                if let Expr::Slice { .. } = &**index {
                    let bounds = self.slice_bounds(index, env)?;
                    match &obj {
                        Value::List(list) => {
                            let len = list.lock().len();
                            let mut indices = slice_indices(len, &bounds)?;
                            indices.sort_unstable();
                            let mut list = list.lock();
                            for i in indices.into_iter().rev() {
                                if i < list.len() {
                                    list.remove(i);
                                }
                            }
                            Ok(())
                        }
                        other => Err(type_error(format!(
                            "'{}' object does not support item deletion",
                            other.type_name()
                        ))),
                    }
                } else {
                    let index = self.eval(index, env)?;
                    self.del_item(&obj, &index)
                }
            }
            Expr::Tuple(items) | Expr::List(items) => {
                for item in items {
                    self.delete(item, env)?;
                }
                Ok(())
            }
            _ => Err(type_error("cannot delete expression")),
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub(crate) fn eval(&mut self, expr: &Expr, env: &Env) -> EvalResult {
        match expr {
            Expr::Constant(constant) => Ok(match constant {
                Constant::None => Value::None,
                Constant::Bool(b) => Value::Bool(*b),
                Constant::Int(i) => Value::Int(*i),
                Constant::LongInt(n) => Value::LongInt(Arc::clone(n)),
                Constant::Float(f) => Value::Float(*f),
                Constant::Str(s) => Value::Str(Arc::clone(s)),
                Constant::Ellipsis => Value::Ellipsis,
            }),
            Expr::FString(parts) => self.render_fstring(parts, env).map(Value::str),
            Expr::Name(name) => self.load(name, env),
            Expr::List(items) => Ok(Value::list(self.eval_elements(items, env)?)),
            Expr::Tuple(items) => Ok(Value::tuple(self.eval_elements(items, env)?)),
            Expr::Set(items) => {
                let items = self.eval_elements(items, env)?;
                let mut set = SetMap::new();
                for item in items {
                    let key = self.hash_key(&item)?;
                    set.entry(key).or_insert(item);
                }
                Ok(Value::set(set))
            }
            Expr::Dict(items) => {
                let mut dict = DictMap::new();
                for item in items {
                    match item {
                        DictItem::Pair(key, value) => {
                            let key = self.eval(key, env)?;
                            let value = self.eval(value, env)?;
                            self.dict_insert(&mut dict, key, value)?;
                        }
                        DictItem::Spread(expr) => match self.eval(expr, env)? {
                            Value::Dict(other) => {
                                for (hash, pair) in other.snapshot() {
                                    dict.insert(hash, pair);
                                }
                            }
                            other => {
                                return Err(type_error(format!(
                                    "'{}' object is not a mapping",
                                    other.type_name()
                                )))
                            }
                        },
                    }
                }
                Ok(Value::dict(dict))
            }
            Expr::Starred(_) => Err(type_error("can't use starred expression here")),
            Expr::BinOp { left, op, right } => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                self.binary_op(*op, &left, &right)
            }
            Expr::UnaryOp { op, operand } => {
                let operand = self.eval(operand, env)?;
                self.unary_op(*op, &operand)
            }
            Expr::BoolOp { op, values } => {
                let mut result = Value::None;
                for (i, expr) in values.iter().enumerate() {
                    result = self.eval(expr, env)?;
                    if i + 1 == values.len() {
                        break;
                    }
                    let truthy = self.truthy(&result)?;
                    match op {
                        BoolOp::And if !truthy => break,
                        BoolOp::Or if truthy => break,
                        _ => {}
                    }
                }
                Ok(result)
            }
            Expr::Compare {
                left,
                ops,
                comparators,
            } => {
                let mut left = self.eval(left, env)?;
                for (op, right) in ops.iter().zip(comparators) {
                    let right = self.eval(right, env)?;
                    if !self.compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfExp { test, body, orelse } => {
                let test = self.eval(test, env)?;
                if self.truthy(&test)? {
                    self.eval(body, env)
                } else {
                    self.eval(orelse, env)
                }
            }
            Expr::Lambda(def) => Ok(Value::Function(self.make_function(def, env)?)),
            Expr::Call { func, args } => {
                let callee = self.eval(func, env)?;
                if args.is_empty()
                    && matches!(callee, Value::Builtin(Builtin::Type(BuiltinType::Super)))
                {
                    return self.zero_arg_super(env);
                }
                let (positional, keywords) = self.eval_args(args, env)?;
                self.call(&callee, positional, keywords)
            }
            Expr::Attribute { value, attr } => {
                let value = self.eval(value, env)?;
                self.get_attr(&value, attr)
            }
            Expr::Subscript { value, index } => {
                let value = self.eval(value, env)?;
                if let Expr::Slice { .. } = &**index {
                    let bounds = self.slice_bounds(index, env)?;
                    self.get_slice(&value, &bounds)
                } else {
                    let index = self.eval(index, env)?;
                    self.get_item(&value, &index)
                }
            }
            Expr::Slice { .. } => Err(type_error("slices are only supported inside subscripts")),
            Expr::ListComp { elt, generators } => {
                let mut out = Vec::new();
                self.comprehension(generators, env, &mut |interp, inner| {
                    out.push(interp.eval(elt, inner)?);
                    Ok(())
                })?;
                Ok(Value::list(out))
            }
            Expr::SetComp { elt, generators } => {
                let mut out = SetMap::new();
                self.comprehension(generators, env, &mut |interp, inner| {
                    let item = interp.eval(elt, inner)?;
                    let key = interp.hash_key(&item)?;
                    out.entry(key).or_insert(item);
                    Ok(())
                })?;
                Ok(Value::set(out))
            }
            Expr::DictComp {
                key,
                value,
                generators,
            } => {
                let mut out = DictMap::new();
                self.comprehension(generators, env, &mut |interp, inner| {
                    let k = interp.eval(key, inner)?;
                    let v = interp.eval(value, inner)?;
                    interp.dict_insert(&mut out, k, v)
                })?;
                Ok(Value::dict(out))
            }
        }
    }

    /// Text of an f-string. A format spec may itself hold replacement fields.
    fn render_fstring(&mut self, parts: &[FStringPart], env: &Env) -> EvalResult<String> {
        let mut out = String::new();
        for part in parts {
            match part {
                FStringPart::Literal(text) => out.push_str(text),
                FStringPart::Value {
                    expr,
                    conversion,
                    spec,
                } => {
                    let value = self.eval(expr, env)?;
                    let value = match conversion {
                        Some('r' | 'a') => Value::str(self.repr(&value)?),
                        Some(_) => Value::str(self.str_of(&value)?),
                        None => value,
                    };
                    let spec = self.render_fstring(spec, env)?;
                    out.push_str(&self.format_value(&value, &spec)?);
                }
            }
        }
        Ok(out)
    }

    fn eval_elements(&mut self, items: &[Expr], env: &Env) -> EvalResult<Vec<Value>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            if let Expr::Starred(inner) = item {
                let value = self.eval(inner, env)?;
                out.extend(self.iterate(&value)?);
            } else {
                out.push(self.eval(item, env)?);
            }
        }
        Ok(out)
    }

    fn eval_args(
        &mut self,
        args: &[Arg],
        env: &Env,
    ) -> EvalResult<(Vec<Value>, Vec<(String, Value)>)> {
        let mut positional = Vec::with_capacity(args.len());
        let mut keywords: Vec<(String, Value)> = Vec::new();
        let push_keyword = |keywords: &mut Vec<(String, Value)>, name: String, value| {
            if keywords.iter().any(|(k, _)| *k == name) {
                return Err(type_error(format!(
                    "got multiple values for keyword argument '{}'",
                    name
                )));
            }
            keywords.push((name, value));
            Ok(())
        };

        for arg in args {
            match arg {
                Arg::Positional(expr) => positional.push(self.eval(expr, env)?),
                Arg::Star(expr) => {
                    let value = self.eval(expr, env)?;
                    positional.extend(self.iterate(&value)?);
                }
                Arg::Keyword(name, expr) => {
                    let value = self.eval(expr, env)?;
                    push_keyword(&mut keywords, name.clone(), value)?;
                }
                Arg::DoubleStar(expr) => match self.eval(expr, env)? {
                    Value::Dict(dict) => {
                        for (key, value) in dict.snapshot().into_values() {
                            let Value::Str(name) = key else {
                                return Err(type_error("keywords must be strings"));
                            };
                            push_keyword(&mut keywords, name.to_string(), value)?;
                        }
                    }
                    other => {
                        return Err(type_error(format!(
                            "argument after ** must be a mapping, not {}",
                            other.type_name()
                        )))
                    }
                },
            }
        }
        Ok((positional, keywords))
    }

    fn slice_bounds(&mut self, expr: &Expr, env: &Env) -> EvalResult<SliceBounds> {
        let Expr::Slice { lower, upper, step } = expr else {
            return Err(type_error("expected a slice"));
        };
        let bound = |interp: &mut Self, expr: &Option<Box<Expr>>| -> EvalResult<Option<i64>> {
            let Some(expr) = expr else { return Ok(None) };
            match interp.eval(expr, env)? {
                Value::None => Ok(None),
                value => value.as_int().map(Some).ok_or_else(|| {
                    type_error(
                        "slice indices must be integers or None or have an __index__ method",
                    )
                }),
            }
        };
        Ok(SliceBounds {
            lower: bound(self, lower)?,
            upper: bound(self, upper)?,
            step: bound(self, step)?,
        })
    }

    fn comprehension(
        &mut self,
        generators: &[Comprehension],
        env: &Env,
        emit: &mut dyn FnMut(&mut Self, &Env) -> EvalResult<()>,
    ) -> EvalResult<()> {
        let Some(first) = generators.first() else {
            return Ok(());
        };
        let first_iterable = self.eval(&first.iter, env)?;
        let info = Arc::new(ScopeInfo::for_targets(
            generators.iter().map(|generator| &generator.target),
        ));
        let frame = Frame::new(HashMap::new(), info, env.frame().cloned(), None);
        let inner = Env::Local(Arc::new(frame));
        self.comprehension_level(generators, 0, Some(first_iterable), &inner, emit)
    }

    fn comprehension_level(
        &mut self,
        generators: &[Comprehension],
        level: usize,
        iterable: Option<Value>,
        env: &Env,
        emit: &mut dyn FnMut(&mut Self, &Env) -> EvalResult<()>,
    ) -> EvalResult<()> {
        let Some(generator) = generators.get(level) else {
            return emit(self, env);
        };
        let iterable = match iterable {
            Some(value) => value,
            None => self.eval(&generator.iter, env)?,
        };
        let mut items = self.iter_of(&iterable)?;
        'items: while let Some(item) = self.next_item(&mut items)? {
            self.assign(&generator.target, item, env)?;
            for condition in &generator.ifs {
                let value = self.eval(condition, env)?;
                if !self.truthy(&value)? {
                    continue 'items;
                }
            }
            self.comprehension_level(generators, level + 1, None, env, emit)?;
        }
        Ok(())
    }

    fn zero_arg_super(&mut self, env: &Env) -> EvalResult {
        let no_args = || Raised::new(ExcKind::RuntimeError, "super(): no arguments");
        let mut frame = env.frame().cloned();
        while let Some(current) = frame {
            if let Some(func) = &current.function {
                if let Some(class) = func.owner() {
                    let first = func.def.params.positional.first().ok_or_else(no_args)?;
                    let receiver = current.get(&first.name).ok_or_else(no_args)?;
                    return Ok(Value::Super(Arc::new(SuperProxy { class, receiver })));
                }
            }
            frame = current.parent.clone();
        }
        Err(Raised::new(
            ExcKind::RuntimeError,
            "super(): __class__ cell not found",
        ))
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Call any callable value.
    pub(crate) fn call(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> EvalResult {
        match callee {
            Value::Function(func) => self.call_function(func, args, kwargs),
            Value::BoundMethod(method) => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(method.receiver.clone());
                full.extend(args);
                let func = method.func.clone();
                self.call(&func, full, kwargs)
            }
            Value::Builtin(builtin) => builtins::call(self, *builtin, args, kwargs),
            Value::NativeMethod(method) => {
                builtins::call_method(self, &method.receiver, &method.name, args, kwargs)
            }
            Value::Class(class) => self.instantiate(class, args, kwargs),
            Value::StaticMethod(inner) => {
                let inner = (**inner).clone();
                self.call(&inner, args, kwargs)
            }
            Value::Instance(inst) => match inst.class.lookup("__call__") {
                Some(method) => {
                    let bound = self.bind(callee, &inst.class, method);
                    self.call(&bound, args, kwargs)
                }
                None => Err(type_error(format!(
                    "'{}' object is not callable",
                    callee.type_name()
                ))),
            },
            other => Err(type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(
        &mut self,
        func: &Arc<Function>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> EvalResult {
        if self.depth >= self.max_depth {
            return Err(Raised::new(
                ExcKind::RecursionError,
                "maximum recursion depth exceeded",
            ));
        }
        let vars = self.bind_arguments(func, args, kwargs)?;
        let frame = Frame::new(
            vars,
            Arc::clone(&func.def.scope),
            func.closure.clone(),
            Some(Arc::clone(func)),
        );

        self.depth += 1;
        let result = self.exec_block(&func.def.body, &Env::Local(Arc::new(frame)));
        self.depth -= 1;

        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    fn bind_arguments(
        &mut self,
        func: &Function,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> EvalResult<HashMap<String, Value>> {
        let params = &func.def.params;
        let name = func.name();
        let mut vars = HashMap::new();
        let mut extra = Vec::new();
        let given = args.len();

        for (i, arg) in args.into_iter().enumerate() {
            match params.positional.get(i) {
                Some(param) => {
                    vars.insert(param.name.clone(), arg);
                }
                None if params.vararg.is_some() => extra.push(arg),
                None => {
                    return Err(type_error(format!(
                        "{}() takes {} positional argument{} but {} {} given",
                        name,
                        params.positional.len(),
                        if params.positional.len() == 1 { "" } else { "s" },
                        given,
                        if given == 1 { "was" } else { "were" }
                    )))
                }
            }
        }
        if let Some(vararg) = &params.vararg {
            vars.insert(vararg.clone(), Value::tuple(extra));
        }

        let mut extra_kwargs = DictMap::new();
        for (key, value) in kwargs {
            let is_param = params.positional.iter().any(|p| p.name == key)
                || params.kwonly.iter().any(|p| p.name == key);
            if is_param {
                if vars.contains_key(&key) {
                    return Err(type_error(format!(
                        "{}() got multiple values for argument '{}'",
                        name, key
                    )));
                }
                vars.insert(key, value);
            } else if params.kwarg.is_some() {
                let key_value = Value::str(key.as_str());
                extra_kwargs.insert(HashKey::Str(key.into()), (key_value, value));
            } else {
                return Err(type_error(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    name, key
                )));
            }
        }
        if let Some(kwarg) = &params.kwarg {
            vars.insert(kwarg.clone(), Value::dict(extra_kwargs));
        }

        let mut missing = Vec::new();
        for (param, default) in params.positional.iter().zip(&func.defaults) {
            if vars.contains_key(&param.name) {
                continue;
            }
            match default {
                Some(value) => {
                    vars.insert(param.name.clone(), value.clone());
                }
                None => missing.push(format!("'{}'", param.name)),
            }
        }
        if !missing.is_empty() {
            return Err(type_error(format!(
                "{}() missing {} required positional argument{}: {}",
                name,
                missing.len(),
                if missing.len() == 1 { "" } else { "s" },
                missing.join(", ")
            )));
        }
        for param in &params.kwonly {
            if vars.contains_key(&param.name) {
                continue;
            }
            match func.kw_defaults.get(&param.name) {
                Some(value) => {
                    vars.insert(param.name.clone(), value.clone());
                }
                None => {
                    return Err(type_error(format!(
                        "{}() missing 1 required keyword-only argument: '{}'",
                        name, param.name
                    )))
                }
            }
        }
        Ok(vars)
    }

    pub(crate) fn instantiate(
        &mut self,
        class: &Arc<Class>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> EvalResult {
        let instance = Instance::new(Arc::clone(class));
        if is_exception_class(class) {
            instance
                .attrs
                .lock()
                .insert("args".to_string(), Value::tuple(args.clone()));
        }
        let value = Value::Instance(Arc::new(instance));

        match class.lookup("__init__") {
            Some(init) => {
                let bound = self.bind(&value, class, init);
                let result = self.call(&bound, args, kwargs)?;
                if !result.is_none() {
                    return Err(type_error(format!(
                        "__init__() should return None, not '{}'",
                        result.type_name()
                    )));
                }
            }
            None if !args.is_empty() || !kwargs.is_empty() => {
                return Err(type_error(format!("{}() takes no arguments", class.name)));
            }
            None => {}
        }
        Ok(value)
    }

    /// Bind a class attribute fetched through `receiver`.
    fn bind(&self, receiver: &Value, class: &Arc<Class>, attr: Value) -> Value {
        match attr {
            Value::Function(_)
            | Value::Builtin(Builtin::Function(BuiltinFunction::ExceptionInit)) => {
                Value::BoundMethod(Arc::new(BoundMethod {
                    receiver: receiver.clone(),
                    func: attr,
                }))
            }
            Value::StaticMethod(inner) => (*inner).clone(),
            Value::ClassMethod(inner) => Value::BoundMethod(Arc::new(BoundMethod {
                receiver: Value::Class(Arc::clone(class)),
                func: (*inner).clone(),
            })),
            other => other,
        }
    }

    /// Call `name` on an instance's class if it defines it.
    pub(crate) fn call_dunder(
        &mut self,
        obj: &Value,
        name: &str,
        args: Vec<Value>,
    ) -> EvalResult<Option<Value>> {
        let Value::Instance(inst) = obj else {
            return Ok(None);
        };
        let Some(method) = inst.class.lookup(name) else {
            return Ok(None);
        };
        let bound = self.bind(obj, &inst.class, method);
        self.call(&bound, args, Vec::new()).map(Some)
    }

    fn has_dunder(obj: &Value, name: &str) -> bool {
        match obj {
            Value::Instance(inst) => inst.class.lookup(name).is_some(),
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    pub(crate) fn get_attr(&mut self, obj: &Value, name: &str) -> EvalResult {
        match obj {
            Value::Instance(inst) => {
                if name == "__class__" {
                    return Ok(Value::Class(Arc::clone(&inst.class)));
                }
                if name == "__dict__" {
                    let attrs: Vec<(String, Value)> = inst
                        .attrs
                        .lock()
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    let mut dict = DictMap::new();
                    for (key, value) in attrs {
                        dict.insert(HashKey::Str(key.as_str().into()), (Value::str(key), value));
                    }
                    return Ok(Value::dict(dict));
                }
                let class_attr = inst.class.lookup(name);
                if let Some(Value::Property(property)) = &class_attr {
                    let getter = property.getter.clone();
                    return self.call(&getter, vec![obj.clone()], Vec::new());
                }
                let own = inst.attrs.lock().get(name).cloned();
                if let Some(value) = own {
                    return Ok(value);
                }
                if let Some(attr) = class_attr {
                    return Ok(self.bind(obj, &inst.class, attr));
                }
                if let Some(getattr) = inst.class.lookup("__getattr__") {
                    let bound = self.bind(obj, &inst.class, getattr);
                    return self.call(&bound, vec![Value::str(name)], Vec::new());
                }
                Err(attribute_error(obj, name))
            }
            Value::Class(class) => {
                match name {
                    "__name__" => return Ok(Value::str(class.name.as_str())),
                    "__bases__" => {
                        return Ok(Value::tuple(
                            class.bases.iter().cloned().map(Value::Class).collect(),
                        ))
                    }
                    "__mro__" => {
                        return Ok(Value::tuple(
                            class.linearization().into_iter().map(Value::Class).collect(),
                        ))
                    }
                    _ => {}
                }
                match class.lookup(name) {
                    Some(Value::StaticMethod(inner)) => Ok((*inner).clone()),
                    Some(Value::ClassMethod(inner)) => {
                        Ok(Value::BoundMethod(Arc::new(BoundMethod {
                            receiver: obj.clone(),
                            func: (*inner).clone(),
                        })))
                    }
                    Some(value) => Ok(value),
                    None => Err(Raised::new(
                        ExcKind::AttributeError,
                        format!("type object '{}' has no attribute '{}'", class.name, name),
                    )),
                }
            }
            Value::Super(proxy) => self.super_attr(proxy, name),
            Value::Module(module) => module.attrs.get(name).cloned().ok_or_else(|| {
                Raised::new(
                    ExcKind::AttributeError,
                    format!("module '{}' has no attribute '{}'", module.name, name),
                )
            }),
            Value::Function(func) if name == "__name__" => Ok(Value::str(func.name())),
            Value::Builtin(builtin) if name == "__name__" => Ok(Value::str(builtin.name())),
            Value::BoundMethod(method) => match name {
                "__self__" => Ok(method.receiver.clone()),
                "__func__" => Ok(method.func.clone()),
                _ => self.get_attr(&method.func.clone(), name),
            },
            Value::Property(property) if name == "fget" => Ok(property.getter.clone()),
            Value::Property(property) if name == "fset" => {
                Ok(property.setter.clone().unwrap_or(Value::None))
            }
            Value::Float(f) if name == "real" => Ok(Value::Float(*f)),
            Value::Float(_) if name == "imag" => Ok(Value::Float(0.0)),
            Value::Int(_) | Value::Bool(_) if name == "real" || name == "numerator" => {
                Ok(Value::Int(obj.as_int().unwrap_or(0)))
            }
            Value::LongInt(_) if name == "real" || name == "numerator" => Ok(obj.clone()),
            Value::Int(_) | Value::Bool(_) | Value::LongInt(_) if name == "imag" => Ok(Value::Int(0)),
            Value::Int(_) | Value::Bool(_) | Value::LongInt(_) if name == "denominator" => {
                Ok(Value::Int(1))
            }
            _ if builtins::has_method(obj, name) => {
                Ok(Value::NativeMethod(Arc::new(super::value::NativeMethod {
                    receiver: obj.clone(),
                    name: name.to_string(),
                })))
            }
            _ => Err(attribute_error(obj, name)),
        }
    }

    fn super_attr(&mut self, proxy: &SuperProxy, name: &str) -> EvalResult {
        let receiver_class = match &proxy.receiver {
            Value::Instance(inst) => Arc::clone(&inst.class),
            Value::Class(class) => Arc::clone(class),
            other => {
                return Err(type_error(format!(
                    "super() argument 2 must be an instance or subtype, not {}",
                    other.type_name()
                )))
            }
        };
        let linearization = receiver_class.linearization();
        let start = linearization
            .iter()
            .position(|class| Arc::ptr_eq(class, &proxy.class))
            .map_or(linearization.len(), |i| i + 1);

        for class in &linearization[start..] {
            let found = class.attrs.lock().get(name).cloned();
            let Some(attr) = found else { continue };
            return match attr {
                Value::Property(property) => {
                    let getter = property.getter.clone();
                    self.call(&getter, vec![proxy.receiver.clone()], Vec::new())
                }
                Value::ClassMethod(inner) => Ok(Value::BoundMethod(Arc::new(BoundMethod {
                    receiver: Value::Class(receiver_class),
                    func: (*inner).clone(),
                }))),
                attr if matches!(proxy.receiver, Value::Instance(_)) => {
                    Ok(self.bind(&proxy.receiver, class, attr))
                }
                Value::StaticMethod(inner) => Ok((*inner).clone()),
                attr => Ok(attr),
            };
        }
        if name == "__init__" {
            return Ok(Value::Builtin(Builtin::Type(BuiltinType::Object)));
        }
        Err(Raised::new(
            ExcKind::AttributeError,
            format!("'super' object has no attribute '{}'", name),
        ))
    }

    pub(crate) fn set_attr(&mut self, obj: &Value, name: &str, value: Value) -> EvalResult<()> {
        match obj {
            Value::Instance(inst) => {
                if let Some(Value::Property(property)) = inst.class.lookup(name) {
                    let setter = property.setter.clone().ok_or_else(|| {
                        Raised::new(
                            ExcKind::AttributeError,
                            format!(
                                "property '{}' of '{}' object has no setter",
                                name, inst.class.name
                            ),
                        )
                    })?;
                    self.call(&setter, vec![obj.clone(), value], Vec::new())?;
                    return Ok(());
                }
                inst.attrs.lock().insert(name.to_string(), value);
                Ok(())
            }
            Value::Class(class) => {
                class.attrs.lock().insert(name.to_string(), value);
                Ok(())
            }
            other => Err(attribute_error(other, name)),
        }
    }

    pub(crate) fn del_attr(&mut self, obj: &Value, name: &str) -> EvalResult<()> {
        let removed = match obj {
            Value::Instance(inst) => inst.attrs.lock().remove(name),
            Value::Class(class) => class.attrs.lock().remove(name),
            _ => None,
        };
        removed.map(|_| ()).ok_or_else(|| attribute_error(obj, name))
    }

    // ------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------

    pub(crate) fn get_item(&mut self, obj: &Value, index: &Value) -> EvalResult {
        match obj {
            Value::List(list) => {
                let list = list.lock();
                let i = seq_index(index, list.len(), "list")?;
                Ok(list[i].clone())
            }
            Value::Tuple(items) => {
                let i = seq_index(index, items.len(), "tuple")?;
                Ok(items[i].clone())
            }
            Value::Str(text) => {
                let count = text.chars().count();
                let i = seq_index(index, count, "str")?;
                Ok(Value::str(
                    text.chars().nth(i).map(String::from).unwrap_or_default(),
                ))
            }
            Value::Range(range) => {
                let i = seq_index(index, range.len() as usize, "range object")?;
                Ok(Value::Int(range.get(i as i64)))
            }
            Value::Dict(dict) => {
                let key = self.hash_key(index)?;
                let found = dict.lock().get(&key).map(|(_, v)| v.clone());
                found.ok_or_else(|| Raised::with_args(ExcKind::KeyError, vec![index.clone()]))
            }
            Value::Instance(_) => {
                match self.call_dunder(obj, "__getitem__", vec![index.clone()])? {
                    Some(value) => Ok(value),
                    None => Err(type_error(format!(
                        "'{}' object is not subscriptable",
                        obj.type_name()
                    ))),
                }
            }
            Value::Class(_) | Value::Builtin(Builtin::Type(_)) => Ok(obj.clone()),
            other => Err(type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    fn get_slice(&mut self, obj: &Value, bounds: &SliceBounds) -> EvalResult {
        match obj {
            Value::List(list) => {
                let items = list.snapshot();
                let indices = slice_indices(items.len(), bounds)?;
                Ok(Value::list(indices.into_iter().map(|i| items[i].clone()).collect()))
            }
            Value::Tuple(items) => {
                let indices = slice_indices(items.len(), bounds)?;
                Ok(Value::tuple(indices.into_iter().map(|i| items[i].clone()).collect()))
            }
            Value::Str(text) => {
                let chars: Vec<char> = text.chars().collect();
                let indices = slice_indices(chars.len(), bounds)?;
                Ok(Value::str(indices.into_iter().map(|i| chars[i]).collect::<String>()))
            }
            Value::Range(range) => {
                let (start, _, step) = slice_range(range.len() as usize, bounds)?;
                let count = slice_indices(range.len() as usize, bounds)?.len() as i64;
                let first = range.get(start.max(0));
                let step = range.step * step;
                Ok(Value::Range(super::value::Range {
                    start: first,
                    stop: first + count * step,
                    step,
                }))
            }
            other => Err(type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    pub(crate) fn set_item(&mut self, obj: &Value, index: &Value, value: Value) -> EvalResult<()> {
        match obj {
            Value::List(list) => {
                let mut list = list.lock();
                let i = seq_index(index, list.len(), "list")?;
                list[i] = value;
                Ok(())
            }
            Value::Dict(dict) => {
                let key = self.hash_key(index)?;
                let mut dict = dict.lock();
                match dict.get_mut(&key) {
                    Some(pair) => pair.1 = value,
                    None => {
                        dict.insert(key, (index.clone(), value));
                    }
                }
                Ok(())
            }
            Value::Instance(_) => {
                match self.call_dunder(obj, "__setitem__", vec![index.clone(), value])? {
                    Some(_) => Ok(()),
                    None => Err(type_error(format!(
                        "'{}' object does not support item assignment",
                        obj.type_name()
                    ))),
                }
            }
            other => Err(type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    fn set_slice(&mut self, obj: &Value, bounds: &SliceBounds, value: Value) -> EvalResult<()> {
        let Value::List(list) = obj else {
            return Err(type_error(format!(
                "'{}' object does not support slice assignment",
                obj.type_name()
            )));
        };
        let replacement = self.iterate(&value)?;
        let len = list.lock().len();
        let (start, stop, step) = slice_range(len, bounds)?;

        if step == 1 {
            let start = start as usize;
            let stop = (stop.max(start as i64)) as usize;
            let mut list = list.lock();
            let stop = stop.min(list.len());
            let start = start.min(stop);
            drop(list.splice(start..stop, replacement));
            return Ok(());
        }

        let indices = slice_indices(len, bounds)?;
        if indices.len() != replacement.len() {
            return Err(value_error(format!(
                "attempt to assign sequence of size {} to extended slice of size {}",
                replacement.len(),
                indices.len()
            )));
        }
        let mut list = list.lock();
        for (i, item) in indices.into_iter().zip(replacement) {
            if i < list.len() {
                list[i] = item;
            }
        }
        Ok(())
    }

    fn del_item(&mut self, obj: &Value, index: &Value) -> EvalResult<()> {
        match obj {
            Value::List(list) => {
                let mut list = list.lock();
                let i = seq_index(index, list.len(), "list")?;
                list.remove(i);
                Ok(())
            }
            Value::Dict(dict) => {
                let key = self.hash_key(index)?;
                let removed = dict.lock().shift_remove(&key);
                removed
                    .map(|_| ())
                    .ok_or_else(|| Raised::with_args(ExcKind::KeyError, vec![index.clone()]))
            }
            Value::Instance(_) => match self.call_dunder(obj, "__delitem__", vec![index.clone()])? {
                Some(_) => Ok(()),
                None => Err(type_error(format!(
                    "'{}' object doesn't support item deletion",
                    obj.type_name()
                ))),
            },
            other => Err(type_error(format!(
                "'{}' object doesn't support item deletion",
                other.type_name()
            ))),
        }
    }

    pub(crate) fn dict_insert(&mut self, dict: &mut DictMap, key: Value, value: Value) -> EvalResult<()> {
        let hash = self.hash_key(&key)?;
        match dict.get_mut(&hash) {
            Some(pair) => pair.1 = value,
            None => {
                dict.insert(hash, (key, value));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Iteration
    // ------------------------------------------------------------------

    pub(crate) fn iter_of(&mut self, value: &Value) -> EvalResult<ValueIter> {
        let items = match value {
            Value::List(list) => list.snapshot(),
            Value::Tuple(items) => items.to_vec(),
            Value::Str(text) => text.chars().map(|c| Value::str(c.to_string())).collect(),
            Value::Dict(dict) => dict.lock().values().map(|(k, _)| k.clone()).collect(),
            Value::Set(set) => set.lock().values().cloned().collect(),
            Value::Range(range) => {
                return Ok(ValueIter::Range {
                    next: range.start,
                    remaining: range.len(),
                    step: range.step,
                })
            }
            Value::Instance(_) => {
                if let Some(iterator) = self.call_dunder(value, "__iter__", Vec::new())? {
                    if Self::has_dunder(&iterator, "__next__") {
                        return Ok(ValueIter::Protocol(iterator));
                    }
                    return self.iter_of(&iterator);
                }
                return Err(type_error(format!(
                    "'{}' object is not iterable",
                    value.type_name()
                )));
            }
            other => {
                return Err(type_error(format!(
                    "'{}' object is not iterable",
                    other.type_name()
                )))
            }
        };
        Ok(ValueIter::Items(items.into_iter()))
    }

    pub(crate) fn next_item(&mut self, iter: &mut ValueIter) -> EvalResult<Option<Value>> {
        match iter {
            ValueIter::Items(items) => Ok(items.next()),
            ValueIter::Range {
                next,
                remaining,
                step,
            } => {
                if *remaining <= 0 {
                    return Ok(None);
                }
                let value = *next;
                *next = next.wrapping_add(*step);
                *remaining -= 1;
                Ok(Some(Value::Int(value)))
            }
            ValueIter::Protocol(iterator) => {
                let iterator = iterator.clone();
                match self.call_dunder(&iterator, "__next__", Vec::new()) {
                    Ok(value) => Ok(value),
                    Err(raised) if raised.is(ExcKind::StopIteration) => Ok(None),
                    Err(raised) => Err(raised),
                }
            }
        }
    }

    /// Collect every item of an iterable.
    pub(crate) fn iterate(&mut self, value: &Value) -> EvalResult<Vec<Value>> {
        if let Value::Range(range) = value {
            if range.len() as usize > MAX_SEQUENCE {
                return Err(Raised::new(ExcKind::MemoryError, "range is too large to materialize"));
            }
        }
        let mut iter = match self.iter_of(value)? {
            ValueIter::Items(items) => return Ok(items.collect()),
            other => other,
        };
        let mut out = Vec::new();
        while let Some(item) = self.next_item(&mut iter)? {
            out.push(item);
        }
        Ok(out)
    }

    pub(crate) fn set_members(&mut self, value: &Value) -> EvalResult<SetMap> {
        if let Value::Set(set) = value {
            return Ok(set.snapshot());
        }
        let mut out = SetMap::new();
        for item in self.iterate(value)? {
            let key = self.hash_key(&item)?;
            out.entry(key).or_insert(item);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------

    pub(crate) fn binary_op(&mut self, op: BinOp, left: &Value, right: &Value) -> EvalResult {
        if let Some(value) = self.builtin_binary(op, left, right)? {
            return Ok(value);
        }
        if let Some(result) = self.call_dunder(left, op.dunder(), vec![right.clone()])? {
            if !matches!(result, Value::NotImplemented) {
                return Ok(result);
            }
        }
        if let Some(result) = self.call_dunder(right, op.reflected_dunder(), vec![left.clone()])? {
            if !matches!(result, Value::NotImplemented) {
                return Ok(result);
            }
        }

        let message = match (op, left) {
            (BinOp::Add, Value::Str(_) | Value::List(_) | Value::Tuple(_)) => format!(
                "can only concatenate {} (not \"{}\") to {}",
                left.type_name(),
                right.type_name(),
                left.type_name()
            ),
            _ => format!(
                "unsupported operand type(s) for {}: '{}' and '{}'",
                op.symbol(),
                left.type_name(),
                right.type_name()
            ),
        };
        Err(type_error(message))
    }

    fn builtin_binary(&mut self, op: BinOp, left: &Value, right: &Value) -> EvalResult<Option<Value>> {
        if let (Value::Bool(a), Value::Bool(b)) = (left, right) {
            match op {
                BinOp::BitAnd => return Ok(Some(Value::Bool(*a & *b))),
                BinOp::BitOr => return Ok(Some(Value::Bool(*a | *b))),
                BinOp::BitXor => return Ok(Some(Value::Bool(*a ^ *b))),
                _ => {}
            }
        }
        if let (Some(a), Some(b)) = (left.as_int(), right.as_int()) {
            return self.int_op(op, a, b).map(Some);
        }
        if let (Some(a), Some(b)) = (long_int::to_big(left), long_int::to_big(right)) {
            return long_int::binary(op, &a, &b).map(Some);
        }
        if is_number(left) && is_number(right) {
            return self.float_op(op, float_operand(left)?, float_operand(right)?);
        }

        let value = match (op, left, right) {
            (BinOp::Add, Value::Str(a), Value::Str(b)) => {
                let mut out = String::with_capacity(a.len() + b.len());
                out.push_str(a);
                out.push_str(b);
                Value::str(out)
            }
            (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s))
                if n.as_int().is_some() =>
            {
                let times = repeat_count(s.len(), n.as_int().unwrap_or(0))?;
                Value::str(s.repeat(times))
            }
            (BinOp::Mod, Value::Str(template), args) => {
                Value::str(self.percent_format(template, args)?)
            }
            (BinOp::Add, Value::List(a), Value::List(b)) => {
                let mut items = a.snapshot();
                items.extend(b.snapshot());
                Value::list(items)
            }
            (BinOp::Mul, Value::List(l), n) | (BinOp::Mul, n, Value::List(l))
                if n.as_int().is_some() =>
            {
                let items = l.snapshot();
                let times = repeat_count(items.len(), n.as_int().unwrap_or(0))?;
                Value::list(repeat_items(&items, times))
            }
            (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
                Value::tuple(a.iter().chain(b.iter()).cloned().collect())
            }
            (BinOp::Mul, Value::Tuple(t), n) | (BinOp::Mul, n, Value::Tuple(t))
                if n.as_int().is_some() =>
            {
                let times = repeat_count(t.len(), n.as_int().unwrap_or(0))?;
                Value::tuple(repeat_items(t, times))
            }
            (
                BinOp::BitOr | BinOp::BitAnd | BinOp::Sub | BinOp::BitXor,
                Value::Set(a),
                Value::Set(b),
            ) => {
                let (a, b) = (a.snapshot(), b.snapshot());
                Value::set(set_operation(op, &a, &b))
            }
            (BinOp::BitOr, Value::Dict(a), Value::Dict(b)) => {
                let mut merged = a.snapshot();
                for (key, pair) in b.snapshot() {
                    merged.insert(key, pair);
                }
                Value::dict(merged)
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    fn int_op(&mut self, op: BinOp, a: i64, b: i64) -> EvalResult {
        let promote = || long_int::binary(op, &a.into(), &b.into());
        let value = match op {
            BinOp::Add => return a.checked_add(b).map_or_else(promote, |v| Ok(Value::Int(v))),
            BinOp::Sub => return a.checked_sub(b).map_or_else(promote, |v| Ok(Value::Int(v))),
            BinOp::Mul => return a.checked_mul(b).map_or_else(promote, |v| Ok(Value::Int(v))),
            BinOp::Div => {
                if b == 0 {
                    return Err(zero_division("division by zero"));
                }
                return Ok(Value::Float(a as f64 / b as f64));
            }
            BinOp::FloorDiv if a == i64::MIN && b == -1 => return promote(),
            BinOp::FloorDiv => floor_div(a, b)?,
            BinOp::Mod => floor_mod(a, b)?,
            BinOp::Pow => return int_pow(a, b),
            BinOp::BitAnd => a & b,
            BinOp::BitOr => a | b,
            BinOp::BitXor => a ^ b,
            BinOp::LShift => {
                if b < 0 {
                    return Err(value_error("negative shift count"));
                }
                if a == 0 {
                    0
                } else if b >= 64 || (a << b) >> b != a {
                    return promote();
                } else {
                    a << b
                }
            }
            BinOp::RShift => {
                if b < 0 {
                    return Err(value_error("negative shift count"));
                }
                if b >= 64 {
                    if a < 0 {
                        -1
                    } else {
                        0
                    }
                } else {
                    a >> b
                }
            }
        };
        Ok(Value::Int(value))
    }

    fn float_op(&mut self, op: BinOp, a: f64, b: f64) -> EvalResult<Option<Value>> {
        let value = match op {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => {
                if b == 0.0 {
                    return Err(zero_division("float division by zero"));
                }
                a / b
            }
            BinOp::FloorDiv => {
                if b == 0.0 {
                    return Err(zero_division("float floor division by zero"));
                }
                (a / b).floor()
            }
            BinOp::Mod => {
                if b == 0.0 {
                    return Err(zero_division("float modulo"));
                }
                float_mod(a, b)
            }
            BinOp::Pow => return float_pow(a, b).map(Some),
            _ => return Ok(None),
        };
        Ok(Some(Value::Float(value)))
    }

    fn unary_op(&mut self, op: UnaryOp, operand: &Value) -> EvalResult {
        let dunder = match op {
            UnaryOp::Not => return Ok(Value::Bool(!self.truthy(operand)?)),
            UnaryOp::Neg => "__neg__",
            UnaryOp::Pos => "__pos__",
            UnaryOp::Invert => "__invert__",
        };
        match (op, operand) {
            (UnaryOp::Neg, Value::Float(f)) => return Ok(Value::Float(-f)),
            (UnaryOp::Pos, Value::Float(f)) => return Ok(Value::Float(*f)),
            (_, Value::Int(_) | Value::Bool(_)) => {
                let i = operand.as_int().unwrap_or(0);
                return Ok(match op {
                    UnaryOp::Neg => i
                        .checked_neg()
                        .map_or_else(|| long_int::negate(&i.into()), Value::Int),
                    UnaryOp::Pos => Value::Int(i),
                    _ => Value::Int(!i),
                });
            }
            (_, Value::LongInt(n)) => {
                return Ok(match op {
                    UnaryOp::Neg => long_int::negate(n),
                    UnaryOp::Pos => operand.clone(),
                    _ => long_int::invert(n),
                });
            }
            _ => {}
        }
        if let Some(result) = self.call_dunder(operand, dunder, Vec::new())? {
            return Ok(result);
        }
        let symbol = match op {
            UnaryOp::Neg => "-",
            UnaryOp::Pos => "+",
            _ => "~",
        };
        Err(type_error(format!(
            "bad operand type for unary {}: '{}'",
            symbol,
            operand.type_name()
        )))
    }

    fn enter_nested(&mut self) -> EvalResult<()> {
        self.nesting += 1;
        if self.nesting > NESTING_LIMIT {
            self.nesting -= 1;
            return Err(Raised::new(
                ExcKind::RecursionError,
                "maximum recursion depth exceeded while comparing or rendering",
            ));
        }
        Ok(())
    }

    fn leave_nested(&mut self) {
        self.nesting -= 1;
    }

    /// Apply a comparison operator.
    pub(crate) fn compare(&mut self, op: CmpOp, left: &Value, right: &Value) -> EvalResult<bool> {
        match op {
            CmpOp::Eq => self.equals(left, right),
            CmpOp::NotEq => {
                if let Some(result) = self.call_dunder(left, "__ne__", vec![right.clone()])? {
                    if !matches!(result, Value::NotImplemented) {
                        return self.truthy(&result);
                    }
                }
                Ok(!self.equals(left, right)?)
            }
            CmpOp::Is => Ok(left.is_same(right)),
            CmpOp::IsNot => Ok(!left.is_same(right)),
            CmpOp::In => self.contains(right, left),
            CmpOp::NotIn => Ok(!self.contains(right, left)?),
            CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE => {
                self.enter_nested()?;
                let result = self.order(op, left, right);
                self.leave_nested();
                result
            }
        }
    }

    fn order(&mut self, op: CmpOp, left: &Value, right: &Value) -> EvalResult<bool> {
        use std::cmp::Ordering;

        let holds = |ordering: Ordering| match op {
            CmpOp::Lt => ordering == Ordering::Less,
            CmpOp::LtE => ordering != Ordering::Greater,
            CmpOp::Gt => ordering == Ordering::Greater,
            _ => ordering != Ordering::Less,
        };

        if let (Some(a), Some(b)) = (left.as_int(), right.as_int()) {
            return Ok(holds(a.cmp(&b)));
        }
        if let (Some(a), Some(b)) = (long_int::to_big(left), long_int::to_big(right)) {
            return Ok(holds(a.cmp(&b)));
        }
        if is_number(left) && is_number(right) {
            let (a, b) = (left.as_float().unwrap_or(0.0), right.as_float().unwrap_or(0.0));
            return Ok(a.partial_cmp(&b).is_some_and(holds));
        }

        match (left, right) {
            (Value::Str(a), Value::Str(b)) => return Ok(holds(a.cmp(b))),
            (Value::List(_), Value::List(_)) | (Value::Tuple(_), Value::Tuple(_)) => {
                let a = self.iterate(left)?;
                let b = self.iterate(right)?;
                for (x, y) in a.iter().zip(&b) {
                    if x.is_same(y) || self.equals(x, y)? {
                        continue;
                    }
                    return self.compare(op, x, y);
                }
                return Ok(holds(a.len().cmp(&b.len())));
            }
            (Value::Set(a), Value::Set(b)) => {
                let (a, b) = (a.snapshot(), b.snapshot());
                let subset = a.keys().all(|k| b.contains_key(k));
                let superset = b.keys().all(|k| a.contains_key(k));
                return Ok(match op {
                    CmpOp::Lt => subset && a.len() < b.len(),
                    CmpOp::LtE => subset,
                    CmpOp::Gt => superset && a.len() > b.len(),
                    _ => superset,
                });
            }
            _ => {}
        }

        let (dunder, reflected) = match op {
            CmpOp::Lt => ("__lt__", "__gt__"),
            CmpOp::LtE => ("__le__", "__ge__"),
            CmpOp::Gt => ("__gt__", "__lt__"),
            _ => ("__ge__", "__le__"),
        };
        if let Some(result) = self.call_dunder(left, dunder, vec![right.clone()])? {
            if !matches!(result, Value::NotImplemented) {
                return self.truthy(&result);
            }
        }
        if let Some(result) = self.call_dunder(right, reflected, vec![left.clone()])? {
            if !matches!(result, Value::NotImplemented) {
                return self.truthy(&result);
            }
        }
        Err(type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        )))
    }

    /// `left == right`, honouring `__eq__`.
    pub(crate) fn equals(&mut self, left: &Value, right: &Value) -> EvalResult<bool> {
        self.enter_nested()?;
        let result = self.equals_inner(left, right);
        self.leave_nested();
        result
    }

    fn equals_inner(&mut self, left: &Value, right: &Value) -> EvalResult<bool> {
        if let (Some(a), Some(b)) = (left.as_int(), right.as_int()) {
            return Ok(a == b);
        }
        if let (Value::LongInt(a), Value::LongInt(b)) = (left, right) {
            return Ok(a == b);
        }
        if let (Some(a), Some(b)) = (left.as_float(), right.as_float()) {
            return Ok(a == b);
        }
        match (left, right) {
            (Value::Str(a), Value::Str(b)) => Ok(a == b),
            (Value::List(a), Value::List(b)) if a.ptr_eq(b) => Ok(true),
            (Value::List(_), Value::List(_)) | (Value::Tuple(_), Value::Tuple(_)) => {
                let a = self.iterate(left)?;
                let b = self.iterate(right)?;
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (x, y) in a.iter().zip(&b) {
                    if !x.is_same(y) && !self.equals(x, y)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (Value::Dict(a), Value::Dict(b)) => {
                if a.ptr_eq(b) {
                    return Ok(true);
                }
                let (a, b) = (a.snapshot(), b.snapshot());
                if a.len() != b.len() {
                    return Ok(false);
                }
                for (key, (_, value)) in &a {
                    let Some((_, other)) = b.get(key) else {
                        return Ok(false);
                    };
                    if !value.is_same(other) && !self.equals(value, other)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (Value::Set(a), Value::Set(b)) => {
                let (a, b) = (a.snapshot(), b.snapshot());
                Ok(a.len() == b.len() && a.keys().all(|k| b.contains_key(k)))
            }
            (Value::Range(a), Value::Range(b)) => {
                let len = a.len();
                Ok(len == b.len()
                    && (len == 0 || (a.start == b.start && (len == 1 || a.step == b.step))))
            }
            _ => {
                if let Some(result) = self.call_dunder(left, "__eq__", vec![right.clone()])? {
                    if !matches!(result, Value::NotImplemented) {
                        return self.truthy(&result);
                    }
                }
                if let Some(result) = self.call_dunder(right, "__eq__", vec![left.clone()])? {
                    if !matches!(result, Value::NotImplemented) {
                        return self.truthy(&result);
                    }
                }
                Ok(left.is_same(right))
            }
        }
    }

    /// `item in container`.
    pub(crate) fn contains(&mut self, container: &Value, item: &Value) -> EvalResult<bool> {
        match container {
            Value::Str(text) => match item {
                Value::Str(needle) => Ok(text.contains(&**needle)),
                other => Err(type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                ))),
            },
            Value::Dict(dict) => {
                let key = self.hash_key(item)?;
                Ok(dict.lock().contains_key(&key))
            }
            Value::Set(set) => {
                let key = self.hash_key(item)?;
                Ok(set.lock().contains_key(&key))
            }
            Value::Range(range) => match item.as_int() {
                Some(i) => Ok(range.contains(i)),
                None => Ok(item
                    .as_float()
                    .is_some_and(|f| f.fract() == 0.0 && range.contains(f as i64))),
            },
            Value::Instance(_) if Self::has_dunder(container, "__contains__") => {
                let result = self
                    .call_dunder(container, "__contains__", vec![item.clone()])?
                    .unwrap_or(Value::Bool(false));
                self.truthy(&result)
            }
            _ => {
                let mut iter = self.iter_of(container).map_err(|_| {
                    type_error(format!(
                        "argument of type '{}' is not iterable",
                        container.type_name()
                    ))
                })?;
                while let Some(candidate) = self.next_item(&mut iter)? {
                    if candidate.is_same(item) || self.equals(&candidate, item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    pub(crate) fn truthy(&mut self, value: &Value) -> EvalResult<bool> {
        Ok(match value {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::LongInt(_) => true,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.lock().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) => !d.lock().is_empty(),
            Value::Set(s) => !s.lock().is_empty(),
            Value::Range(r) => !r.is_empty(),
            Value::Instance(_) => {
                if let Some(result) = self.call_dunder(value, "__bool__", Vec::new())? {
                    return match result {
                        Value::Bool(b) => Ok(b),
                        other => Err(type_error(format!(
                            "__bool__ should return bool, returned {}",
                            other.type_name()
                        ))),
                    };
                }
                if Self::has_dunder(value, "__len__") {
                    return Ok(self.len_of(value)? != 0);
                }
                true
            }
            _ => true,
        })
    }

    pub(crate) fn len_of(&mut self, value: &Value) -> EvalResult<usize> {
        match value {
            Value::Str(s) => Ok(s.chars().count()),
            Value::List(l) => Ok(l.lock().len()),
            Value::Tuple(t) => Ok(t.len()),
            Value::Dict(d) => Ok(d.lock().len()),
            Value::Set(s) => Ok(s.lock().len()),
            Value::Range(r) => Ok(r.len() as usize),
            Value::Instance(_) => match self.call_dunder(value, "__len__", Vec::new())? {
                Some(Value::Int(n)) if n >= 0 => Ok(n as usize),
                Some(Value::Int(_)) => Err(value_error("__len__() should return >= 0")),
                Some(other) => Err(type_error(format!(
                    "'{}' object cannot be interpreted as an integer",
                    other.type_name()
                ))),
                None => Err(type_error(format!(
                    "object of type '{}' has no len()",
                    value.type_name()
                ))),
            },
            other => Err(type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            ))),
        }
    }

    /// Hashed form of a dict key or set member.
    pub(crate) fn hash_key(&mut self, value: &Value) -> EvalResult<HashKey> {
        Ok(match value {
            Value::None => HashKey::None,
            Value::Bool(b) => HashKey::Int(i64::from(*b)),
            Value::Int(i) => HashKey::Int(*i),
            Value::LongInt(n) => HashKey::LongInt(BigInt::clone(n)),
            Value::Float(f) => HashKey::from_float(*f),
            Value::Str(s) => HashKey::Str(Arc::clone(s)),
            Value::Tuple(items) => {
                self.enter_nested()?;
                let keys: EvalResult<Vec<HashKey>> =
                    items.iter().map(|item| self.hash_key(item)).collect();
                self.leave_nested();
                HashKey::Tuple(keys?)
            }
            Value::Range(r) => HashKey::Range(r.start, r.stop, r.step),
            Value::Builtin(b) => HashKey::Builtin(*b),
            Value::Ellipsis => HashKey::Ellipsis,
            Value::List(_) | Value::Dict(_) | Value::Set(_) => {
                return Err(type_error(format!(
                    "unhashable type: '{}'",
                    value.type_name()
                )))
            }
            Value::Instance(inst) => match inst.class.lookup("__hash__") {
                Some(Value::None) => {
                    return Err(type_error(format!(
                        "unhashable type: '{}'",
                        value.type_name()
                    )))
                }
                Some(_) => match self.call_dunder(value, "__hash__", Vec::new())? {
                    Some(Value::Int(h)) => HashKey::Custom(h),
                    Some(Value::LongInt(h)) => HashKey::Custom(long_int::hash(&h)),
                    _ => return Err(type_error("__hash__ method should return an integer")),
                },
                None if inst.class.lookup("__eq__").is_some() => {
                    return Err(type_error(format!(
                        "unhashable type: '{}'",
                        value.type_name()
                    )))
                }
                None => HashKey::Identity(value.identity().unwrap_or(0)),
            },
            other => HashKey::Identity(other.identity().unwrap_or(0)),
        })
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    /// `repr(value)`.
    pub fn repr(&mut self, value: &Value) -> EvalResult<String> {
        match value {
            Value::List(list) => {
                let items = list.snapshot();
                self.repr_sequence(list.addr(), "[", "]", &items, false, "[...]")
            }
            Value::Tuple(items) => {
                let addr = value.identity().unwrap_or(0);
                self.repr_sequence(addr, "(", ")", items, items.len() == 1, "(...)")
            }
            Value::Set(set) => {
                let items: Vec<Value> = set.lock().values().cloned().collect();
                if items.is_empty() {
                    return Ok("set()".to_string());
                }
                self.repr_sequence(set.addr(), "{", "}", &items, false, "{...}")
            }
            Value::Dict(dict) => {
                let addr = dict.addr();
                if self.repr_guard.contains(&addr) {
                    return Ok("{...}".to_string());
                }
                let pairs: Vec<(Value, Value)> = dict.lock().values().cloned().collect();
                self.with_repr_guard(addr, |interp| {
                    let mut parts = Vec::with_capacity(pairs.len());
                    for (key, value) in &pairs {
                        parts.push(format!("{}: {}", interp.repr(key)?, interp.repr(value)?));
                    }
                    Ok(format!("{{{}}}", parts.join(", ")))
                })
            }
            Value::Instance(inst) => {
                if let Some(result) = self.call_dunder(value, "__repr__", Vec::new())? {
                    return match result {
                        Value::Str(s) => Ok(s.to_string()),
                        other => Err(type_error(format!(
                            "__repr__ returned non-string (type {})",
                            other.type_name()
                        ))),
                    };
                }
                if is_exception_class(&inst.class) {
                    let args = exception_args(value);
                    let rendered = if args.len() == 1 {
                        self.repr(&args[0])?
                    } else {
                        let tuple = self.repr(&Value::tuple(args))?;
                        tuple[1..tuple.len() - 1].trim_end_matches(',').to_string()
                    };
                    return Ok(format!("{}({})", inst.class.name, rendered));
                }
                Ok(format!(
                    "<{} object at {:#x}>",
                    inst.class.qualified_name(),
                    value.identity().unwrap_or(0)
                ))
            }
            Value::Function(func) => Ok(format!(
                "<function {} at {:#x}>",
                func.name(),
                value.identity().unwrap_or(0)
            )),
            Value::BoundMethod(method) => {
                let receiver = self.repr(&method.receiver)?;
                let owner = match &method.receiver {
                    Value::Class(class) => class.name.clone(),
                    other => other.type_name(),
                };
                let name = match &method.func {
                    Value::Function(func) => func.name().to_string(),
                    other => other.plain_repr(),
                };
                Ok(format!("<bound method {}.{} of {}>", owner, name, receiver))
            }
            Value::NativeMethod(method) => Ok(format!(
                "<built-in method {} of {} object at {:#x}>",
                method.name,
                method.receiver.type_name(),
                method.receiver.identity().unwrap_or(0)
            )),
            Value::Module(module) => Ok(format!("<module '{}' (built-in)>", module.name)),
            Value::Property(_) | Value::StaticMethod(_) | Value::ClassMethod(_) => Ok(format!(
                "<{} object at {:#x}>",
                value.type_name(),
                value.identity().unwrap_or(0)
            )),
            Value::Super(proxy) => {
                let receiver = self.repr(&proxy.receiver)?;
                Ok(format!("<super: <class '{}'>, {}>", proxy.class.name, receiver))
            }
            other => Ok(other.plain_repr()),
        }
    }

    fn with_repr_guard(
        &mut self,
        addr: usize,
        body: impl FnOnce(&mut Self) -> EvalResult<String>,
    ) -> EvalResult<String> {
        self.enter_nested()?;
        self.repr_guard.push(addr);
        let result = body(self);
        self.repr_guard.pop();
        self.leave_nested();
        result
    }

    fn repr_sequence(
        &mut self,
        addr: usize,
        open: &str,
        close: &str,
        items: &[Value],
        trailing_comma: bool,
        recursive: &str,
    ) -> EvalResult<String> {
        if self.repr_guard.contains(&addr) {
            return Ok(recursive.to_string());
        }
        self.with_repr_guard(addr, |interp| {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                parts.push(interp.repr(item)?);
            }
            let comma = if trailing_comma { "," } else { "" };
            Ok(format!("{}{}{}{}", open, parts.join(", "), comma, close))
        })
    }

    /// `str(value)`.
    pub fn str_of(&mut self, value: &Value) -> EvalResult<String> {
        match value {
            Value::Str(s) => Ok(s.to_string()),
            Value::Instance(inst) => {
                if let Some(result) = self.call_dunder(value, "__str__", Vec::new())? {
                    return match result {
                        Value::Str(s) => Ok(s.to_string()),
                        other => Err(type_error(format!(
                            "__str__ returned non-string (type {})",
                            other.type_name()
                        ))),
                    };
                }
                if is_exception_class(&inst.class) {
                    return self.exception_str(value);
                }
                self.repr(value)
            }
            other => self.repr(other),
        }
    }

    fn exception_str(&mut self, exc: &Value) -> EvalResult<String> {
        if let Value::Instance(inst) = exc {
            if inst.class.lookup("__str__").is_some() {
                return self.str_of(exc);
            }
        }
        let args = exception_args(exc);
        let is_key_error = match exc {
            Value::Instance(inst) => inst.class.is_subclass_of(&ExcKind::KeyError.class()),
            _ => false,
        };
        match args.len() {
            0 => Ok(String::new()),
            1 if is_key_error => self.repr(&args[0]),
            1 => self.str_of(&args[0]),
            _ => self.repr(&Value::tuple(args)),
        }
    }

    /// `format(value, spec)`.
    pub(crate) fn format_value(&mut self, value: &Value, spec: &str) -> EvalResult<String> {
        if let Some(result) = self.call_dunder(value, "__format__", vec![Value::str(spec)])? {
            return match result {
                Value::Str(s) => Ok(s.to_string()),
                other => Err(type_error(format!(
                    "__format__ must return a str, not {}",
                    other.type_name()
                ))),
            };
        }
        if spec.is_empty() {
            return self.str_of(value);
        }
        let parsed = FormatSpec::parse(spec).map_err(value_error)?;
        let rendered = match value {
            Value::Bool(b) if parsed.kind.is_none() => {
                format_str(if *b { "True" } else { "False" }, &parsed)
            }
            Value::Int(_) | Value::Bool(_) => format_int(value.as_int().unwrap_or(0), &parsed),
            Value::LongInt(n) => format_integer(n, &parsed),
            Value::Float(f) => format_float(*f, &parsed),
            Value::Str(s) => format_str(s, &parsed),
            other => {
                return Err(type_error(format!(
                    "unsupported format string passed to {}.__format__",
                    other.type_name()
                )))
            }
        };
        rendered.map_err(value_error)
    }

    /// `template % args`.
    pub(crate) fn percent_format(&mut self, template: &str, args: &Value) -> EvalResult<String> {
        let pieces = parse_percent(template).map_err(value_error)?;
        let positional: Vec<Value> = match args {
            Value::Tuple(items) => items.to_vec(),
            other => vec![other.clone()],
        };
        let mut next = 0;
        let mut used_key = false;
        let mut out = String::new();

        for piece in pieces {
            let (key, mut spec, conversion) = match piece {
                PercentPiece::Literal(text) => {
                    out.push_str(&text);
                    continue;
                }
                PercentPiece::Spec {
                    key,
                    spec,
                    conversion,
                } => (key, spec, conversion),
            };
            let value = match key {
                Some(key) => {
                    used_key = true;
                    if !matches!(args, Value::Dict(_)) {
                        return Err(type_error("format requires a mapping"));
                    }
                    self.get_item(args, &Value::str(key))?
                }
                None => {
                    let value = positional.get(next).cloned().ok_or_else(|| {
                        type_error("not enough arguments for format string")
                    })?;
                    next += 1;
                    value
                }
            };

            let rendered = match conversion {
                's' | 'r' | 'a' => {
                    let text = if conversion == 's' {
                        self.str_of(&value)?
                    } else {
                        self.repr(&value)?
                    };
                    spec.sign = '-';
                    spec.zero = false;
                    format_str(&text, &spec)
                }
                'c' => match &value {
                    Value::Str(s) if s.chars().count() == 1 => {
                        spec.kind = None;
                        format_str(s, &spec)
                    }
                    other => match other.as_int() {
                        Some(i) => format_int(i, &spec),
                        None => return Err(type_error("%c requires int or char")),
                    },
                },
                'd' | 'i' | 'u' | 'x' | 'X' | 'o' => {
                    let int = match &value {
                        Value::Float(f) if f.is_finite() => *f as i64,
                        other => other.as_int().ok_or_else(|| {
                            type_error(format!(
                                "%{} format: a real number is required, not {}",
                                conversion,
                                other.type_name()
                            ))
                        })?,
                    };
                    format_int(int, &spec)
                }
                _ => {
                    let float = value.as_float().ok_or_else(|| {
                        type_error(format!(
                            "must be real number, not {}",
                            value.type_name()
                        ))
                    })?;
                    format_float(float, &spec)
                }
            };
            out.push_str(&rendered.map_err(value_error)?);
        }

        if !used_key && next < positional.len() && !matches!(args, Value::Dict(_)) {
            return Err(type_error(
                "not all arguments converted during string formatting",
            ));
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    /// `type(value)`.
    pub(crate) fn type_of(value: &Value) -> Value {
        match value {
            Value::Instance(inst) => Value::Class(Arc::clone(&inst.class)),
            other => Value::Builtin(Builtin::Type(other.builtin_type())),
        }
    }

    /// `isinstance(value, typ)`.
    pub(crate) fn is_instance(&mut self, value: &Value, typ: &Value) -> EvalResult<bool> {
        match typ {
            Value::Tuple(items) => {
                for item in items.iter() {
                    if self.is_instance(value, item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Value::Class(class) => Ok(match value {
                Value::Instance(inst) => inst.class.is_subclass_of(class),
                _ => false,
            }),
            Value::Builtin(Builtin::Type(t)) => Ok(match t {
                BuiltinType::Object => true,
                BuiltinType::Int => {
                    matches!(value, Value::Int(_) | Value::Bool(_) | Value::LongInt(_))
                }
                other => value.builtin_type() == *other && !matches!(value, Value::Instance(_)),
            }),
            other => Err(type_error(format!(
                "isinstance() arg 2 must be a type, a tuple of types, or a union, not {}",
                other.type_name()
            ))),
        }
    }

    /// Stable sort with a fallible comparison, optionally by key.
    pub(crate) fn sort_values(
        &mut self,
        items: Vec<Value>,
        key: Option<&Value>,
        reverse: bool,
    ) -> EvalResult<Vec<Value>> {
        let keys = match key {
            Some(func) if !func.is_none() => {
                let mut keys = Vec::with_capacity(items.len());
                for item in &items {
                    keys.push(self.call(func, vec![item.clone()], Vec::new())?);
                }
                keys
            }
            _ => items.clone(),
        };

        let mut order: Vec<usize> = (0..items.len()).collect();
        let mut buffer = order.clone();
        let mut width = 1;
        while width < order.len() {
            let mut start = 0;
            while start < order.len() {
                let mid = (start + width).min(order.len());
                let end = (start + 2 * width).min(order.len());
                let (mut i, mut j, mut k) = (start, mid, start);
                while i < mid && j < end {
                    let (a, b) = (&keys[order[i]], &keys[order[j]]);
                    let take_right = if reverse {
                        self.compare(CmpOp::Lt, a, b)?
                    } else {
                        self.compare(CmpOp::Lt, b, a)?
                    };
                    if take_right {
                        buffer[k] = order[j];
                        j += 1;
                    } else {
                        buffer[k] = order[i];
                        i += 1;
                    }
                    k += 1;
                }
                buffer[k..k + (mid - i)].copy_from_slice(&order[i..mid]);
                k += mid - i;
                buffer[k..k + (end - j)].copy_from_slice(&order[j..end]);
                start = end;
            }
            std::mem::swap(&mut order, &mut buffer);
            width *= 2;
        }
        Ok(order.into_iter().map(|i| items[i].clone()).collect())
    }
}

pub(crate) fn set_operation(op: BinOp, a: &SetMap, b: &SetMap) -> SetMap {
    match op {
        BinOp::BitOr => {
            let mut out = a.clone();
            for (key, value) in b {
                out.entry(key.clone()).or_insert_with(|| value.clone());
            }
            out
        }
        BinOp::BitAnd => a
            .iter()
            .filter(|(key, _)| b.contains_key(*key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        BinOp::Sub => a
            .iter()
            .filter(|(key, _)| !b.contains_key(*key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        _ => a
            .iter()
            .filter(|(key, _)| !b.contains_key(*key))
            .chain(b.iter().filter(|(key, _)| !a.contains_key(*key)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    }
}
