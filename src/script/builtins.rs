//! Built-in functions, type constructors, methods of built-in types and the
//! `math` module.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::Signed;

use super::ast::{BinOp, CmpOp};
use super::exceptions::{ExcKind, Raised};
use super::format::{parse_format_string, quote_str, round_half_even, FormatPiece};
use super::long_int;
use super::interpreter::{
    float_pow, seq_index, set_operation, EvalResult, Interpreter, MAX_SEQUENCE,
};
use super::value::{
    Builtin, BuiltinFunction, BuiltinType, Class, DictMap, HashKey, Instance, MathFunction,
    Module, Property, Range, SetMap, Shared, SuperProxy, Value,
};

fn type_error(message: impl Into<String>) -> Raised {
    Raised::new(ExcKind::TypeError, message)
}

fn value_error(message: impl Into<String>) -> Raised {
    Raised::new(ExcKind::ValueError, message)
}

fn domain_error() -> Raised {
    value_error("math domain error")
}

fn range_error() -> Raised {
    Raised::new(ExcKind::OverflowError, "math range error")
}

fn overflow() -> Raised {
    Raised::new(ExcKind::OverflowError, "integer result too large")
}

/// Resolve a name that is not bound in the session scope.
pub(crate) fn lookup(name: &str) -> Option<Value> {
    match name {
        "NotImplemented" => return Some(Value::NotImplemented),
        "Ellipsis" => return Some(Value::Ellipsis),
        "__name__" => return Some(Value::str("__main__")),
        _ => {}
    }
    if let Some(function) = BuiltinFunction::from_name(name) {
        if function != BuiltinFunction::ExceptionInit {
            return Some(Value::Builtin(Builtin::Function(function)));
        }
    }
    if let Some(typ) = BuiltinType::from_name(name) {
        if typ.is_public() {
            return Some(Value::Builtin(Builtin::Type(typ)));
        }
    }
    ExcKind::from_name(name).map(|kind| Value::Class(kind.class()))
}

/// The modules `import` can load.
pub(crate) fn import_module(name: &str) -> Option<Value> {
    match name {
        "math" => Some(Value::Module(math_module())),
        _ => None,
    }
}

fn math_module() -> Arc<Module> {
    static MATH: OnceLock<Arc<Module>> = OnceLock::new();
    let module = MATH.get_or_init(|| {
        let mut attrs = HashMap::new();
        for (name, value) in [
            ("pi", std::f64::consts::PI),
            ("e", std::f64::consts::E),
            ("tau", std::f64::consts::TAU),
            ("inf", f64::INFINITY),
            ("nan", f64::NAN),
        ] {
            attrs.insert(name.to_string(), Value::Float(value));
        }
        for function in MATH_FUNCTIONS {
            attrs.insert(
                function.name().to_string(),
                Value::Builtin(Builtin::Math(function)),
            );
        }
        Arc::new(Module {
            name: "math".to_string(),
            attrs,
        })
    });
    Arc::clone(module)
}

const MATH_FUNCTIONS: [MathFunction; 34] = [
    MathFunction::Sqrt,
    MathFunction::Isqrt,
    MathFunction::Floor,
    MathFunction::Ceil,
    MathFunction::Trunc,
    MathFunction::Fabs,
    MathFunction::Fmod,
    MathFunction::Exp,
    MathFunction::Log,
    MathFunction::Log2,
    MathFunction::Log10,
    MathFunction::Pow,
    MathFunction::Sin,
    MathFunction::Cos,
    MathFunction::Tan,
    MathFunction::Asin,
    MathFunction::Acos,
    MathFunction::Atan,
    MathFunction::Atan2,
    MathFunction::Hypot,
    MathFunction::Degrees,
    MathFunction::Radians,
    MathFunction::Copysign,
    MathFunction::Gcd,
    MathFunction::Lcm,
    MathFunction::Factorial,
    MathFunction::Comb,
    MathFunction::Perm,
    MathFunction::Fsum,
    MathFunction::Prod,
    MathFunction::Isclose,
    MathFunction::Isnan,
    MathFunction::Isinf,
    MathFunction::Isfinite,
];

/// Class of instances created by calling `object()`.
fn object_class() -> Arc<Class> {
    static OBJECT: OnceLock<Arc<Class>> = OnceLock::new();
    let class = OBJECT.get_or_init(|| {
        Arc::new(Class {
            name: "object".to_string(),
            bases: Vec::new(),
            mro: Vec::new(),
            attrs: Shared::new(HashMap::new()),
            builtin: true,
        })
    });
    Arc::clone(class)
}

/// Arguments of a native call, consumed as they are checked.
struct CallArgs {
    name: String,
    positional: Vec<Value>,
    kwargs: Vec<(String, Value)>,
}

impl CallArgs {
    fn new(name: impl Into<String>, positional: Vec<Value>, kwargs: Vec<(String, Value)>) -> Self {
        Self {
            name: name.into(),
            positional,
            kwargs,
        }
    }

    /// Take a keyword argument, or the positional one at `index` if given.
    fn take(&mut self, key: &str, index: Option<usize>) -> Option<Value> {
        if let Some(pos) = self.kwargs.iter().position(|(k, _)| k == key) {
            return Some(self.kwargs.remove(pos).1);
        }
        index.and_then(|i| self.positional.get(i).cloned())
    }

    /// Reject leftover keywords and check the positional count.
    fn finish(&self, min: usize, max: usize) -> EvalResult<()> {
        if let Some((key, _)) = self.kwargs.first() {
            return Err(type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                self.name, key
            )));
        }
        let n = self.positional.len();
        if n >= min && n <= max {
            return Ok(());
        }
        let plural = |count: usize| if count == 1 { "" } else { "s" };
        let message = if min == max {
            format!(
                "{}() takes exactly {} argument{} ({} given)",
                self.name,
                min,
                plural(min),
                n
            )
        } else if n < min {
            format!(
                "{}() takes at least {} argument{} ({} given)",
                self.name,
                min,
                plural(min),
                n
            )
        } else {
            format!(
                "{}() takes at most {} argument{} ({} given)",
                self.name,
                max,
                plural(max),
                n
            )
        };
        Err(type_error(message))
    }

    fn arg(&self, index: usize) -> &Value {
        &self.positional[index]
    }

    fn opt(&self, index: usize) -> Option<&Value> {
        self.positional.get(index).filter(|v| !v.is_none())
    }
}

fn int_arg(value: &Value) -> EvalResult<i64> {
    if let Value::LongInt(_) = value {
        return Err(Raised::new(
            ExcKind::OverflowError,
            "Python int too large to convert to C ssize_t",
        ));
    }
    value.as_int().ok_or_else(|| {
        type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    })
}

/// An integer argument of any size.
fn big_arg(value: &Value) -> EvalResult<BigInt> {
    long_int::to_big(value).ok_or_else(|| {
        type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    })
}

fn float_arg(value: &Value) -> EvalResult<f64> {
    if let Value::LongInt(n) = value {
        return long_int::to_f64(n);
    }
    value
        .as_float()
        .ok_or_else(|| type_error(format!("must be real number, not {}", value.type_name())))
}

fn str_arg<'v>(value: &'v Value, context: &str) -> EvalResult<&'v str> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(type_error(format!(
            "{} must be str, not {}",
            context,
            other.type_name()
        ))),
    }
}

fn float_to_int(value: f64) -> EvalResult {
    if value.is_nan() {
        return Err(value_error("cannot convert float NaN to integer"));
    }
    if value.is_infinite() {
        return Err(Raised::new(
            ExcKind::OverflowError,
            "cannot convert float infinity to integer",
        ));
    }
    if value >= 9.223_372_036_854_776e18 || value < -9.223_372_036_854_776e18 {
        return long_int::from_float(value)
            .map(long_int::into_value)
            .ok_or_else(|| value_error("cannot convert float to integer"));
    }
    Ok(Value::Int(value as i64))
}

fn checked_float(value: f64) -> EvalResult {
    if value.is_infinite() {
        return Err(range_error());
    }
    Ok(Value::Float(value))
}

/// Call a built-in function, type or `math` function.
pub(crate) fn call(
    interp: &mut Interpreter<'_>,
    builtin: Builtin,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> EvalResult {
    match builtin {
        Builtin::Function(function) => call_function(interp, function, args, kwargs),
        Builtin::Type(typ) => construct(interp, typ, args, kwargs),
        Builtin::Math(function) => call_math(interp, function, args, kwargs),
    }
}

fn call_function(
    interp: &mut Interpreter<'_>,
    function: BuiltinFunction,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> EvalResult {
    let mut a = CallArgs::new(function.name(), args, kwargs);
    match function {
        BuiltinFunction::Print => {
            let sep = a.take("sep", None);
            let end = a.take("end", None);
            a.take("flush", None);
            a.finish(0, usize::MAX)?;
            let sep = match &sep {
                None | Some(Value::None) => " ",
                Some(value) => str_arg(value, "sep")?,
            };
            let end = match &end {
                None | Some(Value::None) => "\n",
                Some(value) => str_arg(value, "end")?,
            };
            let mut line = String::new();
            for (i, value) in a.positional.iter().enumerate() {
                if i > 0 {
                    line.push_str(sep);
                }
                line.push_str(&interp.str_of(value)?);
            }
            line.push_str(end);
            interp.write_output(&line);
            Ok(Value::None)
        }
        BuiltinFunction::Len => {
            a.finish(1, 1)?;
            let len = interp.len_of(a.arg(0))?;
            Ok(Value::Int(len as i64))
        }
        BuiltinFunction::Repr => {
            a.finish(1, 1)?;
            Ok(Value::str(interp.repr(a.arg(0))?))
        }
        BuiltinFunction::Isinstance => {
            a.finish(2, 2)?;
            Ok(Value::Bool(interp.is_instance(a.arg(0), a.arg(1))?))
        }
        BuiltinFunction::Issubclass => {
            a.finish(2, 2)?;
            Ok(Value::Bool(is_subclass(a.arg(0), a.arg(1))?))
        }
        BuiltinFunction::Abs => {
            a.finish(1, 1)?;
            let value = a.arg(0);
            match value {
                Value::Float(f) => Ok(Value::Float(f.abs())),
                Value::Int(_) | Value::Bool(_) => {
                    let i = value.as_int().unwrap_or(0);
                    Ok(i.checked_abs()
                        .map_or_else(|| long_int::abs(&i.into()), Value::Int))
                }
                Value::LongInt(n) => Ok(long_int::abs(n)),
                _ => match interp.call_dunder(value, "__abs__", Vec::new())? {
                    Some(result) => Ok(result),
                    None => Err(type_error(format!(
                        "bad operand type for abs(): '{}'",
                        value.type_name()
                    ))),
                },
            }
        }
        BuiltinFunction::Min | BuiltinFunction::Max => {
            let key = a.take("key", None);
            let default = a.take("default", None);
            a.finish(1, usize::MAX)?;
            let items = if a.positional.len() == 1 {
                interp.iterate(a.arg(0))?
            } else {
                if default.is_some() {
                    return Err(type_error(format!(
                        "Cannot specify a default for {}() with multiple positional arguments",
                        a.name
                    )));
                }
                a.positional.clone()
            };
            let op = if function == BuiltinFunction::Min {
                CmpOp::Lt
            } else {
                CmpOp::Gt
            };
            extreme(interp, items, key.as_ref(), op)?
                .or(default)
                .ok_or_else(|| value_error(format!("{}() arg is an empty sequence", a.name)))
        }
        BuiltinFunction::Sum => {
            let start = a.take("start", Some(1));
            a.finish(1, 2)?;
            let mut total = start.unwrap_or(Value::Int(0));
            if let Value::Str(_) = total {
                return Err(type_error(
                    "sum() can't sum strings [use ''.join(seq) instead]",
                ));
            }
            let mut iter = interp.iter_of(a.arg(0))?;
            while let Some(item) = interp.next_item(&mut iter)? {
                total = interp.binary_op(BinOp::Add, &total, &item)?;
            }
            Ok(total)
        }
        BuiltinFunction::Sorted => {
            let key = a.take("key", None);
            let reverse = a.take("reverse", None);
            a.finish(1, 1)?;
            let items = interp.iterate(a.arg(0))?;
            let reverse = match reverse {
                Some(value) => interp.truthy(&value)?,
                None => false,
            };
            Ok(Value::list(interp.sort_values(items, key.as_ref(), reverse)?))
        }
        BuiltinFunction::Reversed => {
            a.finish(1, 1)?;
            let value = a.arg(0);
            if let Some(result) = interp.call_dunder(value, "__reversed__", Vec::new())? {
                return Ok(result);
            }
            if matches!(value, Value::Set(_)) {
                return Err(type_error("'set' object is not reversible"));
            }
            let mut items = interp.iterate(value)?;
            items.reverse();
            Ok(Value::list(items))
        }
        BuiltinFunction::Enumerate => {
            let start = a.take("start", Some(1));
            a.finish(1, 2)?;
            let start = match start {
                Some(value) => int_arg(&value)?,
                None => 0,
            };
            let items = interp.iterate(a.arg(0))?;
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                let index = start.checked_add(i as i64).ok_or_else(overflow)?;
                out.push(Value::tuple(vec![Value::Int(index), item]));
            }
            Ok(Value::list(out))
        }
        BuiltinFunction::Zip => {
            a.finish(0, usize::MAX)?;
            let mut columns = Vec::with_capacity(a.positional.len());
            for value in &a.positional {
                columns.push(interp.iterate(value)?);
            }
            let len = columns.iter().map(Vec::len).min().unwrap_or(0);
            let rows = (0..len)
                .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
                .collect();
            Ok(Value::list(rows))
        }
        BuiltinFunction::Map => {
            a.finish(2, usize::MAX)?;
            let func = a.arg(0).clone();
            let mut columns = Vec::new();
            for value in &a.positional[1..] {
                columns.push(interp.iterate(value)?);
            }
            let len = columns.iter().map(Vec::len).min().unwrap_or(0);
            let mut out = Vec::with_capacity(len);
            for i in 0..len {
                let call_args = columns.iter().map(|c| c[i].clone()).collect();
                out.push(interp.call(&func, call_args, Vec::new())?);
            }
            Ok(Value::list(out))
        }
        BuiltinFunction::Filter => {
            a.finish(2, 2)?;
            let func = a.arg(0).clone();
            let mut out = Vec::new();
            for item in interp.iterate(a.arg(1))? {
                let keep = if func.is_none() {
                    interp.truthy(&item)?
                } else {
                    let result = interp.call(&func, vec![item.clone()], Vec::new())?;
                    interp.truthy(&result)?
                };
                if keep {
                    out.push(item);
                }
            }
            Ok(Value::list(out))
        }
        BuiltinFunction::Any | BuiltinFunction::All => {
            a.finish(1, 1)?;
            let want = function == BuiltinFunction::Any;
            let mut iter = interp.iter_of(a.arg(0))?;
            while let Some(item) = interp.next_item(&mut iter)? {
                if interp.truthy(&item)? == want {
                    return Ok(Value::Bool(want));
                }
            }
            Ok(Value::Bool(!want))
        }
        BuiltinFunction::Round => {
            let ndigits = a.take("ndigits", Some(1));
            a.finish(1, 2)?;
            let ndigits = match ndigits {
                None | Some(Value::None) => None,
                Some(value) => Some(int_arg(&value)?),
            };
            round(interp, a.arg(0), ndigits)
        }
        BuiltinFunction::Hasattr => {
            a.finish(2, 2)?;
            let name = str_arg(a.arg(1), "attribute name")?;
            match interp.get_attr(a.arg(0), name) {
                Ok(_) => Ok(Value::Bool(true)),
                Err(raised) if raised.is(ExcKind::AttributeError) => Ok(Value::Bool(false)),
                Err(raised) => Err(raised),
            }
        }
        BuiltinFunction::Getattr => {
            a.finish(2, 3)?;
            let name = str_arg(a.arg(1), "attribute name")?;
            match (interp.get_attr(a.arg(0), name), a.positional.get(2)) {
                (Err(raised), Some(default)) if raised.is(ExcKind::AttributeError) => {
                    Ok(default.clone())
                }
                (result, _) => result,
            }
        }
        BuiltinFunction::Setattr => {
            a.finish(3, 3)?;
            let name = str_arg(a.arg(1), "attribute name")?;
            interp.set_attr(a.arg(0), name, a.arg(2).clone())?;
            Ok(Value::None)
        }
        BuiltinFunction::Delattr => {
            a.finish(2, 2)?;
            let name = str_arg(a.arg(1), "attribute name")?;
            interp.del_attr(a.arg(0), name)?;
            Ok(Value::None)
        }
        BuiltinFunction::Callable => {
            a.finish(1, 1)?;
            let callable = match a.arg(0) {
                Value::Function(_)
                | Value::Builtin(_)
                | Value::BoundMethod(_)
                | Value::NativeMethod(_)
                | Value::Class(_)
                | Value::StaticMethod(_) => true,
                Value::Instance(inst) => inst.class.lookup("__call__").is_some(),
                _ => false,
            };
            Ok(Value::Bool(callable))
        }
        BuiltinFunction::Divmod => {
            a.finish(2, 2)?;
            let quotient = interp.binary_op(BinOp::FloorDiv, a.arg(0), a.arg(1))?;
            let remainder = interp.binary_op(BinOp::Mod, a.arg(0), a.arg(1))?;
            Ok(Value::tuple(vec![quotient, remainder]))
        }
        BuiltinFunction::Pow => {
            let modulus = a.take("mod", Some(2));
            a.finish(2, 3)?;
            match modulus {
                None | Some(Value::None) => interp.binary_op(BinOp::Pow, a.arg(0), a.arg(1)),
                Some(modulus) => {
                    let (base, exp, modulus) =
                        (big_arg(a.arg(0))?, big_arg(a.arg(1))?, big_arg(&modulus)?);
                    long_int::mod_pow(&base, &exp, &modulus)
                }
            }
        }
        BuiltinFunction::Chr => {
            a.finish(1, 1)?;
            let code = int_arg(a.arg(0))?;
            u32::try_from(code)
                .ok()
                .and_then(char::from_u32)
                .map(|c| Value::str(c.to_string()))
                .ok_or_else(|| value_error("chr() arg not in range(0x110000)"))
        }
        BuiltinFunction::Ord => {
            a.finish(1, 1)?;
            match a.arg(0) {
                Value::Str(s) => {
                    let mut chars = s.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => Ok(Value::Int(i64::from(u32::from(c)))),
                        _ => Err(type_error(format!(
                            "ord() expected a character, but string of length {} found",
                            s.chars().count()
                        ))),
                    }
                }
                other => Err(type_error(format!(
                    "ord() expected string of length 1, but {} found",
                    other.type_name()
                ))),
            }
        }
        BuiltinFunction::Id => {
            a.finish(1, 1)?;
            let value = a.arg(0);
            let id = match value.identity() {
                Some(addr) => addr as i64,
                None => {
                    let key = interp.hash_key(value)?;
                    hash_of(&key) & i64::MAX
                }
            };
            Ok(Value::Int(id))
        }
        BuiltinFunction::Hash => {
            a.finish(1, 1)?;
            let key = interp.hash_key(a.arg(0))?;
            Ok(Value::Int(match key {
                HashKey::Int(i) | HashKey::Custom(i) => i,
                HashKey::LongInt(n) => long_int::hash(&n),
                HashKey::None => 0,
                other => hash_of(&other),
            }))
        }
        BuiltinFunction::Hex | BuiltinFunction::Oct | BuiltinFunction::Bin => {
            a.finish(1, 1)?;
            let value = big_arg(a.arg(0))?;
            let (prefix, radix) = match function {
                BuiltinFunction::Hex => ("0x", 16),
                BuiltinFunction::Oct => ("0o", 8),
                _ => ("0b", 2),
            };
            let sign = if value.is_negative() { "-" } else { "" };
            let digits = value.magnitude().to_str_radix(radix);
            Ok(Value::str(format!("{}{}{}", sign, prefix, digits)))
        }
        BuiltinFunction::Format => {
            a.finish(1, 2)?;
            let spec = match a.positional.get(1) {
                Some(value) => str_arg(value, "format spec")?.to_string(),
                None => String::new(),
            };
            Ok(Value::str(interp.format_value(a.arg(0), &spec)?))
        }
        BuiltinFunction::ExceptionInit => {
            let Some((receiver, rest)) = a.positional.split_first() else {
                return Err(type_error("__init__() needs an instance"));
            };
            if let Some((key, _)) = a.kwargs.first() {
                return Err(type_error(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    receiver.type_name(),
                    key
                )));
            }
            if let Value::Instance(inst) = receiver {
                inst.attrs
                    .lock()
                    .insert("args".to_string(), Value::tuple(rest.to_vec()));
            }
            Ok(Value::None)
        }
    }
}

fn hash_of(key: &HashKey) -> i64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish() as i64
}

fn is_subclass(class: &Value, typ: &Value) -> EvalResult<bool> {
    match (class, typ) {
        (_, Value::Tuple(items)) => {
            for item in items.iter() {
                if is_subclass(class, item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        (Value::Class(a), Value::Class(b)) => Ok(a.is_subclass_of(b)),
        (Value::Class(_), Value::Builtin(Builtin::Type(t))) => Ok(*t == BuiltinType::Object),
        (Value::Builtin(Builtin::Type(a)), Value::Builtin(Builtin::Type(b))) => Ok(a == b
            || *b == BuiltinType::Object
            || (*a == BuiltinType::Bool && *b == BuiltinType::Int)),
        (Value::Builtin(Builtin::Type(_)), Value::Class(_)) => Ok(false),
        (Value::Class(_) | Value::Builtin(Builtin::Type(_)), _) => Err(type_error(
            "issubclass() arg 2 must be a class, a tuple of classes, or a union",
        )),
        _ => Err(type_error("issubclass() arg 1 must be a class")),
    }
}

fn extreme(
    interp: &mut Interpreter<'_>,
    items: Vec<Value>,
    key: Option<&Value>,
    op: CmpOp,
) -> EvalResult<Option<Value>> {
    let key = key.filter(|k| !k.is_none());
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let item_key = match key {
            Some(func) => interp.call(func, vec![item.clone()], Vec::new())?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_key, _)) => interp.compare(op, &item_key, best_key)?,
        };
        if replace {
            best = Some((item_key, item));
        }
    }
    Ok(best.map(|(_, item)| item))
}

fn round(interp: &mut Interpreter<'_>, value: &Value, ndigits: Option<i64>) -> EvalResult {
    match value {
        Value::Int(_) | Value::Bool(_) | Value::LongInt(_) => {
            let x = long_int::to_big(value).unwrap_or_default();
            match ndigits {
                Some(n) if n < 0 => Ok(round_integer(&x, n.unsigned_abs())),
                _ => Ok(long_int::into_value(x)),
            }
        }
        Value::Float(f) => match ndigits {
            None => float_to_int(round_half_even(*f)),
            Some(n) => Ok(Value::Float(round_float(*f, n))),
        },
        _ => {
            let args = ndigits.map(Value::Int).into_iter().collect();
            match interp.call_dunder(value, "__round__", args)? {
                Some(result) => Ok(result),
                None => Err(type_error(format!(
                    "type {} doesn't define __round__ method",
                    value.type_name()
                ))),
            }
        }
    }
}

/// Round `x` to a multiple of `10**places`, ties to even.
fn round_integer(x: &BigInt, places: u64) -> Value {
    if places > x.bits() {
        return Value::Int(0);
    }
    let Ok(places) = u32::try_from(places) else {
        return Value::Int(0);
    };
    let p = BigInt::from(10).pow(places);
    let (q, r) = x.div_mod_floor(&p);
    let twice = &r * 2;
    let q = if twice > p || (twice == p && q.is_odd()) {
        q + 1
    } else {
        q
    };
    long_int::into_value(q * p)
}

fn round_float(x: f64, ndigits: i64) -> f64 {
    if !x.is_finite() || ndigits > 320 {
        return x;
    }
    if ndigits >= 0 {
        return format!("{:.*}", ndigits as usize, x).parse().unwrap_or(x);
    }
    if ndigits < -308 {
        return 0.0 * x.signum();
    }
    let p = 10f64.powi((-ndigits) as i32);
    round_half_even(x / p) * p
}

/// Parse the text form of an integer as `int(text, base)` does.
pub(crate) fn parse_int(text: &str, base: i64) -> EvalResult {
    let invalid = || {
        value_error(format!(
            "invalid literal for int() with base {}: {}",
            base,
            quote_str(text)
        ))
    };
    if base != 0 && !(2..=36).contains(&base) {
        return Err(value_error("int() base must be >= 2 and <= 36, or 0"));
    }
    let trimmed = text.trim();
    let (negative, body) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let lower = body.to_ascii_lowercase();
    let prefixed = [("0x", 16), ("0o", 8), ("0b", 2)]
        .into_iter()
        .find(|(prefix, radix)| lower.starts_with(prefix) && (base == 0 || base == *radix));
    let (radix, digits) = match prefixed {
        Some((prefix, radix)) => (radix, &lower[prefix.len()..]),
        None => {
            let leading_zero = lower.len() > 1 && lower.starts_with('0');
            if base == 0 && leading_zero && !lower.trim_matches(['0', '_']).is_empty() {
                return Err(invalid());
            }
            (if base == 0 { 10 } else { base }, lower.as_str())
        }
    };
    let digits = if prefixed.is_some() {
        digits.strip_prefix('_').unwrap_or(digits)
    } else {
        digits
    };
    if digits.is_empty()
        || digits.starts_with('_')
        || digits.ends_with('_')
        || digits.contains("__")
        || !digits.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(invalid());
    }
    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    if !cleaned.chars().all(|c| c.is_digit(radix as u32)) {
        return Err(invalid());
    }
    let magnitude = long_int::parse(&cleaned, radix as u32).ok_or_else(invalid)?;
    Ok(long_int::into_value(if negative { -magnitude } else { magnitude }))
}

/// Parse the text form of a float as `float(text)` does.
pub(crate) fn parse_float(text: &str) -> EvalResult<f64> {
    let invalid = || value_error(format!("could not convert string to float: {}", quote_str(text)));
    let trimmed = text.trim();
    let lower = trimmed.to_ascii_lowercase();
    let (sign, body) = match lower.as_bytes().first() {
        Some(b'-') => (-1.0, &lower[1..]),
        Some(b'+') => (1.0, &lower[1..]),
        _ => (1.0, lower.as_str()),
    };
    match body {
        "inf" | "infinity" => return Ok(sign * f64::INFINITY),
        "nan" => return Ok(f64::NAN),
        _ => {}
    }
    if body.is_empty()
        || body.starts_with('_')
        || body.ends_with('_')
        || body.contains("__")
        || !body
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | '+' | '-' | '_'))
    {
        return Err(invalid());
    }
    let cleaned: String = body.chars().filter(|c| *c != '_').collect();
    cleaned.parse::<f64>().map(|f| sign * f).map_err(|_| invalid())
}

fn construct(
    interp: &mut Interpreter<'_>,
    typ: BuiltinType,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> EvalResult {
    let mut a = CallArgs::new(typ.name(), args, kwargs);
    match typ {
        BuiltinType::Object => {
            a.finish(0, 0)?;
            Ok(Value::Instance(Arc::new(Instance::new(object_class()))))
        }
        BuiltinType::Int => {
            let base = a.take("base", Some(1));
            a.finish(0, 2)?;
            let Some(value) = a.positional.first() else {
                return Ok(Value::Int(0));
            };
            if let Some(base) = base {
                let base = int_arg(&base)?;
                let text = match value {
                    Value::Str(s) => s,
                    _ => return Err(type_error("int() can't convert non-string with explicit base")),
                };
                return parse_int(text, base);
            }
            match value {
                Value::Int(i) => Ok(Value::Int(*i)),
                Value::LongInt(_) => Ok(value.clone()),
                Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
                Value::Float(f) => float_to_int(f.trunc()),
                Value::Str(s) => parse_int(s, 10),
                _ => {
                    for hook in ["__int__", "__index__"] {
                        if let Some(result) = interp.call_dunder(value, hook, Vec::new())? {
                            return Ok(result);
                        }
                    }
                    Err(type_error(format!(
                        "int() argument must be a string, a bytes-like object or a real number, not '{}'",
                        value.type_name()
                    )))
                }
            }
        }
        BuiltinType::Float => {
            a.finish(0, 1)?;
            let Some(value) = a.positional.first() else {
                return Ok(Value::Float(0.0));
            };
            match value {
                Value::Str(s) => parse_float(s).map(Value::Float),
                Value::Int(_) | Value::Bool(_) | Value::Float(_) => {
                    Ok(Value::Float(value.as_float().unwrap_or(0.0)))
                }
                Value::LongInt(n) => long_int::to_f64(n).map(Value::Float),
                _ => match interp.call_dunder(value, "__float__", Vec::new())? {
                    Some(result) => Ok(result),
                    None => Err(type_error(format!(
                        "float() argument must be a string or a real number, not '{}'",
                        value.type_name()
                    ))),
                },
            }
        }
        BuiltinType::Str => {
            a.finish(0, 1)?;
            match a.positional.first() {
                Some(value) => Ok(Value::str(interp.str_of(value)?)),
                None => Ok(Value::str("")),
            }
        }
        BuiltinType::Bool => {
            a.finish(0, 1)?;
            match a.positional.first() {
                Some(value) => Ok(Value::Bool(interp.truthy(value)?)),
                None => Ok(Value::Bool(false)),
            }
        }
        BuiltinType::List => {
            a.finish(0, 1)?;
            match a.positional.first() {
                Some(value) => Ok(Value::list(interp.iterate(value)?)),
                None => Ok(Value::list(Vec::new())),
            }
        }
        BuiltinType::Tuple => {
            a.finish(0, 1)?;
            match a.positional.first() {
                Some(value @ Value::Tuple(_)) => Ok(value.clone()),
                Some(value) => Ok(Value::tuple(interp.iterate(value)?)),
                None => Ok(Value::tuple(Vec::new())),
            }
        }
        BuiltinType::Dict => {
            let kwargs = std::mem::take(&mut a.kwargs);
            a.finish(0, 1)?;
            let dict = Shared::new(DictMap::new());
            if let Some(source) = a.positional.first() {
                dict_update(interp, &dict, source)?;
            }
            for (key, value) in kwargs {
                dict_set(interp, &dict, Value::str(key), value)?;
            }
            Ok(Value::Dict(dict))
        }
        BuiltinType::Set => {
            a.finish(0, 1)?;
            match a.positional.first() {
                Some(value) => {
                    let members = match value {
                        Value::Set(set) => set.snapshot(),
                        other => interp.set_members(other)?,
                    };
                    Ok(Value::set(members))
                }
                None => Ok(Value::set(SetMap::new())),
            }
        }
        BuiltinType::Range => {
            a.finish(1, 3)?;
            let ints: Vec<i64> = a.positional.iter().map(int_arg).collect::<EvalResult<_>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => (0, 0, 1),
            };
            if step == 0 {
                return Err(value_error("range() arg 3 must not be zero"));
            }
            Ok(Value::Range(Range { start, stop, step }))
        }
        BuiltinType::Type => {
            a.finish(1, 3)?;
            match a.positional.len() {
                1 => Ok(Interpreter::type_of(a.arg(0))),
                3 => new_class(a.arg(0), a.arg(1), a.arg(2)),
                _ => Err(type_error("type() takes 1 or 3 arguments")),
            }
        }
        BuiltinType::StaticMethod => {
            a.finish(1, 1)?;
            Ok(Value::StaticMethod(Arc::new(a.arg(0).clone())))
        }
        BuiltinType::ClassMethod => {
            a.finish(1, 1)?;
            Ok(Value::ClassMethod(Arc::new(a.arg(0).clone())))
        }
        BuiltinType::Property => {
            let getter = a.take("fget", Some(0));
            let setter = a.take("fset", Some(1));
            a.take("fdel", None);
            a.take("doc", None);
            a.finish(0, 2)?;
            Ok(Value::Property(Arc::new(Property {
                getter: getter.unwrap_or(Value::None),
                setter: setter.filter(|s| !s.is_none()),
            })))
        }
        BuiltinType::Super => {
            a.finish(0, 2)?;
            match a.positional.as_slice() {
                [Value::Class(class), receiver] => Ok(Value::Super(Arc::new(SuperProxy {
                    class: Arc::clone(class),
                    receiver: receiver.clone(),
                }))),
                [] => Err(Raised::new(ExcKind::RuntimeError, "super(): no arguments")),
                [first, ..] => Err(type_error(format!(
                    "super() argument 1 must be a type, not {}",
                    first.type_name()
                ))),
            }
        }
        other => Err(type_error(format!(
            "cannot create '{}' instances",
            other.name()
        ))),
    }
}

fn new_class(name: &Value, bases: &Value, namespace: &Value) -> EvalResult {
    let name = str_arg(name, "type.__new__() argument 1")?;
    let Value::Tuple(bases) = bases else {
        return Err(type_error("type.__new__() argument 2 must be tuple"));
    };
    let Value::Dict(namespace) = namespace else {
        return Err(type_error("type.__new__() argument 3 must be dict"));
    };
    let mut base_classes = Vec::new();
    for base in bases.iter() {
        match base {
            Value::Class(class) => base_classes.push(Arc::clone(class)),
            Value::Builtin(Builtin::Type(BuiltinType::Object)) => {}
            other => {
                return Err(type_error(format!(
                    "bases must be types, not '{}'",
                    other.type_name()
                )))
            }
        }
    }
    let mut attrs = HashMap::new();
    for (key, value) in namespace.snapshot().into_values() {
        if let Value::Str(key) = key {
            attrs.insert(key.to_string(), value);
        }
    }
    let class = Class::new(name, base_classes, attrs).map_err(type_error)?;
    Ok(Value::Class(Arc::new(class)))
}

fn dict_set(
    interp: &mut Interpreter<'_>,
    dict: &Shared<DictMap>,
    key: Value,
    value: Value,
) -> EvalResult<()> {
    let hash = interp.hash_key(&key)?;
    let mut map = dict.lock();
    match map.get_mut(&hash) {
        Some(pair) => pair.1 = value,
        None => {
            map.insert(hash, (key, value));
        }
    }
    Ok(())
}

fn dict_update(interp: &mut Interpreter<'_>, dict: &Shared<DictMap>, source: &Value) -> EvalResult<()> {
    if let Value::Dict(other) = source {
        let entries = other.snapshot();
        let mut map = dict.lock();
        for (hash, pair) in entries {
            match map.get_mut(&hash) {
                Some(existing) => existing.1 = pair.1,
                None => {
                    map.insert(hash, pair);
                }
            }
        }
        return Ok(());
    }
    for (index, item) in interp.iterate(source)?.into_iter().enumerate() {
        let pair = interp.iterate(&item).map_err(|_| {
            type_error(format!(
                "cannot convert dictionary update sequence element #{} to a sequence",
                index
            ))
        })?;
        let [key, value] = <[Value; 2]>::try_from(pair).map_err(|pair| {
            value_error(format!(
                "dictionary update sequence element #{} has length {}; 2 is required",
                index,
                pair.len()
            ))
        })?;
        dict_set(interp, dict, key, value)?;
    }
    Ok(())
}

// ----------------------------------------------------------------------
// math
// ----------------------------------------------------------------------

fn call_math(
    interp: &mut Interpreter<'_>,
    function: MathFunction,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> EvalResult {
    let mut a = CallArgs::new(function.name(), args, kwargs);
    let unary = |a: &CallArgs| -> EvalResult<f64> {
        a.finish(1, 1)?;
        float_arg(a.arg(0))
    };
    match function {
        MathFunction::Sqrt => {
            let x = unary(&a)?;
            if x < 0.0 {
                return Err(domain_error());
            }
            Ok(Value::Float(x.sqrt()))
        }
        MathFunction::Isqrt => {
            a.finish(1, 1)?;
            let n = big_arg(a.arg(0))?;
            if n.is_negative() {
                return Err(value_error("isqrt() argument must be nonnegative"));
            }
            Ok(long_int::into_value(n.sqrt()))
        }
        MathFunction::Floor | MathFunction::Ceil | MathFunction::Trunc => {
            a.finish(1, 1)?;
            let value = a.arg(0);
            if let Some(n) = long_int::to_big(value) {
                return Ok(long_int::into_value(n));
            }
            let x = float_arg(value)?;
            let rounded = match function {
                MathFunction::Floor => x.floor(),
                MathFunction::Ceil => x.ceil(),
                _ => x.trunc(),
            };
            float_to_int(rounded)
        }
        MathFunction::Fabs => Ok(Value::Float(unary(&a)?.abs())),
        MathFunction::Fmod => {
            a.finish(2, 2)?;
            let (x, y) = (float_arg(a.arg(0))?, float_arg(a.arg(1))?);
            if y == 0.0 || x.is_infinite() {
                return Err(domain_error());
            }
            Ok(Value::Float(x % y))
        }
        MathFunction::Exp => checked_float(unary(&a)?.exp()),
        MathFunction::Log => {
            a.finish(1, 2)?;
            let x = float_arg(a.arg(0))?;
            if x <= 0.0 {
                return Err(domain_error());
            }
            match a.positional.get(1) {
                None => Ok(Value::Float(x.ln())),
                Some(base) => {
                    let base = float_arg(base)?;
                    if base <= 0.0 {
                        return Err(domain_error());
                    }
                    let denominator = base.ln();
                    if denominator == 0.0 {
                        return Err(Raised::new(ExcKind::ZeroDivisionError, "float division by zero"));
                    }
                    Ok(Value::Float(x.ln() / denominator))
                }
            }
        }
        MathFunction::Log2 | MathFunction::Log10 => {
            let x = unary(&a)?;
            if x <= 0.0 {
                return Err(domain_error());
            }
            Ok(Value::Float(if function == MathFunction::Log2 {
                x.log2()
            } else {
                x.log10()
            }))
        }
        MathFunction::Pow => {
            a.finish(2, 2)?;
            let (x, y) = (float_arg(a.arg(0))?, float_arg(a.arg(1))?);
            if x == 0.0 && y < 0.0 {
                return Err(domain_error());
            }
            match float_pow(x, y) {
                Err(raised) if raised.is(ExcKind::OverflowError) => Err(range_error()),
                Err(raised) if raised.is(ExcKind::ValueError) => Err(domain_error()),
                other => other,
            }
        }
        MathFunction::Sin | MathFunction::Cos | MathFunction::Tan => {
            let x = unary(&a)?;
            if x.is_infinite() {
                return Err(domain_error());
            }
            Ok(Value::Float(match function {
                MathFunction::Sin => x.sin(),
                MathFunction::Cos => x.cos(),
                _ => x.tan(),
            }))
        }
        MathFunction::Asin | MathFunction::Acos => {
            let x = unary(&a)?;
            if !(-1.0..=1.0).contains(&x) {
                return Err(domain_error());
            }
            Ok(Value::Float(if function == MathFunction::Asin {
                x.asin()
            } else {
                x.acos()
            }))
        }
        MathFunction::Atan => Ok(Value::Float(unary(&a)?.atan())),
        MathFunction::Atan2 => {
            a.finish(2, 2)?;
            Ok(Value::Float(float_arg(a.arg(0))?.atan2(float_arg(a.arg(1))?)))
        }
        MathFunction::Hypot => {
            a.finish(0, usize::MAX)?;
            let mut total = 0.0f64;
            for value in &a.positional {
                total = total.hypot(float_arg(value)?);
            }
            Ok(Value::Float(total))
        }
        MathFunction::Degrees => Ok(Value::Float(unary(&a)?.to_degrees())),
        MathFunction::Radians => Ok(Value::Float(unary(&a)?.to_radians())),
        MathFunction::Copysign => {
            a.finish(2, 2)?;
            Ok(Value::Float(float_arg(a.arg(0))?.copysign(float_arg(a.arg(1))?)))
        }
        MathFunction::Gcd | MathFunction::Lcm => {
            a.finish(0, usize::MAX)?;
            let mut acc = BigInt::from(i64::from(function == MathFunction::Lcm));
            for value in &a.positional {
                let n = big_arg(value)?;
                acc = if function == MathFunction::Gcd {
                    acc.gcd(&n)
                } else {
                    acc.lcm(&n).abs()
                };
            }
            Ok(long_int::into_value(acc))
        }
        MathFunction::Factorial => {
            a.finish(1, 1)?;
            let n = int_arg(a.arg(0))?;
            if n < 0 {
                return Err(value_error("factorial() not defined for negative values"));
            }
            let mut result = BigInt::from(1);
            for k in 2..=n {
                result *= k;
                if result.bits() > long_int::MAX_BITS {
                    return Err(Raised::new(ExcKind::MemoryError, "integer result is too large"));
                }
            }
            Ok(long_int::into_value(result))
        }
        MathFunction::Comb | MathFunction::Perm => {
            let k = a.take("k", Some(1));
            a.finish(1, 2)?;
            let n = int_arg(a.arg(0))?;
            let k = match k {
                Some(value) if !value.is_none() => int_arg(&value)?,
                _ if function == MathFunction::Perm => n,
                _ => return Err(type_error("comb() takes exactly 2 arguments (1 given)")),
            };
            if n < 0 {
                return Err(value_error("n must be a non-negative integer"));
            }
            if k < 0 {
                return Err(value_error("k must be a non-negative integer"));
            }
            if k > n {
                return Ok(Value::Int(0));
            }
            let k = if function == MathFunction::Comb { k.min(n - k) } else { k };
            let mut result = BigInt::from(1);
            for i in 0..k {
                result *= n - i;
                if function == MathFunction::Comb {
                    result /= i + 1;
                }
                if result.bits() > long_int::MAX_BITS {
                    return Err(Raised::new(ExcKind::MemoryError, "integer result is too large"));
                }
            }
            Ok(long_int::into_value(result))
        }
        MathFunction::Fsum => {
            a.finish(1, 1)?;
            let mut partials: Vec<f64> = Vec::new();
            for item in interp.iterate(a.arg(0))? {
                let mut x = float_arg(&item)?;
                let mut kept = 0;
                for j in 0..partials.len() {
                    let mut y = partials[j];
                    if x.abs() < y.abs() {
                        std::mem::swap(&mut x, &mut y);
                    }
                    let hi = x + y;
                    let lo = y - (hi - x);
                    if lo != 0.0 {
                        partials[kept] = lo;
                        kept += 1;
                    }
                    x = hi;
                }
                partials.truncate(kept);
                partials.push(x);
            }
            Ok(Value::Float(partials.iter().sum()))
        }
        MathFunction::Prod => {
            let start = a.take("start", None);
            a.finish(1, 1)?;
            let mut total = start.unwrap_or(Value::Int(1));
            for item in interp.iterate(a.arg(0))? {
                total = interp.binary_op(BinOp::Mul, &total, &item)?;
            }
            Ok(total)
        }
        MathFunction::Isclose => {
            let rel_tol = a.take("rel_tol", None);
            let abs_tol = a.take("abs_tol", None);
            a.finish(2, 2)?;
            let (x, y) = (float_arg(a.arg(0))?, float_arg(a.arg(1))?);
            let rel_tol = rel_tol.as_ref().map(float_arg).transpose()?.unwrap_or(1e-9);
            let abs_tol = abs_tol.as_ref().map(float_arg).transpose()?.unwrap_or(0.0);
            if rel_tol < 0.0 || abs_tol < 0.0 {
                return Err(value_error("tolerances must be non-negative"));
            }
            if x == y {
                return Ok(Value::Bool(true));
            }
            if x.is_infinite() || y.is_infinite() {
                return Ok(Value::Bool(false));
            }
            let diff = (x - y).abs();
            let close = diff <= (rel_tol * y).abs() || diff <= (rel_tol * x).abs() || diff <= abs_tol;
            Ok(Value::Bool(close))
        }
        MathFunction::Isnan => Ok(Value::Bool(unary(&a)?.is_nan())),
        MathFunction::Isinf => Ok(Value::Bool(unary(&a)?.is_infinite())),
        MathFunction::Isfinite => Ok(Value::Bool(unary(&a)?.is_finite())),
    }
}

// ----------------------------------------------------------------------
// Methods of built-in types
// ----------------------------------------------------------------------

const STR_METHODS: &[&str] = &[
    "upper", "lower", "capitalize", "title", "swapcase", "casefold", "strip", "lstrip",
    "rstrip", "split", "rsplit", "splitlines", "join", "replace", "startswith", "endswith",
    "find", "rfind", "index", "rindex", "count", "isdigit", "isdecimal", "isnumeric", "isalpha",
    "isalnum", "isspace", "isupper", "islower", "istitle", "center", "ljust", "rjust", "zfill",
    "partition", "rpartition", "format", "format_map", "removeprefix", "removesuffix",
];

const LIST_METHODS: &[&str] = &[
    "append", "extend", "insert", "remove", "pop", "clear", "index", "count", "sort", "reverse",
    "copy",
];

const DICT_METHODS: &[&str] = &[
    "keys", "values", "items", "get", "pop", "popitem", "setdefault", "update", "clear", "copy",
];

const SET_METHODS: &[&str] = &[
    "add", "remove", "discard", "pop", "clear", "update", "union", "intersection",
    "difference", "symmetric_difference", "issubset", "issuperset", "isdisjoint", "copy",
    "intersection_update", "difference_update",
];

const SEQUENCE_METHODS: &[&str] = &["index", "count"];

/// Whether `receiver` has a native method called `name`.
pub(crate) fn has_method(receiver: &Value, name: &str) -> bool {
    let methods: &[&str] = match receiver {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Set(_) => SET_METHODS,
        Value::Tuple(_) | Value::Range(_) => SEQUENCE_METHODS,
        Value::Int(_) | Value::Bool(_) | Value::LongInt(_) => &["bit_length"],
        Value::Float(_) => &["is_integer"],
        Value::Property(_) => &["setter", "getter"],
        _ => &[],
    };
    methods.contains(&name)
}

/// Call a native method on a built-in value.
pub(crate) fn call_method(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> EvalResult {
    let mut a = CallArgs::new(format!("{}.{}", receiver.type_name(), name), args, kwargs);
    match receiver {
        Value::Str(s) => str_method(interp, s, name, &mut a),
        Value::List(list) => list_method(interp, list, name, &mut a),
        Value::Dict(dict) => dict_method(interp, dict, name, &mut a),
        Value::Set(set) => set_method(interp, set, name, &mut a),
        Value::Tuple(items) => sequence_method(interp, items, name, &mut a),
        Value::Range(range) => range_method(range, name, &mut a),
        Value::Int(_) | Value::Bool(_) | Value::LongInt(_) if name == "bit_length" => {
            a.finish(0, 0)?;
            let bits = long_int::to_big(receiver).map_or(0, |n| n.bits());
            Ok(Value::Int(i64::try_from(bits).unwrap_or(i64::MAX)))
        }
        Value::Float(f) if name == "is_integer" => {
            a.finish(0, 0)?;
            Ok(Value::Bool(f.is_finite() && f.fract() == 0.0))
        }
        Value::Property(property) => {
            a.finish(1, 1)?;
            let func = a.arg(0).clone();
            let property = match name {
                "setter" => Property {
                    getter: property.getter.clone(),
                    setter: Some(func),
                },
                _ => Property {
                    getter: func,
                    setter: property.setter.clone(),
                },
            };
            Ok(Value::Property(Arc::new(property)))
        }
        other => Err(Raised::new(
            ExcKind::AttributeError,
            format!("'{}' object has no attribute '{}'", other.type_name(), name),
        )),
    }
}

fn char_to_byte(s: &str, index: usize) -> usize {
    s.char_indices().nth(index).map_or(s.len(), |(b, _)| b)
}

/// Resolve optional `start`/`end` arguments into a char range.
fn char_range(a: &CallArgs, first: usize, len: usize) -> EvalResult<(usize, usize)> {
    let adjust = |value: Option<&Value>, default: usize| -> EvalResult<usize> {
        let Some(value) = value else { return Ok(default) };
        let i = int_arg(value)?;
        let len = len as i64;
        Ok((if i < 0 { (i + len).max(0) } else { i.min(len) }) as usize)
    };
    Ok((adjust(a.opt(first), 0)?, adjust(a.opt(first + 1), len)?))
}

fn strip_chars<'s>(s: &'s str, chars: Option<&Value>, left: bool, right: bool) -> EvalResult<&'s str> {
    let set: Option<Vec<char>> = match chars {
        None => None,
        Some(value) => Some(str_arg(value, "strip arg")?.chars().collect()),
    };
    let matches = |c: char| match &set {
        None => c.is_whitespace(),
        Some(set) => set.contains(&c),
    };
    let mut out = s;
    if left {
        out = out.trim_start_matches(matches);
    }
    if right {
        out = out.trim_end_matches(matches);
    }
    Ok(out)
}

fn split_whitespace(s: &str, maxsplit: i64, from_right: bool) -> Vec<Value> {
    if maxsplit < 0 {
        return s.split_whitespace().map(Value::str).collect();
    }
    let mut parts = Vec::new();
    let mut rest = if from_right { s.trim_end() } else { s.trim_start() };
    while !rest.is_empty() {
        if parts.len() as i64 == maxsplit {
            parts.push(rest.to_string());
            break;
        }
        if from_right {
            match rest.rfind(char::is_whitespace) {
                Some(pos) => {
                    let ws_len = rest[pos..].chars().next().map_or(1, char::len_utf8);
                    parts.push(rest[pos + ws_len..].to_string());
                    rest = rest[..pos].trim_end();
                }
                None => {
                    parts.push(rest.to_string());
                    break;
                }
            }
        } else {
            match rest.find(char::is_whitespace) {
                Some(pos) => {
                    parts.push(rest[..pos].to_string());
                    rest = rest[pos..].trim_start();
                }
                None => {
                    parts.push(rest.to_string());
                    break;
                }
            }
        }
    }
    if from_right {
        parts.reverse();
    }
    parts.into_iter().map(Value::str).collect()
}

fn pad_str(s: &str, width: i64, fill: char, align: char) -> String {
    let len = s.chars().count() as i64;
    if width <= len {
        return s.to_string();
    }
    let pad = (width - len) as usize;
    let (left, right) = match align {
        '<' => (0, pad),
        '>' => (pad, 0),
        _ => {
            let left = pad / 2 + (pad & width as usize & 1);
            (left, pad - left)
        }
    };
    let fill = fill.to_string();
    format!("{}{}{}", fill.repeat(left), s, fill.repeat(right))
}

fn fill_char(value: Option<&Value>) -> EvalResult<char> {
    let Some(value) = value else { return Ok(' ') };
    let s = str_arg(value, "fill character")?;
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(type_error(
            "The fill character must be exactly one character long",
        )),
    }
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut previous_cased = false;
    for c in s.chars() {
        if previous_cased {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        previous_cased = c.is_alphabetic();
    }
    out
}

fn str_method(interp: &mut Interpreter<'_>, s: &Arc<str>, name: &str, a: &mut CallArgs) -> EvalResult {
    let text: &str = s;
    match name {
        "upper" | "lower" | "casefold" | "swapcase" | "capitalize" | "title" => {
            a.finish(0, 0)?;
            let out = match name {
                "upper" => text.to_uppercase(),
                "lower" | "casefold" => text.to_lowercase(),
                "swapcase" => text
                    .chars()
                    .flat_map(|c| -> Vec<char> {
                        if c.is_uppercase() {
                            c.to_lowercase().collect()
                        } else {
                            c.to_uppercase().collect()
                        }
                    })
                    .collect(),
                "capitalize" => {
                    let mut chars = text.chars();
                    match chars.next() {
                        Some(first) => first
                            .to_uppercase()
                            .chain(chars.as_str().to_lowercase().chars())
                            .collect(),
                        None => String::new(),
                    }
                }
                _ => title_case(text),
            };
            Ok(Value::str(out))
        }
        "strip" | "lstrip" | "rstrip" => {
            a.finish(0, 1)?;
            let left = name != "rstrip";
            let right = name != "lstrip";
            Ok(Value::str(strip_chars(text, a.opt(0), left, right)?))
        }
        "split" | "rsplit" => {
            let sep = a.take("sep", Some(0));
            let maxsplit = a.take("maxsplit", Some(1));
            a.finish(0, 2)?;
            let maxsplit = match maxsplit {
                Some(value) => int_arg(&value)?,
                None => -1,
            };
            let from_right = name == "rsplit";
            let parts = match sep.filter(|v| !v.is_none()) {
                None => split_whitespace(text, maxsplit, from_right),
                Some(sep) => {
                    let sep = str_arg(&sep, "separator")?;
                    if sep.is_empty() {
                        return Err(value_error("empty separator"));
                    }
                    let mut parts: Vec<Value> = match (maxsplit < 0, from_right) {
                        (true, _) => text.split(sep).map(Value::str).collect(),
                        (false, false) => text
                            .splitn(maxsplit as usize + 1, sep)
                            .map(Value::str)
                            .collect(),
                        (false, true) => text
                            .rsplitn(maxsplit as usize + 1, sep)
                            .map(Value::str)
                            .collect(),
                    };
                    if from_right && maxsplit >= 0 {
                        parts.reverse();
                    }
                    parts
                }
            };
            Ok(Value::list(parts))
        }
        "splitlines" => {
            let keepends = a.take("keepends", Some(0));
            a.finish(0, 1)?;
            let keepends = match keepends {
                Some(value) => interp.truthy(&value)?,
                None => false,
            };
            let mut lines = Vec::new();
            let mut current = String::new();
            let mut chars = text.chars().peekable();
            while let Some(c) = chars.next() {
                if c == '\n' || c == '\r' {
                    let mut ending = c.to_string();
                    if c == '\r' && chars.peek() == Some(&'\n') {
                        chars.next();
                        ending.push('\n');
                    }
                    if keepends {
                        current.push_str(&ending);
                    }
                    lines.push(Value::str(std::mem::take(&mut current)));
                } else {
                    current.push(c);
                }
            }
            if !current.is_empty() {
                lines.push(Value::str(current));
            }
            Ok(Value::list(lines))
        }
        "join" => {
            a.finish(1, 1)?;
            let items = interp.iterate(a.arg(0))?;
            let mut parts = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match item {
                    Value::Str(part) => parts.push(part.to_string()),
                    other => {
                        return Err(type_error(format!(
                            "sequence item {}: expected str instance, {} found",
                            i,
                            other.type_name()
                        )))
                    }
                }
            }
            Ok(Value::str(parts.join(text)))
        }
        "replace" => {
            let count = a.take("count", Some(2));
            a.finish(2, 3)?;
            let old = str_arg(a.arg(0), "replace() argument 1")?;
            let new = str_arg(a.arg(1), "replace() argument 2")?;
            let count = match count {
                Some(value) => int_arg(&value)?,
                None => -1,
            };
            let out = if count < 0 {
                text.replace(old, new)
            } else {
                text.replacen(old, new, count as usize)
            };
            Ok(Value::str(out))
        }
        "startswith" | "endswith" => {
            a.finish(1, 3)?;
            let len = text.chars().count();
            let (start, end) = char_range(a, 1, len)?;
            let window = if start <= end {
                &text[char_to_byte(text, start)..char_to_byte(text, end)]
            } else {
                ""
            };
            let candidates: Vec<Value> = match a.arg(0) {
                Value::Tuple(items) => items.to_vec(),
                other => vec![other.clone()],
            };
            for candidate in &candidates {
                let affix = str_arg(candidate, &format!("{} first arg", name))?;
                let hit = if name == "startswith" {
                    window.starts_with(affix)
                } else {
                    window.ends_with(affix)
                };
                if hit {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "find" | "rfind" | "index" | "rindex" | "count" => {
            a.finish(1, 3)?;
            let needle = str_arg(a.arg(0), "substring")?;
            let len = text.chars().count();
            let (start, end) = char_range(a, 1, len)?;
            if start > end {
                return match name {
                    "count" => Ok(Value::Int(0)),
                    "index" | "rindex" => Err(value_error("substring not found")),
                    _ => Ok(Value::Int(-1)),
                };
            }
            let (lo, hi) = (char_to_byte(text, start), char_to_byte(text, end));
            let window = &text[lo..hi];
            if name == "count" {
                let count = if needle.is_empty() {
                    window.chars().count() + 1
                } else {
                    window.matches(needle).count()
                };
                return Ok(Value::Int(count as i64));
            }
            let found = if name.starts_with('r') {
                window.rfind(needle)
            } else {
                window.find(needle)
            };
            match found {
                Some(byte) => Ok(Value::Int((start + window[..byte].chars().count()) as i64)),
                None if name.ends_with("index") => Err(value_error("substring not found")),
                None => Ok(Value::Int(-1)),
            }
        }
        "isdigit" | "isdecimal" | "isnumeric" | "isalpha" | "isalnum" | "isspace" => {
            a.finish(0, 0)?;
            let test: fn(char) -> bool = match name {
                "isdigit" | "isdecimal" => |c: char| c.is_ascii_digit(),
                "isnumeric" => char::is_numeric,
                "isalpha" => char::is_alphabetic,
                "isalnum" => char::is_alphanumeric,
                _ => char::is_whitespace,
            };
            Ok(Value::Bool(!text.is_empty() && text.chars().all(test)))
        }
        "isupper" | "islower" => {
            a.finish(0, 0)?;
            let has_upper = text.chars().any(char::is_uppercase);
            let has_lower = text.chars().any(char::is_lowercase);
            Ok(Value::Bool(if name == "isupper" {
                has_upper && !has_lower
            } else {
                has_lower && !has_upper
            }))
        }
        "istitle" => {
            a.finish(0, 0)?;
            Ok(Value::Bool(
                text.chars().any(char::is_alphabetic) && title_case(text) == text,
            ))
        }
        "center" | "ljust" | "rjust" => {
            a.finish(1, 2)?;
            let width = int_arg(a.arg(0))?;
            let fill = fill_char(a.positional.get(1))?;
            let align = match name {
                "ljust" => '<',
                "rjust" => '>',
                _ => '^',
            };
            if width <= text.chars().count() as i64 {
                return Ok(Value::str(text));
            }
            if width as usize > MAX_SEQUENCE {
                return Err(Raised::new(ExcKind::MemoryError, "width is too large"));
            }
            Ok(Value::str(pad_str(text, width, fill, align)))
        }
        "zfill" => {
            a.finish(1, 1)?;
            let width = int_arg(a.arg(0))?;
            let len = text.chars().count() as i64;
            if width <= len {
                return Ok(Value::str(text));
            }
            if width as usize > MAX_SEQUENCE {
                return Err(Raised::new(ExcKind::MemoryError, "width is too large"));
            }
            let zeros = "0".repeat((width - len) as usize);
            let out = match text.chars().next() {
                Some(sign @ ('+' | '-')) => format!("{}{}{}", sign, zeros, &text[1..]),
                _ => format!("{}{}", zeros, text),
            };
            Ok(Value::str(out))
        }
        "partition" | "rpartition" => {
            a.finish(1, 1)?;
            let sep = str_arg(a.arg(0), "separator")?;
            if sep.is_empty() {
                return Err(value_error("empty separator"));
            }
            let found = if name == "partition" {
                text.find(sep)
            } else {
                text.rfind(sep)
            };
            let parts = match found {
                Some(pos) => [&text[..pos], sep, &text[pos + sep.len()..]],
                None if name == "partition" => [text, "", ""],
                None => ["", "", text],
            };
            Ok(Value::tuple(parts.into_iter().map(Value::str).collect()))
        }
        "format" => {
            let kwargs = std::mem::take(&mut a.kwargs);
            let mut named = DictMap::new();
            for (key, value) in kwargs {
                named.insert(HashKey::Str(key.as_str().into()), (Value::str(key), value));
            }
            let positional = std::mem::take(&mut a.positional);
            Ok(Value::str(format_template(
                interp,
                text,
                &positional,
                &Value::dict(named),
            )?))
        }
        "format_map" => {
            a.finish(1, 1)?;
            Ok(Value::str(format_template(interp, text, &[], a.arg(0))?))
        }
        "removeprefix" | "removesuffix" => {
            a.finish(1, 1)?;
            let affix = str_arg(a.arg(0), name)?;
            let out = if name == "removeprefix" {
                text.strip_prefix(affix)
            } else {
                text.strip_suffix(affix)
            };
            Ok(Value::str(out.unwrap_or(text)))
        }
        _ => Err(Raised::new(
            ExcKind::AttributeError,
            format!("'str' object has no attribute '{}'", name),
        )),
    }
}

/// Render a `str.format` template.
fn format_template(
    interp: &mut Interpreter<'_>,
    template: &str,
    positional: &[Value],
    named: &Value,
) -> EvalResult<String> {
    let pieces = parse_format_string(template).map_err(value_error)?;
    let mut auto = 0usize;
    let mut manual = false;
    let mut out = String::new();

    for piece in pieces {
        let (field, conversion, spec) = match piece {
            FormatPiece::Literal(text) => {
                out.push_str(&text);
                continue;
            }
            FormatPiece::Field {
                name,
                conversion,
                spec,
            } => (name, conversion, spec),
        };

        let split = field.find(['.', '[']).unwrap_or(field.len());
        let (head, mut rest) = field.split_at(split);
        let mut value = if head.is_empty() {
            if manual {
                return Err(value_error(
                    "cannot switch from manual field specification to automatic field numbering",
                ));
            }
            let index = auto;
            auto += 1;
            positional.get(index).cloned().ok_or_else(|| {
                Raised::new(
                    ExcKind::IndexError,
                    format!(
                        "Replacement index {} out of range for positional args tuple",
                        index
                    ),
                )
            })?
        } else if let Ok(index) = head.parse::<usize>() {
            if auto > 0 {
                return Err(value_error(
                    "cannot switch from automatic field numbering to manual field specification",
                ));
            }
            manual = true;
            positional.get(index).cloned().ok_or_else(|| {
                Raised::new(
                    ExcKind::IndexError,
                    format!(
                        "Replacement index {} out of range for positional args tuple",
                        index
                    ),
                )
            })?
        } else {
            interp.get_item(named, &Value::str(head))?
        };

        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix('.') {
                let end = after.find(['.', '[']).unwrap_or(after.len());
                value = interp.get_attr(&value, &after[..end])?;
                rest = &after[end..];
            } else if let Some(after) = rest.strip_prefix('[') {
                let end = after
                    .find(']')
                    .ok_or_else(|| value_error("Missing ']' in format string"))?;
                let key = &after[..end];
                let key = match key.parse::<i64>() {
                    Ok(i) => Value::Int(i),
                    Err(_) => Value::str(key),
                };
                value = interp.get_item(&value, &key)?;
                rest = &after[end + 1..];
            } else {
                return Err(value_error(
                    "Only '.' or '[' may follow ']' in format field specifier",
                ));
            }
        }

        let value = match conversion {
            Some('r' | 'a') => Value::str(interp.repr(&value)?),
            Some('s') => Value::str(interp.str_of(&value)?),
            Some(other) => {
                return Err(value_error(format!(
                    "Unknown conversion specifier {}",
                    other
                )))
            }
            None => value,
        };
        let spec = if spec.contains('{') {
            format_template(interp, &spec, positional, named)?
        } else {
            spec
        };
        out.push_str(&interp.format_value(&value, &spec)?);
    }
    Ok(out)
}

fn list_method(
    interp: &mut Interpreter<'_>,
    list: &Shared<Vec<Value>>,
    name: &str,
    a: &mut CallArgs,
) -> EvalResult {
    match name {
        "append" => {
            a.finish(1, 1)?;
            list.lock().push(a.arg(0).clone());
            Ok(Value::None)
        }
        "extend" => {
            a.finish(1, 1)?;
            let items = interp.iterate(a.arg(0))?;
            list.lock().extend(items);
            Ok(Value::None)
        }
        "insert" => {
            a.finish(2, 2)?;
            let index = int_arg(a.arg(0))?;
            let mut items = list.lock();
            let len = items.len() as i64;
            let index = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.insert(index as usize, a.arg(1).clone());
            Ok(Value::None)
        }
        "remove" | "index" | "count" => {
            a.finish(1, if name == "index" { 3 } else { 1 })?;
            let items = list.snapshot();
            let (start, end) = if name == "index" {
                char_range(a, 1, items.len())?
            } else {
                (0, items.len())
            };
            let target = a.arg(0);
            let mut matches = Vec::new();
            for (i, item) in items.iter().enumerate().take(end).skip(start) {
                if item.is_same(target) || interp.equals(item, target)? {
                    matches.push(i);
                    if name != "count" {
                        break;
                    }
                }
            }
            match name {
                "count" => Ok(Value::Int(matches.len() as i64)),
                "index" => match matches.first() {
                    Some(i) => Ok(Value::Int(*i as i64)),
                    None => Err(value_error(format!(
                        "{} is not in list",
                        interp.repr(target)?
                    ))),
                },
                _ => {
                    let Some(&index) = matches.first() else {
                        return Err(value_error("list.remove(x): x not in list"));
                    };
                    let mut items = list.lock();
                    if index < items.len() {
                        items.remove(index);
                    }
                    Ok(Value::None)
                }
            }
        }
        "pop" => {
            a.finish(0, 1)?;
            let mut items = list.lock();
            if items.is_empty() {
                return Err(Raised::new(ExcKind::IndexError, "pop from empty list"));
            }
            let index = match a.positional.first() {
                Some(value) => seq_index(value, items.len(), "list").map_err(|raised| {
                    if raised.is(ExcKind::IndexError) {
                        Raised::new(ExcKind::IndexError, "pop index out of range")
                    } else {
                        raised
                    }
                })?,
                None => items.len() - 1,
            };
            Ok(items.remove(index))
        }
        "clear" => {
            a.finish(0, 0)?;
            list.lock().clear();
            Ok(Value::None)
        }
        "sort" => {
            let key = a.take("key", None);
            let reverse = a.take("reverse", None);
            a.finish(0, 0)?;
            let reverse = match reverse {
                Some(value) => interp.truthy(&value)?,
                None => false,
            };
            let items = list.snapshot();
            let sorted = interp.sort_values(items, key.as_ref(), reverse)?;
            *list.lock() = sorted;
            Ok(Value::None)
        }
        "reverse" => {
            a.finish(0, 0)?;
            list.lock().reverse();
            Ok(Value::None)
        }
        "copy" => {
            a.finish(0, 0)?;
            Ok(Value::list(list.snapshot()))
        }
        _ => Err(Raised::new(
            ExcKind::AttributeError,
            format!("'list' object has no attribute '{}'", name),
        )),
    }
}

fn dict_method(
    interp: &mut Interpreter<'_>,
    dict: &Shared<DictMap>,
    name: &str,
    a: &mut CallArgs,
) -> EvalResult {
    match name {
        "keys" | "values" | "items" => {
            a.finish(0, 0)?;
            let map = dict.lock();
            let out = map
                .values()
                .map(|(k, v)| match name {
                    "keys" => k.clone(),
                    "values" => v.clone(),
                    _ => Value::tuple(vec![k.clone(), v.clone()]),
                })
                .collect();
            Ok(Value::list(out))
        }
        "get" => {
            a.finish(1, 2)?;
            let key = interp.hash_key(a.arg(0))?;
            let found = dict.lock().get(&key).map(|(_, v)| v.clone());
            Ok(found.unwrap_or_else(|| a.positional.get(1).cloned().unwrap_or(Value::None)))
        }
        "pop" => {
            a.finish(1, 2)?;
            let key = interp.hash_key(a.arg(0))?;
            let removed = dict.lock().shift_remove(&key).map(|(_, v)| v);
            match (removed, a.positional.get(1)) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(Raised::with_args(ExcKind::KeyError, vec![a.arg(0).clone()])),
            }
        }
        "popitem" => {
            a.finish(0, 0)?;
            let popped = dict.lock().pop();
            popped
                .map(|(_, (k, v))| Value::tuple(vec![k, v]))
                .ok_or_else(|| Raised::new(ExcKind::KeyError, "popitem(): dictionary is empty"))
        }
        "setdefault" => {
            a.finish(1, 2)?;
            let key = interp.hash_key(a.arg(0))?;
            let default = a.positional.get(1).cloned().unwrap_or(Value::None);
            let mut map = dict.lock();
            let entry = map
                .entry(key)
                .or_insert_with(|| (a.arg(0).clone(), default));
            Ok(entry.1.clone())
        }
        "update" => {
            let kwargs = std::mem::take(&mut a.kwargs);
            a.finish(0, 1)?;
            if let Some(source) = a.positional.first() {
                dict_update(interp, dict, source)?;
            }
            for (key, value) in kwargs {
                dict_set(interp, dict, Value::str(key), value)?;
            }
            Ok(Value::None)
        }
        "clear" => {
            a.finish(0, 0)?;
            dict.lock().clear();
            Ok(Value::None)
        }
        "copy" => {
            a.finish(0, 0)?;
            Ok(Value::dict(dict.snapshot()))
        }
        _ => Err(Raised::new(
            ExcKind::AttributeError,
            format!("'dict' object has no attribute '{}'", name),
        )),
    }
}

fn set_method(
    interp: &mut Interpreter<'_>,
    set: &Shared<SetMap>,
    name: &str,
    a: &mut CallArgs,
) -> EvalResult {
    match name {
        "add" | "remove" | "discard" => {
            a.finish(1, 1)?;
            let item = a.arg(0).clone();
            let key = interp.hash_key(&item)?;
            let mut members = set.lock();
            match name {
                "add" => {
                    members.entry(key).or_insert(item);
                }
                "discard" => {
                    members.shift_remove(&key);
                }
                _ => {
                    if members.shift_remove(&key).is_none() {
                        return Err(Raised::with_args(ExcKind::KeyError, vec![item]));
                    }
                }
            }
            Ok(Value::None)
        }
        "pop" => {
            a.finish(0, 0)?;
            let popped = set.lock().shift_remove_index(0);
            popped
                .map(|(_, v)| v)
                .ok_or_else(|| Raised::new(ExcKind::KeyError, "pop from an empty set"))
        }
        "clear" => {
            a.finish(0, 0)?;
            set.lock().clear();
            Ok(Value::None)
        }
        "copy" => {
            a.finish(0, 0)?;
            Ok(Value::set(set.snapshot()))
        }
        "union" | "intersection" | "difference" | "symmetric_difference" | "update"
        | "intersection_update" | "difference_update" => {
            a.finish(0, usize::MAX)?;
            let op = match name {
                "union" | "update" => BinOp::BitOr,
                "intersection" | "intersection_update" => BinOp::BitAnd,
                "difference" | "difference_update" => BinOp::Sub,
                _ => BinOp::BitXor,
            };
            let mut result = set.snapshot();
            for other in &a.positional {
                let other = interp.set_members(other)?;
                result = set_operation(op, &result, &other);
            }
            if name.ends_with("update") {
                *set.lock() = result;
                Ok(Value::None)
            } else {
                Ok(Value::set(result))
            }
        }
        "issubset" | "issuperset" | "isdisjoint" => {
            a.finish(1, 1)?;
            let other = interp.set_members(a.arg(0))?;
            let mine = set.snapshot();
            Ok(Value::Bool(match name {
                "issubset" => mine.keys().all(|k| other.contains_key(k)),
                "issuperset" => other.keys().all(|k| mine.contains_key(k)),
                _ => !mine.keys().any(|k| other.contains_key(k)),
            }))
        }
        _ => Err(Raised::new(
            ExcKind::AttributeError,
            format!("'set' object has no attribute '{}'", name),
        )),
    }
}

fn sequence_method(
    interp: &mut Interpreter<'_>,
    items: &[Value],
    name: &str,
    a: &mut CallArgs,
) -> EvalResult {
    a.finish(1, if name == "index" { 3 } else { 1 })?;
    let target = a.arg(0);
    let (start, end) = if name == "index" {
        char_range(a, 1, items.len())?
    } else {
        (0, items.len())
    };
    let mut count = 0;
    for (i, item) in items.iter().enumerate().take(end).skip(start) {
        if item.is_same(target) || interp.equals(item, target)? {
            if name == "index" {
                return Ok(Value::Int(i as i64));
            }
            count += 1;
        }
    }
    if name == "index" {
        return Err(value_error("tuple.index(x): x not in tuple"));
    }
    Ok(Value::Int(count))
}

fn range_method(range: &Range, name: &str, a: &mut CallArgs) -> EvalResult {
    a.finish(1, 1)?;
    let hit = a.arg(0).as_int().filter(|i| range.contains(*i));
    match (name, hit) {
        ("count", hit) => Ok(Value::Int(i64::from(hit.is_some()))),
        (_, Some(i)) => Ok(Value::Int((i - range.start) / range.step)),
        (_, None) => Err(value_error(format!(
            "{} is not in range",
            a.arg(0).plain_repr()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{Engine, Scope, ScriptError};

    /// `repr` of a chunk's trailing value, or `Err(kind)` if it raised.
    fn eval(source: &str) -> Result<String, String> {
        let mut scope = Scope::new();
        match Engine::default().evaluate(source, &mut scope) {
            Ok(evaluation) => Ok(evaluation.repr.unwrap_or_default()),
            Err(ScriptError::Evaluation(e)) => Err(e.kind),
            Err(ScriptError::Parse(e)) => panic!("parse error in {:?}: {}", source, e),
        }
    }

    fn repr(source: &str) -> String {
        eval(source).unwrap_or_else(|kind| panic!("{:?} raised {}", source, kind))
    }

    #[test]
    fn test_parse_int_forms() {
        assert_eq!(parse_int("42", 10).unwrap(), Value::Int(42));
        assert_eq!(parse_int("  -7 ", 10).unwrap(), Value::Int(-7));
        assert_eq!(parse_int("1_000", 10).unwrap(), Value::Int(1000));
        assert_eq!(parse_int("ff", 16).unwrap(), Value::Int(255));
        assert_eq!(parse_int("0xff", 16).unwrap(), Value::Int(255));
        assert_eq!(parse_int("0b101", 0).unwrap(), Value::Int(5));
        assert_eq!(parse_int("-9223372036854775808", 10).unwrap(), Value::Int(i64::MIN));
        assert!(parse_int("12a", 10).unwrap_err().is(ExcKind::ValueError));
        assert!(parse_int("1__0", 10).is_err());
        assert!(parse_int("", 10).is_err());
        assert!(parse_int("+-5", 10).is_err());
        let Value::LongInt(big) = parse_int("99999999999999999999", 10).unwrap() else {
            panic!("expected a long integer");
        };
        assert_eq!(big.to_string(), "99999999999999999999");
    }

    #[test]
    fn test_parse_float_forms() {
        assert_eq!(parse_float("1.5").unwrap(), 1.5);
        assert_eq!(parse_float(" -2e3 ").unwrap(), -2000.0);
        assert!(parse_float("inf").unwrap().is_infinite());
        assert!(parse_float("-Infinity").unwrap() < 0.0);
        assert!(parse_float("nan").unwrap().is_nan());
        assert!(parse_float("abc").is_err());
    }

    #[test]
    fn test_round_float() {
        assert_eq!(round_float(2.675, 2), 2.67);
        assert_eq!(round_float(1234.5, -2), 1200.0);
    }

    #[test]
    fn test_mod_pow() {
        assert_eq!(mod_pow(4, 13, 497).unwrap(), 445);
        assert_eq!(mod_pow(-3, 3, 5).unwrap(), 3);
        assert!(mod_pow(2, 3, 0).is_err());
    }

    #[test]
    fn test_lookup() {
        assert!(matches!(
            lookup("len"),
            Some(Value::Builtin(Builtin::Function(BuiltinFunction::Len)))
        ));
        assert!(matches!(lookup("ValueError"), Some(Value::Class(_))));
        assert!(matches!(
            lookup("dict"),
            Some(Value::Builtin(Builtin::Type(BuiltinType::Dict)))
        ));
        assert!(lookup("__init__").is_none());
        assert!(lookup("NoneType").is_none());
        assert!(lookup("undefined_name").is_none());
    }

    #[test]
    fn test_math_module_attributes() {
        let Some(Value::Module(math)) = import_module("math") else {
            panic!("math module missing");
        };
        assert_eq!(math.attrs.get("pi"), Some(&Value::Float(std::f64::consts::PI)));
        assert!(math.attrs.contains_key("sqrt"));
        assert!(import_module("os").is_none());
    }

    #[test]
    fn test_has_method() {
        assert!(has_method(&Value::str("x"), "upper"));
        assert!(has_method(&Value::list(vec![]), "append"));
        assert!(!has_method(&Value::list(vec![]), "upper"));
        assert!(!has_method(&Value::Int(1), "append"));
    }

    #[test]
    fn test_pad_str_center_matches_reference_rounding() {
        assert_eq!(pad_str("ab", 5, '*', '^'), "*ab**");
        assert_eq!(pad_str("abc", 6, '*', '^'), "*abc**");
        assert_eq!(pad_str("a", 4, '-', '^'), "-a--");
    }

    #[test]
    fn test_split_whitespace_maxsplit() {
        let parts = split_whitespace("  a b  c ", 1, false);
        assert_eq!(parts, vec![Value::str("a"), Value::str("b  c ")]);
        let parts = split_whitespace("  a b  c ", 1, true);
        assert_eq!(parts, vec![Value::str("  a b"), Value::str("c")]);
    }

    #[test]
    fn test_padding_with_non_positive_width() {
        assert_eq!(repr("'abc'.center(-5)"), "'abc'");
        assert_eq!(repr("'abc'.ljust(-1)"), "'abc'");
        assert_eq!(repr("'abc'.rjust(0)"), "'abc'");
        assert_eq!(repr("'ab'.zfill(-3)"), "'ab'");
        assert_eq!(repr("'-7'.zfill(4)"), "'-007'");
        assert_eq!(repr("'ab'.center(6, '.')"), "'..ab..'");
        assert_eq!(repr("'ab'.rjust(4, '0')"), "'00ab'");
        assert_eq!(eval("'ab'.center(4, 'xy')"), Err("TypeError".into()));
    }

    #[test]
    fn test_str_search_and_split_methods() {
        assert_eq!(repr("'a,b,,c'.split(',')"), "['a', 'b', '', 'c']");
        assert_eq!(repr("'a,b,c'.rsplit(',', 1)"), "['a,b', 'c']");
        assert_eq!(repr("'  x  '.strip()"), "'x'");
        assert_eq!(repr("'xxhixx'.strip('x')"), "'hi'");
        assert_eq!(repr("'hello'.find('l')"), "2");
        assert_eq!(repr("'hello'.rfind('l')"), "3");
        assert_eq!(repr("'hello'.find('z')"), "-1");
        assert_eq!(eval("'hello'.index('z')"), Err("ValueError".into()));
        assert_eq!(repr("'banana'.count('an')"), "2");
        assert_eq!(repr("'a-b-c'.partition('-')"), "('a', '-', 'b-c')");
        assert_eq!(repr("'a-b-c'.rpartition('-')"), "('a-b', '-', 'c')");
        assert_eq!(repr("'line1\\nline2'.splitlines()"), "['line1', 'line2']");
        assert_eq!(repr("'hello'.startswith(('x', 'he'))"), "True");
        assert_eq!(repr("'hello'.endswith('lo')"), "True");
    }

    #[test]
    fn test_str_transform_methods() {
        assert_eq!(repr("'-'.join(['a', 'b', 'c'])"), "'a-b-c'");
        assert_eq!(eval("'-'.join([1, 2])"), Err("TypeError".into()));
        assert_eq!(repr("'aaa'.replace('a', 'b', 2)"), "'bba'");
        assert_eq!(repr("'hello world'.title()"), "'Hello World'");
        assert_eq!(repr("'hELLO'.capitalize()"), "'Hello'");
        assert_eq!(repr("'AbC'.swapcase()"), "'aBc'");
        assert_eq!(repr("'{} and {name}'.format(1, name='x')"), "'1 and x'");
        assert_eq!(repr("'123'.isdigit()"), "True");
        assert_eq!(repr("'abc1'.isalpha()"), "False");
        assert_eq!(repr("'Hello World'.istitle()"), "True");
    }

    #[test]
    fn test_list_methods() {
        assert_eq!(repr("x = [3, 1, 2]\nx.sort()\nx"), "[1, 2, 3]");
        assert_eq!(
            repr("x = ['bb', 'a', 'ccc']\nx.sort(key=len, reverse=True)\nx"),
            "['ccc', 'bb', 'a']"
        );
        assert_eq!(repr("x = [1, 2, 3]\nx.pop()\nx"), "[1, 2]");
        assert_eq!(repr("x = [1, 2, 3]\nx.pop(0)"), "1");
        assert_eq!(eval("[].pop()"), Err("IndexError".into()));
        assert_eq!(repr("x = [1, 3]\nx.insert(1, 2)\nx"), "[1, 2, 3]");
        assert_eq!(repr("x = [1, 2, 1]\nx.remove(1)\nx"), "[2, 1]");
        assert_eq!(eval("[1].remove(5)"), Err("ValueError".into()));
        assert_eq!(repr("x = [1]\nx.extend((2, 3))\nx"), "[1, 2, 3]");
        assert_eq!(repr("[1, 2, 2].count(2)"), "2");
        assert_eq!(repr("[5, 6, 7].index(7)"), "2");
        assert_eq!(repr("x = [1, 2]\nx.reverse()\nx"), "[2, 1]");
        assert_eq!(repr("x = [1, 2]\ny = x.copy()\ny.append(3)\nx"), "[1, 2]");
        assert_eq!(repr("x = [1, 2]\nx.clear()\nx"), "[]");
    }

    #[test]
    fn test_dict_methods() {
        assert_eq!(repr("{'a': 1}.get('b', 0)"), "0");
        assert_eq!(repr("{'a': 1}.get('b')"), "None");
        assert_eq!(repr("d = {}\nd.setdefault('k', []).append(1)\nd"), "{'k': [1]}");
        assert_eq!(repr("d = {'a': 1, 'b': 2}\nd.pop('a')\nd"), "{'b': 2}");
        assert_eq!(eval("{}.pop('x')"), Err("KeyError".into()));
        assert_eq!(repr("{}.pop('x', 5)"), "5");
        assert_eq!(repr("d = {'a': 1}\nd.update(b=2)\nd"), "{'a': 1, 'b': 2}");
        assert_eq!(repr("d = {'a': 1}\nd.update([('c', 3)])\nd"), "{'a': 1, 'c': 3}");
        assert_eq!(repr("list({'a': 1, 'b': 2}.items())"), "[('a', 1), ('b', 2)]");
        assert_eq!(repr("d = {'a': 1, 'b': 2}\nd.popitem()"), "('b', 2)");
    }

    #[test]
    fn test_set_methods() {
        assert_eq!(repr("s = {1}\ns.add(2)\nsorted(s)"), "[1, 2]");
        assert_eq!(repr("sorted({1, 2}.union({3}))"), "[1, 2, 3]");
        assert_eq!(repr("{1, 2, 3}.intersection({2, 3, 4}) == {2, 3}"), "True");
        assert_eq!(repr("{1, 2}.issubset({1, 2, 3})"), "True");
        assert_eq!(eval("set().remove(1)"), Err("KeyError".into()));
        assert_eq!(repr("s = {1}\ns.discard(5)\ns"), "{1}");
    }
}
