//! Integers outside the `i64` range.
//!
//! `Value::Int` holds every integer that fits in 64 bits. Arithmetic that
//! overflows is redone here on `BigInt`, and results are demoted back to
//! `Value::Int` whenever they fit, so `Value::LongInt` only ever holds values
//! outside the `i64` range.

use std::sync::Arc;

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{FromPrimitive, One, Signed, ToPrimitive, Zero};

use super::ast::BinOp;
use super::exceptions::{ExcKind, Raised};
use super::interpreter::EvalResult;
use super::value::Value;

/// Largest integer result, in bits. About 2.5 million decimal digits.
pub const MAX_BITS: u64 = 1 << 23;

/// Wrap a result, demoting it to `Value::Int` when it fits.
pub fn into_value(n: BigInt) -> Value {
    match n.to_i64() {
        Some(i) => Value::Int(i),
        None => Value::LongInt(Arc::new(n)),
    }
}

/// Any integer value (`bool`, `int` or a long integer) as a `BigInt`.
pub fn to_big(value: &Value) -> Option<BigInt> {
    match value {
        Value::Int(i) => Some(BigInt::from(*i)),
        Value::Bool(b) => Some(BigInt::from(u8::from(*b))),
        Value::LongInt(n) => Some(BigInt::clone(n)),
        _ => None,
    }
}

/// Integral part of a finite float.
pub fn from_float(f: f64) -> Option<BigInt> {
    BigInt::from_f64(f.trunc())
}

pub fn to_f64(n: &BigInt) -> EvalResult<f64> {
    n.to_f64()
        .filter(|f| f.is_finite())
        .ok_or_else(|| Raised::new(ExcKind::OverflowError, "int too large to convert to float"))
}

/// Parse digits (with an optional sign) in the given radix.
pub fn parse(digits: &str, radix: u32) -> Option<BigInt> {
    BigInt::parse_bytes(digits.as_bytes(), radix)
}

/// Digits in the given radix with a leading `-` for negatives and no prefix.
pub fn to_radix(n: &BigInt, radix: u32) -> String {
    n.to_str_radix(radix)
}

/// Hash of a long integer, reduced modulo the Mersenne prime `2**61 - 1`.
pub fn hash(n: &BigInt) -> i64 {
    const MODULUS: i64 = (1 << 61) - 1;
    let reduced = (n.abs() % BigInt::from(MODULUS)).to_i64().unwrap_or(0);
    let signed = if n.is_negative() { -reduced } else { reduced };
    if signed == -1 {
        -2
    } else {
        signed
    }
}

fn too_large() -> Raised {
    Raised::new(ExcKind::MemoryError, "integer result is too large")
}

fn check_bits(bits: Option<u64>) -> EvalResult<()> {
    match bits {
        Some(bits) if bits <= MAX_BITS => Ok(()),
        _ => Err(too_large()),
    }
}

fn nonzero(divisor: &BigInt) -> EvalResult<()> {
    if divisor.is_zero() {
        return Err(Raised::new(
            ExcKind::ZeroDivisionError,
            "integer division or modulo by zero",
        ));
    }
    Ok(())
}

/// Binary arithmetic on two integers of any size.
pub fn binary(op: BinOp, a: &BigInt, b: &BigInt) -> EvalResult {
    let value = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => {
            check_bits(a.bits().checked_add(b.bits()))?;
            a * b
        }
        BinOp::Div => return true_div(a, b).map(Value::Float),
        BinOp::FloorDiv => {
            nonzero(b)?;
            a.div_floor(b)
        }
        BinOp::Mod => {
            nonzero(b)?;
            a.mod_floor(b)
        }
        BinOp::Pow => return pow(a, b),
        BinOp::BitAnd => a & b,
        BinOp::BitOr => a | b,
        BinOp::BitXor => a ^ b,
        BinOp::LShift => shift_left(a, b)?,
        BinOp::RShift => shift_right(a, b)?,
    };
    Ok(into_value(value))
}

/// `a / b` as a float, precise even when the operands exceed the float range.
pub fn true_div(a: &BigInt, b: &BigInt) -> EvalResult<f64> {
    if b.is_zero() {
        return Err(Raised::new(ExcKind::ZeroDivisionError, "division by zero"));
    }
    if let (Ok(x), Ok(y)) = (to_f64(a), to_f64(b)) {
        return Ok(x / y);
    }
    let shift = a.bits().max(b.bits()).saturating_sub(1000);
    let shift = usize::try_from(shift).unwrap_or(usize::MAX);
    let x = (a >> shift).to_f64().unwrap_or(0.0);
    let y = (b >> shift).to_f64().unwrap_or(0.0);
    let quotient = x / y;
    if quotient.is_finite() {
        Ok(quotient)
    } else {
        Err(Raised::new(
            ExcKind::OverflowError,
            "integer division result too large for a float",
        ))
    }
}

pub fn pow(base: &BigInt, exp: &BigInt) -> EvalResult {
    if exp.is_negative() {
        if base.is_zero() {
            return Err(Raised::new(
                ExcKind::ZeroDivisionError,
                "0.0 cannot be raised to a negative power",
            ));
        }
        let e = exp.to_f64().unwrap_or(f64::NEG_INFINITY);
        return Ok(Value::Float(to_f64(base)?.powf(e)));
    }
    if exp.is_zero() || base.is_one() {
        return Ok(Value::Int(1));
    }
    if base.is_zero() {
        return Ok(Value::Int(0));
    }
    if *base == -BigInt::one() {
        return Ok(Value::Int(if exp.is_even() { 1 } else { -1 }));
    }
    let e = exp.to_u32().ok_or_else(too_large)?;
    check_bits(base.bits().checked_mul(u64::from(e)))?;
    Ok(into_value(base.pow(e)))
}

/// `pow(base, exp, modulus)`. A negative exponent uses the modular inverse.
pub fn mod_pow(base: &BigInt, exp: &BigInt, modulus: &BigInt) -> EvalResult {
    if modulus.is_zero() {
        return Err(Raised::new(
            ExcKind::ValueError,
            "pow() 3rd argument cannot be 0",
        ));
    }
    let (base, exp) = if exp.is_negative() {
        let inverse = base.mod_floor(modulus).extended_gcd(modulus);
        if !inverse.gcd.abs().is_one() {
            return Err(Raised::new(
                ExcKind::ValueError,
                "base is not invertible for the given modulus",
            ));
        }
        let x = if inverse.gcd.is_negative() {
            -inverse.x
        } else {
            inverse.x
        };
        (x, -exp)
    } else {
        (base.clone(), exp.clone())
    };
    // modpow rounds like mod_floor, so the result takes the sign of the modulus.
    Ok(into_value(base.modpow(&exp, modulus)))
}

fn shift_amount(b: &BigInt) -> EvalResult<Option<u64>> {
    if b.is_negative() {
        return Err(Raised::new(ExcKind::ValueError, "negative shift count"));
    }
    Ok(b.to_u64())
}

fn shift_left(a: &BigInt, b: &BigInt) -> EvalResult<BigInt> {
    let amount = shift_amount(b)?;
    if a.is_zero() {
        return Ok(BigInt::zero());
    }
    let amount = amount.ok_or_else(too_large)?;
    check_bits(a.bits().checked_add(amount))?;
    let amount = usize::try_from(amount).map_err(|_| too_large())?;
    Ok(a << amount)
}

fn shift_right(a: &BigInt, b: &BigInt) -> EvalResult<BigInt> {
    match shift_amount(b)? {
        Some(amount) if amount < a.bits() => {
            let amount = usize::try_from(amount).map_err(|_| too_large())?;
            Ok(a >> amount)
        }
        _ if a.is_negative() => Ok(-BigInt::one()),
        _ => Ok(BigInt::zero()),
    }
}

pub fn negate(n: &BigInt) -> Value {
    into_value(-n)
}

pub fn invert(n: &BigInt) -> Value {
    into_value(-n - BigInt::one())
}

pub fn abs(n: &BigInt) -> Value {
    into_value(n.abs())
}
