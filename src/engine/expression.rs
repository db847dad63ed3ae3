// Copyright © 2024 Pathway

#![allow(clippy::let_underscore_untyped)] // seems to trigger on Derivative-generated code
#![allow(clippy::module_name_repetitions)]

use std::ops::{Deref, Range};
use std::sync::Arc;

use arcstr::ArcStr;
use derivative::Derivative;
use itertools::Itertools;
use log::warn;
use ndarray::{ArrayD, Axis};
use num_integer::Integer;
use smallvec::SmallVec;

use super::error::{DataError, DynError, DynResult};
use super::time::{DateTimeNaive, DateTimeUtc, Duration};
use super::{Error, Key, Value};

#[derive(Debug)]
pub enum Expressions {
    Explicit(SmallVec<[Arc<Expression>; 2]>),
    AllArguments,
    Arguments(Range<usize>),
}

#[derive(Debug)]
pub enum MaybeOwnedValues<'a> {
    Owned(SmallVec<[Value; 2]>),
    Borrowed(&'a [Value]),
}

impl<'a> Deref for MaybeOwnedValues<'a> {
    type Target = [Value];

    fn deref(&self) -> &[Value] {
        match self {
            Self::Owned(values) => values,
            Self::Borrowed(values) => values,
        }
    }
}

impl Expressions {
    pub fn eval<'v>(&self, values: &'v [Value]) -> DynResult<MaybeOwnedValues<'v>> {
        match self {
            Self::Explicit(exprs) => Ok(MaybeOwnedValues::Owned(
                exprs.iter().map(|e| e.eval(values)).try_collect()?,
            )),
            Self::Arguments(range) => Ok(MaybeOwnedValues::Borrowed(&values[range.clone()])),
            Self::AllArguments => Ok(MaybeOwnedValues::Borrowed(values)),
        }
    }
}

// a run of consecutive argument references can borrow the input row instead
// of cloning it
fn consecutive_argument_range(source: &[Arc<Expression>]) -> Option<Range<usize>> {
    let mut exprs = source.iter();
    let Expression::Any(AnyExpression::Argument(first)) = **exprs.next()? else {
        return None;
    };
    let mut end = first + 1;
    for expr in exprs {
        let Expression::Any(AnyExpression::Argument(index)) = **expr else {
            return None;
        };
        if index != end {
            return None;
        }
        end = index + 1;
    }
    Some(first..end)
}

impl From<Vec<Arc<Expression>>> for Expressions {
    fn from(source: Vec<Arc<Expression>>) -> Self {
        match consecutive_argument_range(&source) {
            Some(range) => Self::Arguments(range),
            None => Self::Explicit(source.into()),
        }
    }
}

#[derive(Derivative)]
#[derivative(Debug)]
pub enum AnyExpression {
    Argument(usize),
    Const(Value),
    Apply(
        #[derivative(Debug = "ignore")] Box<dyn Fn(&[Value]) -> DynResult<Value> + Send + Sync>,
        Expressions,
    ),
    IfElse(Arc<Expression>, Arc<Expression>, Arc<Expression>),
    OptionalPointerFrom(Expressions),
    MakeTuple(Expressions),
    TupleGetItemChecked(Arc<Expression>, Arc<Expression>, Arc<Expression>),
    TupleGetItemUnchecked(Arc<Expression>, Arc<Expression>),
}

#[derive(Debug)]
pub enum BoolExpression {
    Const(bool),
    IsNone(Arc<Expression>),
    Not(Arc<Expression>),
    And(Arc<Expression>, Arc<Expression>),
    Or(Arc<Expression>, Arc<Expression>),
    Xor(Arc<Expression>, Arc<Expression>),
    IntEq(Arc<Expression>, Arc<Expression>),
    IntNe(Arc<Expression>, Arc<Expression>),
    IntLt(Arc<Expression>, Arc<Expression>),
    IntLe(Arc<Expression>, Arc<Expression>),
    IntGt(Arc<Expression>, Arc<Expression>),
    IntGe(Arc<Expression>, Arc<Expression>),
    FloatEq(Arc<Expression>, Arc<Expression>),
    FloatNe(Arc<Expression>, Arc<Expression>),
    FloatLt(Arc<Expression>, Arc<Expression>),
    FloatLe(Arc<Expression>, Arc<Expression>),
    FloatGt(Arc<Expression>, Arc<Expression>),
    FloatGe(Arc<Expression>, Arc<Expression>),
    StringEq(Arc<Expression>, Arc<Expression>),
    StringNe(Arc<Expression>, Arc<Expression>),
    StringLt(Arc<Expression>, Arc<Expression>),
    StringLe(Arc<Expression>, Arc<Expression>),
    StringGt(Arc<Expression>, Arc<Expression>),
    StringGe(Arc<Expression>, Arc<Expression>),
    PtrEq(Arc<Expression>, Arc<Expression>),
    PtrNe(Arc<Expression>, Arc<Expression>),
    DateTimeNaiveEq(Arc<Expression>, Arc<Expression>),
    DateTimeNaiveNe(Arc<Expression>, Arc<Expression>),
    DateTimeNaiveLt(Arc<Expression>, Arc<Expression>),
    DateTimeNaiveLe(Arc<Expression>, Arc<Expression>),
    DateTimeNaiveGt(Arc<Expression>, Arc<Expression>),
    DateTimeNaiveGe(Arc<Expression>, Arc<Expression>),
    DateTimeUtcEq(Arc<Expression>, Arc<Expression>),
    DateTimeUtcNe(Arc<Expression>, Arc<Expression>),
    DateTimeUtcLt(Arc<Expression>, Arc<Expression>),
    DateTimeUtcLe(Arc<Expression>, Arc<Expression>),
    DateTimeUtcGt(Arc<Expression>, Arc<Expression>),
    DateTimeUtcGe(Arc<Expression>, Arc<Expression>),
    DurationEq(Arc<Expression>, Arc<Expression>),
    DurationNe(Arc<Expression>, Arc<Expression>),
    DurationLt(Arc<Expression>, Arc<Expression>),
    DurationLe(Arc<Expression>, Arc<Expression>),
    DurationGt(Arc<Expression>, Arc<Expression>),
    DurationGe(Arc<Expression>, Arc<Expression>),
    Eq(Arc<Expression>, Arc<Expression>),
    Ne(Arc<Expression>, Arc<Expression>),
    CastFromFloat(Arc<Expression>),
    CastFromInt(Arc<Expression>),
    CastFromString(Arc<Expression>),
}

#[derive(Debug)]
pub enum IntExpression {
    Const(i64),
    Neg(Arc<Expression>),
    Add(Arc<Expression>, Arc<Expression>),
    Sub(Arc<Expression>, Arc<Expression>),
    Mul(Arc<Expression>, Arc<Expression>),
    FloorDiv(Arc<Expression>, Arc<Expression>),
    Mod(Arc<Expression>, Arc<Expression>),
    Pow(Arc<Expression>, Arc<Expression>),
    Lshift(Arc<Expression>, Arc<Expression>),
    Rshift(Arc<Expression>, Arc<Expression>),
    And(Arc<Expression>, Arc<Expression>),
    Or(Arc<Expression>, Arc<Expression>),
    Xor(Arc<Expression>, Arc<Expression>),
    DateTimeNaiveNanosecond(Arc<Expression>),
    DateTimeNaiveMicrosecond(Arc<Expression>),
    DateTimeNaiveMillisecond(Arc<Expression>),
    DateTimeNaiveSecond(Arc<Expression>),
    DateTimeNaiveMinute(Arc<Expression>),
    DateTimeNaiveHour(Arc<Expression>),
    DateTimeNaiveDay(Arc<Expression>),
    DateTimeNaiveMonth(Arc<Expression>),
    DateTimeNaiveYear(Arc<Expression>),
    DateTimeNaiveTimestamp(Arc<Expression>),
    DateTimeUtcNanosecond(Arc<Expression>),
    DateTimeUtcMicrosecond(Arc<Expression>),
    DateTimeUtcMillisecond(Arc<Expression>),
    DateTimeUtcSecond(Arc<Expression>),
    DateTimeUtcMinute(Arc<Expression>),
    DateTimeUtcHour(Arc<Expression>),
    DateTimeUtcDay(Arc<Expression>),
    DateTimeUtcMonth(Arc<Expression>),
    DateTimeUtcYear(Arc<Expression>),
    DateTimeUtcTimestamp(Arc<Expression>),
    DurationFloorDiv(Arc<Expression>, Arc<Expression>),
    DurationNanoseconds(Arc<Expression>),
    DurationMicroseconds(Arc<Expression>),
    DurationMilliseconds(Arc<Expression>),
    DurationSeconds(Arc<Expression>),
    DurationMinutes(Arc<Expression>),
    DurationHours(Arc<Expression>),
    DurationDays(Arc<Expression>),
    DurationWeeks(Arc<Expression>),
    CastFromBool(Arc<Expression>),
    CastFromFloat(Arc<Expression>),
    CastFromString(Arc<Expression>),
}

#[derive(Debug)]
pub enum FloatExpression {
    Const(f64),
    Neg(Arc<Expression>),
    Add(Arc<Expression>, Arc<Expression>),
    Sub(Arc<Expression>, Arc<Expression>),
    Mul(Arc<Expression>, Arc<Expression>),
    FloorDiv(Arc<Expression>, Arc<Expression>),
    TrueDiv(Arc<Expression>, Arc<Expression>),
    IntTrueDiv(Arc<Expression>, Arc<Expression>),
    Mod(Arc<Expression>, Arc<Expression>),
    Pow(Arc<Expression>, Arc<Expression>),
    DurationTrueDiv(Arc<Expression>, Arc<Expression>),
    CastFromBool(Arc<Expression>),
    CastFromInt(Arc<Expression>),
    CastFromString(Arc<Expression>),
}

#[derive(Debug)]
pub enum StringExpression {
    Add(Arc<Expression>, Arc<Expression>),
    Mul(Arc<Expression>, Arc<Expression>),
    CastFromBool(Arc<Expression>),
    CastFromFloat(Arc<Expression>),
    CastFromInt(Arc<Expression>),
    DateTimeNaiveStrftime(Arc<Expression>, Arc<Expression>),
    DateTimeUtcStrftime(Arc<Expression>, Arc<Expression>),
}

#[derive(Debug)]
pub enum PointerExpression {
    PointerFrom(Expressions),
}

#[derive(Debug)]
pub enum DateTimeNaiveExpression {
    AddDuration(Arc<Expression>, Arc<Expression>),
    SubDuration(Arc<Expression>, Arc<Expression>),
    Strptime(Arc<Expression>, Arc<Expression>),
    FromUtc(Arc<Expression>, Arc<Expression>),
    Round(Arc<Expression>, Arc<Expression>),
    Floor(Arc<Expression>, Arc<Expression>),
    FromTimestamp(Arc<Expression>, Arc<Expression>),
}

#[derive(Debug)]
pub enum DateTimeUtcExpression {
    AddDuration(Arc<Expression>, Arc<Expression>),
    SubDuration(Arc<Expression>, Arc<Expression>),
    Strptime(Arc<Expression>, Arc<Expression>),
    FromNaive(Arc<Expression>, Arc<Expression>),
    Round(Arc<Expression>, Arc<Expression>),
    Floor(Arc<Expression>, Arc<Expression>),
}

#[derive(Debug)]
pub enum DurationExpression {
    Neg(Arc<Expression>),
    Add(Arc<Expression>, Arc<Expression>),
    Sub(Arc<Expression>, Arc<Expression>),
    MulByInt(Arc<Expression>, Arc<Expression>),
    DivByInt(Arc<Expression>, Arc<Expression>),
    Mod(Arc<Expression>, Arc<Expression>),
    DateTimeNaiveSub(Arc<Expression>, Arc<Expression>),
    DateTimeUtcSub(Arc<Expression>, Arc<Expression>),
}

#[derive(Derivative)]
#[derivative(Debug)]
pub enum Expression {
    Bool(BoolExpression),
    Int(IntExpression),
    Float(FloatExpression),
    Pointer(PointerExpression),
    String(StringExpression),
    DateTimeNaive(DateTimeNaiveExpression),
    DateTimeUtc(DateTimeUtcExpression),
    Duration(DurationExpression),
    Any(AnyExpression),
}

macro_rules! cmp {
    ($lhs:ident $op:tt $rhs:ident, $eval_as:ident, $values:ident) => {
        Ok($lhs.$eval_as($values)? $op $rhs.$eval_as($values)?)
    };
}

macro_rules! field {
    ($e:ident.$method:ident, $eval_as:ident, $values:ident) => {
        Ok($e.$eval_as($values)?.$method())
    };
}

fn nonzero(divisor: i64) -> DynResult<i64> {
    if divisor == 0 {
        Err(DataError::DivisionByZero.into())
    } else {
        Ok(divisor)
    }
}

fn nonzero_float(divisor: f64) -> DynResult<f64> {
    if divisor == 0.0 {
        Err(DataError::DivisionByZero.into())
    } else {
        Ok(divisor)
    }
}

fn normalize_index(index: i64, length: usize) -> Option<usize> {
    let length = i64::try_from(length).ok()?;
    let index = if index < 0 { index + length } else { index };
    if (0..length).contains(&index) {
        Some(usize::try_from(index).unwrap())
    } else {
        None
    }
}

fn array_item<T>(array: &ArrayD<T>, index: i64) -> Option<Value>
where
    T: Clone,
    Value: From<T> + From<ArrayD<T>>,
{
    let index = normalize_index(index, array.shape()[0])?;
    let row = array.index_axis(Axis(0), index);
    if row.ndim() == 0 {
        Some(Value::from(row.first().unwrap().clone()))
    } else {
        Some(Value::from(row.to_owned()))
    }
}

fn eval_item(
    sequence: &Arc<Expression>,
    index: &Arc<Expression>,
    values: &[Value],
) -> DynResult<Option<Value>> {
    let index = index.eval_as_int(values)?;
    match sequence.eval(values)? {
        Value::Tuple(items) => Ok(normalize_index(index, items.len()).map(|i| items[i].clone())),
        Value::IntArray(array) => Ok(array_item(&array, index)),
        Value::FloatArray(array) => Ok(array_item(&array, index)),
        other => Err(DataError::ValueError(format!(
            "Can't get element at index {index} out of {other:?}"
        ))
        .into()),
    }
}

impl AnyExpression {
    pub fn eval(&self, values: &[Value]) -> DynResult<Value> {
        match self {
            Self::Argument(i) => Ok(values.get(*i).ok_or(DataError::IndexOutOfBounds)?.clone()),
            Self::Const(v) => Ok(v.clone()),
            Self::Apply(f, args) => f(&args.eval(values)?),
            Self::IfElse(condition, then, otherwise) => {
                if condition.eval_as_bool(values)? {
                    then.eval(values)
                } else {
                    otherwise.eval(values)
                }
            }
            Self::OptionalPointerFrom(args) => {
                let args = args.eval(values)?;
                if args.contains(&Value::None) {
                    Ok(Value::None)
                } else {
                    Ok(Value::from(Key::for_values(&args)))
                }
            }
            Self::MakeTuple(args) => {
                let args = args.eval(values)?;
                Ok(Value::Tuple((*args).into()))
            }
            Self::TupleGetItemChecked(sequence, index, default) => {
                match eval_item(sequence, index, values)? {
                    Some(entry) => Ok(entry),
                    None => default.eval(values),
                }
            }
            Self::TupleGetItemUnchecked(sequence, index) => eval_item(sequence, index, values)?
                .ok_or_else(|| DataError::IndexOutOfBounds.into()),
        }
    }
}

impl BoolExpression {
    #[allow(clippy::too_many_lines)]
    pub fn eval(&self, values: &[Value]) -> DynResult<bool> {
        match self {
            Self::Const(c) => Ok(*c),
            Self::IsNone(e) => Ok(matches!(e.eval(values)?, Value::None)),
            Self::Not(e) => Ok(!e.eval_as_bool(values)?),
            Self::And(lhs, rhs) => Ok(lhs.eval_as_bool(values)? && rhs.eval_as_bool(values)?),
            Self::Or(lhs, rhs) => Ok(lhs.eval_as_bool(values)? || rhs.eval_as_bool(values)?),
            Self::Xor(lhs, rhs) => cmp!(lhs ^ rhs, eval_as_bool, values),
            Self::IntEq(lhs, rhs) => cmp!(lhs == rhs, eval_as_int, values),
            Self::IntNe(lhs, rhs) => cmp!(lhs != rhs, eval_as_int, values),
            Self::IntLt(lhs, rhs) => cmp!(lhs < rhs, eval_as_int, values),
            Self::IntLe(lhs, rhs) => cmp!(lhs <= rhs, eval_as_int, values),
            Self::IntGt(lhs, rhs) => cmp!(lhs > rhs, eval_as_int, values),
            Self::IntGe(lhs, rhs) => cmp!(lhs >= rhs, eval_as_int, values),
            #[allow(clippy::float_cmp)]
            Self::FloatEq(lhs, rhs) => cmp!(lhs == rhs, eval_as_float, values),
            #[allow(clippy::float_cmp)]
            Self::FloatNe(lhs, rhs) => cmp!(lhs != rhs, eval_as_float, values),
            Self::FloatLt(lhs, rhs) => cmp!(lhs < rhs, eval_as_float, values),
            Self::FloatLe(lhs, rhs) => cmp!(lhs <= rhs, eval_as_float, values),
            Self::FloatGt(lhs, rhs) => cmp!(lhs > rhs, eval_as_float, values),
            Self::FloatGe(lhs, rhs) => cmp!(lhs >= rhs, eval_as_float, values),
            Self::StringEq(lhs, rhs) => cmp!(lhs == rhs, eval_as_string, values),
            Self::StringNe(lhs, rhs) => cmp!(lhs != rhs, eval_as_string, values),
            Self::StringLt(lhs, rhs) => cmp!(lhs < rhs, eval_as_string, values),
            Self::StringLe(lhs, rhs) => cmp!(lhs <= rhs, eval_as_string, values),
            Self::StringGt(lhs, rhs) => cmp!(lhs > rhs, eval_as_string, values),
            Self::StringGe(lhs, rhs) => cmp!(lhs >= rhs, eval_as_string, values),
            Self::PtrEq(lhs, rhs) => cmp!(lhs == rhs, eval_as_pointer, values),
            Self::PtrNe(lhs, rhs) => cmp!(lhs != rhs, eval_as_pointer, values),
            Self::DateTimeNaiveEq(lhs, rhs) => cmp!(lhs == rhs, eval_as_date_time_naive, values),
            Self::DateTimeNaiveNe(lhs, rhs) => cmp!(lhs != rhs, eval_as_date_time_naive, values),
            Self::DateTimeNaiveLt(lhs, rhs) => cmp!(lhs < rhs, eval_as_date_time_naive, values),
            Self::DateTimeNaiveLe(lhs, rhs) => cmp!(lhs <= rhs, eval_as_date_time_naive, values),
            Self::DateTimeNaiveGt(lhs, rhs) => cmp!(lhs > rhs, eval_as_date_time_naive, values),
            Self::DateTimeNaiveGe(lhs, rhs) => cmp!(lhs >= rhs, eval_as_date_time_naive, values),
            Self::DateTimeUtcEq(lhs, rhs) => cmp!(lhs == rhs, eval_as_date_time_utc, values),
            Self::DateTimeUtcNe(lhs, rhs) => cmp!(lhs != rhs, eval_as_date_time_utc, values),
            Self::DateTimeUtcLt(lhs, rhs) => cmp!(lhs < rhs, eval_as_date_time_utc, values),
            Self::DateTimeUtcLe(lhs, rhs) => cmp!(lhs <= rhs, eval_as_date_time_utc, values),
            Self::DateTimeUtcGt(lhs, rhs) => cmp!(lhs > rhs, eval_as_date_time_utc, values),
            Self::DateTimeUtcGe(lhs, rhs) => cmp!(lhs >= rhs, eval_as_date_time_utc, values),
            Self::DurationEq(lhs, rhs) => cmp!(lhs == rhs, eval_as_duration, values),
            Self::DurationNe(lhs, rhs) => cmp!(lhs != rhs, eval_as_duration, values),
            Self::DurationLt(lhs, rhs) => cmp!(lhs < rhs, eval_as_duration, values),
            Self::DurationLe(lhs, rhs) => cmp!(lhs <= rhs, eval_as_duration, values),
            Self::DurationGt(lhs, rhs) => cmp!(lhs > rhs, eval_as_duration, values),
            Self::DurationGe(lhs, rhs) => cmp!(lhs >= rhs, eval_as_duration, values),
            Self::Eq(lhs, rhs) => cmp!(lhs == rhs, eval, values),
            Self::Ne(lhs, rhs) => cmp!(lhs != rhs, eval, values),
            Self::CastFromInt(e) => Ok(e.eval_as_int(values)? != 0),
            Self::CastFromFloat(e) => Ok(e.eval_as_float(values)? != 0.0),
            Self::CastFromString(e) => Ok(!e.eval_as_string(values)?.is_empty()),
        }
    }
}

impl IntExpression {
    pub fn eval(&self, values: &[Value]) -> DynResult<i64> {
        match self {
            Self::Const(c) => Ok(*c),
            Self::Neg(e) => Ok(-e.eval_as_int(values)?),
            Self::Add(lhs, rhs) => cmp!(lhs + rhs, eval_as_int, values),
            Self::Sub(lhs, rhs) => cmp!(lhs - rhs, eval_as_int, values),
            Self::Mul(lhs, rhs) => cmp!(lhs * rhs, eval_as_int, values),
            Self::FloorDiv(lhs, rhs) => {
                let divisor = nonzero(rhs.eval_as_int(values)?)?;
                Ok(Integer::div_floor(&lhs.eval_as_int(values)?, &divisor))
            }
            Self::Mod(lhs, rhs) => {
                let divisor = nonzero(rhs.eval_as_int(values)?)?;
                Ok(Integer::mod_floor(&lhs.eval_as_int(values)?, &divisor))
            }
            #[allow(clippy::cast_possible_truncation)]
            #[allow(clippy::cast_sign_loss)]
            Self::Pow(lhs, rhs) => Ok(lhs
                .eval_as_int(values)?
                .pow(rhs.eval_as_int(values)? as u32)),
            Self::Lshift(lhs, rhs) => cmp!(lhs << rhs, eval_as_int, values),
            Self::Rshift(lhs, rhs) => cmp!(lhs >> rhs, eval_as_int, values),
            Self::And(lhs, rhs) => cmp!(lhs & rhs, eval_as_int, values),
            Self::Or(lhs, rhs) => cmp!(lhs | rhs, eval_as_int, values),
            Self::Xor(lhs, rhs) => cmp!(lhs ^ rhs, eval_as_int, values),
            Self::DateTimeNaiveNanosecond(e) => field!(e.nanosecond, eval_as_date_time_naive, values),
            Self::DateTimeNaiveMicrosecond(e) => {
                field!(e.microsecond, eval_as_date_time_naive, values)
            }
            Self::DateTimeNaiveMillisecond(e) => {
                field!(e.millisecond, eval_as_date_time_naive, values)
            }
            Self::DateTimeNaiveSecond(e) => field!(e.second, eval_as_date_time_naive, values),
            Self::DateTimeNaiveMinute(e) => field!(e.minute, eval_as_date_time_naive, values),
            Self::DateTimeNaiveHour(e) => field!(e.hour, eval_as_date_time_naive, values),
            Self::DateTimeNaiveDay(e) => field!(e.day, eval_as_date_time_naive, values),
            Self::DateTimeNaiveMonth(e) => field!(e.month, eval_as_date_time_naive, values),
            Self::DateTimeNaiveYear(e) => field!(e.year, eval_as_date_time_naive, values),
            Self::DateTimeNaiveTimestamp(e) => field!(e.timestamp, eval_as_date_time_naive, values),
            Self::DateTimeUtcNanosecond(e) => field!(e.nanosecond, eval_as_date_time_utc, values),
            Self::DateTimeUtcMicrosecond(e) => field!(e.microsecond, eval_as_date_time_utc, values),
            Self::DateTimeUtcMillisecond(e) => field!(e.millisecond, eval_as_date_time_utc, values),
            Self::DateTimeUtcSecond(e) => field!(e.second, eval_as_date_time_utc, values),
            Self::DateTimeUtcMinute(e) => field!(e.minute, eval_as_date_time_utc, values),
            Self::DateTimeUtcHour(e) => field!(e.hour, eval_as_date_time_utc, values),
            Self::DateTimeUtcDay(e) => field!(e.day, eval_as_date_time_utc, values),
            Self::DateTimeUtcMonth(e) => field!(e.month, eval_as_date_time_utc, values),
            Self::DateTimeUtcYear(e) => field!(e.year, eval_as_date_time_utc, values),
            Self::DateTimeUtcTimestamp(e) => field!(e.timestamp, eval_as_date_time_utc, values),
            Self::DurationFloorDiv(lhs, rhs) => {
                Ok((lhs.eval_as_duration(values)? / rhs.eval_as_duration(values)?)?)
            }
            Self::DurationNanoseconds(e) => field!(e.nanoseconds, eval_as_duration, values),
            Self::DurationMicroseconds(e) => field!(e.microseconds, eval_as_duration, values),
            Self::DurationMilliseconds(e) => field!(e.milliseconds, eval_as_duration, values),
            Self::DurationSeconds(e) => field!(e.seconds, eval_as_duration, values),
            Self::DurationMinutes(e) => field!(e.minutes, eval_as_duration, values),
            Self::DurationHours(e) => field!(e.hours, eval_as_duration, values),
            Self::DurationDays(e) => field!(e.days, eval_as_duration, values),
            Self::DurationWeeks(e) => field!(e.weeks, eval_as_duration, values),
            #[allow(clippy::cast_possible_truncation)]
            Self::CastFromFloat(e) => Ok(e.eval_as_float(values)? as i64),
            Self::CastFromBool(e) => Ok(i64::from(e.eval_as_bool(values)?)),
            Self::CastFromString(e) => {
                let value = e.eval(values)?;
                let trimmed = value.as_string()?.trim();
                trimmed.parse().map_err(|_| {
                    DynError::from(DataError::ParseError(format!(
                        "Cannot cast to int from {trimmed}.",
                    )))
                })
            }
        }
    }
}

impl FloatExpression {
    pub fn eval(&self, values: &[Value]) -> DynResult<f64> {
        match self {
            Self::Const(c) => Ok(*c),
            Self::Neg(e) => Ok(-e.eval_as_float(values)?),
            Self::Add(lhs, rhs) => cmp!(lhs + rhs, eval_as_float, values),
            Self::Sub(lhs, rhs) => cmp!(lhs - rhs, eval_as_float, values),
            Self::Mul(lhs, rhs) => cmp!(lhs * rhs, eval_as_float, values),
            Self::FloorDiv(lhs, rhs) => {
                let divisor = nonzero_float(rhs.eval_as_float(values)?)?;
                Ok((lhs.eval_as_float(values)? / divisor).floor())
            }
            Self::TrueDiv(lhs, rhs) => {
                let divisor = nonzero_float(rhs.eval_as_float(values)?)?;
                Ok(lhs.eval_as_float(values)? / divisor)
            }
            Self::Mod(lhs, rhs) => {
                // sign fixup matching Python's float modulo
                let dividend = lhs.eval_as_float(values)?;
                let divisor = nonzero_float(rhs.eval_as_float(values)?)?;
                let mut modulo = dividend % divisor;
                if modulo == 0.0 {
                    modulo = modulo.copysign(divisor);
                } else if (divisor < 0.0) != (modulo < 0.0) {
                    modulo += divisor;
                }
                Ok(modulo)
            }
            Self::Pow(lhs, rhs) => {
                let result = lhs.eval_as_float(values)?.powf(rhs.eval_as_float(values)?);
                if result.is_infinite() {
                    warn!("overflow encountered in power.");
                }
                Ok(result)
            }
            #[allow(clippy::cast_precision_loss)]
            Self::IntTrueDiv(lhs, rhs) => {
                let divisor = nonzero(rhs.eval_as_int(values)?)?;
                Ok(lhs.eval_as_int(values)? as f64 / divisor as f64)
            }
            Self::DurationTrueDiv(lhs, rhs) => Ok(lhs
                .eval_as_duration(values)?
                .true_div(rhs.eval_as_duration(values)?)?),
            Self::CastFromBool(e) => Ok(if e.eval_as_bool(values)? { 1.0 } else { 0.0 }),
            #[allow(clippy::cast_precision_loss)]
            Self::CastFromInt(e) => Ok(e.eval_as_int(values)? as f64),
            Self::CastFromString(e) => {
                let value = e.eval(values)?;
                let trimmed = value.as_string()?.trim();
                trimmed.parse().map_err(|_| {
                    DynError::from(DataError::ParseError(format!(
                        "Cannot cast to float from {value}."
                    )))
                })
            }
        }
    }
}

impl PointerExpression {
    pub fn eval(&self, values: &[Value]) -> DynResult<Key> {
        match self {
            Self::PointerFrom(args) => Ok(Key::for_values(&args.eval(values)?)),
        }
    }
}

impl StringExpression {
    pub fn eval(&self, values: &[Value]) -> DynResult<ArcStr> {
        match self {
            Self::Add(lhs, rhs) => {
                let lhs = lhs.eval_as_string(values)?;
                let rhs = rhs.eval_as_string(values)?;
                // reuse one of the inputs when the other adds nothing
                if lhs.is_empty() {
                    Ok(rhs)
                } else if rhs.is_empty() {
                    Ok(lhs)
                } else {
                    Ok(ArcStr::from([lhs, rhs].concat()))
                }
            }
            Self::Mul(lhs, rhs) => {
                let repeat = rhs.eval_as_int(values)?;
                match usize::try_from(repeat) {
                    Ok(repeat) => Ok(ArcStr::repeat(&lhs.eval_as_string(values)?, repeat)),
                    Err(_) => Ok(ArcStr::new()),
                }
            }
            Self::CastFromInt(e) => Ok(e.eval_as_int(values)?.to_string().into()),
            Self::CastFromFloat(e) => Ok(e.eval_as_float(values)?.to_string().into()),
            Self::CastFromBool(e) => Ok(if e.eval_as_bool(values)? {
                arcstr::literal!("True")
            } else {
                arcstr::literal!("False")
            }),
            Self::DateTimeNaiveStrftime(e, fmt) => Ok(ArcStr::from(
                e.eval_as_date_time_naive(values)?
                    .strftime(&fmt.eval_as_string(values)?),
            )),
            Self::DateTimeUtcStrftime(e, fmt) => Ok(ArcStr::from(
                e.eval_as_date_time_utc(values)?
                    .strftime(&fmt.eval_as_string(values)?),
            )),
        }
    }
}

impl DateTimeNaiveExpression {
    pub fn eval(&self, values: &[Value]) -> DynResult<DateTimeNaive> {
        match self {
            Self::AddDuration(lhs, rhs) => {
                Ok(lhs.eval_as_date_time_naive(values)? + rhs.eval_as_duration(values)?)
            }
            Self::SubDuration(lhs, rhs) => {
                Ok(lhs.eval_as_date_time_naive(values)? - rhs.eval_as_duration(values)?)
            }
            Self::Strptime(e, fmt) => Ok(DateTimeNaive::strptime(
                &e.eval_as_string(values)?,
                &fmt.eval_as_string(values)?,
            )?),
            Self::FromUtc(e, timezone) => Ok(e
                .eval_as_date_time_utc(values)?
                .to_naive_in_timezone(&timezone.eval_as_string(values)?)?),
            Self::Round(e, duration) => Ok(e
                .eval_as_date_time_naive(values)?
                .round(duration.eval_as_duration(values)?)),
            Self::Floor(e, duration) => Ok(e
                .eval_as_date_time_naive(values)?
                .truncate(duration.eval_as_duration(values)?)),
            Self::FromTimestamp(e, unit) => Ok(DateTimeNaive::from_timestamp(
                e.eval_as_int(values)?,
                &unit.eval_as_string(values)?,
            )?),
        }
    }
}

impl DateTimeUtcExpression {
    pub fn eval(&self, values: &[Value]) -> DynResult<DateTimeUtc> {
        match self {
            Self::AddDuration(lhs, rhs) => {
                Ok(lhs.eval_as_date_time_utc(values)? + rhs.eval_as_duration(values)?)
            }
            Self::SubDuration(lhs, rhs) => {
                Ok(lhs.eval_as_date_time_utc(values)? - rhs.eval_as_duration(values)?)
            }
            Self::Strptime(e, fmt) => Ok(DateTimeUtc::strptime(
                &e.eval_as_string(values)?,
                &fmt.eval_as_string(values)?,
            )?),
            Self::FromNaive(e, from_timezone) => Ok(e
                .eval_as_date_time_naive(values)?
                .to_utc_from_timezone(&from_timezone.eval_as_string(values)?)?),
            Self::Round(e, duration) => Ok(e
                .eval_as_date_time_utc(values)?
                .round(duration.eval_as_duration(values)?)),
            Self::Floor(e, duration) => Ok(e
                .eval_as_date_time_utc(values)?
                .truncate(duration.eval_as_duration(values)?)),
        }
    }
}

impl DurationExpression {
    pub fn eval(&self, values: &[Value]) -> DynResult<Duration> {
        match self {
            Self::Neg(e) => Ok(-e.eval_as_duration(values)?),
            Self::Add(lhs, rhs) => cmp!(lhs + rhs, eval_as_duration, values),
            Self::Sub(lhs, rhs) => cmp!(lhs - rhs, eval_as_duration, values),
            Self::MulByInt(lhs, rhs) => {
                Ok(lhs.eval_as_duration(values)? * rhs.eval_as_int(values)?)
            }
            Self::DivByInt(lhs, rhs) => {
                Ok((lhs.eval_as_duration(values)? / rhs.eval_as_int(values)?)?)
            }
            Self::Mod(lhs, rhs) => {
                Ok((lhs.eval_as_duration(values)? % rhs.eval_as_duration(values)?)?)
            }
            Self::DateTimeNaiveSub(lhs, rhs) => {
                cmp!(lhs - rhs, eval_as_date_time_naive, values)
            }
            Self::DateTimeUtcSub(lhs, rhs) => cmp!(lhs - rhs, eval_as_date_time_utc, values),
        }
    }
}

macro_rules! impl_eval_as {
    ($name:ident -> $ret:ty, $variant:ident, $cast:ident, $expected:literal) => {
        pub fn $name(&self, values: &[Value]) -> DynResult<$ret> {
            match self {
                Self::$variant(expr) => expr.eval(values),
                Self::Any(expr) => expr.eval(values)?.$cast(),
                _ => Err(self.type_error($expected)),
            }
        }
    };
}

impl Expression {
    pub fn eval(&self, values: &[Value]) -> DynResult<Value> {
        match self {
            Self::Bool(expr) => Ok(Value::from(expr.eval(values)?)),
            Self::Int(expr) => Ok(Value::from(expr.eval(values)?)),
            Self::Float(expr) => Ok(Value::from(expr.eval(values)?)),
            Self::Pointer(expr) => Ok(Value::from(expr.eval(values)?)),
            Self::String(expr) => Ok(Value::from(expr.eval(values)?)),
            Self::DateTimeNaive(expr) => Ok(Value::from(expr.eval(values)?)),
            Self::DateTimeUtc(expr) => Ok(Value::from(expr.eval(values)?)),
            Self::Duration(expr) => Ok(Value::from(expr.eval(values)?)),
            Self::Any(expr) => expr.eval(values),
        }
    }

    #[cold]
    #[inline(never)]
    fn type_error(&self, expected: &'static str) -> DynError {
        let actual = match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Pointer(_) => "pointer",
            Self::String(_) => "string",
            Self::DateTimeNaive(_) => "DateTimeNaive",
            Self::DateTimeUtc(_) => "DateTimeUtc",
            Self::Duration(_) => "Duration",
            Self::Any(_) => "unknown type",
        };
        DynError::from(Error::ColumnTypeMismatch { expected, actual })
    }

    impl_eval_as!(eval_as_bool -> bool, Bool, as_bool, "bool");
    impl_eval_as!(eval_as_int -> i64, Int, as_int, "int");
    impl_eval_as!(eval_as_float -> f64, Float, as_float, "float");
    impl_eval_as!(eval_as_pointer -> Key, Pointer, as_pointer, "pointer");
    impl_eval_as!(eval_as_date_time_naive -> DateTimeNaive, DateTimeNaive, as_date_time_naive, "DateTimeNaive");
    impl_eval_as!(eval_as_date_time_utc -> DateTimeUtc, DateTimeUtc, as_date_time_utc, "DateTimeUtc");
    impl_eval_as!(eval_as_duration -> Duration, Duration, as_duration, "Duration");

    pub fn eval_as_string(&self, values: &[Value]) -> DynResult<ArcStr> {
        match self {
            Self::String(expr) => expr.eval(values),
            Self::Any(expr) => Ok(expr.eval(values)?.as_string()?.clone()),
            _ => Err(self.type_error("string")),
        }
    }
}

macro_rules! expression_from {
    ($($inner:ty => $variant:ident),+ $(,)?) => {
        $(impl From<$inner> for Expression {
            fn from(expr: $inner) -> Self {
                Self::$variant(expr)
            }
        })+
    };
}

expression_from! {
    BoolExpression => Bool,
    IntExpression => Int,
    FloatExpression => Float,
    PointerExpression => Pointer,
    StringExpression => String,
    DateTimeNaiveExpression => DateTimeNaive,
    DateTimeUtcExpression => DateTimeUtc,
    DurationExpression => Duration,
    AnyExpression => Any,
}
