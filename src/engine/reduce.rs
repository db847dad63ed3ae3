// Copyright © 2024 Pathway

use ndarray::prelude::*;

use cfg_if::cfg_if;
use itertools::Itertools as _;
use ordered_float::OrderedFloat;
use std::cmp::Reverse;

use super::error::{DataError, DynResult};
use super::{Key, Value};

#[derive(Debug, Clone, Copy)]
pub enum Reducer {
    Count,
    Sum,
    IntSum,
    Unique,
    Min,
    ArgMin,
    Max,
    ArgMax,
    SortedTuple,
    Any,
}

impl Reducer {
    /// Folds the `(row key, value)` pairs of one group into a single value.
    ///
    /// Callers feed rows in ascending key order; reducers whose result can
    /// depend on the input order rely on it for determinism.
    pub fn reduce<'a>(
        &self,
        values: impl IntoIterator<Item = (Key, &'a Value)>,
    ) -> DynResult<Value> {
        match self {
            Self::Count => reduce_with(&CountReducer, values),
            Self::Sum => reduce_with(&SumReducer, values),
            Self::IntSum => reduce_with(&IntSumReducer, values),
            Self::Unique => reduce_with(&UniqueReducer, values),
            Self::Min => reduce_with(&MinReducer, values),
            Self::ArgMin => reduce_with(&ArgMinReducer, values),
            Self::Max => reduce_with(&MaxReducer, values),
            Self::ArgMax => reduce_with(&ArgMaxReducer, values),
            Self::SortedTuple => reduce_with(&SortedTupleReducer, values),
            Self::Any => reduce_with(&AnyReducer, values),
        }
    }
}

pub trait ReducerImpl: 'static {
    type State;

    fn init(&self, key: &Key, value: &Value) -> DynResult<Self::State>;

    fn combine(&self, state: &mut Self::State, other: Self::State) -> DynResult<()>;

    fn finish(&self, state: Self::State) -> Value;
}

fn reduce_with<'a, R: ReducerImpl>(
    reducer: &R,
    values: impl IntoIterator<Item = (Key, &'a Value)>,
) -> DynResult<Value> {
    let mut values = values.into_iter();
    let (key, value) = values.next().expect("group should not be empty");
    let mut state = reducer.init(&key, value)?;
    for (key, value) in values {
        let other = reducer.init(&key, value)?;
        reducer.combine(&mut state, other)?;
    }
    Ok(reducer.finish(state))
}

/// Counts the non-null values of the group.
#[derive(Debug, Clone, Copy)]
pub struct CountReducer;

impl ReducerImpl for CountReducer {
    type State = i64;

    fn init(&self, _key: &Key, value: &Value) -> DynResult<Self::State> {
        Ok(i64::from(*value != Value::None))
    }

    fn combine(&self, state: &mut Self::State, other: Self::State) -> DynResult<()> {
        *state += other;
        Ok(())
    }

    fn finish(&self, state: Self::State) -> Value {
        Value::Int(state)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IntSumReducer;

impl ReducerImpl for IntSumReducer {
    type State = i64;

    fn init(&self, _key: &Key, value: &Value) -> DynResult<Self::State> {
        Ok(value.as_int()?)
    }

    fn combine(&self, state: &mut Self::State, other: Self::State) -> DynResult<()> {
        *state += other;
        Ok(())
    }

    fn finish(&self, state: Self::State) -> Value {
        Value::Int(state)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SumReducer;

#[derive(Debug)]
pub enum SumState {
    Int(i64),
    Float(f64),
    IntArray(ArrayD<i64>),
    FloatArray(ArrayD<f64>),
}

impl SumState {
    fn new(value: &Value) -> DynResult<Self> {
        match value {
            Value::Int(i) => Ok(Self::Int(*i)),
            Value::Float(OrderedFloat(f)) => Ok(Self::Float(*f)),
            Value::IntArray(array) => Ok(Self::IntArray((**array).clone())),
            Value::FloatArray(array) => Ok(Self::FloatArray((**array).clone())),
            other => Err(DataError::TypeMismatch {
                expected: "summable value",
                value: other.clone(),
            }
            .into()),
        }
    }

    fn add(&mut self, rhs: Self) -> DynResult<()> {
        match (self, rhs) {
            (Self::Int(lhs), Self::Int(rhs)) => *lhs += rhs,
            (Self::Float(lhs), Self::Float(rhs)) => *lhs += rhs,
            (Self::IntArray(lhs), Self::IntArray(rhs)) => *lhs += &rhs,
            (Self::FloatArray(lhs), Self::FloatArray(rhs)) => *lhs += &rhs,
            _ => {
                return Err(DataError::ValueError(
                    "mixing types in sum is not allowed".to_string(),
                )
                .into())
            }
        }
        Ok(())
    }
}

impl From<SumState> for Value {
    fn from(state: SumState) -> Self {
        match state {
            SumState::Int(i) => Self::from(i),
            SumState::Float(f) => Self::from(f),
            SumState::IntArray(a) => Self::from(a),
            SumState::FloatArray(a) => Self::from(a),
        }
    }
}

impl ReducerImpl for SumReducer {
    type State = SumState;

    fn init(&self, _key: &Key, value: &Value) -> DynResult<Self::State> {
        SumState::new(value)
    }

    fn combine(&self, state: &mut Self::State, other: Self::State) -> DynResult<()> {
        state.add(other)
    }

    fn finish(&self, state: Self::State) -> Value {
        state.into()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UniqueReducer;

impl ReducerImpl for UniqueReducer {
    type State = Value;

    fn init(&self, _key: &Key, value: &Value) -> DynResult<Self::State> {
        Ok(value.clone())
    }

    fn combine(&self, state: &mut Self::State, other: Self::State) -> DynResult<()> {
        if *state != other {
            return Err(DataError::ValueError(
                "more than one distinct value passed to the unique reducer".to_string(),
            )
            .into());
        }
        Ok(())
    }

    fn finish(&self, state: Self::State) -> Value {
        state
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MinReducer;

impl ReducerImpl for MinReducer {
    type State = Value;

    fn init(&self, _key: &Key, value: &Value) -> DynResult<Self::State> {
        Ok(value.clone())
    }

    fn combine(&self, state: &mut Self::State, other: Self::State) -> DynResult<()> {
        if other < *state {
            *state = other;
        }
        Ok(())
    }

    fn finish(&self, state: Self::State) -> Value {
        state
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ArgMinReducer;

impl ReducerImpl for ArgMinReducer {
    type State = (Value, Key);

    fn init(&self, key: &Key, value: &Value) -> DynResult<Self::State> {
        Ok((value.clone(), *key))
    }

    fn combine(&self, state: &mut Self::State, other: Self::State) -> DynResult<()> {
        if other < *state {
            *state = other;
        }
        Ok(())
    }

    fn finish(&self, state: Self::State) -> Value {
        Value::Pointer(state.1)
    }
}

cfg_if! {
    if #[cfg(feature="yolo-id32")] {
        const SALT: u32 = 0xDE_AD_BE_EF_u32;
    } else if #[cfg(feature="yolo-id64")] {
        const SALT: u64 = 0xDE_AD_BE_EF_DE_AD_BE_EF_u64;
    } else {
        const SALT: u128 = 0xDE_AD_BE_EF_DE_AD_BE_EF_DE_AD_BE_EF_DE_AD_BE_EF_u128;
    }
}

/// Deterministically picks one value per group: the one attached to the
/// smallest salted key.
#[derive(Debug, Clone, Copy)]
pub struct AnyReducer;

impl ReducerImpl for AnyReducer {
    type State = (Key, Value);

    fn init(&self, key: &Key, value: &Value) -> DynResult<Self::State> {
        Ok((*key, value.clone()))
    }

    fn combine(&self, state: &mut Self::State, other: Self::State) -> DynResult<()> {
        let state_rank = (state.0.salted_with(SALT), &state.1);
        let other_rank = (other.0.salted_with(SALT), &other.1);
        if other_rank < state_rank {
            *state = other;
        }
        Ok(())
    }

    fn finish(&self, state: Self::State) -> Value {
        state.1
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MaxReducer;

impl ReducerImpl for MaxReducer {
    type State = Value;

    fn init(&self, _key: &Key, value: &Value) -> DynResult<Self::State> {
        Ok(value.clone())
    }

    fn combine(&self, state: &mut Self::State, other: Self::State) -> DynResult<()> {
        if other > *state {
            *state = other;
        }
        Ok(())
    }

    fn finish(&self, state: Self::State) -> Value {
        state
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ArgMaxReducer;

impl ReducerImpl for ArgMaxReducer {
    type State = (Value, Key);

    fn init(&self, key: &Key, value: &Value) -> DynResult<Self::State> {
        Ok((value.clone(), *key))
    }

    fn combine(&self, state: &mut Self::State, other: Self::State) -> DynResult<()> {
        // ties break toward the smaller key
        if (&other.0, Reverse(other.1)) > (&state.0, Reverse(state.1)) {
            *state = other;
        }
        Ok(())
    }

    fn finish(&self, state: Self::State) -> Value {
        Value::Pointer(state.1)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SortedTupleReducer;

impl ReducerImpl for SortedTupleReducer {
    type State = Vec<Value>;

    fn init(&self, _key: &Key, value: &Value) -> DynResult<Self::State> {
        Ok(vec![value.clone()])
    }

    fn combine(&self, state: &mut Self::State, other: Self::State) -> DynResult<()> {
        state.extend(other);
        Ok(())
    }

    fn finish(&self, state: Self::State) -> Value {
        state.into_iter().sorted().collect_vec().as_slice().into()
    }
}
