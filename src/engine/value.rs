// Copyright © 2024 Pathway

#![allow(clippy::non_canonical_partial_ord_impl)] // False positive with Derivative

use std::fmt::{self, Debug, Display};
use std::mem::{align_of, size_of};
use std::ops::Deref;
use std::sync::Arc;

use super::error::{DataError, DynError, DynResult};
use super::time::{DateTimeNaive, DateTimeUtc, Duration};

use arcstr::ArcStr;
use cfg_if::cfg_if;
use derivative::Derivative;
use itertools::Itertools as _;
use ndarray::ArrayD;
use once_cell::sync::Lazy;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::Xxh3 as Hasher;

cfg_if! {
    if #[cfg(feature="yolo-id32")] {
        pub type KeyImpl = u32;
    } else if #[cfg(feature="yolo-id64")] {
        pub type KeyImpl = u64;
    } else {
        pub type KeyImpl = u128;
    }
}

static EMPTY_TUPLE_KEY: Lazy<Key> = Lazy::new(|| Key::from_hasher(&Hasher::default()));

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(pub KeyImpl);

impl Key {
    pub(crate) fn from_hasher(hasher: &Hasher) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        Self(hasher.digest128() as KeyImpl)
    }

    pub fn for_value(value: &Value) -> Self {
        let mut hasher = Hasher::default();
        value.hash_into(&mut hasher);
        Self::from_hasher(&hasher)
    }

    pub fn for_values(values: &[Value]) -> Self {
        if values.is_empty() {
            return *EMPTY_TUPLE_KEY;
        }
        let mut hasher = Hasher::default();
        for value in values {
            value.hash_into(&mut hasher);
        }
        Self::from_hasher(&hasher)
    }

    #[must_use]
    pub fn salted_with(self, seed: KeyImpl) -> Self {
        Self(self.0 ^ seed)
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let encoded = base32::encode(base32::Alphabet::Crockford, &self.0.to_le_bytes());
        write!(f, "^{encoded}")
    }
}

impl Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

#[derive(Debug, Serialize, Deserialize, Derivative)]
#[derivative(PartialEq, Eq, PartialOrd, Ord, Hash)]
struct HandleInner<T> {
    key: Key,

    #[derivative(
        PartialEq = "ignore",
        PartialOrd = "ignore",
        Ord = "ignore",
        Hash = "ignore"
    )]
    data: T,
}

/// A shared value compared and hashed by the content hash of its data.
#[derive(Debug, Serialize, Deserialize, Derivative)]
#[derivative(
    Clone(bound = ""),
    PartialEq(bound = ""),
    Eq(bound = ""),
    PartialOrd(bound = ""),
    Ord(bound = ""),
    Hash(bound = "")
)]
pub struct Handle<T>(Arc<HandleInner<T>>);

impl<T: HashInto> Handle<T> {
    fn new(data: T) -> Self {
        let mut hasher = Hasher::default();
        data.hash_into(&mut hasher);
        let key = Key::from_hasher(&hasher);
        Self(Arc::new(HandleInner { key, data }))
    }
}

impl<T> Deref for Handle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0.data
    }
}

impl<T: Display> Display for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.data.fmt(f)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    Pointer(Key),
    String(ArcStr),
    Tuple(Arc<[Self]>),
    IntArray(Handle<ArrayD<i64>>),
    FloatArray(Handle<ArrayD<f64>>),
    DateTimeNaive(DateTimeNaive),
    DateTimeUtc(DateTimeUtc),
    Duration(Duration),
}

const _: () = assert!(align_of::<Value>() <= 16);
const _: () = assert!(size_of::<Value>() <= 32);

macro_rules! value_accessor {
    ($name:ident, $variant:ident -> $ret:ty, $expected:literal) => {
        pub fn $name(&self) -> DynResult<$ret> {
            if let Self::$variant(inner) = self {
                Ok(*inner)
            } else {
                Err(self.type_mismatch($expected))
            }
        }
    };
}

impl Value {
    #[inline(never)]
    #[cold]
    fn type_mismatch(&self, expected: &'static str) -> DynError {
        DynError::from(DataError::TypeMismatch {
            expected,
            value: self.clone(),
        })
    }

    value_accessor!(as_bool, Bool -> bool, "bool");
    value_accessor!(as_int, Int -> i64, "integer");
    value_accessor!(as_pointer, Pointer -> Key, "pointer");
    value_accessor!(as_date_time_naive, DateTimeNaive -> DateTimeNaive, "DateTimeNaive");
    value_accessor!(as_date_time_utc, DateTimeUtc -> DateTimeUtc, "DateTimeUtc");
    value_accessor!(as_duration, Duration -> Duration, "Duration");

    pub fn as_float(&self) -> DynResult<f64> {
        if let Self::Float(f) = self {
            Ok(f.into_inner())
        } else {
            Err(self.type_mismatch("float"))
        }
    }

    pub fn as_string(&self) -> DynResult<&ArcStr> {
        if let Self::String(s) = self {
            Ok(s)
        } else {
            Err(self.type_mismatch("string"))
        }
    }

    pub fn as_tuple(&self) -> DynResult<&Arc<[Self]>> {
        if let Self::Tuple(t) = self {
            Ok(t)
        } else {
            Err(self.type_mismatch("tuple"))
        }
    }

    #[must_use]
    pub fn simple_type(&self) -> SimpleType {
        match self {
            Self::None => SimpleType::None,
            Self::Bool(_) => SimpleType::Bool,
            Self::Int(_) => SimpleType::Int,
            Self::Float(_) => SimpleType::Float,
            Self::Pointer(_) => SimpleType::Pointer,
            Self::String(_) => SimpleType::String,
            Self::Tuple(_) => SimpleType::Tuple,
            Self::IntArray(_) => SimpleType::IntArray,
            Self::FloatArray(_) => SimpleType::FloatArray,
            Self::DateTimeNaive(_) => SimpleType::DateTimeNaive,
            Self::DateTimeUtc(_) => SimpleType::DateTimeUtc,
            Self::Duration(_) => SimpleType::Duration,
        }
    }
}

impl Display for Value {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::None => write!(fmt, "None"),
            Self::Bool(b) => write!(fmt, "{}", if *b { "True" } else { "False" }),
            Self::Int(i) => write!(fmt, "{i}"),
            Self::Float(OrderedFloat(f)) => write!(fmt, "{f:?}"),
            Self::Pointer(p) => write!(fmt, "{p}"),
            Self::String(s) => write!(fmt, "{s:?}"),
            Self::Tuple(vals) => write!(fmt, "({})", vals.iter().format(", ")),
            Self::IntArray(array) => write!(fmt, "{array}"),
            Self::FloatArray(array) => write!(fmt, "{array}"),
            Self::DateTimeNaive(date_time) => write!(fmt, "{date_time}"),
            Self::DateTimeUtc(date_time) => write!(fmt, "{date_time}"),
            Self::Duration(duration) => write!(fmt, "{duration}"),
        }
    }
}

macro_rules! value_from {
    ($($source:ty => $variant:ident),+ $(,)?) => {
        $(impl From<$source> for Value {
            fn from(inner: $source) -> Self {
                Self::$variant(inner)
            }
        })+
    };
}

value_from! {
    bool => Bool,
    i64 => Int,
    OrderedFloat<f64> => Float,
    Key => Pointer,
    ArcStr => String,
    DateTimeNaive => DateTimeNaive,
    DateTimeUtc => DateTimeUtc,
    Duration => Duration,
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(OrderedFloat(f))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.into())
    }
}

impl From<&[Value]> for Value {
    fn from(t: &[Value]) -> Self {
        Self::Tuple(t.into())
    }
}

impl From<ArrayD<i64>> for Value {
    fn from(a: ArrayD<i64>) -> Self {
        Self::IntArray(Handle::new(a))
    }
}

impl From<ArrayD<f64>> for Value {
    fn from(a: ArrayD<f64>) -> Self {
        Self::FloatArray(Handle::new(a))
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(o: Option<T>) -> Self {
        match o {
            None => Self::None,
            Some(v) => v.into(),
        }
    }
}

// The discriminants feed the hasher. Append new kinds at the end; reordering
// changes every computed ID.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SimpleType {
    None,
    Bool,
    Int,
    Float,
    Pointer,
    String,
    Tuple,
    IntArray,
    FloatArray,
    DateTimeNaive,
    DateTimeUtc,
    Duration,
}

impl SimpleType {
    pub fn to_type(&self) -> Option<Type> {
        match self {
            SimpleType::None => None,
            SimpleType::Bool => Some(Type::Bool),
            SimpleType::Int => Some(Type::Int),
            SimpleType::Float => Some(Type::Float),
            SimpleType::Pointer => Some(Type::Pointer),
            SimpleType::String => Some(Type::String),
            SimpleType::Tuple => Some(Type::Tuple),
            SimpleType::IntArray | SimpleType::FloatArray => Some(Type::Array),
            SimpleType::DateTimeNaive => Some(Type::DateTimeNaive),
            SimpleType::DateTimeUtc => Some(Type::DateTimeUtc),
            SimpleType::Duration => Some(Type::Duration),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    #[default]
    Any,
    Bool,
    Int,
    Float,
    Pointer,
    String,
    DateTimeNaive,
    DateTimeUtc,
    Duration,
    Array,
    Tuple,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CompoundType {
    pub type_: Type,
    pub is_optional: bool,
}

impl CompoundType {
    pub fn new(type_: Type, is_optional: bool) -> Self {
        Self { type_, is_optional }
    }

    pub fn matches(&self, value: &Value) -> bool {
        if self.type_ == Type::Any {
            true
        } else if let Some(value_type) = value.simple_type().to_type() {
            self.type_ == value_type
        } else {
            false
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn convert_value(&self, value: Value) -> DynResult<Value> {
        if self.matches(&value) || self.is_optional && value == Value::None {
            return Ok(value);
        }
        match (value, self.type_) {
            (Value::Int(i), Type::Float) => Ok(Value::from(i as f64)),
            (value, _) => Err(DataError::IncorrectType {
                value,
                type_: *self,
            }
            .into()),
        }
    }
}

impl Display for CompoundType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_optional {
            write!(f, "{:?} | None", self.type_)
        } else {
            write!(f, "{:?}", self.type_)
        }
    }
}

pub trait HashInto {
    fn hash_into(&self, hasher: &mut Hasher);
}

impl<T: HashInto> HashInto for &T {
    fn hash_into(&self, hasher: &mut Hasher) {
        (*self).hash_into(hasher);
    }
}

macro_rules! hash_into_le_bytes {
    ($($type:path),+) => {
        $(impl HashInto for $type {
            fn hash_into(&self, hasher: &mut Hasher) {
                hasher.update(&self.to_le_bytes());
            }
        })+
    };
}

hash_into_le_bytes!(i8, i16, i32, i64, i128);
hash_into_le_bytes!(u8, u16, u32, u64, u128);

impl HashInto for usize {
    fn hash_into(&self, hasher: &mut Hasher) {
        u64::try_from(*self)
            .expect("usize fitting in 64 bits")
            .hash_into(hasher);
    }
}

impl HashInto for bool {
    fn hash_into(&self, hasher: &mut Hasher) {
        u8::from(*self).hash_into(hasher);
    }
}

impl HashInto for f64 {
    #[allow(clippy::float_cmp)]
    fn hash_into(&self, hasher: &mut Hasher) {
        // all NaNs collapse to one bit pattern and -0.0 hashes like 0.0
        let bits = match *self {
            f if f.is_nan() => !0,
            f if f == 0.0 => 0,
            f => f.to_bits(),
        };
        bits.hash_into(hasher);
    }
}

impl HashInto for OrderedFloat<f64> {
    fn hash_into(&self, hasher: &mut Hasher) {
        self.0.hash_into(hasher);
    }
}

impl HashInto for Key {
    fn hash_into(&self, hasher: &mut Hasher) {
        self.0.hash_into(hasher);
    }
}

impl<T> HashInto for Handle<T> {
    fn hash_into(&self, hasher: &mut Hasher) {
        // the content hash stands in for the data
        self.0.key.hash_into(hasher);
    }
}

impl HashInto for str {
    fn hash_into(&self, hasher: &mut Hasher) {
        self.len().hash_into(hasher);
        hasher.update(self.as_bytes());
    }
}

impl HashInto for String {
    fn hash_into(&self, hasher: &mut Hasher) {
        self.as_str().hash_into(hasher);
    }
}

impl<T: HashInto> HashInto for [T] {
    fn hash_into(&self, hasher: &mut Hasher) {
        self.len().hash_into(hasher);
        for element in self {
            element.hash_into(hasher);
        }
    }
}

impl<T: HashInto> HashInto for Vec<T> {
    fn hash_into(&self, hasher: &mut Hasher) {
        self.as_slice().hash_into(hasher);
    }
}

impl<T: HashInto> HashInto for ArrayD<T> {
    fn hash_into(&self, hasher: &mut Hasher) {
        self.shape().hash_into(hasher);
        for element in self {
            element.hash_into(hasher);
        }
    }
}

impl HashInto for DateTimeNaive {
    fn hash_into(&self, hasher: &mut Hasher) {
        self.timestamp().hash_into(hasher);
    }
}

impl HashInto for DateTimeUtc {
    fn hash_into(&self, hasher: &mut Hasher) {
        self.timestamp().hash_into(hasher);
    }
}

impl HashInto for Duration {
    fn hash_into(&self, hasher: &mut Hasher) {
        self.nanoseconds().hash_into(hasher);
    }
}

impl HashInto for Value {
    fn hash_into(&self, hasher: &mut Hasher) {
        (self.simple_type() as u8).hash_into(hasher);
        match self {
            Self::None => {}
            Self::Bool(b) => b.hash_into(hasher),
            Self::Int(i) => i.hash_into(hasher),
            Self::Float(f) => f.hash_into(hasher),
            Self::Pointer(p) => p.hash_into(hasher),
            Self::String(s) => s.hash_into(hasher),
            Self::Tuple(vals) => vals.hash_into(hasher),
            Self::IntArray(handle) => handle.hash_into(hasher),
            Self::FloatArray(handle) => handle.hash_into(hasher),
            Self::DateTimeNaive(date_time) => date_time.hash_into(hasher),
            Self::DateTimeUtc(date_time) => date_time.hash_into(hasher),
            Self::Duration(duration) => duration.hash_into(hasher),
        }
    }
}
