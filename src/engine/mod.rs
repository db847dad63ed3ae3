// too sensitive for `Box<dyn FnMut(...)>`
#![allow(clippy::type_complexity)]

pub mod error;
pub use self::error::{DataError, DataResult, DynError, DynResult, Error, Result, Trace};

pub mod value;
pub use self::value::{CompoundType, Key, KeyImpl, SimpleType, Type, Value};

pub mod reduce;
pub use reduce::Reducer;

pub mod graph;
pub use graph::{
    ColumnHandle, ColumnProperties, ComplexColumn, Computer, ConcatHandle, Context, DataRow,
    FlattenHandle, Graph, GrouperHandle, InputSessionHandle, IterationLogic, IxKeyPolicy,
    IxerHandle, JoinType, JoinerHandle, ScopedContext, ScopedGraph, Table, UniverseHandle,
    VennUniversesHandle,
};

pub mod dataflow;
pub use dataflow::{run_with_new_dataflow_graph, Config, DataflowGraph, MonitoringLevel};

pub mod expression;
pub use expression::{
    AnyExpression, BoolExpression, DateTimeNaiveExpression, DateTimeUtcExpression,
    DurationExpression, Expression, Expressions, FloatExpression, IntExpression, PointerExpression,
    StringExpression,
};

pub mod time;
pub use time::{DateTimeNaive, DateTimeUtc, Duration};
