#![allow(clippy::module_name_repetitions)]

mod complex_columns;

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crossbeam_channel::unbounded;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use id_arena::Arena;
use indexmap::IndexSet;
use itertools::Itertools as _;
use log::info;
use ndarray::ArrayD;
use rayon::prelude::*;
use smallvec::SmallVec;

use super::error::{DataError, DynError, DynResult, Trace};
use super::graph::{
    ColumnProperties, ComplexColumn, ConcatHandle, DataRow, FlattenHandle, Graph, GrouperHandle,
    InputSessionHandle, IterationLogic, IxKeyPolicy, IxerHandle, JoinType, JoinerHandle, Table,
    VennUniversesHandle,
};
use super::value::CompoundType;
use super::{ColumnHandle, Error, Expression, Key, Reducer, Result, Type, UniverseHandle, Value};

pub type KeySet = Arc<IndexSet<Key>>;
pub type ValuesMap = Arc<HashMap<Key, Value>>;

type MapFunction = Arc<dyn Fn(Key, &[Value]) -> DynResult<Value> + Send + Sync>;
type AsyncMapFunction =
    Arc<dyn Fn(Key, &[Value]) -> BoxFuture<'static, DynResult<Value>> + Send + Sync>;
type OnChangeCallback = Box<dyn FnMut(Key, &[Value], u64, isize) -> DynResult<()>>;
type OnEndCallback = Box<dyn FnMut() -> DynResult<()>>;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum NodeRef {
    Universe(UniverseHandle),
    Column(ColumnHandle),
}

/// How a universe's key set is derived from its inputs.
///
/// Node creation order is a topological order of the graph, so walking nodes
/// in creation order and recomputing the ones whose parents changed is a full
/// propagation pass.
#[derive(Clone)]
enum UniverseDerivation {
    Static(KeySet),
    Input,
    Filtered {
        universe: UniverseHandle,
        column: ColumnHandle,
    },
    Intersection(Vec<UniverseHandle>),
    Union(Vec<UniverseHandle>),
    VennOnlyLeft {
        left: UniverseHandle,
        right: UniverseHandle,
    },
    VennOnlyRight {
        left: UniverseHandle,
        right: UniverseHandle,
    },
    VennBoth {
        left: UniverseHandle,
        right: UniverseHandle,
    },
    Reindexed {
        column: ColumnHandle,
    },
    Grouped {
        grouper: GrouperHandle,
    },
    Joined {
        joiner: JoinerHandle,
    },
    Ixed {
        ixer: IxerHandle,
    },
    Concatenated(Vec<UniverseHandle>),
    Flattened {
        flatten: FlattenHandle,
    },
}

/// How a column's values are derived. `Static` also covers columns whose
/// data is resolved once at build time (complex columns, iteration results).
#[derive(Clone)]
enum ColumnDerivation {
    Static(ValuesMap),
    Input,
    Id,
    Expression {
        expression: Arc<Expression>,
        inputs: Vec<ColumnHandle>,
        trace: Trace,
    },
    Map {
        function: MapFunction,
        inputs: Vec<ColumnHandle>,
    },
    AsyncMap {
        function: AsyncMapFunction,
        inputs: Vec<ColumnHandle>,
        trace: Trace,
    },
    Restricted {
        column: ColumnHandle,
    },
    Overridden {
        column: ColumnHandle,
    },
    Reindexed {
        column: ColumnHandle,
        reindexing_column: ColumnHandle,
    },
    UpdateRows {
        column: ColumnHandle,
        updates: ColumnHandle,
    },
    GrouperInput {
        grouper: GrouperHandle,
        column: ColumnHandle,
    },
    GrouperCount {
        grouper: GrouperHandle,
    },
    GrouperReducer {
        grouper: GrouperHandle,
        reducer: Reducer,
        column: ColumnHandle,
    },
    GrouperReducerIx {
        grouper: GrouperHandle,
        reducer: Reducer,
        ixer: IxerHandle,
        column: ColumnHandle,
    },
    JoinerLeft {
        joiner: JoinerHandle,
        column: ColumnHandle,
    },
    JoinerRight {
        joiner: JoinerHandle,
        column: ColumnHandle,
    },
    IxColumn {
        ixer: IxerHandle,
        column: ColumnHandle,
    },
    ConcatColumn {
        columns: Vec<ColumnHandle>,
    },
    FlattenColumn {
        flatten: FlattenHandle,
    },
    Exploded {
        flatten: FlattenHandle,
        column: ColumnHandle,
    },
    SortPrev {
        key_column: ColumnHandle,
        instance_column: ColumnHandle,
    },
    SortNext {
        key_column: ColumnHandle,
        instance_column: ColumnHandle,
    },
}

struct Universe {
    derivation: UniverseDerivation,
    data: KeySet,
}

struct Column {
    universe: UniverseHandle,
    derivation: ColumnDerivation,
    data: ValuesMap,
    properties: Arc<ColumnProperties>,
}

struct Grouper {
    source_universe: UniverseHandle,
    column_handles: Vec<ColumnHandle>,
    set_id: bool,
    result_universe: UniverseHandle,
    // source row -> group key, refreshed whenever the result universe recomputes
    mapping: Arc<HashMap<Key, Key>>,
}

struct Joiner {
    join_type: JoinType,
    left_universe: UniverseHandle,
    right_universe: UniverseHandle,
    left_key_columns: Vec<ColumnHandle>,
    right_key_columns: Vec<ColumnHandle>,
    result_universe: UniverseHandle,
    left_source: Arc<HashMap<Key, Option<Key>>>,
    right_source: Arc<HashMap<Key, Option<Key>>>,
}

struct Ixer {
    key_column: ColumnHandle,
    input_universe: UniverseHandle,
    policy: IxKeyPolicy,
    result_universe: UniverseHandle,
    // result row -> input row, None when the policy forwards nulls
    targets: Arc<HashMap<Key, Option<Key>>>,
}

struct Concat {
    universe_handles: Vec<UniverseHandle>,
    result_universe: UniverseHandle,
}

struct Flatten {
    input_column: ColumnHandle,
    result_universe: UniverseHandle,
    // result row -> (source row, element value)
    elements: Arc<HashMap<Key, (Key, Value)>>,
}

struct VennUniverses {
    only_left: UniverseHandle,
    only_right: UniverseHandle,
    both: UniverseHandle,
}

struct InputSession {
    universe: UniverseHandle,
    columns: Vec<ColumnHandle>,
}

struct Subscriber {
    universe: UniverseHandle,
    columns: Vec<ColumnHandle>,
    on_change: OnChangeCallback,
    on_end: OnEndCallback,
    seen_keys: KeySet,
    seen_values: Vec<ValuesMap>,
}

struct UniverseObserver {
    universe: UniverseHandle,
    function: Box<dyn FnMut(&Key, isize) -> DynResult<()>>,
    seen_keys: KeySet,
}

struct ColumnObserver {
    column: ColumnHandle,
    function: Box<dyn FnMut(&Key, &Value, isize) -> DynResult<()>>,
    seen_keys: KeySet,
    seen_values: ValuesMap,
}

struct Probe {
    node: NodeRef,
    operator_id: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum MonitoringLevel {
    None,
    #[default]
    InOut,
    All,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Config {
    pub ignore_asserts: bool,
    pub monitoring_level: MonitoringLevel,
}

fn type_name(type_: Type) -> &'static str {
    match type_ {
        Type::Any => "Any",
        Type::Bool => "bool",
        Type::Int => "int",
        Type::Float => "float",
        Type::Pointer => "pointer",
        Type::String => "string",
        Type::DateTimeNaive => "DateTimeNaive",
        Type::DateTimeUtc => "DateTimeUtc",
        Type::Duration => "Duration",
        Type::Array => "Array",
        Type::Tuple => "tuple",
    }
}

fn with_trace(error: DynError, trace: &Trace) -> Error {
    if *trace == Trace::Empty {
        Error::from(error)
    } else {
        Error::with_trace(error, trace.clone())
    }
}

fn flatten_value(value: &Value) -> Result<Vec<Value>> {
    match value {
        Value::Tuple(values) => Ok(values.iter().cloned().collect()),
        Value::IntArray(array) => Ok(flatten_array(array)),
        Value::FloatArray(array) => Ok(flatten_array(array)),
        Value::String(s) => Ok(s
            .chars()
            .map(|c| Value::from(c.to_string().as_str()))
            .collect()),
        other => Err(DataError::TypeMismatch {
            expected: "sequence",
            value: other.clone(),
        }
        .into()),
    }
}

// arrays flatten along their first axis
fn flatten_array<T>(array: &ArrayD<T>) -> Vec<Value>
where
    T: Clone,
    Value: From<T> + From<ArrayD<T>>,
{
    use ndarray::Axis;
    let length = array.shape().first().copied().unwrap_or(0);
    (0..length)
        .map(|index| {
            let row = array.index_axis(Axis(0), index);
            if row.shape().is_empty() {
                Value::from(row.first().unwrap().clone())
            } else {
                Value::from(row.to_owned())
            }
        })
        .collect()
}

pub struct DataflowGraphInner {
    universes: Arena<Universe, UniverseHandle>,
    columns: Arena<Column, ColumnHandle>,
    groupers: Arena<Grouper, GrouperHandle>,
    joiners: Arena<Joiner, JoinerHandle>,
    ixers: Arena<Ixer, IxerHandle>,
    concats: Arena<Concat, ConcatHandle>,
    flattens: Arena<Flatten, FlattenHandle>,
    venn_universes: Arena<VennUniverses, VennUniversesHandle>,
    input_sessions: Arena<InputSession, InputSessionHandle>,
    node_order: Vec<NodeRef>,
    pending_batches: VecDeque<(InputSessionHandle, Vec<DataRow>)>,
    subscribers: Vec<Subscriber>,
    universe_observers: Vec<UniverseObserver>,
    column_observers: Vec<ColumnObserver>,
    probes: Vec<Probe>,
    dirty: HashSet<NodeRef>,
    current_time: u64,
    ignore_asserts: bool,
    monitoring_level: MonitoringLevel,
}

impl DataflowGraphInner {
    fn new(config: Config) -> Self {
        Self {
            universes: Arena::new(),
            columns: Arena::new(),
            groupers: Arena::new(),
            joiners: Arena::new(),
            ixers: Arena::new(),
            concats: Arena::new(),
            flattens: Arena::new(),
            venn_universes: Arena::new(),
            input_sessions: Arena::new(),
            node_order: Vec::new(),
            pending_batches: VecDeque::new(),
            subscribers: Vec::new(),
            universe_observers: Vec::new(),
            column_observers: Vec::new(),
            probes: Vec::new(),
            dirty: HashSet::new(),
            current_time: 0,
            ignore_asserts: config.ignore_asserts,
            monitoring_level: config.monitoring_level,
        }
    }

    fn universe(&self, handle: UniverseHandle) -> Result<&Universe> {
        self.universes
            .get(handle)
            .ok_or(Error::InvalidUniverseHandle)
    }

    fn column(&self, handle: ColumnHandle) -> Result<&Column> {
        self.columns.get(handle).ok_or(Error::InvalidColumnHandle)
    }

    fn grouper(&self, handle: GrouperHandle) -> Result<&Grouper> {
        self.groupers.get(handle).ok_or(Error::InvalidGrouperHandle)
    }

    fn joiner(&self, handle: JoinerHandle) -> Result<&Joiner> {
        self.joiners.get(handle).ok_or(Error::InvalidJoinerHandle)
    }

    fn ixer(&self, handle: IxerHandle) -> Result<&Ixer> {
        self.ixers.get(handle).ok_or(Error::InvalidIxerHandle)
    }

    fn universe_keys(&self, handle: UniverseHandle) -> Result<KeySet> {
        Ok(self.universe(handle)?.data.clone())
    }

    fn column_values(&self, handle: ColumnHandle) -> Result<ValuesMap> {
        Ok(self.column(handle)?.data.clone())
    }

    fn column_universe(&self, handle: ColumnHandle) -> Result<UniverseHandle> {
        Ok(self.column(handle)?.universe)
    }

    fn check_same_universe(
        &self,
        universe_handle: UniverseHandle,
        column_handles: &[ColumnHandle],
    ) -> Result<()> {
        for column_handle in column_handles {
            if self.column_universe(*column_handle)? != universe_handle {
                return Err(Error::UniverseMismatch);
            }
        }
        Ok(())
    }

    fn assert_column_totality(
        &self,
        universe_handle: UniverseHandle,
        data: &ValuesMap,
    ) -> Result<()> {
        let keys = &self.universe(universe_handle)?.data;
        for key in keys.iter() {
            if !data.contains_key(key) {
                return Err(DataError::KeyMissingInColumn(*key).into());
            }
        }
        for key in data.keys() {
            if !keys.contains(key) {
                return Err(DataError::KeyMissingInUniverse(*key).into());
            }
        }
        Ok(())
    }

    fn add_universe_with_data(
        &mut self,
        derivation: UniverseDerivation,
        data: KeySet,
    ) -> UniverseHandle {
        let handle = self.universes.alloc(Universe { derivation, data });
        self.node_order.push(NodeRef::Universe(handle));
        handle
    }

    fn add_universe(&mut self, derivation: UniverseDerivation) -> Result<UniverseHandle> {
        let data = self.compute_universe_data(&derivation)?;
        Ok(self.add_universe_with_data(derivation, data))
    }

    fn add_column(
        &mut self,
        universe_handle: UniverseHandle,
        derivation: ColumnDerivation,
        properties: Arc<ColumnProperties>,
    ) -> Result<ColumnHandle> {
        let data = self.compute_column_data(universe_handle, &derivation)?;
        if !self.ignore_asserts {
            self.assert_column_totality(universe_handle, &data)?;
        }
        let handle = self.columns.alloc(Column {
            universe: universe_handle,
            derivation,
            data,
            properties,
        });
        self.node_order.push(NodeRef::Column(handle));
        Ok(handle)
    }

    // -- graph building --

    fn empty_universe(&mut self) -> Result<UniverseHandle> {
        self.add_universe(UniverseDerivation::Static(Arc::new(IndexSet::new())))
    }

    fn empty_column(
        &mut self,
        universe_handle: UniverseHandle,
        column_properties: Arc<ColumnProperties>,
    ) -> Result<ColumnHandle> {
        if !self.ignore_asserts && !self.universe(universe_handle)?.data.is_empty() {
            return Err(Error::ValueError(
                "cannot attach an empty column to a non-empty universe".to_string(),
            ));
        }
        self.add_column(
            universe_handle,
            ColumnDerivation::Static(Arc::new(HashMap::new())),
            column_properties,
        )
    }

    fn static_universe(&mut self, keys: Vec<Key>) -> Result<UniverseHandle> {
        let mut key_set = IndexSet::with_capacity(keys.len());
        for key in keys {
            if !key_set.insert(key) {
                return Err(DataError::DuplicateKey(key).into());
            }
        }
        self.add_universe(UniverseDerivation::Static(Arc::new(key_set)))
    }

    fn static_column(
        &mut self,
        universe_handle: UniverseHandle,
        values: Vec<(Key, Value)>,
        column_properties: Arc<ColumnProperties>,
    ) -> Result<ColumnHandle> {
        let keys = self.universe_keys(universe_handle)?;
        let dtype = CompoundType::new(column_properties.dtype, true);
        let mut data = HashMap::with_capacity(values.len());
        for (key, value) in values {
            if !keys.contains(&key) {
                return Err(DataError::KeyMissingInUniverse(key).into());
            }
            let value = dtype.convert_value(value).map_err(Error::from)?;
            if data.insert(key, value).is_some() {
                return Err(DataError::DuplicateKey(key).into());
            }
        }
        self.add_column(
            universe_handle,
            ColumnDerivation::Static(Arc::new(data)),
            column_properties,
        )
    }

    fn id_column(&mut self, universe_handle: UniverseHandle) -> Result<ColumnHandle> {
        self.universe(universe_handle)?;
        self.add_column(
            universe_handle,
            ColumnDerivation::Id,
            Arc::new(ColumnProperties::with_dtype(Type::Pointer)),
        )
    }

    fn map_column(
        &mut self,
        universe_handle: UniverseHandle,
        function: MapFunction,
        column_handles: Vec<ColumnHandle>,
        column_properties: Arc<ColumnProperties>,
    ) -> Result<ColumnHandle> {
        self.check_same_universe(universe_handle, &column_handles)?;
        self.add_column(
            universe_handle,
            ColumnDerivation::Map {
                function,
                inputs: column_handles,
            },
            column_properties,
        )
    }

    fn expression_column(
        &mut self,
        expression: Arc<Expression>,
        universe_handle: UniverseHandle,
        column_handles: Vec<ColumnHandle>,
        column_properties: Arc<ColumnProperties>,
        trace: Trace,
    ) -> Result<ColumnHandle> {
        self.check_same_universe(universe_handle, &column_handles)?;
        self.add_column(
            universe_handle,
            ColumnDerivation::Expression {
                expression,
                inputs: column_handles,
                trace,
            },
            column_properties,
        )
    }

    fn async_map_column(
        &mut self,
        universe_handle: UniverseHandle,
        function: AsyncMapFunction,
        column_handles: Vec<ColumnHandle>,
        column_properties: Arc<ColumnProperties>,
        trace: Trace,
    ) -> Result<ColumnHandle> {
        self.check_same_universe(universe_handle, &column_handles)?;
        self.add_column(
            universe_handle,
            ColumnDerivation::AsyncMap {
                function,
                inputs: column_handles,
                trace,
            },
            column_properties,
        )
    }

    fn filter_universe(
        &mut self,
        universe_handle: UniverseHandle,
        column_handle: ColumnHandle,
    ) -> Result<UniverseHandle> {
        let column = self.column(column_handle)?;
        if column.universe != universe_handle {
            return Err(Error::UniverseMismatch);
        }
        let dtype = column.properties.dtype;
        if dtype != Type::Bool && dtype != Type::Any {
            return Err(Error::ColumnTypeMismatch {
                expected: "bool",
                actual: type_name(dtype),
            });
        }
        self.add_universe(UniverseDerivation::Filtered {
            universe: universe_handle,
            column: column_handle,
        })
    }

    fn restrict_column(
        &mut self,
        universe_handle: UniverseHandle,
        column_handle: ColumnHandle,
    ) -> Result<ColumnHandle> {
        let properties = self.column(column_handle)?.properties.clone();
        self.add_column(
            universe_handle,
            ColumnDerivation::Restricted {
                column: column_handle,
            },
            properties,
        )
    }

    fn override_column_universe(
        &mut self,
        universe_handle: UniverseHandle,
        column_handle: ColumnHandle,
    ) -> Result<ColumnHandle> {
        let properties = self.column(column_handle)?.properties.clone();
        self.add_column(
            universe_handle,
            ColumnDerivation::Overridden {
                column: column_handle,
            },
            properties,
        )
    }

    fn intersect_universe(
        &mut self,
        universe_handles: Vec<UniverseHandle>,
    ) -> Result<UniverseHandle> {
        if universe_handles.is_empty() {
            return Err(Error::EmptyIntersection);
        }
        for universe_handle in &universe_handles {
            self.universe(*universe_handle)?;
        }
        self.add_universe(UniverseDerivation::Intersection(universe_handles))
    }

    fn union_universe(&mut self, universe_handles: Vec<UniverseHandle>) -> Result<UniverseHandle> {
        for universe_handle in &universe_handles {
            self.universe(*universe_handle)?;
        }
        self.add_universe(UniverseDerivation::Union(universe_handles))
    }

    fn venn_universes(
        &mut self,
        left: UniverseHandle,
        right: UniverseHandle,
    ) -> Result<VennUniversesHandle> {
        self.universe(left)?;
        self.universe(right)?;
        let only_left = self.add_universe(UniverseDerivation::VennOnlyLeft { left, right })?;
        let only_right = self.add_universe(UniverseDerivation::VennOnlyRight { left, right })?;
        let both = self.add_universe(UniverseDerivation::VennBoth { left, right })?;
        Ok(self.venn_universes.alloc(VennUniverses {
            only_left,
            only_right,
            both,
        }))
    }

    fn venn_universes_only_left(&self, handle: VennUniversesHandle) -> Result<UniverseHandle> {
        Ok(self
            .venn_universes
            .get(handle)
            .ok_or(Error::InvalidVennUniversesHandle)?
            .only_left)
    }

    fn venn_universes_only_right(&self, handle: VennUniversesHandle) -> Result<UniverseHandle> {
        Ok(self
            .venn_universes
            .get(handle)
            .ok_or(Error::InvalidVennUniversesHandle)?
            .only_right)
    }

    fn venn_universes_both(&self, handle: VennUniversesHandle) -> Result<UniverseHandle> {
        Ok(self
            .venn_universes
            .get(handle)
            .ok_or(Error::InvalidVennUniversesHandle)?
            .both)
    }

    fn reindex_universe(&mut self, column_handle: ColumnHandle) -> Result<UniverseHandle> {
        let column = self.column(column_handle)?;
        let dtype = column.properties.dtype;
        if dtype != Type::Pointer && dtype != Type::Any {
            return Err(Error::ColumnTypeMismatch {
                expected: "pointer",
                actual: type_name(dtype),
            });
        }
        self.add_universe(UniverseDerivation::Reindexed {
            column: column_handle,
        })
    }

    fn reindex_column(
        &mut self,
        column_to_reindex: ColumnHandle,
        reindexing_column: ColumnHandle,
        reindexing_universe: UniverseHandle,
    ) -> Result<ColumnHandle> {
        let universe = self.column_universe(column_to_reindex)?;
        if self.column_universe(reindexing_column)? != universe {
            return Err(Error::UniverseMismatch);
        }
        self.universe(reindexing_universe)?;
        let properties = self.column(column_to_reindex)?.properties.clone();
        self.add_column(
            reindexing_universe,
            ColumnDerivation::Reindexed {
                column: column_to_reindex,
                reindexing_column,
            },
            properties,
        )
    }

    fn update_rows(
        &mut self,
        universe_handle: UniverseHandle,
        column_handle: ColumnHandle,
        updates_handle: ColumnHandle,
    ) -> Result<ColumnHandle> {
        let properties = self.column(column_handle)?.properties.clone();
        self.column(updates_handle)?;
        self.add_column(
            universe_handle,
            ColumnDerivation::UpdateRows {
                column: column_handle,
                updates: updates_handle,
            },
            properties,
        )
    }

    fn group_by(
        &mut self,
        universe_handle: UniverseHandle,
        column_handles: Vec<ColumnHandle>,
        set_id: bool,
    ) -> Result<GrouperHandle> {
        self.check_same_universe(universe_handle, &column_handles)?;
        if set_id && column_handles.len() != 1 {
            return Err(Error::LengthMismatch);
        }
        let (mapping, keys) = self.compute_grouped(universe_handle, &column_handles, set_id)?;
        let grouper_handle = self.groupers.next_id();
        let result_universe = self.add_universe_with_data(
            UniverseDerivation::Grouped {
                grouper: grouper_handle,
            },
            Arc::new(keys),
        );
        let allocated = self.groupers.alloc(Grouper {
            source_universe: universe_handle,
            column_handles,
            set_id,
            result_universe,
            mapping: Arc::new(mapping),
        });
        assert_eq!(allocated, grouper_handle);
        Ok(grouper_handle)
    }

    fn grouper_universe(&self, grouper_handle: GrouperHandle) -> Result<UniverseHandle> {
        Ok(self.grouper(grouper_handle)?.result_universe)
    }

    fn grouper_input_column(
        &mut self,
        grouper_handle: GrouperHandle,
        column_handle: ColumnHandle,
    ) -> Result<ColumnHandle> {
        let grouper = self.grouper(grouper_handle)?;
        if !grouper.column_handles.contains(&column_handle) {
            return Err(Error::ValueError(
                "input column must be one of the grouping columns".to_string(),
            ));
        }
        let result_universe = grouper.result_universe;
        let properties = self.column(column_handle)?.properties.clone();
        self.add_column(
            result_universe,
            ColumnDerivation::GrouperInput {
                grouper: grouper_handle,
                column: column_handle,
            },
            properties,
        )
    }

    fn grouper_count_column(&mut self, grouper_handle: GrouperHandle) -> Result<ColumnHandle> {
        let result_universe = self.grouper(grouper_handle)?.result_universe;
        self.add_column(
            result_universe,
            ColumnDerivation::GrouperCount {
                grouper: grouper_handle,
            },
            Arc::new(ColumnProperties::with_dtype(Type::Int)),
        )
    }

    fn grouper_reducer_column(
        &mut self,
        grouper_handle: GrouperHandle,
        reducer: Reducer,
        column_handle: ColumnHandle,
    ) -> Result<ColumnHandle> {
        let grouper = self.grouper(grouper_handle)?;
        if self.column_universe(column_handle)? != grouper.source_universe {
            return Err(Error::UniverseMismatch);
        }
        let result_universe = grouper.result_universe;
        self.add_column(
            result_universe,
            ColumnDerivation::GrouperReducer {
                grouper: grouper_handle,
                reducer,
                column: column_handle,
            },
            Arc::new(ColumnProperties::new()),
        )
    }

    fn grouper_reducer_column_ix(
        &mut self,
        grouper_handle: GrouperHandle,
        reducer: Reducer,
        ixer_handle: IxerHandle,
        column_handle: ColumnHandle,
    ) -> Result<ColumnHandle> {
        let grouper = self.grouper(grouper_handle)?;
        let ixer = self.ixer(ixer_handle)?;
        if ixer.result_universe != grouper.source_universe
            || self.column_universe(column_handle)? != ixer.input_universe
        {
            return Err(Error::UniverseMismatch);
        }
        let result_universe = grouper.result_universe;
        self.add_column(
            result_universe,
            ColumnDerivation::GrouperReducerIx {
                grouper: grouper_handle,
                reducer,
                ixer: ixer_handle,
                column: column_handle,
            },
            Arc::new(ColumnProperties::new()),
        )
    }

    fn ix(
        &mut self,
        key_column_handle: ColumnHandle,
        input_universe_handle: UniverseHandle,
        ix_key_policy: IxKeyPolicy,
    ) -> Result<IxerHandle> {
        self.column(key_column_handle)?;
        self.universe(input_universe_handle)?;
        let (targets, keys) =
            self.compute_ix_data(key_column_handle, input_universe_handle, ix_key_policy)?;
        let ixer_handle = self.ixers.next_id();
        let result_universe = self.add_universe_with_data(
            UniverseDerivation::Ixed { ixer: ixer_handle },
            Arc::new(keys),
        );
        let allocated = self.ixers.alloc(Ixer {
            key_column: key_column_handle,
            input_universe: input_universe_handle,
            policy: ix_key_policy,
            result_universe,
            targets: Arc::new(targets),
        });
        assert_eq!(allocated, ixer_handle);
        Ok(ixer_handle)
    }

    fn ixer_universe(&self, ixer_handle: IxerHandle) -> Result<UniverseHandle> {
        Ok(self.ixer(ixer_handle)?.result_universe)
    }

    fn ix_column(
        &mut self,
        ixer_handle: IxerHandle,
        column_handle: ColumnHandle,
    ) -> Result<ColumnHandle> {
        let ixer = self.ixer(ixer_handle)?;
        if self.column_universe(column_handle)? != ixer.input_universe {
            return Err(Error::UniverseMismatch);
        }
        let result_universe = ixer.result_universe;
        let properties = self.column(column_handle)?.properties.clone();
        self.add_column(
            result_universe,
            ColumnDerivation::IxColumn {
                ixer: ixer_handle,
                column: column_handle,
            },
            properties,
        )
    }

    fn join(
        &mut self,
        left_universe_handle: UniverseHandle,
        left_column_handles: Vec<ColumnHandle>,
        right_universe_handle: UniverseHandle,
        right_column_handles: Vec<ColumnHandle>,
        join_type: JoinType,
    ) -> Result<JoinerHandle> {
        if left_column_handles.len() != right_column_handles.len() {
            return Err(Error::DifferentJoinConditionLengths);
        }
        self.check_same_universe(left_universe_handle, &left_column_handles)?;
        self.check_same_universe(right_universe_handle, &right_column_handles)?;
        let (keys, left_source, right_source) = self.compute_join_data(
            join_type,
            left_universe_handle,
            right_universe_handle,
            &left_column_handles,
            &right_column_handles,
        )?;
        let joiner_handle = self.joiners.next_id();
        let result_universe = self.add_universe_with_data(
            UniverseDerivation::Joined {
                joiner: joiner_handle,
            },
            Arc::new(keys),
        );
        let allocated = self.joiners.alloc(Joiner {
            join_type,
            left_universe: left_universe_handle,
            right_universe: right_universe_handle,
            left_key_columns: left_column_handles,
            right_key_columns: right_column_handles,
            result_universe,
            left_source: Arc::new(left_source),
            right_source: Arc::new(right_source),
        });
        assert_eq!(allocated, joiner_handle);
        Ok(joiner_handle)
    }

    fn joiner_universe(&self, joiner_handle: JoinerHandle) -> Result<UniverseHandle> {
        Ok(self.joiner(joiner_handle)?.result_universe)
    }

    fn joiner_left_column(
        &mut self,
        joiner_handle: JoinerHandle,
        column_handle: ColumnHandle,
    ) -> Result<ColumnHandle> {
        let joiner = self.joiner(joiner_handle)?;
        if self.column_universe(column_handle)? != joiner.left_universe {
            return Err(Error::UniverseMismatch);
        }
        let result_universe = joiner.result_universe;
        let properties = self.column(column_handle)?.properties.clone();
        self.add_column(
            result_universe,
            ColumnDerivation::JoinerLeft {
                joiner: joiner_handle,
                column: column_handle,
            },
            properties,
        )
    }

    fn joiner_right_column(
        &mut self,
        joiner_handle: JoinerHandle,
        column_handle: ColumnHandle,
    ) -> Result<ColumnHandle> {
        let joiner = self.joiner(joiner_handle)?;
        if self.column_universe(column_handle)? != joiner.right_universe {
            return Err(Error::UniverseMismatch);
        }
        let result_universe = joiner.result_universe;
        let properties = self.column(column_handle)?.properties.clone();
        self.add_column(
            result_universe,
            ColumnDerivation::JoinerRight {
                joiner: joiner_handle,
                column: column_handle,
            },
            properties,
        )
    }

    fn concat(&mut self, universe_handles: Vec<UniverseHandle>) -> Result<ConcatHandle> {
        for universe_handle in &universe_handles {
            self.universe(*universe_handle)?;
        }
        let result_universe =
            self.add_universe(UniverseDerivation::Concatenated(universe_handles.clone()))?;
        Ok(self.concats.alloc(Concat {
            universe_handles,
            result_universe,
        }))
    }

    fn concat_universe(&self, concat_handle: ConcatHandle) -> Result<UniverseHandle> {
        Ok(self
            .concats
            .get(concat_handle)
            .ok_or(Error::InvalidConcatHandle)?
            .result_universe)
    }

    fn concat_column(
        &mut self,
        concat_handle: ConcatHandle,
        column_handles: Vec<ColumnHandle>,
    ) -> Result<ColumnHandle> {
        let concat = self
            .concats
            .get(concat_handle)
            .ok_or(Error::InvalidConcatHandle)?;
        if column_handles.is_empty() || column_handles.len() != concat.universe_handles.len() {
            return Err(Error::LengthMismatch);
        }
        for (column_handle, universe_handle) in
            column_handles.iter().zip(concat.universe_handles.iter())
        {
            if self.column_universe(*column_handle)? != *universe_handle {
                return Err(Error::UniverseMismatch);
            }
        }
        let result_universe = concat.result_universe;
        let properties = self.column(column_handles[0])?.properties.clone();
        self.add_column(
            result_universe,
            ColumnDerivation::ConcatColumn {
                columns: column_handles,
            },
            properties,
        )
    }

    fn flatten(&mut self, column_handle: ColumnHandle) -> Result<FlattenHandle> {
        self.column(column_handle)?;
        let (elements, keys) = self.compute_flatten_data(column_handle)?;
        let flatten_handle = self.flattens.next_id();
        let result_universe = self.add_universe_with_data(
            UniverseDerivation::Flattened {
                flatten: flatten_handle,
            },
            Arc::new(keys),
        );
        let allocated = self.flattens.alloc(Flatten {
            input_column: column_handle,
            result_universe,
            elements: Arc::new(elements),
        });
        assert_eq!(allocated, flatten_handle);
        Ok(flatten_handle)
    }

    fn flatten_(&self, handle: FlattenHandle) -> Result<&Flatten> {
        self.flattens.get(handle).ok_or(Error::InvalidFlattenHandle)
    }

    fn flatten_universe(&self, flatten_handle: FlattenHandle) -> Result<UniverseHandle> {
        Ok(self.flatten_(flatten_handle)?.result_universe)
    }

    fn flatten_column(&mut self, flatten_handle: FlattenHandle) -> Result<ColumnHandle> {
        let result_universe = self.flatten_(flatten_handle)?.result_universe;
        self.add_column(
            result_universe,
            ColumnDerivation::FlattenColumn {
                flatten: flatten_handle,
            },
            Arc::new(ColumnProperties::new()),
        )
    }

    fn explode(
        &mut self,
        flatten_handle: FlattenHandle,
        column_handle: ColumnHandle,
    ) -> Result<ColumnHandle> {
        let flatten = self.flatten_(flatten_handle)?;
        let input_universe = self.column_universe(flatten.input_column)?;
        if self.column_universe(column_handle)? != input_universe {
            return Err(Error::UniverseMismatch);
        }
        let result_universe = flatten.result_universe;
        let properties = self.column(column_handle)?.properties.clone();
        self.add_column(
            result_universe,
            ColumnDerivation::Exploded {
                flatten: flatten_handle,
                column: column_handle,
            },
            properties,
        )
    }

    fn sort(
        &mut self,
        key_column_handle: ColumnHandle,
        instance_column_handle: ColumnHandle,
    ) -> Result<(ColumnHandle, ColumnHandle)> {
        let universe_handle = self.column_universe(key_column_handle)?;
        if self.column_universe(instance_column_handle)? != universe_handle {
            return Err(Error::UniverseMismatch);
        }
        let properties = Arc::new(ColumnProperties::with_dtype(Type::Pointer));
        let prev = self.add_column(
            universe_handle,
            ColumnDerivation::SortPrev {
                key_column: key_column_handle,
                instance_column: instance_column_handle,
            },
            properties.clone(),
        )?;
        let next = self.add_column(
            universe_handle,
            ColumnDerivation::SortNext {
                key_column: key_column_handle,
                instance_column: instance_column_handle,
            },
            properties,
        )?;
        Ok((prev, next))
    }

    fn input_table(
        &mut self,
        column_properties: Vec<Arc<ColumnProperties>>,
    ) -> Result<(UniverseHandle, Vec<ColumnHandle>, InputSessionHandle)> {
        let universe_handle = self.universes.alloc(Universe {
            derivation: UniverseDerivation::Input,
            data: Arc::new(IndexSet::new()),
        });
        self.node_order.push(NodeRef::Universe(universe_handle));
        let mut column_handles = Vec::with_capacity(column_properties.len());
        for properties in column_properties {
            let handle = self.columns.alloc(Column {
                universe: universe_handle,
                derivation: ColumnDerivation::Input,
                data: Arc::new(HashMap::new()),
                properties,
            });
            self.node_order.push(NodeRef::Column(handle));
            column_handles.push(handle);
        }
        let session_handle = self.input_sessions.alloc(InputSession {
            universe: universe_handle,
            columns: column_handles.clone(),
        });
        Ok((universe_handle, column_handles, session_handle))
    }

    fn push_input_batch(
        &mut self,
        session_handle: InputSessionHandle,
        batch: Vec<DataRow>,
    ) -> Result<()> {
        self.input_sessions
            .get(session_handle)
            .ok_or(Error::InvalidInputSessionHandle)?;
        self.pending_batches.push_back((session_handle, batch));
        Ok(())
    }

    fn subscribe_column(
        &mut self,
        on_change: OnChangeCallback,
        on_end: OnEndCallback,
        universe_handle: UniverseHandle,
        column_handles: Vec<ColumnHandle>,
    ) -> Result<()> {
        self.universe(universe_handle)?;
        self.check_same_universe(universe_handle, &column_handles)?;
        let seen_values = column_handles
            .iter()
            .map(|_| Arc::new(HashMap::new()))
            .collect();
        self.subscribers.push(Subscriber {
            universe: universe_handle,
            columns: column_handles,
            on_change,
            on_end,
            seen_keys: Arc::new(IndexSet::new()),
            seen_values,
        });
        Ok(())
    }

    fn on_universe_data(
        &mut self,
        universe_handle: UniverseHandle,
        function: Box<dyn FnMut(&Key, isize) -> DynResult<()>>,
    ) -> Result<()> {
        self.universe(universe_handle)?;
        self.universe_observers.push(UniverseObserver {
            universe: universe_handle,
            function,
            seen_keys: Arc::new(IndexSet::new()),
        });
        Ok(())
    }

    fn on_column_data(
        &mut self,
        column_handle: ColumnHandle,
        function: Box<dyn FnMut(&Key, &Value, isize) -> DynResult<()>>,
    ) -> Result<()> {
        self.column(column_handle)?;
        self.column_observers.push(ColumnObserver {
            column: column_handle,
            function,
            seen_keys: Arc::new(IndexSet::new()),
            seen_values: Arc::new(HashMap::new()),
        });
        Ok(())
    }

    fn debug_universe(&self, tag: &str, universe_handle: UniverseHandle) -> Result<()> {
        let keys = self.universe_keys(universe_handle)?;
        for key in keys.iter() {
            info!("[{tag}] {key}");
        }
        Ok(())
    }

    fn debug_column(&self, tag: &str, column_handle: ColumnHandle) -> Result<()> {
        let universe_handle = self.column_universe(column_handle)?;
        let keys = self.universe_keys(universe_handle)?;
        let values = self.column_values(column_handle)?;
        for key in keys.iter() {
            let value = values.get(key).unwrap_or(&Value::None);
            info!("[{tag}] {key} => {value}");
        }
        Ok(())
    }

    fn probe_universe(&mut self, universe_handle: UniverseHandle, operator_id: usize) -> Result<()> {
        self.universe(universe_handle)?;
        self.probes.push(Probe {
            node: NodeRef::Universe(universe_handle),
            operator_id,
        });
        Ok(())
    }

    fn probe_column(&mut self, column_handle: ColumnHandle, operator_id: usize) -> Result<()> {
        self.column(column_handle)?;
        self.probes.push(Probe {
            node: NodeRef::Column(column_handle),
            operator_id,
        });
        Ok(())
    }

    // -- recomputation --

    fn compute_grouped(
        &self,
        source_universe: UniverseHandle,
        column_handles: &[ColumnHandle],
        set_id: bool,
    ) -> Result<(HashMap<Key, Key>, IndexSet<Key>)> {
        let keys = self.universe_keys(source_universe)?;
        let columns: Vec<ValuesMap> = column_handles
            .iter()
            .map(|handle| self.column_values(*handle))
            .try_collect()?;
        let mut mapping = HashMap::with_capacity(keys.len());
        let mut result = IndexSet::new();
        for key in keys.iter() {
            let values: Vec<Value> = columns
                .iter()
                .map(|column| {
                    column
                        .get(key)
                        .cloned()
                        .ok_or(DataError::KeyMissingInColumn(*key))
                })
                .try_collect()?;
            let group_key = if set_id {
                values[0].as_pointer().map_err(Error::from)?
            } else {
                Key::for_values(&values)
            };
            mapping.insert(*key, group_key);
            result.insert(group_key);
        }
        Ok((mapping, result))
    }

    #[allow(clippy::type_complexity)]
    fn compute_ix_data(
        &self,
        key_column: ColumnHandle,
        input_universe: UniverseHandle,
        policy: IxKeyPolicy,
    ) -> Result<(HashMap<Key, Option<Key>>, IndexSet<Key>)> {
        let universe = self.column_universe(key_column)?;
        let keys = self.universe_keys(universe)?;
        let values = self.column_values(key_column)?;
        let input_keys = self.universe_keys(input_universe)?;
        let mut targets = HashMap::with_capacity(keys.len());
        for key in keys.iter() {
            let value = values.get(key).ok_or(DataError::KeyMissingInColumn(*key))?;
            let target = match (policy, value) {
                (IxKeyPolicy::ForwardNone, Value::None) => None,
                (_, value) => {
                    let pointer = value.as_pointer().map_err(Error::from)?;
                    if input_keys.contains(&pointer) {
                        Some(pointer)
                    } else if policy == IxKeyPolicy::ForwardNone {
                        None
                    } else {
                        return Err(DataError::KeyMissingInUniverse(pointer).into());
                    }
                }
            };
            targets.insert(*key, target);
        }
        Ok((targets, (*keys).clone()))
    }

    #[allow(clippy::type_complexity)]
    fn compute_join_data(
        &self,
        join_type: JoinType,
        left_universe: UniverseHandle,
        right_universe: UniverseHandle,
        left_key_columns: &[ColumnHandle],
        right_key_columns: &[ColumnHandle],
    ) -> Result<(
        IndexSet<Key>,
        HashMap<Key, Option<Key>>,
        HashMap<Key, Option<Key>>,
    )> {
        let left_keys = self.universe_keys(left_universe)?;
        let right_keys = self.universe_keys(right_universe)?;
        let left_columns: Vec<ValuesMap> = left_key_columns
            .iter()
            .map(|handle| self.column_values(*handle))
            .try_collect()?;
        let right_columns: Vec<ValuesMap> = right_key_columns
            .iter()
            .map(|handle| self.column_values(*handle))
            .try_collect()?;

        let join_key = |columns: &[ValuesMap], key: &Key| -> Result<Vec<Value>> {
            columns
                .iter()
                .map(|column| {
                    column
                        .get(key)
                        .cloned()
                        .ok_or_else(|| Error::from(DataError::KeyMissingInColumn(*key)))
                })
                .try_collect()
        };

        let mut right_groups: HashMap<Vec<Value>, Vec<Key>> = HashMap::new();
        for key in right_keys.iter() {
            right_groups
                .entry(join_key(&right_columns, key)?)
                .or_default()
                .push(*key);
        }

        let assigns_left_key =
            matches!(join_type, JoinType::LeftKeysSubset | JoinType::LeftKeysFull);
        let left_ear = matches!(join_type, JoinType::LeftOuter | JoinType::FullOuter);
        let right_ear = matches!(join_type, JoinType::RightOuter | JoinType::FullOuter);

        let mut result = IndexSet::new();
        let mut left_source = HashMap::new();
        let mut right_source = HashMap::new();
        let mut matched_right: HashSet<Key> = HashSet::new();

        for left_key in left_keys.iter() {
            match right_groups.get(&join_key(&left_columns, left_key)?) {
                Some(right_matches) => {
                    if assigns_left_key && right_matches.len() > 1 {
                        return Err(DataError::DuplicateKey(*left_key).into());
                    }
                    for right_key in right_matches {
                        matched_right.insert(*right_key);
                        let result_key = if assigns_left_key {
                            *left_key
                        } else {
                            Key::for_values(&[
                                Value::Pointer(*left_key),
                                Value::Pointer(*right_key),
                            ])
                        };
                        result.insert(result_key);
                        left_source.insert(result_key, Some(*left_key));
                        right_source.insert(result_key, Some(*right_key));
                    }
                }
                None => {
                    if join_type == JoinType::LeftKeysFull {
                        return Err(DataError::KeyMissingInUniverse(*left_key).into());
                    }
                    if left_ear {
                        let result_key =
                            Key::for_values(&[Value::Pointer(*left_key), Value::None]);
                        result.insert(result_key);
                        left_source.insert(result_key, Some(*left_key));
                        right_source.insert(result_key, None);
                    }
                }
            }
        }

        if right_ear {
            for right_key in right_keys.iter() {
                if !matched_right.contains(right_key) {
                    let result_key = Key::for_values(&[Value::None, Value::Pointer(*right_key)]);
                    result.insert(result_key);
                    left_source.insert(result_key, None);
                    right_source.insert(result_key, Some(*right_key));
                }
            }
        }

        Ok((result, left_source, right_source))
    }

    #[allow(clippy::type_complexity)]
    fn compute_flatten_data(
        &self,
        input_column: ColumnHandle,
    ) -> Result<(HashMap<Key, (Key, Value)>, IndexSet<Key>)> {
        let universe = self.column_universe(input_column)?;
        let keys = self.universe_keys(universe)?;
        let values = self.column_values(input_column)?;
        let mut elements = HashMap::new();
        let mut result = IndexSet::new();
        for key in keys.iter() {
            let value = values.get(key).ok_or(DataError::KeyMissingInColumn(*key))?;
            for (index, element) in flatten_value(value)?.into_iter().enumerate() {
                let element_key = Key::for_values(&[
                    Value::Pointer(*key),
                    Value::Int(i64::try_from(index).unwrap()),
                ]);
                elements.insert(element_key, (*key, element));
                result.insert(element_key);
            }
        }
        Ok((elements, result))
    }

    fn compute_universe_data(&mut self, derivation: &UniverseDerivation) -> Result<KeySet> {
        match derivation {
            UniverseDerivation::Static(keys) => Ok(keys.clone()),
            UniverseDerivation::Input => unreachable!("input universes are updated directly"),
            UniverseDerivation::Filtered { universe, column } => {
                let keys = self.universe_keys(*universe)?;
                let values = self.column_values(*column)?;
                let mut result = IndexSet::new();
                for key in keys.iter() {
                    let value = values.get(key).ok_or(DataError::KeyMissingInColumn(*key))?;
                    if value.as_bool().map_err(Error::from)? {
                        result.insert(*key);
                    }
                }
                Ok(Arc::new(result))
            }
            UniverseDerivation::Intersection(universes) => {
                let (first, rest) = universes.split_first().ok_or(Error::EmptyIntersection)?;
                let first_keys = self.universe_keys(*first)?;
                let rest_keys: Vec<KeySet> = rest
                    .iter()
                    .map(|handle| self.universe_keys(*handle))
                    .try_collect()?;
                Ok(Arc::new(
                    first_keys
                        .iter()
                        .filter(|key| rest_keys.iter().all(|keys| keys.contains(*key)))
                        .copied()
                        .collect(),
                ))
            }
            UniverseDerivation::Union(universes) => {
                let mut result = IndexSet::new();
                for universe_handle in universes {
                    let keys = self.universe_keys(*universe_handle)?;
                    for key in keys.iter() {
                        result.insert(*key);
                    }
                }
                Ok(Arc::new(result))
            }
            UniverseDerivation::VennOnlyLeft { left, right } => {
                let left_keys = self.universe_keys(*left)?;
                let right_keys = self.universe_keys(*right)?;
                Ok(Arc::new(
                    left_keys
                        .iter()
                        .filter(|key| !right_keys.contains(*key))
                        .copied()
                        .collect(),
                ))
            }
            UniverseDerivation::VennOnlyRight { left, right } => {
                let left_keys = self.universe_keys(*left)?;
                let right_keys = self.universe_keys(*right)?;
                Ok(Arc::new(
                    right_keys
                        .iter()
                        .filter(|key| !left_keys.contains(*key))
                        .copied()
                        .collect(),
                ))
            }
            UniverseDerivation::VennBoth { left, right } => {
                let left_keys = self.universe_keys(*left)?;
                let right_keys = self.universe_keys(*right)?;
                Ok(Arc::new(
                    left_keys
                        .iter()
                        .filter(|key| right_keys.contains(*key))
                        .copied()
                        .collect(),
                ))
            }
            UniverseDerivation::Reindexed { column } => {
                let universe = self.column_universe(*column)?;
                let keys = self.universe_keys(universe)?;
                let values = self.column_values(*column)?;
                let mut result = IndexSet::new();
                for key in keys.iter() {
                    let value = values.get(key).ok_or(DataError::KeyMissingInColumn(*key))?;
                    let new_key = value.as_pointer().map_err(Error::from)?;
                    if !result.insert(new_key) {
                        return Err(DataError::DuplicateKey(new_key).into());
                    }
                }
                Ok(Arc::new(result))
            }
            UniverseDerivation::Grouped { grouper } => {
                let (source_universe, column_handles, set_id) = {
                    let grouper = self.grouper(*grouper)?;
                    (
                        grouper.source_universe,
                        grouper.column_handles.clone(),
                        grouper.set_id,
                    )
                };
                let (mapping, keys) =
                    self.compute_grouped(source_universe, &column_handles, set_id)?;
                self.groupers[*grouper].mapping = Arc::new(mapping);
                Ok(Arc::new(keys))
            }
            UniverseDerivation::Joined { joiner } => {
                let (join_type, left_universe, right_universe, left_columns, right_columns) = {
                    let joiner = self.joiner(*joiner)?;
                    (
                        joiner.join_type,
                        joiner.left_universe,
                        joiner.right_universe,
                        joiner.left_key_columns.clone(),
                        joiner.right_key_columns.clone(),
                    )
                };
                let (keys, left_source, right_source) = self.compute_join_data(
                    join_type,
                    left_universe,
                    right_universe,
                    &left_columns,
                    &right_columns,
                )?;
                let joiner = &mut self.joiners[*joiner];
                joiner.left_source = Arc::new(left_source);
                joiner.right_source = Arc::new(right_source);
                Ok(Arc::new(keys))
            }
            UniverseDerivation::Ixed { ixer } => {
                let (key_column, input_universe, policy) = {
                    let ixer = self.ixer(*ixer)?;
                    (ixer.key_column, ixer.input_universe, ixer.policy)
                };
                let (targets, keys) = self.compute_ix_data(key_column, input_universe, policy)?;
                self.ixers[*ixer].targets = Arc::new(targets);
                Ok(Arc::new(keys))
            }
            UniverseDerivation::Concatenated(universes) => {
                let mut result = IndexSet::new();
                for universe_handle in universes {
                    let keys = self.universe_keys(*universe_handle)?;
                    for key in keys.iter() {
                        if !result.insert(*key) {
                            return Err(DataError::DuplicateKey(*key).into());
                        }
                    }
                }
                Ok(Arc::new(result))
            }
            UniverseDerivation::Flattened { flatten } => {
                let input_column = self.flatten_(*flatten)?.input_column;
                let (elements, keys) = self.compute_flatten_data(input_column)?;
                self.flattens[*flatten].elements = Arc::new(elements);
                Ok(Arc::new(keys))
            }
        }
    }

    #[allow(clippy::too_many_lines)]
    fn compute_column_data(
        &mut self,
        universe_handle: UniverseHandle,
        derivation: &ColumnDerivation,
    ) -> Result<ValuesMap> {
        match derivation {
            ColumnDerivation::Static(values) => Ok(values.clone()),
            ColumnDerivation::Input => unreachable!("input columns are updated directly"),
            ColumnDerivation::Id => {
                let keys = self.universe_keys(universe_handle)?;
                Ok(Arc::new(
                    keys.iter().map(|key| (*key, Value::Pointer(*key))).collect(),
                ))
            }
            ColumnDerivation::Expression {
                expression,
                inputs,
                trace,
            } => {
                let rows = self.gather_rows(universe_handle, inputs)?;
                let evaluated: Vec<(Key, DynResult<Value>)> = rows
                    .par_iter()
                    .map(|(key, args)| (*key, expression.eval(args)))
                    .collect();
                let mut data = HashMap::with_capacity(evaluated.len());
                for (key, result) in evaluated {
                    let value = result.map_err(|err| with_trace(err, trace))?;
                    data.insert(key, value);
                }
                Ok(Arc::new(data))
            }
            ColumnDerivation::Map { function, inputs } => {
                let rows = self.gather_rows(universe_handle, inputs)?;
                let evaluated: Vec<(Key, DynResult<Value>)> = rows
                    .par_iter()
                    .map(|(key, args)| (*key, function(*key, args)))
                    .collect();
                let mut data = HashMap::with_capacity(evaluated.len());
                for (key, result) in evaluated {
                    data.insert(key, result.map_err(Error::from)?);
                }
                Ok(Arc::new(data))
            }
            ColumnDerivation::AsyncMap {
                function,
                inputs,
                trace,
            } => {
                let rows = self.gather_rows(universe_handle, inputs)?;
                let (sender, receiver) = unbounded();
                let mut in_flight: FuturesUnordered<_> = rows
                    .iter()
                    .map(|(key, args)| {
                        let future = function(*key, args);
                        let key = *key;
                        async move { (key, future.await) }
                    })
                    .collect();
                futures::executor::block_on(async {
                    while let Some(completed) = in_flight.next().await {
                        sender.send(completed).expect("receiver outlives the loop");
                    }
                });
                drop(sender);
                let mut data = HashMap::with_capacity(rows.len());
                for (key, result) in receiver {
                    let value = result.map_err(|err| with_trace(err, trace))?;
                    data.insert(key, value);
                }
                Ok(Arc::new(data))
            }
            ColumnDerivation::Restricted { column } => {
                let keys = self.universe_keys(universe_handle)?;
                let values = self.column_values(*column)?;
                let mut data = HashMap::with_capacity(keys.len());
                for key in keys.iter() {
                    let value = values
                        .get(key)
                        .ok_or(DataError::KeyMissingInUniverse(*key))?;
                    data.insert(*key, value.clone());
                }
                Ok(Arc::new(data))
            }
            ColumnDerivation::Overridden { column } => {
                let values = self.column_values(*column)?;
                if !self.ignore_asserts {
                    let keys = self.universe_keys(universe_handle)?;
                    let original_universe = self.column_universe(*column)?;
                    let original_keys = self.universe_keys(original_universe)?;
                    if *keys != *original_keys {
                        return Err(Error::UniverseMismatch);
                    }
                }
                Ok(values)
            }
            ColumnDerivation::Reindexed {
                column,
                reindexing_column,
            } => {
                let source_universe = self.column_universe(*column)?;
                let keys = self.universe_keys(source_universe)?;
                let values = self.column_values(*column)?;
                let reindexing = self.column_values(*reindexing_column)?;
                let target_keys = self.universe_keys(universe_handle)?;
                let mut data = HashMap::with_capacity(keys.len());
                for key in keys.iter() {
                    let new_key = reindexing
                        .get(key)
                        .ok_or(DataError::KeyMissingInColumn(*key))?
                        .as_pointer()
                        .map_err(Error::from)?;
                    if !target_keys.contains(&new_key) {
                        return Err(DataError::KeyMissingInUniverse(new_key).into());
                    }
                    let value = values.get(key).ok_or(DataError::KeyMissingInColumn(*key))?;
                    if data.insert(new_key, value.clone()).is_some() {
                        return Err(DataError::DuplicateKey(new_key).into());
                    }
                }
                Ok(Arc::new(data))
            }
            ColumnDerivation::UpdateRows { column, updates } => {
                let keys = self.universe_keys(universe_handle)?;
                let values = self.column_values(*column)?;
                let update_values = self.column_values(*updates)?;
                let mut data = HashMap::with_capacity(keys.len());
                for key in keys.iter() {
                    let value = update_values
                        .get(key)
                        .or_else(|| values.get(key))
                        .ok_or(DataError::KeyMissingInColumn(*key))?;
                    data.insert(*key, value.clone());
                }
                Ok(Arc::new(data))
            }
            ColumnDerivation::GrouperInput { grouper, column } => {
                let grouper = self.grouper(*grouper)?;
                let mapping = grouper.mapping.clone();
                let keys = self.universe_keys(grouper.source_universe)?;
                let values = self.column_values(*column)?;
                let mut data = HashMap::new();
                for key in keys.iter() {
                    let value = values.get(key).ok_or(DataError::KeyMissingInColumn(*key))?;
                    data.insert(mapping[key], value.clone());
                }
                Ok(Arc::new(data))
            }
            ColumnDerivation::GrouperCount { grouper } => {
                let grouper = self.grouper(*grouper)?;
                let mapping = grouper.mapping.clone();
                let keys = self.universe_keys(grouper.source_universe)?;
                let mut counts: HashMap<Key, i64> = HashMap::new();
                for key in keys.iter() {
                    *counts.entry(mapping[key]).or_default() += 1;
                }
                Ok(Arc::new(
                    counts
                        .into_iter()
                        .map(|(key, count)| (key, Value::Int(count)))
                        .collect(),
                ))
            }
            ColumnDerivation::GrouperReducer {
                grouper,
                reducer,
                column,
            } => {
                let (mapping, source_universe) = {
                    let grouper = self.grouper(*grouper)?;
                    (grouper.mapping.clone(), grouper.source_universe)
                };
                let keys = self.universe_keys(source_universe)?;
                let values = self.column_values(*column)?;
                let lookup = |key: &Key| -> Result<Value> {
                    values
                        .get(key)
                        .cloned()
                        .ok_or_else(|| DataError::KeyMissingInColumn(*key).into())
                };
                reduce_groups(&keys, &mapping, *reducer, lookup)
            }
            ColumnDerivation::GrouperReducerIx {
                grouper,
                reducer,
                ixer,
                column,
            } => {
                let (mapping, source_universe) = {
                    let grouper = self.grouper(*grouper)?;
                    (grouper.mapping.clone(), grouper.source_universe)
                };
                let targets = self.ixer(*ixer)?.targets.clone();
                let keys = self.universe_keys(source_universe)?;
                let values = self.column_values(*column)?;
                let lookup = |key: &Key| -> Result<Value> {
                    match targets.get(key).ok_or(DataError::KeyMissingInColumn(*key))? {
                        Some(target) => values
                            .get(target)
                            .cloned()
                            .ok_or_else(|| DataError::KeyMissingInColumn(*target).into()),
                        None => Ok(Value::None),
                    }
                };
                reduce_groups(&keys, &mapping, *reducer, lookup)
            }
            ColumnDerivation::JoinerLeft { joiner, column } => {
                let source = self.joiner(*joiner)?.left_source.clone();
                self.joined_column(universe_handle, &source, *column)
            }
            ColumnDerivation::JoinerRight { joiner, column } => {
                let source = self.joiner(*joiner)?.right_source.clone();
                self.joined_column(universe_handle, &source, *column)
            }
            ColumnDerivation::IxColumn { ixer, column } => {
                let targets = self.ixer(*ixer)?.targets.clone();
                let keys = self.universe_keys(universe_handle)?;
                let values = self.column_values(*column)?;
                let mut data = HashMap::with_capacity(keys.len());
                for key in keys.iter() {
                    let value = match targets
                        .get(key)
                        .ok_or(DataError::KeyMissingInColumn(*key))?
                    {
                        Some(target) => values
                            .get(target)
                            .cloned()
                            .ok_or(DataError::KeyMissingInColumn(*target))?,
                        None => Value::None,
                    };
                    data.insert(*key, value);
                }
                Ok(Arc::new(data))
            }
            ColumnDerivation::ConcatColumn { columns } => {
                let mut data = HashMap::new();
                for column_handle in columns {
                    let universe = self.column_universe(*column_handle)?;
                    let keys = self.universe_keys(universe)?;
                    let values = self.column_values(*column_handle)?;
                    for key in keys.iter() {
                        let value = values.get(key).ok_or(DataError::KeyMissingInColumn(*key))?;
                        data.insert(*key, value.clone());
                    }
                }
                Ok(Arc::new(data))
            }
            ColumnDerivation::FlattenColumn { flatten } => {
                let elements = self.flatten_(*flatten)?.elements.clone();
                Ok(Arc::new(
                    elements
                        .iter()
                        .map(|(key, (_source, value))| (*key, value.clone()))
                        .collect(),
                ))
            }
            ColumnDerivation::Exploded { flatten, column } => {
                let elements = self.flatten_(*flatten)?.elements.clone();
                let values = self.column_values(*column)?;
                let mut data = HashMap::with_capacity(elements.len());
                for (key, (source, _element)) in elements.iter() {
                    let value = values
                        .get(source)
                        .ok_or(DataError::KeyMissingInColumn(*source))?;
                    data.insert(*key, value.clone());
                }
                Ok(Arc::new(data))
            }
            ColumnDerivation::SortPrev {
                key_column,
                instance_column,
            } => self.compute_sort(universe_handle, *key_column, *instance_column, false),
            ColumnDerivation::SortNext {
                key_column,
                instance_column,
            } => self.compute_sort(universe_handle, *key_column, *instance_column, true),
        }
    }

    fn gather_rows(
        &self,
        universe_handle: UniverseHandle,
        inputs: &[ColumnHandle],
    ) -> Result<Vec<(Key, SmallVec<[Value; 4]>)>> {
        let keys = self.universe_keys(universe_handle)?;
        let columns: Vec<ValuesMap> = inputs
            .iter()
            .map(|handle| self.column_values(*handle))
            .try_collect()?;
        let mut rows = Vec::with_capacity(keys.len());
        for key in keys.iter() {
            let args: SmallVec<[Value; 4]> = columns
                .iter()
                .map(|column| {
                    column
                        .get(key)
                        .cloned()
                        .ok_or(DataError::KeyMissingInColumn(*key))
                })
                .try_collect()?;
            rows.push((*key, args));
        }
        Ok(rows)
    }

    fn joined_column(
        &self,
        universe_handle: UniverseHandle,
        source: &HashMap<Key, Option<Key>>,
        column_handle: ColumnHandle,
    ) -> Result<ValuesMap> {
        let keys = self.universe_keys(universe_handle)?;
        let values = self.column_values(column_handle)?;
        let mut data = HashMap::with_capacity(keys.len());
        for key in keys.iter() {
            let value = match source.get(key).ok_or(DataError::KeyMissingInColumn(*key))? {
                Some(source_key) => values
                    .get(source_key)
                    .cloned()
                    .ok_or(DataError::KeyMissingInColumn(*source_key))?,
                None => Value::None,
            };
            data.insert(*key, value);
        }
        Ok(Arc::new(data))
    }

    fn compute_sort(
        &self,
        universe_handle: UniverseHandle,
        key_column: ColumnHandle,
        instance_column: ColumnHandle,
        next: bool,
    ) -> Result<ValuesMap> {
        let keys = self.universe_keys(universe_handle)?;
        let key_values = self.column_values(key_column)?;
        let instance_values = self.column_values(instance_column)?;
        let mut rows: Vec<(Value, Value, Key)> = Vec::with_capacity(keys.len());
        for key in keys.iter() {
            let instance = instance_values
                .get(key)
                .ok_or(DataError::KeyMissingInColumn(*key))?;
            let sort_key = key_values
                .get(key)
                .ok_or(DataError::KeyMissingInColumn(*key))?;
            rows.push((instance.clone(), sort_key.clone(), *key));
        }
        // equal sort keys order by ascending row key
        rows.sort();
        let mut data = HashMap::with_capacity(rows.len());
        for (index, (instance, _sort_key, key)) in rows.iter().enumerate() {
            let neighbor = if next {
                rows.get(index + 1)
            } else {
                index.checked_sub(1).and_then(|i| rows.get(i))
            };
            let value = match neighbor {
                Some((other_instance, _other_sort_key, other_key))
                    if other_instance == instance =>
                {
                    Value::Pointer(*other_key)
                }
                _ => Value::None,
            };
            data.insert(*key, value);
        }
        Ok(Arc::new(data))
    }

    // -- change propagation --

    fn parents(&self, node: NodeRef) -> Result<SmallVec<[NodeRef; 4]>> {
        let mut parents = SmallVec::new();
        fn push_universe(parents: &mut SmallVec<[NodeRef; 4]>, handle: UniverseHandle) {
            parents.push(NodeRef::Universe(handle));
        }
        fn push_columns(parents: &mut SmallVec<[NodeRef; 4]>, handles: &[ColumnHandle]) {
            parents.extend(handles.iter().map(|handle| NodeRef::Column(*handle)));
        }
        match node {
            NodeRef::Universe(handle) => match &self.universe(handle)?.derivation {
                UniverseDerivation::Static(_) | UniverseDerivation::Input => {}
                UniverseDerivation::Filtered { universe, column } => {
                    push_universe(&mut parents, *universe);
                    parents.push(NodeRef::Column(*column));
                }
                UniverseDerivation::Intersection(universes)
                | UniverseDerivation::Union(universes)
                | UniverseDerivation::Concatenated(universes) => {
                    for universe in universes {
                        push_universe(&mut parents, *universe);
                    }
                }
                UniverseDerivation::VennOnlyLeft { left, right }
                | UniverseDerivation::VennOnlyRight { left, right }
                | UniverseDerivation::VennBoth { left, right } => {
                    push_universe(&mut parents, *left);
                    push_universe(&mut parents, *right);
                }
                UniverseDerivation::Reindexed { column } => {
                    parents.push(NodeRef::Column(*column));
                }
                UniverseDerivation::Grouped { grouper } => {
                    let grouper = self.grouper(*grouper)?;
                    push_universe(&mut parents, grouper.source_universe);
                    push_columns(&mut parents, &grouper.column_handles);
                }
                UniverseDerivation::Joined { joiner } => {
                    let joiner = self.joiner(*joiner)?;
                    push_universe(&mut parents, joiner.left_universe);
                    push_universe(&mut parents, joiner.right_universe);
                    push_columns(&mut parents, &joiner.left_key_columns);
                    push_columns(&mut parents, &joiner.right_key_columns);
                }
                UniverseDerivation::Ixed { ixer } => {
                    let ixer = self.ixer(*ixer)?;
                    parents.push(NodeRef::Column(ixer.key_column));
                    push_universe(&mut parents, ixer.input_universe);
                }
                UniverseDerivation::Flattened { flatten } => {
                    parents.push(NodeRef::Column(self.flatten_(*flatten)?.input_column));
                }
            },
            NodeRef::Column(handle) => {
                let column = self.column(handle)?;
                push_universe(&mut parents, column.universe);
                match &column.derivation {
                    ColumnDerivation::Static(_)
                    | ColumnDerivation::Input
                    | ColumnDerivation::Id => {}
                    ColumnDerivation::Expression { inputs, .. }
                    | ColumnDerivation::Map { inputs, .. }
                    | ColumnDerivation::AsyncMap { inputs, .. } => {
                        push_columns(&mut parents, inputs);
                    }
                    ColumnDerivation::Restricted { column }
                    | ColumnDerivation::Overridden { column } => {
                        parents.push(NodeRef::Column(*column));
                    }
                    ColumnDerivation::Reindexed {
                        column,
                        reindexing_column,
                    } => {
                        parents.push(NodeRef::Column(*column));
                        parents.push(NodeRef::Column(*reindexing_column));
                    }
                    ColumnDerivation::UpdateRows { column, updates } => {
                        parents.push(NodeRef::Column(*column));
                        parents.push(NodeRef::Column(*updates));
                    }
                    ColumnDerivation::GrouperInput { grouper, column }
                    | ColumnDerivation::GrouperReducer {
                        grouper, column, ..
                    } => {
                        let grouper = self.grouper(*grouper)?;
                        push_universe(&mut parents, grouper.source_universe);
                        push_columns(&mut parents, &grouper.column_handles);
                        parents.push(NodeRef::Column(*column));
                    }
                    ColumnDerivation::GrouperCount { grouper } => {
                        let grouper = self.grouper(*grouper)?;
                        push_universe(&mut parents, grouper.source_universe);
                        push_columns(&mut parents, &grouper.column_handles);
                    }
                    ColumnDerivation::GrouperReducerIx {
                        grouper,
                        ixer,
                        column,
                        ..
                    } => {
                        let grouper = self.grouper(*grouper)?;
                        push_universe(&mut parents, grouper.source_universe);
                        push_columns(&mut parents, &grouper.column_handles);
                        let ixer = self.ixer(*ixer)?;
                        parents.push(NodeRef::Column(ixer.key_column));
                        push_universe(&mut parents, ixer.input_universe);
                        parents.push(NodeRef::Column(*column));
                    }
                    ColumnDerivation::JoinerLeft { joiner, column }
                    | ColumnDerivation::JoinerRight { joiner, column } => {
                        let joiner = self.joiner(*joiner)?;
                        push_universe(&mut parents, joiner.left_universe);
                        push_universe(&mut parents, joiner.right_universe);
                        push_columns(&mut parents, &joiner.left_key_columns);
                        push_columns(&mut parents, &joiner.right_key_columns);
                        parents.push(NodeRef::Column(*column));
                    }
                    ColumnDerivation::IxColumn { ixer, column } => {
                        let ixer = self.ixer(*ixer)?;
                        parents.push(NodeRef::Column(ixer.key_column));
                        push_universe(&mut parents, ixer.input_universe);
                        parents.push(NodeRef::Column(*column));
                    }
                    ColumnDerivation::ConcatColumn { columns } => {
                        push_columns(&mut parents, columns);
                    }
                    ColumnDerivation::FlattenColumn { flatten } => {
                        parents.push(NodeRef::Column(self.flatten_(*flatten)?.input_column));
                    }
                    ColumnDerivation::Exploded { flatten, column } => {
                        parents.push(NodeRef::Column(self.flatten_(*flatten)?.input_column));
                        parents.push(NodeRef::Column(*column));
                    }
                    ColumnDerivation::SortPrev {
                        key_column,
                        instance_column,
                    }
                    | ColumnDerivation::SortNext {
                        key_column,
                        instance_column,
                    } => {
                        parents.push(NodeRef::Column(*key_column));
                        parents.push(NodeRef::Column(*instance_column));
                    }
                }
            }
        }
        Ok(parents)
    }

    fn apply_batch(
        &mut self,
        session_handle: InputSessionHandle,
        batch: Vec<DataRow>,
    ) -> Result<()> {
        let (universe_handle, column_handles) = {
            let session = self
                .input_sessions
                .get(session_handle)
                .ok_or(Error::InvalidInputSessionHandle)?;
            (session.universe, session.columns.clone())
        };
        let mut keys = (*self.universe(universe_handle)?.data).clone();
        let mut columns: Vec<HashMap<Key, Value>> = column_handles
            .iter()
            .map(|handle| Ok((*self.column(*handle)?.data).clone()))
            .collect::<Result<_>>()?;
        let dtypes: Vec<CompoundType> = column_handles
            .iter()
            .map(|handle| Ok(CompoundType::new(self.column(*handle)?.properties.dtype, true)))
            .collect::<Result<_>>()?;
        for row in batch {
            if row.values.len() != column_handles.len() {
                return Err(Error::LengthMismatch);
            }
            match row.diff {
                1 => {
                    if !keys.insert(row.key) {
                        return Err(DataError::DuplicateKey(row.key).into());
                    }
                    for ((column, dtype), value) in
                        columns.iter_mut().zip(dtypes.iter()).zip(row.values)
                    {
                        let value = dtype.convert_value(value).map_err(Error::from)?;
                        column.insert(row.key, value);
                    }
                }
                -1 => {
                    // shift_remove keeps the insertion order of the remaining rows
                    if !keys.shift_remove(&row.key) {
                        return Err(DataError::KeyMissingInUniverse(row.key).into());
                    }
                    for column in &mut columns {
                        column.remove(&row.key);
                    }
                }
                diff => {
                    return Err(Error::ValueError(format!(
                        "unsupported diff {diff} in input batch"
                    )))
                }
            }
        }
        self.universes[universe_handle].data = Arc::new(keys);
        self.dirty.insert(NodeRef::Universe(universe_handle));
        for (handle, column) in column_handles.iter().zip(columns) {
            self.columns[*handle].data = Arc::new(column);
            self.dirty.insert(NodeRef::Column(*handle));
        }
        Ok(())
    }

    fn propagate(&mut self) -> Result<()> {
        let node_order = self.node_order.clone();
        for node in node_order {
            // input and static nodes hold their data directly; apply_batch
            // already marked the updated ones dirty
            let updated_directly = match node {
                NodeRef::Universe(handle) => matches!(
                    self.universes[handle].derivation,
                    UniverseDerivation::Static(_) | UniverseDerivation::Input
                ),
                NodeRef::Column(handle) => matches!(
                    self.columns[handle].derivation,
                    ColumnDerivation::Static(_) | ColumnDerivation::Input
                ),
            };
            if updated_directly {
                continue;
            }
            let parents = self.parents(node)?;
            if !parents.iter().any(|parent| self.dirty.contains(parent)) {
                continue;
            }
            let changed = match node {
                NodeRef::Universe(handle) => {
                    let derivation = self.universes[handle].derivation.clone();
                    let new_data = self.compute_universe_data(&derivation)?;
                    let universe = &mut self.universes[handle];
                    if *universe.data == *new_data {
                        false
                    } else {
                        universe.data = new_data;
                        true
                    }
                }
                NodeRef::Column(handle) => {
                    let (universe_handle, derivation) = {
                        let column = &self.columns[handle];
                        (column.universe, column.derivation.clone())
                    };
                    let new_data = self.compute_column_data(universe_handle, &derivation)?;
                    if !self.ignore_asserts {
                        self.assert_column_totality(universe_handle, &new_data)?;
                    }
                    let column = &mut self.columns[handle];
                    if *column.data == *new_data {
                        false
                    } else {
                        column.data = new_data;
                        true
                    }
                }
            };
            if changed {
                self.dirty.insert(node);
            }
        }
        Ok(())
    }

    // -- delivery --

    fn emit_changes(&mut self) -> Result<()> {
        let time = self.current_time;

        let mut subscribers = std::mem::take(&mut self.subscribers);
        let result: Result<()> = (|| {
            for subscriber in &mut subscribers {
                let keys = self.universe_keys(subscriber.universe)?;
                let values: Vec<ValuesMap> = subscriber
                    .columns
                    .iter()
                    .map(|handle| self.column_values(*handle))
                    .try_collect()?;
                let row = |maps: &[ValuesMap], key: &Key| -> Vec<Value> {
                    maps.iter()
                        .map(|map| map.get(key).cloned().unwrap_or(Value::None))
                        .collect()
                };
                let seen_values = &subscriber.seen_values;
                let changed = |key: &Key| -> bool {
                    values
                        .iter()
                        .zip(seen_values.iter())
                        .any(|(new, old)| new.get(key) != old.get(key))
                };
                // deletions first, additions after; an update is both
                for key in subscriber.seen_keys.iter() {
                    if !keys.contains(key) || changed(key) {
                        let old_row = row(&subscriber.seen_values, key);
                        (subscriber.on_change)(*key, &old_row, time, -1).map_err(Error::from)?;
                    }
                }
                for key in keys.iter() {
                    if !subscriber.seen_keys.contains(key) || changed(key) {
                        let new_row = row(&values, key);
                        (subscriber.on_change)(*key, &new_row, time, 1).map_err(Error::from)?;
                    }
                }
                subscriber.seen_keys = keys;
                subscriber.seen_values = values;
            }
            Ok(())
        })();
        self.subscribers = subscribers;
        result?;

        let mut universe_observers = std::mem::take(&mut self.universe_observers);
        let result: Result<()> = (|| {
            for observer in &mut universe_observers {
                let keys = self.universe_keys(observer.universe)?;
                for key in observer.seen_keys.iter() {
                    if !keys.contains(key) {
                        (observer.function)(key, -1).map_err(Error::from)?;
                    }
                }
                for key in keys.iter() {
                    if !observer.seen_keys.contains(key) {
                        (observer.function)(key, 1).map_err(Error::from)?;
                    }
                }
                observer.seen_keys = keys;
            }
            Ok(())
        })();
        self.universe_observers = universe_observers;
        result?;

        let mut column_observers = std::mem::take(&mut self.column_observers);
        let result: Result<()> = (|| {
            for observer in &mut column_observers {
                let universe = self.column_universe(observer.column)?;
                let keys = self.universe_keys(universe)?;
                let values = self.column_values(observer.column)?;
                for key in observer.seen_keys.iter() {
                    let old_value = observer.seen_values.get(key);
                    if !keys.contains(key) || values.get(key) != old_value {
                        let old_value = old_value.cloned().unwrap_or(Value::None);
                        (observer.function)(key, &old_value, -1).map_err(Error::from)?;
                    }
                }
                for key in keys.iter() {
                    let new_value = values.get(key);
                    if !observer.seen_keys.contains(key)
                        || new_value != observer.seen_values.get(key)
                    {
                        let new_value = new_value.cloned().unwrap_or(Value::None);
                        (observer.function)(key, &new_value, 1).map_err(Error::from)?;
                    }
                }
                observer.seen_keys = keys;
                observer.seen_values = values;
            }
            Ok(())
        })();
        self.column_observers = column_observers;
        result?;

        if self.monitoring_level > MonitoringLevel::None {
            for probe in &self.probes {
                let count = match probe.node {
                    NodeRef::Universe(handle) => self.universe_keys(handle)?.len(),
                    NodeRef::Column(handle) => self.column_values(handle)?.len(),
                };
                info!(
                    "probe {}: {} rows at time {}",
                    probe.operator_id, count, time
                );
            }
        }

        Ok(())
    }

    fn emit_end(&mut self) -> Result<()> {
        let mut subscribers = std::mem::take(&mut self.subscribers);
        let result: Result<()> = (|| {
            for subscriber in &mut subscribers {
                (subscriber.on_end)().map_err(Error::from)?;
            }
            Ok(())
        })();
        self.subscribers = subscribers;
        result
    }

    fn flush(&mut self) -> Result<()> {
        self.emit_changes()?;
        while let Some((session_handle, batch)) = self.pending_batches.pop_front() {
            self.current_time += 1;
            self.dirty.clear();
            self.apply_batch(session_handle, batch)?;
            self.propagate()?;
            self.emit_changes()?;
        }
        self.emit_end()
    }
}

fn reduce_groups(
    source_keys: &KeySet,
    mapping: &HashMap<Key, Key>,
    reducer: Reducer,
    lookup: impl Fn(&Key) -> Result<Value>,
) -> Result<ValuesMap> {
    let mut groups: HashMap<Key, Vec<(Key, Value)>> = HashMap::new();
    for key in source_keys.iter() {
        groups
            .entry(mapping[key])
            .or_default()
            .push((*key, lookup(key)?));
    }
    let mut data = HashMap::with_capacity(groups.len());
    for (group_key, mut rows) in groups {
        rows.sort_by_key(|(key, _value)| *key);
        let reduced = reducer
            .reduce(rows.iter().map(|(key, value)| (*key, value)))
            .map_err(Error::from)?;
        data.insert(group_key, reduced);
    }
    Ok(Arc::new(data))
}

#[derive(Clone)]
struct ExtractedTable {
    keys: KeySet,
    columns: Vec<ValuesMap>,
    properties: Vec<Arc<ColumnProperties>>,
}

// convergence only looks at the data, not the declared dtypes
impl PartialEq for ExtractedTable {
    fn eq(&self, other: &Self) -> bool {
        *self.keys == *other.keys
            && self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(other.columns.iter())
                .all(|(a, b)| **a == **b)
    }
}

/// The eager incremental graph. All `Graph` methods mutate through a
/// `RefCell`; callbacks passed in must not re-enter the graph.
pub struct DataflowGraph {
    inner: RefCell<DataflowGraphInner>,
    config: Config,
}

impl DataflowGraph {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            inner: RefCell::new(DataflowGraphInner::new(config)),
            config,
        }
    }

    /// Emits the initial snapshot, drives all queued input batches through
    /// change propagation and delivers `on_end` to every subscriber.
    pub fn flush(&self) -> Result<()> {
        self.inner.borrow_mut().flush()
    }

    fn extract_table(inner: &DataflowGraphInner, table: &Table) -> Result<ExtractedTable> {
        let (universe_handle, column_handles) = table;
        let keys = inner.universe_keys(*universe_handle)?;
        let columns: Vec<ValuesMap> = column_handles
            .iter()
            .map(|handle| inner.column_values(*handle))
            .try_collect()?;
        let properties: Vec<Arc<ColumnProperties>> = column_handles
            .iter()
            .map(|handle| Ok(inner.column(*handle)?.properties.clone()))
            .collect::<Result<_>>()?;
        Ok(ExtractedTable {
            keys,
            columns,
            properties,
        })
    }

    fn inject_table(&self, table: &ExtractedTable) -> Result<Table> {
        let universe_handle = self.static_universe(table.keys.iter().copied().collect())?;
        let column_handles: Vec<ColumnHandle> = table
            .columns
            .iter()
            .zip(table.properties.iter())
            .map(|(column, properties)| {
                self.static_column(
                    universe_handle,
                    column
                        .iter()
                        .map(|(key, value)| (*key, value.clone()))
                        .collect(),
                    properties.clone(),
                )
            })
            .try_collect()?;
        Ok((universe_handle, column_handles))
    }
}

impl Graph for DataflowGraph {
    fn empty_universe(&self) -> Result<UniverseHandle> {
        self.inner.borrow_mut().empty_universe()
    }

    fn empty_column(
        &self,
        universe_handle: UniverseHandle,
        column_properties: Arc<ColumnProperties>,
    ) -> Result<ColumnHandle> {
        self.inner
            .borrow_mut()
            .empty_column(universe_handle, column_properties)
    }

    fn static_universe(&self, keys: Vec<Key>) -> Result<UniverseHandle> {
        self.inner.borrow_mut().static_universe(keys)
    }

    fn static_column(
        &self,
        universe_handle: UniverseHandle,
        values: Vec<(Key, Value)>,
        column_properties: Arc<ColumnProperties>,
    ) -> Result<ColumnHandle> {
        self.inner
            .borrow_mut()
            .static_column(universe_handle, values, column_properties)
    }

    fn id_column(&self, universe_handle: UniverseHandle) -> Result<ColumnHandle> {
        self.inner.borrow_mut().id_column(universe_handle)
    }

    fn map_column(
        &self,
        universe_handle: UniverseHandle,
        function: MapFunction,
        column_handles: Vec<ColumnHandle>,
        column_properties: Arc<ColumnProperties>,
    ) -> Result<ColumnHandle> {
        self.inner.borrow_mut().map_column(
            universe_handle,
            function,
            column_handles,
            column_properties,
        )
    }

    fn expression_column(
        &self,
        expression: Arc<Expression>,
        universe_handle: UniverseHandle,
        column_handles: Vec<ColumnHandle>,
        column_properties: Arc<ColumnProperties>,
        trace: Trace,
    ) -> Result<ColumnHandle> {
        self.inner.borrow_mut().expression_column(
            expression,
            universe_handle,
            column_handles,
            column_properties,
            trace,
        )
    }

    fn async_map_column(
        &self,
        universe_handle: UniverseHandle,
        function: AsyncMapFunction,
        column_handles: Vec<ColumnHandle>,
        column_properties: Arc<ColumnProperties>,
        trace: Trace,
    ) -> Result<ColumnHandle> {
        self.inner.borrow_mut().async_map_column(
            universe_handle,
            function,
            column_handles,
            column_properties,
            trace,
        )
    }

    fn filter_universe(
        &self,
        universe_handle: UniverseHandle,
        column_handle: ColumnHandle,
    ) -> Result<UniverseHandle> {
        self.inner
            .borrow_mut()
            .filter_universe(universe_handle, column_handle)
    }

    fn restrict_column(
        &self,
        universe_handle: UniverseHandle,
        column_handle: ColumnHandle,
    ) -> Result<ColumnHandle> {
        self.inner
            .borrow_mut()
            .restrict_column(universe_handle, column_handle)
    }

    fn override_column_universe(
        &self,
        universe_handle: UniverseHandle,
        column_handle: ColumnHandle,
    ) -> Result<ColumnHandle> {
        self.inner
            .borrow_mut()
            .override_column_universe(universe_handle, column_handle)
    }

    fn intersect_universe(&self, universe_handles: Vec<UniverseHandle>) -> Result<UniverseHandle> {
        self.inner.borrow_mut().intersect_universe(universe_handles)
    }

    fn union_universe(&self, universe_handles: Vec<UniverseHandle>) -> Result<UniverseHandle> {
        self.inner.borrow_mut().union_universe(universe_handles)
    }

    fn venn_universes(
        &self,
        left_universe_handle: UniverseHandle,
        right_universe_handle: UniverseHandle,
    ) -> Result<VennUniversesHandle> {
        self.inner
            .borrow_mut()
            .venn_universes(left_universe_handle, right_universe_handle)
    }

    fn venn_universes_only_left(
        &self,
        venn_universes_handle: VennUniversesHandle,
    ) -> Result<UniverseHandle> {
        self.inner
            .borrow()
            .venn_universes_only_left(venn_universes_handle)
    }

    fn venn_universes_only_right(
        &self,
        venn_universes_handle: VennUniversesHandle,
    ) -> Result<UniverseHandle> {
        self.inner
            .borrow()
            .venn_universes_only_right(venn_universes_handle)
    }

    fn venn_universes_both(
        &self,
        venn_universes_handle: VennUniversesHandle,
    ) -> Result<UniverseHandle> {
        self.inner.borrow().venn_universes_both(venn_universes_handle)
    }

    fn reindex_universe(&self, column_handle: ColumnHandle) -> Result<UniverseHandle> {
        self.inner.borrow_mut().reindex_universe(column_handle)
    }

    fn reindex_column(
        &self,
        column_to_reindex: ColumnHandle,
        reindexing_column: ColumnHandle,
        reindexing_universe: UniverseHandle,
    ) -> Result<ColumnHandle> {
        self.inner.borrow_mut().reindex_column(
            column_to_reindex,
            reindexing_column,
            reindexing_universe,
        )
    }

    fn update_rows(
        &self,
        universe_handle: UniverseHandle,
        column_handle: ColumnHandle,
        updates_handle: ColumnHandle,
    ) -> Result<ColumnHandle> {
        self.inner
            .borrow_mut()
            .update_rows(universe_handle, column_handle, updates_handle)
    }

    fn group_by(
        &self,
        universe_handle: UniverseHandle,
        column_handles: Vec<ColumnHandle>,
    ) -> Result<GrouperHandle> {
        self.inner
            .borrow_mut()
            .group_by(universe_handle, column_handles, false)
    }

    fn group_by_id(
        &self,
        universe_handle: UniverseHandle,
        column_handle: ColumnHandle,
    ) -> Result<GrouperHandle> {
        self.inner
            .borrow_mut()
            .group_by(universe_handle, vec![column_handle], true)
    }

    fn grouper_universe(&self, grouper_handle: GrouperHandle) -> Result<UniverseHandle> {
        self.inner.borrow().grouper_universe(grouper_handle)
    }

    fn grouper_input_column(
        &self,
        grouper_handle: GrouperHandle,
        column_handle: ColumnHandle,
    ) -> Result<ColumnHandle> {
        self.inner
            .borrow_mut()
            .grouper_input_column(grouper_handle, column_handle)
    }

    fn grouper_count_column(&self, grouper_handle: GrouperHandle) -> Result<ColumnHandle> {
        self.inner.borrow_mut().grouper_count_column(grouper_handle)
    }

    fn grouper_reducer_column(
        &self,
        grouper_handle: GrouperHandle,
        reducer: Reducer,
        column_handle: ColumnHandle,
    ) -> Result<ColumnHandle> {
        self.inner
            .borrow_mut()
            .grouper_reducer_column(grouper_handle, reducer, column_handle)
    }

    fn grouper_reducer_column_ix(
        &self,
        grouper_handle: GrouperHandle,
        reducer: Reducer,
        ixer_handle: IxerHandle,
        column_handle: ColumnHandle,
    ) -> Result<ColumnHandle> {
        self.inner.borrow_mut().grouper_reducer_column_ix(
            grouper_handle,
            reducer,
            ixer_handle,
            column_handle,
        )
    }

    fn ix(
        &self,
        key_column_handle: ColumnHandle,
        input_universe_handle: UniverseHandle,
        ix_key_policy: IxKeyPolicy,
    ) -> Result<IxerHandle> {
        self.inner
            .borrow_mut()
            .ix(key_column_handle, input_universe_handle, ix_key_policy)
    }

    fn ix_column(
        &self,
        ixer_handle: IxerHandle,
        column_handle: ColumnHandle,
    ) -> Result<ColumnHandle> {
        self.inner.borrow_mut().ix_column(ixer_handle, column_handle)
    }

    fn ixer_universe(&self, ixer_handle: IxerHandle) -> Result<UniverseHandle> {
        self.inner.borrow().ixer_universe(ixer_handle)
    }

    fn join(
        &self,
        left_universe_handle: UniverseHandle,
        left_column_handles: Vec<ColumnHandle>,
        right_universe_handle: UniverseHandle,
        right_column_handles: Vec<ColumnHandle>,
        join_type: JoinType,
    ) -> Result<JoinerHandle> {
        self.inner.borrow_mut().join(
            left_universe_handle,
            left_column_handles,
            right_universe_handle,
            right_column_handles,
            join_type,
        )
    }

    fn joiner_universe(&self, joiner_handle: JoinerHandle) -> Result<UniverseHandle> {
        self.inner.borrow().joiner_universe(joiner_handle)
    }

    fn joiner_left_column(
        &self,
        joiner_handle: JoinerHandle,
        column_handle: ColumnHandle,
    ) -> Result<ColumnHandle> {
        self.inner
            .borrow_mut()
            .joiner_left_column(joiner_handle, column_handle)
    }

    fn joiner_right_column(
        &self,
        joiner_handle: JoinerHandle,
        column_handle: ColumnHandle,
    ) -> Result<ColumnHandle> {
        self.inner
            .borrow_mut()
            .joiner_right_column(joiner_handle, column_handle)
    }

    fn concat(&self, universe_handles: Vec<UniverseHandle>) -> Result<ConcatHandle> {
        self.inner.borrow_mut().concat(universe_handles)
    }

    fn concat_universe(&self, concat_handle: ConcatHandle) -> Result<UniverseHandle> {
        self.inner.borrow().concat_universe(concat_handle)
    }

    fn concat_column(
        &self,
        concat_handle: ConcatHandle,
        column_handles: Vec<ColumnHandle>,
    ) -> Result<ColumnHandle> {
        self.inner
            .borrow_mut()
            .concat_column(concat_handle, column_handles)
    }

    fn flatten(&self, column_handle: ColumnHandle) -> Result<FlattenHandle> {
        self.inner.borrow_mut().flatten(column_handle)
    }

    fn flatten_universe(&self, flatten_handle: FlattenHandle) -> Result<UniverseHandle> {
        self.inner.borrow().flatten_universe(flatten_handle)
    }

    fn flatten_column(&self, flatten_handle: FlattenHandle) -> Result<ColumnHandle> {
        self.inner.borrow_mut().flatten_column(flatten_handle)
    }

    fn explode(
        &self,
        flatten_handle: FlattenHandle,
        column_handle: ColumnHandle,
    ) -> Result<ColumnHandle> {
        self.inner.borrow_mut().explode(flatten_handle, column_handle)
    }

    fn sort(
        &self,
        key_column_handle: ColumnHandle,
        instance_column_handle: ColumnHandle,
    ) -> Result<(ColumnHandle, ColumnHandle)> {
        self.inner
            .borrow_mut()
            .sort(key_column_handle, instance_column_handle)
    }

    fn iterate<'a>(
        &'a self,
        iterated: Vec<Table>,
        iterated_with_universe: Vec<Table>,
        extra: Vec<Table>,
        limit: Option<u32>,
        mut logic: IterationLogic<'a>,
    ) -> Result<(Vec<Table>, Vec<Table>)> {
        if let Some(limit) = limit {
            if limit <= 1 {
                return Err(Error::IterationLimitTooSmall);
            }
        }

        let (mut state, mut state_with_universe, extra_data) = {
            let inner = self.inner.borrow();
            let state: Vec<ExtractedTable> = iterated
                .iter()
                .map(|table| Self::extract_table(&inner, table))
                .try_collect()?;
            let state_with_universe: Vec<ExtractedTable> = iterated_with_universe
                .iter()
                .map(|table| Self::extract_table(&inner, table))
                .try_collect()?;
            let extra_data: Vec<ExtractedTable> = extra
                .iter()
                .map(|table| Self::extract_table(&inner, table))
                .try_collect()?;
            (state, state_with_universe, extra_data)
        };

        let mut round = 0u32;
        loop {
            round += 1;
            let inner_graph = DataflowGraph::new(self.config);
            let iterated_handles: Vec<Table> = state
                .iter()
                .map(|table| inner_graph.inject_table(table))
                .try_collect()?;
            let iterated_wu_handles: Vec<Table> = state_with_universe
                .iter()
                .map(|table| inner_graph.inject_table(table))
                .try_collect()?;
            let extra_handles: Vec<Table> = extra_data
                .iter()
                .map(|table| inner_graph.inject_table(table))
                .try_collect()?;

            let (result_iterated, result_with_universe) = logic(
                &inner_graph,
                iterated_handles.clone(),
                iterated_wu_handles,
                extra_handles,
            )
            .map_err(Error::from)?;

            if result_iterated.len() != state.len()
                || result_with_universe.len() != state_with_universe.len()
            {
                return Err(Error::LengthMismatch);
            }
            // tables iterated without universe changes must keep their universe
            for (result, injected) in result_iterated.iter().zip(iterated_handles.iter()) {
                if result.0 != injected.0 {
                    return Err(Error::UniverseMismatch);
                }
                if result.1.len() != injected.1.len() {
                    return Err(Error::LengthMismatch);
                }
            }

            let (new_state, new_state_with_universe) = {
                let inner = inner_graph.inner.borrow();
                let new_state: Vec<ExtractedTable> = result_iterated
                    .iter()
                    .map(|table| Self::extract_table(&inner, table))
                    .try_collect()?;
                let new_state_with_universe: Vec<ExtractedTable> = result_with_universe
                    .iter()
                    .map(|table| Self::extract_table(&inner, table))
                    .try_collect()?;
                (new_state, new_state_with_universe)
            };

            let converged =
                new_state == state && new_state_with_universe == state_with_universe;
            state = new_state;
            state_with_universe = new_state_with_universe;
            if converged {
                break;
            }
            if let Some(limit) = limit {
                if round >= limit {
                    break;
                }
            }
        }

        // copy the final state back into this graph
        let result_iterated: Vec<Table> = iterated
            .iter()
            .zip(state.iter())
            .map(|((universe_handle, _), table)| {
                let column_handles: Vec<ColumnHandle> = table
                    .columns
                    .iter()
                    .zip(table.properties.iter())
                    .map(|(column, properties)| {
                        self.static_column(
                            *universe_handle,
                            column
                                .iter()
                                .map(|(key, value)| (*key, value.clone()))
                                .collect(),
                            properties.clone(),
                        )
                    })
                    .try_collect()?;
                Ok((*universe_handle, column_handles))
            })
            .collect::<Result<_>>()?;
        let result_with_universe: Vec<Table> = state_with_universe
            .iter()
            .map(|table| self.inject_table(table))
            .try_collect()?;

        Ok((result_iterated, result_with_universe))
    }

    fn complex_columns(&self, inputs: Vec<ComplexColumn>) -> Result<Vec<ColumnHandle>> {
        complex_columns::complex_columns(&mut self.inner.borrow_mut(), inputs)
    }

    fn input_table(
        &self,
        column_properties: Vec<Arc<ColumnProperties>>,
    ) -> Result<(UniverseHandle, Vec<ColumnHandle>, InputSessionHandle)> {
        self.inner.borrow_mut().input_table(column_properties)
    }

    fn push_input_batch(
        &self,
        session_handle: InputSessionHandle,
        batch: Vec<DataRow>,
    ) -> Result<()> {
        self.inner.borrow_mut().push_input_batch(session_handle, batch)
    }

    fn subscribe_column(
        &self,
        callback: OnChangeCallback,
        on_end: OnEndCallback,
        universe_handle: UniverseHandle,
        column_handles: Vec<ColumnHandle>,
    ) -> Result<()> {
        self.inner
            .borrow_mut()
            .subscribe_column(callback, on_end, universe_handle, column_handles)
    }

    fn on_universe_data(
        &self,
        universe_handle: UniverseHandle,
        function: Box<dyn FnMut(&Key, isize) -> DynResult<()>>,
    ) -> Result<()> {
        self.inner
            .borrow_mut()
            .on_universe_data(universe_handle, function)
    }

    fn on_column_data(
        &self,
        column_handle: ColumnHandle,
        function: Box<dyn FnMut(&Key, &Value, isize) -> DynResult<()>>,
    ) -> Result<()> {
        self.inner.borrow_mut().on_column_data(column_handle, function)
    }

    fn debug_universe(&self, tag: String, universe_handle: UniverseHandle) -> Result<()> {
        self.inner.borrow().debug_universe(&tag, universe_handle)
    }

    fn debug_column(&self, tag: String, column_handle: ColumnHandle) -> Result<()> {
        self.inner.borrow().debug_column(&tag, column_handle)
    }

    fn probe_universe(&self, universe_handle: UniverseHandle, operator_id: usize) -> Result<()> {
        self.inner
            .borrow_mut()
            .probe_universe(universe_handle, operator_id)
    }

    fn probe_column(&self, column_handle: ColumnHandle, operator_id: usize) -> Result<()> {
        self.inner
            .borrow_mut()
            .probe_column(column_handle, operator_id)
    }
}

/// Builds a fresh graph, runs `logic` against it, then drives all queued
/// input batches through change propagation and finishes with `finish`.
///
/// Subscribers see the initial snapshot at time 0 and one commit per queued
/// batch afterwards; `on_end` fires only if the whole run succeeded.
pub fn run_with_new_dataflow_graph<R, R2>(
    logic: impl FnOnce(&dyn Graph) -> DynResult<R>,
    finish: impl FnOnce(R) -> R2,
    config: Config,
) -> Result<R2> {
    let graph = DataflowGraph::new(config);
    let result = logic(&graph).map_err(Error::from)?;
    graph.flush()?;
    Ok(finish(result))
}
