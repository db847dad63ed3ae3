#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use rivulet_engine::engine::{
    run_with_new_dataflow_graph, ColumnHandle, ColumnProperties, Config, DynResult, Graph, Key,
    Result, Type, UniverseHandle, Value,
};

pub type Captured<T> = Rc<RefCell<T>>;

pub fn run<R>(logic: impl FnOnce(&dyn Graph) -> DynResult<R>) -> Result<R> {
    run_with_new_dataflow_graph(logic, |result| result, Config::default())
}

pub fn key(value: i64) -> Key {
    Key::for_values(&[Value::Int(value)])
}

pub fn any_props() -> Arc<ColumnProperties> {
    Arc::new(ColumnProperties::new())
}

pub fn props(dtype: Type) -> Arc<ColumnProperties> {
    Arc::new(ColumnProperties::with_dtype(dtype))
}

pub fn capture_universe(
    graph: &dyn Graph,
    universe_handle: UniverseHandle,
) -> DynResult<Captured<Vec<(Key, isize)>>> {
    let captured = Rc::new(RefCell::new(Vec::new()));
    let inner = captured.clone();
    graph.on_universe_data(
        universe_handle,
        Box::new(move |key, diff| {
            inner.borrow_mut().push((*key, diff));
            Ok(())
        }),
    )?;
    Ok(captured)
}

pub fn capture_column(
    graph: &dyn Graph,
    column_handle: ColumnHandle,
) -> DynResult<Captured<Vec<(Key, Value, isize)>>> {
    let captured = Rc::new(RefCell::new(Vec::new()));
    let inner = captured.clone();
    graph.on_column_data(
        column_handle,
        Box::new(move |key, value, diff| {
            inner.borrow_mut().push((*key, value.clone(), diff));
            Ok(())
        }),
    )?;
    Ok(captured)
}

/// Folds universe change events into the final key set, keeping arrival order.
pub fn final_keys(events: &[(Key, isize)]) -> Vec<Key> {
    let mut keys = Vec::new();
    for (key, diff) in events {
        if *diff > 0 {
            keys.push(*key);
        } else {
            keys.retain(|k| k != key);
        }
    }
    keys
}

/// Folds column change events into the final values.
pub fn final_values(events: &[(Key, Value, isize)]) -> HashMap<Key, Value> {
    let mut values = HashMap::new();
    for (key, value, diff) in events {
        if *diff > 0 {
            values.insert(*key, value.clone());
        } else {
            values.remove(key);
        }
    }
    values
}
