mod helpers;
use helpers::{any_props, capture_column, capture_universe, final_keys, final_values, key, props, run};

use std::collections::HashSet;

use assert_matches::assert_matches;
use rivulet_engine::engine::{
    DataError, Error, IxKeyPolicy, Key, Reducer, Type, Value,
};

fn group_key(value: &str) -> Key {
    Key::for_values(&[Value::from(value)])
}

#[test]
fn test_group_by_universe_and_input_column() -> eyre::Result<()> {
    let (keys, values) = run(|g| {
        let universe = g.static_universe(vec![key(1), key(2), key(3), key(4)])?;
        let column = g.static_column(
            universe,
            vec![
                (key(1), Value::from("a")),
                (key(2), Value::from("a")),
                (key(3), Value::from("b")),
                (key(4), Value::from("b")),
            ],
            props(Type::String),
        )?;
        let grouper = g.group_by(universe, vec![column])?;
        let grouped_universe = g.grouper_universe(grouper)?;
        let input_column = g.grouper_input_column(grouper, column)?;
        Ok((
            capture_universe(g, grouped_universe)?,
            capture_column(g, input_column)?,
        ))
    })?;
    assert_eq!(
        final_keys(&keys.borrow()).into_iter().collect::<HashSet<_>>(),
        HashSet::from([group_key("a"), group_key("b")])
    );
    let values = final_values(&values.borrow());
    assert_eq!(values[&group_key("a")], Value::from("a"));
    assert_eq!(values[&group_key("b")], Value::from("b"));
    Ok(())
}

#[test]
fn test_grouper_count_column() -> eyre::Result<()> {
    let values = run(|g| {
        let universe = g.static_universe(vec![key(1), key(2), key(3)])?;
        let column = g.static_column(
            universe,
            vec![
                (key(1), Value::from("a")),
                (key(2), Value::from("a")),
                (key(3), Value::from("b")),
            ],
            props(Type::String),
        )?;
        let grouper = g.group_by(universe, vec![column])?;
        capture_column(g, g.grouper_count_column(grouper)?)
    })?;
    let values = final_values(&values.borrow());
    assert_eq!(values[&group_key("a")], Value::Int(2));
    assert_eq!(values[&group_key("b")], Value::Int(1));
    Ok(())
}

fn reduce_ints(reducer: Reducer) -> eyre::Result<std::collections::HashMap<Key, Value>> {
    let values = run(|g| {
        let universe = g.static_universe(vec![key(1), key(2), key(3), key(4)])?;
        let group_column = g.static_column(
            universe,
            vec![
                (key(1), Value::from("a")),
                (key(2), Value::from("a")),
                (key(3), Value::from("b")),
                (key(4), Value::from("b")),
            ],
            props(Type::String),
        )?;
        let int_column = g.static_column(
            universe,
            vec![
                (key(1), Value::Int(1)),
                (key(2), Value::Int(2)),
                (key(3), Value::Int(3)),
                (key(4), Value::Int(4)),
            ],
            props(Type::Int),
        )?;
        let grouper = g.group_by(universe, vec![group_column])?;
        capture_column(g, g.grouper_reducer_column(grouper, reducer, int_column)?)
    })?;
    let values = final_values(&values.borrow());
    Ok(values)
}

#[test]
fn test_int_sum_reducer() -> eyre::Result<()> {
    let values = reduce_ints(Reducer::IntSum)?;
    assert_eq!(values[&group_key("a")], Value::Int(3));
    assert_eq!(values[&group_key("b")], Value::Int(7));
    Ok(())
}

#[test]
fn test_count_reducer_skips_none() -> eyre::Result<()> {
    let values = run(|g| {
        let universe = g.static_universe(vec![key(1), key(2), key(3), key(4)])?;
        let group_column = g.static_column(
            universe,
            vec![
                (key(1), Value::from("a")),
                (key(2), Value::from("a")),
                (key(3), Value::from("a")),
                (key(4), Value::from("b")),
            ],
            props(Type::String),
        )?;
        let counted_column = g.static_column(
            universe,
            vec![
                (key(1), Value::Int(1)),
                (key(2), Value::None),
                (key(3), Value::Int(3)),
                (key(4), Value::Int(4)),
            ],
            any_props(),
        )?;
        let grouper = g.group_by(universe, vec![group_column])?;
        capture_column(
            g,
            g.grouper_reducer_column(grouper, Reducer::Count, counted_column)?,
        )
    })?;
    let values = final_values(&values.borrow());
    assert_eq!(values[&group_key("a")], Value::Int(2));
    assert_eq!(values[&group_key("b")], Value::Int(1));
    Ok(())
}

#[test]
fn test_min_max_reducers() -> eyre::Result<()> {
    let min = reduce_ints(Reducer::Min)?;
    assert_eq!(min[&group_key("a")], Value::Int(1));
    assert_eq!(min[&group_key("b")], Value::Int(3));

    let max = reduce_ints(Reducer::Max)?;
    assert_eq!(max[&group_key("a")], Value::Int(2));
    assert_eq!(max[&group_key("b")], Value::Int(4));
    Ok(())
}

#[test]
fn test_arg_min_reducer() -> eyre::Result<()> {
    let values = reduce_ints(Reducer::ArgMin)?;
    assert_eq!(values[&group_key("a")], Value::Pointer(key(1)));
    assert_eq!(values[&group_key("b")], Value::Pointer(key(3)));
    Ok(())
}

#[test]
fn test_sorted_tuple_reducer() -> eyre::Result<()> {
    let values = reduce_ints(Reducer::SortedTuple)?;
    assert_eq!(
        values[&group_key("a")],
        Value::from([Value::Int(1), Value::Int(2)].as_slice())
    );
    Ok(())
}

#[test]
fn test_unique_reducer_rejects_distinct_values() {
    let result = reduce_ints(Reducer::Unique);
    assert!(result.is_err());
}

#[test]
fn test_unique_reducer_accepts_single_value() -> eyre::Result<()> {
    let values = run(|g| {
        let universe = g.static_universe(vec![key(1), key(2)])?;
        let group_column = g.static_column(
            universe,
            vec![(key(1), Value::from("a")), (key(2), Value::from("a"))],
            props(Type::String),
        )?;
        let int_column = g.static_column(
            universe,
            vec![(key(1), Value::Int(7)), (key(2), Value::Int(7))],
            props(Type::Int),
        )?;
        let grouper = g.group_by(universe, vec![group_column])?;
        capture_column(
            g,
            g.grouper_reducer_column(grouper, Reducer::Unique, int_column)?,
        )
    })?;
    let values = final_values(&values.borrow());
    assert_eq!(values[&group_key("a")], Value::Int(7));
    Ok(())
}

#[test]
fn test_group_by_id() -> eyre::Result<()> {
    let keys = run(|g| {
        let universe = g.static_universe(vec![key(1), key(2)])?;
        let id_column = g.id_column(universe)?;
        let grouper = g.group_by_id(universe, id_column)?;
        capture_universe(g, g.grouper_universe(grouper)?)
    })?;
    assert_eq!(
        final_keys(&keys.borrow()).into_iter().collect::<HashSet<_>>(),
        HashSet::from([key(1), key(2)])
    );
    Ok(())
}

#[test]
fn test_grouper_input_column_must_be_requested() {
    let result = run(|g| {
        let universe = g.static_universe(vec![key(1)])?;
        let group_column = g.static_column(
            universe,
            vec![(key(1), Value::from("a"))],
            props(Type::String),
        )?;
        let other_column =
            g.static_column(universe, vec![(key(1), Value::Int(1))], props(Type::Int))?;
        let grouper = g.group_by(universe, vec![group_column])?;
        g.grouper_input_column(grouper, other_column)?;
        Ok(())
    });
    assert_matches!(result, Err(Error::ValueError(_)));
}

#[test]
fn test_grouper_reducer_column_ix() -> eyre::Result<()> {
    let values = run(|g| {
        let input_universe = g.static_universe(vec![key(1), key(2)])?;
        let input_column = g.static_column(
            input_universe,
            vec![(key(1), Value::Int(10)), (key(2), Value::Int(20))],
            props(Type::Int),
        )?;
        let requests = g.static_universe(vec![key(100), key(101), key(102)])?;
        let pointer_column = g.static_column(
            requests,
            vec![
                (key(100), Value::Pointer(key(1))),
                (key(101), Value::Pointer(key(1))),
                (key(102), Value::Pointer(key(2))),
            ],
            props(Type::Pointer),
        )?;
        let ixer = g.ix(pointer_column, input_universe, IxKeyPolicy::FailMissing)?;
        let ixed_universe = g.ixer_universe(ixer)?;
        let ixed_column = g.ix_column(ixer, input_column)?;
        let grouper = g.group_by(ixed_universe, vec![ixed_column])?;
        capture_column(
            g,
            g.grouper_reducer_column_ix(grouper, Reducer::IntSum, ixer, input_column)?,
        )
    })?;
    let values = final_values(&values.borrow());
    assert_eq!(values[&Key::for_values(&[Value::Int(10)])], Value::Int(20));
    assert_eq!(values[&Key::for_values(&[Value::Int(20)])], Value::Int(20));
    Ok(())
}

#[test]
fn test_group_by_column_on_wrong_universe() {
    let result = run(|g| {
        let universe = g.static_universe(vec![key(1)])?;
        let other = g.static_universe(vec![key(2)])?;
        let column =
            g.static_column(other, vec![(key(2), Value::Int(1))], props(Type::Int))?;
        g.group_by(universe, vec![column])?;
        Ok(())
    });
    assert_matches!(result, Err(Error::UniverseMismatch));
}

#[test]
fn test_reducer_directly() {
    let rows = [(key(1), Value::Int(3)), (key(2), Value::Int(5))];
    let reduced = Reducer::IntSum
        .reduce(rows.iter().map(|(k, v)| (*k, v)))
        .unwrap();
    assert_eq!(reduced, Value::Int(8));

    let reduced = Reducer::Any
        .reduce(rows.iter().map(|(k, v)| (*k, v)))
        .unwrap();
    assert!(rows.iter().any(|(_k, v)| *v == reduced));

    let err = Reducer::Unique
        .reduce(rows.iter().map(|(k, v)| (*k, v)))
        .unwrap_err();
    assert_matches!(
        err.downcast::<DataError>().map(|e| *e),
        Ok(DataError::ValueError(_))
    );
}
