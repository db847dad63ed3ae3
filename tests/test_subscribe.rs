mod helpers;
use helpers::{key, props, run};

use std::cell::RefCell;
use std::rc::Rc;

use assert_matches::assert_matches;
use rivulet_engine::engine::{DataError, DataRow, Error, Key, Type, Value};

type Event = (Key, Vec<Value>, u64, isize);

fn capture_events() -> (
    Rc<RefCell<Vec<Event>>>,
    Box<dyn FnMut(Key, &[Value], u64, isize) -> rivulet_engine::engine::DynResult<()>>,
) {
    let events: Rc<RefCell<Vec<Event>>> = Rc::new(RefCell::new(Vec::new()));
    let inner = events.clone();
    let callback = Box::new(move |key, values: &[Value], time, diff| {
        inner.borrow_mut().push((key, values.to_vec(), time, diff));
        Ok(())
    });
    (events, callback)
}

#[test]
fn test_subscribe_sees_batches_in_order() -> eyre::Result<()> {
    let (events, callback) = capture_events();
    let ended = Rc::new(RefCell::new(false));
    let ended_inner = ended.clone();
    run(|g| {
        let (universe, columns, session) = g.input_table(vec![props(Type::Int)])?;
        g.subscribe_column(
            callback,
            Box::new(move || {
                *ended_inner.borrow_mut() = true;
                Ok(())
            }),
            universe,
            columns,
        )?;
        g.push_input_batch(
            session,
            vec![
                DataRow::new(key(1), vec![Value::Int(10)]),
                DataRow::new(key(2), vec![Value::Int(20)]),
            ],
        )?;
        g.push_input_batch(
            session,
            vec![DataRow::with_diff(key(1), vec![Value::Int(10)], -1)],
        )?;
        Ok(())
    })?;
    assert_eq!(
        *events.borrow(),
        vec![
            (key(1), vec![Value::Int(10)], 1, 1),
            (key(2), vec![Value::Int(20)], 1, 1),
            (key(1), vec![Value::Int(10)], 2, -1),
        ]
    );
    assert!(*ended.borrow());
    Ok(())
}

#[test]
fn test_subscribe_update_is_deletion_then_addition() -> eyre::Result<()> {
    let (events, callback) = capture_events();
    run(|g| {
        let (universe, columns, session) = g.input_table(vec![props(Type::Int)])?;
        g.subscribe_column(callback, Box::new(|| Ok(())), universe, columns)?;
        g.push_input_batch(session, vec![DataRow::new(key(1), vec![Value::Int(10)])])?;
        g.push_input_batch(
            session,
            vec![
                DataRow::with_diff(key(1), vec![Value::Int(10)], -1),
                DataRow::new(key(1), vec![Value::Int(11)]),
            ],
        )?;
        Ok(())
    })?;
    assert_eq!(
        *events.borrow(),
        vec![
            (key(1), vec![Value::Int(10)], 1, 1),
            (key(1), vec![Value::Int(10)], 2, -1),
            (key(1), vec![Value::Int(11)], 2, 1),
        ]
    );
    Ok(())
}

#[test]
fn test_input_batch_duplicate_key() {
    let result = run(|g| {
        let (_universe, _columns, session) = g.input_table(vec![props(Type::Int)])?;
        g.push_input_batch(
            session,
            vec![
                DataRow::new(key(1), vec![Value::Int(10)]),
                DataRow::new(key(1), vec![Value::Int(11)]),
            ],
        )?;
        Ok(())
    });
    assert_matches!(result, Err(Error::Data(DataError::DuplicateKey(_))));
}

#[test]
fn test_input_batch_remove_missing_key() {
    let result = run(|g| {
        let (_universe, _columns, session) = g.input_table(vec![props(Type::Int)])?;
        g.push_input_batch(
            session,
            vec![DataRow::with_diff(key(1), vec![Value::Int(10)], -1)],
        )?;
        Ok(())
    });
    assert_matches!(result, Err(Error::Data(DataError::KeyMissingInUniverse(_))));
}

#[test]
fn test_input_batch_unsupported_diff() {
    let result = run(|g| {
        let (_universe, _columns, session) = g.input_table(vec![props(Type::Int)])?;
        g.push_input_batch(
            session,
            vec![DataRow::with_diff(key(1), vec![Value::Int(10)], 2)],
        )?;
        Ok(())
    });
    assert_matches!(result, Err(Error::ValueError(_)));
}

#[test]
fn test_input_batch_arity_mismatch() {
    let result = run(|g| {
        let (_universe, _columns, session) = g.input_table(vec![props(Type::Int)])?;
        g.push_input_batch(
            session,
            vec![DataRow::new(key(1), vec![Value::Int(10), Value::Int(20)])],
        )?;
        Ok(())
    });
    assert_matches!(result, Err(Error::LengthMismatch));
}

#[test]
fn test_input_batch_converts_values() -> eyre::Result<()> {
    let (events, callback) = capture_events();
    run(|g| {
        let (universe, columns, session) = g.input_table(vec![props(Type::Float)])?;
        g.subscribe_column(callback, Box::new(|| Ok(())), universe, columns)?;
        g.push_input_batch(session, vec![DataRow::new(key(1), vec![Value::Int(3)])])?;
        Ok(())
    })?;
    assert_eq!(
        *events.borrow(),
        vec![(key(1), vec![Value::from(3.0)], 1, 1)]
    );
    Ok(())
}

#[test]
fn test_downstream_of_input_table() -> eyre::Result<()> {
    let (events, callback) = capture_events();
    run(|g| {
        let (universe, columns, session) = g.input_table(vec![props(Type::Int)])?;
        let doubled = g.map_column(
            universe,
            std::sync::Arc::new(|_key, values: &[Value]| {
                Ok(Value::Int(values[0].as_int()? * 2))
            }),
            columns,
            props(Type::Int),
        )?;
        g.subscribe_column(callback, Box::new(|| Ok(())), universe, vec![doubled])?;
        g.push_input_batch(session, vec![DataRow::new(key(1), vec![Value::Int(21)])])?;
        Ok(())
    })?;
    assert_eq!(*events.borrow(), vec![(key(1), vec![Value::Int(42)], 1, 1)]);
    Ok(())
}
