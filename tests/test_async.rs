mod helpers;
use helpers::{capture_column, final_values, key, props, run};

use std::sync::Arc;

use assert_matches::assert_matches;
use futures::FutureExt;
use rivulet_engine::engine::{DataError, Error, Trace, Type, Value};

#[test]
fn test_async_map_column() -> eyre::Result<()> {
    let values = run(|g| {
        let universe = g.static_universe(vec![key(1), key(2)])?;
        let column = g.static_column(
            universe,
            vec![(key(1), Value::Int(10)), (key(2), Value::Int(20))],
            props(Type::Int),
        )?;
        let incremented = g.async_map_column(
            universe,
            Arc::new(|_key, values: &[Value]| {
                let value = values[0].clone();
                async move { Ok(Value::Int(value.as_int()? + 1)) }.boxed()
            }),
            vec![column],
            props(Type::Int),
            Trace::Empty,
        )?;
        capture_column(g, incremented)
    })?;
    let values = final_values(&values.borrow());
    assert_eq!(values[&key(1)], Value::Int(11));
    assert_eq!(values[&key(2)], Value::Int(21));
    Ok(())
}

#[test]
fn test_async_map_column_propagates_errors() {
    let result = run(|g| {
        let universe = g.static_universe(vec![key(1)])?;
        let column = g.static_column(
            universe,
            vec![(key(1), Value::from("foo"))],
            props(Type::String),
        )?;
        g.async_map_column(
            universe,
            Arc::new(|_key, values: &[Value]| {
                let value = values[0].clone();
                async move { Ok(Value::Int(value.as_int()? + 1)) }.boxed()
            }),
            vec![column],
            props(Type::Int),
            Trace::Empty,
        )?;
        Ok(())
    });
    assert_matches!(result, Err(Error::Data(DataError::TypeMismatch { .. })));
}

#[test]
fn test_map_column_error_carries_trace() {
    let result = run(|g| {
        let universe = g.static_universe(vec![key(1)])?;
        let column = g.static_column(
            universe,
            vec![(key(1), Value::from("foo"))],
            props(Type::String),
        )?;
        g.async_map_column(
            universe,
            Arc::new(|_key, values: &[Value]| {
                let value = values[0].clone();
                async move { Ok(Value::Int(value.as_int()? + 1)) }.boxed()
            }),
            vec![column],
            props(Type::Int),
            Trace::Frame {
                line: "a.b + 1".to_string(),
                file_name: "test.py".to_string(),
                line_number: 7,
                function: "test".to_string(),
            },
        )?;
        Ok(())
    });
    assert_matches!(result, Err(Error::WithTrace { .. }));
}
