mod helpers;
use helpers::{capture_column, final_values, key, props, run};

use assert_matches::assert_matches;
use rivulet_engine::engine::{
    ComplexColumn, Computer, Error, Type, Value,
};

#[test]
fn test_attribute_computers_with_dependencies() -> eyre::Result<()> {
    let (doubled, incremented) = run(|g| {
        let universe = g.static_universe(vec![key(1), key(2)])?;
        let column = g.static_column(
            universe,
            vec![(key(1), Value::Int(10)), (key(2), Value::Int(20))],
            props(Type::Int),
        )?;
        let outputs = g.complex_columns(vec![
            ComplexColumn::Column(column),
            // slot 1: doubles the input column
            ComplexColumn::ExternalComputer(Computer::Attribute {
                logic: Box::new(|context| {
                    let Some(value) = context.get(0, context.this_row(), vec![]) else {
                        return Ok(None);
                    };
                    Ok(Some(Value::Int(value.as_int()? * 2)))
                }),
                universe_handle: universe,
            }),
            // slot 2: depends on slot 1
            ComplexColumn::ExternalComputer(Computer::Attribute {
                logic: Box::new(|context| {
                    let Some(value) = context.get(1, context.this_row(), vec![]) else {
                        return Ok(None);
                    };
                    Ok(Some(Value::Int(value.as_int()? + 1)))
                }),
                universe_handle: universe,
            }),
        ])?;
        assert_eq!(outputs.len(), 2);
        Ok((
            capture_column(g, outputs[0])?,
            capture_column(g, outputs[1])?,
        ))
    })?;
    let doubled = final_values(&doubled.borrow());
    assert_eq!(doubled[&key(1)], Value::Int(20));
    assert_eq!(doubled[&key(2)], Value::Int(40));
    let incremented = final_values(&incremented.borrow());
    assert_eq!(incremented[&key(1)], Value::Int(21));
    assert_eq!(incremented[&key(2)], Value::Int(41));
    Ok(())
}

#[test]
fn test_method_computer_called_with_arguments() -> eyre::Result<()> {
    let values = run(|g| {
        let universe = g.static_universe(vec![key(1), key(2)])?;
        let column = g.static_column(
            universe,
            vec![(key(1), Value::Int(10)), (key(2), Value::Int(20))],
            props(Type::Int),
        )?;
        let outputs = g.complex_columns(vec![
            ComplexColumn::Column(column),
            // slot 1: calls the method in slot 2 with an argument
            ComplexColumn::ExternalComputer(Computer::Attribute {
                logic: Box::new(|context| {
                    Ok(context.get(2, context.this_row(), vec![Value::Int(5)]))
                }),
                universe_handle: universe,
            }),
            // slot 2: adds its argument to the row data
            ComplexColumn::InternalComputer(Computer::Method {
                logic: Box::new(|context, args| {
                    let base = context.data().as_int()?;
                    let increment = args[0].as_int()?;
                    Ok(Some(Value::Int(base + increment)))
                }),
                universe_handle: universe,
                data: Value::None,
                data_column_handle: Some(column),
            }),
        ])?;
        assert_eq!(outputs.len(), 1);
        capture_column(g, outputs[0])
    })?;
    let values = final_values(&values.borrow());
    assert_eq!(values[&key(1)], Value::Int(15));
    assert_eq!(values[&key(2)], Value::Int(25));
    Ok(())
}

#[test]
fn test_external_method_column_exposes_data_and_key() -> eyre::Result<()> {
    let values = run(|g| {
        let universe = g.static_universe(vec![key(1)])?;
        let column =
            g.static_column(universe, vec![(key(1), Value::Int(10))], props(Type::Int))?;
        let outputs = g.complex_columns(vec![ComplexColumn::ExternalComputer(
            Computer::Method {
                logic: Box::new(|_context, _args| Ok(None)),
                universe_handle: universe,
                data: Value::None,
                data_column_handle: Some(column),
            },
        )])?;
        capture_column(g, outputs[0])
    })?;
    let values = final_values(&values.borrow());
    assert_eq!(
        values[&key(1)],
        Value::from([Value::Int(10), Value::Pointer(key(1))].as_slice())
    );
    Ok(())
}

#[test]
fn test_cyclic_computers_fail() {
    let result = run(|g| {
        let universe = g.static_universe(vec![key(1)])?;
        g.complex_columns(vec![
            ComplexColumn::ExternalComputer(Computer::Attribute {
                logic: Box::new(|context| Ok(context.get(1, context.this_row(), vec![]))),
                universe_handle: universe,
            }),
            ComplexColumn::ExternalComputer(Computer::Attribute {
                logic: Box::new(|context| Ok(context.get(0, context.this_row(), vec![]))),
                universe_handle: universe,
            }),
        ])?;
        Ok(())
    });
    assert_matches!(result, Err(Error::Dataflow(_)));
}

#[test]
fn test_missing_dependency_resolves_to_none() -> eyre::Result<()> {
    let values = run(|g| {
        let universe = g.static_universe(vec![key(1)])?;
        let other_universe = g.static_universe(vec![key(2)])?;
        let column = g.static_column(
            other_universe,
            vec![(key(2), Value::Int(10))],
            props(Type::Int),
        )?;
        let outputs = g.complex_columns(vec![
            ComplexColumn::Column(column),
            // key(1) is not present in the input column
            ComplexColumn::ExternalComputer(Computer::Attribute {
                logic: Box::new(|context| Ok(context.get(0, context.this_row(), vec![]))),
                universe_handle: universe,
            }),
        ])?;
        capture_column(g, outputs[0])
    })?;
    let values = final_values(&values.borrow());
    assert_eq!(values[&key(1)], Value::None);
    Ok(())
}
