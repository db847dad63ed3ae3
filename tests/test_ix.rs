mod helpers;
use helpers::{capture_column, capture_universe, final_keys, final_values, key, props, run};

use assert_matches::assert_matches;
use rivulet_engine::engine::{DataError, Error, IxKeyPolicy, Type, Value};

#[test]
fn test_ix_fail_missing() -> eyre::Result<()> {
    let (keys, values) = run(|g| {
        let input_universe = g.static_universe(vec![key(1), key(2)])?;
        let input_column = g.static_column(
            input_universe,
            vec![(key(1), Value::Int(10)), (key(2), Value::Int(20))],
            props(Type::Int),
        )?;
        let requests = g.static_universe(vec![key(100), key(101)])?;
        let pointer_column = g.static_column(
            requests,
            vec![
                (key(100), Value::Pointer(key(2))),
                (key(101), Value::Pointer(key(1))),
            ],
            props(Type::Pointer),
        )?;
        let ixer = g.ix(pointer_column, input_universe, IxKeyPolicy::FailMissing)?;
        Ok((
            capture_universe(g, g.ixer_universe(ixer)?)?,
            capture_column(g, g.ix_column(ixer, input_column)?)?,
        ))
    })?;
    assert_eq!(final_keys(&keys.borrow()), vec![key(100), key(101)]);
    let values = final_values(&values.borrow());
    assert_eq!(values[&key(100)], Value::Int(20));
    assert_eq!(values[&key(101)], Value::Int(10));
    Ok(())
}

#[test]
fn test_ix_fail_missing_rejects_unknown_key() {
    let result = run(|g| {
        let input_universe = g.static_universe(vec![key(1)])?;
        let requests = g.static_universe(vec![key(100)])?;
        let pointer_column = g.static_column(
            requests,
            vec![(key(100), Value::Pointer(key(99)))],
            props(Type::Pointer),
        )?;
        g.ix(pointer_column, input_universe, IxKeyPolicy::FailMissing)?;
        Ok(())
    });
    assert_matches!(result, Err(Error::Data(DataError::KeyMissingInUniverse(_))));
}

#[test]
fn test_ix_forward_none() -> eyre::Result<()> {
    let values = run(|g| {
        let input_universe = g.static_universe(vec![key(1)])?;
        let input_column = g.static_column(
            input_universe,
            vec![(key(1), Value::Int(10))],
            props(Type::Int),
        )?;
        let requests = g.static_universe(vec![key(100), key(101), key(102)])?;
        let pointer_column = g.static_column(
            requests,
            vec![
                (key(100), Value::Pointer(key(1))),
                (key(101), Value::None),
                (key(102), Value::Pointer(key(99))),
            ],
            props(Type::Pointer),
        )?;
        let ixer = g.ix(pointer_column, input_universe, IxKeyPolicy::ForwardNone)?;
        capture_column(g, g.ix_column(ixer, input_column)?)
    })?;
    let values = final_values(&values.borrow());
    assert_eq!(values[&key(100)], Value::Int(10));
    assert_eq!(values[&key(101)], Value::None);
    assert_eq!(values[&key(102)], Value::None);
    Ok(())
}

#[test]
fn test_ix_key_policy_from_strict_optional() {
    assert_matches!(
        IxKeyPolicy::from_strict_optional(true, false),
        Ok(IxKeyPolicy::FailMissing)
    );
    assert_matches!(
        IxKeyPolicy::from_strict_optional(false, true),
        Ok(IxKeyPolicy::ForwardNone)
    );
    assert_matches!(
        IxKeyPolicy::from_strict_optional(false, false),
        Err(Error::BadIxKeyPolicy)
    );
}

#[test]
fn test_ix_column_requires_input_universe() {
    let result = run(|g| {
        let input_universe = g.static_universe(vec![key(1)])?;
        let requests = g.static_universe(vec![key(100)])?;
        let pointer_column = g.static_column(
            requests,
            vec![(key(100), Value::Pointer(key(1)))],
            props(Type::Pointer),
        )?;
        let ixer = g.ix(pointer_column, input_universe, IxKeyPolicy::FailMissing)?;
        // the column lives on the requesting universe, not the input one
        g.ix_column(ixer, pointer_column)?;
        Ok(())
    });
    assert_matches!(result, Err(Error::UniverseMismatch));
}
