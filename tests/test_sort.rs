mod helpers;
use helpers::{capture_column, final_values, key, props, run};

use assert_matches::assert_matches;
use rivulet_engine::engine::{Error, Type, Value};

#[test]
fn test_sort_prev_next_within_instances() -> eyre::Result<()> {
    let (prev, next) = run(|g| {
        let universe = g.static_universe(vec![key(1), key(2), key(3), key(4)])?;
        let sort_key = g.static_column(
            universe,
            vec![
                (key(1), Value::Int(10)),
                (key(2), Value::Int(5)),
                (key(3), Value::Int(7)),
                (key(4), Value::Int(3)),
            ],
            props(Type::Int),
        )?;
        let instance = g.static_column(
            universe,
            vec![
                (key(1), Value::Int(0)),
                (key(2), Value::Int(0)),
                (key(3), Value::Int(1)),
                (key(4), Value::Int(1)),
            ],
            props(Type::Int),
        )?;
        let (prev, next) = g.sort(sort_key, instance)?;
        Ok((capture_column(g, prev)?, capture_column(g, next)?))
    })?;

    // instance 0 sorts to [key(2), key(1)], instance 1 to [key(4), key(3)]
    let prev = final_values(&prev.borrow());
    assert_eq!(prev[&key(2)], Value::None);
    assert_eq!(prev[&key(1)], Value::Pointer(key(2)));
    assert_eq!(prev[&key(4)], Value::None);
    assert_eq!(prev[&key(3)], Value::Pointer(key(4)));

    let next = final_values(&next.borrow());
    assert_eq!(next[&key(2)], Value::Pointer(key(1)));
    assert_eq!(next[&key(1)], Value::None);
    assert_eq!(next[&key(4)], Value::Pointer(key(3)));
    assert_eq!(next[&key(3)], Value::None);
    Ok(())
}

#[test]
fn test_sort_single_instance() -> eyre::Result<()> {
    let (prev, next) = run(|g| {
        let universe = g.static_universe(vec![key(1), key(2), key(3)])?;
        let sort_key = g.static_column(
            universe,
            vec![
                (key(1), Value::Int(2)),
                (key(2), Value::Int(1)),
                (key(3), Value::Int(3)),
            ],
            props(Type::Int),
        )?;
        let instance = g.static_column(
            universe,
            vec![
                (key(1), Value::Int(0)),
                (key(2), Value::Int(0)),
                (key(3), Value::Int(0)),
            ],
            props(Type::Int),
        )?;
        let (prev, next) = g.sort(sort_key, instance)?;
        Ok((capture_column(g, prev)?, capture_column(g, next)?))
    })?;

    // sorted order is [key(2), key(1), key(3)]
    let prev = final_values(&prev.borrow());
    let next = final_values(&next.borrow());
    assert_eq!(prev[&key(2)], Value::None);
    assert_eq!(prev[&key(1)], Value::Pointer(key(2)));
    assert_eq!(prev[&key(3)], Value::Pointer(key(1)));
    assert_eq!(next[&key(2)], Value::Pointer(key(1)));
    assert_eq!(next[&key(1)], Value::Pointer(key(3)));
    assert_eq!(next[&key(3)], Value::None);
    Ok(())
}

#[test]
fn test_sort_requires_same_universe() {
    let result = run(|g| {
        let universe = g.static_universe(vec![key(1)])?;
        let other = g.static_universe(vec![key(2)])?;
        let sort_key =
            g.static_column(universe, vec![(key(1), Value::Int(1))], props(Type::Int))?;
        let instance = g.static_column(other, vec![(key(2), Value::Int(0))], props(Type::Int))?;
        g.sort(sort_key, instance)?;
        Ok(())
    });
    assert_matches!(result, Err(Error::UniverseMismatch));
}
