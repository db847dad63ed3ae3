mod helpers;
use helpers::{capture_column, capture_universe, final_keys, final_values, key, props, run};

use std::collections::HashSet;

use assert_matches::assert_matches;
use rivulet_engine::engine::{DataError, Error, Graph, JoinType, Key, Value};
use rivulet_engine::engine::{ColumnHandle, DynResult, Type, UniverseHandle};

struct JoinFixture {
    left_universe: UniverseHandle,
    left_on: ColumnHandle,
    left_data: ColumnHandle,
    right_universe: UniverseHandle,
    right_on: ColumnHandle,
    right_data: ColumnHandle,
}

// left: key(1) joins on 1, key(2) joins on 2
// right: key(11) joins on 2, key(12) joins on 3
// the only match is key(2) with key(11)
fn join_fixture(g: &dyn Graph) -> DynResult<JoinFixture> {
    let left_universe = g.static_universe(vec![key(1), key(2)])?;
    let left_on = g.static_column(
        left_universe,
        vec![(key(1), Value::Int(1)), (key(2), Value::Int(2))],
        props(Type::Int),
    )?;
    let left_data = g.static_column(
        left_universe,
        vec![(key(1), Value::from("l1")), (key(2), Value::from("l2"))],
        props(Type::String),
    )?;
    let right_universe = g.static_universe(vec![key(11), key(12)])?;
    let right_on = g.static_column(
        right_universe,
        vec![(key(11), Value::Int(2)), (key(12), Value::Int(3))],
        props(Type::Int),
    )?;
    let right_data = g.static_column(
        right_universe,
        vec![(key(11), Value::from("r1")), (key(12), Value::from("r2"))],
        props(Type::String),
    )?;
    Ok(JoinFixture {
        left_universe,
        left_on,
        left_data,
        right_universe,
        right_on,
        right_data,
    })
}

fn matched_key() -> Key {
    Key::for_values(&[Value::Pointer(key(2)), Value::Pointer(key(11))])
}

#[test]
fn test_inner_join() -> eyre::Result<()> {
    let (keys, left, right) = run(|g| {
        let f = join_fixture(g)?;
        let joiner = g.join(
            f.left_universe,
            vec![f.left_on],
            f.right_universe,
            vec![f.right_on],
            JoinType::Inner,
        )?;
        Ok((
            capture_universe(g, g.joiner_universe(joiner)?)?,
            capture_column(g, g.joiner_left_column(joiner, f.left_data)?)?,
            capture_column(g, g.joiner_right_column(joiner, f.right_data)?)?,
        ))
    })?;
    assert_eq!(final_keys(&keys.borrow()), vec![matched_key()]);
    assert_eq!(
        final_values(&left.borrow())[&matched_key()],
        Value::from("l2")
    );
    assert_eq!(
        final_values(&right.borrow())[&matched_key()],
        Value::from("r1")
    );
    Ok(())
}

#[test]
fn test_left_outer_join() -> eyre::Result<()> {
    let (keys, right) = run(|g| {
        let f = join_fixture(g)?;
        let joiner = g.join(
            f.left_universe,
            vec![f.left_on],
            f.right_universe,
            vec![f.right_on],
            JoinType::LeftOuter,
        )?;
        Ok((
            capture_universe(g, g.joiner_universe(joiner)?)?,
            capture_column(g, g.joiner_right_column(joiner, f.right_data)?)?,
        ))
    })?;
    let ear_key = Key::for_values(&[Value::Pointer(key(1)), Value::None]);
    assert_eq!(
        final_keys(&keys.borrow()).into_iter().collect::<HashSet<_>>(),
        HashSet::from([matched_key(), ear_key])
    );
    let right = final_values(&right.borrow());
    assert_eq!(right[&matched_key()], Value::from("r1"));
    assert_eq!(right[&ear_key], Value::None);
    Ok(())
}

#[test]
fn test_full_outer_join() -> eyre::Result<()> {
    let (keys, left) = run(|g| {
        let f = join_fixture(g)?;
        let joiner = g.join(
            f.left_universe,
            vec![f.left_on],
            f.right_universe,
            vec![f.right_on],
            JoinType::FullOuter,
        )?;
        Ok((
            capture_universe(g, g.joiner_universe(joiner)?)?,
            capture_column(g, g.joiner_left_column(joiner, f.left_data)?)?,
        ))
    })?;
    let left_ear = Key::for_values(&[Value::Pointer(key(1)), Value::None]);
    let right_ear = Key::for_values(&[Value::None, Value::Pointer(key(12))]);
    assert_eq!(
        final_keys(&keys.borrow()).into_iter().collect::<HashSet<_>>(),
        HashSet::from([matched_key(), left_ear, right_ear])
    );
    let left = final_values(&left.borrow());
    assert_eq!(left[&left_ear], Value::from("l1"));
    assert_eq!(left[&right_ear], Value::None);
    Ok(())
}

#[test]
fn test_left_keys_subset_join_keeps_left_keys() -> eyre::Result<()> {
    let (keys, right) = run(|g| {
        let f = join_fixture(g)?;
        let joiner = g.join(
            f.left_universe,
            vec![f.left_on],
            f.right_universe,
            vec![f.right_on],
            JoinType::LeftKeysSubset,
        )?;
        Ok((
            capture_universe(g, g.joiner_universe(joiner)?)?,
            capture_column(g, g.joiner_right_column(joiner, f.right_data)?)?,
        ))
    })?;
    assert_eq!(final_keys(&keys.borrow()), vec![key(2)]);
    assert_eq!(final_values(&right.borrow())[&key(2)], Value::from("r1"));
    Ok(())
}

#[test]
fn test_left_keys_full_join_requires_all_matched() {
    let result = run(|g| {
        let f = join_fixture(g)?;
        g.join(
            f.left_universe,
            vec![f.left_on],
            f.right_universe,
            vec![f.right_on],
            JoinType::LeftKeysFull,
        )?;
        Ok(())
    });
    assert_matches!(result, Err(Error::Data(DataError::KeyMissingInUniverse(_))));
}

#[test]
fn test_left_keys_subset_join_rejects_duplicate_matches() {
    let result = run(|g| {
        let left_universe = g.static_universe(vec![key(1)])?;
        let left_on =
            g.static_column(left_universe, vec![(key(1), Value::Int(1))], props(Type::Int))?;
        let right_universe = g.static_universe(vec![key(11), key(12)])?;
        let right_on = g.static_column(
            right_universe,
            vec![(key(11), Value::Int(1)), (key(12), Value::Int(1))],
            props(Type::Int),
        )?;
        g.join(
            left_universe,
            vec![left_on],
            right_universe,
            vec![right_on],
            JoinType::LeftKeysSubset,
        )?;
        Ok(())
    });
    assert_matches!(result, Err(Error::Data(DataError::DuplicateKey(_))));
}

#[test]
fn test_join_condition_length_mismatch() {
    let result = run(|g| {
        let f = join_fixture(g)?;
        g.join(
            f.left_universe,
            vec![f.left_on, f.left_data],
            f.right_universe,
            vec![f.right_on],
            JoinType::Inner,
        )?;
        Ok(())
    });
    assert_matches!(result, Err(Error::DifferentJoinConditionLengths));
}

#[test]
fn test_join_type_from_assign_left_right() {
    assert_matches!(
        JoinType::from_assign_left_right(false, false, false),
        Ok(JoinType::Inner)
    );
    assert_matches!(
        JoinType::from_assign_left_right(true, false, false),
        Ok(JoinType::LeftKeysSubset)
    );
    assert_matches!(
        JoinType::from_assign_left_right(false, true, true),
        Ok(JoinType::FullOuter)
    );
    assert_matches!(
        JoinType::from_assign_left_right(true, true, true),
        Err(Error::BadJoinType)
    );
}
