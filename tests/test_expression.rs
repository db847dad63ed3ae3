mod helpers;
use helpers::{capture_column, final_values, key, props, run};

use std::sync::Arc;

use rivulet_engine::engine::{
    AnyExpression, BoolExpression, Error, Expression, Expressions, IntExpression, Trace, Type,
    Value,
};

fn argument(i: usize) -> Arc<Expression> {
    Arc::new(Expression::Any(AnyExpression::Argument(i)))
}

fn int_const(i: i64) -> Arc<Expression> {
    Arc::new(Expression::Int(IntExpression::Const(i)))
}

#[test]
fn test_int_arithmetic() -> eyre::Result<()> {
    let expression = Expression::Int(IntExpression::Add(argument(0), argument(1)));
    assert_eq!(
        expression.eval(&[Value::Int(2), Value::Int(3)]).map_err(Error::from)?,
        Value::Int(5)
    );

    let expression = Expression::Int(IntExpression::Mul(argument(0), int_const(7)));
    assert_eq!(expression.eval(&[Value::Int(6)]).map_err(Error::from)?, Value::Int(42));
    Ok(())
}

#[test]
fn test_int_comparison() -> eyre::Result<()> {
    let expression = Expression::Bool(BoolExpression::IntLt(argument(0), argument(1)));
    assert_eq!(
        expression.eval(&[Value::Int(2), Value::Int(3)]).map_err(Error::from)?,
        Value::Bool(true)
    );
    assert_eq!(
        expression.eval(&[Value::Int(3), Value::Int(3)]).map_err(Error::from)?,
        Value::Bool(false)
    );
    Ok(())
}

#[test]
fn test_if_else() -> eyre::Result<()> {
    let expression = Expression::Any(AnyExpression::IfElse(
        Arc::new(Expression::Bool(BoolExpression::IntGt(
            argument(0),
            int_const(0),
        ))),
        Arc::new(Expression::Any(AnyExpression::Const(Value::from("pos")))),
        Arc::new(Expression::Any(AnyExpression::Const(Value::from("neg")))),
    ));
    assert_eq!(expression.eval(&[Value::Int(5)]).map_err(Error::from)?, Value::from("pos"));
    assert_eq!(expression.eval(&[Value::Int(-5)]).map_err(Error::from)?, Value::from("neg"));
    Ok(())
}

#[test]
fn test_make_tuple_and_get_item() -> eyre::Result<()> {
    let expression = Expression::Any(AnyExpression::MakeTuple(Expressions::AllArguments));
    let tuple = expression
        .eval(&[Value::Int(1), Value::from("foo")])
        .map_err(Error::from)?;
    assert_eq!(
        tuple,
        Value::from([Value::Int(1), Value::from("foo")].as_slice())
    );

    let expression = Expression::Any(AnyExpression::TupleGetItemChecked(
        argument(0),
        int_const(10),
        Arc::new(Expression::Any(AnyExpression::Const(Value::None))),
    ));
    assert_eq!(expression.eval(&[tuple]).map_err(Error::from)?, Value::None);
    Ok(())
}

#[test]
fn test_optional_pointer_from() -> eyre::Result<()> {
    let expression = Expression::Any(AnyExpression::OptionalPointerFrom(
        Expressions::AllArguments,
    ));
    assert_eq!(
        expression.eval(&[Value::Int(1)]).map_err(Error::from)?,
        Value::Pointer(key(1))
    );
    assert_eq!(
        expression
            .eval(&[Value::Int(1), Value::None])
            .map_err(Error::from)?,
        Value::None
    );
    Ok(())
}

#[test]
fn test_expression_column() -> eyre::Result<()> {
    let values = run(|g| {
        let universe = g.static_universe(vec![key(1), key(2)])?;
        let column = g.static_column(
            universe,
            vec![(key(1), Value::Int(10)), (key(2), Value::Int(20))],
            props(Type::Int),
        )?;
        let incremented = g.expression_column(
            Arc::new(Expression::Int(IntExpression::Add(
                argument(0),
                int_const(1),
            ))),
            universe,
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
