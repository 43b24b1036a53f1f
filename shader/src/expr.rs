//! Boolean condition expressions used by branches and the structurizer.

use crate::inst::ConditionCode;
use std::rc::Rc;

pub type Expr = Rc<ExprData>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExprData {
    /// Flow variable introduced by goto outward movement.
    Var(u32),
    Predicate(u32),
    CondCode(ConditionCode),
    Not(Expr),
    And(Expr, Expr),
    Or(Expr, Expr),
    Boolean(bool),
    GprEqual(u32, u32),
}

pub fn make_expr(data: ExprData) -> Expr {
    Rc::new(data)
}

fn boolean_value(expr: &Expr) -> Option<bool> {
    match **expr {
        ExprData::Boolean(value) => Some(value),
        _ => None,
    }
}

/// Builds a negation, collapsing double negations.
pub fn make_not(expr: Expr) -> Expr {
    if let ExprData::Not(ref inner) = *expr {
        return inner.clone();
    }
    make_expr(ExprData::Not(expr))
}

/// Builds a conjunction, folding boolean constants.
pub fn make_and(first: Expr, second: Expr) -> Expr {
    if let Some(value) = boolean_value(&first) {
        return if value { second } else { first };
    }
    if let Some(value) = boolean_value(&second) {
        return if value { first } else { second };
    }
    make_expr(ExprData::And(first, second))
}

/// Builds a disjunction, folding boolean constants.
pub fn make_or(first: Expr, second: Expr) -> Expr {
    if let Some(value) = boolean_value(&first) {
        return if value { first } else { second };
    }
    if let Some(value) = boolean_value(&second) {
        return if value { second } else { first };
    }
    make_expr(ExprData::Or(first, second))
}

pub fn exprs_are_equal(first: &Expr, second: &Expr) -> bool {
    **first == **second
}

/// Whether one expression is exactly the negation of the other.
pub fn exprs_are_opposite(first: &Expr, second: &Expr) -> bool {
    if let ExprData::Not(ref inner) = **first {
        return exprs_are_equal(inner, second);
    }
    if let ExprData::Not(ref inner) = **second {
        return exprs_are_equal(inner, first);
    }
    false
}

pub fn expr_is_true(expr: &Expr) -> bool {
    boolean_value(expr) == Some(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_negation_collapses() {
        let pred = make_expr(ExprData::Predicate(3));
        let negated = make_not(pred.clone());
        assert_eq!(*make_not(negated), *pred);
    }

    #[test]
    fn and_folds_constants() {
        let t = make_expr(ExprData::Boolean(true));
        let f = make_expr(ExprData::Boolean(false));
        let var = make_expr(ExprData::Var(0));
        assert_eq!(*make_and(t.clone(), var.clone()), *var);
        assert_eq!(*make_and(f.clone(), var.clone()), *f);
        assert_eq!(*make_or(t.clone(), var.clone()), *t);
        assert_eq!(*make_or(f, var.clone()), *var);
    }

    #[test]
    fn opposites_detected_through_not() {
        let pred = make_expr(ExprData::Predicate(1));
        let negated = make_not(pred.clone());
        assert!(exprs_are_opposite(&pred, &negated));
        assert!(exprs_are_opposite(&negated, &pred));
        assert!(!exprs_are_opposite(&pred, &pred));
    }

    #[test]
    fn deep_equality() {
        let a = make_and(
            make_expr(ExprData::Predicate(0)),
            make_expr(ExprData::CondCode(crate::inst::ConditionCode::Ne)),
        );
        let b = make_and(
            make_expr(ExprData::Predicate(0)),
            make_expr(ExprData::CondCode(crate::inst::ConditionCode::Ne)),
        );
        assert!(exprs_are_equal(&a, &b));
    }
}
