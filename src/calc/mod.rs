//! Calculated fields
//!
//! A formula refers to other fields by name; each name resolves to that
//! field's serialized value in the current submission. Formulas are parsed
//! by a small arithmetic grammar (numbers, `+ - * /` and their `− × ÷`
//! spellings, parentheses, field names) and nothing else is ever evaluated.
//!
//! A formula that cannot be evaluated yields an empty value. It never fails
//! the submission.

pub mod parser;

pub use parser::CalcError;

use crate::schema::FormData;
use crate::validation::constraint::parse_number;
use parser::{BinaryOp, Expr};

/// Evaluates `formula` against `values`.
pub fn evaluate(formula: &str, values: &FormData) -> Result<f64, CalcError> {
    let names: Vec<&str> = values.keys().map(String::as_str).collect();
    let expr = parser::parse(formula, &names)?;
    let result = eval(&expr, values)?;
    if result.is_finite() {
        Ok(result)
    } else {
        Err(CalcError::NotFinite)
    }
}

fn eval(expr: &Expr, values: &FormData) -> Result<f64, CalcError> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Field(name) => {
            let value = values
                .get(name)
                .ok_or_else(|| CalcError::UnknownField(name.clone()))?;
            parse_number(value).ok_or_else(|| CalcError::NonNumeric {
                name: name.clone(),
                value: value.clone(),
            })
        }
        Expr::Neg(inner) => Ok(-eval(inner, values)?),
        Expr::Binary { op, lhs, rhs } => {
            let lhs = eval(lhs, values)?;
            let rhs = eval(rhs, values)?;
            match op {
                BinaryOp::Add => Ok(lhs + rhs),
                BinaryOp::Sub => Ok(lhs - rhs),
                BinaryOp::Mul => Ok(lhs * rhs),
                BinaryOp::Div if rhs == 0.0 => Err(CalcError::DivisionByZero),
                BinaryOp::Div => Ok(lhs / rhs),
            }
        }
    }
}

/// Resolves the stored value of the calculated field `own_name`.
///
/// `resolved` holds every value settled so far in the submission; the
/// field's own entry, if any, is not visible to its formula.
pub fn calculate(formula: Option<&str>, own_name: &str, resolved: &FormData) -> String {
    let Some(formula) = formula.filter(|f| !f.trim().is_empty()) else {
        return String::new();
    };

    let mut values = resolved.clone();
    values.remove(own_name);

    match evaluate(formula, &values) {
        Ok(result) => format_number(result),
        Err(e) => {
            log::debug!("calculation for '{}' left empty: {}", own_name, e);
            String::new()
        }
    }
}

/// Shortest decimal form, without a trailing `.0` for whole numbers.
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        // no "-0"
        return "0".to_string();
    }
    format!("{}", value)
}
