//! Arithmetic over metric values.
//!
//! Metric expressions use the PromQL expression grammar restricted to
//! scalars: bare metric names, number literals, parentheses, unary minus,
//! arithmetic and `bool` comparisons. `ctr = clicks / impressions` parses
//! as a binary expression over two selectors and evaluates against a map
//! from metric name to value.

use std::collections::HashMap;

use promql_parser::parser::token::*;
use promql_parser::parser::{BinaryExpr, Expr};

use crate::error::{Error, Result};
use crate::model::{MetricExpression, MetricFunction};

/// Evaluates metric expressions against named values.
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluates `expression` with every metric name resolved from
    /// `context`. Non-finite results (e.g. division by zero) are returned
    /// as-is; deciding what to do with them is the caller's business.
    fn evaluate(&self, expression: &str, context: &HashMap<String, f64>) -> Result<f64>;

    /// Metric names referenced by `expression`, in first-reference order.
    fn referenced_metrics(&self, expression: &str) -> Result<Vec<String>>;
}

/// [`ExpressionEvaluator`] backed by `promql-parser`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromqlExpressionEvaluator;

impl PromqlExpressionEvaluator {
    fn parse(expression: &str) -> Result<Expr> {
        promql_parser::parser::parse(expression)
            .map_err(|e| Error::Expression(format!("failed to parse '{}': {}", expression, e)))
    }

    fn eval(expr: &Expr, context: &HashMap<String, f64>) -> Result<f64> {
        match expr {
            Expr::NumberLiteral(literal) => Ok(literal.val),
            Expr::VectorSelector(selector) => {
                let name = selector.name.as_deref().ok_or_else(|| {
                    Error::Expression("selector without a metric name".to_string())
                })?;
                context
                    .get(name)
                    .copied()
                    .ok_or_else(|| Error::Expression(format!("unknown metric '{}'", name)))
            }
            Expr::Paren(paren) => Self::eval(&paren.expr, context),
            Expr::Unary(unary) => Ok(-Self::eval(&unary.expr, context)?),
            Expr::Binary(binary) => Self::eval_binary(binary, context),
            _ => Err(Error::Expression(
                "unsupported construct in metric expression".to_string(),
            )),
        }
    }

    fn eval_binary(binary: &BinaryExpr, context: &HashMap<String, f64>) -> Result<f64> {
        let left = Self::eval(&binary.lhs, context)?;
        let right = Self::eval(&binary.rhs, context)?;
        let truth = |b: bool| if b { 1.0 } else { 0.0 };
        match binary.op.id() {
            T_ADD => Ok(left + right),
            T_SUB => Ok(left - right),
            T_MUL => Ok(left * right),
            T_DIV => Ok(left / right),
            T_MOD => Ok(left % right),
            T_POW => Ok(left.powf(right)),
            T_EQLC => Ok(truth(left == right)),
            T_NEQ => Ok(truth(left != right)),
            T_LSS => Ok(truth(left < right)),
            T_GTR => Ok(truth(left > right)),
            T_LTE => Ok(truth(left <= right)),
            T_GTE => Ok(truth(left >= right)),
            _ => Err(Error::Expression(format!(
                "unsupported operator in metric expression: {:?}",
                binary.op
            ))),
        }
    }

    fn collect_names(expr: &Expr, names: &mut Vec<String>) -> Result<()> {
        match expr {
            Expr::NumberLiteral(_) => Ok(()),
            Expr::VectorSelector(selector) => {
                let name = selector.name.as_ref().ok_or_else(|| {
                    Error::Expression("selector without a metric name".to_string())
                })?;
                if !names.contains(name) {
                    names.push(name.clone());
                }
                Ok(())
            }
            Expr::Paren(paren) => Self::collect_names(&paren.expr, names),
            Expr::Unary(unary) => Self::collect_names(&unary.expr, names),
            Expr::Binary(binary) => {
                Self::collect_names(&binary.lhs, names)?;
                Self::collect_names(&binary.rhs, names)
            }
            _ => Err(Error::Expression(
                "unsupported construct in metric expression".to_string(),
            )),
        }
    }
}

impl ExpressionEvaluator for PromqlExpressionEvaluator {
    fn evaluate(&self, expression: &str, context: &HashMap<String, f64>) -> Result<f64> {
        Self::eval(&Self::parse(expression)?, context)
    }

    fn referenced_metrics(&self, expression: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        Self::collect_names(&Self::parse(expression)?, &mut names)?;
        Ok(names)
    }
}

/// Raw metrics the backend has to aggregate to answer `expressions`.
///
/// Every metric name referenced by any expression becomes one `SUM`
/// function, deduplicated, in first-reference order.
pub fn metric_functions_from_expressions(
    evaluator: &dyn ExpressionEvaluator,
    expressions: &[MetricExpression],
) -> Result<Vec<MetricFunction>> {
    let mut names: Vec<String> = Vec::new();
    for expression in expressions {
        for name in evaluator.referenced_metrics(&expression.expression)? {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    Ok(names.into_iter().map(MetricFunction::sum).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn context(values: &[(&str, f64)]) -> HashMap<String, f64> {
        values
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect()
    }

    #[rstest]
    #[case("clicks / impressions", 0.1)]
    #[case("(clicks + 10) * 2", 60.0)]
    #[case("-clicks + impressions", 180.0)]
    #[case("impressions % 7", 4.0)]
    #[case("clicks ^ 2", 400.0)]
    #[case("clicks > bool 5", 1.0)]
    #[case("100 * clicks / impressions", 10.0)]
    fn should_evaluate_arithmetic(#[case] expression: &str, #[case] expected: f64) {
        // given
        let ctx = context(&[("clicks", 20.0), ("impressions", 200.0)]);

        // when
        let value = PromqlExpressionEvaluator.evaluate(expression, &ctx).unwrap();

        // then
        assert!(
            (value - expected).abs() < 1e-9,
            "{} evaluated to {}, expected {}",
            expression,
            value,
            expected
        );
    }

    #[test]
    fn should_return_non_finite_values_unchanged() {
        let ctx = context(&[("clicks", 0.0), ("impressions", 0.0), ("cost", 5.0)]);
        let evaluator = PromqlExpressionEvaluator;

        assert!(evaluator.evaluate("clicks / impressions", &ctx).unwrap().is_nan());
        assert!(evaluator.evaluate("cost / impressions", &ctx).unwrap().is_infinite());
    }

    #[test]
    fn should_fail_on_unknown_metric() {
        let result = PromqlExpressionEvaluator.evaluate("clicks / spend", &context(&[("clicks", 1.0)]));
        assert!(matches!(result, Err(Error::Expression(msg)) if msg.contains("spend")));
    }

    #[test]
    fn should_fail_on_unparseable_expression() {
        let result = PromqlExpressionEvaluator.evaluate("clicks /", &HashMap::new());
        assert!(matches!(result, Err(Error::Expression(_))));
    }

    #[test]
    fn should_reject_aggregations() {
        let result = PromqlExpressionEvaluator.referenced_metrics("sum(clicks)");
        assert!(matches!(result, Err(Error::Expression(msg)) if msg.contains("unsupported")));
    }

    #[test]
    fn should_list_referenced_metrics_once_in_order() {
        let names = PromqlExpressionEvaluator
            .referenced_metrics("(clicks + conversions) / clicks")
            .unwrap();
        assert_eq!(names, vec!["clicks".to_string(), "conversions".to_string()]);
    }

    #[test]
    fn should_derive_metric_functions_from_expressions() {
        // given
        let expressions = vec![
            MetricExpression::raw("impressions"),
            MetricExpression::new("ctr", "clicks / impressions"),
            MetricExpression::raw("clicks"),
        ];

        // when
        let functions =
            metric_functions_from_expressions(&PromqlExpressionEvaluator, &expressions).unwrap();

        // then
        assert_eq!(
            functions,
            vec![MetricFunction::sum("impressions"), MetricFunction::sum("clicks")]
        );
    }
}
