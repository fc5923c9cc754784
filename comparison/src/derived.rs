//! Derived metrics computed from the raw metrics of each row.

use std::collections::HashMap;

use tracing::warn;

use crate::error::Result;
use crate::expression::ExpressionEvaluator;
use crate::model::{Metric, MetricExpression, MetricFunction, Row, Window};

/// Appends every derived metric to every row.
///
/// An expression is derived when its name is not one of the raw metric
/// function names; raw metrics are already on the row. Each derived value
/// is evaluated twice, once against the row's baseline values and once
/// against its current values. A non-finite result (such as a ratio over a
/// zero denominator) is stored as 0.
pub fn append_derived_metrics(
    rows: &mut [Row],
    expressions: &[MetricExpression],
    metric_functions: &[MetricFunction],
    evaluator: &dyn ExpressionEvaluator,
) -> Result<()> {
    let derived: Vec<&MetricExpression> = expressions
        .iter()
        .filter(|expression| {
            !metric_functions
                .iter()
                .any(|function| function.metric_name == expression.name)
        })
        .collect();
    if derived.is_empty() {
        return Ok(());
    }

    for row in rows.iter_mut() {
        let mut baseline: HashMap<String, f64> = HashMap::new();
        let mut current: HashMap<String, f64> = HashMap::new();
        for metric in row.metrics() {
            baseline.insert(metric.name.clone(), metric.baseline_value);
            current.insert(metric.name.clone(), metric.current_value);
        }

        for expression in &derived {
            let baseline_value = evaluator.evaluate(&expression.expression, &baseline)?;
            let current_value = evaluator.evaluate(&expression.expression, &current)?;
            row.push_metric(Metric::new(
                expression.name.clone(),
                finite_or_zero(&expression.name, Window::Baseline, baseline_value),
                finite_or_zero(&expression.name, Window::Current, current_value),
            ));
        }
    }
    Ok(())
}

fn finite_or_zero(name: &str, window: Window, value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        warn!(metric = name, %window, value, "derived metric is not finite, reporting 0");
        0.0
    }
}
