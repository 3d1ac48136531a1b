//! Descriptive statistics and hypothesis tests over tables

use crate::table::{as_number, json_number, label_text, Table};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

const EPS: f64 = 1e-12;
const FPMIN: f64 = 1e-300;
const MAX_ITERATIONS: usize = 300;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample variance (ddof = 1)
pub fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some(ss / (values.len() - 1) as f64)
}

pub fn sample_std(values: &[f64]) -> Option<f64> {
    sample_variance(values).map(f64::sqrt)
}

/// Quantile of sorted values with linear interpolation between ranks.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    quantile(&sorted, 0.5)
}

pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let mx = mean(xs)?;
    let my = mean(ys)?;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(ys) {
        sxy += (x - mx) * (y - my);
        sxx += (x - mx).powi(2);
        syy += (y - my).powi(2);
    }
    let denom = (sxx * syy).sqrt();
    (denom > 0.0).then(|| sxy / denom)
}

fn numeric_values(table: &Table, column: &str) -> Vec<f64> {
    table.column_values(column).filter_map(as_number).collect()
}

fn require_columns(table: &Table, columns: &[String]) -> Result<(), String> {
    match columns.iter().find(|c| !table.has_column(c)) {
        Some(missing) => Err(format!("unknown column '{}'", missing)),
        None => Ok(()),
    }
}

fn numeric_columns(table: &Table) -> Vec<String> {
    table
        .fields()
        .iter()
        .filter(|f| f.declared_type.is_numeric())
        .map(|f| f.name.clone())
        .collect()
}

/// Per-column summary: count, mean, std, min, quartiles, max for numeric
/// columns; count, unique, top, freq when the table has none.
pub fn describe(table: &Table, columns: Option<&[String]>) -> Result<Value, String> {
    if table.column_count() == 0 {
        return Err("dataset has no columns".into());
    }

    let selected = match columns {
        Some(columns) => {
            require_columns(table, columns)?;
            columns.to_vec()
        }
        None => numeric_columns(table),
    };

    let mut summary = Map::new();
    if selected.is_empty() {
        for field in table.fields() {
            summary.insert(field.name.clone(), describe_categorical(table, &field.name));
        }
        return Ok(Value::Object(summary));
    }

    for column in selected {
        let mut values = numeric_values(table, &column);
        values.sort_by(f64::total_cmp);
        let stat = |v: Option<f64>| v.map(json_number).unwrap_or(Value::Null);
        summary.insert(
            column,
            json!({
                "count": values.len(),
                "mean": stat(mean(&values)),
                "std": stat(sample_std(&values)),
                "min": stat(values.first().copied()),
                "25%": stat(quantile(&values, 0.25)),
                "50%": stat(quantile(&values, 0.5)),
                "75%": stat(quantile(&values, 0.75)),
                "max": stat(values.last().copied()),
            }),
        );
    }
    Ok(Value::Object(summary))
}

fn describe_categorical(table: &Table, column: &str) -> Value {
    let counts = counts_by_label(table, column);
    let count: usize = counts.iter().map(|(_, n)| n).sum();
    let top = counts.first();
    json!({
        "count": count,
        "unique": counts.len(),
        "top": top.map(|(label, _)| Value::String(label.clone())).unwrap_or(Value::Null),
        "freq": top.map(|(_, n)| json!(n)).unwrap_or(Value::Null),
    })
}

/// Non-null value frequencies, most frequent first, ties in first-seen order.
fn counts_by_label(table: &Table, column: &str) -> Vec<(String, usize)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut counts: Vec<(String, usize)> = Vec::new();
    for value in table.column_values(column).filter(|v| !v.is_null()) {
        let label = label_text(value);
        match index.get(&label) {
            Some(&slot) => counts[slot].1 += 1,
            None => {
                index.insert(label.clone(), counts.len());
                counts.push((label, 1));
            }
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

pub fn value_counts(table: &Table, column: &str) -> Result<Value, String> {
    require_columns(table, &[column.to_string()])?;
    let counts = counts_by_label(table, column)
        .into_iter()
        .map(|(label, n)| (label, json!(n)))
        .collect();
    Ok(Value::Object(counts))
}

/// Pearson correlation matrix over pairwise-complete rows.
pub fn correlation(table: &Table, columns: Option<&[String]>) -> Result<Value, String> {
    let columns = match columns {
        Some(columns) => {
            require_columns(table, columns)?;
            columns.to_vec()
        }
        None => numeric_columns(table),
    };
    if columns.len() < 2 {
        return Err("correlation needs at least two numeric columns".into());
    }

    let mut matrix = Map::new();
    for a in &columns {
        let mut row = Map::new();
        for b in &columns {
            let (xs, ys): (Vec<f64>, Vec<f64>) = table
                .rows()
                .iter()
                .filter_map(|r| {
                    let x = r.get(a.as_str()).and_then(as_number)?;
                    let y = r.get(b.as_str()).and_then(as_number)?;
                    Some((x, y))
                })
                .unzip();
            row.insert(b.clone(), pearson(&xs, &ys).map(json_number).unwrap_or(Value::Null));
        }
        matrix.insert(a.clone(), Value::Object(row));
    }
    Ok(Value::Object(matrix))
}

fn two_columns(table: &Table, columns: &[String], test: &str) -> Result<(String, String), String> {
    match columns {
        [a, b] => {
            require_columns(table, columns)?;
            Ok((a.clone(), b.clone()))
        }
        _ => Err(format!("{} needs exactly two columns", test)),
    }
}

/// Welch's two-sample t-test between two numeric columns.
pub fn welch_ttest(table: &Table, columns: &[String]) -> Result<Value, String> {
    let (a, b) = two_columns(table, columns, "ttest")?;
    let xs = numeric_values(table, &a);
    let ys = numeric_values(table, &b);
    let (Some(v1), Some(v2)) = (sample_variance(&xs), sample_variance(&ys)) else {
        return Err("ttest needs at least two numeric values per column".into());
    };
    let (n1, n2) = (xs.len() as f64, ys.len() as f64);
    let (m1, m2) = (mean(&xs).unwrap_or(0.0), mean(&ys).unwrap_or(0.0));
    let se2 = v1 / n1 + v2 / n2;
    if se2 <= 0.0 {
        return Err("ttest is undefined for zero variance".into());
    }
    let t = (m1 - m2) / se2.sqrt();
    let dof = se2.powi(2) / ((v1 / n1).powi(2) / (n1 - 1.0) + (v2 / n2).powi(2) / (n2 - 1.0));
    let p_value = incomplete_beta(dof / 2.0, 0.5, dof / (dof + t * t));

    Ok(json!({
        "test": "welch_ttest",
        "columns": [a, b],
        "mean_a": json_number(m1),
        "mean_b": json_number(m2),
        "statistic": json_number(t),
        "dof": json_number(dof),
        "p_value": json_number(p_value),
    }))
}

/// Two-sample z-test between two numeric columns.
pub fn ztest(table: &Table, columns: &[String]) -> Result<Value, String> {
    let (a, b) = two_columns(table, columns, "ztest")?;
    let xs = numeric_values(table, &a);
    let ys = numeric_values(table, &b);
    let (Some(v1), Some(v2)) = (sample_variance(&xs), sample_variance(&ys)) else {
        return Err("ztest needs at least two numeric values per column".into());
    };
    let se2 = v1 / xs.len() as f64 + v2 / ys.len() as f64;
    if se2 <= 0.0 {
        return Err("ztest is undefined for zero variance".into());
    }
    let (m1, m2) = (mean(&xs).unwrap_or(0.0), mean(&ys).unwrap_or(0.0));
    let z = (m1 - m2) / se2.sqrt();
    let p_value = 1.0 - erf(z.abs() / std::f64::consts::SQRT_2);

    Ok(json!({
        "test": "ztest",
        "columns": [a, b],
        "mean_a": json_number(m1),
        "mean_b": json_number(m2),
        "statistic": json_number(z),
        "p_value": json_number(p_value),
    }))
}

/// Chi-square test of independence between two categorical columns.
pub fn chi_square(table: &Table, columns: &[String]) -> Result<Value, String> {
    let (a, b) = two_columns(table, columns, "chi_square")?;

    let mut row_labels = Labels::default();
    let mut col_labels = Labels::default();
    let mut pairs: Vec<(usize, usize)> = Vec::new();
    for row in table.rows() {
        let (Some(x), Some(y)) = (row.get(a.as_str()), row.get(b.as_str())) else {
            continue;
        };
        if x.is_null() || y.is_null() {
            continue;
        }
        pairs.push((
            row_labels.position_or_push(label_text(x)),
            col_labels.position_or_push(label_text(y)),
        ));
    }
    if row_labels.len() < 2 || col_labels.len() < 2 {
        return Err("chi_square needs at least two categories in each column".into());
    }

    let mut observed = vec![vec![0usize; col_labels.len()]; row_labels.len()];
    for (r, c) in &pairs {
        observed[*r][*c] += 1;
    }
    let n = pairs.len() as f64;
    let row_totals: Vec<f64> = observed.iter().map(|r| r.iter().sum::<usize>() as f64).collect();
    let col_totals: Vec<f64> = (0..col_labels.len())
        .map(|c| observed.iter().map(|r| r[c]).sum::<usize>() as f64)
        .collect();

    let mut statistic = 0.0;
    for (r, row) in observed.iter().enumerate() {
        for (c, count) in row.iter().enumerate() {
            let expected = row_totals[r] * col_totals[c] / n;
            statistic += (*count as f64 - expected).powi(2) / expected;
        }
    }
    let dof = ((row_labels.len() - 1) * (col_labels.len() - 1)) as f64;
    let p_value = gamma_q(dof / 2.0, statistic / 2.0);

    let (row_labels, col_labels) = (row_labels.order, col_labels.order);
    let table_out: Map<String, Value> = row_labels
        .iter()
        .zip(&observed)
        .map(|(label, counts)| {
            let cells = col_labels
                .iter()
                .zip(counts)
                .map(|(c, n)| (c.clone(), json!(n)))
                .collect();
            (label.clone(), Value::Object(cells))
        })
        .collect();

    Ok(json!({
        "test": "chi_square",
        "columns": [a, b],
        "statistic": json_number(statistic),
        "dof": dof,
        "p_value": json_number(p_value),
        "observed": table_out,
    }))
}

/// Distinct labels in first-seen order
#[derive(Default)]
struct Labels {
    index: HashMap<String, usize>,
    order: Vec<String>,
}

impl Labels {
    fn len(&self) -> usize {
        self.order.len()
    }

    fn position_or_push(&mut self, label: String) -> usize {
        if let Some(&slot) = self.index.get(&label) {
            return slot;
        }
        self.index.insert(label.clone(), self.order.len());
        self.order.push(label);
        self.order.len() - 1
    }
}

fn ln_gamma(x: f64) -> f64 {
    const G: f64 = 7.0;
    const COEF: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let t = x + G + 0.5;
    let series = COEF
        .iter()
        .enumerate()
        .skip(1)
        .fold(COEF[0], |acc, (i, c)| acc + c / (x + i as f64));
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + series.ln()
}

/// Regularized lower incomplete gamma P(a, x)
fn gamma_p(a: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x < a + 1.0 {
        let mut ap = a;
        let mut sum = 1.0 / a;
        let mut del = sum;
        for _ in 0..MAX_ITERATIONS {
            ap += 1.0;
            del *= x / ap;
            sum += del;
            if del.abs() < sum.abs() * EPS {
                break;
            }
        }
        sum * (-x + a * x.ln() - ln_gamma(a)).exp()
    } else {
        1.0 - gamma_q(a, x)
    }
}

/// Regularized upper incomplete gamma Q(a, x)
fn gamma_q(a: f64, x: f64) -> f64 {
    if x < a + 1.0 {
        return 1.0 - gamma_p(a, x);
    }
    let mut b = x + 1.0 - a;
    let mut c = 1.0 / FPMIN;
    let mut d = 1.0 / b;
    let mut h = d;
    for i in 1..MAX_ITERATIONS {
        let an = -(i as f64) * (i as f64 - a);
        b += 2.0;
        d = an * d + b;
        if d.abs() < FPMIN {
            d = FPMIN;
        }
        c = b + an / c;
        if c.abs() < FPMIN {
            c = FPMIN;
        }
        d = 1.0 / d;
        let del = d * c;
        h *= del;
        if (del - 1.0).abs() < EPS {
            break;
        }
    }
    (-x + a * x.ln() - ln_gamma(a)).exp() * h
}

fn erf(x: f64) -> f64 {
    if x < 0.0 {
        -gamma_p(0.5, x * x)
    } else {
        gamma_p(0.5, x * x)
    }
}

/// Regularized incomplete beta I_x(a, b)
fn incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let front = (ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln()).exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_fraction(b, a, 1.0 - x) / b
    }
}

fn beta_fraction(a: f64, b: f64, x: f64) -> f64 {
    let clamp = |v: f64| if v.abs() < FPMIN { FPMIN } else { v };
    let (qab, qap, qam) = (a + b, a + 1.0, a - 1.0);
    let mut c = 1.0;
    let mut d = 1.0 / clamp(1.0 - qab * x / qap);
    let mut h = d;
    for m in 1..MAX_ITERATIONS {
        let m = m as f64;
        let m2 = 2.0 * m;
        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 / clamp(1.0 + aa * d);
        c = clamp(1.0 + aa / c);
        h *= d * c;
        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 / clamp(1.0 + aa * d);
        c = clamp(1.0 + aa / c);
        let del = d * c;
        h *= del;
        if (del - 1.0).abs() < EPS {
            break;
        }
    }
    h
}
