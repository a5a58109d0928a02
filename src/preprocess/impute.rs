//! Stage 4: per-variable gap filling.
//!
//! Interior gaps are linearly interpolated against the time axis; gaps at the
//! start or end hold the nearest observed value. A variable with no observed
//! value at all cannot be recovered and is reported back to the caller.

use crate::domain::{Series, Stage, Variable};

/// Outcome of imputing one series.
#[derive(Debug, Clone, PartialEq)]
pub struct Imputed {
    pub series: Series,
    /// Variables that are missing over the whole series.
    pub unrecoverable: Vec<Variable>,
    /// Number of filled values.
    pub filled: usize,
}

pub fn impute(mut series: Series) -> Imputed {
    let mut unrecoverable = Vec::new();
    let mut filled = 0usize;

    for v in Variable::ALL {
        let idx = v.index();
        let known: Vec<usize> = series
            .records
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.values[idx].map(|_| i))
            .collect();

        if known.is_empty() {
            if !series.records.is_empty() {
                unrecoverable.push(v);
            }
            continue;
        }
        if known.len() == series.records.len() {
            continue;
        }
        filled += fill_variable(&mut series, idx, &known);
    }

    if series.stage < Stage::Imputed {
        series.stage = Stage::Imputed;
    }
    Imputed {
        series,
        unrecoverable,
        filled,
    }
}

fn fill_variable(series: &mut Series, idx: usize, known: &[usize]) -> usize {
    let records = &mut series.records;
    let mut filled = 0usize;

    // Leading edge: hold the first observation.
    let first = known[0];
    let first_value = records[first].values[idx];
    for rec in &mut records[..first] {
        rec.values[idx] = first_value;
        rec.imputed[idx] = true;
        filled += 1;
    }

    // Trailing edge: hold the last observation.
    let last = known[known.len() - 1];
    let last_value = records[last].values[idx];
    for rec in &mut records[last + 1..] {
        rec.values[idx] = last_value;
        rec.imputed[idx] = true;
        filled += 1;
    }

    // Interior gaps.
    for pair in known.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        if hi - lo < 2 {
            continue;
        }
        let (Some(a), Some(b)) = (records[lo].values[idx], records[hi].values[idx]) else {
            continue;
        };
        let t0 = records[lo].timestamp;
        let span = (records[hi].timestamp - t0).num_seconds() as f64;
        for i in lo + 1..hi {
            let w = (records[i].timestamp - t0).num_seconds() as f64 / span;
            records[i].values[idx] = Some(a * (1.0 - w) + b * w);
            records[i].imputed[idx] = true;
            filled += 1;
        }
    }

    filled
}
