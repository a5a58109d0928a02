//! Stage 2: outlier / invalid value removal.
//!
//! Values outside the configured physical range (or non-finite) become the
//! missing marker. This stage never fabricates values.

use crate::domain::{Series, Stage, ValidRangeTable, Variable};

/// Clean a derived series; returns the series and how many values were removed.
pub fn clean(mut series: Series, table: &ValidRangeTable) -> (Series, usize) {
    if series.stage >= Stage::Cleaned {
        return (series, 0);
    }

    let bounds: Vec<(usize, Option<(f64, f64)>)> = Variable::ALL
        .iter()
        .map(|&v| (v.index(), table.bounds(v)))
        .collect();

    let mut removed = 0usize;
    for rec in &mut series.records {
        for &(idx, range) in &bounds {
            let Some(x) = rec.values[idx] else { continue };
            let valid = x.is_finite() && range.is_none_or(|(lo, hi)| x >= lo && x <= hi);
            if !valid {
                rec.values[idx] = None;
                removed += 1;
            }
        }
    }

    series.stage = Stage::Cleaned;
    (series, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Observation, Record};
    use chrono::NaiveDate;

    fn series_with(variable: Variable, values: &[f64]) -> Series {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let records = values
            .iter()
            .enumerate()
            .map(|(i, &x)| {
                let mut obs = Observation::missing(start + chrono::Duration::hours(i as i64));
                obs.values[variable.index()] = Some(x);
                Record::from_observation(&obs)
            })
            .collect();
        Series {
            station_id: 1,
            stage: Stage::Derived,
            records,
        }
    }

    #[test]
    fn humidity_outside_0_100_becomes_missing() {
        let series = series_with(Variable::RelativeHumidity, &[50.0, 101.0, -1.0, 100.0, 0.0]);
        let (out, removed) = clean(series, &ValidRangeTable::default());
        assert_eq!(removed, 2);
        let got: Vec<Option<f64>> = out
            .records
            .iter()
            .map(|r| r.value(Variable::RelativeHumidity))
            .collect();
        assert_eq!(got, vec![Some(50.0), None, None, Some(100.0), Some(0.0)]);
        assert_eq!(out.stage, Stage::Cleaned);
    }

    #[test]
    fn non_finite_values_are_removed_even_without_a_range() {
        let table = ValidRangeTable { ranges: Vec::new() };
        let series = series_with(Variable::AirTemperature, &[1.0, f64::NAN, f64::INFINITY]);
        let (out, removed) = clean(series, &table);
        assert_eq!(removed, 2);
        assert_eq!(out.records[0].value(Variable::AirTemperature), Some(1.0));
    }
}
