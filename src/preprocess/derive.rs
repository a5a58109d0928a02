//! Stage 1: calendar features.

use chrono::{Datelike, Timelike};

use crate::domain::{Season, Series, Stage};

/// Recompute hour-of-day and season from each record's timestamp.
pub fn derive(mut series: Series) -> Series {
    if series.stage >= Stage::Derived {
        return series;
    }
    for rec in &mut series.records {
        rec.hour_of_day = rec.timestamp.hour() as u8;
        rec.season = Season::from_month(rec.timestamp.month());
    }
    series.stage = Stage::Derived;
    series
}
