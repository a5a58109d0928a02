//! Deterministic synthetic hourly stations.
//!
//! Produces a plausible diurnal/seasonal climate per station so the full
//! pipeline can run without downloaded data. Same config, same output.

use chrono::{Datelike, Duration, NaiveDateTime, Timelike};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{Observation, Station, StationMeta, Variable};
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticConfig {
    pub stations: usize,
    pub hours: usize,
    pub start: NaiveDateTime,
    /// Probability that any single value is dropped.
    pub missing_rate: f64,
    pub seed: u64,
}

/// Station ids start at 1 and increase with the station index.
pub fn generate_stations(config: &SyntheticConfig) -> Result<Vec<Station>, AppError> {
    if config.stations == 0 || config.hours == 0 {
        return Err(AppError::configuration("Synthetic data needs at least one station and one hour."));
    }
    if !(0.0..1.0).contains(&config.missing_rate) {
        return Err(AppError::configuration("Synthetic missing rate must be in [0, 1)."));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let noise = Normal::new(0.0, 1.0)
        .map_err(|e| AppError::numeric(format!("Noise distribution error: {e}")))?;

    let mut out = Vec::with_capacity(config.stations);
    for i in 0..config.stations {
        // Scatter over a Central-Valley-sized box.
        let latitude = rng.gen_range(34.5..40.5);
        let longitude = rng.gen_range(-122.5..-117.5);
        let elevation_cooling = rng.gen_range(0.0..4.0);
        let amplitude = rng.gen_range(5.0..9.0);
        let meta = StationMeta {
            id: i as u32 + 1,
            name: format!("Synthetic {}", i + 1),
            latitude,
            longitude,
            county: Some(if latitude > 37.5 { "North" } else { "South" }.to_string()),
            active: Some(true),
        };

        let base = 16.0 - (latitude - 34.5) * 1.2 - elevation_cooling;
        let mut soil = base;
        let mut observations = Vec::with_capacity(config.hours);
        for h in 0..config.hours {
            let ts = config.start + Duration::hours(h as i64);
            let day_angle = 2.0 * std::f64::consts::PI * (f64::from(ts.ordinal()) - 200.0) / 365.0;
            let hour_angle = 2.0 * std::f64::consts::PI * (f64::from(ts.hour()) - 9.0) / 24.0;

            let air = base + 8.0 * day_angle.cos() + amplitude * hour_angle.sin() + noise.sample(&mut rng);
            let dew = air - rng.gen_range(2.0..12.0);
            let rh = (100.0 * (17.62 * dew / (243.12 + dew) - 17.62 * air / (243.12 + air)).exp()).clamp(5.0, 100.0);
            soil += (air - soil) * 0.05;
            let solar = (hour_angle.sin().max(0.0) * (700.0 + 250.0 * day_angle.cos())).max(0.0);
            let wind = (2.0 + noise.sample(&mut rng)).abs();
            let direction = rng.gen_range(0.0..360.0);
            let vapor = 0.6108 * (17.27 * dew / (dew + 237.3)).exp();

            let mut obs = Observation::missing(ts);
            let values = [
                (Variable::AirTemperature, air),
                (Variable::DewPoint, dew),
                (Variable::RelativeHumidity, rh),
                (Variable::SoilTemperature, soil),
                (Variable::SolarRadiation, solar),
                (Variable::WindSpeed, wind),
                (Variable::WindDirection, direction),
                (Variable::VaporPressure, vapor),
                (Variable::Precip, 0.0),
                (Variable::Eto, solar * 0.0008),
            ];
            for (variable, value) in values {
                if rng.r#gen::<f64>() >= config.missing_rate {
                    obs.values[variable.index()] = Some(value);
                }
            }
            observations.push(obs);
        }
        out.push(Station { meta, observations });
    }
    Ok(out)
}
