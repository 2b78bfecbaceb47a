//! The stop-coalescing decision (spec §4.5), as pure data in/data out logic
//! so it can be tested without an async store.
//!
//! The upstream feed reports slightly different coordinates for what is
//! physically one bus shelter depending which route asked about it. Rather
//! than keeping every sample, a survivor's position is a running mean,
//! nudged by each new observation and rounded to 5 decimal places.

use transit_core::{Stop, StopCandidate};

/// What to do with a candidate stop observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoalesceOutcome {
    /// Fold the candidate into the named survivor's running mean.
    UpdateSurvivor {
        /// The surviving stop's id.
        id: i64,
        /// Next latitude, rounded to 5 decimals.
        lat: f64,
        /// Next longitude, rounded to 5 decimals.
        lon: f64,
        /// Next sample count.
        lat_lon_count: u32,
    },
    /// No existing stop is close enough; the caller should create a new one.
    CreateNew,
}

/// Decide which of `same_title` (stops sharing the candidate's title) the
/// candidate coalesces into, if any.
///
/// Within `tol_lat`/`tol_lon` degrees, exactly one match is the survivor.
/// Multiple matches are resolved by Manhattan distance, ties broken by
/// lowest id.
#[must_use]
pub fn decide(
    same_title: &[&Stop],
    candidate: &StopCandidate,
    tol_lat: f64,
    tol_lon: f64,
) -> CoalesceOutcome {
    let mut nearby: Vec<&Stop> = same_title
        .iter()
        .copied()
        .filter(|s| (s.lat - candidate.lat).abs() <= tol_lat && (s.lon - candidate.lon).abs() <= tol_lon)
        .collect();

    if nearby.is_empty() {
        return CoalesceOutcome::CreateNew;
    }

    nearby.sort_by(|a, b| {
        let dist_a = (a.lat - candidate.lat).abs() + (a.lon - candidate.lon).abs();
        let dist_b = (b.lat - candidate.lat).abs() + (b.lon - candidate.lon).abs();
        dist_a
            .partial_cmp(&dist_b)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });

    let survivor = nearby[0];
    let n = f64::from(survivor.lat_lon_count);
    CoalesceOutcome::UpdateSurvivor {
        id: survivor.id,
        lat: round5((survivor.lat * n + candidate.lat) / (n + 1.0)),
        lon: round5((survivor.lon * n + candidate.lon) / (n + 1.0)),
        lat_lon_count: survivor.lat_lon_count + 1,
    }
}

fn round5(x: f64) -> f64 {
    (x * 100_000.0).round() / 100_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop(id: i64, title: &str, lat: f64, lon: f64, lat_lon_count: u32) -> Stop {
        Stop {
            id,
            title: title.to_string(),
            lat,
            lon,
            lat_lon_count,
            stop_id: None,
            api_call_id: None,
        }
    }

    fn candidate(title: &str, lat: f64, lon: f64) -> StopCandidate {
        StopCandidate {
            title: title.to_string(),
            lat,
            lon,
            stop_id: None,
            stop_tag: "t".to_string(),
            api_call_id: None,
        }
    }

    #[test]
    fn no_nearby_stop_creates_new() {
        let existing = stop(1, "Main & 1st", 40.0, -74.0, 1);
        let cand = candidate("Main & 1st", 41.0, -75.0);
        assert_eq!(
            decide(&[&existing], &cand, 0.005, 0.005),
            CoalesceOutcome::CreateNew
        );
    }

    #[test]
    fn single_nearby_stop_is_the_survivor() {
        let existing = stop(7, "Main & 1st", 40.00000, -74.00000, 1);
        let cand = candidate("Main & 1st", 40.00200, -74.00200);
        let outcome = decide(&[&existing], &cand, 0.005, 0.005);
        assert_eq!(
            outcome,
            CoalesceOutcome::UpdateSurvivor {
                id: 7,
                lat: 40.00100,
                lon: -74.00100,
                lat_lon_count: 2,
            }
        );
    }

    #[test]
    fn multiple_nearby_stops_pick_manhattan_nearest() {
        let far = stop(1, "Main & 1st", 40.003, -74.003, 1);
        let near = stop(2, "Main & 1st", 40.001, -74.001, 1);
        let cand = candidate("Main & 1st", 40.000, -74.000);
        let outcome = decide(&[&far, &near], &cand, 0.01, 0.01);
        assert_eq!(
            outcome,
            CoalesceOutcome::UpdateSurvivor {
                id: 2,
                lat: 40.0005,
                lon: -74.0005,
                lat_lon_count: 2,
            }
        );
    }

    #[test]
    fn ties_break_on_lowest_id() {
        let a = stop(5, "Main & 1st", 40.001, -74.000, 1);
        let b = stop(3, "Main & 1st", 39.999, -74.000, 1);
        let cand = candidate("Main & 1st", 40.000, -74.000);
        let outcome = decide(&[&a, &b], &cand, 0.01, 0.01);
        assert_eq!(
            outcome,
            CoalesceOutcome::UpdateSurvivor {
                id: 3,
                lat: 39.9995,
                lon: -74.0,
                lat_lon_count: 2,
            }
        );
    }
}
