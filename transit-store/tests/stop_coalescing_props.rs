use proptest::prelude::*;
use transit_core::{Stop, StopCandidate};
use transit_store::coalesce::{self, CoalesceOutcome};

const TOL_LAT: f64 = 0.005;
const TOL_LON: f64 = 0.005;

fn arb_coord() -> impl Strategy<Value = f64> {
    (-9000i32..9000i32).prop_map(|hundredths| f64::from(hundredths) / 100.0)
}

fn arb_candidate() -> impl Strategy<Value = StopCandidate> {
    (arb_coord(), arb_coord()).prop_map(|(lat, lon)| StopCandidate {
        title: "Main & 1st".to_string(),
        lat,
        lon,
        stop_id: None,
        stop_tag: "t".to_string(),
        api_call_id: None,
    })
}

fn fold(stop: &mut Stop, candidate: &StopCandidate) {
    match coalesce::decide(&[stop], candidate, TOL_LAT, TOL_LON) {
        CoalesceOutcome::UpdateSurvivor { lat, lon, lat_lon_count, .. } => {
            stop.lat = lat;
            stop.lon = lon;
            stop.lat_lon_count = lat_lon_count;
        }
        CoalesceOutcome::CreateNew => {
            stop.lat = candidate.lat;
            stop.lon = candidate.lon;
            stop.lat_lon_count = 1;
        }
    }
}

proptest! {
    // S1: feeding N observations clustered inside the tolerance box always
    // leaves exactly one survivor, whose count equals the number folded in.
    #[test]
    fn clustered_observations_fold_into_one_survivor(
        first in arb_candidate(),
        rest in proptest::collection::vec(-5i32..=5i32, 0..20),
    ) {
        let mut stop = Stop {
            id: 1,
            title: first.title.clone(),
            lat: first.lat,
            lon: first.lon,
            lat_lon_count: 1,
            stop_id: None,
            api_call_id: None,
        };
        let mut count = 1u32;
        for nudge in rest {
            let candidate = StopCandidate {
                title: "Main & 1st".to_string(),
                lat: stop.lat + f64::from(nudge) / 10_000.0,
                lon: stop.lon + f64::from(nudge) / 10_000.0,
                stop_id: None,
                stop_tag: "t".to_string(),
                api_call_id: None,
            };
            fold(&mut stop, &candidate);
            count += 1;
        }
        prop_assert_eq!(stop.lat_lon_count, count);
    }

    // Idempotence-of-decision: deciding twice against the same fixed survivor
    // and candidate (without mutating the survivor in between) always
    // produces the same outcome.
    #[test]
    fn deciding_twice_against_same_inputs_agrees(
        candidate in arb_candidate(),
        survivor_lat in arb_coord(),
        survivor_lon in arb_coord(),
    ) {
        let survivor = Stop {
            id: 1,
            title: "Main & 1st".to_string(),
            lat: survivor_lat,
            lon: survivor_lon,
            lat_lon_count: 3,
            stop_id: None,
            api_call_id: None,
        };
        let first = coalesce::decide(&[&survivor], &candidate, TOL_LAT, TOL_LON);
        let second = coalesce::decide(&[&survivor], &candidate, TOL_LAT, TOL_LON);
        prop_assert_eq!(first, second);
    }

    // The running mean never drifts outside the convex hull of the survivor's
    // prior position and the new candidate.
    #[test]
    fn running_mean_stays_between_prior_and_candidate(
        survivor_lat in arb_coord(),
        survivor_lon in arb_coord(),
        candidate in arb_candidate(),
    ) {
        let survivor = Stop {
            id: 1,
            title: "Main & 1st".to_string(),
            lat: survivor_lat,
            lon: survivor_lon,
            lat_lon_count: 1,
            stop_id: None,
            api_call_id: None,
        };
        if let CoalesceOutcome::UpdateSurvivor { lat, lon, .. } =
            coalesce::decide(&[&survivor], &candidate, TOL_LAT, TOL_LON)
        {
            let (lo_lat, hi_lat) = (survivor_lat.min(candidate.lat), survivor_lat.max(candidate.lat));
            let (lo_lon, hi_lon) = (survivor_lon.min(candidate.lon), survivor_lon.max(candidate.lon));
            prop_assert!(lat >= lo_lat - 1e-9 && lat <= hi_lat + 1e-9);
            prop_assert!(lon >= lo_lon - 1e-9 && lon <= hi_lon + 1e-9);
        }
    }
}
