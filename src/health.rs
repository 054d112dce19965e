//! Shared position and radar-contact freshness tracking.
//!
//! One snapshot per process — a vessel has one position no matter how many
//! sensors feed it. Channels publish into the tracker; the geofence gate and
//! the status monitor read from it. All access goes through a mutex; the
//! snapshot is tiny and writes are throttled, so contention is negligible.

use chrono::{DateTime, Utc};
use std::sync::Mutex;

/// Sentence token identifying a position fix.
const POSITION_TOKEN: &str = "GGA";
/// Sentence token identifying a tracked radar target.
const RADAR_TOKEN: &str = "TTM";
/// Rolling window within which a signal counts as fresh, in seconds.
const FRESHNESS_WINDOW_SECS: i64 = 10 * 60;
/// Only every Nth position sentence is actually parsed; GPS units emit a fix
/// every second and the gate does not need that resolution.
const POSITION_SAMPLE_EVERY: u32 = 100;

/// Point-in-time copy of the tracker state.
#[derive(Debug, Clone, Copy)]
pub struct HealthSnapshot {
    /// Last known location in decimal degrees; (0, 0) when unknown or after
    /// a malformed fix
    pub location: (f64, f64),
    pub last_position: Option<DateTime<Utc>>,
    pub last_radar: Option<DateTime<Utc>>,
}

struct TrackerState {
    location: (f64, f64),
    last_position: Option<DateTime<Utc>>,
    last_radar: Option<DateTime<Utc>>,
    position_samples: u32,
}

pub struct HealthTracker {
    state: Mutex<TrackerState>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState {
                location: (0.0, 0.0),
                last_position: None,
                last_radar: None,
                position_samples: 0,
            }),
        }
    }

    /// Feed one retained line into the tracker.
    pub fn observe(&self, line: &str, now: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();

        if line.contains(POSITION_TOKEN) {
            // Sampled: the first position sentence is evaluated immediately,
            // then one in every POSITION_SAMPLE_EVERY.
            if state.position_samples % POSITION_SAMPLE_EVERY == 0 {
                state.last_position = Some(now);
                match parse_position(line) {
                    Some(location) => state.location = location,
                    // A malformed fix must not leave a stale location behind;
                    // (0, 0) reads as "unknown" to the gate.
                    None => state.location = (0.0, 0.0),
                }
            }
            state.position_samples = state.position_samples.wrapping_add(1);
        }

        if line.contains(RADAR_TOKEN) {
            state.last_radar = Some(now);
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let state = self.state.lock().unwrap();
        HealthSnapshot {
            location: state.location,
            last_position: state.last_position,
            last_radar: state.last_radar,
        }
    }

    pub fn location(&self) -> (f64, f64) {
        self.state.lock().unwrap().location
    }

    /// Both position and radar seen within the freshness window?
    pub fn both_fresh(&self, now: DateTime<Utc>) -> bool {
        let state = self.state.lock().unwrap();
        fresh(state.last_position, now) && fresh(state.last_radar, now)
    }
}

fn fresh(seen: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    seen.is_some_and(|t| (now - t).num_seconds() < FRESHNESS_WINDOW_SECS)
}

/// Decode latitude/longitude from a GGA-family sentence.
///
/// Fields after the type token are `time,lat,N|S,lon,E|W,...` with latitude
/// as ddmm.mmmm and longitude as dddmm.mmmm; south and west are negative.
pub fn parse_position(line: &str) -> Option<(f64, f64)> {
    let rest = line.split_once("GGA,")?.1;
    let mut fields = rest.split(',');
    let _fix_time = fields.next()?;
    let lat_raw: f64 = fields.next()?.parse().ok()?;
    let lat_hemisphere = fields.next()?;
    let lon_raw: f64 = fields.next()?.parse().ok()?;
    let lon_hemisphere = fields.next()?;

    let mut lat = to_decimal_degrees(lat_raw);
    if lat_hemisphere == "S" {
        lat = -lat;
    }
    let mut lon = to_decimal_degrees(lon_raw);
    if lon_hemisphere == "W" {
        lon = -lon;
    }
    Some((lat, lon))
}

/// ddmm.mmmm → decimal degrees: degrees + minutes/60.
fn to_decimal_degrees(raw: f64) -> f64 {
    let scaled = raw / 100.0;
    let degrees = scaled.trunc();
    let minutes = scaled.fract() * 100.0;
    degrees + minutes / 60.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const FIX: &str = "$GPGGA,103045,4530.5000,N,01512.0000,E,1,08,0.9,12.1,M,,M,,*47";

    #[test]
    fn decodes_minutes_form() {
        let (lat, lon) = parse_position(FIX).unwrap();
        assert!((lat - 45.5083).abs() < 1e-3, "lat was {lat}");
        assert!((lon - 15.2000).abs() < 1e-3, "lon was {lon}");
    }

    #[test]
    fn southern_and_western_hemispheres_flip_sign() {
        let line = "$GPGGA,103045,4530.5000,S,01512.0000,W,1,08,0.9,12.1,M,,M,,*47";
        let (lat, lon) = parse_position(line).unwrap();
        assert!(lat < 0.0 && (lat + 45.5083).abs() < 1e-3);
        assert!(lon < 0.0 && (lon + 15.2000).abs() < 1e-3);
    }

    #[test]
    fn malformed_fix_resets_location() {
        let tracker = HealthTracker::new();
        let now = Utc::now();
        tracker.observe(FIX, now);
        assert!(tracker.location().0 > 45.0);

        // 100 sentences later the next sample is evaluated; this one is junk.
        for _ in 0..99 {
            tracker.observe("$GPGGA,garbage", now);
        }
        tracker.observe("$GPGGA,garbage", now);
        assert_eq!(tracker.location(), (0.0, 0.0));
    }

    #[test]
    fn position_parse_is_sampled() {
        let tracker = HealthTracker::new();
        let now = Utc::now();
        tracker.observe(FIX, now);
        let first = tracker.location();

        // In-between sentences are counted but not parsed.
        let moved = "$GPGGA,103045,1000.0000,N,01000.0000,E,1,08,0.9,12.1,M,,M,,*47";
        tracker.observe(moved, now);
        assert_eq!(tracker.location(), first);
    }

    #[test]
    fn radar_contact_stamps_freshness() {
        let tracker = HealthTracker::new();
        let now = Utc::now();
        tracker.observe(FIX, now);
        assert!(!tracker.both_fresh(now));

        tracker.observe("$RATTM,01,2.5,045.0,T,3.1,100.0,T,,,N,target,T,,,A*XX", now);
        assert!(tracker.both_fresh(now));
    }

    #[test]
    fn stale_position_breaks_both_fresh() {
        let tracker = HealthTracker::new();
        let fix_time = Utc::now();
        tracker.observe(FIX, fix_time);
        tracker.observe("$RATTM,01,2.5,045.0,T", fix_time + Duration::minutes(11));

        // Position is 11 minutes old by now, radar just arrived.
        let query = fix_time + Duration::minutes(11);
        assert!(!tracker.both_fresh(query));

        // Both inside the window right after the fix.
        let tracker = HealthTracker::new();
        tracker.observe(FIX, fix_time);
        tracker.observe("$RATTM,01,2.5,045.0,T", fix_time);
        assert!(tracker.both_fresh(fix_time + Duration::minutes(9)));
    }
}
