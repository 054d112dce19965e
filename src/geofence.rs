//! Authorized transfer zones.
//!
//! Zones are axis-aligned lat/lon rectangles loaded once at startup from a
//! plain-text file, one zone per line:
//!
//! ```text
//! # name (north,west) (south,east)
//! fremantle (-31.9,115.6) (-32.2,115.9)
//! ```
//!
//! Comment lines start with `#`; a literal `[ports]` header line is ignored.

use crate::error::{AppResult, RelayError};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    pub name: String,
    pub north: f64,
    pub west: f64,
    pub south: f64,
    pub east: f64,
}

impl Zone {
    /// Strict inequalities on all four bounds: a point exactly on a boundary
    /// is outside.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat < self.north && lat > self.south && lon > self.west && lon < self.east
    }
}

/// Whether transfer is authorized at `location`. With no zones configured,
/// transmission is unconditionally allowed.
pub fn can_transmit(location: (f64, f64), zones: &[Zone]) -> bool {
    if zones.is_empty() {
        return true;
    }
    zones
        .iter()
        .any(|zone| zone.contains(location.0, location.1))
}

pub fn load_zones(path: &Path) -> AppResult<Vec<Zone>> {
    let text = fs::read_to_string(path)?;
    parse_zones(&text, &path.display().to_string())
}

fn parse_zones(text: &str, path: &str) -> AppResult<Vec<Zone>> {
    let mut zones = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line == "[ports]" {
            continue;
        }

        let mut parts = line.split_whitespace();
        let name = parts.next().unwrap_or_default().to_string();
        let top_left = parts.next();
        let bottom_right = parts.next();
        let (Some(top_left), Some(bottom_right)) = (top_left, bottom_right) else {
            return Err(RelayError::ZoneFile {
                path: path.to_string(),
                line: idx + 1,
                reason: "expected '<name> (<north>,<west>) (<south>,<east>)'".to_string(),
            });
        };

        let (north, west) = parse_pair(top_left, path, idx + 1)?;
        let (south, east) = parse_pair(bottom_right, path, idx + 1)?;
        zones.push(Zone {
            name,
            north,
            west,
            south,
            east,
        });
    }
    Ok(zones)
}

fn parse_pair(token: &str, path: &str, line: usize) -> AppResult<(f64, f64)> {
    let bad = |reason: String| RelayError::ZoneFile {
        path: path.to_string(),
        line,
        reason,
    };
    let inner = token.trim_matches(|c| c == '(' || c == ')');
    let (a, b) = inner
        .split_once(',')
        .ok_or_else(|| bad(format!("expected '(lat,lon)', got '{token}'")))?;
    let lat = a
        .trim()
        .parse()
        .map_err(|_| bad(format!("invalid latitude '{a}'")))?;
    let lon = b
        .trim()
        .parse()
        .map_err(|_| bad(format!("invalid longitude '{b}'")))?;
    Ok((lat, lon))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone() -> Zone {
        Zone {
            name: "testzone".into(),
            north: -31.9,
            west: 115.6,
            south: -32.2,
            east: 115.9,
        }
    }

    #[test]
    fn strictly_inside_is_inside() {
        assert!(zone().contains(-32.0, 115.7));
    }

    #[test]
    fn boundary_coincidence_is_outside() {
        let z = zone();
        assert!(!z.contains(z.north, 115.7));
        assert!(!z.contains(z.south, 115.7));
        assert!(!z.contains(-32.0, z.west));
        assert!(!z.contains(-32.0, z.east));
    }

    #[test]
    fn no_zones_means_always_allowed() {
        assert!(can_transmit((0.0, 0.0), &[]));
    }

    #[test]
    fn outside_every_zone_blocks() {
        assert!(!can_transmit((10.0, 10.0), &[zone()]));
        assert!(can_transmit((-32.0, 115.7), &[zone()]));
    }

    #[test]
    fn parses_file_with_comments_and_header() {
        let text = "\
# transfer zones
[ports]

fremantle (-31.9,115.6) (-32.2,115.9)
hobart (-42.8,147.2) (-43.0,147.5)
";
        let zones = parse_zones(text, "zones.txt").unwrap();
        assert_eq!(zones.len(), 2);
        assert_eq!(zones[0].name, "fremantle");
        assert_eq!(zones[1].east, 147.5);
    }

    #[test]
    fn malformed_line_is_an_error_with_line_number() {
        let text = "fremantle (-31.9,115.6)";
        let err = parse_zones(text, "zones.txt").unwrap_err();
        match err {
            RelayError::ZoneFile { line, .. } => assert_eq!(line, 1),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn non_numeric_coordinate_is_an_error() {
        let text = "fremantle (north,115.6) (-32.2,115.9)";
        assert!(parse_zones(text, "zones.txt").is_err());
    }
}
