use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Mean Earth radius used by the Haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Moves shorter than this are geo-IP jitter, never travel.
pub const MIN_TRAVEL_DISTANCE_KM: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Desktop,
    Mobile,
    Tablet,
    Bot,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct GeoLocation {
    pub country_code: String,
    pub country: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timezone: Option<String>,
}

impl GeoLocation {
    fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) => Some((lat, lon)),
            _ => None,
        }
    }

    /// Great-circle distance in kilometres, or `None` when either side lacks usable coordinates.
    pub fn distance_km(&self, other: &GeoLocation) -> Option<f64> {
        let (lat1, lon1) = self.coordinates()?;
        let (lat2, lon2) = other.coordinates()?;

        let d_lat = (lat2 - lat1).to_radians();
        let d_lon = (lon2 - lon1).to_radians();
        let a = (d_lat / 2.0).sin().powi(2) + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        Some(EARTH_RADIUS_KM * c)
    }

    /// Whether covering the distance to `other` within `elapsed_hours` needs more than `max_speed_kmh`.
    pub fn is_impossible_travel(&self, other: &GeoLocation, elapsed_hours: f64, max_speed_kmh: f64) -> bool {
        let Some(distance) = self.distance_km(other) else {
            return false;
        };
        if distance < MIN_TRAVEL_DISTANCE_KM {
            return false;
        }
        if elapsed_hours <= 0.0 {
            return true;
        }
        distance / elapsed_hours > max_speed_kmh
    }

    /// Same check with the elapsed time given as two instants.
    pub fn is_impossible_travel_between(&self, other: &GeoLocation, from: DateTime<Utc>, to: DateTime<Utc>, max_speed_kmh: f64) -> bool {
        let elapsed_hours = (to - from).num_milliseconds() as f64 / 3_600_000.0;
        self.is_impossible_travel(other, elapsed_hours, max_speed_kmh)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct DeviceFingerprint {
    pub ip_address: String,
    pub user_agent: String,
    pub browser: String,
    pub browser_version: String,
    pub os: String,
    pub device_class: DeviceClass,
    pub device_token: Option<String>,
    pub location: Option<GeoLocation>,
}

impl DeviceFingerprint {
    /// Leading dot-separated segment of the browser version; `114.0.1` and `114.2.9` share `114`.
    pub fn browser_major(&self) -> &str {
        self.browser_version.split('.').next().unwrap_or("")
    }

    pub fn same_browser(&self, other: &DeviceFingerprint) -> bool {
        self.browser == other.browser && self.browser_major() == other.browser_major()
    }
}
