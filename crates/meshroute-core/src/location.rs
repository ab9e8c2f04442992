//! Geographic location types and the default geography provider

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contact::Contact;
use crate::GeographyProvider;

/// Mean Earth radius used by the haversine formula
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Geographic location in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in degrees (-90 to 90)
    pub latitude: f64,
    /// Longitude in degrees (-180 to 180)
    pub longitude: f64,
}

impl Location {
    /// Create a new location
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Nodes that hide their position advertise `0,0`
    pub fn is_hidden(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }

    /// Great-circle distance to another location in kilometres (Haversine formula)
    pub fn distance_km(&self, other: &Location) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();

        EARTH_RADIUS_KM * c
    }
}

/// Geography provider backed by contact coordinates and the haversine formula.
#[derive(Debug, Clone, Copy, Default)]
pub struct HaversineGeography;

impl GeographyProvider for HaversineGeography {
    fn distance_km(&self, a: &Location, b: &Location) -> f64 {
        a.distance_km(b)
    }

    fn last_heard(&self, contact: &Contact) -> Option<DateTime<Utc>> {
        contact.last_seen
    }
}
