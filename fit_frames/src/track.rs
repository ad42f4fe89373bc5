use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::fields::Channel;
use crate::sample::Sample;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl Bounds {
    fn of(xs: &Array1<f64>, ys: &Array1<f64>) -> Option<Bounds> {
        if xs.is_empty() || ys.is_empty() {
            return None;
        }
        let (x_min, x_max) = min_max(xs);
        let (y_min, y_max) = min_max(ys);
        Some(Bounds {
            x_min,
            x_max,
            y_min,
            y_max,
        })
    }

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    /// Height over width; `None` for a zero-width box.
    pub fn aspect_ratio(&self) -> Option<f64> {
        let width = self.width();
        if width.abs() < f64::EPSILON {
            None
        } else {
            Some(self.height() / width)
        }
    }
}

fn min_max(values: &Array1<f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
        (lo.min(v), hi.max(v))
    })
}

#[derive(Clone, Debug, Default)]
pub struct TrackProfile {
    pub distance: Array1<f64>,
    pub altitude: Array1<f64>,
    pub latitude: Array1<f64>,
    pub longitude: Array1<f64>,
}

impl TrackProfile {
    pub fn from_samples(samples: &[Sample]) -> Self {
        let mut distance = Vec::new();
        let mut altitude = Vec::new();
        let mut latitude = Vec::new();
        let mut longitude = Vec::new();

        for sample in samples {
            let ch = &sample.channels;
            if let (Some(d), Some(a)) = (ch.get(Channel::Distance), ch.get(Channel::Altitude)) {
                distance.push(d);
                altitude.push(a);
            }
            if let (Some(lat), Some(lon)) =
                (ch.get(Channel::PositionLat), ch.get(Channel::PositionLong))
            {
                latitude.push(lat);
                longitude.push(lon);
            }
        }

        Self {
            distance: Array1::from_vec(distance),
            altitude: Array1::from_vec(altitude),
            latitude: Array1::from_vec(latitude),
            longitude: Array1::from_vec(longitude),
        }
    }

    pub fn elevation_bounds(&self) -> Option<Bounds> {
        Bounds::of(&self.distance, &self.altitude)
    }

    pub fn map_bounds(&self) -> Option<Bounds> {
        Bounds::of(&self.longitude, &self.latitude)
    }

    pub fn elevation_len(&self) -> usize {
        self.distance.len()
    }

    pub fn map_len(&self) -> usize {
        self.latitude.len()
    }
}
