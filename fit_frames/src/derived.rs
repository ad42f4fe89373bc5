use serde::{Deserialize, Serialize};

/// Distance deltas at or below this produce no gradient.
pub const DEFAULT_MIN_DISTANCE_DELTA: f64 = 0.1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GradientWindow {
    previous: Option<(f64, f64)>,
}

impl GradientWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn previous(&self) -> Option<(f64, f64)> {
        self.previous
    }

    pub fn advance(
        self,
        altitude: Option<f64>,
        distance: Option<f64>,
        min_distance_delta: f64,
    ) -> (Self, Option<f64>) {
        let current = match (altitude, distance) {
            (Some(a), Some(d)) if a.is_finite() && d.is_finite() => (a, d),
            _ => return (self, None),
        };
        let gradient = self.previous.and_then(|(alt0, dist0)| {
            gradient_percent(alt0, dist0, current.0, current.1, min_distance_delta)
        });
        (
            GradientWindow {
                previous: Some(current),
            },
            gradient,
        )
    }
}

pub fn gradient_percent(
    alt0: f64,
    dist0: f64,
    alt1: f64,
    dist1: f64,
    min_distance_delta: f64,
) -> Option<f64> {
    let dd = dist1 - dist0;
    if dd > min_distance_delta {
        Some(100.0 * (alt1 - alt0) / dd)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_pair_only_primes_the_window() {
        let (window, grad) = GradientWindow::new().advance(Some(100.0), Some(1000.0), 0.1);
        assert_eq!(grad, None);
        assert_eq!(window.previous(), Some((100.0, 1000.0)));
    }

    #[test]
    fn gradient_over_threshold() {
        let (window, _) = GradientWindow::new().advance(Some(100.0), Some(1000.0), 0.1);
        let (window, grad) = window.advance(Some(105.0), Some(1050.0), 0.1);
        assert_eq!(grad, Some(10.0));

        // Below threshold: no gradient, but the window still moves.
        let (window, grad) = window.advance(Some(105.2), Some(1050.05), 0.1);
        assert_eq!(grad, None);
        assert_eq!(window.previous(), Some((105.2, 1050.05)));
    }

    #[test]
    fn partial_or_non_finite_inputs_leave_window_alone() {
        let (window, _) = GradientWindow::new().advance(Some(10.0), Some(0.0), 0.1);
        let (after, grad) = window.advance(Some(12.0), None, 0.1);
        assert_eq!(grad, None);
        assert_eq!(after, window);

        let (after, grad) = window.advance(Some(f64::NAN), Some(50.0), 0.1);
        assert_eq!(grad, None);
        assert_eq!(after, window);
    }

    #[test]
    fn descending_and_stationary() {
        assert_eq!(gradient_percent(50.0, 0.0, 45.0, 100.0, 0.1), Some(-5.0));
        assert_eq!(gradient_percent(50.0, 10.0, 51.0, 10.1, 0.1), None);
        assert_eq!(gradient_percent(50.0, 10.0, 51.0, 9.0, 0.1), None);
    }
}
