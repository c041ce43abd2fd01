//! Engine Settings
//!
//! Runtime options consulted by the frame driver. The core itself requires
//! no configuration files; consuming applications fill in a
//! [`RenderSettings`] and hand it to the frame-graph manager.

/// Runtime render settings.
///
/// Consulted at frame boundaries only; changing a value mid-frame takes
/// effect on the next frame.
#[derive(Clone, Copy, Debug)]
pub struct RenderSettings {
    /// Upper bound on the presented frame rate, in frames per second.
    ///
    /// `None` leaves the frame rate uncapped. The frame driver sleeps at
    /// the frame boundary until the minimum frame time has elapsed.
    pub frame_rate_limit: Option<u32>,
}

impl RenderSettings {
    /// Minimum frame duration implied by [`frame_rate_limit`](Self::frame_rate_limit).
    #[must_use]
    pub fn min_frame_time(&self) -> Option<std::time::Duration> {
        self.frame_rate_limit
            .filter(|limit| *limit > 0)
            .map(|limit| std::time::Duration::from_secs_f64(1.0 / f64::from(limit)))
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            frame_rate_limit: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_frame_time() {
        let settings = RenderSettings {
            frame_rate_limit: Some(60),
        };
        let dt = settings.min_frame_time().unwrap();
        assert!((dt.as_secs_f64() - 1.0 / 60.0).abs() < 1e-9);

        assert!(RenderSettings::default().min_frame_time().is_none());

        let zero = RenderSettings {
            frame_rate_limit: Some(0),
        };
        assert!(zero.min_frame_time().is_none());
    }
}
