//! Framework event keys and metric payloads.
//!
//! The runtime publishes metrics on reserved keys like any other event, so a
//! component that wants to display or log them simply binds an input field
//! to [`DURATION_KEY`] or [`FPS_KEY`].

use serde::{Deserialize, Serialize};

/// Prefix of every key reserved by the framework.
pub const INTERNAL_PREFIX: &str = "conduit.";

/// Averaged processing-step durations, payload [`StepDuration`].
pub const DURATION_KEY: &str = "conduit.duration";

/// Averaged iteration rates of iterating components, payload [`Fps`].
pub const FPS_KEY: &str = "conduit.fps";

/// Average duration of one processing step of a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDuration {
    /// Identity of the measured component.
    pub component: String,
    /// Average step duration in seconds over the reporting interval.
    pub seconds: f64,
}

/// Achieved iteration rate of an iterating component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fps {
    /// Identity of the measured component.
    pub component: String,
    /// Iterations per second over the reporting interval.
    pub current: f64,
    /// Rate implied by the configured period.
    pub target: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_keys_are_internal() {
        assert!(DURATION_KEY.starts_with(INTERNAL_PREFIX));
        assert!(FPS_KEY.starts_with(INTERNAL_PREFIX));
    }

    #[test]
    fn test_fps_serializes_with_field_names() {
        let fps = Fps {
            component: "Camera0".to_string(),
            current: 29.5,
            target: 30.0,
        };
        let json = serde_json::to_value(&fps).unwrap();
        assert_eq!(json["component"], "Camera0");
        assert_eq!(json["target"], 30.0);
    }
}
