//! Averaging of step durations and iteration rates.
//!
//! The recorder collects one sample per completed processing step. Once per
//! interval it turns the collected samples into [`StepDuration`] and [`Fps`]
//! payloads, which the scheduler publishes on the framework keys.

use std::time::{Duration, Instant};

use conduit_component::metric::{DURATION_KEY, FPS_KEY, Fps, StepDuration};
use conduit_component::{ComponentId, Key, Payload};

#[derive(Debug, Default, Clone, Copy)]
struct Window {
    busy: Duration,
    steps: u32,
}

#[derive(Debug)]
pub(crate) struct MetricsRecorder {
    interval: Duration,
    started: Option<Instant>,
    components: Vec<(ComponentId, Option<Duration>)>,
    windows: Vec<Window>,
}

impl MetricsRecorder {
    /// `components` holds each node's id and, for iterating ones, its period.
    pub(crate) fn new(interval: Duration, components: Vec<(ComponentId, Option<Duration>)>) -> Self {
        let windows = vec![Window::default(); components.len()];
        Self {
            interval,
            started: None,
            components,
            windows,
        }
    }

    pub(crate) fn record(&mut self, node: usize, elapsed: Duration) {
        if let Some(window) = self.windows.get_mut(node) {
            window.busy += elapsed;
            window.steps += 1;
        }
    }

    /// Metric events for the window ending at `now`, if it is complete.
    pub(crate) fn flush(&mut self, now: Instant) -> Vec<(Key, Payload)> {
        let Some(started) = self.started else {
            self.started = Some(now);
            for window in &mut self.windows {
                *window = Window::default();
            }
            return Vec::new();
        };
        let span = now.saturating_duration_since(started);
        if span < self.interval {
            return Vec::new();
        }

        let mut events = Vec::new();
        for ((id, period), window) in self.components.iter().zip(&mut self.windows) {
            let Window { busy, steps } = std::mem::take(window);
            if steps > 0 {
                events.push((
                    Key::from(DURATION_KEY),
                    Payload::new(StepDuration {
                        component: id.to_string(),
                        seconds: busy.as_secs_f64() / f64::from(steps),
                    }),
                ));
            }
            if let Some(period) = period {
                events.push((
                    Key::from(FPS_KEY),
                    Payload::new(Fps {
                        component: id.to_string(),
                        current: f64::from(steps) / span.as_secs_f64(),
                        target: 1.0 / period.as_secs_f64(),
                    }),
                ));
            }
        }
        self.started = Some(now);
        events
    }
}
