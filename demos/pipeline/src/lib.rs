//! Demo components for a small counting pipeline.
//!
//! ```text
//! Ticker --tick--> Increment --incremented--> SlowSquare --squared--> Printer
//!                                                            \--> Heartbeat
//! ```
//!
//! Each configurable component implements [`Configurable`] so the binary can
//! build it from generic command-line options.

use std::time::Duration;

use conduit_component::metric::{DURATION_KEY, FPS_KEY, Fps, StepDuration};
use conduit_component::{InputSpec, Ports};
use conduit_runtime::{
    Component, ComponentKind, ConfigDescriptor, ConfigError, Configurable, Context, Offloaded,
    OptionSpec, ParsedOptions,
};
use tracing::info;

/// Key of the ticker's counter.
pub const TICK_KEY: &str = "tick";
/// Key of incremented counters.
pub const INCREMENTED_KEY: &str = "incremented";
/// Key of squared values.
pub const SQUARED_KEY: &str = "squared";

/// Ticker configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TickerConfig {
    /// Ticks per second.
    pub rate_hz: f64,
    /// Shut the runtime down after this many ticks (0 = never).
    pub max_ticks: u64,
}

/// Emits an increasing counter at a fixed rate.
#[derive(Debug)]
pub struct Ticker {
    config: TickerConfig,
    count: u64,
}

impl Ticker {
    /// Create a ticker.
    #[must_use]
    pub fn new(config: TickerConfig) -> Self {
        Self { config, count: 0 }
    }
}

impl Configurable for Ticker {
    type Config = TickerConfig;

    fn descriptor() -> ConfigDescriptor {
        ConfigDescriptor::new("Ticker")
            .option(OptionSpec::new("rate_hz", "ticks per second").with_default(10.0))
            .option(OptionSpec::new("max_ticks", "stop after this many ticks, 0 runs forever").with_default(50))
    }

    fn configure(options: &ParsedOptions) -> Result<TickerConfig, ConfigError> {
        let rate_hz: f64 = options.require("rate_hz")?;
        if !(rate_hz.is_finite() && rate_hz > 0.0) {
            return Err(ConfigError::Invalid {
                option: "rate_hz".to_string(),
                reason: format!("must be a positive rate, got {rate_hz}"),
            });
        }
        Ok(TickerConfig {
            rate_hz,
            max_ticks: options.require("max_ticks")?,
        })
    }
}

impl Component for Ticker {
    fn kind(&self) -> ComponentKind {
        ComponentKind::at_rate(self.config.rate_hz)
    }

    fn ports(&self) -> Ports {
        Ports::new().output("tick", TICK_KEY)
    }

    fn process(&mut self, ctx: &mut Context<'_>) -> anyhow::Result<()> {
        self.count += 1;
        ctx.emit("tick", self.count)?;
        if self.config.max_ticks > 0 && self.count >= self.config.max_ticks {
            info!(ticks = self.count, "tick limit reached");
            ctx.shutdown();
        }
        Ok(())
    }
}

/// Adds one to every tick.
#[derive(Debug, Default)]
pub struct Increment;

impl Component for Increment {
    fn kind(&self) -> ComponentKind {
        ComponentKind::EventDriven
    }

    fn ports(&self) -> Ports {
        Ports::new()
            .input("tick", InputSpec::latest(TICK_KEY).trigger())
            .output("incremented", INCREMENTED_KEY)
    }

    fn process(&mut self, ctx: &mut Context<'_>) -> anyhow::Result<()> {
        if let Some(tick) = ctx.latest::<u64>("tick")?.copied() {
            ctx.emit("incremented", tick + 1)?;
        }
        Ok(())
    }
}

/// Squares values on the blocking pool, pretending the work is expensive.
#[derive(Debug)]
pub struct SlowSquare {
    delay: Duration,
}

impl SlowSquare {
    /// Create a squarer whose every call blocks for `delay`.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Configurable for SlowSquare {
    type Config = Duration;

    fn descriptor() -> ConfigDescriptor {
        ConfigDescriptor::new("SlowSquare")
            .option(OptionSpec::new("square_delay_ms", "blocking time per square").with_default(150))
    }

    fn configure(options: &ParsedOptions) -> Result<Duration, ConfigError> {
        Ok(Duration::from_millis(options.require("square_delay_ms")?))
    }
}

impl Component for SlowSquare {
    fn kind(&self) -> ComponentKind {
        ComponentKind::EventDriven
    }

    fn ports(&self) -> Ports {
        Ports::new()
            .input("values", InputSpec::buffer(INCREMENTED_KEY).trigger())
            .output("squared", SQUARED_KEY)
    }

    fn process(&mut self, ctx: &mut Context<'_>) -> anyhow::Result<()> {
        // Values arriving while a call is out are batched into the next step.
        let values: Vec<u64> = ctx.values::<u64>("values")?.into_iter().copied().collect();
        let delay = self.delay;
        ctx.offload(move || {
            std::thread::sleep(delay);
            Ok(values.into_iter().map(|v| v * v).collect::<Vec<u64>>())
        });
        Ok(())
    }

    fn resume(&mut self, ctx: &mut Context<'_>, offloaded: Offloaded) -> anyhow::Result<()> {
        for square in offloaded.into_result::<Vec<u64>>()? {
            ctx.emit("squared", square)?;
        }
        Ok(())
    }
}

/// Logs results and runtime metrics.
#[derive(Debug, Default)]
pub struct Printer;

impl Component for Printer {
    fn kind(&self) -> ComponentKind {
        ComponentKind::EventDriven
    }

    fn ports(&self) -> Ports {
        Ports::new()
            .input("squared", InputSpec::buffer(SQUARED_KEY).trigger())
            .input("fps", InputSpec::buffer(FPS_KEY))
            .input("durations", InputSpec::buffer(DURATION_KEY))
    }

    fn process(&mut self, ctx: &mut Context<'_>) -> anyhow::Result<()> {
        for square in ctx.values::<u64>("squared")? {
            info!(square, "result");
        }
        for fps in ctx.values::<Fps>("fps")? {
            info!(component = %fps.component, current = fps.current, target = fps.target, "fps");
        }
        for duration in ctx.values::<StepDuration>("durations")? {
            info!(
                component = %duration.component,
                millis = duration.seconds * 1000.0,
                "step duration"
            );
        }
        Ok(())
    }
}

/// Periodically reports how many results arrived since its last wake-up.
#[derive(Debug)]
pub struct Heartbeat {
    interval: Duration,
    beats: u64,
}

impl Heartbeat {
    /// Create a heartbeat firing every `interval`.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self { interval, beats: 0 }
    }
}

impl Configurable for Heartbeat {
    type Config = Duration;

    fn descriptor() -> ConfigDescriptor {
        ConfigDescriptor::new("Heartbeat")
            .option(OptionSpec::new("heartbeat_ms", "heartbeat interval").with_default(1000))
    }

    fn configure(options: &ParsedOptions) -> Result<Duration, ConfigError> {
        Ok(Duration::from_millis(options.require("heartbeat_ms")?))
    }
}

impl Component for Heartbeat {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Bare
    }

    fn ports(&self) -> Ports {
        Ports::new().input("results", InputSpec::queue(SQUARED_KEY).with_max_len(1024))
    }

    fn setup(&mut self, ctx: &mut Context<'_>) -> anyhow::Result<()> {
        ctx.wake_after(self.interval);
        Ok(())
    }

    fn process(&mut self, ctx: &mut Context<'_>) -> anyhow::Result<()> {
        self.beats += 1;
        let results = ctx.take_all("results")?;
        info!(beat = self.beats, results = results.len(), "heartbeat");
        ctx.wake_after(self.interval);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use conduit_runtime::{GraphBuilder, ManualClock, RuntimeConfig, Scheduler};

    use super::*;

    fn options() -> ParsedOptions {
        ParsedOptions::new()
            .with_defaults(&Ticker::descriptor())
            .with_defaults(&SlowSquare::descriptor())
            .with_defaults(&Heartbeat::descriptor())
    }

    #[test]
    fn test_defaults_configure() {
        let options = options();
        let ticker = Ticker::configure(&options).unwrap();
        assert_eq!(ticker.max_ticks, 50);
        assert_eq!(SlowSquare::configure(&options).unwrap(), Duration::from_millis(150));
        assert_eq!(Heartbeat::configure(&options).unwrap(), Duration::from_secs(1));
    }

    #[test]
    fn test_rejects_bad_rate() {
        let options = ParsedOptions::new().with("rate_hz", -1.0).with_defaults(&Ticker::descriptor());
        assert!(matches!(
            Ticker::configure(&options),
            Err(ConfigError::Invalid { option, .. }) if option == "rate_hz"
        ));
    }

    #[test]
    fn test_ticker_and_increment() {
        let clock = Arc::new(ManualClock::new());
        let mut builder = GraphBuilder::new();
        builder
            .add(Ticker::new(TickerConfig {
                rate_hz: 10.0,
                max_ticks: 2,
            }))
            .unwrap();
        builder.add(Increment).unwrap();
        let config = RuntimeConfig::default().with_metrics_interval(None);
        let mut scheduler = Scheduler::with_clock(builder.build(), config, clock.clone());

        scheduler.run_cycle();
        clock.advance(Duration::from_millis(100));
        scheduler.run_cycle();
        scheduler.settle(5);

        assert_eq!(scheduler.invocations("Ticker0"), Some(2));
        assert_eq!(scheduler.invocations("Increment0"), Some(2));
        assert!(scheduler.is_stopping());
    }

    #[test]
    fn test_pipeline_graph_is_fully_connected() {
        let mut builder = GraphBuilder::new();
        builder
            .add(Ticker::new(TickerConfig {
                rate_hz: 10.0,
                max_ticks: 0,
            }))
            .unwrap();
        builder.add(Increment).unwrap();
        builder.add(SlowSquare::new(Duration::ZERO)).unwrap();
        builder.add(Printer).unwrap();
        builder.add(Heartbeat::new(Duration::from_secs(1))).unwrap();
        let snapshot = builder.build().snapshot();

        assert!(snapshot.unproduced_keys.is_empty());
        assert_eq!(snapshot.edges.len(), 4);
    }
}
