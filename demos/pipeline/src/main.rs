//! Runs the demo pipeline.
//!
//! Component and runtime options are passed as `-o name=value` pairs; run
//! with `--describe` to list them, or `--graph` to print the graph as JSON.

use anyhow::{Context as _, Result, bail};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use conduit_demo::{Heartbeat, Increment, Printer, SlowSquare, Ticker};
use conduit_runtime::{
    ConfigDescriptor, Configurable, GraphBuilder, ParsedOptions, RuntimeConfig, Scheduler,
};

#[derive(Debug, Parser)]
#[command(name = "conduit_demo", about = "Counting pipeline on the conduit runtime")]
struct Args {
    /// Option as `name=value`; may be repeated.
    #[arg(short = 'o', long = "option", value_name = "NAME=VALUE")]
    options: Vec<String>,

    /// Print the component graph as JSON and exit.
    #[arg(long)]
    graph: bool,

    /// List all accepted options and exit.
    #[arg(long)]
    describe: bool,
}

fn descriptors() -> Vec<ConfigDescriptor> {
    vec![
        RuntimeConfig::descriptor(),
        Ticker::descriptor(),
        SlowSquare::descriptor(),
        Heartbeat::descriptor(),
    ]
}

fn parse_options(raw: &[String]) -> Result<ParsedOptions> {
    let mut pairs = Vec::with_capacity(raw.len());
    for item in raw {
        let Some((name, value)) = item.split_once('=') else {
            bail!("option `{item}` is not of the form name=value");
        };
        pairs.push((name.trim().to_string(), value.trim().to_string()));
    }
    let known = descriptors();
    for (name, _) in &pairs {
        if !known.iter().any(|d| d.get(name).is_some()) {
            warn!(option = %name, "unknown option ignored");
        }
    }
    Ok(known
        .iter()
        .filter(|d| d.component != "runtime")
        .fold(ParsedOptions::from_pairs(pairs), |options, d| {
            options.with_defaults(d)
        }))
}

fn build_graph(options: &ParsedOptions) -> Result<GraphBuilder> {
    let mut builder = GraphBuilder::new();
    builder.add(Ticker::new(Ticker::configure(options)?))?;
    builder.add(Increment)?;
    builder.add(SlowSquare::new(SlowSquare::configure(options)?))?;
    builder.add(Printer)?;
    builder.add(Heartbeat::new(Heartbeat::configure(options)?))?;
    Ok(builder)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("conduit_demo=info".parse()?)
                .add_directive("conduit_runtime=info".parse()?),
        )
        .init();

    let args = Args::parse();

    if args.describe {
        for descriptor in descriptors() {
            println!("{}:", descriptor.component);
            for option in &descriptor.options {
                let default = option
                    .default
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "required".to_string());
                println!("  {:<22} {} (default: {default})", option.name, option.help);
            }
        }
        return Ok(());
    }

    let options = parse_options(&args.options)?;
    let graph = build_graph(&options)?.build();

    if args.graph {
        println!("{}", graph.snapshot().to_json()?);
        return Ok(());
    }

    let config = RuntimeConfig::from_env()?.apply(&options)?;
    let grace = config.shutdown_grace;
    let scheduler = Scheduler::new(graph, config);
    let handle = scheduler.handle();
    info!(run_id = %scheduler.run_id(), "pipeline starting");

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    let report = runtime.block_on(async move {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received");
                handle.shutdown();
            }
        });
        scheduler.run().await
    });
    // Abandoned offloaded calls must not keep the process alive.
    runtime.shutdown_timeout(grace);

    for (component, steps) in &report.invocations {
        info!(%component, steps, "component summary");
    }
    if let Some(timeout) = &report.shutdown_timeout {
        warn!("{timeout}");
    }
    if report.has_error_occurred() {
        bail!(
            "{} component failure(s), first: {}",
            report.processing_errors.len(),
            report.processing_errors[0]
        );
    }
    info!(cycles = report.cycles, "pipeline finished");
    Ok(())
}
