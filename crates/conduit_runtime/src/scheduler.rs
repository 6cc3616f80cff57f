//! The dispatch loop.
//!
//! One [`Scheduler`] owns a [`Graph`] and is the only code that touches
//! component state. Each dispatch cycle:
//!
//! 1. Accepts completed offloaded calls and resumes their components.
//! 2. Routes events published through [`RuntimeHandle`]s and handles
//!    shutdown requests.
//! 3. Decides which components are due, once, from the state at this point.
//! 4. Invokes each due component exactly once.
//! 5. Routes everything the hooks emitted, in emission order. Components
//!    triggered by these events are due in the next cycle.
//! 6. Publishes metrics when a metric window has closed.
//!
//! [`Scheduler::run_cycle`] performs a single cycle synchronously, which is
//! how tests drive the graph step by step. [`Scheduler::run`] loops until
//! shutdown is requested, sleeping on the next timer, inbound message or
//! offload completion whenever a cycle did no work, then performs the
//! shutdown sequence.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use conduit_component::{ComponentId, Key, Payload};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::component::{Component, ComponentKind};
use crate::config::{ErrorPolicy, RuntimeConfig};
use crate::context::{Context, Effects};
use crate::error::{Phase, ProcessingError, ShutdownTimeout};
use crate::graph::Graph;
use crate::handle::{Inbound, RuntimeHandle};
use crate::metrics::MetricsRecorder;
use crate::offload::{Completion, OffloadBridge, panic_message};

/// Why a component is being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepKind {
    Setup,
    Tick,
    Trigger,
    Wake,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ActiveStep {
    started: Instant,
    kind: StepKind,
}

/// Scheduling state of one component.
#[derive(Debug, Default)]
pub(crate) struct NodeSchedule {
    /// Next tick of an iterating component, wake timer of a bare one.
    pub(crate) next_due: Option<Instant>,
    /// A trigger field received events since the last invocation.
    pub(crate) triggered: bool,
    /// Offloaded calls of the current step not yet resumed.
    pub(crate) outstanding: usize,
    /// The open step, from invocation until its last resume returns.
    pub(crate) active: Option<ActiveStep>,
    pub(crate) invocations: u64,
    pub(crate) errors: u64,
}

impl NodeSchedule {
    /// The single due-ness decision for every component kind.
    fn due(&self, kind: &ComponentKind, now: Instant, stopping: bool) -> Option<StepKind> {
        if self.active.is_some() {
            return None;
        }
        match kind {
            ComponentKind::Iterating { .. } => {
                (!stopping && self.next_due.is_some_and(|t| t <= now)).then_some(StepKind::Tick)
            }
            ComponentKind::EventDriven => self.triggered.then_some(StepKind::Trigger),
            ComponentKind::Bare => {
                if self.triggered {
                    Some(StepKind::Trigger)
                } else if self.next_due.is_some_and(|t| t <= now) {
                    Some(StepKind::Wake)
                } else {
                    None
                }
            }
        }
    }
}

/// What happened during one dispatch cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Cycle number, starting at 1.
    pub cycle: u64,
    /// Components invoked, in invocation order.
    pub invoked: Vec<ComponentId>,
    /// Offloaded calls resumed.
    pub resumed: usize,
    /// Events routed, including dropped ones.
    pub published: usize,
    /// Hook failures.
    pub errors: Vec<ProcessingError>,
}

impl CycleReport {
    /// Returns `true` if the cycle did nothing at all.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.invoked.is_empty() && self.resumed == 0 && self.published == 0 && self.errors.is_empty()
    }
}

/// Summary of a finished [`Scheduler::run`].
#[derive(Debug)]
pub struct RunReport {
    /// Id of the run, as logged.
    pub run_id: Uuid,
    /// Dispatch cycles performed.
    pub cycles: u64,
    /// Processing steps per component.
    pub invocations: BTreeMap<String, u64>,
    /// Every hook failure, in order of occurrence.
    pub processing_errors: Vec<ProcessingError>,
    /// Offloaded calls abandoned at shutdown, if any.
    pub shutdown_timeout: Option<ShutdownTimeout>,
}

impl RunReport {
    /// Returns `true` if any hook failed during the run.
    #[must_use]
    pub fn has_error_occurred(&self) -> bool {
        !self.processing_errors.is_empty()
    }
}

enum Wakeup {
    Inbound(Inbound),
    Completion(Completion),
    Timer,
}

/// Drives a [`Graph`].
pub struct Scheduler {
    run_id: Uuid,
    graph: Graph,
    config: RuntimeConfig,
    clock: Arc<dyn Clock>,
    bridge: OffloadBridge,
    completions: mpsc::UnboundedReceiver<Completion>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    handle: RuntimeHandle,
    metrics: Option<MetricsRecorder>,
    stashed_inbound: Vec<Inbound>,
    stashed_completions: Vec<Completion>,
    outbox: Vec<(ComponentId, Key, Payload)>,
    cycle: u64,
    started: bool,
    stopping: bool,
    error_occurred: bool,
}

impl Scheduler {
    /// A scheduler on the system clock.
    #[must_use]
    pub fn new(graph: Graph, config: RuntimeConfig) -> Self {
        Self::with_clock(graph, config, Arc::new(SystemClock))
    }

    /// A scheduler on a custom clock.
    #[must_use]
    pub fn with_clock(graph: Graph, config: RuntimeConfig, clock: Arc<dyn Clock>) -> Self {
        let (completion_tx, completions) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let metrics = config.metrics_interval.map(|interval| {
            let components = graph
                .nodes
                .iter()
                .map(|n| (n.id.clone(), n.kind.period()))
                .collect();
            MetricsRecorder::new(interval, components)
        });
        Self {
            run_id: Uuid::new_v4(),
            graph,
            config,
            clock,
            bridge: OffloadBridge::new(completion_tx),
            completions,
            inbound,
            handle: RuntimeHandle::new(inbound_tx),
            metrics,
            stashed_inbound: Vec::new(),
            stashed_completions: Vec::new(),
            outbox: Vec::new(),
            cycle: 0,
            started: false,
            stopping: false,
            error_occurred: false,
        }
    }

    /// Id of this runtime instance.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// A handle for publishing and requesting shutdown from anywhere.
    #[must_use]
    pub fn handle(&self) -> RuntimeHandle {
        self.handle.clone()
    }

    /// The driven graph.
    #[must_use]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Dispatch cycles performed so far.
    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Processing steps performed by a component, setup excluded.
    #[must_use]
    pub fn invocations(&self, id: &str) -> Option<u64> {
        self.graph
            .index_of(id)
            .map(|idx| self.graph.nodes[idx].schedule.invocations)
    }

    /// Hook failures of a component.
    #[must_use]
    pub fn errors(&self, id: &str) -> Option<u64> {
        self.graph
            .index_of(id)
            .map(|idx| self.graph.nodes[idx].schedule.errors)
    }

    /// Returns `true` once shutdown has been requested.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    /// Returns `true` if any hook has failed.
    #[must_use]
    pub fn has_error_occurred(&self) -> bool {
        self.error_occurred
    }

    /// Offloaded calls issued and not yet resumed.
    #[must_use]
    pub fn offloads_in_flight(&self) -> usize {
        self.bridge.in_flight()
    }

    /// Publish an event from outside the graph, routing it immediately.
    pub fn publish<T: Any + Send + Sync>(&mut self, key: impl Into<Key>, value: T) {
        self.graph
            .router
            .publish(&mut self.graph.nodes, key.into(), Payload::new(value), None);
    }

    /// Ask for shutdown. Iterating components stop being scheduled at once.
    pub fn request_shutdown(&mut self) {
        if !self.stopping {
            info!(run_id = %self.run_id, cycle = self.cycle, "shutdown requested");
            self.stopping = true;
        }
    }

    /// Run every component's setup hook. Idempotent; called by the first
    /// cycle if not called explicitly.
    pub fn start(&mut self) -> Vec<ProcessingError> {
        if self.started {
            return Vec::new();
        }
        self.started = true;
        info!(
            run_id = %self.run_id,
            components = self.graph.len(),
            "starting components"
        );

        let mut report = CycleReport::default();
        for idx in 0..self.graph.nodes.len() {
            let now = self.clock.now();
            self.graph.nodes[idx].schedule.active = Some(ActiveStep {
                started: now,
                kind: StepKind::Setup,
            });
            self.run_phase(idx, Phase::Setup, &mut report, |c, ctx| c.setup(ctx));
            self.finish_if_settled(idx);
        }
        self.route_outbox(&mut report);
        report.errors
    }

    /// Perform one dispatch cycle.
    pub fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        report.errors.extend(self.start());
        self.cycle += 1;
        report.cycle = self.cycle;

        self.accept_completions(&mut report);
        self.accept_inbound(&mut report);

        let now = self.clock.now();
        let due: Vec<(usize, StepKind)> = self
            .graph
            .nodes
            .iter()
            .enumerate()
            .filter_map(|(idx, n)| n.schedule.due(&n.kind, now, self.stopping).map(|s| (idx, s)))
            .collect();
        for (idx, step) in due {
            self.invoke(idx, step, &mut report);
        }

        self.route_outbox(&mut report);
        // Metric events alone do not count as activity.
        self.publish_metrics();
        report
    }

    /// Run cycles until one does nothing, at most `max_cycles`.
    ///
    /// Useful with a manual clock to let a burst of events propagate through
    /// the graph.
    pub fn settle(&mut self, max_cycles: usize) -> Vec<CycleReport> {
        let mut reports = Vec::new();
        for _ in 0..max_cycles {
            let report = self.run_cycle();
            let idle = report.is_idle();
            reports.push(report);
            if idle {
                break;
            }
        }
        reports
    }

    /// The earliest pending timer: iterating ticks and bare wake-ups.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.graph
            .nodes
            .iter()
            .filter(|n| n.schedule.active.is_none())
            .filter(|n| !(self.stopping && matches!(n.kind, ComponentKind::Iterating { .. })))
            .filter_map(|n| n.schedule.next_due)
            .min()
    }

    /// Dispatch until shutdown is requested, then shut down.
    ///
    /// Shutdown sequence: iterating components stop; pending events are
    /// drained through the remaining components until the graph has been
    /// quiet for the configured period or the drain timeout expires;
    /// outstanding offloaded calls get the grace period to complete, after
    /// which they are abandoned; finally every component's cleanup hook
    /// runs.
    pub async fn run(mut self) -> RunReport {
        info!(run_id = %self.run_id, components = self.graph.len(), "runtime started");
        let mut errors = self.start();

        while !self.stopping {
            let report = self.run_cycle();
            let idle = report.is_idle();
            errors.extend(report.errors);
            if idle {
                self.wait(None).await;
            } else {
                tokio::task::yield_now().await;
            }
        }

        self.drain(&mut errors).await;
        let shutdown_timeout = self.await_offloads(&mut errors).await;
        self.cleanup(&mut errors);

        let invocations = self
            .graph
            .nodes
            .iter()
            .map(|n| (n.id.to_string(), n.schedule.invocations))
            .collect();
        info!(
            run_id = %self.run_id,
            cycles = self.cycle,
            errors = errors.len(),
            "runtime stopped"
        );
        RunReport {
            run_id: self.run_id,
            cycles: self.cycle,
            invocations,
            processing_errors: errors,
            shutdown_timeout,
        }
    }

    async fn drain(&mut self, errors: &mut Vec<ProcessingError>) {
        info!(run_id = %self.run_id, "draining pending events");
        let deadline = self.clock.now() + self.config.drain_timeout;
        let mut quiet_since = self.clock.now();
        loop {
            let report = self.run_cycle();
            let idle = report.is_idle();
            errors.extend(report.errors);

            let now = self.clock.now();
            if !idle {
                quiet_since = now;
            }
            let quiet_until = quiet_since + self.config.drain_quiet_period;
            if now >= quiet_until {
                break;
            }
            if now >= deadline {
                warn!(
                    run_id = %self.run_id,
                    timeout = ?self.config.drain_timeout,
                    "drain timed out with events still flowing"
                );
                break;
            }
            if idle {
                self.wait(Some(quiet_until.min(deadline))).await;
            } else {
                tokio::task::yield_now().await;
            }
        }
    }

    async fn await_offloads(&mut self, errors: &mut Vec<ProcessingError>) -> Option<ShutdownTimeout> {
        let grace = self.config.shutdown_grace;
        let deadline = self.clock.now() + grace;
        while self.bridge.in_flight() > 0 {
            let remaining = deadline.saturating_duration_since(self.clock.now());
            if remaining.is_zero() {
                break;
            }
            info!(
                run_id = %self.run_id,
                in_flight = self.bridge.in_flight(),
                "waiting for offloaded calls"
            );
            match tokio::time::timeout(remaining, self.completions.recv()).await {
                Ok(Some(completion)) => {
                    self.stashed_completions.push(completion);
                    let report = self.run_cycle();
                    errors.extend(report.errors);
                }
                Ok(None) | Err(_) => break,
            }
        }

        let abandoned = self.bridge.in_flight();
        (abandoned > 0).then(|| {
            let timeout = ShutdownTimeout { abandoned, grace };
            warn!(run_id = %self.run_id, "{timeout}");
            timeout
        })
    }

    fn cleanup(&mut self, errors: &mut Vec<ProcessingError>) {
        info!(run_id = %self.run_id, "cleaning up components");
        let mut report = CycleReport::default();
        for idx in 0..self.graph.nodes.len() {
            self.run_phase(idx, Phase::Cleanup, &mut report, |c, ctx| c.cleanup(ctx));
        }
        self.route_outbox(&mut report);
        errors.extend(report.errors);
    }

    async fn wait(&mut self, limit: Option<Instant>) {
        let now = self.clock.now();
        let mut until = now + self.config.idle_poll;
        if let Some(deadline) = self.next_deadline() {
            until = until.min(deadline);
        }
        if let Some(limit) = limit {
            until = until.min(limit);
        }
        let sleep = until.saturating_duration_since(now);

        let wakeup = tokio::select! {
            Some(msg) = self.inbound.recv() => Wakeup::Inbound(msg),
            Some(completion) = self.completions.recv() => Wakeup::Completion(completion),
            () = tokio::time::sleep(sleep) => Wakeup::Timer,
        };
        // Stashed items are handled first by the next cycle.
        match wakeup {
            Wakeup::Inbound(msg) => self.stashed_inbound.push(msg),
            Wakeup::Completion(completion) => self.stashed_completions.push(completion),
            Wakeup::Timer => {}
        }
    }

    fn accept_completions(&mut self, report: &mut CycleReport) {
        let mut completions = std::mem::take(&mut self.stashed_completions);
        while let Ok(completion) = self.completions.try_recv() {
            completions.push(completion);
        }
        for completion in completions {
            self.resume(completion, report);
        }
    }

    fn accept_inbound(&mut self, report: &mut CycleReport) {
        let mut messages = std::mem::take(&mut self.stashed_inbound);
        while let Ok(msg) = self.inbound.try_recv() {
            messages.push(msg);
        }
        for msg in messages {
            match msg {
                Inbound::Event { key, payload } => {
                    self.graph
                        .router
                        .publish(&mut self.graph.nodes, key, payload, None);
                    report.published += 1;
                }
                Inbound::Shutdown => self.request_shutdown(),
            }
        }
    }

    fn invoke(&mut self, idx: usize, step: StepKind, report: &mut CycleReport) {
        let now = self.clock.now();
        let node = &mut self.graph.nodes[idx];
        node.schedule.active = Some(ActiveStep { started: now, kind: step });
        node.schedule.invocations += 1;
        node.schedule.triggered = false;
        if step == StepKind::Wake {
            node.schedule.next_due = None;
        }
        node.fields.switch_all();
        debug!(component = %node.id, ?step, "invoking component");
        report.invoked.push(node.id.clone());

        self.run_phase(idx, Phase::Process, report, |c, ctx| c.process(ctx));
        self.finish_if_settled(idx);
    }

    fn resume(&mut self, completion: Completion, report: &mut CycleReport) {
        self.bridge.completed();
        let Completion { node: idx, offloaded } = completion;
        let Some(node) = self.graph.nodes.get_mut(idx) else {
            return;
        };
        node.schedule.outstanding = node.schedule.outstanding.saturating_sub(1);
        if let Some(error) = offloaded.error() {
            debug!(component = %node.id, ticket = offloaded.ticket().get(), %error, "offloaded call failed");
        }
        report.resumed += 1;

        self.run_phase(idx, Phase::Resume, report, |c, ctx| c.resume(ctx, offloaded));
        self.finish_if_settled(idx);
    }

    /// Run one hook, then apply its effects and collect its output.
    ///
    /// A panic inside the hook is reported like a returned error.
    fn run_phase<F>(&mut self, idx: usize, phase: Phase, report: &mut CycleReport, hook: F)
    where
        F: FnOnce(&mut dyn Component, &mut Context<'_>) -> anyhow::Result<()>,
    {
        let now = self.clock.now();
        let mut effects = Effects::default();
        let node = &mut self.graph.nodes[idx];
        let result = {
            let mut ctx = Context::new(
                &node.id,
                idx,
                &mut node.fields,
                now,
                &mut effects,
                &mut self.bridge,
                &self.handle,
            );
            let component = node.component.as_mut();
            match panic::catch_unwind(AssertUnwindSafe(|| hook(component, &mut ctx))) {
                Ok(result) => result,
                Err(panic) => Err(anyhow::anyhow!("panicked: {}", panic_message(panic.as_ref()))),
            }
        };

        node.schedule.outstanding += effects.offloads;
        if let Some(at) = effects.wake_at {
            if node.kind == ComponentKind::Bare {
                node.schedule.next_due = Some(node.schedule.next_due.map_or(at, |t| t.min(at)));
            } else {
                debug!(component = %node.id, "wake request ignored for managed component");
            }
        }
        for (key, payload) in node.fields.take_outputs() {
            self.outbox.push((node.id.clone(), key, payload));
        }

        if let Err(error) = result {
            node.schedule.errors += 1;
            let failure = ProcessingError {
                component: node.id.clone(),
                phase,
                error,
            };
            error!(component = %failure.component, %phase, "{failure}");
            self.error_occurred = true;
            report.errors.push(failure);
            if self.config.error_policy == ErrorPolicy::Shutdown {
                self.request_shutdown();
            }
        }
        if effects.shutdown {
            self.request_shutdown();
        }
    }

    /// Close the open step of a component once no offloaded call is pending.
    fn finish_if_settled(&mut self, idx: usize) {
        let now = self.clock.now();
        let node = &mut self.graph.nodes[idx];
        if node.schedule.outstanding > 0 {
            return;
        }
        let Some(step) = node.schedule.active.take() else {
            return;
        };
        node.fields.drain_all();

        if let ComponentKind::Iterating { period } = node.kind {
            node.schedule.next_due = match step.kind {
                StepKind::Setup => Some(now),
                // Anchored on the step start; an overrun makes it due at once.
                _ => step.started.checked_add(period),
            };
        }
        if step.kind != StepKind::Setup {
            if let Some(metrics) = &mut self.metrics {
                metrics.record(idx, now.saturating_duration_since(step.started));
            }
        }
    }

    fn route_outbox(&mut self, report: &mut CycleReport) {
        for (source, key, payload) in std::mem::take(&mut self.outbox) {
            self.graph
                .router
                .publish(&mut self.graph.nodes, key, payload, Some(source));
            report.published += 1;
        }
    }

    fn publish_metrics(&mut self) {
        if self.stopping {
            return;
        }
        let Some(metrics) = &mut self.metrics else {
            return;
        };
        for (key, payload) in metrics.flush(self.clock.now()) {
            self.graph
                .router
                .publish(&mut self.graph.nodes, key, payload, None);
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("run_id", &self.run_id)
            .field("graph", &self.graph)
            .field("cycle", &self.cycle)
            .field("stopping", &self.stopping)
            .finish_non_exhaustive()
    }
}
