//! Graph construction and validation.
//!
//! All components are registered with a [`GraphBuilder`] before dispatch
//! starts. Registration validates each component's declaration and assigns
//! its identity; [`GraphBuilder::build`] binds every input field in the
//! router and freezes the graph. There is no registration at runtime.

use std::collections::{BTreeSet, HashMap, HashSet};

use conduit_component::{
    ComponentId, FieldError, InputField, Key, OutputField, Payload, Policy, Ports,
};
use tracing::{debug, info, warn};

use crate::component::{Component, ComponentKind};
use crate::error::ConstructionError;
use crate::router::Router;
use crate::scheduler::NodeSchedule;
use crate::snapshot::GraphSnapshot;

/// The live fields of one component.
#[derive(Debug)]
pub(crate) struct Fields {
    pub(crate) inputs: Vec<InputField>,
    pub(crate) outputs: Vec<OutputField>,
}

impl Fields {
    fn from_ports(ports: &Ports) -> Self {
        Self {
            inputs: ports
                .inputs()
                .iter()
                .map(|(name, spec)| InputField::new(name.clone(), spec.clone()))
                .collect(),
            outputs: ports
                .outputs()
                .iter()
                .map(|(name, key)| OutputField::new(name.clone(), key.clone()))
                .collect(),
        }
    }

    pub(crate) fn input(&self, name: &str) -> Result<&InputField, FieldError> {
        self.inputs
            .iter()
            .find(|f| f.name() == name)
            .ok_or_else(|| FieldError::UnknownInput(name.to_string()))
    }

    pub(crate) fn input_mut(&mut self, name: &str) -> Result<&mut InputField, FieldError> {
        self.inputs
            .iter_mut()
            .find(|f| f.name() == name)
            .ok_or_else(|| FieldError::UnknownInput(name.to_string()))
    }

    pub(crate) fn output_mut(&mut self, name: &str) -> Result<&mut OutputField, FieldError> {
        self.outputs
            .iter_mut()
            .find(|f| f.name() == name)
            .ok_or_else(|| FieldError::UnknownOutput(name.to_string()))
    }

    pub(crate) fn switch_all(&mut self) {
        for field in &mut self.inputs {
            field.switch();
        }
    }

    pub(crate) fn drain_all(&mut self) {
        for field in &mut self.inputs {
            field.drain();
        }
    }

    /// Everything pushed to the outputs since the last call.
    pub(crate) fn take_outputs(&mut self) -> Vec<(Key, Payload)> {
        let mut emitted = Vec::new();
        for field in &mut self.outputs {
            let key = field.key().clone();
            emitted.extend(field.take().into_iter().map(|p| (key.clone(), p)));
        }
        emitted
    }
}

/// A registered component with its fields and scheduling state.
pub(crate) struct Node {
    pub(crate) id: ComponentId,
    pub(crate) kind: ComponentKind,
    pub(crate) component: Box<dyn Component>,
    pub(crate) fields: Fields,
    pub(crate) sub_components: Vec<String>,
    pub(crate) schedule: NodeSchedule,
}

/// Collects and validates components.
///
/// # Examples
///
/// ```rust
/// # use conduit_component::{InputSpec, Ports};
/// # use conduit_runtime::{Component, ComponentKind, Context, GraphBuilder};
/// # struct Sink;
/// # impl Component for Sink {
/// #     fn kind(&self) -> ComponentKind { ComponentKind::EventDriven }
/// #     fn ports(&self) -> Ports { Ports::new().input("x", InputSpec::buffer("x").trigger()) }
/// #     fn process(&mut self, _ctx: &mut Context<'_>) -> anyhow::Result<()> { Ok(()) }
/// # }
/// let mut builder = GraphBuilder::new();
/// let first = builder.add(Sink).unwrap();
/// let second = builder.add(Sink).unwrap();
/// assert_eq!(first.as_str(), "Sink0");
/// assert_eq!(second.as_str(), "Sink1");
/// let graph = builder.build();
/// assert_eq!(graph.len(), 2);
/// ```
#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<Node>,
    ids: HashSet<ComponentId>,
    counters: HashMap<String, usize>,
}

impl GraphBuilder {
    /// An empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component under a generated id: its
    /// [`name`](Component::name) followed by a per-name counter.
    ///
    /// # Errors
    ///
    /// Returns [`ConstructionError`] if the declaration is invalid.
    pub fn add<C: Component>(&mut self, component: C) -> Result<ComponentId, ConstructionError> {
        self.add_boxed(Box::new(component))
    }

    /// Register an already boxed component under a generated id.
    ///
    /// # Errors
    ///
    /// Returns [`ConstructionError`] if the declaration is invalid.
    pub fn add_boxed(
        &mut self,
        component: Box<dyn Component>,
    ) -> Result<ComponentId, ConstructionError> {
        let base = component.name().into_owned();
        let counter = self.counters.entry(base.clone()).or_insert(0);
        let id = loop {
            let candidate = ComponentId::numbered(&base, *counter);
            *counter += 1;
            if !self.ids.contains(&candidate) {
                break candidate;
            }
        };
        self.insert(id, component)
    }

    /// Register a component under an explicit id.
    ///
    /// # Errors
    ///
    /// Returns [`ConstructionError::DuplicateId`] if the id is taken, or
    /// another [`ConstructionError`] if the declaration is invalid.
    pub fn add_with_id<C: Component>(
        &mut self,
        id: impl AsRef<str>,
        component: C,
    ) -> Result<ComponentId, ConstructionError> {
        let id = ComponentId::new(id);
        if self.ids.contains(&id) {
            return Err(ConstructionError::DuplicateId(id.to_string()));
        }
        self.insert(id, Box::new(component))
    }

    fn insert(
        &mut self,
        id: ComponentId,
        component: Box<dyn Component>,
    ) -> Result<ComponentId, ConstructionError> {
        let kind = component.kind();
        let ports = component.ports();
        validate(&id, &kind, &ports)?;

        info!(
            component = %id,
            kind = kind.name(),
            inputs = ports.inputs().len(),
            outputs = ports.outputs().len(),
            "registered component"
        );
        self.ids.insert(id.clone());
        self.nodes.push(Node {
            id: id.clone(),
            kind,
            component,
            fields: Fields::from_ports(&ports),
            sub_components: ports.sub_components().to_vec(),
            schedule: NodeSchedule::default(),
        });
        Ok(id)
    }

    /// Bind all fields and freeze the graph.
    #[must_use]
    pub fn build(self) -> Graph {
        let router = Router::bind(&self.nodes);
        let graph = Graph {
            nodes: self.nodes,
            router,
        };

        let produced: BTreeSet<&Key> = graph
            .nodes
            .iter()
            .flat_map(|n| n.fields.outputs.iter().map(OutputField::key))
            .collect();
        for key in graph.router.keys() {
            if !key.is_internal() && !produced.contains(key) {
                warn!(key = %key, "no component produces this key");
            }
        }
        for key in produced {
            if graph.router.bound_fields(key.as_str()) == 0 {
                debug!(key = %key, "no component consumes this key");
            }
        }
        graph
    }
}

fn validate(id: &ComponentId, kind: &ComponentKind, ports: &Ports) -> Result<(), ConstructionError> {
    let component = || id.to_string();

    let mut names = HashSet::new();
    let declared = ports
        .inputs()
        .iter()
        .map(|(name, _)| name)
        .chain(ports.outputs().iter().map(|(name, _)| name));
    for name in declared {
        if !names.insert(name.as_str()) {
            return Err(ConstructionError::DuplicateField {
                component: component(),
                field: name.clone(),
            });
        }
    }

    for (name, spec) in ports.inputs() {
        if spec.keys().is_empty() {
            return Err(ConstructionError::NoKeys {
                component: component(),
                field: name.clone(),
            });
        }
        if spec.policy() == (Policy::History { capacity: 0 }) {
            return Err(ConstructionError::ZeroHistoryCapacity {
                component: component(),
                field: name.clone(),
            });
        }
        if spec.policy() == (Policy::Queue { max_len: Some(0) }) {
            return Err(ConstructionError::ZeroQueueLength {
                component: component(),
                field: name.clone(),
            });
        }
    }

    match kind {
        ComponentKind::Iterating { period } => {
            if period.is_zero() {
                return Err(ConstructionError::ZeroPeriod(component()));
            }
            if let Some((name, _)) = ports.inputs().iter().find(|(_, s)| s.is_trigger()) {
                return Err(ConstructionError::TriggerOnIterating {
                    component: component(),
                    field: name.clone(),
                });
            }
        }
        ComponentKind::EventDriven => {
            if !ports.has_trigger() {
                return Err(ConstructionError::MissingTrigger(component()));
            }
        }
        ComponentKind::Bare => {
            if let Some((name, spec)) = ports
                .inputs()
                .iter()
                .find(|(_, s)| s.policy().is_double_buffered())
            {
                return Err(ConstructionError::BufferedFieldOnBare {
                    component: component(),
                    field: name.clone(),
                    policy: spec.policy().name(),
                });
            }
        }
    }
    Ok(())
}

/// A validated, frozen component graph.
pub struct Graph {
    pub(crate) nodes: Vec<Node>,
    pub(crate) router: Router,
}

impl Graph {
    /// Number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if no component is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Component ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &ComponentId> {
        self.nodes.iter().map(|n| &n.id)
    }

    /// Returns `true` if a component with this id is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index_of(id).is_some()
    }

    /// The scheduling variant of a component.
    #[must_use]
    pub fn kind(&self, id: &str) -> Option<ComponentKind> {
        self.index_of(id).map(|idx| self.nodes[idx].kind)
    }

    /// The key bindings of the graph.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// A serialisable description of components and their links.
    #[must_use]
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot::capture(&self.nodes)
    }

    pub(crate) fn index_of(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id.as_str() == id)
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("components", &self.ids().collect::<Vec<_>>())
            .field("router", &self.router)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use conduit_component::InputSpec;

    use super::*;
    use crate::context::Context;

    struct Declared {
        kind: ComponentKind,
        ports: Ports,
    }

    impl Declared {
        fn new(kind: ComponentKind, ports: Ports) -> Self {
            Self { kind, ports }
        }
    }

    impl Component for Declared {
        fn kind(&self) -> ComponentKind {
            self.kind
        }

        fn ports(&self) -> Ports {
            self.ports.clone()
        }

        fn process(&mut self, _ctx: &mut Context<'_>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct FlipFilter;

    impl Component for FlipFilter {
        fn kind(&self) -> ComponentKind {
            ComponentKind::EventDriven
        }

        fn ports(&self) -> Ports {
            Ports::new()
                .input("frame", InputSpec::latest("source").trigger())
                .output("flipped", "flipped")
        }

        fn process(&mut self, _ctx: &mut Context<'_>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn add(kind: ComponentKind, ports: Ports) -> Result<ComponentId, ConstructionError> {
        GraphBuilder::new().add(Declared::new(kind, ports))
    }

    #[test]
    fn test_generated_ids_count_per_name() {
        let mut builder = GraphBuilder::new();
        assert_eq!(builder.add(FlipFilter).unwrap().as_str(), "FlipFilter0");
        assert_eq!(builder.add(FlipFilter).unwrap().as_str(), "FlipFilter1");
        let graph = builder.build();
        assert!(graph.contains("FlipFilter1"));
        assert_eq!(graph.kind("FlipFilter0"), Some(ComponentKind::EventDriven));
    }

    #[test]
    fn test_generated_ids_skip_explicit_ones() {
        let mut builder = GraphBuilder::new();
        builder.add_with_id("FlipFilter0", FlipFilter).unwrap();
        assert_eq!(builder.add(FlipFilter).unwrap().as_str(), "FlipFilter1");
    }

    #[test]
    fn test_duplicate_explicit_id() {
        let mut builder = GraphBuilder::new();
        builder.add_with_id("flip", FlipFilter).unwrap();
        assert!(matches!(
            builder.add_with_id("flip", FlipFilter),
            Err(ConstructionError::DuplicateId(id)) if id == "flip"
        ));
    }

    #[test]
    fn test_duplicate_field_name() {
        let ports = Ports::new()
            .input("x", InputSpec::latest("a").trigger())
            .output("x", "b");
        assert!(matches!(
            add(ComponentKind::EventDriven, ports),
            Err(ConstructionError::DuplicateField { field, .. }) if field == "x"
        ));
    }

    #[test]
    fn test_zero_history_capacity() {
        let ports = Ports::new().input("h", InputSpec::history("a", 0).trigger());
        assert!(matches!(
            add(ComponentKind::EventDriven, ports),
            Err(ConstructionError::ZeroHistoryCapacity { .. })
        ));
    }

    #[test]
    fn test_zero_queue_length() {
        let ports = Ports::new().input("q", InputSpec::queue("a").with_max_len(0).trigger());
        assert!(matches!(
            add(ComponentKind::Bare, ports),
            Err(ConstructionError::ZeroQueueLength { field, .. }) if field == "q"
        ));
    }

    #[test]
    fn test_iterating_rules() {
        let zero = add(ComponentKind::iterating(Duration::ZERO), Ports::new());
        assert!(matches!(zero, Err(ConstructionError::ZeroPeriod(_))));

        let ports = Ports::new().input("x", InputSpec::latest("x").trigger());
        assert!(matches!(
            add(ComponentKind::iterating(Duration::from_millis(10)), ports),
            Err(ConstructionError::TriggerOnIterating { .. })
        ));

        let ports = Ports::new().input("x", InputSpec::latest("x"));
        assert!(add(ComponentKind::iterating(Duration::from_millis(10)), ports).is_ok());
    }

    #[test]
    fn test_event_driven_needs_trigger() {
        let ports = Ports::new().input("x", InputSpec::latest("x"));
        assert!(matches!(
            add(ComponentKind::EventDriven, ports),
            Err(ConstructionError::MissingTrigger(_))
        ));
    }

    #[test]
    fn test_bare_accepts_only_queues() {
        let ports = Ports::new().input("x", InputSpec::buffer("x"));
        assert!(matches!(
            add(ComponentKind::Bare, ports),
            Err(ConstructionError::BufferedFieldOnBare { policy: "Buffer", .. })
        ));

        let ports = Ports::new().input("x", InputSpec::queue("x").trigger());
        assert!(add(ComponentKind::Bare, ports).is_ok());
    }

    #[test]
    fn test_fields_lookup() {
        let ports = Ports::new()
            .input("x", InputSpec::latest("x"))
            .output("y", "y");
        let mut fields = Fields::from_ports(&ports);
        assert!(fields.input("x").is_ok());
        assert!(matches!(fields.input("y"), Err(FieldError::UnknownInput(_))));
        fields.output_mut("y").unwrap().push(1_u8);
        fields.output_mut("y").unwrap().push(2_u8);
        let emitted = fields.take_outputs();
        assert_eq!(emitted.len(), 2);
        assert_eq!(emitted[1].1.downcast_ref::<u8>(), Some(&2));
        assert!(fields.take_outputs().is_empty());
    }
}
