//! Key-based fan-out of events to input fields.

use std::collections::HashMap;

use conduit_component::{ComponentId, Event, Key, Payload};
use tracing::trace;

use crate::graph::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldAddr {
    node: usize,
    field: usize,
}

/// Maps each key to the input fields bound to it.
///
/// The binding table is fixed when the graph is built. Publishing stamps
/// the event with the next sequence number and hands a clone of it to every
/// bound field in registration order; the payload itself is shared. Events
/// on keys nobody listens to are counted and dropped.
#[derive(Debug, Default)]
pub struct Router {
    bindings: HashMap<Key, Vec<FieldAddr>>,
    next_sequence: u64,
    published: u64,
    dropped: u64,
}

impl Router {
    pub(crate) fn bind(nodes: &[Node]) -> Self {
        let mut bindings: HashMap<Key, Vec<FieldAddr>> = HashMap::new();
        for (node, n) in nodes.iter().enumerate() {
            for (field, input) in n.fields.inputs.iter().enumerate() {
                for key in input.spec().keys() {
                    let addrs = bindings.entry(key.clone()).or_default();
                    let addr = FieldAddr { node, field };
                    // A field bound twice to one key still receives each event once.
                    if !addrs.contains(&addr) {
                        addrs.push(addr);
                    }
                }
            }
        }
        Self {
            bindings,
            ..Self::default()
        }
    }

    /// Deliver one event; returns the number of fields it reached.
    ///
    /// A trigger delivery marks the owning component as triggered.
    pub(crate) fn publish(
        &mut self,
        nodes: &mut [Node],
        key: Key,
        payload: Payload,
        source: Option<ComponentId>,
    ) -> usize {
        self.next_sequence += 1;
        self.published += 1;

        let Some(addrs) = self.bindings.get(&key) else {
            self.dropped += 1;
            trace!(key = %key, "no field bound, event dropped");
            return 0;
        };

        let event = Event::new(key, payload, source, self.next_sequence);
        for addr in addrs {
            let node = &mut nodes[addr.node];
            if node.fields.inputs[addr.field].deliver(event.clone()) {
                node.schedule.triggered = true;
            }
        }
        addrs.len()
    }

    /// Number of input fields bound to `key`.
    #[must_use]
    pub fn bound_fields(&self, key: &str) -> usize {
        self.bindings.get(key).map_or(0, Vec::len)
    }

    /// Every key at least one field is bound to.
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.bindings.keys()
    }

    /// Events published so far, including dropped ones.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Events published on keys without bound fields.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use conduit_component::{InputSpec, Ports};

    use super::*;
    use crate::component::{Component, ComponentKind};
    use crate::context::Context;
    use crate::graph::GraphBuilder;

    struct Listener(Ports);

    impl Component for Listener {
        fn kind(&self) -> ComponentKind {
            ComponentKind::EventDriven
        }

        fn ports(&self) -> Ports {
            self.0.clone()
        }

        fn process(&mut self, _ctx: &mut Context<'_>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn values(node: &Node, field: usize) -> Vec<u32> {
        node.fields.inputs[field]
            .events()
            .iter()
            .filter_map(|e| e.value::<u32>().copied())
            .collect()
    }

    #[test]
    fn test_fan_out_in_emission_order() {
        let mut builder = GraphBuilder::new();
        for _ in 0..2 {
            builder
                .add(Listener(
                    Ports::new().input("x", InputSpec::buffer("x").trigger()),
                ))
                .unwrap();
        }
        let mut graph = builder.build();
        assert_eq!(graph.router.bound_fields("x"), 2);

        for value in 1..=3_u32 {
            let reached = graph
                .router
                .publish(&mut graph.nodes, Key::from("x"), Payload::new(value), None);
            assert_eq!(reached, 2);
        }
        for node in &mut graph.nodes {
            assert!(node.schedule.triggered);
            node.fields.switch_all();
            assert_eq!(values(node, 0), [1, 2, 3]);
        }
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let mut builder = GraphBuilder::new();
        builder
            .add(Listener(
                Ports::new().input("h", InputSpec::history("k", 4).trigger()),
            ))
            .unwrap();
        let mut graph = builder.build();
        for value in 0..4_u32 {
            graph
                .router
                .publish(&mut graph.nodes, Key::from("k"), Payload::new(value), None);
        }
        graph.nodes[0].fields.switch_all();
        let sequences: Vec<u64> = graph.nodes[0].fields.inputs[0]
            .events()
            .iter()
            .map(|e| e.sequence())
            .collect();
        assert!(sequences.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_unbound_key_is_dropped() {
        let mut graph = GraphBuilder::new().build();
        let reached = graph
            .router
            .publish(&mut graph.nodes, Key::from("nobody"), Payload::new(()), None);
        assert_eq!(reached, 0);
        assert_eq!(graph.router.published(), 1);
        assert_eq!(graph.router.dropped(), 1);
    }

    #[test]
    fn test_non_trigger_delivery_does_not_mark_due() {
        let mut builder = GraphBuilder::new();
        builder
            .add(Listener(
                Ports::new()
                    .input("go", InputSpec::latest("go").trigger())
                    .input("config", InputSpec::latest("config")),
            ))
            .unwrap();
        let mut graph = builder.build();
        graph
            .router
            .publish(&mut graph.nodes, Key::from("config"), Payload::new(1_u32), None);
        assert!(!graph.nodes[0].schedule.triggered);
        graph
            .router
            .publish(&mut graph.nodes, Key::from("go"), Payload::new(()), None);
        assert!(graph.nodes[0].schedule.triggered);
    }
}
