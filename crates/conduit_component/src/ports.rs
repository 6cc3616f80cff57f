//! Port declarations.
//!
//! A component describes its fields with a [`Ports`] value. The graph
//! builder turns the declaration into live [`InputField`](crate::InputField)s
//! and [`OutputField`](crate::OutputField)s and binds their keys in the
//! router. Declarations are static: they are read once, at registration.

use crate::field::InputSpec;
use crate::id::Key;

/// The input and output fields a component exposes.
///
/// # Examples
///
/// ```rust
/// use conduit_component::{InputSpec, Ports};
///
/// let ports = Ports::new()
///     .input("frame", InputSpec::latest("camera.frame").trigger())
///     .input("clicks", InputSpec::buffer("mouse.click"))
///     .output("overlay", "display.overlay");
/// assert_eq!(ports.inputs().len(), 2);
/// assert_eq!(ports.outputs().len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Ports {
    inputs: Vec<(String, InputSpec)>,
    outputs: Vec<(String, Key)>,
    sub_components: Vec<String>,
}

impl Ports {
    /// An empty declaration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an input field.
    #[must_use]
    pub fn input(mut self, name: impl Into<String>, spec: InputSpec) -> Self {
        self.inputs.push((name.into(), spec));
        self
    }

    /// Declare an output field publishing on `key`.
    #[must_use]
    pub fn output(mut self, name: impl Into<String>, key: impl Into<Key>) -> Self {
        self.outputs.push((name.into(), key.into()));
        self
    }

    /// Embed the fields of a helper object under `prefix.`.
    ///
    /// The helper has no scheduling of its own; the owning component reads
    /// and writes the nested fields (`"prefix.field"`) in its own steps.
    #[must_use]
    pub fn nest(mut self, prefix: &str, ports: Ports) -> Self {
        self.sub_components.push(prefix.to_string());
        for sub in ports.sub_components {
            self.sub_components.push(format!("{prefix}.{sub}"));
        }
        for (name, spec) in ports.inputs {
            self.inputs.push((format!("{prefix}.{name}"), spec));
        }
        for (name, key) in ports.outputs {
            self.outputs.push((format!("{prefix}.{name}"), key));
        }
        self
    }

    /// Declared inputs in declaration order.
    #[must_use]
    pub fn inputs(&self) -> &[(String, InputSpec)] {
        &self.inputs
    }

    /// Declared outputs in declaration order.
    #[must_use]
    pub fn outputs(&self) -> &[(String, Key)] {
        &self.outputs
    }

    /// Prefixes of nested helpers.
    #[must_use]
    pub fn sub_components(&self) -> &[String] {
        &self.sub_components
    }

    /// Returns `true` if any input is a trigger.
    #[must_use]
    pub fn has_trigger(&self) -> bool {
        self.inputs.iter().any(|(_, spec)| spec.is_trigger())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nest_prefixes_field_names() {
        let helper = Ports::new()
            .input("in", InputSpec::buffer("raw").trigger())
            .output("out", "cooked");
        let ports = Ports::new().output("status", "status").nest("filter", helper);

        let inputs: Vec<&str> = ports.inputs().iter().map(|(n, _)| n.as_str()).collect();
        let outputs: Vec<&str> = ports.outputs().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(inputs, vec!["filter.in"]);
        assert_eq!(outputs, vec!["status", "filter.out"]);
        assert_eq!(ports.sub_components(), ["filter".to_string()]);
        assert!(ports.has_trigger());
    }

    #[test]
    fn test_nested_helpers_keep_full_path() {
        let inner = Ports::new().input("x", InputSpec::latest("x"));
        let middle = Ports::new().nest("inner", inner);
        let ports = Ports::new().nest("outer", middle);
        assert_eq!(ports.inputs()[0].0, "outer.inner.x");
        assert_eq!(
            ports.sub_components(),
            ["outer".to_string(), "outer.inner".to_string()]
        );
    }
}
