//! System definition - the directed graph of processes
//!
//! A system is declared as process definitions plus pipes. A pipe is an
//! ordered list of process names; each consecutive pair (a, b) adds the edge
//! a -> b. Cycles are legal, including a process following itself.

use std::{collections::HashMap, sync::Arc};

use crate::{
    domain::error::RunnerError,
    port::{policy::PolicyFactory, store::StoreFactory}
};

/// Declaration of one process: its name and injected collaborators
#[derive(Clone)]
pub struct ProcessDefinition {
    /// Process name, unique within the system
    pub name:   String,
    /// Builds the business policy for each (process, pipeline) instance
    pub policy: Arc<dyn PolicyFactory>,
    /// Storage backend for this process, falling back to the runner default
    pub store:  Option<Arc<dyn StoreFactory>>
}

impl ProcessDefinition {
    pub fn new(name: impl Into<String>, policy: Arc<dyn PolicyFactory>) -> Self {
        Self { name: name.into(), policy, store: None }
    }

    pub fn with_store(mut self, store: Arc<dyn StoreFactory>) -> Self {
        self.store = Some(store);
        self
    }
}

/// Immutable process graph, computed once before any actor starts
#[derive(Clone)]
pub struct System {
    definitions:      Vec<ProcessDefinition>,
    upstream_names:   HashMap<String, Vec<String>>,
    downstream_names: HashMap<String, Vec<String>>
}

impl System {
    pub fn builder() -> SystemBuilder {
        SystemBuilder::default()
    }

    pub fn definitions(&self) -> &[ProcessDefinition] {
        &self.definitions
    }

    pub fn definition(&self, name: &str) -> Option<&ProcessDefinition> {
        self.definitions.iter().find(|definition| definition.name == name)
    }

    /// Processes this process pulls notifications from
    pub fn upstream_names(&self, name: &str) -> &[String] {
        self.upstream_names.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Processes this process pushes prompts to
    pub fn downstream_names(&self, name: &str) -> &[String] {
        self.downstream_names.get(name).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Builder collecting process definitions and pipes
#[derive(Default)]
pub struct SystemBuilder {
    definitions: Vec<ProcessDefinition>,
    pipes:       Vec<Vec<String>>
}

impl SystemBuilder {
    pub fn process(mut self, definition: ProcessDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    pub fn pipe<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>
    {
        self.pipes.push(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn build(self) -> Result<System, RunnerError> {
        let mut upstream_names: HashMap<String, Vec<String>> = HashMap::new();
        let mut downstream_names: HashMap<String, Vec<String>> = HashMap::new();

        for definition in &self.definitions {
            // Names become storage key scopes, so key separators are excluded
            if definition.name.is_empty() {
                return Err(RunnerError::Definition("process name is empty".to_string()));
            }
            if !definition.name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
                return Err(RunnerError::Definition(format!(
                    "process name '{}' contains characters outside letters, digits, '_' and '-'",
                    definition.name
                )));
            }
            if upstream_names.contains_key(&definition.name) {
                return Err(RunnerError::Definition(format!("process '{}' is defined twice", definition.name)));
            }
            upstream_names.insert(definition.name.clone(), Vec::new());
            downstream_names.insert(definition.name.clone(), Vec::new());
        }

        for pipe in &self.pipes {
            for name in pipe {
                if !upstream_names.contains_key(name) {
                    return Err(RunnerError::Definition(format!("pipe references undefined process '{}'", name)));
                }
            }

            for pair in pipe.windows(2) {
                let (from, to) = (&pair[0], &pair[1]);

                let downstream = downstream_names.entry(from.clone()).or_default();
                if !downstream.contains(to) {
                    downstream.push(to.clone());
                }

                let upstream = upstream_names.entry(to.clone()).or_default();
                if !upstream.contains(from) {
                    upstream.push(from.clone());
                }
            }
        }

        Ok(System { definitions: self.definitions, upstream_names, downstream_names })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{error::RunnerError, event::DomainEvent, identity::ProcessIdentity},
        port::policy::ProcessPolicy
    };

    struct InertPolicy;

    #[async_trait::async_trait]
    impl ProcessPolicy for InertPolicy {
        async fn apply(&self, _event: &DomainEvent) -> Result<Vec<DomainEvent>, RunnerError> {
            Ok(vec![])
        }
    }

    struct InertFactory;

    impl PolicyFactory for InertFactory {
        fn build(&self, _identity: &ProcessIdentity) -> Arc<dyn ProcessPolicy> {
            Arc::new(InertPolicy)
        }
    }

    fn definition(name: &str) -> ProcessDefinition {
        ProcessDefinition::new(name, Arc::new(InertFactory))
    }

    #[test]
    fn test_pipe_builds_edges_in_order() {
        let system = System::builder()
            .process(definition("orders"))
            .process(definition("payments"))
            .process(definition("shipping"))
            .pipe(["orders", "payments", "shipping"])
            .build()
            .unwrap();

        assert_eq!(system.downstream_names("orders"), ["payments"]);
        assert_eq!(system.upstream_names("payments"), ["orders"]);
        assert_eq!(system.downstream_names("payments"), ["shipping"]);
        assert_eq!(system.upstream_names("shipping"), ["payments"]);
        assert!(system.upstream_names("orders").is_empty());
        assert!(system.downstream_names("shipping").is_empty());
    }

    #[test]
    fn test_cycles_are_legal() {
        let system = System::builder()
            .process(definition("proposer"))
            .process(definition("acceptor"))
            .pipe(["proposer", "acceptor", "proposer"])
            .build()
            .unwrap();

        assert_eq!(system.downstream_names("proposer"), ["acceptor"]);
        assert_eq!(system.downstream_names("acceptor"), ["proposer"]);
        assert_eq!(system.upstream_names("proposer"), ["acceptor"]);
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let system = System::builder()
            .process(definition("a"))
            .process(definition("b"))
            .pipe(["a", "b"])
            .pipe(["a", "b"])
            .build()
            .unwrap();

        assert_eq!(system.downstream_names("a"), ["b"]);
        assert_eq!(system.upstream_names("b"), ["a"]);
    }

    #[test]
    fn test_unknown_pipe_name_is_rejected() {
        let result = System::builder().process(definition("a")).pipe(["a", "ghost"]).build();

        assert!(matches!(result, Err(RunnerError::Definition(_))));
    }

    #[test]
    fn test_duplicate_definition_is_rejected() {
        let result = System::builder().process(definition("a")).process(definition("a")).build();

        assert!(matches!(result, Err(RunnerError::Definition(_))));
    }

    #[test]
    fn test_process_names_outside_the_key_charset_are_rejected() {
        for name in ["", "orders:eu", "orders/eu", "orders eu"] {
            let result = System::builder().process(definition(name)).build();
            assert!(matches!(result, Err(RunnerError::Definition(_))), "name {:?} should be rejected", name);
        }

        System::builder().process(definition("orders_v2-eu")).build().unwrap();
    }
}
