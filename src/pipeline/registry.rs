//! Step registry: maps a kind id to a constructor.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::graph::StepNode;
use crate::pipeline::step::{AnyStep, Step, StepResult};
use crate::pipeline::step_kind::BuiltinKind;
use crate::pipeline::steps::BuiltinStep;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Constructor for a custom step kind.
pub type StepConstructor = Arc<dyn Fn(&StepNode) -> StepResult<Box<dyn Step>> + Send + Sync>;

/// Creates step instances from graph nodes.
///
/// Built-in kinds are always available. Custom kinds registered here take
/// precedence over a built-in kind with the same id.
#[derive(Clone, Default)]
pub struct StepRegistry {
    custom: HashMap<String, StepConstructor>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom kind.
    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F)
    where
        F: Fn(&StepNode) -> StepResult<Box<dyn Step>> + Send + Sync + 'static,
    {
        let kind = kind.into();
        tracing::debug!("Registered step kind '{}'", kind);
        self.custom.insert(kind, Arc::new(constructor));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.custom.contains_key(kind) || BuiltinKind::from_id(kind).is_some()
    }

    /// Every known kind id, built-ins first.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = BuiltinKind::all().iter().map(|k| k.id().to_string()).collect();
        let mut custom: Vec<&String> = self
            .custom
            .keys()
            .filter(|k| BuiltinKind::from_id(k).is_none())
            .collect();
        custom.sort();
        kinds.extend(custom.into_iter().cloned());
        kinds
    }

    /// Instantiate one copy of `node`.
    pub fn create(&self, node: &StepNode) -> PipelineResult<AnyStep> {
        let config_error = |e: crate::pipeline::step::StepError| PipelineError::Config {
            step: node.name.clone(),
            message: e.to_string(),
        };
        if let Some(constructor) = self.custom.get(&node.kind) {
            return constructor(node).map(AnyStep::Plugin).map_err(config_error);
        }
        let kind = BuiltinKind::from_id(&node.kind)
            .ok_or_else(|| PipelineError::UnknownKind(node.kind.clone()))?;
        BuiltinStep::create(kind, node).map(AnyStep::Builtin)
    }
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut custom: Vec<&String> = self.custom.keys().collect();
        custom.sort();
        f.debug_struct("StepRegistry").field("custom", &custom).finish()
    }
}
