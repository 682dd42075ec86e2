//! Declared dependencies from input slots to output slots.
//!
//! A [`BindingGraph`] is a registration table: each binding names the input
//! slots it reads, the output slots it writes and the async function between
//! them. Input and output slots are disjoint, so the graph is acyclic by
//! construction. On each client event the dispatcher runs every binding that
//! reads a changed slot exactly once and returns all new output values in one
//! response.

use crate::figures::FigureError;
use crate::models::UpdateResponse;
use crate::selection::SelectionError;
use futures::future::{BoxFuture, FutureExt, join_all};
use serde_json::Value as SlotValue;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    future::Future,
    sync::Arc,
};
use thiserror::Error;
use tracing::{debug, warn};

/// Name of an input or output slot, e.g. `date-range.start`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(String);

impl SlotId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SlotId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of one binding run.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// One value per declared output, in declaration order.
    Update(Vec<SlotValue>),
    /// Leave every output as it is.
    NoUpdate,
}

impl Outcome {
    pub fn single(value: impl Into<SlotValue>) -> Self {
        Outcome::Update(vec![value.into()])
    }
}

#[derive(Debug, Error)]
pub enum BindingError {
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error(transparent)]
    Figure(#[from] FigureError),
    #[error("binding '{binding}' produced {actual} values for {expected} outputs")]
    Arity {
        binding: String,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("binding '{0}' is registered twice")]
    DuplicateBinding(String),
    #[error("binding '{binding}' reads undeclared input slot '{slot}'")]
    UnknownInput { binding: String, slot: SlotId },
    #[error("output slot '{0}' is written by more than one binding")]
    DuplicateOutput(SlotId),
    #[error("slot '{0}' is declared as both input and output")]
    OutputIsInput(SlotId),
    #[error("binding '{0}' declares no inputs")]
    NoInputs(String),
    #[error("binding '{0}' declares no outputs")]
    NoOutputs(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("unknown input slot '{0}'")]
    UnknownSlot(String),
}

/// Current values of the inputs a binding declared. Slots the client did not
/// send read as null.
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    values: BTreeMap<SlotId, SlotValue>,
}

impl Inputs {
    pub fn get(&self, slot: &str) -> &SlotValue {
        static NULL: SlotValue = SlotValue::Null;
        self.values.get(&SlotId::from(slot)).unwrap_or(&NULL)
    }

    /// Non-empty string value of a slot.
    pub fn text(&self, slot: &str) -> Option<&str> {
        self.get(slot).as_str().filter(|value| !value.trim().is_empty())
    }
}

type Handler<C> =
    Arc<dyn Fn(Inputs, Arc<C>) -> BoxFuture<'static, Result<Outcome, BindingError>> + Send + Sync>;

pub struct Binding<C> {
    name: String,
    inputs: Vec<SlotId>,
    outputs: Vec<SlotId>,
    prompt: Option<String>,
    handler: Handler<C>,
}

impl<C> Binding<C> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[SlotId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[SlotId] {
        &self.outputs
    }
}

/// One client event: the value of every input slot, and which of them changed
/// since the previous event.
#[derive(Debug, Clone, Default)]
pub struct Event {
    pub values: BTreeMap<SlotId, SlotValue>,
    pub changed: BTreeSet<SlotId>,
}

pub struct GraphBuilder<C> {
    inputs: BTreeSet<SlotId>,
    bindings: Vec<Binding<C>>,
}

impl<C: Send + Sync + 'static> GraphBuilder<C> {
    pub fn input(mut self, slot: &str) -> Self {
        self.inputs.insert(SlotId::from(slot));
        self
    }

    pub fn bind<F, Fut>(mut self, name: &str, inputs: &[&str], outputs: &[&str], handler: F) -> Self
    where
        F: Fn(Inputs, Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Outcome, BindingError>> + Send + 'static,
    {
        self.bindings.push(Binding {
            name: name.to_string(),
            inputs: inputs.iter().copied().map(SlotId::from).collect(),
            outputs: outputs.iter().copied().map(SlotId::from).collect(),
            prompt: None,
            handler: Arc::new(move |values, ctx| handler(values, ctx).boxed()),
        });
        self
    }

    /// Sets the prompt of the most recently bound binding.
    pub fn prompt(mut self, text: &str) -> Self {
        if let Some(binding) = self.bindings.last_mut() {
            binding.prompt = Some(text.to_string());
        }
        self
    }

    pub fn build(self) -> Result<BindingGraph<C>, GraphError> {
        let mut names = BTreeSet::new();
        let mut outputs = BTreeSet::new();
        for binding in &self.bindings {
            if !names.insert(binding.name.clone()) {
                return Err(GraphError::DuplicateBinding(binding.name.clone()));
            }
            if binding.inputs.is_empty() {
                return Err(GraphError::NoInputs(binding.name.clone()));
            }
            if binding.outputs.is_empty() {
                return Err(GraphError::NoOutputs(binding.name.clone()));
            }
            for slot in &binding.inputs {
                if !self.inputs.contains(slot) {
                    return Err(GraphError::UnknownInput {
                        binding: binding.name.clone(),
                        slot: slot.clone(),
                    });
                }
            }
            for slot in &binding.outputs {
                if self.inputs.contains(slot) {
                    return Err(GraphError::OutputIsInput(slot.clone()));
                }
                if !outputs.insert(slot.clone()) {
                    return Err(GraphError::DuplicateOutput(slot.clone()));
                }
            }
        }

        Ok(BindingGraph {
            inputs: self.inputs,
            outputs,
            bindings: self.bindings,
        })
    }
}

pub struct BindingGraph<C> {
    inputs: BTreeSet<SlotId>,
    outputs: BTreeSet<SlotId>,
    bindings: Vec<Binding<C>>,
}

impl<C: Send + Sync + 'static> BindingGraph<C> {
    pub fn builder() -> GraphBuilder<C> {
        GraphBuilder {
            inputs: BTreeSet::new(),
            bindings: Vec::new(),
        }
    }

    pub fn inputs(&self) -> &BTreeSet<SlotId> {
        &self.inputs
    }

    pub fn outputs(&self) -> &BTreeSet<SlotId> {
        &self.outputs
    }

    pub fn bindings(&self) -> &[Binding<C>] {
        &self.bindings
    }

    /// Builds an event from client-supplied slot names, rejecting any slot
    /// that is not a declared input.
    pub fn event(
        &self,
        values: BTreeMap<String, SlotValue>,
        changed: impl IntoIterator<Item = String>,
    ) -> Result<Event, DispatchError> {
        let mut event = Event::default();
        for (name, value) in values {
            event.values.insert(self.declared(name)?, value);
        }
        for name in changed {
            event.changed.insert(self.declared(name)?);
        }
        Ok(event)
    }

    /// Event that marks every input changed, used to fill a fresh page.
    pub fn initial_event(&self, values: BTreeMap<SlotId, SlotValue>) -> Event {
        Event {
            values,
            changed: self.inputs.clone(),
        }
    }

    fn declared(&self, name: String) -> Result<SlotId, DispatchError> {
        let slot = SlotId::new(name);
        if self.inputs.contains(&slot) {
            Ok(slot)
        } else {
            Err(DispatchError::UnknownSlot(slot.0))
        }
    }

    /// Runs every binding that reads a changed slot, once, and gathers their
    /// results. A failing binding contributes an error for each of its
    /// outputs and no values.
    pub async fn dispatch(&self, event: &Event, ctx: Arc<C>) -> UpdateResponse {
        let affected: Vec<&Binding<C>> = self
            .bindings
            .iter()
            .filter(|binding| binding.inputs.iter().any(|slot| event.changed.contains(slot)))
            .collect();
        debug!(
            changed = event.changed.len(),
            bindings = affected.len(),
            "dispatching event"
        );

        let runs = affected.into_iter().map(|binding| {
            let inputs = Inputs {
                values: binding
                    .inputs
                    .iter()
                    .filter_map(|slot| event.values.get(slot).map(|v| (slot.clone(), v.clone())))
                    .collect(),
            };
            let run = (binding.handler)(inputs, Arc::clone(&ctx));
            async move { (binding, run.await) }
        });

        let mut response = UpdateResponse::default();
        for (binding, result) in join_all(runs).await {
            let result = result.and_then(|outcome| match outcome {
                Outcome::Update(values) if values.len() != binding.outputs.len() => {
                    Err(BindingError::Arity {
                        binding: binding.name.clone(),
                        expected: binding.outputs.len(),
                        actual: values.len(),
                    })
                }
                other => Ok(other),
            });

            match result {
                Ok(Outcome::Update(values)) => {
                    for (slot, value) in binding.outputs.iter().zip(values) {
                        response.outputs.insert(slot.to_string(), value);
                    }
                }
                Ok(Outcome::NoUpdate) => {
                    response.skipped.push(binding.name.clone());
                    if let Some(prompt) = &binding.prompt {
                        if !response.prompts.contains(prompt) {
                            response.prompts.push(prompt.clone());
                        }
                    }
                }
                Err(err) => {
                    warn!(binding = %binding.name, "binding failed: {err}");
                    for slot in &binding.outputs {
                        response.errors.insert(slot.to_string(), err.to_string());
                    }
                }
            }
        }
        response
    }
}
