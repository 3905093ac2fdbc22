//! Executable plans.
//!
//! A [`Plan`] is a computed route plus the function's trailing operation. It
//! is immutable once built and may be executed several times; every run
//! starts from `Pending` with a fresh state.
//!
//! Only one plan drives the device at a time. Runs queue on a process-wide
//! lock in arrival order, and waiting for the lock can be cancelled.

use crate::errors::AutomationError;
use crate::graph::{Edge, Function, NavGraph};
use crate::interpreter::{OperationInterpreter, StepContext};
use crate::prober::ProbedState;
use crate::template::Params;
use once_cell::sync::Lazy;
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

static EXECUTION_LOCK: Lazy<tokio::sync::Mutex<()>> = Lazy::new(|| tokio::sync::Mutex::new(()));

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "step", rename_all = "snake_case")]
pub enum ExecutionState {
    Pending,
    Probing,
    ExecutingEdge(usize),
    Validating(usize),
    ExecutingFunction,
    Succeeded,
    Failed,
    Cancelled,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Succeeded | ExecutionState::Failed | ExecutionState::Cancelled
        )
    }
}

/// Coarse classification of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

/// Result of one [`Plan::execute`] call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub execution_id: String,
    pub success: bool,
    #[serde(serialize_with = "error_as_string")]
    pub error: Option<AutomationError>,
    /// Index of the failing edge, or `route.len()` when the trailing
    /// operation failed.
    pub failed_step_index: Option<usize>,
    pub expected_node: Option<String>,
    pub observed_node: Option<String>,
    pub final_state: ExecutionState,
    /// Every state the run entered, in order.
    pub transitions: Vec<ExecutionState>,
}

impl ExecutionResult {
    pub fn outcome(&self) -> Outcome {
        match (&self.error, self.final_state) {
            (_, ExecutionState::Succeeded) => Outcome::Succeeded,
            (_, ExecutionState::Cancelled) | (Some(AutomationError::Cancelled(_)), _) => {
                Outcome::Cancelled
            }
            (Some(AutomationError::Timeout(_)), _) => Outcome::TimedOut,
            _ => Outcome::Failed,
        }
    }
}

fn error_as_string<S: Serializer>(
    error: &Option<AutomationError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

/// JSON-friendly description of a plan, used by the CLI dry run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub function: String,
    pub target_node: String,
    pub origin: ProbedState,
    pub route: Vec<String>,
    pub required_parameters: BTreeSet<String>,
}

pub struct Plan {
    function: Function,
    origin: ProbedState,
    route: Vec<Edge>,
    params: Params,
    required_keys: BTreeSet<String>,
    graph: Arc<NavGraph>,
    interpreter: Arc<OperationInterpreter>,
    running: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plan")
            .field("function", &self.function.name)
            .field("origin", &self.origin)
            .field("route", &self.route)
            .finish_non_exhaustive()
    }
}

impl Plan {
    pub(crate) fn new(
        function: Function,
        origin: ProbedState,
        route: Vec<Edge>,
        params: Params,
        graph: Arc<NavGraph>,
        interpreter: Arc<OperationInterpreter>,
    ) -> Self {
        let mut required_keys = function.parameter_keys();
        for edge in &route {
            required_keys.extend(edge.parameter_keys());
        }
        Self {
            function,
            origin,
            route,
            params,
            required_keys,
            graph,
            interpreter,
            running: tokio::sync::Mutex::new(()),
        }
    }

    /// Every `{{key}}` and input parameter the route and the function use.
    pub fn required_parameter_keys(&self) -> &BTreeSet<String> {
        &self.required_keys
    }

    pub fn route(&self) -> &[Edge] {
        &self.route
    }

    /// The state the device was in when the plan was made.
    pub fn origin(&self) -> &ProbedState {
        &self.origin
    }

    pub fn function(&self) -> &Function {
        &self.function
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            function: self.function.name.clone(),
            target_node: self.function.target_node.clone(),
            origin: self.origin.clone(),
            route: self.route.iter().map(Edge::to_string).collect(),
            required_parameters: self.required_keys.clone(),
        }
    }

    pub async fn execute(&self, params: &Params) -> ExecutionResult {
        self.execute_with_cancel(params, CancellationToken::new())
            .await
    }

    /// Runs the plan. Cancelling `cancel` stops the run at the next
    /// operation boundary, or while it is still queued for the device.
    pub async fn execute_with_cancel(
        &self,
        params: &Params,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let execution_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!(
            "execute_plan",
            execution_id = %execution_id,
            function = %self.function.name,
            hops = self.route.len()
        );
        let run = Run::new(execution_id);

        let Ok(_running) = self.running.try_lock() else {
            warn!(parent: &span, "Rejecting re-entrant execution");
            return run.fail(
                AutomationError::PlanBusy(self.function.name.clone()),
                None,
            );
        };

        self.run(run, params, &cancel).instrument(span).await
    }

    async fn run(
        &self,
        mut run: Run,
        params: &Params,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let mut merged = self.params.clone();
        merged.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));

        if let Some(missing) = self.required_keys.iter().find(|k| !merged.contains_key(*k)) {
            warn!(parameter = %missing, "Missing parameter, nothing was executed");
            return run.fail(AutomationError::MissingParameter(missing.clone()), None);
        }

        let queue_timeout = self.interpreter.settings().queue_timeout();
        let _device = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Cancelled while waiting for the device");
                return run.cancel(AutomationError::Cancelled("while queued".into()), None);
            }
            guard = EXECUTION_LOCK.lock() => guard,
            _ = tokio::time::sleep(queue_timeout) => {
                warn!(?queue_timeout, "Device stayed busy, giving up");
                return run.fail(
                    AutomationError::Timeout(format!(
                        "device still busy after {queue_timeout:?} in the queue"
                    )),
                    None,
                );
            }
        };
        info!(origin = %self.origin, "Starting execution");

        run.enter(ExecutionState::Probing);
        let probe = match self.interpreter.probe(&self.graph).await {
            Ok(probe) => probe,
            Err(e) => return run.fail(e, None),
        };
        if let Some(expected) = self.origin.node_name() {
            if !probe.state.is_node(expected) {
                warn!(expected, observed = %probe.state, "Screen changed since planning");
                return run.fail(
                    AutomationError::StepValidationFailed {
                        expected: expected.to_string(),
                        observed: probe.state.to_string(),
                    },
                    None,
                );
            }
        }

        for (index, edge) in self.route.iter().enumerate() {
            if let Err(e) = self.run_edge(&mut run, index, edge, &merged, cancel).await {
                error!(step = index, edge = %edge, "Edge failed: {e}");
                return run.finish_with(e, Some(index));
            }
        }

        if cancel.is_cancelled() {
            return run.cancel(
                AutomationError::Cancelled("before the function operation".into()),
                Some(self.route.len()),
            );
        }
        run.enter(ExecutionState::ExecutingFunction);
        let ctx = StepContext {
            graph: &self.graph,
            params: &merged,
            expected_node: Some(self.function.target_node.as_str()),
            cancel,
        };
        if let Err(e) = self.interpreter.execute(&self.function.operation, &ctx).await {
            error!(function = %self.function.name, "Function operation failed: {e}");
            return run.finish_with(e, Some(self.route.len()));
        }

        info!("Execution succeeded");
        run.succeed()
    }

    async fn run_edge(
        &self,
        run: &mut Run,
        index: usize,
        edge: &Edge,
        params: &Params,
        cancel: &CancellationToken,
    ) -> Result<(), AutomationError> {
        if cancel.is_cancelled() {
            return Err(AutomationError::Cancelled(format!("before edge {edge}")));
        }
        run.enter(ExecutionState::ExecutingEdge(index));
        info!(step = index, edge = %edge, "Executing edge");

        let ctx = StepContext {
            graph: &self.graph,
            params,
            expected_node: Some(edge.to.as_str()),
            cancel,
        };
        for op in &edge.operations {
            self.interpreter.execute(op, &ctx).await?;
        }

        run.enter(ExecutionState::Validating(index));
        if let Some(validation) = &edge.validation {
            self.interpreter.execute(validation, &ctx).await?;
        }
        let probe = self.interpreter.probe(&self.graph).await?;
        if !probe.state.is_node(&edge.to) {
            return Err(AutomationError::StepValidationFailed {
                expected: edge.to.clone(),
                observed: probe.state.to_string(),
            });
        }
        Ok(())
    }
}

/// Bookkeeping for a single run.
struct Run {
    execution_id: String,
    transitions: Vec<ExecutionState>,
}

impl Run {
    fn new(execution_id: String) -> Self {
        Self {
            execution_id,
            transitions: vec![ExecutionState::Pending],
        }
    }

    fn enter(&mut self, state: ExecutionState) {
        debug!(?state, "State transition");
        self.transitions.push(state);
    }

    fn finish_with(self, error: AutomationError, step: Option<usize>) -> ExecutionResult {
        if matches!(error, AutomationError::Cancelled(_)) {
            self.cancel(error, step)
        } else {
            self.fail(error, step)
        }
    }

    fn fail(self, error: AutomationError, step: Option<usize>) -> ExecutionResult {
        self.end(ExecutionState::Failed, Some(error), step)
    }

    fn cancel(self, error: AutomationError, step: Option<usize>) -> ExecutionResult {
        self.end(ExecutionState::Cancelled, Some(error), step)
    }

    fn succeed(self) -> ExecutionResult {
        self.end(ExecutionState::Succeeded, None, None)
    }

    fn end(
        mut self,
        state: ExecutionState,
        error: Option<AutomationError>,
        failed_step_index: Option<usize>,
    ) -> ExecutionResult {
        self.enter(state);
        let (expected_node, observed_node) = match &error {
            Some(AutomationError::StepValidationFailed { expected, observed }) => {
                (Some(expected.clone()), Some(observed.clone()))
            }
            _ => (None, None),
        };
        ExecutionResult {
            execution_id: self.execution_id,
            success: error.is_none(),
            error,
            failed_step_index,
            expected_node,
            observed_node,
            final_state: state,
            transitions: self.transitions,
        }
    }
}
