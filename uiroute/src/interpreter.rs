use crate::errors::AutomationError;
use crate::graph::NavGraph;
use crate::operation::Operation;
use crate::platforms::{UiActionExecutor, UiStateQuery};
use crate::prober::{Probe, StateProber};
use crate::selector::Selector;
use crate::settings::EngineSettings;
use crate::template::{self, Params};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Everything an operation needs besides the operation itself.
pub struct StepContext<'a> {
    pub graph: &'a NavGraph,
    pub params: &'a Params,
    /// Node the enclosing step is supposed to end on, if any.
    pub expected_node: Option<&'a str>,
    pub cancel: &'a CancellationToken,
}

/// Executes single [`Operation`]s against the device.
///
/// Element lookups that fail because the element is not rendered yet are
/// retried with exponential backoff; validation mismatches fail immediately.
pub struct OperationInterpreter {
    query: Arc<dyn UiStateQuery>,
    actions: Arc<dyn UiActionExecutor>,
    prober: StateProber,
    settings: EngineSettings,
}

impl OperationInterpreter {
    pub fn new(
        query: Arc<dyn UiStateQuery>,
        actions: Arc<dyn UiActionExecutor>,
        settings: EngineSettings,
    ) -> Self {
        let prober = StateProber::new(
            settings.structural_match_threshold,
            settings.action_timeout(),
        );
        Self {
            query,
            actions,
            prober,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Reads the live state and resolves it against `graph`.
    pub async fn probe(&self, graph: &NavGraph) -> Result<Probe, AutomationError> {
        self.prober.probe(graph, self.query.as_ref()).await
    }

    /// Runs `op`. Cancellation is observed before the operation starts and
    /// while it is suspended in a wait, never in the middle of a device action.
    pub fn execute<'a>(
        &'a self,
        op: &'a Operation,
        ctx: &'a StepContext<'a>,
    ) -> BoxFuture<'a, Result<(), AutomationError>> {
        async move {
            if ctx.cancel.is_cancelled() {
                return Err(AutomationError::Cancelled(format!("before {}", op.kind())));
            }
            debug!(operation = %op, "Executing operation");

            match op {
                Operation::Click { selector, .. } => {
                    let selector = selector.bind(ctx.params)?;
                    self.act_on_element(&selector, ctx, |s| self.actions.click(s))
                        .await
                }
                Operation::Input {
                    selector,
                    param_key,
                    ..
                } => {
                    let text = ctx
                        .params
                        .get(param_key)
                        .map(template::value_to_string)
                        .ok_or_else(|| AutomationError::MissingParameter(param_key.clone()))?;
                    let selector = selector.bind(ctx.params)?;
                    self.act_on_element(&selector, ctx, |s| self.actions.input(s, &text))
                        .await
                }
                Operation::Wait { duration_ms } => {
                    self.sleep(self.settings.bounded_wait(*duration_ms), ctx.cancel)
                        .await
                }
                Operation::PressKey { code } => {
                    self.device_call("press_key", self.actions.press_key(*code))
                        .await
                }
                Operation::LaunchApp { app_id } => {
                    let app_id = template::substitute(app_id, ctx.params)?;
                    self.device_call("launch_app", self.actions.launch_app(&app_id))
                        .await
                }
                Operation::KillApp { app_id } => {
                    let app_id = template::substitute(app_id, ctx.params)?;
                    self.device_call("kill_app", self.actions.kill_app(&app_id))
                        .await
                }
                Operation::Swipe {
                    x1,
                    y1,
                    x2,
                    y2,
                    duration_ms,
                } => {
                    let duration = self.settings.bounded_wait(*duration_ms);
                    self.device_call(
                        "swipe",
                        self.actions.swipe((*x1, *y1), (*x2, *y2), duration),
                    )
                    .await
                }
                Operation::ValidateElement { selector } => {
                    let selector = selector.bind(ctx.params)?;
                    self.validate_element(&selector, ctx).await
                }
                Operation::ValidateState { node_name } => {
                    self.validate_state(node_name, ctx).await
                }
                Operation::WaitForPage { timeout_ms } => {
                    self.wait_for_page(self.settings.bounded_wait(*timeout_ms), ctx)
                        .await
                }
                Operation::Sequential { operations } => {
                    for child in operations {
                        self.execute(child, ctx).await?;
                    }
                    Ok(())
                }
            }
        }
        .boxed()
    }

    /// Looks the element up in fresh snapshots until it shows up, then runs
    /// `action`. A lookup miss or an `ElementNotFound` from the device counts
    /// as "not rendered yet"; after the last attempt it becomes `ActionFailed`.
    #[instrument(level = "debug", skip_all, fields(selector = %selector))]
    async fn act_on_element<'s, F, Fut>(
        &self,
        selector: &'s Selector,
        ctx: &StepContext<'_>,
        action: F,
    ) -> Result<(), AutomationError>
    where
        F: Fn(&'s Selector) -> Fut,
        Fut: Future<Output = Result<(), AutomationError>>,
    {
        let attempts = self.settings.retry_attempts.max(1);
        let mut backoff = self.settings.retry_backoff();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let snapshot = self.bounded("get_current_state", self.query.get_current_state())
                .await?;
            if selector.find_in(&snapshot).is_some() {
                match self.bounded("action", action(selector)).await {
                    Ok(()) => return Ok(()),
                    Err(e) if e.is_retryable() => last_error = e.to_string(),
                    Err(e) => return Err(classify_action_error(e)),
                }
            } else {
                last_error = format!(
                    "element {selector} not on screen {}/{}",
                    snapshot.app_id, snapshot.screen_id
                );
            }

            if attempt < attempts {
                debug!(attempt, ?backoff, "Element not ready, retrying: {last_error}");
                self.sleep(backoff, ctx.cancel).await?;
                backoff *= 2;
            }
        }

        warn!(attempts, "Giving up on element {selector}: {last_error}");
        Err(AutomationError::ActionFailed(format!(
            "{last_error} (after {attempts} attempts)"
        )))
    }

    async fn validate_element(
        &self,
        selector: &Selector,
        ctx: &StepContext<'_>,
    ) -> Result<(), AutomationError> {
        let probe = self.probe(ctx.graph).await?;
        if selector.find_in(&probe.snapshot).is_some() {
            return Ok(());
        }
        Err(AutomationError::StepValidationFailed {
            expected: format!("element {selector}"),
            observed: probe.state.to_string(),
        })
    }

    async fn validate_state(
        &self,
        node_name: &str,
        ctx: &StepContext<'_>,
    ) -> Result<(), AutomationError> {
        let probe = self.probe(ctx.graph).await?;
        if probe.state.is_node(node_name) {
            return Ok(());
        }
        Err(AutomationError::StepValidationFailed {
            expected: node_name.to_string(),
            observed: probe.state.to_string(),
        })
    }

    /// Polls until the screen resolves to the expected node, or to any known
    /// node when the step has no expectation.
    async fn wait_for_page(
        &self,
        timeout: Duration,
        ctx: &StepContext<'_>,
    ) -> Result<(), AutomationError> {
        let deadline = Instant::now() + timeout;
        loop {
            let probe = self.probe(ctx.graph).await?;
            let arrived = match ctx.expected_node {
                Some(expected) => probe.state.is_node(expected),
                None => probe.state.is_known(),
            };
            if arrived {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AutomationError::Timeout(format!(
                    "page {} did not appear within {timeout:?}, still on {}",
                    ctx.expected_node.unwrap_or("<any known>"),
                    probe.state
                )));
            }
            self.sleep(self.settings.poll_interval(), ctx.cancel).await?;
        }
    }

    async fn device_call<Fut>(&self, what: &str, call: Fut) -> Result<(), AutomationError>
    where
        Fut: Future<Output = Result<(), AutomationError>>,
    {
        self.bounded(what, call).await.map_err(classify_action_error)
    }

    /// Applies the per-call timeout to a collaborator future.
    async fn bounded<T, Fut>(&self, what: &str, call: Fut) -> Result<T, AutomationError>
    where
        Fut: Future<Output = Result<T, AutomationError>>,
    {
        let timeout = self.settings.action_timeout();
        tokio::time::timeout(timeout, call).await.map_err(|_| {
            AutomationError::Timeout(format!("{what} did not finish within {timeout:?}"))
        })?
    }

    async fn sleep(
        &self,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), AutomationError> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = cancel.cancelled() => Err(AutomationError::Cancelled(
                format!("during {duration:?} wait")
            )),
        }
    }
}

fn classify_action_error(error: AutomationError) -> AutomationError {
    match error {
        AutomationError::Timeout(_) | AutomationError::Cancelled(_) => error,
        AutomationError::ActionFailed(_) => error,
        other => AutomationError::ActionFailed(other.to_string()),
    }
}
