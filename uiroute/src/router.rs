use crate::config::{load_package, AutomationConfig, LoadReport};
use crate::errors::AutomationError;
use crate::graph::{FunctionInfo, NavGraph};
use crate::interpreter::OperationInterpreter;
use crate::pathfinder::find_route;
use crate::plan::Plan;
use crate::platforms::{UiActionExecutor, UiStateQuery};
use crate::settings::EngineSettings;
use crate::template::Params;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, instrument, warn};

/// Entry point of the engine: holds the navigation graph and turns function
/// requests into executable [`Plan`]s.
///
/// Loading replaces the graph atomically. Plans keep the graph they were
/// built from, so a reload never affects a plan that already exists.
pub struct Router {
    graph: RwLock<Arc<NavGraph>>,
    interpreter: Arc<OperationInterpreter>,
}

impl Router {
    pub fn new(query: Arc<dyn UiStateQuery>, actions: Arc<dyn UiActionExecutor>) -> Self {
        Self::with_settings(query, actions, EngineSettings::default())
    }

    pub fn with_settings(
        query: Arc<dyn UiStateQuery>,
        actions: Arc<dyn UiActionExecutor>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            graph: RwLock::new(Arc::new(NavGraph::new())),
            interpreter: Arc::new(OperationInterpreter::new(query, actions, settings)),
        }
    }

    /// Current graph snapshot.
    pub fn graph(&self) -> Arc<NavGraph> {
        self.graph
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Swaps in a prebuilt graph.
    pub fn install(&self, graph: NavGraph) {
        *self
            .graph
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(graph);
    }

    /// Loads a package. With `merge` the package is layered over the current
    /// graph, otherwise it replaces it. Malformed entries are skipped and
    /// listed in the report.
    pub fn load_config(&self, config: &AutomationConfig, merge: bool) -> LoadReport {
        let mut slot = self
            .graph
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let base = if merge {
            slot.as_ref().clone()
        } else {
            NavGraph::new()
        };
        let (graph, report) = load_package(&base, config);
        info!(
            package = %report.package,
            merge,
            nodes = graph.nodes().len(),
            edges = graph.edges().len(),
            functions = graph.functions().len(),
            "Navigation graph updated"
        );
        *slot = Arc::new(graph);
        report
    }

    pub fn load_config_file(
        &self,
        path: impl AsRef<Path>,
        merge: bool,
    ) -> Result<LoadReport, AutomationError> {
        let config = AutomationConfig::from_path(path)?;
        Ok(self.load_config(&config, merge))
    }

    pub fn get_available_functions(&self) -> Vec<FunctionInfo> {
        self.graph().function_infos()
    }

    /// Plans `function_name` from the live screen. Returns `None` when the
    /// function is unknown or its target cannot be reached; see
    /// [`Router::try_plan_function`] for the reason.
    pub async fn plan_function(&self, function_name: &str, params: Params) -> Option<Plan> {
        match self.try_plan_function(function_name, params).await {
            Ok(plan) => Some(plan),
            Err(e) => {
                warn!(function = function_name, "No plan: {e}");
                None
            }
        }
    }

    #[instrument(skip(self, params))]
    pub async fn try_plan_function(
        &self,
        function_name: &str,
        params: Params,
    ) -> Result<Plan, AutomationError> {
        let graph = self.graph();
        let function = graph
            .function(function_name)
            .cloned()
            .ok_or_else(|| AutomationError::UnknownFunction(function_name.to_string()))?;

        let probe = self.interpreter.probe(&graph).await?;
        let route = find_route(&graph, probe.state.node_name(), &function.target_node)?;
        debug!(origin = %probe.state, hops = route.len(), "Planned route");

        Ok(Plan::new(
            function,
            probe.state,
            route,
            params,
            graph,
            self.interpreter.clone(),
        ))
    }
}
