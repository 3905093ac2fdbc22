//! Graph-based routing and execution for mobile UI automation
//!
//! Screens are nodes, transitions are edges carrying the operations that
//! perform them, and a function names a goal screen plus a final operation.
//! The [`Router`] finds out where the device is, computes the shortest route
//! to the goal and hands back a [`Plan`] that replays it step by step,
//! checking after every edge that the expected screen was reached.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use uiroute::{mock::ScriptedDevice, Params, Router};
//! # async fn demo() -> Result<(), uiroute::AutomationError> {
//! let device = Arc::new(ScriptedDevice::new());
//! let router = Router::new(device.clone(), device);
//! router.load_config_file("chat.json", false)?;
//!
//! if let Some(plan) = router.plan_function("send_message", Params::new()).await {
//!     let result = plan.execute(&Params::new()).await;
//!     println!("{:?}", result.outcome());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod errors;
pub mod graph;
pub mod interpreter;
pub mod mock;
pub mod operation;
pub mod pathfinder;
pub mod plan;
pub mod platforms;
pub mod prober;
pub mod router;
pub mod selector;
pub mod settings;
pub mod state;
pub mod template;

pub use config::{AutomationConfig, LoadReport};
pub use errors::AutomationError;
pub use graph::{Edge, Function, FunctionInfo, NavGraph, Node, NodeType};
pub use operation::Operation;
pub use plan::{ExecutionResult, ExecutionState, Outcome, Plan};
pub use platforms::{UiActionExecutor, UiStateQuery};
pub use prober::ProbedState;
pub use router::Router;
pub use selector::Selector;
pub use settings::EngineSettings;
pub use state::{UiElement, UiSnapshot};
pub use template::Params;
