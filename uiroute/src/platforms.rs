//! Device seam.
//!
//! The engine never talks to a device directly. Production code plugs in a
//! bridge to the platform accessibility service; tests use
//! [`crate::mock::ScriptedDevice`].

use crate::errors::AutomationError;
use crate::selector::Selector;
use crate::state::UiSnapshot;
use std::time::Duration;

/// Reads what is currently on screen.
#[async_trait::async_trait]
pub trait UiStateQuery: Send + Sync {
    async fn get_current_state(&self) -> Result<UiSnapshot, AutomationError>;
}

/// Performs input on the device.
///
/// Implementations report an element that is not (yet) present as
/// [`AutomationError::ElementNotFound`]; any other error is treated as a hard
/// failure of the action.
#[async_trait::async_trait]
pub trait UiActionExecutor: Send + Sync {
    async fn click(&self, selector: &Selector) -> Result<(), AutomationError>;

    async fn input(&self, selector: &Selector, text: &str) -> Result<(), AutomationError>;

    async fn swipe(
        &self,
        from: (i32, i32),
        to: (i32, i32),
        duration: Duration,
    ) -> Result<(), AutomationError>;

    async fn press_key(&self, code: i32) -> Result<(), AutomationError>;

    async fn launch_app(&self, app_id: &str) -> Result<(), AutomationError>;

    async fn kill_app(&self, app_id: &str) -> Result<(), AutomationError>;
}
