//! In-memory device for tests and dry runs.
//!
//! A [`ScriptedDevice`] holds a set of named screens and a table of
//! transitions. Actions are checked against the current screen, recorded in a
//! log, and may move the device to another screen.

use crate::errors::AutomationError;
use crate::platforms::{UiActionExecutor, UiStateQuery};
use crate::selector::Selector;
use crate::state::{UiElement, UiSnapshot};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Trigger {
    Click(Selector),
    Input(Selector),
    Key(i32),
    Launch(String),
    Kill(String),
    Swipe,
}

#[derive(Debug, Clone)]
struct Transition {
    /// `None` fires on any screen.
    from: Option<String>,
    trigger: Trigger,
    to: String,
}

#[derive(Debug, Clone)]
struct Screen {
    app_id: String,
    elements: Vec<UiElement>,
}

/// One entry of the device's action log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRecord {
    pub seq: u64,
    pub action: String,
    pub screen: String,
}

#[derive(Debug, Default)]
struct DeviceState {
    current: String,
    screens: HashMap<String, Screen>,
    transitions: Vec<Transition>,
    /// Remaining snapshot reads during which matching elements stay hidden.
    render_delays: Vec<(Selector, u32)>,
    failing: Vec<Selector>,
    log: Vec<ActionRecord>,
    state_reads: usize,
}

/// Scriptable stand-in for a real device.
#[derive(Debug, Default)]
pub struct ScriptedDevice {
    state: Mutex<DeviceState>,
    seq: AtomicU64,
    latency: Mutex<Option<Duration>>,
    in_flight: AtomicU64,
    max_in_flight: AtomicU64,
}

impl ScriptedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a screen. The screen name doubles as its activity id.
    pub fn screen(&self, name: &str, app_id: &str, elements: Vec<UiElement>) {
        self.lock().screens.insert(
            name.to_string(),
            Screen {
                app_id: app_id.to_string(),
                elements,
            },
        );
    }

    pub fn start_at(&self, name: &str) {
        self.lock().current = name.to_string();
    }

    /// Moves the device without going through an action, e.g. to simulate the
    /// user switching apps between planning and execution.
    pub fn set_screen(&self, name: &str) {
        self.start_at(name);
    }

    pub fn on_click(&self, from: &str, selector: Selector, to: &str) {
        self.add_transition(Some(from), Trigger::Click(selector), to);
    }

    pub fn on_input(&self, from: &str, selector: Selector, to: &str) {
        self.add_transition(Some(from), Trigger::Input(selector), to);
    }

    pub fn on_key(&self, from: &str, code: i32, to: &str) {
        self.add_transition(Some(from), Trigger::Key(code), to);
    }

    /// Launching `app_id` from any screen lands on `to`.
    pub fn on_launch(&self, app_id: &str, to: &str) {
        self.add_transition(None, Trigger::Launch(app_id.to_string()), to);
    }

    pub fn on_kill(&self, app_id: &str, to: &str) {
        self.add_transition(None, Trigger::Kill(app_id.to_string()), to);
    }

    /// Any swipe on `from` lands on `to`.
    pub fn on_swipe(&self, from: &str, to: &str) {
        self.add_transition(Some(from), Trigger::Swipe, to);
    }

    fn add_transition(&self, from: Option<&str>, trigger: Trigger, to: &str) {
        self.lock().transitions.push(Transition {
            from: from.map(str::to_string),
            trigger,
            to: to.to_string(),
        });
    }

    /// Hides elements matching `selector` from the next `reads` snapshots.
    pub fn render_after(&self, selector: Selector, reads: u32) {
        self.lock().render_delays.push((selector, reads));
    }

    /// Every action on an element matching `selector` fails hard.
    pub fn fail_on(&self, selector: Selector) {
        self.lock().failing.push(selector);
    }

    /// Delay added to every action, to widen race windows in tests.
    pub fn with_latency(&self, latency: Duration) {
        *self
            .latency
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(latency);
    }

    pub fn current_screen(&self) -> String {
        self.lock().current.clone()
    }

    pub fn log(&self) -> Vec<ActionRecord> {
        self.lock().log.clone()
    }

    /// Action descriptions in execution order.
    pub fn actions(&self) -> Vec<String> {
        self.lock().log.iter().map(|r| r.action.clone()).collect()
    }

    pub fn state_reads(&self) -> usize {
        self.lock().state_reads
    }

    /// Highest number of actions that were ever running at the same time.
    pub fn max_concurrent_actions(&self) -> u64 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn snapshot(state: &DeviceState) -> Result<UiSnapshot, AutomationError> {
        let screen = state.screens.get(&state.current).ok_or_else(|| {
            AutomationError::Internal(format!("device is on unscripted screen {:?}", state.current))
        })?;
        let elements = screen
            .elements
            .iter()
            .filter(|e| {
                !state
                    .render_delays
                    .iter()
                    .any(|(sel, left)| *left > 0 && sel.matches(e))
            })
            .cloned()
            .collect();
        Ok(UiSnapshot::new(screen.app_id.clone(), state.current.clone()).with_elements(elements))
    }

    /// Runs one action: optional latency, then check, log and transition
    /// under the state lock.
    async fn perform(
        &self,
        action: String,
        target: Option<&Selector>,
        trigger: Trigger,
    ) -> Result<(), AutomationError> {
        let _in_flight = InFlight::enter(&self.in_flight, &self.max_in_flight);

        let latency = *self
            .latency
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        self.apply(action, target, trigger)
    }

    fn apply(
        &self,
        action: String,
        target: Option<&Selector>,
        trigger: Trigger,
    ) -> Result<(), AutomationError> {
        let mut state = self.lock();
        if let Some(selector) = target {
            let snapshot = Self::snapshot(&state)?;
            if selector.find_in(&snapshot).is_none() {
                return Err(AutomationError::ElementNotFound(selector.to_string()));
            }
            if state.failing.iter().any(|f| f == selector) {
                return Err(AutomationError::ActionFailed(format!(
                    "device rejected {action}"
                )));
            }
        }

        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let screen = state.current.clone();
        trace!(seq, %action, %screen, "Scripted action");
        state.log.push(ActionRecord {
            seq,
            action,
            screen: screen.clone(),
        });

        let next = state
            .transitions
            .iter()
            .find(|t| t.trigger == trigger && t.from.as_deref().map_or(true, |f| f == screen))
            .map(|t| t.to.clone());
        if let Some(next) = next {
            state.current = next;
        }
        Ok(())
    }
}

/// Counts one running action until dropped, also when the caller abandons
/// the action future mid-latency.
struct InFlight<'a>(&'a AtomicU64);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicU64, max: &AtomicU64) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl UiStateQuery for ScriptedDevice {
    async fn get_current_state(&self) -> Result<UiSnapshot, AutomationError> {
        let mut state = self.lock();
        state.state_reads += 1;
        let snapshot = Self::snapshot(&state);
        for (_, left) in state.render_delays.iter_mut() {
            *left = left.saturating_sub(1);
        }
        snapshot
    }
}

#[async_trait::async_trait]
impl UiActionExecutor for ScriptedDevice {
    async fn click(&self, selector: &Selector) -> Result<(), AutomationError> {
        self.perform(
            format!("click {selector}"),
            Some(selector),
            Trigger::Click(selector.clone()),
        )
        .await
    }

    async fn input(&self, selector: &Selector, text: &str) -> Result<(), AutomationError> {
        self.perform(
            format!("input {selector} {text:?}"),
            Some(selector),
            Trigger::Input(selector.clone()),
        )
        .await
    }

    async fn swipe(
        &self,
        from: (i32, i32),
        to: (i32, i32),
        _duration: Duration,
    ) -> Result<(), AutomationError> {
        self.perform(format!("swipe {from:?} -> {to:?}"), None, Trigger::Swipe)
            .await
    }

    async fn press_key(&self, code: i32) -> Result<(), AutomationError> {
        self.perform(format!("key {code}"), None, Trigger::Key(code))
            .await
    }

    async fn launch_app(&self, app_id: &str) -> Result<(), AutomationError> {
        self.perform(
            format!("launch {app_id}"),
            None,
            Trigger::Launch(app_id.to_string()),
        )
        .await
    }

    async fn kill_app(&self, app_id: &str) -> Result<(), AutomationError> {
        self.perform(
            format!("kill {app_id}"),
            None,
            Trigger::Kill(app_id.to_string()),
        )
        .await
    }
}
