#![allow(dead_code)]

use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use uiroute::mock::ScriptedDevice;
use uiroute::{AutomationConfig, EngineSettings, Params, Router, Selector, UiElement};

pub const MAIN: &str = "com.chat.Main";
pub const CHAT_LIST: &str = "com.chat.ChatList";
pub const CONVERSATION: &str = "com.chat.Conversation";
pub const SETTINGS: &str = "com.chat.Settings";
pub const LAUNCHER: &str = "launcher";

pub fn chat_package() -> Value {
    json!({
        "appName": "Chat",
        "packageName": "com.chat",
        "nodes": [
            {"name": "Home", "activityName": ".Main", "nodeType": "APP_HOME"},
            {"name": "Chats", "activityName": ".ChatList", "nodeType": "LIST_PAGE"},
            {"name": "Chat", "activityName": ".Conversation", "nodeType": "DETAIL_PAGE"},
            {"name": "Settings", "activityName": ".Settings", "nodeType": "OTHER"}
        ],
        "edges": [
            {"from": "Chat", "to": "Home",
             "operations": [{"type": "launch_app", "appId": "com.chat"}]},
            {"from": "Home", "to": "Chats",
             "operations": [{"type": "click", "selector": "text:Chats"}]},
            {"from": "Chats", "to": "Chat",
             "operations": [{"type": "click", "selector": "text:{{contact}}"}],
             "validation": {"type": "validate_element", "selector": "id:message_box"}},
            {"from": "Home", "to": "Settings",
             "operations": [{"type": "click", "selector": "desc:Settings"}]}
        ],
        "functions": [
            {"name": "send_message", "description": "Send a message to a contact",
             "targetNodeName": "Chat",
             "operation": {"type": "sequential", "operations": [
                 {"type": "input", "selector": "id:message_box", "paramKey": "message"},
                 {"type": "click", "selector": "desc:Send"}
             ]}},
            {"name": "toggle_dark_mode", "description": "Flip the theme",
             "targetNodeName": "Settings",
             "operation": {"type": "click", "selector": "text:Dark mode"}}
        ]
    })
}

/// Screens of the chat app without any transitions.
pub fn chat_screens() -> Arc<ScriptedDevice> {
    let device = Arc::new(ScriptedDevice::new());
    device.screen(
        MAIN,
        "com.chat",
        vec![
            UiElement::with_text("Chats"),
            UiElement::default().desc("Settings"),
        ],
    );
    device.screen(
        CHAT_LIST,
        "com.chat",
        vec![UiElement::with_text("Alice"), UiElement::with_text("Bob")],
    );
    device.screen(
        CONVERSATION,
        "com.chat",
        vec![
            UiElement::with_id("com.chat:id/message_box"),
            UiElement::default().desc("Send"),
        ],
    );
    device.screen(SETTINGS, "com.chat", vec![UiElement::with_text("Dark mode")]);
    device.screen(LAUNCHER, "com.android.launcher", vec![]);
    device.start_at(MAIN);
    device
}

pub fn standard_transitions(device: &ScriptedDevice) {
    device.on_launch("com.chat", MAIN);
    device.on_click(MAIN, Selector::text("Chats"), CHAT_LIST);
    device.on_click(MAIN, Selector::desc("Settings"), SETTINGS);
    device.on_click(CHAT_LIST, Selector::text("Alice"), CONVERSATION);
    device.on_click(CHAT_LIST, Selector::text("Bob"), CONVERSATION);
}

pub fn chat_device() -> Arc<ScriptedDevice> {
    let device = chat_screens();
    standard_transitions(&device);
    device
}

pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        retry_attempts: 3,
        retry_backoff_ms: 10,
        poll_interval_ms: 10,
        action_timeout_ms: 1_000,
        ..Default::default()
    }
}

pub fn router_for(device: &Arc<ScriptedDevice>) -> Router {
    router_with(device, fast_settings())
}

pub fn router_with(device: &Arc<ScriptedDevice>, settings: EngineSettings) -> Router {
    let router = Router::with_settings(device.clone(), device.clone(), settings);
    let config = AutomationConfig::from_value(chat_package()).expect("valid package");
    let report = router.load_config(&config, false);
    assert!(report.is_clean(), "{report:?}");
    router
}

pub fn params(pairs: &[(&str, &str)]) -> Params {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v)))
        .collect()
}

static SERIAL: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Plans share one device lock per process; tests that time their runs take
/// this first so a neighbour test never holds that lock under them.
pub async fn serial() -> MutexGuard<'static, ()> {
    init_tracing();
    SERIAL.lock().await
}

/// `RUST_LOG=uiroute=debug cargo test` shows the engine's spans.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
