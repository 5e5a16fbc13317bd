use serde::Serialize;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, OnceLock};
use tokio::sync::broadcast;

use crate::modules::system::logger;

const EVENT_BUS_CAPACITY: usize = 32;

/// Login lifecycle events. Fanned out twice on purpose: once over the
/// broadcast bus (async consumers) and once through registered listeners
/// (the synchronous CustomEvent-style hook), so decoupled UI pieces can
/// react without importing the auth module.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthEvent {
    LoginSucceeded { user: Option<Value> },
    LoginFailed { error: String },
}

type Listener = Box<dyn Fn(&AuthEvent) + Send + Sync>;

static EVENT_BUS: OnceLock<broadcast::Sender<AuthEvent>> = OnceLock::new();
static LISTENERS: OnceLock<Mutex<Vec<Listener>>> = OnceLock::new();

fn get_event_bus() -> &'static broadcast::Sender<AuthEvent> {
    EVENT_BUS.get_or_init(|| broadcast::channel(EVENT_BUS_CAPACITY).0)
}

fn get_listeners() -> &'static Mutex<Vec<Listener>> {
    LISTENERS.get_or_init(|| Mutex::new(Vec::new()))
}

pub fn subscribe() -> broadcast::Receiver<AuthEvent> {
    get_event_bus().subscribe()
}

pub fn add_listener<F>(listener: F)
where
    F: Fn(&AuthEvent) + Send + Sync + 'static,
{
    if let Ok(mut listeners) = get_listeners().lock() {
        listeners.push(Box::new(listener));
    }
}

/// Delivers `event` to both channels. A send with no bus subscribers is not
/// an error; a panicking listener is logged and skipped so it cannot take
/// the emitting flow down with it.
pub fn emit(event: AuthEvent) {
    let _ = get_event_bus().send(event.clone());
    if let Ok(listeners) = get_listeners().lock() {
        for listener in listeners.iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                logger::log_warn("[W-EVENT-LISTENER-PANIC] auth_event_listener_panicked");
            }
        }
    }
}
