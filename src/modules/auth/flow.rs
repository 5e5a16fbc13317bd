use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use url::Url;

use crate::error::{AppResult, AuthError};
use crate::models::{AppConfig, LoginOutcome, PrepareResponse};
use crate::modules::auth::popup::{PopupConnector, PopupSession};
use crate::modules::auth::{callback, post_backend_json, state, tokens};
use crate::modules::events::{self, AuthEvent};
use crate::modules::persistence::KeyValueStore;
use crate::modules::system::device;
use crate::modules::system::logger;
use crate::modules::system::request_context::{self, FlowContext};

static FLOW_STATUS: OnceLock<Mutex<FlowStatusSnapshot>> = OnceLock::new();
static FLOW_HISTORY: OnceLock<Mutex<Vec<FlowStatusEvent>>> = OnceLock::new();
static FLOW_COUNTERS: OnceLock<Mutex<FlowCounters>> = OnceLock::new();

const FLOW_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FlowPhase {
    Idle,
    Preparing,
    PopupOpen,
    Succeeded,
    Failed,
    TimedOut,
    ClosedByUser,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowStatusSnapshot {
    pub phase: FlowPhase,
    pub detail: Option<String>,
    pub user_email: Option<String>,
    pub updated_at_unix: i64,
    pub recent_events: Vec<FlowStatusEvent>,
    pub counters: FlowCounters,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowStatusEvent {
    pub phase: FlowPhase,
    pub detail: Option<String>,
    pub updated_at_unix: i64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct FlowCounters {
    pub preparing_total: u64,
    pub popup_open_total: u64,
    pub succeeded_total: u64,
    pub closed_by_user_total: u64,
    pub timed_out_total: u64,
    pub failed_total: u64,
    pub failed_by_code: HashMap<String, u64>,
}

impl FlowStatusSnapshot {
    fn idle() -> Self {
        Self {
            phase: FlowPhase::Idle,
            detail: None,
            user_email: None,
            updated_at_unix: chrono::Utc::now().timestamp(),
            recent_events: Vec::new(),
            counters: FlowCounters::default(),
        }
    }
}

fn get_flow_status_state() -> &'static Mutex<FlowStatusSnapshot> {
    FLOW_STATUS.get_or_init(|| Mutex::new(FlowStatusSnapshot::idle()))
}

fn get_flow_history_state() -> &'static Mutex<Vec<FlowStatusEvent>> {
    FLOW_HISTORY.get_or_init(|| Mutex::new(Vec::new()))
}

fn get_flow_counters_state() -> &'static Mutex<FlowCounters> {
    FLOW_COUNTERS.get_or_init(|| Mutex::new(FlowCounters::default()))
}

fn classify_failure_code(detail: Option<&str>) -> String {
    let value = detail.unwrap_or_default();
    if value.contains("Prepare failed") {
        "auth.prepare_failed".to_string()
    } else if value.contains("Popup blocked") {
        "auth.popup_blocked".to_string()
    } else if value.contains("CSRF state validation") {
        "auth.state_mismatch".to_string()
    } else if value.contains("parameters missing") {
        "auth.missing_parameters".to_string()
    } else if value.contains("Token exchange failed") {
        "auth.exchange_failed".to_string()
    } else if value.contains("Storage error") {
        "auth.storage_failed".to_string()
    } else if value.contains("Network error") {
        "auth.network_failed".to_string()
    } else {
        "auth.unknown_failure".to_string()
    }
}

fn update_flow_counters(phase: &FlowPhase, detail: Option<&str>) {
    if let Ok(mut counters) = get_flow_counters_state().lock() {
        match phase {
            FlowPhase::Preparing => counters.preparing_total += 1,
            FlowPhase::PopupOpen => counters.popup_open_total += 1,
            FlowPhase::Succeeded => counters.succeeded_total += 1,
            FlowPhase::ClosedByUser => counters.closed_by_user_total += 1,
            FlowPhase::TimedOut => counters.timed_out_total += 1,
            FlowPhase::Failed => {
                counters.failed_total += 1;
                let code = classify_failure_code(detail);
                let entry = counters.failed_by_code.entry(code).or_insert(0);
                *entry += 1;
            }
            FlowPhase::Idle => {}
        }
    }
}

fn set_flow_status(phase: FlowPhase, detail: Option<String>, user_email: Option<String>) {
    let updated_at_unix = chrono::Utc::now().timestamp();
    update_flow_counters(&phase, detail.as_deref());
    if let Ok(mut history) = get_flow_history_state().lock() {
        history.push(FlowStatusEvent {
            phase: phase.clone(),
            detail: detail.clone(),
            updated_at_unix,
        });
        if history.len() > FLOW_HISTORY_LIMIT {
            let drain = history.len() - FLOW_HISTORY_LIMIT;
            history.drain(0..drain);
        }
    }
    if let Ok(mut status) = get_flow_status_state().lock() {
        *status = FlowStatusSnapshot {
            phase,
            detail,
            user_email,
            updated_at_unix,
            recent_events: Vec::new(),
            counters: FlowCounters::default(),
        };
    }
}

pub fn get_flow_status() -> FlowStatusSnapshot {
    let mut snapshot = get_flow_status_state()
        .lock()
        .map(|s| s.clone())
        .unwrap_or_else(|_| FlowStatusSnapshot::idle());
    if let Ok(history) = get_flow_history_state().lock() {
        snapshot.recent_events = history.clone();
    }
    if let Ok(counters) = get_flow_counters_state().lock() {
        snapshot.counters = counters.clone();
    }
    snapshot
}

#[cfg(test)]
pub fn reset_flow_observability_for_tests() {
    if let Ok(mut status) = get_flow_status_state().lock() {
        *status = FlowStatusSnapshot::idle();
    }
    if let Ok(mut history) = get_flow_history_state().lock() {
        history.clear();
    }
    if let Ok(mut counters) = get_flow_counters_state().lock() {
        *counters = FlowCounters::default();
    }
}

/// How one completion race settled. A window closed by the user is a
/// neutral completion, not an error.
#[derive(Debug)]
pub enum SigninCompletion {
    Succeeded(Value),
    ClosedByUser,
}

enum SigninResult {
    Completed(Option<Value>),
    Cancelled,
}

/// Everything one sign-in attempt needs, injected so tests can swap the
/// stores and the popup port for fakes.
pub struct SigninContext<'a> {
    pub config: &'a AppConfig,
    pub session: &'a dyn KeyValueStore,
    pub vault: &'a dyn KeyValueStore,
    pub connector: &'a dyn PopupConnector,
}

fn build_prepare_request(config: &AppConfig, state: &str) -> Value {
    let device_info = device::device_info();
    json!({
        "params": {
            "client_id": config.client_id,
            "redirect_uri": config.redirect_uri(),
            "response_type": "code",
            "scope": config.oauth_scope,
            "state": state,
            "locale": device_info.language.clone(),
            "screen_width": config.popup.width,
            "screen_height": config.popup.height,
        },
        "deviceInfo": device_info,
    })
}

/// Asks the backend for the provider authorization URL, seeded with the
/// already-stored state.
async fn prepare_signin(config: &AppConfig, state_value: &str) -> AppResult<String> {
    let body = build_prepare_request(config, state_value);
    let response = post_backend_json(config, crate::constants::PREPARE_ENDPOINT, &body, false)
        .await
        .map_err(AuthError::Prepare)?;

    let prepared: PrepareResponse = serde_json::from_value(response)
        .map_err(|e| AuthError::Prepare(format!("prepare_response_malformed: {}", e)))?;
    match prepared.auth_url {
        Some(auth_url) if !auth_url.trim().is_empty() => Ok(auth_url),
        _ => Err(AuthError::Prepare(
            "auth_url_missing_in_prepare_response".to_string(),
        )),
    }
}

fn normalize_origin(value: &str) -> Option<String> {
    Url::parse(value).ok().map(|u| u.origin().ascii_serialization())
}

pub(crate) fn allowed_origins(config: &AppConfig) -> Vec<String> {
    let mut origins = Vec::new();
    for candidate in [&config.backend_base_url, &config.app_origin] {
        if let Some(origin) = normalize_origin(candidate) {
            if !origins.contains(&origin) {
                origins.push(origin);
            }
        }
    }
    origins
}

fn origin_allowed(origin: &str, allowed: &[String]) -> bool {
    normalize_origin(origin)
        .map(|o| allowed.contains(&o))
        .unwrap_or(false)
}

/// The completion race: a close-detection poll, the popup message stream,
/// and the hard timeout run concurrently and settle the attempt exactly
/// once. Teardown happens in one place after the race, never per-arm.
pub(crate) async fn await_completion(
    mut session: PopupSession,
    allowed: &[String],
    timeout: Duration,
    poll_interval: Duration,
) -> AppResult<SigninCompletion> {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut poll = tokio::time::interval(poll_interval);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut channel_open = true;

    let outcome = loop {
        tokio::select! {
            biased;
            _ = &mut deadline => {
                logger::log_warn("[W-AUTH-TIMEOUT] signin_timed_out_forcing_popup_closed");
                break Err(AuthError::Timeout(timeout.as_secs()));
            }
            msg = session.messages.recv(), if channel_open => {
                match msg {
                    Some(msg) => {
                        if !origin_allowed(&msg.origin, allowed) {
                            logger::log_warn(&format!(
                                "[W-AUTH-MESSAGE-ORIGIN] ignoring_message_from_unexpected_origin: {}",
                                msg.origin
                            ));
                            continue;
                        }
                        let msg_type = msg
                            .payload
                            .get("type")
                            .and_then(Value::as_str)
                            .map(|s| s.to_string());
                        match msg_type.as_deref() {
                            Some("oauth_success") => {
                                break Ok(SigninCompletion::Succeeded(msg.payload));
                            }
                            Some("oauth_error") => {
                                let error = msg
                                    .payload
                                    .get("error")
                                    .and_then(Value::as_str)
                                    .unwrap_or("unknown_oauth_error")
                                    .to_string();
                                break Err(AuthError::Exchange(error));
                            }
                            other => {
                                logger::log_warn(&format!(
                                    "[W-AUTH-MESSAGE-TYPE] ignoring_message_with_unexpected_type: {:?}",
                                    other
                                ));
                                continue;
                            }
                        }
                    }
                    None => {
                        channel_open = false;
                        continue;
                    }
                }
            }
            _ = poll.tick() => {
                if session.window.is_closed() {
                    break Ok(SigninCompletion::ClosedByUser);
                }
            }
        }
    };

    if !session.window.is_closed() {
        session.window.close();
    }
    session.messages.close();
    outcome
}

async fn run_signin(ctx: &SigninContext<'_>) -> AppResult<SigninResult> {
    let state_value = state::generate_state();
    state::store_state(ctx.session, &state_value).map_err(AuthError::Storage)?;
    let result = run_signin_with_state(ctx, &state_value).await;
    // The attempt is terminal either way; drop the pending state unless a
    // newer attempt already replaced it (validation may have cleared it).
    state::clear_state(ctx.session, &state_value);
    result
}

async fn run_signin_with_state(
    ctx: &SigninContext<'_>,
    state_value: &str,
) -> AppResult<SigninResult> {
    let auth_url = prepare_signin(ctx.config, state_value).await?;

    let popup_session = ctx
        .connector
        .open(&auth_url, &ctx.config.popup)
        .map_err(AuthError::PopupBlocked)?;
    set_flow_status(
        FlowPhase::PopupOpen,
        Some("authorization_window_opened".to_string()),
        None,
    );

    let allowed = allowed_origins(ctx.config);
    let completion = await_completion(
        popup_session,
        &allowed,
        ctx.config.popup.timeout(),
        ctx.config.popup.poll_interval(),
    )
    .await;

    match completion {
        Ok(SigninCompletion::ClosedByUser) => Ok(SigninResult::Cancelled),
        Ok(SigninCompletion::Succeeded(payload)) => {
            let callback_url = payload
                .get("callbackUrl")
                .and_then(Value::as_str)
                .map(|s| s.to_string());
            let response = match callback_url {
                Some(callback_url) => {
                    callback::handle_oauth_callback(ctx.config, ctx.session, &callback_url).await?
                }
                // The popup already ran the exchange; its payload is the
                // backend response shape.
                None => payload,
            };
            let user = tokens::finish_login(ctx.vault, &response)?;
            Ok(SigninResult::Completed(user))
        }
        Err(e) => Err(e),
    }
}

/// Runs one complete sign-in attempt. Every failure is folded into the
/// returned [`LoginOutcome`] and mirrored onto the event bus; nothing is
/// thrown at UI-facing callers.
pub async fn sign_in(ctx: &SigninContext<'_>) -> LoginOutcome {
    request_context::with_flow_context(FlowContext::for_attempt(), sign_in_inner(ctx)).await
}

async fn sign_in_inner(ctx: &SigninContext<'_>) -> LoginOutcome {
    set_flow_status(
        FlowPhase::Preparing,
        Some("signin_prepare_started".to_string()),
        None,
    );
    match run_signin(ctx).await {
        Ok(SigninResult::Completed(user)) => {
            let email = user
                .as_ref()
                .and_then(|u| u.get("email"))
                .and_then(Value::as_str)
                .map(|s| s.to_string());
            set_flow_status(
                FlowPhase::Succeeded,
                Some("signin_completed".to_string()),
                email,
            );
            events::emit(AuthEvent::LoginSucceeded { user: user.clone() });
            LoginOutcome::ok(user)
        }
        Ok(SigninResult::Cancelled) => {
            logger::log_info("Sign-in window closed by the user");
            set_flow_status(
                FlowPhase::ClosedByUser,
                Some("popup_closed_by_user".to_string()),
                None,
            );
            LoginOutcome::cancelled()
        }
        Err(e) => {
            let phase = if matches!(e, AuthError::Timeout(_)) {
                FlowPhase::TimedOut
            } else {
                FlowPhase::Failed
            };
            logger::log_error(&format!("[E-AUTH-SIGNIN] signin_failed: {}", e));
            set_flow_status(phase, Some(e.to_string()), None);
            events::emit(AuthEvent::LoginFailed {
                error: e.to_string(),
            });
            LoginOutcome::failure(e)
        }
    }
}
