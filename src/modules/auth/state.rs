use rand::{distributions::Alphanumeric, Rng};

use crate::constants::{
    SESSION_BASE_STATE_KEY, SESSION_STATE_KEY, STATE_PREFIX, STATE_SUFFIX_LEN,
};
use crate::modules::persistence::KeyValueStore;
use crate::modules::system::logger;

/// Fresh CSRF state token: fixed prefix + random alphanumeric suffix.
/// `thread_rng` is a CSPRNG, so the token is not guessable.
pub fn generate_state() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(STATE_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{}{}", STATE_PREFIX, suffix)
}

/// Persists the pending state and its post-prefix remainder. At most one
/// state is pending per session store; replacing a live one is legal (the
/// newest attempt wins) but worth a warning in the logs.
pub fn store_state(store: &dyn KeyValueStore, state: &str) -> Result<(), String> {
    if let Ok(Some(previous)) = store.get(SESSION_STATE_KEY) {
        if previous != state {
            logger::log_warn(&format!(
                "[W-AUTH-STATE-REPLACED] replacing_pending_oauth_state: {}",
                previous
            ));
        }
    }
    let base = state.strip_prefix(STATE_PREFIX).unwrap_or(state);
    store.set(SESSION_STATE_KEY, state)?;
    store.set(SESSION_BASE_STATE_KEY, base)
}

struct MatchRule {
    name: &'static str,
    matches: fn(received: &str, stored: &str, base: &str) -> bool,
}

fn rule_exact(received: &str, stored: &str, _base: &str) -> bool {
    received == stored
}

fn rule_stored_substring(received: &str, stored: &str, _base: &str) -> bool {
    received.contains(stored)
}

fn rule_doubled_prefix(received: &str, _stored: &str, base: &str) -> bool {
    !base.is_empty() && received.contains(&format!("{}{}{}", STATE_PREFIX, STATE_PREFIX, base))
}

fn rule_prefix_stripped(received: &str, stored: &str, _base: &str) -> bool {
    stored
        .strip_prefix(STATE_PREFIX)
        .map(|stripped| !stripped.is_empty() && received.contains(stripped))
        .unwrap_or(false)
}

// Order is the contract: the exact check must run before any tolerant rule.
// Rules 2-4 absorb the state mutations the backend has been observed to
// apply when echoing the value; see DESIGN.md before tightening them.
const MATCH_RULES: &[MatchRule] = &[
    MatchRule {
        name: "exact",
        matches: rule_exact,
    },
    MatchRule {
        name: "stored_substring",
        matches: rule_stored_substring,
    },
    MatchRule {
        name: "doubled_prefix",
        matches: rule_doubled_prefix,
    },
    MatchRule {
        name: "prefix_stripped",
        matches: rule_prefix_stripped,
    },
];

fn match_rule(received: &str, stored: &str, base: &str) -> Option<&'static str> {
    MATCH_RULES
        .iter()
        .find(|rule| (rule.matches)(received, stored, base))
        .map(|rule| rule.name)
}

/// Checks `received` against the pending state. On a match both session keys
/// are cleared (compare-and-remove, so a concurrent newer attempt is left
/// alone) and the matching rule is logged. On a mismatch nothing is cleared,
/// leaving the pending state available for a retry.
pub fn validate_state(store: &dyn KeyValueStore, received: &str) -> bool {
    let stored = match store.get(SESSION_STATE_KEY) {
        Ok(Some(s)) => s,
        _ => {
            logger::log_warn("[W-AUTH-STATE-MISSING] state_validation_without_pending_state");
            return false;
        }
    };
    let base = store
        .get(SESSION_BASE_STATE_KEY)
        .ok()
        .flatten()
        .unwrap_or_else(|| {
            stored
                .strip_prefix(STATE_PREFIX)
                .unwrap_or(stored.as_str())
                .to_string()
        });

    match match_rule(received, &stored, &base) {
        Some(rule_name) => {
            logger::log_info(&format!("State validated via rule: {}", rule_name));
            if let Err(e) = store.compare_and_remove(SESSION_STATE_KEY, &stored) {
                logger::log_warn(&format!("[W-AUTH-STATE-CLEAR] failed_to_clear_state: {}", e));
            }
            if let Err(e) = store.compare_and_remove(SESSION_BASE_STATE_KEY, &base) {
                logger::log_warn(&format!(
                    "[W-AUTH-STATE-CLEAR] failed_to_clear_base_state: {}",
                    e
                ));
            }
            true
        }
        None => {
            logger::log_warn(&format!(
                "[W-AUTH-STATE-MISMATCH] state_validation_failed received={} stored={}",
                received, stored
            ));
            false
        }
    }
}

/// Terminal-failure cleanup: drops the pending state only if it is still the
/// one this attempt created.
pub fn clear_state(store: &dyn KeyValueStore, expected_state: &str) {
    let base = expected_state
        .strip_prefix(STATE_PREFIX)
        .unwrap_or(expected_state);
    let _ = store.compare_and_remove(SESSION_STATE_KEY, expected_state);
    let _ = store.compare_and_remove(SESSION_BASE_STATE_KEY, base);
}
