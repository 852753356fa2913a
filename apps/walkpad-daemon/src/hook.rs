use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::state::DEFAULT_SESSION;

const FORWARD_TIMEOUT: Duration = Duration::from_secs(2);

/// Daemon route an assistant lifecycle event maps to, with the session it
/// belongs to. `None` for events that carry no signal.
pub fn classify(event: &Value) -> Option<(&'static str, String)> {
    let name = event.get("hook_event_name").and_then(Value::as_str)?;
    let path = match name {
        "SessionStart" | "PreToolUse" | "PostToolUse" | "Stop" => "/heartbeat",
        "SessionEnd" => "/session/end",
        "Notification"
            if event.get("notification_type").and_then(Value::as_str) == Some("idle_prompt") =>
        {
            "/session/end"
        }
        _ => return None,
    };
    let session = event
        .get("session_id")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_SESSION)
        .to_string();
    Some((path, session))
}

/// Reads one event from stdin and forwards it. Never fails: a missing
/// daemon must not slow down or break the assistant.
pub async fn run(base_url: &str) {
    let mut raw = Vec::new();
    if let Err(err) = tokio::io::stdin().read_to_end(&mut raw).await {
        debug!(error = %err, "could not read hook event");
    }
    let event = serde_json::from_slice::<Value>(&raw).unwrap_or_else(|_| json!({}));

    let Some((path, session)) = classify(&event) else {
        debug!("hook event ignored");
        return;
    };
    forward(base_url, path, &session).await;
}

async fn forward(base_url: &str, path: &str, session: &str) {
    let client = match reqwest::Client::builder().timeout(FORWARD_TIMEOUT).build() {
        Ok(client) => client,
        Err(err) => {
            debug!(error = %err, "could not build http client");
            return;
        }
    };
    let url = format!("{}{}", base_url.trim_end_matches('/'), path);
    match client
        .post(&url)
        .json(&json!({ "session": session }))
        .send()
        .await
    {
        Ok(response) => debug!(%url, status = %response.status(), "hook event forwarded"),
        Err(err) => debug!(%url, error = %err, "daemon unreachable; event dropped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(event: Value) -> Option<(&'static str, String)> {
        classify(&event)
    }

    #[test]
    fn activity_events_are_heartbeats() {
        for name in ["SessionStart", "PreToolUse", "PostToolUse", "Stop"] {
            assert_eq!(
                route(json!({"hook_event_name": name, "session_id": "s1"})),
                Some(("/heartbeat", "s1".to_string())),
                "{name}"
            );
        }
    }

    #[test]
    fn idle_prompt_and_session_end_wind_down() {
        assert_eq!(
            route(json!({
                "hook_event_name": "Notification",
                "notification_type": "idle_prompt",
                "session_id": "s2"
            })),
            Some(("/session/end", "s2".to_string()))
        );
        assert_eq!(
            route(json!({"hook_event_name": "SessionEnd"})),
            Some(("/session/end", "default".to_string()))
        );
    }

    #[test]
    fn other_events_send_nothing() {
        assert_eq!(
            route(json!({"hook_event_name": "Notification", "notification_type": "permission"})),
            None
        );
        assert_eq!(route(json!({"hook_event_name": "UserPromptSubmit"})), None);
        assert_eq!(route(json!({})), None);
        assert_eq!(route(json!([1, 2, 3])), None);
    }

    #[tokio::test]
    async fn unreachable_daemon_is_swallowed() {
        // Port 9 on loopback is almost never listening.
        forward("http://127.0.0.1:9", "/heartbeat", "s1").await;
    }
}
