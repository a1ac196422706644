//! Push payload rendering and notification click routing.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::security::sanitize;

pub const DEFAULT_TITLE: &str = "Focus ISEP";
pub const DEFAULT_BODY: &str = "Nouvelle notification Focus ISEP";
pub const DEFAULT_TAG: &str = "focus-isep-notification";
const ICON: &str = "/icons/icon-192x192.png";
const BADGE: &str = "/icons/badge-72x72.png";

/// Action that brings the site to the front.
pub const ACTION_OPEN: &str = "open";
pub const ACTION_CLOSE: &str = "close";

#[derive(Debug, Default, Deserialize)]
struct PushPayload {
    title: Option<String>,
    body: Option<String>,
    tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSpec {
    pub title: String,
    pub body: String,
    pub tag: String,
    pub icon: String,
    pub badge: String,
    pub require_interaction: bool,
    pub actions: Vec<NotificationAction>,
}

/// Render a push message. No payload means nothing to show; a payload that
/// is not the expected JSON falls back to the default text. Payload text is
/// HTML-escaped.
pub fn render_push(data: Option<&[u8]>) -> Option<NotificationSpec> {
    let data = data?;
    let payload = serde_json::from_slice::<PushPayload>(data).unwrap_or_else(|e| {
        debug!(error = %e, "Unreadable push payload, using defaults");
        PushPayload::default()
    });

    Some(NotificationSpec {
        title: payload
            .title
            .map(|t| sanitize(&t))
            .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        body: payload
            .body
            .map(|b| sanitize(&b))
            .unwrap_or_else(|| DEFAULT_BODY.to_string()),
        tag: payload.tag.unwrap_or_else(|| DEFAULT_TAG.to_string()),
        icon: ICON.to_string(),
        badge: BADGE.to_string(),
        require_interaction: true,
        actions: vec![
            NotificationAction {
                action: ACTION_OPEN.to_string(),
                title: "Ouvrir".to_string(),
            },
            NotificationAction {
                action: ACTION_CLOSE.to_string(),
                title: "Fermer".to_string(),
            },
        ],
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowAction {
    /// Focus the already-open window with this URL.
    Focus(String),
    Open(String),
}

/// What to do after a notification click. The notification itself is
/// always closed; only `open` touches windows.
pub fn notification_click(action: &str, open_windows: &[String]) -> Option<WindowAction> {
    if action != ACTION_OPEN {
        return None;
    }
    let root = open_windows.iter().find(|url| is_root_url(url));
    Some(match root {
        Some(url) => WindowAction::Focus(url.clone()),
        None => WindowAction::Open("/".to_string()),
    })
}

fn is_root_url(url: &str) -> bool {
    if url == "/" {
        return true;
    }
    reqwest::Url::parse(url)
        .map(|u| u.path() == "/" && u.query().is_none())
        .unwrap_or(false)
}
