use serde::Deserialize;

use crate::error::{Error, Result};

/// What a webhook delivery asks the registry to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    /// Tags to import, in payload order.
    Tags(Vec<String>),
    Ignored(String),
}

fn invalid_payload(e: serde_json::Error) -> Error {
    Error::bad_request(format!("Invalid webhook payload: {e}"))
}

#[derive(Debug, Deserialize)]
struct GithubRelease {
    tag_name: String,
}

#[derive(Debug, Deserialize)]
struct GithubPayload {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    release: Option<GithubRelease>,
}

/// GitHub: only `release` events with action `published` or `created` import.
pub fn parse_github(event_type: Option<&str>, body: &[u8]) -> Result<WebhookEvent> {
    if let Some(event) = event_type {
        if event == "ping" {
            return Ok(WebhookEvent::Ignored("ping".to_string()));
        }
        if event != "release" {
            return Ok(WebhookEvent::Ignored(format!("event '{event}' is not handled")));
        }
    }

    let payload: GithubPayload = serde_json::from_slice(body).map_err(invalid_payload)?;
    let action = payload.action.unwrap_or_default();
    if action != "published" && action != "created" {
        return Ok(WebhookEvent::Ignored(format!("release action '{action}' is not handled")));
    }
    let release = payload
        .release
        .ok_or_else(|| Error::bad_request("Release event is missing the release object"))?;
    Ok(WebhookEvent::Tags(vec![release.tag_name]))
}

#[derive(Debug, Default, Deserialize)]
struct CloudRef {
    #[serde(rename = "type", default)]
    ref_type: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CloudChange {
    #[serde(default)]
    new: Option<CloudRef>,
}

#[derive(Debug, Deserialize)]
struct CloudPush {
    #[serde(default)]
    changes: Vec<CloudChange>,
}

#[derive(Debug, Deserialize)]
struct ServerRef {
    #[serde(default, rename = "displayId")]
    display_id: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default)]
    ref_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServerChange {
    #[serde(rename = "ref")]
    reference: ServerRef,
    #[serde(rename = "type", default)]
    change_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BitbucketPayload {
    #[serde(default)]
    push: Option<CloudPush>,
    #[serde(default)]
    changes: Option<Vec<ServerChange>>,
}

/// Bitbucket Cloud (`push.changes`) and Bitbucket Server (`changes`) pushes.
/// Tag creations and updates import; deletions are ignored.
pub fn parse_bitbucket(body: &[u8]) -> Result<WebhookEvent> {
    let payload: BitbucketPayload = serde_json::from_slice(body).map_err(invalid_payload)?;
    let mut tags = Vec::new();

    if let Some(push) = payload.push {
        for change in push.changes {
            let Some(new) = change.new else {
                continue;
            };
            if new.ref_type.as_deref().is_some_and(|t| t.eq_ignore_ascii_case("tag")) {
                if let Some(name) = new.name {
                    tags.push(name);
                }
            }
        }
    }

    for change in payload.changes.unwrap_or_default() {
        let is_tag = change
            .reference
            .ref_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case("tag"));
        let adds = matches!(change.change_type.as_deref(), Some("ADD" | "UPDATE"));
        if !is_tag || !adds {
            continue;
        }
        let name = change.reference.display_id.or_else(|| {
            change
                .reference
                .id
                .map(|id| id.trim_start_matches("refs/tags/").to_string())
        });
        if let Some(name) = name {
            tags.push(name);
        }
    }

    if tags.is_empty() {
        return Ok(WebhookEvent::Ignored("push contains no new tags".to_string()));
    }
    Ok(WebhookEvent::Tags(tags))
}
