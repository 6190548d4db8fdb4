//! Git host webhooks that trigger module imports.

mod payload;
mod signature;

pub use payload::{WebhookEvent, parse_bitbucket, parse_github};
pub use signature::{sign, verify_signature};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::module::{Importer, TagFailure};
use crate::types::ModuleProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookHost {
    Github,
    Bitbucket,
    Gitlab,
}

impl WebhookHost {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "github" => Some(Self::Github),
            "bitbucket" => Some(Self::Bitbucket),
            "gitlab" => Some(Self::Gitlab),
            _ => None,
        }
    }
}

/// One inbound delivery, already size-limited by the HTTP layer.
#[derive(Debug, Clone, Copy)]
pub struct WebhookDelivery<'a> {
    pub host: WebhookHost,
    pub event_type: Option<&'a str>,
    pub signature: Option<&'a str>,
    pub body: &'a [u8],
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub imported: Vec<String>,
    pub failed: Vec<TagFailure>,
    pub imported_count: usize,
    pub failed_count: usize,
}

impl WebhookResponse {
    fn ignored(reason: String) -> Self {
        Self {
            status: "ignored",
            message: Some(reason),
            imported: Vec::new(),
            failed: Vec::new(),
            imported_count: 0,
            failed_count: 0,
        }
    }
}

/// Verifies, parses and imports one delivery for `module_provider`.
pub async fn dispatch(
    importer: &Importer,
    upload_api_keys: &[String],
    module_provider: &ModuleProvider,
    delivery: WebhookDelivery<'_>,
) -> Result<WebhookResponse> {
    let event = match delivery.host {
        WebhookHost::Gitlab => {
            return Err(Error::NotImplemented(
                "GitLab webhooks are not supported".to_string(),
            ));
        }
        WebhookHost::Github => {
            verify_signature(upload_api_keys, delivery.body, delivery.signature)?;
            parse_github(delivery.event_type, delivery.body)?
        }
        WebhookHost::Bitbucket => {
            verify_signature(upload_api_keys, delivery.body, delivery.signature)?;
            parse_bitbucket(delivery.body)?
        }
    };

    let tags = match event {
        WebhookEvent::Tags(tags) => tags,
        WebhookEvent::Ignored(reason) => {
            tracing::info!("Ignoring webhook for {}: {}", module_provider.address(), reason);
            return Ok(WebhookResponse::ignored(reason));
        }
    };

    tracing::info!(
        "Webhook for {} requests tags {:?}",
        module_provider.address(),
        tags
    );
    let summary = importer.import_git_tags(module_provider, &tags).await?;
    Ok(WebhookResponse {
        status: "processed",
        message: None,
        imported_count: summary.imported.len(),
        failed_count: summary.failed.len(),
        imported: summary.imported,
        failed: summary.failed,
    })
}
