use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{self, HeaderValue};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::activity_pub::InboxError;

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
const APPLICATION_LD_JSON: HeaderValue = HeaderValue::from_static(
    "application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"",
);

/// Outbound HTTP: fetching remote objects and posting responses to inboxes.
pub(crate) trait Mailman: Clone + Send + Sync + 'static {
    fn fetch(&self, iri: &str) -> impl Future<Output = Result<Value>> + Send;
    fn post(&self, inbox: &str, activity: &Value) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Clone)]
pub(crate) struct HttpMailman {
    client: Client,
}

impl HttpMailman {
    pub(crate) fn new(timeout: Duration) -> Result<HttpMailman> {
        let client = Client::builder()
            .http1_only()
            .user_agent(APP_USER_AGENT)
            .gzip(true)
            .timeout(timeout)
            .build()
            .context("unable to build http client")?;
        Ok(HttpMailman { client })
    }
}

fn classify_status(iri: &str, status: StatusCode) -> InboxError {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => InboxError::Gone(iri.to_string()),
        status if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS => {
            InboxError::Transient(format!("{iri} answered {status}"))
        }
        status => InboxError::Malformed(format!("{iri} answered {status}")),
    }
}

fn transport(iri: &str, error: reqwest::Error) -> InboxError {
    InboxError::Transient(format!("request to {iri} failed: {error}"))
}

impl Mailman for HttpMailman {
    async fn fetch(&self, iri: &str) -> Result<Value> {
        debug!(target: "resolver", iri, "fetch");
        let response = self
            .client
            .get(iri)
            .header(header::ACCEPT, APPLICATION_LD_JSON)
            .send()
            .await
            .map_err(|e| transport(iri, e))?;
        if !response.status().is_success() {
            return Err(classify_status(iri, response.status()).into());
        }
        let value = response
            .json()
            .await
            .map_err(|e| InboxError::Malformed(format!("{iri} is not json: {e}")))?;
        Ok(value)
    }
    async fn post(&self, inbox: &str, activity: &Value) -> Result<()> {
        debug!(target: "inbox", inbox, "post");
        let response = self
            .client
            .post(inbox)
            .header(header::CONTENT_TYPE, APPLICATION_LD_JSON)
            .body(activity.to_string())
            .send()
            .await
            .map_err(|e| transport(inbox, e))?;
        if response.error_for_status_ref().is_err() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(inbox, status))
                .with_context(|| format!("posting to {inbox} failed: {text}"));
        }
        Ok(())
    }
}
