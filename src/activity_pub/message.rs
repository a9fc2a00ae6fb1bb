use anyhow::{Context, Result};
use minicbor::{Decode, Encode};

use crate::activity_pub::model::Verb;

/// Request details the front door captured with a delivery, kept for
/// signature verification.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub(crate) struct RequestContext {
    #[n(0)]
    pub(crate) method: String,
    /// Path and query as received
    #[n(1)]
    pub(crate) path: String,
    #[n(2)]
    pub(crate) headers: Vec<(String, String)>,
}

impl RequestContext {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A raw inbound delivery. Follow-ups produced by this instance carry no
/// request and skip signature verification.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub(crate) struct Envelope {
    #[n(0)]
    pub(crate) body: String,
    #[n(1)]
    pub(crate) request: Option<RequestContext>,
}

impl Envelope {
    pub(crate) fn unsigned(body: String) -> Envelope {
        Envelope {
            body,
            request: None,
        }
    }
}

/// A validated activity routed to one verb handler.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub(crate) struct VerbMessage {
    #[n(0)]
    pub(crate) verb: Verb,
    #[n(1)]
    pub(crate) actor: String,
    #[n(2)]
    pub(crate) payload: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub(crate) enum WrappingKind {
    #[n(0)]
    Announce,
    #[n(1)]
    Like,
    #[n(2)]
    Dislike,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub(crate) struct WrappingActivity {
    #[n(0)]
    pub(crate) kind: WrappingKind,
    #[n(1)]
    pub(crate) payload: String,
}

/// Objects to materialize before `wrapping` can be applied.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub(crate) struct ChainMessage {
    #[n(0)]
    pub(crate) objects: Vec<String>,
    #[n(1)]
    pub(crate) wrapping: Option<WrappingActivity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub(crate) enum QueueItem {
    #[n(0)]
    Delivery(#[n(0)] Envelope),
    #[n(1)]
    Verb(#[n(0)] VerbMessage),
    #[n(2)]
    Chain(#[n(0)] ChainMessage),
}

impl QueueItem {
    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>> {
        minicbor::to_vec(self).context("unable to encode queue item")
    }
    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<QueueItem> {
        minicbor::decode(bytes).context("unable to decode queue item")
    }
    pub(crate) fn label(&self) -> &'static str {
        match self {
            QueueItem::Delivery(_) => "delivery",
            QueueItem::Verb(_) => "verb",
            QueueItem::Chain(_) => "chain",
        }
    }
}
