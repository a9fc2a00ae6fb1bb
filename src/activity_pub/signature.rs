use anyhow::Result;
use tracing::{debug, info};

use crate::activity_pub::InboxError;
use crate::activity_pub::hs2019::HttpSignature;
use crate::activity_pub::inbox::{Inbox, now};
use crate::activity_pub::mailman::Mailman;
use crate::activity_pub::message::RequestContext;
use crate::activity_pub::model::Object;
use crate::activity_pub::repo::ActorRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ValidationOutcome {
    /// Signed by the activity's own actor
    Valid,
    /// No request attached, produced by this instance
    Skipped,
    /// Relayed by a third party; `origin` must be fetched from its source
    Forwarded { origin: String },
}

impl<M: Mailman> Inbox<M> {
    pub(crate) async fn validate_signature(
        &self,
        request: Option<&RequestContext>,
        body: &[u8],
        activity: &Object<'_>,
    ) -> Result<ValidationOutcome> {
        let Some(request) = request else {
            return Ok(ValidationOutcome::Skipped);
        };
        let signature = HttpSignature::from_request(request)?;
        signature.check_expiry(now())?;
        let message = signature.signing_string(request, body)?;

        let signer = self.resolve_actor(signature.signer()).await?;
        if !verify_with(&signer, &signature, &message)? {
            // the key may have been rotated since the actor was cached
            let age = now() - signer.last_origin_update;
            if age < self.config.key_refresh_cooldown_secs as i64 {
                return Err(invalid(&signer).into());
            }
            debug!(target: "sig", signer = signer.iri, "verification failed, refreshing key");
            let signer = self.refresh_actor(&signer).await?;
            if !verify_with(&signer, &signature, &message)? {
                return Err(invalid(&signer).into());
            }
        }

        if activity.actor_iri() == Some(signer.iri.as_str()) {
            return Ok(ValidationOutcome::Valid);
        }
        let origin = activity
            .id()
            .ok_or_else(|| InboxError::Malformed("forwarded activity has no id".to_string()))?;
        info!(target: "sig", signer = signer.iri, origin, "forwarded delivery");
        Ok(ValidationOutcome::Forwarded {
            origin: origin.to_string(),
        })
    }
}

fn verify_with(signer: &ActorRecord, signature: &HttpSignature, message: &str) -> Result<bool> {
    match &signer.public_key_pem {
        Some(pem) => signature.verify(pem, message),
        None => Ok(false),
    }
}

fn invalid(signer: &ActorRecord) -> InboxError {
    InboxError::InvalidSignature(format!("signature does not match the key of {}", signer.iri))
}
