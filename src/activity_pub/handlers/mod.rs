//! Verb handlers, one module per verb family.

mod ban;
mod content;
mod flag;
mod follow;
mod lock;
mod moderator;
mod vote;

use crate::activity_pub::InboxError;
use crate::activity_pub::model::Object;
use crate::activity_pub::repo::ActorRecord;

fn object_iri<'a>(activity: &'a Object<'_>) -> Result<&'a str, InboxError> {
    activity
        .get_node_iri("object")
        .ok_or_else(|| InboxError::Malformed("activity has no object".to_string()))
}

/// The activity a meta verb wraps. It must have been issued by the same
/// actor as the wrapper.
fn undone<'a>(activity: &'a Object<'_>, actor: &ActorRecord) -> Result<Object<'a>, InboxError> {
    let inner = activity
        .get_node_object("object")
        .ok_or_else(|| InboxError::Malformed("missing embedded activity".to_string()))?;
    if inner.actor_iri() != Some(actor.iri.as_str()) {
        return Err(InboxError::Unauthorized(format!(
            "{} cannot undo an activity of {}",
            actor.iri,
            inner.actor_iri().unwrap_or("nobody")
        )));
    }
    Ok(inner)
}
