use minicbor::{Decode, Encode};

use crate::activity_pub::InboxError;

use super::Object;

/// Every activity shape the inbox acts on. Meta verbs (`Undo`, `Accept`,
/// `Reject`) are resolved to the verb of the object they wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub(crate) enum Verb {
    #[n(0)]
    Follow,
    #[n(1)]
    AcceptFollow,
    #[n(2)]
    RejectFollow,
    #[n(3)]
    UndoFollow,
    #[n(4)]
    Like,
    #[n(5)]
    Dislike,
    /// `Undo` of a Like, Dislike or Announce
    #[n(6)]
    UndoVote,
    #[n(7)]
    Create,
    #[n(8)]
    Update,
    #[n(9)]
    Delete,
    #[n(10)]
    Announce,
    #[n(11)]
    AddModerator,
    #[n(12)]
    RemoveModerator,
    #[n(13)]
    Block,
    #[n(14)]
    UndoBlock,
    #[n(15)]
    Lock,
    #[n(16)]
    UndoLock,
    #[n(17)]
    Flag,
}

impl Verb {
    /// Classify an activity whose meta-verb object, if any, is embedded.
    pub(crate) fn classify(activity: &Object) -> Result<Verb, InboxError> {
        let ty = activity
            .get_first_type()
            .ok_or_else(|| InboxError::Malformed("activity has no type".to_string()))?;
        let verb = match ty {
            "Follow" => Verb::Follow,
            "Like" => Verb::Like,
            "Dislike" => Verb::Dislike,
            "Create" => Verb::Create,
            "Update" => Verb::Update,
            "Delete" => Verb::Delete,
            "Announce" => Verb::Announce,
            "Block" => Verb::Block,
            "Lock" => Verb::Lock,
            "Flag" => Verb::Flag,
            "Add" | "Remove" => {
                let target = activity.get_node_iri("target").unwrap_or_default();
                if !target.trim_end_matches('/').ends_with("/moderators") {
                    return Err(InboxError::Unsupported(format!(
                        "{ty} with target {target:?}"
                    )));
                }
                if ty == "Add" {
                    Verb::AddModerator
                } else {
                    Verb::RemoveModerator
                }
            }
            "Undo" | "Accept" | "Reject" => {
                let inner = activity.get_node_object("object").ok_or_else(|| {
                    InboxError::Malformed(format!("{ty} must embed the object it refers to"))
                })?;
                let inner_ty = inner.get_first_type().unwrap_or_default();
                match (ty, inner_ty) {
                    ("Undo", "Follow") => Verb::UndoFollow,
                    ("Undo", "Like" | "Dislike" | "Announce") => Verb::UndoVote,
                    ("Undo", "Block") => Verb::UndoBlock,
                    ("Undo", "Lock") => Verb::UndoLock,
                    ("Accept", "Follow") => Verb::AcceptFollow,
                    ("Reject", "Follow") => Verb::RejectFollow,
                    _ => {
                        return Err(InboxError::Unsupported(format!("{ty}({inner_ty})")));
                    }
                }
            }
            other => return Err(InboxError::Unsupported(other.to_string())),
        };
        Ok(verb)
    }

    pub(crate) fn is_meta(activity: &Object) -> bool {
        ["Undo", "Accept", "Reject"]
            .iter()
            .any(|ty| activity.type_is(ty))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::activity_pub::InboxError;
    use crate::activity_pub::model::Object;

    use super::Verb;

    fn classify(value: serde_json::Value) -> Result<Verb, InboxError> {
        Verb::classify(&Object::from(value))
    }

    #[test]
    fn plain_verbs() {
        assert_eq!(classify(json!({"type": "Like"})).unwrap(), Verb::Like);
        assert_eq!(classify(json!({"type": "Flag"})).unwrap(), Verb::Flag);
        assert_eq!(classify(json!({"type": "Lock"})).unwrap(), Verb::Lock);
    }

    #[test]
    fn meta_verbs_unwrap_their_object() {
        let undo_like = json!({
            "type": "Undo",
            "object": {"type": "Dislike", "object": "https://a.example/post/1"}
        });
        assert_eq!(classify(undo_like).unwrap(), Verb::UndoVote);
        let accept = json!({"type": "Accept", "object": {"type": "Follow"}});
        assert_eq!(classify(accept).unwrap(), Verb::AcceptFollow);
        let undo_block = json!({"type": "Undo", "object": {"type": "Block"}});
        assert_eq!(classify(undo_block).unwrap(), Verb::UndoBlock);
    }

    #[test]
    fn meta_verb_without_embedded_object() {
        let undo = json!({"type": "Undo", "object": "https://a.example/like/1"});
        assert!(matches!(classify(undo), Err(InboxError::Malformed(_))));
    }

    #[test]
    fn add_requires_moderators_collection() {
        let add = json!({"type": "Add", "target": "https://a.example/m/rust/moderators"});
        assert_eq!(classify(add).unwrap(), Verb::AddModerator);
        let pin = json!({"type": "Add", "target": "https://a.example/m/rust/pinned"});
        assert!(matches!(classify(pin), Err(InboxError::Unsupported(_))));
    }

    #[test]
    fn unknown_verbs_are_unsupported() {
        assert!(matches!(
            classify(json!({"type": "Travel"})),
            Err(InboxError::Unsupported(_))
        ));
        assert!(matches!(
            classify(json!({"type": "Undo", "object": {"type": "Create"}})),
            Err(InboxError::Unsupported(_))
        ));
    }
}
