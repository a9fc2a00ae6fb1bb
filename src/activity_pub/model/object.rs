//! Read-only view over an Activity Streams JSON node.

use std::borrow::Cow;
use std::fmt::Display;

use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Object<'a>(Cow<'a, Value>);

impl Object<'_> {
    pub(crate) fn id(&self) -> Option<&str> {
        self.get_str("id").or_else(|| self.get_str("@id"))
    }
    pub(crate) fn is_activity(&self) -> bool {
        ACTIVITY_TYPES.iter().any(|ty| self.type_is(ty))
    }
    pub(crate) fn is_actor(&self) -> bool {
        ACTOR_TYPES.iter().any(|ty| self.type_is(ty))
    }
    pub(crate) fn type_is(&self, ty: &str) -> bool {
        for prop in ["type", "@type"] {
            if let Some(Value::String(object_type)) = self.0.get(prop) {
                return object_type == ty;
            }
            if let Some(Value::Array(type_array)) = self.0.get(prop) {
                return type_array.iter().any(|v| v.as_str() == Some(ty));
            }
        }
        false
    }
    pub(crate) fn get_first_type(&self) -> Option<&str> {
        for prop in ["type", "@type"] {
            if let Some(Value::String(object_type)) = self.0.get(prop) {
                return Some(object_type);
            }
            if let Some(Value::Array(type_array)) = self.0.get(prop) {
                return type_array.iter().find_map(Value::as_str);
            }
        }
        None
    }
    pub(crate) fn has_prop(&self, prop: &str) -> bool {
        self.0.as_object().is_some_and(|map| map.contains_key(prop))
    }
    pub(crate) fn get_str(&self, prop: &str) -> Option<&str> {
        self.0.get(prop).and_then(Value::as_str)
    }
    pub(crate) fn get_value(&self, prop: &str) -> Option<&Value> {
        self.0.get(prop)
    }
    pub(crate) fn get_node_object(&self, prop: &str) -> Option<Object> {
        match self.0.get(prop) {
            Some(v) if v.is_object() => Some(v.into()),
            _ => None,
        }
    }
    pub(crate) fn get_node_iri(&self, prop: &str) -> Option<&str> {
        match self.0.get(prop)? {
            Value::String(iri) => Some(iri),
            Value::Object(map) => map.get("id").and_then(Value::as_str),
            // As shown in
            // https://www.w3.org/TR/activitystreams-vocabulary/#properties, a
            // node reference might be an array. We just use the first IRI.
            Value::Array(array) => array.iter().find_map(|v| match v {
                Value::String(iri) => Some(iri.as_str()),
                Value::Object(map) => map.get("id").and_then(Value::as_str),
                _ => None,
            }),
            _ => None,
        }
    }
    /// Every IRI referenced by a property, whether given as strings, embedded
    /// nodes or a mix of both.
    pub(crate) fn get_node_iris(&self, prop: &str) -> Vec<&str> {
        fn node_iri(v: &Value) -> Option<&str> {
            match v {
                Value::String(iri) => Some(iri),
                Value::Object(map) => map.get("id").and_then(Value::as_str),
                _ => None,
            }
        }
        match self.0.get(prop) {
            Some(Value::Array(array)) => array.iter().filter_map(node_iri).collect(),
            Some(v) => node_iri(v).into_iter().collect(),
            None => vec![],
        }
    }
    /// Lemmy style `attributedTo` arrays mix the author with the community,
    /// prefer the first node that is not a Group.
    pub(crate) fn attributed_to(&self) -> Option<&str> {
        if let Some(Value::Array(array)) = self.0.get("attributedTo") {
            let person = array.iter().find_map(|v| match v {
                Value::String(iri) => Some(iri.as_str()),
                Value::Object(_) if !Object::from(v).type_is("Group") => {
                    v.get("id").and_then(Value::as_str)
                }
                _ => None,
            });
            if person.is_some() {
                return person;
            }
        }
        self.get_node_iri("attributedTo")
    }
    /// The acting party of an activity, falling back to `attributedTo` for
    /// bare objects.
    pub(crate) fn actor_iri(&self) -> Option<&str> {
        self.get_node_iri("actor").or_else(|| self.attributed_to())
    }
    pub(crate) fn get_endpoint(&self, prop: &str) -> Option<&str> {
        self.0
            .get("endpoints")
            .and_then(|value| value.get(prop))
            .and_then(Value::as_str)
    }
    pub(crate) fn into_owned(self) -> Object<'static> {
        Object(Cow::Owned(self.0.into_owned()))
    }
    pub(crate) fn to_value(&self) -> Value {
        self.0.clone().into_owned()
    }
}

impl From<Value> for Object<'static> {
    fn from(value: Value) -> Self {
        if !value.is_object() {
            // Non-object payloads are rejected before this point; anything
            // else degrades to an empty object.
            Object(Cow::Owned(Value::Object(Map::new())))
        } else {
            Object(Cow::Owned(value))
        }
    }
}

impl<'a> From<&'a Value> for Object<'a> {
    fn from(value: &'a Value) -> Self {
        if !value.is_object() {
            Object(Cow::Owned(Value::Object(Map::new())))
        } else {
            Object(Cow::Borrowed(value))
        }
    }
}

impl From<Object<'_>> for Value {
    fn from(value: Object) -> Self {
        value.0.into_owned()
    }
}

impl AsRef<Value> for Object<'_> {
    fn as_ref(&self) -> &Value {
        &self.0
    }
}

impl Display for Object<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

const ACTIVITY_TYPES: [&str; 28] = [
    "Accept",
    "Add",
    "Announce",
    "Arrive",
    "Block",
    "Create",
    "Delete",
    "Dislike",
    "Flag",
    "Follow",
    "Ignore",
    "Invite",
    "Join",
    "Leave",
    "Like",
    "Listen",
    "Lock",
    "Move",
    "Offer",
    "Reject",
    "Read",
    "Remove",
    "TentativeReject",
    "TentativeAccept",
    "Travel",
    "Undo",
    "Update",
    "View",
];

const ACTOR_TYPES: [&str; 5] = ["Application", "Group", "Organization", "Person", "Service"];

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::Object;

    #[test]
    fn node_iris_accept_mixed_arrays() {
        let value = json!({
            "type": "Flag",
            "object": [
                "https://remote.example/u/troll",
                {"id": "https://remote.example/post/1", "type": "Note"},
                42
            ]
        });
        let object = Object::from(&value);
        assert_eq!(
            object.get_node_iris("object"),
            vec!["https://remote.example/u/troll", "https://remote.example/post/1"]
        );
        assert_eq!(
            object.get_node_iri("object"),
            Some("https://remote.example/u/troll")
        );
        assert!(object.get_node_iris("target").is_empty());
    }

    #[test]
    fn attributed_to_skips_groups() {
        let value = json!({
            "type": "Page",
            "attributedTo": [
                {"type": "Group", "id": "https://lemmy.example/c/rust"},
                {"type": "Person", "id": "https://lemmy.example/u/ferris"}
            ]
        });
        let object = Object::from(&value);
        assert_eq!(object.attributed_to(), Some("https://lemmy.example/u/ferris"));
        assert_eq!(object.actor_iri(), Some("https://lemmy.example/u/ferris"));
    }

    #[test]
    fn type_arrays() {
        let value = json!({"type": ["Lock", "Activity"], "actor": "https://a.example/u/x"});
        let object = Object::from(&value);
        assert!(object.type_is("Lock"));
        assert!(object.is_activity());
        assert_eq!(object.get_first_type(), Some("Lock"));
        assert!(!object.is_actor());
    }

    #[test]
    fn non_object_values_become_empty() {
        let object = Object::from(json!("https://a.example/note/1"));
        assert_eq!(object.id(), None);
        assert!(!object.has_prop("id"));
    }
}
