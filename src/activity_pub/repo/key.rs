use std::fmt::Display;
use std::str::FromStr;

use fjall::UserKey;
use minicbor::{Decode, Encode};
use uuid::Uuid;

/// Local primary key of an actor or content entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct EntityKey(Uuid);

impl EntityKey {
    pub(crate) fn new() -> EntityKey {
        EntityKey(Uuid::now_v7())
    }
}

impl From<EntityKey> for UserKey {
    fn from(value: EntityKey) -> Self {
        UserKey::new(value.0.as_bytes())
    }
}

impl AsRef<[u8]> for EntityKey {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.as_simple().fmt(f)
    }
}

impl FromStr for EntityKey {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(EntityKey(Uuid::try_parse(s)?))
    }
}

impl<C> Encode<C> for EntityKey {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _ctx: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.bytes(self.0.as_bytes())?;
        Ok(())
    }
}

impl<'b, C> Decode<'b, C> for EntityKey {
    fn decode(
        d: &mut minicbor::Decoder<'b>,
        _ctx: &mut C,
    ) -> Result<Self, minicbor::decode::Error> {
        let bytes = d.bytes()?;
        let uuid = bytes
            .try_into()
            .map(Uuid::from_bytes)
            .map_err(minicbor::decode::Error::custom)?;
        Ok(EntityKey(uuid))
    }
}

/// Composite key `first ++ second`. Prefix scans over `first` list every
/// relation of that entity.
pub(crate) fn pair_key(first: EntityKey, second: EntityKey) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(first.as_ref());
    key.extend_from_slice(second.as_ref());
    key
}

/// The second half of a [`pair_key`].
pub(crate) fn pair_second(key: &[u8]) -> Option<EntityKey> {
    let bytes: [u8; 16] = key.get(16..32)?.try_into().ok()?;
    Some(EntityKey(Uuid::from_bytes(bytes)))
}
