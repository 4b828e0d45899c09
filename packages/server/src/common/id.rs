//! Typed identifiers for the dispatch data model.
//!
//! `Id<T, V>` wraps a `Uuid` with an entity marker so a `JobId` can never
//! stand in where a `ContractId` is expected. Submission keys (`JobId`,
//! `CommitmentId`) arrive from clients and default to V4; ids the server
//! mints itself (`ContractId`, `AgentId`) are V7, so primary keys sort in
//! creation order.

use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef, Postgres};
use sqlx::{Decode, Encode, Type};
use uuid::Uuid;

/// UUID version 7 marker (time-ordered).
pub struct V7;

/// UUID version 4 marker (random).
pub struct V4;

/// Entity marker types for the dispatch data model.
pub mod markers {
    pub struct Job;
    pub struct Contract;
    pub struct Commitment;
    pub struct Agent;
}

/// A client-submitted job.
pub type JobId = Id<markers::Job, V4>;
/// One attempt to execute a job.
pub type ContractId = Id<markers::Contract, V7>;
/// A worker's claim on a contract.
pub type CommitmentId = Id<markers::Commitment, V4>;
/// A registered worker identity.
pub type AgentId = Id<markers::Agent, V7>;

/// A `Uuid` tagged with the entity type `T` it identifies and the UUID
/// version `V` it is minted as.
///
/// The tag exists only at compile time; on the wire and in the database
/// this is a plain UUID.
#[repr(transparent)]
pub struct Id<T, V = V7>(Uuid, PhantomData<fn() -> (T, V)>);

impl<T> Id<T, V7> {
    /// Mint a time-ordered id for a server-generated row.
    #[inline]
    pub fn new() -> Self {
        Self::from_uuid(Uuid::now_v7())
    }
}

impl<T> Id<T, V4> {
    /// Mint a random id, the form clients use for submission keys.
    #[inline]
    pub fn new() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }
}

impl<T> Default for Id<T, V7> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Default for Id<T, V4> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, V> Id<T, V> {
    #[inline]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid, PhantomData)
    }

    #[inline]
    pub fn into_uuid(self) -> Uuid {
        self.0
    }

    /// Parse from the canonical hyphenated form.
    #[inline]
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self::from_uuid)
    }

    /// Eight-character prefix for log lines where the full UUID is noise.
    pub fn short(&self) -> String {
        let mut simple = self.0.simple().to_string();
        simple.truncate(8);
        simple
    }

    fn entity_name() -> &'static str {
        std::any::type_name::<T>().rsplit("::").next().unwrap_or("entity")
    }
}

// PhantomData keeps derive from producing the right bounds, so the usual
// traits are spelled out by hand, each delegating to the inner Uuid.

impl<T, V> Clone for Id<T, V> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, V> Copy for Id<T, V> {}

impl<T, V> PartialEq for Id<T, V> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T, V> Eq for Id<T, V> {}

impl<T, V> PartialOrd for Id<T, V> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T, V> Ord for Id<T, V> {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl<T, V> fmt::Display for Id<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl<T, V> fmt::Debug for Id<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", Self::entity_name(), self.0)
    }
}

impl<T, V> Serialize for Id<T, V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de, T, V> Deserialize<'de> for Id<T, V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Uuid::deserialize(deserializer).map(Self::from_uuid)
    }
}

impl<T, V> Type<Postgres> for Id<T, V> {
    fn type_info() -> PgTypeInfo {
        <Uuid as Type<Postgres>>::type_info()
    }
}

impl<T, V> Encode<'_, Postgres> for Id<T, V> {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        <Uuid as Encode<Postgres>>::encode_by_ref(&self.0, buf)
    }
}

impl<T, V> Decode<'_, Postgres> for Id<T, V> {
    fn decode(value: PgValueRef<'_>) -> Result<Self, BoxDynError> {
        <Uuid as Decode<Postgres>>::decode(value).map(Self::from_uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_ids_never_collide() {
        assert_ne!(JobId::new(), JobId::new());
        assert_ne!(ContractId::new(), ContractId::new());
    }

    #[test]
    fn display_and_parse_roundtrip() {
        let id = CommitmentId::new();
        assert_eq!(CommitmentId::parse(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn serde_form_is_the_plain_uuid() {
        let id = JobId::new();
        let json = serde_json::to_value(id).unwrap();
        assert_eq!(json, serde_json::json!(id.into_uuid().to_string()));
        let back: JobId = serde_json::from_value(json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn contract_ids_mint_in_creation_order() {
        let first = ContractId::new();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let second = ContractId::new();
        assert!(first < second);
    }

    #[test]
    fn short_is_a_prefix_of_the_simple_form() {
        let id = JobId::new();
        let short = id.short();
        assert_eq!(short.len(), 8);
        assert!(id.into_uuid().simple().to_string().starts_with(&short));
    }

    #[test]
    fn debug_names_the_entity() {
        assert!(format!("{:?}", JobId::new()).starts_with("Job("));
        assert!(format!("{:?}", ContractId::new()).starts_with("Contract("));
    }
}
