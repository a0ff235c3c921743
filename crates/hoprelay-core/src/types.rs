// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types shared across the relay, scheduler, health, and storage crates.

use std::collections::BTreeSet;
use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Identifier of a forwarding pair (database row id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PairId(pub i64);

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a message mapping row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MappingId(pub i64);

impl fmt::Display for MappingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message id as assigned by one hop's platform. Opaque to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HopMessageId(pub String);

impl fmt::Display for HopMessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One leg of the three-platform relay.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Hop {
    Source,
    Relay,
    Destination,
}

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the type of adapter plugged into the relay.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Hop,
    Prober,
    Storage,
}

/// Rolling health of an identity, recomputed every probe cycle.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unreachable,
    Unauthorized,
}

impl HealthState {
    /// Unreachable and unauthorized identities hold no running pairs.
    pub fn is_failed(self) -> bool {
        matches!(self, Self::Unreachable | Self::Unauthorized)
    }
}

/// Kind of credential an identity carries.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    /// A user session able to read the source hop.
    Session,
    /// A bot token, typically used to post on the destination hop.
    BotToken,
}

/// Lifecycle state of one message mapping.
///
/// `Failed` is not terminal: a redelivered source event resumes from
/// whichever hop last succeeded.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MappingState {
    Pending,
    Relayed,
    Delivered,
    Edited,
    Deleted,
    Failed,
}

impl MappingState {
    /// Whether the message reached the destination hop.
    pub fn is_delivered(self) -> bool {
        matches!(self, Self::Delivered | Self::Edited)
    }

    /// Whether the initial relay has not settled yet.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Pending | Self::Relayed)
    }
}

/// Liveness of a worker group, derived from its identity's health.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GroupLiveness {
    Running,
    Degraded,
    Stopped,
}

impl From<HealthState> for GroupLiveness {
    fn from(state: HealthState) -> Self {
        match state {
            HealthState::Healthy => Self::Running,
            HealthState::Degraded => Self::Degraded,
            HealthState::Unreachable | HealthState::Unauthorized => Self::Stopped,
        }
    }
}

/// Operational status of a forwarding pair.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PairStatus {
    /// Assigned to a running group and processing events.
    Active,
    /// Turned off by an operator or because it could not be placed.
    Disabled,
    /// Left on a failed identity because no other identity had room.
    Stranded,
}

/// Kind of inbound source event.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    New,
    Edit,
    Delete,
}

/// A credentialed principal able to act on a hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub kind: IdentityKind,
    pub max_pairs: u32,
    /// Higher wins when the scheduler picks a placement target.
    pub priority: i32,
    pub health: HealthState,
    pub health_reason: Option<String>,
    pub last_verified: Option<String>,
    pub created_at: String,
}

/// A configured source -> relay -> destination route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingPair {
    pub id: PairId,
    pub name: String,
    pub source_channel: String,
    pub relay_channel: String,
    pub destination_channel: String,
    /// Identity whose worker group owns this pair.
    pub identity: String,
    /// Separate credential used to post on the destination hop, if any.
    pub destination_identity: Option<String>,
    pub enabled: bool,
    pub status: PairStatus,
    pub created_at: String,
}

impl ForwardingPair {
    /// The identity that posts on the destination hop.
    pub fn destination_poster(&self) -> &str {
        self.destination_identity.as_deref().unwrap_or(&self.identity)
    }
}

/// A capacity-bounded set of pairs sharing one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerGroup {
    pub id: String,
    pub identity: String,
    pub capacity: u32,
    pub liveness: GroupLiveness,
    pub members: BTreeSet<PairId>,
}

impl WorkerGroup {
    pub fn has_room(&self) -> bool {
        (self.members.len() as u32) < self.capacity
    }
}

/// Correlation of one logical message across the three hops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMapping {
    pub id: MappingId,
    pub pair_id: PairId,
    pub source_msg_id: String,
    pub relay_msg_id: Option<HopMessageId>,
    pub destination_msg_id: Option<HopMessageId>,
    pub reply_parent: Option<MappingId>,
    pub state: MappingState,
    pub failure_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Result of `MappingStore::upsert_on_new`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub mapping: MessageMapping,
    /// False when an existing row was returned (duplicate delivery).
    pub inserted: bool,
}

/// A reply parent translated to the relay and destination hops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTarget {
    pub parent: MappingId,
    pub relay_msg_id: HopMessageId,
    pub destination_msg_id: Option<HopMessageId>,
}

/// One health sample for an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub identity: String,
    pub state: HealthState,
    pub reason: Option<String>,
    pub checked_at: String,
}

/// An event delivered by the source adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEvent {
    pub pair_id: PairId,
    pub source_msg_id: String,
    pub kind: EventKind,
    #[serde(default)]
    pub rendered_content: String,
    #[serde(default)]
    pub reply_to_source_msg_id: Option<String>,
}

impl SourceEvent {
    pub fn new_message(
        pair_id: PairId,
        source_msg_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            pair_id,
            source_msg_id: source_msg_id.into(),
            kind: EventKind::New,
            rendered_content: content.into(),
            reply_to_source_msg_id: None,
        }
    }

    pub fn edit(
        pair_id: PairId,
        source_msg_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            kind: EventKind::Edit,
            ..Self::new_message(pair_id, source_msg_id, content)
        }
    }

    pub fn delete(pair_id: PairId, source_msg_id: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Delete,
            ..Self::new_message(pair_id, source_msg_id, String::new())
        }
    }

    /// Mark this event as a reply to another source message.
    pub fn replying_to(mut self, parent_source_msg_id: impl Into<String>) -> Self {
        self.reply_to_source_msg_id = Some(parent_source_msg_id.into());
        self
    }
}

/// Outcome of an edit or delete on a hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopOutcome {
    Applied,
    /// The remote message no longer exists.
    NotFound,
}

/// Outcome of one identity or permission probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ok,
    /// Connectivity failure; counts toward the unreachable threshold.
    Failed(String),
    /// Credential rejected or permission missing.
    Unauthorized(String),
}

/// Opaque secret handle handed to adapters and probers.
///
/// `Debug` never prints the secret.
#[derive(Clone)]
pub struct CredentialHandle {
    identity: String,
    secret: SecretString,
}

impl CredentialHandle {
    pub fn new(identity: impl Into<String>, secret: SecretString) -> Self {
        Self {
            identity: identity.into(),
            secret,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Raw secret material, for adapters that authenticate against a platform.
    pub fn expose(&self) -> &str {
        self.secret.expose_secret()
    }
}

impl fmt::Debug for CredentialHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialHandle")
            .field("identity", &self.identity)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
