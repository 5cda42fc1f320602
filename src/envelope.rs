//! The event envelope: the unit handed to the broker.
//!
//! An envelope is built once from an [`EventHeader`], the publishing [`Site`],
//! the serialized payload and a timestamp. It has no mutators; the publisher
//! encodes it and hands the bytes to the transport.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EnvelopeError;

/// Closed set of lifecycle events an entity can go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Created,
    Changed,
    Deleted,
    Deactivated,
    Activated,
    Assigned,
    Revoked,
}

impl EventType {
    pub const ALL: [EventType; 7] = [
        EventType::Created,
        EventType::Changed,
        EventType::Deleted,
        EventType::Deactivated,
        EventType::Activated,
        EventType::Assigned,
        EventType::Revoked,
    ];

    /// Wire value, also the last segment of the routing key.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Created => "created",
            EventType::Changed => "changed",
            EventType::Deleted => "deleted",
            EventType::Deactivated => "deactivated",
            EventType::Activated => "activated",
            EventType::Assigned => "assigned",
            EventType::Revoked => "revoked",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| EnvelopeError::UnknownEventType(s.to_string()))
    }
}

/// The tenant an event originates from. Used as the multi-tenancy
/// discriminator, so the domain can never be empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Site {
    domain: String,
}

impl Site {
    pub fn new(domain: impl Into<String>) -> Result<Self, EnvelopeError> {
        let domain = domain.into();
        if domain.trim().is_empty() {
            return Err(EnvelopeError::EmptySite);
        }
        Ok(Self { domain })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.domain)
    }
}

/// Who performed the action an event describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    /// Already a user URI; used verbatim.
    Href(String),
    /// A username, expanded to the site's user resource URI.
    Username(String),
}

impl Actor {
    pub fn href(&self, site: &Site) -> String {
        match self {
            Actor::Href(href) => href.clone(),
            Actor::Username(username) => {
                format!("https://{}/api/iam/user/{}/", site.domain(), username)
            }
        }
    }
}

/// What happened to which entity, independent of the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHeader {
    pub event_type: EventType,
    pub entity_type: String,
    /// Explicit identity; defaults to the payload's `href`.
    pub identity: Option<String>,
    pub actor: Option<Actor>,
}

impl EventHeader {
    pub fn new(event_type: EventType, entity_type: impl Into<String>) -> Self {
        Self {
            event_type,
            entity_type: entity_type.into(),
            identity: None,
            actor: None,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.actor = Some(actor);
        self
    }

    /// Topic routing key: `{entity_type}.{event_type}`.
    pub fn routing_key(&self) -> String {
        format!("{}.{}", self.entity_type, self.event_type)
    }
}

/// A fully resolved event, ready for encoding.
///
/// Decoding applies the same checks as [`EventEnvelope::new`]: a blank
/// identity or site is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireEnvelope")]
pub struct EventEnvelope {
    #[serde(with = "iso8601")]
    event_time: DateTime<Utc>,
    identity: String,
    event_type: EventType,
    entity_type: String,
    entity_site: String,
    #[serde(default)]
    user: String,
    data: Map<String, Value>,
}

impl EventEnvelope {
    /// Resolve identity and actor and freeze the event.
    ///
    /// An empty explicit identity counts as absent.
    pub fn new(
        header: &EventHeader,
        site: &Site,
        data: Map<String, Value>,
        event_time: DateTime<Utc>,
    ) -> Result<Self, EnvelopeError> {
        let identity = header
            .identity
            .clone()
            .filter(|identity| !identity.is_empty())
            .or_else(|| identity_from(&data))
            .ok_or(EnvelopeError::MissingIdentity)?;

        let user = header
            .actor
            .as_ref()
            .map(|actor| actor.href(site))
            .unwrap_or_default();

        Ok(Self {
            event_time,
            identity,
            event_type: header.event_type,
            entity_type: header.entity_type.clone(),
            entity_site: site.domain().to_string(),
            user,
            data,
        })
    }

    pub fn event_time(&self) -> DateTime<Utc> {
        self.event_time
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn entity_site(&self) -> &str {
        &self.entity_site
    }

    /// URI of the acting user, or an empty string.
    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn routing_key(&self) -> String {
        format!("{}.{}", self.entity_type, self.event_type)
    }
}

/// The envelope as it arrives off the wire, before validation.
#[derive(Deserialize)]
struct WireEnvelope {
    #[serde(with = "iso8601")]
    event_time: DateTime<Utc>,
    identity: String,
    event_type: EventType,
    entity_type: String,
    entity_site: String,
    #[serde(default)]
    user: String,
    data: Map<String, Value>,
}

impl TryFrom<WireEnvelope> for EventEnvelope {
    type Error = EnvelopeError;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        if wire.identity.is_empty() {
            return Err(EnvelopeError::MissingIdentity);
        }
        let site = Site::new(wire.entity_site)?;
        Ok(Self {
            event_time: wire.event_time,
            identity: wire.identity,
            event_type: wire.event_type,
            entity_type: wire.entity_type,
            entity_site: site.domain,
            user: wire.user,
            data: wire.data,
        })
    }
}

fn identity_from(data: &Map<String, Value>) -> Option<String> {
    data.get("href")
        .and_then(Value::as_str)
        .filter(|href| !href.is_empty())
        .map(str::to_owned)
}

/// ISO-8601 with microseconds and an explicit `+00:00` offset.
mod iso8601 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.to_rfc3339_opts(SecondsFormat::Micros, false))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|time| time.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
