use crate::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery priority carried in message metadata.
///
/// The derived order is Low < Normal < High < Urgent, so ranking matching
/// subscriptions is a plain sort.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
    #[serde(default)]
    pub priority: MessagePriority,
}

/// A typed message routed by the bus. Immutable once published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub message_type: String,
    pub payload: Value,
    pub metadata: MessageMetadata,
}

impl Message {
    pub fn new(
        message_type: impl Into<String>,
        payload: impl Into<Value>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_type: message_type.into(),
            payload: payload.into(),
            metadata: MessageMetadata {
                timestamp: Utc::now(),
                source: source.into(),
                target: None,
                correlation_id: None,
                priority: MessagePriority::Normal,
            },
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.metadata.target = Some(target.into());
        self
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.metadata.priority = priority;
        self
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.metadata.correlation_id = Some(correlation_id);
        self
    }

    /// Build a response to this message: same correlation id (falling back
    /// to the request's own id), targeted back at the requester.
    pub fn reply(
        &self,
        message_type: impl Into<String>,
        payload: impl Into<Value>,
        source: impl Into<String>,
    ) -> Self {
        Message::new(message_type, payload, source)
            .with_target(self.metadata.source.clone())
            .with_correlation(self.metadata.correlation_id.unwrap_or(self.id))
    }
}

/// Subscription pattern. An unset field always matches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagePattern {
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub priority: Option<MessagePriority>,
}

impl MessagePattern {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn for_type(message_type: impl Into<String>) -> Self {
        Self {
            message_type: Some(message_type.into()),
            ..Self::default()
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn matches(&self, message: &Message) -> bool {
        self.message_type
            .as_deref()
            .map_or(true, |t| t == message.message_type)
            && self
                .source
                .as_deref()
                .map_or(true, |s| s == message.metadata.source)
            && self
                .target
                .as_deref()
                .map_or(true, |t| message.metadata.target.as_deref() == Some(t))
            && self
                .priority
                .map_or(true, |p| p == message.metadata.priority)
    }

    /// True when this pattern names exactly the message's target.
    pub fn is_exact_target(&self, message: &Message) -> bool {
        self.target.is_some() && self.target.as_deref() == message.metadata.target.as_deref()
    }
}
