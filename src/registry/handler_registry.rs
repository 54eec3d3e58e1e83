//! # Handler Registry
//!
//! Maps `(event_name, schema_version)` to the ordered handlers that consume
//! it. Registration happens once at process startup through the builder;
//! the built registry is immutable, so concurrent readers need no
//! synchronization. Handler order for a pair is the order of `register`
//! calls, which makes dispatch order deterministic across restarts.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{OutboxError, Result};
use crate::events::envelope::{is_snake_case_name, EventEnvelope};

/// Business logic attached to one `(event_name, schema_version)` pair.
///
/// Handlers must be idempotent: the queue guarantees at-least-once delivery,
/// so a handler may observe the same event twice after a crash or timeout.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable identity used in diagnostics and dispatch error messages.
    fn name(&self) -> &str;

    async fn handle(&self, event: &EventEnvelope) -> anyhow::Result<()>;
}

/// Key for handler lookup in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerKey {
    pub event_name: String,
    pub schema_version: i32,
}

impl HandlerKey {
    pub fn new(event_name: impl Into<String>, schema_version: i32) -> Self {
        Self {
            event_name: event_name.into(),
            schema_version,
        }
    }
}

impl fmt::Display for HandlerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/v{}", self.event_name, self.schema_version)
    }
}

/// One registered handler and the key it serves.
#[derive(Clone)]
pub struct HandlerDescriptor {
    pub key: HandlerKey,
    pub handler_name: String,
    pub handler: Arc<dyn EventHandler>,
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("key", &self.key)
            .field("handler_name", &self.handler_name)
            .finish()
    }
}

/// Collects registrations at startup, then freezes into a [`HandlerRegistry`].
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<HandlerKey, Vec<HandlerDescriptor>>,
    registration_count: usize,
}

impl HandlerRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `(event_name, schema_version)`.
    ///
    /// Multiple handlers may share a key; they run in registration order.
    pub fn register(
        &mut self,
        event_name: impl Into<String>,
        schema_version: i32,
        handler: Arc<dyn EventHandler>,
    ) -> Result<&mut Self> {
        let event_name = event_name.into();

        if !is_snake_case_name(&event_name) {
            return Err(OutboxError::Configuration(format!(
                "handler event name must be snake_case: {event_name}"
            )));
        }
        if schema_version <= 0 {
            return Err(OutboxError::Configuration(format!(
                "handler schema version must be positive: {event_name} v{schema_version}"
            )));
        }

        let key = HandlerKey::new(event_name, schema_version);
        let descriptor = HandlerDescriptor {
            key: key.clone(),
            handler_name: handler.name().to_string(),
            handler,
        };

        debug!(key = %key, handler = %descriptor.handler_name, "handler registered");
        self.handlers.entry(key).or_default().push(descriptor);
        self.registration_count += 1;
        Ok(self)
    }

    /// Freeze the registrations into an immutable registry.
    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
            registration_count: self.registration_count,
        }
    }
}

/// Immutable `(event_name, schema_version) -> [handler]` map.
pub struct HandlerRegistry {
    handlers: HashMap<HandlerKey, Vec<HandlerDescriptor>>,
    registration_count: usize,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::new()
    }

    /// Ordered handlers for the exact `(event_name, schema_version)` pair.
    ///
    /// An absent or empty pair is an unknown event type: the entry cannot be
    /// dispatched until a deployment registers a handler for it.
    pub fn handlers_for(
        &self,
        event_name: &str,
        schema_version: i32,
    ) -> Result<&[HandlerDescriptor]> {
        let key = HandlerKey::new(event_name, schema_version);
        match self.handlers.get(&key) {
            Some(descriptors) if !descriptors.is_empty() => Ok(descriptors),
            _ => Err(OutboxError::Dispatch(
                crate::dispatch::consumer::DispatchError::UnknownEventType {
                    event_name: event_name.to_string(),
                    schema_version,
                },
            )),
        }
    }

    /// Whether any handler serves the pair.
    pub fn is_registered(&self, event_name: &str, schema_version: i32) -> bool {
        self.handlers
            .get(&HandlerKey::new(event_name, schema_version))
            .is_some_and(|descriptors| !descriptors.is_empty())
    }

    /// Total registrations across all keys.
    pub fn registration_count(&self) -> usize {
        self.registration_count
    }

    /// Number of distinct `(event_name, schema_version)` keys.
    pub fn key_count(&self) -> usize {
        self.handlers.len()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("keys", &self.key_count())
            .field("registrations", &self.registration_count)
            .finish()
    }
}
