//! Handler registration and lookup.

pub mod handler_registry;

pub use handler_registry::{
    EventHandler, HandlerDescriptor, HandlerKey, HandlerRegistry, HandlerRegistryBuilder,
};
