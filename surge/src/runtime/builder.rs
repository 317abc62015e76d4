use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use crate::config::PoolConfig;
use crate::events::{PoolEventBus, PoolEventPublisher};
use crate::handler::HandlerRegistry;
use crate::request::Payload;

use super::dispatcher::Dispatcher;

/// Builder for constructing a [`Dispatcher`] with explicit dependencies.
///
/// The handler registry is required. Without an explicit event publisher the
/// pool gets a [`PoolEventBus`] sized by `config.event_capacity`.
///
/// # Example
///
/// ```ignore
/// use surge::*;
///
/// let pool = PoolBuilder::<String>::new(PoolConfig::default())
///     .with_registry(registry)
///     .build()?;
/// pool.start()?;
/// ```
pub struct PoolBuilder<P: Payload> {
    config: PoolConfig,
    registry: Option<Arc<HandlerRegistry<P>>>,
    events: Option<Arc<dyn PoolEventPublisher + 'static>>,
}

impl<P: Payload> fmt::Debug for PoolBuilder<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("PoolBuilder");
        debug.field("config", &self.config);
        debug.field("payload_type", &type_name::<P>());
        debug.field("registry_set", &self.registry.is_some());
        debug.field("events_set", &self.events.is_some());

        if let Some(registry) = &self.registry {
            debug.field("registered_kinds", &registry.len());
        }

        debug.finish()
    }
}

impl<P: Payload> PoolBuilder<P> {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            registry: None,
            events: None,
        }
    }

    /// Set the handler registry.
    pub fn with_registry(mut self, registry: HandlerRegistry<P>) -> Self {
        self.registry = Some(Arc::new(registry));
        self
    }

    /// Set a registry already shared with other pools.
    pub fn with_shared_registry(mut self, registry: Arc<HandlerRegistry<P>>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the event publisher.
    pub fn with_events(mut self, events: Arc<dyn PoolEventPublisher + 'static>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the pool. Workers are not launched until [`Dispatcher::start`].
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the registry is
    /// missing.
    pub fn build(self) -> anyhow::Result<Dispatcher<P>> {
        self.config.validate()?;
        let registry = self
            .registry
            .ok_or_else(|| anyhow::anyhow!("registry dependency missing"))?;
        if registry.is_empty() {
            tracing::warn!("building a pool with no registered handlers; every request will be discarded");
        }
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(PoolEventBus::new(self.config.event_capacity)));

        Ok(Dispatcher::new(self.config, registry, events))
    }
}
