//! Builder-related types.

use crate::*;
use std::sync::Arc;

/// The general hrss builder.
/// This contains both configuration and factory instances,
/// allowing construction of runtime module instances.
#[derive(Debug)]
pub struct Builder {
    /// The module configuration to be used when building modules.
    /// This can be loaded from disk or modified before freezing the builder.
    pub config: config::Config,

    /// The [LogStoreFactory] to be used for creating
    /// [LogStore] instances.
    pub log_store: DynLogStoreFactory,

    /// The [SwarmFactory] to be used for creating [Swarm] instances.
    pub swarm: DynSwarmFactory,
}

impl Builder {
    /// Construct a default config given the configured module factories.
    /// Note, this should be called before freezing the Builder instance
    /// in an Arc<>.
    pub fn set_default_config(&mut self) -> HrssResult<()> {
        let Self {
            config,
            log_store,
            swarm,
        } = self;

        log_store.default_config(config)?;
        swarm.default_config(config)?;

        Ok(())
    }

    /// Freeze this builder so module factories can share it.
    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }
}
