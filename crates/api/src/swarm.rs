//! Swarm (peer discovery and replication transport) related types.

use crate::*;
use std::sync::Arc;

/// Finds peers interested in a discovery key and connects their
/// log stores for replication.
pub trait Swarm: 'static + Send + Sync + std::fmt::Debug {
    /// Announce and look up `key`. Every peer found, now or later,
    /// is connected to `store` in both directions.
    fn join(
        &self,
        key: DiscoveryKey,
        store: DynLogStore,
    ) -> BoxFut<'_, HrssResult<()>>;

    /// Resolves once the lookups of all joined keys have completed.
    fn flush(&self) -> BoxFut<'_, HrssResult<()>>;

    /// Leave every joined key and disconnect from all peers.
    fn destroy(&self) -> BoxFut<'_, HrssResult<()>>;
}

/// Trait-object [Swarm].
pub type DynSwarm = Arc<dyn Swarm>;

/// A factory for constructing [Swarm] instances.
pub trait SwarmFactory: 'static + Send + Sync + std::fmt::Debug {
    /// Help the builder construct a default config from the chosen
    /// module factories.
    fn default_config(&self, config: &mut config::Config) -> HrssResult<()>;

    /// Construct a swarm instance.
    fn create(
        &self,
        builder: Arc<builder::Builder>,
    ) -> BoxFut<'static, HrssResult<DynSwarm>>;
}

/// Trait-object [SwarmFactory].
pub type DynSwarmFactory = Arc<dyn SwarmFactory>;
