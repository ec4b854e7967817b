//! The mem swarm implementation provided by hrss.
//!
//! Every log store that joins a discovery key through any [MemSwarm] in
//! this process is connected to every other store that joined the same key.

use hrss_api::{builder::Builder, config::*, *};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

/// The mem swarm implementation provided by hrss.
#[derive(Debug)]
pub struct MemSwarmFactory {}

impl MemSwarmFactory {
    /// Construct a new MemSwarmFactory.
    pub fn create() -> DynSwarmFactory {
        let out: DynSwarmFactory = Arc::new(MemSwarmFactory {});
        out
    }
}

impl SwarmFactory for MemSwarmFactory {
    fn default_config(&self, _config: &mut Config) -> HrssResult<()> {
        Ok(())
    }

    fn create(
        &self,
        _builder: Arc<Builder>,
    ) -> BoxFut<'static, HrssResult<DynSwarm>> {
        Box::pin(async move {
            let out: DynSwarm = Arc::new(MemSwarm::new());
            Ok(out)
        })
    }
}

struct Member {
    swarm_id: u64,
    store: DynLogStore,
}

type TopicMap = HashMap<DiscoveryKey, Vec<Member>>;
static STAT: OnceLock<Mutex<TopicMap>> = OnceLock::new();
static NEXT_SWARM_ID: AtomicU64 = AtomicU64::new(1);

fn stat() -> &'static Mutex<TopicMap> {
    STAT.get_or_init(Default::default)
}

#[derive(Debug)]
struct MemSwarm {
    id: u64,
    joined: Mutex<Vec<(DiscoveryKey, DynLogStore)>>,
}

impl Drop for MemSwarm {
    fn drop(&mut self) {
        self.leave_all();
    }
}

impl MemSwarm {
    fn new() -> Self {
        Self {
            id: NEXT_SWARM_ID.fetch_add(1, Ordering::Relaxed),
            joined: Mutex::new(Vec::new()),
        }
    }

    fn leave_all(&self) {
        let joined = std::mem::take(&mut *self.joined.lock().unwrap());
        if joined.is_empty() {
            return;
        }
        let mut lock = stat().lock().unwrap();
        for (key, store) in joined {
            let Some(members) = lock.get_mut(&key) else {
                continue;
            };
            members.retain(|m| m.swarm_id != self.id);
            for m in members.iter() {
                m.store.disconnect(store.id());
                store.disconnect(m.store.id());
            }
            if members.is_empty() {
                lock.remove(&key);
            }
            tracing::debug!(swarm = self.id, %key, "left topic");
        }
    }
}

impl Swarm for MemSwarm {
    fn join(
        &self,
        key: DiscoveryKey,
        store: DynLogStore,
    ) -> BoxFut<'_, HrssResult<()>> {
        Box::pin(async move {
            {
                let mut lock = stat().lock().unwrap();
                let members = lock.entry(key.clone()).or_default();
                for m in members.iter() {
                    if m.swarm_id == self.id {
                        continue;
                    }
                    store.replicate(m.store.clone());
                    m.store.replicate(store.clone());
                }
                tracing::debug!(
                    swarm = self.id,
                    %key,
                    peers = members.len(),
                    "joined topic",
                );
                members.push(Member {
                    swarm_id: self.id,
                    store: store.clone(),
                });
            }
            self.joined.lock().unwrap().push((key, store));
            Ok(())
        })
    }

    fn flush(&self) -> BoxFut<'_, HrssResult<()>> {
        // lookups complete synchronously within join
        Box::pin(async move { Ok(()) })
    }

    fn destroy(&self) -> BoxFut<'_, HrssResult<()>> {
        Box::pin(async move {
            self.leave_all();
            Ok(())
        })
    }
}
