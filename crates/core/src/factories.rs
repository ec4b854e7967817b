//! Factories for generating instances of Hrss modules.

mod core_log_store;
pub use core_log_store::*;

mod mem_swarm;
pub use mem_swarm::*;

mod mem_source;
pub use mem_source::*;
