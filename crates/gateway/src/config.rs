//! config types.

/// Configuration for running a GatewaySrv.
#[derive(Debug, Clone)]
pub struct Config {
    /// Worker thread count of the server runtime.
    ///
    /// Requests spend most of their time waiting on storage and
    /// replication, so production runs more workers than cpus.
    ///
    /// Defaults:
    /// - `testing = 2`
    /// - `production = 4 * cpu_count`
    pub worker_thread_count: usize,

    /// The address(es) at which to listen.
    ///
    /// Defaults:
    /// - `testing = "[127.0.0.1:0]"`
    /// - `production = "[0.0.0.0:8080, [::]:8080]"`
    pub listen_address_list: Vec<std::net::SocketAddr>,

    /// The aggregator storage root. One replica directory per feed.
    ///
    /// Defaults:
    /// - `testing = "<tmp>/hrss-gateway"`
    /// - `production = "./hrss-data"`
    pub storage_dir: std::path::PathBuf,

    /// How long a single rpc call may run before it is answered
    /// with a timeout error.
    ///
    /// Defaults:
    /// - `testing = 5s`
    /// - `production = 30s`
    pub rpc_timeout: std::time::Duration,

    /// The largest body a single ranged blob response carries.
    ///
    /// Defaults:
    /// - `testing = 320KiB`
    /// - `production = 320KiB`
    pub max_blob_chunk: u64,
}

/// Five 64KiB blocks.
pub const DEFAULT_MAX_BLOB_CHUNK: u64 = 5 * 64 * 1024;

impl Config {
    /// Get a gateway config suitable for testing.
    pub fn testing() -> Self {
        Self {
            worker_thread_count: 2,
            listen_address_list: vec![(std::net::Ipv4Addr::LOCALHOST, 0).into()],
            storage_dir: std::env::temp_dir().join("hrss-gateway"),
            rpc_timeout: std::time::Duration::from_secs(5),
            max_blob_chunk: DEFAULT_MAX_BLOB_CHUNK,
        }
    }

    /// Get a gateway config suitable for production.
    pub fn production() -> Self {
        Self {
            worker_thread_count: num_cpus::get() * 4,
            listen_address_list: vec![
                (std::net::Ipv4Addr::UNSPECIFIED, 8080).into(),
                (std::net::Ipv6Addr::UNSPECIFIED, 8080).into(),
            ],
            storage_dir: "hrss-data".into(),
            rpc_timeout: std::time::Duration::from_secs(30),
            max_blob_chunk: DEFAULT_MAX_BLOB_CHUNK,
        }
    }
}
