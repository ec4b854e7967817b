//! The binary hrss-gateway.

use hrss_api::*;
use hrss_core::{aggregator::Aggregator, cached::CachedAggregator};
use hrss_gateway::*;
use std::sync::Arc;

#[derive(clap::Parser, Debug)]
#[command(version)]
pub struct Args {
    /// By default hrss-gateway runs in "testing" configuration
    /// with much lighter resource usage settings and a temporary
    /// storage root.
    ///
    /// Set this "production" mode to use most of the resources
    /// available on the machine.
    #[arg(long)]
    pub production: bool,

    /// Override the listen address. May be given multiple times.
    #[arg(long)]
    pub listen: Vec<std::net::SocketAddr>,

    /// Override the aggregator storage root.
    #[arg(long)]
    pub storage_dir: Option<std::path::PathBuf>,

    /// A json file of module configuration, for example
    /// `{"aggregator": {"connectTimeoutMs": 5000}}`.
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,
}

fn load_module_config(
    path: Option<&std::path::Path>,
) -> HrssResult<Option<hrss_api::config::Config>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let raw = std::fs::read(path).map_err(|err| {
        HrssError::other_src(format!("read {}", path.display()), err)
    })?;
    serde_json::from_slice(&raw).map(Some).map_err(|err| {
        HrssError::configuration(format!("{}: {err}", path.display()))
    })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(
                    tracing_subscriber::filter::LevelFilter::INFO.into(),
                )
                .from_env_lossy(),
        )
        .init();

    if let Err(err) = run(<Args as clap::Parser>::parse()) {
        eprintln!("hrss-gateway: {err}");
        std::process::exit(1);
    }
    std::process::exit(0);
}

fn run(args: Args) -> HrssResult<()> {
    let mut config = if args.production {
        Config::production()
    } else {
        Config::testing()
    };
    if !args.listen.is_empty() {
        config.listen_address_list = args.listen.clone();
    }
    if let Some(dir) = &args.storage_dir {
        config.storage_dir = dir.clone();
    }

    println!("{args:?}--{config:?}");

    let mut builder = hrss_core::default_builder();
    match load_module_config(args.config.as_deref())? {
        // missing properties fall back to module defaults
        Some(module_config) => builder.config = module_config,
        None => {
            builder.set_default_config()?;
            Aggregator::default_config(&mut builder.config)?;
        }
    }
    tracing::debug!(config = ?builder.config, "module config");
    let builder = builder.build();

    std::fs::create_dir_all(&config.storage_dir).map_err(|err| {
        HrssError::other_src(
            format!("create {}", config.storage_dir.display()),
            err,
        )
    })?;

    let rt = tokio::runtime::Runtime::new()
        .map_err(|err| HrssError::other_src("start runtime", err))?;
    let shutdown = ShutdownCoordinator::default();

    let plain = Aggregator::create(builder, config.storage_dir.clone())?;
    let api: DynAggregatorApi = CachedAggregator::create(plain);
    rt.block_on(api.init())?;
    {
        let api = api.clone();
        shutdown.register("aggregator", move || async move { api.close().await });
    }

    let srv = GatewaySrv::new(config, api)
        .map_err(|err| HrssError::other_src("start gateway", err))?;
    for addr in srv.listen_addrs() {
        println!("listening on ws://{addr}");
    }
    shutdown.register("gateway", move || async move {
        let mut srv = srv;
        tokio::task::spawn_blocking(move || srv.shutdown())
            .await
            .map_err(|err| HrssError::other_src("join gateway", err))?
            .map_err(|err| HrssError::other_src("stop gateway", err))
    });

    let (send, recv) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = send.send(());
    })
    .map_err(|err| HrssError::other_src("install signal handler", err))?;

    let _ = recv.recv();

    println!("Terminating...");
    rt.block_on(shutdown.shutdown())?;
    println!("Done.");
    Ok(())
}
