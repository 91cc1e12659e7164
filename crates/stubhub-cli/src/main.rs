//! stubhub - スタブブローカーのコマンドライン
//!
//! - check: 設定とカタログを読み込んで表示
//! - status: in-memory bus 上でブローカーを起動し状態を JSON で出力
//! - selftest: loopback launcher を使ったエンドツーエンドの自己診断

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stubhub_core::app::BrokerBuilder;
use stubhub_core::domain::StubDescriptor;
use stubhub_core::impls::{BroadcastEventSink, CommandLauncher, InMemoryBus, LoopbackLauncher};
use stubhub_core::{BrokerConfig, StubCatalog};

#[derive(Debug, Parser)]
#[command(name = "stubhub", version, about = "Stub-and-forward broker for a pub/sub bus")]
struct Cli {
    /// Broker configuration (JSON). Missing files fall back to defaults.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load the configuration and catalog and print what would be served.
    Check,

    /// Start the broker on an in-memory bus and print its status.
    Status {
        /// Keep running until Ctrl-C and print the status again on exit.
        #[arg(long)]
        follow: bool,

        /// How long to wait for every stub to register.
        #[arg(long, default_value_t = 5_000)]
        wait_ms: u64,
    },

    /// Run the end-to-end self-test.
    Selftest {
        /// Program used instead of `launch.program`.
        #[arg(long)]
        program: Option<String>,
    },
}

#[derive(Debug, Serialize)]
struct CheckReport<'a> {
    config: &'a BrokerConfig,
    known: usize,
    selected: Vec<DescriptorView<'a>>,
}

#[derive(Debug, Serialize)]
struct DescriptorView<'a> {
    name: &'a str,
    launch_locator: &'a str,
    capabilities: Vec<&'a str>,
    prelaunch_delay_ms: u64,
    command: Vec<String>,
}

impl<'a> DescriptorView<'a> {
    fn new(descriptor: &'a StubDescriptor, config: &BrokerConfig) -> Self {
        let mut command = vec![config.launch.program.clone()];
        command.extend(config.launch.command_args(&descriptor.launch_locator));
        Self {
            name: &descriptor.name,
            launch_locator: &descriptor.launch_locator,
            capabilities: descriptor.capabilities.iter().map(|c| c.as_str()).collect(),
            prelaunch_delay_ms: descriptor
                .prelaunch_delay(config.default_prelaunch_delay())
                .as_millis() as u64,
            command,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = BrokerConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Check => check(&config),
        Command::Status { follow, wait_ms } => status(config, follow, Duration::from_millis(wait_ms)).await,
        Command::Selftest { program } => selftest(config, program).await,
    }
}

fn check(config: &BrokerConfig) -> Result<()> {
    let catalog = load_catalog(config)?;
    let selected = catalog.selected(&config.selected_applications);
    let report = CheckReport {
        config,
        known: catalog.len(),
        selected: selected.iter().map(|d| DescriptorView::new(d, config)).collect(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn status(config: BrokerConfig, follow: bool, wait: Duration) -> Result<()> {
    let bus = Arc::new(InMemoryBus::new());
    let broker = Arc::new(build_broker(config, bus, false)?);
    let handle = broker.start().await?;

    if let Err(err) = broker.await_all_stubs_started(Some(wait)).await {
        warn!(error = %err, "not every stub registered");
    }
    println!("{}", serde_json::to_string_pretty(&broker.status())?);

    if follow {
        info!("running, press Ctrl-C to stop");
        tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
        println!("{}", serde_json::to_string_pretty(&broker.status())?);
    }

    handle.shutdown().await;
    Ok(())
}

async fn selftest(mut config: BrokerConfig, program: Option<String>) -> Result<()> {
    if let Some(program) = program {
        config.launch.program = program;
    }
    let bus = Arc::new(InMemoryBus::new());
    let broker = Arc::new(build_broker(config, bus, true)?);
    let handle = broker.start().await?;

    let result = broker.run_self_test().await;
    println!("{}", serde_json::to_string_pretty(&broker.status())?);
    handle.shutdown().await;

    match result {
        Ok(()) => {
            info!("self-test passed");
            Ok(())
        }
        Err(err) => bail!("self-test failed: {err}"),
    }
}

fn load_catalog(config: &BrokerConfig) -> Result<StubCatalog> {
    StubCatalog::load(&config.catalog_path)
        .with_context(|| format!("loading catalog {}", config.catalog_path.display()))
}

/// Wire a broker onto `bus`; `require_tester` fails fast without the tester stub.
fn build_broker(
    config: BrokerConfig,
    bus: Arc<InMemoryBus>,
    require_tester: bool,
) -> Result<stubhub_core::Broker> {
    let catalog = load_catalog(&config)?;
    let selected = catalog.selected(&config.selected_applications);
    let launcher = Arc::new(LoopbackLauncher::new(
        Arc::new(CommandLauncher::new(config.launch.clone())),
        bus.clone(),
        &selected,
    ));

    let events = Arc::new(BroadcastEventSink::new());
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event log lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            match serde_json::to_string(&event) {
                Ok(line) => info!(target: "stubhub::events", subject = %event.subject(), "{line}"),
                Err(err) => warn!(error = %err, "event could not be serialized"),
            }
        }
    });

    let tester = config.self_test.stub_name.clone();
    let mut builder = BrokerBuilder::new(config)
        .catalog(catalog)
        .bus(bus)
        .launcher(launcher)
        .events(events);
    if require_tester {
        builder = builder.expect_stubs(&[tester.as_str()]);
    }
    Ok(builder.build()?)
}
