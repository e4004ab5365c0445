// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use strobecue::clock::Clock;
use strobecue::config::{Config, SinkConfig};
use strobecue::cue::builtin::SystemBlackoutCue;
use strobecue::cue::{CueGroup, CueRegistry};
use strobecue::fixtures::load_fixture_table;
use strobecue::sinks::artnet::ArtnetSink;
use strobecue::sinks::enttec::EnttecSink;
use strobecue::sinks::preview::PreviewSink;
use strobecue::sinks::sacn::SacnSink;
use strobecue::sinks::Sink;
use strobecue::Sequencer;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = "0.1.0",
    about = "A rhythm-game lighting sequencer and DMX publisher."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Starts the sequencer against a config file and fixture table, running
    /// until interrupted.
    Start {
        /// The path to the sequencer config.
        config_path: String,
        /// The path to the fixture-channel table, overriding the config
        /// file's own `fixturesPath` when given.
        #[arg(long)]
        fixtures_path: Option<String>,
    },
    /// Lists the available Enttec-class USB DMX widgets.
    Devices {},
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            config_path,
            fixtures_path,
        } => {
            let config = Config::load(PathBuf::from(config_path))?;

            let resolved_fixtures_path = fixtures_path
                .or_else(|| config.fixtures_path.clone())
                .ok_or("no fixtures path given on the command line or in the config file")?;
            let table = load_fixture_table(PathBuf::from(resolved_fixtures_path))?;

            let sinks = resolve_sinks(&config.sinks).await?;

            let override_group = CueGroup::new("override", 100).register(
                "system-blackout",
                Box::new(SystemBlackoutCue {
                    protected_layer: config.protected_layer_min,
                }),
            );
            let registry = CueRegistry::new(vec![CueGroup::new("base", 0), override_group]);

            let clock = Arc::new(Clock::new(config.tick_hz));
            let sequencer = Sequencer::start(config, table, sinks, registry, clock.clone()).await;
            clock.start().await;

            info!("strobecue running, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;

            info!("shutting down");
            sequencer.shutdown().await?;
        }
        Commands::Devices {} => {
            let ports = rust_dmx::EnttecDmxPort::available_ports()
                .map_err(|e| format!("unable to list Enttec ports: {e}"))?;

            if ports.is_empty() {
                println!("No Enttec-class DMX devices found.");
                return Ok(());
            }

            println!("Devices (count: {}):", ports.len());
            for (index, _port) in ports.iter().enumerate() {
                println!("- port {index}");
            }
        }
    }

    Ok(())
}

/// Resolves every configured `SinkConfig` into its concrete `Sink`
/// implementation. A single sink failing to bind/open aborts startup rather
/// than running with a silently incomplete fanout, since a missing output is
/// a configuration error the operator needs to see immediately.
async fn resolve_sinks(configs: &[SinkConfig]) -> Result<Vec<Arc<dyn Sink>>, Box<dyn Error>> {
    let mut sinks: Vec<Arc<dyn Sink>> = Vec::with_capacity(configs.len());

    for config in configs {
        let sink: Arc<dyn Sink> = match config {
            SinkConfig::Sacn { name, target } => {
                let addr: SocketAddr = target.parse()?;
                Arc::new(SacnSink::bind(name.clone(), addr).await?)
            }
            SinkConfig::Artnet { name, target } => {
                let addr: SocketAddr = target.parse()?;
                Arc::new(ArtnetSink::bind(name.clone(), addr).await?)
            }
            SinkConfig::Enttec { name } => Arc::new(EnttecSink::open(name.clone())?),
            SinkConfig::Preview { name } => Arc::new(PreviewSink::new(name.clone())),
        };
        sinks.push(sink);
    }

    Ok(sinks)
}
