//! CLI application for controlling Philips Hue lights.
//!
//! Discovers bridges, pairs with one through the link button and changes
//! the state of single lights or whole groups.
//!
//! Run with: cargo run --example hue_cli -- --help
//! Set `RUST_LOG=debug` to see every request sent to the bridge.

use std::net::IpAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use hue_lights_rs::{Bridge, DiscoveryConfig, LightControl, LightHandle, discover_bridges};

#[derive(Parser)]
#[command(name = "hue-cli")]
#[command(about = "Control Philips Hue lights from the command line", long_about = None)]
struct Cli {
    /// IP address of the bridge (not required for discover command)
    #[arg(short, long, global = true)]
    ip: Option<IpAddr>,

    /// Username granted by the bridge
    #[arg(short, long, global = true, env = "HUE_USERNAME")]
    username: Option<String>,

    /// Target a group instead of a light
    #[arg(short, long, global = true)]
    group: bool,

    /// Transition time in tenths of a second
    #[arg(short, long, global = true)]
    transition: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover Hue bridges on the network
    Discover {
        /// Number of search rounds (1-4)
        #[arg(short, long, default_value = "3")]
        attempts: u32,
    },

    /// Pair with the bridge (press the link button first)
    Auth {
        /// Give up immediately instead of waiting for the link button
        #[arg(long)]
        no_wait: bool,
    },

    /// List lights and groups
    List,

    /// Turn a light or group on
    On { id: u32 },

    /// Turn a light or group off
    Off { id: u32 },

    /// Set brightness (0-255)
    Brightness {
        id: u32,
        #[arg(value_parser = clap::value_parser!(i32).range(0..=255))]
        level: i32,
    },

    /// Set hue (0-65535)
    Hue {
        id: u32,
        #[arg(value_parser = clap::value_parser!(i32).range(0..=65535))]
        value: i32,
    },

    /// Set color temperature in mired (153-500)
    Ct {
        id: u32,
        #[arg(value_parser = clap::value_parser!(i32).range(153..=500))]
        mired: i32,
    },

    /// Show or change the bridge name
    Name {
        /// New name, 4 to 16 characters
        name: Option<String>,
    },
}

async fn target(bridge: &Bridge, id: u32, group: bool) -> Result<LightHandle, Box<dyn std::error::Error>> {
    let handle = if group {
        bridge
            .group(id)
            .await?
            .map(LightHandle::from)
            .ok_or_else(|| format!("no group with id {id}"))?
    } else {
        bridge
            .light(id)
            .await?
            .map(LightHandle::from)
            .ok_or_else(|| format!("no light with id {id}"))?
    };
    Ok(handle)
}

fn describe(light: &Arc<hue_lights_rs::Light>) -> String {
    let state = light.cached_state();
    let mut line = format!("{:3}  {:20}  {}", light.id(), light.name(), if state.on() { "ON " } else { "OFF" });
    if let Some(brightness) = state.brightness() {
        line.push_str(&format!("  bri {:3}", brightness.value()));
    }
    if let Some(mode) = state.color_mode() {
        line.push_str(&format!("  mode {mode:?}"));
    }
    if state.reachable() == Some(false) {
        line.push_str("  (unreachable)");
    }
    line
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    if let Commands::Discover { attempts } = cli.command {
        println!("Searching for Hue bridges ({attempts} rounds)...");
        let config = DiscoveryConfig {
            attempts,
            ..Default::default()
        };
        let report = discover_bridges(&config).await?;
        if report.bridges.is_empty() {
            println!("No bridges found on the network.");
        } else {
            println!("\nFound {} bridge(s):", report.bridges.len());
            for bridge in &report.bridges {
                println!("  {bridge}");
            }
        }
        for failure in &report.errors {
            eprintln!("  skipped {}: {}", failure.source, failure.error);
        }
        return Ok(());
    }

    // All other commands require a bridge address
    let ip = cli.ip.ok_or("bridge IP address is required for this command. Use --ip <IP>")?;
    let bridge = Bridge::new(ip, cli.username.as_deref())?;

    if let Commands::Auth { no_wait } = cli.command {
        if !no_wait {
            println!("Press the link button on the bridge at {ip}...");
        }
        if bridge.authenticate(!no_wait).await? {
            println!("Authenticated to {bridge}");
            if let Some(username) = bridge.username() {
                println!("  username: {username}");
            }
        } else {
            eprintln!("The bridge did not grant access.");
        }
        return Ok(());
    }

    if !bridge.authenticate(false).await? {
        return Err("not authenticated. Run `auth` first and pass --username".into());
    }

    match cli.command {
        Commands::Discover { .. } | Commands::Auth { .. } => unreachable!(),

        Commands::List => {
            println!("{bridge}");
            println!("\nLights:");
            for light in bridge.lights().await? {
                println!("  {}", describe(&light));
            }
            println!("\nGroups:");
            for group in bridge.groups().await? {
                println!("  {:3}  {:20}  lights {:?}", group.id(), group.name(), group.light_ids());
            }
        }

        Commands::On { id } => {
            let handle = target(&bridge, id, cli.group).await?;
            handle.transaction(cli.transition, || handle.set_on(true)).await?;
            println!("{handle} turned ON");
        }

        Commands::Off { id } => {
            let handle = target(&bridge, id, cli.group).await?;
            handle.transaction(cli.transition, || handle.set_on(false)).await?;
            println!("{handle} turned OFF");
        }

        Commands::Brightness { id, level } => {
            let handle = target(&bridge, id, cli.group).await?;
            handle
                .transaction(cli.transition, || async {
                    handle.set_on(true).await?;
                    handle.set_brightness(level).await
                })
                .await?;
            println!("{handle} brightness set to {level}");
        }

        Commands::Hue { id, value } => {
            let handle = target(&bridge, id, cli.group).await?;
            handle
                .transaction(cli.transition, || async {
                    handle.set_on(true).await?;
                    handle.set_hue(value).await
                })
                .await?;
            println!("{handle} hue set to {value}");
        }

        Commands::Ct { id, mired } => {
            let handle = target(&bridge, id, cli.group).await?;
            handle
                .transaction(cli.transition, || async {
                    handle.set_on(true).await?;
                    handle.set_color_temperature(mired).await
                })
                .await?;
            println!("{handle} color temperature set to {mired} mired");
        }

        Commands::Name { name } => match name {
            Some(name) => {
                bridge.set_name(&name).await?;
                println!("Bridge renamed to {}", bridge.name().await?);
            }
            None => println!("{}", bridge.name().await?),
        },
    }

    Ok(())
}
