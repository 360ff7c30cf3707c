use clap::{Parser, Subcommand};
use flowcut::config;
use flowcut::telemetry::init_logging;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "flowcut")]
#[command(about = "Flow offload fast path with a simulated dataplane")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the offload demo against a simulated topology
    Run {
        /// Path to config.toml (defaults apply when absent)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Validate config.toml without running
    Validate {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Validate {
            config: config_path,
        }) => {
            init_logging(None);
            if let Err(e) = cmd_validate(&config_path) {
                eprintln!("[ERROR] {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Run {
            config: config_path,
        }) => {
            if let Err(e) = cmd_run(config_path.as_deref()) {
                eprintln!("[ERROR] {}", e);
                std::process::exit(1);
            }
        }
        None => {
            if let Err(e) = cmd_run(None) {
                eprintln!("[ERROR] {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn cmd_validate(config_path: &PathBuf) -> Result<(), String> {
    println!("[INFO] Validating {}...", config_path.display());
    config::load(config_path).map_err(|e| format!("Failed to parse config: {}", e))?;
    println!("[INFO] Configuration is valid");
    Ok(())
}

fn cmd_run(config_path: Option<&std::path::Path>) -> Result<(), String> {
    use flowcut::conn::{ConnTuple, Connection, TcpConnState, TransportProtocol};
    use flowcut::offload::{Offload, OffloadDeps, PacketMeta, TcpFlags};
    use flowcut::sim::{MemFlowTables, RecordingHooks, RecordingHw, SimNeighbors, SimNet, SimRoutes};
    use flowcut::device::NeighborState;
    use flowcut::types::{Family, MacAddr};
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;
    use tokio::runtime::Runtime;

    let cfg = match config_path {
        Some(path) => config::load(path).map_err(|e| format!("Failed to load config: {}", e))?,
        None => config::Config::default(),
    };
    init_logging(Some(&cfg.log));

    let rt = Runtime::new().map_err(|e| format!("Failed to create runtime: {}", e))?;

    rt.block_on(async move {
        // Two-port topology: a LAN client talking to a WAN server
        let net = Arc::new(SimNet::new());
        net.add_ethernet(1, "lan0", MacAddr([0x02, 0, 0, 0, 0, 1]));
        net.add_ethernet(2, "wan0", MacAddr([0x02, 0, 0, 0, 0, 2]));

        let client = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 100));
        let server = IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34));

        let routes = Arc::new(SimRoutes::new());
        routes.add(client, 1, false);
        routes.add(server, 2, false);

        let neighbors = Arc::new(SimNeighbors::new());
        neighbors.add(client, MacAddr([0x0a, 0, 0, 0, 0, 1]), NeighborState::Reachable);
        neighbors.add(server, MacAddr([0x0a, 0, 0, 0, 0, 2]), NeighborState::Reachable);

        let installer = Arc::new(RecordingHooks::new());
        let hardware = Arc::new(RecordingHw::new());
        let deps = OffloadDeps {
            devices: net.clone(),
            routes,
            neighbors,
            installer: installer.clone(),
            hardware,
        };

        let offload = Offload::new(cfg.offload.clone(), deps, &MemFlowTables::new())
            .map_err(|e| format!("Failed to set up offload tables: {}", e))?;
        let offload = Arc::new(offload);
        offload.start();

        // An established TCP connection from the client
        let mut conn = Connection::new(
            ConnTuple::new(client, server, 40000, 443),
            TransportProtocol::Tcp,
        );
        conn.set_helper(false);
        let conn = Arc::new(conn);
        conn.confirm();
        conn.set_tcp_state(TcpConnState::Established);

        let pkt = PacketMeta {
            family: Family::Ipv4,
            has_sec_path: false,
            has_ip_options: false,
            tcp: Some(TcpFlags::default()),
            reply: false,
            in_ifindex: Some(1),
            out_ifindex: Some(2),
            netns: 0,
        };
        offload.process(&pkt, Some(&conn));
        info!("admitted connection {:?}", conn.tuple(flowcut::types::Direction::Original));

        // Let the collector install the hooks admission queued
        tokio::time::sleep(Duration::from_millis(50)).await;
        info!(installs = installer.installs(), "hooks installed");

        // Pull the WAN port: hooks come off and the flow is purged
        net.remove_device(2);
        offload.device_removed(2);
        tokio::time::sleep(Duration::from_millis(50)).await;

        for (name, value) in offload.metrics().export() {
            println!("{} = {}", name, value);
        }

        offload.shutdown();
        Ok(())
    })
}
