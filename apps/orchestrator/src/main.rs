use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tracing::{Level, error, info, warn};
use worldbus::frame::{FrameReader, FrameWriter};
use worldbus::topic::Inbound;

mod bootstrap;
mod commands;
mod contract;
mod entities;
mod items;
mod remote;
mod rooms;
mod store;
mod transcript;
mod world;

use store::Store;
use transcript::Transcripts;
use world::{World, WorldConfig};

fn usage_and_exit() -> ! {
    eprintln!(
        "orchestrator\n\n\
USAGE:\n  orchestrator [--bind HOST:PORT] [--store PATH] [--bootstrap PATH] [WORLD_NAME]\n\n\
ENV:"
    );
    for (key, about) in [
        ("BUS_BIND", "default 127.0.0.1:4300 (the broker connects here)"),
        ("ORCHESTRATOR_WORLD_NAME", "default corvid"),
        ("LANDSCAPE_DESCRIPTION", "optional; flavours AI prompts and room images"),
        ("WORLD_TICK_MS", "default 30000 (min 10)"),
        ("IDLE_TIMEOUT_MS", "default 300000"),
        ("AI_TIMEOUT_MS", "default 120000"),
        ("LOGOUT_GRACE_MS", "default 3000"),
        ("ANIMALS_ACTIVE", "default true"),
        ("AI_ENABLED", "default true"),
        ("WORLD_SEED", "default 1"),
        ("WORLD_STORE", "default var/<world>.jsonl"),
        ("WORLD_BOOTSTRAP", "optional seed YAML, used when the store has no rooms"),
        ("TRANSCRIPT_DIR", "default logs (empty disables transcripts)"),
    ] {
        eprintln!("  {key:<27} {about}");
    }
    std::process::exit(2);
}

#[derive(Clone, Debug)]
struct Config {
    bind: SocketAddr,
    world: WorldConfig,
    store_path: PathBuf,
    bootstrap: Option<PathBuf>,
    transcript_dir: Option<PathBuf>,
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_args() -> Config {
    let mut bind: SocketAddr = std::env::var("BUS_BIND")
        .unwrap_or_else(|_| "127.0.0.1:4300".to_string())
        .parse()
        .unwrap_or_else(|_| usage_and_exit());
    let mut name = std::env::var("ORCHESTRATOR_WORLD_NAME")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "corvid".to_string());
    let mut store_path: Option<PathBuf> = std::env::var("WORLD_STORE").ok().map(PathBuf::from);
    let mut bootstrap: Option<PathBuf> = std::env::var("WORLD_BOOTSTRAP")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from);
    let transcript_dir = match std::env::var("TRANSCRIPT_DIR") {
        Ok(v) if v.trim().is_empty() => None,
        Ok(v) => Some(PathBuf::from(v)),
        Err(_) => Some(PathBuf::from("logs")),
    };

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--bind" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                bind = v.parse().unwrap_or_else(|_| usage_and_exit());
            }
            "--store" => {
                store_path = Some(it.next().unwrap_or_else(|| usage_and_exit()).into());
            }
            "--bootstrap" => {
                bootstrap = Some(it.next().unwrap_or_else(|| usage_and_exit()).into());
            }
            "-h" | "--help" => usage_and_exit(),
            s if s.starts_with('-') => usage_and_exit(),
            s => name = s.to_string(),
        }
    }

    let world = WorldConfig {
        name: name.clone(),
        landscape: std::env::var("LANDSCAPE_DESCRIPTION")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()),
        seed: env_u64("WORLD_SEED", 1),
        tick_ms: env_u64("WORLD_TICK_MS", 30_000).max(10),
        idle_timeout_ms: env_u64("IDLE_TIMEOUT_MS", 300_000),
        ai_timeout_ms: env_u64("AI_TIMEOUT_MS", 120_000),
        logout_grace_ms: env_u64("LOGOUT_GRACE_MS", 3_000),
        animals_active: env_bool("ANIMALS_ACTIVE", true),
        ai_enabled: env_bool("AI_ENABLED", true),
    };

    Config {
        bind,
        store_path: store_path.unwrap_or_else(|| format!("var/{name}.jsonl").into()),
        world,
        bootstrap,
        transcript_dir,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,orchestrator=info".into()),
        )
        .with_target(false)
        .with_max_level(Level::INFO)
        .init();

    let cfg = parse_args();

    let store = Store::open(cfg.store_path.clone())
        .with_context(|| format!("open world store {}", cfg.store_path.display()))?;
    let seed = cfg
        .bootstrap
        .as_deref()
        .map(bootstrap::load_seed)
        .transpose()?;
    let mut world = World::new(
        cfg.world.clone(),
        store,
        Transcripts::new(cfg.transcript_dir.clone()),
        seed,
    )?;

    let listener = TcpListener::bind(cfg.bind).await?;
    info!(bind = %cfg.bind, world = %world.name(), "orchestrator listening");

    // One clock for the life of the process, so schedules survive bus reconnects.
    let start = Instant::now();

    loop {
        let (stream, peer) = listener.accept().await?;
        info!(peer = %peer, "bus connected");

        match handle_bus(stream, &mut world, start).await {
            Ok(()) => info!(peer = %peer, "bus disconnected"),
            Err(BusEnd::Io(e)) => warn!(peer = %peer, err = %e, "bus connection ended with error"),
            Err(BusEnd::World(e)) => {
                error!(err = ?e, "world state is inconsistent; shutting down");
                return Err(e);
            }
        }
        if let Err(e) = world.drop_all_sessions() {
            error!(err = ?e, "failed to persist sessions after bus loss");
            return Err(e);
        }
    }
}

/// Why a bus connection stopped being served.
enum BusEnd {
    Io(std::io::Error),
    World(anyhow::Error),
}

impl From<std::io::Error> for BusEnd {
    fn from(e: std::io::Error) -> Self {
        BusEnd::Io(e)
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

async fn flush_outbox(
    world: &mut World,
    fw: &mut FrameWriter<tokio::net::tcp::OwnedWriteHalf>,
) -> std::io::Result<()> {
    let out = world.take_outbox();
    if out.is_empty() {
        return Ok(());
    }
    for o in out {
        fw.write_envelope(&o.to_envelope()).await?;
    }
    fw.flush().await
}

async fn handle_bus(stream: TcpStream, world: &mut World, start: Instant) -> Result<(), BusEnd> {
    let (rd, wr) = stream.into_split();
    let mut fr = FrameReader::new(rd);
    let mut fw = FrameWriter::new(wr);

    loop {
        world.set_now(elapsed_ms(start));
        world.run_due_events().map_err(BusEnd::World)?;
        flush_outbox(world, &mut fw).await?;

        let sleep_ms = world.next_event_in_ms().unwrap_or(u64::MAX);

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(sleep_ms.min(86_400_000))) => {
                // Wake up to process due events.
            }
            res = fr.read_envelope() => {
                let env = match res? {
                    Some(Ok(env)) => env,
                    Some(Err(e)) => {
                        warn!(err = %e, "dropping undecodable frame");
                        continue;
                    }
                    None => return Ok(()),
                };
                let ev = match Inbound::from_envelope(env) {
                    Ok(ev) => ev,
                    Err(e) => {
                        warn!(err = %e, "dropping bus message");
                        continue;
                    }
                };
                let topic = ev.topic();
                world.set_now(elapsed_ms(start));
                world
                    .handle_inbound(ev)
                    .with_context(|| format!("handling {topic}"))
                    .map_err(BusEnd::World)?;
                flush_outbox(world, &mut fw).await?;
            }
        }
    }
}
