//! Wall node launcher
//!
//! Runs a whole wall in one process: one frame loop thread per screen,
//! connected through the in-process cluster transport, with the master
//! publishing from the main thread.
//!
//! Run with: cargo run -p wall_node -- [--config wall.toml] [content...]
//!       or: cargo run -p wall_node -- --generate photo.jpg photo.pyr

use crossbeam_channel::RecvTimeoutError;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use wall_core::PointF;
use wall_node::{FrameLoop, HeadlessPresenter, NodeError, NodeResult, WallConfig, WallMaster};
use wall_sync::{LocalCluster, Publisher, WallChannel};
use wall_tiles::{PyramidGenerator, TileError};

/// How often the master checks on the nodes
const MASTER_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    generate: Option<(PathBuf, PathBuf)>,
    content: Vec<String>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter.next().ok_or("--config needs a path")?;
                args.config = Some(PathBuf::from(path));
            }
            "--generate" => {
                let image = iter.next().ok_or("--generate needs an image")?;
                let manifest = iter.next().ok_or("--generate needs a manifest path")?;
                args.generate = Some((PathBuf::from(image), PathBuf::from(manifest)));
            }
            flag if flag.starts_with("--") => return Err(format!("unknown option {}", flag)),
            _ => args.content.push(arg),
        }
    }
    Ok(args)
}

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).init();

    println!();
    println!("╔═══════════════════════════════════════════════════════════╗");
    println!("║                 TILED DISPLAY WALL v0.1.0                 ║");
    println!("║                                                           ║");
    println!("║  Every screen shows the same frame, or none at all.       ║");
    println!("╚═══════════════════════════════════════════════════════════╝");
    println!();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("usage: wallnode [--config <wall.toml>] [--generate <image> <manifest.pyr>] [content...]");
            std::process::exit(2);
        }
    };

    let result = match &args.generate {
        Some((image, manifest)) => generate_pyramid(&args, image, manifest),
        None => run_wall(&args),
    };
    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

/// Build a precomputed pyramid from a full resolution image
fn generate_pyramid(args: &Args, image: &Path, manifest: &Path) -> NodeResult<()> {
    let config = WallConfig::load(args.config.as_deref())?;
    log::info!("Generating pyramid for {}", image.display());
    let source = image::open(image).map_err(TileError::from)?.to_rgba8();
    let manifest = PyramidGenerator::new(config.tiles.tile_size).generate(&source, manifest)?;
    log::info!(
        "Wrote {} LODs for {}",
        manifest.levels.len(),
        manifest.content_size()
    );
    Ok(())
}

fn run_wall(args: &Args) -> NodeResult<()> {
    let config = WallConfig::load(args.config.as_deref())?;
    config.print_summary();

    let nodes = config.node_count();
    let (_cluster, channels, publisher) = LocalCluster::new(nodes, config.collective_timeout());
    let epoch = Instant::now();
    let (done_tx, done_rx) = crossbeam_channel::unbounded::<(usize, NodeResult<u64>)>();

    let mut handles = Vec::with_capacity(nodes);
    for channel in channels {
        let rank = channel.rank();
        let config = config.clone();
        let done = done_tx.clone();
        let handle = thread::Builder::new()
            .name(format!("wall-node-{}", rank))
            .spawn(move || {
                let presenter = HeadlessPresenter::new(config.layout().screen_size);
                let result = FrameLoop::new(channel, presenter, &config, epoch)
                    .and_then(|mut frame_loop| frame_loop.run(config.render.max_frames));
                let _ = done.send((rank, result));
            })?;
        handles.push(handle);
    }
    drop(done_tx);

    let mut master = WallMaster::new(publisher, config.layout(), config.options(), epoch);
    open_session(&mut master, &config, args);

    // Install signal handler for graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C, shutting down...");
        r.store(false, Ordering::SeqCst);
    }) {
        log::warn!("Failed to set Ctrl+C handler: {}", e);
    }

    log::info!("Wall running on {} nodes. Press Ctrl+C to exit.", nodes);

    let mut finished = 0;
    let mut failures = 0;
    let mut quit_sent = false;
    let mut tick: u64 = 0;
    while finished < nodes {
        match done_rx.recv_timeout(MASTER_TICK) {
            Ok((rank, result)) => {
                finished += 1;
                match result {
                    Ok(frames) => log::info!("Node {} finished after {} frames", rank, frames),
                    Err(e) => {
                        log::error!("Node {} failed: {}", rank, e);
                        failures += 1;
                    }
                }
                if !quit_sent {
                    quit_sent = true;
                    send_quit(&master);
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if !running.load(Ordering::SeqCst) && !quit_sent {
                    quit_sent = true;
                    send_quit(&master);
                } else if !quit_sent {
                    tick += 1;
                    animate_marker(&mut master, tick);
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    for handle in handles {
        if handle.join().is_err() {
            failures += 1;
        }
    }

    if failures > 0 {
        return Err(NodeError::NodesFailed(failures));
    }
    log::info!("Wall stopped");
    Ok(())
}

/// Open the content given on the command line, else the configured session
fn open_session<P: Publisher>(master: &mut WallMaster<P>, config: &WallConfig, args: &Args) {
    let mut content = if args.content.is_empty() {
        config.session.content.clone()
    } else {
        args.content.clone()
    };
    if content.is_empty() {
        let wall = config.layout().total_size();
        content.push(format!("{}x{}.pattern", wall.width * 2, wall.height * 2));
    }

    let factory = config.data_source_factory();
    for uri in &content {
        if let Err(e) = master.open_content(&factory, uri) {
            log::warn!("Cannot open {}: {}", uri, e);
        }
    }
}

fn send_quit<P: Publisher>(master: &WallMaster<P>) {
    // Nodes that already stopped no longer listen
    if let Err(e) = master.quit() {
        log::debug!("Quit not delivered to every node: {}", e);
    }
}

/// Move a touch marker around the wall center
fn animate_marker<P: Publisher>(master: &mut WallMaster<P>, tick: u64) {
    let angle = tick as f64 * 0.1;
    let position = PointF::new(0.5 + 0.25 * angle.cos(), 0.5 + 0.25 * angle.sin());
    if let Err(e) = master.set_marker(0, position) {
        log::debug!("Marker update not delivered: {}", e);
    }
}
