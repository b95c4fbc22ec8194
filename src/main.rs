use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use traffic_sim::app::SimulationController;
use traffic_sim::config::SimulationConfig;
use traffic_sim::domain::RoadGrid;
use traffic_sim::domain::segment::find_edge_segments;
use traffic_sim::logging;
use traffic_sim::render::{FrameRenderer, save_png};
use traffic_sim::sync::LockMode;

#[derive(Debug, Parser)]
#[command(name = "traffic-sim", version, about = "Multi-threaded road traffic simulator")]
struct Cli {
    /// Increase log detail (-v per car, -vv every move)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the simulation on a grid file
    Run(RunArgs),
    /// Print a grid file and its entry segments
    Show {
        #[arg(long)]
        grid: PathBuf,
    },
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Grid file to load
    #[arg(long)]
    grid: PathBuf,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// How long cars are inserted, in seconds
    #[arg(long, default_value_t = 10)]
    duration_secs: u64,

    #[arg(long)]
    max_vehicles: Option<u32>,

    /// Minimum gap between spawns, in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    #[arg(long, value_enum)]
    lock_mode: Option<LockMode>,

    /// Switch to the other lock mode after this many seconds
    #[arg(long)]
    switch_lock_mode_at: Option<u64>,

    /// How long to wait for the grid to empty after insertion stops
    #[arg(long, default_value_t = 30)]
    drain_secs: u64,

    /// Write a PNG frame of the grid into this directory periodically
    #[arg(long)]
    frames_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 500)]
    frame_every_ms: u64,

    /// Frame cell size in pixels
    #[arg(long, default_value_t = 24)]
    cell_px: u32,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Command::Run(args) => run(args),
        Command::Show { grid } => show(grid),
    }
}

fn load_config(args: &RunArgs) -> Result<SimulationConfig> {
    let mut config = match &args.config {
        Some(path) => SimulationConfig::from_path(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => SimulationConfig::default(),
    };

    if let Some(max_vehicles) = args.max_vehicles {
        config.max_vehicles = max_vehicles;
    }
    if let Some(interval_ms) = args.interval_ms {
        config.insert_interval_ms = interval_ms;
    }
    if let Some(lock_mode) = args.lock_mode {
        config.lock_mode = lock_mode;
    }
    Ok(config.sanitized())
}

fn other_mode(mode: LockMode) -> LockMode {
    match mode {
        LockMode::Semaphore => LockMode::Monitor,
        LockMode::Monitor => LockMode::Semaphore,
    }
}

/// Periodic PNG capture of the running simulation
struct FrameSink {
    dir: PathBuf,
    every: Duration,
    cell_px: u32,
    renderer: FrameRenderer,
    next_at: Instant,
    written: u64,
}

impl FrameSink {
    fn new(dir: PathBuf, every_ms: u64, cell_px: u32) -> Result<Self> {
        fs::create_dir_all(&dir).with_context(|| format!("creating frames directory {}", dir.display()))?;
        Ok(Self {
            dir,
            every: Duration::from_millis(every_ms.max(1)),
            cell_px,
            renderer: FrameRenderer::new(),
            next_at: Instant::now(),
            written: 0,
        })
    }

    fn capture_if_due(&mut self, controller: &SimulationController) -> Result<()> {
        if Instant::now() < self.next_at {
            return Ok(());
        }
        self.next_at += self.every;

        let pixmap = self
            .renderer
            .render(controller.grid(), &controller.snapshot(), self.cell_px)
            .context("rendering frame")?;
        let path = self.dir.join(format!("frame-{:05}.png", self.written));
        save_png(&pixmap, &path).with_context(|| format!("writing {}", path.display()))?;
        self.written += 1;
        Ok(())
    }
}

fn run(args: RunArgs) -> Result<()> {
    let config = load_config(&args)?;
    let grid = RoadGrid::from_path(&args.grid)
        .with_context(|| format!("loading grid from {}", args.grid.display()))?;

    let segments = find_edge_segments(&grid);
    if segments.is_empty() {
        tracing::warn!("grid has no entry segments, no car will be inserted");
    }
    tracing::info!(
        rows = grid.rows(),
        cols = grid.cols(),
        entries = segments.len(),
        "grid loaded"
    );

    let mut frames = match &args.frames_dir {
        Some(dir) => Some(FrameSink::new(dir.clone(), args.frame_every_ms, args.cell_px)?),
        None => None,
    };

    let mut controller = SimulationController::new(grid, config);
    controller.start().context("starting simulation")?;

    let started = Instant::now();
    let run_for = Duration::from_secs(args.duration_secs);
    let mut switch_at = args.switch_lock_mode_at.map(Duration::from_secs);
    let tick = Duration::from_millis(50);

    while started.elapsed() < run_for {
        if switch_at.is_some_and(|at| started.elapsed() >= at) {
            switch_at = None;
            let mode = other_mode(controller.lock_mode());
            controller.set_lock_mode(mode).context("switching lock mode")?;
        }
        if let Some(frames) = frames.as_mut() {
            frames.capture_if_due(&controller)?;
        }
        thread::sleep(tick);
    }

    controller.stop_insertion();
    let drain_deadline = Instant::now() + Duration::from_secs(args.drain_secs);
    let drained = loop {
        if let Some(frames) = frames.as_mut() {
            frames.capture_if_due(&controller)?;
        }
        if controller.wait_until_empty(tick) {
            break true;
        }
        if Instant::now() >= drain_deadline {
            break false;
        }
    };
    if !drained {
        tracing::warn!(remaining = controller.active_count(), "grid did not drain in time, stopping all cars");
    }

    controller.stop_all();
    let stats = controller.stats();
    println!(
        "spawned: {}  exited: {}  moves: {}  lock mode: {}",
        stats.spawned,
        stats.exited,
        stats.moves,
        controller.lock_mode()
    );
    if let Some(frames) = frames {
        println!("frames written: {} ({})", frames.written, frames.dir.display());
    }
    Ok(())
}

fn show(path: PathBuf) -> Result<()> {
    let grid = RoadGrid::from_path(&path).with_context(|| format!("loading grid from {}", path.display()))?;

    println!("{}x{} grid", grid.rows(), grid.cols());
    print!("{}", grid.to_text());

    let segments = find_edge_segments(&grid);
    println!("{} entry segments", segments.len());
    for segment in segments {
        println!(
            "  {} -> {} heading {} ({} cells)",
            segment.start,
            segment.end,
            segment.direction,
            segment.cell_count()
        );
    }
    Ok(())
}
