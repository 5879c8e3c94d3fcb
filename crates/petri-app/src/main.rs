use anyhow::{Context, Result};
use clap::Parser;
use petri_core::{PetriConfig, World};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "petri",
    version,
    about = "Headless bytecode-genome artificial life simulator"
)]
struct Cli {
    /// World RNG seed.
    #[arg(long, default_value_t = petri_core::DEFAULT_SEED)]
    seed: u64,

    /// Number of ticks to simulate.
    #[arg(long, default_value_t = 10_000)]
    ticks: u64,

    /// Worker band count (defaults to available parallelism).
    #[arg(long)]
    threads: Option<usize>,

    /// Grid width in cells.
    #[arg(long, default_value_t = 256)]
    width: u32,

    /// Grid height in cells.
    #[arg(long, default_value_t = 128)]
    height: u32,

    /// Emit a summary log every N ticks (0 disables periodic logs).
    #[arg(long, default_value_t = 500)]
    log_every: u64,

    /// Write the final frame to this path as a binary PPM image.
    #[arg(long)]
    frame_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = PetriConfig {
        world_width: cli.width,
        world_height: cli.height,
        rng_seed: Some(cli.seed),
        worker_threads: cli.threads,
        ..PetriConfig::default()
    };
    let mut world = World::new(config)?;
    world.populate();
    info!(
        seed = cli.seed,
        width = cli.width,
        height = cli.height,
        bots = world.alive_count(),
        "world seeded"
    );

    for _ in 0..cli.ticks {
        let summary = world.step();
        if cli.log_every > 0 && summary.tick.0.is_multiple_of(cli.log_every) {
            let average_energy = if summary.alive > 0 {
                summary.total_energy / summary.alive as i64
            } else {
                0
            };
            info!(
                tick = summary.tick.0,
                alive = summary.alive,
                deaths = summary.deaths,
                moves = summary.moves,
                blocked = summary.moves_blocked,
                attacks = summary.attacks,
                average_energy,
                "tick summary"
            );
        }
        if world.alive_count() == 0 {
            info!(tick = world.tick().0, "population extinct; stopping early");
            break;
        }
    }

    let (alive, tick) = world.stats();
    info!(tick = tick.0, alive, "simulation finished");

    if let Some(path) = &cli.frame_out {
        write_frame_ppm(&world, path)
            .with_context(|| format!("writing frame to {}", path.display()))?;
        info!(path = %path.display(), "final frame written");
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// Dump the current frame as a binary PPM (the RGBA alpha channel is
/// dropped; PPM carries RGB only).
fn write_frame_ppm(world: &World, path: &Path) -> Result<()> {
    let mut frame = vec![0u8; world.frame_len()];
    world.render_into(&mut frame);

    let mut out = Vec::with_capacity(frame.len());
    out.extend_from_slice(format!("P6\n{} {}\n255\n", world.width(), world.height()).as_bytes());
    for pixel in frame.chunks_exact(4) {
        out.extend_from_slice(&pixel[..3]);
    }
    std::fs::write(path, out)?;
    Ok(())
}
