//! Core simulation engine for the petri workspace.
//!
//! A toroidal 2D grid of cells, each holding organic matter and at most one
//! bot. Bots interpret a fixed-length bytecode genome, competing for energy
//! via photosynthesis, scavenging, predation, and movement. Every tick reads
//! the current buffer and writes the next one; the buffers swap once all
//! worker bands have joined.

use rand::{Rng, SeedableRng, rngs::SmallRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroUsize;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::thread;
use thiserror::Error;

/// Number of opcodes in a bot genome.
pub const GENOME_SIZE: usize = 64;
/// Number of compass directions a bot can face.
pub const NUM_DIRECTIONS: u8 = 8;
/// Seed used when the configuration does not supply one.
pub const DEFAULT_SEED: u64 = 12_345;

/// Worker band count used when hardware parallelism cannot be queried.
const FALLBACK_WORKERS: usize = 4;

/// X offsets for the 8 compass directions (N, NE, E, SE, S, SW, W, NW).
pub const DIR_X: [i32; 8] = [0, 1, 1, 1, 0, -1, -1, -1];
/// Y offsets for the 8 compass directions.
pub const DIR_Y: [i32; 8] = [-1, -1, 0, 1, 1, 1, 0, -1];

/// Color of a freshly spawned or photosynthesising bot.
pub const COLOR_BOT: [u8; 4] = [0, 255, 0, 255];
/// Color taken on by a bot that scavenged organic matter.
pub const COLOR_EATER: [u8; 4] = [150, 0, 0, 255];

/// Opcode byte for photosynthesis.
pub const OP_PHOTOSYNTH: u8 = 20;
/// Opcode byte for eating organic matter.
pub const OP_EAT: u8 = 30;
/// Opcode byte for moving or attacking in the facing direction.
pub const OP_MOVE_OR_ATTACK: u8 = 40;

/// Monotonic tick counter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Tick(pub u64);

impl Tick {
    /// The tick before any stepping has happened.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// The tick following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Decoded genome instruction.
///
/// The genome byte space is deliberately sparse: everything outside the
/// listed ranges is a `Nop` that still costs the bot its action for the
/// tick. Unused ranges must not be collapsed into new opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Advance the instruction pointer by the payload, modulo genome length.
    Jump(u8),
    /// Rotate the facing direction clockwise by the payload.
    Turn(u8),
    /// Gain energy from light and turn green.
    Photosynth,
    /// Consume organic matter from the bot's own cell and turn red.
    Eat,
    /// Move into the facing cell, or attack the bot standing there.
    MoveOrAttack,
    /// End the turn without acting.
    Nop,
}

impl Opcode {
    /// Decode a raw genome byte.
    #[must_use]
    pub fn decode(byte: u8) -> Self {
        match byte {
            0..=7 => Self::Jump(byte),
            10..=15 => Self::Turn(byte - 10),
            OP_PHOTOSYNTH => Self::Photosynth,
            OP_EAT => Self::Eat,
            OP_MOVE_OR_ATTACK => Self::MoveOrAttack,
            _ => Self::Nop,
        }
    }

    /// Whether the opcode ends the bot's turn when executed.
    #[must_use]
    pub fn is_action(self) -> bool {
        !matches!(self, Self::Jump(_) | Self::Turn(_))
    }
}

/// A single agent occupying one grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bot {
    /// Bytecode genome, interpreted one opcode per VM step.
    pub genome: [u8; GENOME_SIZE],
    /// Instruction pointer into the genome, always in `[0, GENOME_SIZE)`.
    pub ip: u8,
    /// Facing direction in `[0, 8)`.
    pub dir: u8,
    /// Current energy; the bot decays once this reaches zero or below.
    pub energy: i32,
    /// RGBA display color, repainted by the feeding opcodes.
    pub color: [u8; 4],
}

impl Default for Bot {
    fn default() -> Self {
        Self {
            genome: [0; GENOME_SIZE],
            ip: 0,
            dir: 0,
            energy: 0,
            color: COLOR_BOT,
        }
    }
}

impl Bot {
    /// Build a bot with an explicit genome, facing, and energy.
    #[must_use]
    pub fn with_genome(genome: [u8; GENOME_SIZE], dir: u8, energy: i32) -> Self {
        Self {
            genome,
            ip: 0,
            dir: dir % NUM_DIRECTIONS,
            energy,
            color: COLOR_BOT,
        }
    }

    /// Build a bot with a uniformly random genome and facing.
    pub fn random<R: Rng + ?Sized>(rng: &mut R, energy: i32) -> Self {
        let mut bot = Self {
            energy,
            dir: rng.random::<u8>() % NUM_DIRECTIONS,
            ..Self::default()
        };
        rng.fill_bytes(&mut bot.genome);
        bot
    }
}

/// Errors produced while building a world.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorldError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Static configuration for a petri world.
///
/// Defaults describe the standard world: a 256x128 torus seeded at
/// roughly 21.5% bot density with genomes drawn from seed 12345.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PetriConfig {
    /// Width of the grid in cells.
    pub world_width: u32,
    /// Height of the grid in cells.
    pub world_height: u32,
    /// RNG seed; `None` falls back to [`DEFAULT_SEED`].
    pub rng_seed: Option<u64>,
    /// Maximum opcode fetches per bot per tick (infinite-loop safeguard).
    pub max_steps_per_tick: u32,
    /// Energy assigned to bots created by [`World::populate`].
    pub initial_energy: i32,
    /// Energy drained from every processed bot at the end of its tick.
    pub existence_cost: i32,
    /// Additional energy drained by a successful move.
    pub move_cost: i32,
    /// Energy gained by one photosynthesis action.
    pub photo_gain: i32,
    /// Maximum organic matter consumed by one eat action.
    pub eat_max: u32,
    /// Organic matter deposited when a bot decays.
    pub corpse_organic: u32,
    /// Ambient regrowth strikes a botless cell with probability 1/this.
    pub regrowth_denominator: u32,
    /// Organic matter added by one regrowth event.
    pub regrowth_amount: u32,
    /// Seeding places a bot where a sampled byte exceeds this threshold.
    pub spawn_threshold: u8,
    /// Seeding draws initial organic as a sampled byte modulo this value.
    pub initial_organic_range: u32,
    /// Worker band count; `None` uses hardware parallelism (fallback 4).
    pub worker_threads: Option<usize>,
    /// Maximum number of recent tick summaries retained in memory.
    pub history_capacity: usize,
}

impl Default for PetriConfig {
    fn default() -> Self {
        Self {
            world_width: 256,
            world_height: 128,
            rng_seed: None,
            max_steps_per_tick: 10,
            initial_energy: 500,
            existence_cost: 1,
            move_cost: 2,
            photo_gain: 5,
            eat_max: 20,
            corpse_organic: 50,
            regrowth_denominator: 1_000,
            regrowth_amount: 10,
            spawn_threshold: 200,
            initial_organic_range: 50,
            worker_threads: None,
            history_capacity: 256,
        }
    }
}

impl PetriConfig {
    /// Validates the configuration.
    fn validate(&self) -> Result<(), WorldError> {
        if self.world_width == 0 || self.world_height == 0 {
            return Err(WorldError::InvalidConfig(
                "world dimensions must be non-zero",
            ));
        }
        if self.max_steps_per_tick == 0 {
            return Err(WorldError::InvalidConfig(
                "max_steps_per_tick must be non-zero",
            ));
        }
        if self.regrowth_denominator == 0 {
            return Err(WorldError::InvalidConfig(
                "regrowth_denominator must be non-zero",
            ));
        }
        if self.initial_organic_range == 0 {
            return Err(WorldError::InvalidConfig(
                "initial_organic_range must be non-zero",
            ));
        }
        if self.history_capacity == 0 {
            return Err(WorldError::InvalidConfig(
                "history_capacity must be non-zero",
            ));
        }
        if self.worker_threads == Some(0) {
            return Err(WorldError::InvalidConfig(
                "worker_threads must be non-zero when set",
            ));
        }
        if self.initial_energy < 0
            || self.existence_cost < 0
            || self.move_cost < 0
            || self.photo_gain < 0
        {
            return Err(WorldError::InvalidConfig(
                "energy parameters must be non-negative",
            ));
        }
        Ok(())
    }

    /// Total number of cells in the grid.
    #[must_use]
    fn cell_count(&self) -> usize {
        self.world_width as usize * self.world_height as usize
    }

    /// Returns the RNG seeded from the configuration.
    fn seeded_rng(&self) -> SmallRng {
        SmallRng::seed_from_u64(self.rng_seed.unwrap_or(DEFAULT_SEED))
    }

    /// Resolves the worker band count for this run.
    fn band_count(&self) -> usize {
        self.worker_threads.unwrap_or_else(|| {
            thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(FALLBACK_WORKERS)
        })
    }
}

/// Per-tick statistics emitted by [`World::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickSummary {
    /// The tick these counters describe.
    pub tick: Tick,
    /// Bots carried into the new current buffer.
    pub alive: usize,
    /// Bots that decayed to organic matter this tick.
    pub deaths: usize,
    /// Successful relocations.
    pub moves: usize,
    /// Moves dropped because another bot claimed the destination first.
    pub moves_blocked: usize,
    /// Predation events (energy transfers; victims are never killed directly).
    pub attacks: usize,
    /// Summed energy of all surviving bots.
    pub total_energy: i64,
}

/// Plain per-band counters, accumulated locally and flushed once per band.
#[derive(Debug, Default, Clone, Copy)]
struct TickTotals {
    alive: usize,
    deaths: usize,
    moves: usize,
    moves_blocked: usize,
    attacks: usize,
    total_energy: i64,
}

/// Shared counters the worker bands flush into.
#[derive(Default)]
struct TickCounters {
    alive: AtomicUsize,
    deaths: AtomicUsize,
    moves: AtomicUsize,
    moves_blocked: AtomicUsize,
    attacks: AtomicUsize,
    total_energy: AtomicI64,
}

impl TickCounters {
    fn accumulate(&self, local: &TickTotals) {
        self.alive.fetch_add(local.alive, Ordering::Relaxed);
        self.deaths.fetch_add(local.deaths, Ordering::Relaxed);
        self.moves.fetch_add(local.moves, Ordering::Relaxed);
        self.moves_blocked
            .fetch_add(local.moves_blocked, Ordering::Relaxed);
        self.attacks.fetch_add(local.attacks, Ordering::Relaxed);
        self.total_energy
            .fetch_add(local.total_energy, Ordering::Relaxed);
    }

    fn totals(&self) -> TickTotals {
        TickTotals {
            alive: self.alive.load(Ordering::Relaxed),
            deaths: self.deaths.load(Ordering::Relaxed),
            moves: self.moves.load(Ordering::Relaxed),
            moves_blocked: self.moves_blocked.load(Ordering::Relaxed),
            attacks: self.attacks.load(Ordering::Relaxed),
            total_energy: self.total_energy.load(Ordering::Relaxed),
        }
    }
}

/// One simulation buffer: parallel per-cell arrays of organic matter, a
/// bot-present flag, and the bot payload.
///
/// During a tick the current buffer is read-only and the next buffer is
/// written under a claim protocol: a worker takes ownership of a cell's
/// payload slot by winning the compare-and-swap on its `occupied` flag.
/// Movement destinations are the only contested slots; a bot's own origin
/// cell cannot be contested because movers require the target to be empty
/// in the current buffer. All orderings are relaxed: exclusivity comes from
/// the CAS itself and cross-thread visibility of the payloads comes from
/// the fork/join barrier that ends the tick.
struct Grid {
    organic: Vec<AtomicU32>,
    occupied: Vec<AtomicBool>,
    bots: Vec<UnsafeCell<Bot>>,
}

// SAFETY: payload slots are written only by the claim winner during a tick
// (see the struct docs) or through `&mut` access between ticks, and read
// only from the read-only current buffer or after the join barrier.
unsafe impl Sync for Grid {}

impl Grid {
    fn new(len: usize) -> Self {
        Self {
            organic: (0..len).map(|_| AtomicU32::new(0)).collect(),
            occupied: (0..len).map(|_| AtomicBool::new(false)).collect(),
            bots: (0..len).map(|_| UnsafeCell::new(Bot::default())).collect(),
        }
    }

    fn len(&self) -> usize {
        self.occupied.len()
    }

    fn bot_present(&self, idx: usize) -> bool {
        self.occupied[idx].load(Ordering::Relaxed)
    }

    /// Copy of the bot at `idx`, if the slot is occupied.
    fn bot(&self, idx: usize) -> Option<Bot> {
        if self.bot_present(idx) {
            // SAFETY: occupied payload slots of a readable buffer have no
            // concurrent writers (struct-level protocol).
            Some(unsafe { *self.bots[idx].get() })
        } else {
            None
        }
    }

    fn organic(&self, idx: usize) -> u32 {
        self.organic[idx].load(Ordering::Relaxed)
    }

    /// Attempt to take ownership of the payload slot at `idx`.
    fn try_claim(&self, idx: usize) -> bool {
        self.occupied[idx]
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    /// Write a bot into a slot.
    ///
    /// # Safety
    /// The caller must have claimed `idx` via [`Grid::try_claim`] this tick.
    unsafe fn place_bot(&self, idx: usize, bot: Bot) {
        unsafe { *self.bots[idx].get() = bot }
    }

    fn set_organic(&self, idx: usize, value: u32) {
        self.organic[idx].store(value, Ordering::Relaxed);
    }

    fn add_organic(&self, idx: usize, amount: u32) {
        // u32 headroom dwarfs any reachable organic level (+50 per corpse).
        self.organic[idx].fetch_add(amount, Ordering::Relaxed);
    }
}

/// Owned copy of a world's observable cell state, for comparisons in tests
/// and host-side inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldSnapshot {
    /// Tick at which the snapshot was taken.
    pub tick: Tick,
    /// Bot (if any) per cell in row-major order.
    pub bots: Vec<Option<Bot>>,
    /// Organic level per cell in row-major order.
    pub organic: Vec<u32>,
}

impl WorldSnapshot {
    /// Number of occupied cells.
    #[must_use]
    pub fn alive(&self) -> usize {
        self.bots.iter().filter(|bot| bot.is_some()).count()
    }
}

/// The simulation: two cell buffers, a tick counter, and the world RNG.
pub struct World {
    config: PetriConfig,
    grids: [Grid; 2],
    current: usize,
    tick: Tick,
    alive: usize,
    bands: usize,
    rng: SmallRng,
    history: VecDeque<TickSummary>,
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("config", &self.config)
            .field("tick", &self.tick)
            .field("alive", &self.alive)
            .finish()
    }
}

impl World {
    /// Build an empty world from the supplied configuration.
    pub fn new(config: PetriConfig) -> Result<Self, WorldError> {
        config.validate()?;
        let len = config.cell_count();
        let bands = config.band_count();
        let rng = config.seeded_rng();
        let history_capacity = config.history_capacity;
        Ok(Self {
            grids: [Grid::new(len), Grid::new(len)],
            current: 0,
            tick: Tick::zero(),
            alive: 0,
            bands,
            rng,
            config,
            history: VecDeque::with_capacity(history_capacity),
        })
    }

    /// Reseed every cell from the world RNG: initial organic everywhere and
    /// a bot wherever the spawn roll clears the configured threshold.
    pub fn populate(&mut self) {
        let organic_range = self.config.initial_organic_range;
        let threshold = self.config.spawn_threshold;
        let energy = self.config.initial_energy;
        let grid = &mut self.grids[self.current];
        let rng = &mut self.rng;
        let mut alive = 0;
        for idx in 0..grid.len() {
            *grid.organic[idx].get_mut() = u32::from(rng.random::<u8>()) % organic_range;
            let spawned = rng.random::<u8>() > threshold;
            *grid.occupied[idx].get_mut() = spawned;
            if spawned {
                *grid.bots[idx].get_mut() = Bot::random(rng, energy);
                alive += 1;
            }
        }
        self.alive = alive;
    }

    /// Execute one tick: prepare the next buffer, scan all bands, swap.
    pub fn step(&mut self) -> TickSummary {
        self.stage_prepare();
        let totals = self.stage_scan();
        self.current ^= 1;
        self.tick = self.tick.next();
        self.alive = totals.alive;
        let summary = TickSummary {
            tick: self.tick,
            alive: totals.alive,
            deaths: totals.deaths,
            moves: totals.moves,
            moves_blocked: totals.moves_blocked,
            attacks: totals.attacks,
            total_energy: totals.total_energy,
        };
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(summary);
        summary
    }

    /// Clear the next buffer's bot layer, carry organic over, and apply
    /// ambient regrowth to botless cells. Runs sequentially on the seeded
    /// world RNG so that single-band runs are fully deterministic.
    fn stage_prepare(&mut self) {
        let denominator = self.config.regrowth_denominator;
        let amount = self.config.regrowth_amount;
        let [a, b] = &mut self.grids;
        let (cur, next) = if self.current == 0 {
            (&*a, b)
        } else {
            (&*b, a)
        };
        let rng = &mut self.rng;
        for idx in 0..cur.len() {
            let mut organic = cur.organic(idx);
            if !cur.bot_present(idx) && rng.random_range(0..denominator) == 0 {
                organic = organic.saturating_add(amount);
            }
            *next.occupied[idx].get_mut() = false;
            *next.organic[idx].get_mut() = organic;
        }
    }

    /// Scan the current buffer band by band, running the VM for every live
    /// bot. A single band runs inline; more bands fan out over rayon.
    fn stage_scan(&self) -> TickTotals {
        let cur = &self.grids[self.current];
        let next = &self.grids[self.current ^ 1];
        let config = &self.config;
        let counters = TickCounters::default();
        let mut bands = band_ranges(cur.len(), self.bands);
        if bands.len() == 1 {
            scan_band(bands.remove(0), cur, next, config, &counters);
        } else {
            bands
                .into_par_iter()
                .for_each(|band| scan_band(band, cur, next, config, &counters));
        }
        counters.totals()
    }

    /// Fill `frame` with `width * height` RGBA pixels from the current
    /// buffer: bots paint their color, empty cells a brown ramp scaled by
    /// organic level. Does not mutate the world.
    pub fn render_into(&self, frame: &mut [u8]) {
        assert_eq!(
            frame.len(),
            self.frame_len(),
            "frame buffer must hold width * height RGBA pixels"
        );
        let cur = &self.grids[self.current];
        for (idx, pixel) in frame.chunks_exact_mut(4).enumerate() {
            if let Some(bot) = cur.bot(idx) {
                pixel.copy_from_slice(&bot.color);
            } else {
                let brown = cur.organic(idx).saturating_mul(2).min(255) as u8;
                pixel.copy_from_slice(&[brown, brown / 2, 0, 255]);
            }
        }
    }

    /// Byte length of a frame buffer for this world.
    #[must_use]
    pub fn frame_len(&self) -> usize {
        self.config.cell_count() * 4
    }

    /// Place a bot into the current buffer. Returns `false` when the cell
    /// is out of bounds or already occupied.
    pub fn spawn_bot(&mut self, x: u32, y: u32, bot: Bot) -> bool {
        let Some(idx) = self.cell_index(x, y) else {
            return false;
        };
        let grid = &mut self.grids[self.current];
        if *grid.occupied[idx].get_mut() {
            return false;
        }
        *grid.occupied[idx].get_mut() = true;
        *grid.bots[idx].get_mut() = bot;
        self.alive += 1;
        true
    }

    /// Overwrite a cell's organic level in the current buffer. Returns
    /// `false` when the cell is out of bounds.
    pub fn set_organic(&mut self, x: u32, y: u32, value: u32) -> bool {
        let Some(idx) = self.cell_index(x, y) else {
            return false;
        };
        *self.grids[self.current].organic[idx].get_mut() = value;
        true
    }

    /// Copy of the bot at `(x, y)`, if the cell is in bounds and occupied.
    #[must_use]
    pub fn bot_at(&self, x: u32, y: u32) -> Option<Bot> {
        self.grids[self.current].bot(self.cell_index(x, y)?)
    }

    /// Organic level at `(x, y)`, if the cell is in bounds.
    #[must_use]
    pub fn organic_at(&self, x: u32, y: u32) -> Option<u32> {
        Some(self.grids[self.current].organic(self.cell_index(x, y)?))
    }

    /// Owned copy of the observable cell state.
    #[must_use]
    pub fn snapshot(&self) -> WorldSnapshot {
        let cur = &self.grids[self.current];
        WorldSnapshot {
            tick: self.tick,
            bots: (0..cur.len()).map(|idx| cur.bot(idx)).collect(),
            organic: (0..cur.len()).map(|idx| cur.organic(idx)).collect(),
        }
    }

    /// Returns an immutable reference to the configuration.
    #[must_use]
    pub fn config(&self) -> &PetriConfig {
        &self.config
    }

    /// Grid width in cells.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.config.world_width
    }

    /// Grid height in cells.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.config.world_height
    }

    /// Current simulation tick.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Number of bots in the current buffer.
    #[must_use]
    pub const fn alive_count(&self) -> usize {
        self.alive
    }

    /// Convenience pair of `(alive_count, tick)`.
    #[must_use]
    pub const fn stats(&self) -> (usize, Tick) {
        (self.alive, self.tick)
    }

    /// The most recent tick summary, if any ticks have run.
    #[must_use]
    pub fn last_summary(&self) -> Option<&TickSummary> {
        self.history.back()
    }

    /// Iterate over retained tick summaries, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.history.iter()
    }

    fn cell_index(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.config.world_width && y < self.config.world_height)
            .then(|| y as usize * self.config.world_width as usize + x as usize)
    }
}

/// Split `[0, len)` into at most `bands` contiguous ranges.
fn band_ranges(len: usize, bands: usize) -> Vec<Range<usize>> {
    let bands = bands.max(1);
    let chunk = (len / bands).max(1);
    let mut ranges = Vec::with_capacity(bands);
    let mut start = 0;
    for band in 0..bands {
        if start >= len {
            break;
        }
        let end = if band == bands - 1 {
            len
        } else {
            (start + chunk).min(len)
        };
        ranges.push(start..end);
        start = end;
    }
    ranges
}

/// Flat index of the cell one step from `idx` in direction `dir`, with
/// toroidal wrap on both axes.
fn neighbor_index(idx: usize, dir: u8, width: usize, height: usize) -> usize {
    let x = (idx % width) as i64;
    let y = (idx / width) as i64;
    let nx = (x + i64::from(DIR_X[dir as usize])).rem_euclid(width as i64) as usize;
    let ny = (y + i64::from(DIR_Y[dir as usize])).rem_euclid(height as i64) as usize;
    ny * width + nx
}

/// Scan one band of the current buffer in ascending index order.
fn scan_band(
    band: Range<usize>,
    cur: &Grid,
    next: &Grid,
    config: &PetriConfig,
    counters: &TickCounters,
) {
    let mut local = TickTotals::default();
    for idx in band {
        if let Some(bot) = cur.bot(idx) {
            process_bot(idx, bot, cur, next, config, &mut local);
        }
    }
    counters.accumulate(&local);
}

/// Advance one bot by one tick: run the VM until the first action opcode
/// (or the fetch cap), apply the existence cost, and write the result into
/// the next buffer.
fn process_bot(
    idx: usize,
    current_bot: Bot,
    cur: &Grid,
    next: &Grid,
    config: &PetriConfig,
    totals: &mut TickTotals,
) {
    if current_bot.energy <= 0 {
        // Dead on entry: the corpse decays and the cell stays botless.
        next.add_organic(idx, config.corpse_organic);
        totals.deaths += 1;
        return;
    }

    let width = config.world_width as usize;
    let height = config.world_height as usize;
    let mut bot = current_bot;
    let mut dest = idx;
    let mut steps = 0;
    let mut turn_ended = false;

    while steps < config.max_steps_per_tick && !turn_ended {
        let cmd = bot.genome[bot.ip as usize];
        bot.ip = (bot.ip + 1) % GENOME_SIZE as u8;

        match Opcode::decode(cmd) {
            Opcode::Jump(offset) => {
                bot.ip = (bot.ip + offset) % GENOME_SIZE as u8;
            }
            Opcode::Turn(turns) => {
                bot.dir = (bot.dir + turns) % NUM_DIRECTIONS;
            }
            Opcode::Photosynth => {
                bot.energy = bot.energy.saturating_add(config.photo_gain);
                bot.color = COLOR_BOT;
                turn_ended = true;
            }
            Opcode::Eat => {
                let organic = cur.organic(idx);
                if organic > 0 {
                    let eaten = organic.min(config.eat_max);
                    bot.energy = bot.energy.saturating_add(eaten as i32);
                    next.set_organic(idx, organic - eaten);
                    bot.color = COLOR_EATER;
                }
                turn_ended = true;
            }
            Opcode::MoveOrAttack => {
                let target = neighbor_index(idx, bot.dir, width, height);
                if let Some(victim) = cur.bot(target) {
                    // Predation transfers energy only; the victim still
                    // acts from its own cell this tick.
                    bot.energy = bot.energy.saturating_add(victim.energy / 2);
                    totals.attacks += 1;
                } else if next.try_claim(target) {
                    bot.energy = bot.energy.saturating_sub(config.move_cost);
                    dest = target;
                    totals.moves += 1;
                } else {
                    // Another bot claimed the destination first this tick.
                    totals.moves_blocked += 1;
                }
                turn_ended = true;
            }
            Opcode::Nop => {
                turn_ended = true;
            }
        }
        steps += 1;
    }

    bot.energy = bot.energy.saturating_sub(config.existence_cost);

    if dest == idx {
        let claimed = next.try_claim(idx);
        debug_assert!(claimed, "origin cell contested while its bot was alive");
    }
    // SAFETY: `dest` was claimed above, either as a movement destination or
    // as the uncontested origin cell.
    unsafe { next.place_bot(dest, bot) };
    totals.alive += 1;
    totals.total_energy += i64::from(bot.energy);
}
