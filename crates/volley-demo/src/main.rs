//! Headless demo that runs each projectile replication strategy through the
//! loopback transport and reports what it cost and what every peer saw.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI flags.
//! Run with `cargo run -p volley-demo -- --strategy all --latency 4`.

use clap::{Parser, ValueEnum};
use glam::Vec3;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;
use tracing::{info, warn};
use volley_config::{CliArgs, Config, default_config_dir};
use volley_multiplayer::{
    InputScript, LoopbackSession, PeerId, PlayerInput, Scene, StrategyKind, Tick, TickSchedule,
    VisualKind,
};

/// Frame rate the demo renders at, independent of the tick rate.
const RENDER_HZ: f64 = 144.0;

/// Strategy selection on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    FullState,
    FireData,
    CountOnly,
    RingBuffer,
    All,
}

impl StrategyArg {
    fn kinds(self) -> Vec<StrategyKind> {
        match self {
            StrategyArg::FullState => vec![StrategyKind::FullState],
            StrategyArg::FireData => vec![StrategyKind::FireData],
            StrategyArg::CountOnly => vec![StrategyKind::CountOnly],
            StrategyArg::RingBuffer => vec![StrategyKind::RingBuffer],
            StrategyArg::All => StrategyKind::ALL.to_vec(),
        }
    }
}

/// CLI arguments for the demo binary.
#[derive(Parser, Debug)]
#[command(name = "volley-demo", about = "Projectile replication strategies side by side")]
struct DemoArgs {
    /// Strategy to run.
    #[arg(long, value_enum, default_value_t = StrategyArg::All)]
    strategy: StrategyArg,

    /// Authority ticks to simulate per strategy.
    #[arg(long, default_value_t = 600)]
    ticks: u64,

    /// Ticks between trigger presses.
    #[arg(long, default_value_t = 15)]
    fire_interval: Tick,

    /// Seed for aim spread and frame jitter.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Pre-spawned projectiles per full-state weapon (0 spawns per shot).
    #[arg(long)]
    pool_size: Option<usize>,

    #[command(flatten)]
    common: CliArgs,
}

fn main() {
    let args = DemoArgs::parse();

    let config_dir = args.common.config.clone().unwrap_or_else(default_config_dir);
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args.common);
    if let Some(pool_size) = args.pool_size {
        config.weapon.projectile_pool_size = pool_size;
    }

    let log_dir = config_dir.join("logs");
    volley_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    info!(
        "Volley demo: {} ticks at {} Hz, latency {} ticks, {} observer(s)",
        args.ticks,
        config.simulation.tick_rate,
        config.network.latency_ticks,
        config.network.observers
    );

    for kind in args.strategy.kinds() {
        run_strategy(&config, &args, kind);
    }
}

/// Wall behind the range, a pushable crate in front of it and one moving
/// hitbox per observer crossing the line of fire.
fn build_scene(observers: u32) -> Scene {
    let mut scene = Scene::new()
        .with_wall(Vec3::new(0.0, 0.0, 40.0), Vec3::new(8.0, 4.0, 0.5))
        .with_crate(Vec3::new(1.5, 0.0, 12.0), Vec3::splat(0.75), 20.0);
    for index in 0..observers {
        // Observers join right after the shooter.
        let owner = PeerId(2 + index);
        let lane = 20.0 + 4.0 * index as f32;
        scene = scene.with_hitbox(
            owner,
            0.6,
            Vec3::new(-6.0, 0.0, lane),
            Vec3::new(2.5, 0.0, 0.0),
        );
    }
    scene
}

/// Presses the trigger every `interval` ticks with a little aim spread.
fn shooter_script(interval: Tick, seed: u64) -> InputScript {
    let interval = interval.max(2);
    let mut rng = Xoshiro256StarStar::seed_from_u64(seed);
    let mut aim = Vec3::Z;
    Box::new(move |tick| {
        if tick % interval == 0 {
            aim = Vec3::new(rng.gen_range(-0.12..0.12), rng.gen_range(-0.03..0.03), 1.0)
                .normalize();
            PlayerInput::firing(aim)
        } else {
            PlayerInput::idle(aim)
        }
    })
}

fn run_strategy(config: &Config, args: &DemoArgs, kind: StrategyKind) {
    info!("--- {kind} ---");
    let mut session = LoopbackSession::new(config, build_scene(config.network.observers));
    let shooter = session.join_client(shooter_script(args.fire_interval, args.seed));
    let observers: Vec<PeerId> = (0..config.network.observers)
        .map(|_| session.join_observer())
        .collect();
    let weapon = session.spawn_weapon(shooter, kind, Vec3::new(0.0, 0.5, 0.0));

    let mut rng = Xoshiro256StarStar::seed_from_u64(args.seed ^ 0x5eed);
    let mut schedule = TickSchedule::new(config.simulation.tick_rate);
    while schedule.total_ticks() < args.ticks {
        let frame_secs = (1.0 / RENDER_HZ) * rng.gen_range(0.7..1.3);
        for _ in 0..schedule.accumulate(frame_secs) {
            session.step();
        }
        session.render(schedule.alpha(), frame_secs as f32);
    }

    report(&session, kind, shooter, &observers, weapon);
}

fn report(
    session: &LoopbackSession,
    kind: StrategyKind,
    shooter: PeerId,
    observers: &[PeerId],
    weapon: volley_multiplayer::NetworkId,
) {
    let server = session.server().core();
    let fired = server.weapon(weapon).map_or(0, |w| w.fire_count());
    info!(
        "{kind}: {fired} shots, {} impulses applied, {} objects live on the authority",
        server.world().impulses_applied(),
        server.objects().count()
    );

    let snapshots = session.snapshot_stats();
    let inputs = session.input_stats();
    info!(
        "{kind}: snapshots {} msgs, {} B raw ({:.1} B/msg), {} B lz4",
        snapshots.messages,
        snapshots.raw_bytes,
        snapshots.average_raw(),
        snapshots.compressed_bytes
    );
    info!(
        "{kind}: inputs {} msgs, {} B raw, {} B lz4",
        inputs.messages, inputs.raw_bytes, inputs.compressed_bytes
    );

    match session.client(shooter) {
        Some(client) => {
            let stats = client.core().stats();
            info!(
                "{kind}: shooter {shooter} predicted {} spawns, merged {}, rejected {}, resimulated {} ticks",
                stats.predictions_spawned,
                stats.predictions_merged,
                stats.predictions_rejected,
                stats.resimulated_ticks
            );
        }
        None => warn!(%shooter, "shooter missing from session"),
    }

    for &observer in observers {
        let Some(client) = session.client(observer) else {
            continue;
        };
        let core = client.core();
        let visuals = core.visuals();
        let seen = core.weapon(weapon).map_or(0, |w| w.visible_fire_count());
        info!(
            "{kind}: observer {observer} saw {seen} shots, {} fire effects, {} hit effects, \
             visuals spawned: {} projectile / {} dummy / {} flying dummy",
            visuals.fire_effects(),
            visuals.hit_effects(),
            visuals.spawned_of(VisualKind::Projectile),
            visuals.spawned_of(VisualKind::Dummy),
            visuals.spawned_of(VisualKind::FlyingDummy)
        );
        let drift = server
            .props()
            .iter()
            .filter_map(|&body| {
                let authoritative = server.world().body_motion(body)?;
                let local = core.world().body_motion(body)?;
                Some((authoritative.position - local.position).length())
            })
            .fold(0.0_f32, f32::max);
        info!("{kind}: observer {observer} crate drift {drift:.3} m");
        let stats = core.stats();
        if stats.behaviour_errors > 0 {
            warn!(%observer, errors = stats.behaviour_errors, "behaviour hooks failed");
        }
    }
}
