use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io::Write;
use std::time::Duration;
use tracing::{error, info};
use tracker_sim::{RandomWalker, WalkParams};

/// Print simulated tracker packets as JSON lines.
#[derive(Debug, Parser)]
#[command(name = "tracker-sim", version)]
struct Args {
    /// Milliseconds between samples.
    #[arg(long, env = "SIM_INTERVAL_MS", default_value_t = 2500)]
    interval_ms: u64,

    /// Stop after this many samples (runs forever when omitted).
    #[arg(long, env = "SIM_COUNT")]
    count: Option<u64>,

    /// Seed for a reproducible walk.
    #[arg(long, env = "SIM_SEED")]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Logs go to stderr so stdout stays pure JSON lines.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(
        "Starting tracker simulator: interval={}ms, count={:?}, seed={:?}",
        args.interval_ms, args.count, args.seed
    );

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut walker = RandomWalker::new(WalkParams::default(), &mut rng);
    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    let mut emitted = 0u64;
    let stdout = std::io::stdout();

    loop {
        if args.count.is_some_and(|count| emitted >= count) {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {
                let telemetry = walker.step(&mut rng);
                let line = match serde_json::to_string(&telemetry) {
                    Ok(line) => line,
                    Err(e) => {
                        error!("Failed to serialize telemetry: {}", e);
                        continue;
                    }
                };

                let mut out = stdout.lock();
                if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
                    error!("Failed to write telemetry: {}", e);
                    break;
                }
                emitted += 1;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    info!("Emitted {} samples", emitted);
}
