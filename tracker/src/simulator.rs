use crate::live::Reconciler;
use crate::metrics::SIMULATOR_TICKS_TOTAL;
use crate::model::TelemetryPacket;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};
use tracker_sim::{RandomWalker, WalkParams};

/// Handle to the running generator. `stop` lets an in-flight tick finish.
pub struct SimulatorHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SimulatorHandle {
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            error!("Simulator task failed: {}", e);
        }
    }
}

pub fn spawn_simulator(reconciler: Arc<Reconciler>, tick: Duration) -> SimulatorHandle {
    let mut rng = StdRng::from_entropy();
    let walker = RandomWalker::new(WalkParams::default(), &mut rng);
    spawn_with(reconciler, tick, walker, rng)
}

pub fn spawn_with(
    reconciler: Arc<Reconciler>,
    tick: Duration,
    walker: RandomWalker,
    rng: StdRng,
) -> SimulatorHandle {
    let (stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(run_simulator(reconciler, tick, walker, rng, stop_rx));
    SimulatorHandle { stop_tx, task }
}

pub async fn run_simulator(
    reconciler: Arc<Reconciler>,
    tick: Duration,
    mut walker: RandomWalker,
    mut rng: StdRng,
    mut stop: watch::Receiver<bool>,
) {
    info!("Starting simulator with tick={:?}", tick);

    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let packet = TelemetryPacket::from(walker.step(&mut rng));
                SIMULATOR_TICKS_TOTAL.inc();

                // A failed write is logged and the next tick proceeds.
                match reconciler.record_simulated(packet).await {
                    Ok(Some(id)) => debug!(id, "Simulated packet persisted"),
                    Ok(None) => {}
                    Err(e) => error!("Simulator tick failed: {}", e),
                }
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }

    info!("Simulator stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_store;
    use crate::model::{Mode, Source};

    fn seeded_walker(seed: u64) -> (RandomWalker, StdRng) {
        let mut rng = StdRng::seed_from_u64(seed);
        let walker = RandomWalker::new(WalkParams::default(), &mut rng);
        (walker, rng)
    }

    #[tokio::test]
    async fn test_ticks_update_visible_and_history() {
        let live = Arc::new(Reconciler::new(memory_store().await, Duration::from_secs(10)));
        let boot = live.visible().await;
        let (walker, rng) = seeded_walker(1);

        let handle = spawn_with(live.clone(), Duration::from_millis(10), walker, rng);
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop().await;

        let visible = live.visible().await;
        assert_eq!(visible.mode, Mode::Simulated);
        assert_ne!(visible.timestamp, boot.timestamp);
        assert!(live.store().count_packets().await.unwrap() >= 2);
    }

    #[tokio::test]
    async fn test_ticks_not_persisted_while_hardware_preferred() {
        let live = Arc::new(Reconciler::new(memory_store().await, Duration::from_secs(10)));
        live.set_preference(Source::Hardware).await;
        let (walker, rng) = seeded_walker(2);

        let handle = spawn_with(live.clone(), Duration::from_millis(10), walker, rng);
        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.stop().await;

        assert_eq!(live.store().count_packets().await.unwrap(), 0);
        assert_ne!(
            live.simulated_only().await.timestamp,
            live.visible().await.timestamp
        );
    }

    #[tokio::test]
    async fn test_stop_ends_the_loop() {
        let live = Arc::new(Reconciler::new(memory_store().await, Duration::from_secs(10)));
        let (walker, rng) = seeded_walker(3);
        let handle = spawn_with(live.clone(), Duration::from_secs(3600), walker, rng);

        tokio::time::timeout(Duration::from_secs(1), handle.stop())
            .await
            .expect("simulator should stop promptly");
    }
}
