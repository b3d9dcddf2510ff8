use std::future::Future;
use std::sync::Arc;

use rocket::tokio::{
    self,
    sync::Notify,
    task::JoinHandle,
    time::{self, Duration, MissedTickBehavior},
};

/// A job that runs every `period` until stopped, and can also be triggered
/// early. The first run happens immediately.
///
/// Each run is spawned as its own task, so a run that panics is logged and
/// the schedule carries on. Runs never overlap.
pub struct PeriodicTask {
    loop_handle: JoinHandle<()>,
    trigger: Arc<Notify>,
    stop: Arc<Notify>,
}

impl PeriodicTask {
    pub fn start<F, Fut>(name: &'static str, period: Duration, job: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let trigger = Arc::new(Notify::new());
        let stop = Arc::new(Notify::new());

        let loop_trigger = trigger.clone();
        let loop_stop = stop.clone();
        let loop_handle = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = loop_stop.notified() => break,
                    _ = loop_trigger.notified() => trace!("{name} triggered early"),
                    _ = interval.tick() => {}
                }
                if let Err(e) = tokio::spawn(job()).await {
                    error!("{name} run failed: {e}");
                }
            }
            debug!("{name} stopped");
        });

        Self {
            loop_handle,
            trigger,
            stop,
        }
    }

    /// Run the job now rather than waiting for the next tick. If a run is in
    /// progress, another follows straight after it.
    pub fn trigger_now(&self) {
        self.trigger.notify_one();
    }

    /// Stop the schedule, waiting for any run in progress to finish.
    /// Returns true iff the loop shut down cleanly.
    pub async fn stop(self) -> bool {
        self.stop.notify_one();
        self.loop_handle.await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Wait until `counter` reaches `target`, or give up after a few seconds.
    async fn reaches(counter: &AtomicUsize, target: usize) -> bool {
        for _ in 0..500 {
            if counter.load(Ordering::SeqCst) >= target {
                return true;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[rocket::async_test]
    async fn runs_immediately_and_on_trigger() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let task = PeriodicTask::start("counter", Duration::from_secs(3600), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        assert!(reaches(&runs, 1).await);
        task.trigger_now();
        assert!(reaches(&runs, 2).await);
        assert!(task.stop().await);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[rocket::async_test]
    async fn survives_a_panicking_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let task = PeriodicTask::start("flaky", Duration::from_secs(3600), move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first run fails");
                }
            }
        });

        assert!(reaches(&runs, 1).await);
        task.trigger_now();
        assert!(reaches(&runs, 2).await);
        assert!(task.stop().await);
    }
}
