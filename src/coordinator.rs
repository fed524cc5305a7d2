use crate::api::{CloudClient, Error};
use crate::model::Snapshot;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    Uninitialized,
    Initializing,
    Ready,
    /// Last refresh failed; listeners still see the last good snapshot.
    Stale,
    Unloaded,
}

/// Everything listeners can observe about a coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorData {
    pub state: CoordinatorState,
    pub snapshot: Option<Arc<Snapshot>>,
    pub last_update_success: bool,
    pub last_error: Option<Error>,
    pub last_update: Option<SystemTime>,
    pub successful_refreshes: u64,
    pub failed_refreshes: u64,
}

impl Default for CoordinatorData {
    fn default() -> Self {
        CoordinatorData {
            state: CoordinatorState::Uninitialized,
            snapshot: None,
            last_update_success: false,
            last_error: None,
            last_update: None,
            successful_refreshes: 0,
            failed_refreshes: 0,
        }
    }
}

/// Read side of a coordinator, handed to sensors.
#[derive(Debug, Clone)]
pub struct CoordinatorListener {
    receiver: watch::Receiver<CoordinatorData>,
}

impl CoordinatorListener {
    pub fn data(&self) -> CoordinatorData {
        self.receiver.borrow().clone()
    }

    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.receiver.borrow().snapshot.clone()
    }

    pub fn last_update_success(&self) -> bool {
        self.receiver.borrow().last_update_success
    }

    pub fn state(&self) -> CoordinatorState {
        self.receiver.borrow().state
    }

    /// Wait for the next publish. Fails once the coordinator is dropped.
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.receiver.changed().await
    }
}

/// Fetches realtime data on a fixed interval and fans the latest snapshot out to listeners.
pub struct SolaxCloudCoordinator {
    name: String,
    api: Arc<dyn CloudClient>,
    update_interval: Duration,
    data: watch::Sender<CoordinatorData>,
}

impl SolaxCloudCoordinator {
    pub fn new(name: impl Into<String>, api: Arc<dyn CloudClient>, update_interval: Duration) -> Self {
        let (data, _) = watch::channel(CoordinatorData::default());
        SolaxCloudCoordinator {
            name: name.into(),
            api,
            update_interval,
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    pub fn subscribe(&self) -> CoordinatorListener {
        CoordinatorListener {
            receiver: self.data.subscribe(),
        }
    }

    pub fn data(&self) -> CoordinatorData {
        self.data.borrow().clone()
    }

    async fn update_data(&self) -> Result<Snapshot, Error> {
        let api = self.api.clone();
        tokio::task::spawn_blocking(move || api.get_realtime_data())
            .await
            .map_err(|e| {
                log::error!("{}: realtime fetch task failed: {}", self.name, e);
                Error::TaskFailed(e.to_string())
            })?
    }

    /// Fetch once. A failure keeps the previous snapshot and only records the error.
    pub async fn refresh(&self) -> Result<(), Error> {
        match self.update_data().await {
            Ok(snapshot) => {
                let recovered = {
                    let data = self.data.borrow();
                    data.state == CoordinatorState::Stale
                };
                if recovered {
                    log::info!("Fetching {} data recovered", self.name);
                }
                log::debug!("{}: fetched {} fields", self.name, snapshot.len());

                let snapshot = Arc::new(snapshot);
                self.data.send_modify(|data| {
                    data.snapshot = Some(snapshot);
                    data.state = CoordinatorState::Ready;
                    data.last_update_success = true;
                    data.last_error = None;
                    data.last_update = Some(SystemTime::now());
                    data.successful_refreshes += 1;
                });
                Ok(())
            }
            Err(e) => {
                if self.data.borrow().last_update_success {
                    log::warn!("Error fetching {} data: {}", self.name, e);
                } else {
                    log::debug!("Error fetching {} data: {}", self.name, e);
                }

                let error = e.clone();
                self.data.send_modify(|data| {
                    data.last_update_success = false;
                    data.last_error = Some(error);
                    data.failed_refreshes += 1;
                    if data.state == CoordinatorState::Ready {
                        data.state = CoordinatorState::Stale;
                    }
                });
                Err(e)
            }
        }
    }

    /// The refresh an entry must pass before it counts as set up.
    pub async fn first_refresh(&self) -> Result<(), Error> {
        self.data
            .send_modify(|data| data.state = CoordinatorState::Initializing);
        self.refresh().await
    }

    /// Refresh every `update_interval` until `shutdown` is notified. A fetch still in flight at
    /// shutdown is dropped and its result never published.
    pub async fn run(self, shutdown: Arc<Notify>) {
        let mut interval = tokio::time::interval(self.update_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        /* first tick completes immediately; setup already did the first refresh */
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.notified() => break,
                _ = interval.tick() => {
                    tokio::select! {
                        _ = shutdown.notified() => break,
                        _ = self.refresh() => {}
                    }
                }
            }
        }

        self.unload();
    }

    pub fn unload(&self) {
        log::info!("{}: coordinator unloaded", self.name);
        self.data
            .send_modify(|data| data.state = CoordinatorState::Unloaded);
    }
}
