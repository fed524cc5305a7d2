use crate::api::{CloudClient, Error};
use crate::model::Snapshot;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};

struct Barriers {
    entered: Barrier,
    release: Barrier,
}

/// Holds one cloud call inside the blocking pool until released.
#[derive(Clone)]
pub struct CallGate(Arc<Barriers>);

impl CallGate {
    fn new() -> Self {
        CallGate(Arc::new(Barriers {
            entered: Barrier::new(2),
            release: Barrier::new(2),
        }))
    }

    fn pass(&self) {
        self.0.entered.wait();
        self.0.release.wait();
    }

    /// Wait until the held call is blocked on the gate.
    pub async fn entered(&self) {
        let barriers = self.0.clone();
        tokio::task::spawn_blocking(move || {
            barriers.entered.wait();
        })
        .await
        .unwrap();
    }

    pub async fn release(&self) {
        let barriers = self.0.clone();
        tokio::task::spawn_blocking(move || {
            barriers.release.wait();
        })
        .await
        .unwrap();
    }
}

/// Scripted stand-in for SolaX Cloud. Fetches pop scripted results in order; once the script
/// runs out every fetch fails with `ApiError`.
pub struct FakeCloud {
    validation: Mutex<Result<bool, Error>>,
    responses: Mutex<VecDeque<Result<Snapshot, Error>>>,
    fetches: AtomicUsize,
    validations: AtomicUsize,
    gate: Mutex<Option<CallGate>>,
}

impl FakeCloud {
    pub fn with_validation(validation: Result<bool, Error>) -> Self {
        FakeCloud {
            validation: Mutex::new(validation),
            responses: Mutex::new(VecDeque::new()),
            fetches: AtomicUsize::new(0),
            validations: AtomicUsize::new(0),
            gate: Mutex::new(None),
        }
    }

    pub fn valid() -> Self {
        Self::with_validation(Ok(true))
    }

    pub fn set_validation(&self, validation: Result<bool, Error>) {
        *self.validation.lock().unwrap() = validation;
    }

    pub fn push_data(&self, fields: Vec<(&str, Value)>) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(fields.into_iter().collect()));
    }

    pub fn push_error(&self, error: Error) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// The next validation or fetch blocks until the returned gate is released.
    pub fn hold_next_call(&self) -> CallGate {
        let gate = CallGate::new();
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    fn pass_gate(&self) {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.pass();
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn validations(&self) -> usize {
        self.validations.load(Ordering::SeqCst)
    }
}

impl CloudClient for FakeCloud {
    fn validate_token_and_registration_number(&self) -> Result<bool, Error> {
        self.validations.fetch_add(1, Ordering::SeqCst);
        self.pass_gate();
        self.validation.lock().unwrap().clone()
    }

    fn get_realtime_data(&self) -> Result<Snapshot, Error> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.pass_gate();
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::ApiError("no scripted response".to_string())))
    }
}
