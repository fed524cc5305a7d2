use crate::api::{self, CloudClient, Error};
use crate::config_flow::{self, FlowResult, SolaxCloudConfigFlow};
use crate::consts::{self, CONF_SERIAL, CONF_TOKEN, DOMAIN, ISSUE_URL};
use crate::coordinator::{CoordinatorListener, SolaxCloudCoordinator};
use crate::model::Credentials;
use crate::sensor::{self, SolaxCloudSensor};
use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

pub type EntryId = String;

/// Builds the cloud client for one set of credentials.
pub type ClientFactory = Arc<dyn Fn(&Credentials) -> Arc<dyn CloudClient> + Send + Sync>;

pub fn solax_cloud_factory(api_url: String, timeout: Duration) -> ClientFactory {
    Arc::new(move |credentials: &Credentials| -> Arc<dyn CloudClient> {
        Arc::new(api::api(api_url.clone(), credentials.clone(), timeout))
    })
}

/// Ask the cloud whether `api`'s token and registration number are accepted. The request runs
/// on the blocking pool.
pub async fn validate(api: Arc<dyn CloudClient>) -> Result<bool, Error> {
    tokio::task::spawn_blocking(move || api.validate_token_and_registration_number())
        .await
        .map_err(|e| {
            log::error!("validation task failed: {}", e);
            Error::TaskFailed(e.to_string())
        })?
}

#[derive(Debug, Clone)]
pub enum SetupError {
    /// Cloud unreachable or erroring; setup is retried later.
    NotReady(Error),
    /// Needs the user to reconfigure; not retried.
    ConfigEntryError(String),
    UnknownEntry(EntryId),
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::NotReady(e) => write!(f, "not ready: {}", e),
            SetupError::ConfigEntryError(s) => write!(f, "{}", s),
            SetupError::UnknownEntry(id) => write!(f, "unknown config entry {}", id),
        }
    }
}

impl std::error::Error for SetupError {}

impl<'r> Responder<'r, 'static> for SetupError {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let (status, kind) = match &self {
            SetupError::NotReady(_) => (Status::ServiceUnavailable, "not_ready"),
            SetupError::ConfigEntryError(_) => (Status::BadRequest, "config_entry_error"),
            SetupError::UnknownEntry(_) => (Status::NotFound, "unknown_entry"),
        };
        let body = serde_json::json!({ "error": kind, "message": self.to_string() }).to_string();
        Response::build()
            .status(status)
            .sized_body(body.len(), Cursor::new(body))
            .header(ContentType::JSON)
            .ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    NotLoaded,
    Loaded,
    SetupRetry,
    SetupError,
}

impl Default for EntryState {
    fn default() -> Self {
        EntryState::NotLoaded
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub entry_id: EntryId,
    pub domain: String,
    pub version: u32,
    pub title: String,
    pub unique_id: Option<String>,
    pub data: Credentials,
    #[serde(skip_deserializing, default)]
    pub state: EntryState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Warning,
    Error,
}

/// Persistent notice shown to the user until the entry is fixed or removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub domain: &'static str,
    pub issue_id: String,
    pub is_fixable: bool,
    pub severity: IssueSeverity,
    pub translation_key: &'static str,
    pub translation_placeholders: BTreeMap<&'static str, String>,
    pub learn_more_url: &'static str,
}

/// What a loaded entry owns while it is set up.
pub struct EntryRuntime {
    pub coordinator: CoordinatorListener,
    pub sensors: Vec<SolaxCloudSensor>,
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

/// Application context: config entries, the runtime of every loaded entry and open issues.
pub struct Hass {
    entries: BTreeMap<EntryId, ConfigEntry>,
    data: HashMap<EntryId, EntryRuntime>,
    issues: BTreeMap<String, Issue>,
    /// Why entries in `SetupRetry` are not loaded yet.
    setup_errors: HashMap<EntryId, Error>,
    client_factory: ClientFactory,
    update_interval: Duration,
    entries_file: Option<PathBuf>,
    next_entry: u64,
}

fn not_valid_issue_id(entry_id: &str) -> String {
    format!("not_valid_{}", entry_id)
}

impl Hass {
    pub fn new(client_factory: ClientFactory, update_interval: Duration) -> Self {
        Hass {
            entries: BTreeMap::new(),
            data: HashMap::new(),
            issues: BTreeMap::new(),
            setup_errors: HashMap::new(),
            client_factory,
            update_interval,
            entries_file: None,
            next_entry: 1,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_client(api: Arc<dyn CloudClient>) -> Self {
        Hass::new(Arc::new(move |_: &Credentials| api.clone()), consts::UPDATE_INTERVAL)
    }

    pub fn client(&self, credentials: &Credentials) -> Arc<dyn CloudClient> {
        (self.client_factory)(credentials)
    }

    pub fn client_factory(&self) -> ClientFactory {
        self.client_factory.clone()
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    pub fn entries(&self) -> impl Iterator<Item = &ConfigEntry> {
        self.entries.values()
    }

    pub fn entry(&self, entry_id: &str) -> Option<&ConfigEntry> {
        self.entries.get(entry_id)
    }

    pub fn unique_id_configured(&self, unique_id: &str) -> bool {
        self.entries
            .values()
            .any(|entry| entry.unique_id.as_deref() == Some(unique_id))
    }

    pub fn runtime(&self, entry_id: &str) -> Option<&EntryRuntime> {
        self.data.get(entry_id)
    }

    pub fn runtimes(&self) -> impl Iterator<Item = (&EntryId, &EntryRuntime)> {
        self.data.iter()
    }

    pub fn sensors(&self) -> impl Iterator<Item = &SolaxCloudSensor> {
        self.data.values().flat_map(|runtime| runtime.sensors.iter())
    }

    pub fn issues(&self) -> impl Iterator<Item = &Issue> {
        self.issues.values()
    }

    /// The transient error that left `entry_id` in `SetupRetry`.
    pub fn setup_error(&self, entry_id: &str) -> Option<&Error> {
        self.setup_errors.get(entry_id)
    }

    /// Run the user step of the config flow; a created entry is stored and set up right away.
    pub async fn async_flow_user(&mut self, user_input: Option<Credentials>) -> FlowResult {
        let result = SolaxCloudConfigFlow::new(self)
            .async_step_user(user_input)
            .await;

        let (result, created) = self.finish_flow(result);
        if let Some(entry_id) = created {
            if let Err(e) = self.async_setup_entry(&entry_id).await {
                log::error!("Setup of {} failed: {}", entry_id, e);
            }
        }
        result
    }

    /// Store the entry a finished flow created. A serial configured while the flow was talking
    /// to the cloud aborts instead.
    fn finish_flow(&mut self, result: FlowResult) -> (FlowResult, Option<EntryId>) {
        match result {
            FlowResult::CreateEntry {
                title,
                unique_id,
                data,
            } => {
                if self.unique_id_configured(&unique_id) {
                    return (
                        FlowResult::Abort {
                            reason: "already_configured",
                        },
                        None,
                    );
                }
                let entry_id = self.add_entry(title.clone(), unique_id.clone(), data.clone());
                let result = FlowResult::CreateEntry {
                    title,
                    unique_id,
                    data,
                };
                (result, Some(entry_id))
            }
            other => (other, None),
        }
    }

    fn add_entry(&mut self, title: String, unique_id: String, data: Credentials) -> EntryId {
        let entry_id = self.next_entry_id();
        log::info!("Created config entry {} for {}", entry_id, unique_id);
        self.entries.insert(
            entry_id.clone(),
            ConfigEntry {
                entry_id: entry_id.clone(),
                domain: DOMAIN.to_string(),
                version: config_flow::VERSION,
                title,
                unique_id: Some(unique_id),
                data,
                state: EntryState::NotLoaded,
            },
        );
        self.save_entries();
        entry_id
    }

    fn next_entry_id(&mut self) -> EntryId {
        loop {
            let entry_id = format!("{}_{:04}", DOMAIN, self.next_entry);
            self.next_entry += 1;
            if !self.entries.contains_key(&entry_id) {
                return entry_id;
            }
        }
    }

    fn set_state(&mut self, entry_id: &str, state: EntryState) {
        if let Some(entry) = self.entries.get_mut(entry_id) {
            entry.state = state;
        }
    }

    fn entries_in(&self, state: EntryState) -> Vec<EntryId> {
        self.entries
            .values()
            .filter(|entry| entry.state == state)
            .map(|entry| entry.entry_id.clone())
            .collect()
    }

    pub async fn async_setup_entry(&mut self, entry_id: &str) -> Result<(), SetupError> {
        let pending = match self.begin_setup(entry_id)? {
            Some(pending) => pending,
            None => return Ok(()),
        };
        let outcome = pending.run().await;
        self.finish_setup(entry_id, outcome)
    }

    /// Everything setup needs from the context. `None` when the entry is already loaded.
    fn begin_setup(&self, entry_id: &str) -> Result<Option<PendingSetup>, SetupError> {
        let entry = self
            .entries
            .get(entry_id)
            .cloned()
            .ok_or_else(|| SetupError::UnknownEntry(entry_id.to_string()))?;

        if self.data.contains_key(entry_id) {
            return Ok(None);
        }

        Ok(Some(PendingSetup {
            api: self.client(&entry.data),
            entry,
            update_interval: self.update_interval,
        }))
    }

    fn finish_setup(&mut self, entry_id: &str, outcome: SetupOutcome) -> Result<(), SetupError> {
        let entry = match self.entries.get(entry_id) {
            Some(entry) if !self.data.contains_key(entry_id) => entry.clone(),
            found => {
                /* removed, or loaded by a concurrent setup, while the cloud was queried */
                if let SetupOutcome::Loaded(runtime) = outcome {
                    runtime.shutdown.notify_one();
                }
                return match found {
                    Some(_) => Ok(()),
                    None => Err(SetupError::UnknownEntry(entry_id.to_string())),
                };
            }
        };

        self.setup_errors.remove(entry_id);
        let result = match outcome {
            SetupOutcome::Loaded(runtime) => {
                self.issues.remove(&not_valid_issue_id(entry_id));
                self.data.insert(entry_id.to_string(), runtime);
                Ok(())
            }
            SetupOutcome::InvalidCredentials => {
                self.create_not_valid_issue(&entry);
                Err(SetupError::ConfigEntryError(
                    "Not a valid token or serialnumber".to_string(),
                ))
            }
            SetupOutcome::Failed(e) => Err(e),
        };

        let state = match &result {
            Ok(()) => EntryState::Loaded,
            Err(SetupError::NotReady(e)) => {
                log::warn!("{} not ready yet, will retry: {}", entry.title, e);
                self.setup_errors.insert(entry_id.to_string(), e.clone());
                EntryState::SetupRetry
            }
            Err(e) => {
                log::error!("Error setting up {}: {}", entry.title, e);
                EntryState::SetupError
            }
        };
        self.set_state(entry_id, state);
        result
    }

    fn create_not_valid_issue(&mut self, entry: &ConfigEntry) {
        let issue_id = not_valid_issue_id(&entry.entry_id);
        let mut translation_placeholders = BTreeMap::new();
        translation_placeholders.insert(CONF_TOKEN, entry.data.token_id.clone());
        translation_placeholders.insert(CONF_SERIAL, entry.data.serial_number.clone());

        self.issues.insert(
            issue_id.clone(),
            Issue {
                domain: DOMAIN,
                issue_id,
                is_fixable: false,
                severity: IssueSeverity::Error,
                translation_key: "not_valid",
                translation_placeholders,
                learn_more_url: ISSUE_URL,
            },
        );
    }

    /// Stop the entry's coordinator and drop its sensors. Returns whether it was loaded.
    pub async fn async_unload_entry(&mut self, entry_id: &str) -> Result<bool, SetupError> {
        if !self.entries.contains_key(entry_id) {
            return Err(SetupError::UnknownEntry(entry_id.to_string()));
        }

        let unloaded = match self.data.remove(entry_id) {
            Some(runtime) => {
                runtime.shutdown.notify_one();
                if let Err(e) = runtime.task.await {
                    log::error!("Coordinator task of {} failed: {}", entry_id, e);
                }
                true
            }
            None => false,
        };
        self.setup_errors.remove(entry_id);
        self.set_state(entry_id, EntryState::NotLoaded);
        Ok(unloaded)
    }

    /// Unload and forget the entry.
    pub async fn async_remove_entry(&mut self, entry_id: &str) -> Result<ConfigEntry, SetupError> {
        self.async_unload_entry(entry_id).await?;
        self.issues.remove(&not_valid_issue_id(entry_id));
        let entry = self
            .entries
            .remove(entry_id)
            .ok_or_else(|| SetupError::UnknownEntry(entry_id.to_string()))?;
        self.save_entries();
        Ok(entry)
    }

    pub async fn async_reload_entry(&mut self, entry_id: &str) -> Result<(), SetupError> {
        self.async_unload_entry(entry_id).await?;
        self.async_setup_entry(entry_id).await
    }

    /// Set up every entry not loaded yet, e.g. right after loading them from disk.
    pub async fn async_setup_entries(&mut self) {
        for entry_id in self.entries_in(EntryState::NotLoaded) {
            let _ = self.async_setup_entry(&entry_id).await;
        }
    }

    /// Retry entries whose setup failed for a transient reason.
    pub async fn async_retry_setup(&mut self) {
        for entry_id in self.entries_in(EntryState::SetupRetry) {
            log::debug!("Retrying setup of {}", entry_id);
            let _ = self.async_setup_entry(&entry_id).await;
        }
    }

    /// Read persisted entries from `path` and save future changes there. A missing file is an
    /// empty entry list.
    pub fn load_entries(&mut self, path: &Path) -> io::Result<()> {
        self.entries_file = Some(path.to_path_buf());
        if !path.exists() {
            return Ok(());
        }

        let text = fs::read_to_string(path)?;
        let entries: Vec<ConfigEntry> = serde_json::from_str(&text)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        log::info!("Loaded {} config entries from {}", entries.len(), path.display());

        for entry in entries {
            self.entries.insert(entry.entry_id.clone(), entry);
        }
        Ok(())
    }

    fn save_entries(&self) {
        let path = match &self.entries_file {
            Some(path) => path,
            None => return,
        };
        let entries: Vec<&ConfigEntry> = self.entries.values().collect();

        let result = serde_json::to_string_pretty(&entries)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
            .and_then(|text| fs::write(path, text));
        if let Err(e) = result {
            log::error!("Unable to save config entries to {}: {}", path.display(), e);
        }
    }
}

/// Setup of one entry, detached from the context so the cloud can be queried without it.
struct PendingSetup {
    entry: ConfigEntry,
    api: Arc<dyn CloudClient>,
    update_interval: Duration,
}

enum SetupOutcome {
    Loaded(EntryRuntime),
    InvalidCredentials,
    Failed(SetupError),
}

impl PendingSetup {
    async fn run(self) -> SetupOutcome {
        let valid = match validate(self.api.clone()).await {
            Ok(valid) => valid,
            Err(e) if e.is_transient() => return SetupOutcome::Failed(SetupError::NotReady(e)),
            Err(e) => return SetupOutcome::Failed(SetupError::ConfigEntryError(e.to_string())),
        };
        if !valid {
            return SetupOutcome::InvalidCredentials;
        }

        let coordinator = SolaxCloudCoordinator::new(DOMAIN, self.api.clone(), self.update_interval);
        if let Err(e) = coordinator.first_refresh().await {
            return SetupOutcome::Failed(SetupError::NotReady(e));
        }

        let unique_id = self
            .entry
            .unique_id
            .clone()
            .unwrap_or_else(|| consts::unique_id(&self.entry.data.serial_number));
        let listener = coordinator.subscribe();
        let sensors = sensor::setup_entry(&unique_id, &listener);
        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn(coordinator.run(shutdown.clone()));

        log::info!(
            "Set up {} with {} sensors, polling every {:?}",
            self.entry.title,
            sensors.len(),
            self.update_interval
        );
        SetupOutcome::Loaded(EntryRuntime {
            coordinator: listener,
            sensors,
            shutdown,
            task,
        })
    }
}

/// [`Hass::async_setup_entry`] on a shared context. The lock is only taken to read the entry and
/// to store the outcome, never while the cloud is queried.
pub async fn setup_entry(hass: &Mutex<Hass>, entry_id: &str) -> Result<(), SetupError> {
    let pending = hass.lock().await.begin_setup(entry_id)?;
    let pending = match pending {
        Some(pending) => pending,
        None => return Ok(()),
    };
    let outcome = pending.run().await;
    hass.lock().await.finish_setup(entry_id, outcome)
}

/// [`Hass::async_flow_user`] on a shared context.
pub async fn flow_user(hass: &Mutex<Hass>, user_input: Option<Credentials>) -> FlowResult {
    let flow = SolaxCloudConfigFlow::new(&*hass.lock().await);
    let result = flow.async_step_user(user_input).await;

    let (result, created) = hass.lock().await.finish_flow(result);
    if let Some(entry_id) = created {
        if let Err(e) = setup_entry(hass, &entry_id).await {
            log::error!("Setup of {} failed: {}", entry_id, e);
        }
    }
    result
}

/// [`Hass::async_reload_entry`] on a shared context.
pub async fn reload_entry(hass: &Mutex<Hass>, entry_id: &str) -> Result<(), SetupError> {
    hass.lock().await.async_unload_entry(entry_id).await?;
    setup_entry(hass, entry_id).await
}

/// [`Hass::async_retry_setup`] on a shared context.
pub async fn retry_setup(hass: &Mutex<Hass>) {
    let pending = hass.lock().await.entries_in(EntryState::SetupRetry);
    for entry_id in pending {
        log::debug!("Retrying setup of {}", entry_id);
        let _ = setup_entry(hass, &entry_id).await;
    }
}
