#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate prometheus;
#[macro_use]
extern crate rocket;

use config::Config;
use rocket::serde::json::Json;
use rocket::State;
use solaxcloud_rs::config_flow::FlowResult;
use solaxcloud_rs::consts::{API_URL, REQUEST_TIMEOUT, UPDATE_INTERVAL};
use solaxcloud_rs::integration::{self, ConfigEntry, Issue, SetupError};
use solaxcloud_rs::sensor::SensorState;
use solaxcloud_rs::{Credentials, Hass, Snapshot};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

mod metrics;

#[derive(Clone, serde::Deserialize)]
pub struct SolaxSettings {
    api_url: String,
    /// seconds between refreshes
    interval: u64,
    request_timeout: u64,
    token_id: Option<String>,
    serial_number: Option<String>,
    entries_file: Option<String>,
}

/// Structure containing state for API handlers.
pub struct StateData {
    hass: Arc<Mutex<Hass>>,
}

pub fn read_settings() -> Result<SolaxSettings, config::ConfigError> {
    let mut settings = Config::default();
    settings
        .merge(config::Environment::with_prefix("SOLAX"))?
        .set_default("api_url", API_URL)?
        .set_default("interval", UPDATE_INTERVAL.as_secs() as i64)?
        .set_default("request_timeout", REQUEST_TIMEOUT.as_secs() as i64)?;

    settings.try_into()
}

#[get("/metrics")]
async fn metrics_route(state: &State<StateData>) -> Result<String, solaxcloud_rs::Error> {
    let hass = state.hass.lock().await;
    metrics::collect(&hass);
    metrics::read().await
}

#[get("/sensors")]
async fn sensors_route(state: &State<StateData>) -> Json<Vec<SensorState>> {
    let hass = state.hass.lock().await;
    Json(hass.sensors().map(|sensor| sensor.state()).collect())
}

#[get("/flow/user")]
async fn flow_form_route(state: &State<StateData>) -> Json<FlowResult> {
    Json(integration::flow_user(&state.hass, None).await)
}

#[post("/flow/user", data = "<input>")]
async fn flow_user_route(state: &State<StateData>, input: Json<Credentials>) -> Json<FlowResult> {
    Json(integration::flow_user(&state.hass, Some(input.into_inner())).await)
}

#[get("/entries")]
async fn entries_route(state: &State<StateData>) -> Json<Vec<ConfigEntry>> {
    Json(state.hass.lock().await.entries().cloned().collect())
}

#[delete("/entries/<entry_id>")]
async fn remove_entry_route(
    state: &State<StateData>,
    entry_id: &str,
) -> Result<Json<ConfigEntry>, SetupError> {
    let entry = state.hass.lock().await.async_remove_entry(entry_id).await?;
    Ok(Json(entry))
}

#[post("/entries/<entry_id>/reload")]
async fn reload_entry_route(
    state: &State<StateData>,
    entry_id: &str,
) -> Result<Json<ConfigEntry>, SetupError> {
    integration::reload_entry(&state.hass, entry_id).await?;
    let hass = state.hass.lock().await;
    hass.entry(entry_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| SetupError::UnknownEntry(entry_id.to_string()))
}

#[get("/issues")]
async fn issues_route(state: &State<StateData>) -> Json<Vec<Issue>> {
    Json(state.hass.lock().await.issues().cloned().collect())
}

/// Latest raw snapshot of a loaded entry. An entry waiting for a setup retry answers with the
/// error that keeps it from loading.
#[get("/dump/<entry_id>")]
async fn dump_route(
    state: &State<StateData>,
    entry_id: &str,
) -> Result<Option<Json<Snapshot>>, solaxcloud_rs::Error> {
    let hass = state.hass.lock().await;
    if let Some(snapshot) = hass
        .runtime(entry_id)
        .and_then(|runtime| runtime.coordinator.snapshot())
    {
        return Ok(Some(Json((*snapshot).clone())));
    }

    match hass.setup_error(entry_id) {
        Some(e) => Err(e.clone()),
        None => Ok(None),
    }
}

/// Periodically retry entries whose setup failed for a transient reason.
async fn retry_setup(hass: Arc<Mutex<Hass>>, interval: Duration) {
    let mut interval = tokio::time::interval(interval);
    interval.tick().await;
    loop {
        interval.tick().await;
        integration::retry_setup(&hass).await;
    }
}

#[rocket::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let settings = read_settings()?;
    let interval = Duration::from_secs(settings.interval);
    let client_factory = integration::solax_cloud_factory(
        settings.api_url.clone(),
        Duration::from_secs(settings.request_timeout),
    );

    let mut hass = Hass::new(client_factory, interval);
    if let Some(entries_file) = &settings.entries_file {
        hass.load_entries(Path::new(entries_file))?;
    }
    hass.async_setup_entries().await;

    if let (Some(token_id), Some(serial_number)) = (settings.token_id, settings.serial_number) {
        let credentials = Credentials {
            token_id,
            serial_number,
        };
        match hass.async_flow_user(Some(credentials)).await {
            FlowResult::CreateEntry { title, .. } => log::info!("Configured inverter {}", title),
            FlowResult::Abort { reason } => log::info!("Configured inverter skipped: {}", reason),
            FlowResult::Form { errors, .. } => {
                log::error!("Configured inverter rejected: {:?}", errors)
            }
        }
    }

    let hass = Arc::new(Mutex::new(hass));
    tokio::spawn(retry_setup(hass.clone(), interval));

    rocket::build()
        .manage(StateData { hass })
        .mount(
            "/",
            routes![
                metrics_route,
                sensors_route,
                flow_form_route,
                flow_user_route,
                entries_route,
                remove_entry_route,
                reload_entry_route,
                issues_route,
                dump_route
            ],
        )
        .launch()
        .await?;

    Ok(())
}
