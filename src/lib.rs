pub mod api;
pub mod config_flow;
pub mod consts;
pub mod coordinator;
pub mod integration;
pub mod model;
pub mod sensor;

#[cfg(test)]
mod testing;

pub use api::{CloudClient, Error};
pub use integration::{EntryId, Hass, SetupError};
pub use model::{Credentials, Snapshot};
