use std::time::Duration;

pub const DOMAIN: &str = "solaxcloud";
pub const DEFAULT_NAME: &str = "Solax";

pub const CONF_TOKEN: &str = "token_id";
pub const CONF_SERIAL: &str = "serial_number";

pub const API_URL: &str = "https://www.solaxcloud.com/proxyApp/proxy/api";

pub const UPDATE_INTERVAL: Duration = Duration::from_secs(60);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Where a user whose credentials were rejected is sent to start over.
pub const ISSUE_URL: &str = "/config/integrations/dashboard/add?domain=solaxcloud";

pub fn unique_id(serial_number: &str) -> String {
    format!("SolaxCloud_{}", serial_number).trim().to_string()
}
