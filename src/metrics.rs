use prometheus::{Encoder, GaugeVec, IntGaugeVec, TextEncoder};
use solaxcloud_rs::sensor::SolaxCloudSensor;
use solaxcloud_rs::Hass;

lazy_static! {
    static ref SENSOR_GAUGE: GaugeVec = register_gauge_vec!(
        opts!(
            "solaxcloud_sensor",
            "latest numeric value reported by SolaX Cloud for a sensor",
        ),
        &["unique_id", "key", "unit"],
    )
    .unwrap();
    static ref LAST_UPDATE_SUCCESS_GAUGE: IntGaugeVec = register_int_gauge_vec!(
        opts!(
            "solaxcloud_last_update_success",
            "1 if the last refresh of the config entry succeeded",
        ),
        &["entry_id"],
    )
    .unwrap();
    static ref REFRESHES_GAUGE: IntGaugeVec = register_int_gauge_vec!(
        opts!(
            "solaxcloud_refreshes",
            "refreshes since the config entry was set up, by outcome",
        ),
        &["entry_id", "outcome"],
    )
    .unwrap();
}

fn sensor_labels(sensor: &SolaxCloudSensor) -> [&str; 3] {
    let description = sensor.entity_description();
    [
        sensor.unique_id(),
        description.key,
        description.native_unit_of_measurement.unwrap_or(""),
    ]
}

/// Numeric values are exported; text fields and unknown values drop out of the registry.
fn observe_sensor(sensor: &SolaxCloudSensor) {
    let labels = sensor_labels(sensor);
    match sensor.native_value().as_f64() {
        Some(value) => SENSOR_GAUGE.with_label_values(&labels).set(value),
        None => {
            let _ = SENSOR_GAUGE.remove_label_values(&labels);
        }
    }
}

/// Copy the current state of every loaded entry into the Prometheus registry. Series of entries
/// that are no longer loaded are dropped.
pub fn collect(hass: &Hass) {
    SENSOR_GAUGE.reset();
    LAST_UPDATE_SUCCESS_GAUGE.reset();
    REFRESHES_GAUGE.reset();

    for (entry_id, runtime) in hass.runtimes() {
        let data = runtime.coordinator.data();

        LAST_UPDATE_SUCCESS_GAUGE
            .with_label_values(&[entry_id.as_str()])
            .set(data.last_update_success as i64);
        REFRESHES_GAUGE
            .with_label_values(&[entry_id.as_str(), "success"])
            .set(data.successful_refreshes as i64);
        REFRESHES_GAUGE
            .with_label_values(&[entry_id.as_str(), "failure"])
            .set(data.failed_refreshes as i64);

        for sensor in &runtime.sensors {
            observe_sensor(sensor);
        }
    }
}

/// Read metrics from Prometheus exporter registry.
pub async fn read() -> Result<String, solaxcloud_rs::Error> {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    encoder
        .encode(&metric_families, &mut buffer)
        .or(Err(solaxcloud_rs::Error::FormatError))?;
    String::from_utf8(buffer).or(Err(solaxcloud_rs::Error::FormatError))
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use solaxcloud_rs::integration::ClientFactory;
    use solaxcloud_rs::{CloudClient, Credentials, Error, Snapshot};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Accepts the first two validations, then times out.
    struct FlakyCloud {
        validations: AtomicUsize,
    }

    impl CloudClient for FlakyCloud {
        fn validate_token_and_registration_number(&self) -> Result<bool, Error> {
            if self.validations.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(true)
            } else {
                Err(Error::Timeout("connect timeout".to_string()))
            }
        }

        fn get_realtime_data(&self) -> Result<Snapshot, Error> {
            Ok(vec![("soc", json!(87))].into_iter().collect())
        }
    }

    #[tokio::test]
    async fn entries_without_runtime_drop_out() {
        let api = Arc::new(FlakyCloud {
            validations: AtomicUsize::new(0),
        });
        let client_factory: ClientFactory =
            Arc::new(move |_: &Credentials| -> Arc<dyn CloudClient> { api.clone() });
        let mut hass = Hass::new(client_factory, Duration::from_secs(60));
        hass.async_flow_user(Some(Credentials {
            token_id: "token".to_string(),
            serial_number: "SWMETRICS1".to_string(),
        }))
        .await;
        let entry_id = hass.entries().next().unwrap().entry_id.clone();
        let entry_label = format!("entry_id=\"{}\"", entry_id);

        collect(&hass);
        let output = read().await.unwrap();
        assert!(output.contains(&format!(
            "solaxcloud_last_update_success{{{}}} 1",
            entry_label
        )));
        assert!(output.contains("unique_id=\"SolaxCloud_SWMETRICS1_test_soc\""));

        /* second setup times out, the entry is left without a runtime */
        assert!(hass.async_reload_entry(&entry_id).await.is_err());
        collect(&hass);
        let output = read().await.unwrap();
        assert!(!output.contains(&entry_label));
        assert!(!output.contains("SolaxCloud_SWMETRICS1"));
    }
}
