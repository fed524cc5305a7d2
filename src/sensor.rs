use crate::consts::DOMAIN;
use crate::coordinator::CoordinatorListener;
use serde::{Serialize, Serializer};
use serde_json::Value;

pub mod unit {
    pub const WATT: &str = "W";
    pub const KILO_WATT: &str = "kW";
    pub const KILO_WATT_HOUR: &str = "kWh";
    pub const AMPERE: &str = "A";
    pub const VOLT: &str = "V";
    pub const HERTZ: &str = "Hz";
    pub const CELSIUS: &str = "°C";
    pub const PERCENTAGE: &str = "%";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorDeviceClass {
    Power,
    Energy,
    Current,
    Voltage,
    Frequency,
    Temperature,
    Battery,
}

/// Presentation metadata for one realtime field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SensorEntityDescription {
    pub key: &'static str,
    pub name: &'static str,
    pub translation_key: &'static str,
    pub device_class: Option<SensorDeviceClass>,
    pub native_unit_of_measurement: Option<&'static str>,
}

impl SensorEntityDescription {
    const fn plain(key: &'static str, name: &'static str, translation_key: &'static str) -> Self {
        SensorEntityDescription {
            key,
            name,
            translation_key,
            device_class: None,
            native_unit_of_measurement: None,
        }
    }

    const fn measured(
        key: &'static str,
        name: &'static str,
        translation_key: &'static str,
        device_class: SensorDeviceClass,
        unit: &'static str,
    ) -> Self {
        SensorEntityDescription {
            key,
            name,
            translation_key,
            device_class: Some(device_class),
            native_unit_of_measurement: Some(unit),
        }
    }
}

/// Value of a sensor: the raw field from the latest snapshot, or unknown when the cloud did
/// not report it.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorValue {
    Known(Value),
    Unknown,
}

impl SensorValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SensorValue::Known(value) => value.as_f64(),
            SensorValue::Unknown => None,
        }
    }
}

impl Serialize for SensorValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SensorValue::Known(value) => value.serialize(serializer),
            SensorValue::Unknown => serializer.serialize_str("unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceEntryType {
    Service,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub identifiers: (&'static str, String),
    pub entry_type: DeviceEntryType,
}

/// One sensor entity reading `entity_description.key` from its coordinator.
#[derive(Debug, Clone)]
pub struct SolaxCloudSensor {
    unique_id: String,
    entity_description: &'static SensorEntityDescription,
    device_info: DeviceInfo,
    coordinator: CoordinatorListener,
}

/// Serializable view of a sensor at one point in time.
#[derive(Debug, Serialize)]
pub struct SensorState {
    pub unique_id: String,
    #[serde(flatten)]
    pub description: SensorEntityDescription,
    pub device: DeviceInfo,
    pub available: bool,
    pub value: SensorValue,
}

impl SolaxCloudSensor {
    pub fn new(
        unique_id: &str,
        entity_description: &'static SensorEntityDescription,
        coordinator: CoordinatorListener,
    ) -> Self {
        SolaxCloudSensor {
            unique_id: format!("{}_test_{}", unique_id, entity_description.key),
            entity_description,
            device_info: DeviceInfo {
                identifiers: (DOMAIN, unique_id.to_string()),
                entry_type: DeviceEntryType::Service,
            },
            coordinator,
        }
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn entity_description(&self) -> &'static SensorEntityDescription {
        self.entity_description
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    pub fn native_value(&self) -> SensorValue {
        self.coordinator
            .snapshot()
            .and_then(|snapshot| snapshot.get(self.entity_description.key).cloned())
            .map_or(SensorValue::Unknown, |value| match value {
                Value::Null => SensorValue::Unknown,
                value => SensorValue::Known(value),
            })
    }

    /// False while the coordinator's last refresh failed; the value is then the last good one.
    pub fn available(&self) -> bool {
        self.coordinator.last_update_success()
    }

    pub fn state(&self) -> SensorState {
        SensorState {
            unique_id: self.unique_id.clone(),
            description: *self.entity_description,
            device: self.device_info.clone(),
            available: self.available(),
            value: self.native_value(),
        }
    }
}

/// One sensor per entry of [`SENSOR_TYPES`], all sharing `coordinator`.
pub fn setup_entry(unique_id: &str, coordinator: &CoordinatorListener) -> Vec<SolaxCloudSensor> {
    SENSOR_TYPES
        .iter()
        .map(|description| SolaxCloudSensor::new(unique_id, description, coordinator.clone()))
        .collect()
}

pub static SENSOR_TYPES: &[SensorEntityDescription] = &[
    SensorEntityDescription::plain("inverterSn", "Inverter serial", "inverter_serial"),
    SensorEntityDescription::plain("sn", "Pocket serial", "pocket_serial"),
    SensorEntityDescription::measured(
        "ratedPower",
        "Inverter size",
        "inverter_size",
        SensorDeviceClass::Power,
        unit::KILO_WATT,
    ),
    SensorEntityDescription::measured(
        "idc1",
        "MPPT1 current",
        "mppt1_current",
        SensorDeviceClass::Current,
        unit::AMPERE,
    ),
    SensorEntityDescription::measured(
        "idc2",
        "MPPT2 current",
        "mppt2_current",
        SensorDeviceClass::Current,
        unit::AMPERE,
    ),
    SensorEntityDescription::measured(
        "vdc1",
        "MPPT1 voltage",
        "mppt1_voltage",
        SensorDeviceClass::Voltage,
        unit::VOLT,
    ),
    SensorEntityDescription::measured(
        "vdc2",
        "MPPT2 voltage",
        "mppt2_voltage",
        SensorDeviceClass::Voltage,
        unit::VOLT,
    ),
    SensorEntityDescription::measured(
        "iac1",
        "AC phase 1 current",
        "ac_phase1_current",
        SensorDeviceClass::Current,
        unit::AMPERE,
    ),
    SensorEntityDescription::measured(
        "vac1",
        "AC phase 1 voltage",
        "ac_phase1_voltage",
        SensorDeviceClass::Voltage,
        unit::VOLT,
    ),
    SensorEntityDescription::measured(
        "acpower",
        "AC Power",
        "ac_power",
        SensorDeviceClass::Power,
        unit::WATT,
    ),
    SensorEntityDescription::measured(
        "temperature",
        "Inverter Temperature",
        "inverter_temperature",
        SensorDeviceClass::Temperature,
        unit::CELSIUS,
    ),
    SensorEntityDescription::measured(
        "yieldtoday",
        "Yield today",
        "yield_today",
        SensorDeviceClass::Energy,
        unit::KILO_WATT_HOUR,
    ),
    SensorEntityDescription::measured(
        "yieldtotal",
        "Yield total",
        "yield_total",
        SensorDeviceClass::Energy,
        unit::KILO_WATT_HOUR,
    ),
    SensorEntityDescription::measured(
        "feedinpower",
        "Feedin Power",
        "feedin_power",
        SensorDeviceClass::Power,
        unit::WATT,
    ),
    SensorEntityDescription::measured(
        "powerdc1",
        "MPPT1 power",
        "mppt1_power",
        SensorDeviceClass::Power,
        unit::WATT,
    ),
    SensorEntityDescription::measured(
        "powerdc2",
        "MPPT2 power",
        "mppt2_power",
        SensorDeviceClass::Power,
        unit::WATT,
    ),
    SensorEntityDescription::measured(
        "pac1",
        "AC phase 1 power",
        "ac_phase1_power",
        SensorDeviceClass::Power,
        unit::WATT,
    ),
    SensorEntityDescription::measured(
        "pac2",
        "AC phase 2 power",
        "ac_phase2_power",
        SensorDeviceClass::Power,
        unit::WATT,
    ),
    SensorEntityDescription::measured(
        "pac3",
        "AC phase 3 power",
        "ac_phase3_power",
        SensorDeviceClass::Power,
        unit::WATT,
    ),
    SensorEntityDescription::measured(
        "iac2",
        "AC phase 2 current",
        "ac_phase2_current",
        SensorDeviceClass::Current,
        unit::AMPERE,
    ),
    SensorEntityDescription::measured(
        "iac3",
        "AC phase 3 current",
        "ac_phase3_current",
        SensorDeviceClass::Current,
        unit::AMPERE,
    ),
    SensorEntityDescription::measured(
        "vac2",
        "AC phase 2 voltage",
        "ac_phase2_voltage",
        SensorDeviceClass::Voltage,
        unit::VOLT,
    ),
    SensorEntityDescription::measured(
        "vac3",
        "AC phase 3 voltage",
        "ac_phase3_voltage",
        SensorDeviceClass::Voltage,
        unit::VOLT,
    ),
    SensorEntityDescription::measured(
        "fac1",
        "AC phase 1 frequency",
        "ac_phase1_frequency",
        SensorDeviceClass::Frequency,
        unit::HERTZ,
    ),
    SensorEntityDescription::measured(
        "fac2",
        "AC phase 2 frequency",
        "ac_phase2_frequency",
        SensorDeviceClass::Frequency,
        unit::HERTZ,
    ),
    SensorEntityDescription::measured(
        "fac3",
        "AC phase 3 frequency",
        "ac_phase3_frequency",
        SensorDeviceClass::Frequency,
        unit::HERTZ,
    ),
    SensorEntityDescription::measured(
        "feedinenergy",
        "Feedin energy",
        "feedin_energy",
        SensorDeviceClass::Power,
        unit::WATT,
    ),
    SensorEntityDescription::measured(
        "consumeenergy",
        "Consume energy",
        "consume_energy",
        SensorDeviceClass::Power,
        unit::WATT,
    ),
    SensorEntityDescription::plain("uploadTime", "Last cloud upload", "upload_time"),
    SensorEntityDescription::measured(
        "batVoltage",
        "Battery voltage",
        "battery_voltage",
        SensorDeviceClass::Voltage,
        unit::VOLT,
    ),
    SensorEntityDescription::measured(
        "batCurrent",
        "Battery current",
        "battery_current",
        SensorDeviceClass::Current,
        unit::AMPERE,
    ),
    SensorEntityDescription::measured(
        "temperBoard",
        "Battery temperature 1",
        "battery_temperature_1",
        SensorDeviceClass::Temperature,
        unit::CELSIUS,
    ),
    SensorEntityDescription::measured(
        "surplusEnergy",
        "Surplus energy",
        "surplus_energy",
        SensorDeviceClass::Power,
        unit::WATT,
    ),
    SensorEntityDescription::measured(
        "chargeEnergy",
        "Charge energy",
        "charge_energy",
        SensorDeviceClass::Power,
        unit::WATT,
    ),
    SensorEntityDescription::measured(
        "dischargeEnergy",
        "Discharge energy",
        "discharge_energy",
        SensorDeviceClass::Power,
        unit::WATT,
    ),
    SensorEntityDescription::measured(
        "acenergyin",
        "Grid energy in",
        "grid_energy",
        SensorDeviceClass::Power,
        unit::WATT,
    ),
    SensorEntityDescription::measured(
        "pvenergy",
        "PV energy",
        "pv_energy",
        SensorDeviceClass::Power,
        unit::WATT,
    ),
    SensorEntityDescription::measured(
        "soc",
        "State of charge",
        "soc",
        SensorDeviceClass::Battery,
        unit::PERCENTAGE,
    ),
    SensorEntityDescription::measured(
        "battemper",
        "Battery temperature 2",
        "battery_temperature_2",
        SensorDeviceClass::Temperature,
        unit::CELSIUS,
    ),
    SensorEntityDescription::measured(
        "veps1",
        "EPS phase 1 voltage",
        "eps_phase1_voltage",
        SensorDeviceClass::Voltage,
        unit::VOLT,
    ),
    SensorEntityDescription::measured(
        "veps2",
        "EPS phase 2 voltage",
        "eps_phase2_voltage",
        SensorDeviceClass::Voltage,
        unit::VOLT,
    ),
    SensorEntityDescription::measured(
        "veps3",
        "EPS phase 3 voltage",
        "eps_phase3_voltage",
        SensorDeviceClass::Voltage,
        unit::VOLT,
    ),
    SensorEntityDescription::measured(
        "ieps1",
        "EPS phase 1 current",
        "eps_phase1_current",
        SensorDeviceClass::Current,
        unit::AMPERE,
    ),
    SensorEntityDescription::measured(
        "ieps2",
        "EPS phase 2 current",
        "eps_phase2_current",
        SensorDeviceClass::Current,
        unit::AMPERE,
    ),
    SensorEntityDescription::measured(
        "ieps3",
        "EPS phase 3 current",
        "eps_phase3_current",
        SensorDeviceClass::Current,
        unit::AMPERE,
    ),
    SensorEntityDescription::measured(
        "peps1",
        "EPS phase 1 power",
        "eps_phase1_power",
        SensorDeviceClass::Power,
        unit::WATT,
    ),
    SensorEntityDescription::measured(
        "peps2",
        "EPS phase 2 power",
        "eps_phase2_power",
        SensorDeviceClass::Power,
        unit::WATT,
    ),
    SensorEntityDescription::measured(
        "peps3",
        "EPS phase 3 power",
        "eps_phase3_power",
        SensorDeviceClass::Power,
        unit::WATT,
    ),
    SensorEntityDescription::measured(
        "epsfreq",
        "EPS frequency",
        "eps_frequency",
        SensorDeviceClass::Frequency,
        unit::HERTZ,
    ),
    SensorEntityDescription::plain("batcycle", "Battery cycle count", "batcycle"),
];
