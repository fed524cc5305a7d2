use crate::consts::{self, CONF_SERIAL, CONF_TOKEN};
use crate::integration::{validate, ClientFactory, Hass};
use crate::model::Credentials;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

pub const VERSION: u32 = 1;
pub const STEP_USER: &str = "user";

const DEFAULT_TOKEN: &str = "XXXXXXXXXXXXXXXXXXXXXXX";
const DEFAULT_SERIAL: &str = "XXXXXXXXXX";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormField {
    pub name: &'static str,
    pub required: bool,
    pub default: &'static str,
    pub suggested_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowResult {
    Form {
        step_id: &'static str,
        data_schema: Vec<FormField>,
        errors: BTreeMap<&'static str, &'static str>,
    },
    CreateEntry {
        title: String,
        unique_id: String,
        data: Credentials,
    },
    Abort {
        reason: &'static str,
    },
}

/// Onboarding for one SolaX Cloud inverter: token plus registration number.
pub struct SolaxCloudConfigFlow {
    client_factory: ClientFactory,
    configured: HashSet<String>,
}

impl SolaxCloudConfigFlow {
    /// Takes what the flow needs from `hass`, so the flow can run without holding it.
    pub fn new(hass: &Hass) -> Self {
        SolaxCloudConfigFlow {
            client_factory: hass.client_factory(),
            configured: hass
                .entries()
                .filter_map(|entry| entry.unique_id.clone())
                .collect(),
        }
    }

    pub async fn async_step_user(&self, user_input: Option<Credentials>) -> FlowResult {
        let mut errors = BTreeMap::new();

        if let Some(input) = &user_input {
            let unique_id = consts::unique_id(&input.serial_number);
            if self.configured.contains(&unique_id) {
                return FlowResult::Abort {
                    reason: "already_configured",
                };
            }

            match validate((self.client_factory)(input)).await {
                Ok(true) => {}
                Ok(false) => {
                    errors.insert("base", "invalid_token_or_serial");
                }
                Err(e) => {
                    log::warn!("Cannot validate {}: {}", unique_id, e);
                    errors.insert("base", "cannot_connect");
                }
            }

            if errors.is_empty() {
                return FlowResult::CreateEntry {
                    title: input.serial_number.trim().to_string(),
                    unique_id,
                    data: input.clone(),
                };
            }
        }

        FlowResult::Form {
            step_id: STEP_USER,
            data_schema: data_schema(user_input.as_ref()),
            errors,
        }
    }
}

fn data_schema(suggested: Option<&Credentials>) -> Vec<FormField> {
    vec![
        FormField {
            name: CONF_TOKEN,
            required: true,
            default: DEFAULT_TOKEN,
            suggested_value: suggested.map(|c| c.token_id.clone()),
        },
        FormField {
            name: CONF_SERIAL,
            required: true,
            default: DEFAULT_SERIAL,
            suggested_value: suggested.map(|c| c.serial_number.clone()),
        },
    ]
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::Error;
    use crate::testing::FakeCloud;
    use serde_json::json;
    use std::sync::Arc;

    fn credentials(token: &str, serial: &str) -> Credentials {
        Credentials {
            token_id: token.to_string(),
            serial_number: serial.to_string(),
        }
    }

    fn hass_with(api: &Arc<FakeCloud>) -> Hass {
        Hass::with_client(api.clone())
    }

    #[tokio::test]
    async fn shows_empty_form() {
        let api = Arc::new(FakeCloud::valid());
        let hass = hass_with(&api);

        match SolaxCloudConfigFlow::new(&hass).async_step_user(None).await {
            FlowResult::Form {
                step_id,
                data_schema,
                errors,
            } => {
                assert_eq!("user", step_id);
                assert!(errors.is_empty());
                let names: Vec<_> = data_schema.iter().map(|f| f.name).collect();
                assert_eq!(vec!["token_id", "serial_number"], names);
                assert!(data_schema
                    .iter()
                    .all(|f| f.required && f.suggested_value.is_none()));
            }
            other => panic!("expected form, got {:?}", other),
        }
        assert_eq!(0, api.validations());
    }

    #[tokio::test]
    async fn creates_entry_keyed_by_serial() {
        let api = Arc::new(FakeCloud::valid());
        let hass = hass_with(&api);

        let result = SolaxCloudConfigFlow::new(&hass)
            .async_step_user(Some(credentials("token", "SWABCDEFGH ")))
            .await;

        assert_eq!(
            FlowResult::CreateEntry {
                title: "SWABCDEFGH".to_string(),
                unique_id: "SolaxCloud_SWABCDEFGH".to_string(),
                data: credentials("token", "SWABCDEFGH "),
            },
            result
        );
    }

    #[tokio::test]
    async fn invalid_credentials_show_one_error() {
        let api = Arc::new(FakeCloud::with_validation(Ok(false)));
        let hass = hass_with(&api);

        match SolaxCloudConfigFlow::new(&hass)
            .async_step_user(Some(credentials("wrong", "SWABCDEFGH")))
            .await
        {
            FlowResult::Form {
                errors,
                data_schema,
                ..
            } => {
                assert_eq!(1, errors.len());
                assert_eq!(Some(&"invalid_token_or_serial"), errors.get("base"));
                assert_eq!(Some("wrong".to_string()), data_schema[0].suggested_value);
            }
            other => panic!("expected form, got {:?}", other),
        }
        assert!(hass.entries().next().is_none());
    }

    #[tokio::test]
    async fn unreachable_cloud() {
        let api = Arc::new(FakeCloud::with_validation(Err(Error::Timeout(
            "connect timeout".to_string(),
        ))));
        let hass = hass_with(&api);

        match SolaxCloudConfigFlow::new(&hass)
            .async_step_user(Some(credentials("token", "SWABCDEFGH")))
            .await
        {
            FlowResult::Form { errors, .. } => {
                assert_eq!(Some(&"cannot_connect"), errors.get("base"));
            }
            other => panic!("expected form, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn duplicate_serial_is_aborted() {
        let api = Arc::new(FakeCloud::valid());
        api.push_data(vec![("soc", json!(87))]);
        let mut hass = hass_with(&api);

        let first = hass
            .async_flow_user(Some(credentials("token", "SWABCDEFGH")))
            .await;
        assert!(matches!(first, FlowResult::CreateEntry { .. }));

        let second = hass
            .async_flow_user(Some(credentials("another-token", "SWABCDEFGH")))
            .await;
        assert_eq!(
            FlowResult::Abort {
                reason: "already_configured"
            },
            second
        );
        assert_eq!(1, hass.entries().count());
        /* first flow plus the setup that followed it */
        assert_eq!(2, api.validations());
    }
}
