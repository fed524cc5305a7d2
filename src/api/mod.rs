pub mod endpoint;
pub mod error;
pub mod response;

use crate::model::{self, Snapshot};
pub use error::Error;
use response::{FailCode, GetRealtimeInfo};
use serde_json::Value;
use std::time::Duration;

/// Blocking SolaX Cloud operations. Implementations are called from the blocking worker pool,
/// never from async context directly.
pub trait CloudClient: Send + Sync {
    /// `Ok(false)` means the cloud answered and rejected the token or registration number.
    fn validate_token_and_registration_number(&self) -> Result<bool, Error>;

    fn get_realtime_data(&self) -> Result<Snapshot, Error>;
}

/// Client for one inverter registered in SolaX Cloud.
#[derive(Debug, Clone)]
pub struct SolaxCloud {
    pub api_url: String,
    pub credentials: model::Credentials,
    pub timeout: Duration,
}

pub fn api(api_url: String, credentials: model::Credentials, timeout: Duration) -> SolaxCloud {
    SolaxCloud {
        api_url,
        credentials,
        timeout,
    }
}

/// Map transport and non-2xx failures to Error
fn map_api_err(error: reqwest::Error) -> Error {
    if error.is_timeout() {
        return Error::Timeout(error.to_string());
    }
    if error.is_connect() {
        return Error::ConnectError(error.to_string());
    }
    match error.status() {
        Some(http::StatusCode::TOO_MANY_REQUESTS) => Error::RateExceeded(error.to_string()),
        Some(http::StatusCode::UNAUTHORIZED) | Some(http::StatusCode::FORBIDDEN) => {
            Error::LoginError(error.to_string())
        }
        _ => Error::ApiError(error.to_string()),
    }
}

/// Sort a parsed response into "accepted" (`Ok(Some(result))`), "rejected by the cloud"
/// (`Ok(None)`) and errors worth retrying.
fn map_response_status(response: GetRealtimeInfo) -> Result<Option<Value>, Error> {
    if response.success {
        return response
            .result
            .map(Some)
            .ok_or(Error::UnexpectedApiResponse);
    }

    match response.fail_code() {
        /* {"success":false,"exception":"The query frequency exceeds the limit","code":2002} */
        Some(FailCode::QueryFrequencyExceeded) => Err(Error::RateExceeded(
            response
                .exception
                .unwrap_or_else(|| "(no exception message received)".to_string()),
        )),
        Some(FailCode::RequestFailed) => Err(Error::ApiError(
            response
                .exception
                .unwrap_or_else(|| "(no exception message received)".to_string()),
        )),
        _ => {
            log::debug!(
                "SolaX Cloud rejected request: code {:?}, exception {:?}",
                response.code,
                response.exception
            );
            Ok(None)
        }
    }
}

fn validation_outcome(response: GetRealtimeInfo) -> Result<bool, Error> {
    map_response_status(response).map(|result| result.is_some())
}

fn snapshot_from(response: GetRealtimeInfo) -> Result<Snapshot, Error> {
    let exception = response.exception.clone();
    match map_response_status(response)? {
        Some(Value::Object(map)) => Ok(Snapshot::from(map)),
        Some(_) => Err(Error::UnexpectedApiResponse),
        None => Err(Error::ApiError(exception.unwrap_or_else(|| {
            "(no exception message received)".to_string()
        }))),
    }
}

impl SolaxCloud {
    fn get(&self, endpoint: &endpoint::Endpoint) -> Result<GetRealtimeInfo, Error> {
        let client = reqwest::blocking::ClientBuilder::new()
            .timeout(self.timeout)
            .build()
            .or(Err(Error::InternalError))?;
        let url = format!("{}{}", self.api_url, endpoint);

        let response_text = client
            .get(url)
            .query(&[
                ("tokenId", self.credentials.token_id.as_str()),
                ("sn", self.credentials.serial_number.as_str()),
            ])
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(map_api_err)?
            .text()
            .map_err(|e| Error::ApiError(format!("Error reading API response: {}", e)))?;

        log::trace!(
            "endpoint: {}, sn: {}, response_text: {}",
            endpoint,
            self.credentials.serial_number,
            response_text
        );

        serde_json::from_str::<GetRealtimeInfo>(&response_text)
            .map_err(|e| Error::InvalidResponse(response_text, e.to_string()))
    }
}

impl CloudClient for SolaxCloud {
    fn validate_token_and_registration_number(&self) -> Result<bool, Error> {
        self.get(endpoint::REALTIME_INFO).and_then(validation_outcome)
    }

    fn get_realtime_data(&self) -> Result<Snapshot, Error> {
        self.get(endpoint::REALTIME_INFO).and_then(snapshot_from)
    }
}

#[cfg(test)]
mod test {
    use super::response::GetRealtimeInfo;
    use super::*;
    use mockito::{Matcher, Mock, Server, ServerGuard};
    use std::fs;
    use std::net::TcpListener;
    use std::path::PathBuf;

    fn read_resource(filename: &str) -> String {
        let mut d = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        d.push(format!("resources/test/{}", filename));
        fs::read_to_string(d.as_path()).unwrap()
    }

    fn read_response(filename: &str) -> GetRealtimeInfo {
        serde_json::from_str(&read_resource(filename)).unwrap()
    }

    fn client(api_url: String) -> SolaxCloud {
        api(
            api_url,
            model::Credentials {
                token_id: "20240514120000123".to_string(),
                serial_number: "SWABCDEFGH".to_string(),
            },
            Duration::from_millis(500),
        )
    }

    fn realtime_mock(server: &mut ServerGuard, status: usize, body: &str) -> Mock {
        server
            .mock("GET", "/getRealtimeInfo.do")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("tokenId".into(), "20240514120000123".into()),
                Matcher::UrlEncoded("sn".into(), "SWABCDEFGH".into()),
            ]))
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create()
    }

    #[test]
    fn fetch_sends_token_and_serial() {
        let mut server = Server::new();
        let mock = realtime_mock(&mut server, 200, &read_resource("getRealtimeInfo.json"));

        let snapshot = client(server.url()).get_realtime_data().unwrap();

        assert_eq!(Some(&serde_json::json!(87.0)), snapshot.get("soc"));
        mock.assert();
    }

    #[test]
    fn validation_against_server() {
        let mut server = Server::new();
        let mock = realtime_mock(
            &mut server,
            200,
            &read_resource("getRealtimeInfo_InvalidToken.json"),
        );

        assert_eq!(
            Ok(false),
            client(server.url()).validate_token_and_registration_number()
        );
        mock.assert();
    }

    #[test]
    fn http_status_errors() {
        let mut server = Server::new();

        let mock = realtime_mock(&mut server, 429, "");
        let error = client(server.url()).get_realtime_data().unwrap_err();
        assert!(matches!(error, Error::RateExceeded(_)), "{:?}", error);
        mock.remove();

        let mock = realtime_mock(&mut server, 401, "");
        let error = client(server.url())
            .validate_token_and_registration_number()
            .unwrap_err();
        assert!(matches!(error, Error::LoginError(_)), "{:?}", error);
        assert!(error.is_transient());
        mock.remove();

        let _mock = realtime_mock(&mut server, 500, "");
        let error = client(server.url())
            .validate_token_and_registration_number()
            .unwrap_err();
        assert!(matches!(error, Error::ApiError(_)), "{:?}", error);
        assert!(error.is_transient());
    }

    #[test]
    fn unparsable_body() {
        let mut server = Server::new();
        let _mock = realtime_mock(&mut server, 200, &read_resource("invalid_json.json"));

        let error = client(server.url()).get_realtime_data().unwrap_err();

        assert!(matches!(error, Error::InvalidResponse(_, _)), "{:?}", error);
        assert!(!error.is_transient());
    }

    #[test]
    fn unanswered_request_times_out() {
        /* accepts connections through the backlog but never answers */
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let error = client(url).get_realtime_data().unwrap_err();

        assert!(matches!(error, Error::Timeout(_)), "{:?}", error);
        assert!(error.is_transient());
    }

    #[test]
    fn refused_connection() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let error = client(format!("http://127.0.0.1:{}", port))
            .validate_token_and_registration_number()
            .unwrap_err();

        assert!(matches!(error, Error::ConnectError(_)), "{:?}", error);
        assert!(error.is_transient());
    }

    #[test]
    fn valid_credentials() {
        let response = read_response("getRealtimeInfo.json");
        assert_eq!(Ok(true), validation_outcome(response));
    }

    #[test]
    fn invalid_credentials() {
        let response = read_response("getRealtimeInfo_InvalidToken.json");
        assert_eq!(Ok(false), validation_outcome(response));
    }

    #[test]
    fn rate_limit_is_not_a_rejection() {
        let response = read_response("getRealtimeInfo_RateLimited.json");
        match validation_outcome(response) {
            Err(Error::RateExceeded(_)) => {}
            other => panic!("expected RateExceeded, got {:?}", other),
        }
    }

    #[test]
    fn snapshot_keeps_raw_values() {
        let snapshot = snapshot_from(read_response("getRealtimeInfo.json")).unwrap();
        assert_eq!(Some(&serde_json::json!(87.0)), snapshot.get("soc"));
        assert_eq!(Some(&serde_json::json!("H34A10I1234567")), snapshot.get("inverterSn"));
        assert_eq!(Some(&Value::Null), snapshot.get("peps2"));
        assert!(!snapshot.contains_key("temperature"));
    }

    #[test]
    fn rejected_fetch_is_an_api_error() {
        let error = snapshot_from(read_response("getRealtimeInfo_InvalidToken.json")).unwrap_err();
        assert_eq!(Error::ApiError("Interface Unauthorized".to_string()), error);
    }

    #[test]
    fn success_without_result() {
        let response: GetRealtimeInfo =
            serde_json::from_str(r#"{"success":true,"exception":"Query success!","code":0}"#)
                .unwrap();
        assert_eq!(Err(Error::UnexpectedApiResponse), snapshot_from(response));
    }

    #[test]
    fn result_must_be_an_object() {
        let response: GetRealtimeInfo =
            serde_json::from_str(r#"{"success":true,"result":[1,2,3],"code":0}"#).unwrap();
        assert_eq!(Err(Error::UnexpectedApiResponse), snapshot_from(response));
    }
}
