use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use std::fmt;
use std::io::Cursor;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    LoginError(String),
    ApiError(String),
    UnexpectedApiResponse,
    InvalidResponse(String, String),
    RateExceeded(String),
    Timeout(String),
    ConnectError(String),
    /// The blocking task running a client call panicked or was cancelled.
    TaskFailed(String),
    FormatError,
    InternalError,
}

impl Error {
    /// Transport level failures (timeouts, refused connections, HTTP error statuses) and failed
    /// client tasks. Retrying later may succeed without the user changing anything.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_)
                | Error::ConnectError(_)
                | Error::RateExceeded(_)
                | Error::LoginError(_)
                | Error::ApiError(_)
                | Error::TaskFailed(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::LoginError(s) => write!(f, "login error: {}", s),
            Error::ApiError(s) => write!(f, "API error: {}", s),
            Error::UnexpectedApiResponse => write!(f, "unexpected API response"),
            Error::InvalidResponse(body, e) => write!(f, "invalid response ({}): {}", e, body),
            Error::RateExceeded(s) => write!(f, "rate exceeded: {}", s),
            Error::Timeout(s) => write!(f, "timeout: {}", s),
            Error::ConnectError(s) => write!(f, "cannot connect: {}", s),
            Error::TaskFailed(s) => write!(f, "client task failed: {}", s),
            Error::FormatError => write!(f, "format error"),
            Error::InternalError => write!(f, "internal error"),
        }
    }
}

impl std::error::Error for Error {}

impl<'r> Responder<'r, 'static> for Error {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        match self {
            Error::RateExceeded(s) => {
                let error = format!("<html><body><h3>429 Too Many Requests</h3>SolaX Cloud response: <code>{}</code></body></html>", s);
                Response::build()
                    .status(Status::TooManyRequests)
                    .sized_body(error.len(), Cursor::new(error))
                    .header(ContentType::new("text", "html"))
                    .ok()
            }
            Error::LoginError(s) => {
                let error = format!("<html><body><h3>403 Forbidden</h3>SolaX Cloud rejected the token: <code>{}</code></body></html>", s);
                Response::build()
                    .status(Status::Forbidden)
                    .sized_body(error.len(), Cursor::new(error))
                    .header(ContentType::new("text", "html"))
                    .ok()
            }
            Error::Timeout(s) | Error::ConnectError(s) => {
                let error = format!("<html><body><h3>503 Service Unavailable</h3>SolaX Cloud unreachable: <code>{}</code></body></html>", s);
                Response::build()
                    .status(Status::ServiceUnavailable)
                    .sized_body(error.len(), Cursor::new(error))
                    .header(ContentType::new("text", "html"))
                    .ok()
            }
            _ => {
                let error = format!(
                    "<html><body><h3>Unknown exception</h3><code>{:?}</code></body></html>",
                    self
                );
                Response::build()
                    .status(Status::InternalServerError)
                    .sized_body(error.len(), Cursor::new(error))
                    .header(ContentType::new("text", "html"))
                    .ok()
            }
        }
    }
}
