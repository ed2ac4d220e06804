use std::fmt;

#[derive(Debug)]
pub enum Error {
    Auth(String),
    TokenExpired,
    Api(String),
    Http(reqwest::Error),
    Json(serde_json::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Auth(msg) => write!(f, "Authentication error: {}", msg),
            Error::TokenExpired => write!(
                f,
                "Access token has expired; call authenticate() or refresh_token()"
            ),
            Error::Api(msg) => write!(f, "API error: {}", msg),
            Error::Http(err) => write!(f, "HTTP error: {}", err),
            Error::Json(err) => write!(f, "JSON parsing error: {}", err),
        }
    }
}

impl std::error::Error for Error {}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Http(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
