pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod models;

pub use auth::{AccessToken, TokenStore};
pub use client::NetatmoClient;
pub use error::{Error, Result};
pub use models::{MeasurePoint, MeasureRequest, MeasureType, Scale};
