//! Runtime settings read from the process environment (after `.env` is loaded).
//!
//! `Settings::from_lookup` does the parsing against an arbitrary lookup so it
//! can be exercised without mutating the real environment.

use std::net::SocketAddr;
use thiserror::Error;

pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:8081";
pub const DEFAULT_CORS_ORIGINS: &str = "http://localhost:5173,http://localhost:5174";
pub const DEFAULT_POOL_SIZE: u32 = 10;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub database_url: String,
    pub server_addr: SocketAddr,
    pub cors_origins: Vec<String>,
    pub pool_size: u32,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let addr = lookup("SERVER_ADDR").unwrap_or_else(|| DEFAULT_SERVER_ADDR.to_string());
        let server_addr: SocketAddr = addr.parse().map_err(|_| ConfigError::Invalid {
            key: "SERVER_ADDR",
            value: addr.to_string(),
        })?;

        let origins = lookup("CORS_ORIGINS").unwrap_or_else(|| DEFAULT_CORS_ORIGINS.to_string());
        let cors_origins = origins
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(String::from)
            .collect();

        let pool_size = match lookup("DB_POOL_SIZE") {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(size) if size > 0 => size,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "DB_POOL_SIZE",
                        value: raw,
                    })
                }
            },
            None => DEFAULT_POOL_SIZE,
        };

        Ok(Settings {
            database_url,
            server_addr,
            cors_origins,
            pool_size,
        })
    }
}
