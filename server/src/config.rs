//! Server configuration, read from the process environment.
//!
//! No config crate here, same as the teacher's `main.rs` does its setup
//! inline — this just centralizes the handful of env vars into one struct
//! so `main` reads them once.

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub base_domain: String,
    pub https: bool,
}

impl Config {
    /// Loads configuration from the environment, falling back to the
    /// documented defaults: `PORT=3000`, `BASE_DOMAIN=localhost:3000`,
    /// `HTTPS=false`.
    pub fn from_env() -> Result<Self> {
        let port = match std::env::var("PORT") {
            Ok(v) => v.parse::<u16>().context("PORT must be a valid port number")?,
            Err(_) => 3000,
        };
        let base_domain =
            std::env::var("BASE_DOMAIN").unwrap_or_else(|_| format!("localhost:{port}"));
        let https = match std::env::var("HTTPS") {
            Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
            Err(_) => false,
        };
        Ok(Config {
            port,
            base_domain,
            https,
        })
    }

    /// The scheme used when building `Registered.url`.
    pub fn scheme(&self) -> &'static str {
        if self.https {
            "https"
        } else {
            "http"
        }
    }

    /// Builds the public URL a client is told about for `subdomain`.
    pub fn tunnel_url(&self, subdomain: &str) -> String {
        format!("{}://{}.{}", self.scheme(), subdomain, self.base_domain)
    }
}
