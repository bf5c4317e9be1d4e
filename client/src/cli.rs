//! Command-line surface (out of core scope per §1, but still part of a
//! complete binary) — grounded on the teacher's `commands.rs` Tauri command
//! signatures, translated to a `clap` derive CLI since this binary has no
//! GUI frontend driving it.

use clap::Parser;

fn parse_port(s: &str) -> Result<u16, String> {
    let port: u16 = s.parse().map_err(|_| format!("'{s}' is not a valid port number"))?;
    if port < 1024 {
        return Err(format!("port {port} is reserved; use 1024-65535"));
    }
    Ok(port)
}

/// Exposes a local HTTP server on a public subdomain.
#[derive(Debug, Parser)]
#[command(name = "tunl", version, about)]
pub struct Cli {
    /// Local port to forward requests to.
    #[arg(value_parser = parse_port)]
    pub port: u16,

    /// Requested subdomain. Server generates one if omitted.
    pub subdomain: Option<String>,

    /// API key for quota-checked registration.
    #[arg(short = 'k', long, env = "TUNL_API_KEY")]
    pub api_key: Option<String>,

    /// Control channel endpoint.
    #[arg(long, env = "TUNNEL_SERVER", default_value = "wss://tunl.cc")]
    pub server: String,

    /// Caps reconnect attempts before giving up. Unset means unbounded,
    /// the recommended default per the reconnect policy (§9).
    #[arg(long)]
    pub max_reconnect_attempts: Option<u32>,
}
