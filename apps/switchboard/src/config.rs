use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    /// Reply to senders with `useroffline`/`userbusy` instead of silently
    /// dropping. Off by default: silent drop is the baseline contract.
    pub presence_replies: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env::var("SWITCHBOARD_BIND").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("SWITCHBOARD_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8000),
            presence_replies: env::var("SWITCHBOARD_PRESENCE_REPLIES")
                .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 8000,
            presence_replies: false,
        }
    }
}
