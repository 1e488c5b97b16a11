use clap::Parser;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "switchboard", about = "WebRTC signaling relay")]
pub struct Cli {
    /// Address to bind (overrides SWITCHBOARD_BIND)
    #[arg(long)]
    pub bind: Option<String>,

    /// Port to listen on (overrides SWITCHBOARD_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Reply to senders with useroffline/userbusy instead of silently
    /// dropping undeliverable envelopes
    #[arg(long)]
    pub presence_replies: bool,
}

impl Cli {
    pub fn apply(&self, config: &mut Config) {
        if let Some(bind) = &self.bind {
            config.bind_addr = bind.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.presence_replies {
            config.presence_replies = true;
        }
    }
}
