//! Configuration module

use launchpad_client::LaunchClient;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the launch agent's API
    pub agent_url: String,
}

impl Config {
    pub fn client(&self) -> LaunchClient {
        LaunchClient::new(&self.agent_url)
    }
}
