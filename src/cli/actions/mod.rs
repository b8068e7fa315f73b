pub mod run;

use crate::collectors::config::CollectorConfig;
use secrecy::SecretString;
use std::time::Duration;

#[derive(Debug)]
pub enum Action {
    Run {
        port: u16,
        listen: Option<String>,
        dsns: Vec<SecretString>,
        collectors: CollectorConfig,
        telemetry_path: String,
        scrape_timeout: Option<Duration>,
    },
}
