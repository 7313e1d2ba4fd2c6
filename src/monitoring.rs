//! Operator alerting for failures that stop the ingestion loop.
//! Alerts go to a Telegram-style bot endpoint and are strictly best effort.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::AlertSection;

#[derive(Serialize)]
struct Message<'a> {
    chat_id: &'a str,
    text: &'a str,
}

pub struct Alerter {
    target: Option<Target>,
}

struct Target {
    url: String,
    channel: String,
    client: reqwest::blocking::Client,
}

impl Alerter {
    /// An alerter that drops everything
    pub fn disabled() -> Self {
        Self { target: None }
    }

    pub fn from_config(cfg: &AlertSection) -> Self {
        if !cfg.enabled {
            return Self::disabled();
        }
        let (Some(token), Some(channel)) = (&cfg.token, &cfg.channel) else {
            warn!("Alerting enabled without both a bot token and a channel, alerts are off");
            return Self::disabled();
        };
        let client = match reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                warn!("Could not build alert client, alerts are off: {}", e);
                return Self::disabled();
            }
        };
        Self {
            target: Some(Target {
                url: format!("{}/bot{}/sendMessage", cfg.api_url.trim_end_matches('/'), token),
                channel: channel.clone(),
                client,
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.target.is_some()
    }

    /// Fire and forget. Delivery failures are logged, never returned.
    pub fn send(&self, text: &str) {
        let Some(target) = &self.target else {
            return;
        };
        let body = Message {
            chat_id: &target.channel,
            text,
        };
        match target
            .client
            .post(&target.url)
            .json(&body)
            .send()
            .and_then(|r| r.error_for_status())
        {
            Ok(_) => debug!(channel = %target.channel, "Alert delivered"),
            Err(e) => warn!(channel = %target.channel, "Alert delivery failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_by_default() {
        let alerter = Alerter::from_config(&AlertSection::default());
        assert!(!alerter.is_enabled());
        alerter.send("nothing happens");
    }

    #[test]
    fn test_needs_token_and_channel() {
        let cfg = AlertSection {
            enabled: true,
            token: Some("123:abc".into()),
            ..Default::default()
        };
        assert!(!Alerter::from_config(&cfg).is_enabled());
    }

    #[test]
    fn test_unreachable_endpoint_is_swallowed() {
        let cfg = AlertSection {
            enabled: true,
            token: Some("123:abc".into()),
            channel: Some("@ops".into()),
            api_url: "http://127.0.0.1:1/".into(),
        };
        let alerter = Alerter::from_config(&cfg);
        assert!(alerter.is_enabled());
        alerter.send("loop stopped");
    }
}
