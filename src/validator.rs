//! Stream liveness probing.
//!
//! Each channel's stream URL is probed with a `HEAD` request. Probes run
//! concurrently up to `validation.concurrency`, but results are applied in
//! input order and counted only after every probe has finished.

use futures::stream::{self, StreamExt};
use reqwest::header::RANGE;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::{ProbeSettings, ValidationConfig, ValidationMode};
use crate::playlist::{Channel, Liveness};

/// Status codes that count as a reachable stream.
const OK_CODES: [u16; 7] = [200, 206, 301, 302, 303, 307, 308];

/// Pause between failed attempts on the same URL.
const RETRY_DELAY: Duration = Duration::from_millis(150);

/// Number of failing channels sampled into the metrics.
const MAX_FAILURE_SAMPLES: usize = 15;

/// One dead channel, sampled for the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSample {
    pub title: String,
    pub url: String,
    pub code: Option<u16>,
    pub reason: String,
}

/// Validation stage diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub mode: String,
    pub checked: usize,
    pub alive: usize,
    pub dead: usize,
    /// Channels counted alive only because of a 403/405 answer.
    pub soft_alive: usize,
    pub unknown: usize,
    /// Final result per channel: status code, `timeout` or `network_error`.
    pub codes: BTreeMap<String, usize>,
    pub failure_samples: Vec<FailureSample>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ProbeOutcome {
    liveness: Liveness,
    code: Option<u16>,
    reason: String,
    soft_alive: bool,
}

impl ProbeOutcome {
    fn histogram_key(&self) -> String {
        match self.code {
            Some(code) => code.to_string(),
            None => self.reason.clone(),
        }
    }
}

/// Probes stream URLs and records liveness on each channel.
#[derive(Debug, Clone)]
pub struct Validator {
    client: reqwest::Client,
    config: ValidationConfig,
}

impl Validator {
    /// Builds a validator whose client never follows redirects, so a 3xx
    /// answer is itself the probe result.
    pub fn new(user_agent: &str, config: ValidationConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client, config })
    }

    /// Classifies every channel under `mode` and returns the stage metrics.
    ///
    /// With [`ValidationMode::None`] no request is made and every channel is
    /// marked unknown with reason `validation_disabled`.
    pub async fn validate(&self, channels: &mut [Channel], mode: ValidationMode) -> ValidationMetrics {
        let mut metrics = ValidationMetrics {
            mode: mode.as_str().to_string(),
            ..Default::default()
        };

        let Some(settings) = self.config.settings_for(mode) else {
            for ch in channels.iter_mut() {
                ch.liveness = Liveness::Unknown;
                ch.liveness_code = None;
                ch.liveness_reason = "validation_disabled".to_string();
            }
            metrics.unknown = channels.len();
            tracing::info!(channels = channels.len(), "Validation disabled, all channels unknown");
            return metrics;
        };

        let concurrency = self.config.concurrency.max(1);
        let soft_alive = self.config.soft_alive_on_403_405;
        let outcomes: Vec<ProbeOutcome> = stream::iter(
            channels
                .iter()
                .map(|ch| self.probe(ch.stream_url.clone(), settings, soft_alive)),
        )
        .buffered(concurrency)
        .collect()
        .await;

        for (ch, outcome) in channels.iter_mut().zip(outcomes) {
            metrics.checked += 1;
            *metrics.codes.entry(outcome.histogram_key()).or_insert(0) += 1;

            match outcome.liveness {
                Liveness::Alive => {
                    metrics.alive += 1;
                    if outcome.soft_alive {
                        metrics.soft_alive += 1;
                    }
                }
                Liveness::Dead => {
                    metrics.dead += 1;
                    if metrics.failure_samples.len() < MAX_FAILURE_SAMPLES {
                        metrics.failure_samples.push(FailureSample {
                            title: ch.title.clone(),
                            url: ch.stream_url.clone(),
                            code: outcome.code,
                            reason: outcome.reason.clone(),
                        });
                    }
                    tracing::debug!(url = %ch.stream_url, reason = %outcome.reason, "Stream dead");
                }
                Liveness::Unknown => metrics.unknown += 1,
            }

            ch.liveness = outcome.liveness;
            ch.liveness_code = outcome.code;
            ch.liveness_reason = outcome.reason;
        }

        tracing::info!(
            mode = mode.as_str(),
            checked = metrics.checked,
            alive = metrics.alive,
            dead = metrics.dead,
            soft_alive = metrics.soft_alive,
            "Validation complete"
        );
        metrics
    }

    async fn probe(&self, url: String, settings: &ProbeSettings, soft_alive: bool) -> ProbeOutcome {
        let attempts = settings.retries.saturating_add(1);
        let timeout = settings.timeout();
        let mut last = ProbeOutcome {
            liveness: Liveness::Dead,
            code: None,
            reason: "network_error".to_string(),
            soft_alive: false,
        };

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(RETRY_DELAY).await;
            }

            let mut request = self.client.head(&url);
            if let Some(range) = &settings.range_bytes {
                request = request.header(RANGE, format!("bytes={}", range));
            }

            let (code, reason) = match tokio::time::timeout(timeout, request.send()).await {
                Err(_) => (None, "timeout".to_string()),
                Ok(Err(e)) if e.is_timeout() => (None, "timeout".to_string()),
                Ok(Err(e)) => {
                    tracing::trace!(url = %url, error = %e, "Probe failed");
                    (None, "network_error".to_string())
                }
                Ok(Ok(response)) => {
                    let code = response.status().as_u16();
                    if OK_CODES.contains(&code) {
                        return ProbeOutcome {
                            liveness: Liveness::Alive,
                            code: Some(code),
                            reason: format!("ok_{}", code),
                            soft_alive: false,
                        };
                    }
                    if soft_alive && (code == 403 || code == 405) {
                        return ProbeOutcome {
                            liveness: Liveness::Alive,
                            code: Some(code),
                            reason: "soft_alive_403_405".to_string(),
                            soft_alive: true,
                        };
                    }
                    (Some(code), format!("http_{}", code))
                }
            };

            last.code = code;
            last.reason = reason;
        }

        last
    }
}
