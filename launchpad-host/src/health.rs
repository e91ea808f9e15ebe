//! Health Monitor: bounded polling of an HTTP endpoint.
//!
//! A wait is healthy as soon as one probe answers 2xx. Connection errors,
//! non-2xx answers and slow answers are all "not yet". The wait returns
//! `false` once its timeout has elapsed and never probes past it.

use std::time::{Duration, Instant};

use launchpad_core::ProbeResult;

use crate::clock::Clock;

/// Lower bound for the poll interval so a zero setting cannot spin.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A single reachability check.
pub trait Probe {
    fn probe(&self, endpoint: &str, timeout: Duration) -> ProbeResult;
}

impl<P: Probe + ?Sized> Probe for &P {
    fn probe(&self, endpoint: &str, timeout: Duration) -> ProbeResult {
        (**self).probe(endpoint, timeout)
    }
}

/// Bounded wait for an endpoint to become healthy.
pub trait HealthCheck {
    fn wait_healthy(&self, endpoint: &str, timeout: Duration, poll_interval: Duration) -> bool;
}

/// HTTP GET probe. Redirects are not followed; a 3xx is not healthy.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpProbe;

impl Probe for HttpProbe {
    fn probe(&self, endpoint: &str, timeout: Duration) -> ProbeResult {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .redirects(0)
            .build();
        let started = Instant::now();

        match agent.get(endpoint).call() {
            Ok(response) => ProbeResult::responded(response.status(), started.elapsed()),
            Err(ureq::Error::Status(code, _)) => ProbeResult::responded(code, started.elapsed()),
            Err(ureq::Error::Transport(err)) => {
                tracing::debug!(endpoint, error = %err, "probe failed");
                ProbeResult::unreachable(started.elapsed())
            }
        }
    }
}

/// Polls a [`Probe`] on a [`Clock`] until healthy or out of time.
pub struct HealthMonitor<P, C> {
    probe: P,
    clock: C,
    request_timeout: Duration,
}

impl<P: Probe, C: Clock> HealthMonitor<P, C> {
    pub fn new(probe: P, clock: C, request_timeout: Duration) -> Self {
        Self {
            probe,
            clock,
            request_timeout,
        }
    }
}

impl<P: Probe, C: Clock> HealthCheck for HealthMonitor<P, C> {
    fn wait_healthy(&self, endpoint: &str, timeout: Duration, poll_interval: Duration) -> bool {
        let poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
        // Saturates: an effectively unbounded timeout must not overflow.
        let deadline = self.clock.now().saturating_add(timeout);
        let mut polls = 0u32;

        tracing::info!(endpoint, timeout_secs = timeout.as_secs(), "waiting for service health");
        loop {
            // The service was just (re)started; give it a moment before each probe.
            let remaining = deadline.saturating_sub(self.clock.now());
            if remaining.is_zero() {
                break;
            }
            self.clock.sleep(poll_interval.min(remaining));

            let remaining = deadline.saturating_sub(self.clock.now());
            if remaining.is_zero() {
                break;
            }

            polls += 1;
            let result = self.probe.probe(endpoint, self.request_timeout.min(remaining));
            if result.is_healthy() {
                tracing::info!(endpoint, polls, status = ?result.status_code, "service healthy");
                return true;
            }
            tracing::debug!(
                endpoint,
                polls,
                reachable = result.reachable,
                status = ?result.status_code,
                "service not healthy yet"
            );
        }

        tracing::warn!(endpoint, polls, timeout_secs = timeout.as_secs(), "health check timed out");
        false
    }
}
