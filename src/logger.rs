use std::env;

use tracing::{debug, info, warn};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

use crate::config::{LogConfig, LOG_ENV};
use crate::session::IceCandidate;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Installs the global `tracing` subscriber.
///
/// `SMARTCALL_LOG` takes precedence over the configured filter. Returns
/// `false` when logging is disabled or a subscriber was already installed
/// (for example by the embedding application).
pub fn init(config: &LogConfig) -> bool {
    if !config.enabled {
        return false;
    }

    let filter = env::var(LOG_ENV)
        .ok()
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .or_else(|| EnvFilter::try_new(&config.filter).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Trickle-ICE trace of a single candidate.
pub fn dump_candidate(label: &str, cand: &IceCandidate) {
    debug!(
        "trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?} username_fragment={:?}",
        cand.candidate, cand.sdp_mid, cand.sdp_mline_index, cand.username_fragment
    );
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
    pub other: usize,
}

/// Counts candidate types and warns when nothing can cross a symmetric NAT.
pub fn candidate_summary<'a>(
    candidates: impl IntoIterator<Item = &'a IceCandidate>,
) -> CandidateSummary {
    let mut summary = CandidateSummary::default();
    for candidate in candidates {
        match candidate.kind() {
            Some("host") => summary.host += 1,
            Some("srflx") => summary.srflx += 1,
            Some("relay") => summary.relay += 1,
            _ => summary.other += 1,
        }
    }

    info!(
        "candidate analysis: {} host, {} srflx, {} relay",
        summary.host, summary.srflx, summary.relay
    );
    if summary.relay == 0 {
        warn!("no TURN relay candidates found; connection through NAT may fail");
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_logging_installs_nothing() {
        let config = LogConfig {
            enabled: false,
            ..LogConfig::default()
        };
        assert!(!init(&config));
    }

    #[test]
    fn summary_counts_by_type() {
        let cands = [
            IceCandidate::new("candidate:1 1 udp 2130706431 10.0.0.2 5000 typ host"),
            IceCandidate::new("candidate:2 1 udp 1694498815 1.2.3.4 5001 typ srflx raddr 10.0.0.2 rport 5000"),
            IceCandidate::new("candidate:3 1 udp 16777215 5.6.7.8 5002 typ relay raddr 1.2.3.4 rport 5001"),
            IceCandidate::new("garbage"),
        ];
        let summary = candidate_summary(&cands);
        assert_eq!(
            summary,
            CandidateSummary {
                host: 1,
                srflx: 1,
                relay: 1,
                other: 1
            }
        );
    }
}
