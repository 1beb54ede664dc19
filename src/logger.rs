use crate::config::Config;
use crate::peer::ice::candidate_type;
use crate::peer::types::IceCandidate;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;
use webrtc::peer_connection::RTCPeerConnection;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Installs the global subscriber. Returns `false` when logging is off or a
/// subscriber is already installed.
pub fn init(config: &Config) -> bool {
    let Some(filter) = config.effective_log_filter() else {
        return false;
    };
    let filter = EnvFilter::try_new(&filter).unwrap_or_else(|err| {
        eprintln!("invalid log filter {filter:?}: {err}");
        EnvFilter::new(crate::config::DEFAULT_LOG_FILTER)
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Trickle-ICE trace line
pub fn log_candidate(label: &str, cand: &IceCandidate) {
    tracing::debug!(
        "Trickle {label}: type={} candidate={} sdp_mid={:?} sdp_mline_index={:?}",
        candidate_type(&cand.candidate).unwrap_or("?"),
        cand.candidate,
        cand.sdp_mid,
        cand.sdp_mline_index
    );
}

/// Snapshot of the nominated candidate pair
pub async fn dump_selected_pair(pc: &RTCPeerConnection, moment: &str) {
    let stats = pc.get_stats().await;
    for (_, v) in stats.reports {
        if let webrtc::stats::StatsReportType::CandidatePair(pair) = v {
            if pair.nominated {
                tracing::info!(
                    "STATS {moment}: {}:{}  type: {:?}  bytes={}/{} state={:?}",
                    pair.local_candidate_id,
                    pair.remote_candidate_id,
                    pair.stats_type,
                    pair.bytes_sent,
                    pair.bytes_received,
                    pair.state
                );
            }
        }
    }
}
