//! Page-settle heuristic.
//!
//! Runs after every executed step. A step whose history says the wait timed
//! out before is never waited on again; otherwise the engine waits, bounded,
//! for network quiescence and records whether that wait timed out.

use std::time::Duration;

use crate::driver::{BrowserDriver, SettleOutcome};
use crate::model::CaseLog;

/// Wait flags recorded for one step in this run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SettleRecord {
    pub attempted: bool,
    pub timed_out: bool,
}

pub async fn settle_after_step(
    driver: &dyn BrowserDriver,
    url_before: &str,
    history_timed_out: bool,
    timeout: Duration,
    log: &mut CaseLog,
) -> SettleRecord {
    if history_timed_out {
        log.push("settle: skipped, wait timed out in an earlier run");
        return SettleRecord::default();
    }

    match driver.wait_for_network_idle(timeout).await {
        Ok(SettleOutcome::Idle) => {
            let url_after = driver.current_url().await.unwrap_or_default();
            if url_after == url_before {
                log.push("settle: no navigation");
            } else {
                log.push(format!("settle: navigated to {}", url_after));
            }
            SettleRecord {
                attempted: true,
                timed_out: false,
            }
        }
        Ok(SettleOutcome::TimedOut) => {
            log.push(format!("settle: network still busy after {:?}", timeout));
            SettleRecord {
                attempted: true,
                timed_out: true,
            }
        }
        Err(e) if e.is_timeout() => {
            log.push(format!("settle: {}", e));
            SettleRecord {
                attempted: true,
                timed_out: true,
            }
        }
        Err(e) => {
            tracing::warn!("settle wait failed: {}", e);
            log.push(format!("settle: wait failed ({}), continuing", e));
            SettleRecord {
                attempted: true,
                timed_out: false,
            }
        }
    }
}
