//
// Copyright 2017 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Runtime configuration passed to `Graphics::initialize`, plus the
//! best-effort debugger-attached probe the sync thread uses to widen its
//! fence-wait timeout.
use std::time::Duration;

/// Parameters for `Graphics::initialize`.
#[derive(Debug, Clone)]
pub struct GraphicsParams {
    /// How long the sync thread waits on a GPU fence before raising
    /// `SyncError::FenceTimeout`. Widened to one hour automatically when
    /// `debugger_attached()` reports a debugger (see §4.5).
    pub fence_timeout: Duration,
    /// Initial per-side DBQ allocation, in bytes.
    pub dbq_initial_capacity: usize,
    /// The DBQ growth cap, in bytes. Growing past this raises
    /// `DbqError::AllocOverflow`.
    pub dbq_max_capacity: usize,
    pub render_thread_name: String,
    pub sync_thread_name: String,
}

impl Default for GraphicsParams {
    fn default() -> Self {
        GraphicsParams {
            fence_timeout: Duration::from_secs(30),
            dbq_initial_capacity: crate::dbq::INITIAL_BUFFER_BYTES,
            dbq_max_capacity: crate::dbq::MAX_BUFFER_BYTES,
            render_thread_name: "t:graphics".to_owned(),
            sync_thread_name: "t:sync".to_owned(),
        }
    }
}

impl GraphicsParams {
    /// The timeout the sync thread should actually use, accounting for
    /// an attached debugger.
    pub fn effective_fence_timeout(&self) -> Duration {
        if debugger_attached() {
            Duration::from_secs(60 * 60)
        } else {
            self.fence_timeout
        }
    }
}

/// Best-effort, platform-gated probe for an attached debugger. This exists
/// purely to pick the fence-wait timeout (a long-running GPU debugger
/// session should not spuriously trip `FenceTimeout`); it is not meant as a
/// general platform-abstraction layer.
#[cfg(target_os = "linux")]
pub fn debugger_attached() -> bool {
    use std::fs;
    let status = match fs::read_to_string("/proc/self/status") {
        Ok(s) => s,
        Err(_) => return false,
    };
    status
        .lines()
        .find_map(|line| line.strip_prefix("TracerPid:"))
        .map(|pid| pid.trim() != "0")
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
pub fn debugger_attached() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeout_without_debugger() {
        // CI/test runs are not expected to be under a debugger; this just
        // exercises the plumbing rather than asserting a platform fact.
        let params = GraphicsParams::default();
        if !debugger_attached() {
            assert_eq!(params.effective_fence_timeout(), params.fence_timeout);
        }
    }
}
