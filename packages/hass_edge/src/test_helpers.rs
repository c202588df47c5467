use hass_mux::Multiplexer;
use hass_mux::test_support::{FakeUpstream, upstream_config};
use std::sync::Arc;

use crate::AppState;
use crate::metrics::ServerMetrics;

pub const TEST_TOKEN: &str = "test-token";

/// Build an `AppState` whose multiplexer points at a fresh fake upstream.
///
/// Returns `(AppState, FakeUpstream)`; callers **must** hold the fake for
/// the lifetime of the test; dropping it stops the listener. REST
/// passthrough is disabled; tests that need it set `state.rest`.
pub async fn test_app_state() -> (AppState, FakeUpstream) {
    let upstream = FakeUpstream::start(TEST_TOKEN)
        .await
        .expect("fake upstream");
    let state = app_state_for(&upstream.url(), TEST_TOKEN);
    (state, upstream)
}

/// `AppState` for an arbitrary upstream URL and token.
pub fn app_state_for(url: &str, token: &str) -> AppState {
    AppState {
        mux: Multiplexer::new(upstream_config(url, token)),
        metrics: Arc::new(ServerMetrics::new()),
        rest: None,
    }
}
