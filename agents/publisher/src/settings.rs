//! Configuration shared by the three publisher agents. All of them read
//! the `RODA_PUBLISHER_*` prefix: they never run concurrently (they share
//! the master account's nonce), so there is no point in separate knobs.

use roda_base::decl_settings;

decl_settings!(Publisher {
    /// Day whose routes to publish, `YYYY-MM-DD`; defaults to UTC
    /// yesterday. Credits and payments ignore it (their pending sets are
    /// flag-driven, not day-partitioned).
    #[serde(default)]
    date: Option<String>,
    /// Invocation budget in seconds
    #[serde(default)]
    timeout: Option<String>,
});
