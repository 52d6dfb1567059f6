//! The credit-scoring engine and its write-back stage.
//!
//! One agent computes a `[0, 1000]` score per client from their credit
//! history, adjusts it by the referral-graph effects and lands the result
//! as the day's scores CSV; a second agent writes the adjusted scores back
//! to the contacts table.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod settings;
pub use settings::ScoringSettings;

/// Per-credit and per-client score composition
pub mod engine;

/// Referral-graph adjustments
pub mod social;

/// Relational-store ingestion for the scoring views
pub mod ingest;

mod returner;
mod scoring;

pub use returner::ScoreReturn;
pub use scoring::ScoringEngine;

use serde::{Deserialize, Serialize};

/// One row of the day's scoring output CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRow {
    /// The scored client
    pub client_id: u64,
    /// Composite score before the social pass
    pub raw_score: f64,
    /// Multiplicative adjustment accumulated from referrals
    pub adjustment: f64,
    /// Final score, clipped to `[0, 1000]`, forced to 0 under any lost
    /// condition
    pub adjusted_score: f64,
    /// A referral of this client defaulted
    pub referred_lost: bool,
    /// This client's referrer defaulted
    pub referrer_lost: bool,
    /// Penalized because a sibling referral defaulted
    pub affected_by_network: bool,
}
