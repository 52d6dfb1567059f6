//! Configuration shared by the scoring engine and the score-return stage.

use roda_base::decl_settings;

decl_settings!(Scoring {
    /// Day the scores belong to, `YYYY-MM-DD`; defaults to UTC yesterday
    #[serde(default)]
    date: Option<String>,
});
