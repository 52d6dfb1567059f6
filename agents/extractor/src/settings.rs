//! Configuration

use roda_base::decl_settings;

decl_settings!(Extractor {
    /// Which fleet to pull (roda or guajira)
    datasettype: String,
    /// Day to extract, `YYYY-MM-DD`; defaults to UTC yesterday
    #[serde(default)]
    date: Option<String>,
});
