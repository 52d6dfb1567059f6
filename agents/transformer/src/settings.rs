//! Configuration

use roda_base::decl_settings;

decl_settings!(Transformer {
    /// Which fleet to process (roda or guajira)
    datasettype: String,
    /// Day to process, `YYYY-MM-DD`; defaults to UTC yesterday
    #[serde(default)]
    date: Option<String>,
});
