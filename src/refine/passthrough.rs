use anyhow::Result;
use std::path::Path;

use super::QueryRefiner;

/// Uses the manifest query as the referring phrase. Selected when no API
/// credential is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughRefiner;

impl QueryRefiner for PassthroughRefiner {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn refine(&self, _video: &Path, query: &str) -> Result<String> {
        Ok(query.to_string())
    }
}
