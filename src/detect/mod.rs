mod backend;
mod backends;
mod session;

pub use backend::GroundingDetector;
pub use backends::{SalientRegionDetector, ScriptedDetection, ScriptedDetector};
#[cfg(feature = "backend-http")]
pub use backends::{HttpDetector, HttpDetectorConfig};
pub use session::{DetectOutcome, DetectorSession};
