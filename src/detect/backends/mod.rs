pub mod cpu;
pub mod stub;

#[cfg(feature = "backend-http")]
pub mod http;

pub use cpu::SalientRegionDetector;
pub use stub::{ScriptedDetection, ScriptedDetector};

#[cfg(feature = "backend-http")]
pub use http::{HttpDetector, HttpDetectorConfig};
