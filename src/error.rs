use thiserror::Error;

/// Data errors raised while building geometry or task records.
///
/// These only surface for untrusted input (manifest entries, detector or
/// tracker output). Boxes constructed internally are valid by construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("malformed box: width {width} and height {height} must be non-negative")]
    MalformedBox { width: i32, height: i32 },

    #[error("malformed box: corners ({xmin}, {ymin})-({xmax}, {ymax}) are inverted")]
    InvertedCorners {
        xmin: i32,
        ymin: i32,
        xmax: i32,
        ymax: i32,
    },

    #[error("box ({xmin}, {ymin})-({xmax}, {ymax}) exceeds the i32 coordinate range")]
    OutOfRange {
        xmin: i64,
        ymin: i64,
        xmax: i64,
        ymax: i64,
    },

    #[error("unrecognized ground-truth box shape: {0}")]
    UnrecognizedBoxShape(String),

    #[error("invalid frame window [{begin}, {end}]")]
    InvalidWindow { begin: u32, end: u32 },
}
