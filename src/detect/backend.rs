use anyhow::Result;

use crate::bbox::CenterBox;
use crate::frame::Frame;

/// Open-vocabulary detector backend.
///
/// Locates the single object that best matches a referring phrase in one
/// frame. Implementations:
/// - return `Ok(None)` when nothing matches, including for an empty or
///   otherwise unusable phrase
/// - return `Err` only for backend failures (transport, model errors); the
///   localizer treats those as "not found this frame"
/// - must not retain the frame beyond the call
///
/// One instance serves one video at a time and is driven from a single
/// thread, hence `&mut self`.
pub trait GroundingDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Best match for `phrase` in `frame`, in center form.
    fn detect(&mut self, frame: &Frame, phrase: &str) -> Result<Option<CenterBox>>;

    /// Optional warm-up hook, run once on the session thread before the first request.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
