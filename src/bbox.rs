//! Box geometry shared by detectors, trackers, and the evaluator.
//!
//! Two forms are in play:
//! - `CenterBox`: center x/y plus width/height. Detectors and trackers speak this form.
//! - `BoundingBox`: corner form (xmin, ymin, xmax, ymax). Results and ground truth use it.
//!
//! Conversion uses integer division truncating toward zero:
//! `xmin = cx - w/2`, `xmax = xmin + w` and the inverse `cx = xmin + w/2`.
//! An object that was not found is `Option::None`, never a zero-area box.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Axis-aligned rectangle in corner form. Invariant: `xmax >= xmin`, `ymax >= ymin`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "CornerFields")]
pub struct BoundingBox {
    xmin: i32,
    ymin: i32,
    xmax: i32,
    ymax: i32,
}

#[derive(Deserialize)]
struct CornerFields {
    xmin: i32,
    ymin: i32,
    xmax: i32,
    ymax: i32,
}

impl TryFrom<CornerFields> for BoundingBox {
    type Error = Error;

    fn try_from(fields: CornerFields) -> Result<Self, Self::Error> {
        BoundingBox::new(fields.xmin, fields.ymin, fields.xmax, fields.ymax)
    }
}

impl BoundingBox {
    pub fn new(xmin: i32, ymin: i32, xmax: i32, ymax: i32) -> Result<Self, Error> {
        if xmax < xmin || ymax < ymin {
            return Err(Error::InvertedCorners {
                xmin,
                ymin,
                xmax,
                ymax,
            });
        }
        // width and height must fit in i32
        if xmax.checked_sub(xmin).is_none() || ymax.checked_sub(ymin).is_none() {
            return Err(Error::OutOfRange {
                xmin: i64::from(xmin),
                ymin: i64::from(ymin),
                xmax: i64::from(xmax),
                ymax: i64::from(ymax),
            });
        }
        Ok(Self {
            xmin,
            ymin,
            xmax,
            ymax,
        })
    }

    /// Build from a top-left corner plus size (the `[x, y, w, h]` manifest form).
    pub fn from_xywh(x: i32, y: i32, w: i32, h: i32) -> Result<Self, Error> {
        if w < 0 || h < 0 {
            return Err(Error::MalformedBox {
                width: w,
                height: h,
            });
        }
        match (x.checked_add(w), y.checked_add(h)) {
            (Some(xmax), Some(ymax)) => Self::new(x, y, xmax, ymax),
            _ => Err(Error::OutOfRange {
                xmin: i64::from(x),
                ymin: i64::from(y),
                xmax: i64::from(x) + i64::from(w),
                ymax: i64::from(y) + i64::from(h),
            }),
        }
    }

    #[inline]
    pub fn xmin(&self) -> i32 {
        self.xmin
    }

    #[inline]
    pub fn ymin(&self) -> i32 {
        self.ymin
    }

    #[inline]
    pub fn xmax(&self) -> i32 {
        self.xmax
    }

    #[inline]
    pub fn ymax(&self) -> i32 {
        self.ymax
    }

    #[inline]
    pub fn width(&self) -> i32 {
        self.xmax - self.xmin
    }

    #[inline]
    pub fn height(&self) -> i32 {
        self.ymax - self.ymin
    }

    /// Area in square pixels. Widened so large frames cannot overflow.
    #[inline]
    pub fn area(&self) -> i64 {
        i64::from(self.width()) * i64::from(self.height())
    }

    #[inline]
    pub fn to_center(&self) -> CenterBox {
        to_center(self)
    }
}

/// Rectangle in center form: center plus size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CenterBox {
    pub cx: i32,
    pub cy: i32,
    pub w: i32,
    pub h: i32,
}

impl CenterBox {
    pub fn new(cx: i32, cy: i32, w: i32, h: i32) -> Self {
        Self { cx, cy, w, h }
    }

    #[inline]
    pub fn to_corner(&self) -> Result<BoundingBox, Error> {
        to_corner(self)
    }
}

/// Center form to corner form.
///
/// Rejects negative sizes with `Error::MalformedBox` and corners outside `i32`
/// with `Error::OutOfRange`; this only guards external detector/tracker output.
pub fn to_corner(center: &CenterBox) -> Result<BoundingBox, Error> {
    if center.w < 0 || center.h < 0 {
        return Err(Error::MalformedBox {
            width: center.w,
            height: center.h,
        });
    }
    let xmin = i64::from(center.cx) - i64::from(center.w / 2);
    let ymin = i64::from(center.cy) - i64::from(center.h / 2);
    let xmax = xmin + i64::from(center.w);
    let ymax = ymin + i64::from(center.h);
    match (
        i32::try_from(xmin),
        i32::try_from(ymin),
        i32::try_from(xmax),
        i32::try_from(ymax),
    ) {
        (Ok(x0), Ok(y0), Ok(x1), Ok(y1)) => BoundingBox::new(x0, y0, x1, y1),
        _ => Err(Error::OutOfRange {
            xmin,
            ymin,
            xmax,
            ymax,
        }),
    }
}

/// Corner form to center form. Exact inverse of `to_corner`.
pub fn to_center(corner: &BoundingBox) -> CenterBox {
    let w = corner.width();
    let h = corner.height();
    CenterBox {
        cx: corner.xmin + w / 2,
        cy: corner.ymin + h / 2,
        w,
        h,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_round_trips_through_corner_form() {
        for (cx, cy, w, h) in [
            (50, 40, 20, 10),
            (50, 40, 21, 11),
            (0, 0, 1, 1),
            (-7, 3, 5, 0),
            (100, 200, 0, 0),
        ] {
            let center = CenterBox::new(cx, cy, w, h);
            let corner = to_corner(&center).unwrap();
            assert_eq!(to_center(&corner), center);
        }
    }

    #[test]
    fn odd_sizes_use_truncating_division() {
        let corner = CenterBox::new(10, 10, 5, 3).to_corner().unwrap();
        assert_eq!(
            (corner.xmin(), corner.ymin(), corner.xmax(), corner.ymax()),
            (8, 9, 13, 12)
        );
    }

    #[test]
    fn xmax_is_xmin_plus_width() {
        let corner = CenterBox::new(100, 60, 40, 30).to_corner().unwrap();
        assert_eq!(corner.xmax(), corner.xmin() + 40);
        assert_eq!(corner.ymax(), corner.ymin() + 30);
    }

    #[test]
    fn negative_size_is_malformed() {
        let err = CenterBox::new(5, 5, -1, 4).to_corner().unwrap_err();
        assert_eq!(
            err,
            Error::MalformedBox {
                width: -1,
                height: 4
            }
        );
    }

    #[test]
    fn coordinates_past_i32_are_rejected() {
        assert!(matches!(
            CenterBox::new(i32::MAX - 1, 0, 10, 10).to_corner(),
            Err(Error::OutOfRange { .. })
        ));
        assert!(matches!(
            CenterBox::new(i32::MIN + 1, 0, 10, 10).to_corner(),
            Err(Error::OutOfRange { .. })
        ));
        assert!(matches!(
            BoundingBox::from_xywh(2_000_000_000, 0, 2_000_000_000, 10),
            Err(Error::OutOfRange { .. })
        ));
        assert!(BoundingBox::new(i32::MIN, 0, i32::MAX, 1).is_err());
        let edge = CenterBox::new(i32::MAX - 5, 0, 10, 10).to_corner().unwrap();
        assert_eq!((edge.xmin(), edge.xmax()), (i32::MAX - 10, i32::MAX));
    }

    #[test]
    fn inverted_corners_are_rejected() {
        assert!(BoundingBox::new(10, 0, 5, 5).is_err());
        assert!(BoundingBox::from_xywh(0, 0, 3, -2).is_err());
    }

    #[test]
    fn deserialize_validates_corners() {
        let ok: BoundingBox =
            serde_json::from_str(r#"{"xmin":1,"ymin":2,"xmax":3,"ymax":4}"#).unwrap();
        assert_eq!(ok.area(), 4);
        let bad = serde_json::from_str::<BoundingBox>(r#"{"xmin":5,"ymin":2,"xmax":3,"ymax":4}"#);
        assert!(bad.is_err());
    }
}
