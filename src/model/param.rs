use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::color::ColorParam;
use super::colorspace::ReferenceWhite;
use super::enumeration::EnumParam;
use super::float::FloatParam;
use super::orientation::OrientationParam;

/// A device parameter value. Closed set of variants; every operation on
/// parameters lives here so adding a type is a single, deliberate change.
///
/// Serialized with a `type` discriminator (`float`, `orientation`, `enum`,
/// `color`); an unrecognized discriminator fails deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Param {
    #[serde(rename = "float")]
    Float(FloatParam),
    #[serde(rename = "orientation")]
    Orientation(OrientationParam),
    #[serde(rename = "enum")]
    Enum(EnumParam),
    #[serde(rename = "color")]
    Color(ColorParam),
}

impl Param {
    pub fn type_name(&self) -> &'static str {
        match self {
            Param::Float(_) => "float",
            Param::Orientation(_) => "orientation",
            Param::Enum(_) => "enum",
            Param::Color(_) => "color",
        }
    }

    pub fn is_default(&self) -> bool {
        match self {
            Param::Float(p) => p.is_default(),
            Param::Orientation(p) => p.is_default(),
            Param::Enum(p) => p.is_default(),
            Param::Color(p) => p.is_default(),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Param::Float(p) => p.reset(),
            Param::Orientation(p) => p.reset(),
            Param::Enum(p) => p.reset(),
            Param::Color(p) => p.reset(),
        }
    }

    /// Interpolates toward `rhs`. Mismatched variants produce `None`.
    pub fn lerp(&self, rhs: &Param, t: f64) -> Option<Param> {
        match (self, rhs) {
            (Param::Float(a), Param::Float(b)) => Some(Param::Float(a.lerp(b, t))),
            (Param::Orientation(a), Param::Orientation(b)) => {
                Some(Param::Orientation(a.lerp(b, t)))
            }
            (Param::Enum(a), Param::Enum(b)) => Some(Param::Enum(a.lerp(b, t))),
            (Param::Color(a), Param::Color(b)) => Some(Param::Color(a.lerp(b, t))),
            _ => None,
        }
    }

    /// Total order within a variant (scalars and angles by value, enums by
    /// numeric value, colors by LCHab hue). Mismatched variants are
    /// incomparable.
    pub fn compare(&self, rhs: &Param) -> Option<Ordering> {
        match (self, rhs) {
            (Param::Float(a), Param::Float(b)) => Some(a.val().total_cmp(&b.val())),
            (Param::Orientation(a), Param::Orientation(b)) => Some(a.cmp_val(b)),
            (Param::Enum(a), Param::Enum(b)) => Some(a.cmp_val(b)),
            (Param::Color(a), Param::Color(b)) => Some(a.cmp_hue(b, ReferenceWhite::D65)),
            _ => None,
        }
    }

    /// Grandmaster scaling: scalars scale their value, colors their
    /// weight; enums and angles are left alone.
    pub fn scale(&mut self, factor: f64) {
        match self {
            Param::Float(p) => p.scale(factor),
            Param::Color(p) => p.scale(factor),
            Param::Orientation(_) | Param::Enum(_) => {}
        }
    }

    /// Assigns `src` by value if the variants match; otherwise leaves this
    /// value untouched and reports failure.
    pub fn copy_from(&mut self, src: &Param) -> bool {
        if self.type_name() != src.type_name() {
            return false;
        }
        *self = src.clone();
        true
    }

    /// Normalized position within the parameter's range, for the types
    /// where that is meaningful.
    pub fn as_percent(&self) -> Option<f64> {
        match self {
            Param::Float(p) => Some(p.as_percent()),
            Param::Orientation(p) => Some(p.as_percent()),
            Param::Enum(p) => Some(p.as_percent()),
            Param::Color(_) => None,
        }
    }

    /// Sets the value from a normalized position. Returns false for types
    /// without a percent mapping.
    pub fn set_as_percent(&mut self, pct: f64) -> bool {
        match self {
            Param::Float(p) => {
                p.set_as_percent(pct);
                true
            }
            Param::Orientation(p) => {
                p.set_as_percent(pct);
                true
            }
            Param::Enum(p) => p.set_as_percent(pct),
            Param::Color(_) => false,
        }
    }

    pub fn as_float(&self) -> Option<&FloatParam> {
        match self {
            Param::Float(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_float_mut(&mut self) -> Option<&mut FloatParam> {
        match self {
            Param::Float(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_orientation(&self) -> Option<&OrientationParam> {
        match self {
            Param::Orientation(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_orientation_mut(&mut self) -> Option<&mut OrientationParam> {
        match self {
            Param::Orientation(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumParam> {
        match self {
            Param::Enum(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_enum_mut(&mut self) -> Option<&mut EnumParam> {
        match self {
            Param::Enum(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_color(&self) -> Option<&ColorParam> {
        match self {
            Param::Color(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_color_mut(&mut self) -> Option<&mut ColorParam> {
        match self {
            Param::Color(p) => Some(p),
            _ => None,
        }
    }
}
