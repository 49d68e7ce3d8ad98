//! CIE color math shared by the color parameter type: sRGB companding,
//! RGB↔XYZ matrices, and Lab / LCHab conversions with selectable reference
//! white. XYZ here is normalized so that white has Y = 1.

use serde::{Deserialize, Serialize};

/// RGB working space used when converting to and from XYZ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RgbColorSpace {
    /// sRGB with D65 white point and the standard gamma companding.
    #[default]
    Srgb,
    /// sRGB primaries with linear (gamma 1.0) channels.
    SrgbLinear,
}

/// Reference white for Lab conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReferenceWhite {
    #[default]
    D65,
    D50,
}

impl ReferenceWhite {
    /// XYZ of the reference white, Y normalized to 1.
    pub fn xyz(self) -> [f64; 3] {
        match self {
            ReferenceWhite::D65 => [0.950_47, 1.0, 1.088_83],
            ReferenceWhite::D50 => [0.964_22, 1.0, 0.825_21],
        }
    }
}

// sRGB (D65) matrices, IEC 61966-2-1.
const SRGB_TO_XYZ: [[f64; 3]; 3] = [
    [0.412_456_4, 0.357_576_1, 0.180_437_5],
    [0.212_672_9, 0.715_152_2, 0.072_175_0],
    [0.019_333_9, 0.119_192_0, 0.950_304_1],
];

const XYZ_TO_SRGB: [[f64; 3]; 3] = [
    [3.240_454_2, -1.537_138_5, -0.498_531_4],
    [-0.969_266_0, 1.876_010_8, 0.041_556_0],
    [0.055_643_4, -0.204_025_9, 1.057_225_2],
];

/// Forward sRGB companding: display value -> linear light.
pub fn srgb_compand(v: f64) -> f64 {
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

/// Inverse sRGB companding: linear light -> display value.
pub fn srgb_compand_inv(v: f64) -> f64 {
    if v <= 0.003_130_8 {
        v * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

fn mat_mul(m: &[[f64; 3]; 3], v: [f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

/// RGB in `[0,1]` to XYZ (Y of white = 1). Inputs are clamped.
pub fn rgb_to_xyz(r: f64, g: f64, b: f64, cs: RgbColorSpace) -> [f64; 3] {
    let mut rgb = [r.clamp(0.0, 1.0), g.clamp(0.0, 1.0), b.clamp(0.0, 1.0)];
    if cs == RgbColorSpace::Srgb {
        for c in &mut rgb {
            *c = srgb_compand(*c);
        }
    }
    mat_mul(&SRGB_TO_XYZ, rgb)
}

/// XYZ to RGB in the given space. Output channels are clamped to `[0,1]`.
pub fn xyz_to_rgb(xyz: [f64; 3], cs: RgbColorSpace) -> [f64; 3] {
    let mut rgb = mat_mul(&XYZ_TO_SRGB, xyz);
    for c in &mut rgb {
        *c = c.clamp(0.0, 1.0);
        if cs == RgbColorSpace::Srgb {
            *c = srgb_compand_inv(*c);
        }
    }
    rgb
}

/// CIE Lab `f` with the linear toe below (6/29)^3.
fn lab_f(v: f64) -> f64 {
    const DELTA_CUBED: f64 = (6.0 / 29.0) * (6.0 / 29.0) * (6.0 / 29.0);
    if v > DELTA_CUBED {
        v.cbrt()
    } else {
        (29.0 / 6.0) * (29.0 / 6.0) * v / 3.0 + 4.0 / 29.0
    }
}

/// XYZ to CIE L*a*b* against the given reference white.
pub fn xyz_to_lab(xyz: [f64; 3], white: ReferenceWhite) -> [f64; 3] {
    let w = white.xyz();
    let fx = lab_f(xyz[0] / w[0]);
    let fy = lab_f(xyz[1] / w[1]);
    let fz = lab_f(xyz[2] / w[2]);
    [116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz)]
}

/// Lab to LCHab: lightness, chroma, hue angle in degrees `[0, 360)`.
pub fn lab_to_lchab(lab: [f64; 3]) -> [f64; 3] {
    let c = (lab[1] * lab[1] + lab[2] * lab[2]).sqrt();
    let mut h = lab[2].atan2(lab[1]).to_degrees();
    if h < 0.0 {
        h += 360.0;
    }
    if h >= 360.0 {
        h -= 360.0;
    }
    [lab[0], c, h]
}
