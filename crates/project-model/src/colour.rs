//! Instance colours.
//!
//! Colours are plain 8-bit sRGB. New instance colours come from a
//! deterministic golden-ratio walk in OKLCH, fitted to the sRGB gamut.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const GOLDEN: f64 = 0.618033988749895;

/// 8-bit sRGB colour, serialized as `#rrggbb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Error returned when parsing a colour string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid colour '{0}', expected #rrggbb")]
pub struct ParseColourError(pub String);

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Lowercase `#rrggbb`.
    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Linear-light components in [0, 1].
    pub fn to_linear(&self) -> [f64; 3] {
        [self.r, self.g, self.b].map(|c| srgb_to_linear(c as f64 / 255.0))
    }

    /// Quantize linear-light components, clamping to [0, 1].
    pub fn from_linear(rgb: [f64; 3]) -> Self {
        let [r, g, b] = rgb.map(|c| {
            let v = linear_to_srgb(c.clamp(0.0, 1.0));
            (v * 255.0).round().clamp(0.0, 255.0) as u8
        });
        Self { r, g, b }
    }

    /// OKLab lightness in [0, 1].
    pub fn oklab_lightness(&self) -> f64 {
        linear_to_oklab(self.to_linear())[0]
    }
}

impl FromStr for Rgb {
    type Err = ParseColourError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim();
        let digits = hex
            .strip_prefix('#')
            .ok_or_else(|| ParseColourError(s.to_string()))?;
        if digits.len() != 6 || !digits.is_ascii() {
            return Err(ParseColourError(s.to_string()));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&digits[i..i + 2], 16).map_err(|_| ParseColourError(s.to_string()))
        };
        Ok(Self {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
        })
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for Rgb {
    type Error = ParseColourError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Rgb> for String {
    fn from(c: Rgb) -> Self {
        c.to_hex()
    }
}

fn srgb_to_linear(c: f64) -> f64 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f64) -> f64 {
    if c <= 0.0031308 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

fn linear_to_oklab([r, g, b]: [f64; 3]) -> [f64; 3] {
    let l = 0.4122214708 * r + 0.5363325363 * g + 0.0514459929 * b;
    let m = 0.2119034982 * r + 0.6806995451 * g + 0.1073969566 * b;
    let s = 0.0883024619 * r + 0.2817188376 * g + 0.6299787005 * b;

    let (l, m, s) = (l.cbrt(), m.cbrt(), s.cbrt());

    [
        0.2104542553 * l + 0.7936177850 * m - 0.0040720468 * s,
        1.9779984951 * l - 2.4285922050 * m + 0.4505937099 * s,
        0.0259040371 * l + 0.7827717662 * m - 0.8086757660 * s,
    ]
}

fn oklab_to_linear([l, a, b]: [f64; 3]) -> [f64; 3] {
    let l_ = l + 0.3963377774 * a + 0.2158037573 * b;
    let m_ = l - 0.1055613458 * a - 0.0638541728 * b;
    let s_ = l - 0.0894841775 * a - 1.2914855480 * b;

    let (l, m, s) = (l_ * l_ * l_, m_ * m_ * m_, s_ * s_ * s_);

    [
        4.0767416621 * l - 3.3077115913 * m + 0.2309699292 * s,
        -1.2684380046 * l + 2.6097574011 * m - 0.3413193965 * s,
        -0.0041960863 * l - 0.7034186147 * m + 1.7076147010 * s,
    ]
}

fn oklch_to_linear(l: f64, c: f64, h_deg: f64) -> [f64; 3] {
    let h = h_deg.to_radians();
    oklab_to_linear([l, c * h.cos(), c * h.sin()])
}

fn in_gamut(rgb: &[f64; 3]) -> bool {
    const EPS: f64 = 1e-6;
    rgb.iter().all(|c| (-EPS..=1.0 + EPS).contains(c))
}

/// Black on light backgrounds, white on dark ones.
///
/// Uses OKLab lightness; the usual threshold is 0.6.
pub fn pick_contrast_colour(bg: Rgb, threshold: f64) -> Rgb {
    if bg.oklab_lightness() > threshold {
        Rgb::BLACK
    } else {
        Rgb::WHITE
    }
}

/// Deterministic colour for the given sequence index.
///
/// Odd indices fall in a dark band, even indices in a light band, so
/// consecutive instances stay distinguishable. Chroma is reduced until the
/// colour fits in sRGB.
pub fn golden_oklch(index: u32) -> Rgb {
    Rgb::from_linear(golden_oklch_linear(index))
}

/// Linear-light sRGB of [`golden_oklch`] before quantization.
fn golden_oklch_linear(index: u32) -> [f64; 3] {
    let base = (1.0 + index as f64) * GOLDEN;
    let hue = (133.0 * base) % 360.0;

    let lightness = if index % 2 == 1 {
        0.45 + (5.0 * base) % 0.10
    } else {
        0.75 + (5.0 * base) % 0.15
    };
    let chroma = 0.10 + (7.0 * base) % 0.10;

    let rgb = oklch_to_linear(lightness, chroma, hue);
    if in_gamut(&rgb) {
        return rgb;
    }

    let (mut lo, mut hi) = (0.0, chroma);
    for _ in 0..32 {
        let mid = (lo + hi) / 2.0;
        if in_gamut(&oklch_to_linear(lightness, mid, hue)) {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    oklch_to_linear(lightness, lo, hue)
}

/// Hands out instance colours, skipping ones already in use.
#[derive(Debug, Default, Clone)]
pub struct ColourGenerator {
    sequence: u32,
}

impl ColourGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next colour of the golden walk that is not in `used`.
    pub fn next(&mut self, used: &HashSet<Rgb>) -> Rgb {
        let mut colour = golden_oklch(self.sequence);
        // The walk revisits 8-bit colours eventually; stop looking after a while.
        let mut attempts = 0;
        while used.contains(&colour) && attempts < 4096 {
            self.sequence = self.sequence.wrapping_add(1);
            colour = golden_oklch(self.sequence);
            attempts += 1;
        }
        self.sequence = self.sequence.wrapping_add(1);
        colour
    }

    /// Parse `s`, or fall back to [`ColourGenerator::next`] when absent or invalid.
    pub fn from_str(&mut self, s: Option<&str>, used: &HashSet<Rgb>) -> Rgb {
        match s.map(str::parse::<Rgb>) {
            Some(Ok(colour)) => colour,
            _ => self.next(used),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_hex_roundtrip() {
        let c: Rgb = "#1A2b3C".parse().unwrap();
        assert_eq!(c, Rgb::new(0x1a, 0x2b, 0x3c));
        assert_eq!(c.to_hex(), "#1a2b3c");
        assert!("1a2b3c".parse::<Rgb>().is_err());
        assert!("#12345".parse::<Rgb>().is_err());
        assert!("#gg0000".parse::<Rgb>().is_err());
    }

    #[test]
    fn test_rgb_serializes_as_hex() {
        let json = serde_json::to_string(&Rgb::new(255, 0, 16)).unwrap();
        assert_eq!(json, "\"#ff0010\"");
        let back: Rgb = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Rgb::new(255, 0, 16));
    }

    #[test]
    fn test_oklab_lightness_extremes() {
        assert!(Rgb::BLACK.oklab_lightness().abs() < 1e-6);
        assert!((Rgb::WHITE.oklab_lightness() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_contrast_colour() {
        assert_eq!(pick_contrast_colour(Rgb::WHITE, 0.6), Rgb::BLACK);
        assert_eq!(pick_contrast_colour(Rgb::new(255, 255, 0), 0.6), Rgb::BLACK);
        assert_eq!(pick_contrast_colour(Rgb::BLACK, 0.6), Rgb::WHITE);
        assert_eq!(pick_contrast_colour(Rgb::new(0, 0, 160), 0.6), Rgb::WHITE);
    }

    #[test]
    fn test_golden_walk_is_deterministic() {
        let a: Vec<Rgb> = (0..16).map(golden_oklch).collect();
        let b: Vec<Rgb> = (0..16).map(golden_oklch).collect();
        assert_eq!(a, b);
        assert_ne!(a[0], a[1]);
    }

    #[test]
    fn test_golden_walk_lightness_bands() {
        for index in 0..32 {
            let l = golden_oklch(index).oklab_lightness();
            if index % 2 == 1 {
                assert!((0.43..0.57).contains(&l), "index {index}: L={l}");
            } else {
                assert!((0.73..0.92).contains(&l), "index {index}: L={l}");
            }
        }
    }

    #[test]
    fn test_generator_skips_used_colours() {
        let first = golden_oklch(0);
        let used: HashSet<Rgb> = [first].into_iter().collect();
        let mut generator = ColourGenerator::new();
        let picked = generator.next(&used);
        assert_ne!(picked, first);
        assert_eq!(picked, golden_oklch(1));
        assert_eq!(generator.next(&HashSet::new()), golden_oklch(2));
    }

    #[test]
    fn test_generator_from_str_fallback() {
        let mut generator = ColourGenerator::new();
        let none = HashSet::new();
        assert_eq!(
            generator.from_str(Some("#00ff00"), &none),
            Rgb::new(0, 255, 0)
        );
        assert_eq!(generator.from_str(Some("green"), &none), golden_oklch(0));
        assert_eq!(generator.from_str(None, &none), golden_oklch(1));
    }

    proptest! {
        #[test]
        fn golden_walk_stays_in_srgb_gamut(index in any::<u32>()) {
            let linear = golden_oklch_linear(index);
            for c in linear {
                prop_assert!((-1e-6..=1.0 + 1e-6).contains(&c), "index {}: {:?}", index, linear);
            }

            let back = golden_oklch(index).to_linear();
            for (fitted, quantized) in linear.iter().zip(back) {
                prop_assert!((fitted - quantized).abs() < 0.01, "index {}: {:?} vs {:?}", index, linear, back);
            }
        }

        #[test]
        fn generator_sequence_is_fitted_walk(count in 1usize..64) {
            let mut generator = ColourGenerator::new();
            let none = HashSet::new();
            for index in 0..count as u32 {
                let colour = generator.next(&none);
                prop_assert_eq!(colour, Rgb::from_linear(golden_oklch_linear(index)));
                prop_assert!(in_gamut(&golden_oklch_linear(index)));
            }
        }
    }
}
