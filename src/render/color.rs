use std::fmt;

/// Hue in degrees, saturation and lightness in percent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hsl {
    pub h: f64,
    pub s: f64,
    pub l: f64,
}

/// "Unknown mood": used whenever a feature scalar is missing or non-finite.
pub const NEUTRAL: Hsl = Hsl {
    h: 0.0,
    s: 0.0,
    l: 80.0,
};

const KEY_LIGHTNESS: f64 = 95.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorMode {
    Mood,
    Key,
}

impl std::str::FromStr for ColorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mood" => Ok(Self::Mood),
            "key" => Ok(Self::Key),
            other => Err(format!("unknown color mode '{}' (expected mood or key)", other)),
        }
    }
}

pub fn color_from_mood(danceability: f64, energy: f64, valence: f64) -> Hsl {
    if ![danceability, energy, valence].iter().all(|v| v.is_finite()) {
        return NEUTRAL;
    }
    Hsl {
        h: danceability.clamp(0.0, 1.0) * 360.0,
        s: energy.clamp(0.0, 1.0) * 100.0,
        l: valence.clamp(0.0, 1.0) * 100.0,
    }
}

pub fn color_from_key(key: u8, key_confidence: f64) -> Hsl {
    if !key_confidence.is_finite() {
        return NEUTRAL;
    }
    Hsl {
        h: f64::from(key.min(11)) * 30.0,
        s: key_confidence.clamp(0.0, 1.0) * 100.0,
        l: KEY_LIGHTNESS,
    }
}

impl Hsl {
    /// sRGB components in 0.0-1.0.
    pub fn to_rgb(self) -> [f32; 3] {
        let s = (self.s / 100.0).clamp(0.0, 1.0);
        let l = (self.l / 100.0).clamp(0.0, 1.0);
        let h = self.h.rem_euclid(360.0) / 60.0;

        let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
        let x = c * (1.0 - (h % 2.0 - 1.0).abs());
        let (r, g, b) = match h as u32 {
            0 => (c, x, 0.0),
            1 => (x, c, 0.0),
            2 => (0.0, c, x),
            3 => (0.0, x, c),
            4 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };
        let m = l - c / 2.0;
        [(r + m) as f32, (g + m) as f32, (b + m) as f32]
    }

    pub fn to_rgba8(self, alpha: u8) -> [u8; 4] {
        let [r, g, b] = self.to_rgb();
        let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        [q(r), q(g), q(b), alpha]
    }
}

impl fmt::Display for Hsl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hsl({:.0}, {:.0}%, {:.0}%)", self.h, self.s, self.l)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mood_maps_to_hsl() {
        assert_eq!(color_from_mood(0.8, 0.6, 0.9).to_string(), "hsl(288, 60%, 90%)");
    }

    #[test]
    fn mood_clamps_out_of_range() {
        let c = color_from_mood(1.5, -0.2, 0.5);
        assert_eq!(c.h, 360.0);
        assert_eq!(c.s, 0.0);
        assert_eq!(c.l, 50.0);
    }

    #[test]
    fn non_finite_mood_is_neutral() {
        assert_eq!(color_from_mood(f64::NAN, 0.5, 0.5), NEUTRAL);
        assert_eq!(color_from_mood(0.5, f64::INFINITY, 0.5), NEUTRAL);
        assert_eq!(color_from_key(3, f64::NAN), NEUTRAL);
    }

    #[test]
    fn key_maps_to_hue_wheel() {
        assert_eq!(color_from_key(4, 0.5).to_string(), "hsl(120, 50%, 95%)");
        assert_eq!(color_from_key(40, 2.0).to_string(), "hsl(330, 100%, 95%)");
    }

    #[test]
    fn rgb_conversion() {
        let red = Hsl { h: 0.0, s: 100.0, l: 50.0 }.to_rgb();
        assert!((red[0] - 1.0).abs() < 1e-6 && red[1].abs() < 1e-6 && red[2].abs() < 1e-6);

        let grey = NEUTRAL.to_rgba8(255);
        assert_eq!(grey, [204, 204, 204, 255]);

        let blue = Hsl { h: 240.0, s: 100.0, l: 50.0 }.to_rgba8(255);
        assert_eq!(blue, [0, 0, 255, 255]);
    }

    #[test]
    fn color_mode_parses() {
        assert_eq!("Mood".parse::<ColorMode>(), Ok(ColorMode::Mood));
        assert_eq!("key".parse::<ColorMode>(), Ok(ColorMode::Key));
        assert!("rainbow".parse::<ColorMode>().is_err());
    }
}
