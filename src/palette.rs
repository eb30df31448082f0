//! Session color palette.
//!
//! New particle lists get a color nobody else is using. The palette is an
//! explicit context object owned by the embedding session and passed to
//! whoever needs a color — there is no global state.

/// RGBA color, 8 bits per channel.
pub type Rgba = [u8; 4];

/// Ordered set of standard list colors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorPalette {
    standard: Vec<Rgba>,
}

impl ColorPalette {
    /// Palette from an explicit color list.
    #[must_use]
    pub fn new(standard: Vec<Rgba>) -> Self {
        Self { standard }
    }

    /// The standard colors in preference order.
    #[must_use]
    pub fn standard_colors(&self) -> &[Rgba] {
        &self.standard
    }

    /// First standard color not present in `used`; cycles back to the
    /// first entry when all are taken.
    #[must_use]
    pub fn unused_color<'a>(&self, used: impl IntoIterator<Item = &'a Rgba>) -> Rgba {
        let used: Vec<Rgba> = used.into_iter().copied().collect();
        self.standard
            .iter()
            .find(|c| !used.contains(c))
            .or_else(|| self.standard.first())
            .copied()
            .unwrap_or([170, 170, 170, 255])
    }
}

impl Default for ColorPalette {
    fn default() -> Self {
        Self {
            standard: vec![
                [255, 0, 0, 255],
                [255, 255, 0, 255],
                [0, 255, 0, 255],
                [0, 255, 255, 255],
                [0, 0, 255, 255],
                [255, 0, 255, 255],
                [255, 128, 0, 255],
                [128, 0, 255, 255],
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_colors_in_use() {
        let palette = ColorPalette::default();
        let used = [[255, 0, 0, 255], [255, 255, 0, 255]];
        assert_eq!(palette.unused_color(used.iter()), [0, 255, 0, 255]);
    }

    #[test]
    fn exhausted_palette_cycles() {
        let palette = ColorPalette::new(vec![[1, 2, 3, 255]]);
        let used = [[1, 2, 3, 255]];
        assert_eq!(palette.unused_color(used.iter()), [1, 2, 3, 255]);
    }
}
