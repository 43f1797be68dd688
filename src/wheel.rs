use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Wheel position in `0..=36`.
pub type WheelIndex = u8;

pub const WHEEL_SIZE: u8 = 37;

/// Color of a wheel position. The index→color mapping is part of the
/// external contract: 0 is green, odd indices in 1..=35 are red, the
/// remaining non-zero indices are black.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WheelColor {
    Red,
    Black,
    Green,
}

impl WheelColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            WheelColor::Red => "red",
            WheelColor::Black => "black",
            WheelColor::Green => "green",
        }
    }
}

impl std::fmt::Display for WheelColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn color_of(index: WheelIndex) -> WheelColor {
    if index == 0 {
        WheelColor::Green
    } else if index % 2 == 1 {
        WheelColor::Red
    } else {
        WheelColor::Black
    }
}

static LAYOUT: Lazy<[WheelColor; WHEEL_SIZE as usize]> = Lazy::new(|| {
    let mut colors = [WheelColor::Green; WHEEL_SIZE as usize];
    for (index, slot) in colors.iter_mut().enumerate() {
        *slot = color_of(index as WheelIndex);
    }
    colors
});

/// Full index→color table, one entry per wheel position.
pub fn layout() -> &'static [WheelColor; WHEEL_SIZE as usize] {
    &LAYOUT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_green() {
        assert_eq!(color_of(0), WheelColor::Green);
    }

    #[test]
    fn odd_indices_are_red_even_are_black() {
        for index in 1..WHEEL_SIZE {
            let expected = if index % 2 == 1 {
                WheelColor::Red
            } else {
                WheelColor::Black
            };
            assert_eq!(color_of(index), expected, "index {index}");
        }
    }

    #[test]
    fn layout_matches_color_of() {
        let table = layout();
        for index in 0..WHEEL_SIZE {
            assert_eq!(table[index as usize], color_of(index));
        }
    }

    #[test]
    fn exactly_one_green_eighteen_red_eighteen_black() {
        let mut red = 0;
        let mut black = 0;
        let mut green = 0;
        for color in layout() {
            match color {
                WheelColor::Red => red += 1,
                WheelColor::Black => black += 1,
                WheelColor::Green => green += 1,
            }
        }
        assert_eq!((red, black, green), (18, 18, 1));
    }
}
