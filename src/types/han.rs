//! Per-thread anonymous display identity ("han").
//!
//! The OP of a thread always gets the same fixed identity; every other
//! first-time poster in that thread draws a fresh one from a generator that
//! starts at a random hue and progressively halves its step interval, so
//! hues spread out before they start repeating nearby ones.

use rand::Rng;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HslColor {
    pub hue: u16,
    pub saturation: u8,
    pub lightness: u8,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Han {
    pub char: String,
    pub color: HslColor,
    pub seq: u32,
    pub ident: u64,
}

impl Han {
    /// The fixed identity always assigned to a thread's OP.
    pub fn op() -> Self {
        Han {
            char: "主".to_owned(),
            color: HslColor {
                hue: 0,
                saturation: 0,
                lightness: 0,
            },
            seq: 0,
            ident: 0,
        }
    }
}

/// Hue generator: yields a starting hue, then keeps halving the step
/// interval it advances by until the interval bottoms out, at which point it
/// resets to a full-circle step. Mirrors the original's `hslGenerator`.
struct HueGenerator {
    color: u32,
    interval: u32,
    counter: u32,
}

impl HueGenerator {
    fn new(rng: &mut impl Rng) -> Self {
        Self {
            color: rng.gen_range(0..360),
            interval: 360,
            counter: 1,
        }
    }

    fn next_hue(&mut self) -> u16 {
        let out = self.color;
        self.counter -= 1;

        if self.counter == 0 {
            self.interval /= 2;
            if self.interval == 0 {
                self.interval = 360;
            }
            self.counter = 180 / self.interval;
            self.color = (self.color + self.interval * 3) % 360;
        } else {
            self.color = (self.color + self.interval * 2) % 360;
        }

        out as u16
    }
}

/// Per-thread han generator: the first call always returns [`Han::op`]; every
/// subsequent call draws a fresh ideographic character and hue.
pub struct HanGenerator {
    hue: HueGenerator,
    next_seq: u32,
    issued_op: bool,
}

impl HanGenerator {
    pub fn new(rng: &mut impl Rng) -> Self {
        Self {
            hue: HueGenerator::new(rng),
            next_seq: 1,
            issued_op: false,
        }
    }

    pub fn next(&mut self, rng: &mut impl Rng) -> Han {
        if !self.issued_op {
            self.issued_op = true;
            return Han::op();
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        // Codepoint range matches a CJK ideograph block used to pick a
        // visually distinct, pronounceable-looking glyph per poster.
        let codepoint = 0x4e3c + rng.gen_range(0..0x14c3u32);
        let char = char::from_u32(codepoint)
            .map(|c| c.to_string())
            .unwrap_or_else(|| "主".to_owned());

        Han {
            char,
            color: HslColor {
                hue: self.hue.next_hue(),
                saturation: 100,
                lightness: 30,
            },
            seq,
            ident: rng.gen(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn first_han_is_always_op() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let mut gen = HanGenerator::new(&mut rng);
        assert_eq!(gen.next(&mut rng), Han::op());
    }

    #[test]
    fn subsequent_hans_have_increasing_seq() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let mut gen = HanGenerator::new(&mut rng);
        let _op = gen.next(&mut rng);
        let a = gen.next(&mut rng);
        let b = gen.next(&mut rng);
        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 2);
    }
}
