//! MSB-first bit streams with unary and Elias delta codes.

/// Accumulates bits into a byte vector, most significant bit first
#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    bytes: Vec<u8>,
    current: u8,
    filled: u8,
}
impl BitWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_bit(&mut self, bit: bool) {
        self.current = (self.current << 1) | u8::from(bit);
        self.filled += 1;
        if self.filled == 8 {
            self.bytes.push(self.current);
            self.current = 0;
            self.filled = 0;
        }
    }

    /// Writes the lowest `width` bits of `value`
    pub fn write_int(&mut self, value: u64, width: u32) {
        for shift in (0..width).rev() {
            self.write_bit((value >> shift) & 1 == 1);
        }
    }

    /// Writes `n` zeros followed by a single one
    pub fn write_unary(&mut self, n: u32) {
        for _ in 0..n {
            self.write_bit(false);
        }
        self.write_bit(true);
    }

    /// Writes `x >= 1` in Elias gamma code
    pub fn write_gamma(&mut self, x: u64) {
        debug_assert!(x >= 1, "gamma code cannot represent zero");
        let msb = 63 - x.leading_zeros();
        for _ in 0..msb {
            self.write_bit(false);
        }
        self.write_int(x, msb + 1);
    }

    /// Writes `x >= 1` in Elias delta code
    pub fn write_delta(&mut self, x: u64) {
        debug_assert!(x >= 1, "delta code cannot represent zero");
        let msb = 63 - x.leading_zeros();
        self.write_gamma(u64::from(msb) + 1);
        self.write_int(x, msb);
    }

    /// Number of bits written so far
    #[must_use]
    pub fn len_bits(&self) -> usize {
        self.bytes.len() * 8 + self.filled as usize
    }

    /// Pads the last byte with zeros and returns the buffer
    #[must_use]
    pub fn finish(mut self) -> Vec<u8> {
        if self.filled > 0 {
            self.bytes.push(self.current << (8 - self.filled));
        }
        self.bytes
    }
}

/// Reads bits written by [`BitWriter`]
///
/// Every read returns `None` once the underlying bytes are exhausted.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}
impl<'a> BitReader<'a> {
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn read_bit(&mut self) -> Option<bool> {
        let byte = *self.bytes.get(self.pos / 8)?;
        let bit = (byte >> (7 - self.pos % 8)) & 1 == 1;
        self.pos += 1;
        Some(bit)
    }

    pub fn read_int(&mut self, width: u32) -> Option<u64> {
        let mut value = 0u64;
        for _ in 0..width {
            value = (value << 1) | u64::from(self.read_bit()?);
        }
        Some(value)
    }

    pub fn read_unary(&mut self) -> Option<u32> {
        let mut n = 0;
        while !self.read_bit()? {
            n += 1;
        }
        Some(n)
    }

    pub fn read_gamma(&mut self) -> Option<u64> {
        let msb = self.read_unary()?;
        if msb > 63 {
            return None;
        }
        let rest = self.read_int(msb)?;
        Some((1u64 << msb) | rest)
    }

    pub fn read_delta(&mut self) -> Option<u64> {
        let msb = self.read_gamma()? - 1;
        if msb > 63 {
            return None;
        }
        let rest = self.read_int(msb as u32)?;
        Some((1u64 << msb) | rest)
    }

    /// Number of bits consumed so far
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }
}
