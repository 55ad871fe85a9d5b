//! Bounds-checked primitive reads over a raw TIFF/EXIF block.
//!
//! Every read returns `None` instead of panicking when the requested range
//! does not fit inside the block.

/// Byte order of a TIFF/EXIF block, taken from its first two bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// `II` marker
    Little,
    /// `MM` marker
    Big,
}

impl ByteOrder {
    /// Detect the byte order from the block's marker. Anything other than
    /// `II` or `MM` is not a TIFF block.
    pub fn from_marker(data: &[u8]) -> Option<Self> {
        match data.get(0..2)? {
            b"II" => Some(Self::Little),
            b"MM" => Some(Self::Big),
            _ => None,
        }
    }

    pub fn u16_bytes(self, v: u16) -> [u8; 2] {
        match self {
            Self::Little => v.to_le_bytes(),
            Self::Big => v.to_be_bytes(),
        }
    }

    pub fn u32_bytes(self, v: u32) -> [u8; 4] {
        match self {
            Self::Little => v.to_le_bytes(),
            Self::Big => v.to_be_bytes(),
        }
    }
}

/// A TIFF RATIONAL: two unsigned 32-bit integers, numerator then denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub numerator: u32,
    pub denominator: u32,
}

impl Rational {
    /// Scalar value. A zero denominator yields 0 so downstream math stays total.
    pub fn to_f64(self) -> f64 {
        if self.denominator == 0 {
            0.0
        } else {
            self.numerator as f64 / self.denominator as f64
        }
    }
}

/// Immutable view over a metadata block with a fixed byte order.
#[derive(Debug, Clone, Copy)]
pub struct ByteView<'a> {
    data: &'a [u8],
    order: ByteOrder,
}

impl<'a> ByteView<'a> {
    pub fn new(data: &'a [u8], order: ByteOrder) -> Self {
        Self { data, order }
    }

    /// Build a view whose byte order is read from the block's own marker.
    pub fn from_marker(data: &'a [u8]) -> Option<Self> {
        ByteOrder::from_marker(data).map(|order| Self::new(data, order))
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// `offset + width <= len`, without overflowing.
    pub fn contains(&self, offset: usize, width: usize) -> bool {
        offset
            .checked_add(width)
            .is_some_and(|end| end <= self.data.len())
    }

    /// Raw bytes `[offset, offset + width)`.
    pub fn bytes_at(&self, offset: usize, width: usize) -> Option<&'a [u8]> {
        if !self.contains(offset, width) {
            return None;
        }
        Some(&self.data[offset..offset + width])
    }

    pub fn u8_at(&self, offset: usize) -> Option<u8> {
        self.data.get(offset).copied()
    }

    pub fn u16_at(&self, offset: usize) -> Option<u16> {
        let b = self.bytes_at(offset, 2)?;
        let raw = [b[0], b[1]];
        Some(match self.order {
            ByteOrder::Little => u16::from_le_bytes(raw),
            ByteOrder::Big => u16::from_be_bytes(raw),
        })
    }

    pub fn u32_at(&self, offset: usize) -> Option<u32> {
        let b = self.bytes_at(offset, 4)?;
        let raw = [b[0], b[1], b[2], b[3]];
        Some(match self.order {
            ByteOrder::Little => u32::from_le_bytes(raw),
            ByteOrder::Big => u32::from_be_bytes(raw),
        })
    }

    pub fn rational_at(&self, offset: usize) -> Option<Rational> {
        // Check the full 8 bytes up front so a half-present rational is unavailable.
        if !self.contains(offset, 8) {
            return None;
        }
        Some(Rational {
            numerator: self.u32_at(offset)?,
            denominator: self.u32_at(offset + 4)?,
        })
    }

    /// Read `count` consecutive rationals as scalars.
    pub fn rationals_at(&self, offset: usize, count: usize) -> Option<Vec<f64>> {
        let width = count.checked_mul(8)?;
        if !self.contains(offset, width) {
            return None;
        }
        (0..count)
            .map(|i| self.rational_at(offset + i * 8).map(Rational::to_f64))
            .collect()
    }

    /// Read a fixed-length ASCII field, dropping the NUL padding.
    pub fn string_at(&self, offset: usize, len: usize) -> Option<String> {
        let bytes = self.bytes_at(offset, len)?;
        let text: String = String::from_utf8_lossy(bytes)
            .chars()
            .filter(|c| *c != '\0')
            .collect();
        Some(text)
    }
}
