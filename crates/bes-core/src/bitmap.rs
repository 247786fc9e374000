//! Packed bit vector used for revocation and key flags.

/// Bit vector packed MSB-first, eight flags per byte.
///
/// Bit `i` lives in byte `i / 8` under mask `0x80 >> (i % 8)`; unused bits of
/// the trailing byte are always zero. This is also the persisted layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bitmap {
    bytes: Vec<u8>,
    len: usize,
}

impl Bitmap {
    /// Creates a bitmap of `len` flags, all set to `value`.
    pub fn filled(len: usize, value: bool) -> Self {
        let fill = if value { 0xff } else { 0x00 };
        let mut bitmap = Self {
            bytes: vec![fill; len.div_ceil(8)],
            len,
        };
        bitmap.clear_padding();
        bitmap
    }

    /// Rebuilds a bitmap from its packed bytes, ignoring padding bits.
    ///
    /// Returns `None` when `bytes` is not exactly `ceil(len / 8)` long.
    pub fn from_packed(len: usize, bytes: &[u8]) -> Option<Self> {
        if bytes.len() != len.div_ceil(8) {
            return None;
        }
        let mut bitmap = Self {
            bytes: bytes.to_vec(),
            len,
        };
        bitmap.clear_padding();
        Some(bitmap)
    }

    /// Number of flags.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the bitmap holds no flags.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reads flag `index`.
    #[inline]
    pub fn get(&self, index: usize) -> bool {
        assert!(index < self.len, "bit {index} out of range {}", self.len);
        self.bytes[index / 8] & mask(index) != 0
    }

    /// Writes flag `index`.
    #[inline]
    pub fn set(&mut self, index: usize, value: bool) {
        assert!(index < self.len, "bit {index} out of range {}", self.len);
        if value {
            self.bytes[index / 8] |= mask(index);
        } else {
            self.bytes[index / 8] &= !mask(index);
        }
    }

    /// Number of set flags.
    pub fn count_ones(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Number of cleared flags.
    pub fn count_zeros(&self) -> usize {
        self.len - self.count_ones()
    }

    /// Iterates over all flags in index order.
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(move |i| self.get(i))
    }

    /// Indices of cleared flags.
    pub fn zeros(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |&i| !self.get(i))
    }

    /// Packed representation, `ceil(len / 8)` bytes.
    pub fn as_packed(&self) -> &[u8] {
        &self.bytes
    }

    fn clear_padding(&mut self) {
        let used = self.len % 8;
        if used != 0 {
            if let Some(last) = self.bytes.last_mut() {
                *last &= 0xffu8 << (8 - used);
            }
        }
    }
}

#[inline]
const fn mask(index: usize) -> u8 {
    0x80 >> (index % 8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_msb_first_with_short_trailing_byte() {
        let mut bitmap = Bitmap::filled(11, true);
        assert_eq!(bitmap.as_packed(), &[0xff, 0xe0]);
        bitmap.set(0, false);
        bitmap.set(9, false);
        assert_eq!(bitmap.as_packed(), &[0x7f, 0xa0]);
        assert_eq!(bitmap.count_ones(), 9);
        assert_eq!(bitmap.count_zeros(), 2);
        assert_eq!(bitmap.zeros().collect::<Vec<_>>(), vec![0, 9]);
    }

    #[test]
    fn from_packed_checks_length_and_masks_padding() {
        assert!(Bitmap::from_packed(9, &[0xff]).is_none());
        let bitmap = Bitmap::from_packed(9, &[0xff, 0xff]).unwrap();
        assert_eq!(bitmap.as_packed(), &[0xff, 0x80]);
        assert_eq!(bitmap.count_ones(), 9);
    }

    #[test]
    fn empty_bitmap() {
        let bitmap = Bitmap::filled(0, true);
        assert!(bitmap.is_empty());
        assert!(bitmap.as_packed().is_empty());
    }

    #[test]
    #[should_panic]
    fn out_of_range_read_panics() {
        Bitmap::filled(4, true).get(4);
    }
}
