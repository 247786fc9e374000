//! Binary record layout shared by both engines.
//!
//! ```text
//! tag        20 bytes ASCII, NUL padded
//! depth      u64 LE
//! key bits   u64 LE
//! users      u64 LE bit count, then ceil(count / 8) packed bytes
//! [engine-specific sections]
//! node keys  nodes * key_bytes bytes in heap order
//! [engine-specific trailer]
//! ```

use std::io::{Read, Write};

use bes_core::{Bitmap, Error, KeyTree, Result, TreeConfig};
use tracing::warn;

use crate::scheme::{Scheme, TAG_LEN};

/// Writes the tag, tree shape and user bitmap.
pub(crate) fn write_header<W: Write>(writer: &mut W, scheme: Scheme, tree: &KeyTree) -> Result<()> {
    writer.write_all(&scheme.tag_bytes())?;
    write_u64(writer, tree.depth())?;
    write_u64(writer, tree.key_length().bits())?;
    write_bitmap(writer, tree.allowed_users())
}

/// Writes a bit count followed by the packed bits.
pub(crate) fn write_bitmap<W: Write>(writer: &mut W, bitmap: &Bitmap) -> Result<()> {
    write_u64(writer, bitmap.len())?;
    writer.write_all(bitmap.as_packed())?;
    Ok(())
}

/// Writes every node key in heap order.
pub(crate) fn write_node_keys<W: Write>(writer: &mut W, tree: &KeyTree) -> Result<()> {
    writer.write_all(tree.arena())?;
    Ok(())
}

fn write_u64<W: Write>(writer: &mut W, value: usize) -> Result<()> {
    writer.write_all(&(value as u64).to_le_bytes())?;
    Ok(())
}

/// Reads a whole record from `reader` before any parsing happens.
///
/// A failing reader yields [`Error::FormatMismatch`], like any other
/// record that cannot be parsed.
pub(crate) fn read_all<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|err| mismatch(format!("record could not be read: {err}")))?;
    Ok(bytes)
}

/// Cursor over an in-memory record. Every shortfall is a format mismatch.
pub(crate) struct RecordReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| mismatch(format!("record truncated while reading {what}")))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u64(&mut self, what: &str) -> Result<usize> {
        let raw = self.take(8, what)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        usize::try_from(u64::from_le_bytes(buf))
            .map_err(|_| mismatch(format!("{what} does not fit in memory")))
    }

    /// Checks the tag, then reads the tree shape and user bitmap.
    pub(crate) fn header(&mut self, expected: Scheme) -> Result<(TreeConfig, Bitmap)> {
        let tag = self.take(TAG_LEN, "scheme tag")?;
        match Scheme::from_tag(tag) {
            Some(found) if found == expected => {}
            found => {
                return Err(mismatch(format!(
                    "expected a {} record, found {}",
                    expected.tag(),
                    found.map_or("an unknown tag", Scheme::tag)
                )))
            }
        }
        let depth = self.u64("depth")?;
        let key_bits = self.u64("key length")?;
        let config = TreeConfig::new(depth, key_bits).map_err(|err| mismatch(err.to_string()))?;
        let users = self.bitmap(config.users(), "user bitmap")?;
        Ok((config, users))
    }

    /// Reads a bit count and packed bits, requiring exactly `expected` bits.
    pub(crate) fn bitmap(&mut self, expected: usize, what: &str) -> Result<Bitmap> {
        let len = self.u64(what)?;
        if len != expected {
            return Err(mismatch(format!("{what} holds {len} bits, expected {expected}")));
        }
        let packed = self.take(len.div_ceil(8), what)?;
        Bitmap::from_packed(len, packed).ok_or_else(|| mismatch(format!("malformed {what}")))
    }

    /// Reads `config.nodes()` node keys.
    pub(crate) fn node_keys(&mut self, config: &TreeConfig) -> Result<Vec<u8>> {
        let len = config.nodes() * config.key_length().bytes();
        Ok(self.take(len, "node keys")?.to_vec())
    }

    /// Reads exactly `len` raw bytes.
    pub(crate) fn raw(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        self.take(len, what)
    }

    /// Fails unless the whole record was consumed.
    pub(crate) fn finish(self) -> Result<()> {
        let trailing = self.bytes.len() - self.pos;
        if trailing != 0 {
            return Err(mismatch(format!("{trailing} trailing bytes after record")));
        }
        Ok(())
    }
}

fn mismatch(reason: String) -> Error {
    warn!(%reason, "rejected key tree record");
    Error::FormatMismatch(reason)
}
