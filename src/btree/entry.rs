//! B+-tree entry: key bytes plus a row-id (leaf) or child-page-id (node),
//! with the per-variant leading header (tombstone bit, null-bitmap byte).

use crate::buffer::PageId;
use crate::physical::codec::{read_u16, read_u32};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    RowId(u64),
    Child(PageId),
}

impl Payload {
    fn encode(self, out: &mut Vec<u8>) {
        match self {
            Payload::RowId(r) => {
                out.push(0);
                out.extend_from_slice(&r.to_be_bytes());
            }
            Payload::Child(p) => {
                out.push(1);
                out.extend_from_slice(&p.to_be_bytes());
            }
        }
    }

    fn decode(data: &[u8], offset: usize) -> Option<(Payload, usize)> {
        let tag = *data.get(offset)?;
        match tag {
            0 => {
                let bytes: [u8; 8] = data.get(offset + 1..offset + 9)?.try_into().ok()?;
                Some((Payload::RowId(u64::from_be_bytes(bytes)), offset + 9))
            }
            1 => {
                let p = read_u32(data, offset + 1)?;
                Some((Payload::Child(p), offset + 5))
            }
            _ => None,
        }
    }
}

/// One packed entry. `null_bitmap` is `Some` only under the Multi variant;
/// `tombstone` is only ever set under the Unique variant's leaf entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub null_bitmap: Option<u8>,
    pub tombstone: bool,
    pub payload: Payload,
}

impl Entry {
    pub fn leaf(key: Vec<u8>, row_id: u64) -> Self {
        Self {
            key,
            null_bitmap: None,
            tombstone: false,
            payload: Payload::RowId(row_id),
        }
    }

    pub fn node(key: Vec<u8>, child: PageId) -> Self {
        Self {
            key,
            null_bitmap: None,
            tombstone: false,
            payload: Payload::Child(child),
        }
    }

    pub fn row_id(&self) -> Option<u64> {
        match self.payload {
            Payload::RowId(r) => Some(r),
            Payload::Child(_) => None,
        }
    }

    pub fn child_id(&self) -> Option<PageId> {
        match self.payload {
            Payload::Child(c) => Some(c),
            Payload::RowId(_) => None,
        }
    }

    /// Serialized byte length, matching what `encode` writes: a 1-byte
    /// header flag (tombstone bit, null-bitmap-present bit), the optional
    /// null-bitmap byte, a 2-byte key length, the key, and the payload.
    pub fn encoded_len(&self) -> usize {
        1 + self.null_bitmap.is_some() as usize + 2 + self.key.len() + match self.payload {
            Payload::RowId(_) => 9,
            Payload::Child(_) => 5,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut flags = 0u8;
        if self.tombstone {
            flags |= 0x01;
        }
        if self.null_bitmap.is_some() {
            flags |= 0x02;
        }
        out.push(flags);
        if let Some(b) = self.null_bitmap {
            out.push(b);
        }
        out.extend_from_slice(&(self.key.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.key);
        self.payload.encode(out);
    }

    pub fn decode(data: &[u8], offset: usize) -> Option<(Entry, usize)> {
        let flags = *data.get(offset)?;
        let tombstone = flags & 0x01 != 0;
        let has_bitmap = flags & 0x02 != 0;
        let mut cur = offset + 1;
        let null_bitmap = if has_bitmap {
            let b = *data.get(cur)?;
            cur += 1;
            Some(b)
        } else {
            None
        };
        let key_len = read_u16(data, cur)? as usize;
        cur += 2;
        let key = data.get(cur..cur + key_len)?.to_vec();
        cur += key_len;
        let (payload, next) = Payload::decode(data, cur)?;
        Some((
            Entry {
                key,
                null_bitmap,
                tombstone,
                payload,
            },
            next,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_entry_roundtrip() {
        let e = Entry::leaf(b"hello".to_vec(), 42);
        let mut buf = Vec::new();
        e.encode(&mut buf);
        assert_eq!(buf.len(), e.encoded_len());
        let (decoded, next) = Entry::decode(&buf, 0).unwrap();
        assert_eq!(next, buf.len());
        assert_eq!(decoded, e);
    }

    #[test]
    fn multi_entry_with_null_bitmap_roundtrip() {
        let mut e = Entry::leaf(b"k".to_vec(), 7);
        e.null_bitmap = Some(0b0000_0101);
        let mut buf = Vec::new();
        e.encode(&mut buf);
        let (decoded, _) = Entry::decode(&buf, 0).unwrap();
        assert_eq!(decoded.null_bitmap, Some(0b0000_0101));
    }

    #[test]
    fn tombstoned_entry_roundtrip() {
        let mut e = Entry::leaf(b"k".to_vec(), 7);
        e.tombstone = true;
        let mut buf = Vec::new();
        e.encode(&mut buf);
        let (decoded, _) = Entry::decode(&buf, 0).unwrap();
        assert!(decoded.tombstone);
    }

    #[test]
    fn node_entry_roundtrip() {
        let e = Entry::node(b"delegate".to_vec(), 17);
        let mut buf = Vec::new();
        e.encode(&mut buf);
        let (decoded, _) = Entry::decode(&buf, 0).unwrap();
        assert_eq!(decoded.child_id(), Some(17));
    }
}
