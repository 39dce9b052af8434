//! Versioned page buffer contract.
//!
//! The real buffer pool — page fix/unfix, read/write/allocate modes,
//! discardable-write rollback, durability — is an external collaborator
//! (see the purpose-and-scope non-goals); this module specifies only the
//! interface this engine calls against, plus a minimal in-memory reference
//! implementation (`MemPageBuffer`) so the engine can be exercised and
//! tested without a real buffer pool attached.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{Error, ErrorCode, Result};

/// 32-bit page identifier. `UNDEFINED_PAGE_ID` is reserved.
pub type PageId = u32;

/// Reserved, never-allocated page id.
pub const UNDEFINED_PAGE_ID: PageId = 0xFFFF_FFFF;

/// Page fix modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixMode {
    /// Read-only fix; writes through the returned guard are not permitted.
    Read,
    /// Durable write fix; the mutation survives even if the caller aborts.
    Write,
    /// Write fix whose mutation is discarded (the buffer pool re-reads the
    /// previously committed version) unless explicitly committed.
    DiscardableWrite,
    /// Fix a brand new page, zero-initialized.
    Allocate,
}

/// A fixed page. Holds a private copy of the page bytes; `commit`/drop
/// decide whether that copy becomes the new committed version.
pub struct PageGuard<'a> {
    buffer: &'a MemPageBuffer,
    id: PageId,
    mode: FixMode,
    data: Vec<u8>,
    committed: bool,
}

impl<'a> PageGuard<'a> {
    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Make a `DiscardableWrite` fix's mutation durable. No-op for other modes.
    pub fn commit(&mut self) {
        self.committed = true;
    }
}

impl<'a> Drop for PageGuard<'a> {
    fn drop(&mut self) {
        match self.mode {
            FixMode::Read => {}
            FixMode::Write | FixMode::Allocate => {
                self.buffer.store(self.id, &self.data);
            }
            FixMode::DiscardableWrite => {
                if self.committed {
                    self.buffer.store(self.id, &self.data);
                }
                // else: dropped uncommitted, previously committed bytes stand.
            }
        }
    }
}

/// The interface the B+-tree and physical-file layers call against.
///
/// Out of scope for this engine's spec; specified here only so the rest of
/// the crate has a concrete seam to depend on.
pub trait PageBuffer: Send + Sync {
    fn page_size(&self) -> u32;
    fn page_count(&self) -> u32;
    fn fix(&self, page_id: PageId, mode: FixMode) -> Result<PageGuard<'_>>;
    fn flush(&self) -> Result<()>;
}

/// Minimal in-memory reference implementation of [`PageBuffer`].
///
/// Carries no durability guarantees; exists purely so the engine is
/// independently testable. `DiscardableWrite` rollback is implemented by
/// only ever persisting bytes on `commit()` or on a `Write`/`Allocate` fix.
pub struct MemPageBuffer {
    page_size: u32,
    pages: RwLock<HashMap<PageId, Vec<u8>>>,
}

impl MemPageBuffer {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            pages: RwLock::new(HashMap::new()),
        }
    }

    fn store(&self, id: PageId, data: &[u8]) {
        self.pages.write().unwrap().insert(id, data.to_vec());
    }
}

impl PageBuffer for MemPageBuffer {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn page_count(&self) -> u32 {
        self.pages.read().unwrap().len() as u32
    }

    fn fix(&self, page_id: PageId, mode: FixMode) -> Result<PageGuard<'_>> {
        if page_id == UNDEFINED_PAGE_ID {
            return Err(Error::new(ErrorCode::BadArgument));
        }
        let data = match mode {
            FixMode::Allocate => vec![0u8; self.page_size as usize],
            _ => {
                let pages = self.pages.read().unwrap();
                match pages.get(&page_id) {
                    Some(d) => d.clone(),
                    None if mode == FixMode::Read => return Err(Error::new(ErrorCode::BadArgument)),
                    None => vec![0u8; self.page_size as usize],
                }
            }
        };
        if mode == FixMode::Allocate {
            self.store(page_id, &data);
        }
        Ok(PageGuard {
            buffer: self,
            id: page_id,
            mode,
            data,
            committed: false,
        })
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discardable_write_rolls_back_without_commit() {
        let buf = MemPageBuffer::new(256);
        {
            let mut g = buf.fix(0, FixMode::Allocate).unwrap();
            g.data_mut()[0] = 1;
        }
        {
            let mut g = buf.fix(0, FixMode::DiscardableWrite).unwrap();
            g.data_mut()[0] = 99;
            // dropped without commit()
        }
        let g = buf.fix(0, FixMode::Read).unwrap();
        assert_eq!(g.data()[0], 1);
    }

    #[test]
    fn discardable_write_commits() {
        let buf = MemPageBuffer::new(256);
        buf.fix(0, FixMode::Allocate).unwrap();
        {
            let mut g = buf.fix(0, FixMode::DiscardableWrite).unwrap();
            g.data_mut()[0] = 42;
            g.commit();
        }
        let g = buf.fix(0, FixMode::Read).unwrap();
        assert_eq!(g.data()[0], 42);
    }
}
