//! Area-manage page: variable-sized in-page allocations indexed by a stable
//! area id, with a backward-growing area directory.
//!
//! Layout of one managed page (see the data model's area-manage-page
//! section): a small fixed header at offset 0, a user area that grows
//! forward from the end of the header, and an area directory that grows
//! backward from the end of the page in 8-area blocks (8 `{offset, size}`
//! entries followed by a 1-byte use-bitmap).

use crate::physical::codec::FieldWidth;
use crate::error::{Error, ErrorCode, Result};

/// Per-page area identifier. `UNDEFINED_AREA_ID` marks "no such area".
pub type AreaId = u16;

pub const UNDEFINED_AREA_ID: AreaId = 0xFFFF;

/// Hard cap on the number of areas one page may manage.
pub const MAX_MANAGED_AREA_COUNT: u32 = 65_535;

/// Entries per directory block.
const ENTRIES_PER_BLOCK: usize = 8;

/// Worst-case per-area directory byte cost: one `{offset, size}` entry plus
/// a full bitmap byte, as if the area started a fresh block on its own.
/// The bitmap byte is actually shared by up to 8 areas, so this overcounts
/// when several new areas land in the same block — a deliberate bias
/// toward false negatives over false positives in the fast free-page
/// search, which may never report a page short of its promised size.
pub fn directory_slot_cost(width: FieldWidth) -> u32 {
    (width.byte_len() * 2 + 1) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AreaSlot {
    offset: u32,
    size: u32,
    in_use: bool,
}

/// A view over one versioned page's bytes, interpreted as an area-manage
/// page. Constructed fresh from the buffer every time the page is fixed;
/// never persisted as a standalone struct (see the "manual memory per page"
/// design note).
pub struct AreaManagePage<'p> {
    data: &'p mut [u8],
    width: FieldWidth,
}

// Header layout: unused_size(width) | free_size(width) | free_offset(width) | managed_count(u16)
impl<'p> AreaManagePage<'p> {
    pub fn header_len(width: FieldWidth) -> usize {
        width.byte_len() * 3 + 2
    }

    fn entry_size(&self) -> usize {
        self.width.byte_len() * 2
    }

    fn block_size(&self) -> usize {
        self.entry_size() * ENTRIES_PER_BLOCK + 1
    }

    /// Initialize a freshly allocated page's header (no areas managed yet).
    pub fn format(data: &'p mut [u8], width: FieldWidth) -> Self {
        let page_size = data.len() as u32;
        let header_len = Self::header_len(width) as u32;
        let mut page = Self { data, width };
        let user_bytes = page_size - header_len;
        page.set_unused_size(user_bytes);
        page.set_free_size(user_bytes);
        page.set_free_offset(header_len);
        page.set_managed_count(0);
        page
    }

    pub fn attach(data: &'p mut [u8], width: FieldWidth) -> Self {
        Self { data, width }
    }

    fn page_size(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn unused_size(&self) -> u32 {
        self.width.read(self.data, 0).unwrap_or(0)
    }

    fn set_unused_size(&mut self, v: u32) {
        let _ = self.width.write(self.data, 0, v);
    }

    pub fn free_size(&self) -> u32 {
        self.width.read(self.data, self.width.byte_len()).unwrap_or(0)
    }

    fn set_free_size(&mut self, v: u32) {
        let off = self.width.byte_len();
        let _ = self.width.write(self.data, off, v);
    }

    pub fn free_offset(&self) -> u32 {
        self.width.read(self.data, self.width.byte_len() * 2).unwrap_or(0)
    }

    fn set_free_offset(&mut self, v: u32) {
        let off = self.width.byte_len() * 2;
        let _ = self.width.write(self.data, off, v);
    }

    pub fn managed_area_count(&self) -> u32 {
        crate::physical::codec::read_u16(self.data, self.width.byte_len() * 3).unwrap_or(0) as u32
    }

    fn set_managed_count(&mut self, v: u32) {
        let off = self.width.byte_len() * 3;
        let _ = crate::physical::codec::write_u16(self.data, off, v as u16);
    }

    fn n_blocks(&self) -> usize {
        (self.managed_area_count() as usize).div_ceil(ENTRIES_PER_BLOCK)
    }

    fn directory_size(&self) -> usize {
        self.n_blocks() * self.block_size()
    }

    /// Total bytes available to user areas (excludes header and directory).
    pub fn user_area_size(&self) -> u32 {
        self.page_size() - Self::header_len(self.width) as u32 - self.directory_size() as u32
    }

    fn block_start(&self, block: usize) -> usize {
        let page_size = self.page_size() as usize;
        page_size - (block + 1) * self.block_size()
    }

    fn slot_entry_offset(&self, id: AreaId) -> usize {
        let block = id as usize / ENTRIES_PER_BLOCK;
        let idx = id as usize % ENTRIES_PER_BLOCK;
        self.block_start(block) + idx * self.entry_size()
    }

    fn bitmap_byte_offset(&self, block: usize) -> usize {
        self.block_start(block) + ENTRIES_PER_BLOCK * self.entry_size()
    }

    fn read_slot(&self, id: AreaId) -> AreaSlot {
        let eoff = self.slot_entry_offset(id);
        let w = self.width.byte_len();
        let offset = self.width.read(self.data, eoff).unwrap_or(self.width.undefined());
        let size = self.width.read(self.data, eoff + w).unwrap_or(self.width.undefined());
        let block = id as usize / ENTRIES_PER_BLOCK;
        let bit = 1u8 << (id as usize % ENTRIES_PER_BLOCK);
        let bm = self.data[self.bitmap_byte_offset(block)];
        AreaSlot {
            offset,
            size,
            in_use: bm & bit != 0,
        }
    }

    fn write_slot(&mut self, id: AreaId, slot: AreaSlot) {
        let eoff = self.slot_entry_offset(id);
        let w = self.width.byte_len();
        let _ = self.width.write(self.data, eoff, slot.offset);
        let _ = self.width.write(self.data, eoff + w, slot.size);
        let block = id as usize / ENTRIES_PER_BLOCK;
        let bit = 1u8 << (id as usize % ENTRIES_PER_BLOCK);
        let bmoff = self.bitmap_byte_offset(block);
        if slot.in_use {
            self.data[bmoff] |= bit;
        } else {
            self.data[bmoff] &= !bit;
        }
    }

    fn is_overwriteable(&self, id: AreaId) -> bool {
        let s = self.read_slot(id);
        !s.in_use && s.offset == self.width.undefined() && s.size == self.width.undefined()
    }

    /// Grow the directory by one block (8 more overwriteable slots),
    /// shrinking free space by the block's byte cost.
    fn grow_directory_block(&mut self) -> Result<()> {
        let needed = self.block_size() as u32;
        if self.free_size() < needed {
            return Err(Error::new(ErrorCode::OutOfSpace));
        }
        let new_count = self.n_blocks() as u32 * ENTRIES_PER_BLOCK as u32 + ENTRIES_PER_BLOCK as u32;
        self.set_managed_count(self.managed_area_count().max(new_count));
        self.set_free_size(self.free_size() - needed);
        self.set_unused_size(self.unused_size() - needed);
        // newly exposed block's slots all start overwriteable (zeroed = 0 offset/size/unused bit);
        // normalize to the UNDEFINED sentinel explicitly.
        let block = self.n_blocks() - 1;
        for j in 0..ENTRIES_PER_BLOCK {
            let id = (block * ENTRIES_PER_BLOCK + j) as AreaId;
            self.write_slot(
                id,
                AreaSlot {
                    offset: self.width.undefined(),
                    size: self.width.undefined(),
                    in_use: false,
                },
            );
        }
        Ok(())
    }

    fn find_overwriteable_slot(&self) -> Option<AreaId> {
        for id in 0..self.managed_area_count() as AreaId {
            if self.is_overwriteable(id) {
                return Some(id);
            }
        }
        None
    }

    /// Allocate an area of `size` bytes. Picks an overwriteable slot if one
    /// exists, otherwise grows the directory. If the contiguous free run is
    /// too small but total unused space would suffice, compacts once (when
    /// `with_compaction`) and retries.
    pub fn allocate_area(&mut self, size: u32, with_compaction: bool) -> Result<AreaId> {
        if size == 0 || size > self.width.undefined() {
            return Err(Error::new(ErrorCode::BadArgument));
        }
        let id = match self.find_overwriteable_slot() {
            Some(id) => id,
            None => {
                if self.managed_area_count() >= MAX_MANAGED_AREA_COUNT {
                    return Err(Error::new(ErrorCode::OutOfSpace));
                }
                // A directory block always reserves a full multiple of 8
                // slots; a prior compaction may have left managed_area_count
                // short of that reservation (trailing slots already hold the
                // overwriteable sentinel but aren't counted yet). Only grow
                // a new physical block once that slack is exhausted.
                let block_capacity = self.n_blocks() * ENTRIES_PER_BLOCK;
                if self.managed_area_count() as usize >= block_capacity {
                    self.grow_directory_block()?;
                    self.find_overwriteable_slot()
                        .ok_or_else(|| Error::new(ErrorCode::Unexpected))?
                } else {
                    let new_id = self.managed_area_count() as AreaId;
                    self.set_managed_count(self.managed_area_count() + 1);
                    new_id
                }
            }
        };

        if self.free_size() < size {
            if with_compaction && self.unused_size() >= size {
                self.compaction()?;
            }
            if self.free_size() < size {
                return Err(Error::new(ErrorCode::OutOfSpace));
            }
        }

        let offset = self.free_offset();
        self.write_slot(
            id,
            AreaSlot {
                offset,
                size,
                in_use: true,
            },
        );
        self.set_free_offset(offset + size);
        self.set_free_size(self.free_size() - size);
        self.set_unused_size(self.unused_size() - size);
        Ok(id)
    }

    /// Mark an area free. Bytes are not moved; the slot remains
    /// referenceable by `reuse_area` until the next `compaction`.
    pub fn free_area(&mut self, id: AreaId) -> Result<()> {
        let mut slot = self.read_slot(id);
        if !slot.in_use {
            return Err(Error::new(ErrorCode::BadArgument));
        }
        slot.in_use = false;
        self.set_unused_size(self.unused_size() + slot.size);
        self.write_slot(id, slot);
        Ok(())
    }

    /// Re-set the use bit of a previously freed slot whose offset/size are
    /// still valid. Fails if the slot was invalidated by `compaction`.
    pub fn reuse_area(&mut self, id: AreaId) -> Result<()> {
        let mut slot = self.read_slot(id);
        if slot.in_use || slot.offset == self.width.undefined() {
            return Err(Error::new(ErrorCode::BadArgument));
        }
        slot.in_use = true;
        self.set_unused_size(self.unused_size() - slot.size);
        self.write_slot(id, slot);
        Ok(())
    }

    /// Rewrite all in-use areas contiguously at the start of the user area
    /// in ascending id order; invalidates every freed slot's offset.
    pub fn compaction(&mut self) -> Result<()> {
        let count = self.managed_area_count();
        let header_len = Self::header_len(self.width) as u32;
        let mut write_cursor = header_len;
        let mut live: Vec<(AreaId, AreaSlot)> = Vec::new();
        for id in 0..count as AreaId {
            let slot = self.read_slot(id);
            if slot.in_use {
                live.push((id, slot));
            }
        }
        live.sort_by_key(|(id, _)| *id);
        for (id, slot) in &live {
            if slot.offset != write_cursor {
                // physically move the bytes
                let (src, dst) = (slot.offset as usize, write_cursor as usize);
                let len = slot.size as usize;
                if src != dst {
                    let mut buf = vec![0u8; len];
                    buf.copy_from_slice(&self.data[src..src + len]);
                    self.data[dst..dst + len].copy_from_slice(&buf);
                }
            }
            self.write_slot(
                *id,
                AreaSlot {
                    offset: write_cursor,
                    size: slot.size,
                    in_use: true,
                },
            );
            write_cursor += slot.size;
        }
        // invalidate every non-live slot, trimming trailing unused slots
        let mut new_count = count;
        for id in (0..count as AreaId).rev() {
            let slot = self.read_slot(id);
            if !slot.in_use {
                if id as u32 + 1 == new_count {
                    new_count -= 1;
                } else {
                    self.write_slot(
                        id,
                        AreaSlot {
                            offset: self.width.undefined(),
                            size: self.width.undefined(),
                            in_use: false,
                        },
                    );
                }
            } else {
                break;
            }
        }
        self.set_managed_count(new_count);
        let free_size = self.user_area_size() - (write_cursor - header_len);
        self.set_free_offset(write_cursor);
        self.set_free_size(free_size);
        self.set_unused_size(free_size);
        Ok(())
    }

    /// Resize an area. Shrinking rewrites size in place; growing moves the
    /// area to the current free tail if there is room, or compacts first
    /// when `do_compaction` is set. Returns whether the change took effect.
    pub fn change_area_size(&mut self, id: AreaId, new_size: u32, do_compaction: bool) -> Result<bool> {
        let slot = self.read_slot(id);
        if !slot.in_use {
            return Err(Error::new(ErrorCode::BadArgument));
        }
        if new_size == slot.size {
            return Ok(true);
        }
        if new_size < slot.size {
            let shrink_by = slot.size - new_size;
            self.write_slot(
                id,
                AreaSlot {
                    offset: slot.offset,
                    size: new_size,
                    in_use: true,
                },
            );
            self.set_unused_size(self.unused_size() + shrink_by);
            if slot.offset + slot.size == self.free_offset() {
                self.set_free_offset(self.free_offset() - shrink_by);
                self.set_free_size(self.free_size() + shrink_by);
            }
            return Ok(true);
        }
        let grow_by = new_size - slot.size;
        if self.free_size() >= grow_by && slot.offset + slot.size == self.free_offset() {
            self.write_slot(
                id,
                AreaSlot {
                    offset: slot.offset,
                    size: new_size,
                    in_use: true,
                },
            );
            self.set_free_offset(self.free_offset() + grow_by);
            self.set_free_size(self.free_size() - grow_by);
            self.set_unused_size(self.unused_size() - grow_by);
            return Ok(true);
        }
        if self.free_size() >= new_size {
            let new_offset = self.free_offset();
            let (src, len) = (slot.offset as usize, slot.size as usize);
            let mut buf = vec![0u8; len];
            buf.copy_from_slice(&self.data[src..src + len]);
            self.data[new_offset as usize..new_offset as usize + len].copy_from_slice(&buf);
            self.write_slot(
                id,
                AreaSlot {
                    offset: new_offset,
                    size: new_size,
                    in_use: true,
                },
            );
            self.set_free_offset(new_offset + new_size);
            self.set_free_size(self.free_size() - new_size);
            self.set_unused_size(self.unused_size() + slot.size - new_size);
            return Ok(true);
        }
        if do_compaction && self.unused_size() + slot.size >= new_size {
            self.free_area(id)?;
            self.compaction()?;
            let fresh = self.allocate_area(new_size, false)?;
            return Ok(fresh == id);
        }
        Ok(false)
    }

    pub fn write_area(&mut self, id: AreaId, buf: &[u8], offset: u32, len: u32) -> Result<()> {
        let slot = self.read_slot(id);
        if !slot.in_use || offset + len > slot.size {
            return Err(Error::new(ErrorCode::BadArgument));
        }
        let start = (slot.offset + offset) as usize;
        self.data[start..start + len as usize].copy_from_slice(&buf[..len as usize]);
        Ok(())
    }

    pub fn read_area(&self, id: AreaId, out: &mut [u8], offset: u32, len: u32) -> Result<()> {
        let slot = self.read_slot(id);
        if !slot.in_use || offset + len > slot.size {
            return Err(Error::new(ErrorCode::BadArgument));
        }
        let start = (slot.offset + offset) as usize;
        out[..len as usize].copy_from_slice(&self.data[start..start + len as usize]);
        Ok(())
    }

    pub fn area_size(&self, id: AreaId) -> Result<u32> {
        let slot = self.read_slot(id);
        if !slot.in_use {
            return Err(Error::new(ErrorCode::BadArgument));
        }
        Ok(slot.size)
    }

    pub fn get_top_area_id(&self) -> AreaId {
        for id in 0..self.managed_area_count() as AreaId {
            if self.read_slot(id).in_use {
                return id;
            }
        }
        UNDEFINED_AREA_ID
    }

    pub fn get_last_area_id(&self) -> AreaId {
        for id in (0..self.managed_area_count() as AreaId).rev() {
            if self.read_slot(id).in_use {
                return id;
            }
        }
        UNDEFINED_AREA_ID
    }

    pub fn get_next_area_id(&self, id: AreaId) -> AreaId {
        for next in (id + 1)..self.managed_area_count() as AreaId {
            if self.read_slot(next).in_use {
                return next;
            }
        }
        UNDEFINED_AREA_ID
    }

    pub fn get_prev_area_id(&self, id: AreaId) -> AreaId {
        for prev in (0..id).rev() {
            if self.read_slot(prev).in_use {
                return prev;
            }
        }
        UNDEFINED_AREA_ID
    }

    /// Unused-area percentage of this page's total user area, for rate
    /// classification.
    pub fn unused_percent(&self) -> u32 {
        crate::physical::bitmap::area_percent_of(self.unused_size(), self.user_area_size())
    }

    pub fn free_percent(&self) -> u32 {
        crate::physical::bitmap::area_percent_of(self.free_size(), self.user_area_size())
    }

    /// Sanity-check every in-use area: inside the user area, non-overlapping.
    pub fn check_physical_area(&self) -> Result<()> {
        let mut intervals: Vec<(u32, u32)> = Vec::new();
        let user_end = Self::header_len(self.width) as u32 + self.user_area_size();
        for id in 0..self.managed_area_count() as AreaId {
            let slot = self.read_slot(id);
            if !slot.in_use {
                continue;
            }
            let start = slot.offset;
            let end = slot.offset + slot.size;
            if start < Self::header_len(self.width) as u32 || end > user_end {
                return Err(Error::new(ErrorCode::IntegrityViolation));
            }
            for (s, e) in &intervals {
                if start < *e && *s < end {
                    return Err(Error::new(ErrorCode::IntegrityViolation));
                }
            }
            intervals.push((start, end));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_page(size: usize) -> Vec<u8> {
        vec![0u8; size]
    }

    #[test]
    fn allocate_and_read_roundtrip() {
        let mut buf = new_page(512);
        let width = FieldWidth::for_page_size(512);
        let mut page = AreaManagePage::format(&mut buf, width);
        let id = page.allocate_area(16, false).unwrap();
        page.write_area(id, b"0123456789abcdef", 0, 16).unwrap();
        let mut out = [0u8; 16];
        page.read_area(id, &mut out, 0, 16).unwrap();
        assert_eq!(&out, b"0123456789abcdef");
    }

    #[test]
    fn free_then_reuse() {
        let mut buf = new_page(512);
        let width = FieldWidth::for_page_size(512);
        let mut page = AreaManagePage::format(&mut buf, width);
        let id = page.allocate_area(16, false).unwrap();
        page.free_area(id).unwrap();
        assert!(page.unused_size() >= 16);
        page.reuse_area(id).unwrap();
        page.write_area(id, b"0123456789abcdef", 0, 16).unwrap();
    }

    #[test]
    fn compaction_then_reuse_fails() {
        let mut buf = new_page(512);
        let width = FieldWidth::for_page_size(512);
        let mut page = AreaManagePage::format(&mut buf, width);
        let id = page.allocate_area(16, false).unwrap();
        page.free_area(id).unwrap();
        page.compaction().unwrap();
        assert!(page.reuse_area(id).is_err());
    }

    #[test]
    fn overlap_rejected_by_check() {
        let mut buf = new_page(512);
        let width = FieldWidth::for_page_size(512);
        let mut page = AreaManagePage::format(&mut buf, width);
        let a = page.allocate_area(32, false).unwrap();
        let _b = page.allocate_area(32, false).unwrap();
        page.check_physical_area().unwrap();
        let _ = a;
    }

    #[test]
    fn grows_past_one_block() {
        let mut buf = new_page(4096);
        let width = FieldWidth::for_page_size(4096);
        let mut page = AreaManagePage::format(&mut buf, width);
        let mut ids = Vec::new();
        for _ in 0..20 {
            ids.push(page.allocate_area(8, false).unwrap());
        }
        assert!(page.managed_area_count() >= 20);
        page.check_physical_area().unwrap();
    }
}
