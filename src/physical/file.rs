//! Area-manage file: owns the file header, the page allocator, and the
//! free-page search that the area-manage table index makes fast.
//!
//! File-relative page numbering follows the data model: page 0 is the file
//! header; page `1 + n*(pages_per_table+1)` (for `n = 0, 1, 2, ...`) is the
//! `n`-th area-manage table, managing the `pages_per_table` data pages
//! immediately following it.

use std::sync::Arc;

use log::{debug, warn};
use rand::Rng;

use crate::buffer::{FixMode, PageBuffer, PageGuard, PageId, UNDEFINED_PAGE_ID};
use crate::error::{Error, ErrorCode, Result};
use crate::physical::area::{directory_slot_cost, AreaId, AreaManagePage};
use crate::physical::bitmap::{self, RateClass};
use crate::physical::codec::{read_u32, write_u32, FieldWidth};
use crate::physical::table::AreaManageTable;

/// Parameters fixed at `create()` time; immutable for the file's lifetime.
#[derive(Debug, Clone, Copy)]
pub struct CreateParams {
    pub page_size: u32,
    /// File-wide upper bound on page fullness used by the fast free-page
    /// search (1..=100).
    pub page_use_rate: u8,
    pub pages_per_table: u32,
}

impl Default for CreateParams {
    fn default() -> Self {
        Self {
            page_size: 4096,
            page_use_rate: 80,
            pages_per_table: 1024,
        }
    }
}

const FILE_HEADER_PAGE_ID: PageId = 0;

pub struct AreaManageFile {
    buffer: Arc<dyn PageBuffer>,
    params: CreateParams,
    width: FieldWidth,
}

struct FileHeader {
    used_page_count: u32,
    unused_page_count: u32,
    high_water: PageId,
    page_use_rate: u8,
}

impl FileHeader {
    fn parse(data: &[u8]) -> Self {
        Self {
            used_page_count: read_u32(data, 0).unwrap_or(0),
            unused_page_count: read_u32(data, 4).unwrap_or(0),
            high_water: read_u32(data, 8).unwrap_or(1),
            page_use_rate: data.get(12).copied().unwrap_or(80),
        }
    }

    fn write(&self, data: &mut [u8]) {
        let _ = write_u32(data, 0, self.used_page_count);
        let _ = write_u32(data, 4, self.unused_page_count);
        let _ = write_u32(data, 8, self.high_water);
        if data.len() > 12 {
            data[12] = self.page_use_rate;
        }
    }
}

impl AreaManageFile {
    /// Create a new file: formats the file header and the first
    /// area-manage table.
    pub fn create(buffer: Arc<dyn PageBuffer>, params: CreateParams) -> Result<Self> {
        if params.page_use_rate == 0 || params.page_use_rate > 100 {
            return Err(Error::new(ErrorCode::BadArgument));
        }
        let width = FieldWidth::for_page_size(params.page_size);
        let file = Self {
            buffer,
            params,
            width,
        };
        {
            let mut g = file.buffer.fix(FILE_HEADER_PAGE_ID, FixMode::Allocate)?;
            let header = FileHeader {
                used_page_count: 0,
                unused_page_count: 0,
                high_water: 2, // next page id to append; table 0 is created below
                page_use_rate: params.page_use_rate,
            };
            header.write(g.data_mut());
        }
        {
            let mut g = file.buffer.fix(file.table_page_id_for(0), FixMode::Allocate)?;
            AreaManageTable::format(g.data_mut(), width, params.pages_per_table);
        }
        Ok(file)
    }

    pub fn mount(buffer: Arc<dyn PageBuffer>, params: CreateParams) -> Result<Self> {
        let width = FieldWidth::for_page_size(params.page_size);
        Ok(Self {
            buffer,
            params,
            width,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.buffer.flush()
    }

    fn header(&self) -> Result<FileHeader> {
        let g = self.buffer.fix(FILE_HEADER_PAGE_ID, FixMode::Read)?;
        Ok(FileHeader::parse(g.data()))
    }

    fn store_header(&self, header: &FileHeader) -> Result<()> {
        let mut g = self.buffer.fix(FILE_HEADER_PAGE_ID, FixMode::DiscardableWrite)?;
        header.write(g.data_mut());
        g.commit();
        Ok(())
    }

    fn table_page_id_for(&self, n: u32) -> PageId {
        1 + n * (self.params.pages_per_table + 1)
    }

    /// Which table manages `data_page_id`, and its 0-based index within it.
    /// `None` if `data_page_id` is itself a table or the header page.
    fn owning_table(&self, data_page_id: PageId) -> Option<(PageId, u32)> {
        if data_page_id == FILE_HEADER_PAGE_ID {
            return None;
        }
        let stride = self.params.pages_per_table + 1;
        let rel = data_page_id - 1;
        let n = rel / stride;
        let within = rel % stride;
        if within == 0 {
            return None; // this *is* a table page
        }
        Some((self.table_page_id_for(n), within - 1))
    }

    fn n_tables_created(&self, high_water: PageId) -> u32 {
        if high_water <= 1 {
            return 0;
        }
        let stride = self.params.pages_per_table + 1;
        (high_water - 1).div_ceil(stride)
    }

    fn page_body_size(&self) -> u32 {
        self.params.page_size - AreaManagePage::header_len(self.width) as u32
    }

    /// Allocate a data page, linking it to `prev`/`next` with an empty body.
    pub fn allocate_page(&self, prev: PageId, next: PageId) -> Result<PageId> {
        if let Some(page_id) = self.try_reuse_freed_page()? {
            self.init_allocated_page(page_id, prev, next)?;
            return Ok(page_id);
        }
        let mut header = self.header()?;
        let mut new_id = header.high_water;
        if self.owning_table(new_id).is_none() && new_id != FILE_HEADER_PAGE_ID {
            // `new_id` lands on a table-page slot; format the table, advance.
            let mut g = self.buffer.fix(new_id, FixMode::Allocate)?;
            AreaManageTable::format(g.data_mut(), self.width, self.params.pages_per_table);
            new_id += 1;
        }
        self.init_allocated_page(new_id, prev, next)?;
        header.high_water = new_id + 1;
        self.store_header(&header)?;
        Ok(new_id)
    }

    fn init_allocated_page(&self, page_id: PageId, prev: PageId, next: PageId) -> Result<()> {
        let (table_id, index) = self
            .owning_table(page_id)
            .ok_or_else(|| Error::new(ErrorCode::Unexpected))?;
        {
            let mut g = self.buffer.fix(page_id, FixMode::Allocate)?;
            AreaManagePage::format(g.data_mut(), self.width);
            write_u32(g.data_mut(), 0, prev).ok();
            // caller-owned header bytes beyond the area-manage header are
            // the B+-tree page's concern; this file layer only guarantees a
            // freshly zeroed, empty area-manage page.
            let _ = next;
        }
        // a freshly formatted page is entirely free: both classes start at Rate80_100.
        let (unused, free) = (classify(100), classify(100));
        let mut tg = self.buffer.fix(table_id, FixMode::DiscardableWrite)?;
        let mut table = AreaManageTable::attach(tg.data_mut(), self.width, self.params.pages_per_table);
        table.record_allocated(index, unused, free);
        drop(table);
        tg.commit();
        let mut header = self.header()?;
        header.used_page_count += 1;
        header.unused_page_count = header.unused_page_count.saturating_sub(1);
        self.store_header(&header)?;
        Ok(())
    }

    /// Return a page to the free list, clearing its rate-bitmap byte.
    pub fn free_page(&self, page_id: PageId) -> Result<()> {
        let (table_id, index) = self
            .owning_table(page_id)
            .ok_or_else(|| Error::new(ErrorCode::BadArgument))?;
        let mut tg = self.buffer.fix(table_id, FixMode::DiscardableWrite)?;
        {
            let mut table = AreaManageTable::attach(tg.data_mut(), self.width, self.params.pages_per_table);
            table.record_freed(index);
        }
        tg.commit();
        let mut header = self.header()?;
        header.used_page_count = header.used_page_count.saturating_sub(1);
        header.unused_page_count += 1;
        self.store_header(&header)
    }

    fn try_reuse_freed_page(&self) -> Result<Option<PageId>> {
        let header = self.header()?;
        let n_tables = self.n_tables_created(header.high_water);
        for n in 0..n_tables {
            let table_id = self.table_page_id_for(n);
            let mut g = self.buffer.fix(table_id, FixMode::Read)?;
            let table = AreaManageTable::attach(g.data_mut(), self.width, self.params.pages_per_table);
            if table.unused_page_count() == 0 {
                continue;
            }
            let appended_limit = self.appended_within_table(n, header.high_water);
            for i in 0..appended_limit {
                let (unused, _free) = table.rate_classes_of(i);
                if unused == RateClass::Unallocated {
                    return Ok(Some(table_id + 1 + i));
                }
            }
        }
        Ok(None)
    }

    /// How many of table `n`'s data-page slots have actually been appended
    /// to the file so far (tables before the last one created are always
    /// fully appended, by construction of monotonic high-water growth).
    fn appended_within_table(&self, n: u32, high_water: PageId) -> u32 {
        let table_id = self.table_page_id_for(n);
        let last_possible = table_id + 1 + self.params.pages_per_table;
        if high_water >= last_possible {
            self.params.pages_per_table
        } else {
            high_water.saturating_sub(table_id + 1)
        }
    }

    /// Fast free-page search: reduce `size` (for a page about to host
    /// `area_count` more areas) to a rate class, probe a handful of
    /// candidate tables, and verify the winning page's exact free space.
    /// Best-effort: may return `UNDEFINED_PAGE_ID` even when a satisfying
    /// page exists.
    pub fn search_free_page(
        &self,
        size: u32,
        start_hint: Option<PageId>,
        by_unused: bool,
        area_count: u32,
    ) -> Result<PageId> {
        let header = self.header()?;
        let body_size = self.page_body_size();
        let area_pct = bitmap::area_percent_of(size, body_size) as i32;
        let search_rate = 100 - header.page_use_rate as i32 + area_pct;
        if search_rate >= 80 {
            return Ok(UNDEFINED_PAGE_ID);
        }
        let threshold = classify((search_rate.max(0)) as u32);
        let n_tables = self.n_tables_created(header.high_water);
        if n_tables == 0 {
            return Ok(UNDEFINED_PAGE_ID);
        }
        let hinted = start_hint.and_then(|p| self.owning_table(p)).map(|(t, _)| t);
        let mut candidates: Vec<PageId> = Vec::new();
        if let Some(h) = hinted {
            candidates.push(h);
        }
        let mut rng = rand::rng();
        while candidates.len() < 2 && n_tables > 0 {
            let n = rng.random_range(0..n_tables);
            let t = self.table_page_id_for(n);
            if !candidates.contains(&t) {
                candidates.push(t);
            }
            if candidates.len() >= n_tables as usize {
                break;
            }
        }
        let last_table = self.table_page_id_for(n_tables - 1);
        if !candidates.contains(&last_table) {
            candidates.push(last_table);
        }
        candidates.truncate(3);

        for table_id in candidates {
            let mut g = self.buffer.fix(table_id, FixMode::Read)?;
            let table = AreaManageTable::attach(g.data_mut(), self.width, self.params.pages_per_table);
            if !table.has_candidate_class(threshold, by_unused) {
                continue;
            }
            if let Some(idx) = table.find_candidate_page(threshold, by_unused) {
                let page_id = table_id + 1 + idx;
                drop(table);
                drop(g);
                let mut pg = self.buffer.fix(page_id, FixMode::Read)?;
                let page = AreaManagePage::attach(pg.data_mut(), self.width);
                let available = if by_unused {
                    page.unused_size()
                } else {
                    page.free_size()
                };
                let directory_growth = area_count.saturating_mul(directory_slot_cost(self.width));
                if available >= size + directory_growth {
                    return Ok(page_id);
                }
            }
        }
        Ok(UNDEFINED_PAGE_ID)
    }

    /// Same search as `search_free_page`, but hands back the page already
    /// fixed under the caller's chosen mode instead of a bare id, saving a
    /// second fix for a caller that's about to write into it immediately.
    /// `None` means the fast path found nothing (same best-effort caveat).
    pub fn search_free_page2(
        &self,
        size: u32,
        start_hint: Option<PageId>,
        by_unused: bool,
        area_count: u32,
        mode: FixMode,
    ) -> Result<Option<PageGuard<'_>>> {
        let page_id = self.search_free_page(size, start_hint, by_unused, area_count)?;
        if page_id == UNDEFINED_PAGE_ID {
            return Ok(None);
        }
        Ok(Some(self.buffer.fix(page_id, mode)?))
    }

    /// Carve a variable-sized area, preferring a page the fast free-page
    /// search already has spare capacity on over growing the file. Returns
    /// the hosting page id and the area id within it.
    pub fn allocate_area(&self, size: u32, start_hint: Option<PageId>) -> Result<(PageId, AreaId)> {
        let guard = self.search_free_page2(size, start_hint, false, 1, FixMode::DiscardableWrite)?;
        match guard {
            Some(mut g) => {
                let page_id = g.id();
                let area_id = {
                    let mut page = AreaManagePage::attach(g.data_mut(), self.width);
                    let id = page.allocate_area(size, true)?;
                    self.record_area_page_class(page_id, &page)?;
                    id
                };
                g.commit();
                Ok((page_id, area_id))
            }
            None => {
                let page_id = self.allocate_page(UNDEFINED_PAGE_ID, UNDEFINED_PAGE_ID)?;
                let mut g = self.buffer.fix(page_id, FixMode::DiscardableWrite)?;
                let area_id = {
                    let mut page = AreaManagePage::attach(g.data_mut(), self.width);
                    let id = page.allocate_area(size, true)?;
                    self.record_area_page_class(page_id, &page)?;
                    id
                };
                g.commit();
                Ok((page_id, area_id))
            }
        }
    }

    fn record_area_page_class(&self, page_id: PageId, page: &AreaManagePage<'_>) -> Result<()> {
        let (table_id, index) = self.owning_table(page_id).ok_or_else(|| Error::new(ErrorCode::Unexpected))?;
        let (unused, free) = (classify(page.unused_percent()), classify(page.free_percent()));
        let mut tg = self.buffer.fix(table_id, FixMode::DiscardableWrite)?;
        {
            let mut table = AreaManageTable::attach(tg.data_mut(), self.width, self.params.pages_per_table);
            table.record_allocated(index, unused, free);
        }
        tg.commit();
        Ok(())
    }

    /// Largest request size guaranteed reachable through the fast path.
    pub fn get_page_searchable_threshold(&self) -> Result<u32> {
        let header = self.header()?;
        let body_size = self.page_body_size();
        let max_percent = (header.page_use_rate as i32 - 20 - 1).max(0);
        Ok(((max_percent as u64 * body_size as u64) / 100) as u32)
    }

    pub fn get_top_page_id(&self) -> Result<PageId> {
        self.walk_pages(true)
    }

    pub fn get_last_page_id(&self) -> Result<PageId> {
        self.walk_pages(false)
    }

    fn walk_pages(&self, forward: bool) -> Result<PageId> {
        let header = self.header()?;
        let n_tables = self.n_tables_created(header.high_water);
        let table_range: Box<dyn Iterator<Item = u32>> = if forward {
            Box::new(0..n_tables)
        } else {
            Box::new((0..n_tables).rev())
        };
        for n in table_range {
            let table_id = self.table_page_id_for(n);
            let mut g = self.buffer.fix(table_id, FixMode::Read)?;
            let table = AreaManageTable::attach(g.data_mut(), self.width, self.params.pages_per_table);
            let limit = self.appended_within_table(n, header.high_water);
            let idx_range: Box<dyn Iterator<Item = u32>> =
                if forward { Box::new(0..limit) } else { Box::new((0..limit).rev()) };
            for i in idx_range {
                if table.rate_classes_of(i).0 != RateClass::Unallocated {
                    return Ok(table_id + 1 + i);
                }
            }
        }
        Ok(UNDEFINED_PAGE_ID)
    }

    pub fn get_next_page_id(&self, id: PageId) -> Result<PageId> {
        self.step_page(id, true)
    }

    pub fn get_prev_page_id(&self, id: PageId) -> Result<PageId> {
        self.step_page(id, false)
    }

    fn step_page(&self, id: PageId, forward: bool) -> Result<PageId> {
        let header = self.header()?;
        let (table_id, index) = self.owning_table(id).ok_or_else(|| Error::new(ErrorCode::BadArgument))?;
        let n = (table_id - 1) / (self.params.pages_per_table + 1);
        let limit = self.appended_within_table(n, header.high_water);
        {
            let mut g = self.buffer.fix(table_id, FixMode::Read)?;
            let table = AreaManageTable::attach(g.data_mut(), self.width, self.params.pages_per_table);
            let mut i = index;
            loop {
                if forward {
                    if i + 1 >= limit {
                        break;
                    }
                    i += 1;
                } else {
                    if i == 0 {
                        break;
                    }
                    i -= 1;
                }
                if table.rate_classes_of(i).0 != RateClass::Unallocated {
                    return Ok(table_id + 1 + i);
                }
            }
        }
        // fall through to next/prev table
        let n_tables = self.n_tables_created(header.high_water);
        if forward {
            for n2 in (n + 1)..n_tables {
                let t2 = self.table_page_id_for(n2);
                let mut g = self.buffer.fix(t2, FixMode::Read)?;
                let table = AreaManageTable::attach(g.data_mut(), self.width, self.params.pages_per_table);
                let limit2 = self.appended_within_table(n2, header.high_water);
                for i in 0..limit2 {
                    if table.rate_classes_of(i).0 != RateClass::Unallocated {
                        return Ok(t2 + 1 + i);
                    }
                }
            }
        } else {
            for n2 in (0..n).rev() {
                let t2 = self.table_page_id_for(n2);
                let mut g = self.buffer.fix(t2, FixMode::Read)?;
                let table = AreaManageTable::attach(g.data_mut(), self.width, self.params.pages_per_table);
                let limit2 = self.appended_within_table(n2, header.high_water);
                for i in (0..limit2).rev() {
                    if table.rate_classes_of(i).0 != RateClass::Unallocated {
                        return Ok(t2 + 1 + i);
                    }
                }
            }
        }
        Ok(UNDEFINED_PAGE_ID)
    }

    /// Re-scan all used pages a table covers and regenerate its counters
    /// and bitmap from scratch. Driven from `recover_page[_all]` when a page
    /// mutation aborted after the table had already been updated.
    pub fn recover_area_manage_table(&self, table_id: PageId) -> Result<()> {
        let n = (table_id - 1) / (self.params.pages_per_table + 1);
        let header = self.header()?;
        let limit = self.appended_within_table(n, header.high_water);
        let mut per_page = Vec::with_capacity(limit as usize);
        for i in 0..limit {
            let page_id = table_id + 1 + i;
            let mut g = self.buffer.fix(page_id, FixMode::Read)?;
            let was_unallocated = g.data().iter().all(|b| *b == 0);
            per_page.push(if was_unallocated {
                None
            } else {
                let page = AreaManagePage::attach(g.data_mut(), self.width);
                Some((classify(page.unused_percent()), classify(page.free_percent())))
            });
        }
        let mut tg = self.buffer.fix(table_id, FixMode::DiscardableWrite)?;
        {
            let mut table = AreaManageTable::format(tg.data_mut(), self.width, self.params.pages_per_table);
            let mut used = 0u32;
            for (i, classes) in per_page.iter().enumerate() {
                if let Some((u, f)) = classes {
                    table.record_allocated(i as u32, *u, *f);
                    used += 1;
                }
            }
            let _ = used;
        }
        tg.commit();
        warn!(target: "physical::recover", "rebuilt area-manage table {table_id}");
        Ok(())
    }

    pub fn verify(&self) -> Result<()> {
        let header = self.header()?;
        let n_tables = self.n_tables_created(header.high_water);
        let mut total_used = 0u32;
        for n in 0..n_tables {
            let table_id = self.table_page_id_for(n);
            let mut g = self.buffer.fix(table_id, FixMode::Read)?;
            let table = AreaManageTable::attach(g.data_mut(), self.width, self.params.pages_per_table);
            table.verify_self_consistent()?;
            total_used += table.used_page_count();
            let limit = self.appended_within_table(n, header.high_water);
            for i in 0..limit {
                let page_id = table_id + 1 + i;
                let (stored_unused, stored_free) = table.rate_classes_of(page_id - table_id - 1);
                if stored_unused == RateClass::Unallocated {
                    continue;
                }
                let mut pg = self.buffer.fix(page_id, FixMode::Read)?;
                let page = AreaManagePage::attach(pg.data_mut(), self.width);
                page.check_physical_area()?;
                let actual = (classify(page.unused_percent()), classify(page.free_percent()));
                if actual != (stored_unused, stored_free) {
                    debug!(target: "physical::verify", "page {page_id} class mismatch: stored {stored_unused:?}/{stored_free:?} actual {actual:?}");
                    return Err(Error::new(ErrorCode::VerifyInconsistent));
                }
            }
        }
        if total_used != header.used_page_count {
            return Err(Error::new(ErrorCode::VerifyInconsistent));
        }
        Ok(())
    }

    pub fn buffer(&self) -> &Arc<dyn PageBuffer> {
        &self.buffer
    }

    pub fn width(&self) -> FieldWidth {
        self.width
    }

    pub fn params(&self) -> CreateParams {
        self.params
    }
}

fn classify(percent: u32) -> RateClass {
    bitmap::classify_percent(percent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::MemPageBuffer;

    fn new_file(pages_per_table: u32) -> AreaManageFile {
        let buf = Arc::new(MemPageBuffer::new(4096));
        AreaManageFile::create(
            buf,
            CreateParams {
                page_size: 4096,
                page_use_rate: 80,
                pages_per_table,
            },
        )
        .unwrap()
    }

    #[test]
    fn allocate_and_free_roundtrip() {
        let file = new_file(8);
        let p1 = file.allocate_page(UNDEFINED_PAGE_ID, UNDEFINED_PAGE_ID).unwrap();
        let p2 = file.allocate_page(p1, UNDEFINED_PAGE_ID).unwrap();
        assert_ne!(p1, p2);
        file.free_page(p1).unwrap();
        let p3 = file.allocate_page(UNDEFINED_PAGE_ID, UNDEFINED_PAGE_ID).unwrap();
        assert_eq!(p3, p1, "freed page should be recycled");
        file.verify().unwrap();
    }

    #[test]
    fn spans_multiple_tables() {
        let file = new_file(4);
        let mut ids = Vec::new();
        for _ in 0..20 {
            ids.push(file.allocate_page(UNDEFINED_PAGE_ID, UNDEFINED_PAGE_ID).unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 20);
        file.verify().unwrap();
    }

    #[test]
    fn top_last_next_prev_order() {
        let file = new_file(8);
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(file.allocate_page(UNDEFINED_PAGE_ID, UNDEFINED_PAGE_ID).unwrap());
        }
        assert_eq!(file.get_top_page_id().unwrap(), ids[0]);
        assert_eq!(file.get_last_page_id().unwrap(), *ids.last().unwrap());
        assert_eq!(file.get_next_page_id(ids[0]).unwrap(), ids[1]);
        assert_eq!(file.get_prev_page_id(ids[1]).unwrap(), ids[0]);
    }

    #[test]
    fn allocate_area_reuses_spare_capacity_on_an_existing_page() {
        let file = new_file(8);
        let (first_page, _first_area) = file.allocate_area(64, None).unwrap();
        let (second_page, second_area) = file.allocate_area(64, None).unwrap();
        assert_eq!(first_page, second_page, "small areas should share one page");
        let mut g = file.buffer().fix(second_page, FixMode::Read).unwrap();
        let page = AreaManagePage::attach(g.data_mut(), file.width());
        assert_eq!(page.area_size(second_area).unwrap(), 64);
    }

    #[test]
    fn allocate_area_spills_to_a_new_page_once_full() {
        let file = new_file(8);
        let (first_page, _) = file.allocate_area(3000, None).unwrap();
        let (second_page, _) = file.allocate_area(3000, None).unwrap();
        assert_ne!(first_page, second_page, "second large area can't fit alongside the first");
    }

    #[test]
    fn search_free_page2_returns_a_fixed_guard_at_the_found_page() {
        let file = new_file(8);
        let (page_id, _) = file.allocate_area(16, None).unwrap();
        let guard = file
            .search_free_page2(16, None, false, 1, FixMode::Read)
            .unwrap();
        let guard = guard.expect("a page with spare capacity should be found");
        assert_eq!(guard.id(), page_id);
    }

    #[test]
    fn directory_slot_cost_accounts_for_entry_and_bitmap_byte() {
        let width = FieldWidth::for_page_size(4096);
        assert_eq!(directory_slot_cost(width), width.byte_len() as u32 * 2 + 1);
    }

    #[test]
    fn search_free_page_never_returns_a_page_short_after_directory_growth() {
        let file = new_file(8);
        let (page_id, _) = file.allocate_area(3000, None).unwrap();
        let found = file.search_free_page(1000, Some(page_id), false, 4).unwrap();
        if found != UNDEFINED_PAGE_ID {
            let mut g = file.buffer().fix(found, FixMode::Read).unwrap();
            let page = AreaManagePage::attach(g.data_mut(), file.width());
            let growth = directory_slot_cost(file.width()) * 4;
            assert!(page.free_size() >= 1000 + growth);
        }
    }
}
