//! Free-space-managed physical file layer: page allocator and free-space
//! index that the B+-tree relies on to allocate variable-sized areas within
//! fixed-size pages.

pub mod area;
pub mod bitmap;
pub mod codec;
pub mod file;
pub mod table;

pub use area::{AreaId, AreaManagePage, UNDEFINED_AREA_ID};
pub use file::{AreaManageFile, CreateParams};
pub use table::AreaManageTable;
