//! Disk-resident B+-tree index engine built on the free-space-managed
//! physical file layer: header/page formats, insert/expunge with
//! split/redistribute/concatenate rebalancing, a search cursor, count
//! estimation, and a parallel bitset gather.

pub mod bitset;
pub mod comparator;
pub mod cursor;
pub mod entry;
pub mod estimate;
pub mod file;
pub mod header;
pub mod page;
pub mod tree;
pub mod worker;

pub use comparator::{BytewiseComparator, KeyComparator};
pub use cursor::{Condition, SearchCursor};
pub use file::BtreeFile;
pub use tree::{TreeCore, Variant};
pub use worker::{SequentialWorkerPool, WorkerPool};
