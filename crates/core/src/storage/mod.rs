pub mod backup;
pub mod formula;
pub mod gaps;
pub mod lock;
pub mod sheet;
pub mod store;
pub mod xlsx;

#[cfg(test)]
pub(crate) mod memory;

pub use store::{SeriesRow, SheetStore, StoreError, StoreFile};
pub use xlsx::XlsxFile;
