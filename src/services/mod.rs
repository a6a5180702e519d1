pub mod catalog;
pub mod cleanup;
pub mod scan_lock;
pub mod scanner;

pub use catalog::{Catalog, CatalogError, ScanOutcome};
pub use cleanup::{CleanupReport, CleanupSweep};
pub use scan_lock::{ScanLock, ScanMode, ScanState};
pub use scanner::{ScanError, ScanReport, Scanner};
