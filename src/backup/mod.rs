pub mod allocator;
pub mod catalog;
pub mod db_dump;
pub mod logic;

pub use allocator::BackupAllocator;
pub use catalog::BackupCatalog;
pub use logic::BackupOrchestrator;
