pub mod db_restore;
pub mod logic;

pub use logic::{RestoreOrchestrator, RestoreReport, RestoreSelection};
