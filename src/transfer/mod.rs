pub mod finalize;
pub mod storage;

pub use finalize::{Disposition, FinalizeJob, Finalizer};
pub use storage::{find_available_path, relocate_file};
