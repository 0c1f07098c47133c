pub mod storage;
pub mod tempdir;

pub use storage::FakeStorage;
pub use tempdir::unique_temp_dir;
