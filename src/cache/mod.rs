pub mod coalesce;
pub mod key;
pub mod kv;
pub mod orchestrator;
pub mod version;

pub use coalesce::Coalescer;
pub use kv::KvChunkedStore;
pub use orchestrator::CacheOrchestrator;
pub use version::VersionService;
