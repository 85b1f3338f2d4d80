//! # Recache Store
//!
//! 記憶體內持久層實作（唯一性約束、原子寫入、寫入日誌、故障注入）

pub mod journal;
pub mod memory;

// Re-export 主要類型
pub use journal::WriteJournal;
pub use memory::MemoryStore;
