//! Repository implementations for the ProcGuard ledger: [`PostgresRepository`]
//! for production, [`MemoryRepository`] for tests. Both implement
//! `procguard_core::repository::Repository` so the Lifecycle Engine is
//! oblivious to which one it is talking to.

pub mod memory;
pub mod postgres;

pub use memory::MemoryRepository;
pub use postgres::PostgresRepository;
