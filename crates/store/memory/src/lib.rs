mod store;

pub use store::MemoryRelayStore;
