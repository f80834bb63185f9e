mod sled_log;
mod sled_store;

pub use sled_log::{DeadLetter, SledEventLog};
pub use sled_store::SledProductRepository;
