pub mod store;
pub mod types;

pub use store::{DefaultLimits, load_keys};
pub use types::KeyConfig;
