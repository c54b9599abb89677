pub mod canlii;
pub mod config;
pub mod credential;
pub mod error;
pub mod logging;
pub mod quota_pool;
pub mod util;

pub use canlii::{ApiError, CanliiClient, Case, Database};
pub use config::Config;
pub use credential::KeyConfig;
pub use error::{AppError, QuotaError, QuotaWindow};
pub use quota_pool::{ApiKey, KeyRotator, WindowPolicy};
