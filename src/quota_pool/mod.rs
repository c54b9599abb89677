//! 配额池（Quota Pool）模块。
//!
//! 每个 API 密钥带有每秒/每日两个调用配额，由后台任务按周期补满；轮询器在密钥之间
//! 按顺序挑选仍有配额的一个。所有状态只存在于本进程内存中，重启即恢复满额。

mod key;
mod replenisher;
mod rotator;
mod types;

pub use key::ApiKey;
pub use rotator::KeyRotator;
pub use types::{KeySnapshot, WindowPolicy};
