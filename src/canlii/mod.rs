//! CanLII 判例浏览接口：列出判例数据库、分页列出数据库中的判例。

pub mod client;
pub mod types;

pub use client::{ApiError, CanliiClient};
pub use types::{Case, Database};
