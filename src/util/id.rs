use uuid::Uuid;

/// 单次后端请求的追踪 ID，只用于日志关联。
pub fn request_id() -> String {
    format!("req-{}", Uuid::new_v4().simple())
}
