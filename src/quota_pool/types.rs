use std::time::Duration;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// 配额窗口长度的计算方式。
///
/// `ScaledByLimit` 保留上游客户端的行为：每秒配额每 `call_per_second` 秒补满一次，
/// 每日配额每 `call_per_day` 天补满一次。限额为 1 时与直觉一致，大于 1 时补充周期会
/// 随限额变长，吞吐量因此低于名义值。`Fixed` 使用固定的 1 秒 / 24 小时窗口。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowPolicy {
    #[default]
    ScaledByLimit,
    Fixed,
}

impl WindowPolicy {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "fixed" | "calendar" => Self::Fixed,
            "" | "scaled" | "scaled_by_limit" => Self::ScaledByLimit,
            other => {
                tracing::warn!("未知的 QUOTA_WINDOW_MODE `{other}`，使用默认值 scaled");
                Self::ScaledByLimit
            }
        }
    }

    pub fn second_period(self, max_per_second: u32) -> Duration {
        match self {
            Self::ScaledByLimit => Duration::from_secs(u64::from(max_per_second.max(1))),
            Self::Fixed => Duration::from_secs(1),
        }
    }

    pub fn day_period(self, max_per_day: u32) -> Duration {
        match self {
            Self::ScaledByLimit => {
                Duration::from_secs(SECS_PER_DAY * u64::from(max_per_day.max(1)))
            }
            Self::Fixed => Duration::from_secs(SECS_PER_DAY),
        }
    }
}

/// 单个密钥的配额快照（用于诊断输出，key 已脱敏）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySnapshot {
    pub masked_key: String,
    pub max_per_day: u32,
    pub max_per_second: u32,
    pub remaining_day: u32,
    pub remaining_second: u32,
}

impl KeySnapshot {
    pub fn has_capacity(&self) -> bool {
        self.remaining_day > 0 && self.remaining_second > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_policy_parse() {
        assert_eq!(WindowPolicy::parse("fixed"), WindowPolicy::Fixed);
        assert_eq!(WindowPolicy::parse(" FIXED "), WindowPolicy::Fixed);
        assert_eq!(WindowPolicy::parse("scaled"), WindowPolicy::ScaledByLimit);
        assert_eq!(WindowPolicy::parse(""), WindowPolicy::ScaledByLimit);
        assert_eq!(WindowPolicy::parse("scaled_by_limit"), WindowPolicy::ScaledByLimit);
        // 拼写错误回退到默认策略（并记录警告），而不是被当成 fixed。
        assert_eq!(WindowPolicy::parse("fixd"), WindowPolicy::ScaledByLimit);
    }

    #[test]
    fn test_scaled_periods_follow_limit() {
        let p = WindowPolicy::ScaledByLimit;
        assert_eq!(p.second_period(1), Duration::from_secs(1));
        assert_eq!(p.second_period(5), Duration::from_secs(5));
        assert_eq!(p.day_period(2), Duration::from_secs(2 * 86_400));
    }

    #[test]
    fn test_fixed_periods_ignore_limit() {
        let p = WindowPolicy::Fixed;
        assert_eq!(p.second_period(5), Duration::from_secs(1));
        assert_eq!(p.day_period(1024), Duration::from_secs(86_400));
    }
}
