use anyhow::Context;
use canlii_client::canlii::{ApiError, CanliiClient, Case};
use canlii_client::config::Config;
use canlii_client::credential::{self, DefaultLimits};
use canlii_client::quota_pool::KeyRotator;
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_RESULT_COUNT: usize = 10;
/// `-all-cases` 模式下同时进行的数据库查询数量。
const ALL_CASES_CONCURRENCY: usize = 4;

#[derive(Debug, Default, PartialEq, Eq)]
struct Args {
    database: Option<String>,
    offset: usize,
    count: usize,
    all_cases: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::load();

    init_tracing();

    let args = parse_args(std::env::args().skip(1));

    let keys = credential::load_keys(
        Path::new(&cfg.api_keys_file),
        DefaultLimits::from_config(&cfg),
    )
    .await
    .context("加载 API 密钥失败")?;

    let rotator =
        Arc::new(KeyRotator::new(&keys, cfg.window_policy).context("构建 API 密钥池失败")?);
    let client = match CanliiClient::new(&cfg, rotator.clone()) {
        Ok(c) => c,
        Err(e) => {
            rotator.shutdown();
            return Err(e.context("初始化 CanliiClient 失败"));
        }
    };

    let result = run(&client, &args).await;

    for snap in rotator.snapshot() {
        tracing::info!(
            key = %snap.masked_key,
            remaining_day = snap.remaining_day,
            remaining_second = snap.remaining_second,
            "密钥剩余配额"
        );
    }
    rotator.shutdown();

    result
}

async fn run(client: &CanliiClient, args: &Args) -> anyhow::Result<()> {
    if let Some(db) = args.database.as_deref() {
        let cases = client
            .case_list(db, args.offset, args.count)
            .await
            .with_context(|| format!("查询数据库 `{db}` 的判例失败"))?;
        print_cases(client, &cases);
        return Ok(());
    }

    let databases = client
        .database_list()
        .await
        .context("查询判例数据库列表失败")?;
    tracing::info!("共找到 {} 个判例数据库", databases.len());
    for db in &databases {
        println!("{}\t{}\t{}", db.id, db.jurisdiction, db.name);
    }

    let Some(count) = args.all_cases else {
        return Ok(());
    };

    let results: Vec<_> = stream::iter(databases.iter())
        .map(|db| async move { (db, client.case_list(&db.id, 0, count).await) })
        .buffer_unordered(ALL_CASES_CONCURRENCY)
        .collect()
        .await;

    let mut failed = 0usize;
    for (db, res) in results {
        match res {
            Ok(cases) => {
                println!("== {} ({})", db.name, db.id);
                print_cases(client, &cases);
            }
            Err(e @ ApiError::Quota(_)) => {
                failed += 1;
                tracing::warn!(database = %db.id, "配额不足，跳过：{e}");
            }
            Err(e) => {
                failed += 1;
                tracing::warn!(database = %db.id, error = ?e, "查询判例失败");
            }
        }
    }
    if failed > 0 {
        tracing::warn!("{failed} 个数据库的判例查询失败");
    }
    Ok(())
}

fn print_cases(client: &CanliiClient, cases: &[Case]) {
    for c in cases {
        println!(
            "{}\t{}\t{}",
            c.id(client.language()).unwrap_or("-"),
            c.citation,
            c.title
        );
    }
}

/// 解析 `-db <id> [-offset N] [-count N]` 与 `-all-cases N`；`-debug` 由 Config 处理。
fn parse_args(mut args: impl Iterator<Item = String>) -> Args {
    let mut out = Args {
        count: DEFAULT_RESULT_COUNT,
        ..Args::default()
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-db" => out.database = args.next().filter(|v| !v.trim().is_empty()),
            "-offset" => {
                if let Some(v) = args.next().and_then(|v| v.parse().ok()) {
                    out.offset = v;
                }
            }
            "-count" => {
                if let Some(v) = args.next().and_then(|v| v.parse().ok()) {
                    out.count = v;
                }
            }
            "-all-cases" => out.all_cases = args.next().and_then(|v| v.parse().ok()),
            "-debug" => {
                args.next();
            }
            other => tracing::warn!("忽略未知参数 `{other}`"),
        }
    }

    out
}

fn init_tracing() {
    // 依赖库日志默认控制在 warn，本项目自身日志至少为 info。
    let env = std::env::var("RUST_LOG").unwrap_or_default();
    let env = env.trim();
    let filter = if env.is_empty() {
        EnvFilter::new("warn,canlii_client=info,canlii=info")
    } else if env.contains("canlii") {
        EnvFilter::new(env)
    } else {
        EnvFilter::new(format!("{env},canlii_client=info,canlii=info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Args {
        parse_args(v.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_args_defaults() {
        assert_eq!(
            args(&[]),
            Args {
                database: None,
                offset: 0,
                count: DEFAULT_RESULT_COUNT,
                all_cases: None,
            }
        );
    }

    #[test]
    fn test_parse_args_case_list() {
        let a = args(&["-debug", "low", "-db", "abwcac", "-offset", "20", "-count", "5"]);
        assert_eq!(a.database.as_deref(), Some("abwcac"));
        assert_eq!(a.offset, 20);
        assert_eq!(a.count, 5);
    }

    #[test]
    fn test_parse_args_ignores_bad_numbers() {
        let a = args(&["-count", "x", "-all-cases", "3"]);
        assert_eq!(a.count, DEFAULT_RESULT_COUNT);
        assert_eq!(a.all_cases, Some(3));
    }
}
