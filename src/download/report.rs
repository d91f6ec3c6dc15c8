//! 结果汇总与大小格式化。

use super::models::ResultTally;
use super::verify::{Discrepancy, DiscrepancyKind};

pub fn format_size(size: u64) -> String {
    if size == 0 {
        return "大小未知".to_string();
    }
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

pub fn summary_lines(tally: &ResultTally) -> Vec<String> {
    let mut lines = vec![
        "=".repeat(50),
        format!("下载完成: {}/{} 个文件", tally.completed, tally.total),
    ];
    if !tally.failed.is_empty() {
        lines.push(format!("下载失败: {} 个文件", tally.failed.len()));
        lines.extend(tally.failed.iter().map(|f| format!("  - {f}")));
    }
    lines
}

pub fn discrepancy_lines(found: &[Discrepancy]) -> Vec<String> {
    if found.is_empty() {
        return vec!["所有本地文件与远程文件匹配。".to_string()];
    }
    let mut lines = vec!["不匹配的文件：".to_string()];
    for d in found {
        let detail = match d.kind {
            DiscrepancyKind::SizeMismatch | DiscrepancyKind::NotFound => {
                let local = d.local_value.parse::<u64>().map(format_size);
                let remote = d.remote_value.parse::<u64>().map(format_size);
                format!(
                    "本地: {}, 远程: {}",
                    local.unwrap_or_else(|_| d.local_value.clone()),
                    remote.unwrap_or_else(|_| d.remote_value.clone())
                )
            }
            DiscrepancyKind::ChecksumMismatch => {
                format!("本地: {}, 远程: {}", d.local_value, d.remote_value)
            }
        };
        lines.push(format!("  {}: {} ({detail})", d.path, d.kind));
    }
    lines
}
