/// Container-aware CPU limit detection for sizing the tokio worker pool.
///
/// Checked in order: `WORKER_CPU_LIMIT` env var ("2" or "2000m"), cgroup v2
/// `cpu.max`, cgroup v1 cfs quota/period, then host CPU count. Without this
/// tokio spawns one worker per host core, which over-provisions threads when
/// the container is limited to a fraction of the host.
///
/// Runs before tracing is initialized, hence `eprintln!`.
pub fn get_container_cpu_limit() -> usize {
    if let Ok(value) = std::env::var("WORKER_CPU_LIMIT") {
        if let Some(cores) = parse_cpu_value(&value) {
            let threads = cores.max(1);
            eprintln!("[runtime] worker threads from WORKER_CPU_LIMIT: {}", threads);
            return threads;
        }
    }

    if let Ok(content) = std::fs::read_to_string("/sys/fs/cgroup/cpu.max") {
        if let Some(cores) = parse_quota_period(&content) {
            let threads = cores.max(1);
            eprintln!("[runtime] worker threads from cgroup v2: {}", threads);
            return threads;
        }
    }

    if let (Ok(quota), Ok(period)) = (
        std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_quota_us"),
        std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_period_us"),
    ) {
        if let Some(cores) = parse_quota_period(&format!("{} {}", quota.trim(), period.trim())) {
            let threads = cores.max(1);
            eprintln!("[runtime] worker threads from cgroup v1: {}", threads);
            return threads;
        }
    }

    let threads = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1);
    eprintln!("[runtime] worker threads from host CPU count: {}", threads);
    threads
}

/// "2" (cores) or "2000m" (millicores).
fn parse_cpu_value(value: &str) -> Option<usize> {
    let value = value.trim();
    if let Some(millis) = value.strip_suffix('m') {
        millis.parse::<usize>().ok().map(|m| m / 1000)
    } else {
        value.parse::<usize>().ok()
    }
}

/// "quota period" pairs as found in cgroup v2 `cpu.max` (and reassembled for
/// v1). "max" or non-positive quota means unlimited.
fn parse_quota_period(content: &str) -> Option<usize> {
    let mut parts = content.split_whitespace();
    let quota = parts.next()?;
    let period = parts.next()?;
    if quota == "max" {
        return None;
    }
    let quota: i64 = quota.parse().ok()?;
    let period: i64 = period.parse().ok()?;
    if quota > 0 && period > 0 {
        Some((quota / period) as usize)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_value() {
        assert_eq!(parse_cpu_value("4"), Some(4));
        assert_eq!(parse_cpu_value("  8  "), Some(8));
        assert_eq!(parse_cpu_value("4000m"), Some(4));
        assert_eq!(parse_cpu_value("500m"), Some(0)); // 0.5 cores → 0, caller clamps to 1
        assert_eq!(parse_cpu_value("abc"), None);
    }

    #[test]
    fn test_parse_quota_period() {
        assert_eq!(parse_quota_period("400000 100000"), Some(4));
        assert_eq!(parse_quota_period("200000 100000"), Some(2));
        assert_eq!(parse_quota_period("max 100000"), None);
        assert_eq!(parse_quota_period("-1 100000"), None);
        assert_eq!(parse_quota_period(""), None);
    }
}
