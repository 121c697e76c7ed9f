// 批次进度计算
//
// percent = floor(100 * Σ weighted_bytes / total_bytes)
// 对外报告的进度取历史最高值，重试导致的字节回退不会让进度条倒退

use crate::uploader::task::UploadTask;
use std::sync::atomic::{AtomicU8, Ordering};

/// 根据任务当前状态计算原始百分比
///
/// 总大小为 0 时，所有任务进入反应阶段才算 100%
pub fn compute_percent(tasks: &[UploadTask], total_bytes: u64) -> u8 {
    if tasks.is_empty() {
        return 0;
    }
    if total_bytes == 0 {
        let done = tasks.iter().all(|t| t.status.in_reaction_phase());
        return if done { 100 } else { 0 };
    }
    let weighted: u128 = tasks.iter().map(|t| t.weighted_bytes() as u128).sum();
    let percent = weighted * 100 / total_bytes as u128;
    percent.min(100) as u8
}

/// 批次进度聚合器，保存进度高水位
#[derive(Debug, Default)]
pub struct ProgressAggregator {
    high_water: AtomicU8,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 重新计算并返回对外报告的进度
    pub fn observe(&self, tasks: &[UploadTask], total_bytes: u64) -> u8 {
        let raw = compute_percent(tasks, total_bytes);
        let previous = self.high_water.fetch_max(raw, Ordering::SeqCst);
        previous.max(raw)
    }

    /// 取消或清空批次时重置
    pub fn reset(&self) {
        self.high_water.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{PipelineSelection, SampleRequest};
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn task(size: u64) -> UploadTask {
        let request = SampleRequest {
            path: PathBuf::from("/tmp/x"),
            file_name: "x".to_string(),
            groups: vec!["teamX".to_string()],
            description: None,
            tags: BTreeMap::new(),
            origin: None,
            trigger_depth: 0,
        };
        UploadTask::new(format!("/tmp/{}", size), size, request)
    }

    fn finished(size: u64) -> UploadTask {
        let mut t = task(size);
        t.begin_upload();
        t.mark_uploaded("abc", &[PipelineSelection::new("scan1", "teamX")]);
        t.begin_reactions();
        t
    }

    #[test]
    fn test_byte_weighted_percent() {
        let mut a = task(1_000_000);
        let b = task(2_000_000);
        a.begin_upload();
        a.record_progress(600_000);

        let tasks = vec![a, b];
        assert_eq!(compute_percent(&tasks, 3_000_000), 20);
    }

    #[test]
    fn test_uploaded_bytes_capped_at_99_percent() {
        let mut a = task(1000);
        a.begin_upload();
        a.record_progress(1000);
        assert_eq!(compute_percent(&[a.clone()], 1000), 99);

        a.mark_uploaded("abc", &[PipelineSelection::new("scan1", "teamX")]);
        assert_eq!(compute_percent(&[a.clone()], 1000), 99);

        a.begin_reactions();
        assert_eq!(compute_percent(&[a], 1000), 100);
    }

    #[test]
    fn test_zero_total_size() {
        assert_eq!(compute_percent(&[task(0)], 0), 0);
        assert_eq!(compute_percent(&[finished(0), finished(0)], 0), 100);
        assert_eq!(compute_percent(&[], 0), 0);
    }

    #[test]
    fn test_high_water_survives_retry() {
        let aggregator = ProgressAggregator::new();
        let mut a = task(1000);
        a.begin_upload();
        a.record_progress(500);
        assert_eq!(aggregator.observe(&[a.clone()], 1000), 50);

        a.mark_upload_failed("reset".to_string());
        a.requeue();
        assert_eq!(aggregator.observe(&[a.clone()], 1000), 50);

        aggregator.reset();
        assert_eq!(aggregator.observe(&[a], 1000), 0);
    }

    proptest! {
        #[test]
        fn percent_stays_in_bounds(
            files in prop::collection::vec((0u64..10_000_000, 0u64..=100), 1..20)
        ) {
            let mut tasks = Vec::new();
            let mut total = 0;
            for (size, pct) in files {
                let mut t = task(size);
                t.begin_upload();
                t.record_progress(size * pct / 100);
                total += size;
                tasks.push(t);
            }
            let percent = compute_percent(&tasks, total);
            prop_assert!(percent <= 99 || total == 0);
        }

        #[test]
        fn observed_percent_never_decreases(
            steps in prop::collection::vec(0u64..=1_000, 1..50)
        ) {
            let aggregator = ProgressAggregator::new();
            let mut last = 0;
            for bytes in steps {
                // 每一步都模拟一次重试后的新进度
                let mut t = task(1_000);
                t.begin_upload();
                t.record_progress(bytes);
                let percent = aggregator.observe(&[t], 1_000);
                prop_assert!(percent >= last);
                last = percent;
            }
        }
    }
}
