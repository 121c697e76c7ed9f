// 上传准入控制
//
// 同一批次内同时处于 Uploading 的文件数不超过上限
// tokio 的 Semaphore 是公平的：许可释放时唤醒等待最久的调用者，不需要轮询

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 默认最大并发上传数
pub const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 5;

/// 上传准入控制器
#[derive(Debug, Clone)]
pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    /// 当前持有许可的任务 key
    holders: Arc<DashMap<String, ()>>,
    limit: usize,
}

impl AdmissionController {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            holders: Arc::new(DashMap::new()),
            limit,
        }
    }

    /// 等待空闲槽位
    ///
    /// 信号量只会在 `close` 后返回错误，这里从不关闭，所以 None 只在关闭后出现
    pub async fn acquire(&self, key: &str) -> Option<AdmissionPermit> {
        let permit = self.semaphore.clone().acquire_owned().await.ok()?;
        Some(self.grant(key, permit))
    }

    /// 等待空闲槽位，批次被取消时放弃等待并返回 None
    ///
    /// 取消和许可同时就绪时优先取消，取消后的批次不再准入新任务
    pub async fn acquire_or_cancel(
        &self,
        key: &str,
        token: &CancellationToken,
    ) -> Option<AdmissionPermit> {
        if token.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("等待准入时批次已取消: key={}", key);
                None
            }
            permit = self.acquire(key) => permit,
        }
    }

    fn grant(&self, key: &str, permit: OwnedSemaphorePermit) -> AdmissionPermit {
        self.holders.insert(key.to_string(), ());
        debug!(
            "准入上传: key={}, 在途={}/{}",
            key,
            self.in_flight(),
            self.limit
        );
        AdmissionPermit {
            key: key.to_string(),
            holders: self.holders.clone(),
            _permit: permit,
        }
    }

    /// 当前持有许可的任务数
    pub fn in_flight(&self) -> usize {
        self.limit - self.semaphore.available_permits()
    }

    /// 当前持有许可的任务 key（无序）
    pub fn holders(&self) -> Vec<String> {
        self.holders.iter().map(|e| e.key().clone()).collect()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// 上传许可，drop 时归还槽位
#[derive(Debug)]
pub struct AdmissionPermit {
    key: String,
    holders: Arc<DashMap<String, ()>>,
    _permit: OwnedSemaphorePermit,
}

impl AdmissionPermit {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// 显式归还槽位
    pub fn release(self) {}
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.holders.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_limit_enforced() {
        let admission = AdmissionController::new(2);
        let a = admission.acquire("a").await.unwrap();
        let _b = admission.acquire("b").await.unwrap();
        assert_eq!(admission.in_flight(), 2);

        // 第三个必须等待
        let waiting = tokio::time::timeout(Duration::from_millis(20), admission.acquire("c")).await;
        assert!(waiting.is_err());

        a.release();
        assert_eq!(admission.in_flight(), 1);
        let c = tokio::time::timeout(Duration::from_millis(100), admission.acquire("c"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(c.key(), "c");

        let mut holders = admission.holders();
        holders.sort();
        assert_eq!(holders, vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn test_waiters_are_woken_in_fifo_order() {
        let admission = AdmissionController::new(1);
        let first = admission.acquire("first").await.unwrap();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for name in ["w1", "w2", "w3"] {
            let admission = admission.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let permit = admission.acquire(name).await.unwrap();
                order.lock().push(name);
                tokio::time::sleep(Duration::from_millis(2)).await;
                drop(permit);
            }));
            // 保证入队顺序
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec!["w1", "w2", "w3"]);
    }

    #[tokio::test]
    async fn test_acquire_or_cancel_returns_none_after_cancel() {
        let admission = AdmissionController::new(1);
        let token = CancellationToken::new();
        let _held = admission.acquire("a").await.unwrap();

        let waiter = {
            let admission = admission.clone();
            let token = token.clone();
            tokio::spawn(async move { admission.acquire_or_cancel("b", &token).await.is_none() })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        assert!(waiter.await.unwrap());

        // 已取消的令牌即使有空位也不准入
        let admission = AdmissionController::new(1);
        assert!(admission.acquire_or_cancel("c", &token).await.is_none());
        assert_eq!(admission.in_flight(), 0);
    }

    #[test]
    fn test_zero_limit_clamped() {
        assert_eq!(AdmissionController::new(0).limit(), 1);
    }
}
