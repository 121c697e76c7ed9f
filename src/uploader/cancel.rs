// 批次取消控制
//
// 每个批次一个取消令牌，取消是一次性的；重新上传前必须换发新令牌

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Default)]
pub struct CancellationController {
    token: RwLock<CancellationToken>,
}

impl CancellationController {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前令牌的克隆，上传驱动在准入前取一次
    pub fn token(&self) -> CancellationToken {
        self.token.read().clone()
    }

    /// 取消当前令牌，返回本次调用是否真正执行了取消
    pub fn abort(&self) -> bool {
        let token = self.token.read();
        if token.is_cancelled() {
            return false;
        }
        token.cancel();
        info!("批次取消令牌已触发");
        true
    }

    pub fn is_aborted(&self) -> bool {
        self.token.read().is_cancelled()
    }

    /// 当前令牌已取消时换发新令牌，返回是否换发
    pub fn renew(&self) -> bool {
        let mut token = self.token.write();
        if !token.is_cancelled() {
            return false;
        }
        *token = CancellationToken::new();
        info!("已换发新的批次取消令牌");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_is_one_shot() {
        let cancel = CancellationController::new();
        let token = cancel.token();
        assert!(!cancel.is_aborted());

        assert!(cancel.abort());
        assert!(!cancel.abort());
        assert!(token.is_cancelled());
        assert!(cancel.is_aborted());
    }

    #[test]
    fn test_renew_only_after_abort() {
        let cancel = CancellationController::new();
        assert!(!cancel.renew());

        let old = cancel.token();
        cancel.abort();
        assert!(cancel.renew());

        // 旧令牌保持取消状态，新令牌是干净的
        assert!(old.is_cancelled());
        assert!(!cancel.token().is_cancelled());
        assert!(!cancel.is_aborted());
    }
}
