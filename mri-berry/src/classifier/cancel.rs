//! 协作式取消令牌.
//!
//! 直接使用 [`tokio_util::sync::CancellationToken`]: 它可以在同步线程中使用,
//! 不依赖异步运行时.
//!
//! 令牌可以通过 `child_token` 派生子令牌. 子令牌在自身或任一祖先被取消后视为已取消,
//! 而取消子令牌不会影响祖先和兄弟. 克隆的令牌共享同一状态.
//!
//! # 注意
//!
//! 取消是协作式的: 令牌只负责传递信号, 正在运行的分类器需要自行轮询
//! `is_cancelled` 并尽快返回.

pub use tokio_util::sync::CancellationToken as CancelToken;

#[cfg(test)]
mod tests {
    use std::thread;

    use super::CancelToken;

    #[test]
    fn test_cancel_flows_down_only() {
        let root = CancelToken::new();
        let a = root.child_token();
        let b = root.child_token();
        let a1 = a.child_token();

        a.cancel();
        assert!(a.is_cancelled());
        assert!(a1.is_cancelled());
        assert!(!b.is_cancelled());
        assert!(!root.is_cancelled());

        root.cancel();
        assert!(b.is_cancelled());
    }

    #[test]
    fn test_clone_shares_state_across_threads() {
        let token = CancelToken::default();
        let same = token.clone();
        thread::scope(|s| {
            s.spawn(move || same.cancel());
        });
        assert!(token.is_cancelled());
    }
}
