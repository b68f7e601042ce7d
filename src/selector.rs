//! 轮询实例选择
//!
//! 一个选择器持有一个游标，调用方通常让所有服务共享同一选择器。
//! 游标不按目标列表区分：紧接在长列表之后对短列表取实例，可能
//! 跳过或重复一个元素，这是共享游标设计的既有行为，不做修正。

use std::sync::atomic::{AtomicUsize, Ordering};

/// 轮询选择器
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    cursor: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
        }
    }

    /// 从候选列表中选出一个元素，列表为空时返回 `None`
    ///
    /// 新下标规则：列表长度至少为游标 + 2 时取游标 + 1，否则回到 0；
    /// 新下标无条件写回游标。写回用 CAS 循环，并发调用不会丢失更新。
    pub fn pick<'a, T>(&self, candidates: &'a [T]) -> Option<&'a T> {
        if candidates.is_empty() {
            return None;
        }
        let mut current = self.cursor.load(Ordering::Acquire);
        loop {
            let next = if candidates.len() >= current.saturating_add(2) {
                current + 1
            } else {
                0
            };
            match self
                .cursor
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return candidates.get(next),
                Err(observed) => current = observed,
            }
        }
    }
}
