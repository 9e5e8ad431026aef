//! 消息构建器池
//!
//! 控制循环每个周期取一个构建器，IO 线程发送完毕后归还，
//! 稳态下不再分配新缓冲区。

use iiwa_protocol::MessageBuilder;
use parking_lot::Mutex;

#[derive(Debug)]
pub(crate) struct BuilderPool {
    free: Mutex<Vec<MessageBuilder>>,
    max_pooled: usize,
}

impl BuilderPool {
    pub(crate) fn new(max_pooled: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(max_pooled)),
            max_pooled,
        }
    }

    /// 取出一个已清空的构建器（池空时新建）
    pub(crate) fn acquire(&self) -> MessageBuilder {
        self.free.lock().pop().unwrap_or_default()
    }

    /// 归还构建器；超过上限的直接释放
    pub(crate) fn release(&self, mut builder: MessageBuilder) {
        builder.reset();
        let mut free = self.free.lock();
        if free.len() < self.max_pooled {
            free.push(builder);
        }
    }

    #[cfg(test)]
    pub(crate) fn pooled(&self) -> usize {
        self.free.lock().len()
    }
}
