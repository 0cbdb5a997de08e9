//! AsyncGenerator：可挂起的序列生产者
//!
//! 生产者是一个持有 Yielder 的 future，消费者通过 Stream 接口逐个拉取；
//! 两者在同一个任务里协作推进（不 spawn），通道容量为 1，生产者最多领先消费者一个元素。
//! 消费者提前停止（drop 或 close）时生产者随之被丢弃，后续副作用不会发生，也不会向消费者报错。

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;

use crate::core::AgentError;

/// 生产者侧句柄：yield_item 在消费者取走上一个元素前挂起
pub struct Yielder<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Yielder<T> {
    /// 产出一个元素；消费者已关闭时返回 Err，生产者应就此结束
    pub async fn yield_item(&self, item: T) -> Result<(), AgentError> {
        self.tx
            .send(item)
            .await
            .map_err(|_| AgentError::Runtime("generator closed by consumer".to_string()))
    }
}

type Producer<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// 惰性、有限或无界的元素序列
#[must_use = "generators do nothing unless polled"]
pub struct AsyncGenerator<'a, T> {
    rx: mpsc::Receiver<T>,
    producer: Option<Producer<'a>>,
    closed: bool,
}

impl<'a, T: Send + 'a> AsyncGenerator<'a, T> {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(Yielder<T>) -> Fut,
        Fut: Future<Output = ()> + Send + 'a,
    {
        let (tx, rx) = mpsc::channel(1);
        Self {
            rx,
            producer: Some(Box::pin(f(Yielder { tx }))),
            closed: false,
        }
    }

    pub fn empty() -> Self {
        Self::new(|_| async {})
    }

    pub fn from_iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'a,
    {
        let iter = items.into_iter();
        Self::new(move |y| async move {
            for item in iter {
                if y.yield_item(item).await.is_err() {
                    break;
                }
            }
        })
    }

    /// 包装任意 Stream（如模型流式响应）
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = T> + Send + 'a,
    {
        Self::new(move |y| async move {
            let mut stream = Box::pin(stream);
            while let Some(item) = stream.next().await {
                if y.yield_item(item).await.is_err() {
                    break;
                }
            }
        })
    }

    /// 提前终止：丢弃生产者，之后 next() 返回 None
    pub fn close(&mut self) {
        self.closed = true;
        self.producer = None;
        self.rx.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// 消费到结束
    pub async fn collect_vec(mut self) -> Vec<T> {
        let mut out = Vec::new();
        while let Some(item) = self.next().await {
            out.push(item);
        }
        out
    }
}

impl<T> Stream for AsyncGenerator<'_, T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(None);
        }
        loop {
            if let Poll::Ready(Some(item)) = this.rx.poll_recv(cx) {
                return Poll::Ready(Some(item));
            }
            match this.producer.as_mut() {
                Some(producer) => match producer.as_mut().poll(cx) {
                    Poll::Ready(()) => {
                        this.producer = None;
                    }
                    Poll::Pending => {
                        return match this.rx.poll_recv(cx) {
                            Poll::Ready(Some(item)) => Poll::Ready(Some(item)),
                            _ => Poll::Pending,
                        };
                    }
                },
                None => return this.rx.poll_recv(cx),
            }
        }
    }
}
