//! 有界工作线程池
//!
//! 固定数量的工作线程从有界队列中按提交顺序取出任务并执行。
//! 队列已满时，提交任务的线程会被阻塞，直到有任务被取出。
//!
//! 任务返回的第一个错误（包括任务崩溃）会被记录下来，并由 [`WorkerPool::wait_completion`] 返回给调用者。
//! 一旦有任务出错，队列中尚未开始执行的任务将被跳过，新任务也不再被接受。

use log::warn;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use std::{
    any::Any,
    fmt,
    num::NonZeroUsize,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
};
use thiserror::Error;

/// 工作线程中的任务崩溃
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Worker task panicked: {message}")]
pub struct WorkerPanic {
    message: String,
}

impl WorkerPanic {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_owned()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.to_owned()
        } else {
            "unknown panic payload".to_owned()
        };
        Self { message }
    }

    /// 获取崩溃信息
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// 被线程池拒绝的任务
pub struct Rejected<F>(F);

impl<F> Rejected<F> {
    /// 取回被拒绝的任务
    #[inline]
    pub fn into_inner(self) -> F {
        self.0
    }
}

impl<F> fmt::Debug for Rejected<F> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Rejected").finish()
    }
}

impl<F> fmt::Display for Rejected<F> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Worker pool has a failed task and rejects new tasks")
    }
}

/// 有界工作线程池
///
/// 工作线程在线程池被释放时不会被等待。
pub struct WorkerPool<E> {
    pool: ThreadPool,
    shared: Arc<Shared<E>>,
    capacity: NonZeroUsize,
}

struct Shared<E> {
    state: Mutex<PoolState<E>>,
    slot_freed: Condvar,
    all_finished: Condvar,
}

struct PoolState<E> {
    queued: usize,
    unfinished: usize,
    first_error: Option<E>,
}

impl<E: From<WorkerPanic> + Send + 'static> WorkerPool<E> {
    /// 创建包含 `num_threads` 个工作线程的线程池，队列容量与线程数相同
    pub fn new(num_threads: NonZeroUsize) -> Result<Self, ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads.get())
            .thread_name(|i| format!("s3-multipart.worker-pool.{}", i))
            .build()?;
        Ok(Self {
            pool,
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState {
                    queued: 0,
                    unfinished: 0,
                    first_error: None,
                }),
                slot_freed: Condvar::new(),
                all_finished: Condvar::new(),
            }),
            capacity: num_threads,
        })
    }

    /// 提交任务
    ///
    /// 队列已满时阻塞当前线程。
    /// 如果之前已有任务出错，则不再接受新任务，任务通过 [`Rejected`] 被原样返回。
    pub fn submit<F>(&self, task: F) -> Result<(), Rejected<F>>
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
    {
        {
            let mut state = self
                .shared
                .slot_freed
                .wait_while(self.shared.lock(), |state| {
                    state.first_error.is_none() && state.queued >= self.capacity.get()
                })
                .unwrap_or_else(PoisonError::into_inner);
            if state.first_error.is_some() {
                return Err(Rejected(task));
            }
            state.queued += 1;
            state.unfinished += 1;
        }
        let shared = self.shared.to_owned();
        self.pool.spawn_fifo(move || shared.run(task));
        Ok(())
    }

    /// 等待所有已提交的任务执行完毕（或被跳过）
    ///
    /// 返回这一批任务中的第一个错误，并清除错误状态，之后可以开始提交新一批任务。
    pub fn wait_completion(&self) -> Result<(), E> {
        let mut state = self
            .shared
            .all_finished
            .wait_while(self.shared.lock(), |state| state.unfinished > 0)
            .unwrap_or_else(PoisonError::into_inner);
        state.first_error.take().map_or(Ok(()), Err)
    }

    /// 是否已有任务出错
    #[inline]
    pub fn has_failed(&self) -> bool {
        self.shared.lock().first_error.is_some()
    }

    /// 获取工作线程数量
    #[inline]
    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// 获取尚未执行完毕的任务数量
    #[inline]
    pub fn unfinished(&self) -> usize {
        self.shared.lock().unfinished
    }
}

impl<E> Shared<E> {
    #[inline]
    fn lock(&self) -> MutexGuard<'_, PoolState<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: From<WorkerPanic>> Shared<E> {
    fn run<F: FnOnce() -> Result<(), E>>(&self, task: F) {
        let skipped = {
            let mut state = self.lock();
            state.queued -= 1;
            self.slot_freed.notify_one();
            state.first_error.is_some()
        };

        if !skipped {
            let result = catch_unwind(AssertUnwindSafe(task))
                .unwrap_or_else(|payload| Err(WorkerPanic::from_payload(payload).into()));
            if let Err(err) = result {
                let mut state = self.lock();
                if state.first_error.is_none() {
                    state.first_error = Some(err);
                } else {
                    warn!("Worker task failed after another task had already failed, its error is dropped");
                }
                self.slot_freed.notify_all();
            }
        }

        let mut state = self.lock();
        state.unfinished -= 1;
        if state.unfinished == 0 {
            self.all_finished.notify_all();
        }
    }
}

impl<E> fmt::Debug for WorkerPool<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("pool", &self.pool)
            .field("capacity", &self.capacity)
            .finish()
    }
}
