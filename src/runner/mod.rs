//! Runners implement threading strategies for servers.
use std::thread;

use log::error;

use threadpool::ThreadPool;

mod threadpool;

/// Run every job inline on the calling thread.
pub struct SimpleRunner;

impl SimpleRunner {
    pub fn run<F>(&mut self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        f();
    }
}

/// Spawn a fresh thread per job; threads are joined on drop.
pub struct ThreadRunner {
    threads: Vec<Option<thread::JoinHandle<()>>>,
}

impl Default for ThreadRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadRunner {
    pub fn new() -> Self {
        Self { threads: vec![] }
    }

    pub fn run<F>(&mut self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.threads.push(Some(thread::spawn(f)));
    }
}

impl Drop for ThreadRunner {
    fn drop(&mut self) {
        for thread in &mut self.threads {
            if let Some(thread) = thread.take() {
                match thread.join() {
                    Ok(_) => (),
                    Err(e) => error!("Error joining thread: {:?}", e),
                }
            }
        }
    }
}

/// Run jobs on a fixed-size worker pool.
pub struct ThreadPoolRunner {
    pool: ThreadPool,
}

impl ThreadPoolRunner {
    pub fn new(size: usize) -> Self {
        Self {
            pool: ThreadPool::new(size),
        }
    }

    pub fn run<F>(&mut self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(e) = self.pool.execute(f) {
            error!("{}", e);
        }
    }
}

/// Threading strategy selected by thread count: 0 spawns per request,
/// 1 runs inline, 2+ uses a pool of that size.
pub enum Runner {
    Simple(SimpleRunner),
    Thread(ThreadRunner),
    Pool(ThreadPoolRunner),
}

impl Runner {
    pub fn new(n_threads: usize) -> Self {
        match n_threads {
            0 => Self::Thread(ThreadRunner::new()),
            1 => Self::Simple(SimpleRunner),
            n => Self::Pool(ThreadPoolRunner::new(n)),
        }
    }

    pub fn run<F>(&mut self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self {
            Self::Simple(runner) => runner.run(f),
            Self::Thread(runner) => runner.run(f),
            Self::Pool(runner) => runner.run(f),
        }
    }
}
