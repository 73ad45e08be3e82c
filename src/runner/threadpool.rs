use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use thiserror::Error;

type Job = Box<dyn FnOnce() + Send + 'static>;

// A job to run, or None to tell the worker to shut down.
type Message = Option<Job>;

#[derive(Debug, Error)]
#[error("thread pool error: {message}")]
pub struct ExecutionError {
    message: String,
}

impl From<mpsc::SendError<Message>> for ExecutionError {
    fn from(_: mpsc::SendError<Message>) -> Self {
        Self {
            message: "worker channel closed".to_string(),
        }
    }
}

/// A fixed pool of worker threads pulling jobs from a shared channel.
/// Dropping the pool signals every worker and joins them.
pub struct ThreadPool {
    workers: Vec<Worker>,
    sender: mpsc::Sender<Message>,
}

impl ThreadPool {
    pub fn new(size: usize) -> ThreadPool {
        assert!(size > 0);
        let (sender, receiver) = mpsc::channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..size)
            .map(|_| Worker::new(Arc::clone(&receiver)))
            .collect();
        ThreadPool { workers, sender }
    }

    pub fn execute<F>(&self, f: F) -> Result<(), ExecutionError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender.send(Some(Box::new(f)))?;
        Ok(())
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        for _ in &self.workers {
            let _ = self.sender.send(None);
        }
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

struct Worker {
    thread: Option<thread::JoinHandle<()>>,
}

impl Worker {
    fn new(receiver: Arc<Mutex<mpsc::Receiver<Message>>>) -> Worker {
        let thread = thread::spawn(move || loop {
            let message = {
                let receiver = match receiver.lock() {
                    Ok(receiver) => receiver,
                    Err(poisoned) => poisoned.into_inner(),
                };
                receiver.recv()
            };
            match message {
                Ok(Some(job)) => job(),
                // Terminate on shutdown signal or a closed channel.
                Ok(None) | Err(_) => break,
            }
        });

        Worker {
            thread: Some(thread),
        }
    }
}
