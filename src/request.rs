//! Completion handles for in-flight buffered sends.

use std::sync::{Arc, Condvar, Mutex, PoisonError};

/// Completion flag shared between a [`Request`] and the progress engine that
/// eventually fulfils it.
#[derive(Default)]
pub(crate) struct Completion {
    done: Mutex<bool>,
    signal: Condvar,
}

impl Completion {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Completion::default())
    }

    pub(crate) fn complete(&self) {
        *self.done.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.signal.notify_all();
    }

    fn is_done(&self) -> bool {
        *self.done.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait(&self) {
        let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        while !*done {
            done = self
                .signal
                .wait(done)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// A handle to a message that has been handed to the progress engine but may
/// not have reached its destination mailbox yet.
///
/// Dropping an incomplete request waits for it, so a message can never be
/// forgotten while still in flight.
pub(crate) struct Request {
    completion: Arc<Completion>,
    completed: bool,
}

impl Request {
    pub(crate) fn new(completion: Arc<Completion>) -> Self {
        Request {
            completion,
            completed: false,
        }
    }

    /// Block until the message has been delivered.
    pub(crate) fn wait(mut self) {
        if !self.completed {
            self.completion.wait();
            self.completed = true;
        }
    }

    /// Test for delivery without blocking.
    pub(crate) fn test(&mut self) -> bool {
        if !self.completed && self.completion.is_done() {
            self.completed = true;
        }
        self.completed
    }

    /// Wait for every request in a collection.
    pub(crate) fn wait_all(requests: Vec<Request>) {
        for request in requests {
            request.wait();
        }
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if !self.completed {
            self.completion.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_reports_completion() {
        let completion = Completion::new();
        let mut request = Request::new(Arc::clone(&completion));
        assert!(!request.test());
        completion.complete();
        assert!(request.test());
        assert!(request.completed);
    }

    #[test]
    fn wait_blocks_until_completed_elsewhere() {
        let completion = Completion::new();
        let request = Request::new(Arc::clone(&completion));
        let fulfiller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            completion.complete();
        });
        request.wait();
        fulfiller.join().unwrap();
    }

    #[test]
    fn wait_all_drains_every_request() {
        let completions: Vec<_> = (0..4).map(|_| Completion::new()).collect();
        let requests = completions
            .iter()
            .map(|c| Request::new(Arc::clone(c)))
            .collect();
        for completion in &completions {
            completion.complete();
        }
        Request::wait_all(requests);
        assert!(completions.iter().all(|c| c.is_done()));
    }
}
