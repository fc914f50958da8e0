//! Background execution for long-running operations.
//!
//! A task runs on its own named thread and reports back over a channel:
//! zero or more [`TaskEvent::Progress`] events followed by exactly one
//! [`TaskEvent::Complete`]. The channel is bounded: a worker that gets
//! [`EVENT_BACKLOG`] events ahead of its caller waits until they are read.

use std::sync::mpsc::{self, Receiver};
use std::thread;

use crate::error::{Error, Result};

/// Events a worker may queue before it blocks
pub(crate) const EVENT_BACKLOG: usize = 8;

/// Event delivered from a worker to its caller
#[derive(Debug)]
pub enum TaskEvent<P, T> {
    Progress(P),
    Complete(Result<T>),
}

/// Handle on a task running on a worker thread.
#[derive(Debug)]
pub struct WorkerTask<P, T> {
    events: Receiver<TaskEvent<P, T>>,
    finished: bool,
}

impl<P, T> WorkerTask<P, T>
where
    P: Send + 'static,
    T: Send + 'static,
{
    /// Run `job` on a new thread. The job reports progress through the
    /// callback it is given.
    pub(crate) fn spawn<F>(name: &str, job: F) -> Result<Self>
    where
        F: FnOnce(&mut dyn FnMut(P)) -> Result<T> + Send + 'static,
    {
        let (sender, events) = mpsc::sync_channel(EVENT_BACKLOG);
        thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                let progress = sender.clone();
                let mut report = move |update: P| {
                    // A caller that stopped listening only loses progress.
                    let _ = progress.send(TaskEvent::Progress(update));
                };
                let result = job(&mut report);
                let _ = sender.send(TaskEvent::Complete(result));
            })?;

        Ok(WorkerTask {
            events,
            finished: false,
        })
    }
}

impl<P, T> WorkerTask<P, T> {
    /// Block for the next event. Returns `None` once the completion event has
    /// been delivered.
    pub fn recv(&mut self) -> Option<TaskEvent<P, T>> {
        if self.finished {
            return None;
        }
        match self.events.recv() {
            Ok(TaskEvent::Complete(result)) => {
                self.finished = true;
                Some(TaskEvent::Complete(result))
            }
            Ok(progress) => Some(progress),
            Err(_) => {
                self.finished = true;
                Some(TaskEvent::Complete(Err(Error::WorkerLost)))
            }
        }
    }

    /// Block until the task completes, discarding progress.
    pub fn wait(self) -> Result<T> {
        self.wait_with_progress(|_| {})
    }

    /// Block until the task completes, handing each progress event to
    /// `on_progress` in order.
    pub fn wait_with_progress<F: FnMut(P)>(mut self, mut on_progress: F) -> Result<T> {
        while let Some(event) = self.recv() {
            match event {
                TaskEvent::Progress(update) => on_progress(update),
                TaskEvent::Complete(result) => return result,
            }
        }
        Err(Error::WorkerLost)
    }
}

impl<P, T> Iterator for WorkerTask<P, T> {
    type Item = TaskEvent<P, T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_then_single_completion() {
        let task = WorkerTask::spawn("test-worker", |report| {
            for step in 1..=3u32 {
                report(step);
            }
            Ok("done")
        })
        .unwrap();

        let events: Vec<_> = task.collect();
        assert_eq!(events.len(), 4);
        let progress: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                TaskEvent::Progress(p) => Some(*p),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![1, 2, 3]);
        assert!(matches!(events.last(), Some(TaskEvent::Complete(Ok(s))) if *s == "done"));
    }

    #[test]
    fn panicking_worker_is_lost() {
        let task: WorkerTask<(), ()> =
            WorkerTask::spawn("test-panic", |_| panic!("worker died")).unwrap();
        assert!(matches!(task.wait(), Err(Error::WorkerLost)));
    }

    #[test]
    fn worker_waits_for_a_slow_caller() {
        let (applied, seen) = mpsc::channel();
        let mut task = WorkerTask::spawn("test-backlog", move |report| {
            for step in 0..(EVENT_BACKLOG as u32 * 4) {
                let _ = applied.send(step);
                report(step);
            }
            Ok(())
        })
        .unwrap();

        assert!(matches!(task.recv(), Some(TaskEvent::Progress(0))));
        thread::sleep(std::time::Duration::from_millis(50));
        // One event read, EVENT_BACKLOG queued, one blocked in send
        assert!(seen.try_iter().count() <= EVENT_BACKLOG + 2);
        assert!(task.wait().is_ok());
    }

    #[test]
    fn errors_are_delivered() {
        let task: WorkerTask<(), ()> =
            WorkerTask::spawn("test-error", |_| Err(Error::MapFull)).unwrap();
        let mut seen = 0;
        let result = task.wait_with_progress(|_| seen += 1);
        assert_eq!(seen, 0);
        assert!(matches!(result, Err(Error::MapFull)));
    }
}
