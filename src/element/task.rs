//! Streaming task: a named worker thread looping on a closure.
//!
//! The closure runs once per iteration. Start, pause and stop requests are
//! observed between iterations only; a blocked iteration must be woken by
//! making its blocking call return (a flush), not by the task itself.

use crate::sync::{lock, wait};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, warn};

/// Lifecycle of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// No iterations run; the thread exits.
    Stopped,
    /// Iterations run back to back.
    Started,
    /// The thread waits for start or stop.
    Paused,
}

type TaskFn = Box<dyn FnMut(&Task) + Send>;

struct Control {
    state: TaskState,
    /// A thread is inside `run` and will observe `state`.
    running: bool,
    /// An iteration is executing `func`.
    iterating: bool,
}

struct TaskInner {
    name: String,
    control: Mutex<Control>,
    cond: Condvar,
    func: Mutex<TaskFn>,
    thread: Mutex<Option<(JoinHandle<()>, ThreadId)>>,
}

/// Handle to a streaming task. Cloning yields another handle to the same
/// task.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    /// Create a stopped task running `func` once per iteration.
    pub fn new(name: impl Into<String>, func: impl FnMut(&Task) + Send + 'static) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                name: name.into(),
                control: Mutex::new(Control {
                    state: TaskState::Stopped,
                    running: false,
                    iterating: false,
                }),
                cond: Condvar::new(),
                func: Mutex::new(Box::new(func)),
                thread: Mutex::new(None),
            }),
        }
    }

    /// Task name, also used as the thread name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current state.
    pub fn state(&self) -> TaskState {
        lock(&self.inner.control).state
    }

    /// Run iterations, spawning the thread if needed.
    pub fn start(&self) -> std::io::Result<()> {
        self.set_state(TaskState::Started)
    }

    /// Stop iterating but keep the thread, spawning it if needed.
    pub fn pause(&self) -> std::io::Result<()> {
        self.set_state(TaskState::Paused)
    }

    /// Pause, then wait for a running iteration to finish.
    ///
    /// No iteration starts after this returns, unless the task is started
    /// again. From the task's own thread this only pauses.
    pub fn pause_and_wait(&self) -> std::io::Result<()> {
        self.pause()?;
        if self.is_current_thread() {
            return Ok(());
        }
        let mut control = lock(&self.inner.control);
        while control.iterating && control.state != TaskState::Started {
            control = wait(&self.inner.cond, control);
        }
        Ok(())
    }

    /// Check if the caller runs on this task's thread.
    pub fn is_current_thread(&self) -> bool {
        lock(&self.inner.thread)
            .as_ref()
            .is_some_and(|(_, id)| *id == thread::current().id())
    }

    /// Ask the thread to exit after the current iteration. Does not wait.
    pub fn stop(&self) {
        let mut control = lock(&self.inner.control);
        if control.state != TaskState::Stopped {
            debug!(task = %self.inner.name, "stopping task");
        }
        control.state = TaskState::Stopped;
        self.inner.cond.notify_all();
    }

    /// Stop and wait for the thread to exit.
    ///
    /// Calling this from the task's own thread only stops it; the thread
    /// cannot wait for itself.
    pub fn join(&self) {
        self.stop();
        let handle = {
            let mut thread = lock(&self.inner.thread);
            match thread.as_ref() {
                Some((_, id)) if *id == thread::current().id() => None,
                _ => thread.take(),
            }
        };
        if let Some((handle, _)) = handle {
            if handle.join().is_err() {
                warn!(task = %self.inner.name, "task thread panicked");
            }
        }
    }

    fn set_state(&self, target: TaskState) -> std::io::Result<()> {
        let mut control = lock(&self.inner.control);
        control.state = target;
        self.inner.cond.notify_all();
        if control.running {
            return Ok(());
        }
        control.running = true;

        // A previous thread has left `run`; reap it before spawning.
        let previous = lock(&self.inner.thread).take();
        if let Some((handle, id)) = previous {
            if id != thread::current().id() {
                let _ = handle.join();
            }
        }

        debug!(task = %self.inner.name, ?target, "spawning task thread");
        let task = self.clone();
        let spawned = thread::Builder::new()
            .name(self.inner.name.clone())
            .spawn(move || task.run());
        match spawned {
            Ok(handle) => {
                let id = handle.thread().id();
                *lock(&self.inner.thread) = Some((handle, id));
                Ok(())
            }
            Err(e) => {
                control.running = false;
                control.state = TaskState::Stopped;
                Err(e)
            }
        }
    }

    fn run(&self) {
        loop {
            {
                let mut control = lock(&self.inner.control);
                while control.state == TaskState::Paused {
                    control = wait(&self.inner.cond, control);
                }
                if control.state == TaskState::Stopped {
                    control.running = false;
                    break;
                }
                control.iterating = true;
            }
            {
                let mut func = lock(&self.inner.func);
                (func)(self);
            }
            lock(&self.inner.control).iterating = false;
            self.inner.cond.notify_all();
        }
        debug!(task = %self.inner.name, "task thread exiting");
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}
