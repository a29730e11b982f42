use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};

// Component trait
pub trait Component: Send {
    fn name(&self) -> &str;
    fn update(&mut self) -> Result<(), String>;
    fn run(&mut self);
    fn stop(&mut self);
    fn is_running(&self) -> bool;
}

/// Shared plumbing for components that tick on their own thread
pub struct BaseComponent {
    pub name: String,
    pub running: Arc<AtomicBool>,
    pub period: Duration,
    handle: Option<JoinHandle<()>>,
}

impl BaseComponent {
    pub fn new(name: String, period: Duration) -> Self {
        Self {
            name,
            running: Arc::new(AtomicBool::new(false)),
            period,
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Calls `tick` every `period` on a dedicated thread until [`stop`](Self::stop).
    pub fn spawn_loop<F>(&mut self, mut tick: F)
    where
        F: FnMut() -> Result<(), String> + Send + 'static,
    {
        if self.is_running() {
            return;
        }
        self.running.store(true, Ordering::Release);

        let running = self.running.clone();
        let period = self.period;
        let name = self.name.clone();

        self.handle = Some(thread::spawn(move || {
            debug!("{} started", name);
            while running.load(Ordering::Acquire) {
                if let Err(e) = tick() {
                    warn!("Error in {}: {}", name, e);
                }
                thread::sleep(period);
            }
            debug!("{} stopped", name);
        }));
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("{} thread panicked", self.name);
            }
        }
    }
}

impl Drop for BaseComponent {
    fn drop(&mut self) {
        self.stop();
    }
}
