// High-rate odometry sampler
//
// A background thread polls registered sensor signals faster than the control
// loop and appends timestamped values to per-signal FIFO queues. The control
// loop drains every queue once per tick, so it can replay several sub-tick
// samples instead of integrating one stale reading per 20ms.
//
// All queues live behind one mutex: a batch is either fully visible to a
// drain or not at all.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

/// One polled sensor register.
pub trait SignalSource: Send {
    /// Current value, or `None` if the register could not be read.
    fn read(&mut self) -> Option<f64>;
}

impl<F> SignalSource for F
where
    F: FnMut() -> Option<f64> + Send,
{
    fn read(&mut self) -> Option<f64> {
        self()
    }
}

/// Index of a registered signal inside every drained batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalId(usize);

impl SignalId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SamplerError {
    #[error("batch has {got} values, expected {expected}")]
    BatchWidth { expected: usize, got: usize },

    #[error("timestamp {timestamp} is not after previous {previous}")]
    NonMonotonic { timestamp: f64, previous: f64 },

    #[error("sampler rate must be positive, got {0} Hz")]
    InvalidRate(f64),

    #[error("failed to start sampler thread: {0}")]
    Spawn(String),
}

/// Everything enqueued since the previous drain, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleBatch {
    pub timestamps: Vec<f64>,
    /// `values[signal][i]` was read at `timestamps[i]`.
    pub values: Vec<Vec<f64>>,
}

impl SampleBatch {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn value(&self, signal: SignalId, sample: usize) -> f64 {
        self.values[signal.0][sample]
    }
}

/// Bounded, index-aligned FIFO queues: one timestamp queue plus one value
/// queue per signal.
#[derive(Debug)]
pub struct SampleQueues {
    capacity: usize,
    timestamps: VecDeque<f64>,
    signals: Vec<VecDeque<f64>>,
    last_timestamp: Option<f64>,
    overflowed: usize,
    /// Set from the first dropped sample until the next drain.
    dropping: bool,
}

impl SampleQueues {
    pub fn new(signal_count: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            timestamps: VecDeque::with_capacity(capacity),
            signals: (0..signal_count)
                .map(|_| VecDeque::with_capacity(capacity))
                .collect(),
            last_timestamp: None,
            overflowed: 0,
            dropping: false,
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Samples discarded because the consumer fell behind.
    pub fn overflowed(&self) -> usize {
        self.overflowed
    }

    /// True while samples are being dropped and nobody has drained yet.
    pub fn is_dropping(&self) -> bool {
        self.dropping
    }

    /// Append one value per signal, all read at `timestamp`.
    ///
    /// When full, the oldest sample is dropped from every queue together.
    pub fn push(&mut self, timestamp: f64, values: &[f64]) -> Result<(), SamplerError> {
        if values.len() != self.signals.len() {
            return Err(SamplerError::BatchWidth {
                expected: self.signals.len(),
                got: values.len(),
            });
        }
        if let Some(previous) = self.last_timestamp {
            if timestamp <= previous {
                return Err(SamplerError::NonMonotonic {
                    timestamp,
                    previous,
                });
            }
        }

        if self.timestamps.len() >= self.capacity {
            self.timestamps.pop_front();
            for queue in &mut self.signals {
                queue.pop_front();
            }
            self.overflowed += 1;
            if !self.dropping {
                warn!(
                    "Odometry queue full ({} samples), dropping oldest until drained",
                    self.capacity
                );
                self.dropping = true;
            }
        }

        self.timestamps.push_back(timestamp);
        for (queue, &value) in self.signals.iter_mut().zip(values) {
            queue.push_back(value);
        }
        self.last_timestamp = Some(timestamp);
        Ok(())
    }

    /// Take everything queued so far and leave the queues empty.
    pub fn drain(&mut self) -> SampleBatch {
        if self.dropping {
            info!(
                "Odometry queue drained, {} samples dropped so far",
                self.overflowed
            );
            self.dropping = false;
        }
        SampleBatch {
            timestamps: self.timestamps.drain(..).collect(),
            values: self
                .signals
                .iter_mut()
                .map(|queue| queue.drain(..).collect())
                .collect(),
        }
    }
}

pub type SharedQueues = Arc<Mutex<SampleQueues>>;

fn lock(queues: &SharedQueues) -> MutexGuard<'_, SampleQueues> {
    queues.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Collects signal sources before the sampler thread starts.
pub struct SamplerBuilder {
    frequency: f64,
    capacity: usize,
    sources: Vec<Box<dyn SignalSource>>,
}

impl SamplerBuilder {
    pub fn new(frequency: f64, capacity: usize) -> Self {
        Self {
            frequency,
            capacity,
            sources: Vec::new(),
        }
    }

    pub fn register(&mut self, source: Box<dyn SignalSource>) -> SignalId {
        self.sources.push(source);
        SignalId(self.sources.len() - 1)
    }

    pub fn signal_count(&self) -> usize {
        self.sources.len()
    }

    /// Start the sampling thread. Consumes the builder, so a sampler can only
    /// be started once.
    pub fn spawn(self) -> Result<OdometrySampler, SamplerError> {
        if !(self.frequency.is_finite() && self.frequency > 0.0) {
            return Err(SamplerError::InvalidRate(self.frequency));
        }

        let queues = Arc::new(Mutex::new(SampleQueues::new(
            self.sources.len(),
            self.capacity,
        )));
        let running = Arc::new(AtomicBool::new(true));
        let period = Duration::from_secs_f64(1.0 / self.frequency);

        info!(
            "Starting odometry sampler: {} signals at {}Hz",
            self.sources.len(),
            self.frequency
        );

        let signal_count = self.sources.len();
        let handle = {
            let queues = Arc::clone(&queues);
            let running = Arc::clone(&running);
            let sources = self.sources;
            thread::Builder::new()
                .name("odometry-sampler".to_string())
                .spawn(move || sample_loop(sources, queues, running, period))
                .map_err(|e| SamplerError::Spawn(e.to_string()))?
        };

        Ok(OdometrySampler {
            queues,
            running,
            handle: Some(handle),
            signal_count,
        })
    }
}

fn sample_loop(
    mut sources: Vec<Box<dyn SignalSource>>,
    queues: SharedQueues,
    running: Arc<AtomicBool>,
    period: Duration,
) {
    let epoch = Instant::now();
    let mut values = vec![0.0; sources.len()];
    let mut dropped: u64 = 0;
    let mut next = Instant::now();

    while running.load(Ordering::Relaxed) {
        let timestamp = epoch.elapsed().as_secs_f64();

        let mut complete = true;
        for (slot, source) in values.iter_mut().zip(sources.iter_mut()) {
            match source.read() {
                Some(value) => *slot = value,
                None => {
                    complete = false;
                    break;
                }
            }
        }

        if complete {
            if let Err(e) = lock(&queues).push(timestamp, &values) {
                warn!("Discarding odometry sample: {}", e);
            }
        } else {
            dropped += 1;
            debug!("Incomplete odometry read, batch dropped ({} total)", dropped);
        }

        next += period;
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        } else {
            // Overran the period; don't try to catch up with a burst
            next = now;
        }
    }
}

/// Handle to the running sampler thread.
///
/// The thread runs until this handle is dropped.
pub struct OdometrySampler {
    queues: SharedQueues,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    signal_count: usize,
}

impl OdometrySampler {
    pub fn signal_count(&self) -> usize {
        self.signal_count
    }

    /// Take every sample enqueued since the previous drain.
    pub fn drain(&self) -> SampleBatch {
        lock(&self.queues).drain()
    }
}

impl Drop for OdometrySampler {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Odometry sampler thread panicked");
            }
        }
    }
}
