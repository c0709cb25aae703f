//! fixed size worker pool feeding candidates through a `DnsProbe`

use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::Arc;
use std::thread::{Builder, JoinHandle};

use derive_more::{Display, Error, From};
use parking_lot::Mutex;
use serde_derive::Serialize;

use crate::dns::probe::{DnsProbe, EmitMode, ProbeSummary};

#[derive(Debug, Display, From, Error)]
pub enum DispatchError {
    Io(std::io::Error),
}

type Result<T> = std::result::Result<T, DispatchError>;

/// Queue slots per worker. Keeps the producer a little ahead of the pool
/// without buffering the whole input.
const QUEUE_DEPTH_PER_WORKER: usize = 4;

/// Destination for emitted lines
pub trait ResultSink: Send + Sync {
    fn emit(&self, line: &str) -> io::Result<()>;
}

/// Writes each line to stdout and flushes, so results show up as they are found
pub struct StdoutSink;

impl ResultSink for StdoutSink {
    fn emit(&self, line: &str) -> io::Result<()> {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "{}", line)?;
        handle.flush()
    }
}

/// Collects emitted lines in memory
///
/// Workers finish in any order, `sorted_lines` gives a stable view.
#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> MemorySink {
        MemorySink::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn sorted_lines(&self) -> Vec<String> {
        let mut lines = self.lines();
        lines.sort();
        lines
    }
}

impl ResultSink for MemorySink {
    fn emit(&self, line: &str) -> io::Result<()> {
        self.lines.lock().push(line.to_string());
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub submitted: usize,
    pub emitted: usize,
    pub input_error: Option<String>,
    pub probe: ProbeSummary,
}

/// The worker pool
///
/// All workers pull from one shared queue. Output order follows completion
/// order, not input order.
pub struct Dispatcher {
    probe: Arc<DnsProbe>,
    concurrency: usize,
    mode: EmitMode,
}

impl Dispatcher {
    pub fn new(probe: Arc<DnsProbe>, concurrency: usize, mode: EmitMode) -> Dispatcher {
        Dispatcher {
            probe,
            concurrency: concurrency.max(1),
            mode,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn mode(&self) -> EmitMode {
        self.mode
    }

    pub fn probe(&self) -> &Arc<DnsProbe> {
        &self.probe
    }

    fn spawn_worker(
        &self,
        worker_id: usize,
        queue: Arc<Mutex<Receiver<String>>>,
        sink: Arc<dyn ResultSink>,
        emitted: Arc<AtomicUsize>,
    ) -> io::Result<JoinHandle<()>> {
        let probe = self.probe.clone();
        let mode = self.mode;

        Builder::new()
            .name(format!("DnsProbe-worker-{}", worker_id))
            .spawn(move || loop {
                // The queue is closed and drained once every sender is gone
                let line = match queue.lock().recv() {
                    Ok(line) => line,
                    Err(_) => break,
                };

                let classification = probe.classify(&line);
                if !mode.should_emit(classification) {
                    continue;
                }

                match sink.emit(&line) {
                    Ok(()) => {
                        let _ = emitted.fetch_add(1, Ordering::Release);
                    }
                    Err(err) => {
                        log::error!("failed to write result for {}: {}", line, err);
                    }
                }
            })
    }

    /// Feed every input line through the pool and wait for all of them
    ///
    /// Reading stops at the first input error. Lines submitted before it are
    /// still processed, and the error is reported in the summary.
    pub fn run<I>(&self, input: I, sink: Arc<dyn ResultSink>) -> Result<DispatchSummary>
    where
        I: IntoIterator<Item = io::Result<String>>,
    {
        let (tx, rx) = sync_channel::<String>(self.concurrency * QUEUE_DEPTH_PER_WORKER);
        let queue = Arc::new(Mutex::new(rx));
        let emitted = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(self.concurrency);
        for worker_id in 0..self.concurrency {
            let handle = self.spawn_worker(worker_id, queue.clone(), sink.clone(), emitted.clone())?;
            handles.push(handle);
        }

        let mut submitted = 0;
        let mut input_error = None;
        for line in input {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        log::error!("no workers left to accept input");
                        break;
                    }
                    submitted += 1;
                }
                Err(err) => {
                    log::error!("failed to read input: {}", err);
                    input_error = Some(err.to_string());
                    break;
                }
            }
        }

        // Closing the queue lets idle workers exit once it is drained
        drop(tx);

        for handle in handles {
            if handle.join().is_err() {
                log::error!("worker thread panicked");
            }
        }

        Ok(DispatchSummary {
            submitted,
            emitted: emitted.load(Ordering::Acquire),
            input_error,
            probe: self.probe.summary(),
        })
    }
}
