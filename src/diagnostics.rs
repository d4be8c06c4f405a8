//! Where `identify` reports what it computed, for offline evaluation.
//! Recording is fire-and-forget: a sink can not fail the caller.
use crate::pedigree::NodeId;
use log::{trace, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};
use std::sync::Mutex;
use std::thread::JoinHandle;

/// One record per identification call.
#[derive(Debug, Clone, Serialize)]
pub struct IdentifyRecord {
    /// The node the query genome really came from, when known.
    pub actual: Option<NodeId>,
    pub log_probabilities: HashMap<NodeId, f64>,
}

pub trait DiagnosticSink: Send + Sync {
    fn record(&self, record: &IdentifyRecord);
}

impl<T: DiagnosticSink + ?Sized> DiagnosticSink for &T {
    fn record(&self, record: &IdentifyRecord) {
        (**self).record(record)
    }
}

impl<T: DiagnosticSink + ?Sized> DiagnosticSink for Box<T> {
    fn record(&self, record: &IdentifyRecord) {
        (**self).record(record)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn record(&self, _: &IdentifyRecord) {}
}

/// Sends a one-line summary to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn record(&self, record: &IdentifyRecord) {
        let best = record
            .log_probabilities
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1));
        trace!(
            "identify\t{:?}\t{}\t{:?}",
            record.actual,
            record.log_probabilities.len(),
            best
        );
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<IdentifyRecord>>,
}

impl MemorySink {
    pub fn records(&self) -> Vec<IdentifyRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl DiagnosticSink for MemorySink {
    fn record(&self, record: &IdentifyRecord) {
        match self.records.lock() {
            Ok(mut records) => records.push(record.clone()),
            Err(poisoned) => poisoned.into_inner().push(record.clone()),
        }
    }
}

/// Writes one JSON object per line from a background thread.
/// Records arriving while the buffer is full are dropped.
#[derive(Debug)]
pub struct JsonLinesSink {
    sender: Option<SyncSender<IdentifyRecord>>,
    handle: Option<JoinHandle<()>>,
}

impl JsonLinesSink {
    pub fn create<P: AsRef<Path>>(path: P, capacity: usize) -> std::io::Result<Self> {
        let mut wtr = std::fs::File::create(path).map(BufWriter::new)?;
        let (sender, receiver) = sync_channel::<IdentifyRecord>(capacity);
        let handle = std::thread::spawn(move || {
            for record in receiver {
                let written = serde_json::to_writer(&mut wtr, &record)
                    .map_err(std::io::Error::from)
                    .and_then(|_| writeln!(wtr));
                if let Err(why) = written {
                    warn!("Could not write a diagnostic record:{:?}", why);
                }
            }
            if let Err(why) = wtr.flush() {
                warn!("Could not flush diagnostic records:{:?}", why);
            }
        });
        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }
}

impl DiagnosticSink for JsonLinesSink {
    fn record(&self, record: &IdentifyRecord) {
        if let Some(sender) = &self.sender {
            match sender.try_send(record.clone()) {
                Ok(_) => {}
                Err(TrySendError::Full(_)) => warn!("Diagnostic buffer is full. Dropped a record."),
                Err(TrySendError::Disconnected(_)) => warn!("Diagnostic writer is gone."),
            }
        }
    }
}

impl Drop for JsonLinesSink {
    fn drop(&mut self) {
        // Closing the channel lets the writer drain and finish.
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Diagnostic writer panicked.");
            }
        }
    }
}
