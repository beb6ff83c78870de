//! Asynchronous row differs
//!
//! A producer thread computes differences and feeds them through a bounded
//! channel; the consumer pulls them in batches with a timeout.
//!
//! ```text
//!  producer thread                      consumer
//! ┌───────────────┐  bounded channel  ┌─────────────────────────┐
//! │ DiffSender    ├──────────────────►│ get_diffs(n, timeout)   │
//! │ (panics are   │                   │ close() → cancel + join │
//! │  caught)      │                   └─────────────────────────┘
//! └───────────────┘
//! ```

use std::any::Any;
use std::cmp::Ordering;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::channel::{self, select, Receiver, Sender};

use crate::cancel::CancelToken;
use crate::error::{Result, StoreError};

use super::difference::{convert_diff, Difference};

/// Pulls differences produced in the background
pub trait RowDiffer: Send {
    /// Wait for up to `n` differences (`0` means no limit) until `timeout`
    /// expires.
    ///
    /// The flag is `false` once the producer has finished and every
    /// difference has been returned.
    fn get_diffs(&mut self, n: usize, timeout: Duration) -> Result<(Vec<Difference>, bool)>;

    /// Stop the producer and wait for it to exit
    fn close(&mut self) -> Result<()>;
}

/// Start a differ over the rows `producer` emits. Keyless tables expand each
/// difference by the row's cardinality.
pub fn new_row_differ<F>(keyless: bool, buffer_size: usize, producer: F) -> Result<Box<dyn RowDiffer>>
where
    F: FnOnce(DiffSender) -> Result<()> + Send + 'static,
{
    let differ = AsyncDiffer::start(buffer_size, producer)?;
    if keyless {
        Ok(Box::new(KeylessDiffer::new(differ)))
    } else {
        Ok(Box::new(differ))
    }
}

// =============================================================================
// Producer Side
// =============================================================================

/// Sending half handed to a producer
pub struct DiffSender {
    tx: Sender<Difference>,
    ctx: CancelToken,
}

impl DiffSender {
    /// Send one difference, blocking while the channel is full.
    ///
    /// Fails with `Cancelled` once the differ is closed.
    pub fn send(&self, diff: Difference) -> Result<()> {
        self.ctx.check()?;
        self.tx.send(diff).map_err(|_| StoreError::Cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.ctx.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.ctx
    }
}

/// Emit the differences between two key-ordered row sequences.
pub fn diff_sorted<F, T>(from: F, to: T, sink: &DiffSender) -> Result<()>
where
    F: IntoIterator<Item = (Bytes, Bytes)>,
    T: IntoIterator<Item = (Bytes, Bytes)>,
{
    let mut from = from.into_iter().peekable();
    let mut to = to.into_iter().peekable();

    loop {
        let order = match (from.peek(), to.peek()) {
            (None, None) => return Ok(()),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some((a, _)), Some((b, _))) => a.cmp(b),
        };

        match order {
            Ordering::Less => {
                if let Some((key, value)) = from.next() {
                    sink.send(Difference::removed(key, value))?;
                }
            }
            Ordering::Greater => {
                if let Some((key, value)) = to.next() {
                    sink.send(Difference::added(key, value))?;
                }
            }
            Ordering::Equal => {
                if let (Some((key, old)), Some((_, new))) = (from.next(), to.next()) {
                    if old != new {
                        sink.send(Difference::modified(key, old, new))?;
                    }
                }
            }
        }
    }
}

// =============================================================================
// AsyncDiffer
// =============================================================================

enum Received {
    Diff(Difference),
    /// Producer exited successfully and the channel is drained
    Finished,
    TimedOut,
}

/// Runs a producer on its own thread and buffers up to `buffer_size`
/// differences.
pub struct AsyncDiffer {
    rx: Option<Receiver<Difference>>,
    ctx: CancelToken,
    handle: Option<JoinHandle<Result<()>>>,
}

impl AsyncDiffer {
    /// Spawn `producer`. Its result, or its panic, is reported by
    /// `get_diffs` once the channel drains, and by `close`.
    pub fn start<F>(buffer_size: usize, producer: F) -> Result<Self>
    where
        F: FnOnce(DiffSender) -> Result<()> + Send + 'static,
    {
        let (tx, rx) = channel::bounded(buffer_size);
        let ctx = CancelToken::new();
        let sender = DiffSender {
            tx,
            ctx: ctx.clone(),
        };

        let handle = thread::Builder::new()
            .name("diff-producer".to_string())
            .spawn(move || {
                // The sender is moved into the closure, so the channel closes
                // however the producer exits
                match panic::catch_unwind(AssertUnwindSafe(move || producer(sender))) {
                    Ok(result) => result,
                    Err(payload) => Err(StoreError::ProducerPanicked(panic_message(&*payload))),
                }
            })?;

        Ok(Self {
            rx: Some(rx),
            ctx,
            handle: Some(handle),
        })
    }

    /// Token observed by the producer
    pub fn cancel_token(&self) -> &CancelToken {
        &self.ctx
    }

    /// Wait for the producer thread and return its result. Later calls
    /// return `Ok`.
    fn join(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|payload| Err(StoreError::ProducerPanicked(panic_message(&*payload)))),
            None => Ok(()),
        }
    }

    /// Receive one difference before `deadline`. A failed producer's
    /// error surfaces here once the channel drains.
    fn recv_until(&mut self, deadline: Instant) -> Result<Received> {
        let Some(rx) = self.rx.clone() else {
            return Ok(Received::Finished);
        };

        let timer = channel::at(deadline);
        select! {
            recv(rx) -> msg => match msg {
                Ok(diff) => Ok(Received::Diff(diff)),
                Err(_) => {
                    self.rx = None;
                    self.join()?;
                    Ok(Received::Finished)
                }
            },
            recv(timer) -> _ => Ok(Received::TimedOut),
        }
    }
}

impl RowDiffer for AsyncDiffer {
    fn get_diffs(&mut self, n: usize, timeout: Duration) -> Result<(Vec<Difference>, bool)> {
        let deadline = Instant::now() + timeout;
        let mut diffs = Vec::new();

        loop {
            match self.recv_until(deadline)? {
                Received::Diff(diff) => {
                    diffs.push(diff);
                    if n != 0 && diffs.len() == n {
                        return Ok((diffs, true));
                    }
                }
                Received::Finished => return Ok((diffs, false)),
                Received::TimedOut => return Ok((diffs, true)),
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.ctx.cancel();
        // Unblocks a producer waiting on a full channel
        self.rx = None;

        match self.join() {
            Err(StoreError::Cancelled) => Ok(()),
            result => result,
        }
    }
}

impl Drop for AsyncDiffer {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(e) = self.close() {
                tracing::warn!(error = %e, "Diff producer failed");
            }
        }
    }
}

// =============================================================================
// KeylessDiffer
// =============================================================================

/// Differ for keyless tables: a row with cardinality `c` stands for `c`
/// identical rows, so its difference is returned `c` times.
pub struct KeylessDiffer {
    inner: AsyncDiffer,
    current: Option<Difference>,
    copies_left: u64,
}

impl KeylessDiffer {
    pub fn new(inner: AsyncDiffer) -> Self {
        Self {
            inner,
            current: None,
            copies_left: 0,
        }
    }
}

impl RowDiffer for KeylessDiffer {
    fn get_diffs(&mut self, n: usize, timeout: Duration) -> Result<(Vec<Difference>, bool)> {
        let deadline = Instant::now() + timeout;
        let mut diffs = Vec::with_capacity(n);

        loop {
            if let Some(diff) = &self.current {
                while self.copies_left > 0 && (n == 0 || diffs.len() < n) {
                    diffs.push(diff.clone());
                    self.copies_left -= 1;
                }
            }
            if n != 0 && diffs.len() == n {
                return Ok((diffs, true));
            }

            match self.inner.recv_until(deadline)? {
                Received::Diff(diff) => {
                    let (diff, copies) = convert_diff(diff)?;
                    self.current = Some(diff);
                    self.copies_left = copies;
                }
                Received::Finished => return Ok((diffs, false)),
                Received::TimedOut => return Ok((diffs, true)),
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.current = None;
        self.copies_left = 0;
        self.inner.close()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
