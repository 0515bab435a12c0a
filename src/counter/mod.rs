//! Counter polling sessions
//!
//! A [`CounterSession`] owns one OS polling query and every counter bound
//! to it. Backends only speak raw PDH status codes through [`CounterQuery`];
//! the session turns them into [`Error`]s and applies the read policy:
//! calculation artifacts of ratio counters sampled at short intervals
//! (negative denominator, timebase or value) read as `0.0`, anything else
//! is a [`Error::SystemFault`].
//!
//! | Platform | Backend |
//! |----------|---------|
//! | Windows  | `pdh.dll` via the `windows` crate |
//! | Linux    | `/proc` emulation of the same counter paths |

pub mod path;
#[cfg(windows)]
pub mod pdh;
#[cfg(target_os = "linux")]
pub mod procfs;
pub mod status;

use crate::error::{Error, Result};
use status::{Status, ERROR_SUCCESS, PDH_INVALID_HANDLE};

/// Backend-defined token for one bound counter
pub type RawCounter = usize;

/// One raw OS polling query
///
/// Implementations report failures as raw PDH status codes and never apply
/// any policy of their own.
pub trait CounterQuery: Send {
    /// Whether counters can be bound by their English name regardless of
    /// the system language
    fn supports_language_neutral(&self) -> bool;

    /// Bind a counter by its localized path
    fn add_counter(&mut self, path: &str) -> std::result::Result<RawCounter, Status>;

    /// Bind a counter by its English path
    fn add_language_neutral_counter(
        &mut self,
        path: &str,
    ) -> std::result::Result<RawCounter, Status>;

    /// Unbind one counter
    fn remove_counter(&mut self, counter: RawCounter) -> Status;

    /// Sample every bound counter once
    fn collect(&mut self) -> Status;

    /// Formatted value of a counter as of the last collection
    fn formatted_value(&self, counter: RawCounter) -> std::result::Result<f64, Status>;

    /// Release the query
    fn close(&mut self) -> Status;
}

/// Opens raw polling queries
pub trait CounterSource: Send + Sync {
    fn open(&self) -> std::result::Result<Box<dyn CounterQuery>, Status>;
}

/// A counter bound to a [`CounterSession`]
///
/// Only valid for the session that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CounterHandle(RawCounter);

/// Polling session owning a query and its counters
pub struct CounterSession {
    query: Option<Box<dyn CounterQuery>>,
    handles: Vec<CounterHandle>,
    prefer_language_neutral: bool,
}

impl CounterSession {
    /// Open a new polling session
    pub fn open(source: &dyn CounterSource, prefer_language_neutral: bool) -> Result<Self> {
        let query = source.open().map_err(Error::system)?;
        log::debug!("Opened counter session");
        Ok(Self {
            query: Some(query),
            handles: Vec::new(),
            prefer_language_neutral,
        })
    }

    fn query(&self) -> Result<&dyn CounterQuery> {
        self.query
            .as_deref()
            .ok_or_else(|| Error::system(PDH_INVALID_HANDLE))
    }

    fn query_mut(&mut self) -> Result<&mut Box<dyn CounterQuery>> {
        self.query
            .as_mut()
            .ok_or_else(|| Error::system(PDH_INVALID_HANDLE))
    }

    /// Bind one counter by its fully-qualified path
    ///
    /// The language-neutral binding is tried first when the platform has
    /// one; the localized binding is the fallback.
    pub fn add_counter(&mut self, path: &str) -> Result<CounterHandle> {
        let prefer_neutral = self.prefer_language_neutral;
        let query = self.query_mut()?;

        let raw = if prefer_neutral && query.supports_language_neutral() {
            match query.add_language_neutral_counter(path) {
                Ok(raw) => Ok(raw),
                Err(status) => {
                    log::warn!(
                        "Language-neutral binding of {} failed (0x{:08X}), trying localized path",
                        path,
                        status
                    );
                    query.add_counter(path)
                }
            }
        } else {
            query.add_counter(path)
        };

        let handle = CounterHandle(raw.map_err(Error::system)?);
        self.handles.push(handle);
        log::debug!("Bound counter {}", path);
        Ok(handle)
    }

    /// Unbind one counter; unknown handles are ignored
    pub fn remove_counter(&mut self, handle: CounterHandle) {
        let Some(pos) = self.handles.iter().position(|h| *h == handle) else {
            return;
        };
        self.handles.swap_remove(pos);
        if let Some(query) = self.query.as_mut() {
            let status = query.remove_counter(handle.0);
            if status != ERROR_SUCCESS {
                log::warn!("Failed to remove counter: 0x{:08X}", status);
            }
        }
    }

    /// Run one collection tick across all bound counters
    pub fn collect(&mut self) -> Result<()> {
        let status = self.query_mut()?.collect();
        if status != ERROR_SUCCESS {
            return Err(Error::system(status));
        }
        log::trace!("Collected {} counters", self.handles.len());
        Ok(())
    }

    /// Formatted value of one counter as of the last tick
    pub fn read_value(&self, handle: CounterHandle) -> Result<f64> {
        if !self.handles.contains(&handle) {
            return Err(Error::system(PDH_INVALID_HANDLE));
        }
        match self.query()?.formatted_value(handle.0) {
            Ok(value) => Ok(value),
            Err(status) if status::is_calculation_artifact(status) => Ok(0.0),
            Err(status) => Err(Error::system(status)),
        }
    }

    /// Number of counters currently bound
    pub fn counter_count(&self) -> usize {
        self.handles.len()
    }

    /// Whether the session still holds its query
    pub fn is_open(&self) -> bool {
        self.query.is_some()
    }

    /// Release every counter, then the query. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut query) = self.query.take() else {
            return Ok(());
        };
        for handle in self.handles.drain(..) {
            let status = query.remove_counter(handle.0);
            if status != ERROR_SUCCESS {
                log::warn!("Failed to remove counter: 0x{:08X}", status);
            }
        }
        let status = query.close();
        log::debug!("Closed counter session");
        if status != ERROR_SUCCESS {
            return Err(Error::system(status));
        }
        Ok(())
    }
}

impl std::fmt::Debug for CounterSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterSession")
            .field("open", &self.is_open())
            .field("counters", &self.handles.len())
            .finish()
    }
}

impl Drop for CounterSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Counter session close failed: {}", e);
        }
    }
}

/// Binds several counters as one unit
///
/// Counters added through the batch are removed again when it is dropped
/// without [`CounterBatch::commit`], so a failure halfway through a
/// multi-counter binding leaves the session as it was.
pub struct CounterBatch<'s> {
    session: &'s mut CounterSession,
    handles: Vec<CounterHandle>,
}

impl<'s> CounterBatch<'s> {
    pub fn new(session: &'s mut CounterSession) -> Self {
        Self {
            session,
            handles: Vec::new(),
        }
    }

    pub fn add(&mut self, path: &str) -> Result<CounterHandle> {
        let handle = self.session.add_counter(path)?;
        self.handles.push(handle);
        Ok(handle)
    }

    /// Collect through the underlying session without releasing the batch
    pub fn collect(&mut self) -> Result<()> {
        self.session.collect()
    }

    /// Keep every counter bound so far
    pub fn commit(mut self) -> Vec<CounterHandle> {
        std::mem::take(&mut self.handles)
    }
}

impl Drop for CounterBatch<'_> {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            self.session.remove_counter(handle);
        }
    }
}
