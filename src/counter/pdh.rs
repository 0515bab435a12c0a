// SPDX-License-Identifier: AGPL-3.0-or-later

//! `pdh.dll` counter backend

use super::status::{Status, ERROR_SUCCESS, PDH_INVALID_HANDLE};
use super::{CounterQuery, CounterSource, RawCounter};
use std::collections::HashMap;
use windows::core::{HSTRING, PCWSTR};
use windows::Win32::System::Performance::{
    PdhAddCounterW, PdhAddEnglishCounterW, PdhCloseQuery, PdhCollectQueryData,
    PdhGetFormattedCounterValue, PdhOpenQueryW, PdhRemoveCounter, PDH_FMT_COUNTERVALUE,
    PDH_FMT_DOUBLE, PDH_HCOUNTER, PDH_HQUERY,
};

/// Opens PDH queries against the local machine's live data
#[derive(Debug, Clone, Copy, Default)]
pub struct PdhSource;

impl CounterSource for PdhSource {
    fn open(&self) -> Result<Box<dyn CounterQuery>, Status> {
        let mut query = PDH_HQUERY::default();
        let status = unsafe { PdhOpenQueryW(PCWSTR::null(), 0, &mut query) };
        if status != ERROR_SUCCESS {
            return Err(status);
        }
        Ok(Box::new(PdhQuery {
            query: Some(query),
            counters: HashMap::new(),
            next: 1,
        }))
    }
}

/// One open PDH query
pub struct PdhQuery {
    query: Option<PDH_HQUERY>,
    counters: HashMap<RawCounter, PDH_HCOUNTER>,
    next: RawCounter,
}

// PDH query and counter handles may be used from any thread as long as a
// single thread at a time does so; `CounterQuery` takes `&mut self`.
unsafe impl Send for PdhQuery {}

impl PdhQuery {
    fn bind(&mut self, path: &str, english: bool) -> Result<RawCounter, Status> {
        let query = self.query.ok_or(PDH_INVALID_HANDLE)?;
        let wide = HSTRING::from(path);
        let mut counter = PDH_HCOUNTER::default();
        let status = unsafe {
            if english {
                PdhAddEnglishCounterW(query, &wide, 0, &mut counter)
            } else {
                PdhAddCounterW(query, &wide, 0, &mut counter)
            }
        };
        if status != ERROR_SUCCESS {
            return Err(status);
        }
        let raw = self.next;
        self.next += 1;
        self.counters.insert(raw, counter);
        Ok(raw)
    }
}

impl CounterQuery for PdhQuery {
    fn supports_language_neutral(&self) -> bool {
        true
    }

    fn add_counter(&mut self, path: &str) -> Result<RawCounter, Status> {
        self.bind(path, false)
    }

    fn add_language_neutral_counter(&mut self, path: &str) -> Result<RawCounter, Status> {
        self.bind(path, true)
    }

    fn remove_counter(&mut self, counter: RawCounter) -> Status {
        match self.counters.remove(&counter) {
            Some(handle) => unsafe { PdhRemoveCounter(handle) },
            None => PDH_INVALID_HANDLE,
        }
    }

    fn collect(&mut self) -> Status {
        match self.query {
            Some(query) => unsafe { PdhCollectQueryData(query) },
            None => PDH_INVALID_HANDLE,
        }
    }

    fn formatted_value(&self, counter: RawCounter) -> Result<f64, Status> {
        let handle = *self.counters.get(&counter).ok_or(PDH_INVALID_HANDLE)?;
        let mut value = PDH_FMT_COUNTERVALUE::default();
        let status =
            unsafe { PdhGetFormattedCounterValue(handle, PDH_FMT_DOUBLE, None, &mut value) };
        if status != ERROR_SUCCESS {
            return Err(status);
        }
        Ok(unsafe { value.Anonymous.doubleValue })
    }

    fn close(&mut self) -> Status {
        let Some(query) = self.query.take() else {
            return PDH_INVALID_HANDLE;
        };
        // Closing the query releases any counter still attached to it
        self.counters.clear();
        unsafe { PdhCloseQuery(query) }
    }
}

impl Drop for PdhQuery {
    fn drop(&mut self) {
        if self.query.is_some() {
            self.close();
        }
    }
}
