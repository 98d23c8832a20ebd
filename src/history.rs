//! history.rs — bounded in-memory log of refresh reports for the debug API.

use std::sync::Mutex;

use crate::sync::types::RefreshReport;

#[derive(Debug)]
pub struct ReportHistory {
    inner: Mutex<Vec<RefreshReport>>,
    cap: usize,
}

impl ReportHistory {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            inner: Mutex::new(Vec::with_capacity(cap.min(10_000))),
            cap: cap.min(10_000),
        }
    }

    pub fn push(&self, report: &RefreshReport) {
        let mut v = self.inner.lock().expect("history lock poisoned");
        v.push(report.clone());
        if v.len() > self.cap {
            let excess = v.len() - self.cap;
            v.drain(0..excess);
        }
    }

    pub fn snapshot_last_n(&self, n: usize) -> Vec<RefreshReport> {
        let v = self.inner.lock().expect("history lock poisoned");
        let start = v.len().saturating_sub(n);
        v[start..].to_vec()
    }
}
