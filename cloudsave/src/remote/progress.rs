//! Upload progress reporting for blob transfers.

use bytes::Bytes;
use futures_util::Stream;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Wraps a blob body and logs how much of it has been handed to the
/// transport, at most once per second plus once at the end.
pub struct UploadProgress<S> {
    inner: S,
    label: String,
    sent: u64,
    total: u64,
    last_report: Instant,
}

impl<S> UploadProgress<S> {
    pub fn new(inner: S, label: impl Into<String>, total: u64) -> Self {
        Self {
            inner,
            label: label.into(),
            sent: 0,
            total,
            last_report: Instant::now(),
        }
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    fn report(&mut self) {
        let percent = if self.total == 0 {
            100
        } else {
            self.sent.saturating_mul(100) / self.total
        };
        debug!(blob = %self.label, sent = self.sent, total = self.total, percent, "upload progress");
        self.last_report = Instant::now();
    }
}

impl<S> Stream for UploadProgress<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = Pin::new(&mut self.inner).poll_next(cx);

        match &polled {
            Poll::Ready(Some(Ok(chunk))) => {
                self.sent += chunk.len() as u64;
                if self.last_report.elapsed() >= REPORT_INTERVAL {
                    self.report();
                }
            }
            Poll::Ready(Some(Err(e))) => {
                warn!(blob = %self.label, sent = self.sent, error = %e, "upload stream failed");
            }
            Poll::Ready(None) => self.report(),
            Poll::Pending => {}
        }

        polled
    }
}
