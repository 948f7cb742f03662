//! Request lifecycle instrumentation
//!
//! Every request fires `on_start`, then paired `*_start`/`*_end` hooks
//! around each stage it enters, then exactly one of `on_success`,
//! `on_error`, `on_cancel`.

use std::sync::Arc;

use crate::data::Data;
use crate::error::ImageError;
use crate::request::{DataSource, ImageRequest};

/// How a stage ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Completed,
    Failed,
    /// Cancelled while the stage was running
    Abandoned,
}

/// Observer of request lifecycles
///
/// All hooks default to no-ops. Hooks run inline on the request's task and
/// should return quickly.
pub trait EventListener: Send + Sync {
    fn on_start(&self, _request: &ImageRequest) {}

    fn map_start(&self, _request: &ImageRequest, _input: &Data) {}
    fn map_end(&self, _request: &ImageRequest, _status: StageStatus) {}

    fn resolve_size_start(&self, _request: &ImageRequest) {}
    fn resolve_size_end(&self, _request: &ImageRequest, _status: StageStatus) {}

    fn fetch_start(&self, _request: &ImageRequest, _fetcher: &str) {}
    fn fetch_end(&self, _request: &ImageRequest, _status: StageStatus) {}

    fn decode_start(&self, _request: &ImageRequest, _decoder: &str) {}
    fn decode_end(&self, _request: &ImageRequest, _status: StageStatus) {}

    fn transform_start(&self, _request: &ImageRequest, _count: usize) {}
    fn transform_end(&self, _request: &ImageRequest, _status: StageStatus) {}

    fn on_success(&self, _request: &ImageRequest, _data_source: DataSource) {}
    fn on_error(&self, _request: &ImageRequest, _error: &ImageError) {}
    fn on_cancel(&self, _request: &ImageRequest) {}
}

/// Loader-wide and per-request listeners, notified in that order
#[derive(Clone, Default)]
pub(crate) struct Listeners {
    listeners: Vec<Arc<dyn EventListener>>,
}

impl Listeners {
    pub(crate) fn new(global: Option<&Arc<dyn EventListener>>, request: Option<&Arc<dyn EventListener>>) -> Self {
        Self {
            listeners: global.into_iter().chain(request).cloned().collect(),
        }
    }

    fn each(&self, f: impl Fn(&dyn EventListener)) {
        for listener in &self.listeners {
            f(listener.as_ref());
        }
    }
}

impl EventListener for Listeners {
    fn on_start(&self, request: &ImageRequest) {
        self.each(|l| l.on_start(request));
    }

    fn map_start(&self, request: &ImageRequest, input: &Data) {
        self.each(|l| l.map_start(request, input));
    }

    fn map_end(&self, request: &ImageRequest, status: StageStatus) {
        self.each(|l| l.map_end(request, status));
    }

    fn resolve_size_start(&self, request: &ImageRequest) {
        self.each(|l| l.resolve_size_start(request));
    }

    fn resolve_size_end(&self, request: &ImageRequest, status: StageStatus) {
        self.each(|l| l.resolve_size_end(request, status));
    }

    fn fetch_start(&self, request: &ImageRequest, fetcher: &str) {
        self.each(|l| l.fetch_start(request, fetcher));
    }

    fn fetch_end(&self, request: &ImageRequest, status: StageStatus) {
        self.each(|l| l.fetch_end(request, status));
    }

    fn decode_start(&self, request: &ImageRequest, decoder: &str) {
        self.each(|l| l.decode_start(request, decoder));
    }

    fn decode_end(&self, request: &ImageRequest, status: StageStatus) {
        self.each(|l| l.decode_end(request, status));
    }

    fn transform_start(&self, request: &ImageRequest, count: usize) {
        self.each(|l| l.transform_start(request, count));
    }

    fn transform_end(&self, request: &ImageRequest, status: StageStatus) {
        self.each(|l| l.transform_end(request, status));
    }

    fn on_success(&self, request: &ImageRequest, data_source: DataSource) {
        self.each(|l| l.on_success(request, data_source));
    }

    fn on_error(&self, request: &ImageRequest, error: &ImageError) {
        self.each(|l| l.on_error(request, error));
    }

    fn on_cancel(&self, request: &ImageRequest) {
        self.each(|l| l.on_cancel(request));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpanKind {
    Map,
    ResolveSize,
    Fetch,
    Decode,
    Transform,
}

/// Open stage; fires the matching `*_end` hook when dropped
///
/// A span dropped without [`StageSpan::finish`] (the request future was
/// dropped mid-stage) ends as [`StageStatus::Abandoned`].
pub(crate) struct StageSpan<'a> {
    listener: &'a dyn EventListener,
    request: &'a ImageRequest,
    kind: SpanKind,
    status: StageStatus,
}

impl<'a> StageSpan<'a> {
    fn open(listener: &'a dyn EventListener, request: &'a ImageRequest, kind: SpanKind) -> Self {
        Self {
            listener,
            request,
            kind,
            status: StageStatus::Abandoned,
        }
    }

    pub(crate) fn map(listener: &'a dyn EventListener, request: &'a ImageRequest, input: &Data) -> Self {
        listener.map_start(request, input);
        Self::open(listener, request, SpanKind::Map)
    }

    pub(crate) fn resolve_size(listener: &'a dyn EventListener, request: &'a ImageRequest) -> Self {
        listener.resolve_size_start(request);
        Self::open(listener, request, SpanKind::ResolveSize)
    }

    pub(crate) fn fetch(listener: &'a dyn EventListener, request: &'a ImageRequest, fetcher: &str) -> Self {
        listener.fetch_start(request, fetcher);
        Self::open(listener, request, SpanKind::Fetch)
    }

    pub(crate) fn decode(listener: &'a dyn EventListener, request: &'a ImageRequest, decoder: &str) -> Self {
        listener.decode_start(request, decoder);
        Self::open(listener, request, SpanKind::Decode)
    }

    pub(crate) fn transform(listener: &'a dyn EventListener, request: &'a ImageRequest, count: usize) -> Self {
        listener.transform_start(request, count);
        Self::open(listener, request, SpanKind::Transform)
    }

    pub(crate) fn complete(mut self) {
        self.status = StageStatus::Completed;
    }

    pub(crate) fn fail(mut self) {
        self.status = StageStatus::Failed;
    }

    /// Close the span with the stage's outcome and pass the outcome through
    pub(crate) fn finish<T, E>(self, result: Result<T, E>) -> Result<T, E> {
        match result {
            Ok(_) => self.complete(),
            Err(_) => self.fail(),
        }
        result
    }
}

impl Drop for StageSpan<'_> {
    fn drop(&mut self) {
        let (listener, request, status) = (self.listener, self.request, self.status);
        match self.kind {
            SpanKind::Map => listener.map_end(request, status),
            SpanKind::ResolveSize => listener.resolve_size_end(request, status),
            SpanKind::Fetch => listener.fetch_end(request, status),
            SpanKind::Decode => listener.decode_end(request, status),
            SpanKind::Transform => listener.transform_end(request, status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Log(Mutex<Vec<String>>);

    impl EventListener for Log {
        fn fetch_start(&self, _request: &ImageRequest, fetcher: &str) {
            self.0.lock().unwrap().push(format!("fetch_start:{fetcher}"));
        }

        fn fetch_end(&self, _request: &ImageRequest, status: StageStatus) {
            self.0.lock().unwrap().push(format!("fetch_end:{status:?}"));
        }
    }

    #[test]
    fn test_span_reports_outcome() {
        let log = Log::default();
        let request = ImageRequest::new("a.png");

        let span = StageSpan::fetch(&log, &request, "file");
        let _ = span.finish::<(), &str>(Err("boom"));

        let span = StageSpan::fetch(&log, &request, "file");
        let _ = span.finish::<(), &str>(Ok(()));

        drop(StageSpan::fetch(&log, &request, "file"));

        assert_eq!(
            *log.0.lock().unwrap(),
            vec![
                "fetch_start:file",
                "fetch_end:Failed",
                "fetch_start:file",
                "fetch_end:Completed",
                "fetch_start:file",
                "fetch_end:Abandoned",
            ]
        );
    }

    #[test]
    fn test_composite_notifies_global_then_request() {
        let global: Arc<dyn EventListener> = Arc::new(Log::default());
        let local: Arc<dyn EventListener> = Arc::new(Log::default());
        let listeners = Listeners::new(Some(&global), Some(&local));
        let request = ImageRequest::new("a.png");
        listeners.fetch_start(&request, "http");
        assert_eq!(listeners.listeners.len(), 2);
    }
}
