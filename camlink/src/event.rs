//! Presentation sink and event stream for session output

use crate::state::SessionState;
use camlink_core::ErrorKind;
use camlink_media::{PipelineMetrics, RasterFrame};
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::debug;

/// Receiver of everything the session produces for display.
///
/// Callbacks run on runtime tasks and must not block. `on_error` receives
/// runtime failures (also returned to the caller where there is one) and
/// server-side error messages; rejected calls are only returned.
pub trait PresentationSink: Send + Sync {
    /// A decoded frame is ready
    fn on_frame(&self, frame: RasterFrame);

    /// The session moved from `old` to `new`
    fn on_state_change(&self, old: &SessionState, new: &SessionState);

    /// A failure worth showing to the user
    fn on_error(&self, kind: ErrorKind, message: &str);

    /// Periodic throughput report
    fn on_metrics(&self, metrics: PipelineMetrics);
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl PresentationSink for NullSink {
    fn on_frame(&self, _frame: RasterFrame) {}
    fn on_state_change(&self, _old: &SessionState, _new: &SessionState) {}
    fn on_error(&self, _kind: ErrorKind, _message: &str) {}
    fn on_metrics(&self, _metrics: PipelineMetrics) {}
}

/// Session output as a value
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A decoded frame
    Frame(RasterFrame),
    /// A state transition
    StateChanged {
        /// Previous state
        old: SessionState,
        /// New state
        new: SessionState,
    },
    /// A reported failure
    Error {
        /// Error kind
        kind: ErrorKind,
        /// Human readable detail
        message: String,
    },
    /// Throughput report
    Metrics(PipelineMetrics),
}

impl SessionEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::Frame(_) => "frame",
            SessionEvent::StateChanged { .. } => "state_changed",
            SessionEvent::Error { .. } => "error",
            SessionEvent::Metrics(_) => "metrics",
        }
    }

    /// Check if this is a frame event
    pub fn is_frame_event(&self) -> bool {
        matches!(self, SessionEvent::Frame(_))
    }

    /// Check if this is a state change
    pub fn is_state_event(&self) -> bool {
        matches!(self, SessionEvent::StateChanged { .. })
    }

    /// Check if this is an error event
    pub fn is_error_event(&self) -> bool {
        matches!(self, SessionEvent::Error { .. })
    }

    /// Check if this is a metrics report
    pub fn is_metrics_event(&self) -> bool {
        matches!(self, SessionEvent::Metrics(_))
    }
}

/// Sink that turns callbacks into [`SessionEvent`]s on a channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelSink {
    /// Create a sink and the stream it feeds
    pub fn new() -> (Self, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, EventStream::new(rx))
    }

    fn send(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            debug!("Event stream closed, dropping event");
        }
    }
}

impl PresentationSink for ChannelSink {
    fn on_frame(&self, frame: RasterFrame) {
        self.send(SessionEvent::Frame(frame));
    }

    fn on_state_change(&self, old: &SessionState, new: &SessionState) {
        self.send(SessionEvent::StateChanged {
            old: old.clone(),
            new: new.clone(),
        });
    }

    fn on_error(&self, kind: ErrorKind, message: &str) {
        self.send(SessionEvent::Error {
            kind,
            message: message.to_string(),
        });
    }

    fn on_metrics(&self, metrics: PipelineMetrics) {
        self.send(SessionEvent::Metrics(metrics));
    }
}

/// Stream of session events for async iteration
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<SessionEvent>,
}

impl EventStream {
    /// Create a new event stream with a receiver
    pub fn new(receiver: mpsc::UnboundedReceiver<SessionEvent>) -> Self {
        Self { receiver }
    }

    /// Get the next event from the stream
    pub async fn next(&mut self) -> Option<SessionEvent> {
        self.receiver.recv().await
    }

    /// Try to get the next event without blocking
    pub fn try_next(&mut self) -> Result<Option<SessionEvent>, mpsc::error::TryRecvError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                Err(mpsc::error::TryRecvError::Disconnected)
            }
        }
    }

    /// Close the event stream
    pub fn close(&mut self) {
        self.receiver.close();
    }

    /// Check if the event stream is closed
    pub fn is_closed(&self) -> bool {
        self.receiver.is_closed()
    }

    /// Only yield events accepted by `filter`
    pub fn filtered(self, filter: EventFilter) -> FilteredEventStream {
        FilteredEventStream {
            stream: self,
            filter,
        }
    }
}

impl Stream for EventStream {
    type Item = SessionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<SessionEvent>> {
        self.receiver.poll_recv(cx)
    }
}

/// Event filter for selective event processing
#[derive(Debug, Clone)]
pub struct EventFilter {
    /// Whether to include frames
    pub include_frames: bool,
    /// Whether to include state changes
    pub include_state_events: bool,
    /// Whether to include errors
    pub include_error_events: bool,
    /// Whether to include metrics
    pub include_metrics: bool,
}

impl EventFilter {
    /// Create a filter that includes all events
    pub fn all() -> Self {
        Self {
            include_frames: true,
            include_state_events: true,
            include_error_events: true,
            include_metrics: true,
        }
    }

    /// Everything except frames
    pub fn without_frames() -> Self {
        Self {
            include_frames: false,
            ..Self::all()
        }
    }

    /// Check if an event should be included based on this filter
    pub fn should_include(&self, event: &SessionEvent) -> bool {
        match event {
            SessionEvent::Frame(_) => self.include_frames,
            SessionEvent::StateChanged { .. } => self.include_state_events,
            SessionEvent::Error { .. } => self.include_error_events,
            SessionEvent::Metrics(_) => self.include_metrics,
        }
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::all()
    }
}

/// Filtered event stream that only yields events matching a filter
#[derive(Debug)]
pub struct FilteredEventStream {
    stream: EventStream,
    filter: EventFilter,
}

impl FilteredEventStream {
    /// Get the next event that matches the filter
    pub async fn next(&mut self) -> Option<SessionEvent> {
        while let Some(event) = self.stream.next().await {
            if self.filter.should_include(&event) {
                return Some(event);
            }
        }
        None
    }

    /// Try to get the next filtered event without blocking
    pub fn try_next(&mut self) -> Result<Option<SessionEvent>, mpsc::error::TryRecvError> {
        while let Some(event) = self.stream.try_next()? {
            if self.filter.should_include(&event) {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    /// Get the current filter
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frame() -> RasterFrame {
        RasterFrame {
            width: 1,
            height: 1,
            pixels: Bytes::from_static(&[0, 0, 0, 255]),
            sequence: 1,
        }
    }

    #[tokio::test]
    async fn test_channel_sink_forwards_callbacks() {
        let (sink, mut events) = ChannelSink::new();
        sink.on_state_change(&SessionState::Idle, &SessionState::Opening);
        sink.on_error(ErrorKind::RequestFailed, "busy");
        sink.on_frame(frame());

        let first = events.next().await.unwrap();
        assert_eq!(first.event_type(), "state_changed");
        assert!(first.is_state_event());
        match events.next().await.unwrap() {
            SessionEvent::Error { kind, message } => {
                assert_eq!(kind, ErrorKind::RequestFailed);
                assert_eq!(message, "busy");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(events.next().await.unwrap().is_frame_event());
        assert!(events.try_next().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_filtered_stream_skips_frames() {
        let (sink, events) = ChannelSink::new();
        let mut filtered = events.filtered(EventFilter::without_frames());

        sink.on_frame(frame());
        sink.on_metrics(PipelineMetrics::default());

        let event = filtered.next().await.unwrap();
        assert!(event.is_metrics_event());
        assert!(filtered.try_next().unwrap().is_none());
        assert!(!filtered.filter().include_frames);
    }

    #[tokio::test]
    async fn test_event_stream_as_futures_stream() {
        use futures::StreamExt;

        let (sink, events) = ChannelSink::new();
        sink.on_state_change(&SessionState::Idle, &SessionState::Opening);
        sink.on_frame(frame());
        sink.on_state_change(&SessionState::Opening, &SessionState::Open);
        drop(sink);

        let states: Vec<_> = events
            .filter(|e| futures::future::ready(e.is_state_event()))
            .collect()
            .await;
        assert_eq!(states.len(), 2);
    }

    #[test]
    fn test_closed_stream_drops_events() {
        let (sink, mut events) = ChannelSink::new();
        events.close();
        assert!(events.is_closed());
        sink.on_error(ErrorKind::Timeout, "late");
    }
}
