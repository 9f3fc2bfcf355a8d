//! The host-owned queue backends enqueue onto.

use crate::event::Event;

/// A host-owned queue with an infallible-from-the-backend's-perspective
/// enqueue operation.
///
/// The core never consumes from this; it only ever calls [`EventSink::push`].
/// Implementations must never block the backend thread longer than necessary
/// to append — if the underlying queue cannot accept more, `push` should
/// apply whatever backpressure policy the host configured (block,
/// drop-with-Overflow, or fail) rather than silently dropping the event, and
/// report that failure through the return value so the backend can emit a
/// `Failure` event and tear the affected watch point down.
///
/// Blanket implementations are provided for `FnMut(Event) + Send + 'static`
/// closures and for [`crossbeam_channel::Sender<Event>`], matching the shapes
/// this ecosystem's watcher crates accept for their own event callbacks.
pub trait EventSink: Send + 'static {
    /// Enqueue an event. Returns `Err` if the sink could not accept it, in
    /// which case the caller must treat the sink as closed.
    fn push(&mut self, event: Event) -> Result<(), SinkClosed>;
}

/// Returned by [`EventSink::push`] when the sink can no longer accept events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

impl<F> EventSink for F
where
    F: FnMut(Event) -> Result<(), SinkClosed> + Send + 'static,
{
    fn push(&mut self, event: Event) -> Result<(), SinkClosed> {
        (self)(event)
    }
}

impl EventSink for crossbeam_channel::Sender<Event> {
    fn push(&mut self, event: Event) -> Result<(), SinkClosed> {
        self.send(event).map_err(|_| SinkClosed)
    }
}

/// An [`EventSink`] that records events in memory, for tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Vec<Event>,
    closed: bool,
}

impl RecordingSink {
    /// Construct an empty recording sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the sink refusing further events.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// The events recorded so far, in push order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }
}

impl EventSink for RecordingSink {
    fn push(&mut self, event: Event) -> Result<(), SinkClosed> {
        if self.closed {
            return Err(SinkClosed);
        }
        self.events.push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChangeKind;
    use std::path::PathBuf;

    #[test]
    fn recording_sink_preserves_push_order() {
        let mut sink = RecordingSink::new();
        sink.push(Event::change(ChangeKind::Created, PathBuf::from("/a")))
            .unwrap();
        sink.push(Event::change(ChangeKind::Modified, PathBuf::from("/a")))
            .unwrap();
        assert_eq!(sink.events().len(), 2);
        assert!(matches!(
            sink.events()[0],
            Event::Change {
                kind: ChangeKind::Created,
                ..
            }
        ));
    }

    #[test]
    fn closed_sink_refuses_further_events() {
        let mut sink = RecordingSink::new();
        sink.close();
        let result = sink.push(Event::overflow(None));
        assert_eq!(result, Err(SinkClosed));
    }

    #[test]
    fn closure_sink_delegates_to_the_closure() {
        let mut received = Vec::new();
        let mut sink = move |event: Event| -> Result<(), SinkClosed> {
            received.push(event);
            Ok(())
        };
        sink.push(Event::overflow(None)).unwrap();
    }
}
