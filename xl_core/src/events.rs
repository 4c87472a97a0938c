//! Lifecycle events emitted by jobs.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LifecycleEvent {
    Started(usize),
    Completed(usize),
    Canceled(usize),
    Exception {
        code: String,
        message: String,
        item_name: String,
    },
}

/// Receives events from worker threads; must tolerate concurrent calls.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LifecycleEvent);
}

impl<F> EventSink for F
where
    F: Fn(LifecycleEvent) + Send + Sync,
{
    fn emit(&self, event: LifecycleEvent) {
        self(event)
    }
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: LifecycleEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_closure_sink() {
        let seen = Mutex::new(Vec::new());
        let sink = |e: LifecycleEvent| seen.lock().unwrap().push(e);
        sink.emit(LifecycleEvent::Started(1));
        sink.emit(LifecycleEvent::Completed(1));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![LifecycleEvent::Started(1), LifecycleEvent::Completed(1)]
        );
    }

    #[test]
    fn test_serialize() {
        let json = serde_json::to_string(&LifecycleEvent::Exception {
            code: "F2".into(),
            message: "missing".into(),
            item_name: "a.png".into(),
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"Exception":{"code":"F2","message":"missing","item_name":"a.png"}}"#
        );
    }
}
