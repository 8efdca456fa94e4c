//! Subscriber registries for session events
//!
//! Subscribing returns a [`Subscription`] handle naming the topic and the
//! entry; passing it back to `unsubscribe` removes exactly that entry.
//! Callbacks run on the session task, in arrival order, and must not block.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::demux::SpectrumFrame;

/// Event stream a subscription belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Audio,
    Spectrum,
    Signal,
    Connection,
    Property,
}

/// Handle returned by a subscribe call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub topic: Topic,
    id: u64,
}

/// One telemetry update; the device reports power and SNR separately
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SignalReading {
    /// dBm
    pub power: Option<f64>,
    /// dB
    pub snr: Option<f64>,
}

/// A device property report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyUpdate {
    pub property: String,
    pub value: String,
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Tagged list of callbacks for one topic
pub struct Subscribers<T: ?Sized> {
    entries: Mutex<Vec<(u64, Callback<T>)>>,
}

impl<T: ?Sized> Default for Subscribers<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<T: ?Sized> Subscribers<T> {
    fn add(&self, id: u64, callback: Callback<T>) {
        self.entries.lock().push((id, callback));
    }

    fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        entries.len() != before
    }

    /// Invoke every callback. The list is snapshotted first so a callback
    /// may subscribe or unsubscribe without deadlocking.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Callback<T>> = self.entries.lock().iter().map(|(_, cb)| cb.clone()).collect();
        for callback in snapshot {
            callback(value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// All registries of one session
#[derive(Default)]
pub struct EventHub {
    next_id: AtomicU64,
    pub audio: Subscribers<[f32]>,
    pub spectrum: Subscribers<SpectrumFrame>,
    pub signal: Subscribers<SignalReading>,
    pub connection: Subscribers<bool>,
    pub property: Subscribers<PropertyUpdate>,
}

impl EventHub {
    fn next(&self, topic: Topic) -> Subscription {
        Subscription {
            topic,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn on_audio(&self, callback: impl Fn(&[f32]) + Send + Sync + 'static) -> Subscription {
        let sub = self.next(Topic::Audio);
        self.audio.add(sub.id, Arc::new(callback));
        sub
    }

    pub fn on_spectrum(
        &self,
        callback: impl Fn(&SpectrumFrame) + Send + Sync + 'static,
    ) -> Subscription {
        let sub = self.next(Topic::Spectrum);
        self.spectrum.add(sub.id, Arc::new(callback));
        sub
    }

    pub fn on_signal(
        &self,
        callback: impl Fn(&SignalReading) + Send + Sync + 'static,
    ) -> Subscription {
        let sub = self.next(Topic::Signal);
        self.signal.add(sub.id, Arc::new(callback));
        sub
    }

    pub fn on_connection(&self, callback: impl Fn(&bool) + Send + Sync + 'static) -> Subscription {
        let sub = self.next(Topic::Connection);
        self.connection.add(sub.id, Arc::new(callback));
        sub
    }

    pub fn on_property(
        &self,
        callback: impl Fn(&PropertyUpdate) + Send + Sync + 'static,
    ) -> Subscription {
        let sub = self.next(Topic::Property);
        self.property.add(sub.id, Arc::new(callback));
        sub
    }

    /// Returns false if the subscription was already gone
    pub fn unsubscribe(&self, sub: Subscription) -> bool {
        match sub.topic {
            Topic::Audio => self.audio.remove(sub.id),
            Topic::Spectrum => self.spectrum.remove(sub.id),
            Topic::Signal => self.signal.remove(sub.id),
            Topic::Connection => self.connection.remove(sub.id),
            Topic::Property => self.property.remove(sub.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_and_unsubscribe() {
        let hub = EventHub::default();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        let first = hub.on_connection(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        let h = hits.clone();
        let _second = hub.on_connection(move |connected| {
            if *connected {
                h.fetch_add(10, Ordering::SeqCst);
            }
        });

        hub.connection.emit(&true);
        assert_eq!(hits.load(Ordering::SeqCst), 11);

        assert!(hub.unsubscribe(first));
        assert!(!hub.unsubscribe(first));
        hub.connection.emit(&true);
        assert_eq!(hits.load(Ordering::SeqCst), 21);
    }

    #[test]
    fn test_topics_are_independent() {
        let hub = EventHub::default();
        let audio = hub.on_audio(|_| {});
        let _signal = hub.on_signal(|_| {});

        // Same id space, different topic: removing audio leaves signal alone
        assert!(hub.unsubscribe(audio));
        assert!(hub.audio.is_empty());
        assert_eq!(hub.signal.len(), 1);
    }

    #[test]
    fn test_callback_may_subscribe_during_emit() {
        let hub = Arc::new(EventHub::default());
        let inner = hub.clone();
        hub.on_signal(move |_| {
            inner.on_signal(|_| {});
        });

        hub.signal.emit(&SignalReading::default());
        assert_eq!(hub.signal.len(), 2);
    }
}
