//! Event-bus protocol between the artwork pipeline and its presentation layer.
//!
//! Resolution results and diagnostics travel as [`Message`] values on a
//! `tokio::sync::broadcast` channel so any number of consumers can observe them.

use std::collections::BTreeMap;

use log::trace;
use tokio::sync::broadcast;

use crate::stats::SourceStat;
use crate::viewport::{ArtworkSink, ImagePrefetcher};

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Artwork(ArtworkMessage),
    Diagnostics(DiagnosticsMessage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtworkMessage {
    /// A rendered row was attempted. `url` is `None` when no artwork exists.
    RowResolved { index: usize, url: Option<String> },
    /// Hover preloading wants this image warmed.
    PrefetchImage { url: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticsMessage {
    StatsSnapshot(BTreeMap<String, SourceStat>),
}

/// Publishes row paints onto the bus.
#[derive(Clone)]
pub struct BusArtworkSink {
    bus: broadcast::Sender<Message>,
}

impl BusArtworkSink {
    pub fn new(bus: broadcast::Sender<Message>) -> Self {
        Self { bus }
    }
}

impl ArtworkSink for BusArtworkSink {
    fn paint(&self, index: usize, url: Option<&str>) {
        let message = Message::Artwork(ArtworkMessage::RowResolved {
            index,
            url: url.map(str::to_string),
        });
        if !publish(&self.bus, message) {
            trace!("Bus: no subscribers for row {}", index);
        }
    }
}

/// Sends `message`, returning whether anyone was listening.
fn publish(bus: &broadcast::Sender<Message>, message: Message) -> bool {
    bus.send(message).is_ok()
}

/// Forwards prefetch requests to whichever consumer loads images.
#[derive(Clone)]
pub struct BusImagePrefetcher {
    bus: broadcast::Sender<Message>,
}

impl BusImagePrefetcher {
    pub fn new(bus: broadcast::Sender<Message>) -> Self {
        Self { bus }
    }
}

impl ImagePrefetcher for BusImagePrefetcher {
    fn prefetch(&self, url: &str) {
        let message = Message::Artwork(ArtworkMessage::PrefetchImage {
            url: url.to_string(),
        });
        if !publish(&self.bus, message) {
            trace!("Bus: no subscribers for prefetch of {}", url);
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast;

    use super::{publish, ArtworkMessage, BusArtworkSink, BusImagePrefetcher, Message};
    use crate::viewport::{ArtworkSink, ImagePrefetcher};

    #[test]
    fn test_sink_publishes_row_results() {
        let (bus, mut receiver) = broadcast::channel(8);
        let sink = BusArtworkSink::new(bus);

        sink.paint(2, Some("https://img/2.jpg"));
        sink.paint(3, None);

        assert_eq!(
            receiver.try_recv().expect("first message"),
            Message::Artwork(ArtworkMessage::RowResolved {
                index: 2,
                url: Some("https://img/2.jpg".to_string())
            })
        );
        assert_eq!(
            receiver.try_recv().expect("second message"),
            Message::Artwork(ArtworkMessage::RowResolved { index: 3, url: None })
        );
    }

    #[test]
    fn test_publishing_without_subscribers_is_harmless() {
        let (bus, receiver) = broadcast::channel::<Message>(8);
        drop(receiver);
        BusArtworkSink::new(bus.clone()).paint(0, None);
        BusImagePrefetcher::new(bus).prefetch("https://img/0.jpg");
    }

    #[test]
    fn test_prefetcher_publishes_urls() {
        let (bus, mut receiver) = broadcast::channel(8);
        BusImagePrefetcher::new(bus).prefetch("https://img/1.jpg");
        assert_eq!(
            receiver.try_recv().expect("prefetch message"),
            Message::Artwork(ArtworkMessage::PrefetchImage {
                url: "https://img/1.jpg".to_string()
            })
        );
    }

    #[test]
    fn test_publish_reports_missing_subscribers() {
        let (bus, receiver) = broadcast::channel(8);
        let message = || {
            Message::Artwork(ArtworkMessage::PrefetchImage {
                url: "https://img/a.jpg".to_string(),
            })
        };
        assert!(publish(&bus, message()));

        drop(receiver);
        assert!(!publish(&bus, message()));
    }
}
