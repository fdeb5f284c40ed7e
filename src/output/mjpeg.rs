use std::convert::Infallible;

use super::OutputSink;
use async_stream::stream;
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::Stream;
use tokio::sync::watch;

/// Multipart boundary token used by the stream.
pub const BOUNDARY: &str = "frame";

/// One encoded frame as served to viewers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePacket {
    pub sequence: u64,
    pub jpeg: Bytes,
}

/// Publishes the latest frame to every HTTP viewer.
///
/// Viewers each hold a receiver and read whatever frame is newest when they
/// are ready, so a slow viewer skips frames instead of holding up the camera
/// loop. Dropping the publisher ends every open stream.
pub struct MjpegPublisher {
    tx: watch::Sender<Option<FramePacket>>,
}

impl MjpegPublisher {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<FramePacket>> {
        self.tx.subscribe()
    }

    pub fn viewers(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for MjpegPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for MjpegPublisher {
    fn publish(&mut self, packet: FramePacket) {
        tracing::trace!(
            sequence = packet.sequence,
            bytes = packet.jpeg.len(),
            viewers = self.viewers(),
            "publishing frame"
        );
        self.tx.send_replace(Some(packet));
    }
}

/// Frame one JPEG as a multipart part: boundary line, content type header,
/// blank line, payload, CRLF.
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    const HEADER: &[u8] = b"Content-Type: image/jpeg\r\n\r\n";

    let mut part = BytesMut::with_capacity(jpeg.len() + BOUNDARY.len() + HEADER.len() + 8);
    part.put_slice(b"--");
    part.put_slice(BOUNDARY.as_bytes());
    part.put_slice(b"\r\n");
    part.put_slice(HEADER);
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

/// Endless multipart body for one viewer.
///
/// Starts with the newest frame if there is one, then yields each frame
/// published after it. Ends when the publisher goes away.
pub fn multipart_stream(
    mut frames: watch::Receiver<Option<FramePacket>>,
) -> impl Stream<Item = Result<Bytes, Infallible>> {
    stream! {
        loop {
            let latest = frames.borrow_and_update().clone();
            if let Some(packet) = latest {
                yield Ok(multipart_part(&packet.jpeg));
            }
            if frames.changed().await.is_err() {
                tracing::debug!("publisher closed, ending stream");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn packet(sequence: u64, payload: &'static [u8]) -> FramePacket {
        FramePacket {
            sequence,
            jpeg: Bytes::from_static(payload),
        }
    }

    #[test]
    fn part_matches_wire_format() {
        assert_eq!(
            multipart_part(b"JPEG").as_ref(),
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\nJPEG\r\n"
        );
    }

    #[test]
    fn viewers_share_the_latest_frame() {
        let mut publisher = MjpegPublisher::new();
        let first = publisher.subscribe();
        let second = publisher.subscribe();
        assert_eq!(publisher.viewers(), 2);

        publisher.publish(packet(1, b"a"));
        publisher.publish(packet(2, b"b"));

        assert_eq!(*first.borrow(), Some(packet(2, b"b")));
        assert_eq!(*second.borrow(), Some(packet(2, b"b")));
    }

    #[tokio::test]
    async fn stream_follows_publisher_and_ends_with_it() {
        let mut publisher = MjpegPublisher::new();
        let rx = publisher.subscribe();
        publisher.publish(packet(1, b"one"));

        let mut stream = Box::pin(multipart_stream(rx));
        assert_eq!(stream.next().await.unwrap().unwrap(), multipart_part(b"one"));

        publisher.publish(packet(2, b"two"));
        assert_eq!(stream.next().await.unwrap().unwrap(), multipart_part(b"two"));

        drop(publisher);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn stream_waits_for_first_frame() {
        let mut publisher = MjpegPublisher::new();
        let rx = publisher.subscribe();
        let mut stream = Box::pin(multipart_stream(rx));

        let reader = tokio::spawn(async move { stream.next().await });
        tokio::task::yield_now().await;
        publisher.publish(packet(1, b"late"));

        let part = reader.await.unwrap().unwrap().unwrap();
        assert_eq!(part, multipart_part(b"late"));
    }
}
