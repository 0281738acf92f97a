//! Streaming of watch events to HTTP clients.
//!
//! JSON and YAML watches are written as newline-delimited JSON frames, one
//! `{"type": ..., "object": ...}` document per line. Binary watches write each
//! event as a 4-byte big-endian length followed by the binary encoding of the
//! same document.

use crate::ApiError;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::{BufMut, Bytes, BytesMut};
use example_core::{CodecFactory, MediaType, WatchEvent, WatchEventType};
use example_storage::WatchStream;
use futures_util::{future, Stream, StreamExt};
use serde_json::Value;
use std::convert::Infallible;
use std::time::Duration;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

/// Wire framing of a watch response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    JsonLines,
    LengthPrefixed,
}

impl Framing {
    pub fn for_media_type(media_type: MediaType) -> Self {
        if media_type.is_binary() {
            Framing::LengthPrefixed
        } else {
            Framing::JsonLines
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Framing::JsonLines => "application/json;stream=watch",
            Framing::LengthPrefixed => "application/vnd.kubernetes.bincode;stream=watch",
        }
    }

    /// Encode one event as a frame
    pub fn encode(&self, codecs: &CodecFactory, event: &WatchEvent<Value>) -> Result<Bytes, ApiError> {
        match self {
            Framing::JsonLines => {
                let mut line = serde_json::to_vec(event)
                    .map_err(|e| ApiError::Internal(e.to_string()))?;
                line.push(b'\n');
                Ok(Bytes::from(line))
            }
            Framing::LengthPrefixed => {
                let value = serde_json::to_value(event)
                    .map_err(|e| ApiError::Internal(e.to_string()))?;
                let payload = codecs.encode_value(&value, MediaType::Binary)?;
                let len = u32::try_from(payload.len())
                    .map_err(|_| ApiError::Internal("watch event too large".to_string()))?;

                let mut frame = BytesMut::with_capacity(4 + payload.len());
                frame.put_u32(len);
                frame.put_slice(&payload);
                Ok(frame.freeze())
            }
        }
    }
}

/// Convert storage items into wire events. A storage error becomes a final
/// `ERROR` event carrying a `Status` object.
fn wire_events(
    stream: WatchStream,
) -> impl Stream<Item = WatchEvent<Value>> + Send {
    stream.scan(false, |failed, item| {
        if *failed {
            return future::ready(None);
        }
        let event = match item {
            Ok(event) => match serde_json::to_value(&event.object) {
                Ok(object) => WatchEvent::new(event.event_type, object),
                Err(e) => error_event(ApiError::Internal(e.to_string())),
            },
            Err(err) => error_event(ApiError::from(err)),
        };
        *failed = event.event_type == WatchEventType::Error;
        future::ready(Some(event))
    })
}

fn error_event(err: ApiError) -> WatchEvent<Value> {
    debug!("Closing watch: {}", err);
    let status = serde_json::to_value(err.status()).unwrap_or(Value::Null);
    WatchEvent::new(WatchEventType::Error, status)
}

/// Everything that ends a watch besides the storage stream itself
pub struct WatchLimits {
    /// Server shutdown
    pub shutdown: CancellationToken,
    /// Client-requested `timeoutSeconds`
    pub timeout: Option<Duration>,
    /// Cancels the request context once the response body is dropped
    pub guard: DropGuard,
}

/// Build the streaming response for a watch
pub fn watch_response(
    stream: WatchStream,
    codecs: CodecFactory,
    media_type: MediaType,
    limits: WatchLimits,
) -> Response {
    let framing = Framing::for_media_type(media_type);
    let WatchLimits {
        shutdown,
        timeout,
        guard,
    } = limits;

    let deadline = async move {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => future::pending::<()>().await,
        }
    };

    let frames = wire_events(stream)
        .take_until(shutdown.cancelled_owned())
        .take_until(Box::pin(deadline))
        .filter_map(move |event| {
            let frame = match framing.encode(&codecs, &event) {
                Ok(frame) => Some(frame),
                Err(e) => {
                    warn!("Dropping watch event that failed to encode: {}", e);
                    None
                }
            };
            future::ready(frame)
        })
        .map(move |frame| {
            let _guard = &guard;
            Ok::<_, Infallible>(frame)
        });

    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static(framing.content_type()),
        )],
        Body::from_stream(frames),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use example_core::Scheme;
    use example_storage::StorageError;
    use serde_json::json;
    use std::sync::Arc;

    fn codecs() -> CodecFactory {
        CodecFactory::new(Arc::new(Scheme::new()))
    }

    #[test]
    fn test_json_lines_frame() {
        let event = WatchEvent::added(json!({"metadata": {"name": "a"}}));
        let frame = Framing::JsonLines.encode(&codecs(), &event).unwrap();

        assert_eq!(frame.last(), Some(&b'\n'));
        let decoded: Value = serde_json::from_slice(&frame[..frame.len() - 1]).unwrap();
        assert_eq!(decoded["type"], "ADDED");
        assert_eq!(decoded["object"]["metadata"]["name"], "a");
    }

    #[test]
    fn test_length_prefixed_frame() {
        let codecs = codecs();
        let event = WatchEvent::deleted(json!({"metadata": {"name": "a"}}));
        let frame = Framing::LengthPrefixed.encode(&codecs, &event).unwrap();

        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - 4);
        assert!(frame[4..].starts_with(example_core::codec::BINARY_MAGIC));

        let decoded = codecs
            .serializer_for(MediaType::Binary)
            .unwrap()
            .decode(&frame[4..])
            .unwrap();
        assert_eq!(decoded["type"], "DELETED");
    }

    #[tokio::test]
    async fn test_storage_error_ends_stream() {
        let items: Vec<example_storage::Result<WatchEvent>> = vec![
            Err(StorageError::resource_expired("too old resource version")),
            Err(StorageError::resource_expired("never sent")),
        ];
        let stream: WatchStream = Box::pin(futures_util::stream::iter(items));

        let events: Vec<_> = wire_events(stream).collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, WatchEventType::Error);
        assert_eq!(events[0].object["code"], 410);
        assert_eq!(events[0].object["reason"], "Expired");
    }
}
