use crate::{ApiError, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use example_core::{CodecFactory, DynamicObject, MediaType};
use serde::Serialize;
use serde_json::Value;

/// A response body encoded in the negotiated media type
pub struct ApiResponse {
    status: StatusCode,
    media_type: MediaType,
    body: Vec<u8>,
}

impl ApiResponse {
    /// Encode with 200 OK
    pub fn ok(codecs: &CodecFactory, media_type: MediaType, value: &Value) -> Result<Self> {
        Self::with_status(StatusCode::OK, codecs, media_type, value)
    }

    pub fn with_status(
        status: StatusCode,
        codecs: &CodecFactory,
        media_type: MediaType,
        value: &Value,
    ) -> Result<Self> {
        Ok(Self {
            status,
            media_type,
            body: codecs.encode_value(value, media_type)?,
        })
    }

    pub fn object(
        status: StatusCode,
        codecs: &CodecFactory,
        media_type: MediaType,
        object: &DynamicObject,
    ) -> Result<Self> {
        Ok(Self {
            status,
            media_type,
            body: codecs.encode(object, media_type)?,
        })
    }

    /// Encode any serializable document, such as a discovery response
    pub fn document<T: Serialize>(
        codecs: &CodecFactory,
        media_type: MediaType,
        document: &T,
    ) -> Result<Self> {
        let value = serde_json::to_value(document).map_err(|e| ApiError::Internal(e.to_string()))?;
        Self::ok(codecs, media_type, &value)
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        (
            self.status,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(self.media_type.as_str()),
            )],
            self.body,
        )
            .into_response()
    }
}
