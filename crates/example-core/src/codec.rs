//! Content-type aware encoding of API objects.
//!
//! Three wire formats are supported: JSON (the default), YAML and a compact
//! binary format. The binary format is a `k8s\0` magic prefix followed by a
//! bincode-encoded, self-describing value tree, so it carries exactly the same
//! information as the JSON form.

use crate::{CoreError, DynamicObject, GroupVersionKind, Resource, Result, Scheme};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Magic prefix of the binary encoding
pub const BINARY_MAGIC: &[u8; 4] = b"k8s\0";

/// A media type the server can produce and consume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Json,
    Yaml,
    Binary,
}

impl MediaType {
    pub const ALL: [MediaType; 3] = [MediaType::Json, MediaType::Yaml, MediaType::Binary];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Json => "application/json",
            MediaType::Yaml => "application/yaml",
            MediaType::Binary => "application/vnd.kubernetes.bincode",
        }
    }

    /// Parse a media type, ignoring parameters such as `charset`
    pub fn parse(value: &str) -> Option<Self> {
        let essence = value.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            "application/json" => Some(MediaType::Json),
            "application/yaml" | "application/x-yaml" | "text/yaml" => Some(MediaType::Yaml),
            "application/vnd.kubernetes.bincode" => Some(MediaType::Binary),
            _ => None,
        }
    }

    /// Media type of a request body. A missing Content-Type means JSON.
    pub fn from_content_type(content_type: Option<&str>) -> Result<Self> {
        match content_type.map(str::trim).filter(|ct| !ct.is_empty()) {
            None => Ok(MediaType::Json),
            Some(ct) => Self::parse(ct).ok_or_else(|| CoreError::unsupported_media_type(ct)),
        }
    }

    /// Pick the response media type from an `Accept` header.
    ///
    /// Entries are tried in descending `q` order; wildcards resolve to JSON.
    pub fn negotiate(accept: Option<&str>) -> Result<Self> {
        let accept = match accept.map(str::trim).filter(|a| !a.is_empty()) {
            Some(accept) => accept,
            None => return Ok(MediaType::Json),
        };

        let mut ranges: Vec<(&str, f32)> = accept
            .split(',')
            .filter_map(|range| {
                let mut parts = range.split(';');
                let essence = parts.next()?.trim();
                let q = parts
                    .filter_map(|p| p.trim().strip_prefix("q="))
                    .find_map(|q| q.parse::<f32>().ok())
                    .unwrap_or(1.0);
                (q > 0.0).then_some((essence, q))
            })
            .collect();
        ranges.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        for (essence, _) in ranges {
            if matches!(essence, "*/*" | "application/*") {
                return Ok(MediaType::Json);
            }
            if let Some(media_type) = Self::parse(essence) {
                return Ok(media_type);
            }
        }

        Err(CoreError::not_acceptable(accept))
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, MediaType::Binary)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Converts between wire bytes and the generic value tree
pub trait Serializer: Send + Sync + fmt::Debug {
    fn media_type(&self) -> MediaType;

    fn encode(&self, value: &Value) -> Result<Vec<u8>>;

    fn decode(&self, data: &[u8]) -> Result<Value>;
}

#[derive(Debug, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn media_type(&self) -> MediaType {
        MediaType::Json
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, data: &[u8]) -> Result<Value> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[derive(Debug, Default)]
pub struct YamlSerializer;

impl Serializer for YamlSerializer {
    fn media_type(&self) -> MediaType {
        MediaType::Yaml
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        Ok(serde_yaml::to_string(value)?.into_bytes())
    }

    fn decode(&self, data: &[u8]) -> Result<Value> {
        Ok(serde_yaml::from_slice(data)?)
    }
}

/// Self-describing value tree. bincode is not self-describing, so the
/// generic JSON value is mapped onto an explicit enum before encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum WireValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Array(Vec<WireValue>),
    Object(Vec<(String, WireValue)>),
}

impl From<&Value> for WireValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => WireValue::Null,
            Value::Bool(b) => WireValue::Bool(*b),
            Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    WireValue::UInt(u)
                } else if let Some(i) = n.as_i64() {
                    WireValue::Int(i)
                } else {
                    WireValue::Float(n.as_f64().unwrap_or_default())
                }
            }
            Value::String(s) => WireValue::String(s.clone()),
            Value::Array(items) => WireValue::Array(items.iter().map(WireValue::from).collect()),
            Value::Object(map) => WireValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), WireValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<WireValue> for Value {
    fn from(value: WireValue) -> Self {
        match value {
            WireValue::Null => Value::Null,
            WireValue::Bool(b) => Value::Bool(b),
            WireValue::Int(i) => Value::Number(i.into()),
            WireValue::UInt(u) => Value::Number(u.into()),
            WireValue::Float(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
            WireValue::String(s) => Value::String(s),
            WireValue::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            WireValue::Object(entries) => Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect::<Map<String, Value>>(),
            ),
        }
    }
}

#[derive(Debug, Default)]
pub struct BinarySerializer;

impl Serializer for BinarySerializer {
    fn media_type(&self) -> MediaType {
        MediaType::Binary
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        let mut out = BINARY_MAGIC.to_vec();
        bincode::serialize_into(&mut out, &WireValue::from(value))?;
        Ok(out)
    }

    fn decode(&self, data: &[u8]) -> Result<Value> {
        let payload = data.strip_prefix(BINARY_MAGIC.as_slice()).ok_or_else(|| {
            CoreError::serialization("binary payload is missing the k8s magic prefix", None)
        })?;
        let wire: WireValue = bincode::deserialize(payload)?;
        Ok(wire.into())
    }
}

/// Serializers for every supported media type, bound to one scheme
#[derive(Debug, Clone)]
pub struct CodecFactory {
    scheme: Arc<Scheme>,
    serializers: Vec<Arc<dyn Serializer>>,
}

impl CodecFactory {
    pub fn new(scheme: Arc<Scheme>) -> Self {
        Self {
            scheme,
            serializers: vec![
                Arc::new(JsonSerializer),
                Arc::new(YamlSerializer),
                Arc::new(BinarySerializer),
            ],
        }
    }

    pub fn scheme(&self) -> &Arc<Scheme> {
        &self.scheme
    }

    pub fn supported_media_types(&self) -> Vec<MediaType> {
        self.serializers.iter().map(|s| s.media_type()).collect()
    }

    pub fn serializer_for(&self, media_type: MediaType) -> Result<&dyn Serializer> {
        self.serializers
            .iter()
            .find(|s| s.media_type() == media_type)
            .map(|s| s.as_ref())
            .ok_or_else(|| CoreError::unsupported_media_type(media_type.as_str()))
    }

    /// Decode a request body into a normalized object.
    ///
    /// When the body omits `apiVersion`/`kind`, `expected` supplies them. When
    /// both are present they must agree.
    pub fn decode(
        &self,
        data: &[u8],
        media_type: MediaType,
        expected: Option<&GroupVersionKind>,
    ) -> Result<DynamicObject> {
        let value = self.serializer_for(media_type)?.decode(data)?;
        let mut map = match value {
            Value::Object(map) => map,
            other => {
                return Err(CoreError::serialization(
                    format!("expected an object, got {}", json_type_name(&other)),
                    None,
                ))
            }
        };

        let api_version = take_string(&mut map, "apiVersion");
        let kind = take_string(&mut map, "kind");

        let gvk = match (api_version, kind, expected) {
            (Some(api_version), Some(kind), Some(expected)) => {
                let gvk = GroupVersionKind::from_api_version_kind(&api_version, &kind);
                if &gvk != expected {
                    return Err(CoreError::kind_mismatch(expected.to_string(), gvk.to_string()));
                }
                gvk
            }
            (Some(api_version), Some(kind), None) => {
                GroupVersionKind::from_api_version_kind(&api_version, &kind)
            }
            (_, _, Some(expected)) => expected.clone(),
            (api_version, kind, None) => {
                return Err(CoreError::unknown_kind(format!(
                    "{}/{}",
                    api_version.unwrap_or_default(),
                    kind.unwrap_or_default()
                )))
            }
        };

        let normalized = self.scheme.normalize(&gvk, Value::Object(map))?;
        let mut object: DynamicObject = serde_json::from_value(normalized)?;
        object.api_version = gvk.api_version();
        object.kind = gvk.kind.clone();

        trace!("Decoded {} from {}", gvk, media_type);
        Ok(object)
    }

    pub fn encode(&self, object: &DynamicObject, media_type: MediaType) -> Result<Vec<u8>> {
        self.encode_value(&serde_json::to_value(object)?, media_type)
    }

    /// Encode an arbitrary value (lists, status bodies, discovery documents)
    pub fn encode_value(&self, value: &Value, media_type: MediaType) -> Result<Vec<u8>> {
        self.serializer_for(media_type)?.encode(value)
    }

    pub fn decode_typed<T: Resource>(
        &self,
        data: &[u8],
        media_type: MediaType,
        gvk: &GroupVersionKind,
    ) -> Result<T> {
        if gvk.kind != T::KIND {
            return Err(CoreError::kind_mismatch(T::KIND, gvk.kind.clone()));
        }
        self.decode(data, media_type, Some(gvk))?.to_typed()
    }

    pub fn encode_typed<T: Resource>(
        &self,
        resource: &T,
        gvk: &GroupVersionKind,
        media_type: MediaType,
    ) -> Result<Vec<u8>> {
        self.encode(&DynamicObject::from_typed(resource, gvk)?, media_type)
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::tests::{widget_gv, widget_scheme, Widget, WidgetSpec};
    use serde_json::json;

    fn codecs() -> CodecFactory {
        CodecFactory::new(Arc::new(widget_scheme()))
    }

    fn widget_object(codecs: &CodecFactory) -> DynamicObject {
        codecs
            .decode(
                br#"{"apiVersion":"toys.example.io/v1","kind":"Widget",
                     "metadata":{"name":"w","namespace":"default","labels":{"tier":"a"}},
                     "spec":{"color":"red","size":-2}}"#,
                MediaType::Json,
                None,
            )
            .unwrap()
    }

    #[test]
    fn test_round_trip_every_media_type() {
        let codecs = codecs();
        let object = widget_object(&codecs);

        for media_type in codecs.supported_media_types() {
            let bytes = codecs.encode(&object, media_type).unwrap();
            let decoded = codecs.decode(&bytes, media_type, None).unwrap();
            assert_eq!(decoded, object, "round trip through {}", media_type);
        }
    }

    #[test]
    fn test_binary_magic() {
        let codecs = codecs();
        let bytes = codecs
            .encode(&widget_object(&codecs), MediaType::Binary)
            .unwrap();
        assert!(bytes.starts_with(BINARY_MAGIC));

        let err = codecs
            .decode(&bytes[4..], MediaType::Binary, None)
            .unwrap_err();
        assert!(matches!(err, CoreError::Serialization { .. }));
    }

    #[test]
    fn test_decode_applies_defaults_and_expected_kind() {
        let codecs = codecs();
        let gvk = widget_gv().with_kind("Widget");

        let object = codecs
            .decode(
                br#"{"metadata":{"name":"w"},"spec":{"color":"blue"}}"#,
                MediaType::Json,
                Some(&gvk),
            )
            .unwrap();
        assert_eq!(object.gvk(), gvk);
        assert_eq!(object.spec().unwrap()["size"], json!(3));

        let err = codecs
            .decode(
                br#"{"apiVersion":"v1","kind":"Status"}"#,
                MediaType::Json,
                Some(&gvk),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::KindMismatch { .. }));
    }

    #[test]
    fn test_decode_unknown_kind() {
        let err = codecs()
            .decode(
                b"apiVersion: toys.example.io/v1\nkind: Sprocket\n",
                MediaType::Yaml,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownKind { .. }));
    }

    #[test]
    fn test_typed_helpers() {
        let codecs = codecs();
        let gvk = widget_gv().with_kind("Widget");
        let mut widget = Widget {
            spec: WidgetSpec {
                color: "green".to_string(),
                size: 7,
            },
            ..Default::default()
        };
        widget.metadata.name = Some("g".to_string());

        let bytes = codecs.encode_typed(&widget, &gvk, MediaType::Yaml).unwrap();
        let back: Widget = codecs.decode_typed(&bytes, MediaType::Yaml, &gvk).unwrap();
        assert_eq!(back, widget);
    }

    #[test]
    fn test_negotiate() {
        assert_eq!(MediaType::negotiate(None).unwrap(), MediaType::Json);
        assert_eq!(MediaType::negotiate(Some("*/*")).unwrap(), MediaType::Json);
        assert_eq!(
            MediaType::negotiate(Some("application/yaml;q=0.5, application/vnd.kubernetes.bincode"))
                .unwrap(),
            MediaType::Binary
        );
        assert_eq!(
            MediaType::negotiate(Some("text/html, application/yaml;q=0.9")).unwrap(),
            MediaType::Yaml
        );
        assert!(matches!(
            MediaType::negotiate(Some("text/html")),
            Err(CoreError::NotAcceptable { .. })
        ));
        assert!(matches!(
            MediaType::from_content_type(Some("text/plain")),
            Err(CoreError::UnsupportedMediaType { .. })
        ));
        assert_eq!(
            MediaType::from_content_type(Some("application/json; charset=utf-8")).unwrap(),
            MediaType::Json
        );
    }
}
