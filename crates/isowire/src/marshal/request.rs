//! Converter for HTTP requests.
//!
//! Fields: `url`, `method`, `headers` and the whole `body`.

use http::Method;

use super::MarshalError;
use super::Marshaller;
use super::Result;
use super::headers_from_value;
use super::headers_to_value;
use super::take;
use super::take_bytes;
use super::take_string;
use crate::body;
use crate::value::Map;
use crate::value::Object;
use crate::value::Value;

const TAG: &str = "Request";

pub struct RequestMarshaller;

#[async_trait::async_trait]
impl Marshaller for RequestMarshaller {
    fn tag(&self) -> &'static str {
        TAG
    }

    fn accepts(&self, object: &Object) -> bool {
        object.is::<body::Request>()
    }

    async fn marshal(&self, object: Object) -> Result<Map> {
        let request = object
            .downcast::<body::Request>()
            .map_err(|other| MarshalError::InvalidField {
                tag: TAG,
                field: "self",
                details: format!("not a request: {}", other.type_name()),
            })?;
        let (parts, body) = request.into_parts();
        let bytes = body::to_bytes(body)
            .await
            .map_err(|e| MarshalError::Body { tag: TAG, details: e.to_string() })?;

        let mut fields = Map::new();
        fields.insert("url".to_string(), Value::from(parts.uri.to_string()));
        fields.insert("method".to_string(), Value::from(parts.method.as_str()));
        fields.insert("headers".to_string(), headers_to_value(TAG, &parts.headers)?);
        fields.insert("body".to_string(), Value::Bytes(bytes));
        Ok(fields)
    }

    async fn unmarshal(&self, mut fields: Map) -> Result<Value> {
        let url = take_string(&mut fields, TAG, "url")?;
        // A missing method defaults to GET, as for a freshly constructed request.
        let method = match fields.remove("method") {
            None | Some(Value::Null) => Method::GET,
            Some(Value::String(m)) => Method::from_bytes(m.as_bytes()).map_err(|e| {
                MarshalError::InvalidField { tag: TAG, field: "method", details: e.to_string() }
            })?,
            Some(other) => {
                return Err(MarshalError::InvalidField {
                    tag: TAG,
                    field: "method",
                    details: format!("expected a string, found {:?}", other),
                });
            }
        };
        let headers = headers_from_value(TAG, take(&mut fields, TAG, "headers")?)?;
        let bytes = take_bytes(&mut fields, TAG, "body")?;

        let mut request = http::Request::builder()
            .method(method)
            .uri(url)
            .body(body::full(bytes))
            .map_err(|e| MarshalError::InvalidField { tag: TAG, field: "url", details: e.to_string() })?;
        *request.headers_mut() = headers;
        Ok(Value::object(request))
    }
}
