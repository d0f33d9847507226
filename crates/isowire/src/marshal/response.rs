//! Converter for HTTP responses.
//!
//! Fields: `status`, `status_text`, `headers` and the whole `body`. The status
//! text is informational; a rebuilt response reports the canonical reason of
//! its status code.

use http::StatusCode;

use super::MarshalError;
use super::Marshaller;
use super::Result;
use super::headers_from_value;
use super::headers_to_value;
use super::take;
use super::take_bytes;
use crate::body;
use crate::value::Map;
use crate::value::Object;
use crate::value::Value;

const TAG: &str = "Response";

pub struct ResponseMarshaller;

#[async_trait::async_trait]
impl Marshaller for ResponseMarshaller {
    fn tag(&self) -> &'static str {
        TAG
    }

    fn accepts(&self, object: &Object) -> bool {
        object.is::<body::Response>()
    }

    async fn marshal(&self, object: Object) -> Result<Map> {
        let response = object
            .downcast::<body::Response>()
            .map_err(|other| MarshalError::InvalidField {
                tag: TAG,
                field: "self",
                details: format!("not a response: {}", other.type_name()),
            })?;
        let (parts, body) = response.into_parts();
        let bytes = body::to_bytes(body)
            .await
            .map_err(|e| MarshalError::Body { tag: TAG, details: e.to_string() })?;

        let mut fields = Map::new();
        fields.insert("status".to_string(), Value::from(parts.status.as_u16()));
        fields.insert(
            "status_text".to_string(),
            Value::from(parts.status.canonical_reason().unwrap_or_default()),
        );
        fields.insert("headers".to_string(), headers_to_value(TAG, &parts.headers)?);
        fields.insert("body".to_string(), Value::Bytes(bytes));
        Ok(fields)
    }

    async fn unmarshal(&self, mut fields: Map) -> Result<Value> {
        let status = match take(&mut fields, TAG, "status")? {
            Value::Int(n) => u16::try_from(n)
                .ok()
                .and_then(|n| StatusCode::from_u16(n).ok())
                .ok_or_else(|| MarshalError::InvalidField {
                    tag: TAG,
                    field: "status",
                    details: format!("{} is not a status code", n),
                })?,
            other => {
                return Err(MarshalError::InvalidField {
                    tag: TAG,
                    field: "status",
                    details: format!("expected an integer, found {:?}", other),
                });
            }
        };
        let headers = headers_from_value(TAG, take(&mut fields, TAG, "headers")?)?;
        let bytes = take_bytes(&mut fields, TAG, "body")?;

        let mut response = http::Response::new(body::full(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(Value::object(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::MarshalRegistry;

    fn forbidden() -> body::Response {
        http::Response::builder()
            .status(403)
            .header("x-reason", "nope")
            .header("set-cookie", "a=1")
            .header("set-cookie", "b=2")
            .body(body::full("Forbidden"))
            .expect("valid response")
    }

    #[tokio::test]
    async fn test_response_survives_marshalling() {
        let registry = MarshalRegistry::new();

        let wire = registry.marshal(Value::object(forbidden())).await.expect("marshal");
        assert_eq!(wire.marshaller_tag(), Some("Response"));
        assert_eq!(wire.get("status"), Some(&Value::Int(403)));
        assert_eq!(wire.get("status_text"), Some(&Value::from("Forbidden")));

        let response: body::Response = registry
            .unmarshal(wire)
            .await
            .expect("unmarshal")
            .downcast()
            .expect("a response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers()["x-reason"], "nope");
        let cookies: Vec<_> = response.headers().get_all("set-cookie").iter().collect();
        assert_eq!(cookies, ["a=1", "b=2"]);
        let bytes = body::to_bytes(response.into_body()).await.expect("body");
        assert_eq!(&bytes[..], b"Forbidden");
    }

    #[tokio::test]
    async fn test_response_rejects_bad_status() {
        let mut fields = Map::new();
        fields.insert("status".to_string(), Value::Int(42));
        fields.insert("headers".to_string(), Value::List(Vec::new()));
        fields.insert("body".to_string(), Value::Null);

        let err = ResponseMarshaller.unmarshal(fields).await.unwrap_err();
        assert!(matches!(err, MarshalError::InvalidField { field: "status", .. }));
    }
}
