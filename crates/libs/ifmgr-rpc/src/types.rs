use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// One RPC request. Requests and responses travel as bare JSON objects
/// written back to back on the stream; there is no length framing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    pub id: i64,
}

/// One RPC response; `error` is a string or null.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: Option<String>,
    pub id: i64,
}

impl Response {
    pub fn result(result: Value, id: i64) -> Response {
        Response {
            result,
            error: None,
            id,
        }
    }

    pub fn error(message: impl Into<String>, id: i64) -> Response {
        Response {
            result: Value::Null,
            error: Some(message.into()),
            id,
        }
    }
}

/// Read the next JSON document from `reader`, buffering partial input in
/// `buf` across calls.
///
/// Returns `Ok(None)` on a clean EOF between documents. Malformed JSON is
/// an error; connections are expected to die on it.
pub(crate) async fn read_json<R, T>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    loop {
        let parsed = {
            let mut stream = serde_json::Deserializer::from_slice(buf).into_iter::<T>();
            match stream.next() {
                Some(Ok(value)) => Some((stream.byte_offset(), value)),
                Some(Err(err)) if err.is_eof() => None,
                Some(Err(err)) => {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, err));
                }
                None => None,
            }
        };
        if let Some((consumed, value)) = parsed {
            buf.drain(..consumed);
            return Ok(Some(value));
        }

        let mut chunk = [0_u8; 4096];
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            if buf.iter().all(|b| b.is_ascii_whitespace()) {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed mid-document",
            ));
        }
        buf.extend_from_slice(&chunk[..read]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_back_to_back_documents() {
        let wire = br#"{"method":"Plug","params":["dp0s3"],"id":1}{"method":"Unplug","params":["dp0s3"],"id":2}"#;
        let mut reader = &wire[..];
        let mut buf = Vec::new();

        let first: Request = read_json(&mut reader, &mut buf)
            .await
            .expect("read")
            .expect("first");
        assert_eq!(first.method, "Plug");
        assert_eq!(first.id, 1);

        let second: Request = read_json(&mut reader, &mut buf)
            .await
            .expect("read")
            .expect("second");
        assert_eq!(second.method, "Unplug");
        assert_eq!(second.id, 2);

        let done: Option<Request> = read_json(&mut reader, &mut buf).await.expect("read");
        assert!(done.is_none());
    }

    #[tokio::test]
    async fn malformed_input_is_an_error() {
        let wire = br#"{"method": nope}"#;
        let mut reader = &wire[..];
        let mut buf = Vec::new();
        let err = read_json::<_, Request>(&mut reader, &mut buf)
            .await
            .expect_err("malformed");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn response_error_field_is_null_on_success() {
        let encoded = serde_json::to_string(&Response::result(Value::Bool(true), 7)).expect("json");
        assert!(encoded.contains("\"error\":null"));
    }
}
