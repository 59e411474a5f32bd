use serde::{Deserialize, Serialize};

/// Per-frame header carried by every request and every response.
///
/// `seq` is assigned by the client, strictly increasing per connection and
/// starting at 1 (0 is reserved as invalid); it is what matches a response to
/// the caller waiting for it. `error` is empty on requests; on responses an
/// empty string means success and the following body is the reply, a
/// non-empty string means failure and the following body is an empty
/// placeholder the receiver discards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Dispatch string in `"Service.Method"` form.
    pub service_method: String,
    /// Per-connection request sequence number.
    pub seq: u64,
    /// Error text on failed responses, empty otherwise.
    pub error: String,
}

impl Header {
    /// Builds a request header for `service_method` with the given seq.
    pub fn request(service_method: impl Into<String>, seq: u64) -> Self {
        Header {
            service_method: service_method.into(),
            seq,
            error: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecKind;

    #[test]
    fn test_header_round_trip_msgpack() {
        let header = Header {
            service_method: "Foo.Sum".to_string(),
            seq: 42,
            error: String::new(),
        };

        let encoded = CodecKind::MessagePack.encode(&header).unwrap();
        let decoded: Header = CodecKind::MessagePack.decode(&encoded).unwrap();

        assert_eq!(header, decoded);
    }

    #[test]
    fn test_header_round_trip_json() {
        let header = Header {
            service_method: "Foo.Sleep".to_string(),
            seq: u64::MAX,
            error: "rpc server: can't find method Sleep".to_string(),
        };

        let encoded = CodecKind::Json.encode(&header).unwrap();
        let decoded: Header = CodecKind::Json.decode(&encoded).unwrap();

        assert_eq!(header, decoded);
    }
}
