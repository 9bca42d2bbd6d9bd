use crate::protocol::error::{OrthosError, Result};
use crate::protocol::{Request, Response};

/// Maximum frame payload (100 MB)
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// JSON codec for protocol messages.
///
/// Both sides of the connection use this codec, so client and server stay
/// symmetric by construction.
///
/// # Example
///
/// ```
/// use orthos_common::transport::JsonCodec;
/// use orthos_common::protocol::{Request, Response};
///
/// let request = Request::load();
/// let encoded = JsonCodec::encode_request(&request).unwrap();
/// let decoded = JsonCodec::decode_request(&encoded).unwrap();
/// assert_eq!(request, decoded);
/// ```
pub struct JsonCodec;

impl JsonCodec {
    pub fn encode_request(request: &Request) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(request)?)
    }

    pub fn decode_request(data: &[u8]) -> Result<Request> {
        serde_json::from_slice(data)
            .map_err(|e| OrthosError::InvalidRequest(format!("Malformed request: {}", e)))
    }

    pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(response)?)
    }

    pub fn decode_response(data: &[u8]) -> Result<Response> {
        serde_json::from_slice(data)
            .map_err(|e| OrthosError::InvalidResponse(format!("Malformed response: {}", e)))
    }

    /// Rejects frame lengths above [`MAX_MESSAGE_SIZE`] before allocating.
    pub fn check_frame_len(len: usize) -> Result<()> {
        if len > MAX_MESSAGE_SIZE {
            return Err(OrthosError::InvalidResponse(format!(
                "Message too large: {} bytes (max {} bytes)",
                len, MAX_MESSAGE_SIZE
            )));
        }
        Ok(())
    }
}
