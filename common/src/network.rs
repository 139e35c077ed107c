use std::time::Duration;

use log::{debug, info, warn};

use crate::error::FetchError;

pub const BITMAP_CONTENT_TYPE: &str = "image/bmp";

const BODY_CHUNK_LEN: usize = 4096;

/// The headers of a fetched frame that the cycle acts on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseFacts {
    pub status: u16,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    pub content_length: Option<usize>,
    /// Raw `X-Refresh-In` value, seconds until the next wake.
    pub refresh_in: Option<String>,
}

impl ResponseFacts {
    /// Rejects anything that is not a successful bitmap response.
    pub fn ensure_bitmap(&self) -> Result<(), FetchError> {
        if !(200..300).contains(&self.status) {
            return Err(FetchError::Status(self.status));
        }

        let media_type = self
            .content_type
            .as_deref()
            .and_then(|value| value.split(';').next())
            .map(str::trim);
        match media_type {
            Some(media_type) if media_type.eq_ignore_ascii_case(BITMAP_CONTENT_TYPE) => Ok(()),
            _ => Err(FetchError::UnexpectedContentType(self.content_type.clone())),
        }
    }

    /// Server refresh hint in seconds; `default_secs` when absent or unparsable.
    pub fn refresh_secs(&self, default_secs: u32) -> u32 {
        let Some(raw) = self.refresh_in.as_deref() else {
            info!("no refresh hint from server; using default {default_secs} seconds");
            return default_secs;
        };

        match raw.trim().parse::<u32>() {
            Ok(seconds) => {
                info!("server asked for a refresh in {seconds} seconds");
                seconds
            }
            Err(err) => {
                warn!("ignoring refresh hint `{raw}` ({err}); using default {default_secs} seconds");
                default_secs
            }
        }
    }

    pub fn log_summary(&self) {
        info!(
            "HTTP {}: etag={:?} content-type={:?} content-length={:?} x-refresh-in={:?}",
            self.status, self.etag, self.content_type, self.content_length, self.refresh_in
        );
    }
}

/// The radio and HTTP client of one wake cycle.
pub trait Network {
    /// Stable hardware address the device identity is derived from.
    fn mac_address(&self) -> [u8; 6];

    /// Brings the link up. Calling it while connected is a no-op.
    fn connect(&mut self) -> Result<(), FetchError>;

    /// Issues a GET and returns once the response headers are in.
    fn get(&mut self, url: &str, timeout: Duration) -> Result<ResponseFacts, FetchError>;

    /// Reads the next chunk of the current response body; `Ok(0)` on end.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, FetchError>;

    /// Drops any open response and powers the radio down.
    fn disconnect(&mut self);
}

/// Connects and fetches until a non-transient outcome, without an attempt cap.
/// An endless outage ends with a watchdog reset.
pub fn fetch_with_retry(
    network: &mut dyn Network,
    url: &str,
    timeout: Duration,
) -> Result<ResponseFacts, FetchError> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let result = network
            .connect()
            .and_then(|()| network.get(url, timeout));

        match result {
            Ok(facts) => {
                if attempt > 1 {
                    info!("fetch succeeded on attempt {attempt}");
                }
                return Ok(facts);
            }
            Err(err) if err.is_transient() => {
                warn!("fetch attempt {attempt} failed: {err}; retrying");
            }
            Err(err) => return Err(err),
        }
    }
}

/// Largest body accepted for one frame: a 32-bit 296x128 bitmap plus headers,
/// rounded up.
pub const MAX_BODY_BYTES: usize = 256 * 1024;

/// Drains the response body, logging progress against `Content-Length`.
/// The declared length never sizes the buffer beyond [`MAX_BODY_BYTES`]; a
/// short body is left for the decoder to reject.
pub fn read_body(network: &mut dyn Network, facts: &ResponseFacts) -> Result<Vec<u8>, FetchError> {
    if let Some(total) = facts.content_length {
        if total > MAX_BODY_BYTES {
            return Err(FetchError::Body(format!(
                "declared length {total} exceeds the {MAX_BODY_BYTES} byte limit"
            )));
        }
    }

    let mut body = Vec::with_capacity(facts.content_length.unwrap_or(BODY_CHUNK_LEN));
    let mut chunk = [0_u8; BODY_CHUNK_LEN];

    loop {
        let read = network.read_chunk(&mut chunk)?;
        if read == 0 {
            break;
        }
        if body.len() + read > MAX_BODY_BYTES {
            return Err(FetchError::Body(format!(
                "body exceeds the {MAX_BODY_BYTES} byte limit"
            )));
        }
        body.extend_from_slice(&chunk[..read]);

        match facts.content_length {
            Some(total) => debug!("read {} of {total} bytes", body.len()),
            None => debug!("read {} bytes", body.len()),
        }
    }

    if let Some(total) = facts.content_length {
        if body.len() != total {
            warn!("body ended after {} of {total} declared bytes", body.len());
        }
    }

    info!("received {} byte bitmap", body.len());
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitmap_facts() -> ResponseFacts {
        ResponseFacts {
            status: 200,
            content_type: Some("image/bmp".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn accepts_bitmap_media_type_with_parameters() {
        let mut facts = bitmap_facts();
        assert_eq!(facts.ensure_bitmap(), Ok(()));

        facts.content_type = Some("Image/BMP; charset=binary".to_string());
        assert_eq!(facts.ensure_bitmap(), Ok(()));
    }

    #[test]
    fn rejects_other_content_types_and_statuses() {
        let mut facts = bitmap_facts();
        facts.content_type = Some("text/html".to_string());
        assert_eq!(
            facts.ensure_bitmap(),
            Err(FetchError::UnexpectedContentType(Some("text/html".to_string())))
        );

        facts.content_type = None;
        assert_eq!(facts.ensure_bitmap(), Err(FetchError::UnexpectedContentType(None)));

        let mut facts = bitmap_facts();
        facts.status = 503;
        assert_eq!(facts.ensure_bitmap(), Err(FetchError::Status(503)));
    }

    #[test]
    fn refresh_hint_falls_back_to_default() {
        let mut facts = bitmap_facts();
        assert_eq!(facts.refresh_secs(900), 900);

        facts.refresh_in = Some(" 1800 ".to_string());
        assert_eq!(facts.refresh_secs(900), 1800);

        facts.refresh_in = Some("0".to_string());
        assert_eq!(facts.refresh_secs(900), 0);

        facts.refresh_in = Some("soon".to_string());
        assert_eq!(facts.refresh_secs(900), 900);

        facts.refresh_in = Some("-60".to_string());
        assert_eq!(facts.refresh_secs(900), 900);
    }

    struct ChunkedBody {
        chunks: Vec<Vec<u8>>,
    }

    impl Network for ChunkedBody {
        fn mac_address(&self) -> [u8; 6] {
            [0; 6]
        }

        fn connect(&mut self) -> Result<(), FetchError> {
            Ok(())
        }

        fn get(&mut self, _url: &str, _timeout: Duration) -> Result<ResponseFacts, FetchError> {
            Ok(bitmap_facts())
        }

        fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, FetchError> {
            if self.chunks.is_empty() {
                return Ok(0);
            }
            let chunk = self.chunks.remove(0);
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }

        fn disconnect(&mut self) {}
    }

    #[test]
    fn body_is_reassembled_from_chunks() {
        let mut network = ChunkedBody {
            chunks: vec![b"BM".to_vec(), b"1234".to_vec()],
        };
        let mut facts = bitmap_facts();
        facts.content_length = Some(6);
        assert_eq!(read_body(&mut network, &facts).unwrap(), b"BM1234".to_vec());
    }

    #[test]
    fn short_body_is_handed_on_as_received() {
        let mut network = ChunkedBody {
            chunks: vec![b"BM".to_vec()],
        };
        let mut facts = bitmap_facts();
        facts.content_length = Some(10);
        assert_eq!(read_body(&mut network, &facts).unwrap(), b"BM".to_vec());
    }

    #[test]
    fn oversized_declared_length_is_rejected_before_reading() {
        let mut network = ChunkedBody {
            chunks: vec![b"BM".to_vec()],
        };
        let mut facts = bitmap_facts();
        facts.content_length = Some(usize::MAX / 2);
        assert!(matches!(
            read_body(&mut network, &facts),
            Err(FetchError::Body(_))
        ));
        assert_eq!(network.chunks.len(), 1);
    }

    #[test]
    fn undeclared_body_is_capped() {
        let mut network = ChunkedBody {
            chunks: vec![vec![0xAA; BODY_CHUNK_LEN]; MAX_BODY_BYTES / BODY_CHUNK_LEN + 1],
        };
        assert!(matches!(
            read_body(&mut network, &bitmap_facts()),
            Err(FetchError::Body(_))
        ));
    }
}
