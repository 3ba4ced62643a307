//! Video references attached to lessons.
//!
//! Player pages receive the provider id in an encoded form so it is not
//! printed verbatim in markup. The encoding is trivially reversible: it
//! hides nothing from anyone who looks and must not be used to protect
//! content.

use serde::{Deserialize, Serialize};

/// Hosting provider of a lesson video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoProvider {
    /// youtube.com
    YouTube,
    /// vimeo.com
    Vimeo,
}

/// A video hosted by a third-party provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRef {
    /// Who hosts the video
    pub provider: VideoProvider,

    /// Provider's own video id
    pub id: String,
}

impl VideoRef {
    /// Reference a YouTube video.
    pub fn youtube(id: impl Into<String>) -> Self {
        Self { provider: VideoProvider::YouTube, id: id.into() }
    }

    /// Reference a Vimeo video.
    pub fn vimeo(id: impl Into<String>) -> Self {
        Self { provider: VideoProvider::Vimeo, id: id.into() }
    }

    /// Encoded id for embedding in a page.
    pub fn encoded_id(&self) -> String {
        encode_video_id(&self.id)
    }
}

/// Errors decoding an encoded video id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VideoIdError {
    /// Odd length or a non-hex character
    #[error("malformed encoded video id")]
    Malformed,

    /// Decoded bytes are not UTF-8
    #[error("encoded video id is not valid UTF-8")]
    NotUtf8,
}

/// Reverse the id and hex-encode it.
pub fn encode_video_id(id: &str) -> String {
    id.bytes().rev().map(|b| format!("{:02x}", b)).collect()
}

/// Undo [`encode_video_id`].
pub fn decode_video_id(encoded: &str) -> Result<String, VideoIdError> {
    if encoded.len() % 2 != 0 || !encoded.is_ascii() {
        return Err(VideoIdError::Malformed);
    }
    let mut bytes = (0..encoded.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&encoded[i..i + 2], 16).map_err(|_| VideoIdError::Malformed))
        .collect::<Result<Vec<u8>, _>>()?;
    bytes.reverse();
    String::from_utf8(bytes).map_err(|_| VideoIdError::NotUtf8)
}
