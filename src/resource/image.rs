//! Image payloads
//!
//! Pixel decoding is out of scope. Dimensions come from the request's size
//! hints or, failing that, from the PNG or GIF header.

use serde::Serialize;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// A loaded image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageData {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl ImageData {
    /// Build from raw bytes; hints win over sniffed dimensions
    pub fn from_bytes(url: impl Into<String>, width: Option<u32>, height: Option<u32>, bytes: Vec<u8>) -> Self {
        let sniffed = sniff_dimensions(&bytes);
        Self {
            url: url.into(),
            width: width.or(sniffed.map(|(w, _)| w)),
            height: height.or(sniffed.map(|(_, h)| h)),
            bytes,
        }
    }
}

/// Width and height from a PNG or GIF header
pub fn sniff_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    if bytes.starts_with(PNG_SIGNATURE) && bytes.len() >= 24 && &bytes[12..16] == b"IHDR" {
        let width = u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        let height = u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
        return Some((width, height));
    }
    if (bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a")) && bytes.len() >= 10 {
        let width = u16::from_le_bytes([bytes[6], bytes[7]]) as u32;
        let height = u16::from_le_bytes([bytes[8], bytes[9]]) as u32;
        return Some((width, height));
    }
    None
}

#[cfg(test)]
pub(crate) fn png_header(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = PNG_SIGNATURE.to_vec();
    bytes.extend_from_slice(&13u32.to_be_bytes());
    bytes.extend_from_slice(b"IHDR");
    bytes.extend_from_slice(&width.to_be_bytes());
    bytes.extend_from_slice(&height.to_be_bytes());
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_png() {
        assert_eq!(sniff_dimensions(&png_header(640, 480)), Some((640, 480)));
    }

    #[test]
    fn test_sniff_gif() {
        let mut gif = b"GIF89a".to_vec();
        gif.extend_from_slice(&320u16.to_le_bytes());
        gif.extend_from_slice(&200u16.to_le_bytes());
        assert_eq!(sniff_dimensions(&gif), Some((320, 200)));
    }

    #[test]
    fn test_sniff_unknown() {
        assert_eq!(sniff_dimensions(b"not an image"), None);
        assert_eq!(sniff_dimensions(&PNG_SIGNATURE[..4]), None);
    }

    #[test]
    fn test_hints_override_header() {
        let image = ImageData::from_bytes("http://localhost/i.png", Some(10), None, png_header(640, 480));
        assert_eq!(image.width, Some(10));
        assert_eq!(image.height, Some(480));
    }
}
