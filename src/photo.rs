//! Photo handling: EXIF position/timestamp extraction and client-side
//! recompression before upload. Everything here is best-effort; a photo
//! that cannot be parsed simply carries no metadata and uploads as-is.

use std::io::Cursor;

use exif::{In, Rational, Tag, Value};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use tracing::debug;

/// Photos above this size get downscaled and re-encoded before upload.
pub const MAX_UPLOAD_BYTES: usize = 1024 * 1024;
/// Longest edge after downscaling.
pub const MAX_DIMENSION: u32 = 1600;
pub const JPEG_QUALITY: u8 = 75;

const INLINE_DATA_PREFIX: &str = "data:";

/// A photo file as handed in by the caller.
#[derive(Debug, Clone)]
pub struct PhotoAttachment {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl PhotoAttachment {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: None,
            bytes,
        }
    }

    pub fn content_type(&self) -> &str {
        self.content_type.as_deref().unwrap_or("image/jpeg")
    }
}

/// Position and capture time read out of a photo's EXIF block. Coordinates
/// are all-or-nothing: a photo with only one axis is treated as untagged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhotoMetadata {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub taken_at: Option<String>,
}

pub fn read_metadata(bytes: &[u8]) -> PhotoMetadata {
    let mut cursor = Cursor::new(bytes);
    let exif = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(exif) => exif,
        Err(err) => {
            debug!(error = %err, "no readable EXIF block");
            return PhotoMetadata::default();
        }
    };

    let taken_at = exif
        .get_field(Tag::DateTimeOriginal, In::PRIMARY)
        .map(|field| field.display_value().to_string());

    let lat = gps_coordinate(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef);
    let lng = gps_coordinate(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef);
    let (lat, lng) = match (lat, lng) {
        (Some(lat), Some(lng)) => (Some(lat), Some(lng)),
        _ => (None, None),
    };

    PhotoMetadata { lat, lng, taken_at }
}

fn gps_coordinate(exif: &exif::Exif, value_tag: Tag, ref_tag: Tag) -> Option<f64> {
    let triplet = match &exif.get_field(value_tag, In::PRIMARY)?.value {
        Value::Rational(parts) => parts.clone(),
        _ => return None,
    };
    let hemisphere = match &exif.get_field(ref_tag, In::PRIMARY)?.value {
        Value::Ascii(chunks) => *chunks.first()?.first()? as char,
        _ => return None,
    };
    dms_to_decimal(&triplet, hemisphere)
}

/// Degrees/minutes/seconds plus hemisphere letter to signed decimal degrees.
pub fn dms_to_decimal(dms: &[Rational], hemisphere: char) -> Option<f64> {
    if dms.len() < 3 {
        return None;
    }
    let degrees = dms[0].to_f64();
    let minutes = dms[1].to_f64();
    let seconds = dms[2].to_f64();
    let mut decimal = degrees + minutes / 60.0 + seconds / 3600.0;
    if matches!(hemisphere.to_ascii_uppercase(), 'S' | 'W') {
        decimal = -decimal;
    }
    Some(decimal)
}

/// Recompresses oversized photos to keep uploads and storage small. Returns
/// the original bytes unchanged when the photo is already small enough, when
/// re-encoding fails, or when the result would not be smaller.
pub fn compress(bytes: &[u8]) -> Vec<u8> {
    if bytes.len() <= MAX_UPLOAD_BYTES {
        return bytes.to_vec();
    }
    match try_compress(bytes) {
        Some(compressed) if compressed.len() < bytes.len() => {
            debug!(
                from = bytes.len(),
                to = compressed.len(),
                "recompressed photo before upload"
            );
            compressed
        }
        _ => bytes.to_vec(),
    }
}

fn try_compress(bytes: &[u8]) -> Option<Vec<u8>> {
    let img = image::load_from_memory(bytes).ok()?;
    let (w, h) = (img.width(), img.height());
    let img = if w.max(h) > MAX_DIMENSION {
        img.resize(MAX_DIMENSION, MAX_DIMENSION, FilterType::Triangle)
    } else {
        img
    };
    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    img.to_rgb8().write_with_encoder(encoder).ok()?;
    Some(out)
}

/// Builds the transient inline preview used as `photo_url` until the upload
/// produces a public URL.
pub fn to_data_uri(content_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", content_type, base64::encode(bytes))
}

pub fn is_inline_data(url: &str) -> bool {
    url.starts_with(INLINE_DATA_PREFIX)
}
