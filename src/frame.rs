// frame.rs — Stream message types.
//
// A Frame is what travels over the bus: a pixel buffer plus the envelope
// metadata (sequence number, timestamp, frame id) that downstream consumers
// key on. CameraInfo is the calibration companion message published next to
// an image stream; this node only reads its frame id, but the intrinsics
// are carried so other consumers of the same bus can use them.

use crate::error::{EqualizeError, Result};
use crate::image::Image;

/// Pixel encoding of a [`Frame`] buffer.
///
/// The equalizer consumes `Mono8`, `Bgr8` and `Rgb8`; the remaining
/// encodings can appear on a shared bus but are rejected per-frame with
/// [`EqualizeError::UnsupportedEncoding`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Single channel, 8 bits per pixel.
    Mono8,
    /// Interleaved blue-green-red, 8 bits per channel.
    Bgr8,
    /// Interleaved red-green-blue, 8 bits per channel.
    Rgb8,
    /// Interleaved blue-green-red-alpha, 8 bits per channel.
    Bgra8,
    /// Single channel, 16 bits per pixel, little-endian.
    Mono16,
}

impl Encoding {
    /// Bytes occupied by one pixel in this encoding.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Encoding::Mono8 => 1,
            Encoding::Bgr8 | Encoding::Rgb8 => 3,
            Encoding::Bgra8 => 4,
            Encoding::Mono16 => 2,
        }
    }

    /// Number of color channels.
    pub fn channels(self) -> usize {
        match self {
            Encoding::Mono8 | Encoding::Mono16 => 1,
            Encoding::Bgr8 | Encoding::Rgb8 => 3,
            Encoding::Bgra8 => 4,
        }
    }
}

/// Acquisition timestamp, split into whole seconds and nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stamp {
    pub sec: i64,
    pub nanos: u32,
}

impl Stamp {
    pub fn new(sec: i64, nanos: u32) -> Self {
        Stamp { sec, nanos }
    }
}

/// Message envelope: sequence number, timestamp, and the identifier of the
/// spatial reference frame the image was captured in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    pub seq: u64,
    pub stamp: Stamp,
    pub frame_id: String,
}

impl Header {
    pub fn new(seq: u64, stamp: Stamp, frame_id: impl Into<String>) -> Self {
        Header {
            seq,
            stamp,
            frame_id: frame_id.into(),
        }
    }
}

/// One image message: envelope + encoding + tightly packed pixel buffer
/// (row stride == width, no padding).
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: Header,
    pub encoding: Encoding,
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl Frame {
    /// Build a frame from a raw buffer, validating its length against the
    /// encoding and dimensions.
    pub fn from_raw(
        header: Header,
        encoding: Encoding,
        width: usize,
        height: usize,
        data: Vec<u8>,
    ) -> Result<Self> {
        let expected = width * height * encoding.bytes_per_pixel();
        if data.len() != expected {
            return Err(EqualizeError::MalformedFrame {
                expected,
                got: data.len(),
            });
        }
        Ok(Frame {
            header,
            encoding,
            width,
            height,
            data,
        })
    }

    /// Wrap a grayscale image as a `Mono8` frame, stripping any stride
    /// padding from the buffer.
    pub fn from_gray(header: Header, gray: &Image<u8>) -> Self {
        let mut data = Vec::with_capacity(gray.width() * gray.height());
        for y in 0..gray.height() {
            data.extend_from_slice(gray.row(y));
        }
        Frame {
            header,
            encoding: Encoding::Mono8,
            width: gray.width(),
            height: gray.height(),
            data,
        }
    }

    /// Expected buffer length for this frame's encoding and dimensions.
    pub fn expected_len(&self) -> usize {
        self.width * self.height * self.encoding.bytes_per_pixel()
    }
}

/// Camera calibration message accompanying an image stream.
///
/// `k` is the row-major 3×3 intrinsic matrix
/// `[fx 0 cx; 0 fy cy; 0 0 1]`.
#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub header: Header,
    pub width: usize,
    pub height: usize,
    pub k: [f64; 9],
}

impl CameraInfo {
    /// Construct from pinhole parameters.
    pub fn from_pinhole(
        header: Header,
        width: usize,
        height: usize,
        fx: f64,
        fy: f64,
        cx: f64,
        cy: f64,
    ) -> Self {
        CameraInfo {
            header,
            width,
            height,
            k: [fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_per_pixel() {
        assert_eq!(Encoding::Mono8.bytes_per_pixel(), 1);
        assert_eq!(Encoding::Bgr8.bytes_per_pixel(), 3);
        assert_eq!(Encoding::Rgb8.bytes_per_pixel(), 3);
        assert_eq!(Encoding::Bgra8.bytes_per_pixel(), 4);
        assert_eq!(Encoding::Mono16.bytes_per_pixel(), 2);
    }

    #[test]
    fn test_from_raw_validates_length() {
        let header = Header::new(0, Stamp::default(), "cam0");
        let err = Frame::from_raw(header, Encoding::Bgr8, 4, 4, vec![0u8; 4 * 4])
            .unwrap_err();
        match err {
            EqualizeError::MalformedFrame { expected, got } => {
                assert_eq!(expected, 48);
                assert_eq!(got, 16);
            }
            other => panic!("expected MalformedFrame, got {other:?}"),
        }
    }

    #[test]
    fn test_from_gray_strips_stride() {
        let img = Image::from_vec_with_stride(
            2, 2, 3,
            vec![1u8, 2, 99,
                 3, 4, 99],
        );
        let frame = Frame::from_gray(Header::default(), &img);
        assert_eq!(frame.encoding, Encoding::Mono8);
        assert_eq!(frame.data, vec![1, 2, 3, 4]);
        assert_eq!(frame.expected_len(), 4);
    }

    #[test]
    fn test_pinhole_k_layout() {
        let info = CameraInfo::from_pinhole(
            Header::default(), 640, 480, 500.0, 510.0, 320.0, 240.0,
        );
        assert_eq!(info.k[0], 500.0);
        assert_eq!(info.k[4], 510.0);
        assert_eq!(info.k[2], 320.0);
        assert_eq!(info.k[5], 240.0);
        assert_eq!(info.k[8], 1.0);
    }
}
