// convert.rs — Channel conversion between frames and grayscale images.
//
// The equalization algorithms operate on single-channel 8-bit buffers, so
// every inbound frame passes through here first: grayscale copies through
// unchanged, interleaved color collapses to luma. Uses ITU-R BT.601
// coefficients: Y = 0.299 R + 0.587 G + 0.114 B.

use crate::error::{EqualizeError, Result};
use crate::frame::{Encoding, Frame, Header};
use crate::image::{Image, Pixel};

/// Extract a grayscale image from a frame.
///
/// `Mono8` frames copy through unchanged. `Bgr8`/`Rgb8` frames are reduced
/// with BT.601 luma weights. Any other encoding is rejected with
/// [`EqualizeError::UnsupportedEncoding`]; a buffer that disagrees with
/// the declared geometry is rejected with [`EqualizeError::MalformedFrame`].
pub fn luma(frame: &Frame) -> Result<Image<u8>> {
    let expected = frame.expected_len();
    if frame.data.len() != expected {
        return Err(EqualizeError::MalformedFrame {
            expected,
            got: frame.data.len(),
        });
    }

    match frame.encoding {
        Encoding::Mono8 => Ok(Image::from_vec(
            frame.width,
            frame.height,
            frame.data.clone(),
        )),
        // Channel order differs; the weights don't.
        Encoding::Bgr8 => Ok(weighted_luma(frame, [0.114, 0.587, 0.299])),
        Encoding::Rgb8 => Ok(weighted_luma(frame, [0.299, 0.587, 0.114])),
        other => Err(EqualizeError::UnsupportedEncoding { encoding: other }),
    }
}

/// Collapse an interleaved 3-channel buffer to luma with per-channel
/// weights given in buffer order.
fn weighted_luma(frame: &Frame, weights: [f32; 3]) -> Image<u8> {
    let mut gray = Image::new(frame.width, frame.height);
    for y in 0..frame.height {
        let row_start = y * frame.width * 3;
        let src_row = &frame.data[row_start..row_start + frame.width * 3];
        let dst_row = gray.row_mut(y);
        for (x, px) in src_row.chunks_exact(3).enumerate() {
            let v = weights[0] * px[0] as f32
                + weights[1] * px[1] as f32
                + weights[2] * px[2] as f32;
            dst_row[x] = u8::from_f32(v);
        }
    }
    gray
}

/// Wrap a processed grayscale image as an outbound `Mono8` frame under the
/// given envelope.
pub fn mono8_frame(header: Header, gray: &Image<u8>) -> Frame {
    Frame::from_gray(header, gray)
}
