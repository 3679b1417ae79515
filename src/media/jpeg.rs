//! Minimal JPEG marker walk to read the frame dimensions of an encoded
//! image without decoding it.

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const TEM: u8 = 0x01;

/// Extract `(width, height)` from a JPEG's start-of-frame header.
///
/// Walks the marker stream and reads the first SOF0/SOF1/SOF2 segment
/// (baseline, extended sequential, progressive). Returns `None` for
/// anything that is not a well-formed JPEG.
#[must_use]
pub fn dimensions(bytes: &[u8]) -> Option<(u16, u16)> {
    // Every JPEG starts with SOI.
    if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] != SOI {
        return None;
    }

    let mut i = 2;
    loop {
        if i + 1 >= bytes.len() {
            return None;
        }
        if bytes[i] != 0xFF {
            return None;
        }

        // 0xFF fill bytes may pad the gap between segments.
        while i + 1 < bytes.len() && bytes[i + 1] == 0xFF {
            i += 1;
        }
        if i + 1 >= bytes.len() {
            return None;
        }

        let marker = bytes[i + 1];
        match marker {
            // Standalone markers carry no length field.
            SOI | TEM | 0xD0..=0xD7 => {
                i += 2;
            }
            EOI => return None,
            // SOF0, SOF1, SOF2: length(2) precision(1) height(2) width(2)
            0xC0 | 0xC1 | 0xC2 => {
                if i + 9 > bytes.len() {
                    return None;
                }
                let height = u16::from_be_bytes([bytes[i + 5], bytes[i + 6]]);
                let width = u16::from_be_bytes([bytes[i + 7], bytes[i + 8]]);
                return Some((width, height));
            }
            _ => {
                if i + 4 > bytes.len() {
                    return None;
                }
                // Segment length is big-endian and includes its own two bytes.
                let len = u16::from_be_bytes([bytes[i + 2], bytes[i + 3]]) as usize;
                if len < 2 {
                    return None;
                }
                i += 2 + len;
            }
        }
    }
}
