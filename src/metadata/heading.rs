//! Writing an edited heading back into a JPEG's EXIF block.

use anyhow::{anyhow, bail, Context, Result};
use exif::{Field, In, Rational, Tag, Value};
use std::io::Cursor;

const EXIF_HEADER: &[u8] = b"Exif\0\0";
const MARKER_APP0: u8 = 0xE0;
const MARKER_APP1: u8 = 0xE1;
const MARKER_SOS: u8 = 0xDA;
const MARKER_EOI: u8 = 0xD9;

/// Tags the writer derives itself; re-pushing them corrupts output.
const STRUCTURAL_TAGS: [Tag; 9] = [
    Tag::ExifIFDPointer,
    Tag::GPSInfoIFDPointer,
    Tag::InteropIFDPointer,
    Tag::StripOffsets,
    Tag::StripByteCounts,
    Tag::TileOffsets,
    Tag::TileByteCounts,
    Tag::JPEGInterchangeFormat,
    Tag::JPEGInterchangeFormatLength,
];

/// Return a copy of `jpeg` whose `GPSImgDirection` holds `heading` (true north).
///
/// Primary-image fields are preserved; the thumbnail IFD is dropped.
pub fn write_heading_tag(jpeg: &[u8], heading: f64) -> Result<Vec<u8>> {
    if !heading.is_finite() {
        bail!("Heading {} is not finite", heading);
    }
    if jpeg.len() < 4 || jpeg[0] != 0xFF || jpeg[1] != 0xD8 {
        bail!("Not a JPEG payload");
    }

    let (mut fields, little_endian) = match exif::Reader::new().read_from_container(&mut Cursor::new(jpeg)) {
        Ok(exif) => {
            let kept: Vec<Field> = exif
                .fields()
                .filter(|f| f.ifd_num == In::PRIMARY)
                .filter(|f| !matches!(f.tag, Tag::GPSImgDirection | Tag::GPSImgDirectionRef))
                .filter(|f| !STRUCTURAL_TAGS.contains(&f.tag))
                .cloned()
                .collect();
            (kept, exif.little_endian())
        }
        Err(exif::Error::NotFound(_)) => (Vec::new(), false),
        Err(e) => return Err(e).context("Failed to read existing EXIF block"),
    };

    let normalized = heading.rem_euclid(360.0);
    fields.push(Field {
        tag: Tag::GPSImgDirectionRef,
        ifd_num: In::PRIMARY,
        value: Value::Ascii(vec![b"T".to_vec()]),
    });
    fields.push(Field {
        tag: Tag::GPSImgDirection,
        ifd_num: In::PRIMARY,
        value: Value::Rational(vec![Rational {
            num: (normalized * 100.0).round() as u32,
            denom: 100,
        }]),
    });

    let mut writer = exif::experimental::Writer::new();
    for field in &fields {
        writer.push_field(field);
    }
    let mut tiff = Cursor::new(Vec::new());
    writer
        .write(&mut tiff, little_endian)
        .context("Failed to encode EXIF block")?;

    splice_exif_segment(jpeg, &tiff.into_inner())
}

/// Replace the JPEG's EXIF APP1 segment with one holding `tiff`, or insert
/// one when the image has none.
fn splice_exif_segment(jpeg: &[u8], tiff: &[u8]) -> Result<Vec<u8>> {
    let segment_len = EXIF_HEADER.len() + tiff.len() + 2;
    let segment_len = u16::try_from(segment_len)
        .map_err(|_| anyhow!("EXIF block of {} bytes does not fit in APP1", tiff.len()))?;

    let mut segment = Vec::with_capacity(segment_len as usize + 2);
    segment.extend_from_slice(&[0xFF, MARKER_APP1]);
    segment.extend_from_slice(&segment_len.to_be_bytes());
    segment.extend_from_slice(EXIF_HEADER);
    segment.extend_from_slice(tiff);

    let mut insert_at = 2;
    let mut pos = 2;
    while pos + 4 <= jpeg.len() {
        if jpeg[pos] != 0xFF {
            bail!("Malformed JPEG segment at offset {}", pos);
        }
        let marker = jpeg[pos + 1];
        if marker == MARKER_SOS || marker == MARKER_EOI {
            break;
        }
        let len = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
        let end = pos + 2 + len;
        if len < 2 || end > jpeg.len() {
            bail!("Truncated JPEG segment at offset {}", pos);
        }

        if marker == MARKER_APP1 && jpeg[pos + 4..end].starts_with(EXIF_HEADER) {
            let mut out = Vec::with_capacity(jpeg.len() + segment.len());
            out.extend_from_slice(&jpeg[..pos]);
            out.extend_from_slice(&segment);
            out.extend_from_slice(&jpeg[end..]);
            return Ok(out);
        }
        // Keep JFIF first when present
        if marker == MARKER_APP0 && pos == 2 {
            insert_at = end;
        }
        pos = end;
    }

    let mut out = Vec::with_capacity(jpeg.len() + segment.len());
    out.extend_from_slice(&jpeg[..insert_at]);
    out.extend_from_slice(&segment);
    out.extend_from_slice(&jpeg[insert_at..]);
    Ok(out)
}
