use chrono::NaiveDateTime;
use exif::experimental::Writer;
use exif::{Field, In, Reader, Tag, Value};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};
use thiserror::Error;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const EXIF_HEADER: &[u8] = b"Exif\0\0";
const ASCII_CHARSET: &[u8] = b"ASCII\0\0\0";
const EXIF_DATETIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Offsets the writer lays out itself.
const WRITER_MANAGED_TAGS: [Tag; 5] = [
    Tag::ExifIFDPointer,
    Tag::GPSInfoIFDPointer,
    Tag::InteropIFDPointer,
    Tag::JPEGInterchangeFormat,
    Tag::JPEGInterchangeFormatLength,
];

#[derive(Debug, Error)]
pub enum ExifError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("EXIF parsing error: {0}")]
    Parse(#[from] exif::Error),

    #[error("Metadata writing is only supported for JPEG files: {path}")]
    Unsupported { path: String },

    #[error("Malformed JPEG: {message}")]
    Malformed { message: String },
}

/// Reads capture dates from, and writes annotations into, embedded EXIF metadata.
pub struct ExifService;

impl ExifService {
    pub fn new() -> Self {
        Self
    }

    /// Capture time from `DateTimeOriginal`, falling back to `DateTime`.
    ///
    /// Unreadable files, files without EXIF and malformed values all yield `Ok(None)`.
    pub fn capture_datetime(&self, file_path: &Path) -> Result<Option<NaiveDateTime>, ExifError> {
        let file = match File::open(file_path) {
            Ok(f) => f,
            Err(_) => return Ok(None),
        };

        let mut buf_reader = BufReader::new(file);
        let exif_reader = match Reader::new().read_from_container(&mut buf_reader) {
            Ok(reader) => reader,
            Err(_) => return Ok(None),
        };

        let taken_at = [Tag::DateTimeOriginal, Tag::DateTime]
            .into_iter()
            .filter_map(|tag| exif_reader.get_field(tag, In::PRIMARY))
            .filter_map(|field| self.field_to_string(&field.value))
            .find_map(|datetime_str| self.parse_exif_datetime(&datetime_str));

        Ok(taken_at)
    }

    /// Current `UserComment`, without its character-code prefix.
    pub fn read_comment(&self, file_path: &Path) -> Result<Option<String>, ExifError> {
        let mut buf_reader = BufReader::new(File::open(file_path)?);
        let exif_reader = match Reader::new().read_from_container(&mut buf_reader) {
            Ok(reader) => reader,
            Err(exif::Error::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(exif_reader
            .get_field(Tag::UserComment, In::PRIMARY)
            .and_then(|field| match &field.value {
                Value::Undefined(data, _) if data.len() >= 8 => Some(
                    String::from_utf8_lossy(&data[8..])
                        .trim_end_matches('\0')
                        .to_string(),
                ),
                _ => None,
            }))
    }

    /// Overwrite the `UserComment` of a JPEG file with ASCII text.
    pub fn write_comment(&self, file_path: &Path, comment: &str) -> Result<(), ExifError> {
        let mut data = ASCII_CHARSET.to_vec();
        data.extend_from_slice(comment.as_bytes());
        self.write_fields(
            file_path,
            vec![Field {
                tag: Tag::UserComment,
                ifd_num: In::PRIMARY,
                value: Value::Undefined(data, 0),
            }],
        )
    }

    /// Set `DateTimeOriginal` on a JPEG file.
    pub fn write_date_taken(&self, file_path: &Path, taken_at: NaiveDateTime) -> Result<(), ExifError> {
        let formatted = taken_at.format(EXIF_DATETIME_FORMAT).to_string();
        self.write_fields(
            file_path,
            vec![Field {
                tag: Tag::DateTimeOriginal,
                ifd_num: In::PRIMARY,
                value: Value::Ascii(vec![formatted.into_bytes()]),
            }],
        )
    }

    /// Replace (or add) primary-image fields, keeping all other primary fields.
    /// The thumbnail IFD is not carried over.
    fn write_fields(&self, file_path: &Path, replacements: Vec<Field>) -> Result<(), ExifError> {
        let jpeg = fs::read(file_path)?;
        if !jpeg.starts_with(&JPEG_SOI) {
            return Err(ExifError::Unsupported {
                path: file_path.to_string_lossy().to_string(),
            });
        }

        let (mut fields, little_endian) =
            match Reader::new().read_from_container(&mut Cursor::new(&jpeg)) {
                Ok(existing) => (
                    existing
                        .fields()
                        .filter(|field| field.ifd_num == In::PRIMARY)
                        .filter(|field| !WRITER_MANAGED_TAGS.contains(&field.tag))
                        .filter(|field| !replacements.iter().any(|r| r.tag == field.tag))
                        .cloned()
                        .collect::<Vec<_>>(),
                    existing.little_endian(),
                ),
                Err(exif::Error::NotFound(_)) => (Vec::new(), false),
                Err(e) => return Err(e.into()),
            };
        fields.extend(replacements);

        let mut writer = Writer::new();
        for field in &fields {
            writer.push_field(field);
        }
        let mut tiff = Cursor::new(Vec::new());
        writer.write(&mut tiff, little_endian)?;

        let updated = splice_exif_segment(&jpeg, &tiff.into_inner())?;
        replace_file(file_path, &updated)?;
        Ok(())
    }

    fn field_to_string(&self, value: &Value) -> Option<String> {
        match value {
            Value::Ascii(vec) => vec.first().map(|ascii_val| {
                String::from_utf8_lossy(ascii_val)
                    .trim_end_matches('\0')
                    .trim()
                    .to_string()
            }),
            _ => None,
        }
    }

    fn parse_exif_datetime(&self, datetime_str: &str) -> Option<NaiveDateTime> {
        match NaiveDateTime::parse_from_str(datetime_str, EXIF_DATETIME_FORMAT) {
            Ok(dt) => Some(dt),
            Err(_) => {
                log::debug!("Ignoring malformed EXIF datetime: {:?}", datetime_str);
                None
            }
        }
    }
}

impl Default for ExifService {
    fn default() -> Self {
        Self::new()
    }
}

/// Staging name for a rewrite of `path`, in the same directory.
fn staging_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(".sortrs-tmp");
    path.with_file_name(name)
}

/// Swap `data` in for `path`'s contents; on failure `path` is untouched.
fn replace_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let staged = staging_path(path);
    let result = fs::write(&staged, data).and_then(|()| fs::rename(&staged, path));
    if result.is_err() {
        let _ = fs::remove_file(&staged);
    }
    result
}

/// Rebuild `jpeg` with a single APP1 Exif segment holding `tiff`.
///
/// Existing Exif segments are dropped; the new one goes after any leading APP0 (JFIF).
fn splice_exif_segment(jpeg: &[u8], tiff: &[u8]) -> Result<Vec<u8>, ExifError> {
    let malformed = |message: &str| ExifError::Malformed {
        message: message.to_string(),
    };

    let payload_len = 2 + EXIF_HEADER.len() + tiff.len();
    let payload_len =
        u16::try_from(payload_len).map_err(|_| malformed("EXIF block exceeds 64KiB"))?;
    let mut app1 = vec![0xFF, 0xE1];
    app1.extend_from_slice(&payload_len.to_be_bytes());
    app1.extend_from_slice(EXIF_HEADER);
    app1.extend_from_slice(tiff);

    let mut out = Vec::with_capacity(jpeg.len() + app1.len());
    out.extend_from_slice(&JPEG_SOI);
    let mut inserted = false;
    let mut pos = 2;

    loop {
        if pos + 2 > jpeg.len() {
            return Err(malformed("missing start of scan"));
        }
        if jpeg[pos] != 0xFF {
            return Err(malformed("expected marker"));
        }
        let marker = jpeg[pos + 1];
        if marker == 0xFF {
            // fill byte
            pos += 1;
            continue;
        }
        if !inserted && marker != 0xE0 {
            out.extend_from_slice(&app1);
            inserted = true;
        }
        if marker == 0xDA || marker == 0xD9 {
            out.extend_from_slice(&jpeg[pos..]);
            return Ok(out);
        }
        if marker == 0x01 || (0xD0..=0xD7).contains(&marker) {
            out.extend_from_slice(&jpeg[pos..pos + 2]);
            pos += 2;
            continue;
        }
        if pos + 4 > jpeg.len() {
            return Err(malformed("truncated segment header"));
        }
        let seg_len = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
        let end = pos + 2 + seg_len;
        if seg_len < 2 || end > jpeg.len() {
            return Err(malformed("segment length out of range"));
        }
        let is_exif = marker == 0xE1 && jpeg[pos + 4..end].starts_with(EXIF_HEADER);
        if !is_exif {
            out.extend_from_slice(&jpeg[pos..end]);
        }
        pos = end;
    }
}
