//! Text key-file parsing, with a gzip fallback.
//!
//! Grounded on `original_source/VocabLib/keys2.cpp`'s `ReadKeyFile`/
//! `GetNumberOfKeys`: a header line of "NUM DIM", then per keypoint one
//! metadata line ("y x scale orientation") followed by the 128-byte
//! descriptor written as seven lines of small integers (six of 20
//! values, one of 8). The original first tries the plain path, then
//! `<path>.gz`; this crate keeps that fallback via `flate2` rather than
//! shelling out to `gunzip`.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::GzDecoder;

use crate::descriptor::Descriptor;
use crate::error::{Result, VocabError};

/// Expected descriptor dimensionality for text key files (SPEC_FULL.md
/// §6).
pub const KEY_DESCRIPTOR_DIM: usize = 128;

const VALUES_PER_LINE: [usize; 7] = [20, 20, 20, 20, 20, 20, 8];

/// One parsed keypoint: its image-space metadata plus its descriptor.
#[derive(Debug, Clone)]
pub struct Keypoint {
    pub y: f32,
    pub x: f32,
    pub scale: f32,
    pub orientation: f32,
    pub descriptor: Descriptor,
}

/// Open `path`, falling back to `path` with a `.gz` suffix appended if
/// the plain path does not exist, matching the original's two-step
/// lookup.
fn open_with_gz_fallback(path: &Path) -> Result<Box<dyn BufRead>> {
    if path.exists() {
        return Ok(Box::new(BufReader::new(File::open(path)?)));
    }
    let mut gz_path = PathBuf::from(path);
    let mut name = gz_path.file_name().unwrap_or_default().to_os_string();
    name.push(".gz");
    gz_path.set_file_name(name);

    let file = File::open(&gz_path).map_err(|_| {
        VocabError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!(
                "neither {} nor {} exists",
                path.display(),
                gz_path.display()
            ),
        ))
    })?;
    Ok(Box::new(BufReader::new(GzDecoder::new(file))))
}

/// Parse every keypoint out of the key file at `path` (or its `.gz`
/// fallback), without any scale filtering.
pub fn read_keys(path: &Path) -> Result<Vec<Keypoint>> {
    let mut reader = open_with_gz_fallback(path)?;
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    parse_keys(&text)
}

/// Parse every keypoint out of the key file at `path`, discarding those
/// whose `scale` is below `min_scale` (SPEC_FULL.md §6: default 1.4 at
/// build-db time, 0.0 at match time).
pub fn read_keys_filtered(path: &Path, min_scale: f32) -> Result<Vec<Keypoint>> {
    Ok(read_keys(path)?
        .into_iter()
        .filter(|k| k.scale >= min_scale)
        .collect())
}

fn parse_keys(text: &str) -> Result<Vec<Keypoint>> {
    let mut lines = text.lines();

    let header = lines
        .next()
        .ok_or_else(|| VocabError::InvalidInput("empty key file".into()))?;
    let mut header_fields = header.split_whitespace();
    let num: usize = header_fields
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| VocabError::InvalidInput("missing keypoint count in header".into()))?;
    let dim: usize = header_fields
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| VocabError::InvalidInput("missing descriptor dimension in header".into()))?;
    if dim != KEY_DESCRIPTOR_DIM {
        return Err(VocabError::InvalidInput(format!(
            "unsupported descriptor dimension {} (expected {})",
            dim, KEY_DESCRIPTOR_DIM
        )));
    }

    let mut keypoints = Vec::with_capacity(num);
    for _ in 0..num {
        let meta_line = lines
            .next()
            .ok_or_else(|| VocabError::InvalidInput("truncated key file: missing metadata line".into()))?;
        let mut fields = meta_line.split_whitespace();
        let parse_f32 = |v: Option<&str>| -> Result<f32> {
            v.and_then(|s| s.parse().ok())
                .ok_or_else(|| VocabError::InvalidInput("malformed keypoint metadata line".into()))
        };
        let y = parse_f32(fields.next())?;
        let x = parse_f32(fields.next())?;
        let scale = parse_f32(fields.next())?;
        let orientation = parse_f32(fields.next())?;

        let mut descriptor = Vec::with_capacity(KEY_DESCRIPTOR_DIM);
        for &count in VALUES_PER_LINE.iter() {
            let line = lines.next().ok_or_else(|| {
                VocabError::InvalidInput("truncated key file: missing descriptor line".into())
            })?;
            let values: Vec<&str> = line.split_whitespace().collect();
            if values.len() != count {
                return Err(VocabError::InvalidInput(format!(
                    "expected {} values on descriptor line, got {}",
                    count,
                    values.len()
                )));
            }
            for v in values {
                let b: i32 = v
                    .parse()
                    .map_err(|_| VocabError::InvalidInput(format!("non-integer descriptor value {:?}", v)))?;
                if !(0..=255).contains(&b) {
                    return Err(VocabError::InvalidInput(format!(
                        "descriptor value {} out of range [0,255]",
                        b
                    )));
                }
                descriptor.push(b as u8);
            }
        }

        keypoints.push(Keypoint {
            y,
            x,
            scale,
            orientation,
            descriptor,
        });
    }

    Ok(keypoints)
}

/// Read a list file: one key-file path per line, blank lines ignored.
pub fn read_list_file(path: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut paths = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            paths.push(PathBuf::from(trimmed));
        }
    }
    Ok(paths)
}

/// Read the flat binary descriptor format (`ReadDescriptorFile` in the
/// original): a little-endian `u32` count, followed by `count * dim`
/// raw descriptor bytes.
pub fn read_binary_descriptors(path: &Path, dim: usize) -> Result<Vec<Descriptor>> {
    let mut file = BufReader::new(File::open(path)?);
    let num_points = file.read_u32::<LittleEndian>()?;
    let mut out = Vec::with_capacity(num_points as usize);
    for _ in 0..num_points {
        let mut d = vec![0u8; dim];
        file.read_exact(&mut d)?;
        out.push(d);
    }
    Ok(out)
}

/// Write `descriptors` (each of length `dim`) in the flat binary format
/// read by [`read_binary_descriptors`].
pub fn write_binary_descriptors(path: &Path, descriptors: &[Descriptor]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_u32::<LittleEndian>(descriptors.len() as u32)?;
    for d in descriptors {
        file.write_all(d)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_text(scale: &str) -> String {
        let mut s = String::new();
        s.push_str("1 128\n");
        s.push_str(&format!("10.0 20.0 {} 0.5\n", scale));
        for &count in VALUES_PER_LINE.iter() {
            let row: Vec<String> = (0..count).map(|_| "1".to_string()).collect();
            s.push_str(&row.join(" "));
            s.push('\n');
        }
        s
    }

    #[test]
    fn parses_header_and_single_keypoint() {
        let text = sample_text("2.0");
        let keys = parse_keys(&text).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].descriptor.len(), KEY_DESCRIPTOR_DIM);
        assert!(keys[0].descriptor.iter().all(|&b| b == 1));
        assert_eq!(keys[0].scale, 2.0);
    }

    #[test]
    fn rejects_wrong_dimension_header() {
        let text = "1 64\n0 0 0 0\n";
        let err = parse_keys(text).unwrap_err();
        assert!(matches!(err, VocabError::InvalidInput(_)));
    }

    #[test]
    fn scale_filter_drops_small_features() {
        let text = sample_text("1.0");
        let keys = parse_keys(&text).unwrap();
        let filtered: Vec<_> = keys.into_iter().filter(|k| k.scale >= 1.4).collect();
        assert!(filtered.is_empty());
    }

    #[test]
    fn rejects_out_of_range_descriptor_value() {
        let good_row: String = vec!["1"; 20].join(" ");
        let bad_row: String = {
            let mut vals = vec!["1"; 20];
            vals[0] = "300";
            vals.join(" ")
        };

        let mut s = String::new();
        s.push_str("1 128\n10.0 20.0 2.0 0.5\n");
        s.push_str(&bad_row);
        s.push('\n');
        for _ in 0..5 {
            s.push_str(&good_row);
            s.push('\n');
        }
        s.push_str(&vec!["1"; 8].join(" "));
        s.push('\n');

        let err = parse_keys(&s).unwrap_err();
        assert!(matches!(err, VocabError::InvalidInput(_)));
    }

    #[test]
    fn binary_descriptors_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("descs.bin");
        let descriptors = vec![vec![1u8, 2, 3, 4], vec![5, 6, 7, 8]];

        write_binary_descriptors(&path, &descriptors).unwrap();
        let read_back = read_binary_descriptors(&path, 4).unwrap();

        assert_eq!(read_back, descriptors);
    }
}
