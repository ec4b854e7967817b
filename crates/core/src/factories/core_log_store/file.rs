//! On-disk layout of a file-backed log store.
//!
//! - `names.json` maps local log names to log keys.
//! - `<key>.log` holds the entries of one log, each written as a
//!   little-endian `u32` length followed by the entry bytes.
//!
//! A trailing record cut short by a crash is dropped on load. The next
//! append truncates it away before writing.

use bytes::{Buf, BufMut};
use hrss_api::*;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

const NAMES_FILE: &str = "names.json";
const LEN_PREFIX: usize = 4;

#[derive(Debug)]
pub(super) struct LogDir {
    dir: PathBuf,
    sync_data: bool,
}

impl LogDir {
    pub fn open(dir: PathBuf, sync_data: bool) -> HrssResult<Self> {
        std::fs::create_dir_all(&dir).map_err(|err| {
            HrssError::other_src(format!("create {}", dir.display()), err)
        })?;
        Ok(Self { dir, sync_data })
    }

    fn log_path(&self, key: &LogKey) -> PathBuf {
        self.dir.join(format!("{key}.log"))
    }

    pub fn has(&self, key: &LogKey) -> bool {
        self.log_path(key).exists()
    }

    pub fn load_names(&self) -> HrssResult<HashMap<String, LogKey>> {
        let path = self.dir.join(NAMES_FILE);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(HashMap::new())
            }
            Err(err) => return Err(err.into()),
        };
        serde_json::from_slice(&raw).map_err(|err| {
            HrssError::other_src(format!("parse {}", path.display()), err)
        })
    }

    pub fn save_names(&self, names: &HashMap<String, LogKey>) -> HrssResult<()> {
        let raw = serde_json::to_vec_pretty(names)
            .map_err(|err| HrssError::other_src("encode names", err))?;
        let tmp = self.dir.join(format!("{NAMES_FILE}.tmp"));
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, self.dir.join(NAMES_FILE))?;
        Ok(())
    }

    /// Read every complete record of a log. Missing files are empty logs.
    pub fn load(&self, key: &LogKey) -> HrssResult<Vec<bytes::Bytes>> {
        let raw = match std::fs::read(self.log_path(key)) {
            Ok(raw) => bytes::Bytes::from(raw),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Vec::new())
            }
            Err(err) => return Err(err.into()),
        };
        let (entries, _) = decode_records(raw);
        Ok(entries)
    }

    pub fn log_file(&self, key: &LogKey) -> HrssResult<LogFile> {
        let path = self.log_path(key);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;

        // drop a partial trailing record
        let on_disk = file.metadata()?.len();
        let valid = match std::fs::read(&path) {
            Ok(raw) => decode_records(bytes::Bytes::from(raw)).1,
            Err(err) => return Err(err.into()),
        };
        if valid < on_disk {
            tracing::warn!(
                path = %path.display(),
                on_disk,
                valid,
                "truncating partial record",
            );
            file.set_len(valid)?;
        }

        Ok(LogFile {
            file: Mutex::new(file),
            sync_data: self.sync_data,
        })
    }
}

#[derive(Debug)]
pub(super) struct LogFile {
    file: Mutex<std::fs::File>,
    sync_data: bool,
}

impl LogFile {
    pub fn write(&self, entries: &[bytes::Bytes]) -> HrssResult<()> {
        let mut buf = bytes::BytesMut::new();
        for entry in entries {
            encode_record(entry, &mut buf)?;
        }
        let mut file = self.file.lock().unwrap();
        file.write_all(&buf)?;
        if self.sync_data {
            file.sync_data()?;
        }
        Ok(())
    }
}

fn encode_record(entry: &[u8], buf: &mut bytes::BytesMut) -> HrssResult<()> {
    let len = u32::try_from(entry.len())
        .map_err(|_| HrssError::other("log entry too large"))?;
    buf.reserve(LEN_PREFIX + entry.len());
    buf.put_u32_le(len);
    buf.put_slice(entry);
    Ok(())
}

/// Decode complete records, returning them with the byte length they
/// occupy. Anything past that length is a partial record.
fn decode_records(mut raw: bytes::Bytes) -> (Vec<bytes::Bytes>, u64) {
    let mut out = Vec::new();
    let mut valid = 0;
    while raw.remaining() >= LEN_PREFIX {
        let len = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
        if raw.remaining() < LEN_PREFIX + len {
            break;
        }
        raw.advance(LEN_PREFIX);
        out.push(raw.split_to(len));
        valid += (LEN_PREFIX + len) as u64;
    }
    (out, valid)
}
