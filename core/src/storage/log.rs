use crate::protocol::{BasicProperties, DeliveryMode};
use crate::{Result, TidemqError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use memmap2::MmapOptions;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Log record format:
/// [length: 8 bytes native-endian][crc: 4][valid: 1][mode: 1][id_len: 2][id][rk_len: 2][rk][body]
///
/// The CRC covers everything after itself. A record with `valid = 0` is a
/// delete marker: it carries only the id of an earlier message record, and
/// that message is dropped the next time the log is scanned or compacted.
const LENGTH_PREFIX: usize = 8;
const PAYLOAD_HEADER: usize = 4 + 1 + 1 + 2 + 2;

pub const LOG_EXTENSION: &str = "mqd";
pub const TMP_EXTENSION: &str = "mqd.tmp";

const MODE_DURABLE: u8 = 1;
const MODE_UNDURABLE: u8 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub valid: bool,
    pub properties: BasicProperties,
    pub body: Bytes,
}

impl LogRecord {
    pub fn message(properties: BasicProperties, body: Bytes) -> Self {
        Self {
            valid: true,
            properties,
            body,
        }
    }

    /// Marker retiring the message record with `id`
    pub fn tombstone(id: &str) -> Self {
        Self {
            valid: false,
            properties: BasicProperties::new(id, DeliveryMode::Durable, ""),
            body: Bytes::new(),
        }
    }

    /// Encode the payload (without the length prefix)
    pub fn encode(&self) -> Result<Vec<u8>> {
        let id = self.properties.id.as_bytes();
        let routing_key = self.properties.routing_key.as_bytes();
        let id_len = u16::try_from(id.len())
            .map_err(|_| TidemqError::Protocol("message id exceeds 65535 bytes".to_string()))?;
        let rk_len = u16::try_from(routing_key.len())
            .map_err(|_| TidemqError::Protocol("routing key exceeds 65535 bytes".to_string()))?;

        let capacity = PAYLOAD_HEADER + id.len() + routing_key.len() + self.body.len();
        let mut body = BytesMut::with_capacity(capacity);
        body.put_u8(u8::from(self.valid));
        body.put_u8(match self.properties.delivery_mode {
            DeliveryMode::Durable => MODE_DURABLE,
            DeliveryMode::Undurable => MODE_UNDURABLE,
        });
        body.put_u16(id_len);
        body.put_slice(id);
        body.put_u16(rk_len);
        body.put_slice(routing_key);
        body.put_slice(&self.body);

        let crc = crc32fast::hash(&body);
        let mut payload = Vec::with_capacity(4 + body.len());
        payload.extend_from_slice(&crc.to_be_bytes());
        payload.extend_from_slice(&body);
        Ok(payload)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < PAYLOAD_HEADER {
            return Err(TidemqError::Corrupt("record shorter than its header".to_string()));
        }

        let mut buf = payload;
        let crc = buf.get_u32();
        if crc32fast::hash(buf) != crc {
            return Err(TidemqError::Corrupt("CRC mismatch".to_string()));
        }

        let valid = match buf.get_u8() {
            0 => false,
            1 => true,
            other => return Err(TidemqError::Corrupt(format!("bad valid flag {}", other))),
        };
        let delivery_mode = match buf.get_u8() {
            MODE_DURABLE => DeliveryMode::Durable,
            MODE_UNDURABLE => DeliveryMode::Undurable,
            other => return Err(TidemqError::Corrupt(format!("bad delivery mode {}", other))),
        };
        let id = take_string(&mut buf)?;
        let routing_key = take_string(&mut buf)?;
        let body = Bytes::copy_from_slice(buf);

        Ok(Self {
            valid,
            properties: BasicProperties::new(id, delivery_mode, routing_key),
            body,
        })
    }
}

fn take_string(buf: &mut &[u8]) -> Result<String> {
    if buf.remaining() < 2 {
        return Err(TidemqError::Corrupt("truncated string length".to_string()));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(TidemqError::Corrupt("truncated string".to_string()));
    }
    let value = String::from_utf8(buf[..len].to_vec())
        .map_err(|e| TidemqError::Corrupt(format!("invalid utf-8: {}", e)))?;
    buf.advance(len);
    Ok(value)
}

/// A live message record found while scanning a log
#[derive(Debug, Clone)]
pub struct ScannedMessage {
    pub properties: BasicProperties,
    pub body: Bytes,
    /// Byte offset of the payload (record start + length prefix)
    pub offset: u64,
    /// Payload length in bytes
    pub length: u64,
}

/// Append-only log file for one queue
#[derive(Debug)]
pub struct QueueLog {
    path: PathBuf,
    tmp_path: PathBuf,
    file: File,
    sync_writes: bool,
}

impl QueueLog {
    /// Open (or create) `<dir>/<queue>.mqd`
    pub fn open<P: AsRef<Path>>(dir: P, queue_name: &str, sync_writes: bool) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let path = dir.join(format!("{}.{}", queue_name, LOG_EXTENSION));
        let tmp_path = dir.join(format!("{}.{}", queue_name, TMP_EXTENSION));
        let file = Self::open_file(&path)?;

        Ok(Self {
            path,
            tmp_path,
            file,
            sync_writes,
        })
    }

    fn open_file(path: &Path) -> Result<File> {
        Ok(OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record; returns the payload's `(offset, length)`
    pub fn append(&mut self, record: &LogRecord) -> Result<(u64, u64)> {
        let payload = record.encode()?;
        let start = self.file.seek(SeekFrom::End(0))?;

        let mut writer = BufWriter::new(&mut self.file);
        writer.write_all(&(payload.len() as u64).to_ne_bytes())?;
        writer.write_all(&payload)?;
        writer.flush()?;
        drop(writer);

        if self.sync_writes {
            self.file.sync_data()?;
        }
        Ok((start + LENGTH_PREFIX as u64, payload.len() as u64))
    }

    /// Live message records in log order.
    ///
    /// Delete markers cancel the earlier record with the same id. Scanning
    /// stops at the first truncated or undecodable record; everything before
    /// it is kept.
    pub fn scan(&self) -> Result<Vec<ScannedMessage>> {
        let file_size = self.file.metadata()?.len() as usize;
        if file_size == 0 {
            return Ok(Vec::new());
        }

        let mmap = unsafe { MmapOptions::new().map(&self.file)? };
        let mut live: Vec<Option<ScannedMessage>> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut pos = 0usize;

        while pos < mmap.len() {
            if pos + LENGTH_PREFIX > mmap.len() {
                warn!("Truncated length prefix at byte {} of {}", pos, self.path.display());
                break;
            }
            let mut prefix = [0u8; LENGTH_PREFIX];
            prefix.copy_from_slice(&mmap[pos..pos + LENGTH_PREFIX]);
            let len = u64::from_ne_bytes(prefix) as usize;

            let start = pos + LENGTH_PREFIX;
            let end = match start.checked_add(len) {
                Some(end) if end <= mmap.len() => end,
                _ => {
                    warn!("Truncated record at byte {} of {}", pos, self.path.display());
                    break;
                }
            };

            let record = match LogRecord::decode(&mmap[start..end]) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Undecodable record at byte {} of {}: {}", pos, self.path.display(), e);
                    break;
                }
            };

            if record.valid {
                index.insert(record.properties.id.clone(), live.len());
                live.push(Some(ScannedMessage {
                    properties: record.properties,
                    body: record.body,
                    offset: start as u64,
                    length: len as u64,
                }));
            } else if let Some(slot) = index.remove(&record.properties.id) {
                live[slot] = None;
            }
            pos = end;
        }

        Ok(live.into_iter().flatten().collect())
    }

    /// Rewrite the log keeping only live message records.
    ///
    /// Survivors are written to `<queue>.mqd.tmp`, which then replaces the
    /// log. Returns the survivors with their new offsets.
    pub fn compact(&mut self) -> Result<Vec<ScannedMessage>> {
        let live = self.scan()?;
        let before = self.size()?;

        let mut survivors = Vec::with_capacity(live.len());
        {
            let tmp = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.tmp_path)?;
            let mut writer = BufWriter::new(tmp);
            let mut pos = 0u64;

            for message in live {
                let payload =
                    LogRecord::message(message.properties.clone(), message.body.clone())
                        .encode()?;
                writer.write_all(&(payload.len() as u64).to_ne_bytes())?;
                writer.write_all(&payload)?;
                survivors.push(ScannedMessage {
                    offset: pos + LENGTH_PREFIX as u64,
                    length: payload.len() as u64,
                    ..message
                });
                pos += (LENGTH_PREFIX + payload.len()) as u64;
            }

            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        fs::rename(&self.tmp_path, &self.path)?;
        self.file = Self::open_file(&self.path)?;

        info!(
            "Compacted {}: {} -> {} bytes, {} live records",
            self.path.display(),
            before,
            self.size()?,
            survivors.len()
        );
        Ok(survivors)
    }

    pub fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Delete the log and any leftover compaction file
    pub fn remove(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        if self.tmp_path.exists() {
            fs::remove_file(&self.tmp_path)?;
        }
        debug!("Removed log {}", self.path.display());
        Ok(())
    }
}
