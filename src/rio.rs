// rio.rs — Uniform I/O object for the snapshot codec.
//
// The reader and writer sides of the snapshot code talk to one type that
// hides whether bytes land in a file or an in-memory buffer, keeps a running
// CRC64 over everything that passes through, and can cap the bytes moved per
// call so a long transfer yields to a progress callback between chunks.
// File writes optionally issue a durable flush every `autosync` bytes to
// bound the amount of dirty page cache a big save can pile up.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};

use crate::crc64::crc64;
use crate::error::Result;
use crate::sds::Sds;

enum Backend {
    FileReader(BufReader<File>),
    FileWriter(BufWriter<File>),
    /// In-memory backend; reads consume from `pos`, writes append.
    Buffer { buf: Sds, pos: usize },
}

pub struct Rio {
    backend: Backend,
    checksum: u64,
    checksumming: bool,
    /// Total bytes moved through this object.
    processed: u64,
    /// Per-call chunk cap; 0 means unbounded.
    max_chunk: usize,
    /// Durable-flush interval for file writers; 0 disables.
    autosync: u64,
    since_sync: u64,
    progress: Option<Box<dyn FnMut(u64)>>,
}

impl Rio {
    fn with_backend(backend: Backend) -> Rio {
        Rio {
            backend,
            checksum: 0,
            checksumming: false,
            processed: 0,
            max_chunk: 0,
            autosync: 0,
            since_sync: 0,
            progress: None,
        }
    }

    pub fn file_reader(f: File) -> Rio {
        Rio::with_backend(Backend::FileReader(BufReader::new(f)))
    }

    pub fn file_writer(f: File) -> Rio {
        Rio::with_backend(Backend::FileWriter(BufWriter::new(f)))
    }

    /// Writable in-memory target.
    pub fn buffer() -> Rio {
        Rio::with_backend(Backend::Buffer { buf: Sds::new(), pos: 0 })
    }

    /// Readable in-memory source.
    pub fn from_buffer(buf: Sds) -> Rio {
        Rio::with_backend(Backend::Buffer { buf, pos: 0 })
    }

    /// Enables checksum accumulation over subsequent reads and writes.
    pub fn enable_checksum(&mut self) {
        self.checksumming = true;
    }

    pub fn checksum(&self) -> u64 {
        self.checksum
    }

    pub fn set_max_chunk(&mut self, bytes: usize) {
        self.max_chunk = bytes;
    }

    /// Durable flush (`sync_data`) every `bytes` written. File writers only.
    pub fn set_autosync(&mut self, bytes: u64) {
        self.autosync = bytes;
    }

    /// Callback invoked with the running byte count after every chunk,
    /// giving long transfers a place to yield.
    pub fn set_progress(&mut self, cb: Box<dyn FnMut(u64)>) {
        self.progress = Some(cb);
    }

    /// Bytes moved so far; for the in-memory writer this equals the buffer
    /// length, so it doubles as the output offset.
    pub fn tell(&self) -> u64 {
        self.processed
    }

    pub fn write(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let n = if self.max_chunk > 0 { data.len().min(self.max_chunk) } else { data.len() };
            let (chunk, rest) = data.split_at(n);
            if self.checksumming {
                self.checksum = crc64(self.checksum, chunk);
            }
            match &mut self.backend {
                Backend::FileWriter(w) => {
                    w.write_all(chunk)?;
                    self.since_sync += n as u64;
                    if self.autosync > 0 && self.since_sync >= self.autosync {
                        w.flush()?;
                        w.get_ref().sync_data()?;
                        self.since_sync = 0;
                    }
                }
                Backend::Buffer { buf, .. } => buf.cat(chunk),
                Backend::FileReader(_) => {
                    return Err(std::io::Error::other("write on read-only stream").into());
                }
            }
            self.processed += n as u64;
            if let Some(cb) = &mut self.progress {
                cb(self.processed);
            }
            data = rest;
        }
        Ok(())
    }

    /// Reads exactly `out.len()` bytes; a short read is an error.
    pub fn read(&mut self, out: &mut [u8]) -> Result<()> {
        let mut filled = 0usize;
        while filled < out.len() {
            let n = if self.max_chunk > 0 {
                (out.len() - filled).min(self.max_chunk)
            } else {
                out.len() - filled
            };
            let chunk = &mut out[filled..filled + n];
            match &mut self.backend {
                Backend::FileReader(r) => r.read_exact(chunk)?,
                Backend::Buffer { buf, pos } => {
                    if *pos + n > buf.len() {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "short read from buffer",
                        )
                        .into());
                    }
                    chunk.copy_from_slice(&buf.as_bytes()[*pos..*pos + n]);
                    *pos += n;
                }
                Backend::FileWriter(_) => {
                    return Err(std::io::Error::other("read on write-only stream").into());
                }
            }
            if self.checksumming {
                self.checksum = crc64(self.checksum, chunk);
            }
            filled += n;
            self.processed += n as u64;
            if let Some(cb) = &mut self.progress {
                cb(self.processed);
            }
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read(&mut b)?;
        Ok(b[0])
    }

    pub fn flush(&mut self) -> Result<()> {
        if let Backend::FileWriter(w) = &mut self.backend {
            w.flush()?;
        }
        Ok(())
    }

    /// Flush plus durable sync; used before the temp-file rename.
    pub fn sync_all(&mut self) -> Result<()> {
        if let Backend::FileWriter(w) = &mut self.backend {
            w.flush()?;
            w.get_ref().sync_all()?;
        }
        Ok(())
    }

    /// Consumes an in-memory writer, yielding its buffer.
    pub fn into_buffer(self) -> Option<Sds> {
        match self.backend {
            Backend::Buffer { buf, .. } => Some(buf),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn buffer_write_then_read_back() {
        let mut w = Rio::buffer();
        w.enable_checksum();
        w.write(b"hello ").unwrap();
        w.write(b"world").unwrap();
        assert_eq!(w.tell(), 11);
        let sum = w.checksum();
        assert_ne!(sum, 0);

        let mut r = Rio::from_buffer(w.into_buffer().unwrap());
        r.enable_checksum();
        let mut out = [0u8; 11];
        r.read(&mut out).unwrap();
        assert_eq!(&out, b"hello world");
        assert_eq!(r.checksum(), sum);
    }

    #[test]
    fn short_read_is_error() {
        let mut r = Rio::from_buffer(Sds::from_bytes(b"abc"));
        let mut out = [0u8; 4];
        assert!(r.read(&mut out).is_err());
    }

    #[test]
    fn chunked_moves_preserve_checksum() {
        let payload: Vec<u8> = (0..1000u32).flat_map(|v| v.to_le_bytes()).collect();
        let mut plain = Rio::buffer();
        plain.enable_checksum();
        plain.write(&payload).unwrap();

        let mut chunked = Rio::buffer();
        chunked.enable_checksum();
        chunked.set_max_chunk(33);
        chunked.write(&payload).unwrap();

        assert_eq!(plain.checksum(), chunked.checksum());
        assert_eq!(chunked.into_buffer().unwrap().as_bytes(), payload.as_slice());
    }

    #[test]
    fn progress_callback_fires_per_chunk() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let mut w = Rio::buffer();
        w.set_max_chunk(10);
        w.set_progress(Box::new(move |_| {
            seen.fetch_add(1, Ordering::Relaxed);
        }));
        w.write(&[0u8; 95]).unwrap();
        assert_eq!(count.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn file_round_trip_with_autosync() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rio.bin");
        let mut w = Rio::file_writer(File::create(&path).unwrap());
        w.enable_checksum();
        w.set_autosync(64);
        let payload = vec![7u8; 300];
        w.write(&payload).unwrap();
        w.sync_all().unwrap();
        let wsum = w.checksum();

        let mut r = Rio::file_reader(File::open(&path).unwrap());
        r.enable_checksum();
        let mut out = vec![0u8; 300];
        r.read(&mut out).unwrap();
        assert_eq!(out, payload);
        assert_eq!(r.checksum(), wsum);
    }

    #[test]
    fn direction_mismatch_errors() {
        let mut r = Rio::file_reader(File::open("/dev/null").unwrap());
        assert!(r.write(b"x").is_err());
    }
}
