//! Reusable gzip encoders.
//!
//! A deflate state is a few hundred kilobytes; encoders are checked out per
//! response and handed back when the [`PooledEncoder`] guard drops.

use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use flate2::write::DeflateEncoder;
use flate2::{Compression, Crc};

/// Fixed gzip member header: deflate, no flags, no mtime, unknown OS.
const GZIP_HEADER: [u8; 10] = [0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff];

static NEXT_ENCODER_ID: AtomicU64 = AtomicU64::new(0);

/// A resettable gzip stream encoder.
///
/// Output is produced incrementally: [`GzipEncoder::header`] once, then the
/// result of each [`GzipEncoder::write`], then [`GzipEncoder::finish`].
pub struct GzipEncoder {
    id: u64,
    deflate: DeflateEncoder<Vec<u8>>,
    crc: Crc,
}

impl GzipEncoder {
    pub fn new(level: Compression) -> Self {
        Self {
            id: NEXT_ENCODER_ID.fetch_add(1, Ordering::Relaxed),
            deflate: DeflateEncoder::new(Vec::new(), level),
            crc: Crc::new(),
        }
    }

    /// Identity of this encoder, stable across resets.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Drop any state left by a previous stream.
    pub fn reset(&mut self) -> io::Result<()> {
        self.deflate.reset(Vec::new())?;
        self.crc.reset();
        Ok(())
    }

    pub fn header(&self) -> Bytes {
        Bytes::from_static(&GZIP_HEADER)
    }

    /// Feed a chunk, returning whatever compressed bytes are ready.
    pub fn write(&mut self, chunk: &[u8]) -> io::Result<Bytes> {
        self.crc.update(chunk);
        self.deflate.write_all(chunk)?;
        Ok(Bytes::from(std::mem::take(self.deflate.get_mut())))
    }

    /// Close the deflate stream and append the gzip trailer.
    pub fn finish(&mut self) -> io::Result<Bytes> {
        self.deflate.try_finish()?;
        let mut out = std::mem::take(self.deflate.get_mut());
        out.extend_from_slice(&self.crc.sum().to_le_bytes());
        out.extend_from_slice(&self.crc.amount().to_le_bytes());
        Ok(Bytes::from(out))
    }
}

impl Default for GzipEncoder {
    fn default() -> Self {
        Self::new(Compression::default())
    }
}

impl std::fmt::Debug for GzipEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GzipEncoder").field("id", &self.id).finish()
    }
}

/// Source of encoders for the compression stage.
pub trait EncoderPool: Send + Sync + 'static {
    /// Take an encoder out of the pool, creating one if none is idle.
    fn acquire(&self) -> GzipEncoder;

    /// Give a reset encoder back. Called at most once per `acquire`.
    fn release(&self, encoder: GzipEncoder);
}

/// Check out an encoder wrapped in a guard that returns it on drop.
pub fn checkout(pool: &Arc<dyn EncoderPool>) -> PooledEncoder {
    PooledEncoder {
        encoder: Some(pool.acquire()),
        pool: pool.clone(),
    }
}

/// Mutex-protected free list with a cap on idle encoders.
pub struct SharedEncoderPool {
    idle: Mutex<Vec<GzipEncoder>>,
    max_idle: usize,
    level: Compression,
}

impl SharedEncoderPool {
    pub fn new(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
            level: Compression::default(),
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }
}

impl EncoderPool for SharedEncoderPool {
    fn acquire(&self) -> GzipEncoder {
        let reused = match self.idle.lock() {
            Ok(mut idle) => idle.pop(),
            Err(_) => None,
        };
        reused.unwrap_or_else(|| GzipEncoder::new(self.level))
    }

    fn release(&self, encoder: GzipEncoder) {
        if let Ok(mut idle) = self.idle.lock() {
            // Keep pool size reasonable
            if idle.len() < self.max_idle {
                idle.push(encoder);
            }
        }
    }
}

impl std::fmt::Debug for SharedEncoderPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedEncoderPool")
            .field("idle", &self.idle_count())
            .field("max_idle", &self.max_idle)
            .finish()
    }
}

/// RAII wrapper that returns the encoder to its pool on drop
pub struct PooledEncoder {
    encoder: Option<GzipEncoder>,
    pool: Arc<dyn EncoderPool>,
}

impl PooledEncoder {
    pub fn encoder(&mut self) -> io::Result<&mut GzipEncoder> {
        self.encoder
            .as_mut()
            .ok_or_else(|| io::Error::other("Encoder not available"))
    }
}

impl Drop for PooledEncoder {
    fn drop(&mut self) {
        if let Some(mut encoder) = self.encoder.take() {
            // Idle encoders are always closed and reset.
            match encoder.reset() {
                Ok(()) => self.pool.release(encoder),
                Err(e) => tracing::warn!(error = %e, id = encoder.id(), "Discarding gzip encoder"),
            }
        }
    }
}
