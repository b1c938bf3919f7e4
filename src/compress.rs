//! Compression frame.
//!
//! One algorithm per archive, tagged by a single byte in the archive header:
//! `n` none, `z` gzip, `y` bzip2, `l` lzo, `x` xz.  The `lzo` tag is
//! recognized for compatibility but this build carries no lzo engine;
//! selecting it is a `feature` error.
//!
//! The frame's coordinate system is the **inner channel's**: `position()`
//! reports the below offset, and `skip(pos)` resets the compression engine
//! and seeks below.  Positions are therefore only meaningful at segment
//! boundaries — which is exactly what [`Compressor::sync_write`] creates:
//! it finishes the current compressed stream so the next write opens a
//! fresh, self-contained segment.  The facade records one boundary per entry
//! payload and one before the catalogue, which is what makes both
//! individually addressable and recoverable.
//!
//! A corrupt segment surfaces as a `data` error carrying the boundary
//! offset as a resync hint.
//!
//! Per-entry compression opt-out is a plain algorithm switch at a boundary
//! ([`Compressor::set_algo`] to `None`), giving the entry a transparent
//! sub-frame.

use crate::channel::{Channel, ChannelCore, Mode};
use crate::counter::Counter;
use crate::error::{ArchiveError, Result};
use std::io::{self, Read, Write};

// ── Algorithm tags ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionAlgo {
    None,
    Gzip,
    Bzip2,
    Lzo,
    Xz,
}

impl CompressionAlgo {
    pub fn tag(self) -> u8 {
        match self {
            CompressionAlgo::None => b'n',
            CompressionAlgo::Gzip => b'z',
            CompressionAlgo::Bzip2 => b'y',
            CompressionAlgo::Lzo => b'l',
            CompressionAlgo::Xz => b'x',
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            b'n' => Ok(CompressionAlgo::None),
            b'z' => Ok(CompressionAlgo::Gzip),
            b'y' => Ok(CompressionAlgo::Bzip2),
            b'l' => Ok(CompressionAlgo::Lzo),
            b'x' => Ok(CompressionAlgo::Xz),
            other => Err(ArchiveError::Feature(format!(
                "unknown compression tag {:?}",
                other as char
            ))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CompressionAlgo::None => "none",
            CompressionAlgo::Gzip => "gzip",
            CompressionAlgo::Bzip2 => "bzip2",
            CompressionAlgo::Lzo => "lzo",
            CompressionAlgo::Xz => "xz",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" => Some(CompressionAlgo::None),
            "gzip" => Some(CompressionAlgo::Gzip),
            "bzip2" => Some(CompressionAlgo::Bzip2),
            "lzo" => Some(CompressionAlgo::Lzo),
            "xz" => Some(CompressionAlgo::Xz),
            _ => None,
        }
    }

    fn ensure_available(self) -> Result<()> {
        if self == CompressionAlgo::Lzo {
            Err(ArchiveError::Feature(
                "this build carries no lzo engine".into(),
            ))
        } else {
            Ok(())
        }
    }
}

// ── io adapters over a channel ───────────────────────────────────────────────

fn to_io(e: ArchiveError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

fn from_io(e: io::Error) -> ArchiveError {
    match e.downcast::<ArchiveError>() {
        Ok(inner) => inner,
        Err(e) => ArchiveError::Hardware(e.to_string()),
    }
}

struct ChannelIo(Box<dyn Channel>);

impl Write for ChannelIo {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write_all(buf).map_err(to_io)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for ChannelIo {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read_raw(buf).map_err(to_io)
    }
}

// ── Engines ──────────────────────────────────────────────────────────────────

enum Engine {
    /// Between segments; also the steady state of the `none` algorithm.
    Idle(ChannelIo),
    WGzip(flate2::write::GzEncoder<ChannelIo>),
    WBzip2(bzip2::write::BzEncoder<ChannelIo>),
    /// xz has no streaming encoder in this stack: the segment's clear bytes
    /// accumulate and are compressed in one pass at the boundary.
    WXz { sink: ChannelIo, clear: Vec<u8> },
    RGzip(flate2::read::GzDecoder<ChannelIo>),
    RBzip2(bzip2::read::BzDecoder<ChannelIo>),
    /// The whole xz segment is inflated at first read and served from memory.
    RXz { src: ChannelIo, out: Vec<u8>, served: usize, inflated: bool },
}

impl Engine {
    fn into_channel(self) -> Result<ChannelIo> {
        match self {
            Engine::Idle(c) => Ok(c),
            Engine::WGzip(enc) => enc.finish().map_err(from_io),
            Engine::WBzip2(enc) => enc.finish().map_err(from_io),
            Engine::WXz { mut sink, clear } => {
                let mut src = io::Cursor::new(clear);
                lzma_rs::xz_compress(&mut src, &mut sink).map_err(from_io)?;
                Ok(sink)
            }
            Engine::RGzip(dec) => Ok(dec.into_inner()),
            Engine::RBzip2(dec) => Ok(dec.into_inner()),
            Engine::RXz { src, .. } => Ok(src),
        }
    }
}

// ── Compressor ───────────────────────────────────────────────────────────────

pub struct Compressor {
    core: ChannelCore,
    algo: CompressionAlgo,
    engine: Option<Engine>,
    /// Below-offset of the current segment start; the resync hint attached
    /// to corruption reports.
    segment_start: Counter,
}

impl Compressor {
    pub fn new_write(algo: CompressionAlgo, mut below: Box<dyn Channel>) -> Result<Self> {
        algo.ensure_available()?;
        let segment_start = below.position()?;
        Ok(Compressor {
            core: ChannelCore::new(Mode::WriteOnly),
            algo,
            engine: Some(Engine::Idle(ChannelIo(below))),
            segment_start,
        })
    }

    pub fn new_read(algo: CompressionAlgo, mut below: Box<dyn Channel>) -> Result<Self> {
        algo.ensure_available()?;
        let segment_start = below.position()?;
        Ok(Compressor {
            core: ChannelCore::new(Mode::ReadOnly),
            algo,
            engine: Some(Engine::Idle(ChannelIo(below))),
            segment_start,
        })
    }

    /// Finish the current segment and hand the inner channel back without
    /// sealing it (the caller still writes the terminator through it).
    pub fn finish(mut self) -> Result<Box<dyn Channel>> {
        let engine = self.take_engine()?;
        Ok(engine.into_channel()?.0)
    }

    /// Switch algorithm.  Only legal at a segment boundary; the frame
    /// finishes the running segment first.
    pub fn set_algo(&mut self, algo: CompressionAlgo) -> Result<()> {
        algo.ensure_available()?;
        self.sync()?;
        self.algo = algo;
        Ok(())
    }

    pub fn algo(&self) -> CompressionAlgo {
        self.algo
    }

    /// Flush the compressor state so the next byte starts a self-contained
    /// segment, and return the below-offset of that boundary.
    pub fn sync_write(&mut self) -> Result<Counter> {
        if self.mode() != Mode::WriteOnly {
            return Err(ArchiveError::bug("sync_write on a read compressor"));
        }
        self.sync()?;
        self.position()
    }

    fn take_engine(&mut self) -> Result<Engine> {
        self.engine
            .take()
            .ok_or_else(|| ArchiveError::bug("compressor engine poisoned by an earlier error"))
    }

    /// Collapse whatever engine is running back to `Idle`.
    fn sync(&mut self) -> Result<()> {
        let engine = self.take_engine()?;
        let mut channel = engine.into_channel()?;
        self.segment_start = channel.0.position()?;
        self.engine = Some(Engine::Idle(channel));
        Ok(())
    }
}

impl Channel for Compressor {
    fn core(&self) -> &ChannelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ChannelCore {
        &mut self.core
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize> {
        // Lazily open a decoder at the current boundary.
        if matches!(self.engine, Some(Engine::Idle(_))) && self.algo != CompressionAlgo::None {
            let channel = match self.take_engine()? {
                Engine::Idle(c) => c,
                _ => unreachable!("checked just above"),
            };
            self.engine = Some(match self.algo {
                CompressionAlgo::Gzip => Engine::RGzip(flate2::read::GzDecoder::new(channel)),
                CompressionAlgo::Bzip2 => Engine::RBzip2(bzip2::read::BzDecoder::new(channel)),
                CompressionAlgo::Xz => {
                    Engine::RXz { src: channel, out: Vec::new(), served: 0, inflated: false }
                }
                CompressionAlgo::None | CompressionAlgo::Lzo => unreachable!(),
            });
        }
        match self.engine.as_mut().ok_or_else(|| ArchiveError::bug("engine poisoned"))? {
            Engine::Idle(c) => c.0.read_raw(buf),
            Engine::RGzip(dec) => match dec.read(buf) {
                Ok(n) => Ok(n),
                Err(e) => Err(self_corrupt(&self.segment_start, e)),
            },
            Engine::RBzip2(dec) => match dec.read(buf) {
                Ok(n) => Ok(n),
                Err(e) => Err(self_corrupt(&self.segment_start, e)),
            },
            Engine::RXz { src, out, served, inflated } => {
                if !*inflated {
                    *inflated = true;
                    let mut rd = io::BufReader::new(&mut *src);
                    let mut body = Vec::new();
                    lzma_rs::xz_decompress(&mut rd, &mut body).map_err(|e| match e {
                        lzma_rs::error::Error::IoError(cause) => {
                            self_corrupt(&self.segment_start, cause)
                        }
                        other => ArchiveError::Data(format!(
                            "corrupt xz segment starting at offset {}: {other}",
                            self.segment_start
                        )),
                    })?;
                    *out = body;
                }
                let n = (out.len() - *served).min(buf.len());
                buf[..n].copy_from_slice(&out[*served..*served + n]);
                *served += n;
                Ok(n)
            }
            _ => Err(ArchiveError::bug("read on a write engine")),
        }
    }

    fn write_raw(&mut self, buf: &[u8]) -> Result<()> {
        // Lazily open an encoder at the current boundary.
        if matches!(self.engine, Some(Engine::Idle(_))) && self.algo != CompressionAlgo::None {
            let channel = match self.take_engine()? {
                Engine::Idle(c) => c,
                _ => unreachable!("checked just above"),
            };
            self.engine = Some(match self.algo {
                CompressionAlgo::Gzip => Engine::WGzip(flate2::write::GzEncoder::new(
                    channel,
                    flate2::Compression::default(),
                )),
                CompressionAlgo::Bzip2 => Engine::WBzip2(bzip2::write::BzEncoder::new(
                    channel,
                    bzip2::Compression::default(),
                )),
                CompressionAlgo::Xz => Engine::WXz { sink: channel, clear: Vec::new() },
                CompressionAlgo::None | CompressionAlgo::Lzo => unreachable!(),
            });
        }
        match self.engine.as_mut().ok_or_else(|| ArchiveError::bug("engine poisoned"))? {
            Engine::Idle(c) => c.0.write_all(buf),
            Engine::WGzip(enc) => enc.write_all(buf).map_err(from_io),
            Engine::WBzip2(enc) => enc.write_all(buf).map_err(from_io),
            Engine::WXz { clear, .. } => {
                clear.extend_from_slice(buf);
                Ok(())
            }
            _ => Err(ArchiveError::bug("write on a read engine")),
        }
    }

    fn write_eof(&mut self) -> Result<()> {
        self.sync()?;
        self.mark_eof_written();
        match self.engine.as_mut().ok_or_else(|| ArchiveError::bug("engine poisoned"))? {
            Engine::Idle(c) => c.0.write_eof(),
            _ => Err(ArchiveError::bug("engine not idle after sync")),
        }
    }

    fn skip(&mut self, pos: &Counter) -> Result<bool> {
        if self.mode() != Mode::ReadOnly {
            return Err(ArchiveError::Feature("a compressed write stream is sequential".into()));
        }
        // Reset the engine, then seek below to the boundary.
        let mut channel = self.take_engine()?.into_channel()?;
        let ok = channel.0.skip(pos)?;
        self.segment_start = pos.clone();
        self.engine = Some(Engine::Idle(channel));
        Ok(ok)
    }

    fn skip_relative(&mut self, _delta: i64) -> Result<bool> {
        Err(ArchiveError::Feature(
            "relative positioning has no meaning inside a compressed stream".into(),
        ))
    }

    fn skip_to_eof(&mut self) -> Result<bool> {
        let mut channel = self.take_engine()?.into_channel()?;
        let ok = channel.0.skip_to_eof()?;
        self.segment_start = channel.0.position()?;
        self.engine = Some(Engine::Idle(channel));
        Ok(ok)
    }

    fn position(&mut self) -> Result<Counter> {
        match self.engine.as_mut().ok_or_else(|| ArchiveError::bug("engine poisoned"))? {
            Engine::Idle(c) => c.0.position(),
            _ => Err(ArchiveError::bug(
                "compressor position queried away from a segment boundary",
            )),
        }
    }
}

fn self_corrupt(segment_start: &Counter, e: io::Error) -> ArchiveError {
    match e.downcast::<ArchiveError>() {
        Ok(inner) => inner,
        Err(e) => ArchiveError::Data(format!(
            "corrupt compressed segment starting at offset {segment_start}: {e}"
        )),
    }
}
