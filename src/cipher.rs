//! Cipher frame: fixed-size crypt blocks over an inner channel.
//!
//! The frame cuts the clear stream into blocks of `clear_block_size` bytes;
//! each maps to one crypt block of `crypt_block_size >= clear_block_size`
//! bytes on the inner channel.  Blocks are keyed by their index, so any
//! block decrypts independently: `skip(p)` maps the clear position to
//! `floor(p / B) * E(B)` below and discards `p mod B` bytes after
//! decryption.  Backward movement inside the current block is free; anything
//! before it costs a re-decryption.
//!
//! The final partial block is padded to a whole block with an elastic run
//! (see [`crate::elastic`]); when the clear stream ends exactly on a block
//! boundary a full elastic block is appended, so the true clear length is
//! always recoverable from the last block alone.
//!
//! A wrong key is undetectable at this layer by design: decryption yields
//! garbage that the catalogue and per-entry checksums reject later.
//!
//! With the `parallel` feature, whole batches of blocks are transformed by a
//! worker pool; blocks are emitted in index order, so the output is
//! byte-for-byte identical to the serial path.

use crate::channel::{Channel, ChannelCore, Mode};
use crate::counter::Counter;
use crate::elastic;
use crate::error::{ArchiveError, Result};
use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

/// Clear bytes per cipher block.
pub const CLEAR_BLOCK: usize = 10 * 1024;

/// Context string for the passphrase KDF.  The header layout has no salt
/// field, so the stretch is deterministic per passphrase.
const KDF_CONTEXT: &[u8] = b"varc.cipher.v1";

// ── Block crypters ───────────────────────────────────────────────────────────

pub trait BlockCrypter: Send + Sync {
    fn clear_block_size(&self) -> usize;
    fn crypt_block_size(&self) -> usize;
    /// `clear.len()` is always exactly `clear_block_size`.
    fn encrypt_block(&self, index: u64, clear: &[u8]) -> Result<Vec<u8>>;
    /// `crypt.len()` is always exactly `crypt_block_size`.
    fn decrypt_block(&self, index: u64, crypt: &[u8]) -> Result<Vec<u8>>;
}

/// Keystream XOR.  The degenerate cipher: `E(B) = B`, position-preserving,
/// no integrity, key bytes cycled over the whole stream.
pub struct Scrambler {
    key: Vec<u8>,
}

impl Scrambler {
    pub fn new(passphrase: &str) -> Result<Self> {
        if passphrase.is_empty() {
            return Err(ArchiveError::Range("empty scramble key".into()));
        }
        Ok(Scrambler { key: passphrase.as_bytes().to_vec() })
    }

    fn apply(&self, index: u64, data: &[u8]) -> Vec<u8> {
        let start = index as u128 * CLEAR_BLOCK as u128;
        data.iter()
            .enumerate()
            .map(|(i, &b)| {
                let k = ((start + i as u128) % self.key.len() as u128) as usize;
                b ^ self.key[k]
            })
            .collect()
    }
}

impl BlockCrypter for Scrambler {
    fn clear_block_size(&self) -> usize {
        CLEAR_BLOCK
    }

    fn crypt_block_size(&self) -> usize {
        CLEAR_BLOCK
    }

    fn encrypt_block(&self, index: u64, clear: &[u8]) -> Result<Vec<u8>> {
        Ok(self.apply(index, clear))
    }

    fn decrypt_block(&self, index: u64, crypt: &[u8]) -> Result<Vec<u8>> {
        Ok(self.apply(index, crypt))
    }
}

/// AES-256 in CBC mode, one independent CBC run per block with an IV derived
/// from the block index.  `E(B) = B` because blocks are always full.
pub struct Aes256Cbc {
    key: [u8; 32],
}

impl Aes256Cbc {
    pub fn new(passphrase: &str) -> Result<Self> {
        Ok(Aes256Cbc { key: derive_key(passphrase)? })
    }

    fn iv(&self, index: u64) -> [u8; 16] {
        let digest = blake3::keyed_hash(&self.key, &index.to_be_bytes());
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&digest.as_bytes()[..16]);
        iv
    }
}

impl BlockCrypter for Aes256Cbc {
    fn clear_block_size(&self) -> usize {
        CLEAR_BLOCK
    }

    fn crypt_block_size(&self) -> usize {
        CLEAR_BLOCK
    }

    fn encrypt_block(&self, index: u64, clear: &[u8]) -> Result<Vec<u8>> {
        let iv = self.iv(index);
        let enc = cbc::Encryptor::<aes::Aes256>::new((&self.key).into(), (&iv).into());
        Ok(enc.encrypt_padded_vec_mut::<NoPadding>(clear))
    }

    fn decrypt_block(&self, index: u64, crypt: &[u8]) -> Result<Vec<u8>> {
        let iv = self.iv(index);
        let dec = cbc::Decryptor::<aes::Aes256>::new((&self.key).into(), (&iv).into());
        dec.decrypt_padded_vec_mut::<NoPadding>(crypt)
            .map_err(|_| ArchiveError::bug("cipher block is not a whole number of AES blocks"))
    }
}

/// Stretch a passphrase into a 256-bit key with argon2id.
pub fn derive_key(passphrase: &str) -> Result<[u8; 32]> {
    use argon2::{Algorithm, Argon2, Params, Version};
    let params = Params::new(64 * 1024, 3, 1, Some(32))
        .map_err(|e| ArchiveError::Range(format!("bad KDF parameters: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = [0u8; 32];
    argon2
        .hash_password_into(passphrase.as_bytes(), KDF_CONTEXT, &mut key)
        .map_err(|e| ArchiveError::Range(format!("key derivation failed: {e}")))?;
    Ok(key)
}

/// Cipher selection as seen by the facade and the CLIs.
pub enum CipherSpec {
    Scramble(String),
    Aes(String),
}

impl CipherSpec {
    pub fn crypter(&self) -> Result<Box<dyn BlockCrypter>> {
        match self {
            CipherSpec::Scramble(pass) => Ok(Box::new(Scrambler::new(pass)?)),
            CipherSpec::Aes(pass) => Ok(Box::new(Aes256Cbc::new(pass)?)),
        }
    }
}

// ── The channel wrapper ──────────────────────────────────────────────────────

pub struct CipherChannel {
    core: ChannelCore,
    below: Box<dyn Channel>,
    crypter: Box<dyn BlockCrypter>,
    /// Below-position of crypt block 0.
    base: Counter,
    // Write side.
    pending: Vec<u8>,
    next_block: u64,
    // Read side.
    total_blocks: u64,
    /// Clear length of the final block, after elastic trimming.
    last_clear: usize,
    loaded: Option<(u64, Vec<u8>)>,
    offset_in_block: usize,
}

impl CipherChannel {
    pub fn new_write(mut below: Box<dyn Channel>, crypter: Box<dyn BlockCrypter>) -> Result<Self> {
        let base = below.position()?;
        Ok(CipherChannel {
            core: ChannelCore::new(Mode::WriteOnly),
            below,
            crypter,
            base,
            pending: Vec::with_capacity(CLEAR_BLOCK),
            next_block: 0,
            total_blocks: 0,
            last_clear: 0,
            loaded: None,
            offset_in_block: 0,
        })
    }

    /// Open for reading.  The crypt stream is everything from the current
    /// below-position to its end of file.
    pub fn new_read(mut below: Box<dyn Channel>, crypter: Box<dyn BlockCrypter>) -> Result<Self> {
        let base = below.position()?;
        below.skip_to_eof()?;
        let mut total = below.position()?;
        total.sub_assign(&base)?;

        let eb = Counter::from(crypter.crypt_block_size());
        let (blocks, rem) = Counter::euclide(&total, &eb)?;
        if !rem.is_zero() {
            return Err(ArchiveError::Data(
                "ciphered stream is not a whole number of crypt blocks".into(),
            ));
        }
        let total_blocks = blocks
            .to_u64()
            .ok_or_else(|| ArchiveError::Memory("too many cipher blocks".into()))?;
        if total_blocks == 0 {
            return Err(ArchiveError::Data("ciphered stream is empty".into()));
        }

        let mut ch = CipherChannel {
            core: ChannelCore::new(Mode::ReadOnly),
            below,
            crypter,
            base,
            pending: Vec::new(),
            next_block: 0,
            total_blocks,
            last_clear: 0,
            loaded: None,
            offset_in_block: 0,
        };

        // Trim the elastic run off the final block to learn the clear length.
        let last = ch.fetch_block(total_blocks - 1)?;
        let pad = elastic::read_backward(&last)?;
        ch.last_clear = last.len() - pad;
        ch.loaded = Some((total_blocks - 1, last));
        ch.skip(&Counter::zero())?;
        Ok(ch)
    }

    /// Seal this layer (flush + elastic pad) and hand the inner channel back.
    pub fn finish(mut self) -> Result<Box<dyn Channel>> {
        if self.mode() == Mode::WriteOnly && !self.core().eof_written {
            self.write_eof()?;
        }
        Ok(self.below)
    }

    pub fn into_inner(self) -> Box<dyn Channel> {
        self.below
    }

    fn clear_block(&self) -> usize {
        self.crypter.clear_block_size()
    }

    /// Read and decrypt crypt block `index` from below.
    fn fetch_block(&mut self, index: u64) -> Result<Vec<u8>> {
        let eb = self.crypter.crypt_block_size();
        let mut pos = self.base.clone();
        pos.add_assign(&Counter::from(index).mul(&Counter::from(eb)));
        if !self.below.skip(&pos)? {
            return Err(ArchiveError::Data("cipher block out of range".into()));
        }
        let mut crypt = vec![0u8; eb];
        if self.below.read(&mut crypt)? != eb {
            return Err(ArchiveError::Data("truncated cipher block".into()));
        }
        self.crypter.decrypt_block(index, &crypt)
    }

    /// Clear length of block `index` (all blocks are full except the last).
    fn block_clear_len(&self, index: u64) -> usize {
        if index + 1 == self.total_blocks {
            self.last_clear
        } else {
            self.clear_block()
        }
    }

    /// Encrypt and emit every complete block sitting in `pending`.
    fn flush_full_blocks(&mut self) -> Result<()> {
        let b = self.clear_block();
        let full = self.pending.len() / b;
        if full == 0 {
            return Ok(());
        }
        let blocks: Vec<Vec<u8>> =
            self.pending.drain(..full * b).collect::<Vec<u8>>().chunks(b).map(<[u8]>::to_vec).collect();
        let first_index = self.next_block;
        let crypter = &*self.crypter;

        #[cfg(feature = "parallel")]
        let crypts: Vec<Result<Vec<u8>>> = {
            use rayon::prelude::*;
            blocks
                .par_iter()
                .enumerate()
                .map(|(i, clear)| crypter.encrypt_block(first_index + i as u64, clear))
                .collect()
        };
        #[cfg(not(feature = "parallel"))]
        let crypts: Vec<Result<Vec<u8>>> = blocks
            .iter()
            .enumerate()
            .map(|(i, clear)| crypter.encrypt_block(first_index + i as u64, clear))
            .collect();

        // Ordered emission regardless of how the transforms were scheduled.
        for crypt in crypts {
            self.below.write_all(&crypt?)?;
            self.next_block += 1;
        }
        Ok(())
    }
}

impl Channel for CipherChannel {
    fn core(&self) -> &ChannelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ChannelCore {
        &mut self.core
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.loaded.is_none() {
            let block = self.fetch_block(0)?;
            self.loaded = Some((0, block));
        }
        loop {
            let index = self.loaded.as_ref().expect("loaded above").0;
            let clear_len = self.block_clear_len(index);
            if self.offset_in_block < clear_len {
                let n = (clear_len - self.offset_in_block).min(buf.len());
                let clear = &self.loaded.as_ref().expect("loaded above").1;
                buf[..n].copy_from_slice(&clear[self.offset_in_block..self.offset_in_block + n]);
                self.offset_in_block += n;
                return Ok(n);
            }
            // Advance to the next block or report end of clear stream.
            if index + 1 >= self.total_blocks {
                return Ok(0);
            }
            let block = self.fetch_block(index + 1)?;
            self.loaded = Some((index + 1, block));
            self.offset_in_block = 0;
        }
    }

    fn write_raw(&mut self, buf: &[u8]) -> Result<()> {
        self.pending.extend_from_slice(buf);
        if self.pending.len() >= self.clear_block() {
            self.flush_full_blocks()?;
        }
        Ok(())
    }

    fn write_eof(&mut self) -> Result<()> {
        let b = self.clear_block();
        let mut pad = b - self.pending.len() % b;
        if pad == 0 {
            pad = b;
        }
        let run = elastic::build(pad)?;
        self.pending.extend_from_slice(&run);
        self.flush_full_blocks()?;
        if !self.pending.is_empty() {
            return Err(ArchiveError::bug("elastic pad did not fill the last block"));
        }
        self.mark_eof_written();
        self.below.write_eof()
    }

    fn skip(&mut self, pos: &Counter) -> Result<bool> {
        if self.mode() != Mode::ReadOnly {
            return Err(ArchiveError::Feature("a ciphered write stream is sequential".into()));
        }
        let b = Counter::from(self.clear_block());
        let (q, r) = Counter::euclide(pos, &b)?;
        let index = q
            .to_u64()
            .ok_or_else(|| ArchiveError::Memory("clear position out of range".into()))?;
        let within = r.to_u64().expect("remainder below a usize divisor") as usize;
        if index >= self.total_blocks || within > self.block_clear_len(index) {
            return Ok(false);
        }
        let reload = match &self.loaded {
            Some((i, _)) => *i != index,
            None => true,
        };
        if reload {
            let block = self.fetch_block(index)?;
            self.loaded = Some((index, block));
        }
        self.offset_in_block = within;
        Ok(true)
    }

    fn skip_relative(&mut self, delta: i64) -> Result<bool> {
        let mut target = self.position()?;
        if delta >= 0 {
            target.add_assign(&Counter::from(delta as u64));
            self.skip(&target)
        } else {
            let back = Counter::from(delta.unsigned_abs());
            if target < back {
                self.skip(&Counter::zero())?;
                Ok(false)
            } else {
                target.sub_assign(&back)?;
                self.skip(&target)
            }
        }
    }

    fn skip_to_eof(&mut self) -> Result<bool> {
        if self.mode() != Mode::ReadOnly {
            return Ok(true);
        }
        let mut end = Counter::from(self.clear_block()).mul(&Counter::from(self.total_blocks - 1));
        end.add_assign(&Counter::from(self.last_clear));
        self.skip(&end)
    }

    fn position(&mut self) -> Result<Counter> {
        match (&self.loaded, self.mode()) {
            (_, Mode::WriteOnly) => {
                let mut p = Counter::from(self.next_block).mul(&Counter::from(self.clear_block()));
                p.add_assign(&Counter::from(self.pending.len()));
                Ok(p)
            }
            (Some((i, _)), _) => {
                let mut p = Counter::from(*i).mul(&Counter::from(self.clear_block()));
                p.add_assign(&Counter::from(self.offset_in_block));
                Ok(p)
            }
            (None, _) => Ok(Counter::zero()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemChannel;

    fn roundtrip(spec: &CipherSpec, payload: &[u8]) -> Vec<u8> {
        let below: Box<dyn Channel> = Box::new(MemChannel::new(Mode::ReadWrite));
        let mut ch = CipherChannel::new_write(below, spec.crypter().unwrap()).unwrap();
        ch.write_all(payload).unwrap();
        let mut below = ch.finish().unwrap();
        below.skip(&Counter::zero()).unwrap();

        let mut rd =
            CipherChannel::new_read(below, spec.crypter().unwrap()).unwrap();
        let mut out = vec![0u8; payload.len() + 64];
        let n = rd.read(&mut out).unwrap();
        out.truncate(n);
        out
    }

    #[test]
    fn scrambler_roundtrip_and_length_recovery() {
        let spec = CipherSpec::Scramble("k3y".into());
        let payload = b"scrambled but recoverable".repeat(40);
        assert_eq!(roundtrip(&spec, &payload), payload);
    }

    #[test]
    fn aes_roundtrip_across_blocks() {
        let spec = CipherSpec::Aes("passphrase".into());
        // Spans three blocks with a partial tail.
        let payload: Vec<u8> = (0..2 * CLEAR_BLOCK + 777).map(|i| (i % 251) as u8).collect();
        assert_eq!(roundtrip(&spec, &payload), payload);
    }

    #[test]
    fn exact_block_multiple_gets_a_full_elastic_block() {
        let spec = CipherSpec::Scramble("zz".into());
        let payload = vec![0xabu8; CLEAR_BLOCK];
        let below: Box<dyn Channel> = Box::new(MemChannel::new(Mode::ReadWrite));
        let mut ch = CipherChannel::new_write(below, spec.crypter().unwrap()).unwrap();
        ch.write_all(&payload).unwrap();
        let mut below = ch.finish().unwrap();
        assert_eq!(below.position().unwrap().to_u64(), Some(2 * CLEAR_BLOCK as u64));
        below.skip(&Counter::zero()).unwrap();
        let mut rd = CipherChannel::new_read(below, spec.crypter().unwrap()).unwrap();
        let mut out = vec![0u8; 3 * CLEAR_BLOCK];
        assert_eq!(rd.read(&mut out).unwrap(), CLEAR_BLOCK);
    }

    #[test]
    fn clear_positions_map_to_crypt_blocks() {
        let spec = CipherSpec::Aes("s33k".into());
        let payload: Vec<u8> = (0..3 * CLEAR_BLOCK).map(|i| (i % 241) as u8).collect();
        let below: Box<dyn Channel> = Box::new(MemChannel::new(Mode::ReadWrite));
        let mut ch = CipherChannel::new_write(below, spec.crypter().unwrap()).unwrap();
        ch.write_all(&payload).unwrap();
        let mut below = ch.finish().unwrap();
        below.skip(&Counter::zero()).unwrap();
        let mut rd = CipherChannel::new_read(below, spec.crypter().unwrap()).unwrap();

        let probe = CLEAR_BLOCK as u64 + 17;
        assert!(rd.skip(&Counter::from(probe)).unwrap());
        let mut buf = [0u8; 8];
        assert_eq!(rd.read(&mut buf).unwrap(), 8);
        assert_eq!(&buf[..], &payload[probe as usize..probe as usize + 8]);
        assert_eq!(rd.position().unwrap().to_u64(), Some(probe + 8));
    }

    #[test]
    fn wrong_key_yields_garbage_not_an_error() {
        let spec = CipherSpec::Scramble("right".into());
        let payload = b"some clear text some clear text!".to_vec();
        let below: Box<dyn Channel> = Box::new(MemChannel::new(Mode::ReadWrite));
        let mut ch = CipherChannel::new_write(below, spec.crypter().unwrap()).unwrap();
        ch.write_all(&payload).unwrap();
        let mut below = ch.finish().unwrap();
        below.skip(&Counter::zero()).unwrap();

        let wrong = CipherSpec::Scramble("wrong".into());
        // The elastic trim may reject the garbage tail; either a data error
        // or garbage output is acceptable, never a key-mismatch diagnosis.
        match CipherChannel::new_read(below, wrong.crypter().unwrap()) {
            Ok(mut rd) => {
                let mut out = vec![0u8; payload.len()];
                let _ = rd.read(&mut out);
                assert_ne!(out, payload);
            }
            Err(ArchiveError::Data(_)) => {}
            Err(other) => panic!("unexpected error kind: {other}"),
        }
    }
}
