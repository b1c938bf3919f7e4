//! Arbitrary-precision unsigned counter.
//!
//! Every size, offset, and file position in the archive format is a
//! [`Counter`]: archives may logically exceed 2^64 bytes, so native words
//! are never written to the wire.
//!
//! # Wire format
//!
//! ```text
//! [ 0x00 × k ][ marker ][ payload: groups × 4 bytes, big-endian ]
//! ```
//!
//! The marker byte has exactly one bit set.  Counting the preamble bytes and
//! then the marker bit from the most significant side gives the payload
//! length in fixed 4-byte groups: `groups = k*8 + bit_index + 1`.  The
//! payload is normalized (no leading zero group beyond what the 4-byte
//! rounding requires), so small values occupy two bytes total and the range
//! is unbounded.
//!
//! # In-memory representation
//!
//! A reduced big-endian byte vector: no leading zero byte, at least one byte
//! (zero is `[0]`).  Arithmetic is byte-wise schoolbook; division is the
//! shift-and-subtract form whose remainder invariant is
//! `a = q*b + r, 0 <= r < b`.

use crate::channel::Channel;
use crate::error::{ArchiveError, Result};
use std::cmp::Ordering;
use std::fmt;

/// Size in bytes of one payload group on the wire.
const GROUP: usize = 4;

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Counter {
    /// Reduced big-endian bytes; `[0]` encodes zero.
    bytes: Vec<u8>,
}

impl Counter {
    pub fn zero() -> Self {
        Counter { bytes: vec![0] }
    }

    pub fn is_zero(&self) -> bool {
        self.bytes == [0]
    }

    /// Strip leading zero bytes, keeping at least one byte.
    fn reduce(&mut self) {
        let first = self.bytes.iter().position(|&b| b != 0);
        match first {
            Some(0) => {}
            Some(n) => {
                self.bytes.drain(..n);
            }
            None => self.bytes = vec![0],
        }
    }

    /// Construct from raw big-endian bytes (any leading zeros are dropped).
    pub fn from_be_bytes(raw: &[u8]) -> Self {
        let mut c = Counter { bytes: raw.to_vec() };
        if c.bytes.is_empty() {
            c.bytes.push(0);
        }
        c.reduce();
        c
    }

    /// Checked narrowing to a native word.
    pub fn to_u64(&self) -> Option<u64> {
        if self.bytes.len() > 8 {
            return None;
        }
        let mut v = 0u64;
        for &b in &self.bytes {
            v = (v << 8) | u64::from(b);
        }
        Some(v)
    }

    // ── Wire format ─────────────────────────────────────────────────────────

    /// Serialize to `w` in the self-delimiting format.
    pub fn dump(&self, w: &mut dyn Channel) -> Result<()> {
        let width = self.bytes.len();
        let groups = width.div_ceil(GROUP);
        let justification = groups * GROUP - width;

        // Preamble: full zero bytes, then the single-set-bit marker.
        let full_zero_bytes = (groups - 1) / 8;
        let bit_index = (groups - 1) % 8; // 0 = MSB of the marker byte
        let marker: u8 = 0x80 >> bit_index;

        let zeros = [0u8; 64];
        let mut remaining = full_zero_bytes;
        while remaining > 0 {
            let n = remaining.min(zeros.len());
            w.write_all(&zeros[..n])?;
            remaining -= n;
        }
        w.write_all(&[marker])?;

        // Payload: zero-justify to a whole number of groups, then the bytes.
        w.write_all(&zeros[..justification])?;
        w.write_all(&self.bytes)?;
        Ok(())
    }

    /// Deserialize from `r`.  Fails with a `data` error on a malformed
    /// marker or a truncated payload.
    pub fn read(r: &mut dyn Channel) -> Result<Self> {
        let mut skip = 0u64;
        let marker = loop {
            let mut b = [0u8; 1];
            if r.read(&mut b)? == 0 {
                return Err(ArchiveError::Data(
                    "end of stream inside a counter preamble".into(),
                ));
            }
            if b[0] == 0 {
                skip += 1;
            } else {
                break b[0];
            }
        };

        if marker.count_ones() != 1 {
            return Err(ArchiveError::Data(format!(
                "counter marker byte {marker:#04x} has more than one bit set"
            )));
        }
        let bit_index = marker.leading_zeros() as u64;
        let groups = skip * 8 + bit_index + 1;

        let total = groups
            .checked_mul(GROUP as u64)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| ArchiveError::Memory("counter payload too large".into()))?;
        let mut payload = vec![0u8; total];
        if r.read(&mut payload)? != total {
            return Err(ArchiveError::Data(
                "end of stream inside a counter payload".into(),
            ));
        }
        Ok(Counter::from_be_bytes(&payload))
    }

    /// Number of bytes [`Counter::dump`] will emit for this value.
    pub fn wire_len(&self) -> usize {
        let groups = self.bytes.len().div_ceil(GROUP);
        (groups - 1) / 8 + 1 + groups * GROUP
    }

    // ── Arithmetic ──────────────────────────────────────────────────────────

    pub fn add_assign(&mut self, arg: &Counter) {
        if self.bytes.len() < arg.bytes.len() {
            let pad = arg.bytes.len() - self.bytes.len();
            self.bytes.splice(0..0, std::iter::repeat(0).take(pad));
        }
        let mut carry = 0u16;
        let mut ai = arg.bytes.len();
        for ri in (0..self.bytes.len()).rev() {
            let mut sum = u16::from(self.bytes[ri]) + carry;
            if ai > 0 {
                ai -= 1;
                sum += u16::from(arg.bytes[ai]);
            }
            self.bytes[ri] = (sum & 0xff) as u8;
            carry = sum >> 8;
            if ai == 0 && carry == 0 {
                break;
            }
        }
        if carry != 0 {
            self.bytes.insert(0, carry as u8);
        }
    }

    /// Subtraction; the type is unsigned by contract, so an underflow is a
    /// `range` error.
    pub fn sub_assign(&mut self, arg: &Counter) -> Result<()> {
        if (&*self) < arg {
            return Err(ArchiveError::Range(
                "counter subtraction would produce a negative value".into(),
            ));
        }
        let mut borrow = 0i16;
        let mut ai = arg.bytes.len();
        for ri in (0..self.bytes.len()).rev() {
            let mut diff = i16::from(self.bytes[ri]) - borrow;
            if ai > 0 {
                ai -= 1;
                diff -= i16::from(arg.bytes[ai]);
            }
            borrow = 0;
            if diff < 0 {
                diff += 256;
                borrow = 1;
            }
            self.bytes[ri] = diff as u8;
            if ai == 0 && borrow == 0 {
                break;
            }
        }
        self.reduce();
        Ok(())
    }

    fn mul_u8(&self, arg: u8) -> Counter {
        let mut out = vec![0u8; self.bytes.len() + 1];
        let mut carry = 0u16;
        for i in (0..self.bytes.len()).rev() {
            let p = u16::from(self.bytes[i]) * u16::from(arg) + carry;
            out[i + 1] = (p & 0xff) as u8;
            carry = p >> 8;
        }
        out[0] = carry as u8;
        Counter::from_be_bytes(&out)
    }

    pub fn mul(&self, arg: &Counter) -> Counter {
        let mut ret = Counter::zero();
        for &b in &self.bytes {
            ret.shl_bytes(1);
            ret.add_assign(&arg.mul_u8(b));
        }
        ret
    }

    fn shl_bytes(&mut self, n: usize) {
        if self.is_zero() {
            return;
        }
        self.bytes.extend(std::iter::repeat(0).take(n));
    }

    fn shr_bytes(&mut self, n: usize) {
        if n >= self.bytes.len() {
            self.bytes = vec![0];
        } else {
            self.bytes.truncate(self.bytes.len() - n);
        }
    }

    pub fn shl(&mut self, bits: u64) {
        let bytes = (bits / 8) as usize;
        let rem = (bits % 8) as u32;
        self.shl_bytes(bytes);
        if rem != 0 && !self.is_zero() {
            let mut carry = 0u8;
            for b in self.bytes.iter_mut().rev() {
                let v = (u16::from(*b) << rem) | u16::from(carry);
                *b = (v & 0xff) as u8;
                carry = (v >> 8) as u8;
            }
            if carry != 0 {
                self.bytes.insert(0, carry);
            }
        }
    }

    pub fn shr(&mut self, bits: u64) {
        let bytes = (bits / 8) as usize;
        let rem = (bits % 8) as u32;
        self.shr_bytes(bytes);
        if rem != 0 {
            let mut carry = 0u8;
            for b in self.bytes.iter_mut() {
                let v = u16::from(*b);
                let new = (v >> rem) | (u16::from(carry) << (8 - rem));
                carry = (v & ((1 << rem) - 1)) as u8;
                *b = new as u8;
            }
            self.reduce();
        }
    }

    /// Euclidean division: returns `(quotient, remainder)` with
    /// `a = q*b + r` and `0 <= r < b`.  Division by zero is a `range` error.
    pub fn euclide(a: &Counter, b: &Counter) -> Result<(Counter, Counter)> {
        if b.is_zero() {
            return Err(ArchiveError::Range("counter division by zero".into()));
        }
        if a < b {
            return Ok((Counter::zero(), a.clone()));
        }

        let mut rest = a.clone();
        let mut r = b.clone();
        while r.bytes.len() <= rest.bytes.len() {
            r.shl_bytes(1);
        }

        let one = Counter::from(1u64);
        let mut q = Counter::zero();
        while b < &r {
            r.shr_bytes(1);
            q.shl_bytes(1);
            while r <= rest {
                rest.sub_assign(&r)?;
                q.add_assign(&one);
            }
        }
        Ok((q, rest))
    }

    /// Consume the low end of this counter into `acc`, saturating at the
    /// word maximum.  After the call either `self` is zero (everything fit)
    /// or `acc == u64::MAX` and `self` holds the surplus.  I/O loops use
    /// this to obtain native-size byte budgets without overflow.
    pub fn unstack(&mut self, acc: &mut u64) {
        let headroom = u64::MAX - *acc;
        let step = Counter::from(headroom);
        if (&*self) < &step {
            // Fits: self has at most 8 significant bytes here.
            let v = self.to_u64().unwrap_or(0);
            *acc += v;
            *self = Counter::zero();
        } else {
            // Cannot happen: step <= self, checked above.
            let _ = self.sub_assign(&step);
            *acc = u64::MAX;
        }
    }
}

impl Default for Counter {
    fn default() -> Self {
        Counter::zero()
    }
}

impl From<u64> for Counter {
    fn from(v: u64) -> Self {
        Counter::from_be_bytes(&v.to_be_bytes())
    }
}

impl From<usize> for Counter {
    fn from(v: usize) -> Self {
        Counter::from(v as u64)
    }
}

impl PartialOrd for Counter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Counter {
    fn cmp(&self, other: &Self) -> Ordering {
        // Both sides are reduced: a longer vector is a larger value.
        self.bytes
            .len()
            .cmp(&other.bytes.len())
            .then_with(|| self.bytes.cmp(&other.bytes))
    }
}

impl fmt::Display for Counter {
    /// Decimal rendering, by repeated division.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(v) = self.to_u64() {
            return write!(f, "{v}");
        }
        let ten = Counter::from(10u64);
        let mut digits = Vec::new();
        let mut cur = self.clone();
        while !cur.is_zero() {
            let (q, r) = Counter::euclide(&cur, &ten).map_err(|_| fmt::Error)?;
            digits.push(b'0' + r.to_u64().unwrap_or(0) as u8);
            cur = q;
        }
        digits.reverse();
        f.write_str(std::str::from_utf8(&digits).map_err(|_| fmt::Error)?)
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Counter({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::mem::MemChannel;
    use crate::channel::{Channel as _, Mode};
    use proptest::prelude::*;

    fn roundtrip(c: &Counter) -> Counter {
        let mut ch = MemChannel::new(Mode::ReadWrite);
        c.dump(&mut ch).unwrap();
        ch.skip(&Counter::zero()).unwrap();
        Counter::read(&mut ch).unwrap()
    }

    #[test]
    fn small_values_occupy_five_bytes() {
        // one marker byte + one 4-byte group
        assert_eq!(Counter::from(0u64).wire_len(), 5);
        assert_eq!(Counter::from(255u64).wire_len(), 5);
        assert_eq!(Counter::from(u32::MAX as u64).wire_len(), 5);
        assert_eq!(Counter::from(u32::MAX as u64 + 1).wire_len(), 1 + 8);
    }

    #[test]
    fn dump_read_identity_on_factorial() {
        // 29! exceeds u64; exercises the multi-group path.
        let mut big = Counter::from(1u64);
        for i in 2u64..30 {
            big = big.mul(&Counter::from(i));
        }
        assert!(big.to_u64().is_none());
        assert_eq!(roundtrip(&big), big);
    }

    #[test]
    fn subtraction_underflow_is_a_range_error() {
        let mut a = Counter::from(3u64);
        assert!(a.sub_assign(&Counter::from(5u64)).is_err());
    }

    #[test]
    fn division_by_zero_is_a_range_error() {
        assert!(Counter::euclide(&Counter::from(1u64), &Counter::zero()).is_err());
    }

    #[test]
    fn unstack_saturates() {
        let mut c = Counter::from(10u64);
        let mut acc = u64::MAX - 3;
        c.unstack(&mut acc);
        assert_eq!(acc, u64::MAX);
        assert_eq!(c.to_u64(), Some(7));
        c.unstack(&mut acc);
        assert_eq!(c.to_u64(), Some(7)); // no headroom, nothing moves
        acc = 0;
        c.unstack(&mut acc);
        assert_eq!(acc, 7);
        assert!(c.is_zero());
    }

    #[test]
    fn decimal_display() {
        assert_eq!(Counter::zero().to_string(), "0");
        assert_eq!(Counter::from(1234567u64).to_string(), "1234567");
    }

    proptest! {
        #[test]
        fn wire_roundtrip(v in any::<u64>()) {
            let c = Counter::from(v);
            prop_assert_eq!(roundtrip(&c), c);
        }

        #[test]
        fn wide_wire_roundtrip(raw in proptest::collection::vec(any::<u8>(), 0..40)) {
            let c = Counter::from_be_bytes(&raw);
            prop_assert_eq!(roundtrip(&c), c);
        }

        #[test]
        fn euclide_invariant(a in any::<u64>(), b in 1u64..) {
            let (q, r) = Counter::euclide(&Counter::from(a), &Counter::from(b)).unwrap();
            prop_assert_eq!(q.to_u64().unwrap(), a / b);
            prop_assert_eq!(r.to_u64().unwrap(), a % b);
        }

        #[test]
        fn add_then_sub_is_identity(a in any::<u64>(), b in any::<u64>()) {
            let mut c = Counter::from(a);
            c.add_assign(&Counter::from(b));
            c.sub_assign(&Counter::from(b)).unwrap();
            prop_assert_eq!(c, Counter::from(a));
        }

        #[test]
        fn shifts_match_native(v in any::<u32>(), s in 0u64..20) {
            let mut c = Counter::from(v as u64);
            c.shl(s);
            prop_assert_eq!(c.to_u64(), Some((v as u64) << s));
            c.shr(s);
            prop_assert_eq!(c.to_u64(), Some(v as u64));
        }
    }
}
