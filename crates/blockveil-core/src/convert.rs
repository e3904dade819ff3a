//! The conversion engine: a cursor over a (source, destination) bio pair
//! that advances one sector at a time, generating a fresh IV per sector and
//! driving it through a [`CipherEngine`].

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::bio::{Bio, Segment};
use crate::cipher::{CipherEngine, CompletionCallback, ConvertOutcome};
use crate::error::{CryptError, CryptResult};
use crate::iv::IvGenerator;
use crate::sector::{Direction, SectorNumber, SECTOR_SIZE};

/// How long a blocking (write) conversion waits for outstanding
/// asynchronous sectors before giving up. The timeout is treated as fatal
/// rather than silently abandoning the pending count: the barrier below
/// always reconciles every sector it submitted, one way or another, before
/// `run_blocking` returns.
pub const ASYNC_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Cursor position within one bio: which segment, and how far into it.
struct Cursor<'a> {
    bio: &'a Bio,
    segment: usize,
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(bio: &'a Bio) -> Self {
        Self { bio, segment: 0, offset: 0 }
    }

    fn at_end(&self) -> bool {
        self.segment >= self.bio.segments.len()
    }

    fn current_segment(&self) -> &'a Segment {
        &self.bio.segments[self.segment]
    }

    fn read_sector(&self, out: &mut [u8; SECTOR_SIZE]) {
        self.current_segment().read_into(self.offset, out.as_mut_slice());
    }

    /// Raw pointer to this cursor's current sector, valid for the life of
    /// the owning page. See [`Segment::sector_ptr`] for the safety
    /// argument that lets the asynchronous backend write through it after
    /// this call returns.
    fn sector_ptr(&self) -> *mut u8 {
        self.current_segment().sector_ptr(self.offset)
    }

    fn advance(&mut self) {
        let len = self.current_segment().len;
        self.offset += SECTOR_SIZE;
        if self.offset >= len {
            self.segment += 1;
            self.offset = 0;
        }
    }
}

/// Mutable cursor over a (source, destination) bio pair, carrying the
/// running sector number used to derive each sector's IV.
pub struct ConversionContext<'a> {
    src: Cursor<'a>,
    dst: Cursor<'a>,
    sector: SectorNumber,
    direction: Direction,
}

impl<'a> ConversionContext<'a> {
    pub fn new(src: &'a Bio, dst: &'a Bio, start_sector: SectorNumber, iv_offset: u64, direction: Direction) -> Self {
        Self {
            src: Cursor::new(src),
            dst: Cursor::new(dst),
            sector: start_sector + iv_offset,
            direction,
        }
    }

    /// Runs the conversion to completion and blocks until every sector has
    /// actually landed in the destination, even on the asynchronous
    /// backend. Used by the write path, which must not submit the
    /// destination clone to the lower device until its ciphertext is
    /// ready.
    pub fn run_blocking(&mut self, engine: &dyn CipherEngine, iv_gen: &dyn IvGenerator) -> CryptResult<()> {
        let barrier = Arc::new(Barrier::new());
        let mut iv = vec![0u8; iv_gen.iv_size()];
        let mut submitted = 0usize;

        while !self.src.at_end() && !self.dst.at_end() {
            let mut buf = [0u8; SECTOR_SIZE];
            self.src.read_sector(&mut buf);
            iv_gen.generate(self.sector, &mut iv)?;

            let dst_ptr = self.dst.sector_ptr();
            let dst_slice = unsafe { std::slice::from_raw_parts_mut(dst_ptr, SECTOR_SIZE) };

            let b = barrier.clone();
            let cb: CompletionCallback = Box::new(move |res| b.complete(res));
            let outcome = engine.convert_sector(dst_slice, &buf, &iv, self.sector, self.direction, Some(cb));
            submitted += 1;

            if let ConvertOutcome::Done(Err(e)) = outcome {
                return Err(e);
            }

            self.src.advance();
            self.dst.advance();
            self.sector += 1;
        }

        if !barrier.wait_until(submitted, ASYNC_WRITE_TIMEOUT) {
            tracing::error!(timeout = ?ASYNC_WRITE_TIMEOUT, "async write conversion timed out");
            return Err(CryptError::Io);
        }
        if let Some(err) = barrier.first_error() {
            return Err(err);
        }
        Ok(())
    }

    /// Fan-out entry point for the read path's decrypt phase: submits
    /// every sector in place (source and destination are the same bio)
    /// and invokes `on_sector` once per sector as each completes — from
    /// this call, for the synchronous backend, or from a background
    /// thread, for the asynchronous one. The caller drives its own
    /// pending count from `on_sector` for every sector, not only the
    /// last, which is the fix called for in the design notes: routing
    /// every async completion through the request's own counter instead
    /// of singling out the final sector avoids losing an error that lands
    /// on an earlier one.
    pub fn run_fanout<F>(&mut self, engine: &dyn CipherEngine, iv_gen: &dyn IvGenerator, on_sector: F) -> CryptResult<usize>
    where
        F: Fn(Result<(), CryptError>) + Send + Sync + 'static,
    {
        let on_sector = Arc::new(on_sector);
        let mut iv = vec![0u8; iv_gen.iv_size()];
        let mut count = 0usize;

        while !self.src.at_end() {
            let mut buf = [0u8; SECTOR_SIZE];
            self.src.read_sector(&mut buf);
            iv_gen.generate(self.sector, &mut iv)?;

            let dst_ptr = self.dst.sector_ptr();
            let dst_slice = unsafe { std::slice::from_raw_parts_mut(dst_ptr, SECTOR_SIZE) };

            let handler = on_sector.clone();
            let cb: CompletionCallback = Box::new(move |res| handler(res));
            let outcome = engine.convert_sector(dst_slice, &buf, &iv, self.sector, self.direction, Some(cb));

            // The synchronous backend has already invoked the callback by
            // the time `convert_sector` returns; the asynchronous one
            // invokes it later, from its own worker thread, once the
            // ciphertext has been written back through `dst_ptr`.
            let _ = outcome;

            self.src.advance();
            self.dst.advance();
            self.sector += 1;
            count += 1;
        }
        Ok(count)
    }
}

/// Per-call private completion tracker for a blocking (write) conversion:
/// counts completions and latches the first error, then wakes the waiter
/// once every submitted sector has completed.
struct Barrier {
    state: Mutex<BarrierState>,
    cv: Condvar,
}

#[derive(Default)]
struct BarrierState {
    completed: usize,
    first_error: Option<CryptError>,
}

impl Barrier {
    fn new() -> Self {
        Self { state: Mutex::new(BarrierState::default()), cv: Condvar::new() }
    }

    fn complete(&self, res: Result<(), CryptError>) {
        let mut st = self.state.lock().unwrap();
        st.completed += 1;
        if let Err(e) = res {
            if st.first_error.is_none() {
                st.first_error = Some(e);
            }
        }
        self.cv.notify_all();
    }

    fn wait_until(&self, total: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut st = self.state.lock().unwrap();
        while st.completed < total {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            st = self.cv.wait_timeout(st, deadline - now).unwrap().0;
        }
        true
    }

    fn first_error(&self) -> Option<CryptError> {
        self.state.lock().unwrap().first_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bio::{new_page, Segment};
    use crate::cipher::{AsyncCipherBackend, ChainMode, SyncCipherBackend};
    use crate::iv::PlainIv;

    fn make_bio(bytes: &[u8]) -> Bio {
        let page = new_page(bytes.len());
        page.lock().copy_from_slice(bytes);
        Bio::new(vec![Segment::new(page, 0, bytes.len())], 0, Direction::Encrypt)
    }

    fn empty_bio(len: usize) -> Bio {
        let page = new_page(len);
        Bio::new(vec![Segment::new(page, 0, len)], 0, Direction::Encrypt)
    }

    #[test]
    fn test_run_blocking_walks_multiple_sectors() {
        let key = vec![0x55u8; 32];
        let engine = SyncCipherBackend::new("aes", ChainMode::Cbc, key).unwrap();
        let iv_gen = PlainIv::new(engine.iv_size());

        let plaintext = vec![0x11u8; SECTOR_SIZE * 4];
        let src = make_bio(&plaintext);
        let dst = empty_bio(plaintext.len());

        let mut ctx = ConversionContext::new(&src, &dst, 0, 0, Direction::Encrypt);
        ctx.run_blocking(&engine, &iv_gen).unwrap();

        let dst_seg = &dst.segments[0];
        let mut ciphertext = vec![0u8; plaintext.len()];
        dst_seg.read_into(0, &mut ciphertext);
        assert_ne!(ciphertext, plaintext);

        // Decrypt back in place and confirm round trip.
        let decrypt_ctx_src = make_bio(&ciphertext);
        let decrypt_dst = empty_bio(plaintext.len());
        let mut ctx = ConversionContext::new(&decrypt_ctx_src, &decrypt_dst, 0, 0, Direction::Decrypt);
        ctx.run_blocking(&engine, &iv_gen).unwrap();
        let mut roundtripped = vec![0u8; plaintext.len()];
        decrypt_dst.segments[0].read_into(0, &mut roundtripped);
        assert_eq!(roundtripped, plaintext);
    }

    #[test]
    fn test_run_blocking_sector_independence() {
        // Changing one sector's plaintext must not change any other
        // sector's ciphertext: each sector's IV depends only on its own
        // sector number.
        let key = vec![0x66u8; 32];
        let engine = SyncCipherBackend::new("aes", ChainMode::Cbc, key).unwrap();
        let iv_gen = PlainIv::new(engine.iv_size());

        let mut plaintext_a = vec![0x00u8; SECTOR_SIZE * 2];
        let mut plaintext_b = plaintext_a.clone();
        plaintext_b[0] = 0xFF;

        let src_a = make_bio(&plaintext_a);
        let dst_a = empty_bio(plaintext_a.len());
        ConversionContext::new(&src_a, &dst_a, 0, 0, Direction::Encrypt)
            .run_blocking(&engine, &iv_gen)
            .unwrap();

        let src_b = make_bio(&plaintext_b);
        let dst_b = empty_bio(plaintext_b.len());
        ConversionContext::new(&src_b, &dst_b, 0, 0, Direction::Encrypt)
            .run_blocking(&engine, &iv_gen)
            .unwrap();

        let mut cipher_a = vec![0u8; SECTOR_SIZE * 2];
        dst_a.segments[0].read_into(0, &mut cipher_a);
        let mut cipher_b = vec![0u8; SECTOR_SIZE * 2];
        dst_b.segments[0].read_into(0, &mut cipher_b);

        assert_eq!(&cipher_a[SECTOR_SIZE..], &cipher_b[SECTOR_SIZE..]);
        assert_ne!(&cipher_a[..SECTOR_SIZE], &cipher_b[..SECTOR_SIZE]);

        let _ = &mut plaintext_a;
        let _ = &mut plaintext_b;
    }

    #[test]
    fn test_run_blocking_with_async_backend_waits_for_completion() {
        let key = vec![0x77u8; 32];
        let engine = AsyncCipherBackend::new("aes", ChainMode::Cbc, key).unwrap();
        let iv_gen = PlainIv::new(engine.iv_size());

        let plaintext = vec![0x88u8; SECTOR_SIZE * 3];
        let src = make_bio(&plaintext);
        let dst = empty_bio(plaintext.len());

        let mut ctx = ConversionContext::new(&src, &dst, 0, 0, Direction::Encrypt);
        ctx.run_blocking(&engine, &iv_gen).unwrap();

        let mut ciphertext = vec![0u8; plaintext.len()];
        dst.segments[0].read_into(0, &mut ciphertext);
        assert_ne!(ciphertext, plaintext);
    }

    #[test]
    fn test_run_fanout_decrypts_in_place_and_counts_sectors() {
        let key = vec![0x99u8; 32];
        let engine = SyncCipherBackend::new("aes", ChainMode::Cbc, key).unwrap();
        let iv_gen = PlainIv::new(engine.iv_size());

        let plaintext = vec![0xABu8; SECTOR_SIZE * 2];
        let src = make_bio(&plaintext);
        let dst = empty_bio(plaintext.len());
        ConversionContext::new(&src, &dst, 0, 0, Direction::Encrypt)
            .run_blocking(&engine, &iv_gen)
            .unwrap();

        let mut ciphertext = vec![0u8; plaintext.len()];
        dst.segments[0].read_into(0, &mut ciphertext);

        let cipher_bio = make_bio(&ciphertext);
        let completions = Arc::new(Mutex::new(Vec::new()));
        let completions_clone = completions.clone();
        let mut ctx = ConversionContext::new(&cipher_bio, &cipher_bio, 0, 0, Direction::Decrypt);
        let count = ctx
            .run_fanout(&engine, &iv_gen, move |res| {
                completions_clone.lock().unwrap().push(res.is_ok());
            })
            .unwrap();

        assert_eq!(count, 2);
        assert_eq!(completions.lock().unwrap().len(), 2);
        assert!(completions.lock().unwrap().iter().all(|&ok| ok));

        let mut decrypted = vec![0u8; plaintext.len()];
        cipher_bio.segments[0].read_into(0, &mut decrypted);
        assert_eq!(decrypted, plaintext);
    }
}
