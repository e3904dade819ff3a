//! The dedicated worker-thread pool and the write/read path state
//! machines that run on it. Cryptography never runs inline in the
//! caller's context; every job here is a continuation posted by the
//! `Mapper` or re-posted by a device completion callback.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use blockveil_core::{Bio, ConversionContext, CryptError, Direction, Segment};

use crate::device::DeviceCompletion;
use crate::rlo::RequestLifecycleObject;
use crate::target::Target;

type Job = Box<dyn FnOnce() + Send>;

/// A named work queue onto which every cryptographic job is posted.
/// Backed by a fixed pool of OS threads draining an unbounded channel,
/// matching the "one named queue, no per-CPU fan-out" model spec.md
/// describes.
pub struct WorkerQueue {
    tx: Sender<Job>,
    _threads: Vec<std::thread::JoinHandle<()>>,
}

impl WorkerQueue {
    pub fn new(threads: usize) -> Self {
        let (tx, rx): (Sender<Job>, Receiver<Job>) = crossbeam_channel::unbounded();
        let handles = (0..threads.max(1))
            .map(|i| {
                let rx = rx.clone();
                std::thread::Builder::new()
                    .name(format!("blockveil-worker-{i}"))
                    .spawn(move || {
                        for job in rx.iter() {
                            job();
                        }
                    })
                    .expect("failed to spawn blockveil worker thread")
            })
            .collect();
        Self { tx, _threads: handles }
    }

    /// Posts `job`; never blocks the caller.
    pub fn submit(&self, job: Job) {
        // An unbounded channel never reports "full"; a closed receiver
        // (every worker thread panicked and exited) is the only failure
        // mode, and it means the process is already unrecoverable.
        self.tx.send(job).expect("blockveil worker pool is gone");
    }
}

/// How many clone pages may use blocking allocation before the write
/// loop switches to non-blocking, preferring a short clone over sleeping.
const MIN_BIO_PAGES: usize = 8;

/// Write-path entry point: splits `original` into one or more
/// destination clones, converting and submitting each as it is filled.
pub fn process_write(target: Arc<Target>, rlo: Arc<RequestLifecycleObject>, _worker: Arc<WorkerQueue>) {
    rlo.take_pending();

    let original = rlo.with_original(|b| Bio::new(b.segments.clone(), b.sector, b.direction));
    let sector_size = blockveil_core::SECTOR_SIZE;
    let total_sectors = original.sector_count();
    let mut sectors_done: u64 = 0;
    let mut pages_allocated_for_clones = 0usize;

    while sectors_done < total_sectors {
        let remaining = (total_sectors - sectors_done) as usize;
        let blocking = pages_allocated_for_clones < MIN_BIO_PAGES;
        pages_allocated_for_clones += 1;

        let page = match target.page_pool.alloc(blocking) {
            Some(p) => p,
            None => {
                tracing::error!("write clone allocation failed, latching NoMemory");
                rlo.dec_pending(Err(CryptError::NoMemory));
                return;
            }
        };

        let page_sectors = page.lock().len() / sector_size;
        let clone_sectors = remaining.min(page_sectors).max(1);
        let clone_len = clone_sectors * sector_size;
        let logical_sector_start = original.sector + sectors_done;
        let device_sector_start = target.start_sector + logical_sector_start;
        let dst = Bio::new(vec![Segment::new(page, 0, clone_len)], device_sector_start, Direction::Encrypt);

        let src_window = slice_bio(&original, sectors_done, clone_len / sector_size, sector_size);

        let mut ctx = ConversionContext::new(&src_window, &dst, logical_sector_start, target.iv_offset, Direction::Encrypt);
        if let Err(e) = ctx.run_blocking(target.engine(), target.iv_generator()) {
            tracing::error!(error = ?e, "write conversion failed");
            target.page_pool.free();
            rlo.dec_pending(Err(e));
            return;
        }

        let converted_sectors = (clone_len / sector_size) as u64;
        sectors_done += converted_sectors;
        if sectors_done < total_sectors {
            rlo.take_pending();
        }

        let target_for_cb = target.clone();
        let rlo_for_cb = rlo.clone();
        let on_complete: DeviceCompletion = Box::new(move |res| {
            target_for_cb.page_pool.free();
            rlo_for_cb.dec_pending(res);
        });
        target.device.submit(dst, on_complete);

        if sectors_done < total_sectors && pages_allocated_for_clones >= MIN_BIO_PAGES {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    rlo.dec_pending(Ok(()));
}

/// Read-path entry point: phase 1 (page-sharing ciphertext fetch), then
/// re-posts phase 2 (in-place decrypt) to the worker queue once the
/// fetch completes.
pub fn process_read(target: Arc<Target>, rlo: Arc<RequestLifecycleObject>, worker: Arc<WorkerQueue>) {
    rlo.take_pending();

    let original = rlo.with_original(|b| b.share_pages(target.start_sector + b.sector, Direction::Decrypt));

    let target_phase2 = target.clone();
    let rlo_phase2 = rlo.clone();
    let worker_phase2 = worker.clone();
    let on_fetch_complete: DeviceCompletion = Box::new(move |res| {
        if let Err(e) = res {
            tracing::error!(error = ?e, "ciphertext fetch failed");
            rlo_phase2.dec_pending(Err(e));
            return;
        }
        rlo_phase2.set_post_process();
        let target = target_phase2.clone();
        let rlo = rlo_phase2.clone();
        worker_phase2.submit(Box::new(move || decrypt_phase(target, rlo)));
    });

    target.device.submit(original, on_fetch_complete);
}

fn decrypt_phase(target: Arc<Target>, rlo: Arc<RequestLifecycleObject>) {
    let original = rlo.with_original(|b| Bio::new(b.segments.clone(), b.sector, Direction::Decrypt));
    let sector_count = original.sector_count();

    // The single pending reference taken in `process_read` covers this
    // whole phase; hand off to one reference per sector so a failure on
    // any sector — not only the last — is latched through its own
    // `dec_pending` call, per the per-sector fan-out completion model.
    for _ in 0..sector_count {
        rlo.take_pending();
    }
    rlo.dec_pending(Ok(()));

    let iv_gen = target.iv_generator();
    let engine = target.engine();
    let mut ctx = ConversionContext::new(&original, &original, original.sector, target.iv_offset, Direction::Decrypt);
    let rlo_for_sectors = rlo.clone();
    let result = ctx.run_fanout(engine, iv_gen, move |res| {
        rlo_for_sectors.dec_pending(res);
    });

    if let Err(e) = result {
        tracing::error!(error = ?e, "decrypt phase failed to walk bio");
    }
}

/// Builds a view over `bio` covering `sector_count` sectors starting
/// `sectors_in` sectors from its start, sharing the same pages (used to
/// hand the write loop a source window matching one destination clone's
/// size without copying).
fn slice_bio(bio: &Bio, sectors_in: u64, sector_count: usize, sector_size: usize) -> Bio {
    let mut remaining_skip = (sectors_in as usize) * sector_size;
    let mut remaining_take = sector_count * sector_size;
    let mut segments = Vec::new();

    for seg in &bio.segments {
        if remaining_skip >= seg.len {
            remaining_skip -= seg.len;
            continue;
        }
        let start = remaining_skip;
        remaining_skip = 0;
        let available = seg.len - start;
        let take = available.min(remaining_take);
        if take == 0 {
            break;
        }
        segments.push(Segment::new(seg.page.clone(), seg.offset + start, take));
        remaining_take -= take;
        if remaining_take == 0 {
            break;
        }
    }

    Bio::new(segments, bio.sector + sectors_in, bio.direction)
}
