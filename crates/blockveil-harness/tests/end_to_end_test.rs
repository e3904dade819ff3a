//! End-to-end scenarios driving the full `construct -> Mapper ->
//! WorkerQueue -> MemoryDevice` stack, the way a real upper layer and
//! backing device would see it.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use blockveil_abi::target::construct;
use blockveil_core::bio::{new_page, Segment};
use blockveil_core::{Bio, Direction, SECTOR_SIZE};
use blockveil_harness::MemoryDevice;
use blockveil_membrane::{Mapper, WorkerQueue, MIN_POOL_PAGES};

fn page_with(bytes: &[u8]) -> blockveil_core::Page {
    let page = new_page(bytes.len());
    page.lock().copy_from_slice(bytes);
    page
}

fn write_then_read(mapper: &Mapper, plaintext: &[u8], sector: u64) -> Vec<u8> {
    let (write_tx, write_rx) = mpsc::channel();
    let write_bio = Bio::new(vec![Segment::new(page_with(plaintext), 0, plaintext.len())], sector, Direction::Encrypt);
    mapper.submit(write_bio, move |_bio, res| write_tx.send(res).unwrap()).unwrap();
    write_rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();

    let (read_tx, read_rx) = mpsc::channel();
    let read_page = new_page(plaintext.len());
    let read_bio = Bio::new(vec![Segment::new(read_page.clone(), 0, plaintext.len())], sector, Direction::Decrypt);
    mapper.submit(read_bio, move |_bio, res| read_tx.send(res).unwrap()).unwrap();
    read_rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();

    read_page.lock().clone()
}

/// Scenario 1: round-trip AES-CBC-ESSIV-SHA256.
#[test]
fn test_round_trip_aes_cbc_essiv_sha256() {
    let device = Arc::new(MemoryDevice::new());
    let key_hex = "00".repeat(32);
    let ct = construct("aes-cbc-essiv:sha256", &key_hex, 0, "/dev/loop0", 0, device).unwrap();
    let mapper = Mapper::new(ct.target.clone(), Arc::new(WorkerQueue::new(2)));

    let plaintext = vec![0x5au8; SECTOR_SIZE * 3];
    let got = write_then_read(&mapper, &plaintext, 0);
    assert_eq!(got, plaintext);
}

/// Scenario 2: per-sector IV independence — the same plaintext written
/// to two different sectors produces different ciphertext on the
/// backing device.
#[test]
fn test_per_sector_iv_independence() {
    let device = Arc::new(MemoryDevice::new());
    let key_hex = "11".repeat(32);
    let ct = construct("aes-cbc-essiv:sha256", &key_hex, 0, "/dev/loop0", 0, device.clone()).unwrap();
    let mapper = Mapper::new(ct.target.clone(), Arc::new(WorkerQueue::new(2)));

    let plaintext = vec![0x33u8; SECTOR_SIZE];
    let (tx_a, rx_a) = mpsc::channel();
    mapper
        .submit(Bio::new(vec![Segment::new(page_with(&plaintext), 0, SECTOR_SIZE)], 0, Direction::Encrypt), move |_, r| tx_a.send(r).unwrap())
        .unwrap();
    rx_a.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();

    let (tx_b, rx_b) = mpsc::channel();
    mapper
        .submit(Bio::new(vec![Segment::new(page_with(&plaintext), 0, SECTOR_SIZE)], 1, Direction::Encrypt), move |_, r| tx_b.send(r).unwrap())
        .unwrap();
    rx_b.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();

    let cipher_a = device.raw_sector(0).unwrap();
    let cipher_b = device.raw_sector(1).unwrap();
    assert_ne!(cipher_a, cipher_b);
}

/// Scenario 3: the IV offset shifts every sector's IV derivation, so two
/// targets differing only in `iv_offset` produce different ciphertext
/// for the same plaintext at the same sector.
#[test]
fn test_iv_offset_changes_ciphertext() {
    let key_hex = "22".repeat(32);
    let plaintext = vec![0x44u8; SECTOR_SIZE];

    let device_a = Arc::new(MemoryDevice::new());
    let ct_a = construct("aes-cbc-essiv:sha256", &key_hex, 0, "/dev/loop0", 0, device_a.clone()).unwrap();
    let mapper_a = Mapper::new(ct_a.target.clone(), Arc::new(WorkerQueue::new(1)));
    let (tx_a, rx_a) = mpsc::channel();
    mapper_a
        .submit(Bio::new(vec![Segment::new(page_with(&plaintext), 0, SECTOR_SIZE)], 0, Direction::Encrypt), move |_, r| tx_a.send(r).unwrap())
        .unwrap();
    rx_a.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();

    let device_b = Arc::new(MemoryDevice::new());
    let ct_b = construct("aes-cbc-essiv:sha256", &key_hex, 7, "/dev/loop0", 0, device_b.clone()).unwrap();
    let mapper_b = Mapper::new(ct_b.target.clone(), Arc::new(WorkerQueue::new(1)));
    let (tx_b, rx_b) = mpsc::channel();
    mapper_b
        .submit(Bio::new(vec![Segment::new(page_with(&plaintext), 0, SECTOR_SIZE)], 0, Direction::Encrypt), move |_, r| tx_b.send(r).unwrap())
        .unwrap();
    rx_b.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();

    assert_ne!(device_a.raw_sector(0), device_b.raw_sector(0));
}

/// Scenario 4: wiping the key blocks resume until a new key is set, and
/// both `key wipe` and `key set` reach the backend's real operative key,
/// not just the status-facing slot `key_hex`/`preresume` read.
#[test]
fn test_key_wipe_blocks_resume_and_key_set_changes_backend_key() {
    let device = Arc::new(MemoryDevice::new());
    let key_hex = "33".repeat(32);
    let ct = construct("aes-cbc-plain", &key_hex, 0, "/dev/loop0", 0, device.clone()).unwrap();
    let mapper = Mapper::new(ct.target.clone(), Arc::new(WorkerQueue::new(2)));

    assert!(ct.target.preresume().is_ok());
    let plaintext = vec![0x77u8; SECTOR_SIZE];
    let got = write_then_read(&mapper, &plaintext, 0);
    assert_eq!(got, plaintext);
    let ciphertext_before = device.raw_sector(0).unwrap();

    ct.target.postsuspend();
    ct.target.key_wipe().unwrap();
    assert!(ct.target.preresume().is_err());

    ct.target.key_set(vec![0x99u8; 32]).unwrap();
    assert!(ct.target.preresume().is_ok());
    ct.target.resume();

    // Same plaintext, same sector, but the backend's operative key has
    // changed — the ciphertext stored on the device must differ, proving
    // `key_set` rewrote the key `apply()` actually uses rather than only
    // the cosmetic status slot.
    let got_after = write_then_read(&mapper, &plaintext, 0);
    assert_eq!(got_after, plaintext);
    let ciphertext_after = device.raw_sector(0).unwrap();
    assert_ne!(ciphertext_before, ciphertext_after);
}

/// Scenario 5: a write spanning many more sectors than fit in a single
/// pool page still round-trips under genuine page-pool pressure — the
/// reserve is pre-drained to zero free pages, so the first
/// `MIN_BIO_PAGES` clone allocations (blocking) must actually wait for a
/// background release rather than succeeding immediately against a
/// never-contended pool.
#[test]
fn test_large_write_splits_across_many_clones_under_pool_pressure() {
    let device = Arc::new(MemoryDevice::new());
    let key_hex = "44".repeat(32);
    let ct = construct("aes-cbc-plain", &key_hex, 0, "/dev/loop0", 0, device).unwrap();
    let mapper = Mapper::new(ct.target.clone(), Arc::new(WorkerQueue::new(4)));

    // Drain the entire reserve before the write starts: nothing is
    // immediately available, so every one of the write loop's first
    // blocking allocations must wait on the release below.
    let held: Vec<_> = (0..MIN_POOL_PAGES).map(|_| ct.target.page_pool.alloc(false).unwrap()).collect();
    assert!(ct.target.page_pool.alloc(false).is_none());

    let release_target = ct.target.clone();
    std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(5));
        for _ in 0..MIN_POOL_PAGES {
            release_target.page_pool.free();
        }
        drop(held);
    });

    // 100 sectors, well past the 8-page (64-sector) blocking threshold.
    let plaintext: Vec<u8> = (0..100 * SECTOR_SIZE).map(|i| (i % 251) as u8).collect();
    let got = write_then_read(&mapper, &plaintext, 0);
    assert_eq!(got, plaintext);
}

/// Scenario 6: null-IV mode is deterministic across sectors, matching
/// the compatibility mode's documented lack of per-sector uniqueness.
#[test]
fn test_null_iv_produces_identical_ciphertext_across_sectors() {
    let device = Arc::new(MemoryDevice::new());
    let key_hex = "55".repeat(32);
    let ct = construct("aes-cbc-null", &key_hex, 0, "/dev/loop0", 0, device.clone()).unwrap();
    let mapper = Mapper::new(ct.target.clone(), Arc::new(WorkerQueue::new(2)));

    let plaintext = vec![0x66u8; SECTOR_SIZE];
    let (tx_a, rx_a) = mpsc::channel();
    mapper
        .submit(Bio::new(vec![Segment::new(page_with(&plaintext), 0, SECTOR_SIZE)], 0, Direction::Encrypt), move |_, r| tx_a.send(r).unwrap())
        .unwrap();
    rx_a.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();

    let (tx_b, rx_b) = mpsc::channel();
    mapper
        .submit(Bio::new(vec![Segment::new(page_with(&plaintext), 0, SECTOR_SIZE)], 1, Direction::Encrypt), move |_, r| tx_b.send(r).unwrap())
        .unwrap();
    rx_b.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();

    assert_eq!(device.raw_sector(0), device.raw_sector(1));
}
