//! Phoneme-timing ring for the face-animation viewer.
//!
//! A fixed-capacity single-producer/single-consumer ring living in a POSIX
//! shared-memory segment. The TTS worker is the producer; an external
//! viewer process maps the same segment and consumes. The producer never
//! blocks and never overwrites: when the ring is full, events are dropped.

use crate::defaults::{PHONEME_RING_CAPACITY, PHONEME_SHM_NAME};
use crate::error::{Result, VoxError};
use std::ffi::CString;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// One phoneme-timing event. Fixed layout shared with the viewer process.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhonemeEvent {
    /// Backend-defined phoneme identifier.
    pub phoneme_id: i64,
    /// Duration of the phoneme in seconds.
    pub duration_secs: f32,
    /// Wall-clock timestamp in microseconds since the Unix epoch.
    pub timestamp_us: u64,
}

#[repr(C)]
struct RingHeader {
    write_index: AtomicU32,
    read_index: AtomicU32,
    shutdown_flag: AtomicU32,
    /// Keeps the event array 8-byte aligned.
    _pad: u32,
}

#[repr(C)]
struct Segment {
    header: RingHeader,
    events: [PhonemeEvent; PHONEME_RING_CAPACITY],
}

enum Backing {
    /// Owned POSIX shm mapping, unmapped and unlinked on drop.
    Shared { name: CString, len: usize },
    /// In-process allocation with the same layout, for tests.
    Heap { _alloc: Box<Segment> },
}

/// SPSC phoneme ring. `(write_index - read_index) mod capacity` is the
/// number of unread events; a push that would make the indices equal drops
/// the event instead.
pub struct PhonemeRing {
    segment: *mut Segment,
    backing: Backing,
}

// SAFETY: index updates use acquire/release atomics; slot access is
// guarded by the SPSC discipline (one producer, one consumer).
unsafe impl Send for PhonemeRing {}
unsafe impl Sync for PhonemeRing {}

impl PhonemeRing {
    /// Creates (or re-creates) the shared-memory segment and maps it.
    ///
    /// The segment is truncated to the ring size and its header zeroed, so
    /// a stale segment from a crashed process starts clean.
    pub fn create_shared(name: &str) -> Result<Self> {
        let c_name = CString::new(name).map_err(|_| VoxError::SharedMemory {
            message: format!("invalid shm name: {name}"),
        })?;
        let len = std::mem::size_of::<Segment>();

        // SAFETY: straight POSIX shm_open/ftruncate/mmap sequence; every
        // return value is checked before use.
        unsafe {
            let fd = libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR,
                0o666 as libc::mode_t,
            );
            if fd < 0 {
                return Err(VoxError::SharedMemory {
                    message: format!(
                        "shm_open({name}) failed: {}",
                        std::io::Error::last_os_error()
                    ),
                });
            }

            if libc::ftruncate(fd, len as libc::off_t) < 0 {
                let err = std::io::Error::last_os_error();
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
                return Err(VoxError::SharedMemory {
                    message: format!("ftruncate({name}) failed: {err}"),
                });
            }

            let ptr = libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            );
            libc::close(fd);
            if ptr == libc::MAP_FAILED {
                let err = std::io::Error::last_os_error();
                libc::shm_unlink(c_name.as_ptr());
                return Err(VoxError::SharedMemory {
                    message: format!("mmap({name}) failed: {err}"),
                });
            }

            let segment = ptr as *mut Segment;
            let ring = Self {
                segment,
                backing: Backing::Shared { name: c_name, len },
            };
            ring.reset_header();
            log::info!("phoneme ring mapped at {name} ({len} bytes)");
            Ok(ring)
        }
    }

    /// Creates the default shared segment (`/tts_phoneme_queue`).
    pub fn create_default() -> Result<Self> {
        Self::create_shared(PHONEME_SHM_NAME)
    }

    /// Creates an in-process ring with the same layout, for tests.
    pub fn create_in_memory() -> Self {
        // SAFETY: a zeroed Segment is valid (zeroed atomics and plain-data
        // events), and alloc_zeroed hands us a uniquely owned allocation
        // with Segment's layout for Box::from_raw.
        let mut alloc: Box<Segment> = unsafe {
            let layout = std::alloc::Layout::new::<Segment>();
            let ptr = std::alloc::alloc_zeroed(layout) as *mut Segment;
            if ptr.is_null() {
                std::alloc::handle_alloc_error(layout);
            }
            Box::from_raw(ptr)
        };
        let segment: *mut Segment = &mut *alloc;
        Self {
            segment,
            backing: Backing::Heap { _alloc: alloc },
        }
    }

    fn header(&self) -> &RingHeader {
        // SAFETY: the segment pointer is valid for the life of self.
        unsafe { &(*self.segment).header }
    }

    fn reset_header(&self) {
        let header = self.header();
        header.write_index.store(0, Ordering::Release);
        header.read_index.store(0, Ordering::Release);
        header.shutdown_flag.store(0, Ordering::Release);
    }

    /// Producer side: appends one event. Returns false (dropping the
    /// event) when the ring is full.
    pub fn push(&self, event: PhonemeEvent) -> bool {
        let header = self.header();
        let write = header.write_index.load(Ordering::Relaxed);
        let next = (write + 1) % PHONEME_RING_CAPACITY as u32;
        if next == header.read_index.load(Ordering::Acquire) {
            return false;
        }
        // SAFETY: slot `write` is not visible to the consumer until the
        // release store below.
        unsafe {
            (*self.segment).events[write as usize] = event;
        }
        header.write_index.store(next, Ordering::Release);
        true
    }

    /// Consumer side: removes the oldest unread event.
    pub fn pop(&self) -> Option<PhonemeEvent> {
        let header = self.header();
        let read = header.read_index.load(Ordering::Relaxed);
        if read == header.write_index.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: slot `read` was published by the producer's release
        // store, observed by the acquire load above.
        let event = unsafe { (*self.segment).events[read as usize] };
        header
            .read_index
            .store((read + 1) % PHONEME_RING_CAPACITY as u32, Ordering::Release);
        Some(event)
    }

    /// Number of unread events.
    pub fn unread(&self) -> usize {
        let header = self.header();
        let write = header.write_index.load(Ordering::Acquire) as usize;
        let read = header.read_index.load(Ordering::Acquire) as usize;
        (write + PHONEME_RING_CAPACITY - read) % PHONEME_RING_CAPACITY
    }

    /// Flags shutdown to the viewer.
    pub fn set_shutdown(&self) {
        self.header().shutdown_flag.store(1, Ordering::Release);
    }

    /// Whether shutdown has been flagged.
    pub fn is_shutdown(&self) -> bool {
        self.header().shutdown_flag.load(Ordering::Acquire) != 0
    }
}

impl Drop for PhonemeRing {
    fn drop(&mut self) {
        if let Backing::Shared { name, len } = &self.backing {
            self.set_shutdown();
            // SAFETY: the mapping was created with exactly this length and
            // is not used past this point.
            unsafe {
                libc::munmap(self.segment as *mut libc::c_void, *len);
                libc::shm_unlink(name.as_ptr());
            }
        }
    }
}

/// Current wall-clock time in microseconds since the Unix epoch.
pub fn now_timestamp_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
