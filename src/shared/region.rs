//! Named shared image region.
//!
//! The region is a POSIX shared memory object (`shm_open`) that publisher,
//! workers and combiner map independently. Its size is fixed before any
//! image is known:
//!
//! ```text
//! ┌──────────┬─────┬─────────────┬──────────────────┬──────────────────┬─────┐
//! │ header   │ pad │ generations │ plane 0          │ plane 1          │ ... │
//! │ 54 bytes │ 2   │ 3 x u64     │ max_h * max_w * 4│ max_h * max_w * 4│     │
//! └──────────┴─────┴─────────────┴──────────────────┴──────────────────┴─────┘
//! ```
//!
//! Each plane stores rows at a stride of `max_width` pixels; an image of
//! width `w` uses the first `w` pixels of each of its first `h` rows.
//!
//! The generation slots tie done signals to images: the publisher stores
//! the number of the image it loaded, and each stage stores the number of
//! the image it filtered before posting done. A done post whose stage slot
//! lags the current generation belongs to an earlier image.
//!
//! The region has no internal locking. Which process may touch which rows of
//! which plane is decided by the gate handshake, so every accessor that hands
//! out a view is `unsafe` and documents the ownership it assumes.

use crate::bitmap::{self, HEADER_LEN, ImageHeader, Pixel, PlaneMut, PlaneRef, RowsMut};
use crate::config::{ImageLimits, PipelineConfig, Stage};
use crate::error::{Error, Result};
use crate::partition::RowRange;
use rustix::fd::{AsFd, BorrowedFd, OwnedFd};
use rustix::io::Errno;
use rustix::mm::{MapFlags, ProtFlags};
use rustix::shm;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

/// Permissions for newly created regions.
const REGION_MODE: u32 = 0o600;

/// Offset of the generation slots, the header rounded up to 8 bytes.
const GENERATION_OFFSET: usize = HEADER_LEN.next_multiple_of(8);

/// Current image slot followed by one slot per stage.
const GENERATION_SLOTS: usize = 1 + Stage::ALL.len();

/// Offset of plane 0.
const PLANES_OFFSET: usize = GENERATION_OFFSET + GENERATION_SLOTS * 8;

/// How often `open` re-reads the size of a region its creator has not
/// sized yet.
const SIZE_POLL_ATTEMPTS: u32 = 200;
const SIZE_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Size and plane arrangement of a shared region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionLayout {
    limits: ImageLimits,
    planes: usize,
}

impl RegionLayout {
    /// Layout for `planes` planes (at least one) of the given limits.
    pub fn new(limits: ImageLimits, planes: usize) -> Self {
        Self {
            limits,
            planes: planes.max(1),
        }
    }

    /// Layout implied by a pipeline configuration.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.limits, config.layout.plane_count())
    }

    /// Image limits the planes are sized for.
    pub fn limits(&self) -> ImageLimits {
        self.limits
    }

    /// Number of planes.
    pub fn planes(&self) -> usize {
        self.planes
    }

    /// Row stride of every plane, in pixels.
    pub fn stride(&self) -> usize {
        self.limits.max_width
    }

    /// Bytes per plane.
    pub fn plane_bytes(&self) -> usize {
        self.limits.plane_pixels() * Pixel::SIZE
    }

    /// Byte offset of plane `index`.
    pub fn plane_offset(&self, index: usize) -> usize {
        PLANES_OFFSET + index * self.plane_bytes()
    }

    /// Total region size in bytes.
    pub fn size(&self) -> usize {
        self.plane_offset(self.planes)
    }
}

/// A mapping of the named shared image region.
///
/// Dropping the handle unmaps the region; the region itself lives until
/// [`SharedImageBuffer::destroy`] unlinks it.
pub struct SharedImageBuffer {
    /// The shm file descriptor.
    fd: OwnedFd,
    /// Pointer to the mmap'd region.
    ptr: NonNull<u8>,
    /// Region name.
    name: String,
    /// Expected layout (its size equals the mapping length).
    layout: RegionLayout,
    /// Whether this handle created the region.
    created: bool,
}

impl SharedImageBuffer {
    /// Open the region, creating it if it does not exist.
    ///
    /// A newly created region is truncated to `layout.size()`. An existing
    /// region of any other size fails with [`Error::LayoutMismatch`].
    pub fn attach(name: &str, layout: RegionLayout) -> Result<Self> {
        match Self::open_exclusive(name, layout) {
            Err(Error::System(e)) if e == Errno::EXIST => Self::open(name, layout),
            other => other,
        }
    }

    /// Create the region, replacing any stale region left under `name`.
    pub fn create(name: &str, layout: RegionLayout) -> Result<Self> {
        Self::destroy(name)?;
        Self::open_exclusive(name, layout)
    }

    /// Open an existing region without creating it.
    ///
    /// Fails with the system error `ENOENT` when the region does not exist
    /// and with [`Error::LayoutMismatch`] when its size differs from
    /// `layout.size()`. A region of size zero is still being created; its
    /// size is polled for up to a second before it counts as a mismatch.
    pub fn open(name: &str, layout: RegionLayout) -> Result<Self> {
        let fd = shm::open(name, shm::OFlags::RDWR, shm::Mode::empty())?;

        let actual = settled_size(&fd)?;
        if actual != layout.size() {
            return Err(Error::LayoutMismatch {
                name: name.to_string(),
                expected: layout.size(),
                actual,
            });
        }

        let ptr = map(&fd, layout.size())?;
        tracing::debug!("SharedImageBuffer: attached {} ({} bytes)", name, actual);

        Ok(Self {
            fd,
            ptr,
            name: name.to_string(),
            layout,
            created: false,
        })
    }

    fn open_exclusive(name: &str, layout: RegionLayout) -> Result<Self> {
        let fd = shm::open(
            name,
            shm::OFlags::RDWR | shm::OFlags::CREATE | shm::OFlags::EXCL,
            shm::Mode::from_raw_mode(REGION_MODE),
        )?;

        // Set the size
        if let Err(e) = rustix::fs::ftruncate(&fd, layout.size() as u64) {
            let _ = shm::unlink(name);
            return Err(e.into());
        }

        let ptr = map(&fd, layout.size())?;
        tracing::info!(
            "SharedImageBuffer: created {} ({} bytes, {} plane(s) of {}x{})",
            name,
            layout.size(),
            layout.planes(),
            layout.limits().max_width,
            layout.limits().max_height
        );

        Ok(Self {
            fd,
            ptr,
            name: name.to_string(),
            layout,
            created: true,
        })
    }

    /// Release this mapping. The region stays valid for other attachers.
    pub fn detach(self) {
        tracing::debug!("SharedImageBuffer: detached {}", self.name);
        drop(self);
    }

    /// Remove the region name. Existing mappings stay valid until unmapped;
    /// a missing region is not an error.
    pub fn destroy(name: &str) -> Result<()> {
        match shm::unlink(name) {
            Ok(()) => {
                tracing::debug!("SharedImageBuffer: destroyed {}", name);
                Ok(())
            }
            Err(e) if e == Errno::NOENT => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Region name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Region layout.
    pub fn layout(&self) -> RegionLayout {
        self.layout
    }

    /// Whether this handle created the region.
    pub fn created(&self) -> bool {
        self.created
    }

    /// Read the header slot.
    ///
    /// The header is only written by the publisher before it signals the
    /// ready gates, so reading it after observing a ready signal is sound.
    pub fn header(&self) -> ImageHeader {
        let mut bytes = [0u8; HEADER_LEN];
        // SAFETY: the mapping is at least HEADER_LEN bytes long and u8 has
        // no invalid bit patterns.
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.as_ptr(), bytes.as_mut_ptr(), HEADER_LEN);
        }
        ImageHeader::from_bytes(&bytes)
    }

    /// Write the header slot.
    ///
    /// # Safety
    ///
    /// No other process may be reading the header: the caller must hold the
    /// publisher role between cycles.
    pub unsafe fn write_header(&self, header: &ImageHeader) {
        let bytes = header.to_bytes();
        // SAFETY: the mapping is at least HEADER_LEN bytes long; exclusive
        // access is the caller's contract.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.as_ptr(), HEADER_LEN);
        }
    }

    /// Number of the image currently loaded, 0 before the first load.
    pub fn generation(&self) -> u64 {
        self.generation_slot(0).load(Ordering::Acquire)
    }

    /// Record the number of the image being loaded.
    ///
    /// Stored by the publisher before it overwrites the region, so a stage
    /// still working on the previous image can no longer match.
    pub fn set_generation(&self, generation: u64) {
        self.generation_slot(0).store(generation, Ordering::Release);
    }

    /// Number of the image `stage` last finished.
    pub fn stage_generation(&self, stage: Stage) -> u64 {
        self.generation_slot(stage_slot(stage)).load(Ordering::Acquire)
    }

    /// Record that `stage` finished image `generation`.
    ///
    /// Stored by the worker after its pass and before posting done.
    pub fn mark_stage_done(&self, stage: Stage, generation: u64) {
        self.generation_slot(stage_slot(stage))
            .store(generation, Ordering::Release);
    }

    fn generation_slot(&self, slot: usize) -> &AtomicU64 {
        debug_assert!(slot < GENERATION_SLOTS);
        // SAFETY: the mapping is page aligned and GENERATION_OFFSET is a
        // multiple of 8, so every slot is an aligned u64 inside the mapping
        // for as long as `self` lives. All access to the slots is atomic.
        unsafe {
            AtomicU64::from_ptr(
                self.ptr
                    .as_ptr()
                    .add(GENERATION_OFFSET + slot * 8)
                    .cast::<u64>(),
            )
        }
    }

    /// Dimensions of the currently loaded image, if the header slot holds a
    /// valid header within the region's limits.
    pub fn image_dimensions(&self) -> Option<(usize, usize)> {
        let header = self.header();
        if !header.validate() {
            return None;
        }
        self.layout
            .limits()
            .check(header.width as i64, header.normalized_height())
            .ok()?;
        Some((header.width as usize, header.normalized_height() as usize))
    }

    /// Raw storage of plane `index`, `max_height * max_width` pixels.
    ///
    /// # Safety
    ///
    /// The caller must own every row of the plane for the lifetime of the
    /// returned slice (no other process or thread reads or writes it).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn plane_storage_mut(&self, index: usize) -> &mut [Pixel] {
        let (ptr, len) = self.plane_raw(index);
        // SAFETY: Pixel is 4 x u8 (alignment 1, no invalid bit patterns),
        // the range lies inside the mapping, exclusivity is the caller's
        // contract.
        unsafe { std::slice::from_raw_parts_mut(ptr, len) }
    }

    /// Read-only view of the first `width` x `height` pixels of plane
    /// `index`.
    ///
    /// # Safety
    ///
    /// No process may write the viewed rows while the view is alive: the
    /// caller must have observed the signal that ends the last write to
    /// them (ready for workers, done for the combiner).
    ///
    /// # Panics
    ///
    /// Panics if `index` or the dimensions exceed the layout.
    pub unsafe fn plane(&self, index: usize, width: usize, height: usize) -> PlaneRef<'_> {
        let (ptr, len) = self.plane_raw(index);
        // SAFETY: see plane_storage_mut; absence of writers is the caller's
        // contract.
        let pixels = unsafe { std::slice::from_raw_parts(ptr as *const Pixel, len) };
        PlaneRef::new(pixels, width, height, self.layout.stride())
    }

    /// Mutable view of the first `width` x `height` pixels of plane `index`.
    ///
    /// # Safety
    ///
    /// The caller must own every row of the view it touches; rows handed to
    /// other writers must be split off with [`PlaneMut::into_rows`] and never
    /// accessed here.
    ///
    /// # Panics
    ///
    /// Panics if `index` or the dimensions exceed the layout.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn plane_mut(&self, index: usize, width: usize, height: usize) -> PlaneMut<'_> {
        let stride = self.layout.stride();
        // SAFETY: forwarded to the caller.
        let storage = unsafe { self.plane_storage_mut(index) };
        PlaneMut::new(storage, width, height, stride)
    }

    /// Mutable access to rows `range` of plane `index`, `width` pixels wide.
    ///
    /// Unlike [`plane_mut`](Self::plane_mut) the returned view borrows only
    /// the requested rows, so writers of disjoint ranges never alias.
    ///
    /// # Safety
    ///
    /// The caller must own `range` of the plane for the lifetime of the view.
    ///
    /// # Panics
    ///
    /// Panics if `index`, `width` or `range` exceed the layout.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn rows_mut(&self, index: usize, width: usize, range: RowRange) -> RowsMut<'_> {
        let limits = self.layout.limits();
        assert!(
            width <= limits.max_width && range.end <= limits.max_height,
            "rows {} of width {} exceed {}x{}",
            range,
            width,
            limits.max_width,
            limits.max_height
        );
        let stride = self.layout.stride();
        let (ptr, len) = self.plane_raw(index);
        let offset = (range.start * stride).min(len);
        // SAFETY: offset..len lies inside the plane; exclusivity of the
        // range is the caller's contract.
        let pixels = unsafe { std::slice::from_raw_parts_mut(ptr.add(offset), len - offset) };
        RowsMut::new(pixels, width, stride, range)
    }

    /// Decode the bitmap at `path` into plane 0 and the header slot.
    ///
    /// On failure the header slot is left unchanged; plane 0 may hold a
    /// partially decoded image.
    ///
    /// # Safety
    ///
    /// The caller must own the whole region: no worker may be between its
    /// ready and done signals.
    pub unsafe fn load_image<P: AsRef<Path>>(&self, path: P) -> Result<ImageHeader> {
        let path = path.as_ref();
        let mut reader = BufReader::new(File::open(path)?);
        let stride = self.layout.stride();
        let limits = self.layout.limits();

        // SAFETY: region ownership is the caller's contract.
        let storage = unsafe { self.plane_storage_mut(0) };
        let (header, orientation) = bitmap::decode_into(&mut reader, &limits, storage, stride)?;
        // SAFETY: as above.
        unsafe { self.write_header(&header) };

        tracing::info!(
            "SharedImageBuffer: loaded {} ({}x{}, {:?})",
            path.display(),
            header.width,
            header.height,
            orientation
        );
        Ok(header)
    }

    fn plane_raw(&self, index: usize) -> (*mut Pixel, usize) {
        assert!(
            index < self.layout.planes(),
            "plane {} out of range ({} planes)",
            index,
            self.layout.planes()
        );
        let offset = self.layout.plane_offset(index);
        // SAFETY: offset + plane_bytes <= layout.size() == mapping length.
        let ptr = unsafe { self.ptr.as_ptr().add(offset) };
        (ptr.cast::<Pixel>(), self.layout.limits().plane_pixels())
    }
}

fn stage_slot(stage: Stage) -> usize {
    match stage {
        Stage::Blur => 1,
        Stage::Enhance => 2,
    }
}

/// Size of the shm object behind `fd`, waiting out a creator that has
/// opened it but not yet truncated it.
fn settled_size(fd: &OwnedFd) -> Result<usize> {
    let mut size = rustix::fs::fstat(fd)?.st_size as usize;
    let mut attempts = 0;
    while size == 0 && attempts < SIZE_POLL_ATTEMPTS {
        thread::sleep(SIZE_POLL_INTERVAL);
        size = rustix::fs::fstat(fd)?.st_size as usize;
        attempts += 1;
    }
    Ok(size)
}

fn map(fd: &OwnedFd, size: usize) -> Result<NonNull<u8>> {
    // SAFETY: a fresh shared mapping of `size` bytes of `fd`; no existing
    // memory is replaced.
    let ptr = unsafe {
        rustix::mm::mmap(
            std::ptr::null_mut(),
            size,
            ProtFlags::READ | ProtFlags::WRITE,
            MapFlags::SHARED,
            fd,
            0,
        )?
    };

    NonNull::new(ptr.cast::<u8>())
        .ok_or_else(|| Error::Config("mmap returned null".into()))
}

impl Drop for SharedImageBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr/len came from `map`; every view borrows `self`, so
        // none outlives the mapping.
        unsafe {
            let _ = rustix::mm::munmap(self.ptr.as_ptr().cast(), self.layout.size());
        }
        // fd is automatically closed when OwnedFd is dropped
    }
}

impl std::fmt::Debug for SharedImageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedImageBuffer")
            .field("name", &self.name)
            .field("layout", &self.layout)
            .field("created", &self.created)
            .finish()
    }
}

// SAFETY: the mapping is process-wide and valid for the handle's lifetime;
// all access to its contents goes through unsafe accessors whose callers
// uphold the row-ownership protocol.
unsafe impl Send for SharedImageBuffer {}
unsafe impl Sync for SharedImageBuffer {}

impl AsFd for SharedImageBuffer {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}
