use tracing::info;
use tvin_tvd::{CaptureIo, FrameMapping};

use super::request::CaptureError;

/// Mid-gray in YUV; buffers are primed with it so nothing uninitialized is
/// ever shown before the first real frame lands.
const NEUTRAL_FILL: u8 = 0x80;

/// Which side of the driver/application boundary a buffer is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Not yet handed to the driver (or unmapped again).
    Free,
    /// On the driver's incoming queue, awaiting capture.
    Queued,
    /// Dequeued and held by the application.
    Filled,
}

struct Slot {
    index: u32,
    mapping: Option<FrameMapping>,
    state: SlotState,
}

/// Fixed pool of kernel-owned, memory-mapped frame buffers.
///
/// The pool is sized once by what the driver grants. On partial
/// initialization failure the usable length truncates to the prefix that
/// succeeded, while `unmap_all` always sweeps the full slot vector, so a
/// half-built pool still tears down completely.
pub struct FramePool {
    slots: Vec<Slot>,
    len: usize,
}

impl FramePool {
    /// A pool with no slots; `unmap_all` on it is a no-op.
    pub fn empty() -> Self {
        Self {
            slots: Vec::new(),
            len: 0,
        }
    }

    /// Request `requested` buffers from the driver. The granted count (which
    /// may be lower when contiguous memory is scarce) becomes the pool size.
    pub fn allocate<D: CaptureIo>(
        &mut self,
        driver: &mut D,
        requested: u32,
    ) -> Result<u32, CaptureError> {
        let granted = driver
            .request_buffers(requested)
            .map_err(CaptureError::RequestBuffers)?;
        if granted == 0 {
            return Err(CaptureError::NoBuffers);
        }
        info!(requested, granted, "driver granted capture buffers");
        self.slots = (0..granted)
            .map(|index| Slot {
                index,
                mapping: None,
                state: SlotState::Free,
            })
            .collect();
        self.len = granted as usize;
        Ok(granted)
    }

    /// Query and map every buffer in `[0, len)`.
    ///
    /// On failure at index `j` the pool truncates to the `j` buffers that
    /// were mapped, so teardown releases exactly what was acquired.
    pub fn map_all<D: CaptureIo>(&mut self, driver: &mut D) -> Result<(), CaptureError> {
        for i in 0..self.len {
            let index = self.slots[i].index;
            let info = match driver.query_buffer(index) {
                Ok(info) => info,
                Err(source) => {
                    self.len = i;
                    return Err(CaptureError::QueryBuffer { index, source });
                }
            };
            match driver.map_buffer(info) {
                Ok(mapping) => {
                    self.slots[i].mapping = Some(mapping);
                }
                Err(source) => {
                    self.len = i;
                    return Err(CaptureError::Mmap { index, source });
                }
            }
        }
        Ok(())
    }

    /// Prime every mapping with the neutral fill value, then hand all
    /// buffers to the driver's incoming queue.
    ///
    /// On enqueue failure at index `i` the pool truncates to `i + 1`: the
    /// failing buffer is still mapped and must be part of cleanup.
    pub fn prime_and_enqueue_all<D: CaptureIo>(
        &mut self,
        driver: &mut D,
    ) -> Result<(), CaptureError> {
        for i in 0..self.len {
            let slot = &mut self.slots[i];
            if let Some(mapping) = slot.mapping.as_mut() {
                mapping.fill(NEUTRAL_FILL);
            }
            let index = slot.index;
            if let Err(source) = driver.queue_buffer(index) {
                self.len = i + 1;
                return Err(CaptureError::Enqueue { index, source });
            }
            slot.state = SlotState::Queued;
        }
        Ok(())
    }

    /// Unmap every slot that still holds a mapping.
    ///
    /// Sweeps the full slot vector rather than the truncated pool length,
    /// and may be called any number of times.
    pub fn unmap_all(&mut self) {
        for slot in &mut self.slots {
            if slot.mapping.take().is_some() {
                slot.state = SlotState::Free;
            }
        }
    }

    /// Usable pool size; dequeue indices range over `[0, len)`.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the pool holds no usable buffers.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Buffers currently mapped into process memory.
    pub fn mapped_len(&self) -> usize {
        self.slots.iter().filter(|s| s.mapping.is_some()).count()
    }

    /// Buffers on the driver's queue.
    pub fn queued_len(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::Queued)
            .count()
    }

    /// Buffers dequeued and held by the application.
    pub fn held_len(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::Filled)
            .count()
    }

    fn slot_mut(&mut self, index: u32) -> Option<&mut Slot> {
        let i = index as usize;
        if i < self.len { self.slots.get_mut(i) } else { None }
    }

    /// Move a dequeued buffer into the application-held state.
    pub(crate) fn mark_filled(&mut self, index: u32) -> bool {
        match self.slot_mut(index) {
            Some(slot) if slot.mapping.is_some() => {
                slot.state = SlotState::Filled;
                true
            }
            _ => false,
        }
    }

    /// Move a buffer back into the driver-queued state.
    pub(crate) fn mark_queued(&mut self, index: u32) {
        if let Some(slot) = self.slot_mut(index) {
            slot.state = SlotState::Queued;
        }
    }

    /// Borrow the mapping behind a pool index.
    pub(crate) fn mapping(&self, index: u32) -> Option<&FrameMapping> {
        let i = index as usize;
        if i < self.len {
            self.slots.get(i).and_then(|s| s.mapping.as_ref())
        } else {
            None
        }
    }
}
