use std::mem::size_of;

use bytemuck::Pod;
use engine::mesh_generation::primitive_mesh::Allocation;
use thiserror::Error;

use crate::rendering::memory::slab_allocator::SlabAllocator;

#[derive(Debug, Error)]
#[error("slab \"{label}\" exhausted: cannot grow past {capacity} elements")]
pub struct SlabError {
    pub label: String,
    pub capacity: u32,
}

/// A typed shader-storage buffer with slot-based sub-allocation.
///
/// The CPU mirror keeps every live record so the buffer can be recreated
/// and refilled when the capacity doubles. All methods touch GPU state and
/// must only run on the render thread; binding invalidation caused by
/// growth surfaces through [`GpuSlab::take_buffer_replaced`] at the
/// `begin_render` boundary.
pub struct GpuSlab<T> {
    label: String,
    binding: u32,
    max_capacity: u32,
    device: wgpu::Device,
    queue: wgpu::Queue,
    buffer: wgpu::Buffer,
    allocator: SlabAllocator,
    mirror: Vec<T>,
    buffer_replaced: bool,
}

impl<T: Pod> GpuSlab<T> {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        binding: u32,
        capacity: u32,
        max_capacity: u32,
        label: impl Into<String>,
    ) -> Self {
        let label = label.into();
        let buffer = Self::create_buffer(device, &label, capacity);
        GpuSlab {
            binding,
            max_capacity,
            device: device.clone(),
            queue: queue.clone(),
            buffer,
            allocator: SlabAllocator::new(capacity),
            mirror: vec![T::zeroed(); capacity as usize],
            buffer_replaced: false,
            label,
        }
    }

    fn create_buffer(device: &wgpu::Device, label: &str, capacity: u32) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: capacity as u64 * size_of::<T>() as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    #[inline(always)]
    pub fn binding(&self) -> u32 {
        self.binding
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn capacity(&self) -> u32 {
        self.allocator.capacity()
    }

    pub fn used(&self) -> u32 {
        self.allocator.used()
    }

    /// Writes `records`, reusing the existing run when the length matches
    /// and re-allocating (growing the buffer if required) otherwise. The
    /// caller's handle is rewritten in place.
    pub fn upload(&mut self, records: &[T], allocation: &mut Allocation) -> Result<(), SlabError> {
        if records.is_empty() {
            self.free(allocation);
            return Ok(());
        }
        if allocation.len != records.len() as u32 {
            self.allocator.free(allocation);
            *allocation = self.allocate(records.len() as u32)?;
        }
        self.write_at(allocation.start, records);
        Ok(())
    }

    /// Rewrites the leading `records.len()` elements of an allocation,
    /// leaving the rest of the run untouched.
    pub fn write_prefix(&mut self, allocation: &Allocation, records: &[T]) {
        assert!(records.len() as u32 <= allocation.len);
        if !records.is_empty() {
            self.write_at(allocation.start, records);
        }
    }

    pub fn free(&mut self, allocation: &mut Allocation) {
        self.allocator.free(allocation);
    }

    /// Allocates a single element and returns its slot index.
    pub fn allocate_slot(&mut self) -> Result<u32, SlabError> {
        Ok(self.allocate(1)?.start)
    }

    pub fn write_slot(&mut self, slot: u32, record: &T) {
        self.write_at(slot, std::slice::from_ref(record));
    }

    pub fn free_slot(&mut self, slot: u32) {
        let mut allocation = Allocation { start: slot, len: 1 };
        self.allocator.free(&mut allocation);
    }

    fn allocate(&mut self, len: u32) -> Result<Allocation, SlabError> {
        loop {
            if let Some(allocation) = self.allocator.allocate(len) {
                return Ok(allocation);
            }
            if self.allocator.capacity() * 2 > self.max_capacity {
                return Err(SlabError {
                    label: self.label.clone(),
                    capacity: self.allocator.capacity(),
                });
            }
            self.grow_buffer();
        }
    }

    /// Doubles the capacity: a new buffer is created and refilled from the
    /// CPU mirror, so existing allocations keep their offsets.
    fn grow_buffer(&mut self) {
        let new_capacity = self.allocator.grow();
        log::debug!(
            "Growing slab \"{}\" to {} elements",
            self.label,
            new_capacity
        );
        self.mirror.resize(new_capacity as usize, T::zeroed());
        self.buffer = Self::create_buffer(&self.device, &self.label, new_capacity);
        self.queue
            .write_buffer(&self.buffer, 0, bytemuck::cast_slice(&self.mirror));
        self.buffer_replaced = true;
    }

    fn write_at(&mut self, start: u32, records: &[T]) {
        let start = start as usize;
        self.mirror[start..start + records.len()].copy_from_slice(records);
        self.queue.write_buffer(
            &self.buffer,
            start as u64 * size_of::<T>() as u64,
            bytemuck::cast_slice(records),
        );
    }

    /// Whether the underlying buffer was recreated since the last call;
    /// bind groups referencing it must be rebuilt.
    pub fn take_buffer_replaced(&mut self) -> bool {
        std::mem::take(&mut self.buffer_replaced)
    }
}
