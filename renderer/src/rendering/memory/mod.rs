pub mod gpu_slab;
pub mod slab_allocator;
