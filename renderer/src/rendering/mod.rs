pub mod chunk_buffers;
pub mod limits;
pub mod memory;
pub mod passes;
pub mod selection;
pub mod texture;
pub mod transparent;
pub mod util;
pub mod world_renderer;
