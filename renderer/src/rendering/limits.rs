//! Capacities and the shader-storage binding contract shared with the
//! shader suite.

/// Initial face-buffer capacity, in 64-bit face records.
pub const FACE_BUFFER_CAPACITY: u32 = 1 << 20;
pub const FACE_BUFFER_MAX_CAPACITY: u32 = 1 << 24;

/// Initial chunk-descriptor capacity.
pub const CHUNK_BUFFER_CAPACITY: u32 = 1 << 10;
pub const CHUNK_BUFFER_MAX_CAPACITY: u32 = 1 << 16;

/// Initial light-cube capacity (8³ packed samples per slot).
pub const LIGHT_BUFFER_CAPACITY: u32 = 1 << 10;
pub const LIGHT_BUFFER_MAX_CAPACITY: u32 = 1 << 20;

// Stable storage-buffer binding indices. 0, 1, 5 and 6 belong to the
// animation and material collaborators and are listed here only to keep
// the contract in one place.
pub const ANIMATION_TIME_BUFFER_BINDING: u32 = 0;
pub const ANIMATION_FRAME_BUFFER_BINDING: u32 = 1;
pub const FACE_BUFFER_BINDING: u32 = 3;
pub const MATERIAL_BUFFER_BINDING: u32 = 5;
pub const PALETTE_BUFFER_BINDING: u32 = 6;
pub const CHUNK_BUFFER_BINDING: u32 = 7;
pub const LIGHT_BUFFER_BINDING: u32 = 8;

/// Faces the shared quad index buffer covers before it is regrown.
pub const INITIAL_INDEX_FACES: u32 = 1 << 16;

/// How far the block-selection ray reaches, in world units.
pub const SELECTION_RANGE: f64 = 6.0;
