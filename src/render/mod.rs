pub mod color;
pub mod frame;
pub mod geometry;
pub mod gpu;
pub mod pipeline;
pub mod sink;
pub mod text;
pub mod visual;
