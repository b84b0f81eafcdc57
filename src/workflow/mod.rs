pub mod batch_ctx;
pub mod volume_flow;

pub use batch_ctx::BatchCtx;
pub use volume_flow::VolumeFlow;
