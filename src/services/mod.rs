pub mod codec;
pub mod dispatcher;
pub mod geometry;
pub mod offload;
pub mod paths;
pub mod queue;
pub mod renditions;
pub mod storage;
pub mod workers;
