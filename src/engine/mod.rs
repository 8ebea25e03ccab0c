pub mod aggregation;
pub mod background;
pub mod collector;
pub mod spec_resolver;
pub mod subscription;
