pub mod archive;
pub mod postprocess;
