pub mod assignment;
pub mod config;
pub mod correspondence;
pub mod detector;
pub mod error;
pub mod image;
pub mod mesh;
pub mod my_types;
pub mod pipeline;
pub mod preprocess;
pub mod track;
pub mod video;
pub mod visualization;
