pub mod catalog;
pub mod config;
pub mod export;
pub mod headless;
pub mod highlight;
pub mod model;
pub mod raster;
pub mod render;
pub mod repair;
pub mod studio;
#[doc(hidden)]
pub mod test_support;
pub mod viewport;
