mod loader;
mod render;

pub use loader::{CsvSource, DataSource};
pub use render::{normalize_image, render_png};
