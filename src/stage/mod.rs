//! The stages wired into the theme pipelines.

mod concat;
mod css;
mod external;
mod image;
mod rename;
mod sass;
mod tee;

pub use concat::Concat;
pub use css::{Autoprefix, MinifyCss};
pub use external::External;
pub use image::{ImageMin, Quality};
pub use rename::Rename;
pub use sass::Sass;
pub use tee::Tee;
