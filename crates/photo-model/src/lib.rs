//! Lapse Photo Model
//!
//! Defines the data contracts shared by the import and render engines:
//! - **Assets:** References to images in an external library, not yet decoded
//! - **Photos:** Imported images with their capture time and provenance
//! - **Settings:** Frame rate, render mode and quality preset of a render
//! - **Store:** The keyed photo store and its file and in-memory backends

pub mod asset;
pub mod photo;
pub mod settings;
pub mod store;

pub use asset::*;
pub use photo::*;
pub use settings::*;
pub use store::*;
