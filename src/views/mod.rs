//! Views module - all page components

mod analyze;
pub use analyze::Analyze;

mod detect;
pub use detect::Detect;

mod navbar;
pub use navbar::Navbar;

mod settings;
pub use settings::Settings;

mod upload;
pub use upload::UploadImage;
