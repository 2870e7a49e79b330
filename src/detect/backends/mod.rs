pub mod scene;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use scene::SceneChangeDetector;

#[cfg(feature = "backend-tract")]
pub use tract::TractDetector;
