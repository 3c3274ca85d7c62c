pub mod bulletin;

pub use bulletin::BulletinApp;
