pub mod features;
pub mod locate;
