pub mod forward;
pub mod upstream;
