pub mod analysis;
pub mod command;
pub mod scaffold;
