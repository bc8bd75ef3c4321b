pub mod bridge;
pub mod client;
pub mod timecode;
