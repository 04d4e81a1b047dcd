pub mod agent;
pub mod errors;
pub mod events;
pub mod fragments;
pub mod ids;
pub mod messages;
pub mod session;
pub mod summarizer;
pub mod trace;
