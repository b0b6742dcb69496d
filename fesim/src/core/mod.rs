pub mod agent;
pub mod controller;
pub mod error;
pub mod events;
pub mod handle_race;
pub mod integrator;
pub mod physics;
pub mod race;
pub mod rng;
pub mod track;
