//! Built-in search sources.

mod fixture;

pub use fixture::{Fixture, FixtureSource};
