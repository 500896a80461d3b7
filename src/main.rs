//! # Vessel Engine Entry Point
//!
//! Runs the library's headless demo.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release -- [config.json]
//! ```

fn main() {
    vessel_engine::run();
}
