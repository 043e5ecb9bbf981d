//! Build script for the Portcullis gateway.
//!
//! Ensures the crate is recompiled when migration files change, which the
//! `SQLx` `migrate!()` macro requires to pick up schema updates.

fn main() {
    println!("cargo:rerun-if-changed=migrations");
}
