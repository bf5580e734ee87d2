//! Build script for cpthook.
//!
//! Exposes the compilation target as `BUILD_TARGET` so the bot can report
//! it in CTCP VERSION replies.

fn main() {
    let target = std::env::var("TARGET").unwrap_or_else(|_| "unknown".to_owned());
    println!("cargo:rustc-env=BUILD_TARGET={target}");
}
