//! Subcommand implementations

pub mod clear;
pub mod collect;
pub mod init;

/// Print the coverkube version
pub fn print_version() {
    println!("coverkube {}", env!("CARGO_PKG_VERSION"));
}
