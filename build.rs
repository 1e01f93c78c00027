#![forbid(unsafe_code)]

fn main() {
    // Logged at startup.
    build_data::set_RUSTC_VERSION();
}
