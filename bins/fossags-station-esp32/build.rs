//! Build script for the ground station firmware
//!
//! Exports the ESP-IDF environment so esp-idf-svc can find the IDF toolchain.

fn main() {
    embuild::espidf::sysenv::output();
}
