fn main() {
    println!("cargo:rerun-if-env-changed=TARGET");

    // The ESP-IDF environment is only needed for firmware builds (Xtensa).
    // Host builds of the library, the loopback demo and the tests skip it.
    let target = std::env::var("TARGET").unwrap_or_default();
    if target.contains("xtensa") {
        embuild::espidf::sysenv::output();
    }
}
