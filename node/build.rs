fn main() {
    // Only the ESP target build needs the esp-idf environment propagated.
    if std::env::var_os("CARGO_FEATURE_ESP32").is_some() {
        embuild::espidf::sysenv::output();
    }
}
