fn main() {
    // ESP-IDF flash builds need the sysenv exported by embuild; host builds
    // (tests, fuzzing) have nothing to generate.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
