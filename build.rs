fn main() {
    // The ESP-IDF environment is only needed for the Xtensa target. Build
    // scripts run on the host, so check TARGET rather than cfg.
    if let Ok(target) = std::env::var("TARGET") {
        if target.contains("xtensa") {
            embuild::espidf::sysenv::output();
        }
    }
}
