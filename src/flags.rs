use std::path::PathBuf;

xflags::xflags! {
    /// ActivityPub inbox processor.
    cmd kiosk {
        /// Path to the TOML configuration file, `kiosk.toml` by default.
        optional -c,--config config: PathBuf

        /// Run the inbox workers until interrupted.
        cmd serve {}
        /// Validate the configuration and exit.
        cmd check-config {}
    }
}
