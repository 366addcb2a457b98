fn main() {
    #[cfg(feature = "cli")]
    romdelta::cli::run();

    #[cfg(not(feature = "cli"))]
    {
        eprintln!("romdelta: CLI not enabled. Rebuild with `--features cli`.");
        std::process::exit(1);
    }
}
