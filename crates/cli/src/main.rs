fn main() {
    if let Err(error) = mvs_cache_cli::run(std::env::args_os()) {
        eprintln!("{error:#}");
        std::process::exit(1);
    }
}
