fn main() {
    if let Err(err) = plan_mapper::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
