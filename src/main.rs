fn main() {
    if let Err(err) = row_audit::run() {
        eprintln!("error: {err:#}");
        std::process::exit(row_audit::error::exit_code(&err));
    }
}
