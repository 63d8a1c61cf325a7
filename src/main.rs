fn main() {
    if let Err(e) = leftoverai_lib::run() {
        eprintln!("leftoverai: {:#}", e);
        std::process::exit(1);
    }
}
