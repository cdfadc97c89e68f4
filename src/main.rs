extern crate path_echo;
extern crate env_logger;

use std::io::Write;


// port is fixed, there is no flag or env override
const ADDR: &'static str = "0.0.0.0:8080";


fn init_logger() {
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(buf, "[{}] - [{}] -> {}",
                record.level(),
                record.target(),
                record.args()
                )
            })
        .parse(&::std::env::var("LOG").unwrap_or_else(|_| "info".to_string()))
        .init();
}


pub fn main() {
    init_logger();
    if let Err(e) = path_echo::start(ADDR, path_echo::echo_target) {
        eprintln!("Error: {}", e);
        ::std::process::exit(1);
    }
}
