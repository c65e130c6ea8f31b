fn main() {
    let code = demo_deployer::run_cli();
    if code != 0 {
        std::process::exit(code);
    }
}
